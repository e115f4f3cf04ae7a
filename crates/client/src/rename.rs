//! Symbol rename.
//!
//! Two phases: `prepare_rename` produces the placeholder and range for
//! the host's dialog (using the server's `prepareRename` when offered, a
//! word scan otherwise), and `rename` submits the new name under the
//! document lock and applies the resulting workspace edit. The fallback
//! chain is expressed as `Result` values; a missing capability is a
//! variant, not an exception path.

use lsp_types::{RenameParams, TextDocumentIdentifier, TextDocumentPositionParams, WorkDoneProgressParams};
use moor_lsp::{Error, Result, char_to_lsp_position, lsp_range_to_char_range};
use ropey::Rope;
use tracing::debug;

use crate::document::{DocumentPlugin, UiEvent};
use crate::sync::LOCK_TIMEOUT;

/// What the rename dialog needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenamePrompt {
	/// Current symbol text, pre-filled in the dialog.
	pub placeholder: String,
	/// Char range the rename anchors to.
	pub range: std::ops::Range<usize>,
}

impl DocumentPlugin {
	fn supports_rename(&self) -> bool {
		self.client().capabilities().is_some_and(|caps| caps.rename_provider.is_some())
	}

	fn supports_prepare_rename(&self) -> bool {
		use lsp_types::OneOf;
		match self.client().capabilities().and_then(|caps| caps.rename_provider) {
			Some(OneOf::Right(options)) => options.prepare_provider == Some(true),
			_ => false,
		}
	}

	/// Computes the rename prompt at `pos`.
	///
	/// Fails with [`Error::CapabilityMissing`] when the server does not
	/// advertise rename at all, and with [`Error::Protocol`] when the
	/// position is not renameable (whitespace, or the server refused).
	pub async fn prepare_rename(&self, pos: usize) -> Result<RenamePrompt> {
		if !self.supports_rename() {
			return Err(Error::CapabilityMissing("rename"));
		}

		let rope = self.text();
		let pos = pos.min(rope.len_chars());
		let encoding = self.client().offset_encoding();

		if self.supports_prepare_rename() {
			let params = TextDocumentPositionParams {
				text_document: TextDocumentIdentifier { uri: self.uri() },
				position: char_to_lsp_position(&rope, pos, encoding),
			};
			match self.client().request::<lsp_types::request::PrepareRenameRequest>(params).await {
				Ok(Some(response)) => {
					use lsp_types::PrepareRenameResponse;
					let range = match response {
						PrepareRenameResponse::Range(range) => range,
						PrepareRenameResponse::RangeWithPlaceholder { range, .. } => range,
						PrepareRenameResponse::DefaultBehavior { .. } => {
							return Err(Error::Protocol("cannot rename this symbol".into()));
						}
					};
					let chars = lsp_range_to_char_range(&rope, range, encoding)
						.ok_or_else(|| Error::Protocol("prepareRename range outside document".into()))?;
					let placeholder = rope.slice(chars.clone()).to_string();
					return Ok(RenamePrompt {
						placeholder,
						range: chars,
					});
				}
				Ok(None) => return Err(Error::Protocol("cannot rename this symbol".into())),
				Err(e) => {
					// Server-side refusal falls back to the word scan.
					debug!(error = %e, "rename.prepare_failed");
				}
			}
		}

		word_range_at(&rope, pos)
			.map(|range| RenamePrompt {
				placeholder: rope.slice(range.clone()).to_string(),
				range,
			})
			.ok_or_else(|| Error::Protocol("cannot rename this symbol".into()))
	}

	/// Submits the rename. The host calls this with the dialog's result.
	pub async fn rename(&self, prompt: &RenamePrompt, new_name: &str) -> Result<()> {
		let new_name = new_name.trim();
		if new_name.is_empty() {
			self.shared.emit(UiEvent::Notice {
				message: "Rename cancelled: empty name".into(),
			});
			return Ok(());
		}
		if new_name == prompt.placeholder {
			self.shared.emit(UiEvent::Notice {
				message: "Rename cancelled: name unchanged".into(),
			});
			return Ok(());
		}

		let rope = self.text();
		let encoding = self.client().offset_encoding();
		let params = RenameParams {
			text_document_position: TextDocumentPositionParams {
				text_document: TextDocumentIdentifier { uri: self.uri() },
				position: char_to_lsp_position(&rope, prompt.range.start, encoding),
			},
			new_name: new_name.to_string(),
			work_done_progress_params: WorkDoneProgressParams::default(),
		};

		let client = self.client().clone();
		let edit = self
			.sync()
			.do_with_lock(LOCK_TIMEOUT, move |_snapshot| async move {
				client.request::<lsp_types::request::Rename>(params).await
			})
			.await?;

		match edit {
			Some(edit) => self.apply_workspace_edit(edit).await,
			None => self.shared.emit(UiEvent::Notice {
				message: "Rename produced no changes".into(),
			}),
		}
		Ok(())
	}

	/// Entry point for hosts that just want the notice behavior: gate,
	/// prompt, and report in one call.
	pub async fn prepare_rename_or_notify(&self, pos: usize) -> Option<RenamePrompt> {
		match self.prepare_rename(pos).await {
			Ok(prompt) => Some(prompt),
			Err(Error::CapabilityMissing(_)) => {
				self.shared.emit(UiEvent::Notice {
					message: "Rename is not supported by this server".into(),
				});
				None
			}
			Err(e) => {
				self.shared.emit(UiEvent::Notice { message: e.to_string() });
				None
			}
		}
	}
}

fn is_word_char(ch: char) -> bool {
	ch.is_alphanumeric() || ch == '_'
}

/// Word range around `pos`, or `None` at whitespace/punctuation.
fn word_range_at(rope: &Rope, pos: usize) -> Option<std::ops::Range<usize>> {
	let len = rope.len_chars();
	if len == 0 {
		return None;
	}
	let pos = pos.min(len);

	let on_word = pos < len && is_word_char(rope.char(pos));
	let before_word = pos > 0 && is_word_char(rope.char(pos - 1));
	if !on_word && !before_word {
		return None;
	}

	let mut start = pos;
	while start > 0 && is_word_char(rope.char(start - 1)) {
		start -= 1;
	}
	let mut end = pos;
	while end < len && is_word_char(rope.char(end)) {
		end += 1;
	}
	Some(start..end)
}
