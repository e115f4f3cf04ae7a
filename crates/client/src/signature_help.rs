//! Signature help state machine.
//!
//! An active request carries the position it was issued at and a drop
//! token; selection changes drop the in-flight result and give the
//! tooltip 250 ms to justify itself before it is cleared. Results that
//! repeat the currently shown signatures with an unchanged active
//! parameter are not re-dispatched.

use std::time::Duration;

use lsp_types::{
	SignatureHelpContext, SignatureHelpParams, SignatureHelpTriggerKind, TextDocumentIdentifier,
	TextDocumentPositionParams,
};
use moor_lsp::char_to_lsp_position;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::document::{DocumentPlugin, UiEvent};

const RETRIGGER_DEBOUNCE: Duration = Duration::from_millis(250);

#[derive(Clone, PartialEq)]
struct ShownSignature {
	signatures: Vec<lsp_types::SignatureInformation>,
	active_parameter: Option<u32>,
}

struct Active {
	token: CancellationToken,
	showing: Option<ShownSignature>,
	generation: u64,
}

#[derive(Default)]
pub(crate) struct SignatureState {
	active: Mutex<Option<Active>>,
}

impl SignatureState {
	fn begin(&self) -> CancellationToken {
		let mut active = self.active.lock();
		let token = CancellationToken::new();
		match &mut *active {
			Some(current) => {
				current.token.cancel();
				current.token = token.clone();
				current.generation += 1;
			}
			None => {
				*active = Some(Active {
					token: token.clone(),
					showing: None,
					generation: 0,
				});
			}
		}
		token
	}

	fn is_showing(&self) -> bool {
		self.active.lock().as_ref().is_some_and(|a| a.showing.is_some())
	}

	pub(crate) fn cancel(&self) {
		if let Some(active) = self.active.lock().take() {
			active.token.cancel();
		}
	}
}

impl DocumentPlugin {
	fn signature_trigger_characters(&self) -> (Vec<String>, Vec<String>) {
		let options = self.client().capabilities().and_then(|caps| caps.signature_help_provider);
		match options {
			Some(options) => (
				options.trigger_characters.unwrap_or_default(),
				options.retrigger_characters.unwrap_or_default(),
			),
			None => (Vec::new(), Vec::new()),
		}
	}

	/// Host hook for every inserted character.
	pub async fn signature_help_on_insert(&self, pos: usize, ch: char) {
		let (triggers, retriggers) = self.signature_trigger_characters();
		let ch = ch.to_string();
		let is_trigger = triggers.contains(&ch);
		let is_retrigger = self.shared.signature.is_showing() && retriggers.contains(&ch);
		if !is_trigger && !is_retrigger {
			return;
		}

		self.request_signature_help(pos, SignatureHelpTriggerKind::TRIGGER_CHARACTER, Some(ch), is_retrigger)
			.await;
	}

	/// Host hook for selection movement while a signature is showing.
	/// Drops the in-flight result, then re-queries after a debounce; the
	/// tooltip clears if the re-query comes back empty or stale.
	pub fn signature_help_on_selection_change(&self, pos: usize) {
		if !self.shared.signature.is_showing() {
			return;
		}

		let generation = {
			let mut active = self.shared.signature.active.lock();
			let Some(active) = active.as_mut() else {
				return;
			};
			active.token.cancel();
			active.generation += 1;
			active.generation
		};

		let plugin = self.clone();
		tokio::spawn(async move {
			tokio::time::sleep(RETRIGGER_DEBOUNCE).await;
			{
				let active = plugin.shared.signature.active.lock();
				let still_current = active.as_ref().is_some_and(|a| a.generation == generation);
				if !still_current {
					return;
				}
			}
			plugin
				.request_signature_help(pos, SignatureHelpTriggerKind::CONTENT_CHANGE, None, true)
				.await;
		});
	}

	async fn request_signature_help(&self, pos: usize, trigger_kind: SignatureHelpTriggerKind, trigger_character: Option<String>, is_retrigger: bool) {
		let rope = self.text();
		let pos = pos.min(rope.len_chars());
		let encoding = self.client().offset_encoding();
		let token = self.shared.signature.begin();

		let params = SignatureHelpParams {
			context: Some(SignatureHelpContext {
				trigger_kind,
				trigger_character,
				is_retrigger,
				active_signature_help: None,
			}),
			text_document_position_params: TextDocumentPositionParams {
				text_document: TextDocumentIdentifier { uri: self.uri() },
				position: char_to_lsp_position(&rope, pos, encoding),
			},
			work_done_progress_params: Default::default(),
		};

		let response = tokio::select! {
			_ = token.cancelled() => return,
			response = self.client().request::<lsp_types::request::SignatureHelpRequest>(params) => response,
		};
		if token.is_cancelled() {
			return;
		}

		let help = match response {
			Ok(Some(help)) if !help.signatures.is_empty() => help,
			Ok(_) => {
				self.clear_signature_help();
				return;
			}
			Err(e) => {
				debug!(error = %e, "signature.request_failed");
				return;
			}
		};

		let shown = ShownSignature {
			signatures: help.signatures.clone(),
			active_parameter: help.active_parameter,
		};

		{
			let mut active = self.shared.signature.active.lock();
			let Some(active) = active.as_mut() else {
				return;
			};
			// Same signatures, same highlighted parameter: the tooltip is
			// already right.
			if active.showing.as_ref() == Some(&shown) {
				return;
			}
			active.showing = Some(shown);
		}

		self.shared.emit(UiEvent::SignatureHelp { pos, help });
	}

	pub fn clear_signature_help(&self) {
		self.shared.signature.cancel();
		self.shared.emit(UiEvent::SignatureHelpClear);
	}
}
