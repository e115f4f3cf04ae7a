//! Completion triggering, filtering, and application.
//!
//! The request runs under the document lock so the server answers
//! against the text the user actually sees. Filtering and ordering are
//! stable and total: preselected items lead, then `sortText ?? label`;
//! a match-before token boosts prefix matches and, when the token is a
//! plain word, filters non-matches out entirely — except items carrying
//! a `textEdit`, which may legitimately rewrite the whole token.

use lsp_types::{
	CompletionContext, CompletionItem, CompletionParams, CompletionResponse, CompletionTextEdit, CompletionTriggerKind,
	Documentation, InsertTextFormat, MarkupContent, TextDocumentIdentifier, TextDocumentPositionParams,
};
use moor_lsp::{char_to_lsp_position, lsp_range_to_char_range};
use tracing::debug;

use crate::document::{DocumentPlugin, UiEvent};
use crate::snippet;
use crate::sync::LOCK_TIMEOUT;
use crate::workspace_edit::HostEdit;

/// Trigger and filtering configuration.
#[derive(Debug, Clone)]
pub struct CompletionConfig {
	/// Completion fires when the pre-cursor text matches this, in
	/// addition to server trigger characters.
	pub trigger_regex: Option<regex::Regex>,
	/// Extracts the token the cursor sits after; drives boosting and
	/// word filtering.
	pub match_before: Option<regex::Regex>,
}

impl Default for CompletionConfig {
	fn default() -> Self {
		Self {
			trigger_regex: Some(regex::Regex::new(r"[\w.]$").unwrap()),
			match_before: Some(regex::Regex::new(r"\w+$").unwrap()),
		}
	}
}

/// How the completion was initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionTrigger {
	/// User typed; gate on trigger characters / regex.
	Typing,
	/// Explicit keybind; always fires.
	Manual,
}

impl DocumentPlugin {
	/// Requests completions at `pos` (a char offset). Emits
	/// [`UiEvent::Completions`] or a "no completions" notice.
	pub async fn trigger_completion(&self, pos: usize, trigger: CompletionTrigger) {
		let rope = self.text();
		let pos = pos.min(rope.len_chars());
		let before: String = rope.slice(..pos).to_string();

		let trigger_char = trigger_character(self, &before);
		if trigger == CompletionTrigger::Typing && trigger_char.is_none() {
			let regex_hit = self
				.shared
				.config
				.completion
				.trigger_regex
				.as_ref()
				.is_some_and(|re| re.is_match(&before));
			if !regex_hit {
				return;
			}
		}

		let token = self.match_before_token(&before);
		let replace_start = pos - token.as_deref().map_or(0, |t| t.chars().count());

		let encoding = self.client().offset_encoding();
		let params = CompletionParams {
			text_document_position: TextDocumentPositionParams {
				text_document: TextDocumentIdentifier { uri: self.uri() },
				position: char_to_lsp_position(&rope, pos, encoding),
			},
			context: Some(CompletionContext {
				trigger_kind: if trigger_char.is_some() {
					CompletionTriggerKind::TRIGGER_CHARACTER
				} else {
					CompletionTriggerKind::INVOKED
				},
				trigger_character: trigger_char,
			}),
			work_done_progress_params: Default::default(),
			partial_result_params: Default::default(),
		};

		let client = self.client().clone();
		let response = self
			.sync()
			.do_with_lock(LOCK_TIMEOUT, move |_snapshot| async move {
				client.request::<lsp_types::request::Completion>(params).await
			})
			.await;

		let items = match response {
			Ok(Some(CompletionResponse::Array(items))) => items,
			Ok(Some(CompletionResponse::List(list))) => list.items,
			Ok(None) => Vec::new(),
			Err(e) => {
				debug!(error = %e, "completion.request_failed");
				return;
			}
		};

		let items = filter_and_sort(items, token.as_deref());
		if items.is_empty() {
			self.shared.emit(UiEvent::Notice {
				message: "No completions available".into(),
			});
			return;
		}

		self.shared.emit(UiEvent::Completions { replace_start, items });
	}

	fn match_before_token(&self, before: &str) -> Option<String> {
		let re = self.shared.config.completion.match_before.as_ref()?;
		re.find(before).map(|m| m.as_str().to_string())
	}

	/// Applies the picked item. `pos` is the cursor, `replace_start` the
	/// token start reported with the completion list.
	pub async fn apply_completion(&self, item: CompletionItem, pos: usize, replace_start: usize) {
		let rope = self.text();
		let encoding = self.client().offset_encoding();
		let command = item.command.clone();

		let mut edits: Vec<HostEdit> = Vec::new();
		let mut snippet_insert: Option<(usize, std::ops::Range<usize>, String)> = None;
		let mut cursor: Option<usize> = None;

		match item.text_edit.clone() {
			Some(CompletionTextEdit::Edit(edit)) => {
				let Some(range) = lsp_range_to_char_range(&rope, edit.range, encoding) else {
					self.shared.emit(UiEvent::Notice {
						message: "Completion edit no longer maps into the document".into(),
					});
					return;
				};
				let text = if item.insert_text_format == Some(InsertTextFormat::SNIPPET) {
					snippet::strip_markers(&edit.new_text)
				} else {
					edit.new_text
				};
				cursor = Some(range.start + text.chars().count());
				edits.push(HostEdit { range, text });
			}
			Some(CompletionTextEdit::InsertAndReplace(edit)) => {
				let Some(replace) = lsp_range_to_char_range(&rope, edit.replace, encoding) else {
					return;
				};
				let Some(insert) = lsp_range_to_char_range(&rope, edit.insert, encoding) else {
					return;
				};
				let text = if item.insert_text_format == Some(InsertTextFormat::SNIPPET) {
					snippet::strip_markers(&edit.new_text)
				} else {
					edit.new_text
				};
				cursor = Some(insert.start + text.chars().count());
				// Deletion first in document order terms; the host applies
				// descending so the insertion lands on settled offsets.
				edits.push(HostEdit {
					range: replace,
					text: String::new(),
				});
				edits.push(HostEdit {
					range: insert.start..insert.start,
					text,
				});
			}
			None => {
				if let Some(insert_text) = item.insert_text.clone() {
					snippet_insert = Some((replace_start, replace_start..pos, snippet::to_editor_snippet(&insert_text)));
				} else {
					let text = item.label.clone();
					cursor = Some(replace_start + text.chars().count());
					edits.push(HostEdit {
						range: replace_start..pos,
						text,
					});
				}
			}
		}

		if let Some(additional) = item.additional_text_edits.clone() {
			let mut converted = Vec::with_capacity(additional.len());
			for edit in additional {
				let Some(range) = lsp_range_to_char_range(&rope, edit.range, encoding) else {
					continue;
				};
				converted.push(HostEdit {
					range,
					text: edit.new_text,
				});
			}
			// End-descending keeps earlier offsets valid.
			converted.sort_by(|a, b| b.range.end.cmp(&a.range.end));
			edits.extend(converted);
		}

		if !edits.is_empty() {
			edits.sort_by(|a, b| b.range.start.cmp(&a.range.start).then(b.range.end.cmp(&a.range.end)));
			self.shared.emit(UiEvent::ApplyEdits { edits });
		}
		if let Some((at, replace, snippet)) = snippet_insert {
			self.shared.emit(UiEvent::InsertSnippet { at, replace, snippet });
		}
		if let Some(pos) = cursor {
			self.shared.emit(UiEvent::SetCursor { pos });
		}
		if let Some(command) = command {
			let params = lsp_types::ExecuteCommandParams {
				command: command.command,
				arguments: command.arguments.unwrap_or_default(),
				work_done_progress_params: Default::default(),
			};
			if let Err(e) = self.client().request::<lsp_types::request::ExecuteCommand>(params).await {
				debug!(error = %e, "completion.command_failed");
			}
		}
	}

	/// Lazily loads documentation for a highlighted item. Emits `None`
	/// documentation when the server has nothing worth showing.
	pub async fn resolve_completion_documentation(&self, item: CompletionItem) {
		let label = item.label.clone();

		let supports_resolve = self
			.client()
			.capabilities()
			.and_then(|caps| caps.completion_provider)
			.and_then(|provider| provider.resolve_provider)
			.unwrap_or(false);

		let resolved = if supports_resolve && item.documentation.is_none() {
			match self.client().request::<lsp_types::request::ResolveCompletionItem>(item).await {
				Ok(resolved) => resolved,
				Err(e) => {
					debug!(error = %e, "completion.resolve_failed");
					return;
				}
			}
		} else {
			item
		};

		self.shared.emit(UiEvent::CompletionDocumentation {
			label,
			documentation: resolved.documentation.as_ref().and_then(documentation_text),
		});
	}
}

fn trigger_character(plugin: &DocumentPlugin, before: &str) -> Option<String> {
	let last = before.chars().next_back()?.to_string();
	let triggers = plugin
		.client()
		.capabilities()
		.and_then(|caps| caps.completion_provider)
		.and_then(|provider| provider.trigger_characters)?;
	triggers.into_iter().find(|t| *t == last)
}

/// Ordering: preselect, then prefix-match boost, then
/// `sortText ?? label`, with the original index as the stable tail.
fn filter_and_sort(items: Vec<CompletionItem>, token: Option<&str>) -> Vec<CompletionItem> {
	let token_lower = token.map(str::to_lowercase);
	let word_token = token.is_some_and(|t| !t.is_empty() && t.chars().all(|c| c.is_alphanumeric() || c == '_'));

	let mut ranked: Vec<(bool, bool, String, usize, CompletionItem)> = items
		.into_iter()
		.enumerate()
		.filter(|(_, item)| {
			let Some(token) = token_lower.as_deref() else {
				return true;
			};
			if !word_token || token.is_empty() {
				return true;
			}
			// Items with a textEdit may rewrite the whole token; never
			// filter them out.
			if item.text_edit.is_some() {
				return true;
			}
			filter_text(item).to_lowercase().starts_with(token)
		})
		.map(|(index, item)| {
			let preselected = item.preselect == Some(true);
			let prefix_match = token_lower
				.as_deref()
				.is_some_and(|t| !t.is_empty() && filter_text(&item).to_lowercase().starts_with(t));
			let sort_key = item.sort_text.clone().unwrap_or_else(|| item.label.clone()).to_lowercase();
			(preselected, prefix_match, sort_key, index, item)
		})
		.collect();

	ranked.sort_by(|a, b| {
		b.0.cmp(&a.0)
			.then(b.1.cmp(&a.1))
			.then(a.2.cmp(&b.2))
			.then(a.3.cmp(&b.3))
	});

	ranked.into_iter().map(|(_, _, _, _, item)| item).collect()
}

fn filter_text(item: &CompletionItem) -> &str {
	item.filter_text.as_deref().unwrap_or(&item.label)
}

/// Documentation text, or `None` when it is effectively empty (null,
/// whitespace, or backticks only).
fn documentation_text(doc: &Documentation) -> Option<String> {
	let text = match doc {
		Documentation::String(text) => text.clone(),
		Documentation::MarkupContent(MarkupContent { value, .. }) => value.clone(),
	};
	let stripped: String = text.chars().filter(|c| !c.is_whitespace() && *c != '`').collect();
	if stripped.is_empty() { None } else { Some(text) }
}
