//! Inlay hints view plugin.
//!
//! Requests are debounced (default 1 s) and the debounce resets on every
//! edit, so hints only refresh once typing settles. Widgets compare by
//! position and label, which lets the host diff cheaply instead of
//! rebuilding decorations. Hints carrying `data` resolve lazily when
//! rendered.

use std::time::Duration;

use lsp_types::{InlayHint, InlayHintLabel, InlayHintParams, Range, TextDocumentIdentifier};
use moor_lsp::{char_range_to_lsp_range, lsp_position_to_char};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::document::{DocumentPlugin, UiEvent};

/// Inlay hint behavior knobs.
#[derive(Debug, Clone)]
pub struct InlayConfig {
	/// Settle time before a request fires; edits reset it.
	pub debounce: Duration,
	/// Drop shown hints as soon as an edit lands.
	pub clear_on_edit: bool,
}

impl Default for InlayConfig {
	fn default() -> Self {
		Self {
			debounce: Duration::from_secs(1),
			clear_on_edit: false,
		}
	}
}

/// Which side of the offset the widget renders on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HintSide {
	Before,
	After,
}

/// One rendered hint.
#[derive(Debug, Clone)]
pub struct HintWidget {
	/// Char offset in the current document.
	pub pos: usize,
	pub label: String,
	pub side: HintSide,
	/// Kept for lazy `inlayHint/resolve` when `data` is present.
	pub lsp: InlayHint,
}

impl PartialEq for HintWidget {
	fn eq(&self, other: &Self) -> bool {
		// Position + label identity is what decides redraws.
		self.pos == other.pos && self.label == other.label
	}
}

impl Eq for HintWidget {}

#[derive(Default)]
pub(crate) struct InlayState {
	token: Mutex<Option<CancellationToken>>,
}

impl InlayState {
	fn rotate(&self) -> CancellationToken {
		let fresh = CancellationToken::new();
		if let Some(old) = self.token.lock().replace(fresh.clone()) {
			old.cancel();
		}
		fresh
	}

	pub(crate) fn cancel(&self) {
		if let Some(token) = self.token.lock().take() {
			token.cancel();
		}
	}
}

impl DocumentPlugin {
	pub(crate) fn on_edit_for_inlay_hints(&self) {
		// Any pending debounce restarts from the next request.
		self.shared.inlay.cancel();
		if self.shared.config.inlay.clear_on_edit {
			self.shared.emit(UiEvent::InlayHints { hints: Vec::new() });
		}
	}

	/// Schedules a hint refresh for the char range `range` (usually the
	/// viewport). Debounced; superseded by later calls and by edits.
	pub fn request_inlay_hints(&self, range: std::ops::Range<usize>) {
		if self.client().capabilities().and_then(|caps| caps.inlay_hint_provider).is_none() {
			return;
		}

		let token = self.shared.inlay.rotate();
		let debounce = self.shared.config.inlay.debounce;
		let plugin = self.clone();
		tokio::spawn(async move {
			tokio::select! {
				_ = token.cancelled() => return,
				_ = tokio::time::sleep(debounce) => {}
			}
			plugin.fetch_inlay_hints(range, token).await;
		});
	}

	async fn fetch_inlay_hints(&self, range: std::ops::Range<usize>, token: CancellationToken) {
		let rope = self.text();
		let encoding = self.client().offset_encoding();
		let lsp_range: Range = char_range_to_lsp_range(&rope, range.start.min(rope.len_chars()), range.end.min(rope.len_chars()), encoding);

		let params = InlayHintParams {
			text_document: TextDocumentIdentifier { uri: self.uri() },
			range: lsp_range,
			work_done_progress_params: Default::default(),
		};

		let response = tokio::select! {
			_ = token.cancelled() => return,
			response = self.client().request::<lsp_types::request::InlayHintRequest>(params) => response,
		};
		if token.is_cancelled() {
			return;
		}

		let hints = match response {
			Ok(Some(hints)) => hints,
			Ok(None) => Vec::new(),
			Err(e) => {
				debug!(error = %e, "inlay.request_failed");
				return;
			}
		};

		let rope = self.text();
		let widgets: Vec<HintWidget> = hints
			.into_iter()
			.filter_map(|hint| {
				let pos = lsp_position_to_char(&rope, hint.position, encoding)?;
				let side = if hint.padding_left == Some(true) { HintSide::Before } else { HintSide::After };
				Some(HintWidget {
					pos,
					label: hint_label_text(&hint.label),
					side,
					lsp: hint,
				})
			})
			.collect();

		self.shared.emit(UiEvent::InlayHints { hints: widgets });
	}

	/// Resolves a hint lazily when the widget scrolls into view. Returns
	/// the original when the hint has no `data` or the server does not
	/// resolve.
	pub async fn resolve_inlay_hint(&self, widget: HintWidget) -> HintWidget {
		if widget.lsp.data.is_none() {
			return widget;
		}
		match self.client().request::<lsp_types::request::InlayHintResolveRequest>(widget.lsp.clone()).await {
			Ok(resolved) => HintWidget {
				pos: widget.pos,
				label: hint_label_text(&resolved.label),
				side: widget.side,
				lsp: resolved,
			},
			Err(e) => {
				debug!(error = %e, "inlay.resolve_failed");
				widget
			}
		}
	}
}

fn hint_label_text(label: &InlayHintLabel) -> String {
	match label {
		InlayHintLabel::String(text) => text.clone(),
		InlayHintLabel::LabelParts(parts) => parts.iter().map(|part| part.value.as_str()).collect(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn widget(pos: usize, label: &str) -> HintWidget {
		HintWidget {
			pos,
			label: label.into(),
			side: HintSide::After,
			lsp: InlayHint {
				position: lsp_types::Position::default(),
				label: InlayHintLabel::String(label.into()),
				kind: None,
				text_edits: None,
				tooltip: None,
				padding_left: None,
				padding_right: None,
				data: None,
			},
		}
	}

	#[test]
	fn widgets_compare_by_position_and_label() {
		assert_eq!(widget(3, ": i32"), widget(3, ": i32"));
		assert_ne!(widget(3, ": i32"), widget(4, ": i32"));
		assert_ne!(widget(3, ": i32"), widget(3, ": u32"));
	}

	#[test]
	fn label_parts_concatenate() {
		let label = InlayHintLabel::LabelParts(vec![
			lsp_types::InlayHintLabelPart {
				value: ": ".into(),
				..Default::default()
			},
			lsp_types::InlayHintLabelPart {
				value: "String".into(),
				..Default::default()
			},
		]);
		assert_eq!(hint_label_text(&label), ": String");
	}
}
