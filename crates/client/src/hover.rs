//! Hover requests.

use lsp_types::{HoverParams, TextDocumentIdentifier, TextDocumentPositionParams};
use moor_lsp::char_to_lsp_position;
use tracing::debug;

use crate::document::{DocumentPlugin, UiEvent};

impl DocumentPlugin {
	/// Requests hover contents at `pos`. The host renders the markup
	/// with whatever renderer it was configured with.
	pub async fn hover(&self, pos: usize) {
		if self.client().capabilities().and_then(|caps| caps.hover_provider).is_none() {
			return;
		}

		let rope = self.text();
		let pos = pos.min(rope.len_chars());
		let encoding = self.client().offset_encoding();
		let params = HoverParams {
			text_document_position_params: TextDocumentPositionParams {
				text_document: TextDocumentIdentifier { uri: self.uri() },
				position: char_to_lsp_position(&rope, pos, encoding),
			},
			work_done_progress_params: Default::default(),
		};

		match self.client().request::<lsp_types::request::HoverRequest>(params).await {
			Ok(Some(hover)) => {
				self.shared.emit(UiEvent::Hover {
					pos,
					contents: hover.contents,
				});
			}
			Ok(None) => {}
			Err(e) => {
				debug!(error = %e, "hover.request_failed");
			}
		}
	}
}
