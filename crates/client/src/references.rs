//! Go-to-definition / type-definition / implementation / find-references.
//!
//! All four run through one handler keyed by [`ReferenceKind`]: gate on
//! the matching server capability, request under the document lock,
//! normalize the response shapes, then either jump (single result) or
//! hand the host a panel's worth of locations.

use lsp_types::{
	GotoDefinitionResponse, Location, PartialResultParams, Position, ReferenceContext, ReferenceParams,
	TextDocumentIdentifier, TextDocumentPositionParams, Uri, WorkDoneProgressParams,
};
use moor_lsp::{char_to_lsp_position, lsp_range_to_char_range};
use serde_json::json;
use tracing::debug;

use crate::document::{DocumentPlugin, UiEvent};
use crate::sync::LOCK_TIMEOUT;

/// Which navigation request to issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceKind {
	Definition,
	TypeDefinition,
	Implementation,
	References,
}

impl ReferenceKind {
	pub fn method(self) -> &'static str {
		match self {
			Self::Definition => "textDocument/definition",
			Self::TypeDefinition => "textDocument/typeDefinition",
			Self::Implementation => "textDocument/implementation",
			Self::References => "textDocument/references",
		}
	}

	pub fn label(self) -> &'static str {
		match self {
			Self::Definition => "Go to definition",
			Self::TypeDefinition => "Go to type definition",
			Self::Implementation => "Go to implementation",
			Self::References => "Find all references",
		}
	}
}

/// A normalized result location.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceLocation {
	pub uri: Uri,
	pub range: lsp_types::Range,
}

impl DocumentPlugin {
	/// Whether the server advertises the capability behind `kind`.
	pub fn supports_reference_kind(&self, kind: ReferenceKind) -> bool {
		let Some(caps) = self.client().capabilities() else {
			return false;
		};
		match kind {
			ReferenceKind::Definition => caps.definition_provider.is_some(),
			ReferenceKind::TypeDefinition => caps.type_definition_provider.is_some(),
			ReferenceKind::Implementation => caps.implementation_provider.is_some(),
			ReferenceKind::References => caps.references_provider.is_some(),
		}
	}

	/// Runs the navigation request at `pos` (char offset).
	pub async fn goto(&self, kind: ReferenceKind, pos: usize) {
		if !self.supports_reference_kind(kind) {
			self.shared.emit(UiEvent::Notice {
				message: format!("{} is not supported by this server", kind.label()),
			});
			return;
		}

		let rope = self.text();
		let encoding = self.client().offset_encoding();
		let position = char_to_lsp_position(&rope, pos.min(rope.len_chars()), encoding);
		let params = self.reference_params(kind, position);

		let client = self.client().clone();
		let method = kind.method();
		let response = self
			.sync()
			.do_with_lock(LOCK_TIMEOUT, move |_snapshot| async move { client.request_raw(method, params).await })
			.await;

		let raw = match response {
			Ok(raw) => raw,
			Err(e) => {
				debug!(method, error = %e, "references.request_failed");
				self.shared.emit(UiEvent::Notice {
					message: format!("{} failed: {e}", kind.label()),
				});
				return;
			}
		};

		let mut locations = normalize_locations(raw);
		if locations.is_empty() {
			self.shared.emit(UiEvent::Notice {
				message: format!("{}: no results", kind.label()),
			});
			return;
		}

		if self.shared.config.go_to_if_one_option && locations.len() == 1 {
			let location = locations.remove(0);
			if location.uri == self.uri() {
				if let Some(range) = lsp_range_to_char_range(&self.text(), location.range, encoding) {
					self.shared.emit(UiEvent::GotoLocal { range, origin: "lsp-goto" });
				}
			} else {
				self.shared.emit(UiEvent::ExternalReference { location });
			}
			return;
		}

		self.shared.emit(UiEvent::ShowReferences { locations });
	}

	fn reference_params(&self, kind: ReferenceKind, position: Position) -> moor_lsp::JsonValue {
		let text_document_position = TextDocumentPositionParams {
			text_document: TextDocumentIdentifier { uri: self.uri() },
			position,
		};
		match kind {
			ReferenceKind::References => serde_json::to_value(ReferenceParams {
				text_document_position,
				context: ReferenceContext {
					include_declaration: true,
				},
				work_done_progress_params: WorkDoneProgressParams::default(),
				partial_result_params: PartialResultParams::default(),
			})
			.unwrap_or_else(|_| json!({})),
			_ => serde_json::to_value(text_document_position).unwrap_or_else(|_| json!({})),
		}
	}
}

/// Accepts `Location | Location[] | LocationLink[] | null` and flattens
/// to a uniform list.
fn normalize_locations(raw: moor_lsp::JsonValue) -> Vec<ReferenceLocation> {
	if raw.is_null() {
		return Vec::new();
	}
	if let Ok(response) = serde_json::from_value::<GotoDefinitionResponse>(raw.clone()) {
		return match response {
			GotoDefinitionResponse::Scalar(location) => vec![ReferenceLocation {
				uri: location.uri,
				range: location.range,
			}],
			GotoDefinitionResponse::Array(locations) => locations
				.into_iter()
				.map(|location| ReferenceLocation {
					uri: location.uri,
					range: location.range,
				})
				.collect(),
			GotoDefinitionResponse::Link(links) => links
				.into_iter()
				.map(|link| ReferenceLocation {
					uri: link.target_uri,
					range: link.target_selection_range,
				})
				.collect(),
		};
	}
	if let Ok(locations) = serde_json::from_value::<Vec<Location>>(raw) {
		return locations
			.into_iter()
			.map(|location| ReferenceLocation {
				uri: location.uri,
				range: location.range,
			})
			.collect();
	}
	Vec::new()
}
