//! Disk mirror for text synchronization.
//!
//! The child process resolves imports against a real filesystem, so
//! every `didOpen`/`didChange` is replayed onto the session root before
//! it reaches the server. The tracked text also feeds the local
//! diagnostics in [`super::DiagnosticsMiddleware`]. `didClose` keeps the
//! file on disk; the server still needs it for cross-file analysis.

use async_trait::async_trait;
use lsp_types::TextDocumentContentChangeEvent;
use moor_lsp::{JsonValue, OffsetEncoding, lsp_range_to_char_range};
use ropey::Rope;
use tracing::{debug, warn};

use crate::proxy::{MessageKind, Middleware, MwOutcome, Pattern, SessionCtx};

pub struct DiskMirror {
	_private: (),
}

impl DiskMirror {
	pub fn new() -> Self {
		Self { _private: () }
	}
}

impl Default for DiskMirror {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl Middleware for DiskMirror {
	fn pattern(&self) -> Pattern {
		Pattern::Notifications
	}

	async fn on_params(&self, ctx: &SessionCtx, _kind: MessageKind, method: &str, params: &mut JsonValue) -> MwOutcome {
		match method {
			"textDocument/didOpen" => {
				let Some((real_uri, text)) = open_fields(params) else {
					return MwOutcome::Continue;
				};
				let virtual_uri = ctx.uri_map.real_to_virtual(&real_uri);
				ctx.docs.insert(virtual_uri, text.clone());
				write_mirror(ctx, &real_uri, &text).await;
			}
			"textDocument/didChange" => {
				let Some(real_uri) = text_document_uri(params) else {
					return MwOutcome::Continue;
				};
				let virtual_uri = ctx.uri_map.real_to_virtual(&real_uri);
				let Some(changes) = params
					.get("contentChanges")
					.and_then(|c| serde_json::from_value::<Vec<TextDocumentContentChangeEvent>>(c.clone()).ok())
				else {
					return MwOutcome::Continue;
				};

				let current = ctx.docs.get(&virtual_uri).map(|entry| entry.value().clone()).unwrap_or_default();
				match apply_changes(&current, &changes) {
					Some(next) => {
						ctx.docs.insert(virtual_uri, next.clone());
						write_mirror(ctx, &real_uri, &next).await;
					}
					None => {
						warn!(uri = %virtual_uri, "mirror.change_out_of_range");
					}
				}
			}
			"textDocument/didClose" => {
				// Tracking text stays for local diagnostics; only log it.
				if let Some(real_uri) = text_document_uri(params) {
					debug!(uri = %ctx.uri_map.real_to_virtual(&real_uri), "mirror.did_close");
				}
			}
			_ => {}
		}
		MwOutcome::Continue
	}
}

fn text_document_uri(params: &JsonValue) -> Option<String> {
	params
		.get("textDocument")
		.and_then(|t| t.get("uri"))
		.and_then(|u| u.as_str())
		.map(str::to_string)
}

fn open_fields(params: &JsonValue) -> Option<(String, String)> {
	let doc = params.get("textDocument")?;
	let uri = doc.get("uri")?.as_str()?.to_string();
	let text = doc.get("text")?.as_str()?.to_string();
	Some((uri, text))
}

/// Applies LSP content changes (full or incremental, UTF-16 ranges).
pub(crate) fn apply_changes(current: &str, changes: &[TextDocumentContentChangeEvent]) -> Option<String> {
	let mut rope = Rope::from(current);
	for change in changes {
		match change.range {
			Some(range) => {
				let chars = lsp_range_to_char_range(&rope, range, OffsetEncoding::Utf16)?;
				rope.remove(chars.clone());
				if !change.text.is_empty() {
					rope.insert(chars.start, &change.text);
				}
			}
			None => rope = Rope::from(change.text.as_str()),
		}
	}
	Some(rope.to_string())
}

async fn write_mirror(ctx: &SessionCtx, real_uri: &str, text: &str) {
	let Some(path) = real_uri.strip_prefix("file://") else {
		return;
	};
	let path = std::path::Path::new(path);
	if !path.starts_with(ctx.uri_map.root()) {
		warn!(?path, "mirror.write_outside_root_refused");
		return;
	}
	if let Some(parent) = path.parent()
		&& let Err(e) = tokio::fs::create_dir_all(parent).await
	{
		warn!(?path, error = %e, "mirror.mkdir_failed");
		return;
	}
	if let Err(e) = tokio::fs::write(path, text).await {
		warn!(?path, error = %e, "mirror.write_failed");
	}
}
