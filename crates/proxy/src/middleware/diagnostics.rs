//! `publishDiagnostics` post-processing on the way back to clients.
//!
//! Synthetic files never surface diagnostics. Diagnostics that mark an
//! un-cached module fire a best-effort cache command at the server, once
//! per specifier. Local diagnostics are appended for conditions the
//! server does not know about: a missing JSX pragma (delivered with a
//! reflexive fix) and `npm:react` imports that should go through esm.sh.

use async_trait::async_trait;
use moor_lsp::JsonValue;
use serde_json::json;
use tracing::debug;

use super::{ENV_VARS_FILE, NO_CACHE_CODES, REFLEXIVE_ACTION_KEY};
use crate::proxy::{Middleware, MwOutcome, Pattern, SessionCtx};

const JSX_PRAGMA: &str = "@jsxImportSource";
const JSX_PRAGMA_LINE: &str = "/** @jsxImportSource https://esm.sh/react */\n";

pub struct DiagnosticsMiddleware;

#[async_trait]
impl Middleware for DiagnosticsMiddleware {
	fn pattern(&self) -> Pattern {
		Pattern::Exact("textDocument/publishDiagnostics")
	}

	async fn on_params(&self, ctx: &SessionCtx, _kind: crate::proxy::MessageKind, _method: &str, params: &mut JsonValue) -> MwOutcome {
		let Some(uri) = params.get("uri").and_then(|u| u.as_str()).map(str::to_string) else {
			return MwOutcome::Continue;
		};

		// The injection stub is an implementation detail; its diagnostics
		// would only confuse the user.
		if uri.ends_with(ENV_VARS_FILE) {
			return MwOutcome::Cancel;
		}

		self.fire_cache_commands(ctx, &uri, params);

		let mut extra = Vec::new();
		if let Some(text) = ctx.docs.get(&uri).map(|entry| entry.value().clone()) {
			if is_jsx_uri(&uri) && !text.contains(JSX_PRAGMA) {
				extra.push(missing_pragma_diagnostic(&uri));
			}
			if let Some(line) = line_containing(&text, "npm:react") {
				extra.push(json!({
					"range": {"start": {"line": line, "character": 0}, "end": {"line": line, "character": 0}},
					"severity": 4,
					"code": "moor-prefer-esm",
					"source": "moor",
					"message": "Prefer https://esm.sh/react over npm:react in browser-hosted code",
				}));
			}
		}

		if !extra.is_empty()
			&& let Some(diagnostics) = params.get_mut("diagnostics").and_then(|d| d.as_array_mut())
		{
			diagnostics.extend(extra);
		}

		MwOutcome::Continue
	}
}

impl DiagnosticsMiddleware {
	/// Fires `deno.cache` for every un-cached specifier not already
	/// attempted this session. Best effort: the response is discarded.
	fn fire_cache_commands(&self, ctx: &SessionCtx, uri: &str, params: &JsonValue) {
		let Some(diagnostics) = params.get("diagnostics").and_then(|d| d.as_array()) else {
			return;
		};

		for diagnostic in diagnostics {
			let code = diagnostic.get("code").and_then(|c| c.as_str()).unwrap_or_default();
			if !NO_CACHE_CODES.contains(&code) {
				continue;
			}
			let Some(specifier) = diagnostic
				.get("data")
				.and_then(|d| d.get("specifier"))
				.and_then(|s| s.as_str())
			else {
				continue;
			};

			if !ctx.cache_fired.lock().insert(specifier.to_string()) {
				continue;
			}

			debug!(specifier, "diagnostics.fire_cache_command");
			let real_uri = ctx.uri_map.virtual_to_real(uri);
			ctx.request_proc_detached(
				"workspace/executeCommand",
				json!({
					"command": "deno.cache",
					"arguments": [[specifier], real_uri],
				}),
			);
		}
	}
}

fn is_jsx_uri(uri: &str) -> bool {
	uri.ends_with(".tsx") || uri.ends_with(".jsx")
}

/// Zero-based line of the first occurrence of `needle`.
fn line_containing(text: &str, needle: &str) -> Option<u32> {
	text.lines().position(|line| line.contains(needle)).map(|line| line as u32)
}

fn missing_pragma_diagnostic(uri: &str) -> JsonValue {
	json!({
		"range": {"start": {"line": 0, "character": 0}, "end": {"line": 0, "character": 0}},
		"severity": 4,
		"code": "moor-jsx-pragma",
		"source": "moor",
		"message": "Missing JSX pragma; add a @jsxImportSource comment so JSX resolves",
		"data": {
			REFLEXIVE_ACTION_KEY: {
				"title": "Add @jsxImportSource pragma",
				"kind": "quickfix",
				"edit": {
					"changes": {
						uri: [{
							"range": {"start": {"line": 0, "character": 0}, "end": {"line": 0, "character": 0}},
							"newText": JSX_PRAGMA_LINE,
						}]
					}
				}
			}
		}
	})
}
