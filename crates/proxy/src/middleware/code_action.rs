//! Code-action post-processing on the way back to clients.
//!
//! Multi-file actions cannot be applied by a single-document editor
//! view, so anything touching more than one URI — and the refactor
//! kinds that always do — is dropped. Actions embedded in reflexive
//! diagnostics from the request context are appended, which is how
//! locally synthesized fixes reach the menu without an extra round-trip.

use std::collections::HashSet;

use async_trait::async_trait;
use moor_lsp::JsonValue;
use tracing::trace;

use super::REFLEXIVE_ACTION_KEY;
use crate::proxy::{Middleware, MwOutcome, Pattern, SessionCtx};

const DROPPED_KIND_PREFIXES: &[&str] = &["refactor.move.", "refactor.extract.", "source.organizeImports."];
const DROPPED_KIND_EXACT: &[&str] = &["refactor.rename.project"];

pub struct CodeActionFilter;

#[async_trait]
impl Middleware for CodeActionFilter {
	fn pattern(&self) -> Pattern {
		Pattern::Exact("textDocument/codeAction")
	}

	async fn on_result(&self, _ctx: &SessionCtx, _method: &str, original_params: &JsonValue, result: &mut JsonValue) -> MwOutcome {
		let Some(actions) = result.as_array_mut() else {
			return MwOutcome::Continue;
		};

		actions.retain(|action| {
			let keep = !is_multi_file_action(action);
			if !keep {
				trace!(title = ?action.get("title"), "code_action.drop_multi_file");
			}
			keep
		});

		for diagnostic in original_params
			.get("context")
			.and_then(|c| c.get("diagnostics"))
			.and_then(|d| d.as_array())
			.into_iter()
			.flatten()
		{
			if let Some(embedded) = diagnostic.get("data").and_then(|d| d.get(REFLEXIVE_ACTION_KEY)) {
				actions.push(embedded.clone());
			}
		}

		MwOutcome::Continue
	}
}

/// True for actions a single-document client cannot apply.
fn is_multi_file_action(action: &JsonValue) -> bool {
	if let Some(kind) = action.get("kind").and_then(|k| k.as_str()) {
		if DROPPED_KIND_EXACT.contains(&kind) || DROPPED_KIND_PREFIXES.iter().any(|prefix| kind.starts_with(prefix)) {
			return true;
		}
	}

	let mut uris: HashSet<&str> = HashSet::new();
	if let Some(changes) = action.get("edit").and_then(|e| e.get("documentChanges")).and_then(|c| c.as_array()) {
		for change in changes {
			for key in ["uri", "oldUri", "newUri"] {
				if let Some(uri) = change.get(key).and_then(|u| u.as_str()) {
					uris.insert(uri);
				}
			}
			if let Some(uri) = change.get("textDocument").and_then(|t| t.get("uri")).and_then(|u| u.as_str()) {
				uris.insert(uri);
			}
		}
	}
	if let Some(changes) = action.get("edit").and_then(|e| e.get("changes")).and_then(|c| c.as_object()) {
		uris.extend(changes.keys().map(String::as_str));
	}
	uris.len() > 1
}
