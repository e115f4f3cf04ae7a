//! `vtlsp/reinitFiles`: atomic replacement of the session's file tree.
//!
//! The client supplies the complete intended tree; the handler diffs it
//! against the on-disk state, deletes what is gone (protected files
//! excepted), writes what changed, and tells the server about every
//! touched path through one `workspace/didChangeWatchedFiles` batch.
//! After the writes it pre-caches the dependency graph and emits a
//! `didSave` per touched file so pull-based servers refresh too.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use moor_lsp::JsonValue;
use moor_lsp::methods::{ReinitFilesParams, ReinitFilesResult};
use serde_json::json;
use tracing::{info, warn};

use super::PROTECTED_FILES;
use crate::proxy::{Handler, HandlerOutcome, MessageKind, Pattern, SessionCtx};

const CHANGE_CREATED: u64 = 1;
const CHANGE_CHANGED: u64 = 2;
const CHANGE_DELETED: u64 = 3;

pub struct ReinitFilesHandler;

#[async_trait]
impl Handler for ReinitFilesHandler {
	fn pattern(&self) -> Pattern {
		Pattern::Exact("vtlsp/reinitFiles")
	}

	async fn handle(&self, ctx: &SessionCtx, _kind: MessageKind, _method: &str, params: &mut JsonValue) -> HandlerOutcome {
		let Ok(parsed) = serde_json::from_value::<ReinitFilesParams>(params.clone()) else {
			return HandlerOutcome::Respond(
				serde_json::to_value(ReinitFilesResult {
					ok: false,
					error: Some("missing files map".into()),
					..Default::default()
				})
				.unwrap_or_default(),
			);
		};

		// Normalize to root-relative paths.
		let target: BTreeMap<String, String> = parsed
			.files
			.into_iter()
			.filter_map(|(path, content)| {
				let rel = path.trim_start_matches('/');
				if rel.is_empty() {
					return None;
				}
				Some((rel.to_string(), content))
			})
			.collect();

		let root = ctx.uri_map.root().to_path_buf();
		let existing = walk_files(&root).await;

		let mut events: Vec<JsonValue> = Vec::new();
		let mut deleted = 0usize;
		let mut created = 0usize;
		let mut changed = 0usize;

		for rel in existing.difference(&target.keys().cloned().collect::<BTreeSet<_>>()) {
			if PROTECTED_FILES.contains(&rel.as_str()) {
				continue;
			}
			let path = root.join(rel);
			if let Err(e) = tokio::fs::remove_file(&path).await {
				warn!(?path, error = %e, "reinit.delete_failed");
				continue;
			}
			deleted += 1;
			ctx.docs.remove(&format!("file:///{rel}"));
			events.push(change_event(&root, rel, CHANGE_DELETED));
		}

		for (rel, content) in &target {
			let path = root.join(rel);
			let existed = existing.contains(rel);
			if existed
				&& let Ok(current) = tokio::fs::read_to_string(&path).await
				&& current == *content
			{
				continue;
			}
			if let Some(parent) = path.parent()
				&& let Err(e) = tokio::fs::create_dir_all(parent).await
			{
				warn!(?path, error = %e, "reinit.mkdir_failed");
				continue;
			}
			if let Err(e) = tokio::fs::write(&path, content).await {
				warn!(?path, error = %e, "reinit.write_failed");
				continue;
			}
			ctx.docs.insert(format!("file:///{rel}"), content.clone());
			if existed {
				changed += 1;
				events.push(change_event(&root, rel, CHANGE_CHANGED));
			} else {
				created += 1;
				events.push(change_event(&root, rel, CHANGE_CREATED));
			}
		}

		info!(session = %ctx.session, created, changed, deleted, "reinit.applied");

		if !events.is_empty() {
			ctx.notify_proc("workspace/didChangeWatchedFiles", json!({"changes": events}));
		}

		// Warm the dependency graph, then nudge pull-based features.
		let touched: Vec<String> = target.keys().map(|rel| file_uri(&root, rel)).collect();
		if !touched.is_empty() {
			ctx.request_proc_detached(
				"workspace/executeCommand",
				json!({"command": "deno.cache", "arguments": [touched.clone(), touched[0].clone()]}),
			);
		}
		for uri in &touched {
			ctx.notify_proc("textDocument/didSave", json!({"textDocument": {"uri": uri}}));
		}

		HandlerOutcome::Respond(
			serde_json::to_value(ReinitFilesResult {
				ok: true,
				created,
				changed,
				deleted,
				error: None,
			})
			.unwrap_or_default(),
		)
	}
}

fn file_uri(root: &Path, rel: &str) -> String {
	format!("file://{}/{rel}", root.to_str().unwrap_or(""))
}

fn change_event(root: &Path, rel: &str, change_type: u64) -> JsonValue {
	json!({"uri": file_uri(root, rel), "type": change_type})
}

/// Root-relative paths of every regular file under `root`.
async fn walk_files(root: &Path) -> BTreeSet<String> {
	let mut found = BTreeSet::new();
	let mut stack: Vec<PathBuf> = vec![root.to_path_buf()];
	while let Some(dir) = stack.pop() {
		let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
			continue;
		};
		while let Ok(Some(entry)) = entries.next_entry().await {
			let path = entry.path();
			match entry.file_type().await {
				Ok(ft) if ft.is_dir() => stack.push(path),
				Ok(ft) if ft.is_file() => {
					if let Ok(rel) = path.strip_prefix(root)
						&& let Some(rel) = rel.to_str()
					{
						found.insert(rel.to_string());
					}
				}
				_ => {}
			}
		}
	}
	found
}
