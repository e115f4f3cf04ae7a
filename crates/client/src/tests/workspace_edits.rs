//! Workspace edit routing: local transaction, foreign forwarding,
//! resource ops surfaced.

use lsp_types::{ServerCapabilities, WorkspaceEdit};
use pretty_assertions::assert_eq;
use serde_json::json;

use super::support::*;
use crate::document::UiEvent;
use crate::workspace_edit::{ResourceOp, distinct_target_uris};

fn edit_from_json(value: serde_json::Value) -> WorkspaceEdit {
	serde_json::from_value(value).unwrap()
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn document_changes_are_preferred_over_changes() {
	let (_transport, _client, plugin, mut ui) = plugin_with_capabilities(ServerCapabilities::default(), "abc def").await;
	drain_ui(&mut ui);

	let edit = edit_from_json(json!({
		"changes": {
			"file:///main.ts": [
				{"range": {"start": {"line": 0, "character": 0}, "end": {"line": 0, "character": 3}}, "newText": "IGNORED"}
			]
		},
		"documentChanges": [{
			"textDocument": {"uri": "file:///main.ts", "version": null},
			"edits": [
				{"range": {"start": {"line": 0, "character": 4}, "end": {"line": 0, "character": 7}}, "newText": "xyz"}
			]
		}]
	}));
	plugin.apply_workspace_edit(edit).await;

	let events = drain_ui(&mut ui);
	let edits = events
		.iter()
		.find_map(|e| match e {
			UiEvent::ApplyEdits { edits } => Some(edits),
			_ => None,
		})
		.expect("edit batch");
	assert_eq!(edits.len(), 1);
	assert_eq!(edits[0].text, "xyz");
	assert_eq!(edits[0].range, 4..7);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn foreign_edits_are_forwarded_not_applied() {
	let (_transport, _client, plugin, mut ui) = plugin_with_capabilities(ServerCapabilities::default(), "abc").await;
	drain_ui(&mut ui);

	let edit = edit_from_json(json!({
		"changes": {
			"file:///other.ts": [
				{"range": {"start": {"line": 0, "character": 0}, "end": {"line": 0, "character": 1}}, "newText": "q"}
			]
		}
	}));
	plugin.apply_workspace_edit(edit).await;

	let events = drain_ui(&mut ui);
	assert!(!events.iter().any(|e| matches!(e, UiEvent::ApplyEdits { .. })));
	let foreign = events
		.iter()
		.find_map(|e| match e {
			UiEvent::ForeignEdit { uri, edits } => Some((uri, edits)),
			_ => None,
		})
		.expect("foreign edit event");
	assert_eq!(foreign.0.as_str(), "file:///other.ts");
	assert_eq!(foreign.1.len(), 1);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn resource_ops_are_surfaced_not_executed() {
	let (_transport, _client, plugin, mut ui) = plugin_with_capabilities(ServerCapabilities::default(), "abc").await;
	drain_ui(&mut ui);

	let edit = edit_from_json(json!({
		"documentChanges": [
			{"kind": "create", "uri": "file:///new.ts"},
			{"kind": "rename", "oldUri": "file:///a.ts", "newUri": "file:///b.ts"},
			{"kind": "delete", "uri": "file:///gone.ts"}
		]
	}));
	plugin.apply_workspace_edit(edit).await;

	let events = drain_ui(&mut ui);
	let ops: Vec<&ResourceOp> = events
		.iter()
		.filter_map(|e| match e {
			UiEvent::ResourceOp { op } => Some(op),
			_ => None,
		})
		.collect();
	assert_eq!(ops.len(), 3);
	assert!(matches!(ops[0], ResourceOp::Create { uri } if uri.as_str() == "file:///new.ts"));
	assert!(matches!(ops[1], ResourceOp::Rename { .. }));
	assert!(matches!(ops[2], ResourceOp::Delete { .. }));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn overlapping_edits_are_rejected() {
	let (_transport, _client, plugin, mut ui) = plugin_with_capabilities(ServerCapabilities::default(), "abcdef").await;
	drain_ui(&mut ui);

	let edit = edit_from_json(json!({
		"changes": {
			"file:///main.ts": [
				{"range": {"start": {"line": 0, "character": 0}, "end": {"line": 0, "character": 4}}, "newText": "x"},
				{"range": {"start": {"line": 0, "character": 2}, "end": {"line": 0, "character": 6}}, "newText": "y"}
			]
		}
	}));
	plugin.apply_workspace_edit(edit).await;

	let events = drain_ui(&mut ui);
	assert!(!events.iter().any(|e| matches!(e, UiEvent::ApplyEdits { .. })));
	assert!(events.iter().any(|e| matches!(e, UiEvent::Notice { message } if message.contains("Overlapping"))));
}

#[test]
fn distinct_uri_count_prefers_document_changes() {
	let edit = edit_from_json(json!({
		"documentChanges": [
			{"textDocument": {"uri": "file:///a.ts", "version": null}, "edits": []},
			{"textDocument": {"uri": "file:///b.ts", "version": null}, "edits": []}
		]
	}));
	assert_eq!(distinct_target_uris(&edit), 2);

	let single = edit_from_json(json!({
		"changes": {"file:///a.ts": []}
	}));
	assert_eq!(distinct_target_uris(&single), 1);
}
