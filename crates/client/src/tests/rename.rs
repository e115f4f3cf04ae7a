//! Rename gating and fallback behavior.

use lsp_types::{OneOf, RenameOptions, ServerCapabilities};
use pretty_assertions::assert_eq;
use serde_json::json;

use super::support::*;
use crate::document::UiEvent;

fn caps_with_rename() -> ServerCapabilities {
	ServerCapabilities {
		rename_provider: Some(OneOf::Left(true)),
		..Default::default()
	}
}

fn caps_with_prepare_rename() -> ServerCapabilities {
	ServerCapabilities {
		rename_provider: Some(OneOf::Right(RenameOptions {
			prepare_provider: Some(true),
			work_done_progress_options: Default::default(),
		})),
		..Default::default()
	}
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn missing_capability_reports_not_supported() {
	// The gate fires only when the server does NOT advertise rename.
	let (_transport, _client, plugin, mut ui) = plugin_with_capabilities(ServerCapabilities::default(), "let foo = 1;").await;

	let prompt = plugin.prepare_rename_or_notify(5).await;
	assert!(prompt.is_none());

	let events = drain_ui(&mut ui);
	assert!(
		events
			.iter()
			.any(|e| matches!(e, UiEvent::Notice { message } if message.contains("not supported"))),
		"events: {events:?}"
	);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn advertised_capability_does_not_trip_the_gate() {
	let (_transport, _client, plugin, mut ui) = plugin_with_capabilities(caps_with_rename(), "let foo = 1;").await;

	let prompt = plugin.prepare_rename(5).await.expect("word fallback prompt");
	assert_eq!(prompt.placeholder, "foo");
	assert_eq!(prompt.range, 4..7);

	let events = drain_ui(&mut ui);
	assert!(!events.iter().any(|e| matches!(e, UiEvent::Notice { message } if message.contains("not supported"))));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn whitespace_position_cannot_rename() {
	let (_transport, _client, plugin, _ui) = plugin_with_capabilities(caps_with_rename(), "a  b").await;

	let result = plugin.prepare_rename(2).await;
	assert!(matches!(result, Err(moor_lsp::Error::Protocol(_))));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn server_prepare_range_and_placeholder_are_used() {
	let (transport, _client, plugin, _ui) = plugin_with_capabilities(caps_with_prepare_rename(), "let foo = 1;").await;
	transport.set_response(
		"textDocument/prepareRename",
		json!({
			"range": {"start": {"line": 0, "character": 4}, "end": {"line": 0, "character": 7}},
			"placeholder": "foo"
		}),
	);

	let prompt = plugin.prepare_rename(5).await.unwrap();
	assert_eq!(prompt.placeholder, "foo");
	assert_eq!(prompt.range, 4..7);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn server_refusal_means_cannot_rename() {
	let (transport, _client, plugin, _ui) = plugin_with_capabilities(caps_with_prepare_rename(), "let foo = 1;").await;
	transport.set_response("textDocument/prepareRename", json!(null));

	let result = plugin.prepare_rename(5).await;
	assert!(matches!(result, Err(moor_lsp::Error::Protocol(_))));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn rename_submits_and_applies_workspace_edit() {
	let (transport, _client, plugin, mut ui) = plugin_with_capabilities(caps_with_rename(), "let foo = foo;").await;
	transport.set_response(
		"textDocument/rename",
		json!({
			"changes": {
				"file:///main.ts": [
					{"range": {"start": {"line": 0, "character": 4}, "end": {"line": 0, "character": 7}}, "newText": "bar"},
					{"range": {"start": {"line": 0, "character": 10}, "end": {"line": 0, "character": 13}}, "newText": "bar"}
				]
			}
		}),
	);

	let prompt = plugin.prepare_rename(5).await.unwrap();
	drain_ui(&mut ui);
	plugin.rename(&prompt, "bar").await.unwrap();
	settle().await;

	let events = drain_ui(&mut ui);
	let edits = events
		.iter()
		.find_map(|e| match e {
			UiEvent::ApplyEdits { edits } => Some(edits),
			_ => None,
		})
		.expect("an edit batch");
	assert_eq!(edits.len(), 2);
	// Descending by start so earlier offsets stay valid.
	assert!(edits[0].range.start > edits[1].range.start);
	assert!(edits.iter().all(|e| e.text == "bar"));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn unchanged_name_is_rejected_before_the_wire() {
	let (transport, _client, plugin, mut ui) = plugin_with_capabilities(caps_with_rename(), "let foo = 1;").await;

	let prompt = plugin.prepare_rename(5).await.unwrap();
	drain_ui(&mut ui);
	plugin.rename(&prompt, "foo").await.unwrap();

	assert!(!transport.recorded_methods().contains(&"textDocument/rename".to_string()));
	let events = drain_ui(&mut ui);
	assert!(events.iter().any(|e| matches!(e, UiEvent::Notice { .. })));
}
