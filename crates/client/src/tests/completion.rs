//! Completion round trip: triggering, the result event, and the apply
//! paths.

use lsp_types::{CompletionItem, CompletionOptions, ServerCapabilities};
use pretty_assertions::assert_eq;
use serde_json::json;

use super::support::*;
use crate::completion::CompletionTrigger;
use crate::document::UiEvent;

fn caps_with_completion() -> ServerCapabilities {
	ServerCapabilities {
		completion_provider: Some(CompletionOptions {
			trigger_characters: Some(vec![".".into()]),
			resolve_provider: Some(true),
			..Default::default()
		}),
		..Default::default()
	}
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn manual_trigger_reports_items_and_replace_start() {
	let (transport, _client, plugin, mut ui) = plugin_with_capabilities(caps_with_completion(), "foo.ba").await;
	transport.set_response(
		"textDocument/completion",
		json!([{"label": "bar"}, {"label": "baz"}, {"label": "qux"}]),
	);
	drain_ui(&mut ui);

	plugin.trigger_completion(6, CompletionTrigger::Manual).await;
	settle().await;

	let events = drain_ui(&mut ui);
	let (replace_start, items) = events
		.iter()
		.find_map(|e| match e {
			UiEvent::Completions { replace_start, items } => Some((*replace_start, items)),
			_ => None,
		})
		.expect("completion event");
	// The word token is "ba", starting at offset 4.
	assert_eq!(replace_start, 4);
	// "qux" does not start with the token and carries no textEdit.
	let labels: Vec<&str> = items.iter().map(|i| i.label.as_str()).collect();
	assert_eq!(labels, vec!["bar", "baz"]);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn typing_without_trigger_sends_nothing() {
	let (transport, _client, plugin, _ui) = plugin_with_capabilities(caps_with_completion(), "let x = 1; ").await;

	// Cursor after a space: no trigger char, no word regex match.
	plugin.trigger_completion(11, CompletionTrigger::Typing).await;
	settle().await;

	assert!(!transport.recorded_methods().contains(&"textDocument/completion".to_string()));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn trigger_character_fires_the_request() {
	let (transport, _client, plugin, mut ui) = plugin_with_capabilities(caps_with_completion(), "foo.").await;
	transport.set_response("textDocument/completion", json!({"isIncomplete": false, "items": [{"label": "length"}]}));
	drain_ui(&mut ui);

	plugin.trigger_completion(4, CompletionTrigger::Typing).await;
	settle().await;

	assert!(transport.recorded_methods().contains(&"textDocument/completion".to_string()));
	let events = drain_ui(&mut ui);
	assert!(events.iter().any(|e| matches!(e, UiEvent::Completions { .. })));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn empty_result_reports_no_completions() {
	let (transport, _client, plugin, mut ui) = plugin_with_capabilities(caps_with_completion(), "fo").await;
	transport.set_response("textDocument/completion", json!([]));
	drain_ui(&mut ui);

	plugin.trigger_completion(2, CompletionTrigger::Manual).await;
	settle().await;

	let events = drain_ui(&mut ui);
	assert!(events.iter().any(|e| matches!(e, UiEvent::Notice { message } if message.contains("No completions"))));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn text_edit_apply_replaces_range_and_sets_cursor() {
	let (_transport, _client, plugin, mut ui) = plugin_with_capabilities(caps_with_completion(), "foo.ba").await;
	drain_ui(&mut ui);

	let item: CompletionItem = serde_json::from_value(json!({
		"label": "bazinga",
		"textEdit": {
			"range": {"start": {"line": 0, "character": 4}, "end": {"line": 0, "character": 6}},
			"newText": "bazinga"
		}
	}))
	.unwrap();
	plugin.apply_completion(item, 6, 4).await;

	let events = drain_ui(&mut ui);
	let edits = events
		.iter()
		.find_map(|e| match e {
			UiEvent::ApplyEdits { edits } => Some(edits),
			_ => None,
		})
		.expect("edit batch");
	assert_eq!(edits.len(), 1);
	assert_eq!(edits[0].range, 4..6);
	assert_eq!(edits[0].text, "bazinga");
	assert!(events.iter().any(|e| matches!(e, UiEvent::SetCursor { pos } if *pos == 4 + "bazinga".len())));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn snippet_text_edit_is_stripped_to_plain_text() {
	let (_transport, _client, plugin, mut ui) = plugin_with_capabilities(caps_with_completion(), "fo").await;
	drain_ui(&mut ui);

	let item: CompletionItem = serde_json::from_value(json!({
		"label": "for",
		"insertTextFormat": 2,
		"textEdit": {
			"range": {"start": {"line": 0, "character": 0}, "end": {"line": 0, "character": 2}},
			"newText": "for (const ${1:item} of ${2:items}) {$0}"
		}
	}))
	.unwrap();
	plugin.apply_completion(item, 2, 0).await;

	let events = drain_ui(&mut ui);
	let edits = events
		.iter()
		.find_map(|e| match e {
			UiEvent::ApplyEdits { edits } => Some(edits),
			_ => None,
		})
		.expect("edit batch");
	assert_eq!(edits[0].text, "for (const item of items) {}");
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn insert_text_becomes_an_editor_snippet() {
	let (_transport, _client, plugin, mut ui) = plugin_with_capabilities(caps_with_completion(), "lo").await;
	drain_ui(&mut ui);

	let item: CompletionItem = serde_json::from_value(json!({
		"label": "log",
		"insertText": "console.log($1)$0"
	}))
	.unwrap();
	plugin.apply_completion(item, 2, 0).await;

	let events = drain_ui(&mut ui);
	let snippet = events
		.iter()
		.find_map(|e| match e {
			UiEvent::InsertSnippet { at, replace, snippet } => Some((*at, replace.clone(), snippet.clone())),
			_ => None,
		})
		.expect("snippet event");
	assert_eq!(snippet.0, 0);
	assert_eq!(snippet.1, 0..2);
	assert_eq!(snippet.2, "console.log(${1})${0}");
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn additional_text_edits_apply_end_descending() {
	let (_transport, _client, plugin, mut ui) = plugin_with_capabilities(caps_with_completion(), "aaa bbb ccc").await;
	drain_ui(&mut ui);

	let item: CompletionItem = serde_json::from_value(json!({
		"label": "ddd",
		"textEdit": {
			"range": {"start": {"line": 0, "character": 8}, "end": {"line": 0, "character": 11}},
			"newText": "ddd"
		},
		"additionalTextEdits": [
			{"range": {"start": {"line": 0, "character": 0}, "end": {"line": 0, "character": 3}}, "newText": "import"},
			{"range": {"start": {"line": 0, "character": 4}, "end": {"line": 0, "character": 7}}, "newText": "from"}
		]
	}))
	.unwrap();
	plugin.apply_completion(item, 11, 8).await;

	let events = drain_ui(&mut ui);
	let edits = events
		.iter()
		.find_map(|e| match e {
			UiEvent::ApplyEdits { edits } => Some(edits),
			_ => None,
		})
		.expect("edit batch");
	assert_eq!(edits.len(), 3);
	// Strictly descending starts: applying top-down never shifts the rest.
	for pair in edits.windows(2) {
		assert!(pair[0].range.start > pair[1].range.start);
	}
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn documentation_resolution_omits_empty_docs() {
	let (transport, _client, plugin, mut ui) = plugin_with_capabilities(caps_with_completion(), "x").await;
	transport.set_response("completionItem/resolve", json!({"label": "foo", "documentation": "  ``  "}));
	drain_ui(&mut ui);

	let item: CompletionItem = serde_json::from_value(json!({"label": "foo"})).unwrap();
	plugin.resolve_completion_documentation(item).await;

	let events = drain_ui(&mut ui);
	let doc = events
		.iter()
		.find_map(|e| match e {
			UiEvent::CompletionDocumentation { documentation, .. } => Some(documentation.clone()),
			_ => None,
		})
		.expect("documentation event");
	assert_eq!(doc, None);
}
