//! Signature help triggering and dedup.

use lsp_types::{ServerCapabilities, SignatureHelpOptions};
use pretty_assertions::assert_eq;
use serde_json::json;

use super::support::*;
use crate::document::UiEvent;

fn caps_with_signatures() -> ServerCapabilities {
	ServerCapabilities {
		signature_help_provider: Some(SignatureHelpOptions {
			trigger_characters: Some(vec!["(".into()]),
			retrigger_characters: Some(vec![",".into()]),
			..Default::default()
		}),
		..Default::default()
	}
}

fn help(active_parameter: u32) -> serde_json::Value {
	json!({
		"signatures": [{
			"label": "add(a: number, b: number): number",
			"parameters": [{"label": "a: number"}, {"label": "b: number"}]
		}],
		"activeSignature": 0,
		"activeParameter": active_parameter
	})
}

fn count_signature_events(events: &[UiEvent]) -> usize {
	events.iter().filter(|e| matches!(e, UiEvent::SignatureHelp { .. })).count()
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn trigger_character_shows_the_tooltip() {
	let (transport, _client, plugin, mut ui) = plugin_with_capabilities(caps_with_signatures(), "add(").await;
	transport.set_response("textDocument/signatureHelp", help(0));
	drain_ui(&mut ui);

	plugin.signature_help_on_insert(4, '(').await;
	settle().await;

	let events = drain_ui(&mut ui);
	assert_eq!(count_signature_events(&events), 1);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn non_trigger_character_is_ignored() {
	let (transport, _client, plugin, _ui) = plugin_with_capabilities(caps_with_signatures(), "add").await;
	transport.set_response("textDocument/signatureHelp", help(0));

	plugin.signature_help_on_insert(3, 'd').await;
	settle().await;

	assert!(!transport.recorded_methods().contains(&"textDocument/signatureHelp".to_string()));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn identical_signatures_skip_the_redispatch() {
	let (transport, _client, plugin, mut ui) = plugin_with_capabilities(caps_with_signatures(), "add(1,").await;
	transport.set_response("textDocument/signatureHelp", help(0));
	drain_ui(&mut ui);

	plugin.signature_help_on_insert(4, '(').await;
	settle().await;
	// Retrigger with the same signatures and the same active parameter.
	plugin.signature_help_on_insert(6, ',').await;
	settle().await;

	let events = drain_ui(&mut ui);
	assert_eq!(count_signature_events(&events), 1, "identical help must not redispatch");
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn changed_active_parameter_redispatches() {
	let (transport, _client, plugin, mut ui) = plugin_with_capabilities(caps_with_signatures(), "add(1,").await;
	transport.set_response("textDocument/signatureHelp", help(0));
	drain_ui(&mut ui);

	plugin.signature_help_on_insert(4, '(').await;
	settle().await;

	transport.set_response("textDocument/signatureHelp", help(1));
	plugin.signature_help_on_insert(6, ',').await;
	settle().await;

	let events = drain_ui(&mut ui);
	assert_eq!(count_signature_events(&events), 2);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn empty_result_clears_the_tooltip() {
	let (transport, _client, plugin, mut ui) = plugin_with_capabilities(caps_with_signatures(), "add(").await;
	transport.set_response("textDocument/signatureHelp", help(0));
	drain_ui(&mut ui);

	plugin.signature_help_on_insert(4, '(').await;
	settle().await;

	transport.set_response("textDocument/signatureHelp", json!(null));
	plugin.signature_help_on_insert(4, '(').await;
	settle().await;

	let events = drain_ui(&mut ui);
	assert!(events.iter().any(|e| matches!(e, UiEvent::SignatureHelpClear)));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn selection_change_requeries_after_the_debounce() {
	let (transport, _client, plugin, mut ui) = plugin_with_capabilities(caps_with_signatures(), "add(1, 2").await;
	transport.set_response("textDocument/signatureHelp", help(0));
	drain_ui(&mut ui);

	plugin.signature_help_on_insert(4, '(').await;
	settle().await;

	transport.set_response("textDocument/signatureHelp", help(1));
	plugin.signature_help_on_selection_change(8);
	// Past the 250ms retrigger debounce.
	tokio::time::sleep(std::time::Duration::from_millis(400)).await;

	let events = drain_ui(&mut ui);
	assert_eq!(count_signature_events(&events), 2);
}
