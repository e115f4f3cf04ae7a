//! Client-level window message handling.
//!
//! `window/showMessage` reaches the host per-plugin as a
//! [`UiEvent::ShowMessage`](crate::document::UiEvent::ShowMessage); the
//! handlers here cover what is client-wide: `window/logMessage` goes to
//! the log, and `window/showMessageRequest` gets a polite "no action
//! taken" answer so servers never hang on a UI we do not render.

use lsp_types::MessageType;
use moor_lsp::JsonValue;
use tracing::{debug, error, info, warn};

use crate::client::{LsClient, Subscription};

/// Installs client-wide window handlers. Keep the returned subscriptions
/// alive for as long as the client.
pub fn install(client: &LsClient) -> Vec<Subscription> {
	let log_sub = client.on_notification(|notif| {
		if notif.method != "window/logMessage" {
			return;
		}
		let Ok(params) = serde_json::from_value::<lsp_types::LogMessageParams>(notif.params.clone()) else {
			return;
		};
		match params.typ {
			MessageType::ERROR => error!(target: "moor_client::server_log", "{}", params.message),
			MessageType::WARNING => warn!(target: "moor_client::server_log", "{}", params.message),
			MessageType::INFO => info!(target: "moor_client::server_log", "{}", params.message),
			_ => debug!(target: "moor_client::server_log", "{}", params.message),
		}
	});

	let request_sub = client.on_request(|req| {
		if req.method == "window/showMessageRequest" {
			return Some(Ok(JsonValue::Null));
		}
		None
	});

	vec![log_sub, request_sub]
}
