//! Shared test harness: recording transports and plugin builders.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use lsp_types::{ServerCapabilities, Uri};
use moor_lsp::{AnyResponse, ErrorCode, JsonValue, Message, RequestId, ResponseError, Result};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::client::{LsClient, default_client_capabilities};
use crate::document::{DocumentPlugin, PluginConfig, UiEvent};
use crate::transport::{LspTransport, TransportEvent};

/// Transport that records every outbound message and answers requests
/// from a canned method→result map. Methods marked manual queue instead,
/// until the test releases them; methods marked failing error on send.
pub(crate) struct RecordingTransport {
	messages: Mutex<Vec<Message>>,
	responses: Mutex<HashMap<String, JsonValue>>,
	fail_methods: Mutex<HashSet<String>>,
	manual_methods: Mutex<HashSet<String>>,
	manual_queue: Mutex<Vec<(RequestId, String)>>,
	events_tx: mpsc::UnboundedSender<TransportEvent>,
	events_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
}

impl RecordingTransport {
	pub(crate) fn new() -> Arc<Self> {
		let (events_tx, events_rx) = mpsc::unbounded_channel();
		Arc::new(Self {
			messages: Mutex::new(Vec::new()),
			responses: Mutex::new(HashMap::new()),
			fail_methods: Mutex::new(HashSet::new()),
			manual_methods: Mutex::new(HashSet::new()),
			manual_queue: Mutex::new(Vec::new()),
			events_tx,
			events_rx: Mutex::new(Some(events_rx)),
		})
	}

	/// Canned initialize result advertising `capabilities`.
	pub(crate) fn with_capabilities(capabilities: ServerCapabilities) -> Arc<Self> {
		let transport = Self::new();
		transport.set_response(
			"initialize",
			serde_json::to_value(lsp_types::InitializeResult {
				capabilities,
				server_info: None,
			})
			.unwrap(),
		);
		transport
	}

	pub(crate) fn set_response(&self, method: &str, result: JsonValue) {
		self.responses.lock().insert(method.to_string(), result);
	}

	pub(crate) fn set_fail_method(&self, method: &str) {
		self.fail_methods.lock().insert(method.to_string());
	}

	pub(crate) fn clear_fail_method(&self, method: &str) {
		self.fail_methods.lock().remove(method);
	}

	pub(crate) fn set_manual_method(&self, method: &str) {
		self.manual_methods.lock().insert(method.to_string());
	}

	/// Answers the oldest queued manual request for `method`.
	pub(crate) fn release_manual(&self, method: &str, result: JsonValue) {
		let id = {
			let mut queue = self.manual_queue.lock();
			let idx = queue.iter().position(|(_, m)| m == method);
			idx.map(|idx| queue.remove(idx).0)
		};
		if let Some(id) = id {
			let _ = self.events_tx.send(TransportEvent::Message(Message::Response(AnyResponse::new_ok(id, result))));
		}
	}

	pub(crate) fn manual_queue_len(&self) -> usize {
		self.manual_queue.lock().len()
	}

	/// Injects a server-initiated notification.
	pub(crate) fn push_notification(&self, method: &str, params: JsonValue) {
		let _ = self.events_tx.send(TransportEvent::Message(Message::Notification(moor_lsp::AnyNotification {
			method: method.to_string(),
			params,
		})));
	}

	pub(crate) fn recorded(&self) -> Vec<Message> {
		self.messages.lock().clone()
	}

	pub(crate) fn recorded_methods(&self) -> Vec<String> {
		self.messages
			.lock()
			.iter()
			.filter_map(|msg| msg.method().map(str::to_string))
			.collect()
	}

	/// Params of every recorded `textDocument/didChange`, in send order.
	pub(crate) fn did_changes(&self) -> Vec<lsp_types::DidChangeTextDocumentParams> {
		self.messages
			.lock()
			.iter()
			.filter_map(|msg| match msg {
				Message::Notification(notif) if notif.method == "textDocument/didChange" => {
					serde_json::from_value(notif.params.clone()).ok()
				}
				_ => None,
			})
			.collect()
	}
}

#[async_trait::async_trait]
impl LspTransport for RecordingTransport {
	fn subscribe_events(&self) -> Result<mpsc::UnboundedReceiver<TransportEvent>> {
		self.events_rx
			.lock()
			.take()
			.ok_or_else(|| moor_lsp::Error::Protocol("already subscribed".into()))
	}

	async fn send(&self, msg: Message) -> Result<()> {
		self.messages.lock().push(msg.clone());
		match msg {
			Message::Request(req) => {
				if self.manual_methods.lock().contains(&req.method) {
					self.manual_queue.lock().push((req.id, req.method));
					return Ok(());
				}
				let canned = self.responses.lock().get(&req.method).cloned();
				let response = match canned {
					Some(result) => AnyResponse::new_ok(req.id, result),
					None => AnyResponse::new_err(
						req.id,
						ResponseError::new(ErrorCode::METHOD_NOT_FOUND, format!("no canned response for {}", req.method)),
					),
				};
				let _ = self.events_tx.send(TransportEvent::Message(Message::Response(response)));
				Ok(())
			}
			Message::Notification(notif) => {
				if self.fail_methods.lock().contains(&notif.method) {
					return Err(moor_lsp::Error::Protocol(format!("injected failure for {}", notif.method)));
				}
				Ok(())
			}
			Message::Response(_) => Ok(()),
		}
	}

	async fn close(&self) -> Result<()> {
		Ok(())
	}
}

pub(crate) fn test_uri() -> Uri {
	"file:///main.ts".parse().unwrap()
}

/// Builds an initialized client over `transport`.
pub(crate) async fn initialized_client(transport: Arc<RecordingTransport>) -> LsClient {
	let client = LsClient::new(transport);
	client
		.initialize(lsp_types::InitializeParams {
			capabilities: default_client_capabilities(),
			..Default::default()
		})
		.await
		.expect("initialize");
	client
}

/// Builds an initialized client plus an attached plugin over `text`.
pub(crate) async fn plugin_with_capabilities(
	capabilities: ServerCapabilities,
	text: &str,
) -> (Arc<RecordingTransport>, LsClient, DocumentPlugin, mpsc::UnboundedReceiver<UiEvent>) {
	let transport = RecordingTransport::with_capabilities(capabilities);
	let client = initialized_client(transport.clone()).await;
	let (plugin, ui_rx) = DocumentPlugin::attach(client.clone(), PluginConfig::new(test_uri(), "typescript"), text);
	// Let the spawned didOpen land before the test starts editing.
	tokio::time::sleep(std::time::Duration::from_millis(10)).await;
	(transport, client, plugin, ui_rx)
}

/// Drains currently queued UI events without waiting.
pub(crate) fn drain_ui(ui_rx: &mut mpsc::UnboundedReceiver<UiEvent>) -> Vec<UiEvent> {
	let mut events = Vec::new();
	while let Ok(event) = ui_rx.try_recv() {
		events.push(event);
	}
	events
}

/// Lets spawned tasks settle. Tests run with paused time, so this only
/// advances the clock past pending timers.
pub(crate) async fn settle() {
	tokio::time::sleep(std::time::Duration::from_millis(50)).await;
}
