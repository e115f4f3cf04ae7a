//! JSON-RPC client over a pluggable transport.
//!
//! Owns request/response correlation, the initialize gate, the server
//! capability store, and subscriber fan-out for server-initiated
//! notifications and requests. Document plugins attach themselves so a
//! re-initialize (after server restart or transport swap) can replay
//! their `didOpen`s.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use lsp_types::notification::Notification as LspNotification;
use lsp_types::request::Request as LspRequest;
use lsp_types::{
	ClientCapabilities, CodeActionCapabilityResolveSupport, CodeActionClientCapabilities, CodeActionLiteralSupport,
	CodeActionKindLiteralSupport, CompletionClientCapabilities, CompletionItemCapability, HoverClientCapabilities,
	InitializeResult, MarkupKind, RenameClientCapabilities, ServerCapabilities, ServerInfo,
	SignatureHelpClientCapabilities, SignatureInformationSettings, TextDocumentClientCapabilities,
	TextDocumentSyncCapability, TextDocumentSyncKind,
};
use moor_lsp::{
	AnyNotification, AnyRequest, AnyResponse, Error, ErrorCode, JsonValue, Message, OffsetEncoding, RequestId,
	ResponseError, Result,
};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::transport::{LspTransport, TransportEvent};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Handler return for server-initiated requests. `None` passes to the
/// next handler; the last resort replies method-not-found.
pub type RequestHandlerResult = Option<std::result::Result<JsonValue, ResponseError>>;

type NotificationHandler = Arc<dyn Fn(&AnyNotification) + Send + Sync>;
type RequestHandler = Arc<dyn Fn(&AnyRequest) -> RequestHandlerResult + Send + Sync>;
type ErrorHandler = Arc<dyn Fn(&Error) + Send + Sync>;

/// A plugin attached to the client; replayed on (re)initialize.
pub trait AttachedPlugin: Send + Sync {
	fn reinitialize(&self);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SubscriberKind {
	Notification,
	Request,
	Error,
}

/// Disposer for a subscriber registration. Dropping it unregisters.
pub struct Subscription {
	id: u64,
	kind: SubscriberKind,
	client: std::sync::Weak<ClientShared>,
}

impl Drop for Subscription {
	fn drop(&mut self) {
		if let Some(shared) = self.client.upgrade() {
			match self.kind {
				SubscriberKind::Notification => shared.notification_handlers.lock().retain(|(id, _)| *id != self.id),
				SubscriberKind::Request => shared.request_handlers.lock().retain(|(id, _)| *id != self.id),
				SubscriberKind::Error => shared.error_handlers.lock().retain(|(id, _)| *id != self.id),
			}
		}
	}
}

struct ClientShared {
	transport: RwLock<Arc<dyn LspTransport>>,
	reader: Mutex<Option<JoinHandle<()>>>,
	next_id: AtomicI64,
	next_sub_id: AtomicU64,
	pending: DashMap<RequestId, oneshot::Sender<AnyResponse>>,
	capabilities: RwLock<Option<ServerCapabilities>>,
	server_info: RwLock<Option<ServerInfo>>,
	offset_encoding: RwLock<OffsetEncoding>,
	ready_tx: watch::Sender<bool>,
	ready_rx: watch::Receiver<bool>,
	request_timeout: Duration,
	notification_handlers: Mutex<Vec<(u64, NotificationHandler)>>,
	request_handlers: Mutex<Vec<(u64, RequestHandler)>>,
	error_handlers: Mutex<Vec<(u64, ErrorHandler)>>,
	plugins: Mutex<Vec<std::sync::Weak<dyn AttachedPlugin>>>,
}

/// Cheaply clonable handle to the shared client state.
#[derive(Clone)]
pub struct LsClient {
	shared: Arc<ClientShared>,
}

impl std::fmt::Debug for LsClient {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("LsClient").field("ready", &*self.shared.ready_rx.borrow()).finish()
	}
}

impl LsClient {
	pub fn new(transport: Arc<dyn LspTransport>) -> Self {
		Self::with_request_timeout(transport, DEFAULT_REQUEST_TIMEOUT)
	}

	pub fn with_request_timeout(transport: Arc<dyn LspTransport>, request_timeout: Duration) -> Self {
		let (ready_tx, ready_rx) = watch::channel(false);
		let shared = Arc::new(ClientShared {
			transport: RwLock::new(transport),
			reader: Mutex::new(None),
			next_id: AtomicI64::new(1),
			next_sub_id: AtomicU64::new(1),
			pending: DashMap::new(),
			capabilities: RwLock::new(None),
			server_info: RwLock::new(None),
			offset_encoding: RwLock::new(OffsetEncoding::Utf16),
			ready_tx,
			ready_rx,
			request_timeout,
			notification_handlers: Mutex::new(Vec::new()),
			request_handlers: Mutex::new(Vec::new()),
			error_handlers: Mutex::new(Vec::new()),
			plugins: Mutex::new(Vec::new()),
		});

		let client = Self { shared };
		client.spawn_reader();
		client
	}

	fn spawn_reader(&self) {
		let transport = self.shared.transport.read().clone();
		let events = match transport.subscribe_events() {
			Ok(events) => events,
			Err(e) => {
				warn!(error = %e, "client.subscribe_failed");
				return;
			}
		};

		let shared = Arc::downgrade(&self.shared);
		let handle = tokio::spawn(async move {
			Self::read_loop(shared, events).await;
		});

		let mut reader = self.shared.reader.lock();
		if let Some(old) = reader.replace(handle) {
			old.abort();
		}
	}

	async fn read_loop(shared: std::sync::Weak<ClientShared>, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
		while let Some(event) = events.recv().await {
			let Some(shared) = shared.upgrade() else {
				return;
			};
			match event {
				TransportEvent::Connected => {
					trace!("client.transport_connected");
				}
				TransportEvent::Disconnected => {
					let error = Error::TransportClosed;
					for (_, handler) in shared.error_handlers.lock().iter() {
						handler(&error);
					}
				}
				TransportEvent::Message(Message::Response(resp)) => {
					match shared.pending.remove(&resp.id) {
						Some((_, tx)) => {
							let _ = tx.send(resp);
						}
						None => {
							// Late reply for an abandoned request.
							trace!(id = %resp.id, "client.drop_unmatched_response");
						}
					}
				}
				TransportEvent::Message(Message::Notification(notif)) => {
					let handlers: Vec<NotificationHandler> =
						shared.notification_handlers.lock().iter().map(|(_, h)| h.clone()).collect();
					for handler in handlers {
						handler(&notif);
					}
				}
				TransportEvent::Message(Message::Request(req)) => {
					let handlers: Vec<RequestHandler> =
						shared.request_handlers.lock().iter().map(|(_, h)| h.clone()).collect();
					let mut outcome = None;
					for handler in handlers {
						if let Some(result) = handler(&req) {
							outcome = Some(result);
							break;
						}
					}
					let response = match outcome {
						Some(Ok(result)) => AnyResponse::new_ok(req.id.clone(), result),
						Some(Err(err)) => AnyResponse::new_err(req.id.clone(), err),
						None => AnyResponse::new_err(
							req.id.clone(),
							ResponseError::new(ErrorCode::METHOD_NOT_FOUND, format!("unhandled request {}", req.method)),
						),
					};
					let transport = shared.transport.read().clone();
					if let Err(e) = transport.send(Message::Response(response)).await {
						debug!(error = %e, "client.reply_failed");
					}
				}
			}
		}
	}

	/// Swaps the transport. In-flight requests keep waiting; the server
	/// side rewrites ids, so callers are free to re-issue on timeout.
	pub fn change_transport(&self, transport: Arc<dyn LspTransport>) {
		*self.shared.transport.write() = transport;
		self.spawn_reader();
	}

	pub fn on_notification(&self, handler: impl Fn(&AnyNotification) + Send + Sync + 'static) -> Subscription {
		let id = self.shared.next_sub_id.fetch_add(1, Ordering::Relaxed);
		self.shared.notification_handlers.lock().push((id, Arc::new(handler)));
		Subscription {
			id,
			kind: SubscriberKind::Notification,
			client: Arc::downgrade(&self.shared),
		}
	}

	pub fn on_request(&self, handler: impl Fn(&AnyRequest) -> RequestHandlerResult + Send + Sync + 'static) -> Subscription {
		let id = self.shared.next_sub_id.fetch_add(1, Ordering::Relaxed);
		self.shared.request_handlers.lock().push((id, Arc::new(handler)));
		Subscription {
			id,
			kind: SubscriberKind::Request,
			client: Arc::downgrade(&self.shared),
		}
	}

	pub fn on_error(&self, handler: impl Fn(&Error) + Send + Sync + 'static) -> Subscription {
		let id = self.shared.next_sub_id.fetch_add(1, Ordering::Relaxed);
		self.shared.error_handlers.lock().push((id, Arc::new(handler)));
		Subscription {
			id,
			kind: SubscriberKind::Error,
			client: Arc::downgrade(&self.shared),
		}
	}

	/// Registers a plugin for replay on (re)initialize.
	pub fn attach_plugin(&self, plugin: std::sync::Weak<dyn AttachedPlugin>) {
		self.shared.plugins.lock().push(plugin);
	}

	/// Drops dead plugin entries. Called from plugin teardown so the
	/// client never keeps a destroyed view alive.
	pub fn prune_plugins(&self) {
		self.shared.plugins.lock().retain(|p| p.strong_count() > 0);
	}

	pub fn is_ready(&self) -> bool {
		*self.shared.ready_rx.borrow()
	}

	pub fn capabilities(&self) -> Option<ServerCapabilities> {
		self.shared.capabilities.read().clone()
	}

	pub fn server_info(&self) -> Option<ServerInfo> {
		self.shared.server_info.read().clone()
	}

	pub fn offset_encoding(&self) -> OffsetEncoding {
		*self.shared.offset_encoding.read()
	}

	/// Performs the initialize handshake: stores capabilities, emits
	/// `initialized`, opens the readiness gate, then replays every
	/// attached plugin.
	pub async fn initialize(&self, params: lsp_types::InitializeParams) -> Result<InitializeResult> {
		let raw = self.request_unguarded("initialize", serde_json::to_value(params)?).await?;
		let result: InitializeResult = serde_json::from_value(raw)?;

		let encoding = result
			.capabilities
			.position_encoding
			.as_ref()
			.and_then(OffsetEncoding::from_position_encoding)
			.unwrap_or_default();
		*self.shared.capabilities.write() = Some(result.capabilities.clone());
		*self.shared.server_info.write() = result.server_info.clone();
		*self.shared.offset_encoding.write() = encoding;

		self.notify_raw("initialized", serde_json::json!({})).await?;
		let _ = self.shared.ready_tx.send(true);

		let plugins: Vec<_> = self.shared.plugins.lock().iter().filter_map(|p| p.upgrade()).collect();
		for plugin in plugins {
			plugin.reinitialize();
		}

		debug!(server = ?result.server_info.as_ref().map(|i| i.name.as_str()), "client.initialized");
		Ok(result)
	}

	/// Typed request. Waits for initialization first.
	pub async fn request<R: LspRequest>(&self, params: R::Params) -> Result<R::Result> {
		let raw = self.request_raw(R::METHOD, serde_json::to_value(params)?).await?;
		Ok(serde_json::from_value(raw)?)
	}

	/// Raw escape hatch for custom methods.
	pub async fn request_raw(&self, method: &str, params: JsonValue) -> Result<JsonValue> {
		self.wait_ready().await;
		self.request_unguarded(method, params).await
	}

	async fn request_unguarded(&self, method: &str, params: JsonValue) -> Result<JsonValue> {
		let id = RequestId::Number(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
		let (tx, rx) = oneshot::channel();
		self.shared.pending.insert(id.clone(), tx);

		let req = AnyRequest {
			id: id.clone(),
			method: method.to_string(),
			params,
		};
		let transport = self.shared.transport.read().clone();
		if let Err(e) = transport.send(Message::Request(req)).await {
			self.shared.pending.remove(&id);
			return Err(e);
		}

		let response = match tokio::time::timeout(self.shared.request_timeout, rx).await {
			Ok(Ok(resp)) => resp,
			Ok(Err(_)) => {
				self.shared.pending.remove(&id);
				return Err(Error::TransportClosed);
			}
			Err(_) => {
				self.shared.pending.remove(&id);
				return Err(Error::TransportTimeout);
			}
		};

		response.into_result().map_err(Error::Response)
	}

	/// Typed notification.
	pub async fn notify<N: LspNotification>(&self, params: N::Params) -> Result<()> {
		self.notify_raw(N::METHOD, serde_json::to_value(params)?).await
	}

	pub async fn notify_raw(&self, method: &str, params: JsonValue) -> Result<()> {
		let transport = self.shared.transport.read().clone();
		transport
			.send(Message::Notification(AnyNotification {
				method: method.to_string(),
				params,
			}))
			.await
	}

	async fn wait_ready(&self) {
		let mut rx = self.shared.ready_rx.clone();
		// Closed sender means the client is being dropped; proceed and let
		// the send fail.
		let _ = rx.wait_for(|ready| *ready).await;
	}

	pub(crate) fn sync_kind(&self) -> TextDocumentSyncKind {
		match self.capabilities().and_then(|c| c.text_document_sync) {
			Some(TextDocumentSyncCapability::Kind(kind)) => kind,
			Some(TextDocumentSyncCapability::Options(options)) => options.change.unwrap_or(TextDocumentSyncKind::NONE),
			None => TextDocumentSyncKind::NONE,
		}
	}

	pub(crate) fn supports_incremental_sync(&self) -> bool {
		self.sync_kind() == TextDocumentSyncKind::INCREMENTAL
	}
}

/// Capabilities advertised by this client (spec'd feature set: markdown
/// hover/completion docs, snippets, insert/replace edits, code-action
/// literals with `edit` resolve, prepare-rename, dynamic sync
/// registration, markdown signature docs).
pub fn default_client_capabilities() -> ClientCapabilities {
	ClientCapabilities {
		text_document: Some(TextDocumentClientCapabilities {
			synchronization: Some(lsp_types::TextDocumentSyncClientCapabilities {
				dynamic_registration: Some(true),
				..Default::default()
			}),
			hover: Some(HoverClientCapabilities {
				content_format: Some(vec![MarkupKind::Markdown, MarkupKind::PlainText]),
				..Default::default()
			}),
			completion: Some(CompletionClientCapabilities {
				completion_item: Some(CompletionItemCapability {
					snippet_support: Some(true),
					insert_replace_support: Some(true),
					documentation_format: Some(vec![MarkupKind::Markdown, MarkupKind::PlainText]),
					..Default::default()
				}),
				..Default::default()
			}),
			code_action: Some(CodeActionClientCapabilities {
				code_action_literal_support: Some(CodeActionLiteralSupport {
					code_action_kind: CodeActionKindLiteralSupport {
						value_set: vec![
							"quickfix".into(),
							"refactor".into(),
							"refactor.extract".into(),
							"refactor.inline".into(),
							"refactor.rewrite".into(),
							"source".into(),
							"source.organizeImports".into(),
						],
					},
				}),
				resolve_support: Some(CodeActionCapabilityResolveSupport {
					properties: vec!["edit".into()],
				}),
				data_support: Some(true),
				..Default::default()
			}),
			rename: Some(RenameClientCapabilities {
				prepare_support: Some(true),
				..Default::default()
			}),
			signature_help: Some(SignatureHelpClientCapabilities {
				signature_information: Some(SignatureInformationSettings {
					documentation_format: Some(vec![MarkupKind::Markdown, MarkupKind::PlainText]),
					..Default::default()
				}),
				..Default::default()
			}),
			..Default::default()
		}),
		..Default::default()
	}
}
