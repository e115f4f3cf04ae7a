//! Per-session JSON-RPC pipeline.
//!
//! Every message crossing the session runs, in order: URI conversion
//! (recursive, over every string field), handlers (exact method, then
//! the request/notification catch-all, then global), and middlewares
//! (same specificity order). A handler may answer a request locally or
//! cancel it outright; middlewares mutate params in place — and, for
//! responses headed back to clients, mutate the result with the original
//! request params available for context. The first successful
//! `initialize` result is cached and replayed to re-connecting clients,
//! and duplicate `initialized` notifications are suppressed.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use moor_lsp::{AnyResponse, JsonValue, Message, RequestId};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::SessionId;
use crate::uri::{UriDirection, UriMap};

/// Whether a message carries an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
	Request,
	Notification,
}

/// What a handler or middleware registration matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
	Exact(&'static str),
	Requests,
	Notifications,
	All,
}

impl Pattern {
	fn matches(&self, kind: MessageKind, method: &str) -> bool {
		match self {
			Self::Exact(m) => *m == method,
			Self::Requests => kind == MessageKind::Request,
			Self::Notifications => kind == MessageKind::Notification,
			Self::All => true,
		}
	}

	fn specificity(&self) -> u8 {
		match self {
			Self::Exact(_) => 0,
			Self::Requests | Self::Notifications => 1,
			Self::All => 2,
		}
	}
}

/// Handler verdict. The first non-[`Pass`](HandlerOutcome::Pass) ends
/// the handler chain.
#[derive(Debug)]
pub enum HandlerOutcome {
	Pass,
	/// Answer the request locally; never forwarded to the other side.
	Respond(JsonValue),
	/// The `cancel_response` sentinel: silently drop the message.
	Cancel,
}

/// Middleware verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MwOutcome {
	Continue,
	Cancel,
}

/// Terminal handler for a method, in either direction.
#[async_trait]
pub trait Handler: Send + Sync {
	fn pattern(&self) -> Pattern;
	async fn handle(&self, ctx: &SessionCtx, kind: MessageKind, method: &str, params: &mut JsonValue) -> HandlerOutcome;
}

/// Mutating observer for a method, in either direction.
#[async_trait]
pub trait Middleware: Send + Sync {
	fn pattern(&self) -> Pattern;

	async fn on_params(&self, _ctx: &SessionCtx, _kind: MessageKind, _method: &str, _params: &mut JsonValue) -> MwOutcome {
		MwOutcome::Continue
	}

	/// Runs on responses in the proc→client direction, with the original
	/// (already-converted) request params for context.
	async fn on_result(&self, _ctx: &SessionCtx, _method: &str, _original_params: &JsonValue, _result: &mut JsonValue) -> MwOutcome {
		MwOutcome::Continue
	}
}

/// Shared per-session state the middleware set works against.
pub struct SessionCtx {
	pub session: SessionId,
	pub uri_map: UriMap,
	/// Direct line to the child's stdin; payloads must already be in the
	/// real namespace.
	pub proc_tx: mpsc::UnboundedSender<Message>,
	/// Virtual uri → current text, maintained by the disk mirror.
	pub docs: DashMap<String, String>,
	/// Module specifiers a cache command was already fired for.
	pub cache_fired: Mutex<HashSet<String>>,
}

impl SessionCtx {
	pub fn new(session: SessionId, uri_map: UriMap, proc_tx: mpsc::UnboundedSender<Message>) -> Self {
		Self {
			session,
			uri_map,
			proc_tx,
			docs: DashMap::new(),
			cache_fired: Mutex::new(HashSet::new()),
		}
	}

	/// Fire-and-forget notification to the child.
	pub fn notify_proc(&self, method: &str, params: JsonValue) {
		let _ = self.proc_tx.send(Message::Notification(moor_lsp::AnyNotification {
			method: method.to_string(),
			params,
		}));
	}

	/// Fire-and-forget request to the child; the response is dropped by
	/// the mux since no connection owns the id.
	pub fn request_proc_detached(&self, method: &str, params: JsonValue) {
		let _ = self.proc_tx.send(Message::Request(moor_lsp::AnyRequest {
			id: RequestId::String(format!("moor-detached:{}", uuid::Uuid::new_v4())),
			method: method.to_string(),
			params,
		}));
	}
}

/// Where the pipeline sends a message next.
#[derive(Debug)]
pub enum PipelineOutcome {
	Forward(Message),
	/// Locally produced answer for the originating side.
	Respond(AnyResponse),
	Drop,
}

struct InFlight {
	method: String,
	params: JsonValue,
}

pub struct SessionProxy {
	ctx: Arc<SessionCtx>,
	client_handlers: Vec<Arc<dyn Handler>>,
	proc_handlers: Vec<Arc<dyn Handler>>,
	client_middlewares: Vec<Arc<dyn Middleware>>,
	proc_middlewares: Vec<Arc<dyn Middleware>>,
	in_flight: DashMap<RequestId, InFlight>,
	init_cache: Mutex<Option<JsonValue>>,
	initialized_sent: AtomicBool,
}

impl SessionProxy {
	pub fn new(ctx: Arc<SessionCtx>) -> Self {
		Self {
			ctx,
			client_handlers: Vec::new(),
			proc_handlers: Vec::new(),
			client_middlewares: Vec::new(),
			proc_middlewares: Vec::new(),
			in_flight: DashMap::new(),
			init_cache: Mutex::new(None),
			initialized_sent: AtomicBool::new(false),
		}
	}

	pub fn ctx(&self) -> &Arc<SessionCtx> {
		&self.ctx
	}

	pub fn add_client_handler(&mut self, handler: Arc<dyn Handler>) {
		self.client_handlers.push(handler);
	}

	pub fn add_proc_handler(&mut self, handler: Arc<dyn Handler>) {
		self.proc_handlers.push(handler);
	}

	pub fn add_client_middleware(&mut self, middleware: Arc<dyn Middleware>) {
		self.client_middlewares.push(middleware);
	}

	pub fn add_proc_middleware(&mut self, middleware: Arc<dyn Middleware>) {
		self.proc_middlewares.push(middleware);
	}

	fn ordered<'a, T: ?Sized>(&self, registered: &'a [Arc<T>], pattern: impl Fn(&T) -> Pattern, kind: MessageKind, method: &str) -> Vec<&'a Arc<T>> {
		let mut matching: Vec<(u8, usize, &Arc<T>)> = registered
			.iter()
			.enumerate()
			.filter(|(_, entry)| pattern(entry.as_ref()).matches(kind, method))
			.map(|(idx, entry)| (pattern(entry.as_ref()).specificity(), idx, entry))
			.collect();
		matching.sort_by_key(|(specificity, idx, _)| (*specificity, *idx));
		matching.into_iter().map(|(_, _, entry)| entry).collect()
	}

	/// Client → process half of the pipeline. The message has already
	/// been id-rewritten by the mux.
	pub async fn client_to_proc(&self, msg: Message) -> PipelineOutcome {
		match msg {
			Message::Request(mut req) => {
				if req.method == "initialize"
					&& let Some(cached) = self.init_cache.lock().clone()
				{
					trace!(session = %self.ctx.session, "proxy.replay_cached_initialize");
					return PipelineOutcome::Respond(AnyResponse::new_ok(req.id, cached));
				}

				self.ctx.uri_map.convert_value(&mut req.params, UriDirection::VirtualToReal);

				for handler in self.ordered(&self.client_handlers, |h| h.pattern(), MessageKind::Request, &req.method) {
					match handler.handle(&self.ctx, MessageKind::Request, &req.method, &mut req.params).await {
						HandlerOutcome::Pass => {}
						HandlerOutcome::Respond(mut result) => {
							self.ctx.uri_map.convert_value(&mut result, UriDirection::RealToVirtual);
							return PipelineOutcome::Respond(AnyResponse::new_ok(req.id, result));
						}
						HandlerOutcome::Cancel => return PipelineOutcome::Drop,
					}
				}

				for middleware in self.ordered(&self.client_middlewares, |m| m.pattern(), MessageKind::Request, &req.method) {
					if middleware.on_params(&self.ctx, MessageKind::Request, &req.method, &mut req.params).await == MwOutcome::Cancel {
						return PipelineOutcome::Drop;
					}
				}

				self.in_flight.insert(
					req.id.clone(),
					InFlight {
						method: req.method.clone(),
						params: req.params.clone(),
					},
				);
				PipelineOutcome::Forward(Message::Request(req))
			}
			Message::Notification(mut notif) => {
				if notif.method == "initialized" && self.initialized_sent.swap(true, Ordering::Relaxed) {
					trace!(session = %self.ctx.session, "proxy.suppress_duplicate_initialized");
					return PipelineOutcome::Drop;
				}

				self.ctx.uri_map.convert_value(&mut notif.params, UriDirection::VirtualToReal);

				for handler in self.ordered(&self.client_handlers, |h| h.pattern(), MessageKind::Notification, &notif.method) {
					match handler.handle(&self.ctx, MessageKind::Notification, &notif.method, &mut notif.params).await {
						HandlerOutcome::Pass => {}
						// Notifications have no response channel; a Respond
						// verdict just ends the chain.
						HandlerOutcome::Respond(_) => return PipelineOutcome::Drop,
						HandlerOutcome::Cancel => return PipelineOutcome::Drop,
					}
				}

				for middleware in self.ordered(&self.client_middlewares, |m| m.pattern(), MessageKind::Notification, &notif.method) {
					if middleware.on_params(&self.ctx, MessageKind::Notification, &notif.method, &mut notif.params).await == MwOutcome::Cancel {
						return PipelineOutcome::Drop;
					}
				}

				PipelineOutcome::Forward(Message::Notification(notif))
			}
			Message::Response(mut resp) => {
				// A client answering a server-initiated request.
				if let Some(result) = resp.result.as_mut() {
					self.ctx.uri_map.convert_value(result, UriDirection::VirtualToReal);
				}
				PipelineOutcome::Forward(Message::Response(resp))
			}
		}
	}

	/// Process → client half of the pipeline.
	pub async fn proc_to_client(&self, msg: Message) -> PipelineOutcome {
		match msg {
			Message::Response(mut resp) => {
				let in_flight = self.in_flight.remove(&resp.id).map(|(_, v)| v);

				if let Some(result) = resp.result.as_mut() {
					self.ctx.uri_map.convert_value(result, UriDirection::RealToVirtual);
				}
				if let Some(error) = resp.error.as_mut()
					&& let Some(data) = error.data.as_mut()
				{
					self.ctx.uri_map.convert_value(data, UriDirection::RealToVirtual);
				}

				if let Some(in_flight) = in_flight {
					if let Some(result) = resp.result.as_mut() {
						for middleware in self.ordered(&self.proc_middlewares, |m| m.pattern(), MessageKind::Request, &in_flight.method) {
							if middleware.on_result(&self.ctx, &in_flight.method, &in_flight.params, result).await == MwOutcome::Cancel {
								return PipelineOutcome::Drop;
							}
						}
					}
					if in_flight.method == "initialize" && resp.error.is_none() {
						let mut cache = self.init_cache.lock();
						if cache.is_none() {
							debug!(session = %self.ctx.session, "proxy.cache_initialize");
							*cache = resp.result.clone();
						}
					}
				}

				PipelineOutcome::Forward(Message::Response(resp))
			}
			Message::Notification(mut notif) => {
				self.ctx.uri_map.convert_value(&mut notif.params, UriDirection::RealToVirtual);

				for handler in self.ordered(&self.proc_handlers, |h| h.pattern(), MessageKind::Notification, &notif.method) {
					match handler.handle(&self.ctx, MessageKind::Notification, &notif.method, &mut notif.params).await {
						HandlerOutcome::Pass => {}
						HandlerOutcome::Respond(_) | HandlerOutcome::Cancel => return PipelineOutcome::Drop,
					}
				}

				for middleware in self.ordered(&self.proc_middlewares, |m| m.pattern(), MessageKind::Notification, &notif.method) {
					if middleware.on_params(&self.ctx, MessageKind::Notification, &notif.method, &mut notif.params).await == MwOutcome::Cancel {
						return PipelineOutcome::Drop;
					}
				}

				PipelineOutcome::Forward(Message::Notification(notif))
			}
			Message::Request(mut req) => {
				self.ctx.uri_map.convert_value(&mut req.params, UriDirection::RealToVirtual);

				for handler in self.ordered(&self.proc_handlers, |h| h.pattern(), MessageKind::Request, &req.method) {
					match handler.handle(&self.ctx, MessageKind::Request, &req.method, &mut req.params).await {
						HandlerOutcome::Pass => {}
						HandlerOutcome::Respond(mut result) => {
							self.ctx.uri_map.convert_value(&mut result, UriDirection::VirtualToReal);
							return PipelineOutcome::Respond(AnyResponse::new_ok(req.id, result));
						}
						HandlerOutcome::Cancel => return PipelineOutcome::Drop,
					}
				}

				for middleware in self.ordered(&self.proc_middlewares, |m| m.pattern(), MessageKind::Request, &req.method) {
					if middleware.on_params(&self.ctx, MessageKind::Request, &req.method, &mut req.params).await == MwOutcome::Cancel {
						return PipelineOutcome::Drop;
					}
				}

				PipelineOutcome::Forward(Message::Request(req))
			}
		}
	}

	/// Whether an `initialize` result is cached for replay.
	pub fn has_cached_initialize(&self) -> bool {
		self.init_cache.lock().is_some()
	}
}
