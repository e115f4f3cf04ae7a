//! WebSocket termination and session wiring.
//!
//! Upgrades are keyed by the `session` query parameter; every socket
//! bearing the same id lands in one [`Session`] sharing one child. Close
//! codes follow the protocol contract: 1000 when a connection is shed
//! for quota, 1011 on internal errors, 1012 when a session or the whole
//! proxy goes away.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use futures_util::{SinkExt, StreamExt};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::service::service_fn;
use hyper_tungstenite::tungstenite::Message as WsMessage;
use hyper_tungstenite::tungstenite::protocol::CloseFrame;
use hyper_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use hyper_util::rt::TokioIo;
use moor_lsp::{FrameDecoder, Message, chunk_frame, encode_frame};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ProxyConfig;
use crate::manager::{ManagerEvent, ProcManager};
use crate::middleware::install_defaults;
use crate::mux::{ConnectionId, SessionMux};
use crate::proc::ProcessConfig;
use crate::proxy::{PipelineOutcome, SessionCtx, SessionProxy};
use crate::uri::UriMap;
use crate::SessionId;

const CLOSE_QUOTA: u16 = 1000;
const CLOSE_INTERNAL: u16 = 1011;
const CLOSE_GOING_AWAY: u16 = 1012;

/// One live session: child process, mux, proxy pipeline, and the socket
/// close handles needed to enforce quotas and teardown.
pub struct Session {
	pub id: SessionId,
	pub mux: SessionMux,
	pub proxy: SessionProxy,
	// Owns the on-disk tree; removed when the session drops.
	_root: tempfile::TempDir,
	close_handles: Mutex<HashMap<ConnectionId, CloseHandle>>,
}

#[derive(Clone)]
struct CloseHandle {
	token: CancellationToken,
	close_info: Arc<Mutex<Option<(u16, String)>>>,
}

impl CloseHandle {
	fn close(&self, code: u16, reason: &str) {
		*self.close_info.lock() = Some((code, reason.to_string()));
		self.token.cancel();
	}
}

impl Session {
	/// Builds a session around an already-launched child.
	pub fn new(
		id: SessionId,
		root: tempfile::TempDir,
		proc: Arc<crate::proc::ManagedProc>,
		on_proc_gone: impl FnOnce() + Send + 'static,
	) -> Arc<Self> {
		let (proc_tx, mut proc_rx) = mpsc::unbounded_channel::<Message>();
		let ctx = Arc::new(SessionCtx::new(id.clone(), UriMap::new(root.path()), proc_tx));
		let mut proxy = SessionProxy::new(ctx);
		install_defaults(&mut proxy);

		let session = Arc::new(Self {
			id: id.clone(),
			mux: SessionMux::new(),
			proxy,
			_root: root,
			close_handles: Mutex::new(HashMap::new()),
		});

		let Some((mut stdin, mut stdout)) = proc.take_io() else {
			warn!(session = %id, "session.proc_io_already_taken");
			return session;
		};

		// Client → child writer. Every message is one contiguous framed
		// buffer, so interleaved writers cannot corrupt a message.
		tokio::spawn(async move {
			while let Some(msg) = proc_rx.recv().await {
				let frame = match encode_frame(&msg) {
					Ok(frame) => frame,
					Err(e) => {
						warn!(error = %e, "session.encode_failed");
						continue;
					}
				};
				if stdin.write_all(&frame).await.is_err() || stdin.flush().await.is_err() {
					return;
				}
			}
		});

		// Child → clients reader: frame, run the proc→client pipeline,
		// route through the mux.
		let reader_session = session.clone();
		tokio::spawn(async move {
			let mut decoder = FrameDecoder::new();
			let mut buf = [0u8; 16 * 1024];
			loop {
				match stdout.read(&mut buf).await {
					Ok(0) | Err(_) => break,
					Ok(n) => decoder.push(&buf[..n]),
				}
				loop {
					match decoder.next_message() {
						Ok(Some(msg)) => reader_session.dispatch_from_proc(msg).await,
						Ok(None) => break,
						Err(e) => {
							warn!(session = %reader_session.id, error = %e, "session.proc_stream_malformed");
							reader_session.mux.close_all();
							on_proc_gone();
							return;
						}
					}
				}
			}
			debug!(session = %reader_session.id, "session.proc_stdout_closed");
			reader_session.mux.close_all();
			on_proc_gone();
		});

		session
	}

	async fn dispatch_from_proc(&self, msg: Message) {
		match self.proxy.proc_to_client(msg).await {
			PipelineOutcome::Forward(msg) => self.mux.route_outbound(msg),
			// A proxy-answered server request goes back to the child.
			PipelineOutcome::Respond(resp) => {
				let _ = self.proxy.ctx().proc_tx.send(Message::Response(resp));
			}
			PipelineOutcome::Drop => {}
		}
	}

	/// Runs one client message through id rewriting and the pipeline.
	pub async fn dispatch_from_client(&self, conn: ConnectionId, msg: Message) {
		let msg = self.mux.rewrite_inbound(conn, msg);
		match self.proxy.client_to_proc(msg).await {
			PipelineOutcome::Forward(msg) => {
				let _ = self.proxy.ctx().proc_tx.send(msg);
			}
			// Locally answered: the mux maps the wire id back to the
			// connection's own id and delivers it there only.
			PipelineOutcome::Respond(resp) => self.mux.route_outbound(Message::Response(resp)),
			PipelineOutcome::Drop => {}
		}
	}

	fn register_close_handle(&self, conn: ConnectionId, handle: CloseHandle) {
		self.close_handles.lock().insert(conn, handle);
	}

	fn drop_connection(&self, conn: ConnectionId) {
		self.mux.remove_connection(conn);
		self.close_handles.lock().remove(&conn);
	}

	/// Sheds the oldest connection with the quota close code.
	fn shed_oldest(&self) {
		if let Some(oldest) = self.mux.oldest_connection() {
			info!(session = %self.id, conn = oldest.0, "session.shed_oldest_connection");
			let handle = self.close_handles.lock().get(&oldest).cloned();
			if let Some(handle) = handle {
				handle.close(CLOSE_QUOTA, "Connection limit exceeded");
			}
			self.drop_connection(oldest);
		}
	}

	/// Closes every socket with `code` and ends the mux.
	pub fn close_all(&self, code: u16, reason: &str) {
		let handles: Vec<CloseHandle> = self.close_handles.lock().drain().map(|(_, handle)| handle).collect();
		for handle in handles {
			handle.close(code, reason);
		}
		self.mux.close_all();
	}
}

struct ServerInner {
	config: ProxyConfig,
	manager: Arc<ProcManager>,
	sessions: Mutex<HashMap<SessionId, Arc<Session>>>,
	session_gate: tokio::sync::Mutex<()>,
	accepting: AtomicBool,
	last_activity: Mutex<Instant>,
	shutdown: CancellationToken,
}

/// The proxy's WebSocket front end.
#[derive(Clone)]
pub struct WsServer {
	inner: Arc<ServerInner>,
}

impl WsServer {
	pub fn new(config: ProxyConfig, manager: Arc<ProcManager>, manager_events: mpsc::UnboundedReceiver<ManagerEvent>) -> Self {
		let server = Self {
			inner: Arc::new(ServerInner {
				config,
				manager,
				sessions: Mutex::new(HashMap::new()),
				session_gate: tokio::sync::Mutex::new(()),
				accepting: AtomicBool::new(true),
				last_activity: Mutex::new(Instant::now()),
				shutdown: CancellationToken::new(),
			}),
		};
		server.spawn_manager_event_task(manager_events);
		server.spawn_inactivity_task();
		server
	}

	fn spawn_manager_event_task(&self, mut events: mpsc::UnboundedReceiver<ManagerEvent>) {
		let server = self.clone();
		tokio::spawn(async move {
			while let Some(event) = events.recv().await {
				match event {
					ManagerEvent::SessionEvicted { session } => {
						server.close_session(&session, CLOSE_GOING_AWAY, "session evicted").await;
					}
					ManagerEvent::ProcExited { session, report } => {
						let reason = if report.crashed {
							format!("language server crashed (code {:?}): {}", report.code, report.stderr_tail.join(" | "))
						} else {
							"language server exited".to_string()
						};
						server.close_session(&session, CLOSE_GOING_AWAY, &reason).await;
						if report.crashed && server.inner.config.exit_on_proc_crash {
							warn!(session = %session, "server.fatal_proc_crash");
							server.shutdown().await;
						}
					}
				}
			}
		});
	}

	fn spawn_inactivity_task(&self) {
		let Some(timeout) = self.inner.config.inactivity_timeout() else {
			return;
		};
		let server = self.clone();
		tokio::spawn(async move {
			loop {
				let idle = server.inner.last_activity.lock().elapsed();
				if idle >= timeout {
					info!(idle_secs = idle.as_secs(), "server.inactivity_shutdown");
					server.shutdown().await;
					return;
				}
				tokio::select! {
					_ = server.inner.shutdown.cancelled() => return,
					_ = tokio::time::sleep(timeout - idle) => {}
				}
			}
		});
	}

	fn touch_activity(&self) {
		*self.inner.last_activity.lock() = Instant::now();
	}

	pub fn is_accepting(&self) -> bool {
		self.inner.accepting.load(Ordering::Relaxed)
	}

	pub fn session_count(&self) -> usize {
		self.inner.sessions.lock().len()
	}

	/// Binds and serves until shutdown.
	pub async fn serve(&self) -> anyhow::Result<()> {
		let listener = tokio::net::TcpListener::bind(&self.inner.config.listen).await?;
		info!(listen = %self.inner.config.listen, "server.listening");

		loop {
			let (stream, peer) = tokio::select! {
				_ = self.inner.shutdown.cancelled() => break,
				accepted = listener.accept() => accepted?,
			};
			debug!(%peer, "server.accepted");

			let server = self.clone();
			tokio::spawn(async move {
				let io = TokioIo::new(stream);
				let service = service_fn(move |req| {
					let server = server.clone();
					async move { server.handle_http(req).await }
				});
				let builder = hyper::server::conn::http1::Builder::new();
				if let Err(e) = builder.serve_connection(io, service).with_upgrades().await {
					debug!(error = %e, "server.connection_error");
				}
			});
		}

		self.shutdown().await;
		Ok(())
	}

	async fn handle_http(&self, mut req: hyper::Request<hyper::body::Incoming>) -> anyhow::Result<hyper::Response<Full<Bytes>>> {
		if !hyper_tungstenite::is_upgrade_request(&req) {
			return Ok(hyper::Response::builder().status(hyper::StatusCode::OK).body(Full::new(Bytes::from_static(b"moor proxy\n")))?);
		}

		let Some(session_id) = session_from_query(req.uri().query()) else {
			return Ok(hyper::Response::builder()
				.status(hyper::StatusCode::BAD_REQUEST)
				.body(Full::new(Bytes::from_static(b"missing session parameter\n")))?);
		};

		let (response, websocket) = hyper_tungstenite::upgrade(&mut req, None)?;
		let server = self.clone();
		tokio::spawn(async move {
			match websocket.await {
				Ok(socket) => server.handle_socket(socket, session_id).await,
				Err(e) => debug!(error = %e, "server.upgrade_failed"),
			}
		});
		Ok(response)
	}

	async fn handle_socket(&self, socket: hyper_tungstenite::HyperWebsocketStream, session_id: SessionId) {
		let (mut sink, mut source) = socket.split();

		if !self.is_accepting() {
			let _ = sink
				.send(WsMessage::Close(Some(CloseFrame {
					code: CloseCode::from(CLOSE_GOING_AWAY),
					reason: "server shutting down".into(),
				})))
				.await;
			return;
		}

		let session = match self.get_or_create_session(&session_id).await {
			Ok(session) => session,
			Err(e) => {
				warn!(session = %session_id, error = %e, "server.session_create_failed");
				let _ = sink
					.send(WsMessage::Close(Some(CloseFrame {
						code: CloseCode::from(CLOSE_INTERNAL),
						reason: "failed to start language server".into(),
					})))
					.await;
				return;
			}
		};

		// Quota: the oldest connection yields to the newest.
		while session.mux.connection_count() >= self.inner.config.max_connections_per_session {
			session.shed_oldest();
		}

		let (conn_id, mut outbound_rx) = session.mux.add_connection();
		let close_handle = CloseHandle {
			token: CancellationToken::new(),
			close_info: Arc::new(Mutex::new(None)),
		};
		session.register_close_handle(conn_id, close_handle.clone());
		info!(session = %session_id, conn = conn_id.0, "server.connection_open");

		// Writer half: session messages out, chunked to the frame cap.
		let max_size = self.inner.config.max_ws_message_size;
		let writer_token = close_handle.token.clone();
		let close_info = close_handle.close_info.clone();
		let writer = tokio::spawn(async move {
			loop {
				let msg = tokio::select! {
					_ = writer_token.cancelled() => break,
					msg = outbound_rx.recv() => msg,
				};
				let Some(msg) = msg else { break };
				let frame = match encode_frame(&msg) {
					Ok(frame) => frame,
					Err(e) => {
						warn!(error = %e, "server.encode_failed");
						continue;
					}
				};
				for chunk in chunk_frame(&frame, max_size) {
					if sink.send(WsMessage::Binary(chunk.to_vec().into())).await.is_err() {
						return;
					}
				}
			}
			let (code, reason) = close_info.lock().take().unwrap_or((CLOSE_GOING_AWAY, String::new()));
			let _ = sink
				.send(WsMessage::Close(Some(CloseFrame {
					code: CloseCode::from(code),
					reason: reason.into(),
				})))
				.await;
		});

		// Reader half: frames in, decoder, pipeline.
		let mut decoder = FrameDecoder::new();
		loop {
			let frame = tokio::select! {
				_ = close_handle.token.cancelled() => break,
				frame = source.next() => frame,
			};
			match frame {
				Some(Ok(WsMessage::Binary(bytes))) => decoder.push(&bytes),
				Some(Ok(WsMessage::Text(text))) => decoder.push(text.as_bytes()),
				Some(Ok(WsMessage::Close(_))) | None => break,
				Some(Ok(_)) => continue,
				Some(Err(e)) => {
					debug!(session = %session_id, conn = conn_id.0, error = %e, "server.read_error");
					break;
				}
			}

			self.touch_activity();
			loop {
				match decoder.next_message() {
					Ok(Some(msg)) => session.dispatch_from_client(conn_id, msg).await,
					Ok(None) => break,
					Err(e) => {
						warn!(session = %session_id, conn = conn_id.0, error = %e, "server.malformed_frame");
						close_handle.close(CLOSE_INTERNAL, "malformed frame");
						break;
					}
				}
			}
		}

		session.drop_connection(conn_id);
		writer.abort();
		info!(session = %session_id, conn = conn_id.0, "server.connection_closed");
	}

	async fn get_or_create_session(&self, session_id: &SessionId) -> moor_lsp::Result<Arc<Session>> {
		let _gate = self.inner.session_gate.lock().await;
		if let Some(session) = self.inner.sessions.lock().get(session_id).cloned() {
			return Ok(session);
		}

		let root = tempfile::Builder::new()
			.prefix("moor-session-")
			.tempdir()
			.map_err(moor_lsp::Error::Io)?;

		let proc_config = ProcessConfig {
			command: self.inner.config.server_command.clone(),
			args: self.inner.config.server_args.clone(),
			env: self.inner.config.server_env.clone(),
			cwd: root.path().to_path_buf(),
			stdout_log: self.inner.config.proc_stdout_log.clone(),
			stderr_log: self.inner.config.proc_stderr_log.clone(),
		};
		let proc = self.inner.manager.get_or_create(session_id, &proc_config).await?;

		let server = self.clone();
		let gone_session = session_id.clone();
		let session = Session::new(session_id.clone(), root, proc, move || {
			let server = server.clone();
			let session_id = gone_session;
			tokio::spawn(async move {
				server.close_session(&session_id, CLOSE_GOING_AWAY, "language server stream ended").await;
			});
		});

		self.inner.sessions.lock().insert(session_id.clone(), session.clone());
		info!(session = %session_id, "server.session_created");
		Ok(session)
	}

	/// Closes every socket in the session and releases its child.
	pub async fn close_session(&self, session_id: &SessionId, code: u16, reason: &str) {
		let session = self.inner.sessions.lock().remove(session_id);
		let Some(session) = session else {
			return;
		};
		info!(session = %session_id, code, reason, "server.session_closed");
		session.close_all(code, reason);
		self.inner.manager.release(session_id).await;
	}

	/// Stops accepting and closes every session with 1012.
	pub async fn shutdown(&self) {
		if !self.inner.accepting.swap(false, Ordering::Relaxed) {
			return;
		}
		self.inner.shutdown.cancel();
		let sessions: Vec<SessionId> = self.inner.sessions.lock().keys().cloned().collect();
		for session_id in sessions {
			self.close_session(&session_id, CLOSE_GOING_AWAY, "server shutting down").await;
		}
		self.inner.manager.release_all().await;
	}
}

fn session_from_query(query: Option<&str>) -> Option<SessionId> {
	query?
		.split('&')
		.find_map(|pair| pair.strip_prefix("session="))
		.filter(|value| !value.is_empty())
		.map(|value| SessionId(value.to_string()))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn session_query_parsing() {
		assert_eq!(session_from_query(Some("session=abc")), Some(SessionId("abc".into())));
		assert_eq!(session_from_query(Some("x=1&session=s-2&y=3")), Some(SessionId("s-2".into())));
		assert_eq!(session_from_query(Some("session=")), None);
		assert_eq!(session_from_query(Some("other=1")), None);
		assert_eq!(session_from_query(None), None);
	}
}
