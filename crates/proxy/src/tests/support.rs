//! In-process fake language server and launcher for proxy tests.

use std::pin::Pin;
use std::sync::Arc;

use moor_lsp::{AnyResponse, JsonValue, Message, Result, read_message, write_message};
use parking_lot::Mutex;
use serde_json::json;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use crate::SessionId;
use crate::manager::ProcLauncher;
use crate::proc::{ExitCallback, ManagedProc, ProcessConfig};

/// Handle to a running [`spawn_fake_ls`] instance.
#[derive(Clone)]
pub(crate) struct FakeLsHandle {
	/// Everything the fake server received, in arrival order.
	pub received: Arc<Mutex<Vec<Message>>>,
	/// Push server-initiated messages toward the proxy.
	pub push_tx: mpsc::UnboundedSender<Message>,
}

impl FakeLsHandle {
	pub(crate) fn received_methods(&self) -> Vec<String> {
		self.received.lock().iter().filter_map(|m| m.method().map(str::to_string)).collect()
	}

	pub(crate) fn requests_for(&self, method: &str) -> Vec<moor_lsp::AnyRequest> {
		self.received
			.lock()
			.iter()
			.filter_map(|m| match m {
				Message::Request(req) if req.method == method => Some(req.clone()),
				_ => None,
			})
			.collect()
	}

	pub(crate) fn notifications_for(&self, method: &str) -> Vec<moor_lsp::AnyNotification> {
		self.received
			.lock()
			.iter()
			.filter_map(|m| match m {
				Message::Notification(notif) if notif.method == method => Some(notif.clone()),
				_ => None,
			})
			.collect()
	}
}

/// Starts a fake language server over a duplex pipe and returns the
/// proxy-side [`ManagedProc`] plus a control handle.
///
/// Behavior: `initialize` answers with fixed capabilities and a
/// `serverInfo.name` of `fake-ls`; every other request echoes
/// `{"echo": <method>, "params": <params>}`.
pub(crate) fn spawn_fake_ls() -> (ManagedProc, FakeLsHandle) {
	let (proxy_end, server_end) = tokio::io::duplex(256 * 1024);
	let (proxy_read, proxy_write) = tokio::io::split(proxy_end);
	let (server_read, mut server_write) = tokio::io::split(server_end);

	let received = Arc::new(Mutex::new(Vec::new()));
	let (push_tx, mut push_rx) = mpsc::unbounded_channel::<Message>();

	let task_received = received.clone();
	tokio::spawn(async move {
		let mut reader = BufReader::new(server_read);
		loop {
			tokio::select! {
				pushed = push_rx.recv() => {
					let Some(msg) = pushed else { break };
					if write_message(&mut server_write, &msg).await.is_err() {
						break;
					}
				}
				inbound = read_message(&mut reader) => {
					let msg = match inbound {
						Ok(Some(msg)) => msg,
						Ok(None) | Err(_) => break,
					};
					task_received.lock().push(msg.clone());
					if let Message::Request(req) = msg {
						let result = fake_response(&req.method, &req.params);
						let resp = Message::Response(AnyResponse::new_ok(req.id, result));
						if write_message(&mut server_write, &resp).await.is_err() {
							break;
						}
					}
				}
			}
		}
		let _ = server_write.shutdown().await;
	});

	let proc = ManagedProc::from_io(Box::new(proxy_write), Box::new(proxy_read));
	(proc, FakeLsHandle { received, push_tx })
}

fn fake_response(method: &str, params: &JsonValue) -> JsonValue {
	match method {
		"initialize" => json!({
			"capabilities": {
				"textDocumentSync": {"openClose": true, "change": 2},
				"hoverProvider": true,
				"renameProvider": {"prepareProvider": true},
			},
			"serverInfo": {"name": "fake-ls"},
		}),
		_ => json!({"echo": method, "params": params}),
	}
}

/// Launcher that hands out fake-server procs and records launch order.
#[derive(Clone, Default)]
pub(crate) struct TestLauncher {
	pub launches: Arc<Mutex<Vec<SessionId>>>,
	pub handles: Arc<Mutex<Vec<(SessionId, FakeLsHandle)>>>,
	pub exit_callbacks: Arc<Mutex<Vec<(SessionId, ExitCallback)>>>,
}

impl ProcLauncher for TestLauncher {
	fn launch(
		&self,
		session: &SessionId,
		_config: &ProcessConfig,
		on_exit: ExitCallback,
	) -> Pin<Box<dyn Future<Output = Result<ManagedProc>> + Send>> {
		let launches = self.launches.clone();
		let handles = self.handles.clone();
		let exits = self.exit_callbacks.clone();
		let session = session.clone();
		Box::pin(async move {
			let (proc, handle) = spawn_fake_ls();
			launches.lock().push(session.clone());
			handles.lock().push((session.clone(), handle));
			exits.lock().push((session, on_exit));
			Ok(proc)
		})
	}
}

/// Receives with a deadline; fake-server tests run on real time.
pub(crate) async fn recv_within(rx: &mut mpsc::UnboundedReceiver<Message>, what: &str) -> Message {
	tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
		.await
		.unwrap_or_else(|_| panic!("timed out waiting for {what}"))
		.unwrap_or_else(|| panic!("channel closed waiting for {what}"))
}

/// Polls until `check` passes or the deadline hits.
pub(crate) async fn wait_for(what: &str, mut check: impl FnMut() -> bool) {
	for _ in 0..200 {
		if check() {
			return;
		}
		tokio::time::sleep(std::time::Duration::from_millis(10)).await;
	}
	panic!("timed out waiting for {what}");
}
