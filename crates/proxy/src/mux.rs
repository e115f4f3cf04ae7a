//! Per-session message mux.
//!
//! Many WebSocket connections share one child process. Inbound requests
//! get their ids replaced with fresh UUIDs so the child never sees two
//! connections collide; the per-connection reverse map routes each
//! response back to exactly the connection that asked. Notifications and
//! server-initiated requests fan out to every connection; responses
//! whose id no connection owns belong to a dead connection and are
//! dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use moor_lsp::{Message, RequestId};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::trace;
use uuid::Uuid;

/// Identity of one WebSocket connection within a session. Monotonic, so
/// the lowest id is the oldest connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

struct Connection {
	outbound: mpsc::UnboundedSender<Message>,
	/// wire UUID → the id the client actually sent.
	id_map: HashMap<String, RequestId>,
}

#[derive(Default)]
pub struct SessionMux {
	connections: Mutex<HashMap<ConnectionId, Connection>>,
	next_conn: AtomicU64,
}

impl SessionMux {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers a connection; the receiver is its private outbound
	/// stream.
	pub fn add_connection(&self) -> (ConnectionId, mpsc::UnboundedReceiver<Message>) {
		let id = ConnectionId(self.next_conn.fetch_add(1, Ordering::Relaxed));
		let (tx, rx) = mpsc::unbounded_channel();
		self.connections.lock().insert(
			id,
			Connection {
				outbound: tx,
				id_map: HashMap::new(),
			},
		);
		(id, rx)
	}

	/// Drops a connection and its id map. In-flight responses for it
	/// will be dropped as unowned.
	pub fn remove_connection(&self, id: ConnectionId) {
		self.connections.lock().remove(&id);
	}

	pub fn connection_count(&self) -> usize {
		self.connections.lock().len()
	}

	pub fn oldest_connection(&self) -> Option<ConnectionId> {
		self.connections.lock().keys().min().copied()
	}

	/// Client → process: replace request ids with fresh UUIDs and
	/// remember the originals.
	pub fn rewrite_inbound(&self, conn: ConnectionId, msg: Message) -> Message {
		match msg {
			Message::Request(mut req) => {
				let wire_id = Uuid::new_v4().to_string();
				if let Some(connection) = self.connections.lock().get_mut(&conn) {
					connection.id_map.insert(wire_id.clone(), req.id.clone());
				}
				req.id = RequestId::String(wire_id);
				Message::Request(req)
			}
			other => other,
		}
	}

	/// Process → client routing. Responses go to the one connection that
	/// issued the request, with the original id restored; everything
	/// else is broadcast.
	pub fn route_outbound(&self, msg: Message) {
		match msg {
			Message::Response(mut resp) => {
				let RequestId::String(wire_id) = resp.id.clone() else {
					trace!(id = %resp.id, "mux.drop_non_wire_response");
					return;
				};
				let mut connections = self.connections.lock();
				let owner = connections.iter_mut().find_map(|(_, connection)| {
					connection.id_map.remove(&wire_id).map(|original| (connection.outbound.clone(), original))
				});
				drop(connections);
				match owner {
					Some((outbound, original)) => {
						resp.id = original;
						let _ = outbound.send(Message::Response(resp));
					}
					None => {
						// Belongs to a connection that already went away.
						trace!(wire_id, "mux.drop_unowned_response");
					}
				}
			}
			other => self.broadcast(other),
		}
	}

	/// Sends to every live connection.
	pub fn broadcast(&self, msg: Message) {
		let connections = self.connections.lock();
		for connection in connections.values() {
			let _ = connection.outbound.send(msg.clone());
		}
	}

	/// Ends every connection's stream; used when the child's stdout
	/// closes or the session shuts down.
	pub fn close_all(&self) {
		self.connections.lock().clear();
	}
}

#[cfg(test)]
mod tests {
	use moor_lsp::{AnyNotification, AnyRequest, AnyResponse};
	use pretty_assertions::assert_eq;
	use serde_json::json;

	use super::*;

	fn request(id: i64) -> Message {
		Message::Request(AnyRequest {
			id: RequestId::Number(id),
			method: "textDocument/hover".into(),
			params: json!({}),
		})
	}

	#[tokio::test(flavor = "current_thread")]
	async fn same_numeric_id_from_two_connections_stays_private() {
		let mux = SessionMux::new();
		let (conn_a, mut rx_a) = mux.add_connection();
		let (conn_b, mut rx_b) = mux.add_connection();

		// Both connections pick request id 1.
		let wire_a = mux.rewrite_inbound(conn_a, request(1));
		let wire_b = mux.rewrite_inbound(conn_b, request(1));
		let (Message::Request(wire_a), Message::Request(wire_b)) = (wire_a, wire_b) else {
			panic!("rewritten messages must stay requests");
		};
		assert_ne!(wire_a.id, wire_b.id, "the child must see two distinct ids");

		// The child answers B first, then A.
		mux.route_outbound(Message::Response(AnyResponse::new_ok(wire_b.id, json!({"for": "b"}))));
		mux.route_outbound(Message::Response(AnyResponse::new_ok(wire_a.id, json!({"for": "a"}))));

		let Message::Response(resp_a) = rx_a.recv().await.unwrap() else {
			panic!("expected response");
		};
		assert_eq!(resp_a.id, RequestId::Number(1));
		assert_eq!(resp_a.result, Some(json!({"for": "a"})));

		let Message::Response(resp_b) = rx_b.recv().await.unwrap() else {
			panic!("expected response");
		};
		assert_eq!(resp_b.id, RequestId::Number(1));
		assert_eq!(resp_b.result, Some(json!({"for": "b"})));

		// Nothing crossed over.
		assert!(rx_a.try_recv().is_err());
		assert!(rx_b.try_recv().is_err());
	}

	#[tokio::test(flavor = "current_thread")]
	async fn unowned_response_is_dropped() {
		let mux = SessionMux::new();
		let (conn, mut rx) = mux.add_connection();

		let Message::Request(wire) = mux.rewrite_inbound(conn, request(7)) else {
			panic!("expected request");
		};
		mux.remove_connection(conn);
		mux.route_outbound(Message::Response(AnyResponse::new_ok(wire.id, json!(null))));

		assert!(rx.try_recv().is_err());
	}

	#[tokio::test(flavor = "current_thread")]
	async fn notifications_broadcast_to_all_connections() {
		let mux = SessionMux::new();
		let (_, mut rx_a) = mux.add_connection();
		let (_, mut rx_b) = mux.add_connection();

		mux.route_outbound(Message::Notification(AnyNotification {
			method: "textDocument/publishDiagnostics".into(),
			params: json!({"uri": "file:///a.ts", "diagnostics": []}),
		}));

		assert!(matches!(rx_a.recv().await, Some(Message::Notification(_))));
		assert!(matches!(rx_b.recv().await, Some(Message::Notification(_))));
	}

	#[tokio::test(flavor = "current_thread")]
	async fn response_id_is_consumed_once() {
		let mux = SessionMux::new();
		let (conn, mut rx) = mux.add_connection();

		let Message::Request(wire) = mux.rewrite_inbound(conn, request(3)) else {
			panic!("expected request");
		};
		mux.route_outbound(Message::Response(AnyResponse::new_ok(wire.id.clone(), json!(1))));
		// A duplicate response for the same wire id has no owner left.
		mux.route_outbound(Message::Response(AnyResponse::new_ok(wire.id, json!(2))));

		assert!(rx.recv().await.is_some());
		assert!(rx.try_recv().is_err());
	}
}
