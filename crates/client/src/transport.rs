//! Pluggable message transport under [`LsClient`](crate::client::LsClient).
//!
//! A transport is a framed pipe: whole [`Message`]s in, whole messages
//! out. Request/response correlation lives in the client, so a transport
//! never inspects ids.

use async_trait::async_trait;
use moor_lsp::{Message, Result};
use tokio::sync::mpsc;

/// Events a transport reports to its consumer.
#[derive(Debug, Clone)]
pub enum TransportEvent {
	/// The underlying connection is open (or re-opened).
	Connected,
	/// The underlying connection dropped. Buffered-send transports keep
	/// accepting messages while disconnected.
	Disconnected,
	/// A complete inbound message.
	Message(Message),
}

#[async_trait]
pub trait LspTransport: Send + Sync {
	/// Takes the inbound event stream. May be called once per transport;
	/// later calls fail.
	fn subscribe_events(&self) -> Result<mpsc::UnboundedReceiver<TransportEvent>>;

	/// Sends one message. Implementations may buffer while disconnected.
	async fn send(&self, msg: Message) -> Result<()>;

	/// Closes the transport. Buffered messages are dropped.
	async fn close(&self) -> Result<()>;
}
