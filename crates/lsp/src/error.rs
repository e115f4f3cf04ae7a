//! Shared error taxonomy for both halves of the bridge.

use thiserror::Error;

use crate::message::ResponseError;

/// Errors surfaced by transports, the sync engine, and the proxy.
#[derive(Debug, Error)]
pub enum Error {
	/// The underlying transport is gone; callers may re-issue after reconnect.
	#[error("transport closed")]
	TransportClosed,
	/// A request did not complete within its deadline.
	#[error("transport timeout")]
	TransportTimeout,
	/// The byte stream could not be framed (bad or missing `Content-Length`).
	#[error("malformed frame: {0}")]
	TransportMalformed(String),
	/// The peer spoke something other than JSON-RPC 2.0.
	#[error("protocol version mismatch: expected \"2.0\", got {0:?}")]
	ProtocolVersionMismatch(String),
	/// A feature was requested of a server that does not advertise it.
	/// Reported to the user as a dialog, not propagated as a failure.
	#[error("server does not support {0}")]
	CapabilityMissing(&'static str),
	/// `do_with_lock` exceeded its deadline; the lock was force-released.
	#[error("document lock timed out")]
	LockTimeout,
	/// The language server child exited unexpectedly.
	#[error("language server crashed: {0}")]
	ProcessCrashed(String),
	/// The session's process was evicted to make room in the pool.
	#[error("session evicted")]
	SessionEvicted,
	/// The per-session connection cap was reached.
	#[error("connection quota exceeded")]
	ConnectionQuotaExceeded,
	/// The request was cancelled before a response arrived.
	#[error("request cancelled")]
	RequestCancelled,
	/// The server answered with a JSON-RPC error object.
	#[error("server error {}: {}", .0.code, .0.message)]
	Response(ResponseError),
	/// Catch-all for protocol-shape violations.
	#[error("protocol error: {0}")]
	Protocol(String),
	#[error(transparent)]
	Io(#[from] std::io::Error),
	#[error(transparent)]
	Json(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
	/// Whether a failed send is worth retrying on the next edit.
	pub fn is_retryable(&self) -> bool {
		matches!(self, Self::TransportClosed | Self::TransportTimeout | Self::Io(_))
	}
}
