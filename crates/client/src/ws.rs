//! WebSocket transport: LSP frames over a message-oriented socket.
//!
//! Outgoing messages become one contiguous `Content-Length` buffer split
//! into size-capped WebSocket frames; inbound frames feed a
//! [`FrameDecoder`] so chunk boundaries never matter. Messages sent while
//! disconnected are queued and flushed in order on (re)connect; queued
//! requests may carry a deadline after which they are rejected with a
//! synthesized timeout response instead of being replayed.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use moor_lsp::{
	DEFAULT_MAX_WS_MESSAGE_SIZE, Error, ErrorCode, FrameDecoder, Message, RequestId, Result, chunk_frame, encode_frame,
};
use moor_lsp::{AnyResponse, ResponseError};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::transport::{LspTransport, TransportEvent};

/// Connection settings for [`WsTransport`].
#[derive(Debug, Clone)]
pub struct WsTransportConfig {
	/// Endpoint including the `session` query parameter.
	pub url: String,
	/// Per-frame byte cap on the wire.
	pub max_message_size: usize,
	/// Deadline for requests queued while disconnected. `None` replays
	/// them however late the socket opens.
	pub buffered_request_timeout: Option<Duration>,
	/// Delay between reconnect attempts.
	pub reconnect_backoff: Duration,
}

impl WsTransportConfig {
	pub fn new(url: impl Into<String>) -> Self {
		Self {
			url: url.into(),
			max_message_size: DEFAULT_MAX_WS_MESSAGE_SIZE,
			buffered_request_timeout: Some(Duration::from_secs(30)),
			reconnect_backoff: Duration::from_millis(500),
		}
	}
}

struct QueuedSend {
	frame: Vec<u8>,
	/// Set for requests so expired entries can be rejected on flush.
	request_id: Option<RequestId>,
	queued_at: Instant,
}

enum WriteState {
	/// Socket open; frames go straight to the writer task.
	Connected(mpsc::UnboundedSender<Vec<u8>>),
	/// Socket down; frames wait here in send order.
	Buffering(VecDeque<QueuedSend>),
}

pub struct WsTransport {
	config: WsTransportConfig,
	write: Mutex<WriteState>,
	events_tx: mpsc::UnboundedSender<TransportEvent>,
	events_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
	shutdown: CancellationToken,
}

impl WsTransport {
	/// Creates the transport and starts its connection loop.
	pub fn connect(config: WsTransportConfig) -> std::sync::Arc<Self> {
		let (events_tx, events_rx) = mpsc::unbounded_channel();
		let transport = std::sync::Arc::new(Self {
			config,
			write: Mutex::new(WriteState::Buffering(VecDeque::new())),
			events_tx,
			events_rx: Mutex::new(Some(events_rx)),
			shutdown: CancellationToken::new(),
		});

		let task = transport.clone();
		tokio::spawn(async move { task.run().await });
		transport
	}

	async fn run(&self) {
		loop {
			if self.shutdown.is_cancelled() {
				return;
			}

			let stream = tokio::select! {
				_ = self.shutdown.cancelled() => return,
				conn = connect_async(&self.config.url) => match conn {
					Ok((stream, _)) => stream,
					Err(e) => {
						debug!(url = %self.config.url, error = %e, "ws.connect_failed");
						tokio::time::sleep(self.config.reconnect_backoff).await;
						continue;
					}
				},
			};

			let (mut sink, mut source) = stream.split();
			let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Vec<u8>>();

			self.flush_buffered(&out_tx);
			*self.write.lock() = WriteState::Connected(out_tx);
			let _ = self.events_tx.send(TransportEvent::Connected);

			let max_size = self.config.max_message_size;
			let writer = tokio::spawn(async move {
				while let Some(frame) = out_rx.recv().await {
					for chunk in chunk_frame(&frame, max_size) {
						if sink.send(WsMessage::Binary(chunk.to_vec().into())).await.is_err() {
							return;
						}
					}
				}
			});

			let mut decoder = FrameDecoder::new();
			loop {
				let frame = tokio::select! {
					_ = self.shutdown.cancelled() => {
						writer.abort();
						return;
					}
					frame = source.next() => frame,
				};
				match frame {
					Some(Ok(WsMessage::Binary(bytes))) => decoder.push(&bytes),
					Some(Ok(WsMessage::Text(text))) => decoder.push(text.as_bytes()),
					Some(Ok(WsMessage::Close(_))) | None => break,
					Some(Ok(_)) => continue,
					Some(Err(e)) => {
						debug!(error = %e, "ws.read_failed");
						break;
					}
				}

				loop {
					match decoder.next_message() {
						Ok(Some(msg)) => {
							let _ = self.events_tx.send(TransportEvent::Message(msg));
						}
						Ok(None) => break,
						Err(e) => {
							warn!(error = %e, "ws.malformed_frame");
							writer.abort();
							self.disconnect();
							return;
						}
					}
				}
			}

			writer.abort();
			self.disconnect();
			tokio::time::sleep(self.config.reconnect_backoff).await;
		}
	}

	fn disconnect(&self) {
		*self.write.lock() = WriteState::Buffering(VecDeque::new());
		let _ = self.events_tx.send(TransportEvent::Disconnected);
	}

	/// Replays queued frames in send order, rejecting requests whose
	/// deadline expired while the socket was down.
	fn flush_buffered(&self, out_tx: &mpsc::UnboundedSender<Vec<u8>>) {
		let queued = {
			let mut write = self.write.lock();
			match &mut *write {
				WriteState::Buffering(queue) => std::mem::take(queue),
				WriteState::Connected(_) => VecDeque::new(),
			}
		};

		let now = Instant::now();
		for entry in queued {
			let expired = self
				.config
				.buffered_request_timeout
				.is_some_and(|t| entry.request_id.is_some() && now.duration_since(entry.queued_at) > t);
			if expired {
				let id = entry.request_id.clone().unwrap_or(RequestId::Number(0));
				debug!(%id, "ws.buffered_request_expired");
				let _ = self.events_tx.send(TransportEvent::Message(Message::Response(AnyResponse::new_err(
					id,
					ResponseError::new(ErrorCode::REQUEST_FAILED, "request expired while disconnected"),
				))));
				continue;
			}
			let _ = out_tx.send(entry.frame);
		}
	}
}

#[async_trait]
impl LspTransport for WsTransport {
	fn subscribe_events(&self) -> Result<mpsc::UnboundedReceiver<TransportEvent>> {
		self.events_rx.lock().take().ok_or_else(|| Error::Protocol("transport events already subscribed".into()))
	}

	async fn send(&self, msg: Message) -> Result<()> {
		let request_id = match &msg {
			Message::Request(req) => Some(req.id.clone()),
			_ => None,
		};
		let frame = encode_frame(&msg)?;

		let mut write = self.write.lock();
		match &mut *write {
			WriteState::Connected(out_tx) => {
				if out_tx.send(frame).is_err() {
					return Err(Error::TransportClosed);
				}
			}
			WriteState::Buffering(queue) => {
				queue.push_back(QueuedSend {
					frame,
					request_id,
					queued_at: Instant::now(),
				});
			}
		}
		Ok(())
	}

	async fn close(&self) -> Result<()> {
		self.shutdown.cancel();
		*self.write.lock() = WriteState::Buffering(VecDeque::new());
		Ok(())
	}
}
