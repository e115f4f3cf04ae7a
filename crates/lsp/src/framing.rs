//! `Content-Length` framing over byte streams, and the chunking bridge
//! that carries those frames over message-oriented WebSockets.
//!
//! Only the `Content-Length` header is required; anything else
//! (`Content-Type` in particular) is tolerated and ignored. Reassembly on
//! the WebSocket path relies solely on the length prefix, so frames may be
//! split at arbitrary byte boundaries.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::message::Message;

/// Upper bound for a single framed message. A frame claiming more than
/// this fails the stream rather than allocating.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Default cap for one WebSocket frame on the wire.
pub const DEFAULT_MAX_WS_MESSAGE_SIZE: usize = 500 * 1024;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Encodes a message as one contiguous header+body buffer.
pub fn encode_frame(msg: &Message) -> Result<Vec<u8>> {
	let body = serde_json::to_vec(msg)?;
	let mut buf = Vec::with_capacity(body.len() + 32);
	buf.extend_from_slice(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
	buf.extend_from_slice(&body);
	Ok(buf)
}

/// Splits a frame into `max_size`-bounded chunks.
///
/// Chunk boundaries are arbitrary; the reader reassembles purely from the
/// length prefix.
pub fn chunk_frame(frame: &[u8], max_size: usize) -> impl Iterator<Item = &[u8]> {
	let max_size = max_size.max(1);
	frame.chunks(max_size)
}

/// Writes one framed message and flushes.
pub async fn write_message<W>(output: &mut W, msg: &Message) -> Result<()>
where
	W: AsyncWrite + Unpin,
{
	let frame = encode_frame(msg)?;
	if frame.len() > MAX_FRAME_SIZE {
		return Err(Error::TransportMalformed(format!("outgoing message too large: {} bytes", frame.len())));
	}
	output.write_all(&frame).await?;
	output.flush().await?;
	Ok(())
}

/// Reads one framed message.
///
/// Returns `Ok(None)` on clean EOF at a frame boundary. EOF inside a
/// header or body, or a header without `Content-Length`, fails with
/// [`Error::TransportMalformed`].
pub async fn read_message<R>(input: &mut R) -> Result<Option<Message>>
where
	R: AsyncBufRead + Unpin,
{
	let mut content_length: Option<usize> = None;
	let mut line = Vec::new();
	let mut saw_any = false;

	loop {
		line.clear();
		let n = input.read_until(b'\n', &mut line).await?;
		if n == 0 {
			if saw_any {
				return Err(Error::TransportMalformed("eof inside frame header".into()));
			}
			return Ok(None);
		}
		saw_any = true;

		if line == b"\r\n" || line == b"\n" {
			break;
		}
		if let Some(len) = parse_content_length(&line)? {
			content_length = Some(len);
		}
	}

	let len = content_length.ok_or_else(|| Error::TransportMalformed("missing Content-Length header".into()))?;
	if len > MAX_FRAME_SIZE {
		return Err(Error::TransportMalformed(format!("frame too large: {len} bytes")));
	}

	let mut body = vec![0u8; len];
	input.read_exact(&mut body).await.map_err(|_| Error::TransportMalformed("eof inside frame body".into()))?;
	Ok(Some(serde_json::from_slice(&body)?))
}

fn parse_content_length(line: &[u8]) -> Result<Option<usize>> {
	let line = std::str::from_utf8(line).map_err(|_| Error::TransportMalformed("non-utf8 frame header".into()))?;
	let Some((name, value)) = line.split_once(':') else {
		return Err(Error::TransportMalformed(format!("malformed header line: {line:?}")));
	};
	if !name.trim().eq_ignore_ascii_case("content-length") {
		return Ok(None);
	}
	let len = value
		.trim()
		.parse::<usize>()
		.map_err(|_| Error::TransportMalformed(format!("bad Content-Length: {:?}", value.trim())))?;
	Ok(Some(len))
}

/// Incremental frame reassembly for message-oriented inputs.
///
/// Feed arbitrary byte slices with [`FrameDecoder::push`]; pull complete
/// bodies with [`FrameDecoder::next_frame`]. A malformed header poisons
/// the decoder; every later call returns the same error.
#[derive(Debug, Default)]
pub struct FrameDecoder {
	buf: Vec<u8>,
	// Body length once the current header has been consumed.
	pending_body: Option<usize>,
	poisoned: bool,
}

impl FrameDecoder {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn push(&mut self, bytes: &[u8]) {
		self.buf.extend_from_slice(bytes);
	}

	/// Pops the next complete frame body, if buffered.
	pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
		if self.poisoned {
			return Err(Error::TransportMalformed("decoder poisoned by earlier framing error".into()));
		}

		if self.pending_body.is_none() {
			let Some(header_end) = memchr::memmem::find(&self.buf, HEADER_TERMINATOR) else {
				return Ok(None);
			};
			match self.parse_header(header_end) {
				Ok(len) => {
					self.buf.drain(..header_end + HEADER_TERMINATOR.len());
					self.pending_body = Some(len);
				}
				Err(e) => {
					self.poisoned = true;
					return Err(e);
				}
			}
		}

		let len = self.pending_body.unwrap_or(0);
		if self.buf.len() < len {
			return Ok(None);
		}
		self.pending_body = None;
		let body = self.buf.drain(..len).collect();
		Ok(Some(body))
	}

	/// Pops and parses the next complete message, if buffered.
	pub fn next_message(&mut self) -> Result<Option<Message>> {
		match self.next_frame()? {
			Some(body) => Ok(Some(serde_json::from_slice(&body)?)),
			None => Ok(None),
		}
	}

	fn parse_header(&self, header_end: usize) -> Result<usize> {
		let mut content_length = None;
		for line in self.buf[..header_end].split(|&b| b == b'\n') {
			let line = line.strip_suffix(b"\r").unwrap_or(line);
			if line.is_empty() {
				continue;
			}
			if let Some(len) = parse_content_length(line)? {
				content_length = Some(len);
			}
		}
		let len = content_length.ok_or_else(|| Error::TransportMalformed("missing Content-Length header".into()))?;
		if len > MAX_FRAME_SIZE {
			return Err(Error::TransportMalformed(format!("frame too large: {len} bytes")));
		}
		Ok(len)
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;
	use serde_json::json;

	use super::*;
	use crate::message::{AnyNotification, AnyRequest, RequestId};

	fn sample() -> Message {
		Message::Request(AnyRequest {
			id: RequestId::Number(42),
			method: "textDocument/completion".into(),
			params: json!({"textDocument": {"uri": "file:///a.ts"}}),
		})
	}

	#[tokio::test(flavor = "current_thread")]
	async fn stream_round_trip() {
		let mut wire = Vec::new();
		write_message(&mut wire, &sample()).await.unwrap();

		let mut reader = std::io::Cursor::new(wire);
		let parsed = read_message(&mut reader).await.unwrap().unwrap();
		assert_eq!(parsed, sample());
		assert!(read_message(&mut reader).await.unwrap().is_none());
	}

	#[tokio::test(flavor = "current_thread")]
	async fn content_type_header_is_ignored() {
		let body = serde_json::to_vec(&sample()).unwrap();
		let mut wire = Vec::new();
		wire.extend_from_slice(
			format!(
				"Content-Length: {}\r\nContent-Type: application/vscode-jsonrpc; charset=utf-8\r\n\r\n",
				body.len()
			)
			.as_bytes(),
		);
		wire.extend_from_slice(&body);

		let mut reader = std::io::Cursor::new(wire);
		let parsed = read_message(&mut reader).await.unwrap().unwrap();
		assert_eq!(parsed, sample());
	}

	#[tokio::test(flavor = "current_thread")]
	async fn missing_content_length_fails() {
		let mut reader = std::io::Cursor::new(b"Content-Type: text/plain\r\n\r\n{}".to_vec());
		let err = read_message(&mut reader).await.unwrap_err();
		assert!(matches!(err, Error::TransportMalformed(_)));
	}

	#[tokio::test(flavor = "current_thread")]
	async fn truncated_body_fails() {
		let mut reader = std::io::Cursor::new(b"Content-Length: 100\r\n\r\n{\"jsonrpc\"".to_vec());
		let err = read_message(&mut reader).await.unwrap_err();
		assert!(matches!(err, Error::TransportMalformed(_)));
	}

	#[test]
	fn decoder_reassembles_across_arbitrary_chunks() {
		let frame = encode_frame(&sample()).unwrap();
		let mut decoder = FrameDecoder::new();
		// Push one byte at a time: the worst possible chunking.
		for byte in &frame {
			decoder.push(std::slice::from_ref(byte));
		}
		let msg = decoder.next_message().unwrap().unwrap();
		assert_eq!(msg, sample());
		assert!(decoder.next_message().unwrap().is_none());
	}

	#[test]
	fn decoder_handles_back_to_back_frames_in_one_chunk() {
		let mut wire = encode_frame(&sample()).unwrap();
		let second = Message::Notification(AnyNotification {
			method: "initialized".into(),
			params: json!({}),
		});
		wire.extend_from_slice(&encode_frame(&second).unwrap());

		let mut decoder = FrameDecoder::new();
		decoder.push(&wire);
		assert_eq!(decoder.next_message().unwrap().unwrap(), sample());
		assert_eq!(decoder.next_message().unwrap().unwrap(), second);
		assert!(decoder.next_message().unwrap().is_none());
	}

	#[test]
	fn decoder_poisons_on_malformed_header() {
		let mut decoder = FrameDecoder::new();
		decoder.push(b"not a header at all\r\n\r\n");
		assert!(decoder.next_frame().is_err());
		// Stays failed; no silent resync.
		assert!(decoder.next_frame().is_err());
	}

	#[test]
	fn chunking_respects_max_size_and_round_trips() {
		let frame = encode_frame(&sample()).unwrap();
		let chunks: Vec<&[u8]> = chunk_frame(&frame, 16).collect();
		assert!(chunks.iter().all(|c| c.len() <= 16));

		let mut decoder = FrameDecoder::new();
		for chunk in chunks {
			decoder.push(chunk);
		}
		assert_eq!(decoder.next_message().unwrap().unwrap(), sample());
	}

	#[test]
	fn oversized_frame_is_rejected() {
		let mut decoder = FrameDecoder::new();
		decoder.push(format!("Content-Length: {}\r\n\r\n", MAX_FRAME_SIZE + 1).as_bytes());
		assert!(matches!(decoder.next_frame(), Err(Error::TransportMalformed(_))));
	}
}
