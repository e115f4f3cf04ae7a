//! LSP wire protocol core shared by the editor-side client and the
//! server-side proxy: the JSON-RPC message model, `Content-Length`
//! stream framing (including the WebSocket chunking bridge), and the
//! position codec between LSP positions and document offsets.

mod error;
mod framing;
mod message;
pub mod methods;
mod position;

pub use error::{Error, Result};
pub use framing::{
	DEFAULT_MAX_WS_MESSAGE_SIZE, FrameDecoder, MAX_FRAME_SIZE, chunk_frame, encode_frame, read_message, write_message,
};
pub use message::{AnyNotification, AnyRequest, AnyResponse, ErrorCode, Message, RequestId, ResponseError};
pub use position::{
	OffsetEncoding, char_range_to_lsp_range, char_to_lsp_position, lsp_position_to_char, lsp_range_to_char_range,
};

/// Re-export so downstream crates name one `lsp_types` version.
pub use lsp_types;

/// Alias used wherever raw JSON crosses a seam.
pub type JsonValue = serde_json::Value;
