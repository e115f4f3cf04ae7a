//! Editor-side LSP client core.
//!
//! The pieces an editor host wires together: a pluggable [`transport`]
//! (usually the WebSocket one in [`ws`]), the JSON-RPC [`client`], the
//! [`sync`] engine that keeps a server's view of a live-editing buffer
//! consistent, and the per-feature handlers that turn server output into
//! [`UiEvent`]s for the host to render.

pub mod changes;
pub mod client;
pub mod completion;
pub mod diagnostics;
pub mod document;
pub mod hover;
pub mod inlay_hints;
pub mod menu;
pub mod references;
pub mod rename;
pub mod signature_help;
pub mod snippet;
pub mod sync;
pub mod transport;
pub mod window;
pub mod workspace_edit;
pub mod ws;

pub use client::{LsClient, Subscription, default_client_capabilities};
pub use document::{DocumentPlugin, PluginConfig, UiEvent};
pub use moor_lsp::{Error, Result};
pub use sync::DocumentSync;
pub use transport::{LspTransport, TransportEvent};

#[cfg(test)]
mod tests;
