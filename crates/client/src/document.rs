//! Per-view document plugin.
//!
//! One [`DocumentPlugin`] exists per editor view; it owns the mirror of
//! the host's buffer (a rope plus version counter), the sync engine, and
//! per-feature state. Feature handlers never touch the host directly;
//! everything renderable flows out as [`UiEvent`]s on a channel the host
//! consumes. The client holds only weak references to attached plugins,
//! and `destroy` drops the subscriptions, so tearing down a view breaks
//! the client↔plugin cycle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use lsp_types::{CodeActionOrCommand, SignatureHelp, Uri};
use moor_lsp::JsonValue;
use parking_lot::{Mutex, RwLock};
use ropey::Rope;
use tokio::sync::mpsc;
use tracing::debug;

use crate::changes::{DocumentChange, apply_changes};
use crate::client::{AttachedPlugin, LsClient, Subscription};
use crate::completion::CompletionConfig;
use crate::diagnostics::{DiagnosticItem, DiagnosticsState, SeverityMap};
use crate::inlay_hints::{HintWidget, InlayConfig, InlayState};
use crate::menu::{MenuConfig, MenuEntry};
use crate::references::ReferenceLocation;
use crate::signature_help::SignatureState;
use crate::sync::DocumentSync;
use crate::workspace_edit::{HostEdit, ResourceOp};

/// Per-view configuration supplied by the host at attach time.
#[derive(Debug, Clone)]
pub struct PluginConfig {
	pub uri: Uri,
	pub language_id: String,
	/// Emit `didClose` on teardown.
	pub send_did_close: bool,
	/// Jump straight to a single reference result instead of a panel.
	pub go_to_if_one_option: bool,
	pub completion: CompletionConfig,
	pub severity_map: SeverityMap,
	pub inlay: InlayConfig,
	pub menu: MenuConfig,
}

impl PluginConfig {
	pub fn new(uri: Uri, language_id: impl Into<String>) -> Self {
		Self {
			uri,
			language_id: language_id.into(),
			send_did_close: true,
			go_to_if_one_option: true,
			completion: CompletionConfig::default(),
			severity_map: SeverityMap::default(),
			inlay: InlayConfig::default(),
			menu: MenuConfig::default(),
		}
	}
}

/// Everything the host may need to render, in document char offsets.
#[derive(Debug)]
pub enum UiEvent {
	/// Immediate or action-enriched diagnostic set for the current doc.
	Diagnostics { version: i32, items: Vec<DiagnosticItem> },
	/// Completion results ready for the menu.
	Completions { replace_start: usize, items: Vec<lsp_types::CompletionItem> },
	/// Resolved documentation for a completion item; `None` when the
	/// server returned nothing worth showing.
	CompletionDocumentation { label: String, documentation: Option<String> },
	/// Apply these edits to the buffer as one transaction. Ranges are
	/// pre-state char offsets sorted descending by start.
	ApplyEdits { edits: Vec<HostEdit> },
	/// Insert an editor-syntax snippet at `at`, replacing `replace`.
	InsertSnippet { at: usize, replace: std::ops::Range<usize>, snippet: String },
	/// Move the caret.
	SetCursor { pos: usize },
	/// Scroll the selection to a location in this document. `origin`
	/// marks the transaction so listeners can tell navigation apart.
	GotoLocal { range: std::ops::Range<usize>, origin: &'static str },
	/// A single result pointing outside this document.
	ExternalReference { location: ReferenceLocation },
	/// Several results; host renders a click-to-jump panel (Escape closes).
	ShowReferences { locations: Vec<ReferenceLocation> },
	/// Workspace edit touching a different document; routed, not applied.
	ForeignEdit { uri: Uri, edits: Vec<lsp_types::TextEdit> },
	/// File create/rename/delete surfaced from a workspace edit.
	ResourceOp { op: ResourceOp },
	/// Signature tooltip at `pos`.
	SignatureHelp { pos: usize, help: SignatureHelp },
	SignatureHelpClear,
	/// Hover contents at `pos`, rendered by the host's renderer.
	Hover { pos: usize, contents: lsp_types::HoverContents },
	/// `window/showMessage` passthrough; host renders with a dismiss.
	ShowMessage { typ: lsp_types::MessageType, message: String },
	/// Context menu entries valid at `pos`.
	ContextMenu { pos: usize, entries: Vec<MenuEntry> },
	/// Current inlay hint widgets for the viewport.
	InlayHints { hints: Vec<HintWidget> },
	/// Short user-facing notices ("no completions", "cannot rename").
	Notice { message: String },
}

pub(crate) struct PluginShared {
	pub(crate) client: LsClient,
	pub(crate) config: PluginConfig,
	pub(crate) doc: RwLock<Rope>,
	pub(crate) sync: DocumentSync,
	pub(crate) ui_tx: mpsc::UnboundedSender<UiEvent>,
	pub(crate) diagnostics: DiagnosticsState,
	pub(crate) signature: SignatureState,
	pub(crate) inlay: InlayState,
	subscriptions: Mutex<Vec<Subscription>>,
	destroyed: AtomicBool,
}

impl PluginShared {
	pub(crate) fn emit(&self, event: UiEvent) {
		let _ = self.ui_tx.send(event);
	}

	pub(crate) fn snapshot(&self) -> Rope {
		self.doc.read().clone()
	}
}

impl AttachedPlugin for PluginShared {
	fn reinitialize(&self) {
		if self.destroyed.load(Ordering::Relaxed) {
			return;
		}
		let sync = self.sync.clone();
		tokio::spawn(async move {
			if let Err(e) = sync.send_did_open().await {
				debug!(error = %e, "plugin.reopen_failed");
			}
		});
	}
}

/// Host-facing handle for one editor view.
#[derive(Clone)]
pub struct DocumentPlugin {
	pub(crate) shared: Arc<PluginShared>,
}

impl DocumentPlugin {
	/// Attaches a new plugin to `client` with `text` as the initial
	/// buffer contents. Returns the handle and the UI event stream.
	pub fn attach(client: LsClient, config: PluginConfig, text: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<UiEvent>) {
		let (ui_tx, ui_rx) = mpsc::unbounded_channel();
		let rope = Rope::from(text.into().as_str());
		let sync = DocumentSync::new(client.clone(), config.uri.clone(), config.language_id.clone(), rope.clone());

		let shared = Arc::new(PluginShared {
			client: client.clone(),
			config,
			doc: RwLock::new(rope),
			sync,
			ui_tx,
			diagnostics: DiagnosticsState::default(),
			signature: SignatureState::default(),
			inlay: InlayState::default(),
			subscriptions: Mutex::new(Vec::new()),
			destroyed: AtomicBool::new(false),
		});

		let notif_sub = {
			let weak = Arc::downgrade(&shared);
			client.on_notification(move |notif| {
				let Some(shared) = weak.upgrade() else {
					return;
				};
				let plugin = DocumentPlugin { shared };
				plugin.dispatch_notification(&notif.method, &notif.params);
			})
		};
		shared.subscriptions.lock().push(notif_sub);

		client.attach_plugin(Arc::downgrade(&shared) as std::sync::Weak<dyn AttachedPlugin>);

		let plugin = Self { shared: shared.clone() };
		if client.is_ready() {
			let sync = shared.sync.clone();
			tokio::spawn(async move {
				if let Err(e) = sync.send_did_open().await {
					debug!(error = %e, "plugin.open_failed");
				}
			});
		}
		(plugin, ui_rx)
	}

	fn dispatch_notification(&self, method: &str, params: &JsonValue) {
		match method {
			"textDocument/publishDiagnostics" => {
				if let Ok(params) = serde_json::from_value::<lsp_types::PublishDiagnosticsParams>(params.clone()) {
					self.on_publish_diagnostics(params);
				}
			}
			"window/showMessage" => {
				if let Ok(params) = serde_json::from_value::<lsp_types::ShowMessageParams>(params.clone()) {
					self.shared.emit(UiEvent::ShowMessage {
						typ: params.typ,
						message: params.message,
					});
				}
			}
			_ => {}
		}
	}

	pub fn uri(&self) -> Uri {
		self.shared.config.uri.clone()
	}

	pub fn client(&self) -> &LsClient {
		&self.shared.client
	}

	pub fn sync(&self) -> &DocumentSync {
		&self.shared.sync
	}

	/// Current mirror text.
	pub fn text(&self) -> Rope {
		self.shared.snapshot()
	}

	/// Version of the last `didOpen`/`didChange` the server saw.
	pub fn version(&self) -> i32 {
		self.shared.sync.version()
	}

	/// Host callback for every buffer edit. `changes` are pre-state char
	/// ranges, applied highest-first.
	pub fn on_view_update(&self, changes: Vec<DocumentChange>) {
		if changes.is_empty() {
			return;
		}
		{
			let mut doc = self.shared.doc.write();
			let pre = doc.clone();
			let next = apply_changes(&pre, &changes);
			*doc = next.clone();
			self.shared.sync.record_edit(&pre, &changes, next);
		}

		self.shared.diagnostics.on_edit();
		self.on_edit_for_inlay_hints();
	}

	/// Sends `didOpen` once the host considers the view live.
	pub async fn open(&self) -> moor_lsp::Result<()> {
		self.shared.sync.send_did_open().await
	}

	/// Applies a code action: resolves it if the edit is missing and the
	/// server supports resolve, applies its workspace edit, then runs its
	/// command.
	pub async fn apply_code_action(&self, action: CodeActionOrCommand) {
		crate::diagnostics::apply_code_action(self, action).await;
	}

	/// Detaches from the client and optionally emits `didClose`.
	pub fn destroy(&self) {
		if self.shared.destroyed.swap(true, Ordering::Relaxed) {
			return;
		}
		self.shared.subscriptions.lock().clear();
		self.shared.diagnostics.cancel();
		self.shared.signature.cancel();
		self.shared.inlay.cancel();
		if self.shared.config.send_did_close {
			let sync = self.shared.sync.clone();
			tokio::spawn(async move {
				if let Err(e) = sync.send_did_close().await {
					debug!(error = %e, "plugin.close_failed");
				}
			});
		}
		self.shared.client.prune_plugins();
	}
}
