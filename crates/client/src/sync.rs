//! Single-flight document synchronization.
//!
//! One worker per document drains a latest-only wake signal, so a burst
//! of edits collapses into a single `didChange` carrying the final text.
//! A send captures the edit generation it covers; by the time a stale
//! wake fires the generation check makes it a no-op. `do_with_lock`
//! pauses the worker around a request round-trip so the server answers
//! against a text it has actually seen.

use std::sync::Arc;
use std::time::Duration;

use lsp_types::{
	DidChangeTextDocumentParams, DidCloseTextDocumentParams, DidOpenTextDocumentParams, TextDocumentContentChangeEvent,
	TextDocumentIdentifier, TextDocumentItem, Uri, VersionedTextDocumentIdentifier,
};
use moor_lsp::{Error, JsonValue, Result};
use parking_lot::Mutex;
use ropey::Rope;
use tokio::sync::{Notify, watch};
use tracing::{debug, trace, warn};

use crate::changes::{DocumentChange, to_content_changes};
use crate::client::LsClient;

/// Default deadline for [`DocumentSync::do_with_lock`].
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

struct SyncState {
	text: Rope,
	last_sent: Rope,
	version: i32,
	edit_generation: u64,
	synced_generation: u64,
	pending_changes: Vec<TextDocumentContentChangeEvent>,
	needs_full: bool,
	opened: bool,
	paused: bool,
	in_flight: bool,
}

struct SyncShared {
	client: LsClient,
	uri: Uri,
	language_id: String,
	state: Mutex<SyncState>,
	wake_tx: watch::Sender<u64>,
	settled: Notify,
	lock_gate: tokio::sync::Mutex<()>,
}

/// Handle to one document's sync engine. Cheap to clone.
#[derive(Clone)]
pub struct DocumentSync {
	shared: Arc<SyncShared>,
}

impl DocumentSync {
	pub fn new(client: LsClient, uri: Uri, language_id: String, text: Rope) -> Self {
		let (wake_tx, wake_rx) = watch::channel(0u64);
		let shared = Arc::new(SyncShared {
			client,
			uri,
			language_id,
			state: Mutex::new(SyncState {
				last_sent: text.clone(),
				text,
				version: 0,
				edit_generation: 0,
				synced_generation: 0,
				pending_changes: Vec::new(),
				needs_full: false,
				opened: false,
				paused: false,
				in_flight: false,
			}),
			wake_tx,
			settled: Notify::new(),
			lock_gate: tokio::sync::Mutex::new(()),
		});

		let weak = Arc::downgrade(&shared);
		tokio::spawn(async move {
			Self::worker(weak, wake_rx).await;
		});

		Self { shared }
	}

	/// The version the server saw last.
	pub fn version(&self) -> i32 {
		self.shared.state.lock().version
	}

	pub fn uri(&self) -> Uri {
		self.shared.uri.clone()
	}

	/// Whether an unsynced edit is outstanding.
	pub fn is_dirty(&self) -> bool {
		let state = self.shared.state.lock();
		state.edit_generation != state.synced_generation
	}

	/// Records one host edit batch. Schedules a sync only when the text
	/// now differs from what the server last saw.
	pub fn record_edit(&self, pre: &Rope, changes: &[DocumentChange], post: Rope) {
		let mut state = self.shared.state.lock();
		if self.shared.client.supports_incremental_sync() && !state.needs_full {
			let mut events = to_content_changes(pre, changes, self.shared.client.offset_encoding());
			state.pending_changes.append(&mut events);
		}
		state.text = post;
		state.edit_generation += 1;

		if state.text == state.last_sent && state.pending_changes.is_empty() {
			// Edit round-tripped back to the synced text (e.g. undo).
			state.synced_generation = state.edit_generation;
			return;
		}
		drop(state);
		self.wake();
	}

	fn wake(&self) {
		self.shared.wake_tx.send_modify(|n| *n += 1);
	}

	async fn worker(shared: std::sync::Weak<SyncShared>, mut wake_rx: watch::Receiver<u64>) {
		loop {
			if wake_rx.changed().await.is_err() {
				return;
			}
			let Some(shared) = shared.upgrade() else {
				return;
			};
			let sync = DocumentSync { shared };
			match sync.sync_changes().await {
				Ok(sent) => {
					if sent {
						trace!("sync.flush_done");
					}
				}
				Err(e) => {
					warn!(error = %e, "sync.flush_failed");
				}
			}
		}
	}

	/// Sends at most one `didChange` carrying the current state. Returns
	/// whether a notification went out. No-op while locked, while another
	/// send is in flight, or when the buffer matches the last sent text.
	pub async fn sync_changes(&self) -> Result<bool> {
		let (version, generation, payload) = {
			let mut state = self.shared.state.lock();
			if state.paused || state.in_flight || !state.opened {
				return Ok(false);
			}
			if state.edit_generation == state.synced_generation {
				return Ok(false);
			}

			let use_full = state.needs_full || state.pending_changes.is_empty();
			let payload = if use_full {
				state.pending_changes.clear();
				vec![TextDocumentContentChangeEvent {
					range: None,
					range_length: None,
					text: state.text.to_string(),
				}]
			} else {
				std::mem::take(&mut state.pending_changes)
			};

			state.version += 1;
			state.in_flight = true;
			(state.version, state.edit_generation, payload)
		};

		let params = DidChangeTextDocumentParams {
			text_document: VersionedTextDocumentIdentifier {
				uri: self.shared.uri.clone(),
				version,
			},
			content_changes: payload,
		};
		let result = self
			.shared
			.client
			.notify::<lsp_types::notification::DidChangeTextDocument>(params)
			.await;

		let mut state = self.shared.state.lock();
		state.in_flight = false;
		match &result {
			Ok(()) => {
				state.synced_generation = generation;
				state.last_sent = state.text.clone();
				state.needs_full = false;
				debug!(uri = %self.shared.uri.as_str(), version, "sync.did_change_sent");
			}
			Err(e) => {
				// The accumulated incremental events are gone; recover with
				// one full snapshot on the next attempt.
				state.needs_full = true;
				warn!(uri = %self.shared.uri.as_str(), version, error = %e, "sync.did_change_failed");
			}
		}
		let more = state.edit_generation != state.synced_generation;
		drop(state);
		self.shared.settled.notify_waiters();
		if more {
			self.wake();
		}
		result.map(|_| true)
	}

	/// Freezes `didChange` emission, waits for any in-flight send, runs
	/// `f` against a snapshot, then resumes and flushes. Fails with
	/// [`Error::LockTimeout`] when settling plus `f` exceed `timeout`.
	pub async fn do_with_lock<T, F, Fut>(&self, timeout: Duration, f: F) -> Result<T>
	where
		F: FnOnce(Rope) -> Fut,
		Fut: std::future::Future<Output = Result<T>>,
	{
		let _gate = self.shared.lock_gate.lock().await;
		self.shared.state.lock().paused = true;

		let work = async {
			loop {
				let settled = self.shared.settled.notified();
				if !self.shared.state.lock().in_flight {
					break;
				}
				settled.await;
			}
			let snapshot = self.shared.state.lock().text.clone();
			f(snapshot).await
		};

		let result = match tokio::time::timeout(timeout, work).await {
			Ok(result) => result,
			Err(_) => Err(Error::LockTimeout),
		};

		self.shared.state.lock().paused = false;
		self.wake();
		result
	}

	/// Lock-wrapped raw request with the default timeout.
	pub async fn request_with_lock(&self, method: &str, params: JsonValue) -> Result<JsonValue> {
		let client = self.shared.client.clone();
		let method = method.to_string();
		self.do_with_lock(LOCK_TIMEOUT, move |_snapshot| async move { client.request_raw(&method, params).await })
			.await
	}

	/// Sends `didOpen` with the current text. Safe to call again after a
	/// server restart; the version counter keeps rising.
	pub async fn send_did_open(&self) -> Result<()> {
		let (version, text) = {
			let mut state = self.shared.state.lock();
			state.version += 1;
			state.opened = true;
			state.needs_full = false;
			state.pending_changes.clear();
			state.last_sent = state.text.clone();
			state.synced_generation = state.edit_generation;
			(state.version, state.text.to_string())
		};

		self.shared
			.client
			.notify::<lsp_types::notification::DidOpenTextDocument>(DidOpenTextDocumentParams {
				text_document: TextDocumentItem {
					uri: self.shared.uri.clone(),
					language_id: self.shared.language_id.clone(),
					version,
					text,
				},
			})
			.await?;
		debug!(uri = %self.shared.uri.as_str(), version, "sync.did_open_sent");
		Ok(())
	}

	pub async fn send_did_close(&self) -> Result<()> {
		{
			let mut state = self.shared.state.lock();
			if !state.opened {
				return Ok(());
			}
			state.opened = false;
		}
		self.shared
			.client
			.notify::<lsp_types::notification::DidCloseTextDocument>(DidCloseTextDocumentParams {
				text_document: TextDocumentIdentifier {
					uri: self.shared.uri.clone(),
				},
			})
			.await
	}

	/// Forces the next flush to carry a full snapshot.
	pub fn escalate_full(&self) {
		let mut state = self.shared.state.lock();
		state.needs_full = true;
		state.pending_changes.clear();
	}
}
