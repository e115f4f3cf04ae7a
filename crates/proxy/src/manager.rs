//! Session → child process pool with bounded concurrency.
//!
//! `get_or_create` returns the live child for a session or spawns one.
//! At the pool cap the oldest child by spawn time is evicted — not the
//! requester — and its session learns about it through a
//! [`ManagerEvent::SessionEvicted`]. Spawning goes through the
//! [`ProcLauncher`] trait so tests run in-process fakes.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use moor_lsp::Result;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::proc::{ExitCallback, ExitReport, ManagedProc, ProcessConfig};
use crate::SessionId;

/// Pool lifecycle notifications consumed by the WebSocket server.
#[derive(Debug)]
pub enum ManagerEvent {
	/// The session's child was killed to make room; close its sockets
	/// with 1012.
	SessionEvicted { session: SessionId },
	/// The child exited on its own; close the session with a crash
	/// report when `report.crashed`.
	ProcExited { session: SessionId, report: ExitReport },
}

/// Launches children. Production spawns processes; tests wire duplex
/// pipes to an in-process fake server.
pub trait ProcLauncher: Send + Sync + 'static {
	fn launch(
		&self,
		session: &SessionId,
		config: &ProcessConfig,
		on_exit: ExitCallback,
	) -> Pin<Box<dyn Future<Output = Result<ManagedProc>> + Send>>;
}

/// Spawns real language-server processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher;

impl ProcLauncher for ProcessLauncher {
	fn launch(
		&self,
		_session: &SessionId,
		config: &ProcessConfig,
		on_exit: ExitCallback,
	) -> Pin<Box<dyn Future<Output = Result<ManagedProc>> + Send>> {
		let config = config.clone();
		Box::pin(async move { ManagedProc::spawn(&config, on_exit) })
	}
}

pub struct ProcManager {
	procs: Mutex<HashMap<SessionId, Arc<ManagedProc>>>,
	/// Serializes spawn/evict decisions; the procs map stays lock-free
	/// across awaits.
	create_gate: tokio::sync::Mutex<()>,
	launcher: Arc<dyn ProcLauncher>,
	max_procs: i64,
	events_tx: mpsc::UnboundedSender<ManagerEvent>,
}

impl ProcManager {
	pub fn new(launcher: Arc<dyn ProcLauncher>, max_procs: i64) -> (Arc<Self>, mpsc::UnboundedReceiver<ManagerEvent>) {
		let (events_tx, events_rx) = mpsc::unbounded_channel();
		(
			Arc::new(Self {
				procs: Mutex::new(HashMap::new()),
				create_gate: tokio::sync::Mutex::new(()),
				launcher,
				max_procs,
				events_tx,
			}),
			events_rx,
		)
	}

	pub fn get(&self, session: &SessionId) -> Option<Arc<ManagedProc>> {
		self.procs.lock().get(session).cloned()
	}

	pub fn len(&self) -> usize {
		self.procs.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.procs.lock().is_empty()
	}

	/// Returns the session's child, spawning (and possibly evicting the
	/// pool's oldest) if needed. The evicted child is fully terminated
	/// before the new one launches.
	pub async fn get_or_create(self: &Arc<Self>, session: &SessionId, config: &ProcessConfig) -> Result<Arc<ManagedProc>> {
		let _gate = self.create_gate.lock().await;

		if let Some(existing) = self.get(session) {
			return Ok(existing);
		}

		if self.max_procs > 0 && self.len() as i64 >= self.max_procs {
			let oldest = {
				let procs = self.procs.lock();
				procs.iter().min_by_key(|(_, proc)| proc.spawned_at).map(|(sid, proc)| (sid.clone(), proc.clone()))
			};
			if let Some((evicted_session, evicted)) = oldest {
				info!(session = %evicted_session, "manager.evict_oldest");
				self.procs.lock().remove(&evicted_session);
				let _ = self.events_tx.send(ManagerEvent::SessionEvicted {
					session: evicted_session,
				});
				evicted.terminate().await;
			}
		}

		let on_exit: ExitCallback = {
			let manager = Arc::downgrade(self);
			let session = session.clone();
			Box::new(move |report: ExitReport| {
				if let Some(manager) = manager.upgrade() {
					manager.on_proc_exit(&session, report);
				}
			})
		};

		let proc = Arc::new(self.launcher.launch(session, config, on_exit).await?);
		debug!(session = %session, pid = ?proc.pid, "manager.spawned");
		self.procs.lock().insert(session.clone(), proc.clone());
		Ok(proc)
	}

	fn on_proc_exit(&self, session: &SessionId, report: ExitReport) {
		if self.procs.lock().remove(session).is_none() {
			// Already released or evicted; the exit event would be noise.
			return;
		}
		let _ = self.events_tx.send(ManagerEvent::ProcExited {
			session: session.clone(),
			report,
		});
	}

	/// Kills and removes the session's child. No event fires; the caller
	/// is tearing the session down already.
	pub async fn release(&self, session: &SessionId) {
		let proc = self.procs.lock().remove(session);
		if let Some(proc) = proc {
			debug!(session = %session, "manager.release");
			proc.terminate().await;
		}
	}

	/// Terminates everything; used at shutdown.
	pub async fn release_all(&self) {
		let procs: Vec<Arc<ManagedProc>> = self.procs.lock().drain().map(|(_, proc)| proc).collect();
		for proc in procs {
			proc.terminate().await;
		}
	}
}
