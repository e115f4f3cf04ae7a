//! Language-server child process ownership.
//!
//! One [`ManagedProc`] per session: piped stdio, an optional tee of the
//! child's output into caller-provided log files, a bounded stderr tail
//! for crash reports, and graceful termination (SIGTERM, then a kill
//! after a short grace period).

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use moor_lsp::{Error, Result};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

const TERM_GRACE: Duration = Duration::from_secs(2);
const STDERR_TAIL_LINES: usize = 200;

/// How to launch the language-server child for one session.
#[derive(Debug, Clone)]
pub struct ProcessConfig {
	pub command: String,
	pub args: Vec<String>,
	pub env: Vec<(String, String)>,
	/// Session root; becomes the child's working directory.
	pub cwd: PathBuf,
	pub stdout_log: Option<PathBuf>,
	pub stderr_log: Option<PathBuf>,
}

/// Exit report passed to the manager's exit callback.
#[derive(Debug, Clone)]
pub struct ExitReport {
	pub code: Option<i32>,
	/// Terminating signal, when the child died to one.
	pub signal: Option<i32>,
	pub crashed: bool,
	/// Last stderr lines, for the session-close crash report.
	pub stderr_tail: Vec<String>,
}

pub type ExitCallback = Box<dyn FnOnce(ExitReport) + Send>;

struct ProcControl {
	term_tx: oneshot::Sender<()>,
	done_rx: oneshot::Receiver<()>,
}

/// A running child (or an in-process fake) with its stdio handles.
pub struct ManagedProc {
	stdin: Mutex<Option<Box<dyn AsyncWrite + Send + Unpin>>>,
	stdout: Mutex<Option<Box<dyn AsyncRead + Send + Unpin>>>,
	control: Mutex<Option<ProcControl>>,
	stderr_tail: Arc<Mutex<VecDeque<String>>>,
	pub spawned_at: Instant,
	pub pid: Option<u32>,
}

impl std::fmt::Debug for ManagedProc {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ManagedProc").field("pid", &self.pid).field("spawned_at", &self.spawned_at).finish()
	}
}

impl ManagedProc {
	/// Spawns the real child. `on_exit` fires only on spontaneous exit,
	/// never on [`ManagedProc::terminate`].
	pub fn spawn(config: &ProcessConfig, on_exit: ExitCallback) -> Result<Self> {
		let mut child = tokio::process::Command::new(&config.command)
			.args(&config.args)
			.envs(config.env.iter().cloned())
			.current_dir(&config.cwd)
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.spawn()?;

		let pid = child.id();
		let stdin = child.stdin.take().ok_or_else(|| Error::Protocol("child stdin missing".into()))?;
		let stdout = child.stdout.take().ok_or_else(|| Error::Protocol("child stdout missing".into()))?;
		let stderr = child.stderr.take().ok_or_else(|| Error::Protocol("child stderr missing".into()))?;

		let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
		let stderr_log = config.stderr_log.clone();
		let tail = stderr_tail.clone();
		tokio::spawn(async move {
			let mut log = match stderr_log {
				Some(path) => tokio::fs::OpenOptions::new().create(true).append(true).open(path).await.ok(),
				None => None,
			};
			let mut lines = BufReader::new(stderr).lines();
			while let Ok(Some(line)) = lines.next_line().await {
				if let Some(log) = log.as_mut() {
					let _ = log.write_all(line.as_bytes()).await;
					let _ = log.write_all(b"\n").await;
				}
				let mut tail = tail.lock();
				if tail.len() == STDERR_TAIL_LINES {
					tail.pop_front();
				}
				tail.push_back(line);
			}
		});

		let stdout: Box<dyn AsyncRead + Send + Unpin> = match &config.stdout_log {
			Some(path) => Box::new(tee_reader(stdout, path.clone())),
			None => Box::new(stdout),
		};

		let (term_tx, mut term_rx) = oneshot::channel();
		let (done_tx, done_rx) = oneshot::channel();
		let exit_tail = stderr_tail.clone();
		tokio::spawn(async move {
			let spontaneous = tokio::select! {
				_ = &mut term_rx => None,
				status = child.wait() => Some(status),
			};

			match spontaneous {
				Some(status) => {
					let (code, signal, crashed) = match status {
						Ok(status) => (status.code(), exit_signal(&status), !status.success()),
						Err(_) => (None, None, true),
					};
					info!(?pid, ?code, ?signal, crashed, "proc.exited");
					on_exit(ExitReport {
						code,
						signal,
						crashed,
						stderr_tail: exit_tail.lock().iter().cloned().collect(),
					});
				}
				None => {
					if let Some(pid) = pid {
						send_sigterm(pid);
					}
					match tokio::time::timeout(TERM_GRACE, child.wait()).await {
						Ok(status) => {
							debug!(?pid, ?status, "proc.terminated");
						}
						Err(_) => {
							warn!(?pid, "proc.term_grace_expired");
							let _ = child.kill().await;
							let _ = child.wait().await;
						}
					}
					let _ = done_tx.send(());
				}
			}
		});

		Ok(Self {
			stdin: Mutex::new(Some(Box::new(stdin))),
			stdout: Mutex::new(Some(stdout)),
			control: Mutex::new(Some(ProcControl { term_tx, done_rx })),
			stderr_tail,
			spawned_at: Instant::now(),
			pid,
		})
	}

	/// Builds a proc over arbitrary stdio, for in-process fakes.
	pub fn from_io(stdin: Box<dyn AsyncWrite + Send + Unpin>, stdout: Box<dyn AsyncRead + Send + Unpin>) -> Self {
		Self {
			stdin: Mutex::new(Some(stdin)),
			stdout: Mutex::new(Some(stdout)),
			control: Mutex::new(None),
			stderr_tail: Arc::new(Mutex::new(VecDeque::new())),
			spawned_at: Instant::now(),
			pid: None,
		}
	}

	/// Hands the stdio pair to the session wiring. Single use.
	pub fn take_io(&self) -> Option<(Box<dyn AsyncWrite + Send + Unpin>, Box<dyn AsyncRead + Send + Unpin>)> {
		let stdin = self.stdin.lock().take()?;
		let stdout = self.stdout.lock().take()?;
		Some((stdin, stdout))
	}

	/// Last `n` stderr lines.
	pub fn log_tail(&self, n: usize) -> Vec<String> {
		let tail = self.stderr_tail.lock();
		tail.iter().rev().take(n).rev().cloned().collect()
	}

	/// Best-effort graceful shutdown, then kill if needed.
	pub async fn terminate(&self) {
		let Some(control) = self.control.lock().take() else {
			return;
		};
		let _ = control.term_tx.send(());
		let _ = tokio::time::timeout(TERM_GRACE + Duration::from_secs(1), control.done_rx).await;
	}
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
	std::os::unix::process::ExitStatusExt::signal(status)
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
	None
}

fn send_sigterm(pid: u32) {
	let Ok(raw) = i32::try_from(pid) else {
		return;
	};
	if let Some(pid) = rustix::process::Pid::from_raw(raw)
		&& let Err(e) = rustix::process::kill_process(pid, rustix::process::Signal::TERM)
	{
		debug!(raw, error = ?e, "proc.sigterm_failed");
	}
}

/// Relays `reader` while appending every byte to `path`.
fn tee_reader(reader: impl AsyncRead + Send + Unpin + 'static, path: PathBuf) -> impl AsyncRead + Send + Unpin {
	let (write_half, read_half) = tokio::io::duplex(64 * 1024);
	tokio::spawn(async move {
		let mut reader = reader;
		let mut write_half = write_half;
		let mut log = tokio::fs::OpenOptions::new().create(true).append(true).open(path).await.ok();
		let mut buf = [0u8; 8192];
		loop {
			match tokio::io::AsyncReadExt::read(&mut reader, &mut buf).await {
				Ok(0) | Err(_) => break,
				Ok(n) => {
					if let Some(log) = log.as_mut() {
						let _ = log.write_all(&buf[..n]).await;
					}
					if write_half.write_all(&buf[..n]).await.is_err() {
						break;
					}
				}
			}
		}
	});
	read_half
}
