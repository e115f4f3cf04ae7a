//! Proxy configuration: TOML file merged with CLI flags.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Everything the serve loop needs. Field defaults match a single-user
/// development deployment; production configs override via TOML.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProxyConfig {
	/// Bind address for the WebSocket endpoint.
	pub listen: String,
	/// Language server command and arguments.
	pub server_command: String,
	pub server_args: Vec<String>,
	/// Extra environment for the child.
	pub server_env: Vec<(String, String)>,
	/// Upper bound on live children; `<= 0` means unbounded.
	pub max_procs: i64,
	/// Per-session WebSocket connection cap.
	pub max_connections_per_session: usize,
	/// Idle seconds before the whole proxy shuts down; 0 disables.
	pub inactivity_timeout_secs: u64,
	/// Largest WebSocket frame emitted on the wire.
	pub max_ws_message_size: usize,
	/// Tee child stdout/stderr into these files when set.
	pub proc_stdout_log: Option<PathBuf>,
	pub proc_stderr_log: Option<PathBuf>,
	/// Treat a crashing child as fatal to the proxy process.
	pub exit_on_proc_crash: bool,
}

impl Default for ProxyConfig {
	fn default() -> Self {
		Self {
			listen: "127.0.0.1:9257".into(),
			server_command: "deno".into(),
			server_args: vec!["lsp".into()],
			server_env: Vec::new(),
			max_procs: 16,
			max_connections_per_session: 8,
			inactivity_timeout_secs: 0,
			max_ws_message_size: moor_lsp::DEFAULT_MAX_WS_MESSAGE_SIZE,
			proc_stdout_log: None,
			proc_stderr_log: None,
			exit_on_proc_crash: false,
		}
	}
}

impl ProxyConfig {
	pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
		let text = std::fs::read_to_string(path)?;
		Ok(toml::from_str(&text)?)
	}

	pub fn inactivity_timeout(&self) -> Option<Duration> {
		(self.inactivity_timeout_secs > 0).then(|| Duration::from_secs(self.inactivity_timeout_secs))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn minimal_toml_fills_defaults() {
		let config: ProxyConfig = toml::from_str("listen = \"0.0.0.0:4000\"").unwrap();
		assert_eq!(config.listen, "0.0.0.0:4000");
		assert_eq!(config.max_procs, 16);
		assert!(config.inactivity_timeout().is_none());
	}

	#[test]
	fn unknown_keys_are_rejected() {
		assert!(toml::from_str::<ProxyConfig>("nope = 1").is_err());
	}
}
