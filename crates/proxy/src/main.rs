use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use moor_proxy::{ProcManager, ProcessLauncher, ProxyConfig, WsServer};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// LSP-over-WebSocket multiplexing proxy.
#[derive(Debug, Parser)]
#[command(name = "moor-proxy", version, about)]
struct Args {
	/// TOML configuration file.
	#[arg(long)]
	config: Option<PathBuf>,

	/// Bind address, overriding the config file.
	#[arg(long)]
	listen: Option<String>,

	/// Language server command, overriding the config file.
	#[arg(long)]
	server: Option<String>,

	/// Upper bound on live language-server children (<= 0: unbounded).
	#[arg(long)]
	max_procs: Option<i64>,

	/// Idle seconds before the proxy shuts itself down (0: never).
	#[arg(long)]
	inactivity_timeout: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.init();

	let args = Args::parse();
	let mut config = match &args.config {
		Some(path) => ProxyConfig::load(path)?,
		None => ProxyConfig::default(),
	};
	if let Some(listen) = args.listen {
		config.listen = listen;
	}
	if let Some(server) = args.server {
		config.server_command = server;
	}
	if let Some(max_procs) = args.max_procs {
		config.max_procs = max_procs;
	}
	if let Some(timeout) = args.inactivity_timeout {
		config.inactivity_timeout_secs = timeout;
	}

	info!(server = %config.server_command, max_procs = config.max_procs, "starting");

	let (manager, manager_events) = ProcManager::new(Arc::new(ProcessLauncher), config.max_procs);
	let server = WsServer::new(config, manager, manager_events);

	let shutdown_server = server.clone();
	tokio::spawn(async move {
		if tokio::signal::ctrl_c().await.is_ok() {
			info!("interrupt received, shutting down");
			shutdown_server.shutdown().await;
		}
	});

	server.serve().await
}
