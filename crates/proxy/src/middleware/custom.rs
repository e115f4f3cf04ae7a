//! Custom `vtlsp/*` methods answered by the proxy itself. Shapes live
//! in [`moor_lsp::methods`] so clients and proxy share one contract.

use async_trait::async_trait;
use moor_lsp::JsonValue;
use moor_lsp::methods::{EnvVarsParams, EnvVarsResult, MemoryStats, PingResult, ReadFileParams, ReadFileResult};
use serde_json::json;
use tracing::{debug, warn};

use super::ENV_VARS_FILE;
use crate::proxy::{Handler, HandlerOutcome, MessageKind, Pattern, SessionCtx};

fn respond<T: serde::Serialize>(result: T) -> HandlerOutcome {
	match serde_json::to_value(result) {
		Ok(value) => HandlerOutcome::Respond(value),
		Err(e) => HandlerOutcome::Respond(json!({"ok": false, "error": e.to_string()})),
	}
}

/// `vtlsp/ping`: liveness plus process memory stats.
pub struct PingHandler;

#[async_trait]
impl Handler for PingHandler {
	fn pattern(&self) -> Pattern {
		Pattern::Exact("vtlsp/ping")
	}

	async fn handle(&self, ctx: &SessionCtx, _kind: MessageKind, _method: &str, _params: &mut JsonValue) -> HandlerOutcome {
		let mut system = sysinfo::System::new();
		let pid = sysinfo::get_current_pid().ok();
		let memory = pid.and_then(|pid| {
			system.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[pid]), true);
			system.process(pid).map(|process| MemoryStats {
				rss_bytes: process.memory(),
				virtual_bytes: process.virtual_memory(),
			})
		});

		respond(PingResult {
			ok: true,
			session: ctx.session.0.clone(),
			memory,
		})
	}
}

/// `vtlsp/envVars`: writes the env-var stub file so user code can
/// reference configured variables with full type information.
pub struct EnvVarsHandler;

#[async_trait]
impl Handler for EnvVarsHandler {
	fn pattern(&self) -> Pattern {
		Pattern::Exact("vtlsp/envVars")
	}

	async fn handle(&self, ctx: &SessionCtx, _kind: MessageKind, _method: &str, params: &mut JsonValue) -> HandlerOutcome {
		let parsed: EnvVarsParams = serde_json::from_value(params.clone()).unwrap_or_default();

		let path = ctx.uri_map.root().join(ENV_VARS_FILE);
		let existed = tokio::fs::try_exists(&path).await.unwrap_or(false);
		let stub = render_env_stub(&parsed);
		if let Err(e) = tokio::fs::write(&path, &stub).await {
			warn!(?path, error = %e, "env_vars.write_failed");
			return respond(EnvVarsResult {
				ok: false,
				path: None,
				error: Some(e.to_string()),
			});
		}
		debug!(count = parsed.vars.len(), "env_vars.injected");

		let uri = format!("file://{}/{ENV_VARS_FILE}", ctx.uri_map.root().to_str().unwrap_or(""));
		ctx.notify_proc(
			"workspace/didChangeWatchedFiles",
			json!({"changes": [{"uri": uri, "type": if existed { 2 } else { 1 }}]}),
		);

		respond(EnvVarsResult {
			ok: true,
			path: Some(format!("/{ENV_VARS_FILE}")),
			error: None,
		})
	}
}

/// `vtlsp/readFile`: reads a file under the session root. Paths that
/// resolve outside the root are refused.
pub struct ReadFileHandler;

#[async_trait]
impl Handler for ReadFileHandler {
	fn pattern(&self) -> Pattern {
		Pattern::Exact("vtlsp/readFile")
	}

	async fn handle(&self, ctx: &SessionCtx, _kind: MessageKind, _method: &str, params: &mut JsonValue) -> HandlerOutcome {
		let Ok(parsed) = serde_json::from_value::<ReadFileParams>(params.clone()) else {
			return respond(ReadFileResult {
				ok: false,
				content: None,
				error: Some("missing path".into()),
			});
		};
		let Some(path) = ctx.uri_map.virtual_to_path(&parsed.path) else {
			return respond(ReadFileResult {
				ok: false,
				content: None,
				error: Some("path outside session root".into()),
			});
		};
		match tokio::fs::read_to_string(&path).await {
			Ok(content) => respond(ReadFileResult {
				ok: true,
				content: Some(content),
				error: None,
			}),
			Err(e) => respond(ReadFileResult {
				ok: false,
				content: None,
				error: Some(e.to_string()),
			}),
		}
	}
}

fn render_env_stub(params: &EnvVarsParams) -> String {
	let mut out = String::from("// Generated env-var stub; edits are overwritten.\n");
	out.push_str("export const env = {\n");
	for (name, value) in &params.vars {
		out.push_str(&format!("\t{}: {},\n", json!(name), json!(value)));
	}
	out.push_str("} as const;\n");
	out
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn env_stub_quotes_names_and_values() {
		let params = EnvVarsParams {
			vars: [("API_KEY".to_string(), "secret".to_string()), ("WEIRD\"NAME".to_string(), "x".to_string())].into(),
		};
		let stub = render_env_stub(&params);
		assert!(stub.contains("\"API_KEY\": \"secret\""));
		assert!(stub.contains("\"WEIRD\\\"NAME\""));
		assert!(stub.ends_with("} as const;\n"));
	}
}
