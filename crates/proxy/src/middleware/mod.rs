//! The domain middleware set.
//!
//! Installed on every session: the initialize tag, the code-action
//! filter, diagnostic post-processing (synthetic-file suppression,
//! cache-on-demand, local hints), the disk mirror for text sync, the
//! tree reinit handler, and the `vtlsp/*` custom methods.

mod code_action;
mod custom;
mod diagnostics;
mod init;
mod mirror;
mod reinit;

use std::sync::Arc;

pub use code_action::CodeActionFilter;
pub use custom::{EnvVarsHandler, PingHandler, ReadFileHandler};
pub use diagnostics::DiagnosticsMiddleware;
pub use init::InitTag;
pub use mirror::DiskMirror;
pub use reinit::ReinitFilesHandler;

use crate::proxy::SessionProxy;

/// Name of the synthetic env-var injection file at the session root.
pub const ENV_VARS_FILE: &str = "env-vars.ts";

/// Files the reinit diff never deletes.
pub const PROTECTED_FILES: &[&str] = &["deno.json", ENV_VARS_FILE];

/// Diagnostic codes that mark an un-cached module.
pub const NO_CACHE_CODES: &[&str] = &["no-cache", "no-cache-npm", "no-cache-jsr"];

/// Key under `diagnostic.data` where a reflexive code action lives.
pub const REFLEXIVE_ACTION_KEY: &str = "codeAction";

/// Installs the full default set on a fresh session proxy.
pub fn install_defaults(proxy: &mut SessionProxy) {
	proxy.add_client_middleware(Arc::new(DiskMirror::new()));
	proxy.add_client_handler(Arc::new(ReinitFilesHandler));
	proxy.add_client_handler(Arc::new(PingHandler));
	proxy.add_client_handler(Arc::new(EnvVarsHandler));
	proxy.add_client_handler(Arc::new(ReadFileHandler));

	proxy.add_proc_middleware(Arc::new(InitTag));
	proxy.add_proc_middleware(Arc::new(CodeActionFilter));
	proxy.add_proc_middleware(Arc::new(DiagnosticsMiddleware));
}
