//! Tags `serverInfo.name` on initialize results so clients can tell
//! they are talking through the proxy.

use async_trait::async_trait;
use moor_lsp::JsonValue;
use serde_json::json;

use crate::proxy::{Middleware, MwOutcome, Pattern, SessionCtx};

pub const SERVER_NAME_TAG: &str = " (via moor)";

pub struct InitTag;

#[async_trait]
impl Middleware for InitTag {
	fn pattern(&self) -> Pattern {
		Pattern::Exact("initialize")
	}

	async fn on_result(&self, _ctx: &SessionCtx, _method: &str, _original_params: &JsonValue, result: &mut JsonValue) -> MwOutcome {
		match result.get_mut("serverInfo") {
			Some(info) => {
				if let Some(name) = info.get("name").and_then(|n| n.as_str()).map(str::to_string) {
					info["name"] = json!(format!("{name}{SERVER_NAME_TAG}"));
				} else {
					info["name"] = json!(format!("language server{SERVER_NAME_TAG}"));
				}
			}
			None => {
				result["serverInfo"] = json!({"name": format!("language server{SERVER_NAME_TAG}")});
			}
		}
		MwOutcome::Continue
	}
}
