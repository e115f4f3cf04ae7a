//! Typed registry for the bridge's custom methods.
//!
//! Standard LSP methods come typed through `lsp_types`' request and
//! notification traits; the `vtlsp/*` extensions get the same treatment
//! here so both sides of the wire share one definition of each shape.
//! Callers that need to stay dynamic can always fall back to the raw
//! `request_raw`-style escape hatches with `serde_json::Value`.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A custom method with typed params and result.
pub trait CustomMethod {
	const METHOD: &'static str;
	type Params: Serialize + DeserializeOwned + Send;
	type Result: Serialize + DeserializeOwned + Send;
}

/// `vtlsp/ping`: liveness probe answered by the proxy with process
/// memory stats.
pub enum Ping {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PingParams {}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingResult {
	pub ok: bool,
	pub session: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub memory: Option<MemoryStats>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
	pub rss_bytes: u64,
	pub virtual_bytes: u64,
}

impl CustomMethod for Ping {
	const METHOD: &'static str = "vtlsp/ping";
	type Params = PingParams;
	type Result = PingResult;
}

/// `vtlsp/envVars`: inject an env-var stub file into the session tree.
pub enum EnvVars {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvVarsParams {
	pub vars: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvVarsResult {
	pub ok: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub path: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

impl CustomMethod for EnvVars {
	const METHOD: &'static str = "vtlsp/envVars";
	type Params = EnvVarsParams;
	type Result = EnvVarsResult;
}

/// `vtlsp/readFile`: read a real file under the session root.
pub enum ReadFile {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadFileParams {
	pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadFileResult {
	pub ok: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub content: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

impl CustomMethod for ReadFile {
	const METHOD: &'static str = "vtlsp/readFile";
	type Params = ReadFileParams;
	type Result = ReadFileResult;
}

/// `vtlsp/reinitFiles`: replace the session's whole file tree with the
/// supplied set.
pub enum ReinitFiles {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReinitFilesParams {
	/// `/`-rooted virtual path → full file content.
	pub files: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReinitFilesResult {
	pub ok: bool,
	pub created: usize,
	pub changed: usize,
	pub deleted: usize,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

impl CustomMethod for ReinitFiles {
	const METHOD: &'static str = "vtlsp/reinitFiles";
	type Params = ReinitFilesParams;
	type Result = ReinitFilesResult;
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	#[test]
	fn reinit_params_round_trip() {
		let params = ReinitFilesParams {
			files: [("/a.ts".to_string(), "body".to_string())].into(),
		};
		let value = serde_json::to_value(&params).unwrap();
		assert_eq!(value["files"]["/a.ts"], "body");
		let back: ReinitFilesParams = serde_json::from_value(value).unwrap();
		assert_eq!(back.files, params.files);
	}

	#[test]
	fn ping_result_uses_camel_case_memory_fields() {
		let result = PingResult {
			ok: true,
			session: "s".into(),
			memory: Some(MemoryStats {
				rss_bytes: 10,
				virtual_bytes: 20,
			}),
		};
		let value = serde_json::to_value(&result).unwrap();
		assert_eq!(value["memory"]["rssBytes"], 10);
		assert_eq!(value["memory"]["virtualBytes"], 20);
	}

	#[test]
	fn optional_error_fields_are_omitted() {
		let value = serde_json::to_value(ReadFileResult {
			ok: true,
			content: Some("x".into()),
			error: None,
		})
		.unwrap();
		assert!(value.get("error").is_none());
	}
}
