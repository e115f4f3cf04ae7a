//! Virtual ↔ real URI namespace conversion.
//!
//! Clients see a tree rooted at `/`; the child process sees the same
//! tree under the session's temp directory. Conversion is total on
//! `file://` URIs and the identity on every other scheme (`deno:`,
//! `jsr:`, `http(s):`, user-invented roots). The JSON walker rewrites
//! every string-valued field, including `file://` URIs embedded inside
//! larger strings such as diagnostic messages.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use moor_lsp::JsonValue;
use regex::Regex;

/// Which namespace the message is headed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UriDirection {
	/// Client → process: `/`-rooted paths become session-root paths.
	VirtualToReal,
	/// Process → client: session-root paths become `/`-rooted paths.
	RealToVirtual,
}

static FILE_URI: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"file://[^\s"'`<>\)\]\}]+"#).unwrap());

/// Per-session URI translator.
#[derive(Debug, Clone)]
pub struct UriMap {
	root: PathBuf,
}

impl UriMap {
	/// `root` must be absolute; it is the session's on-disk tree.
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self { root: root.into() }
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	fn root_str(&self) -> &str {
		self.root.to_str().unwrap_or("/")
	}

	/// `file:///src/a.ts` → `file://<root>/src/a.ts`. Identity on other
	/// schemes and on URIs already under the root.
	pub fn virtual_to_real(&self, uri: &str) -> String {
		let Some(path) = uri.strip_prefix("file://") else {
			return uri.to_string();
		};
		if path.starts_with(self.root_str()) {
			return uri.to_string();
		}
		format!("file://{}{}", self.root_str(), path)
	}

	/// `file://<root>/src/a.ts` → `file:///src/a.ts`. Identity on other
	/// schemes and on file URIs outside the root.
	pub fn real_to_virtual(&self, uri: &str) -> String {
		let Some(path) = uri.strip_prefix("file://") else {
			return uri.to_string();
		};
		match path.strip_prefix(self.root_str()) {
			Some(rest) if rest.is_empty() => "file:///".to_string(),
			Some(rest) if rest.starts_with('/') => format!("file://{rest}"),
			_ => uri.to_string(),
		}
	}

	pub fn convert_uri(&self, uri: &str, direction: UriDirection) -> String {
		match direction {
			UriDirection::VirtualToReal => self.virtual_to_real(uri),
			UriDirection::RealToVirtual => self.real_to_virtual(uri),
		}
	}

	/// Rewrites every `file://` URI in `text`, embedded or whole.
	pub fn convert_str(&self, text: &str, direction: UriDirection) -> String {
		if !text.contains("file://") {
			return text.to_string();
		}
		FILE_URI
			.replace_all(text, |caps: &regex::Captures<'_>| self.convert_uri(&caps[0], direction))
			.into_owned()
	}

	/// Recursively rewrites every string value in `value`.
	pub fn convert_value(&self, value: &mut JsonValue, direction: UriDirection) {
		match value {
			JsonValue::String(s) => {
				if s.contains("file://") {
					*s = self.convert_str(s, direction);
				}
			}
			JsonValue::Array(items) => {
				for item in items {
					self.convert_value(item, direction);
				}
			}
			JsonValue::Object(map) => {
				for (_, item) in map.iter_mut() {
					self.convert_value(item, direction);
				}
			}
			_ => {}
		}
	}

	/// Maps a virtual `file://` URI (or `/`-rooted path) onto the real
	/// filesystem. `None` for non-file schemes or traversal outside the
	/// root.
	pub fn virtual_to_path(&self, uri_or_path: &str) -> Option<PathBuf> {
		let path = uri_or_path.strip_prefix("file://").unwrap_or(uri_or_path);
		if !path.starts_with('/') {
			return None;
		}
		let mut real = self.root.clone();
		for component in Path::new(path).components() {
			match component {
				std::path::Component::Normal(part) => real.push(part),
				std::path::Component::RootDir => {}
				// `..` would escape the session root.
				_ => return None,
			}
		}
		Some(real)
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;
	use serde_json::json;

	use super::*;

	fn map() -> UriMap {
		UriMap::new("/tmp/session-abc")
	}

	#[test]
	fn virtual_real_round_trip_beneath_root() {
		let map = map();
		for path in ["/tmp/session-abc/a.ts", "/tmp/session-abc/src/deep/b.tsx", "/tmp/session-abc/deno.json"] {
			let real = format!("file://{path}");
			let there_and_back = map.virtual_to_real(&map.real_to_virtual(&real));
			assert_eq!(there_and_back, real);
		}
	}

	#[test]
	fn non_file_schemes_are_identity() {
		let map = map();
		for uri in ["deno:/status.md", "jsr:@std/http", "https://esm.sh/react", "untitled:one"] {
			assert_eq!(map.virtual_to_real(uri), uri);
			assert_eq!(map.real_to_virtual(uri), uri);
		}
	}

	#[test]
	fn real_uri_outside_root_stays_put() {
		let map = map();
		assert_eq!(map.real_to_virtual("file:///usr/lib/deno/cache.ts"), "file:///usr/lib/deno/cache.ts");
	}

	#[test]
	fn conversion_is_idempotent() {
		let map = map();
		let real = map.virtual_to_real("file:///a.ts");
		assert_eq!(map.virtual_to_real(&real), real);
	}

	#[test]
	fn embedded_uris_in_strings_are_rewritten() {
		let map = map();
		let message = "cannot resolve file:///tmp/session-abc/util.ts from file:///tmp/session-abc/main.ts";
		assert_eq!(
			map.convert_str(message, UriDirection::RealToVirtual),
			"cannot resolve file:///util.ts from file:///main.ts"
		);
	}

	#[test]
	fn value_walker_reaches_nested_fields() {
		let map = map();
		let mut value = json!({
			"uri": "file:///main.ts",
			"related": [{"location": {"uri": "file:///lib/dep.ts"}}],
			"count": 3,
		});
		map.convert_value(&mut value, UriDirection::VirtualToReal);
		assert_eq!(value["uri"], "file:///tmp/session-abc/main.ts");
		assert_eq!(value["related"][0]["location"]["uri"], "file:///tmp/session-abc/lib/dep.ts");
		assert_eq!(value["count"], 3);
	}

	#[test]
	fn virtual_to_path_confines_to_root() {
		let map = map();
		assert_eq!(map.virtual_to_path("file:///src/a.ts"), Some(PathBuf::from("/tmp/session-abc/src/a.ts")));
		assert_eq!(map.virtual_to_path("/deno.json"), Some(PathBuf::from("/tmp/session-abc/deno.json")));
		assert_eq!(map.virtual_to_path("file:///../escape.ts"), None);
		assert_eq!(map.virtual_to_path("deno:/status.md"), None);
	}
}
