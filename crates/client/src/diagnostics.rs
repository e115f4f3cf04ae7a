//! Diagnostics and code-action pipeline.
//!
//! `publishDiagnostics` notifications race the document: the server may
//! answer about any historical version. Only notifications matching the
//! current synced version pass the gate; everything older is dropped.
//! A passing set dispatches immediately (squigglies first), then a
//! debounced pass asks the server for code actions per diagnostic and
//! re-dispatches only if something was gained.

use std::time::Duration;

use lsp_types::{
	CodeActionContext, CodeActionOrCommand, CodeActionParams, Diagnostic, DiagnosticSeverity, PublishDiagnosticsParams,
	TextDocumentIdentifier,
};
use moor_lsp::lsp_range_to_char_range;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::document::{DocumentPlugin, UiEvent};

const CODE_ACTION_DEBOUNCE: Duration = Duration::from_millis(200);

/// Editor-facing severity after mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
	Error,
	Warning,
	Info,
}

/// Mapping from LSP severities to editor severities. The default sends
/// `Hint` to `Info`.
#[derive(Debug, Clone, Copy)]
pub struct SeverityMap {
	pub error: Severity,
	pub warning: Severity,
	pub information: Severity,
	pub hint: Severity,
}

impl Default for SeverityMap {
	fn default() -> Self {
		Self {
			error: Severity::Error,
			warning: Severity::Warning,
			information: Severity::Info,
			hint: Severity::Info,
		}
	}
}

impl SeverityMap {
	pub fn map(&self, severity: Option<DiagnosticSeverity>) -> Severity {
		match severity {
			Some(DiagnosticSeverity::ERROR) | None => self.error,
			Some(DiagnosticSeverity::WARNING) => self.warning,
			Some(DiagnosticSeverity::INFORMATION) => self.information,
			Some(DiagnosticSeverity::HINT) => self.hint,
			Some(_) => self.error,
		}
	}
}

/// One diagnostic as the host renders it.
#[derive(Debug, Clone)]
pub struct DiagnosticItem {
	/// Char range in the current document.
	pub range: std::ops::Range<usize>,
	pub message: String,
	pub severity: Severity,
	pub source: Option<String>,
	/// The raw diagnostic, needed for code-action context.
	pub lsp: Diagnostic,
	/// Empty on the immediate dispatch; filled by the debounced pass.
	pub actions: Vec<CodeActionOrCommand>,
}

#[derive(Default)]
pub(crate) struct DiagnosticsState {
	token: Mutex<Option<CancellationToken>>,
}

impl DiagnosticsState {
	/// Aborts the in-flight code-action queries and hands out the token
	/// guarding the next batch.
	fn rotate(&self) -> CancellationToken {
		let fresh = CancellationToken::new();
		if let Some(old) = self.token.lock().replace(fresh.clone()) {
			old.cancel();
		}
		fresh
	}

	pub(crate) fn on_edit(&self) {
		self.cancel();
	}

	pub(crate) fn cancel(&self) {
		if let Some(token) = self.token.lock().take() {
			token.cancel();
		}
	}
}

impl DocumentPlugin {
	pub(crate) fn on_publish_diagnostics(&self, params: PublishDiagnosticsParams) {
		if params.uri != self.uri() {
			return;
		}
		let current_version = self.version();
		if let Some(version) = params.version
			&& version != current_version
		{
			trace!(published = version, current = current_version, "diagnostics.drop_stale_publish");
			return;
		}

		let token = self.shared.diagnostics.rotate();
		let rope = self.text();
		let encoding = self.client().offset_encoding();
		let map = self.shared.config.severity_map;

		let items: Vec<DiagnosticItem> = params
			.diagnostics
			.iter()
			.filter_map(|diag| {
				let range = lsp_range_to_char_range(&rope, diag.range, encoding)?;
				Some(DiagnosticItem {
					range,
					message: diag.message.clone(),
					severity: map.map(diag.severity),
					source: diag.source.clone(),
					lsp: diag.clone(),
					actions: Vec::new(),
				})
			})
			.collect();

		// Squigglies first; actions follow once the debounce settles.
		self.shared.emit(UiEvent::Diagnostics {
			version: current_version,
			items: items.clone(),
		});

		if items.is_empty() || !self.supports_code_action() {
			return;
		}

		let plugin = self.clone();
		tokio::spawn(async move {
			tokio::select! {
				_ = token.cancelled() => return,
				_ = tokio::time::sleep(CODE_ACTION_DEBOUNCE) => {}
			}
			plugin.enrich_with_code_actions(current_version, items, token).await;
		});
	}

	async fn enrich_with_code_actions(&self, version: i32, mut items: Vec<DiagnosticItem>, token: CancellationToken) {
		let mut gained = false;
		for item in &mut items {
			let params = CodeActionParams {
				text_document: TextDocumentIdentifier { uri: self.uri() },
				range: item.lsp.range,
				context: CodeActionContext {
					diagnostics: vec![item.lsp.clone()],
					only: None,
					trigger_kind: None,
				},
				work_done_progress_params: Default::default(),
				partial_result_params: Default::default(),
			};

			let response = tokio::select! {
				_ = token.cancelled() => return,
				response = self.client().request::<lsp_types::request::CodeActionRequest>(params) => response,
			};

			if token.is_cancelled() || self.version() != version {
				trace!("diagnostics.drop_stale_actions");
				return;
			}

			match response {
				Ok(Some(actions)) => {
					let usable: Vec<CodeActionOrCommand> = actions
						.into_iter()
						.filter(|action| match action {
							CodeActionOrCommand::CodeAction(action) => action.disabled.is_none(),
							CodeActionOrCommand::Command(_) => true,
						})
						.collect();
					if !usable.is_empty() {
						gained = true;
						item.actions = usable;
					}
				}
				Ok(None) => {}
				Err(e) => {
					debug!(error = %e, "diagnostics.code_action_failed");
				}
			}
		}

		// Nothing gained an action: re-dispatching would only churn the
		// editor's decoration diffing.
		if !gained {
			return;
		}
		if self.version() != version || token.is_cancelled() {
			return;
		}
		self.shared.emit(UiEvent::Diagnostics { version, items });
	}

	fn supports_code_action(&self) -> bool {
		self.client().capabilities().is_some_and(|caps| caps.code_action_provider.is_some())
	}

	fn supports_code_action_resolve(&self) -> bool {
		use lsp_types::CodeActionProviderCapability;
		matches!(
			self.client().capabilities().and_then(|caps| caps.code_action_provider),
			Some(CodeActionProviderCapability::Options(options)) if options.resolve_provider == Some(true)
		)
	}
}

/// Applies a code action end to end: lazily resolves the edit, checks it
/// stays within this document's world, applies it, then runs the
/// trailing command.
pub(crate) async fn apply_code_action(plugin: &DocumentPlugin, action: CodeActionOrCommand) {
	match action {
		CodeActionOrCommand::Command(command) => {
			execute_command(plugin, command).await;
		}
		CodeActionOrCommand::CodeAction(mut action) => {
			if let Some(disabled) = action.disabled {
				plugin.shared.emit(UiEvent::Notice { message: disabled.reason });
				return;
			}

			if action.edit.is_none() && plugin.supports_code_action_resolve() {
				match plugin
					.client()
					.request::<lsp_types::request::CodeActionResolveRequest>(action.clone())
					.await
				{
					Ok(resolved) => action = resolved,
					Err(e) => {
						debug!(error = %e, "diagnostics.resolve_failed");
					}
				}
			}

			if let Some(edit) = action.edit {
				if crate::workspace_edit::distinct_target_uris(&edit) > 1 {
					plugin.shared.emit(UiEvent::Notice {
						message: "This action would change other files, which is not supported here".into(),
					});
					return;
				}
				plugin.apply_workspace_edit(edit).await;
			}
			if let Some(command) = action.command {
				execute_command(plugin, command).await;
			}
		}
	}
}

async fn execute_command(plugin: &DocumentPlugin, command: lsp_types::Command) {
	let params = lsp_types::ExecuteCommandParams {
		command: command.command,
		arguments: command.arguments.unwrap_or_default(),
		work_done_progress_params: Default::default(),
	};
	if let Err(e) = plugin.client().request::<lsp_types::request::ExecuteCommand>(params).await {
		plugin.shared.emit(UiEvent::Notice {
			message: format!("Command failed: {e}"),
		});
	}
}
