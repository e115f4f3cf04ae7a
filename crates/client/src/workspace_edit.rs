//! Workspace edit application.
//!
//! Edits for the current document become one host transaction, sorted by
//! range start descending so earlier offsets survive application. Edits
//! for other documents and file create/rename/delete operations are
//! surfaced to the host, never executed here.

use std::collections::HashSet;

use lsp_types::{DocumentChangeOperation, DocumentChanges, OneOf, TextDocumentEdit, TextEdit, Uri, WorkspaceEdit};
use moor_lsp::lsp_range_to_char_range;
use tracing::warn;

use crate::document::{DocumentPlugin, UiEvent};

/// One replacement in current-document char offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEdit {
	pub range: std::ops::Range<usize>,
	pub text: String,
}

/// File operation surfaced from a workspace edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceOp {
	Create { uri: Uri },
	Rename { old_uri: Uri, new_uri: Uri },
	Delete { uri: Uri },
}

/// Counts the distinct URIs a workspace edit touches, preferring
/// `documentChanges` like application does.
pub fn distinct_target_uris(edit: &WorkspaceEdit) -> usize {
	let mut uris: HashSet<&str> = HashSet::new();
	if let Some(changes) = &edit.document_changes {
		match changes {
			DocumentChanges::Edits(edits) => {
				uris.extend(edits.iter().map(|e| e.text_document.uri.as_str()));
			}
			DocumentChanges::Operations(ops) => {
				for op in ops {
					match op {
						DocumentChangeOperation::Edit(edit) => {
							uris.insert(edit.text_document.uri.as_str());
						}
						DocumentChangeOperation::Op(lsp_types::ResourceOp::Create(create)) => {
							uris.insert(create.uri.as_str());
						}
						DocumentChangeOperation::Op(lsp_types::ResourceOp::Rename(rename)) => {
							uris.insert(rename.old_uri.as_str());
							uris.insert(rename.new_uri.as_str());
						}
						DocumentChangeOperation::Op(lsp_types::ResourceOp::Delete(delete)) => {
							uris.insert(delete.uri.as_str());
						}
					}
				}
			}
		}
	} else if let Some(changes) = &edit.changes {
		uris.extend(changes.keys().map(|uri| uri.as_str()));
	}
	uris.len()
}

impl DocumentPlugin {
	/// Applies a [`WorkspaceEdit`], preferring `documentChanges` over
	/// `changes` when both are present.
	pub async fn apply_workspace_edit(&self, edit: WorkspaceEdit) {
		let own_uri = self.uri();
		let mut local: Vec<TextEdit> = Vec::new();
		let mut foreign: Vec<(Uri, Vec<TextEdit>)> = Vec::new();
		let mut ops: Vec<ResourceOp> = Vec::new();

		if let Some(changes) = edit.document_changes {
			match changes {
				DocumentChanges::Edits(edits) => {
					for doc_edit in edits {
						self.partition_document_edit(doc_edit, &own_uri, &mut local, &mut foreign);
					}
				}
				DocumentChanges::Operations(operations) => {
					for op in operations {
						match op {
							DocumentChangeOperation::Edit(doc_edit) => {
								self.partition_document_edit(doc_edit, &own_uri, &mut local, &mut foreign);
							}
							DocumentChangeOperation::Op(lsp_types::ResourceOp::Create(create)) => {
								ops.push(ResourceOp::Create { uri: create.uri });
							}
							DocumentChangeOperation::Op(lsp_types::ResourceOp::Rename(rename)) => {
								ops.push(ResourceOp::Rename {
									old_uri: rename.old_uri,
									new_uri: rename.new_uri,
								});
							}
							DocumentChangeOperation::Op(lsp_types::ResourceOp::Delete(delete)) => {
								ops.push(ResourceOp::Delete { uri: delete.uri });
							}
						}
					}
				}
			}
		} else if let Some(changes) = edit.changes {
			for (uri, edits) in changes {
				if uri == own_uri {
					local.extend(edits);
				} else {
					foreign.push((uri, edits));
				}
			}
		}

		if !local.is_empty() {
			self.apply_local_edits(local);
		}
		for (uri, edits) in foreign {
			self.shared.emit(UiEvent::ForeignEdit { uri, edits });
		}
		for op in ops {
			self.shared.emit(UiEvent::ResourceOp { op });
		}
	}

	fn partition_document_edit(&self, doc_edit: TextDocumentEdit, own_uri: &Uri, local: &mut Vec<TextEdit>, foreign: &mut Vec<(Uri, Vec<TextEdit>)>) {
		// A versioned edit against a text the server has not seen would
		// land at the wrong offsets; drop the document's slice.
		if let Some(version) = doc_edit.text_document.version
			&& doc_edit.text_document.uri == *own_uri
			&& version != self.version()
		{
			warn!(uri = %doc_edit.text_document.uri.as_str(), version, current = self.version(), "workspace_edit.drop_stale");
			return;
		}

		let edits: Vec<TextEdit> = doc_edit
			.edits
			.into_iter()
			.map(|edit| match edit {
				OneOf::Left(edit) => edit,
				OneOf::Right(annotated) => annotated.text_edit,
			})
			.collect();

		if doc_edit.text_document.uri == *own_uri {
			local.extend(edits);
		} else {
			foreign.push((doc_edit.text_document.uri, edits));
		}
	}

	/// Converts and emits current-document edits as one transaction.
	fn apply_local_edits(&self, edits: Vec<TextEdit>) {
		let rope = self.text();
		let encoding = self.client().offset_encoding();

		let mut host_edits = Vec::with_capacity(edits.len());
		for edit in edits {
			let Some(range) = lsp_range_to_char_range(&rope, edit.range, encoding) else {
				self.shared.emit(UiEvent::Notice {
					message: "Edit range no longer maps into the document".into(),
				});
				return;
			};
			host_edits.push(HostEdit {
				range,
				text: edit.new_text,
			});
		}

		host_edits.sort_by(|a, b| b.range.start.cmp(&a.range.start).then(b.range.end.cmp(&a.range.end)));

		for pair in host_edits.windows(2) {
			// Descending order: pair[1] precedes pair[0] in the document.
			if pair[1].range.end > pair[0].range.start {
				self.shared.emit(UiEvent::Notice {
					message: "Overlapping edits in workspace edit".into(),
				});
				return;
			}
		}

		self.shared.emit(UiEvent::ApplyEdits { edits: host_edits });
	}
}
