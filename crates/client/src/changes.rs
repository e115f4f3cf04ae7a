//! Host edit batches and their translation to LSP content changes.

use lsp_types::TextDocumentContentChangeEvent;
use moor_lsp::{OffsetEncoding, char_range_to_lsp_range, lsp_range_to_char_range};
use ropey::Rope;

/// One replacement against the pre-change document, in char offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentChange {
	pub range: std::ops::Range<usize>,
	pub text: String,
}

impl DocumentChange {
	pub fn insert(at: usize, text: impl Into<String>) -> Self {
		Self {
			range: at..at,
			text: text.into(),
		}
	}

	pub fn replace(range: std::ops::Range<usize>, text: impl Into<String>) -> Self {
		Self {
			range,
			text: text.into(),
		}
	}
}

/// Applies a batch of pre-state changes, highest range first so earlier
/// offsets stay valid.
pub fn apply_changes(pre: &Rope, changes: &[DocumentChange]) -> Rope {
	let mut sorted: Vec<&DocumentChange> = changes.iter().collect();
	sorted.sort_by(|a, b| b.range.start.cmp(&a.range.start).then(b.range.end.cmp(&a.range.end)));

	let mut rope = pre.clone();
	for change in sorted {
		let start = change.range.start.min(rope.len_chars());
		let end = change.range.end.min(rope.len_chars());
		rope.remove(start..end);
		if !change.text.is_empty() {
			rope.insert(start, &change.text);
		}
	}
	rope
}

/// Translates a batch into LSP content changes, emitted in reverse
/// position order so sequential application against the pre-state stays
/// valid.
pub fn to_content_changes(pre: &Rope, changes: &[DocumentChange], encoding: OffsetEncoding) -> Vec<TextDocumentContentChangeEvent> {
	let mut sorted: Vec<&DocumentChange> = changes.iter().collect();
	sorted.sort_by(|a, b| b.range.start.cmp(&a.range.start).then(b.range.end.cmp(&a.range.end)));

	sorted
		.into_iter()
		.filter(|change| !(change.range.is_empty() && change.text.is_empty()))
		.map(|change| TextDocumentContentChangeEvent {
			range: Some(char_range_to_lsp_range(pre, change.range.start, change.range.end, encoding)),
			range_length: None,
			text: change.text.clone(),
		})
		.collect()
}

/// Applies LSP content changes in order. Used by tests to check the
/// incremental-sync property and by fakes standing in for a server.
pub fn apply_content_changes(rope: &mut Rope, events: &[TextDocumentContentChangeEvent], encoding: OffsetEncoding) -> Option<()> {
	for event in events {
		match event.range {
			Some(range) => {
				let chars = lsp_range_to_char_range(rope, range, encoding)?;
				rope.remove(chars.clone());
				if !event.text.is_empty() {
					rope.insert(chars.start, &event.text);
				}
			}
			None => {
				*rope = Rope::from(event.text.as_str());
			}
		}
	}
	Some(())
}
