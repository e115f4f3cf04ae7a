//! Conversion between LSP positions and document character offsets.
//!
//! LSP positions count UTF-16 code units by default; servers may
//! negotiate UTF-8 or UTF-32 via `positionEncoding`. Conversions run
//! against a [`ropey::Rope`] snapshot so they are valid for exactly one
//! document version.

use lsp_types::{Position, PositionEncodingKind, Range};
use ropey::Rope;

/// Character-counting scheme negotiated at initialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OffsetEncoding {
	Utf8,
	#[default]
	Utf16,
	Utf32,
}

impl OffsetEncoding {
	pub fn from_position_encoding(kind: &PositionEncodingKind) -> Option<Self> {
		match kind.as_str() {
			"utf-8" => Some(Self::Utf8),
			"utf-16" => Some(Self::Utf16),
			"utf-32" => Some(Self::Utf32),
			_ => None,
		}
	}

	pub fn to_position_encoding(self) -> PositionEncodingKind {
		match self {
			Self::Utf8 => PositionEncodingKind::UTF8,
			Self::Utf16 => PositionEncodingKind::UTF16,
			Self::Utf32 => PositionEncodingKind::UTF32,
		}
	}
}

/// Maps an LSP position to a character offset.
///
/// Characters past the end of their line clamp to the line end. Positions
/// past the last line return `None`, with one exception: the sentinel
/// `{line: line_count, character: 0}` maps to the document length so that
/// end-exclusive ranges covering the whole document resolve.
pub fn lsp_position_to_char(rope: &Rope, pos: Position, encoding: OffsetEncoding) -> Option<usize> {
	let line = pos.line as usize;
	let line_count = rope.len_lines();

	if line >= line_count {
		if line == line_count && pos.character == 0 {
			return Some(rope.len_chars());
		}
		return None;
	}

	let line_start = rope.line_to_char(line);
	let line_end = if line + 1 < line_count { rope.line_to_char(line + 1) } else { rope.len_chars() };

	let offset = match encoding {
		OffsetEncoding::Utf32 => line_start + pos.character as usize,
		OffsetEncoding::Utf8 => {
			let start_byte = rope.char_to_byte(line_start);
			let end_byte = rope.char_to_byte(line_end);
			let target = (start_byte + pos.character as usize).min(end_byte);
			rope.byte_to_char(target)
		}
		OffsetEncoding::Utf16 => {
			let start_cu = rope.char_to_utf16_cu(line_start);
			let end_cu = rope.char_to_utf16_cu(line_end);
			let target = (start_cu + pos.character as usize).min(end_cu);
			rope.utf16_cu_to_char(target)
		}
	};

	Some(offset.min(line_end))
}

/// Maps a character offset to an LSP position. Offsets past the end of the
/// document clamp to the final position.
pub fn char_to_lsp_position(rope: &Rope, char_idx: usize, encoding: OffsetEncoding) -> Position {
	let char_idx = char_idx.min(rope.len_chars());
	let line = rope.char_to_line(char_idx);
	let line_start = rope.line_to_char(line);

	let character = match encoding {
		OffsetEncoding::Utf32 => char_idx - line_start,
		OffsetEncoding::Utf8 => rope.char_to_byte(char_idx) - rope.char_to_byte(line_start),
		OffsetEncoding::Utf16 => rope.char_to_utf16_cu(char_idx) - rope.char_to_utf16_cu(line_start),
	};

	Position {
		line: line as u32,
		character: character as u32,
	}
}

/// Maps an LSP range to a character range. `None` if either endpoint is
/// outside the document.
pub fn lsp_range_to_char_range(rope: &Rope, range: Range, encoding: OffsetEncoding) -> Option<std::ops::Range<usize>> {
	let start = lsp_position_to_char(rope, range.start, encoding)?;
	let end = lsp_position_to_char(rope, range.end, encoding)?;
	Some(start.min(end)..end.max(start))
}

/// Maps a character range to an LSP range.
pub fn char_range_to_lsp_range(rope: &Rope, start: usize, end: usize, encoding: OffsetEncoding) -> Range {
	Range {
		start: char_to_lsp_position(rope, start, encoding),
		end: char_to_lsp_position(rope, end, encoding),
	}
}
