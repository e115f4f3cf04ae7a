//! LSP snippet syntax conversion.
//!
//! Servers emit TextMate-style snippets (`$1`, `${2:placeholder}`). The
//! editor's snippet engine wants every tabstop braced, so `$n` becomes
//! `${n}`; escaped double backslashes are dropped on the way through.

/// Converts LSP snippet syntax to the editor's braced form.
pub fn to_editor_snippet(lsp: &str) -> String {
	let mut out = String::with_capacity(lsp.len());
	let mut chars = lsp.chars().peekable();

	while let Some(ch) = chars.next() {
		match ch {
			'\\' if chars.peek() == Some(&'\\') => {
				chars.next();
			}
			'$' => match chars.peek() {
				Some(c) if c.is_ascii_digit() => {
					out.push_str("${");
					while let Some(c) = chars.peek().copied() {
						if c.is_ascii_digit() {
							out.push(c);
							chars.next();
						} else {
							break;
						}
					}
					out.push('}');
				}
				_ => out.push('$'),
			},
			_ => out.push(ch),
		}
	}

	out
}

/// Strips snippet markers, leaving the literal text: `$n` and `${n}`
/// vanish, `${n:placeholder}` keeps the placeholder.
pub fn strip_markers(snippet: &str) -> String {
	let mut out = String::with_capacity(snippet.len());
	let mut chars = snippet.chars().peekable();

	while let Some(ch) = chars.next() {
		if ch != '$' {
			out.push(ch);
			continue;
		}
		match chars.peek() {
			Some(c) if c.is_ascii_digit() => {
				while chars.peek().is_some_and(|c| c.is_ascii_digit()) {
					chars.next();
				}
			}
			Some('{') => {
				chars.next();
				while chars.peek().is_some_and(|c| c.is_ascii_digit()) {
					chars.next();
				}
				if chars.peek() == Some(&':') {
					chars.next();
					let mut depth = 1usize;
					let mut inner = String::new();
					for c in chars.by_ref() {
						match c {
							'{' => {
								depth += 1;
								inner.push(c);
							}
							'}' => {
								depth -= 1;
								if depth == 0 {
									break;
								}
								inner.push(c);
							}
							_ => inner.push(c),
						}
					}
					out.push_str(&strip_markers(&inner));
				} else {
					// `${n}` or malformed; drop through the closing brace.
					for c in chars.by_ref() {
						if c == '}' {
							break;
						}
					}
				}
			}
			_ => out.push('$'),
		}
	}

	out
}
