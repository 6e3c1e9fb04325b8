//! Low-level helpers for LLVM assembly text: identifier grammar, string
//! escaping, and bracket/quote-aware scanning.

/// True if `name` can be printed after `@`/`%` without quoting.
///
/// LLVM's unquoted identifier grammar: `[A-Za-z$._][A-Za-z$._0-9]*`.
pub fn is_unquoted_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '$' || c == '.' || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '$' || c == '.' || c == '_')
}

/// Render a symbol name the way LLVM prints it after a sigil: bare when the
/// unquoted grammar allows, otherwise quoted with escapes.
pub fn quote_name(name: &str) -> String {
    if is_unquoted_name(name) {
        name.to_string()
    } else {
        format!("\"{}\"", escape_string(name))
    }
}

/// Escape a string for an LLVM quoted literal: `\` doubles, `"` and
/// anything non-printable become `\XX` hex pairs.
pub fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        if b == b'\\' {
            out.push_str("\\\\");
        } else if b == b'"' || !(0x20..0x7f).contains(&b) {
            out.push('\\');
            out.push_str(&format!("{b:02X}"));
        } else {
            out.push(b as char);
        }
    }
    out
}

/// Undo [`escape_string`]. Unrecognized escapes are kept verbatim, matching
/// LLVM's lenient lexer.
pub fn unescape_string(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            if i + 1 < bytes.len() && bytes[i + 1] == b'\\' {
                out.push(b'\\');
                i += 2;
                continue;
            }
            if i + 3 <= bytes.len() {
                if let Ok(v) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                    out.push(v);
                    i += 3;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Parse the identifier that starts at `s` (just past a `@` or `%` sigil).
/// Returns the decoded name and the number of input bytes consumed.
pub fn scan_name(s: &str) -> Option<(String, usize)> {
    let bytes = s.as_bytes();
    if bytes.first() == Some(&b'"') {
        let mut i = 1;
        while i < bytes.len() {
            match bytes[i] {
                b'"' => return Some((unescape_string(&s[1..i]), i + 1)),
                b'\\' if bytes.get(i + 1) == Some(&b'\\') => i += 2,
                b'\\' => i += 3,
                _ => i += 1,
            }
        }
        return None;
    }
    let mut end = 0;
    for &b in bytes {
        let c = b as char;
        if c.is_ascii_alphanumeric() || c == '$' || c == '.' || c == '_' {
            end += 1;
        } else {
            break;
        }
    }
    if end == 0 {
        None
    } else {
        Some((s[..end].to_string(), end))
    }
}

/// Split `s` at top-level occurrences of `sep`, ignoring separators inside
/// `()`, `[]`, `{}`, `<>`, and quoted strings.
pub fn split_top_level(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut start = 0;
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if in_string {
            if c == '\\' {
                i += 2;
                continue;
            }
            if c == '"' {
                in_string = false;
            }
        } else {
            match c {
                '"' => in_string = true,
                '(' | '[' | '{' | '<' => depth += 1,
                ')' | ']' | '}' | '>' => depth -= 1,
                _ if c == sep && depth == 0 => {
                    parts.push(&s[start..i]);
                    start = i + 1;
                }
                _ => {}
            }
        }
        i += 1;
    }
    parts.push(&s[start..]);
    parts
}

/// Byte offset of the first `;` outside any quoted string, if any.
pub fn find_comment_start(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut in_string = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if in_string => i += 1,
            b'"' => in_string = !in_string,
            b';' if !in_string => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}

/// Find the byte offset of `needle` in `haystack`, skipping quoted strings.
pub fn find_outside_strings(haystack: &str, needle: &str) -> Option<usize> {
    let bytes = haystack.as_bytes();
    let mut in_string = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if in_string => i += 1,
            b'"' => in_string = !in_string,
            _ if !in_string && haystack[i..].starts_with(needle) => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}
