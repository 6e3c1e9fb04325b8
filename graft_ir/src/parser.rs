//! Line-oriented parser for the textual LLVM-IR subset the kernel build
//! emits.
//!
//! LLVM's printer puts every module-level construct on a single line and
//! closes function bodies with a `}` in column zero, so the grammar here
//! is line-shaped: the only multi-line construct is a `define` body, which
//! is captured as raw instruction lines.

use std::fmt;

use crate::module::{Function, GlobalAlias, GlobalVariable, Linkage, Module};
use crate::text;

#[derive(Debug)]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ParseError {}

fn err(line: usize, message: impl Into<String>) -> ParseError {
    ParseError {
        line,
        message: message.into(),
    }
}

/// Parse a whole module.
pub fn parse_module(src: &str) -> Result<Module, ParseError> {
    let mut module = Module::default();
    let lines: Vec<&str> = src.lines().collect();
    let mut asm_lines: Vec<String> = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let lineno = i + 1;
        let line = lines[i].trim_end();
        i += 1;
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with(';') {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("source_filename = ") {
            module.source_filename = parse_quoted(rest, lineno)?;
        } else if trimmed.starts_with("target ") {
            module.target_lines.push(trimmed.to_string());
        } else if let Some(rest) = trimmed.strip_prefix("module asm ") {
            asm_lines.push(parse_quoted(rest, lineno)?);
        } else if trimmed.starts_with('%') {
            module.type_defs.push(trimmed.to_string());
        } else if trimmed.starts_with('$') {
            module.comdats.push(trimmed.to_string());
        } else if trimmed.starts_with("declare") {
            module
                .functions
                .push(parse_function_header(trimmed, None, lineno)?);
        } else if trimmed.starts_with("define") {
            let mut body = Vec::new();
            while i < lines.len() && lines[i].trim_end() != "}" {
                body.push(lines[i].trim_end().to_string());
                i += 1;
            }
            if i == lines.len() {
                return Err(err(lineno, "unterminated function body"));
            }
            i += 1; // consume the closing brace
            module
                .functions
                .push(parse_function_header(trimmed, Some(body), lineno)?);
        } else if trimmed.starts_with("attributes ") {
            module.attribute_groups.push(trimmed.to_string());
        } else if trimmed.starts_with('!') {
            module.metadata.push(trimmed.to_string());
        } else if trimmed.starts_with('@') {
            parse_global(&mut module, trimmed, lineno)?;
        } else {
            module.other_lines.push(trimmed.to_string());
        }
    }
    module.module_asm = asm_lines.join("\n");
    Ok(module)
}

/// Parse a leading `"..."` literal and unescape it.
fn parse_quoted(s: &str, lineno: usize) -> Result<String, ParseError> {
    let s = s.trim();
    if !s.starts_with('"') {
        return Err(err(lineno, format!("expected string literal, got `{s}`")));
    }
    match text::scan_name(s) {
        Some((value, _)) => Ok(value),
        None => Err(err(lineno, "unterminated string literal")),
    }
}

/// Keywords that may precede the `global`/`constant`/`alias` keyword and
/// that we carry verbatim.
fn is_global_prefix_keyword(tok: &str) -> bool {
    matches!(tok, "hidden" | "protected" | "unnamed_addr" | "local_unnamed_addr"
        | "thread_local" | "externally_initialized" | "dso_preemptable")
        || tok.starts_with("thread_local(")
        || tok.starts_with("addrspace(")
}

fn parse_global(module: &mut Module, line: &str, lineno: usize) -> Result<(), ParseError> {
    let (name, consumed) = text::scan_name(&line[1..])
        .ok_or_else(|| err(lineno, "malformed global name"))?;
    let tail = line[1 + consumed..]
        .trim_start()
        .strip_prefix('=')
        .ok_or_else(|| err(lineno, "expected `=` after global name"))?
        .trim_start();

    let mut linkage = Linkage::External;
    let mut dso_local = false;
    let mut prefix = Vec::new();
    let mut rest = tail;
    loop {
        let tok = rest.split_whitespace().next().unwrap_or("");
        if let Some(l) = Linkage::from_keyword(tok) {
            linkage = l;
        } else if tok == "dso_local" {
            dso_local = true;
        } else if is_global_prefix_keyword(tok) {
            prefix.push(tok.to_string());
        } else {
            break;
        }
        rest = rest[tok.len()..].trim_start();
    }

    let kind = rest.split_whitespace().next().unwrap_or("");
    match kind {
        "alias" | "ifunc" => {
            module.aliases.push(GlobalAlias {
                name,
                def: tail.to_string(),
            });
            return Ok(());
        }
        "global" | "constant" => {}
        _ => return Err(err(lineno, format!("unrecognized global kind `{kind}`"))),
    }
    let is_constant = kind == "constant";
    let rest = rest[kind.len()..].trim_start();

    let mut parts = text::split_top_level(rest, ',').into_iter();
    let head = parts.next().unwrap_or("").trim();
    let (ty, init) = split_type_prefix(head)
        .ok_or_else(|| err(lineno, format!("cannot parse global type in `{head}`")))?;
    let mut section = None;
    let mut suffix = Vec::new();
    for clause in parts {
        let clause = clause.trim();
        if let Some(sec) = clause.strip_prefix("section ") {
            section = Some(parse_quoted(sec, lineno)?);
        } else {
            suffix.push(clause.to_string());
        }
    }

    module.globals.push(GlobalVariable {
        name,
        linkage,
        dso_local,
        prefix,
        is_constant,
        ty: ty.to_string(),
        initializer: if init.is_empty() {
            None
        } else {
            Some(init.to_string())
        },
        section,
        suffix,
    });
    Ok(())
}

/// Split `"<type> <initializer>"` at the end of the type spelling.
/// Returns `(type, initializer)`; the initializer may be empty.
fn split_type_prefix(s: &str) -> Option<(&str, &str)> {
    let s = s.trim();
    let mut end = match s.chars().next()? {
        '[' | '<' | '{' => matching_bracket(s)? + 1,
        '%' => 1 + text::scan_name(&s[1..]).map(|(_, n)| n)?,
        _ => s.find(|c: char| c.is_whitespace()).unwrap_or(s.len()),
    };
    // Trailing pointer stars attach directly to the base type.
    while s[end..].starts_with('*') {
        end += 1;
    }
    // A pointer may carry an address-space qualifier.
    let after = s[end..].trim_start();
    if after.starts_with("addrspace(") {
        if let Some(close) = after.find(')') {
            end = s.len() - after.len() + close + 1;
            while s[end..].starts_with('*') {
                end += 1;
            }
        }
    }
    Some((&s[..end], s[end..].trim()))
}

/// Offset of the bracket matching the one at byte 0.
fn matching_bracket(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if in_string {
            if c == '\\' {
                i += 1;
            } else if c == '"' {
                in_string = false;
            }
        } else {
            match c {
                '"' => in_string = true,
                '(' | '[' | '{' | '<' => depth += 1,
                ')' | ']' | '}' | '>' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i);
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }
    None
}

fn parse_function_header(
    line: &str,
    body: Option<Vec<String>>,
    lineno: usize,
) -> Result<Function, ParseError> {
    let is_define = line.starts_with("define");
    let after_kw = line[if is_define { 6 } else { 7 }..].trim_start();

    let at = text::find_outside_strings(after_kw, "@")
        .ok_or_else(|| err(lineno, "function header has no name"))?;
    let mut pre = &after_kw[..at];
    let mut linkage = Linkage::External;
    let mut dso_local = false;
    loop {
        let tok = pre.split_whitespace().next().unwrap_or("");
        if let Some(l) = Linkage::from_keyword(tok) {
            linkage = l;
        } else if tok == "dso_local" {
            dso_local = true;
        } else {
            break;
        }
        pre = pre[tok.len()..].trim_start();
    }
    let ret = pre.trim().to_string();

    let (name, consumed) = text::scan_name(&after_kw[at + 1..])
        .ok_or_else(|| err(lineno, "malformed function name"))?;
    let after_name = &after_kw[at + 1 + consumed..];
    if !after_name.starts_with('(') {
        return Err(err(lineno, "expected parameter list"));
    }
    let close = matching_bracket(after_name)
        .ok_or_else(|| err(lineno, "unterminated parameter list"))?;
    let params = after_name[1..close].to_string();

    let mut attrs = after_name[close + 1..].trim().to_string();
    if body.is_some() {
        attrs = attrs
            .strip_suffix('{')
            .ok_or_else(|| err(lineno, "define line does not open a body"))?
            .trim_end()
            .to_string();
    }
    let mut section = None;
    if let Some(pos) = text::find_outside_strings(&attrs, "section \"") {
        let tail = &attrs[pos + 8..];
        let (sec, consumed) = text::scan_name(tail)
            .ok_or_else(|| err(lineno, "unterminated section name"))?;
        section = Some(sec);
        let removed = format!(
            "{}{}",
            &attrs[..pos],
            attrs[pos + 8 + consumed..].trim_start()
        );
        attrs = removed.trim().to_string();
    }

    Ok(Function {
        name,
        linkage,
        dso_local,
        ret,
        params,
        attrs,
        section,
        body,
    })
}
