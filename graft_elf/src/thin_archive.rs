//! Symbol-position index over a thin archive.
//!
//! Input is the output of `nm -f posix --defined-only <archive>.a`: file
//! header lines of the form `<archive>.a[<path>/<obj>.o]:` followed by
//! `<name> <type> <value> [<size>]` symbol lines. The index answers the
//! livepatch `sympos` query: 0 for a symbol defined exactly once, the
//! 1-based occurrence index for duplicated symbols, -1 when unknown.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use crate::error::ElfError;

pub struct ThinArchiveIndex {
    unique: HashSet<String>,
    /// Owning files of each duplicated symbol, in listing order.
    duplicated: HashMap<String, Vec<String>>,
}

/// Parse one posix-format symbol line into `(name, type)`. Weak objects
/// (`V`) normalize to plain weak (`W`).
fn parse_symbol_line(line: &str) -> (&str, char) {
    let name_end = line.find(' ').unwrap_or(line.len());
    let name = &line[..name_end];
    let ty = line[name_end..]
        .chars()
        .find(|c| *c != ' ')
        .map(|c| c.to_ascii_uppercase())
        .unwrap_or('?');
    (name, if ty == 'V' { 'W' } else { ty })
}

/// Recognize `<archive>.a[<member>.o]:` and extract the member path.
fn archive_member(line: &str) -> Option<&str> {
    if !line.ends_with("]:") || !line.contains(".a[") {
        return None;
    }
    let open = line.find('[')?;
    let close = line.find(']')?;
    let member = &line[open + 1..close];
    if member.ends_with(".o") {
        Some(member)
    } else {
        None
    }
}

impl ThinArchiveIndex {
    pub fn load(path: impl AsRef<Path>) -> Result<ThinArchiveIndex, ElfError> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Two passes over the listing: the first finds which names are
    /// duplicated (two non-weak definitions; weak copies never disqualify
    /// uniqueness), the second assigns each duplicated name its ordered
    /// owning files.
    pub fn parse(text: &str) -> Result<ThinArchiveIndex, ElfError> {
        let mut unique: HashSet<String> = HashSet::new();
        let mut non_weak: HashSet<String> = HashSet::new();
        let mut dup: HashSet<String> = HashSet::new();
        for line in text.lines() {
            if line.is_empty() || archive_member(line).is_some() {
                continue;
            }
            let (name, ty) = parse_symbol_line(line);
            if !unique.contains(name) {
                unique.insert(name.to_string());
                if ty != 'W' {
                    non_weak.insert(name.to_string());
                }
                continue;
            }
            if ty == 'W' {
                continue;
            }
            if non_weak.contains(name) {
                dup.insert(name.to_string());
            }
            non_weak.insert(name.to_string());
        }
        for name in &dup {
            unique.remove(name);
        }

        let mut duplicated: HashMap<String, Vec<String>> = HashMap::new();
        let mut seen_pairs: HashSet<(String, String)> = HashSet::new();
        let mut current_file = "";
        for line in text.lines() {
            if line.is_empty() {
                continue;
            }
            if let Some(member) = archive_member(line) {
                current_file = member;
                continue;
            }
            let (name, _) = parse_symbol_line(line);
            if unique.contains(name) {
                continue;
            }
            if !seen_pairs.insert((name.to_string(), current_file.to_string())) {
                log::error!("sym: {name}, filename: {current_file}");
                return Err(ElfError::SameSymbolFilename);
            }
            duplicated
                .entry(name.to_string())
                .or_default()
                .push(current_file.to_string());
        }

        Ok(ThinArchiveIndex { unique, duplicated })
    }

    /// The livepatch symbol position of `symbol` as defined in `filename`:
    /// 0 when the symbol is unique in the archive, the 1-based index of
    /// `filename` among the symbol's owners when duplicated, -1 when the
    /// (symbol, file) pair is unknown.
    pub fn sympos(&self, symbol: &str, filename: &str) -> i32 {
        if self.unique.contains(symbol) {
            return 0;
        }
        if let Some(files) = self.duplicated.get(symbol) {
            for (i, f) in files.iter().enumerate() {
                if f == filename {
                    return i as i32 + 1;
                }
            }
        }
        -1
    }
}
