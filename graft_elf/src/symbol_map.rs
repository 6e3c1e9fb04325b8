//! Alias table for wrapper-level symbol placeholders.
//!
//! The symbol-map generator emits one entry per line:
//!
//! ```text
//! <mod_name> <path_to_c_file> <symbol> <alias>
//! test_klp kernel/livepatch/test/test-attr-apple.c fruit apple_fruit
//! ```
//!
//! Fixup resolves each `__llpatch_symbol_<alias>` placeholder through this
//! table to the real `(mod, path, symbol)` triple.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct SymbolMapEntry {
    pub mod_name: String,
    pub path: String,
    pub symbol: String,
}

#[derive(Debug)]
pub struct SymbolMapError {
    pub line: usize,
}

impl fmt::Display for SymbolMapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid symbol map file (line {})", self.line)
    }
}

impl std::error::Error for SymbolMapError {}

pub struct SymbolMap {
    entries: HashMap<String, SymbolMapEntry>,
}

impl SymbolMap {
    pub fn load(path: impl AsRef<Path>) -> Result<SymbolMap, SymbolMapError> {
        let text = fs::read_to_string(path).map_err(|_| SymbolMapError { line: 0 })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<SymbolMap, SymbolMapError> {
        let mut entries = HashMap::new();
        for (i, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let &[mod_name, path, symbol, alias] = tokens.as_slice() else {
                return Err(SymbolMapError { line: i + 1 });
            };
            entries.insert(
                alias.to_string(),
                SymbolMapEntry {
                    mod_name: mod_name.to_string(),
                    path: path.to_string(),
                    symbol: symbol.to_string(),
                },
            );
        }
        Ok(SymbolMap { entries })
    }

    pub fn query(&self, alias: &str) -> Option<&SymbolMapEntry> {
        self.entries.get(alias)
    }
}
