//! Error taxonomy for the ELF layer.
//!
//! Codes `1..0xFFF` are reserved for IO and structural parse failures (the
//! range the underlying ELF library would occupy); custom codes start at
//! `0x1000`.

use std::fmt;
use std::io;

/// Base of the custom error-code range.
pub const CUSTOM_ERROR: i32 = 0x1000;

#[derive(Debug)]
pub enum ElfError {
    /// Underlying IO failure.
    Io(io::Error),
    /// Structurally invalid or unsupported ELF input.
    Malformed(&'static str),
    /// The object carries no `.symtab`.
    NoSymtab,
    /// A `__livepatch_` marker appeared somewhere other than a name prefix.
    InvalidKlpPrefix,
    /// A symbol index is out of range for the symbol table.
    InvalidElfSymbol,
    /// The object has no RELA section with an ALLOC target.
    NoRelaSection,
    /// No RELA section relocates the requested target section.
    RelaSectionNotFound,
    /// A thin archive listed the same (symbol, file) pair twice.
    SameSymbolFilename,
}

impl ElfError {
    /// Numeric code, used verbatim as the process exit status.
    pub fn code(&self) -> i32 {
        match self {
            ElfError::Io(_) | ElfError::Malformed(_) => 1,
            ElfError::NoSymtab => CUSTOM_ERROR + 1,
            ElfError::InvalidKlpPrefix => CUSTOM_ERROR + 2,
            ElfError::InvalidElfSymbol => CUSTOM_ERROR + 3,
            ElfError::NoRelaSection => CUSTOM_ERROR + 4,
            ElfError::RelaSectionNotFound => CUSTOM_ERROR + 5,
            ElfError::SameSymbolFilename => CUSTOM_ERROR + 6,
        }
    }
}

impl fmt::Display for ElfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "elf: ")?;
        match self {
            ElfError::Io(e) => write!(f, "{e}"),
            ElfError::Malformed(what) => write!(f, "{what}"),
            ElfError::NoSymtab => write!(f, "no symbol table found"),
            ElfError::InvalidKlpPrefix => write!(f, "invalid livepatch prefix"),
            ElfError::InvalidElfSymbol => write!(f, "invalid ELF symbol"),
            ElfError::NoRelaSection => write!(f, "no rela section in an ELF file"),
            ElfError::RelaSectionNotFound => write!(f, "(given) rela section cannot be found"),
            ElfError::SameSymbolFilename => {
                write!(f, "ELF contains same symbol && filename combination")
            }
        }
    }
}

impl std::error::Error for ElfError {}

impl From<io::Error> for ElfError {
    fn from(e: io::Error) -> Self {
        ElfError::Io(e)
    }
}

/// Errors from the fixup passes: ELF-layer failures plus the symbol
/// resolution failures that abort a fixup run.
#[derive(Debug)]
pub enum FixupError {
    Elf(ElfError),
    /// The thin archive cannot place a symbol.
    SymbolNotFound { symbol: String, filename: String },
    /// A symbol-map alias has no entry.
    AliasNotFound(String),
    /// An `__llpatch_symbol_` placeholder was met without a symbol map.
    NoSymbolMap,
}

impl fmt::Display for FixupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FixupError::Elf(e) => write!(f, "{e}"),
            FixupError::SymbolNotFound { symbol, filename } => write!(
                f,
                "symbol not found in thin archive (symbol: {symbol}, filename: {filename})"
            ),
            FixupError::AliasNotFound(alias) => {
                write!(f, "alias not found in symbol map: {alias}")
            }
            FixupError::NoSymbolMap => {
                write!(f, "no symbol map file to resolve symbol alias")
            }
        }
    }
}

impl std::error::Error for FixupError {}

impl From<ElfError> for FixupError {
    fn from(e: ElfError) -> Self {
        FixupError::Elf(e)
    }
}
