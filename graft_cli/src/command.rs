//! Command-level error taxonomy.
//!
//! Every subcommand failure maps to one numeric code, and the process
//! exits with that code. Codes 1..11 belong to the command layer; ELF
//! failures pass through with their own numbering (see
//! [`graft_elf::error`]).

use std::fmt;

use graft_elf::error::{ElfError, FixupError};

#[derive(Debug)]
pub enum CommandError {
    InvalidCommand,
    NotEnoughArgs,
    InvalidLlvmFile,
    DiffFailed,
    FileOpenFailed,
    InvalidPatchFile,
    NothingToPatch,
    SymFindFailed,
    InvalidSymMap,
    AliasFindFailed,
    NoSymMap,
    Elf(ElfError),
}

impl CommandError {
    /// Process exit status for this error.
    pub fn code(&self) -> i32 {
        match self {
            CommandError::InvalidCommand => 1,
            CommandError::NotEnoughArgs => 2,
            CommandError::InvalidLlvmFile => 3,
            CommandError::DiffFailed => 4,
            CommandError::FileOpenFailed => 5,
            CommandError::InvalidPatchFile => 6,
            CommandError::NothingToPatch => 7,
            CommandError::SymFindFailed => 8,
            CommandError::InvalidSymMap => 9,
            CommandError::AliasFindFailed => 10,
            CommandError::NoSymMap => 11,
            CommandError::Elf(e) => e.code(),
        }
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            CommandError::InvalidCommand => "invalid command",
            CommandError::NotEnoughArgs => "not enough arguments",
            CommandError::InvalidLlvmFile => "invalid LLVM file",
            CommandError::DiffFailed => "diff failed",
            CommandError::FileOpenFailed => "failed to open file",
            CommandError::InvalidPatchFile => "invalid patch file",
            CommandError::NothingToPatch => "nothing to patch",
            CommandError::SymFindFailed => "symbol not found in thin archive",
            CommandError::InvalidSymMap => "invalid symbol map file",
            CommandError::AliasFindFailed => "alias not found in symbol map",
            CommandError::NoSymMap => "no symbol map file to resolve symbol alias",
            CommandError::Elf(e) => return write!(f, "{e}"),
        };
        write!(f, "livepatch: {msg}")
    }
}

impl std::error::Error for CommandError {}

impl From<ElfError> for CommandError {
    fn from(e: ElfError) -> Self {
        CommandError::Elf(e)
    }
}

impl From<FixupError> for CommandError {
    fn from(e: FixupError) -> Self {
        match e {
            FixupError::Elf(e) => CommandError::Elf(e),
            FixupError::SymbolNotFound { symbol, filename } => {
                log::error!(
                    "Symbol: {symbol}, Filename: {filename}\n\
                     Fail to find the symbol in thin archive"
                );
                CommandError::SymFindFailed
            }
            FixupError::AliasNotFound(alias) => {
                log::error!("alias: {alias}");
                CommandError::AliasFindFailed
            }
            FixupError::NoSymbolMap => CommandError::NoSymMap,
        }
    }
}
