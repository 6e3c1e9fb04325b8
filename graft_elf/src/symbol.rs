//! Symbol iteration and the livepatch symbol-name grammars.
//!
//! Three name families flow through the fixup passes:
//!
//! - `klp.local.sym:<name>:<srcfile>` — a DSO-local global renamed by the
//!   distiller so its defining translation unit survives the link.
//! - `__llpatch_symbol_<alias>` — a wrapper-level placeholder resolved
//!   through a symbol map.
//! - `.klp.sym.<objname>.<name>,<sympos>` — the final form the kernel's
//!   livepatch loader consumes.

use object::elf::Sym64;
use object::LittleEndian as LE;

use crate::error::ElfError;
use crate::view::ElfView;

pub const KLP_SYM_PREFIX: &str = ".klp.sym.";
pub const KLP_RELA_PREFIX: &str = ".klp.rela.";
pub const KLP_LOCAL_SYM_PREFIX: &str = "klp.local.sym:";
pub const LLPATCH_SYM_PREFIX: &str = "__llpatch_symbol_";

/// Forward iterator over the symbol table, skipping the dummy entry 0.
pub struct SymbolIter<'a> {
    view: &'a ElfView,
    strtab: usize,
    index: usize,
    count: usize,
}

impl<'a> SymbolIter<'a> {
    pub fn new(view: &'a ElfView) -> Result<SymbolIter<'a>, ElfError> {
        let (_, strtab, count) = view.symtab()?;
        Ok(SymbolIter {
            view,
            strtab,
            index: 1,
            count,
        })
    }

    /// String section the symbol names live in.
    pub fn strtab(&self) -> usize {
        self.strtab
    }
}

impl Iterator for SymbolIter<'_> {
    type Item = (usize, Sym64<LE>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.count {
            return None;
        }
        let i = self.index;
        self.index += 1;
        // The bounds are pinned by the constructor; a read failure here
        // means the table changed under the iterator.
        self.view.symbol(i).ok().map(|sym| (i, sym))
    }
}

/// Name of a symbol entry, resolved through the given string section.
pub fn symbol_name(view: &ElfView, strtab: usize, sym: &Sym64<LE>) -> Result<String, ElfError> {
    view.string_at(strtab, sym.st_name.get(LE))
}

/// Split a `klp.local.sym:<name>:<srcfile>` rename into its payload.
pub fn parse_klp_local(name: &str) -> Option<(&str, &str)> {
    let rest = name.strip_prefix(KLP_LOCAL_SYM_PREFIX)?;
    let colon = rest.find(':')?;
    Some((&rest[..colon], &rest[colon + 1..]))
}

/// The alias carried by an `__llpatch_symbol_<alias>` placeholder.
pub fn llpatch_alias(name: &str) -> Option<&str> {
    name.strip_prefix(LLPATCH_SYM_PREFIX)
}

/// Compose the final livepatch symbol name. `objname` carries its trailing
/// dot (`vmlinux.` or `<modname>.`).
pub fn klp_symbol_name(objname: &str, real: &str, sympos: i32) -> String {
    format!("{KLP_SYM_PREFIX}{objname}{real},{sympos}")
}

/// Map a source path to the archive-member object path the thin archive
/// indexes: the extension is replaced by `.o`, the directory prefix stays.
pub fn archive_object_for_source(srcfile: &str) -> String {
    match srcfile.rfind('.') {
        Some(dot) => format!("{}.o", &srcfile[..dot]),
        None => format!("{srcfile}.o"),
    }
}
