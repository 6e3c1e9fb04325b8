//! The two fixup passes over `klp_patch.o`, plus the symbol cleanups the
//! wrapper generation stage needs.
//!
//! Mode A ([`rename_klp_symbols`]) rewrites undefined symbols into the
//! `.klp.sym.<objname>.<name>,<sympos>` form and moves them to the
//! reserved livepatch section index. Mode B
//! ([`create_klp_rela_sections`]) partitions the relocation entries of
//! every ALLOC-target RELA section and synthesizes the
//! `.klp.rela.<objname>.<target>` sections the kernel loader applies at
//! patch time.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use log::info;
use object::elf::{Rela64, SHN_UNDEF};
use object::LittleEndian as LE;

use crate::error::{ElfError, FixupError};
use crate::rela::rela_symbol_index;
use crate::symbol::{
    archive_object_for_source, klp_symbol_name, llpatch_alias, parse_klp_local, symbol_name,
    KLP_RELA_PREFIX, KLP_SYM_PREFIX,
};
use crate::symbol_map::SymbolMap;
use crate::thin_archive::ThinArchiveIndex;
use crate::view::ElfView;
use crate::SHN_LIVEPATCH;

const VMLINUX_OBJ: &str = "vmlinux.";
const FENTRY: &str = "__fentry__";

/// Inputs of fixup mode A.
#[derive(Default)]
pub struct RenameOptions<'a> {
    /// Target kernel module; `None` means the patch targets vmlinux.
    pub module_path: Option<&'a Path>,
    pub thin_archive: Option<&'a ThinArchiveIndex>,
    pub symbol_map: Option<&'a SymbolMap>,
}

/// Mode A: walk the symbol table, rename every livepatch-resolved UND
/// symbol, and rebuild the symbol string section from scratch.
pub fn rename_klp_symbols(view: &mut ElfView, opts: &RenameOptions) -> Result<(), FixupError> {
    // Names defined by the target module; an UND symbol absent from this
    // set is module-exported and must stay an ordinary relocation.
    let mut mod_symbols: HashSet<String> = HashSet::new();
    let mut objname = String::from(VMLINUX_OBJ);
    if let Some(path) = opts.module_path {
        let mod_view = ElfView::open(path)?;
        let iter = crate::symbol::SymbolIter::new(&mod_view)?;
        let strtab = iter.strtab();
        for (_, sym) in iter {
            if sym.st_shndx.get(LE) != SHN_UNDEF {
                mod_symbols.insert(symbol_name(&mod_view, strtab, &sym)?);
            }
        }
        objname = format!("{}.", mod_view.mod_name()?);
    }

    let (_, strtab_sec, _) = view.symtab()?;
    let mut syms = view.read_symbols()?;

    // The dummy entry 0 keeps name offset 0, so the fresh string section
    // starts with a single NUL.
    let mut names: Vec<u8> = vec![0];
    let mut rename = |sym: &mut object::elf::Sym64<LE>, name: &str| {
        sym.st_name.set(LE, names.len() as u32);
        names.extend_from_slice(name.as_bytes());
        names.push(0);
    };

    for sym in syms.iter_mut().skip(1) {
        let name = view.string_at(strtab_sec, sym.st_name.get(LE))?;

        // __fentry__ belongs to ftrace; leave it alone even though it is
        // undefined.
        if sym.st_shndx.get(LE) != SHN_UNDEF || name == FENTRY {
            rename(sym, &name);
            continue;
        }

        let mut real = name.clone();
        let mut srcfile = String::new();
        let mut obj = objname.clone();

        if let Some(map) = opts.symbol_map {
            // With a map, only wrapper placeholders become KLP symbols.
            let Some(alias) = llpatch_alias(&name) else {
                rename(sym, &real);
                continue;
            };
            let entry = map
                .query(alias)
                .ok_or_else(|| FixupError::AliasNotFound(alias.to_string()))?;
            real = entry.symbol.clone();
            srcfile = entry.path.clone();
            obj = format!("{}.", entry.mod_name);
        } else {
            if llpatch_alias(&name).is_some() {
                return Err(FixupError::NoSymbolMap);
            }
            if let Some((r, s)) = parse_klp_local(&name) {
                real = r.to_string();
                srcfile = s.to_string();
            }
            if obj != VMLINUX_OBJ && !mod_symbols.contains(&real) {
                rename(sym, &real);
                continue;
            }
        }

        sym.st_shndx.set(LE, SHN_LIVEPATCH);

        let mut pos = 0i32;
        if let Some(archive) = opts.thin_archive {
            let filename = archive_object_for_source(&srcfile);
            pos = archive.sympos(&real, &filename);
            if pos < 0 {
                return Err(FixupError::SymbolNotFound {
                    symbol: real,
                    filename,
                });
            }
        }

        let klp_name = klp_symbol_name(&obj, &real, pos);
        info!("KLP symbol: {real} -> {klp_name}");
        rename(sym, &klp_name);
    }

    view.write_symbols(&syms)?;
    view.update_section(strtab_sec, names)?;
    view.flush()?;
    Ok(())
}

/// Mode B: split every ALLOC-target RELA section into ordinary entries
/// (which stay) and `.klp.sym.*` entries (which move to fresh
/// `.klp.rela.<objname>.<target>` sections).
pub fn create_klp_rela_sections(view: &mut ElfView) -> Result<(), FixupError> {
    let rela_secs = view.alloc_rela_sections()?;

    let mut normal: HashMap<usize, Vec<Rela64<LE>>> = HashMap::new();
    // Ordered map: section creation order must be deterministic.
    let mut klp: BTreeMap<(String, usize), Vec<Rela64<LE>>> = BTreeMap::new();
    let mut symtab_for: HashMap<usize, usize> = HashMap::new();
    let mut livepatched_syms: Vec<usize> = Vec::new();

    let (_, strtab, _) = view.symtab()?;
    for sec in rela_secs {
        let (target, symtab) = view.rela_links(sec)?;
        // Every visited section gets a (possibly empty) surviving set, so
        // a fully-livepatched section is shrunk rather than left stale.
        normal.entry(target).or_default();
        for entry in view.rela_entries(sec)? {
            let sym_idx = rela_symbol_index(&entry);
            let sym = view.symbol(sym_idx)?;
            let name = view.string_at(strtab, sym.st_name.get(LE))?;
            if let Some(rest) = name.strip_prefix(KLP_SYM_PREFIX) {
                let obj = match rest.find('.') {
                    Some(dot) => &rest[..dot],
                    None => rest,
                };
                info!("klp symbol[{obj}] :: section {target}, symbol {name}");
                livepatched_syms.push(sym_idx);
                klp.entry((obj.to_string(), target)).or_default().push(entry);
                symtab_for.insert(target, symtab);
            } else {
                normal.get_mut(&target).unwrap().push(entry);
            }
        }
    }

    for sym_idx in livepatched_syms {
        let mut sym = view.symbol(sym_idx)?;
        sym.st_shndx.set(LE, SHN_LIVEPATCH);
        view.update_symbol(sym_idx, sym)?;
    }

    for (target, entries) in &normal {
        view.update_rela(*target, entries)?;
    }
    // Settle the shrunken sections before appending new ones, so section
    // indices observed below are the on-disk ones.
    view.flush()?;

    let shstrndx = view.shstrndx();
    let mut shstr = view.get_section(shstrndx)?.to_vec();
    for ((obj, target), entries) in &klp {
        let name = format!("{KLP_RELA_PREFIX}{obj}.{}", view.section_name(*target)?);
        view.create_klp_rela(*target, symtab_for[target], shstr.len() as u32, entries)?;
        info!("KLP rela section::{name}");
        shstr.extend_from_slice(name.as_bytes());
        shstr.push(0);
    }
    view.update_section(shstrndx, shstr)?;
    view.flush()?;
    Ok(())
}

/// Livepatched function names and their source files, read from the
/// `__livepatch_<func>:<srcfile>` symbols of the patch object.
///
/// An empty result is not an error here; callers decide whether a patch
/// without livepatched functions is fatal.
pub fn collect_livepatched_functions(
    view: &ElfView,
    prefix: &str,
) -> Result<Vec<(String, String)>, FixupError> {
    let iter = crate::symbol::SymbolIter::new(view)?;
    let strtab = iter.strtab();
    let mut out = Vec::new();
    for (_, sym) in iter {
        let name = symbol_name(view, strtab, &sym)?;
        if name.is_empty() || !name.starts_with(prefix) {
            continue;
        }
        if name[1..].contains(prefix) {
            // The marker may only appear as a name prefix; a second
            // occurrence means a mangled input object.
            log::error!("symbol name: {name}");
            return Err(FixupError::Elf(ElfError::InvalidKlpPrefix));
        }
        let rest = &name[prefix.len()..];
        let (func, src) = match rest.find(':') {
            Some(colon) => (&rest[..colon], &rest[colon + 1..]),
            None => (rest, ""),
        };
        out.push((func.to_string(), src.to_string()));
    }
    Ok(out)
}

/// Truncate every symbol name at its first `:`, dropping the source-file
/// payload the diff stage attached. Run once before the final link so the
/// linker script's `livepatch_<fn> = __livepatch_<fn>;` lines resolve.
pub fn truncate_symbol_names(view: &mut ElfView) -> Result<(), FixupError> {
    let (_, strtab_sec, _) = view.symtab()?;
    let mut syms = view.read_symbols()?;
    let mut names: Vec<u8> = vec![0];
    for sym in syms.iter_mut().skip(1) {
        let name = view.string_at(strtab_sec, sym.st_name.get(LE))?;
        let short = match name.find(':') {
            Some(colon) => &name[..colon],
            None => &name[..],
        };
        sym.st_name.set(LE, names.len() as u32);
        names.extend_from_slice(short.as_bytes());
        names.push(0);
    }
    view.write_symbols(&syms)?;
    view.update_section(strtab_sec, names)?;
    view.flush()?;
    Ok(())
}
