//! End-to-end fixup tests: synthesize a relocatable object, rewrite it in
//! place, and re-read the result.

use std::fs;
use std::path::Path;

use object::elf::{SHF_ALLOC, SHF_INFO_LINK, SHN_UNDEF, SHT_RELA};
use object::write::{Object, Relocation as ObjRelocation, Symbol, SymbolSection};
use object::{
    Architecture, BinaryFormat, Endianness, LittleEndian as LE, RelocationEncoding,
    RelocationFlags, RelocationKind, SymbolFlags, SymbolKind, SymbolScope,
};

use graft_elf::error::FixupError;
use graft_elf::fixup::{
    collect_livepatched_functions, create_klp_rela_sections, rename_klp_symbols,
    truncate_symbol_names, RenameOptions,
};
use graft_elf::thin_archive::ThinArchiveIndex;
use graft_elf::view::ElfView;
use graft_elf::{SHF_RELA_LIVEPATCH, SHN_LIVEPATCH};

fn defined_text_symbol(name: &str, value: u64, section: object::write::SectionId) -> Symbol {
    Symbol {
        name: name.as_bytes().to_vec(),
        value,
        size: 16,
        kind: SymbolKind::Text,
        scope: SymbolScope::Linkage,
        weak: false,
        section: SymbolSection::Section(section),
        flags: SymbolFlags::None,
    }
}

fn undefined_symbol(name: &str) -> Symbol {
    Symbol {
        name: name.as_bytes().to_vec(),
        value: 0,
        size: 0,
        kind: SymbolKind::Text,
        scope: SymbolScope::Unknown,
        weak: false,
        section: SymbolSection::Undefined,
        flags: SymbolFlags::None,
    }
}

fn call_reloc(offset: u64, symbol: object::write::SymbolId) -> ObjRelocation {
    ObjRelocation {
        offset,
        symbol,
        addend: -4,
        flags: RelocationFlags::Generic {
            kind: RelocationKind::PltRelative,
            encoding: RelocationEncoding::X86Branch,
            size: 32,
        },
    }
}

/// A patch object shaped like the output of compiling a distilled module:
/// one livepatched function, one local helper, and UND references to
/// `printk`, a distiller-renamed local, and `__fentry__`.
fn build_patch_object() -> Vec<u8> {
    let mut obj = Object::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);
    let text = obj.section_id(object::write::StandardSection::Text);
    obj.append_section_data(text, &[0x90u8; 32], 16);

    obj.add_symbol(defined_text_symbol("__livepatch_f:drivers/x.c", 0, text));
    let helper = obj.add_symbol(defined_text_symbol("helper", 16, text));
    let printk = obj.add_symbol(undefined_symbol("printk"));
    let counter = obj.add_symbol(undefined_symbol("klp.local.sym:counter:drivers/x.c"));
    let fentry = obj.add_symbol(undefined_symbol("__fentry__"));

    obj.add_relocation(text, call_reloc(1, printk)).unwrap();
    obj.add_relocation(text, call_reloc(5, helper)).unwrap();
    obj.add_relocation(text, call_reloc(9, counter)).unwrap();
    obj.add_relocation(text, call_reloc(13, fentry)).unwrap();

    let mut buf = Vec::new();
    obj.emit(&mut buf).expect("failed to emit test object");
    buf
}

/// A stand-in kernel module: `.modinfo` with a `name=` entry and one
/// defined symbol.
fn build_module_object() -> Vec<u8> {
    let mut obj = Object::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);
    let text = obj.section_id(object::write::StandardSection::Text);
    obj.append_section_data(text, &[0x90u8; 16], 16);
    obj.add_symbol(defined_text_symbol("local_helper", 0, text));

    let segment = obj.segment_name(object::write::StandardSegment::Data).to_vec();
    let modinfo = obj.add_section(segment, b".modinfo".to_vec(), object::SectionKind::ReadOnlyData);
    obj.append_section_data(modinfo, b"livepatch=Y\0license=GPL\0name=widget\0", 1);

    let mut buf = Vec::new();
    obj.emit(&mut buf).expect("failed to emit module object");
    buf
}

fn thin_archive() -> ThinArchiveIndex {
    ThinArchiveIndex::parse(
        "built-in.a[drivers/x.o]:\n\
         counter d 2b8 4\n\
         printk t 38f0 24\n\
         built-in.a[lib/y.o]:\n\
         counter d 100 4\n",
    )
    .unwrap()
}

/// All `(name, shndx)` pairs of an object's symbol table.
fn symbol_table(view: &ElfView) -> Vec<(String, u16)> {
    let (_, strtab, _) = view.symtab().unwrap();
    graft_elf::symbol::SymbolIter::new(view)
        .unwrap()
        .map(|(_, sym)| {
            (
                view.string_at(strtab, sym.st_name.get(LE)).unwrap(),
                sym.st_shndx.get(LE),
            )
        })
        .collect()
}

fn find_section(view: &ElfView, name: &str) -> Option<usize> {
    (0..view.section_count()).find(|&i| view.section_name(i).unwrap() == name)
}

#[test]
fn rename_pass_rewrites_und_symbols() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("klp_patch.o");
    fs::write(&path, build_patch_object()).unwrap();

    let archive = thin_archive();
    let mut view = ElfView::open(&path).unwrap();
    rename_klp_symbols(
        &mut view,
        &RenameOptions {
            thin_archive: Some(&archive),
            ..Default::default()
        },
    )
    .unwrap();
    drop(view);

    let view = ElfView::open(&path).unwrap();
    let syms = symbol_table(&view);
    let lookup = |n: &str| syms.iter().find(|(name, _)| name == n);

    // printk is unique in the archive: sympos 0, livepatch section index.
    assert_eq!(
        lookup(".klp.sym.vmlinux.printk,0").unwrap().1,
        SHN_LIVEPATCH
    );
    // counter is duplicated; drivers/x.o is its first definition.
    assert_eq!(
        lookup(".klp.sym.vmlinux.counter,1").unwrap().1,
        SHN_LIVEPATCH
    );
    // ftrace's symbol is untouched.
    assert_eq!(lookup("__fentry__").unwrap().1, SHN_UNDEF);
    // Defined symbols keep their names and sections.
    assert!(lookup("__livepatch_f:drivers/x.c").unwrap().1 != SHN_UNDEF);
    assert!(lookup("helper").is_some());

    // The rewritten object still parses with an independent reader.
    let data = fs::read(&path).unwrap();
    let _: object::read::elf::ElfFile64 =
        object::read::elf::ElfFile64::parse(&data[..]).expect("rewritten object must stay valid");
}

#[test]
fn rename_pass_without_archive_uses_sympos_zero() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("klp_patch.o");
    fs::write(&path, build_patch_object()).unwrap();

    let mut view = ElfView::open(&path).unwrap();
    rename_klp_symbols(&mut view, &RenameOptions::default()).unwrap();
    drop(view);

    let view = ElfView::open(&path).unwrap();
    let syms = symbol_table(&view);
    assert!(syms.iter().any(|(n, _)| n == ".klp.sym.vmlinux.printk,0"));
    assert!(syms.iter().any(|(n, _)| n == ".klp.sym.vmlinux.counter,0"));
}

#[test]
fn rename_pass_fails_when_archive_cannot_place_symbol() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("klp_patch.o");
    fs::write(&path, build_patch_object()).unwrap();

    // No `counter` anywhere in the listing.
    let archive = ThinArchiveIndex::parse("printk t 38f0 24\n").unwrap();
    let mut view = ElfView::open(&path).unwrap();
    let got = rename_klp_symbols(
        &mut view,
        &RenameOptions {
            thin_archive: Some(&archive),
            ..Default::default()
        },
    );
    match got {
        Err(FixupError::SymbolNotFound { symbol, filename }) => {
            assert_eq!(symbol, "counter");
            assert_eq!(filename, "drivers/x.o");
        }
        other => panic!("expected SymbolNotFound, got {other:?}"),
    }
}

#[test]
fn rename_pass_leaves_module_exported_symbols_alone() {
    let dir = tempfile::tempdir().unwrap();
    let module_path = dir.path().join("widget.ko");
    fs::write(&module_path, build_module_object()).unwrap();

    let mut obj = Object::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);
    let text = obj.section_id(object::write::StandardSection::Text);
    obj.append_section_data(text, &[0x90u8; 16], 16);
    obj.add_symbol(defined_text_symbol("__livepatch_g:widget/w.c", 0, text));
    let local = obj.add_symbol(undefined_symbol("local_helper"));
    let exported = obj.add_symbol(undefined_symbol("extern_api"));
    obj.add_relocation(text, call_reloc(1, local)).unwrap();
    obj.add_relocation(text, call_reloc(5, exported)).unwrap();
    let mut buf = Vec::new();
    obj.emit(&mut buf).unwrap();
    let patch_path = dir.path().join("klp_patch.o");
    fs::write(&patch_path, buf).unwrap();

    let mut view = ElfView::open(&patch_path).unwrap();
    rename_klp_symbols(
        &mut view,
        &RenameOptions {
            module_path: Some(Path::new(&module_path)),
            ..Default::default()
        },
    )
    .unwrap();
    drop(view);

    let view = ElfView::open(&patch_path).unwrap();
    let syms = symbol_table(&view);
    // Defined in the module: livepatched under the module's objname.
    assert!(syms
        .iter()
        .any(|(n, s)| n == ".klp.sym.widget.local_helper,0" && *s == SHN_LIVEPATCH));
    // Not defined in the module: an exported symbol, left undefined.
    assert!(syms.iter().any(|(n, s)| n == "extern_api" && *s == SHN_UNDEF));
}

#[test]
fn rela_pass_moves_klp_entries_to_new_sections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("klp_patch.o");
    fs::write(&path, build_patch_object()).unwrap();

    let archive = thin_archive();
    let mut view = ElfView::open(&path).unwrap();
    rename_klp_symbols(
        &mut view,
        &RenameOptions {
            thin_archive: Some(&archive),
            ..Default::default()
        },
    )
    .unwrap();
    create_klp_rela_sections(&mut view).unwrap();
    drop(view);

    let view = ElfView::open(&path).unwrap();
    let text = find_section(&view, ".text").unwrap();

    // The ordinary RELA section keeps only the non-klp entries, in order.
    let rela_text = find_section(&view, ".rela.text").unwrap();
    let kept = view.rela_entries(rela_text).unwrap();
    assert_eq!(kept.len(), 2);
    assert_eq!(kept[0].r_offset.get(LE), 5);
    assert_eq!(kept[1].r_offset.get(LE), 13);

    // The klp section carries the moved entries with the required shape.
    let klp = find_section(&view, ".klp.rela.vmlinux..text").unwrap();
    let shdr = view.section_header(klp).unwrap();
    assert_eq!(shdr.sh_type.get(LE), SHT_RELA);
    assert_eq!(
        shdr.sh_flags.get(LE),
        SHF_RELA_LIVEPATCH | (SHF_INFO_LINK | SHF_ALLOC) as u64
    );
    assert_eq!(shdr.sh_info.get(LE) as usize, text);
    assert_eq!(shdr.sh_addralign.get(LE), 8);
    let moved = view.rela_entries(klp).unwrap();
    assert_eq!(moved.len(), 2);
    assert_eq!(moved[0].r_offset.get(LE), 1);
    assert_eq!(moved[1].r_offset.get(LE), 9);

    // The partition is a bijection.
    assert_eq!(kept.len() + moved.len(), 4);
}

#[test]
fn rela_pass_is_noop_without_klp_references() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("klp_patch.o");
    fs::write(&path, build_patch_object()).unwrap();

    let before = {
        let view = ElfView::open(&path).unwrap();
        let rela = find_section(&view, ".rela.text").unwrap();
        (view.section_count(), view.rela_entries(rela).unwrap())
    };

    let mut view = ElfView::open(&path).unwrap();
    create_klp_rela_sections(&mut view).unwrap();
    drop(view);

    let view = ElfView::open(&path).unwrap();
    assert_eq!(view.section_count(), before.0);
    let rela = find_section(&view, ".rela.text").unwrap();
    let after = view.rela_entries(rela).unwrap();
    assert_eq!(after.len(), before.1.len());
    for (a, b) in after.iter().zip(before.1.iter()) {
        assert_eq!(a.r_offset.get(LE), b.r_offset.get(LE));
        assert_eq!(a.r_info.get(LE), b.r_info.get(LE));
        assert_eq!(a.r_addend.get(LE), b.r_addend.get(LE));
    }
    assert!(find_section(&view, ".klp.rela.vmlinux..text").is_none());
}

#[test]
fn module_name_is_read_from_modinfo() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("widget.ko");
    fs::write(&path, build_module_object()).unwrap();
    let view = ElfView::open(&path).unwrap();
    assert_eq!(view.mod_name().unwrap(), "widget");
}

#[test]
fn livepatched_functions_are_collected_and_names_truncated() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("klp_patch.o");
    fs::write(&path, build_patch_object()).unwrap();

    let mut view = ElfView::open(&path).unwrap();
    let funcs = collect_livepatched_functions(&view, "__livepatch_").unwrap();
    assert_eq!(
        funcs,
        vec![("f".to_string(), "drivers/x.c".to_string())]
    );

    truncate_symbol_names(&mut view).unwrap();
    drop(view);

    let view = ElfView::open(&path).unwrap();
    let syms = symbol_table(&view);
    assert!(syms.iter().any(|(n, _)| n == "__livepatch_f"));
    assert!(!syms.iter().any(|(n, _)| n.contains(':')));
}

#[test]
fn doubled_livepatch_marker_is_rejected() {
    let mut obj = Object::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);
    let text = obj.section_id(object::write::StandardSection::Text);
    obj.append_section_data(text, &[0x90u8; 16], 16);
    obj.add_symbol(defined_text_symbol(
        "__livepatch___livepatch_f:drivers/x.c",
        0,
        text,
    ));
    let mut buf = Vec::new();
    obj.emit(&mut buf).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("klp_patch.o");
    fs::write(&path, buf).unwrap();

    let view = ElfView::open(&path).unwrap();
    let got = collect_livepatched_functions(&view, "__livepatch_");
    assert!(matches!(
        got,
        Err(FixupError::Elf(graft_elf::error::ElfError::InvalidKlpPrefix))
    ));
}

#[test]
fn flush_preserves_sections_and_data() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("klp_patch.o");
    fs::write(&path, build_patch_object()).unwrap();

    let before = {
        let view = ElfView::open(&path).unwrap();
        (0..view.section_count())
            .map(|i| {
                (
                    view.section_name(i).unwrap(),
                    view.get_section(i).unwrap().to_vec(),
                )
            })
            .collect::<Vec<_>>()
    };

    let mut view = ElfView::open(&path).unwrap();
    view.flush().unwrap();
    drop(view);

    let view = ElfView::open(&path).unwrap();
    let after: Vec<_> = (0..view.section_count())
        .map(|i| {
            (
                view.section_name(i).unwrap(),
                view.get_section(i).unwrap().to_vec(),
            )
        })
        .collect();
    assert_eq!(before, after);
}
