//! Mutable view of an ELF64-LE relocatable object.
//!
//! The whole file is pulled into owned per-section buffers up front;
//! every mutating call edits those buffers and marks them dirty, and
//! [`ElfView::flush`] is the only path back to disk. A flush recomputes
//! the file layout (libelf-style) but never reorders sections, so section
//! indices observed before a flush stay valid after it.

use std::fs;
use std::path::{Path, PathBuf};

use object::elf::{
    FileHeader64, Rela64, SectionHeader64, Sym64, ELFCLASS64, ELFDATA2LSB, ELFMAG, SHF_ALLOC,
    SHF_INFO_LINK, SHT_NOBITS, SHT_RELA, SHT_SYMTAB,
};
use object::{LittleEndian as LE, U32, U64};

use crate::error::ElfError;
use crate::SHF_RELA_LIVEPATCH;

const EHDR_SIZE: usize = std::mem::size_of::<FileHeader64<LE>>();
const SHDR_SIZE: usize = std::mem::size_of::<SectionHeader64<LE>>();
const SYM_SIZE: usize = std::mem::size_of::<Sym64<LE>>();
const RELA_SIZE: usize = std::mem::size_of::<Rela64<LE>>();

struct Section {
    header: SectionHeader64<LE>,
    data: Vec<u8>,
    dirty: bool,
}

pub struct ElfView {
    path: PathBuf,
    header: FileHeader64<LE>,
    sections: Vec<Section>,
}

impl ElfView {
    /// Read `path` into an owned view. Only ELF64 little-endian
    /// relocatables are accepted.
    pub fn open(path: impl AsRef<Path>) -> Result<ElfView, ElfError> {
        let path = path.as_ref().to_path_buf();
        let data = fs::read(&path)?;
        if data.len() < EHDR_SIZE {
            return Err(ElfError::Malformed("file too short for an ELF header"));
        }
        let (header, _) = object::from_bytes::<FileHeader64<LE>>(&data[..EHDR_SIZE])
            .map_err(|()| ElfError::Malformed("unaligned ELF header"))?;
        let header = *header;
        if header.e_ident.magic != ELFMAG {
            return Err(ElfError::Malformed("not an ELF file"));
        }
        if header.e_ident.class != ELFCLASS64 || header.e_ident.data != ELFDATA2LSB {
            return Err(ElfError::Malformed("only ELF64 little-endian is supported"));
        }
        let shoff = header.e_shoff.get(LE) as usize;
        let shnum = header.e_shnum.get(LE) as usize;
        if shnum == 0 {
            return Err(ElfError::Malformed("no section header table"));
        }
        if header.e_shentsize.get(LE) as usize != SHDR_SIZE {
            return Err(ElfError::Malformed("unexpected section header size"));
        }
        let end = shoff + shnum * SHDR_SIZE;
        if end > data.len() {
            return Err(ElfError::Malformed("section header table out of bounds"));
        }
        let (headers, _) = object::slice_from_bytes::<SectionHeader64<LE>>(&data[shoff..end], shnum)
            .map_err(|()| ElfError::Malformed("unaligned section header table"))?;

        let mut sections = Vec::with_capacity(shnum);
        for shdr in headers {
            let sec_data = if shdr.sh_type.get(LE) == SHT_NOBITS {
                Vec::new()
            } else {
                let off = shdr.sh_offset.get(LE) as usize;
                let size = shdr.sh_size.get(LE) as usize;
                if off + size > data.len() {
                    return Err(ElfError::Malformed("section data out of bounds"));
                }
                data[off..off + size].to_vec()
            };
            sections.push(Section {
                header: *shdr,
                data: sec_data,
                dirty: false,
            });
        }

        Ok(ElfView {
            path,
            header,
            sections,
        })
    }

    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    fn section(&self, idx: usize) -> Result<&Section, ElfError> {
        self.sections
            .get(idx)
            .ok_or(ElfError::Malformed("section index out of range"))
    }

    /// Raw bytes of a section.
    pub fn get_section(&self, idx: usize) -> Result<&[u8], ElfError> {
        Ok(&self.section(idx)?.data)
    }

    /// A copy of a section's header.
    pub fn section_header(&self, idx: usize) -> Result<SectionHeader64<LE>, ElfError> {
        Ok(self.section(idx)?.header)
    }

    /// Replace a section's bytes and mark it dirty.
    pub fn update_section(&mut self, idx: usize, data: Vec<u8>) -> Result<(), ElfError> {
        let sec = self
            .sections
            .get_mut(idx)
            .ok_or(ElfError::Malformed("section index out of range"))?;
        sec.header.sh_size.set(LE, data.len() as u64);
        sec.data = data;
        sec.dirty = true;
        Ok(())
    }

    /// Index of the section-header string section (`e_shstrndx`).
    pub fn shstrndx(&self) -> usize {
        self.header.e_shstrndx.get(LE) as usize
    }

    /// Resolve a section's name through the section-header string table.
    pub fn section_name(&self, idx: usize) -> Result<String, ElfError> {
        let off = self.section(idx)?.header.sh_name.get(LE);
        self.string_at(self.shstrndx(), off)
    }

    /// NUL-terminated string at `offset` in string section `strndx`.
    pub fn string_at(&self, strndx: usize, offset: u32) -> Result<String, ElfError> {
        let data = &self.section(strndx)?.data;
        let start = offset as usize;
        if start > data.len() {
            return Err(ElfError::Malformed("string offset out of range"));
        }
        let end = data[start..]
            .iter()
            .position(|&b| b == 0)
            .map_or(data.len(), |p| start + p);
        Ok(String::from_utf8_lossy(&data[start..end]).into_owned())
    }

    /// The kernel module name recorded in `.modinfo` as `name=<modname>`.
    pub fn mod_name(&self) -> Result<String, ElfError> {
        let idx = (0..self.sections.len())
            .find(|&i| self.section_name(i).is_ok_and(|n| n == ".modinfo"))
            .ok_or(ElfError::Malformed("no .modinfo section"))?;
        let data = &self.sections[idx].data;
        for entry in data.split(|&b| b == 0) {
            if let Some(name) = entry.strip_prefix(b"name=") {
                return Ok(String::from_utf8_lossy(name).into_owned());
            }
        }
        Err(ElfError::Malformed("no name= entry in .modinfo"))
    }

    /// Locate the symbol table: `(section, string section, entry count)`.
    pub fn symtab(&self) -> Result<(usize, usize, usize), ElfError> {
        let idx = self
            .sections
            .iter()
            .position(|s| s.header.sh_type.get(LE) == SHT_SYMTAB)
            .ok_or(ElfError::NoSymtab)?;
        let shdr = &self.sections[idx].header;
        let entsize = shdr.sh_entsize.get(LE) as usize;
        if entsize != SYM_SIZE {
            return Err(ElfError::Malformed("unexpected symbol entry size"));
        }
        let count = shdr.sh_size.get(LE) as usize / SYM_SIZE;
        Ok((idx, shdr.sh_link.get(LE) as usize, count))
    }

    /// Decode the whole symbol table, entry 0 included.
    pub fn read_symbols(&self) -> Result<Vec<Sym64<LE>>, ElfError> {
        let (idx, _, count) = self.symtab()?;
        if count == 0 {
            return Ok(Vec::new());
        }
        let data = &self.sections[idx].data;
        let (syms, _) = object::slice_from_bytes::<Sym64<LE>>(data, count)
            .map_err(|()| ElfError::Malformed("unaligned symbol table"))?;
        Ok(syms.to_vec())
    }

    /// Install a mutated symbol table.
    pub fn write_symbols(&mut self, syms: &[Sym64<LE>]) -> Result<(), ElfError> {
        let (idx, _, _) = self.symtab()?;
        self.update_section(idx, object::bytes_of_slice(syms).to_vec())
    }

    /// One decoded symbol.
    pub fn symbol(&self, index: usize) -> Result<Sym64<LE>, ElfError> {
        let (idx, _, count) = self.symtab()?;
        if index >= count {
            return Err(ElfError::InvalidElfSymbol);
        }
        let data = &self.sections[idx].data;
        let (sym, _) =
            object::from_bytes::<Sym64<LE>>(&data[index * SYM_SIZE..(index + 1) * SYM_SIZE])
                .map_err(|()| ElfError::Malformed("unaligned symbol table"))?;
        Ok(*sym)
    }

    /// Overwrite one symbol entry in place.
    pub fn update_symbol(&mut self, index: usize, sym: Sym64<LE>) -> Result<(), ElfError> {
        let (idx, _, count) = self.symtab()?;
        if index >= count {
            return Err(ElfError::InvalidElfSymbol);
        }
        let sec = &mut self.sections[idx];
        sec.data[index * SYM_SIZE..(index + 1) * SYM_SIZE]
            .copy_from_slice(object::bytes_of(&sym));
        sec.dirty = true;
        Ok(())
    }

    /// Indices of RELA sections whose target section is ALLOC. The kernel
    /// module loader frees non-ALLOC sections before livepatch relocation
    /// applies, so the others are never livepatch-relevant.
    pub fn alloc_rela_sections(&self) -> Result<Vec<usize>, ElfError> {
        let mut out = Vec::new();
        for (i, sec) in self.sections.iter().enumerate() {
            if sec.header.sh_type.get(LE) != SHT_RELA {
                continue;
            }
            let target = sec.header.sh_info.get(LE) as usize;
            let target_flags = self.section(target)?.header.sh_flags.get(LE);
            if target_flags & SHF_ALLOC as u64 != 0 {
                out.push(i);
            }
        }
        if out.is_empty() {
            return Err(ElfError::NoRelaSection);
        }
        Ok(out)
    }

    /// `(target section, symbol table)` links of a RELA section.
    pub fn rela_links(&self, idx: usize) -> Result<(usize, usize), ElfError> {
        let shdr = &self.section(idx)?.header;
        Ok((
            shdr.sh_info.get(LE) as usize,
            shdr.sh_link.get(LE) as usize,
        ))
    }

    /// Decode the entries of a RELA section.
    pub fn rela_entries(&self, idx: usize) -> Result<Vec<Rela64<LE>>, ElfError> {
        let sec = self.section(idx)?;
        if sec.header.sh_entsize.get(LE) as usize != RELA_SIZE {
            return Err(ElfError::Malformed("unexpected rela entry size"));
        }
        let count = sec.header.sh_size.get(LE) as usize / RELA_SIZE;
        if count == 0 {
            return Ok(Vec::new());
        }
        let (entries, _) = object::slice_from_bytes::<Rela64<LE>>(&sec.data, count)
            .map_err(|()| ElfError::Malformed("unaligned rela section"))?;
        Ok(entries.to_vec())
    }

    /// Replace the entries of the RELA section targeting `target_sec_id`.
    pub fn update_rela(
        &mut self,
        target_sec_id: usize,
        entries: &[Rela64<LE>],
    ) -> Result<(), ElfError> {
        let idx = self
            .sections
            .iter()
            .position(|s| {
                s.header.sh_type.get(LE) == SHT_RELA
                    && s.header.sh_info.get(LE) as usize == target_sec_id
            })
            .ok_or(ElfError::RelaSectionNotFound)?;
        self.update_section(idx, object::bytes_of_slice(entries).to_vec())
    }

    /// Append a livepatch relocation section for `target_sec_id`.
    /// `name_offset` must already point at the section's name in the
    /// section-header string table (installed by the caller).
    pub fn create_klp_rela(
        &mut self,
        target_sec_id: usize,
        symtab_id: usize,
        name_offset: u32,
        entries: &[Rela64<LE>],
    ) -> Result<usize, ElfError> {
        let data = object::bytes_of_slice(entries).to_vec();
        let header = SectionHeader64 {
            sh_name: U32::new(LE, name_offset),
            sh_type: U32::new(LE, SHT_RELA),
            sh_flags: U64::new(LE, SHF_RELA_LIVEPATCH | (SHF_INFO_LINK | SHF_ALLOC) as u64),
            sh_addr: U64::new(LE, 0),
            sh_offset: U64::new(LE, 0),
            sh_size: U64::new(LE, data.len() as u64),
            sh_link: U32::new(LE, symtab_id as u32),
            sh_info: U32::new(LE, target_sec_id as u32),
            sh_addralign: U64::new(LE, 8),
            sh_entsize: U64::new(LE, RELA_SIZE as u64),
        };
        self.sections.push(Section {
            header,
            data,
            dirty: true,
        });
        Ok(self.sections.len() - 1)
    }

    /// Write the view back to disk, recomputing the file layout. Section
    /// indices are stable across flushes. Without dirty sections this is
    /// a no-op.
    pub fn flush(&mut self) -> Result<(), ElfError> {
        if !self.sections.iter().any(|s| s.dirty) {
            return Ok(());
        }
        let mut out = vec![0u8; EHDR_SIZE];

        for sec in self.sections.iter_mut().skip(1) {
            let align = (sec.header.sh_addralign.get(LE) as usize).max(1);
            let off = out.len().next_multiple_of(align);
            sec.header.sh_offset.set(LE, off as u64);
            if sec.header.sh_type.get(LE) != SHT_NOBITS {
                out.resize(off, 0);
                out.extend_from_slice(&sec.data);
                sec.header.sh_size.set(LE, sec.data.len() as u64);
            }
        }

        let shoff = out.len().next_multiple_of(8);
        out.resize(shoff, 0);
        self.header.e_shoff.set(LE, shoff as u64);
        self.header.e_shnum.set(LE, self.sections.len() as u16);
        self.header.e_shentsize.set(LE, SHDR_SIZE as u16);
        for sec in &self.sections {
            out.extend_from_slice(object::bytes_of(&sec.header));
        }
        out[..EHDR_SIZE].copy_from_slice(object::bytes_of(&self.header));

        fs::write(&self.path, out)?;
        for sec in &mut self.sections {
            sec.dirty = false;
        }
        Ok(())
    }
}
