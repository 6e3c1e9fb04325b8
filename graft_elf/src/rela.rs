//! Relocation-entry decoding helpers.

use object::elf::Rela64;
use object::LittleEndian as LE;

/// Symbol-table index referenced by an ELF64 RELA entry.
pub fn rela_symbol_index(entry: &Rela64<LE>) -> usize {
    (entry.r_info.get(LE) >> 32) as usize
}

/// Relocation type of an ELF64 RELA entry.
pub fn rela_type(entry: &Rela64<LE>) -> u32 {
    entry.r_info.get(LE) as u32
}
