//! The `fixup` subcommand: rewrite `klp_patch.o` for the KLP ABI.

use graft_elf::fixup::{create_klp_rela_sections, rename_klp_symbols, RenameOptions};
use graft_elf::symbol_map::SymbolMap;
use graft_elf::thin_archive::ThinArchiveIndex;
use graft_elf::view::ElfView;

use crate::command::CommandError;
use crate::FixupArgs;

pub fn run(args: &FixupArgs) -> Result<(), CommandError> {
    let mut view = ElfView::open(&args.klp_patch)?;
    if args.rela {
        create_klp_rela_sections(&mut view)?;
        return Ok(());
    }

    let thin_archive = args
        .thin_archive
        .as_deref()
        .map(ThinArchiveIndex::load)
        .transpose()?;
    let symbol_map = args
        .symbol_map
        .as_deref()
        .map(SymbolMap::load)
        .transpose()
        .map_err(|e| {
            log::error!("{e}");
            CommandError::InvalidSymMap
        })?;

    rename_klp_symbols(
        &mut view,
        &RenameOptions {
            module_path: args.r#mod.as_deref(),
            thin_archive: thin_archive.as_ref(),
            symbol_map: symbol_map.as_ref(),
        },
    )?;
    Ok(())
}
