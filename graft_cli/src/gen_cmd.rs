//! The `gen` subcommand: emit the wrapper artifacts and normalize the
//! patch object's symbol names for the final link.

use log::error;

use graft_elf::fixup::{collect_livepatched_functions, truncate_symbol_names};
use graft_elf::thin_archive::ThinArchiveIndex;
use graft_elf::view::ElfView;
use graft_ir::distill::LIVEPATCH_PREFIX;

use crate::command::CommandError;
use crate::{wrapper, GenArgs};

pub fn run(args: &GenArgs) -> Result<(), CommandError> {
    let mut view = ElfView::open(&args.klp_patch)?;

    let funcs = collect_livepatched_functions(&view, LIVEPATCH_PREFIX)?;
    if funcs.is_empty() {
        error!("There are no livepatched functions.");
        return Err(CommandError::NothingToPatch);
    }

    let mod_name = match &args.r#mod {
        Some(path) => Some(ElfView::open(path)?.mod_name()?),
        None => None,
    };
    let thin_archive = args
        .thin_archive
        .as_deref()
        .map(ThinArchiveIndex::load)
        .transpose()?;

    wrapper::emit_wrapper(
        &args.odir,
        &funcs,
        mod_name.as_deref(),
        thin_archive.as_ref(),
    )?;
    wrapper::emit_ld_script(&args.odir, &funcs)?;
    wrapper::emit_makefile(&args.odir, &args.kdir, &args.name)?;

    truncate_symbol_names(&mut view)?;
    Ok(())
}
