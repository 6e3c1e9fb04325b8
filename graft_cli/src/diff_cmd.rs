//! The `diff` subcommand: distill two IR files into a patch module.

use std::fs;

use log::error;

use graft_ir::diff::{DiffConsumer, DiffEngine, DiffError, PrintingConsumer, QuietConsumer};
use graft_ir::distill::distill;
use graft_ir::module::Module;
use graft_ir::parser::parse_module;

use crate::command::CommandError;
use crate::DiffArgs;

fn load_module(path: &std::path::Path, which: &str) -> Result<Module, CommandError> {
    let text = fs::read_to_string(path).map_err(|e| {
        error!("{which} file is not valid LLVM: {e}");
        CommandError::InvalidLlvmFile
    })?;
    parse_module(&text).map_err(|e| {
        error!("{which} file is not valid LLVM: {e}");
        CommandError::InvalidLlvmFile
    })
}

pub fn run(args: &DiffArgs) -> Result<(), CommandError> {
    let original = load_module(&args.original_ll, "Original")?;
    let mut patched = load_module(&args.patched_ll, "Patched")?;

    let mut quiet_consumer = QuietConsumer::new();
    let mut printing_consumer = PrintingConsumer::new();
    let consumer: &mut dyn DiffConsumer = if args.quiet {
        &mut quiet_consumer
    } else {
        &mut printing_consumer
    };

    let classes = DiffEngine::new(consumer)
        .classify(&original, &patched)
        .map_err(|e| match e {
            DiffError::NothingToPatch => {
                println!("All functions are same but no new functions. Nothing to patch.");
                CommandError::NothingToPatch
            }
        })?;

    distill(&original, &mut patched, &classes, &args.base_dir);

    let out_path = format!("{}__klp_diff.ll", patched.source_filename);
    fs::write(&out_path, patched.to_string()).map_err(|e| {
        error!("cannot write {out_path}: {e}");
        CommandError::FileOpenFailed
    })?;
    Ok(())
}
