//! Command-line driver for kernel livepatch generation.
//!
//! Subcommands mirror the pipeline stages: `diff` distills two IR files,
//! `fixup` rewrites the compiled patch object for the KLP ABI, `gen`
//! emits the wrapper source artifacts, and `align` pads source files so
//! `__LINE__` stays stable across a patch. Exit status is the numeric
//! error-code value; 0 is success.

mod align_cmd;
mod command;
mod diff_cmd;
mod fixup_cmd;
mod gen_cmd;
mod wrapper;


use std::path::PathBuf;
use std::process::exit;

use clap::error::ErrorKind;
use clap::{Args, Parser, Subcommand};

use command::CommandError;

#[derive(Parser)]
#[command(
    name = "graft",
    about = "Utility for kernel livepatch generation",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Diff two LLVM IR files and output a new LLVM IR file that distills
    /// changed/new functions and global variables
    Diff(DiffArgs),
    /// Rename UND symbols and create a relocation section for klp
    Fixup(FixupArgs),
    /// Generate livepatch wrapper, makefile, and linker script
    Gen(GenArgs),
    /// Align __LINE__ for original.c and patched.c for a given .patch by
    /// adding empty lines
    Align(AlignArgs),
}

#[derive(Args)]
struct DiffArgs {
    /// Quiet mode. don't output diffed functions
    #[arg(short, long)]
    quiet: bool,
    /// The base directory for the diffed files
    #[arg(short, long, value_name = "BASE_DIR", default_value = "")]
    base_dir: String,
    original_ll: PathBuf,
    patched_ll: PathBuf,
}

#[derive(Args)]
struct FixupArgs {
    /// Path to kernel module. For vmlinux, don't specify
    #[arg(short, long, value_name = "MOD")]
    r#mod: Option<PathBuf>,
    /// Symbol map file for LLpatch symbols in livepatch wrapper
    #[arg(short, long, value_name = "SYMBOL_MAP")]
    symbol_map: Option<PathBuf>,
    /// Thin archive file for kernel module or vmlinux
    #[arg(short, long, value_name = "THIN_ARCHIVE")]
    thin_archive: Option<PathBuf>,
    /// Create relocation section for KLP
    #[arg(short, long)]
    rela: bool,
    /// Don't print out any messages on fixup
    #[arg(short, long)]
    quiet: bool,
    klp_patch: PathBuf,
}

#[derive(Args)]
struct GenArgs {
    /// Path to output dir
    #[arg(short, long, value_name = "ODIR")]
    odir: PathBuf,
    /// Path to kernel dir
    #[arg(short, long, value_name = "KDIR")]
    kdir: PathBuf,
    /// KLP module name
    #[arg(short, long, value_name = "NAME")]
    name: String,
    /// Path to kernel module. for vmlinux, don't specify
    #[arg(short, long, value_name = "MOD")]
    r#mod: Option<PathBuf>,
    /// Thin archive file for kernel module or vmlinux
    #[arg(short, long, value_name = "THIN_ARCHIVE")]
    thin_archive: Option<PathBuf>,
    klp_patch: PathBuf,
}

#[derive(Args)]
struct AlignArgs {
    /// Filename for diffed file
    #[arg(short, long, value_name = "DIFFED_FILE")]
    diffed_file: String,
    /// Patch file
    #[arg(short, long, value_name = "PATCH")]
    patch: PathBuf,
    /// Suffix for output file
    #[arg(short, long, value_name = "SUFFIX", default_value = "__aligned")]
    suffix: String,
    original_c: PathBuf,
    patched_c: PathBuf,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => match e.kind() {
            ErrorKind::InvalidSubcommand | ErrorKind::UnknownArgument => {
                let _ = e.print();
                exit(CommandError::InvalidCommand.code());
            }
            ErrorKind::MissingRequiredArgument | ErrorKind::MissingSubcommand => {
                let _ = e.print();
                exit(CommandError::NotEnoughArgs.code());
            }
            // --help / --version and the help subcommand exit 0 here.
            _ => e.exit(),
        },
    };

    let quiet = match &cli.command {
        Command::Diff(args) => args.quiet,
        Command::Fixup(args) => args.quiet,
        _ => false,
    };
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if quiet { "error" } else { "info" }),
    )
    .format_timestamp(None)
    .init();

    let result = match cli.command {
        Command::Diff(args) => diff_cmd::run(&args),
        Command::Fixup(args) => fixup_cmd::run(&args),
        Command::Gen(args) => gen_cmd::run(&args),
        Command::Align(args) => align_cmd::run(&args),
    };
    if let Err(err) = result {
        eprintln!("{err}");
        exit(err.code());
    }
}
