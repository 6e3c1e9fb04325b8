//! The `align` subcommand.
//!
//! A source patch that inserts or removes lines shifts every `__LINE__`
//! expansion after the change, which shows up as spurious IR diffs. This
//! command pads `original.c` and `patched.c` with empty lines so both
//! files keep their line numbers aligned after each hunk.

use std::fs;
use std::path::Path;

use log::error;

use crate::command::CommandError;
use crate::AlignArgs;

/// One hunk side: line offset (made relative to the previous hunk) and
/// the number of lines it spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hunk {
    pub offset: usize,
    pub lines: usize,
}

/// Parse `-37,16` / `+37` hunk coordinates. A missing count means 1.
fn parse_hunk_pair(token: &str) -> Result<Hunk, CommandError> {
    if token.len() < 2 || !token.starts_with(['-', '+']) {
        return Err(CommandError::InvalidPatchFile);
    }
    let body = &token[1..];
    let (offset, lines) = match body.split_once(',') {
        Some((o, l)) => (o, l),
        None => (body, "1"),
    };
    let offset = offset.parse().map_err(|_| CommandError::InvalidPatchFile)?;
    let lines = lines.parse().map_err(|_| CommandError::InvalidPatchFile)?;
    Ok(Hunk { offset, lines })
}

/// Absolute hunk offsets become offsets relative to the previous hunk, so
/// the copy loop can run on an already-padded stream.
fn make_offsets_relative(hunks: &mut [Hunk]) {
    let mut last = 0;
    for h in hunks.iter_mut() {
        let absolute = h.offset;
        h.offset = absolute - last;
        last = absolute;
    }
}

/// Parse the `.patch` file. Returns the hunk list for the original side,
/// the patched side, and the per-hunk count of leading context lines.
pub fn parse_patch_file(
    patch: &Path,
    diffed_file: &str,
) -> Result<(Vec<Hunk>, Vec<Hunk>, Vec<usize>), CommandError> {
    let text = fs::read_to_string(patch).map_err(|e| {
        error!("filename: {}: {e}", patch.display());
        CommandError::FileOpenFailed
    })?;
    let lines: Vec<&str> = text.lines().collect();

    let mut original = Vec::new();
    let mut patched = Vec::new();
    let mut context = Vec::new();

    // The patch may cover several files; only the hunks of the diffed file
    // matter. A .c file whose diff only touches an included header has no
    // block at all.
    let mut i = match lines
        .iter()
        .position(|l| l.starts_with("diff -") && l.contains(diffed_file))
    {
        Some(pos) => pos + 1,
        None => return Ok((original, patched, context)),
    };

    while i < lines.len() {
        let line = lines[i];
        i += 1;
        if line.starts_with("diff -") {
            break;
        }
        if !line.starts_with("@@") {
            continue;
        }
        // @@ -<line>,<count> +<line>,<count> @@ ...
        let mut tokens = line.split(' ');
        let _ = tokens.next();
        let minus = tokens.next().ok_or(CommandError::InvalidPatchFile)?;
        let plus = tokens.next().ok_or(CommandError::InvalidPatchFile)?;
        original.push(parse_hunk_pair(minus)?);
        patched.push(parse_hunk_pair(plus)?);

        // Context lines precede the first +/- change of the hunk.
        let mut ctx: usize = 0;
        while i < lines.len() && !lines[i].starts_with('-') && !lines[i].starts_with('+') {
            ctx += 1;
            i += 1;
        }
        i += 1; // consume the first changed line
        context.push(ctx.saturating_sub(1));
    }

    make_offsets_relative(&mut original);
    make_offsets_relative(&mut patched);
    Ok((original, patched, context))
}

/// Pad one side: wherever the counterpart hunk is longer, insert the
/// difference as empty lines right after the hunk's context.
pub fn align_file(
    filename: &Path,
    suffix: &str,
    from: &[Hunk],
    to: &[Hunk],
    context: &[usize],
) -> Result<(), CommandError> {
    let text = fs::read_to_string(filename).map_err(|e| {
        error!("filename: {}: {e}", filename.display());
        CommandError::FileOpenFailed
    })?;
    let mut input = text.lines();
    let mut out = String::new();
    let mut copy = |out: &mut String, n: usize| {
        for line in input.by_ref().take(n) {
            out.push_str(line);
            out.push('\n');
        }
    };

    for i in 0..from.len() {
        copy(&mut out, from[i].offset);
        if from[i].lines < to[i].lines {
            copy(&mut out, context[i]);
            for _ in 0..to[i].lines - from[i].lines {
                out.push('\n');
            }
        }
    }
    copy(&mut out, usize::MAX);

    let out_path = format!("{}{suffix}", filename.display());
    fs::write(&out_path, out).map_err(|e| {
        error!("filename: {out_path}: {e}");
        CommandError::FileOpenFailed
    })
}

pub fn run(args: &AlignArgs) -> Result<(), CommandError> {
    let (original, patched, context) = parse_patch_file(&args.patch, &args.diffed_file)?;
    align_file(
        &args.original_c,
        &args.suffix,
        &original,
        &patched,
        &context,
    )?;
    align_file(
        &args.patched_c,
        &args.suffix,
        &patched,
        &original,
        &context,
    )?;
    Ok(())
}
