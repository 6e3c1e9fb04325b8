//! Reduce a patched module to what the livepatch object needs.
//!
//! After classification, the patched module is mutated in place: excluded
//! functions and disallowed aliases are removed, changed functions are
//! renamed for the livepatch link and pinned in `llvm.used`, unchanged
//! bodies are deleted, and shared globals are rewritten to external
//! declarations that the fixup stage later resolves against the running
//! kernel.

use log::warn;

use crate::diff::{Classification, FunctionClass};
use crate::module::{init_kind, type_kind, Linkage, Module};

/// Prefix marking a function body that replaces a kernel function.
pub const LIVEPATCH_PREFIX: &str = "__livepatch_";

/// Prefix marking a DSO-local global that must be resolved against the
/// patched object's own translation unit.
pub const KLP_LOCAL_SYM_PREFIX: &str = "klp.local.sym";

/// Strip `base` from the front of `path` and trim any leading `./` runs.
/// An absent base yields the empty string, like the original split.
pub fn strip_base_path(path: &str, base: &str) -> String {
    let tail = match path.find(base) {
        Some(pos) => &path[pos + base.len()..],
        None => "",
    };
    tail.trim_start_matches(['.', '/']).to_string()
}

/// `<name>:<relpath>` — the rename payload for a changed function.
pub fn livepatched_function_name(name: &str, source_filename: &str, base: &str) -> String {
    format!("{name}:{}", strip_base_path(source_filename, base))
}

/// `klp.local.sym:<name>:<relpath>` — the rename for a DSO-local global.
pub fn livepatched_symbol_name(name: &str, source_filename: &str, base: &str) -> String {
    format!(
        "{KLP_LOCAL_SYM_PREFIX}:{name}:{}",
        strip_base_path(source_filename, base)
    )
}

/// Apply the classification to the patched module.
pub fn distill(original: &Module, patched: &mut Module, classes: &Classification, base_dir: &str) {
    distill_functions(patched, classes, base_dir);
    distill_globals(original, patched, base_dir);
}

fn distill_functions(patched: &mut Module, classes: &Classification, base_dir: &str) {
    let excluded = classes.names_in(FunctionClass::Excluded);
    patched.remove_functions(&excluded);

    // Aliases over extern-declared functions crash the downstream compile;
    // the direct-call and syscall alias families are the two producers.
    patched.remove_aliases_if(|a| a.name.starts_with("__direct_call") || a.name.starts_with("sys_"));

    let names: Vec<String> = patched.functions.iter().map(|f| f.name.clone()).collect();
    for name in names {
        if name.is_empty() {
            continue;
        }
        match classes.class_of(&name) {
            Some(FunctionClass::New) => {}
            Some(FunctionClass::Changed) => {
                let new_name = format!(
                    "{LIVEPATCH_PREFIX}{}",
                    livepatched_function_name(&name, &patched.source_filename, base_dir)
                );
                patched.rename_symbol(&name, &new_name);
                // The optimizer may not drop the replacement body, and the
                // wrapper links against it by name.
                patched.append_to_used(&new_name);
                if let Some(f) = patched.function_mut(&new_name) {
                    f.linkage = Linkage::External;
                }
            }
            _ => {
                if let Some(f) = patched.function_mut(&name) {
                    f.delete_body();
                }
            }
        }
    }
}

/// Global-variable name prefixes that exist only to populate init/exit and
/// export-table sections; they have no meaning in a livepatch object.
const SPECIAL_GLOBAL_PREFIXES: [&str; 4] = ["__init", "__exit", "__kstrtab", "__ksymtab"];

fn distill_globals(original: &Module, patched: &mut Module, base_dir: &str) {
    patched.globals.retain(|g| {
        !SPECIAL_GLOBAL_PREFIXES
            .iter()
            .any(|p| g.name.starts_with(p))
    });

    patched.module_asm = scrub_module_asm(&patched.module_asm);

    let mut renames: Vec<(String, String)> = Vec::new();
    for i in 0..patched.globals.len() {
        let name = patched.globals[i].name.clone();
        {
            let g = &patched.globals[i];
            if name.starts_with("__const") || name.starts_with("llvm.") {
                continue;
            }
            if g.section.as_deref().is_some_and(|s| {
                s.starts_with(".discard.func_stack_frame_non_standard")
            }) {
                continue;
            }
            if g.is_pure_constant() {
                continue;
            }
            if g.is_jump_label() {
                continue;
            }
        }
        let Some(gvl) = original.global(&name) else {
            continue;
        };

        let gvr = &mut patched.globals[i];
        if type_kind(&gvl.ty) != type_kind(&gvr.ty) {
            warn!(
                "type of global variable, {name}, is changed (original: {}, patched: {})",
                gvl.ty, gvr.ty
            );
        }
        if gvl.prefix != gvr.prefix || gvl.suffix != gvr.suffix {
            warn!("attributes of global variable, {name}, are changed");
        }
        let init_mismatch = match (&gvl.initializer, &gvr.initializer) {
            (Some(l), Some(r)) => init_kind(l) != init_kind(r),
            (None, None) => false,
            _ => true,
        };
        if init_mismatch {
            warn!("initializer mismatch for global variable, {name}");
        }

        gvr.initializer = None;
        gvr.linkage = Linkage::External;
        if gvr.dso_local && name != "__fentry__" {
            renames.push((
                name.clone(),
                livepatched_symbol_name(&name, &original.source_filename, base_dir),
            ));
        }
    }
    for (old, new) in renames {
        patched.rename_symbol(&old, &new);
    }
}

/// Erase the exported-symbol CRC and initcall quads from the module-level
/// inline assembly.
///
/// Exported symbols emit:
/// ```text
///     .section "___kcrctab_gpl+<sym>", "a"
///     .weak   __crc_<sym>
///     .long   __crc_<sym>
///     .previous
/// ```
/// and initcalls emit:
/// ```text
///     .section ".initcall4.init", "a"
///     __initcall_<fn>4:
///     .long   <fn> - .
///     .previous
/// ```
pub fn scrub_module_asm(asm: &str) -> String {
    let passes: [[fn(&str) -> bool; 4]; 2] = [
        [
            |l| section_line_mentions(l, "kcrctab"),
            |l| l.contains("__crc"),
            |l| l.contains("__crc"),
            |l| l.contains(".previous"),
        ],
        [
            |l| section_line_mentions(l, "initcall"),
            |l| l.contains("__initcall"),
            |l| l.contains("long"),
            |l| l.contains(".previous"),
        ],
    ];

    let mut lines: Vec<String> = asm.lines().map(str::to_string).collect();
    for pass in &passes {
        let mut out: Vec<String> = Vec::with_capacity(lines.len());
        let mut i = 0;
        while i < lines.len() {
            if i + 4 <= lines.len() && (0..4).all(|k| pass[k](&lines[i + k])) {
                i += 4;
                continue;
            }
            out.push(lines[i].clone());
            i += 1;
        }
        lines = out;
    }
    lines.join("\n")
}

fn section_line_mentions(line: &str, marker: &str) -> bool {
    match line.find(".section") {
        Some(pos) => line[pos..].contains(marker),
        None => false,
    }
}
