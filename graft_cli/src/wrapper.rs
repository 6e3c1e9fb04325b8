//! Wrapper artifact emission: `livepatch.c`, `livepatch.lds`, and
//! `Makefile`, instantiated from the embedded templates.
//!
//! Template lines carrying a `{{MARKER}}` are substituted: the wrapper
//! markers are replaced by generated blocks, the Makefile markers are
//! completed in place (the text before the marker is kept).

use std::fs;
use std::path::Path;

use log::error;

use graft_elf::symbol::archive_object_for_source;
use graft_elf::thin_archive::ThinArchiveIndex;

use crate::command::CommandError;

const WRAPPER_TEMPLATE: &str = include_str!("../templates/livepatch.c.tmpl");
const LD_SCRIPT_TEMPLATE: &str = include_str!("../templates/livepatch.lds.tmpl");
const MAKEFILE_TEMPLATE: &str = include_str!("../templates/Makefile.tmpl");

const FUNC_MARKER: &str = "{{LIST_OF_LIVEPATCH_FUNCTIONS}}";
const STRUCT_MARKER: &str = "{{LIST_FOR_KLP_FUNC_STRUCT}}";
const OBJ_MARKER: &str = "{{NAME_OF_OBJECT}}";
const KERNEL_PATH_MARKER: &str = "{{PATH_TO_LINUX_KERNEL_SOURCE_TREE}}";
const KLP_NAME_MARKER: &str = "{{NAME_OF_LIVEPATCH}}";

/// `livepatch_` — the wrapper-side spelling of a patched function.
const WRAPPER_PREFIX: &str = "livepatch_";
/// `__livepatch_` — the ELF-side spelling the linker script maps onto.
const ELF_PREFIX: &str = "__livepatch_";

fn write_artifact(odir: &Path, name: &str, content: String) -> Result<(), CommandError> {
    let path = odir.join(name);
    fs::write(&path, content).map_err(|e| {
        error!("filename: {}: {e}", path.display());
        CommandError::FileOpenFailed
    })
}

/// Sympos of a livepatched function, or 0 without an archive. A negative
/// query result never reaches the generated source.
fn function_sympos(
    thin_archive: Option<&ThinArchiveIndex>,
    func: &str,
    src_file: &str,
) -> Result<i32, CommandError> {
    let Some(archive) = thin_archive else {
        return Ok(0);
    };
    let filename = archive_object_for_source(src_file);
    let pos = archive.sympos(func, &filename);
    if pos < 0 {
        error!(
            "Symbol: {func}, Filename: {filename}\n\
             Fail to find the symbol in thin archive"
        );
        return Err(CommandError::SymFindFailed);
    }
    Ok(pos)
}

/// Instantiate `livepatch.c`: one forward declaration and one `klp_func`
/// entry per livepatched function, plus the `klp_object` name.
pub fn emit_wrapper(
    odir: &Path,
    funcs: &[(String, String)],
    mod_name: Option<&str>,
    thin_archive: Option<&ThinArchiveIndex>,
) -> Result<(), CommandError> {
    let mut out = String::new();
    for line in WRAPPER_TEMPLATE.lines() {
        if line.contains(FUNC_MARKER) {
            for (func, _) in funcs {
                out.push_str(&format!("void {WRAPPER_PREFIX}{func}(void);\n"));
            }
        } else if line.contains(STRUCT_MARKER) {
            for (func, src_file) in funcs {
                let pos = function_sympos(thin_archive, func, src_file)?;
                out.push_str(&format!(
                    "\t{{\n\
                     \t\t.old_name = \"{func}\",\n\
                     \t\t.new_func = {WRAPPER_PREFIX}{func},\n\
                     \t\t.old_sympos = {pos},\n\
                     \t}},\n"
                ));
            }
        } else if line.contains(OBJ_MARKER) {
            // NULL binds the patch to vmlinux; otherwise name the module.
            match mod_name {
                Some(name) => out.push_str(&format!("\t\t.name = \"{name}\",\n")),
                None => out.push_str("\t\t.name = NULL,\n"),
            }
        } else {
            out.push_str(line);
            out.push('\n');
        }
    }
    write_artifact(odir, "livepatch.c", out)
}

/// Instantiate `livepatch.lds`: one `livepatch_<fn> = __livepatch_<fn>;`
/// assignment per entry, appended after the template body.
pub fn emit_ld_script(odir: &Path, funcs: &[(String, String)]) -> Result<(), CommandError> {
    let mut out = String::from(LD_SCRIPT_TEMPLATE);
    for (func, _) in funcs {
        out.push_str(&format!("{WRAPPER_PREFIX}{func} = {ELF_PREFIX}{func};\n"));
    }
    write_artifact(odir, "livepatch.lds", out)
}

/// Instantiate `Makefile`: the kernel tree path and livepatch name
/// complete their marker lines.
pub fn emit_makefile(odir: &Path, kdir: &Path, klp_name: &str) -> Result<(), CommandError> {
    let mut out = String::new();
    for line in MAKEFILE_TEMPLATE.lines() {
        if let Some(pos) = line.find(KERNEL_PATH_MARKER) {
            out.push_str(&format!("{}{}\n", &line[..pos], kdir.display()));
        } else if let Some(pos) = line.find(KLP_NAME_MARKER) {
            out.push_str(&format!("{}{klp_name}\n", &line[..pos]));
        } else {
            out.push_str(line);
            out.push('\n');
        }
    }
    write_artifact(odir, "Makefile", out)
}
