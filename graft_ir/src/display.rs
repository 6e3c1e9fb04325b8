//! Assembly printing for [`Module`] and its pieces.
//!
//! Output is valid LLVM assembly: names are re-quoted and re-escaped on the
//! way out, so identifiers introduced by the distiller (which contain `:`)
//! print in their quoted form.

use std::fmt;

use crate::module::{Function, GlobalAlias, GlobalVariable, Module};
use crate::text;

fn write_global(f: &mut fmt::Formatter<'_>, g: &GlobalVariable) -> fmt::Result {
    write!(f, "@{} =", text::quote_name(&g.name))?;
    match g.linkage.keyword() {
        Some(kw) => write!(f, " {kw}")?,
        // LLVM spells external linkage out only on declarations.
        None if g.initializer.is_none() => write!(f, " external")?,
        None => {}
    }
    if g.dso_local {
        write!(f, " dso_local")?;
    }
    for p in &g.prefix {
        write!(f, " {p}")?;
    }
    write!(f, " {}", if g.is_constant { "constant" } else { "global" })?;
    write!(f, " {}", g.ty)?;
    if let Some(init) = &g.initializer {
        write!(f, " {init}")?;
    }
    if let Some(sec) = &g.section {
        write!(f, ", section \"{}\"", text::escape_string(sec))?;
    }
    for s in &g.suffix {
        write!(f, ", {s}")?;
    }
    writeln!(f)
}

fn write_alias(f: &mut fmt::Formatter<'_>, a: &GlobalAlias) -> fmt::Result {
    writeln!(f, "@{} = {}", text::quote_name(&a.name), a.def)
}

fn write_function(f: &mut fmt::Formatter<'_>, func: &Function) -> fmt::Result {
    write!(
        f,
        "{}",
        if func.is_declaration() {
            "declare"
        } else {
            "define"
        }
    )?;
    if let Some(kw) = func.linkage.keyword() {
        write!(f, " {kw}")?;
    }
    if func.dso_local {
        write!(f, " dso_local")?;
    }
    if !func.ret.is_empty() {
        write!(f, " {}", func.ret)?;
    }
    write!(f, " @{}({})", text::quote_name(&func.name), func.params)?;
    if !func.attrs.is_empty() {
        write!(f, " {}", func.attrs)?;
    }
    if let Some(sec) = &func.section {
        write!(f, " section \"{}\"", text::escape_string(sec))?;
    }
    match &func.body {
        None => writeln!(f),
        Some(body) => {
            writeln!(f, " {{")?;
            for line in body {
                writeln!(f, "{line}")?;
            }
            writeln!(f, "}}")
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.source_filename.is_empty() {
            writeln!(
                f,
                "source_filename = \"{}\"",
                text::escape_string(&self.source_filename)
            )?;
        }
        for line in &self.target_lines {
            writeln!(f, "{line}")?;
        }
        if !self.type_defs.is_empty() {
            writeln!(f)?;
            for line in &self.type_defs {
                writeln!(f, "{line}")?;
            }
        }
        for line in &self.comdats {
            writeln!(f, "{line}")?;
        }
        if !self.module_asm.is_empty() {
            writeln!(f)?;
            for line in self.module_asm.lines() {
                writeln!(f, "module asm \"{}\"", text::escape_string(line))?;
            }
        }
        if !self.globals.is_empty() {
            writeln!(f)?;
            for g in &self.globals {
                write_global(f, g)?;
            }
        }
        if !self.aliases.is_empty() {
            writeln!(f)?;
            for a in &self.aliases {
                write_alias(f, a)?;
            }
        }
        for func in &self.functions {
            writeln!(f)?;
            write_function(f, func)?;
        }
        if !self.attribute_groups.is_empty() {
            writeln!(f)?;
            for line in &self.attribute_groups {
                writeln!(f, "{line}")?;
            }
        }
        if !self.metadata.is_empty() {
            writeln!(f)?;
            for line in &self.metadata {
                writeln!(f, "{line}")?;
            }
        }
        for line in &self.other_lines {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}
