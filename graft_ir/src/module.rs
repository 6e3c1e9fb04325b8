//! Module-level IR container.
//!
//! `Module` owns the functions, global variables, and aliases of one
//! translation unit, plus the module-scoped state the distiller rewrites:
//! the recorded source filename and the concatenated module-level inline
//! assembly. Instruction bodies are opaque raw lines; everything the
//! livepatch pipeline touches (names, linkage, sections, initializers) is
//! structured.

use crate::text;

/// Linkage classes, as spelled in the assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Linkage {
    Private,
    Internal,
    AvailableExternally,
    LinkonceAny,
    LinkonceOdr,
    WeakAny,
    WeakOdr,
    Common,
    Appending,
    ExternWeak,
    External,
}

impl Linkage {
    /// The keyword for this linkage, or `None` for the default (external),
    /// which LLVM does not print on definitions.
    pub fn keyword(self) -> Option<&'static str> {
        match self {
            Linkage::Private => Some("private"),
            Linkage::Internal => Some("internal"),
            Linkage::AvailableExternally => Some("available_externally"),
            Linkage::LinkonceAny => Some("linkonce"),
            Linkage::LinkonceOdr => Some("linkonce_odr"),
            Linkage::WeakAny => Some("weak"),
            Linkage::WeakOdr => Some("weak_odr"),
            Linkage::Common => Some("common"),
            Linkage::Appending => Some("appending"),
            Linkage::ExternWeak => Some("extern_weak"),
            Linkage::External => None,
        }
    }

    pub fn from_keyword(kw: &str) -> Option<Linkage> {
        Some(match kw {
            "private" => Linkage::Private,
            "internal" => Linkage::Internal,
            "available_externally" => Linkage::AvailableExternally,
            "linkonce" => Linkage::LinkonceAny,
            "linkonce_odr" => Linkage::LinkonceOdr,
            "weak" => Linkage::WeakAny,
            "weak_odr" => Linkage::WeakOdr,
            "common" => Linkage::Common,
            "appending" => Linkage::Appending,
            "extern_weak" => Linkage::ExternWeak,
            "external" => Linkage::External,
            _ => return None,
        })
    }
}

/// Coarse classification of a type's spelling, used for change warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Integer,
    Float,
    Pointer,
    Array,
    Vector,
    Struct,
    Named,
    Function,
    Other,
}

/// Classify a type by its leading token.
pub fn type_kind(ty: &str) -> TypeKind {
    let ty = ty.trim();
    if ty.ends_with('*') {
        return TypeKind::Pointer;
    }
    let mut chars = ty.chars();
    match chars.next() {
        Some('i') if chars.clone().next().is_some_and(|c| c.is_ascii_digit()) => TypeKind::Integer,
        Some('[') => TypeKind::Array,
        Some('<') => TypeKind::Vector,
        Some('{') => TypeKind::Struct,
        Some('%') => TypeKind::Named,
        Some('p') if ty.starts_with("ptr") => TypeKind::Pointer,
        Some('f') if ty.starts_with("float") => TypeKind::Float,
        Some('d') if ty.starts_with("double") => TypeKind::Float,
        Some('h') if ty.starts_with("half") => TypeKind::Float,
        Some('x') if ty.starts_with("x86_fp80") => TypeKind::Float,
        Some('v') if ty.starts_with("void") => TypeKind::Other,
        _ => TypeKind::Other,
    }
}

/// Coarse classification of a constant initializer's spelling, used to
/// detect initializer-kind changes between the original and the patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitKind {
    Int,
    Float,
    Null,
    Undef,
    Poison,
    ZeroInit,
    CString,
    Array,
    Vector,
    Struct,
    GlobalRef,
    ConstExpr,
    Other,
}

pub fn init_kind(init: &str) -> InitKind {
    let init = init.trim();
    if init.starts_with('-') || init.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        if init.contains('.') || init.contains("0x") && init.len() > 10 {
            return InitKind::Float;
        }
        return InitKind::Int;
    }
    if init.starts_with("c\"") {
        return InitKind::CString;
    }
    if init.starts_with('[') {
        return InitKind::Array;
    }
    if init.starts_with("<{") || init.starts_with('{') {
        return InitKind::Struct;
    }
    if init.starts_with('<') {
        return InitKind::Vector;
    }
    if init.starts_with('@') {
        return InitKind::GlobalRef;
    }
    match init {
        "null" => InitKind::Null,
        "undef" => InitKind::Undef,
        "poison" => InitKind::Poison,
        "zeroinitializer" => InitKind::ZeroInit,
        "true" | "false" => InitKind::Int,
        _ if init.contains('(') => InitKind::ConstExpr,
        _ => InitKind::Other,
    }
}

/// A global variable definition or declaration.
#[derive(Debug, Clone)]
pub struct GlobalVariable {
    pub name: String,
    pub linkage: Linkage,
    pub dso_local: bool,
    /// Leading keywords we carry verbatim (visibility, `unnamed_addr`,
    /// `thread_local(...)`, `addrspace(...)`, `externally_initialized`).
    pub prefix: Vec<String>,
    /// `constant` rather than `global`.
    pub is_constant: bool,
    /// Value type, as spelled.
    pub ty: String,
    /// Initializer constant, as spelled; `None` for declarations.
    pub initializer: Option<String>,
    pub section: Option<String>,
    /// Trailing comma-clauses other than `section` (align, comdat,
    /// metadata attachments), kept in order.
    pub suffix: Vec<String>,
}

impl GlobalVariable {
    /// A constant whose initializer is plain data in the LLVM sense: a
    /// scalar, a string, or an array/vector of scalars, with no global
    /// references and no struct fields. Struct initializers are not
    /// constant data even when every field is a literal; those globals
    /// take the extern-rewrite path like any other shared variable.
    pub fn is_pure_constant(&self) -> bool {
        let Some(init) = &self.initializer else {
            return false;
        };
        if !self.is_constant
            || text::find_outside_strings(init, "@").is_some()
            || text::find_outside_strings(init, "{").is_some()
        {
            return false;
        }
        matches!(
            init_kind(init),
            InitKind::Int
                | InitKind::Float
                | InitKind::Null
                | InitKind::Undef
                | InitKind::Poison
                | InitKind::ZeroInit
                | InitKind::CString
                | InitKind::Array
                | InitKind::Vector
        )
    }

    /// Jump-label entries are detected by their value type referring to
    /// `struct.jump_entry`.
    pub fn is_jump_label(&self) -> bool {
        self.ty.contains("struct.jump_entry")
    }
}

/// A global alias. Only the name matters to the distiller; the definition
/// tail (`alias <ty>, ptr @target`) is carried verbatim.
#[derive(Debug, Clone)]
pub struct GlobalAlias {
    pub name: String,
    pub def: String,
}

/// A function definition (`body = Some`) or declaration (`body = None`).
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub linkage: Linkage,
    pub dso_local: bool,
    /// Return type together with any return attributes, as spelled.
    pub ret: String,
    /// Parameter list text (without the surrounding parens).
    pub params: String,
    /// Attribute text between the parameter list and the body/end-of-line,
    /// with any `section "..."` clause lifted out.
    pub attrs: String,
    pub section: Option<String>,
    /// Raw instruction lines, excluding the braces.
    pub body: Option<Vec<String>>,
}

impl Function {
    pub fn is_declaration(&self) -> bool {
        self.body.is_none()
    }

    /// Delete the body, turning the definition into an external
    /// declaration.
    pub fn delete_body(&mut self) {
        self.body = None;
        self.linkage = Linkage::External;
    }

    /// True if the function is assigned to a reserved section (`.init*`,
    /// `.exit*`) that livepatching must not touch.
    pub fn in_special_section(&self) -> bool {
        match &self.section {
            Some(s) => s.starts_with(".init") || s.starts_with(".exit"),
            None => false,
        }
    }
}

/// One parsed translation unit.
#[derive(Debug, Default)]
pub struct Module {
    pub source_filename: String,
    /// `target datalayout`/`target triple` lines, verbatim.
    pub target_lines: Vec<String>,
    /// `%name = type ...` lines, verbatim.
    pub type_defs: Vec<String>,
    /// `$name = comdat ...` lines, verbatim.
    pub comdats: Vec<String>,
    /// Module-level inline assembly, unescaped and newline-joined.
    pub module_asm: String,
    pub globals: Vec<GlobalVariable>,
    pub aliases: Vec<GlobalAlias>,
    pub functions: Vec<Function>,
    /// `attributes #N = { ... }` lines, verbatim.
    pub attribute_groups: Vec<String>,
    /// Named and numbered metadata lines, verbatim.
    pub metadata: Vec<String>,
    /// Top-level lines the parser does not model, preserved for lossless
    /// printing.
    pub other_lines: Vec<String>,
}

impl Module {
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn function_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.functions.iter_mut().find(|f| f.name == name)
    }

    pub fn global(&self, name: &str) -> Option<&GlobalVariable> {
        self.globals.iter().find(|g| g.name == name)
    }

    /// Remove the named functions from the module.
    pub fn remove_functions(&mut self, names: &[String]) {
        self.functions.retain(|f| !names.contains(&f.name));
    }

    /// Remove every alias for which `pred` returns true.
    pub fn remove_aliases_if(&mut self, pred: impl Fn(&GlobalAlias) -> bool) {
        self.aliases.retain(|a| !pred(a));
    }

    /// Rename a global symbol (function or variable) and rewrite every
    /// `@old` use in function bodies, global initializers, and alias
    /// definitions. String literals are left alone.
    pub fn rename_symbol(&mut self, old: &str, new: &str) {
        for f in &mut self.functions {
            if f.name == old {
                f.name = new.to_string();
            }
            if let Some(body) = &mut f.body {
                for line in body.iter_mut() {
                    *line = rewrite_uses(line, old, new);
                }
            }
        }
        for g in &mut self.globals {
            if g.name == old {
                g.name = new.to_string();
            }
            if let Some(init) = &g.initializer {
                let rewritten = rewrite_uses(init, old, new);
                if rewritten != *init {
                    g.initializer = Some(rewritten);
                }
            }
        }
        for a in &mut self.aliases {
            if a.name == old {
                a.name = new.to_string();
            }
            a.def = rewrite_uses(&a.def, old, new);
        }
    }

    /// Append `@name` to the `llvm.used` roots, creating the appending
    /// global if the module has none.
    pub fn append_to_used(&mut self, name: &str) {
        let entry = format!("ptr @{}", text::quote_name(name));
        if let Some(used) = self.globals.iter_mut().find(|g| g.name == "llvm.used") {
            let mut entries: Vec<String> = match &used.initializer {
                Some(init) => used_entries(init),
                None => Vec::new(),
            };
            if entries.iter().any(|e| e == &entry) {
                return;
            }
            entries.push(entry);
            used.ty = format!("[{} x ptr]", entries.len());
            used.initializer = Some(format!("[{}]", entries.join(", ")));
            return;
        }
        self.globals.push(GlobalVariable {
            name: "llvm.used".to_string(),
            linkage: Linkage::Appending,
            dso_local: false,
            prefix: Vec::new(),
            is_constant: false,
            ty: "[1 x ptr]".to_string(),
            initializer: Some(format!("[{entry}]")),
            section: Some("llvm.metadata".to_string()),
            suffix: Vec::new(),
        });
    }
}

/// Split a `[ptr @a, ptr @b]` initializer into its entries.
fn used_entries(init: &str) -> Vec<String> {
    let inner = init
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .trim();
    if inner.is_empty() {
        return Vec::new();
    }
    text::split_top_level(inner, ',')
        .into_iter()
        .map(|e| e.trim().to_string())
        .collect()
}

/// Rewrite `@old` tokens in `line` to `@new`, leaving string-literal
/// contents untouched.
pub fn rewrite_uses(line: &str, old: &str, new: &str) -> String {
    let bytes = line.as_bytes();
    let mut out = String::with_capacity(line.len());
    let mut in_string = false;
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if in_string {
            out.push(c);
            if c == '\\' && i + 1 < bytes.len() {
                out.push(bytes[i + 1] as char);
                i += 2;
                continue;
            }
            if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
                i += 1;
            }
            '@' => {
                if let Some((name, consumed)) = text::scan_name(&line[i + 1..]) {
                    if name == old {
                        out.push('@');
                        out.push_str(&text::quote_name(new));
                    } else {
                        out.push_str(&line[i..i + 1 + consumed]);
                    }
                    i += 1 + consumed;
                } else {
                    out.push(c);
                    i += 1;
                }
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}
