//! Function-level structural diff between an original and a patched
//! module.
//!
//! Every named function in the patched module is classified as unchanged,
//! changed, new, or excluded. The comparator reports differences through a
//! [`DiffConsumer`], so quiet and printing runs share one engine.

use std::collections::HashMap;
use std::fmt;

use crate::module::{Function, Module};
use crate::text;

/// Sink for reported differences. `reset` clears the per-function state so
/// one consumer serves a whole classification walk.
pub trait DiffConsumer {
    fn record_difference(&mut self, function: &str, left: Option<&str>, right: Option<&str>);
    fn had_differences(&self) -> bool;
    fn reset(&mut self);
}

/// Consumer that only tracks whether anything differed.
#[derive(Debug, Default)]
pub struct QuietConsumer {
    differed: bool,
}

impl QuietConsumer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DiffConsumer for QuietConsumer {
    fn record_difference(&mut self, _function: &str, _left: Option<&str>, _right: Option<&str>) {
        self.differed = true;
    }

    fn had_differences(&self) -> bool {
        self.differed
    }

    fn reset(&mut self) {
        self.differed = false;
    }
}

/// Consumer that prints each differing line pair to stdout.
#[derive(Debug, Default)]
pub struct PrintingConsumer {
    differed: bool,
}

impl PrintingConsumer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DiffConsumer for PrintingConsumer {
    fn record_difference(&mut self, function: &str, left: Option<&str>, right: Option<&str>) {
        if !self.differed {
            println!("function @{function} differs:");
        }
        self.differed = true;
        if let Some(l) = left {
            println!("  - {l}");
        }
        if let Some(r) = right {
            println!("  + {r}");
        }
    }

    fn had_differences(&self) -> bool {
        self.differed
    }

    fn reset(&mut self) {
        self.differed = false;
    }
}

/// Classification of one patched-module function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionClass {
    /// Present in both modules and structurally equal; its body will be
    /// deleted.
    Unchanged,
    /// Present in both modules with a differing body; renamed and kept.
    Changed,
    /// Present only in the patched module; kept as-is.
    New,
    /// Assigned to a reserved section; removed from the module.
    Excluded,
}

/// Result of a classification walk over the patched module.
#[derive(Debug, Default)]
pub struct Classification {
    classes: HashMap<String, FunctionClass>,
}

impl Classification {
    pub fn class_of(&self, name: &str) -> Option<FunctionClass> {
        self.classes.get(name).copied()
    }

    pub fn names_in(&self, class: FunctionClass) -> Vec<String> {
        let mut names: Vec<String> = self
            .classes
            .iter()
            .filter(|(_, c)| **c == class)
            .map(|(n, _)| n.clone())
            .collect();
        names.sort();
        names
    }

    pub fn count_in(&self, class: FunctionClass) -> usize {
        self.classes.values().filter(|c| **c == class).count()
    }
}

/// Error from the classification walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffError {
    /// No function changed and none was added; there is nothing to patch.
    NothingToPatch,
}

impl fmt::Display for DiffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffError::NothingToPatch => write!(f, "nothing to patch"),
        }
    }
}

impl std::error::Error for DiffError {}

/// Compares the functions of two modules and classifies each function of
/// the patched module.
pub struct DiffEngine<'a> {
    consumer: &'a mut dyn DiffConsumer,
}

impl<'a> DiffEngine<'a> {
    pub fn new(consumer: &'a mut dyn DiffConsumer) -> Self {
        Self { consumer }
    }

    /// Classify every named function of `patched` against `original`.
    ///
    /// Fails with [`DiffError::NothingToPatch`] when no function is
    /// changed or new.
    pub fn classify(
        &mut self,
        original: &Module,
        patched: &Module,
    ) -> Result<Classification, DiffError> {
        let mut classes = HashMap::new();
        for rfn in &patched.functions {
            if rfn.name.is_empty() {
                continue;
            }
            if rfn.in_special_section() {
                classes.insert(rfn.name.clone(), FunctionClass::Excluded);
                continue;
            }
            let class = match original.function(&rfn.name) {
                None => FunctionClass::New,
                Some(lfn) => {
                    self.compare(lfn, rfn);
                    if self.consumer.had_differences() {
                        self.consumer.reset();
                        FunctionClass::Changed
                    } else {
                        FunctionClass::Unchanged
                    }
                }
            };
            classes.insert(rfn.name.clone(), class);
        }

        let result = Classification { classes };
        if result.count_in(FunctionClass::Changed) == 0 && result.count_in(FunctionClass::New) == 0
        {
            return Err(DiffError::NothingToPatch);
        }
        Ok(result)
    }

    /// Structural comparison of two functions: normalized signature, then
    /// normalized body lines, pairwise.
    fn compare(&mut self, left: &Function, right: &Function) {
        let lsig = normalize_signature(left);
        let rsig = normalize_signature(right);
        if lsig != rsig {
            self.consumer
                .record_difference(&right.name, Some(&lsig), Some(&rsig));
        }

        let lbody = normalize_body(left);
        let rbody = normalize_body(right);
        let mut li = lbody.iter();
        let mut ri = rbody.iter();
        loop {
            match (li.next(), ri.next()) {
                (None, None) => break,
                (l, r) => {
                    let l = l.map(String::as_str);
                    let r = r.map(String::as_str);
                    if l != r {
                        self.consumer.record_difference(&right.name, l, r);
                    }
                }
            }
        }
    }
}

fn normalize_signature(f: &Function) -> String {
    format!(
        "{} ({})",
        normalize_line(&f.ret),
        normalize_line(&f.params)
    )
}

fn normalize_body(f: &Function) -> Vec<String> {
    let Some(body) = &f.body else {
        return Vec::new();
    };
    body.iter()
        .map(|l| normalize_line(l))
        .filter(|l| !l.is_empty())
        .collect()
}

/// Normalize one line of assembly for comparison: strip trailing comments,
/// metadata attachments, and attribute-group references; collapse
/// whitespace. Debug intrinsics compare equal regardless of metadata ids,
/// and attribute-group renumbering between compilations is not a change.
pub fn normalize_line(line: &str) -> String {
    let line = match text::find_comment_start(line) {
        Some(pos) => &line[..pos],
        None => line,
    };
    let mut out = String::with_capacity(line.len());
    let mut in_string = false;
    let bytes = line.as_bytes();
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
            '!' => {
                // Metadata token: `!dbg`, `!42`, `!{...}` references.
                i += 1;
                while i < bytes.len() {
                    let c = bytes[i] as char;
                    if c.is_ascii_alphanumeric() || c == '.' || c == '_' {
                        i += 1;
                    } else {
                        break;
                    }
                }
            }
            '#' => {
                i += 1;
                while i < bytes.len() && (bytes[i] as char).is_ascii_digit() {
                    i += 1;
                }
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    // Collapse whitespace and drop the commas orphaned by stripped tokens.
    let collapsed: Vec<&str> = out.split_whitespace().collect();
    let mut joined = collapsed.join(" ");
    while joined.ends_with(',') || joined.ends_with(' ') {
        joined.pop();
    }
    joined.replace(", ,", ",").replace(" ,", ",")
}
