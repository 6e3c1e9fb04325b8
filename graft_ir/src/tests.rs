//! Tests for the IR model, diff engine, and distiller.

use crate::diff::{DiffEngine, DiffError, FunctionClass, QuietConsumer};
use crate::distill::{distill, scrub_module_asm, strip_base_path};
use crate::module::{init_kind, InitKind, Linkage};
use crate::parser::parse_module;
use crate::text;

const ORIGINAL: &str = r#"
; ModuleID = '/k/drivers/x.c'
source_filename = "/k/drivers/x.c"
target triple = "x86_64-unknown-linux-gnu"

@counter = internal dso_local global i32 0, align 4
@__kstrtab_foo = internal constant [4 x i8] c"foo\00", align 1
@msg = dso_local constant [3 x i8] c"hi\00", align 1

define dso_local i32 @f(i32 noundef %x) #0 {
entry:
  %add = add nsw i32 %x, 1
  ret i32 %add
}

define dso_local void @untouched() #0 {
entry:
  ret void
}

attributes #0 = { nounwind }
"#;

const PATCHED: &str = r#"
source_filename = "/k/drivers/x.c"
target triple = "x86_64-unknown-linux-gnu"

@counter = internal dso_local global i32 0, align 4
@__kstrtab_foo = internal constant [4 x i8] c"foo\00", align 1
@msg = dso_local constant [3 x i8] c"hi\00", align 1

define dso_local i32 @f(i32 noundef %x) #0 {
entry:
  %add = add nsw i32 %x, 2
  %inc = load i32, ptr @counter, align 4
  ret i32 %add
}

define dso_local i32 @g(i32 noundef %x) #0 {
entry:
  ret i32 %x
}

define dso_local void @untouched() #0 {
entry:
  ret void
}

define internal void @boot_setup() #0 section ".init.text" {
entry:
  ret void
}

attributes #0 = { nounwind }
"#;

#[test]
fn parse_module_shape() {
    let m = parse_module(PATCHED).unwrap();
    assert_eq!(m.source_filename, "/k/drivers/x.c");
    assert_eq!(m.functions.len(), 4);
    assert_eq!(m.globals.len(), 3);
    let f = m.function("f").unwrap();
    assert!(f.dso_local);
    assert_eq!(f.ret, "i32");
    assert_eq!(f.params, "i32 noundef %x");
    assert_eq!(f.body.as_ref().unwrap().len(), 4);
    let setup = m.function("boot_setup").unwrap();
    assert_eq!(setup.section.as_deref(), Some(".init.text"));
    assert_eq!(setup.linkage, Linkage::Internal);
}

#[test]
fn parse_global_fields() {
    let m = parse_module(PATCHED).unwrap();
    let counter = m.global("counter").unwrap();
    assert_eq!(counter.linkage, Linkage::Internal);
    assert!(counter.dso_local);
    assert!(!counter.is_constant);
    assert_eq!(counter.ty, "i32");
    assert_eq!(counter.initializer.as_deref(), Some("0"));
    assert_eq!(counter.suffix, vec!["align 4".to_string()]);
    let msg = m.global("msg").unwrap();
    assert!(msg.is_constant);
    assert!(msg.is_pure_constant());
}

#[test]
fn printed_module_reparses() {
    let m = parse_module(PATCHED).unwrap();
    let printed = m.to_string();
    let again = parse_module(&printed).unwrap();
    assert_eq!(again.functions.len(), m.functions.len());
    assert_eq!(again.globals.len(), m.globals.len());
    assert_eq!(again.source_filename, m.source_filename);
}

#[test]
fn quoted_names_round_trip() {
    assert_eq!(text::quote_name("printk"), "printk");
    assert_eq!(
        text::quote_name("__livepatch_f:drivers/x.c"),
        "\"__livepatch_f:drivers/x.c\""
    );
    let (name, used) = text::scan_name("\"a:b\" rest").unwrap();
    assert_eq!(name, "a:b");
    assert_eq!(used, 5);
}

#[test]
fn identical_modules_have_nothing_to_patch() {
    let original = parse_module(ORIGINAL).unwrap();
    let patched = parse_module(ORIGINAL).unwrap();
    let mut consumer = QuietConsumer::new();
    let got = DiffEngine::new(&mut consumer).classify(&original, &patched);
    assert_eq!(got.unwrap_err(), DiffError::NothingToPatch);
}

#[test]
fn classification_covers_all_classes() {
    let original = parse_module(ORIGINAL).unwrap();
    let patched = parse_module(PATCHED).unwrap();
    let mut consumer = QuietConsumer::new();
    let classes = DiffEngine::new(&mut consumer)
        .classify(&original, &patched)
        .unwrap();
    assert_eq!(classes.class_of("f"), Some(FunctionClass::Changed));
    assert_eq!(classes.class_of("g"), Some(FunctionClass::New));
    assert_eq!(classes.class_of("untouched"), Some(FunctionClass::Unchanged));
    assert_eq!(classes.class_of("boot_setup"), Some(FunctionClass::Excluded));
}

#[test]
fn metadata_and_attribute_refs_do_not_diff() {
    let left = parse_module(
        "define void @f() #0 {\nentry:\n  ret void, !dbg !7\n}\n",
    )
    .unwrap();
    let right = parse_module(
        "define void @f() #2 {\nentry:\n  ret void, !dbg !19\n}\n",
    )
    .unwrap();
    let mut consumer = QuietConsumer::new();
    let got = DiffEngine::new(&mut consumer).classify(&left, &right);
    // No change and nothing new: the bodies normalize equal.
    assert_eq!(got.unwrap_err(), DiffError::NothingToPatch);
}

#[test]
fn distilled_module_matches_livepatch_shape() {
    let original = parse_module(ORIGINAL).unwrap();
    let mut patched = parse_module(PATCHED).unwrap();
    let mut consumer = QuietConsumer::new();
    let classes = DiffEngine::new(&mut consumer)
        .classify(&original, &patched)
        .unwrap();
    distill(&original, &mut patched, &classes, "/k/");

    // Changed function: renamed, external, body kept, pinned in llvm.used.
    let f = patched.function("__livepatch_f:drivers/x.c").unwrap();
    assert_eq!(f.linkage, Linkage::External);
    assert!(f.body.is_some());
    let used = patched.global("llvm.used").unwrap();
    assert!(used
        .initializer
        .as_ref()
        .unwrap()
        .contains("@\"__livepatch_f:drivers/x.c\""));

    // The body's own reference to the renamed counter global is rewritten.
    assert!(f
        .body
        .as_ref()
        .unwrap()
        .iter()
        .any(|l| l.contains("@\"klp.local.sym:counter:drivers/x.c\"")));

    // New function kept verbatim; unchanged body deleted; .init function gone.
    assert!(patched.function("g").unwrap().body.is_some());
    assert!(patched.function("untouched").unwrap().body.is_none());
    assert!(patched.function("boot_setup").is_none());

    // Export-table global dropped, shared global extern-rewritten + renamed.
    assert!(patched.global("__kstrtab_foo").is_none());
    let counter = patched
        .global("klp.local.sym:counter:drivers/x.c")
        .unwrap();
    assert_eq!(counter.linkage, Linkage::External);
    assert!(counter.initializer.is_none());

    // Pure constant kept verbatim.
    let msg = patched.global("msg").unwrap();
    assert!(msg.initializer.is_some());
}

#[test]
fn printed_distilled_module_is_parseable() {
    let original = parse_module(ORIGINAL).unwrap();
    let mut patched = parse_module(PATCHED).unwrap();
    let mut consumer = QuietConsumer::new();
    let classes = DiffEngine::new(&mut consumer)
        .classify(&original, &patched)
        .unwrap();
    distill(&original, &mut patched, &classes, "/k/");

    let printed = patched.to_string();
    let again = parse_module(&printed).unwrap();
    assert!(again.function("__livepatch_f:drivers/x.c").is_some());
    assert!(again
        .global("klp.local.sym:counter:drivers/x.c")
        .is_some());
}

#[test]
fn disallowed_aliases_are_removed() {
    let src = "\
@sys_clone = dso_local alias i64 (ptr), ptr @__do_sys_clone
@__direct_call_wq = alias void (), ptr @worker
@keepme = alias void (), ptr @worker

define void @worker() {
entry:
  ret void
}

define i64 @__do_sys_clone(ptr %r) {
entry:
  ret i64 0
}

define i64 @newfn(ptr %r) {
entry:
  ret i64 1
}
";
    let original = parse_module("define void @worker() {\nentry:\n  ret void\n}\n").unwrap();
    let mut patched = parse_module(src).unwrap();
    let mut consumer = QuietConsumer::new();
    let classes = DiffEngine::new(&mut consumer)
        .classify(&original, &patched)
        .unwrap();
    distill(&original, &mut patched, &classes, "");

    let names: Vec<&str> = patched.aliases.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["keepme"]);
}

#[test]
fn module_asm_quads_are_scrubbed() {
    let asm = "\t.section \"___kcrctab+foo\", \"a\"\n\
\t.weak __crc_foo\n\
\t.long __crc_foo\n\
\t.previous\n\
\t.globl other\n\
\t.section \".initcall4.init\", \"a\"\n\
__initcall_my_init4:\n\
\t.long my_init - .\n\
\t.previous";
    let scrubbed = scrub_module_asm(asm);
    assert_eq!(scrubbed, "\t.globl other");
}

#[test]
fn base_path_stripping() {
    assert_eq!(strip_base_path("/k/drivers/x.c", "/k/"), "drivers/x.c");
    assert_eq!(strip_base_path("./drivers/x.c", ""), "drivers/x.c");
    assert_eq!(strip_base_path("/other/y.c", "/k/"), "");
}

#[test]
fn struct_initializers_are_not_pure_constants() {
    let m = parse_module(
        "@conf = internal dso_local constant %struct.foo { i32 1, i32 2 }, align 4\n\
         @tbl = internal constant [2 x %struct.foo] [%struct.foo { i32 1, i32 2 }, %struct.foo { i32 3, i32 4 }], align 4\n\
         @blob = internal constant [3 x i8] c\"hi\\00\", align 1\n\
         @nums = internal constant [2 x i32] [i32 1, i32 2], align 4\n",
    )
    .unwrap();
    assert!(!m.global("conf").unwrap().is_pure_constant());
    assert!(!m.global("tbl").unwrap().is_pure_constant());
    assert!(m.global("blob").unwrap().is_pure_constant());
    assert!(m.global("nums").unwrap().is_pure_constant());
}

#[test]
fn shared_struct_constant_is_extern_rewritten() {
    let src = "\
source_filename = \"/k/drivers/x.c\"

@conf = internal dso_local constant %struct.foo { i32 1, i32 2 }, align 4

define dso_local i32 @f() {
entry:
  %v = load i32, ptr @conf, align 4
  ret i32 %v
}
";
    let patched_src = src.replace("ret i32 %v", "ret i32 0");
    let original = parse_module(src).unwrap();
    let mut patched = parse_module(&patched_src).unwrap();
    let mut consumer = QuietConsumer::new();
    let classes = DiffEngine::new(&mut consumer)
        .classify(&original, &patched)
        .unwrap();
    distill(&original, &mut patched, &classes, "/k/");

    let conf = patched.global("klp.local.sym:conf:drivers/x.c").unwrap();
    assert_eq!(conf.linkage, Linkage::External);
    assert!(conf.initializer.is_none());
    assert!(patched.global("conf").is_none());
}

#[test]
fn initializer_kinds() {
    assert_eq!(init_kind("0"), InitKind::Int);
    assert_eq!(init_kind("c\"hi\\00\""), InitKind::CString);
    assert_eq!(init_kind("zeroinitializer"), InitKind::ZeroInit);
    assert_eq!(init_kind("@target"), InitKind::GlobalRef);
    assert_eq!(init_kind("{ i32 1, i32 2 }"), InitKind::Struct);
}

#[test]
fn used_roots_merge_instead_of_duplicating() {
    let mut m = parse_module("define void @a() {\nentry:\n  ret void\n}\n").unwrap();
    m.append_to_used("a");
    m.append_to_used("a");
    m.append_to_used("b:c");
    let used = m.global("llvm.used").unwrap();
    assert_eq!(used.ty, "[2 x ptr]");
    assert_eq!(
        used.initializer.as_deref(),
        Some("[ptr @a, ptr @\"b:c\"]")
    );
}
