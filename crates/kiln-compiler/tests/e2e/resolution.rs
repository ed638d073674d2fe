//! Resolution problem tests
//!
//! Problems found by the resolver surface as a failed compilation carrying
//! every problem of the module, with no unit produced.

use super::harness::*;
use kiln_ir::{BinaryOp, Expr, ReferenceKind};

// ============================================================================
// Single problems
// ============================================================================

#[test]
fn test_undeclared_reference() {
    let m = module("acme.Undeclared", |m| {
        let mut f = m.function("f", &[]);
        f.ret(Expr::lookup("ghost"));
        f.finish();
    });
    assert_eq!(expect_compile_problems(&m), vec!["K1003"]);
}

#[test]
fn test_read_before_assignment() {
    let m = module("acme.Early", |m| {
        let mut f = m.function("f", &[]);
        let x = f.declare("x", ReferenceKind::Variable);
        f.expr(Expr::lookup("x"));
        f.assign_ref(x, Expr::int(1), true);
        f.ret(Expr::lookup("x"));
        f.finish();
    });
    assert_eq!(expect_compile_problems(&m), vec!["K1004"]);
}

#[test]
fn test_break_outside_loop() {
    let m = module("acme.Stray", |m| {
        let mut f = m.function("f", &[]);
        f.brk();
        f.finish();
    });
    assert_eq!(expect_compile_problems(&m), vec!["K1005"]);
}

#[test]
fn test_duplicate_declaration_in_nested_block() {
    let m = module("acme.Twice", |m| {
        let mut f = m.function("f", &[]);
        f.let_("x", Expr::int(1));
        let inner = f.block(|b| {
            b.let_("x", Expr::int(2));
        });
        f.if_(Expr::bool(true), inner, None);
        f.finish();
    });
    assert_eq!(expect_compile_problems(&m), vec!["K1002"]);
}

#[test]
fn test_assign_constant() {
    let m = module("acme.Fixed", |m| {
        let mut f = m.function("f", &[]);
        f.let_("x", Expr::int(1));
        f.assign("x", Expr::int(2));
        f.finish();
    });
    assert_eq!(expect_compile_problems(&m), vec!["K1001"]);
}

// ============================================================================
// Several problems
// ============================================================================

#[test]
fn test_all_problems_are_reported() {
    let m = module("acme.Messy", |m| {
        let mut f = m.function("f", &[]);
        f.let_("x", Expr::int(1));
        f.assign("x", Expr::int(2));
        f.cont();
        f.finish();

        let mut g = m.function("g", &[]);
        g.ret(Expr::binary(BinaryOp::Plus, Expr::lookup("a"), Expr::lookup("b")));
        g.finish();
    });
    let codes = expect_compile_problems(&m);
    assert_eq!(codes.len(), 4);
    assert!(codes.contains(&"K1001"));
    assert!(codes.contains(&"K1005"));
    assert_eq!(codes.iter().filter(|c| **c == "K1003").count(), 2);
}

#[test]
fn test_sibling_blocks_may_reuse_names() {
    let m = module("acme.Siblings", |m| {
        let mut f = m.function("f", &["flag"]);
        let left = f.block(|b| {
            b.let_("x", Expr::int(1));
            b.ret(Expr::lookup("x"));
        });
        let right = f.block(|b| {
            b.let_("x", Expr::int(2));
            b.ret(Expr::lookup("x"));
        });
        f.if_(
            Expr::lookup("flag"),
            left,
            Some(kiln_ir::ElseBranch::Block(right)),
        );
        f.finish();
    });
    expect_i32(&m, "f", vec![kiln_core::Value::Bool(true)], 1);
    expect_i32(&m, "f", vec![kiln_core::Value::Bool(false)], 2);
}
