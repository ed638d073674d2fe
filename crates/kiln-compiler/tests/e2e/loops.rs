//! Loop tests
//!
//! Tests for while and for loops, break and continue, and both lowerings of
//! loop control.

use super::harness::*;
use kiln_compiler::{CompileOptions, LoopControlStyle};
use kiln_core::{Value, Vm};
use kiln_ir::{BinaryOp, Expr, Module, ReferenceKind};

fn plus(left: Expr, right: Expr) -> Expr {
    Expr::binary(BinaryOp::Plus, left, right)
}

fn equals(left: Expr, right: Expr) -> Expr {
    Expr::binary(BinaryOp::Equals, left, right)
}

fn less(left: Expr, right: Expr) -> Expr {
    Expr::binary(BinaryOp::Less, left, right)
}

/// `for (i = 0; i < n; i = i + 1) { if i == 3 { continue } total = total + i }`
fn skip_three() -> Module {
    module("acme.Skip", |m| {
        let mut f = m.function("sum", &["n"]);
        f.var("total", Expr::int(0));
        let i = f.declare("i", ReferenceKind::Variable);
        let init = f.assignment(i, Expr::int(0), true);
        let post = f.assignment(i, plus(Expr::lookup("i"), Expr::int(1)), false);
        let body = f.block(|b| {
            let skip = b.block(|s| s.cont());
            b.if_(equals(Expr::lookup("i"), Expr::int(3)), skip, None);
            b.assign("total", plus(Expr::lookup("total"), Expr::lookup("i")));
        });
        f.loop_(
            Some(init),
            Some(less(Expr::lookup("i"), Expr::lookup("n"))),
            Some(post),
            body,
        );
        f.ret(Expr::lookup("total"));
        f.finish();
    })
}

// ============================================================================
// While loops
// ============================================================================

#[test]
fn test_while_sum() {
    let m = module("acme.Sum", |m| {
        let mut f = m.function("sum", &["n"]);
        f.var("total", Expr::int(0));
        f.var("i", Expr::int(1));
        let body = f.block(|b| {
            b.assign("total", plus(Expr::lookup("total"), Expr::lookup("i")));
            b.assign("i", plus(Expr::lookup("i"), Expr::int(1)));
        });
        f.while_(
            Expr::binary(BinaryOp::LessOrEquals, Expr::lookup("i"), Expr::lookup("n")),
            body,
        );
        f.ret(Expr::lookup("total"));
        f.finish();
    });
    expect_i32(&m, "sum", vec![Value::I32(10)], 55);
    expect_i32(&m, "sum", vec![Value::I32(0)], 0);
}

#[test]
fn test_while_false_never_runs() {
    let m = module("acme.Never", |m| {
        let mut f = m.function("f", &[]);
        f.var("x", Expr::int(1));
        let body = f.block(|b| b.assign("x", Expr::int(2)));
        f.while_(Expr::bool(false), body);
        f.ret(Expr::lookup("x"));
        f.finish();
    });
    expect_i32(&m, "f", vec![], 1);
}

#[test]
fn test_break_out_of_infinite_loop() {
    let m = module("acme.Break", |m| {
        let mut f = m.function("f", &[]);
        f.var("n", Expr::int(0));
        let body = f.block(|b| {
            b.assign("n", plus(Expr::lookup("n"), Expr::int(1)));
            let stop = b.block(|s| s.brk());
            b.if_(equals(Expr::lookup("n"), Expr::int(5)), stop, None);
        });
        f.loop_(None, None, None, body);
        f.ret(Expr::lookup("n"));
        f.finish();
    });
    expect_i32(&m, "f", vec![], 5);
}

// ============================================================================
// For loops
// ============================================================================

#[test]
fn test_continue_runs_post_statement() {
    // 0 + 1 + 2 + 4
    expect_i32(&skip_three(), "sum", vec![Value::I32(5)], 7);
}

#[test]
fn test_nested_loop_break_leaves_inner_only() {
    let m = module("acme.Nested", |m| {
        let mut f = m.function("count", &[]);
        f.var("count", Expr::int(0));
        let i = f.declare("i", ReferenceKind::Variable);
        let outer_init = f.assignment(i, Expr::int(0), true);
        let outer_post = f.assignment(i, plus(Expr::lookup("i"), Expr::int(1)), false);
        let outer_body = f.block(|b| {
            let j = b.declare("j", ReferenceKind::Variable);
            let init = b.assignment(j, Expr::int(0), true);
            let post = b.assignment(j, plus(Expr::lookup("j"), Expr::int(1)), false);
            let inner_body = b.block(|c| {
                let stop = c.block(|s| s.brk());
                c.if_(equals(Expr::lookup("j"), Expr::int(1)), stop, None);
                c.assign("count", plus(Expr::lookup("count"), Expr::int(1)));
            });
            b.loop_(
                Some(init),
                Some(less(Expr::lookup("j"), Expr::int(3))),
                Some(post),
                inner_body,
            );
        });
        f.loop_(
            Some(outer_init),
            Some(less(Expr::lookup("i"), Expr::int(3))),
            Some(outer_post),
            outer_body,
        );
        f.ret(Expr::lookup("count"));
        f.finish();
    });
    expect_i32(&m, "count", vec![], 3);
}

#[test]
fn test_guarded_loop_control_behaves_the_same() {
    let m = skip_three();
    let options = CompileOptions::default().with_loop_control(LoopControlStyle::GuardedConstant);
    let units = compile_with(&m, options).unwrap();
    let mut vm = Vm::new();
    vm.load_all(units.iter().map(|u| u.bytecode.as_slice())).unwrap();
    assert_eq!(vm.call("acme.Skip", "sum", vec![Value::I32(5)]).unwrap(), Value::I32(7));
}

#[test]
fn test_break_inside_try_in_loop() {
    let m = module("acme.TryLoop", |m| {
        let mut f = m.function("f", &[]);
        f.var("n", Expr::int(0));
        let body = f.block(|b| {
            let attempt = b.block(|t| {
                t.assign("n", plus(Expr::lookup("n"), Expr::int(1)));
                let stop = t.block(|s| s.brk());
                t.if_(equals(Expr::lookup("n"), Expr::int(3)), stop, None);
            });
            let handler = b.catch_block("e", |_| {});
            b.try_(attempt, Some(handler), None);
        });
        f.loop_(None, None, None, body);
        f.ret(Expr::lookup("n"));
        f.finish();
    });
    expect_i32(&m, "f", vec![], 3);
}

#[test]
fn test_break_from_finally_discards_pending_exception() {
    let m = module("acme.Swallow", |m| {
        let mut f = m.function("f", &[]);
        f.var("n", Expr::int(0));
        let body = f.block(|b| {
            let attempt = b.block(|t| t.throw(Expr::str("boom")));
            let finally = b.block(|fin| {
                fin.assign("n", plus(Expr::lookup("n"), Expr::int(1)));
                fin.brk();
            });
            b.try_(attempt, None, Some(finally));
        });
        f.loop_(None, None, None, body);
        f.ret(Expr::lookup("n"));
        f.finish();
    });
    expect_i32(&m, "f", vec![], 1);
}
