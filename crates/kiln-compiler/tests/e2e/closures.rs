//! Closure tests
//!
//! Tests for closures created over captured values, self-recursive closures,
//! varargs closures and chained anonymous calls.

use super::harness::*;
use kiln_core::Value;
use kiln_ir::{BinaryOp, ClosureOptions, ElseBranch, Expr, MethodInvocation};

fn plus(left: Expr, right: Expr) -> Expr {
    Expr::binary(BinaryOp::Plus, left, right)
}

// ============================================================================
// Captures
// ============================================================================

#[test]
fn test_closure_captures_snapshot() {
    let m = module("acme.Snapshot", |m| {
        let mut f = m.function("f", &[]);
        f.var("x", Expr::int(1));
        let closure = f.closure(&["x"], &[], |c| c.ret(Expr::lookup("x")));
        f.let_("c", closure);
        f.assign("x", Expr::int(2));
        let call = f.call("c", vec![]);
        f.ret(call);
        f.finish();
    });
    expect_i32(&m, "f", vec![], 1);
}

#[test]
fn test_closure_with_parameter() {
    let m = module("acme.Adder", |m| {
        let mut f = m.function("f", &["x"]);
        let closure = f.closure(&["x"], &["y"], |c| {
            c.ret(plus(Expr::lookup("x"), Expr::lookup("y")))
        });
        let call = Expr::anon_call(closure, f.anonymous(vec![Expr::int(4)]));
        f.ret(call);
        f.finish();
    });
    expect_i32(&m, "f", vec![Value::I32(3)], 7);
}

#[test]
fn test_closure_returned_and_called_later() {
    let m = module("acme.Curry", |m| {
        let mut adder = m.function("adder", &["a"]);
        let closure = adder.closure(&["a"], &["b"], |c| {
            c.ret(plus(Expr::lookup("a"), Expr::lookup("b")))
        });
        adder.ret(closure);
        adder.finish();

        let mut f = m.function("f", &[]);
        let call = f
            .invocation("adder", vec![Expr::int(1)])
            .with_anonymous_call(f.anonymous(vec![Expr::int(2)]));
        f.ret(Expr::Call(call));
        f.finish();
    });
    expect_i32(&m, "f", vec![], 3);
}

#[test]
fn test_closure_without_captures_is_shared() {
    let m = module("acme.Shared", |m| {
        let mut f = m.function("make", &[]);
        let closure = f.closure(&[], &[], |c| c.ret(Expr::int(1)));
        f.ret(closure);
        f.finish();

        let mut g = m.function("same", &[]);
        let first = g.call("make", vec![]);
        let second = g.call("make", vec![]);
        g.ret(Expr::binary(BinaryOp::Is, first, second));
        g.finish();
    });
    expect_bool(&m, "same", vec![], true);
}

#[test]
fn test_closure_calls_module_function() {
    let m = module("acme.Helpers", |m| {
        let mut double = m.function("double", &["n"]).private();
        double.ret(Expr::binary(BinaryOp::Times, Expr::lookup("n"), Expr::int(2)));
        double.finish();

        let mut f = m.function("f", &[]);
        let closure = f.closure(&[], &["v"], |c| {
            let call = c.call("double", vec![Expr::lookup("v")]);
            c.ret(call);
        });
        f.ret(Expr::anon_call(closure, f.anonymous(vec![Expr::int(21)])));
        f.finish();
    });
    expect_i32(&m, "f", vec![], 42);
}

// ============================================================================
// Recursion and varargs
// ============================================================================

#[test]
fn test_self_recursive_closure() {
    let m = module("acme.Fact", |m| {
        let mut f = m.function("f", &["n"]);
        let options = ClosureOptions {
            self_name: Some("fact".to_string()),
            ..ClosureOptions::default()
        };
        let closure = f.closure_with(options, &[], &["k"], |c| {
            let base = c.block(|b| b.ret(Expr::int(1)));
            let recurse = c.block(|b| {
                let call = b.call(
                    "fact",
                    vec![Expr::binary(BinaryOp::Minus, Expr::lookup("k"), Expr::int(1))],
                );
                b.ret(Expr::binary(BinaryOp::Times, Expr::lookup("k"), call));
            });
            c.if_(
                Expr::binary(BinaryOp::LessOrEquals, Expr::lookup("k"), Expr::int(1)),
                base,
                Some(ElseBranch::Block(recurse)),
            );
        });
        f.ret(Expr::anon_call(closure, f.anonymous(vec![Expr::lookup("n")])));
        f.finish();
    });
    expect_i32(&m, "f", vec![Value::I32(5)], 120);
}

#[test]
fn test_varargs_closure_collects_arguments() {
    let m = module("acme.Rest", |m| {
        let mut f = m.function("f", &[]);
        f.let_("base", Expr::int(10));
        let options = ClosureOptions {
            varargs: true,
            ..ClosureOptions::default()
        };
        let closure = f.closure_with(options, &["base"], &["rest"], |c| {
            let size = Expr::method_call(Expr::lookup("rest"), MethodInvocation::new("size", vec![]));
            c.ret(plus(Expr::lookup("base"), size));
        });
        f.let_("count", closure);
        let call = f.call("count", vec![Expr::int(1), Expr::int(2), Expr::int(3)]);
        f.ret(call);
        f.finish();
    });
    expect_i32(&m, "f", vec![], 13);
}
