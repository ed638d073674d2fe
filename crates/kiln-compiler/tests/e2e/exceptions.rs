//! Exception handling tests
//!
//! Tests for throw, try/catch, try/finally and try/catch/finally, including
//! runtime errors caught as values and rethrows from handlers.

use super::harness::*;
use kiln_core::{Value, VmError};
use kiln_ir::{BinaryOp, CatchClause, CollectionKind, Expr, MethodInvocation, ReferenceKind};

fn add_to(list: &str, value: i32) -> Expr {
    Expr::method_call(
        Expr::lookup(list),
        MethodInvocation::new("add", vec![Expr::int(value)]),
    )
}

// ============================================================================
// Try / Catch
// ============================================================================

#[test]
fn test_try_catch_no_throw() {
    let m = module("acme.NoThrow", |m| {
        let mut f = m.function("f", &[]);
        let attempt = f.block(|t| t.ret(Expr::int(42)));
        let handler = f.catch_block("e", |c| c.ret(Expr::int(-1)));
        f.try_(attempt, Some(handler), None);
        f.ret(Expr::int(0));
        f.finish();
    });
    expect_i32(&m, "f", vec![], 42);
}

#[test]
fn test_catch_receives_thrown_value() {
    let m = module("acme.Catch", |m| {
        let mut f = m.function("f", &[]);
        let attempt = f.block(|t| t.throw(Expr::int(41)));
        let handler = f.catch_block("e", |c| {
            c.ret(Expr::binary(BinaryOp::Plus, Expr::lookup("e"), Expr::int(1)))
        });
        f.try_(attempt, Some(handler), None);
        f.ret(Expr::int(0));
        f.finish();
    });
    expect_i32(&m, "f", vec![], 42);
}

#[test]
fn test_catch_variable_declared_after_other_locals() {
    let m = module("acme.CatchSlot", |m| {
        let mut f = m.function("f", &[]);
        let attempt = f.block(|t| t.throw(Expr::int(41)));
        let block = f.block(|c| {
            let tmp = c.declare("tmp", ReferenceKind::Variable);
            c.declare("e", ReferenceKind::Constant);
            c.assign_ref(tmp, Expr::int(0), true);
            c.ret(Expr::lookup("e"));
        });
        let handler = CatchClause {
            exception: "e".to_string(),
            block,
        };
        f.try_(attempt, Some(handler), None);
        f.finish();
    });
    expect_i32(&m, "f", vec![], 41);
}

#[test]
fn test_catch_runtime_error_message() {
    let m = module("acme.Divide", |m| {
        let mut f = m.function("f", &["d"]);
        let attempt = f.block(|t| {
            t.ret(Expr::binary(BinaryOp::Divide, Expr::int(1), Expr::lookup("d")))
        });
        let handler = f.catch_block("e", |c| c.ret(Expr::lookup("e")));
        f.try_(attempt, Some(handler), None);
        f.finish();
    });
    expect_i32(&m, "f", vec![Value::I32(1)], 1);
    expect_value(
        &m,
        "f",
        vec![Value::I32(0)],
        Value::str("Runtime error: Division by zero"),
    );
}

#[test]
fn test_exception_crosses_call_boundary() {
    let m = module("acme.Cross", |m| {
        let mut g = m.function("g", &[]);
        g.throw(Expr::int(5));
        g.finish();

        let mut f = m.function("f", &[]);
        let attempt = f.block(|t| {
            let call = t.call("g", vec![]);
            t.ret(call);
        });
        let handler = f.catch_block("e", |c| {
            c.ret(Expr::binary(BinaryOp::Plus, Expr::lookup("e"), Expr::int(1)))
        });
        f.try_(attempt, Some(handler), None);
        f.finish();
    });
    expect_i32(&m, "f", vec![], 6);
}

#[test]
fn test_raise_from_predefined() {
    let m = module("acme.Raise", |m| {
        let mut f = m.function("f", &[]);
        let call = f.call("raise", vec![Expr::str("bad input")]);
        f.expr(call);
        f.finish();
    });
    assert_eq!(expect_thrown(&m, "f", vec![]), Value::str("bad input"));
}

#[test]
fn test_rethrow_from_catch() {
    let m = module("acme.Rethrow", |m| {
        let mut f = m.function("f", &[]);
        let attempt = f.block(|t| t.throw(Expr::int(1)));
        let handler = f.catch_block("e", |c| {
            c.throw(Expr::binary(BinaryOp::Plus, Expr::lookup("e"), Expr::int(1)))
        });
        f.try_(attempt, Some(handler), None);
        f.finish();
    });
    assert_eq!(expect_thrown(&m, "f", vec![]), Value::I32(2));
}

// ============================================================================
// Finally
// ============================================================================

#[test]
fn test_try_catch_finally_order() {
    let m = module("acme.Order", |m| {
        let mut f = m.function("f", &["fail"]);
        f.let_("trace", Expr::collection(CollectionKind::List, vec![]));
        let attempt = f.block(|t| {
            let fail = t.block(|b| b.throw(Expr::str("x")));
            t.if_(Expr::lookup("fail"), fail, None);
            t.expr(add_to("trace", 1));
        });
        let handler = f.catch_block("e", |c| c.expr(add_to("trace", 1)));
        let finally = f.block(|fin| fin.expr(add_to("trace", 2)));
        f.try_(attempt, Some(handler), Some(finally));
        f.ret(Expr::lookup("trace"));
        f.finish();
    });
    expect_display(&m, "f", vec![Value::Bool(false)], "[1, 2]");
    expect_display(&m, "f", vec![Value::Bool(true)], "[1, 2]");
}

#[test]
fn test_try_finally_rethrows_after_cleanup() {
    let m = module("acme.Cleanup", |m| {
        let mut f = m.function("f", &[]);
        let attempt = f.block(|t| t.throw(Expr::str("boom")));
        let finally = f.block(|fin| {
            let call = fin.call("println", vec![Expr::str("cleanup")]);
            fin.expr(call);
        });
        f.try_(attempt, None, Some(finally));
        f.ret(Expr::int(0));
        f.finish();
    });
    let mut vm = load(&[&m]).unwrap();
    match vm.call("acme.Cleanup", "f", vec![]) {
        Err(VmError::Thrown(value)) => assert_eq!(value, Value::str("boom")),
        other => panic!("expected the exception to escape, got {:?}", other.map(|v| v.to_string())),
    }
    assert_eq!(vm.output(), "cleanup\n");
}

#[test]
fn test_finally_runs_when_catch_throws() {
    let m = module("acme.CatchThrows", |m| {
        let mut f = m.function("f", &[]);
        let attempt = f.block(|t| t.throw(Expr::int(1)));
        let handler = f.catch_block("e", |c| c.throw(Expr::int(2)));
        let finally = f.block(|fin| {
            let call = fin.call("print", vec![Expr::str("finally")]);
            fin.expr(call);
        });
        f.try_(attempt, Some(handler), Some(finally));
        f.finish();
    });
    let mut vm = load(&[&m]).unwrap();
    assert!(matches!(
        vm.call("acme.CatchThrows", "f", vec![]),
        Err(VmError::Thrown(Value::I32(2)))
    ));
    assert_eq!(vm.output(), "finally");
}

#[test]
fn test_try_without_handlers_runs_block() {
    let m = module("acme.TryOnly", |m| {
        let mut f = m.function("f", &[]);
        f.var("x", Expr::int(0));
        let attempt = f.block(|t| t.assign("x", Expr::int(9)));
        f.try_(attempt, None, None);
        f.ret(Expr::lookup("x"));
        f.finish();
    });
    expect_i32(&m, "f", vec![], 9);
}
