//! Module state tests
//!
//! Module-level variables and constants live in unit globals behind accessor
//! call sites; the module initializer runs once, on first use.

use super::harness::*;
use kiln_core::Value;
use kiln_ir::{BinaryOp, Expr};

fn counter_module() -> kiln_ir::Module {
    module("acme.Counter", |m| {
        let counter = m.module_variable("counter");
        let step = m.module_constant("step");
        let mut init = m.module_initializer();
        init.assign_ref(counter, Expr::int(0), true);
        init.assign_ref(step, Expr::int(5), true);
        init.finish();

        let mut bump = m.function("bump", &[]);
        bump.assign(
            "counter",
            Expr::binary(BinaryOp::Plus, Expr::lookup("counter"), Expr::lookup("step")),
        );
        bump.ret(Expr::lookup("counter"));
        bump.finish();
    })
}

// ============================================================================
// Variables and constants
// ============================================================================

#[test]
fn test_module_variable_persists_between_calls() {
    let m = counter_module();
    let mut vm = load(&[&m]).unwrap();
    assert_eq!(vm.call("acme.Counter", "bump", vec![]).unwrap(), Value::I32(5));
    assert_eq!(vm.call("acme.Counter", "bump", vec![]).unwrap(), Value::I32(10));
    assert_eq!(vm.global("acme.Counter", "counter"), Some(Value::I32(10)));
    assert_eq!(vm.global("acme.Counter", "step"), Some(Value::I32(5)));
}

#[test]
fn test_state_before_first_call_is_null() {
    let m = counter_module();
    let vm = load(&[&m]).unwrap();
    assert_eq!(vm.global("acme.Counter", "counter"), Some(Value::Null));
    assert_eq!(vm.global("acme.Counter", "missing"), None);
}

#[test]
fn test_initializer_runs_once() {
    let m = module("acme.Once", |m| {
        let mut init = m.module_initializer();
        let call = init.call("print", vec![Expr::str("init;")]);
        init.expr(call);
        init.finish();

        let mut f = m.function("f", &[]);
        f.ret(Expr::int(1));
        f.finish();
    });
    let mut vm = load(&[&m]).unwrap();
    vm.call("acme.Once", "f", vec![]).unwrap();
    vm.call("acme.Once", "f", vec![]).unwrap();
    assert_eq!(vm.output(), "init;");
}

#[test]
fn test_module_state_holding_a_closure() {
    let m = module("acme.Handlers", |m| {
        let handler = m.module_variable("handler");
        let mut init = m.module_initializer();
        let closure = init.closure(&[], &["n"], |c| {
            c.ret(Expr::binary(BinaryOp::Times, Expr::lookup("n"), Expr::int(3)))
        });
        init.assign_ref(handler, closure, true);
        init.finish();

        let mut f = m.function("f", &["n"]);
        let call = f.call("handler", vec![Expr::lookup("n")]);
        f.ret(call);
        f.finish();
    });
    expect_i32(&m, "f", vec![Value::I32(4)], 12);
}

#[test]
fn test_closure_reads_module_state() {
    let m = module("acme.Prefix", |m| {
        let prefix = m.module_constant("prefix");
        let mut init = m.module_initializer();
        init.assign_ref(prefix, Expr::str("> "), true);
        init.finish();

        let mut f = m.function("f", &["s"]);
        let closure = f.closure(&[], &["v"], |c| {
            c.ret(Expr::binary(BinaryOp::Plus, Expr::lookup("prefix"), Expr::lookup("v")))
        });
        f.ret(Expr::anon_call(closure, f.anonymous(vec![Expr::lookup("s")])));
        f.finish();
    });
    expect_value(&m, "f", vec![Value::str("hi")], Value::str("> hi"));
}

// ============================================================================
// Checks
// ============================================================================

#[test]
fn test_module_constant_assigned_outside_initializer() {
    let m = module("acme.Frozen", |m| {
        m.module_constant("limit");
        let mut f = m.function("f", &[]);
        f.assign("limit", Expr::int(3));
        f.finish();
    });
    assert_eq!(expect_compile_problems(&m), vec!["K1001"]);
}
