//! Function tests
//!
//! Tests for calls between module functions, named and varargs arguments,
//! function references, decorators and entry points.

use super::harness::*;
use kiln_compiler::CompileOptions;
use kiln_core::{Value, Vm, VmError, VmOptions};
use kiln_ir::{BinaryOp, CollectionKind, ElseBranch, Expr, MethodInvocation};

fn size_of(name: &str) -> Expr {
    Expr::method_call(Expr::lookup(name), MethodInvocation::new("size", vec![]))
}

// ============================================================================
// Calls
// ============================================================================

#[test]
fn test_simple_function() {
    let m = module("acme.Simple", |m| {
        let mut f = m.function("f", &["x"]);
        f.let_("y", Expr::int(1));
        f.ret(Expr::binary(BinaryOp::Plus, Expr::lookup("x"), Expr::lookup("y")));
        f.finish();
    });
    expect_i32(&m, "f", vec![Value::I32(5)], 6);
}

#[test]
fn test_recursive_fibonacci() {
    let m = module("acme.Fib", |m| {
        let mut f = m.function("fib", &["n"]);
        let base = f.block(|b| b.ret(Expr::lookup("n")));
        f.if_(
            Expr::binary(BinaryOp::Less, Expr::lookup("n"), Expr::int(2)),
            base,
            None,
        );
        let minus = |k| Expr::binary(BinaryOp::Minus, Expr::lookup("n"), Expr::int(k));
        let left = f.call("fib", vec![minus(1)]);
        let right = f.call("fib", vec![minus(2)]);
        f.ret(Expr::binary(BinaryOp::Plus, left, right));
        f.finish();
    });
    expect_i32(&m, "fib", vec![Value::I32(10)], 55);
}

#[test]
fn test_else_if_chain() {
    let m = module("acme.Sign", |m| {
        let mut f = m.function("sign", &["n"]);
        let negative = f.block(|b| b.ret(Expr::int(-1)));
        let positive = f.block(|b| b.ret(Expr::int(1)));
        let zero = f.block(|b| b.ret(Expr::int(0)));
        let nested = f.conditional(
            Expr::binary(BinaryOp::More, Expr::lookup("n"), Expr::int(0)),
            positive,
            Some(ElseBranch::Block(zero)),
        );
        f.if_(
            Expr::binary(BinaryOp::Less, Expr::lookup("n"), Expr::int(0)),
            negative,
            Some(ElseBranch::If(Box::new(nested))),
        );
        f.finish();
    });
    expect_i32(&m, "sign", vec![Value::I32(-4)], -1);
    expect_i32(&m, "sign", vec![Value::I32(9)], 1);
    expect_i32(&m, "sign", vec![Value::I32(0)], 0);
}

#[test]
fn test_function_without_return_yields_null() {
    let m = module("acme.Void", |m| {
        let mut f = m.function("f", &[]);
        f.expr(Expr::int(1));
        f.finish();
    });
    expect_value(&m, "f", vec![], Value::Null);
}

#[test]
fn test_unbounded_recursion_overflows() {
    let m = module("acme.Forever", |m| {
        let mut f = m.function("f", &[]);
        let call = f.call("f", vec![]);
        f.ret(call);
        f.finish();
    });
    let units = compile(&m).unwrap();
    let mut vm = Vm::with_options(VmOptions {
        max_call_depth: 16,
        ..VmOptions::default()
    });
    vm.load_all(units.iter().map(|u| u.bytecode.as_slice())).unwrap();
    assert!(matches!(
        vm.call("acme.Forever", "f", vec![]),
        Err(VmError::StackOverflow)
    ));
}

#[test]
fn test_unknown_function_fails_at_link_time() {
    let m = module("acme.Missing", |m| {
        let mut f = m.function("f", &[]);
        let call = f.call("nowhere", vec![]);
        f.ret(call);
        f.finish();
    });
    assert!(matches!(
        compile_and_run(&m, "f", vec![]),
        Err(E2EError::Vm(VmError::Link(_)))
    ));
}

// ============================================================================
// Arguments
// ============================================================================

#[test]
fn test_named_arguments() {
    let m = module("acme.Named", |m| {
        let mut sub = m.function("sub", &["a", "b"]);
        sub.ret(Expr::binary(BinaryOp::Minus, Expr::lookup("a"), Expr::lookup("b")));
        sub.finish();

        let mut f = m.function("f", &[]);
        let call = f.named_call("sub", vec![("b", Expr::int(1)), ("a", Expr::int(10))]);
        f.ret(call);
        f.finish();
    });
    expect_i32(&m, "f", vec![], 9);
}

#[test]
fn test_varargs_function() {
    let m = module("acme.Varargs", |m| {
        let mut count = m.function("count", &["first", "rest"]).varargs();
        count.ret(Expr::binary(BinaryOp::Plus, Expr::lookup("first"), size_of("rest")));
        count.finish();

        let mut many = m.function("many", &[]);
        let call = many.call("count", vec![Expr::int(10), Expr::int(2), Expr::int(3)]);
        many.ret(call);
        many.finish();

        let mut none = m.function("none", &[]);
        let call = none.call("count", vec![Expr::int(10)]);
        none.ret(call);
        none.finish();

        let mut packed = m.function("packed", &[]);
        let items = Expr::collection(CollectionKind::Array, vec![Expr::int(1), Expr::int(2)]);
        let call = packed.call("count", vec![Expr::int(10), items]);
        packed.ret(call);
        packed.finish();
    });
    expect_i32(&m, "many", vec![], 12);
    expect_i32(&m, "none", vec![], 10);
    expect_i32(&m, "packed", vec![], 12);
}

// ============================================================================
// Function references and decorators
// ============================================================================

#[test]
fn test_function_reference() {
    let m = module("acme.Refs", |m| {
        let mut double = m.function("double", &["n"]);
        double.ret(Expr::binary(BinaryOp::Times, Expr::lookup("n"), Expr::int(2)));
        double.finish();

        let mut f = m.function("f", &[]);
        let reference = Expr::function_ref(None, "double");
        f.ret(Expr::anon_call(reference, f.anonymous(vec![Expr::int(21)])));
        f.finish();
    });
    expect_i32(&m, "f", vec![], 42);
}

#[test]
fn test_reference_to_predefined_function() {
    let m = module("acme.PrintRef", |m| {
        let mut f = m.function("main", &[]).main();
        let reference = Expr::function_ref(Some("kiln.Predefined"), "println");
        let call = Expr::anon_call(reference, f.anonymous(vec![Expr::str("via handle")]));
        f.expr(call);
        f.finish();
    });
    expect_output(&m, "via handle\n");
}

#[test]
fn test_decorated_function() {
    let m = module("acme.Decorated", |m| {
        // doubled() returns |func| |x| func(x) * 2
        let mut factory = m.function("doubled", &[]).decorator();
        let decorator = factory.closure(&[], &["func"], |c| {
            let wrapper = c.closure(&["func"], &["x"], |w| {
                let inner = Expr::anon_call(
                    Expr::lookup("func"),
                    w.anonymous(vec![Expr::lookup("x")]),
                );
                w.ret(Expr::binary(BinaryOp::Times, inner, Expr::int(2)));
            });
            c.ret(wrapper);
        });
        factory.ret(decorator);
        factory.finish();

        let mut inc = m.function("inc", &["x"]).decorated_by("doubled");
        inc.ret(Expr::binary(BinaryOp::Plus, Expr::lookup("x"), Expr::int(1)));
        inc.finish();

        let mut f = m.function("f", &[]);
        let call = f.call("inc", vec![Expr::int(5)]);
        f.ret(call);
        f.finish();
    });
    expect_i32(&m, "f", vec![], 12);
}

// ============================================================================
// Entry points
// ============================================================================

#[test]
fn test_main_prints() {
    let m = module("acme.Hello", |m| {
        let mut main = m.function("main", &["args"]).main();
        let count = Expr::method_call(Expr::lookup("args"), MethodInvocation::new("size", vec![]));
        let line = Expr::binary(BinaryOp::Plus, Expr::str("hello "), count);
        let call = main.call("println", vec![line]);
        main.expr(call);
        main.finish();
    });
    expect_output(&m, "hello 0\n");
}

#[test]
fn test_main_receives_arguments() {
    let m = module("acme.Args", |m| {
        let mut main = m.function("main", &["args"]).main();
        let first = Expr::method_call(
            Expr::lookup("args"),
            MethodInvocation::new("get", vec![Expr::int(0)]),
        );
        let call = main.call("print", vec![first]);
        main.expr(call);
        main.finish();
    });
    let mut vm = load(&[&m]).unwrap();
    vm.run_main("acme.Args", &["first", "second"]).unwrap();
    assert_eq!(vm.output(), "first");
}

#[test]
fn test_units_without_debug_info_still_run() {
    let m = module("acme.NoDebug", |m| {
        let mut f = m.function("f", &["x"]);
        f.ret(Expr::binary(BinaryOp::Times, Expr::lookup("x"), Expr::lookup("x")));
        f.finish();
    });
    let units = compile_with(&m, CompileOptions::default().with_debug_info(false)).unwrap();
    let mut vm = Vm::new();
    vm.load_all(units.iter().map(|u| u.bytecode.as_slice())).unwrap();
    assert_eq!(vm.call("acme.NoDebug", "f", vec![Value::I32(7)]).unwrap(), Value::I32(49));
}
