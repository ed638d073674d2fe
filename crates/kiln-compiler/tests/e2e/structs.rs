//! Struct tests
//!
//! Structs are built through the constructors of their unit; members are
//! read and written through the generated accessors or the runtime methods.

use super::harness::*;
use kiln_core::{Value, VmError};
use kiln_ir::{BinaryOp, Expr, MethodInvocation, Module, ModuleBuilder};

fn call(receiver: Expr, name: &str, args: Vec<Expr>) -> Expr {
    Expr::method_call(receiver, MethodInvocation::new(name, args))
}

fn declare_point(m: &mut ModuleBuilder) {
    m.structure("Point", &["x", "y", "_tag"]);
}

/// `make(x, y)`, `sum(p)` and `shift(p)` over the `Point` struct
fn shapes() -> Module {
    module("acme.Shapes", |m| {
        declare_point(m);

        let mut make = m.function("make", &["x", "y"]);
        let point = make.call("Point", vec![Expr::lookup("x"), Expr::lookup("y"), Expr::str("p")]);
        make.ret(point);
        make.finish();

        let mut sum = m.function("sum", &["p"]);
        sum.ret(Expr::binary(
            BinaryOp::Plus,
            call(Expr::lookup("p"), "x", vec![]),
            call(Expr::lookup("p"), "y", vec![]),
        ));
        sum.finish();

        let mut shift = m.function("shift", &["p"]);
        let moved = call(
            call(Expr::lookup("p"), "x", vec![Expr::int(10)]),
            "y",
            vec![Expr::int(20)],
        );
        shift.ret(moved);
        shift.finish();

        let mut tag = m.function("tag", &["p"]);
        tag.ret(call(Expr::lookup("p"), "_tag", vec![]));
        tag.finish();
    })
}

// ============================================================================
// Constructors and accessors
// ============================================================================

#[test]
fn test_constructor_and_getters() {
    let m = shapes();
    let mut vm = load(&[&m]).unwrap();
    let p = vm.call("acme.Shapes", "make", vec![Value::I32(1), Value::I32(2)]).unwrap();
    assert_eq!(p.type_name(), "acme.Shapes.types.Point");
    assert_eq!(p.to_string(), "struct Point{x=1, y=2}");
    assert_eq!(vm.call("acme.Shapes", "sum", vec![p.clone()]).unwrap(), Value::I32(3));
    assert_eq!(vm.call("acme.Shapes", "tag", vec![p]).unwrap(), Value::str("p"));
}

#[test]
fn test_setters_chain_and_mutate_in_place() {
    let m = shapes();
    let mut vm = load(&[&m]).unwrap();
    let p = vm.call("acme.Shapes", "make", vec![Value::I32(1), Value::I32(2)]).unwrap();
    let moved = vm.call("acme.Shapes", "shift", vec![p.clone()]).unwrap();
    assert!(moved.same(&p));
    assert_eq!(p.to_string(), "struct Point{x=10, y=20}");
}

#[test]
fn test_empty_constructor_fills_nulls() {
    let m = module("acme.Blank", |m| {
        declare_point(m);
        let mut f = m.function("f", &[]);
        let point = f.call("Point", vec![]);
        f.ret(call(point, "x", vec![]));
        f.finish();
    });
    expect_value(&m, "f", vec![], Value::Null);
}

#[test]
fn test_mutable_structs_compare_by_identity() {
    let m = module("acme.Same", |m| {
        declare_point(m);
        let mut f = m.function("f", &["frozen"]);
        f.let_("a", f.call("Point", vec![Expr::int(1), Expr::int(2), Expr::null()]));
        f.let_("b", call(Expr::lookup("a"), "copy", vec![]));
        let frozen = f.block(|t| {
            t.ret(Expr::binary(
                BinaryOp::Equals,
                call(Expr::lookup("a"), "frozenCopy", vec![]),
                call(Expr::lookup("b"), "frozenCopy", vec![]),
            ))
        });
        f.if_(Expr::lookup("frozen"), frozen, None);
        f.ret(Expr::binary(BinaryOp::Equals, Expr::lookup("a"), Expr::lookup("b")));
        f.finish();
    });
    expect_bool(&m, "f", vec![Value::Bool(false)], false);
    expect_bool(&m, "f", vec![Value::Bool(true)], true);
}

// ============================================================================
// Frozen copies and runtime methods
// ============================================================================

#[test]
fn test_frozen_struct_rejects_updates() {
    let m = module("acme.Frozen", |m| {
        declare_point(m);
        let mut f = m.function("f", &[]);
        f.let_("p", f.call("Point", vec![Expr::int(1), Expr::int(2), Expr::null()]));
        f.let_("q", call(Expr::lookup("p"), "frozenCopy", vec![]));
        let attempt = f.block(|t| {
            t.expr(call(Expr::lookup("q"), "x", vec![Expr::int(5)]));
            t.ret(Expr::str("updated"));
        });
        let handler = f.catch_block("e", |c| c.ret(Expr::lookup("e")));
        f.try_(attempt, Some(handler), None);
        f.finish();
    });
    expect_value(
        &m,
        "f",
        vec![],
        Value::str("Runtime error: Frozen struct acme.Frozen.types.Point cannot be updated"),
    );
}

#[test]
fn test_runtime_member_methods() {
    let m = module("acme.Reflect", |m| {
        declare_point(m);
        let mut f = m.function("f", &[]);
        f.let_("p", f.call("Point", vec![Expr::int(1), Expr::int(2), Expr::null()]));
        f.expr(call(Expr::lookup("p"), "set", vec![Expr::str("y"), Expr::int(7)]));
        f.ret(call(Expr::lookup("p"), "values", vec![]));
        f.finish();
    });
    expect_value(&m, "f", vec![], Value::array(vec![Value::I32(1), Value::I32(7)]));
}

// ============================================================================
// Units and visibility
// ============================================================================

#[test]
fn test_struct_unit_is_loaded() {
    let m = shapes();
    let mut vm = load(&[&m]).unwrap();
    assert!(vm.has_unit("acme.Shapes.types.Point"));
    assert_eq!(
        vm.call("acme.Shapes.types.Point", "$members", vec![]).unwrap(),
        Value::array(vec![Value::str("x"), Value::str("y")])
    );
}

#[test]
fn test_imported_struct_hides_private_members() {
    let shapes = shapes();
    let app = module("acme.App", |m| {
        m.import("acme.Shapes");
        let mut f = m.function("f", &["private"]);
        f.let_("p", f.call("Point", vec![Expr::int(3), Expr::int(4), Expr::str("t")]));
        let hidden = f.block(|t| t.ret(call(Expr::lookup("p"), "_tag", vec![])));
        f.if_(Expr::lookup("private"), hidden, None);
        f.ret(call(Expr::lookup("p"), "x", vec![]));
        f.finish();
    });
    let mut vm = load(&[&shapes, &app]).unwrap();
    assert_eq!(
        vm.call("acme.App", "f", vec![Value::Bool(false)]).unwrap(),
        Value::I32(3)
    );
    assert!(matches!(
        vm.call("acme.App", "f", vec![Value::Bool(true)]),
        Err(VmError::Link(_))
    ));
}
