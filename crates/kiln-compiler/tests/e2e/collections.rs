//! Collection literal and builtin method tests

use super::harness::*;
use kiln_core::{Value, VmError};
use kiln_ir::{CollectionKind, Expr, MethodInvocation};

fn literal(kind: CollectionKind, items: &[i32]) -> Expr {
    Expr::collection(kind, items.iter().map(|&i| Expr::int(i)).collect())
}

fn pair(key: i32, value: i32) -> Expr {
    literal(CollectionKind::Tuple, &[key, value])
}

fn returning(value: Expr) -> kiln_ir::Module {
    module("acme.Collections", |m| {
        let mut f = m.function("value", &[]);
        f.ret(value);
        f.finish();
    })
}

fn call(receiver: Expr, name: &str, args: Vec<Expr>) -> Expr {
    Expr::method_call(receiver, MethodInvocation::new(name, args))
}

// ============================================================================
// Literals
// ============================================================================

#[test]
fn test_array_literal() {
    let m = returning(literal(CollectionKind::Array, &[1, 2, 3]));
    expect_value(
        &m,
        "value",
        vec![],
        Value::array(vec![Value::I32(1), Value::I32(2), Value::I32(3)]),
    );
}

#[test]
fn test_tuple_literal() {
    let m = returning(literal(CollectionKind::Tuple, &[1, 2]));
    expect_value(&m, "value", vec![], Value::tuple(vec![Value::I32(1), Value::I32(2)]));
}

#[test]
fn test_list_and_vector_literals() {
    expect_display(&returning(literal(CollectionKind::List, &[3, 1])), "value", vec![], "[3, 1]");
    expect_display(
        &returning(literal(CollectionKind::Vector, &[4, 5])),
        "value",
        vec![],
        "vector[4, 5]",
    );
}

#[test]
fn test_set_literal_drops_duplicates() {
    let m = returning(literal(CollectionKind::Set, &[1, 1, 2]));
    expect_display(&m, "value", vec![], "set[1, 2]");
}

#[test]
fn test_map_literal() {
    let m = returning(Expr::collection(CollectionKind::Map, vec![pair(1, 2), pair(3, 4)]));
    let value = compile_and_run(&m, "value", vec![]).unwrap();
    assert_eq!(
        value.entries(),
        Some(vec![
            (Value::I32(1), Value::I32(2)),
            (Value::I32(3), Value::I32(4)),
        ])
    );
    assert_eq!(value.to_string(), "{1=2, 3=4}");
}

#[test]
fn test_map_literal_last_key_wins() {
    let m = returning(Expr::collection(CollectionKind::Map, vec![pair(1, 2), pair(1, 5)]));
    expect_display(&m, "value", vec![], "{1=5}");
}

#[test]
fn test_empty_literals() {
    expect_display(&returning(literal(CollectionKind::List, &[])), "value", vec![], "[]");
    expect_display(&returning(Expr::collection(CollectionKind::Map, vec![])), "value", vec![], "{}");
}

// ============================================================================
// Builtin methods
// ============================================================================

#[test]
fn test_list_methods() {
    let m = module("acme.Lists", |m| {
        let mut f = m.function("f", &[]);
        f.let_("items", literal(CollectionKind::List, &[1]));
        f.expr(call(Expr::lookup("items"), "add", vec![Expr::int(7)]));
        f.ret(call(Expr::lookup("items"), "get", vec![Expr::int(1)]));
        f.finish();
    });
    expect_i32(&m, "f", vec![], 7);
}

#[test]
fn test_map_methods() {
    let m = module("acme.Maps", |m| {
        let mut f = m.function("f", &["key"]);
        f.let_("table", Expr::collection(CollectionKind::Map, vec![pair(1, 10)]));
        f.expr(call(Expr::lookup("table"), "put", vec![Expr::int(2), Expr::int(20)]));
        f.ret(call(Expr::lookup("table"), "get", vec![Expr::lookup("key")]));
        f.finish();
    });
    expect_i32(&m, "f", vec![Value::I32(2)], 20);
    expect_value(&m, "f", vec![Value::I32(3)], Value::Null);
}

#[test]
fn test_string_methods() {
    let m = returning(call(Expr::str("kiln"), "toUpperCase", vec![]));
    expect_value(&m, "value", vec![], Value::str("KILN"));
}

#[test]
fn test_out_of_bounds_is_catchable() {
    let m = module("acme.Bounds", |m| {
        let mut f = m.function("f", &[]);
        let attempt = f.block(|t| {
            t.ret(call(literal(CollectionKind::List, &[]), "get", vec![Expr::int(0)]))
        });
        let handler = f.catch_block("e", |c| c.ret(Expr::str("caught")));
        f.try_(attempt, Some(handler), None);
        f.finish();
    });
    expect_value(&m, "f", vec![], Value::str("caught"));
}

// ============================================================================
// Null receivers
// ============================================================================

#[test]
fn test_elvis_call_on_null() {
    let m = module("acme.Elvis", |m| {
        let mut f = m.function("size", &["items"]);
        f.ret(Expr::elvis_call(
            Expr::lookup("items"),
            MethodInvocation::new("size", vec![]),
        ));
        f.finish();
    });
    expect_value(&m, "size", vec![Value::Null], Value::Null);
    expect_i32(&m, "size", vec![Value::list(vec![Value::I32(1)])], 1);
}

#[test]
fn test_method_on_null_fails() {
    let m = module("acme.Npe", |m| {
        let mut f = m.function("f", &["items"]);
        f.ret(call(Expr::lookup("items"), "size", vec![]));
        f.finish();
    });
    assert!(matches!(
        compile_and_run(&m, "f", vec![Value::Null]),
        Err(E2EError::Vm(VmError::NullPointer))
    ));
}

#[test]
fn test_unknown_method_fails() {
    let m = returning(call(Expr::int(1), "frobnicate", vec![]));
    assert!(matches!(
        compile_and_run(&m, "value", vec![]),
        Err(E2EError::Vm(VmError::Link(_)))
    ));
}
