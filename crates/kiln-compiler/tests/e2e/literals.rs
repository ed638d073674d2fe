//! Literal and operator tests
//!
//! Tests for constants loaded by every literal kind and operator sites.

use super::harness::*;
use kiln_core::Value;
use kiln_ir::{BinaryOp, Expr};
use std::rc::Rc;

fn returning(value: Expr) -> kiln_ir::Module {
    module("acme.Literals", |m| {
        let mut f = m.function("value", &[]);
        f.ret(value);
        f.finish();
    })
}

// ============================================================================
// Constants
// ============================================================================

#[test]
fn test_null_literal() {
    expect_value(&returning(Expr::null()), "value", vec![], Value::Null);
}

#[test]
fn test_boolean_literals() {
    expect_bool(&returning(Expr::bool(true)), "value", vec![], true);
    expect_bool(&returning(Expr::bool(false)), "value", vec![], false);
}

#[test]
fn test_integer_literal() {
    expect_i32(&returning(Expr::int(17)), "value", vec![], 17);
    expect_i32(&returning(Expr::int(-2_000_000_000)), "value", vec![], -2_000_000_000);
}

#[test]
fn test_long_literal() {
    expect_value(&returning(Expr::long(9_000_000_000)), "value", vec![], Value::I64(9_000_000_000));
}

#[test]
fn test_floating_point_literals() {
    expect_value(&returning(Expr::double(3.14)), "value", vec![], Value::F64(3.14));
    expect_value(&returning(Expr::float(0.5)), "value", vec![], Value::F32(0.5));
}

#[test]
fn test_string_and_char_literals() {
    expect_value(&returning(Expr::str("hi")), "value", vec![], Value::str("hi"));
    expect_value(&returning(Expr::char('c')), "value", vec![], Value::Char('c'));
}

#[test]
fn test_class_reference() {
    expect_value(
        &returning(Expr::class_ref("kiln.lang.String")),
        "value",
        vec![],
        Value::Type(Rc::from("kiln.lang.String")),
    );
}

// ============================================================================
// Operators
// ============================================================================

#[test]
fn test_arithmetic_promotes_operands() {
    let m = returning(Expr::binary(BinaryOp::Plus, Expr::int(1), Expr::long(2)));
    expect_value(&m, "value", vec![], Value::I64(3));

    let m = returning(Expr::binary(BinaryOp::Times, Expr::int(3), Expr::double(0.5)));
    expect_value(&m, "value", vec![], Value::F64(1.5));
}

#[test]
fn test_string_concatenation() {
    let m = returning(Expr::binary(BinaryOp::Plus, Expr::str("n="), Expr::int(4)));
    expect_value(&m, "value", vec![], Value::str("n=4"));
}

#[test]
fn test_comparison_and_negation() {
    let m = returning(Expr::not(Expr::binary(
        BinaryOp::LessOrEquals,
        Expr::int(3),
        Expr::int(2),
    )));
    expect_bool(&m, "value", vec![], true);
}

#[test]
fn test_and_or_short_circuit() {
    // The right operand would fail if evaluated
    let failing = Expr::binary(BinaryOp::Less, Expr::int(1), Expr::str("x"));
    let m = returning(Expr::binary(BinaryOp::And, Expr::bool(false), failing.clone()));
    expect_bool(&m, "value", vec![], false);
    let m = returning(Expr::binary(BinaryOp::Or, Expr::bool(true), failing));
    expect_bool(&m, "value", vec![], true);
}

#[test]
fn test_or_if_null() {
    let m = returning(Expr::binary(BinaryOp::OrIfNull, Expr::null(), Expr::int(8)));
    expect_i32(&m, "value", vec![], 8);
}

#[test]
fn test_identity_and_equality() {
    let m = module("acme.Identity", |m| {
        let mut f = m.function("same", &["a", "b"]);
        f.ret(Expr::binary(BinaryOp::Is, Expr::lookup("a"), Expr::lookup("b")));
        f.finish();
        let mut f = m.function("equal", &["a", "b"]);
        f.ret(Expr::binary(BinaryOp::Equals, Expr::lookup("a"), Expr::lookup("b")));
        f.finish();
    });
    let list = Value::list(vec![]);
    expect_bool(&m, "same", vec![list.clone(), list], true);
    expect_bool(&m, "same", vec![Value::list(vec![]), Value::list(vec![])], false);
    expect_bool(&m, "equal", vec![Value::I32(2), Value::I64(2)], true);
}
