//! Extension tests
//!
//! Functions added to existing types, directly or through named groups, and
//! looked up by the runtime through the module's extension tables.

use super::harness::*;
use kiln_core::{Value, VmError};
use kiln_ir::{BinaryOp, Expr, MethodInvocation, ModuleBuilder};

const STRING: &str = "kiln.lang.String";

fn call(receiver: Expr, name: &str, args: Vec<Expr>) -> Expr {
    Expr::method_call(receiver, MethodInvocation::new(name, args))
}

fn add_shout(m: &mut ModuleBuilder) {
    let mut shout = m.extension(STRING, "shout", &["this"]);
    shout.ret(Expr::binary(
        BinaryOp::Plus,
        call(Expr::lookup("this"), "toUpperCase", vec![]),
        Expr::str("!"),
    ));
    shout.finish();
}

fn caller(m: &mut ModuleBuilder, method: &str) {
    let mut f = m.function("f", &["s"]);
    f.ret(call(Expr::lookup("s"), method, vec![]));
    f.finish();
}

// ============================================================================
// Extensions of a type
// ============================================================================

#[test]
fn test_string_extension() {
    let m = module("acme.Shout", |m| {
        add_shout(m);
        caller(m, "shout");
    });
    expect_value(&m, "f", vec![Value::str("hi")], Value::str("HI!"));
}

#[test]
fn test_integer_extension_with_argument() {
    let m = module("acme.Ints", |m| {
        let mut plus = m.extension("kiln.lang.Integer", "plusTimes", &["this", "n", "k"]);
        plus.ret(Expr::binary(
            BinaryOp::Times,
            Expr::binary(BinaryOp::Plus, Expr::lookup("this"), Expr::lookup("n")),
            Expr::lookup("k"),
        ));
        plus.finish();

        let mut f = m.function("f", &[]);
        f.ret(call(Expr::int(2), "plusTimes", vec![Expr::int(3), Expr::int(4)]));
        f.finish();
    });
    expect_i32(&m, "f", vec![], 20);
}

#[test]
fn test_extension_takes_precedence_over_builtin() {
    let m = module("acme.Override", |m| {
        let mut length = m.extension(STRING, "length", &["this"]);
        length.ret(Expr::int(-1));
        length.finish();
        caller(m, "length");
    });
    expect_i32(&m, "f", vec![Value::str("abc")], -1);
}

// ============================================================================
// Named groups
// ============================================================================

#[test]
fn test_named_group_applied_to_type() {
    let m = module("acme.Groups", |m| {
        let mut twice = m.named_extension("Text", "twice", &["this"]);
        twice.ret(Expr::binary(BinaryOp::Plus, Expr::lookup("this"), Expr::lookup("this")));
        twice.finish();
        m.apply_extension(STRING, "Text");
        caller(m, "twice");
    });
    expect_value(&m, "f", vec![Value::str("ab")], Value::str("abab"));
}

#[test]
fn test_named_group_not_applied_is_invisible() {
    let m = module("acme.Unapplied", |m| {
        let mut twice = m.named_extension("Text", "twice", &["this"]);
        twice.ret(Expr::lookup("this"));
        twice.finish();
        caller(m, "twice");
    });
    assert!(matches!(
        compile_and_run(&m, "f", vec![Value::str("ab")]),
        Err(E2EError::Vm(VmError::Link(_)))
    ));
}

// ============================================================================
// Across modules
// ============================================================================

#[test]
fn test_imported_extension() {
    let strings = module("acme.Strings", add_shout);
    let app = module("acme.App", |m| {
        m.import("acme.Strings");
        caller(m, "shout");
    });
    let mut vm = load(&[&strings, &app]).unwrap();
    assert_eq!(
        vm.call("acme.App", "f", vec![Value::str("ok")]).unwrap(),
        Value::str("OK!")
    );
}

#[test]
fn test_extension_needs_import() {
    let strings = module("acme.Strings", add_shout);
    let app = module("acme.Isolated", |m| caller(m, "shout"));
    let mut vm = load(&[&strings, &app]).unwrap();
    assert!(matches!(
        vm.call("acme.Isolated", "f", vec![Value::str("ok")]),
        Err(VmError::Link(_))
    ));
}

#[test]
fn test_extension_metadata() {
    let m = module("acme.Meta", |m| {
        add_shout(m);
        let mut twice = m.named_extension("Text", "twice", &["this"]);
        twice.ret(Expr::lookup("this"));
        twice.finish();
        m.apply_extension(STRING, "Text");
    });
    let mut vm = load(&[&m]).unwrap();
    assert!(vm.has_unit("acme.Meta$kiln$lang$String"));
    assert!(vm.has_unit("acme.Meta$Text"));
    assert_eq!(
        vm.call("acme.Meta", "$extensions", vec![]).unwrap(),
        Value::array(vec![Value::str(STRING)])
    );
    let hash = Value::I32(kiln_bytecode::string_hash(STRING));
    assert_eq!(
        vm.call("acme.Meta", "$extensionApplications", vec![hash]).unwrap(),
        Value::array(vec![Value::str("Text")])
    );
    assert_eq!(
        vm.call("acme.Meta", "$extensionApplications", vec![Value::I32(0)]).unwrap(),
        Value::array(vec![])
    );
}
