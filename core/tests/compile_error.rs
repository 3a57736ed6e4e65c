//! Integration tests that expect resolution to fail, asserting on which
//! [corevm::CompileError] variant comes back.

mod common;

use common::*;
use corevm::ast::*;
use corevm::CompileError;

#[test]
fn test_break_outside_loop() {
    let program = main_procedure(vec![node(Stmt::Break)]);
    let (resolver, _log) = resolver_with_write();
    let errors = resolve_err(resolver, &program);
    assert!(
        errors.iter().any(|e| matches!(e, CompileError::BreakOutsideLoop)),
        "expected BreakOutsideLoop, got {:?}",
        errors
    );
}

#[test]
fn test_continue_outside_loop() {
    let program = main_procedure(vec![node(Stmt::Continue)]);
    let (resolver, _log) = resolver_with_write();
    let errors = resolve_err(resolver, &program);
    assert!(
        errors.iter().any(|e| matches!(e, CompileError::ContinueOutsideLoop)),
        "expected ContinueOutsideLoop, got {:?}",
        errors
    );
}

#[test]
fn test_undefined_identifier() {
    let program = main_procedure(vec![expr_stmt(call(ident("write"), vec![ident("nope")]))]);
    let (resolver, _log) = resolver_with_write();
    let errors = resolve_err(resolver, &program);
    assert!(
        errors.iter().any(|e| matches!(e, CompileError::UndefinedIdentifier { name } if name == "nope")),
        "expected UndefinedIdentifier(\"nope\"), got {:?}",
        errors
    );
}

#[test]
fn test_type_mismatch_on_call_argument() {
    let program = main_procedure(vec![expr_stmt(call(ident("write"), vec![boolean(true)]))]);
    let (resolver, _log) = resolver_with_write();
    let errors = resolve_err(resolver, &program);
    assert!(
        errors.iter().any(|e| matches!(e, CompileError::TypeMismatch { .. })),
        "expected TypeMismatch, got {:?}",
        errors
    );
}

#[test]
fn test_assign_to_non_lvalue() {
    // 1 = 2; — the literal `1` is not assignable.
    let program = main_procedure(vec![assign(int(1), int(2))]);
    let (resolver, _log) = resolver_with_write();
    let errors = resolve_err(resolver, &program);
    assert!(
        errors.iter().any(|e| matches!(e, CompileError::NotAnLvalue)),
        "expected NotAnLvalue, got {:?}",
        errors
    );
}

#[test]
fn test_redeclaration() {
    let program = main_procedure(vec![let_var("a", int(1)), let_var("a", int(2))]);
    let (resolver, _log) = resolver_with_write();
    let errors = resolve_err(resolver, &program);
    assert!(
        errors.iter().any(|e| matches!(e, CompileError::Redeclaration { name } if name == "a")),
        "expected Redeclaration(\"a\"), got {:?}",
        errors
    );
}

#[test]
fn test_main_missing() {
    let program = Block { statements: Vec::new() };
    let (resolver, _log) = resolver_with_write();
    let errors = resolve_err(resolver, &program);
    assert!(
        errors.iter().any(|e| matches!(e, CompileError::MainMissing)),
        "expected MainMissing, got {:?}",
        errors
    );
}

#[test]
fn test_no_viable_operator() {
    // write(true + true); — `+` has no bool/bool overload.
    let body = vec![expr_stmt(call(
        ident("write"),
        vec![binary(BinaryToken::Add, boolean(true), boolean(true))],
    ))];
    let program = main_procedure(body);
    let (resolver, _log) = resolver_with_write();
    let errors = resolve_err(resolver, &program);
    assert!(
        errors.iter().any(|e| matches!(e, CompileError::NoViableOperator { .. })),
        "expected NoViableOperator, got {:?}",
        errors
    );
}

#[test]
fn test_invalid_member_on_non_struct() {
    // a := 1; write(a.x);
    let body = vec![
        let_var("a", int(1)),
        expr_stmt(call(ident("write"), vec![member(ident("a"), "x")])),
    ];
    let program = main_procedure(body);
    let (resolver, _log) = resolver_with_write();
    let errors = resolve_err(resolver, &program);
    assert!(
        errors.iter().any(|e| matches!(e, CompileError::InvalidMember { member, .. } if member == "x")),
        "expected InvalidMember, got {:?}",
        errors
    );
}

#[test]
fn test_invalid_subscript_target() {
    // a := 1; write(a[0]);
    let body = vec![
        let_var("a", int(1)),
        expr_stmt(call(ident("write"), vec![subscript(ident("a"), int(0))])),
    ];
    let program = main_procedure(body);
    let (resolver, _log) = resolver_with_write();
    let errors = resolve_err(resolver, &program);
    assert!(
        errors.iter().any(|e| matches!(e, CompileError::InvalidSubscriptTarget)),
        "expected InvalidSubscriptTarget, got {:?}",
        errors
    );
}

#[test]
fn test_address_of_non_lvalue() {
    // write(&1);
    let body = vec![expr_stmt(call(ident("write"), vec![address_of(int(1))]))];
    let program = main_procedure(body);
    let (resolver, _log) = resolver_with_write();
    let errors = resolve_err(resolver, &program);
    assert!(
        errors.iter().any(|e| matches!(e, CompileError::AddressOfNonLvalue)),
        "expected AddressOfNonLvalue, got {:?}",
        errors
    );
}

#[test]
fn test_dereference_of_non_pointer() {
    // a := 1; write(*a);
    let body = vec![
        let_var("a", int(1)),
        expr_stmt(call(ident("write"), vec![deref(ident("a"))])),
    ];
    let program = main_procedure(body);
    let (resolver, _log) = resolver_with_write();
    let errors = resolve_err(resolver, &program);
    assert!(
        errors.iter().any(|e| matches!(e, CompileError::DereferenceOfNonPointer)),
        "expected DereferenceOfNonPointer, got {:?}",
        errors
    );
}

#[test]
fn test_dereference_of_void_pointer() {
    // a := 1; p := &a; vp := (*void) p; write(*vp);
    let body = vec![
        let_var("a", int(1)),
        let_var("p", address_of(ident("a"))),
        let_var("vp", cast(pointer_type(named_type("void")), ident("p"))),
        expr_stmt(call(ident("write"), vec![deref(ident("vp"))])),
    ];
    let program = main_procedure(body);
    let (resolver, _log) = resolver_with_write();
    let errors = resolve_err(resolver, &program);
    assert!(
        errors.iter().any(|e| matches!(e, CompileError::DereferenceOfVoidPointer)),
        "expected DereferenceOfVoidPointer, got {:?}",
        errors
    );
}

#[test]
fn test_argument_count_mismatch() {
    // write(1, 2); — write takes exactly one argument.
    let body = vec![expr_stmt(call(ident("write"), vec![int(1), int(2)]))];
    let program = main_procedure(body);
    let (resolver, _log) = resolver_with_write();
    let errors = resolve_err(resolver, &program);
    assert!(
        errors
            .iter()
            .any(|e| matches!(e, CompileError::ArgumentCountMismatch { expected: 1, found: 2, .. })),
        "expected ArgumentCountMismatch, got {:?}",
        errors
    );
}

#[test]
fn test_main_not_constant() {
    // main := 0; — a non-constant binding can't serve as the entry point.
    let program = Block {
        statements: vec![let_var("main", int(0))],
    };
    let (resolver, _log) = resolver_with_write();
    let errors = resolve_err(resolver, &program);
    assert!(
        errors.iter().any(|e| matches!(e, CompileError::MainNotConstant)),
        "expected MainNotConstant, got {:?}",
        errors
    );
}

#[test]
fn test_main_wrong_signature() {
    // main :: proc(x: int) {} — main must take no arguments.
    let program = Block {
        statements: vec![let_const(
            "main",
            node(Expr::Procedure(Procedure {
                args: vec![ProcedureArg { name: "x".into(), ty: named_type("int") }],
                variadic: false,
                return_type: None,
                body: block(vec![]),
            })),
        )],
    };
    let (resolver, _log) = resolver_with_write();
    let errors = resolve_err(resolver, &program);
    assert!(
        errors.iter().any(|e| matches!(e, CompileError::MainWrongSignature)),
        "expected MainWrongSignature, got {:?}",
        errors
    );
}

#[test]
fn test_constant_without_initializer() {
    // x :: ; inside main's body.
    let body = vec![node(Stmt::Declaration(Declaration {
        name: "x".into(),
        is_constant: true,
        declared_type: None,
        initializer: None,
    }))];
    let program = main_procedure(body);
    let (resolver, _log) = resolver_with_write();
    let errors = resolve_err(resolver, &program);
    assert!(
        errors
            .iter()
            .any(|e| matches!(e, CompileError::ConstantWithoutInitializer { name } if name == "x")),
        "expected ConstantWithoutInitializer, got {:?}",
        errors
    );
}

#[test]
fn test_non_constant_array_size() {
    // n := 3; arr : [n] int;
    let body = vec![
        let_var("n", int(3)),
        let_typed("arr", static_array_type(ident("n"), named_type("int")), None),
    ];
    let program = main_procedure(body);
    let (resolver, _log) = resolver_with_write();
    let errors = resolve_err(resolver, &program);
    assert!(
        errors.iter().any(|e| matches!(e, CompileError::NonConstantArraySize)),
        "expected NonConstantArraySize, got {:?}",
        errors
    );
}

#[test]
fn test_missing_return_value() {
    // f :: proc() -> int { return; }
    let body = vec![let_const(
        "f",
        node(Expr::Procedure(Procedure {
            args: vec![],
            variadic: false,
            return_type: Some(named_type("int")),
            body: block(vec![node(Stmt::Return(None))]),
        })),
    )];
    let program = main_procedure(body);
    let (resolver, _log) = resolver_with_write();
    let errors = resolve_err(resolver, &program);
    assert!(
        errors.iter().any(|e| matches!(e, CompileError::MissingReturnValue { .. })),
        "expected MissingReturnValue, got {:?}",
        errors
    );
}

#[test]
fn test_unexpected_return_value() {
    // f :: proc() { return 1; }
    let body = vec![let_const(
        "f",
        node(Expr::Procedure(Procedure {
            args: vec![],
            variadic: false,
            return_type: None,
            body: block(vec![node(Stmt::Return(Some(int(1))))]),
        })),
    )];
    let program = main_procedure(body);
    let (resolver, _log) = resolver_with_write();
    let errors = resolve_err(resolver, &program);
    assert!(
        errors.iter().any(|e| matches!(e, CompileError::UnexpectedReturnValue)),
        "expected UnexpectedReturnValue, got {:?}",
        errors
    );
}
