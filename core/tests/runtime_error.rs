//! Integration tests that expect a program to resolve successfully but
//! fault during execution.

mod common;

use common::*;
use corevm::ast::*;
use corevm::machine::Interpreter;
use corevm::RuntimeError;

fn run_expect_error(resolved: &corevm::ResolvedProgram, stack_bytes: u32, cycle_limit: u64) -> RuntimeError {
    let mut machine = Interpreter::new(resolved, stack_bytes, cycle_limit);
    match machine.run() {
        Ok(()) => panic!("expected execution to fault"),
        Err(with_source) => *with_source.errors()[0].error(),
    }
}

#[test]
fn test_divide_by_zero() {
    // zero := 0; write(1 / zero);
    let body = vec![
        let_var("zero", int(0)),
        expr_stmt(call(ident("write"), vec![binary(BinaryToken::Divide, int(1), ident("zero"))])),
    ];
    let program = main_procedure(body);
    let (resolver, _log) = resolver_with_write();
    let resolved = resolve_ok(resolver, &program);

    let err = run_expect_error(&resolved, 1 << 12, 1_000_000);
    assert!(matches!(err, RuntimeError::DivideByZero));
}

#[test]
fn test_too_many_cycles() {
    // while (true) {}
    let body = vec![while_loop(boolean(true), vec![])];
    let program = main_procedure(body);
    let (resolver, _log) = resolver_with_write();
    let resolved = resolve_ok(resolver, &program);

    let err = run_expect_error(&resolved, 1 << 12, 1_000);
    assert!(matches!(err, RuntimeError::TooManyCycles));
}

#[test]
fn test_stack_overflow() {
    // arr : [100000] int; — main's frame alone dwarfs a tiny stack segment.
    let body = vec![let_typed("arr", static_array_type(int(100_000), named_type("int")), None)];
    let program = main_procedure(body);
    let (resolver, _log) = resolver_with_write();
    let resolved = resolve_ok(resolver, &program);

    let err = run_expect_error(&resolved, 256, 10_000_000);
    assert!(matches!(err, RuntimeError::StackOverflow { .. }));
}
