//! Shared AST-building helpers for the integration tests. `corevm` never
//! parses source text itself, so every test program here is a hand-built
//! [ast::Block] rather than a string of source code.

#![allow(dead_code)]

use corevm::ast::*;
use corevm::machine::Interpreter;
use corevm::resolver::{ResolvedProgram, Resolver};
use corevm::types::{Type, TypeRef};
use corevm::util::Span;
use corevm::CompileError;
use std::cell::RefCell;
use std::rc::Rc;

pub fn node<T>(value: T) -> Node<T> {
    Node::new(value, Span::synthetic())
}

pub fn int(v: i64) -> Node<Expr> {
    node(Expr::Literal(LiteralValue::Integer(v)))
}

pub fn boolean(v: bool) -> Node<Expr> {
    node(Expr::Literal(LiteralValue::Bool(v)))
}

pub fn ident(name: &str) -> Node<Expr> {
    node(Expr::Identifier(name.into()))
}

pub fn binary(op: BinaryToken, lhs: Node<Expr>, rhs: Node<Expr>) -> Node<Expr> {
    node(Expr::Binary(op, Box::new(lhs), Box::new(rhs)))
}

pub fn unary(op: UnaryToken, operand: Node<Expr>) -> Node<Expr> {
    node(Expr::Unary(op, Box::new(operand)))
}

pub fn call(callee: Node<Expr>, args: Vec<Node<Expr>>) -> Node<Expr> {
    node(Expr::Call(Box::new(callee), args))
}

pub fn cast(ty: Node<TypeExpr>, operand: Node<Expr>) -> Node<Expr> {
    node(Expr::Cast(ty, Box::new(operand)))
}

pub fn named_type(name: &str) -> Node<TypeExpr> {
    node(TypeExpr::Named(name.into()))
}

pub fn pointer_type(inner: Node<TypeExpr>) -> Node<TypeExpr> {
    node(TypeExpr::Pointer(Box::new(inner)))
}

pub fn static_array_type(size: Node<Expr>, inner: Node<TypeExpr>) -> Node<TypeExpr> {
    node(TypeExpr::StaticArray(Box::new(size), Box::new(inner)))
}

pub fn struct_type(fields: Vec<(&str, Node<TypeExpr>)>) -> Node<TypeExpr> {
    node(TypeExpr::Struct(
        fields
            .into_iter()
            .map(|(name, ty)| StructFieldDecl {
                name: name.into(),
                ty,
            })
            .collect(),
    ))
}

pub fn struct_decl(name: &str, fields: Vec<(&str, Node<TypeExpr>)>) -> Node<Stmt> {
    node(Stmt::Declaration(Declaration {
        name: name.into(),
        is_constant: true,
        declared_type: None,
        initializer: Some(node(Expr::Type(struct_type(fields)))),
    }))
}

pub fn let_var(name: &str, value: Node<Expr>) -> Node<Stmt> {
    node(Stmt::Declaration(Declaration {
        name: name.into(),
        is_constant: false,
        declared_type: None,
        initializer: Some(value),
    }))
}

pub fn let_typed(name: &str, ty: Node<TypeExpr>, value: Option<Node<Expr>>) -> Node<Stmt> {
    node(Stmt::Declaration(Declaration {
        name: name.into(),
        is_constant: false,
        declared_type: Some(ty),
        initializer: value,
    }))
}

pub fn let_const(name: &str, value: Node<Expr>) -> Node<Stmt> {
    node(Stmt::Declaration(Declaration {
        name: name.into(),
        is_constant: true,
        declared_type: None,
        initializer: Some(value),
    }))
}

pub fn assign(lhs: Node<Expr>, rhs: Node<Expr>) -> Node<Stmt> {
    node(Stmt::Assignment(lhs, rhs, None))
}

pub fn compound_assign(op: CompoundOp, lhs: Node<Expr>, rhs: Node<Expr>) -> Node<Stmt> {
    node(Stmt::Assignment(lhs, rhs, Some(op)))
}

pub fn address_of(operand: Node<Expr>) -> Node<Expr> {
    unary(UnaryToken::Address, operand)
}

pub fn deref(operand: Node<Expr>) -> Node<Expr> {
    unary(UnaryToken::Deref, operand)
}

pub fn member(base: Node<Expr>, name: &str) -> Node<Expr> {
    node(Expr::Member(Box::new(base), name.into()))
}

pub fn subscript(base: Node<Expr>, index: Node<Expr>) -> Node<Expr> {
    node(Expr::Subscript(Box::new(base), Box::new(index)))
}

pub fn expr_stmt(expr: Node<Expr>) -> Node<Stmt> {
    node(Stmt::Expression(expr))
}

pub fn while_loop(condition: Node<Expr>, body: Vec<Node<Stmt>>) -> Node<Stmt> {
    node(Stmt::While {
        condition,
        body: Box::new(node(Stmt::Block(Block { statements: body }))),
    })
}

pub fn block(statements: Vec<Node<Stmt>>) -> Block {
    Block { statements }
}

pub fn main_procedure(body: Vec<Node<Stmt>>) -> Block {
    block(vec![node(Stmt::Declaration(Declaration {
        name: "main".into(),
        is_constant: true,
        declared_type: None,
        initializer: Some(node(Expr::Procedure(Procedure {
            args: Vec::new(),
            variadic: false,
            return_type: None,
            body: block(body),
        }))),
    }))])
}

/// Registers a `write(int)` ccall that appends every argument it's called
/// with to a shared log, returns the log.
pub fn resolver_with_write() -> (Resolver, Rc<RefCell<Vec<i64>>>) {
    let log = Rc::new(RefCell::new(Vec::new()));
    let log2 = Rc::clone(&log);
    let mut resolver = Resolver::create();
    resolver.register_ccall(
        "write",
        vec![Rc::new(Type::integer()) as TypeRef],
        None,
        false,
        move |frame| {
            let v = i64::from_le_bytes(frame[0..8].try_into().unwrap());
            log2.borrow_mut().push(v);
        },
    );
    (resolver, log)
}

pub fn resolve_ok(resolver: Resolver, program: &Block) -> ResolvedProgram {
    match resolver.resolve(program, "") {
        Ok(resolved) => resolved,
        Err(errors) => panic!("expected resolution to succeed, got: {}", errors),
    }
}

pub fn resolve_err(resolver: Resolver, program: &Block) -> Vec<CompileError> {
    match resolver.resolve(program, "") {
        Ok(_) => panic!("expected resolution to fail"),
        Err(errors) => errors.errors().iter().map(|e| e.error().clone()).collect(),
    }
}

pub fn run_to_completion(resolved: &ResolvedProgram) {
    let mut machine = Interpreter::new(resolved, 1 << 16, 1_000_000);
    machine.run().unwrap_or_else(|e| panic!("expected execution to succeed, got: {}", e));
}
