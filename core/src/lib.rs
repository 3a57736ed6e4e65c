//! Semantic resolver and tree-walking interpreter for a small, statically
//! typed imperative language.
//!
//! This crate does not parse source text — it takes a raw [ast] tree built
//! by some upstream parser, [resolver::Resolver::resolve]s it into a typed
//! [code_tree], and runs the result on a [machine::Interpreter].
//!
//! ```
//! use corevm::ast::{self, Node};
//! use corevm::resolver::Resolver;
//! use corevm::machine::Interpreter;
//! use corevm::util::Span;
//!
//! let span = Span::synthetic();
//! let program = ast::Block {
//!     statements: vec![Node::new(
//!         ast::Stmt::Declaration(ast::Declaration {
//!             name: "main".into(),
//!             is_constant: true,
//!             declared_type: None,
//!             initializer: Some(Node::new(
//!                 ast::Expr::Procedure(ast::Procedure {
//!                     args: Vec::new(),
//!                     variadic: false,
//!                     return_type: None,
//!                     body: ast::Block { statements: Vec::new() },
//!                 }),
//!                 span,
//!             )),
//!         }),
//!         span,
//!     )],
//! };
//!
//! let resolved = Resolver::create().resolve(&program, "").unwrap();
//! let mut machine = Interpreter::new(&resolved, 4096, 1_000_000);
//! machine.run().unwrap();
//! ```

#![deny(unused_must_use)]

pub mod address;
pub mod ast;
pub mod ccall;
pub mod code_tree;
pub mod error;
pub mod machine;
pub mod operators;
pub mod resolver;
pub mod symbol;
pub mod types;
pub mod util;

pub use error::{CompileError, RuntimeError, WithSource};
pub use machine::Interpreter;
pub use resolver::{ResolvedProgram, Resolver};
