//! The thin HTTP front end over `corevm` (spec.md §1, §5, §6): parses a
//! request body into a program, resolves it, runs it, and reports the
//! result. Each request gets its own independent resolver+interpreter pair
//! with nothing shared across requests, matching spec.md §5's "no state is
//! shared between workers" — actix-web's own worker-thread pool supplies the
//! per-request thread spec.md describes; nothing here constructs or shares a
//! [corevm::Interpreter] outside the thread handling the request it belongs
//! to (the types involved use `Rc` internally, not `Arc`, so they couldn't
//! safely cross a thread boundary anyway).

pub mod config;
pub mod error;
pub mod server;
