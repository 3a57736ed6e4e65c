//! The hand-written lexer/parser shared by the `corevm` binary and the
//! `corevm_server` HTTP front end — `corevm` itself never parses source
//! text (see `corevm::lib` docs), so both callers that need to go from a
//! text file or request body to an `ast::Block` go through here.

pub mod syntax;
