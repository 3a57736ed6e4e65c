//! All error-related types for the resolver and interpreter.

use crate::util::{self, Span};
use serde::Serialize;
use std::fmt::{self, Debug, Display, Formatter};
use thiserror::Error;

/// A trait for any error that originates in source code. [SourceError]s rely
/// on having the source code present in order to display themselves.
pub trait SourceError: 'static + Send + Sync + Debug + Serialize {
    /// A short label for this error's category, used in the formatted
    /// message (e.g. `"Resolution"`, `"Runtime"`).
    fn type_label(&self) -> &'static str;

    /// Format this error's message. `spanned_src` is the slice of source
    /// that corresponds to this error's [Span].
    fn fmt_msg(&self, f: &mut Formatter<'_>, spanned_src: &str) -> fmt::Result;
}

/// Errors raised while lowering an AST into a code tree (spec.md §7,
/// "Resolution errors" and "Malformed-main errors"). These always indicate a
/// flaw in the program being resolved, never a bug in the resolver itself —
/// resolver bugs panic.
#[derive(Clone, Debug, Serialize, Error)]
pub enum CompileError {
    #[error("undefined identifier `{name}`")]
    UndefinedIdentifier { name: String },

    #[error("`{name}` is already declared in this scope")]
    Redeclaration { name: String },

    #[error(
        "type mismatch: expected `{expected}`, found `{found}`, and no implicit conversion exists"
    )]
    TypeMismatch { expected: String, found: String },

    #[error("operator `{op}` is not defined for operand type(s) {operands}")]
    NoViableOperator { op: String, operands: String },

    #[error("cannot assign to a non-lvalue expression")]
    NotAnLvalue,

    #[error("`break` is only valid inside a loop")]
    BreakOutsideLoop,

    #[error("`continue` is only valid inside a loop")]
    ContinueOutsideLoop,

    #[error("empty `return` in a procedure that returns `{expected}`")]
    MissingReturnValue { expected: String },

    #[error("`return` with a value in a procedure with no return type")]
    UnexpectedReturnValue,

    #[error("constant `{name}` must have an initializer")]
    ConstantWithoutInitializer { name: String },

    #[error("array size must be a compile-time constant integer expression")]
    NonConstantArraySize,

    #[error("`{name}` has no member `{member}`")]
    InvalidMember { name: String, member: String },

    #[error("subscript is only valid on an array, array view, or string")]
    InvalidSubscriptTarget,

    #[error("`&` requires an addressable (lvalue) operand")]
    AddressOfNonLvalue,

    #[error("cannot dereference a non-pointer expression")]
    DereferenceOfNonPointer,

    #[error("cannot dereference `*void`")]
    DereferenceOfVoidPointer,

    #[error(
        "procedure `{name}` expects {expected} argument(s), found {found}"
    )]
    ArgumentCountMismatch {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("`main` is not declared")]
    MainMissing,

    #[error("`main` must be declared as a constant procedure")]
    MainNotConstant,

    #[error("`main` must have signature `() -> void`")]
    MainWrongSignature,
}

impl SourceError for CompileError {
    fn type_label(&self) -> &'static str {
        "Resolution"
    }

    fn fmt_msg(&self, f: &mut Formatter<'_>, spanned_src: &str) -> fmt::Result {
        // Most messages are self-contained; a few benefit from echoing the
        // offending source slice.
        match self {
            Self::UndefinedIdentifier { .. }
            | Self::InvalidMember { .. }
                if !spanned_src.is_empty() =>
            {
                write!(f, "{} (`{}`)", self, spanned_src)
            }
            _ => write!(f, "{}", self),
        }
    }
}

/// Errors raised by the interpreter while executing a resolved program
/// (spec.md §7, "Runtime faults"). The resolver is trusted to have already
/// rejected everything that would make these impossible to hit through
/// invalid programs; these exist purely to turn "impossible" programmer
/// errors (divide by zero, stack exhaustion) into a reported fault instead
/// of a panic.
#[derive(Copy, Clone, Debug, Serialize, Error)]
pub enum RuntimeError {
    #[error("division by zero")]
    DivideByZero,

    #[error("stack overflow: exceeded {limit} bytes")]
    StackOverflow { limit: u64 },

    #[error("maximum cycle count reached")]
    TooManyCycles,
}

impl SourceError for RuntimeError {
    fn type_label(&self) -> &'static str {
        "Runtime"
    }

    fn fmt_msg(&self, f: &mut Formatter<'_>, _spanned_src: &str) -> fmt::Result {
        write!(f, "{}", self)
    }
}

/// A [SourceError] plus the [Span] it occurred at and the source slice that
/// span covers, which together are enough to format the error without any
/// other context.
#[derive(Clone, Debug, Error, Serialize)]
pub struct SourceErrorWrapper<E: SourceError> {
    error: E,
    span: Span,
    spanned_source: String,
}

impl<E: SourceError> SourceErrorWrapper<E> {
    pub fn new(error: E, span: Span, src: &str) -> Self {
        Self {
            error,
            span,
            spanned_source: span.get_source_slice(src).into(),
        }
    }

    pub fn span(&self) -> Span {
        self.span
    }

    pub fn error(&self) -> &E {
        &self.error
    }
}

impl<E: SourceError> Display for SourceErrorWrapper<E> {
    /// `ERROR:<row>,<col> : <message>`, per the one-line-per-error format
    /// the HTTP front-end and CLI both render to users.
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "ERROR:{},{} : ", self.span.start_line, self.span.start_col)?;
        self.error.fmt_msg(f, &self.spanned_source)?;
        Ok(())
    }
}

/// A collection of [SourceErrorWrapper]s plus the source code they refer to.
/// This is what the resolver returns when resolution fails, and what the
/// interpreter returns (as a single-element collection) on a runtime fault.
#[derive(Clone, Debug, Error, Serialize)]
pub struct WithSource<E: SourceError> {
    errors: Vec<SourceErrorWrapper<E>>,
    #[serde(skip)]
    source_code: String,
}

impl<E: SourceError> WithSource<E> {
    pub fn new(
        errors: impl IntoIterator<Item = SourceErrorWrapper<E>>,
        source: String,
    ) -> Self {
        Self {
            errors: errors.into_iter().collect(),
            source_code: source,
        }
    }

    pub fn errors(&self) -> &[SourceErrorWrapper<E>] {
        &self.errors
    }
}

impl<E: SourceError> Display for WithSource<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, error) in self.errors.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", error)?;
            if f.alternate() {
                util::fmt_src_highlights(f, &error.span, &self.source_code)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        let span = Span {
            offset: 4,
            length: 3,
            start_line: 2,
            start_col: 5,
            end_line: 2,
            end_col: 8,
        };
        let err = CompileError::Redeclaration {
            name: "foo".into(),
        };
        let wrapped = SourceErrorWrapper::new(err, span, "");
        assert_eq!(
            wrapped.to_string(),
            "ERROR:2,5 : `foo` is already declared in this scope"
        );
    }

    #[test]
    fn test_with_source_joins_multiple_errors_with_newlines() {
        let span = Span::synthetic();
        let errors = vec![
            SourceErrorWrapper::new(CompileError::Redeclaration { name: "a".into() }, span, ""),
            SourceErrorWrapper::new(CompileError::Redeclaration { name: "b".into() }, span, ""),
        ];
        let with_source = WithSource::new(errors, String::new());
        assert_eq!(with_source.errors().len(), 2);
        let rendered = with_source.to_string();
        assert_eq!(rendered.lines().count(), 2);
    }
}
