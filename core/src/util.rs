//! Small utilities shared across the resolver and interpreter.

use std::fmt::{self, Formatter};

/// A region of source text. Every AST node and code-tree node carries one of
/// these as its metadata, so that errors raised anywhere in the pipeline can
/// point back at the offending source.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct Span {
    /// Byte offset of the start of this span within the source string.
    pub offset: usize,
    /// Length, in bytes, of this span.
    pub length: usize,
    /// 1-indexed line the span starts on.
    pub start_line: usize,
    /// 1-indexed column the span starts on.
    pub start_col: usize,
    /// 1-indexed line the span ends on.
    pub end_line: usize,
    /// 1-indexed column the span ends on.
    pub end_col: usize,
}

impl Span {
    /// A zero-length span at the very start of the source. Used for
    /// synthesized nodes (inserted casts, synthesized assignments) that have
    /// no direct counterpart in the original text.
    pub fn synthetic() -> Self {
        Self {
            offset: 0,
            length: 0,
            start_line: 1,
            start_col: 1,
            end_line: 1,
            end_col: 1,
        }
    }

    /// Get the slice of `src` that this span covers. Falls back to an empty
    /// string if the span's offsets don't fit in `src` (can happen for
    /// synthesized spans).
    pub fn get_source_slice<'a>(&self, src: &'a str) -> &'a str {
        src.get(self.offset..self.offset + self.length).unwrap_or("")
    }
}

/// Write a `^^^` style underline beneath the source line(s) covered by
/// `span`, for use in `{:#}` (alternate) formatting of errors.
pub fn fmt_src_highlights(
    f: &mut Formatter<'_>,
    span: &Span,
    source: &str,
) -> fmt::Result {
    let line = source.lines().nth(span.start_line.saturating_sub(1));
    if let Some(line) = line {
        writeln!(f)?;
        writeln!(f, "{}", line)?;
        let underline_len = if span.end_line == span.start_line {
            (span.end_col.saturating_sub(span.start_col)).max(1)
        } else {
            1
        };
        write!(
            f,
            "{}{}",
            " ".repeat(span.start_col.saturating_sub(1)),
            "^".repeat(underline_len)
        )?;
    }
    Ok(())
}

/// Macro that wraps any body, and only executes the body if we are running
/// in debug mode. Debug mode is enabled by setting the environment variable
/// `DEBUG=true`. Compiles away to nothing in release builds.
///
/// ```
/// use corevm::debug;
/// debug!(println!("Hello!"));
/// ```
#[macro_export]
macro_rules! debug {
    ($arg:expr) => {
        #[cfg(debug_assertions)]
        {
            if let Ok(debug_val) = std::env::var("DEBUG") {
                if debug_val.to_lowercase().as_str() == "true" {
                    $arg
                }
            }
        }
    };
}
