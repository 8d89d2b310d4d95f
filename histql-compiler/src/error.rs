//! Error types for the histql compiler.

use thiserror::Error;

/// Compiler error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Syntax error during parsing; aborts compilation.
    #[error("syntax error at line {line}, column {column}: {message}")]
    Syntax {
        line: usize,
        column: usize,
        message: String,
    },

    /// A query that parsed but cannot be compiled (builder invariant
    /// violation, missing FROM clause, ...).
    #[error("invalid query: {message}")]
    InvalidQuery { message: String },
}

impl Error {
    pub fn syntax(line: usize, column: usize, message: impl Into<String>) -> Self {
        Error::Syntax {
            line,
            column,
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidQuery {
            message: message.into(),
        }
    }

    /// Render the offending source line with a caret under the error
    /// column, for terminal diagnostics:
    ///
    /// ```text
    /// select pid frm sched_switch
    ///            ^
    /// ```
    pub fn render_caret(&self, source: &str) -> Option<String> {
        let Error::Syntax { line, column, .. } = self else {
            return None;
        };
        let text = source.lines().nth(line.saturating_sub(1))?;
        let caret_at = column.saturating_sub(1);
        Some(format!("{}\n{}^", text, " ".repeat(caret_at)))
    }
}

/// Result type for compiler operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caret_rendering() {
        let err = Error::syntax(2, 8, "expected FROM");
        let source = "select pid\nfrom a whr x == 1";
        let caret = err.render_caret(source).unwrap();
        assert_eq!(caret, "from a whr x == 1\n       ^");
    }

    #[test]
    fn test_caret_only_for_syntax_errors() {
        let err = Error::invalid("table has no FROM clause");
        assert!(err.render_caret("select 1").is_none());
    }
}
