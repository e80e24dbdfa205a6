use std::fmt;

/// Errors signalled by the reader, evaluator and built-ins. Every error is
/// fatal to the current top-level evaluation: it bubbles up through the
/// evaluation as a `Result` and the load driver performs the single
/// recovery.
#[derive(Debug, Clone)]
pub enum AtomError {
    /// Lexer or parser failure, with the source position that produced it.
    Syntax {
        line: u32,
        column: u32,
        message: String,
    },

    /// Environment lookup failed in every frame up to the root.
    Unbound(String),

    /// A built-in or special form received the wrong kind of value.
    Type {
        expected: &'static str,
        actual: &'static str,
    },

    /// Too few positional arguments.
    Arity { expected: usize },

    /// Bad index, non-integer where an integer is required, negative
    /// length, file open failure, and similar out-of-range conditions.
    Domain(String),

    /// Raised by the `error` built-in.
    User(String),

    /// I/O failure from a port operation.
    Io(String),
}

impl fmt::Display for AtomError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AtomError::Syntax {
                line,
                column,
                message,
            } => write!(
                f,
                "Syntax error line {} column {}: {}",
                line, column, message
            ),
            AtomError::Unbound(name) => {
                write!(f, "reference to undefined identifier: {}", name)
            }
            AtomError::Type { expected, actual } => {
                write!(f, "{} expected, got {}", expected, actual)
            }
            AtomError::Arity { expected } => {
                write!(f, "too few arguments ({} expected)", expected)
            }
            AtomError::Domain(msg) => write!(f, "{}", msg),
            AtomError::User(msg) => write!(f, "{}", msg),
            AtomError::Io(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for AtomError {}

pub type AtomResult<T> = Result<T, AtomError>;
