use thiserror::Error;

/// Parse and evaluation faults of the gate expression language.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExprError {
    #[error("unexpected end of expression")]
    UnexpectedEof,

    #[error("unexpected token: {0}")]
    UnexpectedToken(String),

    #[error("unexpected character '{ch}' at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },

    #[error("unterminated string literal")]
    UnterminatedString,

    #[error("invalid number: {0}")]
    InvalidNumber(String),

    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("{function} expects {expected} argument(s), got {actual}")]
    Arity {
        function: &'static str,
        expected: &'static str,
        actual: usize,
    },

    #[error("expression nesting exceeds {0} levels")]
    TooDeep(usize),

    #[error("unknown root '{root}' (allowed: {allowed})")]
    UnknownRoot { root: String, allowed: String },

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("numeric result is not finite")]
    NonFinite,
}
