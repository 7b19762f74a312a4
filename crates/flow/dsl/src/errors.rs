//! DSL error types

/// Errors that can occur while tokenizing or parsing configuration text
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DslError {
    #[error("Parse error at line {line}, column {col}: {message}")]
    ParseError {
        line: usize,
        col: usize,
        message: String,
    },

    #[error("Unexpected token at line {line}, column {col}: expected {expected}, found '{found}'")]
    UnexpectedToken {
        expected: String,
        found: String,
        line: usize,
        col: usize,
    },

    #[error("Unexpected end of input: expected {0}")]
    UnexpectedEof(String),

    #[error("Invalid value at line {line}, column {col}: {message}")]
    InvalidValue {
        line: usize,
        col: usize,
        message: String,
    },
}

/// Result type alias for DSL operations
pub type DslResult<T> = Result<T, DslError>;
