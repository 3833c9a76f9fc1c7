use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    // Predicate / statement parsing
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Unknown column '{0}'")]
    UnknownColumn(String),
    #[error("{0}")]
    UnsupportedOperator(String),
    #[error("Invalid value format: {0}")]
    InvalidValueFormat(String),
    #[error("Unterminated string literal")]
    UnterminatedLiteral,
    #[error("Unexpected end of input, {0}")]
    UnexpectedEndOfInput(String),
    #[error("Missing closing parenthesis ')'")]
    MissingClosingParenthesis,

    // Schema
    #[error("Table not found: {0}")]
    TableNotFound(String),
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("Missing metadata for {0}")]
    MissingMetadata(String),
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    // Capability
    #[error("{0}")]
    NotSupported(String),

    // Resources
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Row encoding error: {0}")]
    RowCodec(String),

    // Execution
    #[error("Execution error: {0}")]
    Execution(String),
    #[error("{0} operation requires a WHERE clause to prevent a full-table mutation")]
    GuardedMutation(&'static str),
}
