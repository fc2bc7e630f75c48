//! The single error type surfaced by the engine.
//!
//! Errors are returned, not raised: every operator and pager call has an
//! explicit failure channel, and nothing unwinds across component
//! boundaries.  The REPL maps these to exit codes; embedders match on the
//! variant.

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("syntax error at line {line}, column {col}: {msg}")]
    Syntax { line: usize, col: usize, msg: String },

    #[error("schema error: {0}")]
    Schema(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("type error: {0}")]
    Type(String),

    // Lock acquisition timed out.  Retryable; the caller decides.
    #[error("database is locked")]
    Busy,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database corrupt: {0}")]
    Corrupt(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn schema(msg: impl Into<String>) -> Error {
        Error::Schema(msg.into())
    }
    pub fn constraint(msg: impl Into<String>) -> Error {
        Error::Constraint(msg.into())
    }
    pub fn type_err(msg: impl Into<String>) -> Error {
        Error::Type(msg.into())
    }
    pub fn corrupt(msg: impl Into<String>) -> Error {
        Error::Corrupt(msg.into())
    }
    pub fn internal(msg: impl Into<String>) -> Error {
        Error::Internal(msg.into())
    }

    /// True for errors that poison an open write transaction (spec: the
    /// transaction moves to ABORTED and only ROLLBACK is accepted after).
    pub fn poisons_transaction(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Corrupt(_))
    }
}
