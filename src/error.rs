//! Library error types.

use thiserror::Error;

/// Errors produced while compiling a request into a backend query or
/// while post-processing results.
#[derive(Debug, Error)]
pub enum DataTableError {
    /// The dispatcher found no registered engine claiming the data source.
    #[error("no engine registered for the given data source")]
    NoEngine,

    /// The model engine was asked to join a relation kind it cannot express.
    #[error("relation `{0}` is not supported")]
    UnsupportedRelation(String),

    /// A per-column regex search keyword failed to compile.
    #[error("invalid search pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// A string content template failed to render.
    #[error("template rendering failed: {0}")]
    Template(#[from] tera::Error),

    /// A backend round-trip (count or fetch) failed.
    #[error("query execution failed: {0}")]
    Execution(#[from] anyhow::Error),
}

/// Result type alias using DataTableError.
pub type Result<T> = std::result::Result<T, DataTableError>;
