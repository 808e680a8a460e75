use crate::{privacy::PrivacyError, query::QueryError};

/// Error returned by session operations.
#[derive(Debug, thiserror::Error)]
pub enum TdbError {
    /// The session has no open database, or it was destroyed.
    #[error("database is not open")]
    NotOpen,
    /// The session's privacy level and keys do not fit together.
    #[error("privacy configuration error: {0}")]
    PrivacyConfig(#[from] PrivacyError),
    /// The init query of a new database failed.
    #[error("init query failed: {0}")]
    InitQuery(#[source] QueryError),
    /// The index query of a new database failed.
    #[error("index build failed: {0}")]
    IndexBuild(#[source] QueryError),
    /// Malformed query text.
    #[error("query syntax error: {0}")]
    QuerySyntax(String),
    /// Unknown table, column or function, or a type mismatch.
    #[error("query semantic error: {0}")]
    QuerySemantic(String),
    /// A statement would break a table constraint.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
    /// Result rows could not be encoded as JSON.
    #[error("result encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<QueryError> for TdbError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::Syntax(msg) => TdbError::QuerySyntax(msg),
            QueryError::Semantic(msg) => TdbError::QuerySemantic(msg),
            QueryError::Constraint(msg) => TdbError::ConstraintViolation(msg),
        }
    }
}
