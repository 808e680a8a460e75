use thiserror::Error;

/// Failure of a single statement.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    /// The query text is not well formed.
    #[error("syntax error: {0}")]
    Syntax(String),
    /// The query references unknown objects or mixes incompatible types.
    #[error("semantic error: {0}")]
    Semantic(String),
    /// The statement would break a schema or constraint rule.
    #[error("constraint violation: {0}")]
    Constraint(String),
}

impl QueryError {
    pub(crate) fn syntax(msg: impl Into<String>) -> Self {
        QueryError::Syntax(msg.into())
    }

    pub(crate) fn semantic(msg: impl Into<String>) -> Self {
        QueryError::Semantic(msg.into())
    }

    pub(crate) fn constraint(msg: impl Into<String>) -> Self {
        QueryError::Constraint(msg.into())
    }
}

pub(crate) type QueryResult<T> = Result<T, QueryError>;
