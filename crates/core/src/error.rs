//! Error taxonomy for the query-job domain.

use thiserror::Error;

/// Result type used across the query-job crates.
pub type QjResult<T> = Result<T, QjError>;

/// Query-job error.
///
/// Validation and not-found variants map to client-visible failures at the
/// boundary layer. `Defect` indicates an invariant breach that should be
/// impossible given the schema constraints; it is not user-recoverable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QjError {
    /// A job's query text failed to parse.
    #[error("invalid query: {0}")]
    JobQueryInvalid(String),

    /// A job's query does not bind the required account-id field.
    #[error("query missing account id field: {0}")]
    JobQueryMissingAccountId(String),

    /// A job specification failed validation (bad name, knob over ceiling, ...).
    #[error("invalid job: {0}")]
    JobInvalid(String),

    /// No job exists under the given name.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// No job version exists for the given (name, created) pair.
    #[error("job version not found: {0}")]
    JobVersionNotFound(String),

    /// No active version exists for the given job name.
    #[error("no active job version found: {0}")]
    ActiveJobVersionNotFound(String),

    /// No result set exists for the given id or job name.
    #[error("result set not found: {0}")]
    ResultSetNotFound(String),

    /// A result set contains more results than the configured maximum.
    #[error("result set results limit exceeded: {0}")]
    ResultSetResultsLimitExceeded(String),

    /// A single result's serialized size exceeds the configured maximum.
    #[error("result size exceeded: {0}")]
    ResultSizeExceeded(String),

    /// An account id is not a zero-paddable integer string.
    #[error("invalid account id: {0}")]
    AccountIdInvalid(String),

    /// Serialization failure for an entity that should always serialize.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// A persistence-layer failure, passed through unretried.
    #[error("storage error: {0}")]
    Storage(String),

    /// An invariant breach that should never occur. Fatal, not user-facing.
    #[error("defect: {0}")]
    Defect(String),
}

impl QjError {
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn defect(msg: impl Into<String>) -> Self {
        Self::Defect(msg.into())
    }

    /// True for conditions a caller caused (bad input or missing entity),
    /// as opposed to storage failures and defects.
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            QjError::Storage(_) | QjError::Defect(_) | QjError::Serialization(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_error_classification() {
        assert!(QjError::JobNotFound("x".into()).is_client_error());
        assert!(QjError::ResultSizeExceeded("x".into()).is_client_error());
        assert!(!QjError::defect("two active versions").is_client_error());
        assert!(!QjError::storage("connection reset").is_client_error());
    }
}
