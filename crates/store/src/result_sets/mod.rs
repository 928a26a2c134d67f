//! Result-set storage: creation limits, lookup, and expiration.

use async_trait::async_trait;
use uuid::Uuid;

use queryjobs_core::result_set::normalize_account_id;
use queryjobs_core::{Limits, QjError, QjResult, ResultRow, ResultSet, ResultSetCreate};

mod in_memory;
mod postgres;

pub use in_memory::{InMemoryResultSetStore, ViewRow};
pub use postgres::PostgresResultSetStore;

/// Store for result sets bound to exact job versions.
#[async_trait]
pub trait ResultSetStore: Send + Sync {
    /// Validate and persist a result set with all of its results in one
    /// atomic unit. A validation failure persists nothing.
    async fn create(&self, input: ResultSetCreate) -> QjResult<ResultSet>;

    /// Exact lookup by generated id.
    async fn get(&self, result_set_id: Uuid) -> QjResult<ResultSet>;

    /// The most recent result set for the active version of `name`.
    async fn get_latest_for_active_job(&self, name: &str) -> QjResult<ResultSet>;

    /// Every result set older than its owning job version's
    /// `result_expiration_sec`. A set keeps the expiration policy of the
    /// version that produced it, not the currently active one.
    async fn get_expired(&self) -> QjResult<Vec<ResultSet>>;

    /// Delete expired result sets (results cascade). The expired snapshot
    /// is taken first; each deletion is independent.
    async fn delete_expired(&self) -> QjResult<u64>;
}

/// Validate-all-then-write: count limit, per-result size limit, account-id
/// normalization. Returns the normalized rows.
pub(crate) fn validate_results(
    input: &ResultSetCreate,
    limits: &Limits,
) -> QjResult<Vec<ResultRow>> {
    let num_results = input.results.len();
    if num_results > limits.max_result_set_results {
        return Err(QjError::ResultSetResultsLimitExceeded(format!(
            "Result set has {num_results} results, limit is {}",
            limits.max_result_set_results
        )));
    }
    let mut rows = Vec::with_capacity(num_results);
    for result in &input.results {
        let serialized = serde_json::to_string(&result.result)
            .map_err(|e| QjError::Serialization(e.to_string()))?;
        if serialized.len() > limits.max_result_size_bytes {
            return Err(QjError::ResultSizeExceeded(format!(
                "Result size {} exceeds max {}: {}...",
                serialized.len(),
                limits.max_result_size_bytes,
                truncate_utf8(&serialized, limits.max_result_size_bytes),
            )));
        }
        rows.push(ResultRow {
            account_id: normalize_account_id(&result.account_id)?,
            result: result.result.clone(),
        });
    }
    Ok(rows)
}

/// Longest prefix of `s` that fits in `max_bytes` without splitting a
/// character.
fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_utf8("abcdef", 4), "abcd");
        assert_eq!(truncate_utf8("abc", 4), "abc");
        // 'é' is two bytes; cutting at 3 would split it.
        assert_eq!(truncate_utf8("abé", 3), "ab");
    }
}
