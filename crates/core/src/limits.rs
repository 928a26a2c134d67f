//! Service-level policy knobs: result set limits, retention defaults/ceilings.

use serde::{Deserialize, Serialize};

use crate::error::{QjError, QjResult};

pub const DEFAULT_MAX_RESULT_SET_RESULTS: usize = 10_000;
pub const DEFAULT_MAX_RESULT_SIZE_BYTES: usize = 4_096;

// One week default, one month ceiling for every retention knob.
pub const DEFAULT_RESULT_EXPIRATION_SEC: i64 = 7 * 24 * 3600;
pub const LIMIT_RESULT_EXPIRATION_SEC: i64 = 31 * 24 * 3600;
pub const DEFAULT_MAX_GRAPH_AGE_SEC: i64 = 24 * 3600;
pub const LIMIT_MAX_GRAPH_AGE_SEC: i64 = 31 * 24 * 3600;
pub const DEFAULT_MAX_RESULT_AGE_SEC: i64 = 24 * 3600;
pub const LIMIT_MAX_RESULT_AGE_SEC: i64 = 31 * 24 * 3600;

/// Service policy applied by the registry and result-set store.
///
/// Each retention knob has a default (applied when a job leaves the value
/// unset) and a ceiling (a set value above it fails job creation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limits {
    pub max_result_set_results: usize,
    pub max_result_size_bytes: usize,

    pub result_expiration_sec_default: i64,
    pub result_expiration_sec_limit: i64,
    pub max_graph_age_sec_default: i64,
    pub max_graph_age_sec_limit: i64,
    pub max_result_age_sec_default: i64,
    pub max_result_age_sec_limit: i64,

    /// Field name every job query must bind (the per-account key).
    pub account_id_key: String,
    /// Role granted read access to generated views.
    pub db_ro_role: String,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_result_set_results: DEFAULT_MAX_RESULT_SET_RESULTS,
            max_result_size_bytes: DEFAULT_MAX_RESULT_SIZE_BYTES,
            result_expiration_sec_default: DEFAULT_RESULT_EXPIRATION_SEC,
            result_expiration_sec_limit: LIMIT_RESULT_EXPIRATION_SEC,
            max_graph_age_sec_default: DEFAULT_MAX_GRAPH_AGE_SEC,
            max_graph_age_sec_limit: LIMIT_MAX_GRAPH_AGE_SEC,
            max_result_age_sec_default: DEFAULT_MAX_RESULT_AGE_SEC,
            max_result_age_sec_limit: LIMIT_MAX_RESULT_AGE_SEC,
            account_id_key: "account_id".to_string(),
            db_ro_role: "qj_ro".to_string(),
        }
    }
}

impl Limits {
    /// Validate that every default is within its ceiling.
    pub fn validated(self) -> QjResult<Self> {
        for (knob, default, limit) in [
            (
                "result_expiration_sec",
                self.result_expiration_sec_default,
                self.result_expiration_sec_limit,
            ),
            (
                "max_graph_age_sec",
                self.max_graph_age_sec_default,
                self.max_graph_age_sec_limit,
            ),
            (
                "max_result_age_sec",
                self.max_result_age_sec_default,
                self.max_result_age_sec_limit,
            ),
        ] {
            if default > limit {
                return Err(QjError::JobInvalid(format!(
                    "{knob}_default value {default} is larger than {knob}_limit value {limit}"
                )));
            }
        }
        Ok(self)
    }

    /// Resolve one retention knob: unset falls back to the default, a set
    /// value must be positive and within the ceiling.
    pub fn resolve_knob(
        field: &str,
        requested: Option<i64>,
        default: i64,
        limit: i64,
    ) -> QjResult<i64> {
        match requested {
            None => Ok(default),
            Some(value) if value <= 0 => Err(QjError::JobInvalid(format!(
                "Field {field} value {value} must be > 0"
            ))),
            Some(value) if value > limit => Err(QjError::JobInvalid(format!(
                "Field {field} value {value} must be <= {limit}"
            ))),
            Some(value) => Ok(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_limits_are_consistent() {
        assert!(Limits::default().validated().is_ok());
    }

    #[test]
    fn default_over_ceiling_rejected() {
        let limits = Limits {
            result_expiration_sec_default: 100,
            result_expiration_sec_limit: 99,
            ..Limits::default()
        };
        assert!(matches!(limits.validated(), Err(QjError::JobInvalid(_))));
    }

    #[test]
    fn knob_resolution() {
        assert_eq!(Limits::resolve_knob("k", None, 7, 10).unwrap(), 7);
        assert_eq!(Limits::resolve_knob("k", Some(9), 7, 10).unwrap(), 9);
        assert!(matches!(
            Limits::resolve_knob("k", Some(11), 7, 10),
            Err(QjError::JobInvalid(_))
        ));
        assert!(matches!(
            Limits::resolve_knob("k", Some(0), 7, 10),
            Err(QjError::JobInvalid(_))
        ));
    }
}
