//! ResultSet and Result entities.
//!
//! A `ResultSet` is the full output of one execution of one job version;
//! a `ResultRow` is one per-account row within it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{QjError, QjResult};

/// Width account ids are zero-padded to.
pub const ACCOUNT_ID_WIDTH: usize = 12;

/// One row of query output for one account. The `result` map holds every
/// query binding except the account id itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub account_id: String,
    pub result: serde_json::Map<String, serde_json::Value>,
}

impl ResultRow {
    /// Build a row with a normalized account id.
    pub fn new(
        account_id: &str,
        result: serde_json::Map<String, serde_json::Value>,
    ) -> QjResult<Self> {
        Ok(Self {
            account_id: normalize_account_id(account_id)?,
            result,
        })
    }
}

/// Normalize an account id to its canonical 12-digit zero-padded form.
/// The value must parse as an unsigned integer.
pub fn normalize_account_id(value: &str) -> QjResult<String> {
    let padded = format!("{value:0>width$}", width = ACCOUNT_ID_WIDTH);
    if padded.len() > ACCOUNT_ID_WIDTH || padded.parse::<u64>().is_err() {
        return Err(QjError::AccountIdInvalid(format!(
            "account_id {value} is not a {ACCOUNT_ID_WIDTH}-digit integer"
        )));
    }
    Ok(padded)
}

/// Graph load times actually used for one run, keyed by graph URI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSetGraphSpec {
    pub graph_uris_load_times: BTreeMap<String, i64>,
}

/// Reference to an exact job version, `(name, created)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobVersionRef {
    pub name: String,
    pub created: DateTime<Utc>,
}

impl std::fmt::Display for JobVersionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} / {}", self.name, self.created)
    }
}

/// Input for result-set store `create`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultSetCreate {
    pub job: JobVersionRef,
    pub graph_spec: ResultSetGraphSpec,
    pub results: Vec<ResultRow>,
    pub created: DateTime<Utc>,
}

impl ResultSetCreate {
    pub fn new(
        job: JobVersionRef,
        graph_spec: ResultSetGraphSpec,
        results: Vec<ResultRow>,
    ) -> Self {
        Self {
            job,
            graph_spec,
            results,
            created: Utc::now(),
        }
    }
}

/// A stored result set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    pub result_set_id: Uuid,
    pub job: JobVersionRef,
    pub graph_spec: ResultSetGraphSpec,
    pub results: Vec<ResultRow>,
    pub created: DateTime<Utc>,
}

impl ResultSet {
    /// A set is expired once its age strictly exceeds the owning job
    /// version's expiration. Exactly equal is not expired.
    pub fn is_expired(&self, result_expiration_sec: i64, now: DateTime<Utc>) -> bool {
        (now - self.created).num_seconds() > result_expiration_sec
    }

    /// CSV rendering: one line per result, account id plus the flattened
    /// result map, header taken from the first row.
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        let Some(first) = self.results.first() else {
            return out;
        };
        let mut header = vec!["account_id".to_string()];
        header.extend(first.result.keys().cloned());
        out.push_str(&header.join(","));
        out.push('\n');
        for row in &self.results {
            let mut fields = vec![csv_escape(&row.account_id)];
            for key in header.iter().skip(1) {
                let value = match row.result.get(key) {
                    Some(serde_json::Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                fields.push(csv_escape(&value));
            }
            out.push_str(&fields.join(","));
            out.push('\n');
        }
        out
    }
}

fn csv_escape(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn row(account_id: &str, pairs: &[(&str, &str)]) -> ResultRow {
        let mut map = serde_json::Map::new();
        for (k, v) in pairs {
            map.insert(k.to_string(), serde_json::Value::String(v.to_string()));
        }
        ResultRow::new(account_id, map).unwrap()
    }

    #[test]
    fn account_id_is_zero_padded() {
        assert_eq!(normalize_account_id("1234").unwrap(), "000000001234");
        assert_eq!(
            normalize_account_id("123456789012").unwrap(),
            "123456789012"
        );
    }

    #[test]
    fn non_numeric_account_id_rejected() {
        assert!(matches!(
            normalize_account_id("abcd"),
            Err(QjError::AccountIdInvalid(_))
        ));
        assert!(matches!(
            normalize_account_id("1234567890123"),
            Err(QjError::AccountIdInvalid(_))
        ));
        assert!(matches!(
            normalize_account_id("-1234"),
            Err(QjError::AccountIdInvalid(_))
        ));
    }

    proptest! {
        #[test]
        fn normalization_is_idempotent(n in 0u64..=999_999_999_999) {
            let once = normalize_account_id(&n.to_string()).unwrap();
            let twice = normalize_account_id(&once).unwrap();
            prop_assert_eq!(&once, &twice);
            prop_assert_eq!(once.len(), ACCOUNT_ID_WIDTH);
            prop_assert_eq!(once.parse::<u64>().unwrap(), n);
        }
    }

    #[test]
    fn expiration_boundary_is_strict() {
        let created = Utc::now();
        let rs = ResultSet {
            result_set_id: Uuid::now_v7(),
            job: JobVersionRef {
                name: "test_job".to_string(),
                created,
            },
            graph_spec: ResultSetGraphSpec::default(),
            results: vec![],
            created,
        };
        let expiration = 60;
        assert!(!rs.is_expired(expiration, created + chrono::Duration::seconds(60)));
        assert!(rs.is_expired(expiration, created + chrono::Duration::seconds(61)));
    }

    #[test]
    fn csv_flattens_result_map() {
        let created = Utc::now();
        let rs = ResultSet {
            result_set_id: Uuid::now_v7(),
            job: JobVersionRef {
                name: "test_job".to_string(),
                created,
            },
            graph_spec: ResultSetGraphSpec::default(),
            results: vec![
                row("1234", &[("foo", "a"), ("boo", "b")]),
                row("5678", &[("foo", "c,d"), ("boo", "e")]),
            ],
            created,
        };
        let csv = rs.to_csv();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "account_id,boo,foo");
        assert_eq!(lines[1], "000000001234,b,a");
        assert_eq!(lines[2], "000000005678,e,\"c,d\"");
    }

    #[test]
    fn empty_result_set_csv_is_empty() {
        let created = Utc::now();
        let rs = ResultSet {
            result_set_id: Uuid::now_v7(),
            job: JobVersionRef {
                name: "test_job".to_string(),
                created,
            },
            graph_spec: ResultSetGraphSpec::default(),
            results: vec![],
            created,
        };
        assert_eq!(rs.to_csv(), "");
    }
}
