//! In-memory result-set store for tests and local development.
//!
//! Besides the `ResultSetStore` operations it evaluates the latest/all view
//! semantics directly over stored data, so end-to-end view behavior is
//! testable without a database.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use queryjobs_core::{Job, QjError, QjResult, ResultSet, ResultSetCreate};

use super::{ResultSetStore, validate_results};
use crate::registry::{InMemoryJobRegistry, JobRegistry};

pub struct InMemoryResultSetStore {
    registry: Arc<InMemoryJobRegistry>,
    sets: RwLock<Vec<ResultSet>>,
}

/// One row as the generated views would project it: result-set creation
/// time, account id, and the non-account-id query fields. Missing fields
/// surface as `None`, like `->>` yielding NULL.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewRow {
    pub result_created: chrono::DateTime<Utc>,
    pub account_id: String,
    pub fields: BTreeMap<String, Option<String>>,
}

impl InMemoryResultSetStore {
    pub fn new(registry: Arc<InMemoryJobRegistry>) -> Self {
        Self {
            registry,
            sets: RwLock::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.sets.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn rows_for_active_job(&self, job: &Job) -> Vec<(ResultSet, ViewRow)> {
        let account_id_key = &self.registry.limits().account_id_key;
        let sets = self.sets.read().unwrap();
        let mut out = Vec::new();
        for set in sets.iter() {
            // Views join result sets to the active job version only.
            if set.job.name != job.name || set.job.created != job.created {
                continue;
            }
            for row in &set.results {
                let mut fields = BTreeMap::new();
                for field in &job.query_fields {
                    if field == account_id_key {
                        continue;
                    }
                    let value = row.result.get(field).map(|v| match v {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    });
                    fields.insert(field.clone(), value);
                }
                out.push((
                    set.clone(),
                    ViewRow {
                        result_created: set.created,
                        account_id: row.account_id.clone(),
                        fields,
                    },
                ));
            }
        }
        out
    }

    /// Evaluate `{name}_latest`: per account, only rows from the newest
    /// result set within `max_result_age_sec` of now.
    pub async fn latest_view_rows(&self, name: &str) -> QjResult<Vec<ViewRow>> {
        let job = self.registry.get_active(name).await?;
        let now = Utc::now();
        let cutoff = now - chrono::Duration::seconds(job.max_result_age_sec);
        let rows: Vec<(ResultSet, ViewRow)> = self
            .rows_for_active_job(&job)
            .into_iter()
            .filter(|(set, _)| set.created > cutoff)
            .collect();

        // rank() = 1 per account: keep every row tied for the newest
        // result-set creation time.
        let mut newest_per_account: BTreeMap<String, chrono::DateTime<Utc>> = BTreeMap::new();
        for (set, row) in &rows {
            newest_per_account
                .entry(row.account_id.clone())
                .and_modify(|t| {
                    if set.created > *t {
                        *t = set.created;
                    }
                })
                .or_insert(set.created);
        }
        let mut out: Vec<ViewRow> = rows
            .into_iter()
            .filter(|(set, row)| newest_per_account.get(&row.account_id) == Some(&set.created))
            .map(|(_, row)| row)
            .collect();
        out.sort_by(|a, b| a.account_id.cmp(&b.account_id));
        Ok(out)
    }

    /// Evaluate `{name}_all`: every row of the active version, no age
    /// filter.
    pub async fn all_view_rows(&self, name: &str) -> QjResult<Vec<ViewRow>> {
        let job = self.registry.get_active(name).await?;
        let mut out: Vec<ViewRow> = self
            .rows_for_active_job(&job)
            .into_iter()
            .map(|(_, row)| row)
            .collect();
        out.sort_by(|a, b| a.account_id.cmp(&b.account_id));
        Ok(out)
    }
}

#[async_trait]
impl ResultSetStore for InMemoryResultSetStore {
    async fn create(&self, input: ResultSetCreate) -> QjResult<ResultSet> {
        let job = self
            .registry
            .get_version(&input.job.name, input.job.created)
            .await?;
        let results = validate_results(&input, self.registry.limits())?;
        let set = ResultSet {
            result_set_id: Uuid::now_v7(),
            job: input.job,
            graph_spec: input.graph_spec,
            results,
            created: input.created,
        };
        info!(
            job_name = %job.name,
            result_set_id = %set.result_set_id,
            num_results = set.results.len(),
            "created result set"
        );
        self.sets.write().unwrap().push(set.clone());
        Ok(set)
    }

    async fn get(&self, result_set_id: Uuid) -> QjResult<ResultSet> {
        let sets = self.sets.read().unwrap();
        let matches: Vec<&ResultSet> = sets
            .iter()
            .filter(|s| s.result_set_id == result_set_id)
            .collect();
        match matches.as_slice() {
            [] => Err(QjError::ResultSetNotFound(format!(
                "No result set {result_set_id} found"
            ))),
            [set] => Ok((*set).clone()),
            _ => Err(QjError::defect(format!(
                "More than one result set found for {result_set_id}"
            ))),
        }
    }

    async fn get_latest_for_active_job(&self, name: &str) -> QjResult<ResultSet> {
        let active = self.registry.get_active(name).await.ok();
        let sets = self.sets.read().unwrap();
        active
            .and_then(|job| {
                sets.iter()
                    .filter(|s| s.job.name == job.name && s.job.created == job.created)
                    .max_by_key(|s| s.created)
                    .cloned()
            })
            .ok_or_else(|| {
                QjError::ResultSetNotFound(format!(
                    "No result set found for an active version of {name}"
                ))
            })
    }

    async fn get_expired(&self) -> QjResult<Vec<ResultSet>> {
        let now = Utc::now();
        let snapshot: Vec<ResultSet> = self.sets.read().unwrap().clone();
        let mut expired = Vec::new();
        for set in snapshot {
            let job = self
                .registry
                .get_version(&set.job.name, set.job.created)
                .await?;
            if set.is_expired(job.result_expiration_sec, now) {
                expired.push(set);
            }
        }
        info!(num_results = expired.len(), "get expired result sets");
        Ok(expired)
    }

    async fn delete_expired(&self) -> QjResult<u64> {
        let expired = self.get_expired().await?;
        let ids: Vec<Uuid> = expired.iter().map(|s| s.result_set_id).collect();
        let mut sets = self.sets.write().unwrap();
        sets.retain(|s| !ids.contains(&s.result_set_id));
        info!(num_deleted = ids.len(), "deleted expired result sets");
        Ok(ids.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration};
    use queryjobs_core::{
        Category, JobCreate, JobGraphSpec, JobUpdate, JobVersionRef, Limits, ResultRow,
        ResultSetGraphSpec, Severity,
    };

    fn test_limits() -> Limits {
        Limits {
            max_result_set_results: 4,
            max_result_size_bytes: 64,
            ..Limits::default()
        }
    }

    fn job_create(name: &str) -> JobCreate {
        JobCreate {
            name: name.to_string(),
            description: "A Test Job".to_string(),
            graph_spec: JobGraphSpec {
                graph_names: vec!["1".to_string()],
            },
            category: Category::Sec,
            severity: Severity::Warn,
            query: "select ?account_id ?foo where {?s ?p ?account_id}".to_string(),
            notify_if_results: false,
            max_graph_age_sec: None,
            result_expiration_sec: Some(3600),
            max_result_age_sec: None,
        }
    }

    fn row(account_id: &str, foo: &str) -> ResultRow {
        let mut map = serde_json::Map::new();
        map.insert(
            "foo".to_string(),
            serde_json::Value::String(foo.to_string()),
        );
        ResultRow {
            account_id: account_id.to_string(),
            result: map,
        }
    }

    fn set_create(
        job: &queryjobs_core::Job,
        created: DateTime<Utc>,
        rows: Vec<ResultRow>,
    ) -> ResultSetCreate {
        ResultSetCreate {
            job: JobVersionRef {
                name: job.name.clone(),
                created: job.created,
            },
            graph_spec: ResultSetGraphSpec::default(),
            results: rows,
            created,
        }
    }

    async fn setup() -> (Arc<InMemoryJobRegistry>, InMemoryResultSetStore, queryjobs_core::Job) {
        let registry = InMemoryJobRegistry::arc(test_limits());
        let job = registry.create(job_create("test_job")).await.unwrap();
        let store = InMemoryResultSetStore::new(registry.clone());
        (registry, store, job)
    }

    #[tokio::test]
    async fn create_and_get_round_trip() {
        let (_registry, store, job) = setup().await;
        let created = store
            .create(set_create(&job, Utc::now(), vec![row("1234", "x")]))
            .await
            .unwrap();
        let fetched = store.get(created.result_set_id).await.unwrap();
        assert_eq!(fetched, created);
        assert_eq!(fetched.results[0].account_id, "000000001234");

        // Id is stable across gets.
        let again = store.get(created.result_set_id).await.unwrap();
        assert_eq!(again.result_set_id, fetched.result_set_id);
    }

    #[tokio::test]
    async fn create_unknown_version_fails() {
        let (_registry, store, job) = setup().await;
        let mut input = set_create(&job, Utc::now(), vec![]);
        input.job.created = input.job.created + Duration::seconds(1);
        assert!(matches!(
            store.create(input).await,
            Err(QjError::JobVersionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn results_limit_persists_nothing() {
        let (_registry, store, job) = setup().await;
        let rows = (0..5).map(|i| row(&i.to_string(), "v")).collect();
        let err = store
            .create(set_create(&job, Utc::now(), rows))
            .await
            .unwrap_err();
        assert!(matches!(err, QjError::ResultSetResultsLimitExceeded(_)));
        assert!(store.is_empty());
        assert!(store.get_expired().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn oversized_result_persists_nothing() {
        let (_registry, store, job) = setup().await;
        let big = "x".repeat(100);
        let rows = vec![row("1", "small"), row("2", &big)];
        let err = store
            .create(set_create(&job, Utc::now(), rows))
            .await
            .unwrap_err();
        match err {
            QjError::ResultSizeExceeded(msg) => {
                assert!(msg.contains("exceeds max 64"));
                assert!(msg.ends_with("..."));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn bad_account_id_persists_nothing() {
        let (_registry, store, job) = setup().await;
        let rows = vec![row("1234", "a"), row("abcd", "b")];
        assert!(matches!(
            store.create(set_create(&job, Utc::now(), rows)).await,
            Err(QjError::AccountIdInvalid(_))
        ));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn latest_for_active_job() {
        let (registry, store, job) = setup().await;
        registry
            .update_version(
                "test_job",
                job.created,
                JobUpdate {
                    active: Some(true),
                    ..JobUpdate::default()
                },
            )
            .await
            .unwrap();

        let now = Utc::now();
        store
            .create(set_create(&job, now - Duration::seconds(60), vec![row("1", "old")]))
            .await
            .unwrap();
        let newer = store
            .create(set_create(&job, now, vec![row("1", "new")]))
            .await
            .unwrap();

        let latest = store.get_latest_for_active_job("test_job").await.unwrap();
        assert_eq!(latest.result_set_id, newer.result_set_id);
    }

    #[tokio::test]
    async fn latest_for_inactive_job_fails() {
        let (_registry, store, job) = setup().await;
        store
            .create(set_create(&job, Utc::now(), vec![row("1", "x")]))
            .await
            .unwrap();
        assert!(matches!(
            store.get_latest_for_active_job("test_job").await,
            Err(QjError::ResultSetNotFound(_))
        ));
    }

    #[tokio::test]
    async fn expiration_uses_owning_version_policy() {
        // Job expires result sets after 3600s.
        let (_registry, store, job) = setup().await;
        let now = Utc::now();
        store
            .create(set_create(&job, now - Duration::seconds(3601), vec![row("1", "a")]))
            .await
            .unwrap();
        let fresh = store
            .create(set_create(&job, now - Duration::seconds(3600), vec![row("2", "b")]))
            .await
            .unwrap();

        let expired = store.get_expired().await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_ne!(expired[0].result_set_id, fresh.result_set_id);

        let deleted = store.delete_expired().await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.len(), 1);
        assert!(store.get_expired().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn get_missing_result_set_fails() {
        let (_registry, store, _job) = setup().await;
        assert!(matches!(
            store.get(Uuid::now_v7()).await,
            Err(QjError::ResultSetNotFound(_))
        ));
    }
}
