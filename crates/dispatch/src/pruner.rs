//! Periodic deletion of expired result sets.

use std::sync::Arc;

use tracing::{info, instrument};

use queryjobs_core::QjResult;
use queryjobs_store::ResultSetStore;

pub struct Pruner {
    store: Arc<dyn ResultSetStore>,
}

impl Pruner {
    pub fn new(store: Arc<dyn ResultSetStore>) -> Self {
        Self { store }
    }

    /// Delete every expired result set, returning how many were removed.
    #[instrument(skip(self), err)]
    pub async fn prune(&self) -> QjResult<u64> {
        let num_deleted = self.store.delete_expired().await?;
        info!(num_deleted, "pruned expired result sets");
        Ok(num_deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    use queryjobs_core::{
        Category, JobCreate, JobGraphSpec, JobVersionRef, Limits, ResultSetCreate,
        ResultSetGraphSpec, Severity,
    };
    use queryjobs_store::{InMemoryJobRegistry, InMemoryResultSetStore, JobRegistry};

    #[tokio::test]
    async fn prune_removes_only_expired_sets() {
        let registry = InMemoryJobRegistry::arc(Limits::default());
        let job = registry
            .create(JobCreate {
                name: "test_job".to_string(),
                description: "d".to_string(),
                graph_spec: JobGraphSpec {
                    graph_names: vec!["1".to_string()],
                },
                category: Category::Gov,
                severity: Severity::Info,
                query: "select ?account_id where {?s ?p ?account_id}".to_string(),
                notify_if_results: false,
                max_graph_age_sec: None,
                result_expiration_sec: Some(100),
                max_result_age_sec: None,
            })
            .await
            .unwrap();
        let store = Arc::new(InMemoryResultSetStore::new(registry));

        let now = Utc::now();
        for age_sec in [50, 150, 250] {
            store
                .create(ResultSetCreate {
                    job: JobVersionRef {
                        name: job.name.clone(),
                        created: job.created,
                    },
                    graph_spec: ResultSetGraphSpec::default(),
                    results: vec![],
                    created: now - Duration::seconds(age_sec),
                })
                .await
                .unwrap();
        }

        let pruner = Pruner::new(store.clone());
        assert_eq!(pruner.prune().await.unwrap(), 2);
        assert_eq!(store.len(), 1);
        // A second pass finds nothing new.
        assert_eq!(pruner.prune().await.unwrap(), 0);
    }
}
