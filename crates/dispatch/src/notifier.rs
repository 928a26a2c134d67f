//! Result-set notifications.
//!
//! Jobs flagged `notify_if_results` publish a notification after any run
//! that produced at least one result. Empty runs and unflagged jobs stay
//! silent.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use queryjobs_core::{Category, Job, QjResult, ResultSet, Severity};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSetNotification {
    pub job_name: String,
    pub description: String,
    pub category: Category,
    pub severity: Severity,
    pub result_set_id: Uuid,
    pub num_results: usize,
    pub created: DateTime<Utc>,
}

#[async_trait]
pub trait ResultSetNotifier: Send + Sync {
    async fn notify(&self, notification: ResultSetNotification) -> QjResult<()>;
}

/// Notifier that records notifications in memory, for tests and local runs.
#[derive(Default)]
pub struct InMemoryNotifier {
    notifications: Mutex<Vec<ResultSetNotification>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<ResultSetNotification> {
        self.notifications.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResultSetNotifier for InMemoryNotifier {
    async fn notify(&self, notification: ResultSetNotification) -> QjResult<()> {
        self.notifications.lock().unwrap().push(notification);
        Ok(())
    }
}

/// Publish a notification for `result_set` if its job asks for one and the
/// set is non-empty. Returns whether a notification was sent.
#[instrument(skip_all, fields(job_name = %job.name), err)]
pub async fn notify_if_results(
    job: &Job,
    result_set: &ResultSet,
    notifier: &dyn ResultSetNotifier,
) -> QjResult<bool> {
    if !job.notify_if_results || result_set.results.is_empty() {
        return Ok(false);
    }
    let notification = ResultSetNotification {
        job_name: job.name.clone(),
        description: job.description.clone(),
        category: job.category,
        severity: job.severity,
        result_set_id: result_set.result_set_id,
        num_results: result_set.results.len(),
        created: result_set.created,
    };
    notifier.notify(notification).await?;
    info!(num_results = result_set.results.len(), "sent result set notification");
    Ok(true)
}
