//! Fan-out of active jobs onto the work queue.
//!
//! Every dispatch run has an execution hash: the digest of the trigger
//! payload when one is present, or of a fresh UUID for ad-hoc runs. A
//! redelivered trigger therefore produces the same per-job dedupe ids and
//! the queue drops the duplicates, while ad-hoc runs always go through.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{error, info, instrument};
use uuid::Uuid;

use queryjobs_core::{Job, QjError, QjResult};
use queryjobs_store::JobRegistry;

use crate::queue::{QueueMessage, WorkQueue};

pub struct Dispatcher {
    registry: Arc<dyn JobRegistry>,
    queue: Arc<dyn WorkQueue>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchSummary {
    pub execution_hash: String,
    pub num_dispatched: usize,
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

impl Dispatcher {
    pub fn new(registry: Arc<dyn JobRegistry>, queue: Arc<dyn WorkQueue>) -> Self {
        Self { registry, queue }
    }

    fn message_for(job: &Job, execution_hash: &str) -> QjResult<QueueMessage> {
        let body = serde_json::to_string(job).map_err(|e| QjError::Serialization(e.to_string()))?;
        let mut hasher = Sha256::new();
        hasher.update(body.as_bytes());
        let group_id = hex::encode(hasher.clone().finalize());
        hasher.update(execution_hash.as_bytes());
        let dedupe_id = hex::encode(hasher.finalize());
        Ok(QueueMessage {
            body,
            group_id,
            dedupe_id,
        })
    }

    /// Enqueue every active job once for this execution. Failed sends do
    /// not block the remaining jobs; any failure surfaces after the run.
    #[instrument(skip(self, trigger), err)]
    pub async fn dispatch_active_jobs(&self, trigger: Option<&str>) -> QjResult<DispatchSummary> {
        let execution_hash = match trigger {
            Some(payload) => sha256_hex(payload.as_bytes()),
            None => sha256_hex(Uuid::now_v7().to_string().as_bytes()),
        };
        let jobs = self.registry.get_multi(true).await?;
        info!(
            execution_hash = %execution_hash,
            num_jobs = jobs.len(),
            "dispatching active jobs"
        );

        let mut num_dispatched = 0;
        let mut failed: Vec<String> = Vec::new();
        for job in &jobs {
            let message = Self::message_for(job, &execution_hash)?;
            match self.queue.send(message).await {
                Ok(()) => num_dispatched += 1,
                Err(e) => {
                    error!(job_name = %job.name, error = %e, "failed to dispatch job");
                    failed.push(job.name.clone());
                }
            }
        }
        if !failed.is_empty() {
            return Err(QjError::storage(format!(
                "failed to dispatch {} of {} jobs: {}",
                failed.len(),
                jobs.len(),
                failed.join(", ")
            )));
        }
        Ok(DispatchSummary {
            execution_hash,
            num_dispatched,
        })
    }
}
