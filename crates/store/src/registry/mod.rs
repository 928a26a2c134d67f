//! Job registry: versioned job storage with the single-active-version
//! invariant and per-job view lifecycle.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use queryjobs_core::{Job, JobCreate, JobUpdate, QjResult};

mod in_memory;
mod postgres;

pub use in_memory::InMemoryJobRegistry;
pub use postgres::PostgresJobRegistry;

/// Registry over versioned jobs.
///
/// For a given name at most one version is active. Activation atomically
/// deactivates sibling versions and regenerates both derived views; deletion
/// removes every version and drops both views.
#[async_trait]
pub trait JobRegistry: Send + Sync {
    /// Validate and persist a new job version (`active = false`).
    async fn create(&self, input: JobCreate) -> QjResult<Job>;

    /// The unique active version for `name`.
    async fn get_active(&self, name: &str) -> QjResult<Job>;

    /// All jobs, or only active ones, ordered by `(name, created)`.
    async fn get_multi(&self, active_only: bool) -> QjResult<Vec<Job>>;

    /// All versions of `name`, ordered by `created`.
    async fn get_versions(&self, name: &str) -> QjResult<Vec<Job>>;

    /// The exact version `(name, created)`.
    async fn get_version(&self, name: &str, created: DateTime<Utc>) -> QjResult<Job>;

    /// Apply a partial update to the exact version `(name, created)`.
    async fn update_version(
        &self,
        name: &str,
        created: DateTime<Utc>,
        patch: JobUpdate,
    ) -> QjResult<Job>;

    /// Delete every version of `name` and drop its views. Idempotent.
    async fn delete(&self, name: &str) -> QjResult<()>;
}

/// Knob values supplied in a patch must be positive; ceilings apply at
/// creation only (a version keeps whatever it was created with).
pub(crate) fn validate_patch(patch: &JobUpdate) -> QjResult<()> {
    use queryjobs_core::QjError;
    for (field, value) in [
        ("max_graph_age_sec", patch.max_graph_age_sec),
        ("result_expiration_sec", patch.result_expiration_sec),
        ("max_result_age_sec", patch.max_result_age_sec),
    ] {
        if let Some(v) = value {
            if v <= 0 {
                return Err(QjError::JobInvalid(format!(
                    "Field {field} value {v} must be > 0"
                )));
            }
        }
    }
    Ok(())
}
