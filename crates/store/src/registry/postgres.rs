//! Postgres-backed job registry.
//!
//! Activation is one transaction: deactivate sibling versions, activate the
//! target row, drop and recreate both views. A crash mid-sequence rolls the
//! whole unit back, so there is never a window with two active versions or
//! views pointing at the wrong version. The partial unique index
//! `(name) WHERE active` backstops the invariant against concurrent
//! activations racing past the application logic.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgRow;
use tracing::{info, instrument};

use queryjobs_core::{
    Category, Job, JobCreate, JobGraphSpec, JobUpdate, Limits, QjError, QjResult, QueryParser,
    Severity,
};

use super::{JobRegistry, validate_patch};
use crate::views;
use crate::{column, map_sqlx_error};

const JOB_COLUMNS: &str = "name, description, graph_spec, query_fields, category, severity, \
                           query, max_graph_age_sec, created, active, result_expiration_sec, \
                           max_result_age_sec, notify_if_results";

pub struct PostgresJobRegistry {
    pool: PgPool,
    parser: Arc<dyn QueryParser>,
    limits: Limits,
}

impl PostgresJobRegistry {
    pub fn new(pool: PgPool, parser: Arc<dyn QueryParser>, limits: Limits) -> Self {
        Self {
            pool,
            parser,
            limits,
        }
    }

    fn job_from_row(row: &PgRow) -> QjResult<Job> {
        let graph_spec: serde_json::Value = column(row, "graph_spec")?;
        let query_fields: serde_json::Value = column(row, "query_fields")?;
        let category: String = column(row, "category")?;
        let severity: String = column(row, "severity")?;
        Ok(Job {
            name: column(row, "name")?,
            created: column(row, "created")?,
            description: column(row, "description")?,
            graph_spec: serde_json::from_value::<JobGraphSpec>(graph_spec)
                .map_err(|e| QjError::storage(format!("job.graph_spec: {e}")))?,
            category: Category::parse(&category)?,
            severity: Severity::parse(&severity)?,
            query: column(row, "query")?,
            query_fields: serde_json::from_value(query_fields)
                .map_err(|e| QjError::storage(format!("job.query_fields: {e}")))?,
            active: column(row, "active")?,
            max_graph_age_sec: column(row, "max_graph_age_sec")?,
            result_expiration_sec: column(row, "result_expiration_sec")?,
            max_result_age_sec: column(row, "max_result_age_sec")?,
            notify_if_results: column(row, "notify_if_results")?,
        })
    }
}

#[async_trait]
impl JobRegistry for PostgresJobRegistry {
    #[instrument(skip(self, input), fields(job_name = %input.name), err)]
    async fn create(&self, input: JobCreate) -> QjResult<Job> {
        let job = input.build(self.parser.as_ref(), &self.limits)?;
        sqlx::query(
            "INSERT INTO job (name, description, graph_spec, query_fields, category, severity, \
             query, max_graph_age_sec, created, active, result_expiration_sec, \
             max_result_age_sec, notify_if_results) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(&job.name)
        .bind(&job.description)
        .bind(
            serde_json::to_value(&job.graph_spec)
                .map_err(|e| QjError::Serialization(e.to_string()))?,
        )
        .bind(
            serde_json::to_value(&job.query_fields)
                .map_err(|e| QjError::Serialization(e.to_string()))?,
        )
        .bind(job.category.as_str())
        .bind(job.severity.as_str())
        .bind(&job.query)
        .bind(job.max_graph_age_sec)
        .bind(job.created)
        .bind(job.active)
        .bind(job.result_expiration_sec)
        .bind(job.max_result_age_sec)
        .bind(job.notify_if_results)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("create job", e))?;
        info!(job_name = %job.name, "created job version");
        Ok(job)
    }

    #[instrument(skip(self), err)]
    async fn get_active(&self, name: &str) -> QjResult<Job> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM job WHERE active AND name = $1"
        ))
        .bind(name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get active job", e))?;
        info!(job_name = name, num_results = rows.len(), "get active job");
        match rows.as_slice() {
            [] => Err(QjError::ActiveJobVersionNotFound(format!(
                "No active job version found for {name}"
            ))),
            [row] => Self::job_from_row(row),
            _ => Err(QjError::defect(format!(
                "More than one active job found for {name}"
            ))),
        }
    }

    #[instrument(skip(self), err)]
    async fn get_multi(&self, active_only: bool) -> QjResult<Vec<Job>> {
        let sql = if active_only {
            format!("SELECT {JOB_COLUMNS} FROM job WHERE active ORDER BY name, created")
        } else {
            format!("SELECT {JOB_COLUMNS} FROM job ORDER BY name, created")
        };
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get jobs", e))?;
        info!(active_only, num_results = rows.len(), "get jobs");
        rows.iter().map(Self::job_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn get_versions(&self, name: &str) -> QjResult<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM job WHERE name = $1 ORDER BY created"
        ))
        .bind(name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get job versions", e))?;
        info!(job_name = name, num_results = rows.len(), "get job versions");
        if rows.is_empty() {
            return Err(QjError::JobNotFound(format!("Job '{name}' not found")));
        }
        rows.iter().map(Self::job_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn get_version(&self, name: &str, created: DateTime<Utc>) -> QjResult<Job> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM job WHERE name = $1 AND created = $2"
        ))
        .bind(name)
        .bind(created)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get job version", e))?;
        match rows.as_slice() {
            [] => Err(QjError::JobVersionNotFound(format!(
                "Could not find job {name} / {created}"
            ))),
            [row] => Self::job_from_row(row),
            _ => Err(QjError::defect(format!(
                "More than one job found for {name} with version {created}"
            ))),
        }
    }

    #[instrument(skip(self, patch), err)]
    async fn update_version(
        &self,
        name: &str,
        created: DateTime<Utc>,
        patch: JobUpdate,
    ) -> QjResult<Job> {
        validate_patch(&patch)?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin update", e))?;

        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM job WHERE name = $1 AND created = $2 FOR UPDATE"
        ))
        .bind(name)
        .bind(created)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("lock job version", e))?;
        let mut job = match rows.as_slice() {
            [] => {
                return Err(QjError::JobVersionNotFound(format!(
                    "Could not find job {name} / {created}"
                )));
            }
            [row] => Self::job_from_row(row)?,
            _ => {
                return Err(QjError::defect(format!(
                    "More than one job found for {name} with version {created}"
                )));
            }
        };

        job.apply_update(&patch);
        if patch.active == Some(true) {
            // Siblings first: the partial unique index would reject two
            // active rows for the same name.
            sqlx::query("UPDATE job SET active = false WHERE name = $1 AND created <> $2")
                .bind(name)
                .bind(created)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("deactivate siblings", e))?;
            job.active = true;
        } else if patch.active == Some(false) {
            job.active = false;
        }

        sqlx::query(
            "UPDATE job SET description = $3, category = $4, severity = $5, \
             max_graph_age_sec = $6, result_expiration_sec = $7, max_result_age_sec = $8, \
             notify_if_results = $9, active = $10 \
             WHERE name = $1 AND created = $2",
        )
        .bind(name)
        .bind(created)
        .bind(&job.description)
        .bind(job.category.as_str())
        .bind(job.severity.as_str())
        .bind(job.max_graph_age_sec)
        .bind(job.result_expiration_sec)
        .bind(job.max_result_age_sec)
        .bind(job.notify_if_results)
        .bind(job.active)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update job version", e))?;

        if patch.active == Some(true) {
            for statement in
                views::regenerate_statements(&job, &self.limits.account_id_key, &self.limits.db_ro_role)?
            {
                sqlx::query(&statement)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| map_sqlx_error("regenerate views", e))?;
            }
            info!(job_name = name, "regenerated views");
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit update", e))?;
        info!(job_name = name, "updated job version");
        Ok(job)
    }

    #[instrument(skip(self), err)]
    async fn delete(&self, name: &str) -> QjResult<()> {
        // Validates the name before it is spliced into the DROP statements.
        let drop_latest = views::drop_view_sql(&views::latest_view_name(name))?;
        let drop_all = views::drop_view_sql(&views::all_view_name(name))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin delete", e))?;
        sqlx::query("DELETE FROM job WHERE name = $1")
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete job", e))?;
        for statement in [drop_latest, drop_all] {
            sqlx::query(&statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("drop view", e))?;
        }
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit delete", e))?;
        info!(job_name = name, "deleted job");
        Ok(())
    }
}
