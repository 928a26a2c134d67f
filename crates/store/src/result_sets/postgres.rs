//! Postgres-backed result-set store.
//!
//! `create` is one transaction: the result_set row plus every result row,
//! so a failure partway persists nothing. Deletion relies on the
//! `ON DELETE CASCADE` from result to result_set.

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgRow;
use tracing::{info, instrument};
use uuid::Uuid;

use queryjobs_core::{
    JobVersionRef, Limits, QjError, QjResult, ResultRow, ResultSet, ResultSetCreate,
    ResultSetGraphSpec,
};

use super::{ResultSetStore, validate_results};
use crate::{column, map_sqlx_error};

const SET_COLUMNS: &str = "rs.id, rs.result_set_id, rs.created, rs.graph_spec, \
                           j.name AS job_name, j.created AS job_created";

pub struct PostgresResultSetStore {
    pool: PgPool,
    limits: Limits,
}

/// A result_set row before its results are attached. `db_id` is the
/// surrogate key the result rows reference.
struct SetHead {
    db_id: i64,
    result_set_id: Uuid,
    job: JobVersionRef,
    graph_spec: ResultSetGraphSpec,
    created: chrono::DateTime<chrono::Utc>,
}

impl PostgresResultSetStore {
    pub fn new(pool: PgPool, limits: Limits) -> Self {
        Self { pool, limits }
    }

    fn head_from_row(row: &PgRow) -> QjResult<SetHead> {
        let graph_spec: serde_json::Value = column(row, "graph_spec")?;
        Ok(SetHead {
            db_id: column(row, "id")?,
            result_set_id: column(row, "result_set_id")?,
            job: JobVersionRef {
                name: column(row, "job_name")?,
                created: column(row, "job_created")?,
            },
            graph_spec: serde_json::from_value(graph_spec)
                .map_err(|e| QjError::storage(format!("result_set.graph_spec: {e}")))?,
            created: column(row, "created")?,
        })
    }

    async fn attach_results(&self, head: SetHead) -> QjResult<ResultSet> {
        let rows = sqlx::query(
            "SELECT account_id, result FROM result WHERE result_set_id = $1 ORDER BY result_id",
        )
        .bind(head.db_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get results", e))?;
        let mut results = Vec::with_capacity(rows.len());
        for row in &rows {
            let result: serde_json::Value = column(row, "result")?;
            results.push(ResultRow {
                account_id: column(row, "account_id")?,
                result: match result {
                    serde_json::Value::Object(map) => map,
                    other => {
                        return Err(QjError::storage(format!(
                            "result is not a JSON object: {other}"
                        )));
                    }
                },
            });
        }
        Ok(ResultSet {
            result_set_id: head.result_set_id,
            job: head.job,
            graph_spec: head.graph_spec,
            results,
            created: head.created,
        })
    }
}

#[async_trait]
impl ResultSetStore for PostgresResultSetStore {
    #[instrument(skip(self, input), fields(job_name = %input.job.name), err)]
    async fn create(&self, input: ResultSetCreate) -> QjResult<ResultSet> {
        let results = validate_results(&input, &self.limits)?;

        let job_id: i64 = sqlx::query_scalar(
            "SELECT id FROM job WHERE name = $1 AND created = $2",
        )
        .bind(&input.job.name)
        .bind(input.job.created)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("find job version", e))?
        .ok_or_else(|| {
            QjError::JobVersionNotFound(format!("Could not find job {}", input.job))
        })?;

        let result_set_id = Uuid::now_v7();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin create result set", e))?;
        let set_db_id: i64 = sqlx::query_scalar(
            "INSERT INTO result_set (result_set_id, job_id, created, graph_spec) \
             VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(result_set_id)
        .bind(job_id)
        .bind(input.created)
        .bind(
            serde_json::to_value(&input.graph_spec)
                .map_err(|e| QjError::Serialization(e.to_string()))?,
        )
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("create result set", e))?;

        for row in &results {
            sqlx::query(
                "INSERT INTO result (result_id, result_set_id, account_id, result) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(Uuid::now_v7())
            .bind(set_db_id)
            .bind(&row.account_id)
            .bind(serde_json::Value::Object(row.result.clone()))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("create result", e))?;
        }
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit create result set", e))?;

        info!(
            result_set_id = %result_set_id,
            num_results = results.len(),
            "created result set"
        );
        Ok(ResultSet {
            result_set_id,
            job: input.job,
            graph_spec: input.graph_spec,
            results,
            created: input.created,
        })
    }

    #[instrument(skip(self), err)]
    async fn get(&self, result_set_id: Uuid) -> QjResult<ResultSet> {
        let rows = sqlx::query(&format!(
            "SELECT {SET_COLUMNS} FROM result_set rs JOIN job j ON rs.job_id = j.id \
             WHERE rs.result_set_id = $1"
        ))
        .bind(result_set_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get result set", e))?;
        match rows.as_slice() {
            [] => Err(QjError::ResultSetNotFound(format!(
                "No result set {result_set_id} found"
            ))),
            [row] => self.attach_results(Self::head_from_row(row)?).await,
            _ => Err(QjError::defect(format!(
                "More than one result set found for {result_set_id}"
            ))),
        }
    }

    #[instrument(skip(self), err)]
    async fn get_latest_for_active_job(&self, name: &str) -> QjResult<ResultSet> {
        let row = sqlx::query(&format!(
            "SELECT {SET_COLUMNS} FROM result_set rs JOIN job j ON rs.job_id = j.id \
             WHERE j.active AND j.name = $1 ORDER BY rs.created DESC LIMIT 1"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get latest result set", e))?;
        match row {
            Some(row) => self.attach_results(Self::head_from_row(&row)?).await,
            None => Err(QjError::ResultSetNotFound(format!(
                "No result set found for an active version of {name}"
            ))),
        }
    }

    #[instrument(skip(self), err)]
    async fn get_expired(&self) -> QjResult<Vec<ResultSet>> {
        let rows = sqlx::query(&format!(
            "SELECT {SET_COLUMNS} FROM result_set rs JOIN job j ON rs.job_id = j.id \
             WHERE extract(epoch FROM (now() - rs.created)) > j.result_expiration_sec"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get expired result sets", e))?;
        info!(num_results = rows.len(), "get expired result sets");
        let mut sets = Vec::with_capacity(rows.len());
        for row in &rows {
            sets.push(self.attach_results(Self::head_from_row(row)?).await?);
        }
        Ok(sets)
    }

    #[instrument(skip(self), err)]
    async fn delete_expired(&self) -> QjResult<u64> {
        // Snapshot first so each deletion is an independent unit; a set
        // that ages past the threshold mid-run is caught on the next one.
        let expired = self.get_expired().await?;
        let mut deleted = 0u64;
        for set in &expired {
            let res = sqlx::query("DELETE FROM result_set WHERE result_set_id = $1")
                .bind(set.result_set_id)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("delete result set", e))?;
            deleted += res.rows_affected();
        }
        info!(num_deleted = deleted, "deleted expired result sets");
        Ok(deleted)
    }
}
