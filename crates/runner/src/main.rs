//! Mode-driven entrypoint: one binary, one pass per invocation.
//!
//! `MODE=init-schema` creates tables and indexes, `MODE=dispatch` enqueues
//! every active job once, `MODE=prune` deletes expired result sets.
//! `DATABASE_URL` points at Postgres; `RUST_LOG` controls log verbosity.

use std::sync::Arc;

use anyhow::{Context, bail};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use queryjobs_core::{Limits, QjResult, SparqlSelectParser};
use queryjobs_dispatch::{Dispatcher, Pruner, QueueMessage, WorkQueue};
use queryjobs_store::{PostgresJobRegistry, PostgresResultSetStore, schema};

/// Queue that writes each message to stdout as a JSON line. Stands in for
/// a real broker when running the dispatcher locally.
struct StdoutWorkQueue;

#[async_trait]
impl WorkQueue for StdoutWorkQueue {
    async fn send(&self, message: QueueMessage) -> QjResult<()> {
        println!(
            "{}",
            serde_json::json!({
                "group_id": message.group_id,
                "dedupe_id": message.dedupe_id,
                "body": message.body,
            })
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    queryjobs_observability::init();

    let mode = std::env::var("MODE").context("MODE must be set")?;
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("connecting to database")?;
    let limits = Limits::default().validated()?;

    match mode.as_str() {
        "init-schema" => {
            schema::ensure_schema(&pool).await?;
            info!("schema initialized");
        }
        "dispatch" => {
            let registry = Arc::new(PostgresJobRegistry::new(
                pool,
                Arc::new(SparqlSelectParser),
                limits,
            ));
            let trigger = std::env::var("TRIGGER").ok();
            let dispatcher = Dispatcher::new(registry, Arc::new(StdoutWorkQueue));
            let summary = dispatcher.dispatch_active_jobs(trigger.as_deref()).await?;
            info!(
                execution_hash = %summary.execution_hash,
                num_dispatched = summary.num_dispatched,
                "dispatch pass complete"
            );
        }
        "prune" => {
            let store = Arc::new(PostgresResultSetStore::new(pool, limits));
            let num_deleted = Pruner::new(store).prune().await?;
            info!(num_deleted, "prune pass complete");
        }
        other => bail!("unknown MODE '{other}' (expected init-schema, dispatch or prune)"),
    }
    Ok(())
}
