//! Postgres-backed tests. Run with a live database:
//!
//! ```text
//! DATABASE_URL=postgres://... cargo test -p queryjobs-store -- --ignored
//! ```

use std::sync::Arc;

use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use queryjobs_core::{
    Category, JobCreate, JobGraphSpec, JobUpdate, JobVersionRef, Limits, ResultRow,
    ResultSetCreate, ResultSetGraphSpec, Severity, SparqlSelectParser,
};
use queryjobs_store::registry::JobRegistry;
use queryjobs_store::result_sets::ResultSetStore;
use queryjobs_store::{PostgresJobRegistry, PostgresResultSetStore, schema};

async fn pool() -> sqlx::PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for ignored tests");
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await
        .expect("connect");
    schema::ensure_schema(&pool).await.expect("schema");
    pool
}

fn unique_name() -> String {
    format!("it_{}", Uuid::now_v7().simple())
}

fn job_create(name: &str) -> JobCreate {
    JobCreate {
        name: name.to_string(),
        description: "integration".to_string(),
        graph_spec: JobGraphSpec {
            graph_names: vec!["alti".to_string()],
        },
        category: Category::Gov,
        severity: Severity::Info,
        query: "select ?account_id ?foo where {?s ?p ?account_id}".to_string(),
        notify_if_results: false,
        max_graph_age_sec: None,
        result_expiration_sec: None,
        max_result_age_sec: None,
    }
}

#[tokio::test]
#[ignore]
async fn job_lifecycle_round_trip() {
    let pool = pool().await;
    let registry =
        PostgresJobRegistry::new(pool, Arc::new(SparqlSelectParser), Limits::default());
    let name = unique_name();

    let v1 = registry.create(job_create(&name)).await.unwrap();
    assert!(!v1.active);

    let activated = registry
        .update_version(
            &name,
            v1.created,
            JobUpdate {
                active: Some(true),
                ..JobUpdate::default()
            },
        )
        .await
        .unwrap();
    assert!(activated.active);
    assert_eq!(registry.get_active(&name).await.unwrap(), activated);

    registry.delete(&name).await.unwrap();
    assert!(registry.get_versions(&name).await.is_err());
}

#[tokio::test]
#[ignore]
async fn result_set_round_trip() {
    let pool = pool().await;
    let registry = PostgresJobRegistry::new(
        pool.clone(),
        Arc::new(SparqlSelectParser),
        Limits::default(),
    );
    let store = PostgresResultSetStore::new(pool, Limits::default());
    let name = unique_name();

    let job = registry.create(job_create(&name)).await.unwrap();
    let mut result = serde_json::Map::new();
    result.insert("foo".to_string(), serde_json::Value::String("x".to_string()));
    let created = store
        .create(ResultSetCreate {
            job: JobVersionRef {
                name: job.name.clone(),
                created: job.created,
            },
            graph_spec: ResultSetGraphSpec::default(),
            results: vec![ResultRow::new("1234", result).unwrap()],
            created: Utc::now(),
        })
        .await
        .unwrap();

    let fetched = store.get(created.result_set_id).await.unwrap();
    assert_eq!(fetched.results.len(), 1);
    assert_eq!(fetched.results[0].account_id, "000000001234");

    registry.delete(&name).await.unwrap();
    assert!(store.get(created.result_set_id).await.is_err());
}
