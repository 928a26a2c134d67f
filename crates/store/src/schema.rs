//! Schema bootstrap. Idempotent: every statement is `IF NOT EXISTS`.

use sqlx::PgPool;
use tracing::{info, instrument};

use queryjobs_core::QjResult;

use crate::map_sqlx_error;

/// Job versions. `(name, created)` identifies a version; the partial
/// unique index enforces at most one active version per name.
const CREATE_JOB: &str = "\
CREATE TABLE IF NOT EXISTS job (
    id bigserial PRIMARY KEY,
    name text NOT NULL,
    created timestamptz NOT NULL,
    description text NOT NULL,
    graph_spec jsonb NOT NULL,
    query_fields jsonb NOT NULL,
    category text NOT NULL,
    severity text NOT NULL,
    query text NOT NULL,
    active boolean NOT NULL DEFAULT false,
    max_graph_age_sec bigint NOT NULL,
    result_expiration_sec bigint NOT NULL,
    max_result_age_sec bigint NOT NULL,
    notify_if_results boolean NOT NULL DEFAULT false,
    UNIQUE (name, created)
)";

const CREATE_JOB_ACTIVE_INDEX: &str =
    "CREATE UNIQUE INDEX IF NOT EXISTS job_one_active_per_name ON job (name) WHERE active";

const CREATE_RESULT_SET: &str = "\
CREATE TABLE IF NOT EXISTS result_set (
    id bigserial PRIMARY KEY,
    result_set_id uuid NOT NULL UNIQUE,
    job_id bigint NOT NULL REFERENCES job (id) ON DELETE CASCADE,
    created timestamptz NOT NULL,
    graph_spec jsonb NOT NULL
)";

const CREATE_RESULT_SET_INDEXES: [&str; 2] = [
    "CREATE INDEX IF NOT EXISTS result_set_job_id ON result_set (job_id)",
    "CREATE INDEX IF NOT EXISTS result_set_created ON result_set (created)",
];

const CREATE_RESULT: &str = "\
CREATE TABLE IF NOT EXISTS result (
    result_id uuid PRIMARY KEY,
    result_set_id bigint NOT NULL REFERENCES result_set (id) ON DELETE CASCADE,
    account_id text NOT NULL,
    result jsonb NOT NULL
)";

const CREATE_RESULT_INDEXES: [&str; 2] = [
    "CREATE INDEX IF NOT EXISTS result_result_set_id ON result (result_set_id)",
    "CREATE INDEX IF NOT EXISTS result_account_id ON result (account_id)",
];

/// Create tables and indexes if they do not exist.
#[instrument(skip(pool), err)]
pub async fn ensure_schema(pool: &PgPool) -> QjResult<()> {
    let statements = [CREATE_JOB, CREATE_JOB_ACTIVE_INDEX, CREATE_RESULT_SET]
        .into_iter()
        .chain(CREATE_RESULT_SET_INDEXES)
        .chain([CREATE_RESULT])
        .chain(CREATE_RESULT_INDEXES);
    for statement in statements {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| map_sqlx_error("ensure schema", e))?;
    }
    info!("schema ensured");
    Ok(())
}
