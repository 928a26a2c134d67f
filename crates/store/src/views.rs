//! Per-job view DDL generation.
//!
//! Every job name has two derived views over result/result_set/job, scoped
//! to the currently active version:
//!
//! - `{name}_latest`: for each account, the rows of the most recent result
//!   set younger than `max_result_age_sec`, ranked by result-set creation
//!   time descending and keeping rank 1 only.
//! - `{name}_all`: every row of every result set of the active version,
//!   unfiltered by age.
//!
//! Views are regenerated on activation and dropped on job deletion. They are
//! plain views (not materialized) so they always reflect current data.
//!
//! Job names and query fields are embedded as SQL identifiers; [`SqlIdent`]
//! only wraps strings that already passed the identifier grammar, which is
//! what keeps this DDL injection-free.

use std::fmt;

use queryjobs_core::job::is_valid_identifier;
use queryjobs_core::result_set::ACCOUNT_ID_WIDTH;
use queryjobs_core::{Job, QjError, QjResult};

/// An identifier safe to splice into SQL text. Constructible only from
/// strings matching the identifier grammar.
#[derive(Debug, Clone, Copy)]
pub struct SqlIdent<'a>(&'a str);

impl<'a> SqlIdent<'a> {
    pub fn try_new(value: &'a str) -> QjResult<Self> {
        if is_valid_identifier(value) {
            Ok(Self(value))
        } else {
            Err(QjError::JobInvalid(format!(
                "{value} is not a valid SQL identifier"
            )))
        }
    }

    pub fn as_str(&self) -> &'a str {
        self.0
    }
}

impl fmt::Display for SqlIdent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

pub fn latest_view_name(job_name: &str) -> String {
    format!("{job_name}_latest")
}

pub fn all_view_name(job_name: &str) -> String {
    format!("{job_name}_all")
}

pub fn drop_view_sql(view_name: &str) -> QjResult<String> {
    let view = SqlIdent::try_new(view_name)?;
    Ok(format!("DROP VIEW IF EXISTS {view};"))
}

pub fn grant_select_sql(view_name: &str, ro_role: &str) -> QjResult<String> {
    let view = SqlIdent::try_new(view_name)?;
    let role = SqlIdent::try_new(ro_role)?;
    Ok(format!("GRANT SELECT ON {view} TO {role};"))
}

/// The shared projection: result-set creation time, zero-padded account id,
/// and every non-account-id query field pulled out of the result map.
fn projection_fields<'a>(job: &'a Job, account_id_key: &str) -> QjResult<Vec<SqlIdent<'a>>> {
    job.query_fields
        .iter()
        .filter(|f| f.as_str() != account_id_key)
        .map(|f| SqlIdent::try_new(f))
        .collect()
}

/// CREATE VIEW statement for `{name}_latest`.
pub fn latest_view_sql(job: &Job, account_id_key: &str) -> QjResult<String> {
    let view = latest_view_name(&job.name);
    let view = SqlIdent::try_new(&view)?;
    let job_name = SqlIdent::try_new(&job.name)?;
    let account_key = SqlIdent::try_new(account_id_key)?;
    let fields = projection_fields(job, account_id_key)?;

    let mut outer: Vec<String> = vec!["result_created".to_string(), account_key.to_string()];
    outer.extend(fields.iter().map(|f| f.to_string()));

    let mut sql = format!(
        "CREATE VIEW {view} AS\n\
         SELECT {}\n\
         FROM\n\
         (\n\
         \x20   SELECT\n\
         \x20       rs.created as result_created,\n\
         \x20       lpad(r.account_id::text, {ACCOUNT_ID_WIDTH}, '0') as {account_key},\n",
        outer.join(", "),
    );
    for field in &fields {
        sql.push_str(&format!("        result->>'{field}' as {field},\n"));
    }
    sql.push_str(&format!(
        "        RANK () OVER (PARTITION BY r.account_id ORDER BY rs.created DESC) as rank_number\n\
         \x20   FROM\n\
         \x20       result r\n\
         \x20   INNER JOIN result_set rs ON r.result_set_id = rs.id\n\
         \x20   INNER JOIN job j ON rs.job_id = j.id\n\
         \x20   WHERE\n\
         \x20       j.name = '{job_name}' AND\n\
         \x20       j.active = true AND\n\
         \x20       rs.created > CURRENT_TIMESTAMP - INTERVAL '{} seconds'\n\
         ) ranked_query\n\
         WHERE rank_number = 1\n\
         ORDER BY {account_key};\n",
        job.max_result_age_sec,
    ));
    Ok(sql)
}

/// CREATE VIEW statement for `{name}_all`.
pub fn all_view_sql(job: &Job, account_id_key: &str) -> QjResult<String> {
    let view = all_view_name(&job.name);
    let view = SqlIdent::try_new(&view)?;
    let job_name = SqlIdent::try_new(&job.name)?;
    let account_key = SqlIdent::try_new(account_id_key)?;
    let fields = projection_fields(job, account_id_key)?;

    let mut sql = format!(
        "CREATE VIEW {view} AS\n\
         SELECT\n\
         \x20   rs.created as result_created,\n\
         \x20   lpad(r.account_id::text, {ACCOUNT_ID_WIDTH}, '0') as {account_key},\n",
    );
    let field_stmts: Vec<String> = fields
        .iter()
        .map(|f| format!("    result->>'{f}' as {f}"))
        .collect();
    sql.push_str(&field_stmts.join(",\n"));
    sql.push('\n');
    sql.push_str(&format!(
        "FROM\n\
         \x20   result r\n\
         INNER JOIN result_set rs ON r.result_set_id = rs.id\n\
         INNER JOIN job j ON rs.job_id = j.id\n\
         WHERE\n\
         \x20   j.name = '{job_name}' AND\n\
         \x20   j.active = true\n\
         ORDER BY {account_key};\n",
    ));
    Ok(sql)
}

/// All statements to (re)generate both views for a job version, in execution
/// order: drop+create+grant latest, then drop+create+grant all.
pub fn regenerate_statements(
    job: &Job,
    account_id_key: &str,
    ro_role: &str,
) -> QjResult<Vec<String>> {
    let latest = latest_view_name(&job.name);
    let all = all_view_name(&job.name);
    Ok(vec![
        drop_view_sql(&latest)?,
        latest_view_sql(job, account_id_key)?,
        grant_select_sql(&latest, ro_role)?,
        drop_view_sql(&all)?,
        all_view_sql(job, account_id_key)?,
        grant_select_sql(&all, ro_role)?,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use queryjobs_core::{Category, JobGraphSpec, Severity};

    fn sample_job() -> Job {
        Job {
            name: "test_job".to_string(),
            created: Utc::now(),
            description: "d".to_string(),
            graph_spec: JobGraphSpec {
                graph_names: vec!["g".to_string()],
            },
            category: Category::Gov,
            severity: Severity::Info,
            query: "select ?account_id ?foo ?boo where {}".to_string(),
            query_fields: vec![
                "account_id".to_string(),
                "foo".to_string(),
                "boo".to_string(),
            ],
            active: true,
            max_graph_age_sec: 3600,
            result_expiration_sec: 7200,
            max_result_age_sec: 1800,
            notify_if_results: false,
        }
    }

    #[test]
    fn latest_view_shape() {
        let sql = latest_view_sql(&sample_job(), "account_id").unwrap();
        assert!(sql.starts_with("CREATE VIEW test_job_latest AS"));
        assert!(sql.contains("RANK () OVER (PARTITION BY r.account_id ORDER BY rs.created DESC)"));
        assert!(sql.contains("lpad(r.account_id::text, 12, '0') as account_id"));
        assert!(sql.contains("result->>'foo' as foo"));
        assert!(sql.contains("result->>'boo' as boo"));
        assert!(!sql.contains("result->>'account_id'"));
        assert!(sql.contains("rs.created > CURRENT_TIMESTAMP - INTERVAL '1800 seconds'"));
        assert!(sql.contains("WHERE rank_number = 1"));
        assert!(sql.contains("j.active = true"));
        assert!(sql.contains("ORDER BY account_id;"));
    }

    #[test]
    fn all_view_shape() {
        let sql = all_view_sql(&sample_job(), "account_id").unwrap();
        assert!(sql.starts_with("CREATE VIEW test_job_all AS"));
        assert!(!sql.contains("RANK"));
        assert!(!sql.contains("INTERVAL"));
        assert!(sql.contains("j.name = 'test_job'"));
        assert!(sql.contains("j.active = true"));
        assert!(sql.contains("ORDER BY account_id;"));
    }

    #[test]
    fn regenerate_orders_latest_before_all() {
        let stmts = regenerate_statements(&sample_job(), "account_id", "qj_ro").unwrap();
        assert_eq!(stmts.len(), 6);
        assert_eq!(stmts[0], "DROP VIEW IF EXISTS test_job_latest;");
        assert!(stmts[1].starts_with("CREATE VIEW test_job_latest"));
        assert_eq!(stmts[2], "GRANT SELECT ON test_job_latest TO qj_ro;");
        assert_eq!(stmts[3], "DROP VIEW IF EXISTS test_job_all;");
        assert!(stmts[4].starts_with("CREATE VIEW test_job_all"));
        assert_eq!(stmts[5], "GRANT SELECT ON test_job_all TO qj_ro;");
    }

    #[test]
    fn hostile_identifiers_rejected() {
        let mut job = sample_job();
        job.query_fields.push("x; DROP TABLE job".to_string());
        assert!(latest_view_sql(&job, "account_id").is_err());
        assert!(drop_view_sql("x; DROP TABLE job").is_err());
        assert!(grant_select_sql("ok_view", "bad role").is_err());
    }
}
