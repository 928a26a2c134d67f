//! Job entity: a named, versioned graph-query specification.
//!
//! Identity is `(name, created)`; `name` is shared across versions and
//! `created` is the version timestamp. At most one version per name is
//! active at any time (enforced at activation and by a partial unique index).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{QjError, QjResult};
use crate::limits::Limits;
use crate::query::QueryParser;

/// Job category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Gov,
    Sec,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Gov => "gov",
            Category::Sec => "sec",
        }
    }

    pub fn parse(s: &str) -> QjResult<Self> {
        match s {
            "gov" => Ok(Category::Gov),
            "sec" => Ok(Category::Sec),
            other => Err(QjError::JobInvalid(format!("unknown category {other}"))),
        }
    }
}

/// Job severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Error => "error",
        }
    }

    pub fn parse(s: &str) -> QjResult<Self> {
        match s {
            "debug" => Ok(Severity::Debug),
            "info" => Ok(Severity::Info),
            "warn" => Ok(Severity::Warn),
            "error" => Ok(Severity::Error),
            other => Err(QjError::JobInvalid(format!("unknown severity {other}"))),
        }
    }
}

/// Graph names a job's query targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobGraphSpec {
    pub graph_names: Vec<String>,
}

/// One version of a job. `query` and `name` are immutable after creation;
/// changing the query changes the result schema and requires a new version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub name: String,
    pub created: DateTime<Utc>,
    pub description: String,
    pub graph_spec: JobGraphSpec,
    pub category: Category,
    pub severity: Severity,
    pub query: String,
    /// Variable names bound by `query`, extracted and persisted at creation.
    pub query_fields: Vec<String>,
    pub active: bool,
    pub max_graph_age_sec: i64,
    pub result_expiration_sec: i64,
    pub max_result_age_sec: i64,
    pub notify_if_results: bool,
}

/// Input for registry `create`. Unset retention knobs fall back to service
/// defaults; set values are checked against service ceilings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCreate {
    pub name: String,
    pub description: String,
    pub graph_spec: JobGraphSpec,
    pub category: Category,
    pub severity: Severity,
    pub query: String,
    pub notify_if_results: bool,
    #[serde(default)]
    pub max_graph_age_sec: Option<i64>,
    #[serde(default)]
    pub result_expiration_sec: Option<i64>,
    #[serde(default)]
    pub max_result_age_sec: Option<i64>,
}

/// Partial update for a job version. Absent fields are untouched. `query`
/// and `name` are deliberately not here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobUpdate {
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub max_graph_age_sec: Option<i64>,
    #[serde(default)]
    pub result_expiration_sec: Option<i64>,
    #[serde(default)]
    pub max_result_age_sec: Option<i64>,
    #[serde(default)]
    pub notify_if_results: Option<bool>,
}

/// True if `value` begins with a letter and continues with letters, digits
/// or underscores. Job names and query fields must satisfy this grammar; it
/// is what makes embedding them as SQL identifiers in view DDL safe.
pub fn is_valid_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl JobCreate {
    /// Validate this spec and build the job version to persist.
    ///
    /// Parses the query, extracts bound fields, requires the configured
    /// account-id field, and resolves each retention knob independently.
    /// The result carries `active = false` and `created = now`.
    pub fn build(self, parser: &dyn QueryParser, limits: &Limits) -> QjResult<Job> {
        if !is_valid_identifier(&self.name) {
            return Err(QjError::JobInvalid(format!(
                "Job name {} is not valid. Jobs must begin with a letter and may contain \
                 letters, numbers and underscores",
                self.name
            )));
        }
        let query_fields = parser.parse_fields(&self.query)?;
        if !query_fields.iter().any(|f| f == &limits.account_id_key) {
            return Err(QjError::JobQueryMissingAccountId(format!(
                "Query {} missing '{}' field",
                self.query, limits.account_id_key
            )));
        }
        let result_expiration_sec = Limits::resolve_knob(
            "result_expiration_sec",
            self.result_expiration_sec,
            limits.result_expiration_sec_default,
            limits.result_expiration_sec_limit,
        )?;
        let max_graph_age_sec = Limits::resolve_knob(
            "max_graph_age_sec",
            self.max_graph_age_sec,
            limits.max_graph_age_sec_default,
            limits.max_graph_age_sec_limit,
        )?;
        let max_result_age_sec = Limits::resolve_knob(
            "max_result_age_sec",
            self.max_result_age_sec,
            limits.max_result_age_sec_default,
            limits.max_result_age_sec_limit,
        )?;
        Ok(Job {
            name: self.name,
            created: Utc::now(),
            description: self.description,
            graph_spec: self.graph_spec,
            category: self.category,
            severity: self.severity,
            query: self.query,
            query_fields,
            active: false,
            max_graph_age_sec,
            result_expiration_sec,
            max_result_age_sec,
            notify_if_results: self.notify_if_results,
        })
    }
}

impl Job {
    /// Apply the non-`active` fields of a patch. Activation is handled by
    /// the registry because it touches sibling versions and views.
    pub fn apply_update(&mut self, patch: &JobUpdate) {
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        if let Some(category) = patch.category {
            self.category = category;
        }
        if let Some(severity) = patch.severity {
            self.severity = severity;
        }
        if let Some(v) = patch.max_graph_age_sec {
            self.max_graph_age_sec = v;
        }
        if let Some(v) = patch.result_expiration_sec {
            self.result_expiration_sec = v;
        }
        if let Some(v) = patch.max_result_age_sec {
            self.max_result_age_sec = v;
        }
        if let Some(v) = patch.notify_if_results {
            self.notify_if_results = v;
        }
    }
}
