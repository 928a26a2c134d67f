//! In-memory job registry for tests and local development.
//!
//! Mirrors the Postgres registry's semantics, including view lifecycle: the
//! DDL that would be executed on activation is recorded per job name and can
//! be inspected with [`InMemoryJobRegistry::view_statements`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use queryjobs_core::{
    Job, JobCreate, JobUpdate, Limits, QjError, QjResult, QueryParser, SparqlSelectParser,
};

use super::{JobRegistry, validate_patch};
use crate::views;

#[derive(Default)]
struct State {
    jobs: Vec<Job>,
    view_sql: HashMap<String, Vec<String>>,
}

pub struct InMemoryJobRegistry {
    parser: Arc<dyn QueryParser>,
    limits: Limits,
    state: RwLock<State>,
}

impl InMemoryJobRegistry {
    pub fn new(limits: Limits) -> Self {
        Self::with_parser(Arc::new(SparqlSelectParser), limits)
    }

    pub fn with_parser(parser: Arc<dyn QueryParser>, limits: Limits) -> Self {
        Self {
            parser,
            limits,
            state: RwLock::new(State::default()),
        }
    }

    pub fn arc(limits: Limits) -> Arc<Self> {
        Arc::new(Self::new(limits))
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// The view DDL generated by the most recent activation of `name`, in
    /// execution order. `None` if no version was ever activated or the job
    /// was deleted.
    pub fn view_statements(&self, name: &str) -> Option<Vec<String>> {
        self.state.read().unwrap().view_sql.get(name).cloned()
    }
}

#[async_trait]
impl JobRegistry for InMemoryJobRegistry {
    async fn create(&self, input: JobCreate) -> QjResult<Job> {
        let job = input.build(self.parser.as_ref(), &self.limits)?;
        let mut state = self.state.write().unwrap();
        if state
            .jobs
            .iter()
            .any(|j| j.name == job.name && j.created == job.created)
        {
            return Err(QjError::storage(format!(
                "duplicate job version {} / {}",
                job.name, job.created
            )));
        }
        info!(job_name = %job.name, "created job version");
        state.jobs.push(job.clone());
        Ok(job)
    }

    async fn get_active(&self, name: &str) -> QjResult<Job> {
        let state = self.state.read().unwrap();
        let matches: Vec<&Job> = state
            .jobs
            .iter()
            .filter(|j| j.active && j.name == name)
            .collect();
        info!(job_name = name, num_results = matches.len(), "get active job");
        match matches.as_slice() {
            [] => Err(QjError::ActiveJobVersionNotFound(format!(
                "No active job version found for {name}"
            ))),
            [job] => Ok((*job).clone()),
            _ => Err(QjError::defect(format!(
                "More than one active job found for {name}"
            ))),
        }
    }

    async fn get_multi(&self, active_only: bool) -> QjResult<Vec<Job>> {
        let state = self.state.read().unwrap();
        let mut jobs: Vec<Job> = state
            .jobs
            .iter()
            .filter(|j| !active_only || j.active)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.name.cmp(&b.name).then(a.created.cmp(&b.created)));
        info!(active_only, num_results = jobs.len(), "get jobs");
        Ok(jobs)
    }

    async fn get_versions(&self, name: &str) -> QjResult<Vec<Job>> {
        let state = self.state.read().unwrap();
        let mut jobs: Vec<Job> = state.jobs.iter().filter(|j| j.name == name).cloned().collect();
        jobs.sort_by_key(|j| j.created);
        info!(job_name = name, num_results = jobs.len(), "get job versions");
        if jobs.is_empty() {
            return Err(QjError::JobNotFound(format!("Job '{name}' not found")));
        }
        Ok(jobs)
    }

    async fn get_version(&self, name: &str, created: DateTime<Utc>) -> QjResult<Job> {
        let state = self.state.read().unwrap();
        let matches: Vec<&Job> = state
            .jobs
            .iter()
            .filter(|j| j.name == name && j.created == created)
            .collect();
        match matches.as_slice() {
            [] => Err(QjError::JobVersionNotFound(format!(
                "Could not find job {name} / {created}"
            ))),
            [job] => Ok((*job).clone()),
            _ => Err(QjError::defect(format!(
                "More than one job found for {name} with version {created}"
            ))),
        }
    }

    async fn update_version(
        &self,
        name: &str,
        created: DateTime<Utc>,
        patch: JobUpdate,
    ) -> QjResult<Job> {
        validate_patch(&patch)?;
        let mut state = self.state.write().unwrap();
        let idx = state
            .jobs
            .iter()
            .position(|j| j.name == name && j.created == created)
            .ok_or_else(|| {
                QjError::JobVersionNotFound(format!("Could not find job {name} / {created}"))
            })?;

        state.jobs[idx].apply_update(&patch);
        if let Some(active) = patch.active {
            if active {
                for job in state.jobs.iter_mut() {
                    if job.name == name && job.created != created {
                        job.active = false;
                    }
                }
            }
            state.jobs[idx].active = active;
            if active {
                let statements = views::regenerate_statements(
                    &state.jobs[idx],
                    &self.limits.account_id_key,
                    &self.limits.db_ro_role,
                )?;
                info!(job_name = name, "regenerated views");
                state.view_sql.insert(name.to_string(), statements);
            }
        }
        info!(job_name = name, "updated job version");
        Ok(state.jobs[idx].clone())
    }

    async fn delete(&self, name: &str) -> QjResult<()> {
        let mut state = self.state.write().unwrap();
        state.jobs.retain(|j| j.name != name);
        state.view_sql.remove(name);
        info!(job_name = name, "deleted job");
        Ok(())
    }
}
