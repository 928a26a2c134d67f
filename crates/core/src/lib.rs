//! `queryjobs-core` — query-job domain model.
//!
//! Pure entity types and invariants: jobs and their versioning rules, result
//! sets and retention, service limits, and the graph-query parsing seam. No
//! infrastructure concerns.

pub mod error;
pub mod job;
pub mod limits;
pub mod query;
pub mod result_set;

pub use error::{QjError, QjResult};
pub use job::{Category, Job, JobCreate, JobGraphSpec, JobUpdate, Severity};
pub use limits::Limits;
pub use query::{QueryParser, SparqlSelectParser};
pub use result_set::{
    JobVersionRef, ResultRow, ResultSet, ResultSetCreate, ResultSetGraphSpec,
};
