//! Agent job records and their storage.
//!
//! - `AgentJob`: one agent invocation with status, credits, output and progress steps
//! - `JobStore`: persistence (in-memory here, Postgres in `crate::postgres`)
//!
//! Terminal jobs (`succeeded`, `failed`, `cancelled`) are immutable; stores
//! enforce this through [`JobStore::update_active`].

pub mod store;
pub mod types;

pub use store::{InMemoryJobStore, JobStore};
pub use types::{AgentJob, JobError, JobErrorCode, JobStatus, JobStep};
