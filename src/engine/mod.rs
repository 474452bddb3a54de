//! # Execution Engine
//!
//! Runs a `BuildPlan` against a cache and a backend.
//!
//! ## Flow per task
//!
//! 1. Wait until every dependency has completed
//! 2. Fingerprint from inputs plus the dependencies' logical results
//! 3. Skip when the cache holds the same fingerprint and all outputs exist
//! 4. Otherwise run the backend on a worker, stage outputs in an
//!    [`OutputSink`], write them atomically and record the result
//!
//! A failed task blocks everything downstream of it; unrelated subtrees
//! keep running unless the failure policy is fail-fast.

mod context;
mod executor;
mod sink;

pub use context::{default_jobs, ExecutionContext};
pub use executor::{execute, BlockedTask, ExecuteError, ExecutionReport, TaskFailure};
pub use sink::{write_atomic, OutputSink, SinkError, STAGING_DIR};
