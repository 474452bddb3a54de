//! stbl - A static site build planner with an incremental, cached executor
//!
//! A site's content is planned into a DAG of tasks with declared inputs and
//! outputs. Each task is fingerprinted from its inputs and the logical
//! results of its dependencies; the executor runs only tasks whose
//! fingerprint or outputs changed since the last build.

pub mod backend;
pub mod cli;
pub mod domain;
pub mod engine;
pub mod storage;

pub use domain::{BuildPlan, Task, TaskId, TaskKind};
pub use engine::{execute, ExecutionContext, ExecutionReport};
