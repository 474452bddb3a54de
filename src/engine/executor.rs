//! Plan executor
//!
//! The scheduler loop runs on the calling thread. It tracks how many
//! unfinished dependencies each task still has, fingerprints tasks as they
//! become ready, consults the cache, and hands cache misses to a rayon pool.
//! Workers send their results back over a channel; all cache reads and
//! writes therefore happen on the scheduler thread, one task at a time.

use std::collections::{BTreeSet, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::mpsc::channel;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;

use super::context::ExecutionContext;
use super::sink::OutputSink;
use crate::backend::{Backend, BackendError, BackendResult};
use crate::domain::{
    fingerprint, logical_result, BuildPlan, DependencyGraph, Digest, FailurePolicy,
    FingerprintError, GraphError, Task, TaskId, TaskKind,
};
use crate::storage::CacheStore;

#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("Failed to start worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Fingerprint(#[from] FingerprintError),

    #[error("Task {task} wrote undeclared outputs: {paths:?}")]
    ProtocolViolation { task: TaskId, paths: Vec<PathBuf> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskFailure {
    pub id: TaskId,
    pub kind: String,
    pub origin: String,
    pub error: String,
}

/// A task never dispatched because a dependency failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockedTask {
    pub id: TaskId,
    pub failed_dependency: TaskId,
}

/// Outcome of one `execute` call
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionReport {
    pub executed: usize,
    pub skipped: usize,
    pub failed: Vec<TaskFailure>,
    pub blocked: Vec<BlockedTask>,
    /// Ready or pending tasks left undispatched after a fail-fast stop
    pub cancelled: usize,
    /// Tasks whose backend ran, sorted
    #[serde(skip)]
    pub executed_ids: Vec<TaskId>,
}

impl ExecutionReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.blocked.is_empty() && self.cancelled == 0
    }
}

/// What a worker sends back
struct Finished {
    id: TaskId,
    fingerprint: Digest,
    outcome: Result<Vec<PathBuf>, String>,
    violations: Vec<PathBuf>,
}

/// Runs every task in `plan`, skipping the ones the cache proves current
///
/// Task failures land in the report; only broken invariants (a cyclic plan,
/// an undeclared output write) are errors.
pub fn execute<B: Backend + ?Sized>(
    plan: &BuildPlan,
    cache: &mut dyn CacheStore,
    backend: &B,
    ctx: &mut ExecutionContext,
) -> Result<ExecutionReport, ExecuteError> {
    let graph = DependencyGraph::from_tasks(&plan.tasks)?;
    let tasks: HashMap<&TaskId, &Task> = plan.tasks.iter().map(|t| (&t.id, t)).collect();

    let mut state = SchedulerState::new(plan);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(ctx.jobs())
        .thread_name(|i| format!("stbl-worker-{}", i))
        .build()?;
    let out_dir = ctx.out_dir().to_path_buf();
    let out_dir = out_dir.as_path();
    let jobs = ctx.jobs();
    let force = ctx.force_regenerate();
    let policy = ctx.failure_policy();
    let use_cache = ctx.cache_enabled();

    tracing::debug!(tasks = plan.len(), jobs, force, use_cache, "executing plan");

    let (tx, rx) = channel::<Finished>();
    let mut fatal: Option<ExecuteError> = None;
    let mut halted = false;

    pool.in_place_scope(|scope| {
        let mut in_flight = 0usize;
        loop {
            while !halted && in_flight < jobs {
                let Some(id) = state.ready.pop_first() else {
                    break;
                };
                let Some(&task) = tasks.get(&id) else {
                    continue;
                };

                let fp = match fingerprint(task, &state.results) {
                    Ok(fp) => fp,
                    Err(e) => {
                        fatal = Some(e.into());
                        halted = true;
                        break;
                    }
                };

                let honors_cache = use_cache && !(force && !task.kind.is_media());
                if honors_cache && is_cached(cache, task, &fp, out_dir) {
                    tracing::debug!(task = %task.id, "up to date");
                    ctx.record_skipped();
                    state.skipped += 1;
                    state.complete(&graph, task, fp);
                    continue;
                }

                in_flight += 1;
                let tx = tx.clone();
                scope.spawn(move |_| {
                    let finished = run_task(backend, task, out_dir, fp);
                    // The receiver outlives every worker
                    let _ = tx.send(finished);
                });
            }

            if in_flight == 0 {
                break;
            }
            let Ok(finished) = rx.recv() else {
                break;
            };
            in_flight -= 1;

            let Some(&task) = tasks.get(&finished.id) else {
                continue;
            };

            // An undeclared write taints the task even when the backend
            // ignored the sink's error and reported success
            if !finished.violations.is_empty() {
                tracing::error!(task = %task.id, paths = ?finished.violations, "undeclared write");
                if fatal.is_none() {
                    fatal = Some(ExecuteError::ProtocolViolation {
                        task: task.id.clone(),
                        paths: finished.violations.clone(),
                    });
                }
                halted = true;
                state.fail(&graph, task, "wrote undeclared outputs".to_string());
                continue;
            }

            match finished.outcome {
                Ok(outputs) => {
                    ctx.record_executed();
                    state.executed_ids.push(task.id.clone());
                    if use_cache {
                        if let Err(e) = cache.commit(&task.id, &finished.fingerprint, &outputs) {
                            tracing::warn!(task = %task.id, error = %e, "failed to record task");
                        }
                    }
                    state.complete(&graph, task, finished.fingerprint);
                }
                Err(error) => {
                    tracing::warn!(
                        task = %task.id,
                        origin = %task.origin,
                        error = %error,
                        "task failed"
                    );
                    state.fail(&graph, task, error);
                    if policy == FailurePolicy::FailFast {
                        halted = true;
                    }
                }
            }
        }
    });

    if let Some(error) = fatal {
        return Err(error);
    }

    let report = state.into_report(plan, halted);
    tracing::debug!(
        executed = report.executed,
        skipped = report.skipped,
        failed = report.failed.len(),
        blocked = report.blocked.len(),
        cancelled = report.cancelled,
        "execution finished"
    );
    Ok(report)
}

fn is_cached(cache: &dyn CacheStore, task: &Task, fp: &Digest, out_dir: &Path) -> bool {
    match cache.lookup(&task.id) {
        Ok(Some(record)) => record.is_skippable(fp, out_dir),
        Ok(None) => false,
        Err(e) => {
            tracing::warn!(task = %task.id, error = %e, "cache lookup failed");
            false
        }
    }
}

struct SchedulerState {
    /// Unfinished dependency count per task
    remaining: HashMap<TaskId, usize>,
    /// Sorted so dispatch order is stable
    ready: BTreeSet<TaskId>,
    /// Logical results of completed tasks
    results: HashMap<TaskId, Digest>,
    executed_ids: Vec<TaskId>,
    skipped: usize,
    failed: Vec<TaskFailure>,
    /// Blocked task -> the failed task that blocked it
    blocked: HashMap<TaskId, TaskId>,
}

impl SchedulerState {
    fn new(plan: &BuildPlan) -> Self {
        let mut remaining = HashMap::with_capacity(plan.len());
        let mut ready = BTreeSet::new();
        for task in &plan.tasks {
            if task.dependencies.is_empty() {
                ready.insert(task.id.clone());
            }
            remaining.insert(task.id.clone(), task.dependencies.len());
        }
        Self {
            remaining,
            ready,
            results: HashMap::with_capacity(plan.len()),
            executed_ids: Vec::new(),
            skipped: 0,
            failed: Vec::new(),
            blocked: HashMap::new(),
        }
    }

    /// Records a successful (or cached) task and releases its dependents
    fn complete(&mut self, graph: &DependencyGraph, task: &Task, fp: Digest) {
        self.results.insert(task.id.clone(), logical_result(task, fp));

        for dependent in graph.dependents(&task.id) {
            if let Some(count) = self.remaining.get_mut(&dependent) {
                *count = count.saturating_sub(1);
                if *count == 0 && !self.blocked.contains_key(&dependent) {
                    self.ready.insert(dependent);
                }
            }
        }
    }

    fn fail(&mut self, graph: &DependencyGraph, task: &Task, error: String) {
        for dependent in graph.transitive_dependents(&task.id) {
            self.blocked
                .entry(dependent)
                .or_insert_with(|| task.id.clone());
        }
        self.failed.push(TaskFailure {
            id: task.id.clone(),
            kind: task.kind.label().to_string(),
            origin: task.origin.clone(),
            error,
        });
    }

    fn into_report(self, plan: &BuildPlan, halted: bool) -> ExecutionReport {
        let mut failed = self.failed;
        failed.sort_by(|a, b| a.id.cmp(&b.id));

        let mut blocked: Vec<BlockedTask> = self
            .blocked
            .into_iter()
            .map(|(id, failed_dependency)| BlockedTask {
                id,
                failed_dependency,
            })
            .collect();
        blocked.sort_by(|a, b| a.id.cmp(&b.id));

        let settled = self.executed_ids.len() + self.skipped + failed.len() + blocked.len();
        let cancelled = if halted {
            plan.len().saturating_sub(settled)
        } else {
            0
        };

        let mut executed_ids = self.executed_ids;
        executed_ids.sort();

        ExecutionReport {
            executed: executed_ids.len(),
            skipped: self.skipped,
            failed,
            blocked,
            cancelled,
            executed_ids,
        }
    }
}

fn run_task<B: Backend + ?Sized>(
    backend: &B,
    task: &Task,
    out_dir: &Path,
    fingerprint: Digest,
) -> Finished {
    let started = Instant::now();
    let mut sink = OutputSink::new(out_dir, &task.id, &task.outputs);

    let dispatched = AssertUnwindSafe(|| dispatch(backend, &task.kind, &mut sink));
    let result = panic::catch_unwind(dispatched)
        .unwrap_or_else(|payload| Err(BackendError::Panicked(panic_message(payload.as_ref()))));
    let violations = sink.violations().to_vec();
    // A violating task never reaches finish, so it has no outputs to record
    let outcome = if violations.is_empty() {
        result
            .and_then(|()| sink.finish().map_err(BackendError::from))
            .map_err(|e| e.to_string())
    } else {
        Err(format!("wrote undeclared outputs: {:?}", violations))
    };

    tracing::debug!(
        task = %task.id,
        kind = task.kind.label(),
        ok = outcome.is_ok(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "task finished"
    );

    Finished {
        id: task.id.clone(),
        fingerprint,
        outcome,
        violations,
    }
}

/// The one place task kinds meet backend methods
fn dispatch<B: Backend + ?Sized>(
    backend: &B,
    kind: &TaskKind,
    sink: &mut OutputSink,
) -> BackendResult {
    match kind {
        TaskKind::RenderPage { source } => backend.render_page(source, sink),
        TaskKind::RenderSeriesIndex { series } => backend.render_series_index(series, sink),
        TaskKind::RenderTagPage { tag } => backend.render_tag_page(tag.as_deref(), sink),
        TaskKind::RenderFrontpage { page } => backend.render_frontpage(*page, sink),
        TaskKind::GenerateFeed => backend.generate_feed(sink),
        TaskKind::GenerateSitemap => backend.generate_sitemap(sink),
        TaskKind::WriteGeneratedAsset { name } => backend.write_generated_asset(name, sink),
        TaskKind::CopyStaticFile { source } => backend.copy_static_file(source, sink),
        TaskKind::ScaleImageVariant {
            source,
            width,
            quality,
        } => backend.scale_image(source, *width, *quality, sink),
        TaskKind::TranscodeVideoVariant { source, height } => {
            backend.transcode_video(source, *height, sink)
        }
        TaskKind::ExtractVideoPoster { source, at_sec } => {
            backend.extract_poster(source, *at_sec, sink)
        }
        TaskKind::CopySelectedIcon { source } => backend.copy_icon(source, sink),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
