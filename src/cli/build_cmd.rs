//! `stbl build`

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Args;
use serde::Serialize;

use super::output::Output;
use crate::backend::SiteBackend;
use crate::domain::{plan, BuildPlan, FailurePolicy};
use crate::engine::{default_jobs, execute, ExecutionContext, ExecutionReport};
use crate::storage::{
    apply_header_updates, default_cache_path, default_out_dir, load_content, load_site_config,
    open_or_degrade, pending_documents, prune_undeclared,
};

#[derive(Args)]
pub struct BuildArgs {
    /// Output directory (defaults to the per-site cache directory)
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Build without reading or writing the task cache
    #[arg(long)]
    pub no_cache: bool,

    /// Cache database location
    #[arg(long)]
    pub cache_path: Option<PathBuf>,

    /// Worker count
    #[arg(long, short = 'j')]
    pub jobs: Option<usize>,

    /// Re-run every non-media task even when its cache record is current
    #[arg(long)]
    pub regenerate_content: bool,

    /// Stop dispatching after the first task failure
    #[arg(long)]
    pub fail_fast: bool,

    /// Write assigned publish stamps and part numbers back into sources
    #[arg(long, conflicts_with = "no_writeback")]
    pub writeback: bool,

    /// Skip the write-back step entirely
    #[arg(long)]
    pub no_writeback: bool,

    /// ffmpeg binary used for video tasks
    #[arg(long, env = "STBL_FFMPEG", default_value = "ffmpeg")]
    pub ffmpeg: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
enum WritebackMode {
    DryRun,
    Applied,
    Withheld,
}

#[derive(Serialize)]
struct WritebackSummary {
    mode: WritebackMode,
    documents: usize,
}

#[derive(Serialize)]
struct BuildSummary<'a> {
    tasks: usize,
    edges: usize,
    outputs: usize,
    #[serde(flatten)]
    report: &'a ExecutionReport,
    cache: &'static str,
    out: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_path: Option<String>,
    writeback: Option<WritebackSummary>,
}

pub fn run(args: BuildArgs, root: &Path, output: &Output) -> Result<()> {
    if args.jobs == Some(0) {
        bail!("--jobs must be at least 1");
    }

    let config = load_site_config(root)?;
    let model = load_content(root)?;
    let plan = plan(&model, &config).context("Planning failed")?;
    tracing::info!(tasks = plan.len(), edges = plan.edges.len(), "plan ready");

    let out_dir = match args.out {
        Some(out) => out,
        None => default_out_dir(&config.site.id)
            .context("No cache directory on this system; pass --out")?,
    };
    guard_out_dir(root, &out_dir)?;

    let pruned = prune_undeclared(&out_dir, &plan.declared_outputs())?;
    if pruned.files > 0 {
        tracing::info!(files = pruned.files, dirs = pruned.dirs, "pruned stale outputs");
    }

    let cache_path = args
        .cache_path
        .or_else(|| default_cache_path(&config.site.id));
    let mut cache = open_or_degrade(cache_path.as_deref(), !args.no_cache);

    let jobs = args.jobs.or(config.build.jobs).unwrap_or_else(default_jobs);
    let policy = if args.fail_fast {
        FailurePolicy::FailFast
    } else {
        config.build.failure_policy
    };
    let mut ctx = ExecutionContext::new(&out_dir, jobs)
        .with_cache_enabled(cache.state.is_on())
        .with_force_regenerate(args.regenerate_content)
        .with_failure_policy(policy);

    let backend = SiteBackend::new(root, &model, &config, &plan).with_ffmpeg(args.ffmpeg);
    let report = execute(&plan, cache.store.as_mut(), &backend, &mut ctx)?;
    // Release the cache lock before touching sources
    drop(cache.store);

    let pending = pending_documents(&plan.header_updates).len();
    let writeback = if args.no_writeback {
        None
    } else if !report.is_success() {
        Some(WritebackSummary {
            mode: WritebackMode::Withheld,
            documents: pending,
        })
    } else if args.writeback {
        let modified = apply_header_updates(root, &plan.header_updates, Utc::now())?;
        Some(WritebackSummary {
            mode: WritebackMode::Applied,
            documents: modified,
        })
    } else {
        Some(WritebackSummary {
            mode: WritebackMode::DryRun,
            documents: pending,
        })
    };

    let summary = BuildSummary {
        tasks: plan.len(),
        edges: plan.edges.len(),
        outputs: plan.output_count(),
        report: &report,
        cache: if cache.state.is_on() { "on" } else { "off" },
        out: out_dir.display().to_string(),
        cache_path: cache.state.path().map(|p| p.display().to_string()),
        writeback,
    };

    if output.is_json() {
        output.data(&summary);
    } else {
        print_text(&summary, &plan, output);
    }

    if !report.is_success() {
        bail!(
            "build failed: {} failed, {} blocked, {} cancelled",
            report.failed.len(),
            report.blocked.len(),
            report.cancelled
        );
    }
    Ok(())
}

/// Refuses output directories that would let pruning reach the sources
fn guard_out_dir(root: &Path, out_dir: &Path) -> Result<()> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create output directory {}", out_dir.display()))?;
    let out = out_dir
        .canonicalize()
        .with_context(|| format!("Failed to resolve {}", out_dir.display()))?;
    let source = root
        .canonicalize()
        .with_context(|| format!("Failed to resolve {}", root.display()))?;
    if source.starts_with(&out) {
        bail!(
            "Output directory {} contains the site root; choose another --out",
            out_dir.display()
        );
    }
    Ok(())
}

fn print_text(summary: &BuildSummary<'_>, plan: &BuildPlan, output: &Output) {
    let report = summary.report;
    output.field("tasks", summary.tasks);
    output.field("edges", summary.edges);
    output.field("outputs", summary.outputs);
    output.field("executed", report.executed);
    output.field("skipped", report.skipped);
    output.field("failed", report.failed.len());
    if !report.blocked.is_empty() {
        output.field("blocked", report.blocked.len());
    }
    if report.cancelled > 0 {
        output.field("cancelled", report.cancelled);
    }
    output.field("cache", summary.cache);
    output.field("out", &summary.out);
    if let Some(path) = &summary.cache_path {
        output.field("cache_path", path);
    }

    for failure in &report.failed {
        output.line(format!(
            "  FAILED {} [{}] ({}): {}",
            failure.id, failure.kind, failure.origin, failure.error
        ));
    }
    for blocked in &report.blocked {
        let origin = plan
            .get(&blocked.id)
            .map(|t| t.origin.as_str())
            .unwrap_or_default();
        output.line(format!(
            "  BLOCKED {} ({}) by {}",
            blocked.id, origin, blocked.failed_dependency
        ));
    }

    if let Some(writeback) = &summary.writeback {
        match writeback.mode {
            WritebackMode::Withheld => output.line("write-back withheld: build failed"),
            WritebackMode::Applied => output.line(format!(
                "write-back: modified {} documents",
                writeback.documents
            )),
            WritebackMode::DryRun => output.line(format!(
                "write-back: would modify {} documents",
                writeback.documents
            )),
        }
    }
}
