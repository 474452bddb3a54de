//! `stbl plan`

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;

use super::output::Output;
use crate::domain::{plan, to_dot, BuildPlan};
use crate::engine::write_atomic;
use crate::storage::{load_content, load_site_config, pending_documents};

#[derive(Args)]
pub struct PlanArgs {
    /// Write the task graph as Graphviz DOT (`-` for stdout)
    #[arg(long, num_args = 0..=1, default_missing_value = "stbl.dot", value_name = "PATH")]
    pub dot: Option<PathBuf>,
}

pub fn run(args: PlanArgs, root: &Path, output: &Output) -> Result<()> {
    let config = load_site_config(root)?;
    let model = load_content(root)?;
    let plan = plan(&model, &config).context("Planning failed")?;

    let dot_path = match args.dot {
        Some(path) if path.as_os_str() == "-" => {
            print!("{}", to_dot(&plan));
            return Ok(());
        }
        Some(path) => {
            write_atomic(&path, to_dot(&plan).as_bytes())
                .with_context(|| format!("Failed to write {}", path.display()))?;
            tracing::info!(path = %path.display(), "wrote DOT graph");
            Some(path)
        }
        None => None,
    };

    if output.is_json() {
        output.data(&serde_json::json!({
            "tasks": plan.len(),
            "edges": plan.edges.len(),
            "outputs": plan.output_count(),
            "batches": plan.batches.len(),
            "kinds": plan.kind_counts().into_iter().collect::<std::collections::BTreeMap<_, _>>(),
            "header_updates": plan.header_updates,
            "dot": dot_path.map(|p| p.display().to_string()),
        }));
        return Ok(());
    }

    print_summary(&plan, output);
    if let Some(path) = dot_path {
        output.field("dot", path.display());
    }
    Ok(())
}

fn print_summary(plan: &BuildPlan, output: &Output) {
    output.field("tasks", plan.len());
    output.field("edges", plan.edges.len());
    output.field("outputs", plan.output_count());
    output.field("batches", plan.batches.len());

    for (kind, count) in plan.kind_counts() {
        output.line(format!("  {:<22} {}", kind, count));
    }

    let documents = pending_documents(&plan.header_updates);
    if !documents.is_empty() {
        output.field("header updates", documents.len());
        for document in documents {
            output.line(format!("  {}", document));
        }
    }
}
