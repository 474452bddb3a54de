//! `stbl verify`

use std::path::Path;

use anyhow::{bail, Result};
use clap::Args;

use super::output::Output;
use crate::domain::{SiteConfig, VerifyReport};
use crate::storage::{load_content, load_site_config, CONFIG_FILE};

#[derive(Args)]
pub struct VerifyArgs {
    /// Fail on warnings too
    #[arg(long)]
    pub strict: bool,
}

pub fn run(args: VerifyArgs, root: &Path, output: &Output) -> Result<()> {
    let mut report = VerifyReport::default();

    let config = match load_site_config(root) {
        Ok(config) => Some(config),
        Err(e) => {
            report.error(CONFIG_FILE, format!("{:#}", e));
            None
        }
    };
    match load_content(root) {
        // Planning needs a config; content issues are still worth listing
        Ok(model) => report.check(&model, config.as_ref().unwrap_or(&SiteConfig::default())),
        Err(e) => report.error("articles", format!("{:#}", e)),
    }
    if config.is_none() {
        report.tasks = None;
    }
    tracing::debug!(
        errors = report.errors(),
        warnings = report.warnings(),
        "verification finished"
    );

    if output.is_json() {
        output.data(&report);
    } else {
        for finding in &report.findings {
            output.line(format!(
                "{}: {}: {}",
                finding.severity.as_str(),
                finding.item,
                finding.message
            ));
        }
        if let Some(tasks) = report.tasks {
            output.field("tasks", tasks);
        }
        output.field("drafts", report.drafts);
        output.field("pending headers", report.pending_headers);
        output.field("errors", report.errors());
        output.field("warnings", report.warnings());
    }

    if !report.passes(args.strict) {
        bail!(
            "verification failed: {} errors, {} warnings",
            report.errors(),
            report.warnings()
        );
    }
    Ok(())
}
