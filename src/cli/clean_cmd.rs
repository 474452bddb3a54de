//! `stbl clean`

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;
use serde::Serialize;

use super::output::Output;
use crate::storage::{load_site_config, remove_cache_files, site_cache_dir};

#[derive(Args)]
pub struct CleanArgs {
    /// Output directory used with `build --out`
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Cache database used with `build --cache-path`
    #[arg(long)]
    pub cache_path: Option<PathBuf>,
}

#[derive(Serialize)]
struct CleanSummary {
    removed: Vec<String>,
    missing: Vec<String>,
}

/// Removes cached outputs and the cache database for this site
///
/// Without flags this is the per-site cache directory, which holds both
/// the default output directory and the database.
pub fn run(args: CleanArgs, root: &Path, output: &Output) -> Result<()> {
    let mut summary = CleanSummary {
        removed: Vec::new(),
        missing: Vec::new(),
    };

    if args.out.is_none() && args.cache_path.is_none() {
        let config = load_site_config(root)?;
        let dir = site_cache_dir(&config.site.id)
            .context("No cache directory on this system; pass --out or --cache-path")?;
        remove_dir(root, &dir, &mut summary)?;
    }
    if let Some(out) = &args.out {
        remove_dir(root, out, &mut summary)?;
    }
    if let Some(db) = &args.cache_path {
        let shown = db.display().to_string();
        if db.exists() {
            remove_cache_files(db)
                .with_context(|| format!("Failed to remove cache at {}", db.display()))?;
            tracing::info!(path = %shown, "removed cache database");
            summary.removed.push(shown);
        } else {
            summary.missing.push(shown);
        }
    }

    if output.is_json() {
        output.data(&summary);
    } else {
        for path in &summary.removed {
            output.line(format!("removed {}", path));
        }
        for path in &summary.missing {
            output.line(format!("not found: {}", path));
        }
    }
    Ok(())
}

fn remove_dir(root: &Path, dir: &Path, summary: &mut CleanSummary) -> Result<()> {
    let shown = dir.display().to_string();
    if !dir.exists() {
        summary.missing.push(shown);
        return Ok(());
    }

    let canonical = dir
        .canonicalize()
        .with_context(|| format!("Failed to resolve {}", dir.display()))?;
    let site = root
        .canonicalize()
        .with_context(|| format!("Failed to resolve site root {}", root.display()))?;
    if site.starts_with(&canonical) {
        bail!("Refusing to remove {}: it contains the site root", dir.display());
    }

    fs::remove_dir_all(&canonical)
        .with_context(|| format!("Failed to remove {}", dir.display()))?;
    tracing::info!(path = %shown, "removed directory");
    summary.removed.push(shown);
    Ok(())
}
