//! Cache CLI commands

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Subcommand;

use super::output::Output;
use crate::storage::{
    default_cache_path, load_site_config, remove_cache_files, CacheStore, SqliteCacheStore,
};

#[derive(Subcommand)]
pub enum CacheCommands {
    /// Show cache location, schema version and record count
    Status {
        /// Cache database location
        #[arg(long)]
        cache_path: Option<PathBuf>,
    },

    /// Remove every cache record
    Clear {
        /// Cache database location
        #[arg(long)]
        cache_path: Option<PathBuf>,
    },
}

pub fn run(cmd: CacheCommands, root: &Path, output: &Output) -> Result<()> {
    match cmd {
        CacheCommands::Status { cache_path } => status(&resolve(cache_path, root)?, output),
        CacheCommands::Clear { cache_path } => clear(&resolve(cache_path, root)?, output),
    }
}

/// An explicit path wins; otherwise the site's default location
fn resolve(explicit: Option<PathBuf>, root: &Path) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    let config = load_site_config(root)?;
    default_cache_path(&config.site.id)
        .context("No cache directory on this system; pass --cache-path")
}

fn status(path: &Path, output: &Output) -> Result<()> {
    // Opening would create the database; a status check must not
    let (schema_version, records) = if path.exists() {
        let store = SqliteCacheStore::open(path)
            .with_context(|| format!("Failed to open cache at {}", path.display()))?;
        (store.schema_version()?, store.record_count()?)
    } else {
        (None, 0)
    };

    if output.is_json() {
        output.data(&serde_json::json!({
            "path": path.display().to_string(),
            "exists": path.exists(),
            "schema_version": schema_version,
            "records": records,
        }));
    } else {
        output.field("path", path.display());
        output.field("exists", path.exists());
        match schema_version {
            Some(version) => output.field("schema_version", version),
            None => output.field("schema_version", "none"),
        }
        output.field("records", records);
    }

    Ok(())
}

fn clear(path: &Path, output: &Output) -> Result<()> {
    match SqliteCacheStore::open(path) {
        Ok(mut store) => {
            let records = store.record_count()?;
            store.clear()?;
            tracing::info!(path = %path.display(), records, "cache cleared");
            output.success(&format!("Cleared {} cache records", records));
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "cache unreadable, removing files");
            remove_cache_files(path)
                .with_context(|| format!("Failed to remove cache at {}", path.display()))?;
            output.success(&format!("Removed cache at {}", path.display()));
        }
    }
    Ok(())
}
