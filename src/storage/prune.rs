//! Output directory pruning
//!
//! Before a build executes, every file under the output root that no task
//! declares is removed, so outputs of deleted pages or renamed assets never
//! linger. Directories left empty are removed as well.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use walkdir::WalkDir;

/// What a prune pass removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub files: usize,
    pub dirs: usize,
}

/// Removes undeclared files below `out_dir`
///
/// A missing output directory is not an error.
pub fn prune_undeclared(out_dir: &Path, declared: &BTreeSet<PathBuf>) -> Result<PruneReport> {
    let mut report = PruneReport::default();
    if !out_dir.is_dir() {
        return Ok(report);
    }

    for entry in WalkDir::new(out_dir).min_depth(1).contents_first(true) {
        let entry = entry.with_context(|| format!("Failed to scan {}", out_dir.display()))?;
        let path = entry.path();
        let Ok(rel) = path.strip_prefix(out_dir) else {
            continue;
        };

        if entry.file_type().is_dir() {
            // Fails harmlessly on anything still holding declared outputs
            if fs::remove_dir(path).is_ok() {
                report.dirs += 1;
            }
            continue;
        }

        if !declared.contains(rel) {
            fs::remove_file(path)
                .with_context(|| format!("Failed to remove stale output {}", path.display()))?;
            tracing::debug!(path = %rel.display(), "pruned stale output");
            report.files += 1;
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "x").unwrap();
    }

    #[test]
    fn removes_only_undeclared_files() {
        let out = TempDir::new().unwrap();
        touch(out.path(), "index.html");
        touch(out.path(), "old.html");
        touch(out.path(), "tags/gone.html");
        touch(out.path(), "artifacts/css/vars.css");

        let declared: BTreeSet<PathBuf> = ["index.html", "artifacts/css/vars.css"]
            .iter()
            .map(PathBuf::from)
            .collect();
        let report = prune_undeclared(out.path(), &declared).unwrap();

        assert_eq!(report, PruneReport { files: 2, dirs: 1 });
        assert!(out.path().join("index.html").exists());
        assert!(out.path().join("artifacts/css/vars.css").exists());
        assert!(!out.path().join("old.html").exists());
        assert!(!out.path().join("tags").exists());
    }

    #[test]
    fn missing_out_dir_is_fine() {
        let dir = TempDir::new().unwrap();
        let report = prune_undeclared(&dir.path().join("nope"), &BTreeSet::new()).unwrap();
        assert_eq!(report, PruneReport::default());
    }

    #[test]
    fn keeps_the_root() {
        let out = TempDir::new().unwrap();
        touch(out.path(), "a.html");
        prune_undeclared(out.path(), &BTreeSet::new()).unwrap();
        assert!(out.path().is_dir());
    }
}
