//! Output staging for task backends
//!
//! Backends never touch the output directory directly. They stage bytes,
//! source files or scratch files here, keyed by output path; nothing lands
//! on disk until the backend has returned successfully and every declared
//! path has been staged. Each file is then written through a temp file and
//! renamed into place.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

use crate::domain::TaskId;

/// Hidden directory under the output root for scratch files
pub const STAGING_DIR: &str = ".stbl-staging";

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Output {0} is not declared by this task")]
    Undeclared(PathBuf),

    #[error("Declared outputs were not produced: {0:?}")]
    Missing(Vec<PathBuf>),

    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> SinkError + '_ {
    move |source| SinkError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug)]
enum Staged {
    Bytes(Vec<u8>),
    /// Copy of an existing file (typically a source under the site root)
    Copy(PathBuf),
    /// Scratch file owned by the sink; moved into place
    Scratch(PathBuf),
}

/// Staged outputs for one task execution
#[derive(Debug)]
pub struct OutputSink {
    out_dir: PathBuf,
    staging_dir: PathBuf,
    declared: Vec<PathBuf>,
    staged: BTreeMap<PathBuf, Staged>,
    violations: Vec<PathBuf>,
}

impl OutputSink {
    pub fn new(out_dir: &Path, task_id: &TaskId, declared: &[PathBuf]) -> Self {
        Self {
            out_dir: out_dir.to_path_buf(),
            staging_dir: out_dir.join(STAGING_DIR).join(task_id.to_string()),
            declared: declared.to_vec(),
            staged: BTreeMap::new(),
            violations: Vec::new(),
        }
    }

    /// The exact paths this task may write, relative to the output root
    pub fn declared(&self) -> &[PathBuf] {
        &self.declared
    }

    /// The first declared output, for single-output kinds
    pub fn primary(&self) -> Result<&Path, SinkError> {
        self.declared
            .first()
            .map(PathBuf::as_path)
            .ok_or_else(|| SinkError::Missing(Vec::new()))
    }

    /// Paths written outside the declared set
    pub fn violations(&self) -> &[PathBuf] {
        &self.violations
    }

    fn check(&mut self, path: &Path) -> Result<PathBuf, SinkError> {
        let path = path.to_path_buf();
        if self.declared.contains(&path) && is_plain_relative(&path) {
            Ok(path)
        } else {
            tracing::error!(path = %path.display(), "task wrote an undeclared output");
            self.violations.push(path.clone());
            Err(SinkError::Undeclared(path))
        }
    }

    pub fn write(
        &mut self,
        path: impl AsRef<Path>,
        bytes: impl Into<Vec<u8>>,
    ) -> Result<(), SinkError> {
        let path = self.check(path.as_ref())?;
        self.staged.insert(path, Staged::Bytes(bytes.into()));
        Ok(())
    }

    pub fn copy_from(&mut self, path: impl AsRef<Path>, source: &Path) -> Result<(), SinkError> {
        let path = self.check(path.as_ref())?;
        self.staged.insert(path, Staged::Copy(source.to_path_buf()));
        Ok(())
    }

    /// A scratch file an external tool can write the output to
    ///
    /// The returned path keeps the output's extension so tools that infer
    /// the format from the file name behave.
    pub fn scratch_path(&mut self, path: impl AsRef<Path>) -> Result<PathBuf, SinkError> {
        let path = self.check(path.as_ref())?;
        fs::create_dir_all(&self.staging_dir).map_err(io_error(&self.staging_dir))?;

        let mut name = format!("out-{}", self.staged.len());
        if let Some(ext) = path.extension() {
            name.push('.');
            name.push_str(&ext.to_string_lossy());
        }
        let scratch = self.staging_dir.join(name);
        self.staged.insert(path, Staged::Scratch(scratch.clone()));
        Ok(scratch)
    }

    /// Writes every staged output into the output root
    ///
    /// Fails without writing anything when a declared output was never
    /// staged or a scratch file is missing.
    pub fn finish(mut self) -> Result<Vec<PathBuf>, SinkError> {
        let missing: Vec<PathBuf> = self
            .declared
            .iter()
            .filter(|p| match self.staged.get(*p) {
                None => true,
                Some(Staged::Scratch(file)) => !file.is_file(),
                Some(_) => false,
            })
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(SinkError::Missing(missing));
        }

        let staged = std::mem::take(&mut self.staged);
        let mut written = Vec::with_capacity(staged.len());
        for (rel, item) in staged {
            let target = self.out_dir.join(&rel);
            match item {
                Staged::Bytes(bytes) => write_atomic(&target, &bytes)?,
                Staged::Copy(source) => copy_atomic(&source, &target)?,
                Staged::Scratch(file) => move_into_place(&file, &target)?,
            }
            written.push(rel);
        }
        Ok(written)
    }
}

impl Drop for OutputSink {
    fn drop(&mut self) {
        if self.staging_dir.exists() {
            let _ = fs::remove_dir_all(&self.staging_dir);
        }
    }
}

fn is_plain_relative(path: &Path) -> bool {
    !path.as_os_str().is_empty() && path.components().all(|c| matches!(c, Component::Normal(_)))
}

fn temp_sibling(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{}.stbl-tmp", name))
}

fn ensure_parent(target: &Path) -> Result<(), SinkError> {
    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    Ok(())
}

/// Writes `bytes` to `target` through a temp file + rename
pub fn write_atomic(target: &Path, bytes: &[u8]) -> Result<(), SinkError> {
    ensure_parent(target)?;
    let temp = temp_sibling(target);
    fs::write(&temp, bytes).map_err(io_error(&temp))?;
    fs::rename(&temp, target).map_err(io_error(target))
}

fn copy_atomic(source: &Path, target: &Path) -> Result<(), SinkError> {
    ensure_parent(target)?;
    let temp = temp_sibling(target);
    fs::copy(source, &temp).map_err(io_error(source))?;
    fs::rename(&temp, target).map_err(io_error(target))
}

fn move_into_place(scratch: &Path, target: &Path) -> Result<(), SinkError> {
    ensure_parent(target)?;
    if fs::rename(scratch, target).is_ok() {
        return Ok(());
    }
    copy_atomic(scratch, target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sink(out: &Path, declared: &[&str]) -> OutputSink {
        let declared: Vec<PathBuf> = declared.iter().map(PathBuf::from).collect();
        OutputSink::new(out, &TaskId::new("generate_feed", &[]), &declared)
    }

    #[test]
    fn writes_declared_outputs() {
        let out = TempDir::new().unwrap();
        let mut sink = sink(out.path(), &["a/b.html", "c.txt"]);

        sink.write("a/b.html", "hello").unwrap();
        sink.write("c.txt", b"bytes".to_vec()).unwrap();
        let written = sink.finish().unwrap();

        assert_eq!(written.len(), 2);
        assert_eq!(fs::read_to_string(out.path().join("a/b.html")).unwrap(), "hello");
        assert!(!out.path().join("a/.b.html.stbl-tmp").exists());
    }

    #[test]
    fn undeclared_write_is_a_violation() {
        let out = TempDir::new().unwrap();
        let mut sink = sink(out.path(), &["a.html"]);

        let err = sink.write("other.html", "x").unwrap_err();
        assert!(matches!(err, SinkError::Undeclared(_)));
        assert_eq!(sink.violations(), &[PathBuf::from("other.html")]);
    }

    #[test]
    fn escaping_paths_are_violations() {
        let out = TempDir::new().unwrap();
        let mut sink = sink(out.path(), &["../evil.html"]);
        assert!(sink.write("../evil.html", "x").is_err());
        assert_eq!(sink.violations().len(), 1);
    }

    #[test]
    fn missing_output_fails_without_writing() {
        let out = TempDir::new().unwrap();
        let mut sink = sink(out.path(), &["a.html", "b.html"]);
        sink.write("a.html", "x").unwrap();

        let err = sink.finish().unwrap_err();
        assert!(matches!(err, SinkError::Missing(ref p) if p == &vec![PathBuf::from("b.html")]));
        assert!(!out.path().join("a.html").exists());
    }

    #[test]
    fn copies_and_scratch_files() {
        let out = TempDir::new().unwrap();
        let src = TempDir::new().unwrap();
        let source = src.path().join("in.css");
        fs::write(&source, "body{}").unwrap();

        let mut sink = sink(out.path(), &["css/in.css", "video/x.mp4"]);
        sink.copy_from("css/in.css", &source).unwrap();
        let scratch = sink.scratch_path("video/x.mp4").unwrap();
        assert_eq!(scratch.extension().unwrap(), "mp4");
        fs::write(&scratch, "frames").unwrap();

        sink.finish().unwrap();
        assert_eq!(fs::read_to_string(out.path().join("css/in.css")).unwrap(), "body{}");
        assert_eq!(fs::read_to_string(out.path().join("video/x.mp4")).unwrap(), "frames");
        let staging = out.path().join(STAGING_DIR);
        assert!(!staging.join(TaskId::new("generate_feed", &[]).to_string()).exists());
    }

    #[test]
    fn unwritten_scratch_counts_as_missing() {
        let out = TempDir::new().unwrap();
        let mut sink = sink(out.path(), &["video/x.mp4"]);
        sink.scratch_path("video/x.mp4").unwrap();

        assert!(matches!(sink.finish(), Err(SinkError::Missing(_))));
    }
}
