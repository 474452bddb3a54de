//! Persistent task cache
//!
//! One SQLite database per site (default `~/.cache/stbl/<site-id>/cache.sqlite`)
//! mapping task IDs to the fingerprint and outputs of their last successful
//! run. The cache is disposable: a schema mismatch drops and recreates every
//! table, and deleting the file between builds only costs a full rebuild.
//!
//! An advisory lock file next to the database keeps two concurrent builds
//! from sharing one cache; the second build runs uncached.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use crate::domain::{Digest, TaskId};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache at {0} is in use by another build")]
    Locked(PathBuf),

    #[error("Corrupt cache record for {task}: {reason}")]
    Corrupt { task: String, reason: String },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The stored result of a task's last successful run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRecord {
    pub task_id: TaskId,
    pub fingerprint: Digest,
    /// Output paths relative to the output root, sorted
    pub outputs: Vec<PathBuf>,
    pub updated_at: DateTime<Utc>,
}

impl CacheRecord {
    /// Fingerprint matches and every recorded output still exists
    pub fn is_skippable(&self, fingerprint: &Digest, out_dir: &Path) -> bool {
        self.fingerprint == *fingerprint && self.outputs.iter().all(|p| out_dir.join(p).is_file())
    }
}

/// Task result store consulted by the executor
pub trait CacheStore {
    fn lookup(&self, task_id: &TaskId) -> Result<Option<CacheRecord>, CacheError>;

    /// Replaces the record for `task_id`
    fn commit(
        &mut self,
        task_id: &TaskId,
        fingerprint: &Digest,
        outputs: &[PathBuf],
    ) -> Result<(), CacheError>;

    fn clear(&mut self) -> Result<(), CacheError>;

    fn is_enabled(&self) -> bool;
}

/// Cache that remembers nothing
#[derive(Debug, Default)]
pub struct NoopCache;

impl CacheStore for NoopCache {
    fn lookup(&self, _task_id: &TaskId) -> Result<Option<CacheRecord>, CacheError> {
        Ok(None)
    }

    fn commit(&mut self, _: &TaskId, _: &Digest, _: &[PathBuf]) -> Result<(), CacheError> {
        Ok(())
    }

    fn clear(&mut self) -> Result<(), CacheError> {
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// SQLite-backed cache store
pub struct SqliteCacheStore {
    db_path: PathBuf,
    conn: Connection,
    /// Held for the store's lifetime; dropping it releases the lock
    _lock: File,
}

impl SqliteCacheStore {
    /// Schema version - bump when the schema changes to force a rebuild
    pub const SCHEMA_VERSION: i64 = 1;

    /// Opens or creates the cache at `db_path`
    pub fn open(db_path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let lock_path = lock_path(db_path);
        let lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;
        lock.try_lock_exclusive()
            .map_err(|_| CacheError::Locked(db_path.to_path_buf()))?;

        let conn = Connection::open(db_path)?;

        // WAL keeps readers cheap; foreign keys drive output cleanup
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;",
        )?;

        let mut store = Self {
            db_path: db_path.to_path_buf(),
            conn,
            _lock: lock,
        };
        store.ensure_schema()?;

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn ensure_schema(&mut self) -> Result<(), CacheError> {
        let current = self.schema_version()?;
        if current != Some(Self::SCHEMA_VERSION) {
            tracing::info!(
                found = ?current,
                expected = Self::SCHEMA_VERSION,
                "recreating cache schema"
            );
            self.create_schema()?;
        }
        Ok(())
    }

    /// Stored schema version, `None` for a fresh or foreign database
    pub fn schema_version(&self) -> Result<Option<i64>, CacheError> {
        let has_meta: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'meta')",
            [],
            |row| row.get(0),
        )?;
        if !has_meta {
            return Ok(None);
        }

        let value: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()?;

        Ok(value.and_then(|v| v.parse().ok()))
    }

    fn create_schema(&mut self) -> Result<(), CacheError> {
        let tx = self.conn.transaction()?;
        tx.execute_batch(
            "
            DROP TABLE IF EXISTS outputs;
            DROP TABLE IF EXISTS tasks;
            DROP TABLE IF EXISTS meta;

            CREATE TABLE meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE tasks (
                task_id TEXT PRIMARY KEY,
                fingerprint BLOB NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE outputs (
                task_id TEXT NOT NULL REFERENCES tasks(task_id) ON DELETE CASCADE,
                path TEXT NOT NULL,
                PRIMARY KEY (task_id, path)
            );
            ",
        )?;
        tx.execute(
            "INSERT INTO meta (key, value) VALUES ('schema_version', ?1)",
            params![Self::SCHEMA_VERSION.to_string()],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Number of stored task records
    pub fn record_count(&self) -> Result<usize, CacheError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))?;
        Ok(count.max(0) as usize)
    }
}

impl CacheStore for SqliteCacheStore {
    fn lookup(&self, task_id: &TaskId) -> Result<Option<CacheRecord>, CacheError> {
        let key = task_id.to_string();
        let row: Option<(Vec<u8>, String)> = self
            .conn
            .query_row(
                "SELECT fingerprint, updated_at FROM tasks WHERE task_id = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((blob, updated_at)) = row else {
            return Ok(None);
        };

        let fingerprint = Digest::from_slice(&blob).map_err(|e| CacheError::Corrupt {
            task: key.clone(),
            reason: e.to_string(),
        })?;
        let updated_at = DateTime::parse_from_rfc3339(&updated_at)
            .map_err(|e| CacheError::Corrupt {
                task: key.clone(),
                reason: e.to_string(),
            })?
            .with_timezone(&Utc);

        let mut stmt = self
            .conn
            .prepare("SELECT path FROM outputs WHERE task_id = ?1 ORDER BY path")?;
        let outputs = stmt
            .query_map(params![key], |row| row.get::<_, String>(0))?
            .map(|r| r.map(PathBuf::from))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(CacheRecord {
            task_id: task_id.clone(),
            fingerprint,
            outputs,
            updated_at,
        }))
    }

    fn commit(
        &mut self,
        task_id: &TaskId,
        fingerprint: &Digest,
        outputs: &[PathBuf],
    ) -> Result<(), CacheError> {
        let key = task_id.to_string();
        let tx = self.conn.transaction()?;

        tx.execute("DELETE FROM outputs WHERE task_id = ?1", params![key])?;
        tx.execute(
            "INSERT INTO tasks (task_id, fingerprint, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(task_id) DO UPDATE SET
                fingerprint = excluded.fingerprint,
                updated_at = excluded.updated_at",
            params![key, fingerprint.as_bytes().as_slice(), Utc::now().to_rfc3339()],
        )?;
        {
            let mut stmt =
                tx.prepare("INSERT OR IGNORE INTO outputs (task_id, path) VALUES (?1, ?2)")?;
            for output in outputs {
                stmt.execute(params![key, output.to_string_lossy().into_owned()])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn clear(&mut self) -> Result<(), CacheError> {
        self.conn
            .execute_batch("DELETE FROM outputs; DELETE FROM tasks;")?;
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        true
    }
}

fn lock_path(db_path: &Path) -> PathBuf {
    let mut name = db_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    db_path.with_file_name(name)
}

/// Whether this run has a working cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheState {
    On(PathBuf),
    /// `--no-cache`
    Disabled,
    /// Opening failed; the run continues uncached
    Unavailable { path: PathBuf, reason: String },
}

impl CacheState {
    pub fn is_on(&self) -> bool {
        matches!(self, CacheState::On(_))
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            CacheState::On(path) => Some(path),
            _ => None,
        }
    }
}

/// A cache store plus how it came to be
pub struct OpenedCache {
    pub store: Box<dyn CacheStore>,
    pub state: CacheState,
}

/// Opens the cache, falling back to `NoopCache` on any failure
///
/// Never fails: an unusable cache only costs a full rebuild.
pub fn open_or_degrade(path: Option<&Path>, enabled: bool) -> OpenedCache {
    let path = match (enabled, path) {
        (false, _) => {
            return OpenedCache {
                store: Box::new(NoopCache),
                state: CacheState::Disabled,
            }
        }
        (true, None) => {
            tracing::warn!("cache unavailable: no cache directory on this system");
            return OpenedCache {
                store: Box::new(NoopCache),
                state: CacheState::Unavailable {
                    path: PathBuf::new(),
                    reason: "no cache directory".to_string(),
                },
            };
        }
        (true, Some(path)) => path,
    };

    match SqliteCacheStore::open(path) {
        Ok(store) => {
            tracing::debug!(path = %path.display(), "cache opened");
            OpenedCache {
                store: Box::new(store),
                state: CacheState::On(path.to_path_buf()),
            }
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "cache unavailable, building without cache"
            );
            OpenedCache {
                store: Box::new(NoopCache),
                state: CacheState::Unavailable {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                },
            }
        }
    }
}

/// Deletes the database and its sidecar files
///
/// Used by `cache clear` when the database cannot even be opened.
pub fn remove_cache_files(db_path: &Path) -> Result<(), CacheError> {
    for suffix in ["", "-wal", "-shm"] {
        let mut name = db_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(suffix);
        let path = db_path.with_file_name(name);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn task(n: u32) -> TaskId {
        TaskId::new("render_page", &[format!("p{}", n).as_str()])
    }

    fn setup() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("site").join(CACHE_NAME);
        (dir, path)
    }

    const CACHE_NAME: &str = "cache.sqlite";

    #[test]
    fn cache_creation() {
        let (_dir, path) = setup();
        let store = SqliteCacheStore::open(&path).unwrap();

        assert!(store.path().exists());
        assert_eq!(
            store.schema_version().unwrap(),
            Some(SqliteCacheStore::SCHEMA_VERSION)
        );
        assert_eq!(store.record_count().unwrap(), 0);
    }

    #[test]
    fn commit_then_lookup() {
        let (_dir, path) = setup();
        let mut store = SqliteCacheStore::open(&path).unwrap();
        let fp = Digest::of(b"fp");
        let outputs = vec![PathBuf::from("b.html"), PathBuf::from("a.html")];

        store.commit(&task(1), &fp, &outputs).unwrap();
        let record = store.lookup(&task(1)).unwrap().unwrap();

        assert_eq!(record.fingerprint, fp);
        assert_eq!(
            record.outputs,
            vec![PathBuf::from("a.html"), PathBuf::from("b.html")]
        );
        assert!(store.lookup(&task(2)).unwrap().is_none());
    }

    #[test]
    fn commit_replaces_outputs() {
        let (_dir, path) = setup();
        let mut store = SqliteCacheStore::open(&path).unwrap();

        store
            .commit(&task(1), &Digest::of(b"1"), &[PathBuf::from("old.html")])
            .unwrap();
        store
            .commit(&task(1), &Digest::of(b"2"), &[PathBuf::from("new.html")])
            .unwrap();

        let record = store.lookup(&task(1)).unwrap().unwrap();
        assert_eq!(record.fingerprint, Digest::of(b"2"));
        assert_eq!(record.outputs, vec![PathBuf::from("new.html")]);
        assert_eq!(store.record_count().unwrap(), 1);
    }

    #[test]
    fn records_survive_reopen() {
        let (_dir, path) = setup();
        {
            let mut store = SqliteCacheStore::open(&path).unwrap();
            store
                .commit(&task(1), &Digest::of(b"fp"), &[PathBuf::from("a.html")])
                .unwrap();
        }
        let store = SqliteCacheStore::open(&path).unwrap();
        assert!(store.lookup(&task(1)).unwrap().is_some());
    }

    #[test]
    fn clear_removes_records() {
        let (_dir, path) = setup();
        let mut store = SqliteCacheStore::open(&path).unwrap();
        store
            .commit(&task(1), &Digest::of(b"fp"), &[PathBuf::from("a.html")])
            .unwrap();

        store.clear().unwrap();
        assert_eq!(store.record_count().unwrap(), 0);
        assert!(store.lookup(&task(1)).unwrap().is_none());
    }

    #[test]
    fn schema_mismatch_recreates_tables() {
        let (_dir, path) = setup();
        {
            let mut store = SqliteCacheStore::open(&path).unwrap();
            store
                .commit(&task(1), &Digest::of(b"fp"), &[PathBuf::from("a.html")])
                .unwrap();
            store
                .conn
                .execute("UPDATE meta SET value = '0' WHERE key = 'schema_version'", [])
                .unwrap();
        }

        let store = SqliteCacheStore::open(&path).unwrap();
        assert_eq!(store.record_count().unwrap(), 0);
        assert_eq!(
            store.schema_version().unwrap(),
            Some(SqliteCacheStore::SCHEMA_VERSION)
        );
    }

    #[test]
    fn second_open_is_locked_out() {
        let (_dir, path) = setup();
        let _first = SqliteCacheStore::open(&path).unwrap();

        let second = SqliteCacheStore::open(&path);
        assert!(matches!(second, Err(CacheError::Locked(_))));
    }

    #[test]
    fn skippable_requires_outputs_on_disk() {
        let out = TempDir::new().unwrap();
        let fp = Digest::of(b"fp");
        let record = CacheRecord {
            task_id: task(1),
            fingerprint: fp,
            outputs: vec![PathBuf::from("a.html")],
            updated_at: Utc::now(),
        };

        assert!(!record.is_skippable(&fp, out.path()));

        fs::write(out.path().join("a.html"), "x").unwrap();
        assert!(record.is_skippable(&fp, out.path()));
        assert!(!record.is_skippable(&Digest::of(b"other"), out.path()));
    }

    #[test]
    fn degrades_when_directory_cannot_be_created() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "file").unwrap();

        let opened = open_or_degrade(Some(&blocker.join("cache.sqlite")), true);
        assert!(!opened.store.is_enabled());
        assert!(matches!(opened.state, CacheState::Unavailable { .. }));
    }

    #[test]
    fn degrades_on_corrupt_database() {
        let (_dir, path) = setup();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, vec![0x5au8; 4096]).unwrap();

        let opened = open_or_degrade(Some(&path), true);
        assert!(!opened.state.is_on());

        remove_cache_files(&path).unwrap();
        assert!(open_or_degrade(Some(&path), true).state.is_on());
    }

    #[test]
    fn disabled_cache_is_noop() {
        let opened = open_or_degrade(None, false);
        assert_eq!(opened.state, CacheState::Disabled);
        assert!(opened.store.lookup(&task(1)).unwrap().is_none());
    }
}
