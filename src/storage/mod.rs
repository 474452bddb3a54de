//! # Storage Layer
//!
//! Everything that touches disk outside task execution.
//!
//! ## Files
//!
//! | Data | Format | Location |
//! |------|--------|----------|
//! | Site config | TOML | `<site>/stbl.toml` |
//! | Pages | Markdown + YAML front matter | `<site>/articles/**.md` |
//! | Static assets | copied verbatim | `<site>/assets/**` |
//! | Media | images and video | `<site>/images/**`, `<site>/video/**` |
//! | Task cache | SQLite | `<cache_dir>/stbl/<site-id>/cache.sqlite` |
//! | Build output | files | `<cache_dir>/stbl/<site-id>/out` or `--out` |
//!
//! ## Concurrency Safety
//!
//! - The cache holds an `fs2` lock file for its lifetime; a second build
//!   against the same cache runs uncached
//! - Header write-back and output writes are atomic (temp file + rename)
//!
//! ## Key Items
//!
//! - [`load_site_config`] - `stbl.toml` with defaults and validation
//! - [`load_content`] - the `ContentModel` snapshot
//! - [`SqliteCacheStore`] / [`open_or_degrade`] - the persistent task cache
//! - [`prune_undeclared`] - removes stale outputs
//! - [`apply_header_updates`] - front matter write-back

mod cache;
mod config;
pub(crate) mod content;
mod prune;
mod writeback;

pub use cache::{
    open_or_degrade, remove_cache_files, CacheError, CacheRecord, CacheState, CacheStore,
    NoopCache, OpenedCache, SqliteCacheStore,
};
pub use config::{
    default_cache_path, default_out_dir, load_site_config, site_cache_dir, ConfigError,
    CACHE_FILE, CONFIG_FILE,
};
pub use content::{load_content, parse_timestamp, ARTICLES_DIR, ASSETS_DIR};
pub use prune::{prune_undeclared, PruneReport};
pub use writeback::{apply_header_updates, pending_documents};
