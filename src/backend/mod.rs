//! # Task Backends
//!
//! A backend does the actual work for each task kind. The executor picks the
//! method with a single match on `TaskKind` and hands it an `OutputSink`
//! restricted to the task's declared outputs.
//!
//! | Method | Task kind |
//! |--------|-----------|
//! | `render_page` | `RenderPage` |
//! | `render_series_index` | `RenderSeriesIndex` |
//! | `render_tag_page` | `RenderTagPage` |
//! | `render_frontpage` | `RenderFrontpage` |
//! | `generate_feed` | `GenerateFeed` |
//! | `generate_sitemap` | `GenerateSitemap` |
//! | `write_generated_asset` | `WriteGeneratedAsset` |
//! | `copy_static_file` | `CopyStaticFile` |
//! | `scale_image` | `ScaleImageVariant` |
//! | `transcode_video` | `TranscodeVideoVariant` |
//! | `extract_poster` | `ExtractVideoPoster` |
//! | `copy_icon` | `CopySelectedIcon` |
//!
//! Backends are called from worker threads concurrently, hence `Sync`. A
//! video backend may block on an external process; the worker pool is the
//! only source of parallelism.

mod site;

use std::path::PathBuf;

use thiserror::Error;

use crate::engine::{OutputSink, SinkError};

pub use site::SiteBackend;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Unknown content item: {0}")]
    UnknownItem(String),

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Image processing failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("{program} failed: {message}")]
    Process { program: String, message: String },

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("Backend panicked: {0}")]
    Panicked(String),
}

pub type BackendResult = Result<(), BackendError>;

/// One method per task kind
pub trait Backend: Sync {
    fn render_page(&self, source: &str, sink: &mut OutputSink) -> BackendResult;

    fn render_series_index(&self, series: &str, sink: &mut OutputSink) -> BackendResult;

    /// `None` renders the tags index
    fn render_tag_page(&self, tag: Option<&str>, sink: &mut OutputSink) -> BackendResult;

    fn render_frontpage(&self, page: u32, sink: &mut OutputSink) -> BackendResult;

    fn generate_feed(&self, sink: &mut OutputSink) -> BackendResult;

    fn generate_sitemap(&self, sink: &mut OutputSink) -> BackendResult;

    fn write_generated_asset(&self, name: &str, sink: &mut OutputSink) -> BackendResult;

    fn copy_static_file(&self, source: &str, sink: &mut OutputSink) -> BackendResult;

    fn scale_image(
        &self,
        source: &str,
        width: u32,
        quality: u8,
        sink: &mut OutputSink,
    ) -> BackendResult;

    fn transcode_video(&self, source: &str, height: u32, sink: &mut OutputSink) -> BackendResult;

    fn extract_poster(&self, source: &str, at_sec: u32, sink: &mut OutputSink) -> BackendResult;

    fn copy_icon(&self, source: &str, sink: &mut OutputSink) -> BackendResult;
}
