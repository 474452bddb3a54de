//! Content model
//!
//! An immutable snapshot of one site: pages, series, static assets and the
//! media files pages reference. Produced by `storage::content`, consumed
//! read-only by the planner and the backend.

use std::collections::BTreeMap;

use serde::Serialize;

use super::config::DateRounding;
use super::id::{Digest, StableHasher};

/// Page template selected in front matter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Template {
    #[default]
    Page,
    /// Rendered and in the sitemap, but kept out of listings
    Info,
    /// Front-page intro text
    Frontpage,
}

impl Template {
    pub fn as_str(&self) -> &'static str {
        match self {
            Template::Page => "page",
            Template::Info => "info",
            Template::Frontpage => "frontpage",
        }
    }
}

/// Publication state from the `published` header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "at")]
pub enum Publication {
    /// `published: false`
    Draft,
    /// No `published` header yet; gets stamped by write-back
    Unstamped,
    /// Unix timestamp
    At(i64),
}

impl Publication {
    pub fn timestamp(&self) -> Option<i64> {
        match self {
            Publication::At(ts) => Some(*ts),
            _ => None,
        }
    }

    pub fn is_draft(&self) -> bool {
        matches!(self, Publication::Draft)
    }
}

/// One Markdown document
#[derive(Debug, Clone, Serialize)]
pub struct Page {
    /// Path relative to the site root (`articles/blog/hello.md`)
    pub source_path: String,
    /// Content identity (`blog/hello`)
    pub logical_key: String,
    pub title: Option<String>,
    pub publication: Publication,
    pub updated: Option<i64>,
    pub tags: Vec<String>,
    pub abstract_text: Option<String>,
    pub template: Template,
    /// Explicit series part number, if any
    pub part: Option<u32>,
    #[serde(skip)]
    pub body: String,
    /// blake3 of the raw file, header included
    pub content_hash: Digest,
    /// Media destinations referenced from the body (`images/a.jpg`)
    pub media: Vec<String>,
}

impl Page {
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("Untitled")
    }

    pub fn is_listed(&self) -> bool {
        self.template != Template::Info
    }

    /// Publish instant, else update instant, else the epoch; then rounded
    pub fn sort_date(&self, rounding: DateRounding) -> i64 {
        let raw = self
            .publication
            .timestamp()
            .or(self.updated)
            .unwrap_or(0);
        rounding.apply(raw)
    }

    /// Digest over the metadata aggregates consume
    ///
    /// Title, dates, tags, abstract and path. The body is deliberately not
    /// part of it: listings, feeds and sitemaps never show body text.
    pub fn summary_digest(&self, rounding: DateRounding) -> Digest {
        let mut tags = self.tags.clone();
        tags.sort();
        tags.dedup();

        let mut hasher = StableHasher::new("stbl.summary.v1");
        hasher
            .str(&self.logical_key)
            .str(self.display_title())
            .opt_i64(self.publication.timestamp())
            .opt_i64(self.updated)
            .i64(self.sort_date(rounding))
            .opt_str(self.abstract_text.as_deref())
            .str(self.template.as_str())
            .u64(tags.len() as u64);
        for tag in &tags {
            hasher.str(tag);
        }
        hasher.finish()
    }
}

/// A directory of Markdown documents with an `index.md`
#[derive(Debug, Clone, Serialize)]
pub struct Series {
    /// Directory key under `articles/` (`guides/rust`)
    pub key: String,
    pub index: Page,
    /// Parts in logical-key order; numbering happens at planning time
    pub parts: Vec<Page>,
}

/// A file copied verbatim from `assets/`
#[derive(Debug, Clone, Serialize)]
pub struct StaticFile {
    /// Path under `assets/` (`css/site.css`)
    pub rel: String,
    /// Path relative to the site root
    pub source_path: String,
    pub hash: Digest,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageSource {
    /// Path relative to the site root (`images/cat.jpg`)
    pub path: String,
    pub hash: Digest,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl ImageSource {
    pub fn is_svg(&self) -> bool {
        self.path.to_ascii_lowercase().ends_with(".svg")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VideoSource {
    /// Path relative to the site root (`video/intro.mp4`)
    pub path: String,
    pub hash: Digest,
    pub height: Option<u32>,
}

/// A problem found while loading a content item
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentIssue {
    pub item: String,
    pub reason: String,
}

/// The full site snapshot for one build
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContentModel {
    /// Standalone pages (not part of any series)
    pub pages: Vec<Page>,
    pub series: Vec<Series>,
    /// `articles/index.md`, when present
    pub frontpage: Option<Page>,
    pub assets: Vec<StaticFile>,
    /// Referenced images keyed by path
    pub images: BTreeMap<String, ImageSource>,
    /// Referenced videos keyed by path
    pub videos: BTreeMap<String, VideoSource>,
    /// Items the loader could not normalize
    pub issues: Vec<ContentIssue>,
}

impl ContentModel {
    /// Every document, series members included
    pub fn all_pages(&self) -> impl Iterator<Item = &Page> {
        self.frontpage
            .iter()
            .chain(self.pages.iter())
            .chain(
                self.series
                    .iter()
                    .flat_map(|s| std::iter::once(&s.index).chain(s.parts.iter())),
            )
    }

    pub fn find_page(&self, source_path: &str) -> Option<&Page> {
        self.all_pages().find(|p| p.source_path == source_path)
    }

    pub fn find_series(&self, key: &str) -> Option<&Series> {
        self.series.iter().find(|s| s.key == key)
    }

    pub fn find_asset(&self, source_path: &str) -> Option<&StaticFile> {
        self.assets.iter().find(|a| a.source_path == source_path)
    }
}

/// Normalizes a tag into its URL slug
///
/// Lowercase ASCII alphanumerics separated by single dashes; returns an
/// empty string when nothing usable remains.
pub fn tag_slug(tag: &str) -> String {
    let mut slug = String::new();
    let mut pending_dash = false;
    for ch in tag.trim().chars() {
        if ch.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(ch.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}
