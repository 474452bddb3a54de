//! Site configuration model
//!
//! Plain serde types for `stbl.toml`. Loading and path resolution live in
//! `storage::config`; the planner only reads these values.

use serde::{Deserialize, Serialize};

use super::id::Digest;

/// Output path style for HTML documents
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum UrlStyle {
    /// `key.html`
    #[default]
    Html,
    /// `key/index.html`
    Pretty,
    /// `key/index.html` plus a `key.html` redirect stub
    PrettyWithFallback,
}

/// Granularity applied to sort dates before ordering listings
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DateRounding {
    #[default]
    None,
    Minute,
    Hour,
    Day,
}

impl DateRounding {
    /// Truncates a unix timestamp to this granularity
    pub fn apply(self, timestamp: i64) -> i64 {
        let step = match self {
            DateRounding::None => return timestamp,
            DateRounding::Minute => 60,
            DateRounding::Hour => 3_600,
            DateRounding::Day => 86_400,
        };
        timestamp.div_euclid(step) * step
    }
}

/// What to do with independent work after a task fails
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Keep running every subtree that does not depend on the failure
    #[default]
    Drain,
    /// Stop dispatching new tasks after the first failure
    FailFast,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteSection {
    /// Stable site identifier, used for the default cache location
    pub id: String,
    pub title: String,
    pub base_url: String,
    pub language: String,
    pub url_style: UrlStyle,
    /// Icon candidates under `assets/`, first match wins
    pub icon: Vec<String>,
}

impl Default for SiteSection {
    fn default() -> Self {
        Self {
            id: String::new(),
            title: "Untitled site".to_string(),
            base_url: "http://localhost:8080/".to_string(),
            language: "en".to_string(),
            url_style: UrlStyle::Html,
            icon: vec![
                "favicon.svg".to_string(),
                "favicon.png".to_string(),
                "favicon.ico".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BlogSection {
    /// Front page listing size; 0 puts every item on one page
    pub page_size: usize,
    pub sort_rounding: DateRounding,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RssSection {
    pub enabled: bool,
    pub max_items: usize,
}

impl Default for RssSection {
    fn default() -> Self {
        Self {
            enabled: true,
            max_items: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThemeSection {
    pub max_body_width: String,
    pub desktop_min: String,
    pub wide_min: String,
}

impl Default for ThemeSection {
    fn default() -> Self {
        Self {
            max_body_width: "72rem".to_string(),
            desktop_min: "768px".to_string(),
            wide_min: "1400px".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AssetsSection {
    /// Embed a short content hash in copied asset file names
    pub cache_busting: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagesSection {
    pub widths: Vec<u32>,
    pub quality: u8,
}

impl Default for ImagesSection {
    fn default() -> Self {
        Self {
            widths: vec![640, 1280],
            quality: 85,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoSection {
    pub heights: Vec<u32>,
    pub poster_time_sec: u32,
}

impl Default for VideoSection {
    fn default() -> Self {
        Self {
            heights: vec![360, 720],
            poster_time_sec: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MediaSection {
    pub images: ImagesSection,
    pub video: VideoSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BuildSection {
    /// Worker count; falls back to host parallelism
    pub jobs: Option<usize>,
    pub failure_policy: FailurePolicy,
}

/// The resolved `stbl.toml`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SiteConfig {
    pub site: SiteSection,
    pub blog: BlogSection,
    pub rss: RssSection,
    pub theme: ThemeSection,
    pub assets: AssetsSection,
    pub media: MediaSection,
    pub build: BuildSection,
}

/// Hashes a serializable config fragment
///
/// serde_json output is stable for these plain structs (field order is
/// declaration order), so equal fragments always hash equal.
pub fn hash_fragment<T: Serialize>(fragment: &T) -> Digest {
    match serde_json::to_vec(fragment) {
        Ok(bytes) => Digest::of(&bytes),
        Err(_) => Digest::of(b"stbl.unserializable-fragment"),
    }
}

impl SiteConfig {
    /// Named, independently hashed fragments consumed by task fingerprints
    pub fn fragment_hashes(&self) -> ConfigHashes {
        ConfigHashes {
            site: hash_fragment(&self.site),
            blog: hash_fragment(&self.blog),
            rss: hash_fragment(&self.rss),
            theme: hash_fragment(&self.theme),
            assets: hash_fragment(&self.assets),
            images: hash_fragment(&self.media.images),
            video: hash_fragment(&self.media.video),
        }
    }
}

/// Per-section config digests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigHashes {
    pub site: Digest,
    pub blog: Digest,
    pub rss: Digest,
    pub theme: Digest,
    pub assets: Digest,
    pub images: Digest,
    pub video: Digest,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding_truncates() {
        let ts = 1_700_000_123;
        assert_eq!(DateRounding::None.apply(ts), ts);
        assert_eq!(DateRounding::Minute.apply(ts) % 60, 0);
        assert_eq!(DateRounding::Day.apply(ts) % 86_400, 0);
        assert!(DateRounding::Hour.apply(ts) <= ts);
    }

    #[test]
    fn rounding_handles_pre_epoch_dates() {
        assert_eq!(DateRounding::Day.apply(-1), -86_400);
    }

    #[test]
    fn fragment_hash_tracks_values() {
        let a = SiteConfig::default();
        let mut b = SiteConfig::default();
        assert_eq!(a.fragment_hashes(), b.fragment_hashes());

        b.theme.max_body_width = "60rem".to_string();
        let (ha, hb) = (a.fragment_hashes(), b.fragment_hashes());
        assert_ne!(ha.theme, hb.theme);
        assert_eq!(ha.site, hb.site);
    }

    #[test]
    fn defaults_enable_rss() {
        let config = SiteConfig::default();
        assert!(config.rss.enabled);
        assert_eq!(config.build.failure_policy, FailurePolicy::Drain);
    }
}
