//! Configuration loading for stbl
//!
//! Configuration lives in `stbl.toml` at the site root. A missing file means
//! all defaults; a malformed one is an error.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::BaseDirs;
use thiserror::Error;

use crate::domain::SiteConfig;

pub const CONFIG_FILE: &str = "stbl.toml";
pub const CACHE_FILE: &str = "cache.sqlite";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

/// Loads `stbl.toml` from a site root
///
/// Fills `site.id` from the root directory name when unset and makes sure
/// `site.base_url` ends with a slash.
pub fn load_site_config(root: &Path) -> Result<SiteConfig> {
    let config_path = root.join(CONFIG_FILE);

    let mut config: SiteConfig = if config_path.exists() {
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config: {}", config_path.display()))?;
        toml::from_str(&content)
            .map_err(|e| ConfigError::Parse(e.to_string()))
            .with_context(|| format!("Failed to parse {}", config_path.display()))?
    } else {
        SiteConfig::default()
    };

    if config.site.id.trim().is_empty() {
        config.site.id = default_site_id(root);
    }
    config.site.id = sanitize_id(&config.site.id);

    if !config.site.base_url.ends_with('/') {
        config.site.base_url.push('/');
    }

    validate(&config)?;
    Ok(config)
}

fn validate(config: &SiteConfig) -> Result<(), ConfigError> {
    let quality = config.media.images.quality;
    if quality == 0 || quality > 100 {
        return Err(ConfigError::Invalid(format!(
            "media.images.quality must be between 1 and 100, got {}",
            quality
        )));
    }
    if config.build.jobs == Some(0) {
        return Err(ConfigError::Invalid(
            "build.jobs must be at least 1".to_string(),
        ));
    }
    Ok(())
}

fn default_site_id(root: &Path) -> String {
    let canonical = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    canonical
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "site".to_string())
}

/// Keeps ids safe to use as a directory name
fn sanitize_id(id: &str) -> String {
    let cleaned: String = id
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "site".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Per-site cache directory (`<cache_dir>/stbl/<site-id>`)
pub fn site_cache_dir(site_id: &str) -> Option<PathBuf> {
    BaseDirs::new().map(|dirs| dirs.cache_dir().join("stbl").join(site_id))
}

/// Default cache database location
pub fn default_cache_path(site_id: &str) -> Option<PathBuf> {
    site_cache_dir(site_id).map(|dir| dir.join(CACHE_FILE))
}

/// Default output directory
pub fn default_out_dir(site_id: &str) -> Option<PathBuf> {
    site_cache_dir(site_id).map(|dir| dir.join("out"))
}
