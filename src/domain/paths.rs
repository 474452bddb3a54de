//! Logical key to output path mapping
//!
//! | Style | Primary output | Extra output |
//! |-------|----------------|--------------|
//! | `html` | `key.html` | - |
//! | `pretty` | `key/index.html` | - |
//! | `pretty-with-fallback` | `key/index.html` | `key.html` redirect stub |
//!
//! The planner consumes the resulting path strings; it never builds HTML
//! paths itself.

use std::path::PathBuf;

use super::config::UrlStyle;

/// The paths and link target for one logical key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMapping {
    /// Site-relative link (`blog/hello.html` or `blog/hello/`)
    pub href: String,
    pub primary: PathBuf,
    /// Redirect stub pointing at `href`
    pub fallback: Option<PathBuf>,
}

impl PathMapping {
    /// Every file the mapping produces, primary first
    pub fn outputs(&self) -> Vec<PathBuf> {
        let mut outputs = vec![self.primary.clone()];
        outputs.extend(self.fallback.clone());
        outputs
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PathMapper {
    style: UrlStyle,
}

impl PathMapper {
    pub fn new(style: UrlStyle) -> Self {
        Self { style }
    }

    pub fn map(&self, logical_key: &str) -> PathMapping {
        let key = logical_key.trim_matches('/');

        // The site root is always index.html regardless of style
        if key == "index" {
            return PathMapping {
                href: String::new(),
                primary: PathBuf::from("index.html"),
                fallback: None,
            };
        }

        match self.style {
            UrlStyle::Html => PathMapping {
                href: format!("{key}.html"),
                primary: PathBuf::from(format!("{key}.html")),
                fallback: None,
            },
            UrlStyle::Pretty => PathMapping {
                href: format!("{key}/"),
                primary: PathBuf::from(format!("{key}/index.html")),
                fallback: None,
            },
            UrlStyle::PrettyWithFallback => PathMapping {
                href: format!("{key}/"),
                primary: PathBuf::from(format!("{key}/index.html")),
                fallback: Some(PathBuf::from(format!("{key}.html"))),
            },
        }
    }
}

/// Logical key of front page number `page` (1-based)
pub fn frontpage_key(page: u32) -> String {
    if page <= 1 {
        "index".to_string()
    } else {
        format!("page/{page}")
    }
}

/// Replaces the extension of a relative path
pub fn with_extension(rel: &str, ext: &str) -> String {
    let file_start = rel.rfind('/').map(|i| i + 1).unwrap_or(0);
    match rel[file_start..].rfind('.') {
        Some(dot) if dot > 0 => format!("{}.{ext}", &rel[..file_start + dot]),
        _ => format!("{rel}.{ext}"),
    }
}

/// Inserts a short hash before the extension (`css/site.css` -> `css/site.0a1b2c3d.css`)
pub fn with_hash_suffix(rel: &str, short_hash: &str) -> String {
    let (dir, file) = match rel.rsplit_once('/') {
        Some((dir, file)) => (Some(dir), file),
        None => (None, rel),
    };
    let busted = match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}.{short_hash}.{ext}"),
        _ => format!("{file}.{short_hash}"),
    };
    match dir {
        Some(dir) => format!("{dir}/{busted}"),
        None => busted,
    }
}
