//! Content loading
//!
//! Walks a site root and produces the `ContentModel` the planner consumes:
//!
//! ```text
//! <root>/
//! ├── stbl.toml
//! ├── articles/
//! │   ├── index.md          # front page intro
//! │   ├── hello.md          # standalone page, key `hello`
//! │   └── guide/
//! │       ├── index.md      # series index, key `guide`
//! │       └── part-one.md   # series part, key `guide/part-one`
//! ├── assets/               # copied to `artifacts/`
//! ├── images/               # referenced images
//! └── video/                # referenced videos
//! ```
//!
//! Problems with a single document never abort loading; they are recorded
//! as `ContentIssue`s and reported by the planner with the offending file.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::Deserialize;
use walkdir::WalkDir;

use crate::domain::{
    ContentIssue, ContentModel, Digest, ImageSource, Page, Publication, Series, StaticFile,
    Template, VideoSource,
};

pub const ARTICLES_DIR: &str = "articles";
pub const ASSETS_DIR: &str = "assets";

#[derive(Debug, Default, Deserialize)]
struct FrontMatter {
    title: Option<String>,
    published: Option<serde_yaml::Value>,
    updated: Option<serde_yaml::Value>,
    tags: Option<serde_yaml::Value>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    template: Option<String>,
    part: Option<u32>,
}

/// Loads the full content model from a site root
pub fn load_content(root: &Path) -> Result<ContentModel> {
    let mut model = ContentModel::default();

    let documents = read_documents(&root.join(ARTICLES_DIR), &mut model.issues)?;
    assemble(documents, &mut model);

    model.assets = load_assets(&root.join(ASSETS_DIR))?;
    load_media(root, &mut model);

    tracing::debug!(
        pages = model.pages.len(),
        series = model.series.len(),
        assets = model.assets.len(),
        images = model.images.len(),
        videos = model.videos.len(),
        issues = model.issues.len(),
        "content loaded"
    );
    Ok(model)
}

/// Parsed documents keyed by path under `articles/` (`guide/index.md`)
fn read_documents(
    articles_dir: &Path,
    issues: &mut Vec<ContentIssue>,
) -> Result<BTreeMap<String, Page>> {
    let mut documents = BTreeMap::new();
    if !articles_dir.is_dir() {
        return Ok(documents);
    }

    for entry in WalkDir::new(articles_dir).sort_by_file_name() {
        let entry = entry
            .with_context(|| format!("Failed to walk {}", articles_dir.display()))?;
        let path = entry.path();
        if !entry.file_type().is_file() || !path.extension().is_some_and(|e| e == "md") {
            continue;
        }

        let rel = relative_slash_path(articles_dir, path);
        let source_path = format!("{}/{}", ARTICLES_DIR, rel);

        let raw = match fs::read(path) {
            Ok(raw) => raw,
            Err(e) => {
                issues.push(issue(&source_path, format!("unreadable: {}", e)));
                continue;
            }
        };

        match parse_document(&source_path, &rel, &raw) {
            Ok(page) => {
                documents.insert(rel, page);
            }
            Err(reason) => issues.push(issue(&source_path, reason)),
        }
    }

    Ok(documents)
}

/// Splits documents into front page, series and standalone pages
fn assemble(documents: BTreeMap<String, Page>, model: &mut ContentModel) {
    let series_dirs: BTreeSet<String> = documents
        .keys()
        .filter_map(|rel| rel.strip_suffix("/index.md"))
        .map(str::to_string)
        .collect();

    let mut indexes: BTreeMap<String, Page> = BTreeMap::new();
    let mut parts: BTreeMap<String, Vec<Page>> = BTreeMap::new();

    for (rel, mut page) in documents {
        if rel == "index.md" {
            page.template = Template::Frontpage;
            page.logical_key = "index".to_string();
            model.frontpage = Some(page);
            continue;
        }

        if let Some(dir) = rel.strip_suffix("/index.md") {
            page.logical_key = dir.to_string();
            indexes.insert(dir.to_string(), page);
            continue;
        }

        let parent = rel.rsplit_once('/').map(|(dir, _)| dir);
        match parent {
            Some(dir) if series_dirs.contains(dir) => {
                parts.entry(dir.to_string()).or_default().push(page);
            }
            _ => model.pages.push(page),
        }
    }

    for (key, index) in indexes {
        let mut series_parts = parts.remove(&key).unwrap_or_default();
        series_parts.sort_by(|a, b| a.logical_key.cmp(&b.logical_key));
        model.series.push(Series {
            key,
            index,
            parts: series_parts,
        });
    }
}

fn issue(item: &str, reason: impl Into<String>) -> ContentIssue {
    ContentIssue {
        item: item.to_string(),
        reason: reason.into(),
    }
}

/// Parses one Markdown document
///
/// `rel` is the path under `articles/`; the error string becomes the
/// issue reason.
pub(crate) fn parse_document(source_path: &str, rel: &str, raw: &[u8]) -> Result<Page, String> {
    let text = std::str::from_utf8(raw).map_err(|_| "not valid UTF-8".to_string())?;
    let (yaml, body) = split_front_matter(text)?;

    let front: FrontMatter = match yaml {
        Some(yaml) if !yaml.trim().is_empty() => serde_yaml::from_str(yaml)
            .map_err(|e| format!("invalid front matter: {}", e))?,
        _ => FrontMatter::default(),
    };

    let publication = match &front.published {
        None | Some(serde_yaml::Value::Null) | Some(serde_yaml::Value::Bool(true)) => {
            Publication::Unstamped
        }
        Some(serde_yaml::Value::Bool(false)) => Publication::Draft,
        Some(value) => Publication::At(date_value(value, "published")?),
    };

    let updated = match &front.updated {
        None | Some(serde_yaml::Value::Null) => None,
        Some(value) => Some(date_value(value, "updated")?),
    };

    let template = match front.template.as_deref().map(str::trim) {
        None | Some("") | Some("page") => Template::Page,
        Some("info") => Template::Info,
        Some("frontpage") => Template::Frontpage,
        Some(other) => return Err(format!("unknown template {:?}", other)),
    };

    let tags = match &front.tags {
        None | Some(serde_yaml::Value::Null) => Vec::new(),
        Some(serde_yaml::Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect(),
        Some(serde_yaml::Value::Sequence(items)) => items
            .iter()
            .map(|item| match item {
                serde_yaml::Value::String(s) => Ok(s.trim().to_string()),
                serde_yaml::Value::Number(n) => Ok(n.to_string()),
                _ => Err("tags must be strings".to_string()),
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => return Err("tags must be a list".to_string()),
    };

    Ok(Page {
        source_path: source_path.to_string(),
        logical_key: rel.trim_end_matches(".md").to_string(),
        title: front.title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()),
        publication,
        updated,
        tags,
        abstract_text: front.abstract_text,
        template,
        part: front.part,
        body: body.to_string(),
        content_hash: Digest::of(raw),
        media: media_references(body),
    })
}

/// Returns `(front matter, body)`
///
/// Documents without a leading `---` line have no front matter.
pub(crate) fn split_front_matter(text: &str) -> Result<(Option<&str>, &str), String> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let Some(rest) = text
        .strip_prefix("---\n")
        .or_else(|| text.strip_prefix("---\r\n"))
    else {
        return Ok((None, text));
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let yaml = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return Ok((Some(yaml), body));
        }
        offset += line.len();
    }
    Err("missing front matter end delimiter (---)".to_string())
}

fn date_value(value: &serde_yaml::Value, field: &str) -> Result<i64, String> {
    match value {
        serde_yaml::Value::String(s) => {
            parse_timestamp(s).ok_or_else(|| format!("invalid {} date {:?}", field, s))
        }
        other => Err(format!("invalid {} value {:?}", field, other)),
    }
}

/// Parses a header date into a unix timestamp
///
/// RFC 3339, or a naive date/datetime taken as UTC.
pub fn parse_timestamp(value: &str) -> Option<i64> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.timestamp());
    }
    for format in [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt.and_utc().timestamp());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp())
}

fn media_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r#"!\[[^\]]*\]\(\s*<?(?:\./|/)?((?:images|video)/[^)\s>"]+)"#).ok()
        })
        .as_ref()
}

/// Media destinations referenced from a Markdown body, sorted
pub(crate) fn media_references(body: &str) -> Vec<String> {
    let Some(pattern) = media_pattern() else {
        return Vec::new();
    };
    let refs: BTreeSet<String> = pattern
        .captures_iter(body)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .collect();
    refs.into_iter().collect()
}

fn load_assets(assets_dir: &Path) -> Result<Vec<StaticFile>> {
    let mut assets = Vec::new();
    if !assets_dir.is_dir() {
        return Ok(assets);
    }

    for entry in WalkDir::new(assets_dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {}", assets_dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let raw = fs::read(entry.path())
            .with_context(|| format!("Failed to read asset: {}", entry.path().display()))?;
        let rel = relative_slash_path(assets_dir, entry.path());
        assets.push(StaticFile {
            source_path: format!("{}/{}", ASSETS_DIR, rel),
            rel,
            hash: Digest::of(&raw),
        });
    }
    Ok(assets)
}

/// Hashes every media file a document references and reads image sizes
///
/// References to missing files are left out; the planner reports them
/// against the referencing page.
fn load_media(root: &Path, model: &mut ContentModel) {
    let references: BTreeSet<String> = model
        .all_pages()
        .flat_map(|p| p.media.iter().cloned())
        .collect();

    for reference in references {
        if reference.split('/').any(|c| c == ".." || c.is_empty()) {
            continue;
        }
        let path = root.join(&reference);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "media reference not readable");
                continue;
            }
        };
        let hash = Digest::of(&raw);

        if reference.starts_with("images/") {
            let mut source = ImageSource {
                path: reference.clone(),
                hash,
                width: None,
                height: None,
            };
            if !source.is_svg() {
                match image::image_dimensions(&path) {
                    Ok((w, h)) => {
                        source.width = Some(w);
                        source.height = Some(h);
                    }
                    Err(e) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "could not read image size"
                        );
                    }
                }
            }
            model.images.insert(reference, source);
        } else {
            model.videos.insert(
                reference.clone(),
                VideoSource {
                    path: reference,
                    hash,
                    height: None,
                },
            );
        }
    }
}

fn relative_slash_path(base: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(base).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn parse_full_header() {
        let raw = b"---\ntitle: Hello\npublished: 2024-03-01 12:30\nupdated: 2024-03-02\n\
            tags: [rust, web]\nabstract: Short\npart: 2\n---\nBody text\n";
        let page = parse_document("articles/hello.md", "hello.md", raw).unwrap();

        assert_eq!(page.logical_key, "hello");
        assert_eq!(page.title.as_deref(), Some("Hello"));
        assert_eq!(page.publication, Publication::At(1_709_296_200));
        assert_eq!(page.updated, Some(1_709_337_600));
        assert_eq!(page.tags, vec!["rust", "web"]);
        assert_eq!(page.abstract_text.as_deref(), Some("Short"));
        assert_eq!(page.part, Some(2));
        assert_eq!(page.body, "Body text\n");
    }

    #[test]
    fn draft_and_unstamped() {
        let draft = parse_document("a", "a.md", b"---\npublished: false\n---\n").unwrap();
        assert_eq!(draft.publication, Publication::Draft);

        let fresh = parse_document("a", "a.md", b"---\ntitle: New\n---\n").unwrap();
        assert_eq!(fresh.publication, Publication::Unstamped);

        let bare = parse_document("a", "a.md", b"no header at all").unwrap();
        assert_eq!(bare.publication, Publication::Unstamped);
        assert_eq!(bare.body, "no header at all");
    }

    #[test]
    fn invalid_header_values_are_reported() {
        let bad_date = parse_document("a", "a.md", b"---\npublished: yesterday\n---\n");
        assert!(bad_date.unwrap_err().contains("invalid published date"));

        let bad_template = parse_document("a", "a.md", b"---\ntemplate: fancy\n---\n");
        assert!(bad_template.unwrap_err().contains("unknown template"));

        let unterminated = parse_document("a", "a.md", b"---\ntitle: x\n");
        assert!(unterminated.is_err());
    }

    #[test]
    fn comma_separated_tags() {
        let page = parse_document("a", "a.md", b"---\ntags: rust, cli ,\n---\n").unwrap();
        assert_eq!(page.tags, vec!["rust", "cli"]);
    }

    #[test]
    fn timestamps() {
        assert_eq!(parse_timestamp("1970-01-02"), Some(86_400));
        assert_eq!(parse_timestamp("1970-01-01T00:01:00Z"), Some(60));
        assert_eq!(parse_timestamp("1970-01-01T01:00:00+01:00"), Some(0));
        assert_eq!(parse_timestamp("1970-01-01 00:00:30"), Some(30));
        assert_eq!(parse_timestamp("soon"), None);
    }

    #[test]
    fn finds_media_references() {
        let body = "![cat](images/cat.jpg) and ![](./video/clip.mp4 \"title\")\n\
            ![x](https://example.org/a.png) ![again](images/cat.jpg)";
        assert_eq!(
            media_references(body),
            vec!["images/cat.jpg".to_string(), "video/clip.mp4".to_string()]
        );
    }

    #[test]
    fn front_matter_delimiter_inside_yaml_value() {
        let (yaml, body) = split_front_matter("---\ntitle: a---b\n---\nrest").unwrap();
        assert_eq!(yaml, Some("title: a---b\n"));
        assert_eq!(body, "rest");
    }

    #[test]
    fn loads_site_layout() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "articles/index.md", "---\ntitle: Welcome\n---\nIntro");
        write(root, "articles/hello.md", "---\npublished: 2024-01-01\n---\n![c](images/cat.svg)");
        write(root, "articles/guide/index.md", "---\ntitle: Guide\n---\n");
        write(root, "articles/guide/one.md", "---\ntitle: One\n---\n");
        write(root, "articles/notes/loose.md", "---\ntitle: Loose\n---\n");
        write(root, "articles/broken.md", "---\npublished: nope\n---\n");
        write(root, "assets/css/site.css", "body {}");
        write(root, "images/cat.svg", "<svg/>");

        let model = load_content(root).unwrap();

        let intro = model.frontpage.as_ref().unwrap();
        assert_eq!(intro.template, Template::Frontpage);
        assert_eq!(intro.logical_key, "index");

        let keys: Vec<_> = model.pages.iter().map(|p| p.logical_key.as_str()).collect();
        assert_eq!(keys, vec!["hello", "notes/loose"]);

        assert_eq!(model.series.len(), 1);
        assert_eq!(model.series[0].key, "guide");
        assert_eq!(model.series[0].index.logical_key, "guide");
        assert_eq!(model.series[0].parts[0].logical_key, "guide/one");

        assert_eq!(model.assets[0].source_path, "assets/css/site.css");
        assert_eq!(model.assets[0].rel, "css/site.css");
        assert!(model.images.contains_key("images/cat.svg"));

        assert_eq!(model.issues.len(), 1);
        assert_eq!(model.issues[0].item, "articles/broken.md");
    }

    #[test]
    fn missing_media_is_left_for_the_planner() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "articles/a.md", "![x](images/missing.png)");

        let model = load_content(dir.path()).unwrap();
        assert_eq!(model.pages[0].media, vec!["images/missing.png"]);
        assert!(model.images.is_empty());
    }

    #[test]
    fn empty_site_loads() {
        let dir = TempDir::new().unwrap();
        let model = load_content(dir.path()).unwrap();
        assert!(model.pages.is_empty());
        assert!(model.frontpage.is_none());
    }
}
