//! Built-in backend: HTML pages, feed, sitemap, CSS, copies and media
//!
//! Rendering is deliberately plain. Pages get a minimal layout around the
//! Markdown body; everything a theme would normally add is out of scope.

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use chrono::DateTime;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use pulldown_cmark::{html, Options, Parser};

use super::{Backend, BackendError, BackendResult};
use crate::domain::{
    build_listing, frontpage_key, number_parts, paginate, tag_slug, BuildPlan, ContentModel,
    EntrySource, ListingEntry, Page, PathMapper, SiteConfig, TaskKind,
};
use crate::engine::OutputSink;

/// Renders one site snapshot
pub struct SiteBackend<'a> {
    root: PathBuf,
    model: &'a ContentModel,
    config: &'a SiteConfig,
    mapper: PathMapper,
    listing: Vec<ListingEntry>,
    /// Every HTML link in the plan, for the sitemap
    sitemap: BTreeSet<String>,
    ffmpeg: PathBuf,
}

impl<'a> SiteBackend<'a> {
    pub fn new(
        root: &Path,
        model: &'a ContentModel,
        config: &'a SiteConfig,
        plan: &BuildPlan,
    ) -> Self {
        let mapper = PathMapper::new(config.site.url_style);
        let sitemap = plan
            .tasks
            .iter()
            .filter_map(|task| html_key(model, &task.kind))
            .map(|key| mapper.map(&key).href)
            .collect();

        Self {
            root: root.to_path_buf(),
            model,
            config,
            mapper,
            listing: build_listing(model, config.blog.sort_rounding),
            sitemap,
            ffmpeg: PathBuf::from("ffmpeg"),
        }
    }

    /// Program used for video variants and posters
    pub fn with_ffmpeg(mut self, program: impl Into<PathBuf>) -> Self {
        self.ffmpeg = program.into();
        self
    }

    fn url(&self, href: &str) -> String {
        format!("{}{}", self.config.site.base_url, href)
    }

    fn href_for(&self, key: &str) -> String {
        self.url(&self.mapper.map(key).href)
    }

    fn page(&self, source: &str) -> Result<&'a Page, BackendError> {
        self.model
            .find_page(source)
            .ok_or_else(|| BackendError::UnknownItem(source.to_string()))
    }

    fn entry_page(&self, entry: &ListingEntry) -> Option<&'a Page> {
        match &entry.source {
            EntrySource::Page { source } => self.model.find_page(source),
            EntrySource::Series { key } => self.model.find_series(key).map(|s| &s.index),
        }
    }

    fn layout(&self, title: &str, main: &str) -> String {
        let site = &self.config.site;
        format!(
            "<!DOCTYPE html>\n<html lang=\"{lang}\">\n<head>\n<meta charset=\"utf-8\">\n\
             <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
             <title>{title} | {site_title}</title>\n\
             <link rel=\"stylesheet\" href=\"{css}\">\n\
             <link rel=\"alternate\" type=\"application/rss+xml\" href=\"{feed}\">\n\
             </head>\n<body>\n<header><a href=\"{home}\">{site_title}</a></header>\n\
             <main>\n{main}</main>\n</body>\n</html>\n",
            lang = escape(&site.language),
            title = escape(title),
            site_title = escape(&site.title),
            css = self.url("artifacts/css/vars.css"),
            feed = self.url("rss.xml"),
            home = self.url(""),
            main = main,
        )
    }

    /// Writes a document under its logical key, plus the redirect stub if any
    fn write_document(&self, key: &str, html: String, sink: &mut OutputSink) -> BackendResult {
        let mapping = self.mapper.map(key);
        sink.write(&mapping.primary, html)?;
        if let Some(fallback) = &mapping.fallback {
            sink.write(fallback, redirect_stub(&self.url(&mapping.href)))?;
        }
        Ok(())
    }

    fn article_header(&self, page: &Page) -> String {
        let mut header = format!("<h1>{}</h1>\n", escape(page.display_title()));
        if let Some(date) = page.publication.timestamp().and_then(format_date) {
            header.push_str(&format!("<p class=\"published\"><time>{}</time></p>\n", date));
        }
        if !page.tags.is_empty() {
            let links: Vec<String> = page
                .tags
                .iter()
                .map(|tag| {
                    format!(
                        "<a href=\"{}\">{}</a>",
                        self.href_for(&format!("tags/{}", tag_slug(tag))),
                        escape(tag)
                    )
                })
                .collect();
            header.push_str(&format!("<p class=\"tags\">{}</p>\n", links.join(" ")));
        }
        header
    }

    /// A listing line; `latest` names the series parts shown under it
    fn entry_item(&self, page: &Page, latest: &[String]) -> String {
        let mut item = format!(
            "<li><a href=\"{}\">{}</a>",
            self.href_for(&page.logical_key),
            escape(page.display_title())
        );
        if let Some(date) = page.publication.timestamp().and_then(format_date) {
            item.push_str(&format!(" <time>{}</time>", date));
        }
        if let Some(text) = &page.abstract_text {
            item.push_str(&format!("<p>{}</p>", escape(text)));
        }
        let parts: Vec<&Page> = latest.iter().filter_map(|s| self.model.find_page(s)).collect();
        if !parts.is_empty() {
            item.push_str("<ul class=\"latest-parts\">");
            for part in parts {
                item.push_str(&format!(
                    "<li><a href=\"{}\">{}</a></li>",
                    self.href_for(&part.logical_key),
                    escape(part.display_title())
                ));
            }
            item.push_str("</ul>");
        }
        item.push_str("</li>\n");
        item
    }

    fn series_nav(&self, series_key: &str) -> Result<String, BackendError> {
        let series = self
            .model
            .find_series(series_key)
            .ok_or_else(|| BackendError::UnknownItem(series_key.to_string()))?;
        let numbered =
            number_parts(series).map_err(|e| BackendError::UnknownItem(e.to_string()))?;

        let mut nav = format!(
            "<nav class=\"series\"><a href=\"{}\">{}</a>\n<ol>\n",
            self.href_for(&series.key),
            escape(series.index.display_title())
        );
        for (number, part, _) in numbered {
            nav.push_str(&format!(
                "<li value=\"{}\"><a href=\"{}\">{}</a></li>\n",
                number,
                self.href_for(&part.logical_key),
                escape(part.display_title())
            ));
        }
        nav.push_str("</ol></nav>\n");
        Ok(nav)
    }

    fn copy_source(&self, source: &str, sink: &mut OutputSink) -> BackendResult {
        let path = self.root.join(source);
        fs::metadata(&path).map_err(|e| BackendError::Read {
            path: path.clone(),
            source: e,
        })?;
        let target = sink.primary()?.to_path_buf();
        sink.copy_from(target, &path)?;
        Ok(())
    }

    fn run_ffmpeg(&self, args: Vec<OsString>) -> BackendResult {
        let program = self.ffmpeg.display().to_string();
        tracing::debug!(program = %program, ?args, "running ffmpeg");

        let output = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| BackendError::Process {
                program: program.clone(),
                message: e.to_string(),
            })?;

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: Vec<&str> = stderr.lines().rev().take(3).collect();
        Err(BackendError::Process {
            program,
            message: format!(
                "{} ({})",
                output.status,
                tail.into_iter().rev().collect::<Vec<_>>().join("; ")
            ),
        })
    }
}

impl Backend for SiteBackend<'_> {
    fn render_page(&self, source: &str, sink: &mut OutputSink) -> BackendResult {
        let page = self.page(source)?;
        let mut main = String::from("<article>\n");
        main.push_str(&self.article_header(page));
        main.push_str(&markdown(&page.body));
        main.push_str("</article>\n");

        let series = self
            .model
            .series
            .iter()
            .find(|s| s.parts.iter().any(|p| p.source_path == source));
        if let Some(series) = series {
            main.push_str(&self.series_nav(&series.key)?);
        }

        let html = self.layout(page.display_title(), &main);
        self.write_document(&page.logical_key, html, sink)
    }

    fn render_series_index(&self, series: &str, sink: &mut OutputSink) -> BackendResult {
        let index = &self
            .model
            .find_series(series)
            .ok_or_else(|| BackendError::UnknownItem(series.to_string()))?
            .index;

        let mut main = String::from("<article>\n");
        main.push_str(&self.article_header(index));
        main.push_str(&markdown(&index.body));
        main.push_str("</article>\n");
        main.push_str(&self.series_nav(series)?);

        let html = self.layout(index.display_title(), &main);
        self.write_document(series, html, sink)
    }

    fn render_tag_page(&self, tag: Option<&str>, sink: &mut OutputSink) -> BackendResult {
        let rounding = self.config.blog.sort_rounding;
        let published = self
            .model
            .pages
            .iter()
            .chain(
                self.model
                    .series
                    .iter()
                    .filter(|s| !s.index.publication.is_draft())
                    .flat_map(|s| std::iter::once(&s.index).chain(s.parts.iter())),
            )
            .filter(|p| !p.publication.is_draft());

        // slug -> (display name, members)
        let mut tags: BTreeMap<String, (String, Vec<&Page>)> = BTreeMap::new();
        for page in published {
            for name in &page.tags {
                let entry = tags
                    .entry(tag_slug(name))
                    .or_insert_with(|| (name.clone(), Vec::new()));
                if !entry.1.iter().any(|p| p.source_path == page.source_path) {
                    entry.1.push(page);
                }
            }
        }

        let Some(slug) = tag else {
            let mut main = String::from("<h1>Tags</h1>\n<ul>\n");
            for (slug, (name, members)) in &tags {
                main.push_str(&format!(
                    "<li><a href=\"{}\">{}</a> ({})</li>\n",
                    self.href_for(&format!("tags/{}", slug)),
                    escape(name),
                    members.len()
                ));
            }
            main.push_str("</ul>\n");
            return self.write_document("tags", self.layout("Tags", &main), sink);
        };

        let (name, mut members) = tags
            .remove(slug)
            .ok_or_else(|| BackendError::UnknownItem(format!("tag {}", slug)))?;
        members.sort_by(|a, b| {
            b.sort_date(rounding)
                .cmp(&a.sort_date(rounding))
                .then_with(|| a.logical_key.cmp(&b.logical_key))
        });

        let mut main = format!("<h1>{}</h1>\n<ul class=\"listing\">\n", escape(&name));
        for page in members {
            main.push_str(&self.entry_item(page, &[]));
        }
        main.push_str("</ul>\n");
        self.write_document(&format!("tags/{}", slug), self.layout(&name, &main), sink)
    }

    fn render_frontpage(&self, page: u32, sink: &mut OutputSink) -> BackendResult {
        let pages = paginate(&self.listing, self.config.blog.page_size);
        let total = pages.len() as u32;
        let entries = page
            .checked_sub(1)
            .and_then(|i| pages.get(i as usize))
            .ok_or_else(|| BackendError::UnknownItem(format!("front page {}", page)))?;

        let mut main = String::new();
        let intro = self
            .model
            .frontpage
            .as_ref()
            .filter(|p| page == 1 && !p.publication.is_draft());
        if let Some(intro) = intro {
            main.push_str(&format!(
                "<section class=\"intro\">\n{}</section>\n",
                markdown(&intro.body)
            ));
        }

        main.push_str("<ul class=\"listing\">\n");
        for entry in entries.iter() {
            if let Some(item) = self.entry_page(entry) {
                main.push_str(&self.entry_item(item, &entry.latest));
            }
        }
        main.push_str("</ul>\n");

        if total > 1 {
            main.push_str("<nav class=\"pagination\">");
            if page > 1 {
                let newer = self.href_for(&frontpage_key(page - 1));
                main.push_str(&format!("<a rel=\"prev\" href=\"{}\">Newer</a>", newer));
            }
            if page < total {
                let older = self.href_for(&frontpage_key(page + 1));
                main.push_str(&format!("<a rel=\"next\" href=\"{}\">Older</a>", older));
            }
            main.push_str("</nav>\n");
        }

        let title = self.config.site.title.clone();
        self.write_document(&frontpage_key(page), self.layout(&title, &main), sink)
    }

    fn generate_feed(&self, sink: &mut OutputSink) -> BackendResult {
        let site = &self.config.site;
        let limit = match self.config.rss.max_items {
            0 => self.listing.len(),
            n => n.min(self.listing.len()),
        };

        let mut xml =
            String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<rss version=\"2.0\">\n");
        xml.push_str("<channel>\n");
        xml.push_str(&format!("<title>{}</title>\n", escape(&site.title)));
        xml.push_str(&format!("<link>{}</link>\n", escape(&site.base_url)));
        xml.push_str(&format!("<description>{}</description>\n", escape(&site.title)));
        xml.push_str(&format!("<language>{}</language>\n", escape(&site.language)));

        for entry in &self.listing[..limit] {
            let Some(page) = self.entry_page(entry) else {
                continue;
            };
            let link = self.href_for(&page.logical_key);
            xml.push_str("<item>\n");
            xml.push_str(&format!("<title>{}</title>\n", escape(page.display_title())));
            xml.push_str(&format!("<link>{}</link>\n", escape(&link)));
            xml.push_str(&format!("<guid>{}</guid>\n", escape(&link)));
            if let Some(date) = DateTime::from_timestamp(entry.sort_date, 0) {
                xml.push_str(&format!("<pubDate>{}</pubDate>\n", date.to_rfc2822()));
            }
            if let Some(text) = &page.abstract_text {
                xml.push_str(&format!("<description>{}</description>\n", escape(text)));
            }
            xml.push_str("</item>\n");
        }
        xml.push_str("</channel>\n</rss>\n");

        let target = sink.primary()?.to_path_buf();
        sink.write(target, xml)?;
        Ok(())
    }

    fn generate_sitemap(&self, sink: &mut OutputSink) -> BackendResult {
        let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        xml.push_str("<urlset xmlns=\"http://www.sitemaps.org/schemas/sitemap/0.9\">\n");
        for href in &self.sitemap {
            xml.push_str(&format!("<url><loc>{}</loc></url>\n", escape(&self.url(href))));
        }
        xml.push_str("</urlset>\n");

        let target = sink.primary()?.to_path_buf();
        sink.write(target, xml)?;
        Ok(())
    }

    fn write_generated_asset(&self, name: &str, sink: &mut OutputSink) -> BackendResult {
        let theme = &self.config.theme;
        let css = match name {
            "css/vars.css" => format!(
                ":root {{\n  --max-body-width: {};\n  --desktop-min: {};\n  --wide-min: {};\n}}\n",
                theme.max_body_width, theme.desktop_min, theme.wide_min
            ),
            other => return Err(BackendError::UnknownItem(format!("generated asset {}", other))),
        };
        let target = sink.primary()?.to_path_buf();
        sink.write(target, css)?;
        Ok(())
    }

    fn copy_static_file(&self, source: &str, sink: &mut OutputSink) -> BackendResult {
        self.copy_source(source, sink)
    }

    fn scale_image(
        &self,
        source: &str,
        width: u32,
        quality: u8,
        sink: &mut OutputSink,
    ) -> BackendResult {
        let path = self.root.join(source);
        let img = image::open(&path)?;
        let source_width = u64::from(img.width().max(1));
        let height = (u64::from(img.height()) * u64::from(width) / source_width).max(1);
        let scaled = img.resize_exact(width, height as u32, FilterType::Lanczos3);

        let target = sink.primary()?.to_path_buf();
        let bytes = encode_image(&scaled, &target, quality)?;
        sink.write(target, bytes)?;
        Ok(())
    }

    fn transcode_video(&self, source: &str, height: u32, sink: &mut OutputSink) -> BackendResult {
        let target = sink.primary()?.to_path_buf();
        let scratch = sink.scratch_path(&target)?;
        self.run_ffmpeg(vec![
            "-y".into(),
            "-loglevel".into(),
            "error".into(),
            "-i".into(),
            self.root.join(source).into_os_string(),
            "-vf".into(),
            format!("scale=-2:{}", height).into(),
            scratch.into_os_string(),
        ])
    }

    fn extract_poster(&self, source: &str, at_sec: u32, sink: &mut OutputSink) -> BackendResult {
        let target = sink.primary()?.to_path_buf();
        let scratch = sink.scratch_path(&target)?;
        self.run_ffmpeg(vec![
            "-y".into(),
            "-loglevel".into(),
            "error".into(),
            "-ss".into(),
            at_sec.to_string().into(),
            "-i".into(),
            self.root.join(source).into_os_string(),
            "-frames:v".into(),
            "1".into(),
            scratch.into_os_string(),
        ])
    }

    fn copy_icon(&self, source: &str, sink: &mut OutputSink) -> BackendResult {
        self.copy_source(source, sink)
    }
}

/// Logical key of the document an HTML task renders
fn html_key(model: &ContentModel, kind: &TaskKind) -> Option<String> {
    match kind {
        TaskKind::RenderPage { source } => model.find_page(source).map(|p| p.logical_key.clone()),
        TaskKind::RenderSeriesIndex { series } => Some(series.clone()),
        TaskKind::RenderTagPage { tag: Some(slug) } => Some(format!("tags/{}", slug)),
        TaskKind::RenderTagPage { tag: None } => Some("tags".to_string()),
        TaskKind::RenderFrontpage { page } => Some(frontpage_key(*page)),
        _ => None,
    }
}

fn markdown(body: &str) -> String {
    let options = Options::ENABLE_TABLES
        | Options::ENABLE_FOOTNOTES
        | Options::ENABLE_STRIKETHROUGH;
    let mut out = String::with_capacity(body.len() * 3 / 2);
    html::push_html(&mut out, Parser::new_ext(body, options));
    out
}

fn redirect_stub(target: &str) -> String {
    let target = escape(target);
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
         <meta http-equiv=\"refresh\" content=\"0; url={0}\">\n\
         <link rel=\"canonical\" href=\"{0}\">\n</head>\n\
         <body><a href=\"{0}\">{0}</a></body>\n</html>\n",
        target
    )
}

fn format_date(timestamp: i64) -> Option<String> {
    DateTime::from_timestamp(timestamp, 0).map(|d| d.format("%Y-%m-%d").to_string())
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn encode_image(img: &DynamicImage, target: &Path, quality: u8) -> Result<Vec<u8>, BackendError> {
    let ext = target
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    let mut bytes = Vec::new();
    if ext == "jpg" || ext == "jpeg" {
        let encoder = JpegEncoder::new_with_quality(&mut bytes, quality);
        DynamicImage::ImageRgb8(img.to_rgb8()).write_with_encoder(encoder)?;
    } else {
        let format = ImageFormat::from_path(target)?;
        img.write_to(&mut Cursor::new(&mut bytes), format)?;
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fixtures::two_articles;
    use crate::domain::{plan, Publication, Series, TaskId, UrlStyle};
    use tempfile::TempDir;

    fn sink_for(out: &Path, plan: &BuildPlan, label: &str) -> OutputSink {
        let task = plan
            .tasks
            .iter()
            .find(|t| t.kind.label() == label)
            .unwrap();
        OutputSink::new(out, &task.id, &task.outputs)
    }

    fn read(out: &Path, rel: &str) -> String {
        fs::read_to_string(out.join(rel)).unwrap()
    }

    #[test]
    fn renders_page_with_markdown_body() {
        let (root, out) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let mut model = two_articles();
        model.pages[0].body = "Some *emphasis* here".to_string();
        model.pages[0].tags = vec!["Rust Lang".to_string()];
        let config = SiteConfig::default();
        let plan = plan(&model, &config).unwrap();
        let backend = SiteBackend::new(root.path(), &model, &config, &plan);

        let task = plan
            .tasks
            .iter()
            .find(|t| t.origin == "articles/first.md")
            .unwrap();
        let mut sink = OutputSink::new(out.path(), &task.id, &task.outputs);
        backend.render_page("articles/first.md", &mut sink).unwrap();
        sink.finish().unwrap();

        let html = read(out.path(), "first.html");
        assert!(html.contains("<em>emphasis</em>"));
        assert!(html.contains("<h1>Title first</h1>"));
        assert!(html.contains("tags/rust-lang.html"));
        assert!(html.contains("2023-11-14"));
    }

    #[test]
    fn pretty_fallback_writes_redirect_stub() {
        let (root, out) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let model = two_articles();
        let mut config = SiteConfig::default();
        config.site.url_style = UrlStyle::PrettyWithFallback;
        let plan = plan(&model, &config).unwrap();
        let backend = SiteBackend::new(root.path(), &model, &config, &plan);

        let task = plan.tasks.iter().find(|t| t.origin == "articles/second.md").unwrap();
        let mut sink = OutputSink::new(out.path(), &task.id, &task.outputs);
        backend.render_page("articles/second.md", &mut sink).unwrap();
        sink.finish().unwrap();

        assert!(read(out.path(), "second/index.html").contains("Body of second"));
        assert!(read(out.path(), "second.html").contains("url=http://localhost:8080/second/"));
    }

    #[test]
    fn frontpage_feed_and_sitemap() {
        let (root, out) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let model = two_articles();
        let config = SiteConfig::default();
        let plan = plan(&model, &config).unwrap();
        let backend = SiteBackend::new(root.path(), &model, &config, &plan);

        let mut sink = sink_for(out.path(), &plan, "RenderFrontpage");
        backend.render_frontpage(1, &mut sink).unwrap();
        sink.finish().unwrap();
        let index = read(out.path(), "index.html");
        assert!(index.contains("Body of index"));
        let newer = index.find("Title second").unwrap();
        let older = index.find("Title first").unwrap();
        assert!(newer < older);

        let mut sink = sink_for(out.path(), &plan, "GenerateFeed");
        backend.generate_feed(&mut sink).unwrap();
        sink.finish().unwrap();
        let feed = read(out.path(), "rss.xml");
        assert_eq!(feed.matches("<item>").count(), 2);
        assert!(feed.contains("<link>http://localhost:8080/second.html</link>"));

        let mut sink = sink_for(out.path(), &plan, "GenerateSitemap");
        backend.generate_sitemap(&mut sink).unwrap();
        sink.finish().unwrap();
        let sitemap = read(out.path(), "sitemap.xml");
        assert_eq!(sitemap.matches("<loc>").count(), 3);
        assert!(sitemap.contains("<loc>http://localhost:8080/</loc>"));
    }

    #[test]
    fn series_pages_carry_navigation() {
        let (root, out) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let mut index = crate::domain::fixtures::page("guide", 1_700_000_000);
        index.source_path = "articles/guide/index.md".to_string();
        let mut part = crate::domain::fixtures::page("guide/setup", 1_700_000_100);
        part.source_path = "articles/guide/setup.md".to_string();
        let model = ContentModel {
            series: vec![Series {
                key: "guide".to_string(),
                index,
                parts: vec![part],
            }],
            ..Default::default()
        };
        let config = SiteConfig::default();
        let plan = plan(&model, &config).unwrap();
        let backend = SiteBackend::new(root.path(), &model, &config, &plan);

        let task = plan
            .tasks
            .iter()
            .find(|t| t.kind.label() == "RenderSeriesIndex")
            .unwrap();
        let mut sink = OutputSink::new(out.path(), &task.id, &task.outputs);
        backend.render_series_index("guide", &mut sink).unwrap();
        sink.finish().unwrap();

        let html = read(out.path(), "guide.html");
        let link = "<li value=\"1\"><a href=\"http://localhost:8080/guide/setup.html\">";
        assert!(html.contains(link));
    }

    #[test]
    fn frontpage_shows_latest_series_parts() {
        let (root, out) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let mut index = crate::domain::fixtures::page("guide", 10);
        index.source_path = "articles/guide/index.md".to_string();
        let part = crate::domain::fixtures::page("guide/setup", 1_800_000_000);
        let mut model = two_articles();
        model.series.push(Series {
            key: "guide".to_string(),
            index,
            parts: vec![part],
        });
        let config = SiteConfig::default();
        let plan = plan(&model, &config).unwrap();
        let backend = SiteBackend::new(root.path(), &model, &config, &plan);

        let mut sink = sink_for(out.path(), &plan, "RenderFrontpage");
        backend.render_frontpage(1, &mut sink).unwrap();
        sink.finish().unwrap();

        let html = read(out.path(), "index.html");
        let series = html.find("Title guide<").unwrap();
        assert!(series < html.find("Title second").unwrap());
        let latest = html.find("<ul class=\"latest-parts\">").unwrap();
        assert!(html[latest..].starts_with(
            "<ul class=\"latest-parts\"><li><a href=\"http://localhost:8080/guide/setup.html\">"
        ));
    }

    #[test]
    fn vars_css_uses_theme() {
        let (root, out) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let model = two_articles();
        let mut config = SiteConfig::default();
        config.theme.max_body_width = "60rem".to_string();
        let plan = plan(&model, &config).unwrap();
        let backend = SiteBackend::new(root.path(), &model, &config, &plan);

        let mut sink = sink_for(out.path(), &plan, "WriteGeneratedAsset");
        backend.write_generated_asset("css/vars.css", &mut sink).unwrap();
        sink.finish().unwrap();

        assert!(read(out.path(), "artifacts/css/vars.css").contains("--max-body-width: 60rem;"));
    }

    #[test]
    fn scales_raster_images() {
        let (root, out) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        fs::create_dir_all(root.path().join("images")).unwrap();
        image::RgbImage::from_pixel(64, 32, image::Rgb([200, 10, 10]))
            .save(root.path().join("images/a.png"))
            .unwrap();

        let model = ContentModel::default();
        let config = SiteConfig::default();
        let backend = SiteBackend::new(root.path(), &model, &config, &BuildPlan::default());
        let outputs = vec![PathBuf::from("images/_scale_32/a.png")];
        let mut sink = OutputSink::new(out.path(), &TaskId::new("img_scale", &["a"]), &outputs);

        backend.scale_image("images/a.png", 32, 85, &mut sink).unwrap();
        sink.finish().unwrap();

        let scaled = image::open(out.path().join("images/_scale_32/a.png")).unwrap();
        assert_eq!((scaled.width(), scaled.height()), (32, 16));
    }

    #[test]
    fn jpeg_variants_use_quality() {
        let img = DynamicImage::ImageRgba8(image::RgbaImage::new(8, 8));
        let bytes = encode_image(&img, Path::new("x/a.jpg"), 50).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn missing_copy_source_is_an_error() {
        let (root, out) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let model = ContentModel::default();
        let config = SiteConfig::default();
        let backend = SiteBackend::new(root.path(), &model, &config, &BuildPlan::default());
        let outputs = vec![PathBuf::from("artifacts/site.css")];
        let mut sink = OutputSink::new(out.path(), &TaskId::new("copy_static", &["x"]), &outputs);

        let err = backend.copy_static_file("assets/site.css", &mut sink).unwrap_err();
        assert!(matches!(err, BackendError::Read { .. }));
    }

    #[test]
    fn missing_ffmpeg_is_a_process_error() {
        let (root, out) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let model = ContentModel::default();
        let config = SiteConfig::default();
        let backend = SiteBackend::new(root.path(), &model, &config, &BuildPlan::default())
            .with_ffmpeg(root.path().join("no-such-ffmpeg"));
        let outputs = vec![PathBuf::from("video/_scale_360/a.mp4")];
        let mut sink = OutputSink::new(out.path(), &TaskId::new("vid_scale", &["a"]), &outputs);

        let err = backend.transcode_video("video/a.mp4", 360, &mut sink).unwrap_err();
        assert!(matches!(err, BackendError::Process { .. }));
    }

    #[test]
    fn drafts_are_unknown_to_tag_pages() {
        let (root, out) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let mut model = two_articles();
        model.pages[0].tags = vec!["news".to_string()];
        model.pages[1].tags = vec!["news".to_string()];
        model.pages[1].publication = Publication::Draft;
        let config = SiteConfig::default();
        let plan = plan(&model, &config).unwrap();
        let backend = SiteBackend::new(root.path(), &model, &config, &plan);

        let task = plan
            .tasks
            .iter()
            .find(|t| t.kind == TaskKind::RenderTagPage { tag: Some("news".to_string()) })
            .unwrap();
        let mut sink = OutputSink::new(out.path(), &task.id, &task.outputs);
        backend.render_tag_page(Some("news"), &mut sink).unwrap();
        sink.finish().unwrap();

        let html = read(out.path(), "tags/news.html");
        assert!(html.contains("Title first"));
        assert!(!html.contains("Title second"));
    }
}
