//! Build planner
//!
//! `plan` turns a loaded content model and config into a `BuildPlan`. It is
//! pure: no clock, no filesystem, no randomness. Everything it needs (file
//! hashes, image dimensions) has already been resolved by the loader.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;

use thiserror::Error;

use super::config::{ConfigHashes, SiteConfig};
use super::content::{tag_slug, ContentModel, Page, Series};
use super::graph::{DependencyGraph, GraphError};
use super::id::{Digest, StableHasher, TaskId};
use super::listing::{aggregate_digest, build_listing, paginate, EntrySource, ListingEntry};
use super::paths::{frontpage_key, with_extension, with_hash_suffix, PathMapper};
use super::task::{BuildPlan, HeaderUpdate, InputDescriptor, Task, TaskKind};

#[derive(Debug, Error, PartialEq)]
pub enum PlanError {
    #[error("Invalid content in {item}: {reason}")]
    InvalidContent { item: String, reason: String },

    #[error("Output path collision on {path}: {first} and {second} both produce it")]
    OutputCollision {
        path: PathBuf,
        first: String,
        second: String,
    },

    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl PlanError {
    fn invalid(item: impl Into<String>, reason: impl Into<String>) -> Self {
        PlanError::InvalidContent {
            item: item.into(),
            reason: reason.into(),
        }
    }
}

pub const FEED_PATH: &str = "rss.xml";
pub const SITEMAP_PATH: &str = "sitemap.xml";
pub const VARS_CSS_NAME: &str = "css/vars.css";

/// Builds the task DAG for one build
pub fn plan(model: &ContentModel, config: &SiteConfig) -> Result<BuildPlan, PlanError> {
    if let Some(issue) = model.issues.iter().min_by(|a, b| a.item.cmp(&b.item)) {
        return Err(PlanError::invalid(&issue.item, &issue.reason));
    }

    let mut planner = Planner::new(model, config);
    planner.validate_media()?;
    planner.plan_pages()?;
    planner.plan_series()?;
    planner.plan_tags()?;
    planner.plan_frontpages();
    planner.plan_feed();
    planner.plan_generated_assets();
    planner.plan_static_assets();
    planner.plan_icon();
    planner.plan_images();
    planner.plan_videos();
    planner.plan_sitemap();
    planner.finish()
}

struct Planner<'a> {
    model: &'a ContentModel,
    config: &'a SiteConfig,
    hashes: ConfigHashes,
    mapper: PathMapper,
    tasks: Vec<Task>,
    /// Source path -> render task
    page_tasks: HashMap<String, TaskId>,
    /// Series key -> index task
    series_tasks: HashMap<String, TaskId>,
    /// Every HTML-producing task, for the sitemap
    html_tasks: Vec<TaskId>,
    header_updates: Vec<HeaderUpdate>,
}

impl<'a> Planner<'a> {
    fn new(model: &'a ContentModel, config: &'a SiteConfig) -> Self {
        Self {
            model,
            config,
            hashes: config.fragment_hashes(),
            mapper: PathMapper::new(config.site.url_style),
            tasks: Vec::new(),
            page_tasks: HashMap::new(),
            series_tasks: HashMap::new(),
            html_tasks: Vec::new(),
            header_updates: Vec::new(),
        }
    }

    fn config_input(&self, fragment: &str) -> InputDescriptor {
        let hash = match fragment {
            "site" => self.hashes.site,
            "blog" => self.hashes.blog,
            "rss" => self.hashes.rss,
            "theme" => self.hashes.theme,
            "assets" => self.hashes.assets,
            "images" => self.hashes.images,
            _ => self.hashes.video,
        };
        InputDescriptor::Config {
            fragment: fragment.to_string(),
            hash,
        }
    }

    fn push(&mut self, task: Task) -> TaskId {
        let id = task.id.clone();
        self.tasks.push(task);
        id
    }

    /// Published pages in source path order, series members included
    fn published_pages(&self) -> Vec<&'a Page> {
        let mut pages: Vec<&Page> = self
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
            .filter(|p| !p.publication.is_draft())
            .collect();
        pages.sort_by(|a, b| a.source_path.cmp(&b.source_path));
        pages
    }

    /// Media referenced by a published page or the front page intro
    fn published_media(&self) -> BTreeSet<&'a str> {
        let model = self.model;
        let intro = model.frontpage.iter().filter(|p| !p.publication.is_draft());
        self.published_pages()
            .into_iter()
            .chain(intro)
            .flat_map(|p| p.media.iter().map(String::as_str))
            .collect()
    }

    fn validate_media(&self) -> Result<(), PlanError> {
        let pages = self.published_pages().into_iter().chain(self.model.frontpage.iter());
        for page in pages {
            for reference in &page.media {
                let known = self.model.images.contains_key(reference)
                    || self.model.videos.contains_key(reference);
                if !known {
                    return Err(PlanError::invalid(
                        &page.source_path,
                        format!("references missing media file {}", reference),
                    ));
                }
            }
        }
        Ok(())
    }

    fn check_key(page: &Page) -> Result<(), PlanError> {
        if page.logical_key.trim_matches('/').is_empty() {
            return Err(PlanError::invalid(&page.source_path, "empty logical key"));
        }
        for tag in &page.tags {
            if tag_slug(tag).is_empty() {
                return Err(PlanError::invalid(
                    &page.source_path,
                    format!("tag {:?} has no usable characters", tag),
                ));
            }
        }
        Ok(())
    }

    fn stamp_if_needed(&mut self, page: &Page) {
        if page.publication.timestamp().is_none() && !page.publication.is_draft() {
            self.header_updates.push(HeaderUpdate::Published {
                source: page.source_path.clone(),
            });
        }
    }

    fn render_page_task(&self, page: &Page) -> Task {
        let rounding = self.config.blog.sort_rounding;
        Task::new(
            TaskKind::RenderPage {
                source: page.source_path.clone(),
            },
            &[page.source_path.as_str()],
            &page.source_path,
        )
        .with_input(InputDescriptor::Source {
            path: page.source_path.clone(),
            hash: page.content_hash,
        })
        .with_input(self.config_input("site"))
        .with_outputs(self.mapper.map(&page.logical_key).outputs())
        .with_logical_result(page.summary_digest(rounding))
    }

    fn plan_pages(&mut self) -> Result<(), PlanError> {
        let model = self.model;
        let mut pages: Vec<&Page> = model
            .pages
            .iter()
            .filter(|p| !p.publication.is_draft())
            .collect();
        pages.sort_by(|a, b| a.source_path.cmp(&b.source_path));

        for page in pages {
            Self::check_key(page)?;
            let task = self.render_page_task(page);
            let id = self.push(task);
            self.page_tasks.insert(page.source_path.clone(), id.clone());
            self.html_tasks.push(id);
            self.stamp_if_needed(page);
        }
        Ok(())
    }

    fn plan_series(&mut self) -> Result<(), PlanError> {
        let model = self.model;
        let mut series: Vec<&Series> = model
            .series
            .iter()
            .filter(|s| !s.index.publication.is_draft())
            .collect();
        series.sort_by(|a, b| a.key.cmp(&b.key));

        for s in series {
            Self::check_key(&s.index)?;
            let numbered = number_parts(s)?;
            let nav = series_nav_digest(s, &numbered);

            let mut index_task = Task::new(
                TaskKind::RenderSeriesIndex {
                    series: s.key.clone(),
                },
                &[s.key.as_str()],
                &s.index.source_path,
            )
            .with_input(InputDescriptor::Source {
                path: s.index.source_path.clone(),
                hash: s.index.content_hash,
            })
            .with_input(self.config_input("site"))
            .with_input(InputDescriptor::Aggregate {
                label: "series-parts".to_string(),
                hash: nav,
            })
            .with_outputs(self.mapper.map(&s.key).outputs())
            .with_logical_result(s.index.summary_digest(self.config.blog.sort_rounding));

            for (number, part, assigned) in &numbered {
                Self::check_key(part)?;
                let task = self.render_page_task(part).with_input(InputDescriptor::Aggregate {
                    label: "series-nav".to_string(),
                    hash: nav,
                });
                let id = self.push(task);
                index_task.depend_on(&id);
                self.page_tasks.insert(part.source_path.clone(), id.clone());
                self.html_tasks.push(id);
                self.stamp_if_needed(part);
                if *assigned {
                    self.header_updates.push(HeaderUpdate::Part {
                        source: part.source_path.clone(),
                        number: *number,
                    });
                }
            }

            let id = self.push(index_task);
            self.series_tasks.insert(s.key.clone(), id.clone());
            self.html_tasks.push(id);
            self.stamp_if_needed(&s.index);
        }
        Ok(())
    }

    /// Task that renders a given page or series index
    fn task_for_page(&self, page: &Page) -> Option<&TaskId> {
        self.page_tasks.get(&page.source_path).or_else(|| {
            self.model
                .series
                .iter()
                .find(|s| s.index.source_path == page.source_path)
                .and_then(|s| self.series_tasks.get(&s.key))
        })
    }

    /// Tasks a listing entry is rendered from: the page, or the series
    /// index plus the parts shown under it
    fn tasks_for_entry(&self, entry: &ListingEntry) -> Vec<TaskId> {
        let own = match &entry.source {
            EntrySource::Page { source } => self.page_tasks.get(source),
            EntrySource::Series { key } => self.series_tasks.get(key),
        };
        own.into_iter()
            .chain(entry.latest.iter().filter_map(|part| self.page_tasks.get(part)))
            .cloned()
            .collect()
    }

    fn plan_tags(&mut self) -> Result<(), PlanError> {
        let rounding = self.config.blog.sort_rounding;

        // slug -> (member entries, member tasks)
        let mut tags: BTreeMap<String, (Vec<ListingEntry>, BTreeSet<TaskId>)> = BTreeMap::new();
        for page in self.published_pages() {
            let Some(task_id) = self.task_for_page(page).cloned() else {
                continue;
            };
            let slugs: BTreeSet<String> = page.tags.iter().map(|t| tag_slug(t)).collect();
            for slug in slugs {
                let entry = ListingEntry::from_page(page, rounding);
                let members = tags.entry(slug).or_default();
                members.0.push(entry);
                members.1.insert(task_id.clone());
            }
        }

        if tags.is_empty() {
            return Ok(());
        }

        let mut index = Task::new(TaskKind::RenderTagPage { tag: None }, &[], "tags")
            .with_input(self.config_input("site"))
            .with_outputs(self.mapper.map("tags").outputs());

        for (slug, (mut entries, members)) in tags {
            entries.sort_by(super::listing::compare);
            let key = format!("tags/{}", slug);
            let mut task = Task::new(
                TaskKind::RenderTagPage {
                    tag: Some(slug.clone()),
                },
                &[slug.as_str()],
                &key,
            )
            .with_input(self.config_input("site"))
            .with_input(InputDescriptor::Aggregate {
                label: "tag-members".to_string(),
                hash: aggregate_digest(&key, &entries),
            })
            .with_outputs(self.mapper.map(&key).outputs());
            for member in &members {
                task.depend_on(member);
            }
            let id = self.push(task);
            index.depend_on(&id);
            self.html_tasks.push(id);
        }

        let id = self.push(index);
        self.html_tasks.push(id);
        Ok(())
    }

    fn plan_frontpages(&mut self) {
        let listing = build_listing(self.model, self.config.blog.sort_rounding);
        let pages = paginate(&listing, self.config.blog.page_size);
        let total = pages.len() as u32;

        let model = self.model;
        let intro = model
            .frontpage
            .as_ref()
            .filter(|p| !p.publication.is_draft());

        let mut planned = Vec::new();
        for (i, entries) in pages.iter().enumerate() {
            let number = i as u32 + 1;
            let key = frontpage_key(number);
            let mut pagination = StableHasher::new("stbl.pagination.v1");
            pagination.u64(u64::from(number)).u64(u64::from(total));

            let mut task = Task::new(
                TaskKind::RenderFrontpage { page: number },
                &[format!("page={}", number).as_str()],
                &key,
            )
            .with_input(self.config_input("site"))
            .with_input(self.config_input("blog"))
            .with_input(InputDescriptor::Aggregate {
                label: "listing".to_string(),
                hash: aggregate_digest(&key, entries),
            })
            .with_input(InputDescriptor::Aggregate {
                label: "pagination".to_string(),
                hash: pagination.finish(),
            })
            .with_outputs(self.mapper.map(&key).outputs());

            if let Some(intro) = intro {
                task = task.with_input(InputDescriptor::Source {
                    path: intro.source_path.clone(),
                    hash: intro.content_hash,
                });
            }

            for dep in entries.iter().flat_map(|e| self.tasks_for_entry(e)) {
                task.depend_on(&dep);
            }
            planned.push(task);
        }

        for task in planned {
            let id = self.push(task);
            self.html_tasks.push(id);
        }
    }

    fn plan_feed(&mut self) {
        if !self.config.rss.enabled {
            return;
        }
        let listing = build_listing(self.model, self.config.blog.sort_rounding);
        let limit = match self.config.rss.max_items {
            0 => listing.len(),
            n => n.min(listing.len()),
        };
        let entries = &listing[..limit];

        let mut task = Task::new(TaskKind::GenerateFeed, &[], FEED_PATH)
            .with_input(self.config_input("site"))
            .with_input(self.config_input("rss"))
            .with_input(InputDescriptor::Aggregate {
                label: "feed-items".to_string(),
                hash: aggregate_digest(FEED_PATH, entries),
            })
            .with_outputs([PathBuf::from(FEED_PATH)]);
        for dep in entries.iter().flat_map(|e| self.tasks_for_entry(e)) {
            task.depend_on(&dep);
        }
        self.push(task);
    }

    fn plan_generated_assets(&mut self) {
        let task = Task::new(
            TaskKind::WriteGeneratedAsset {
                name: VARS_CSS_NAME.to_string(),
            },
            &[VARS_CSS_NAME],
            VARS_CSS_NAME,
        )
        .with_input(self.config_input("theme"))
        .with_outputs([PathBuf::from(format!("artifacts/{}", VARS_CSS_NAME))]);
        self.push(task);
    }

    fn plan_static_assets(&mut self) {
        let busting = self.config.assets.cache_busting;
        let model = self.model;
        let mut assets: Vec<_> = model.assets.iter().collect();
        assets.sort_by(|a, b| a.source_path.cmp(&b.source_path));

        for asset in assets {
            let rel = if busting {
                with_hash_suffix(&asset.rel, &asset.hash.short())
            } else {
                asset.rel.clone()
            };
            let task = Task::new(
                TaskKind::CopyStaticFile {
                    source: asset.source_path.clone(),
                },
                &[asset.source_path.as_str()],
                &asset.source_path,
            )
            .with_input(InputDescriptor::Source {
                path: asset.source_path.clone(),
                hash: asset.hash,
            })
            .with_input(self.config_input("assets"))
            .with_outputs([PathBuf::from(format!("artifacts/{}", rel))]);
            self.push(task);
        }
    }

    fn plan_icon(&mut self) {
        let (model, config) = (self.model, self.config);
        let selected = config.site.icon.iter().find_map(|candidate| {
            model.find_asset(&format!("assets/{}", candidate.trim_start_matches('/')))
        });
        let Some(icon) = selected else {
            return;
        };

        let ext = icon
            .rel
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_else(|| "ico".to_string());
        let task = Task::new(
            TaskKind::CopySelectedIcon {
                source: icon.source_path.clone(),
            },
            &[icon.source_path.as_str()],
            &icon.source_path,
        )
        .with_input(InputDescriptor::Source {
            path: icon.source_path.clone(),
            hash: icon.hash,
        })
        .with_input(self.config_input("site"))
        .with_outputs([PathBuf::from(format!("favicon.{}", ext))]);
        self.push(task);
    }

    fn copy_original(&self, path: &str, hash: Digest) -> Task {
        Task::new(
            TaskKind::CopyStaticFile {
                source: path.to_string(),
            },
            &[path],
            path,
        )
        .with_input(InputDescriptor::Source {
            path: path.to_string(),
            hash,
        })
        .with_outputs([PathBuf::from(path)])
    }

    fn plan_images(&mut self) {
        let mut widths = self.config.media.images.widths.clone();
        widths.sort_unstable();
        widths.dedup();
        let quality = self.config.media.images.quality;

        let model = self.model;
        let referenced = self.published_media();
        let images = model
            .images
            .values()
            .filter(|image| referenced.contains(image.path.as_str()));
        for image in images {
            let original = self.copy_original(&image.path, image.hash);
            self.push(original);

            if image.is_svg() {
                continue;
            }
            let Some(source_width) = image.width else {
                continue;
            };
            let rel = image.path.strip_prefix("images/").unwrap_or(&image.path);

            for &width in widths.iter().filter(|w| **w > 0 && **w <= source_width) {
                let task = Task::new(
                    TaskKind::ScaleImageVariant {
                        source: image.path.clone(),
                        width,
                        quality,
                    },
                    &[
                        image.path.as_str(),
                        format!("w={}", width).as_str(),
                        format!("q={}", quality).as_str(),
                    ],
                    &image.path,
                )
                .with_input(InputDescriptor::Source {
                    path: image.path.clone(),
                    hash: image.hash,
                })
                .with_input(self.config_input("images"))
                .with_outputs([PathBuf::from(format!("images/_scale_{}/{}", width, rel))]);
                self.push(task);
            }
        }
    }

    fn plan_videos(&mut self) {
        let mut heights = self.config.media.video.heights.clone();
        heights.sort_unstable();
        heights.dedup();
        let at_sec = self.config.media.video.poster_time_sec;

        let model = self.model;
        let referenced = self.published_media();
        let videos = model
            .videos
            .values()
            .filter(|video| referenced.contains(video.path.as_str()));
        for video in videos {
            let original = self.copy_original(&video.path, video.hash);
            self.push(original);

            let rel = video.path.strip_prefix("video/").unwrap_or(&video.path);
            let fits = |h: u32| h > 0 && video.height.map_or(true, |source| h <= source);

            for &height in heights.iter().filter(|h| fits(**h)) {
                let task = Task::new(
                    TaskKind::TranscodeVideoVariant {
                        source: video.path.clone(),
                        height,
                    },
                    &[video.path.as_str(), format!("h={}", height).as_str()],
                    &video.path,
                )
                .with_input(InputDescriptor::Source {
                    path: video.path.clone(),
                    hash: video.hash,
                })
                .with_input(self.config_input("video"))
                .with_outputs([PathBuf::from(format!("video/_scale_{}/{}", height, rel))]);
                self.push(task);
            }

            let poster = Task::new(
                TaskKind::ExtractVideoPoster {
                    source: video.path.clone(),
                    at_sec,
                },
                &[video.path.as_str(), format!("t={}", at_sec).as_str()],
                &video.path,
            )
            .with_input(InputDescriptor::Source {
                path: video.path.clone(),
                hash: video.hash,
            })
            .with_input(self.config_input("video"))
            .with_outputs([PathBuf::from(format!(
                "video/_poster_/{}",
                with_extension(rel, "jpg")
            ))]);
            self.push(poster);
        }
    }

    fn plan_sitemap(&mut self) {
        let mut task = Task::new(TaskKind::GenerateSitemap, &[], SITEMAP_PATH)
            .with_input(self.config_input("site"))
            .with_outputs([PathBuf::from(SITEMAP_PATH)]);
        for id in &self.html_tasks {
            task.depend_on(id);
        }
        self.push(task);
    }

    fn check_collisions(&self) -> Result<(), PlanError> {
        let mut owners: BTreeMap<&PathBuf, &Task> = BTreeMap::new();
        for task in &self.tasks {
            for output in &task.outputs {
                if let Some(first) = owners.insert(output, task) {
                    let (a, b) = ordered(&first.origin, &task.origin);
                    return Err(PlanError::OutputCollision {
                        path: output.clone(),
                        first: a.to_string(),
                        second: b.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn finish(mut self) -> Result<BuildPlan, PlanError> {
        self.check_collisions()?;

        for task in &mut self.tasks {
            task.dependencies.sort();
            task.outputs.sort();
        }
        self.tasks.sort_by(|a, b| a.id.cmp(&b.id));

        let graph = DependencyGraph::from_tasks(&self.tasks)?;
        let batches = graph.levels()?;
        let edges = graph.edges();

        self.header_updates.sort_by(|a, b| {
            a.source()
                .cmp(b.source())
                .then_with(|| header_rank(a).cmp(&header_rank(b)))
        });
        self.header_updates.dedup();

        Ok(BuildPlan {
            tasks: self.tasks,
            edges,
            batches,
            header_updates: self.header_updates,
        })
    }
}

fn header_rank(update: &HeaderUpdate) -> u8 {
    match update {
        HeaderUpdate::Published { .. } => 0,
        HeaderUpdate::Part { .. } => 1,
    }
}

fn ordered<'s>(a: &'s str, b: &'s str) -> (&'s str, &'s str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Assigns series part numbers
///
/// Explicit numbers are kept; the rest continue after the highest explicit
/// number in logical-key order. Returns `(number, part, was_assigned)`.
pub fn number_parts(series: &Series) -> Result<Vec<(u32, &Page, bool)>, PlanError> {
    let mut parts: Vec<&Page> = series
        .parts
        .iter()
        .filter(|p| !p.publication.is_draft())
        .collect();
    parts.sort_by(|a, b| a.logical_key.cmp(&b.logical_key));

    let mut seen: BTreeMap<u32, &str> = BTreeMap::new();
    for part in &parts {
        if let Some(number) = part.part {
            if let Some(other) = seen.insert(number, &part.source_path) {
                return Err(PlanError::invalid(
                    &part.source_path,
                    format!("part number {} is already used by {}", number, other),
                ));
            }
        }
    }

    let mut next = seen.keys().next_back().copied().unwrap_or(0);
    let mut numbered: Vec<(u32, &Page, bool)> = parts
        .into_iter()
        .map(|part| match part.part {
            Some(number) => (number, part, false),
            None => {
                next += 1;
                (next, part, true)
            }
        })
        .collect();
    numbered.sort_by_key(|(number, _, _)| *number);
    Ok(numbered)
}

/// Navigation data every part of a series shows
fn series_nav_digest(series: &Series, numbered: &[(u32, &Page, bool)]) -> Digest {
    let mut hasher = StableHasher::new("stbl.series-nav.v1");
    hasher
        .str(&series.key)
        .str(series.index.display_title())
        .u64(numbered.len() as u64);
    for (number, part, _) in numbered {
        hasher
            .u64(u64::from(*number))
            .str(&part.logical_key)
            .str(part.display_title());
    }
    hasher.finish()
}
