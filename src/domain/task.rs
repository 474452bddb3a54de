//! Task and build plan model
//!
//! A task is one cacheable unit of build work: a closed `TaskKind`, the
//! inputs it reads, the exact output paths it writes, and the tasks that must
//! finish first. A `BuildPlan` is the complete, immutable task set for one
//! build invocation.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use serde::Serialize;

use super::id::{Digest, TaskId};

/// What a task produces
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskKind {
    RenderPage {
        source: String,
    },
    RenderSeriesIndex {
        series: String,
    },
    /// `tag: None` is the index of all tags
    RenderTagPage {
        tag: Option<String>,
    },
    RenderFrontpage {
        page: u32,
    },
    GenerateFeed,
    GenerateSitemap,
    WriteGeneratedAsset {
        name: String,
    },
    CopyStaticFile {
        source: String,
    },
    ScaleImageVariant {
        source: String,
        width: u32,
        quality: u8,
    },
    TranscodeVideoVariant {
        source: String,
        height: u32,
    },
    ExtractVideoPoster {
        source: String,
        at_sec: u32,
    },
    CopySelectedIcon {
        source: String,
    },
}

impl TaskKind {
    /// Human-readable kind label (DOT labels, reports)
    pub fn label(&self) -> &'static str {
        match self {
            TaskKind::RenderPage { .. } => "RenderPage",
            TaskKind::RenderSeriesIndex { .. } => "RenderSeriesIndex",
            TaskKind::RenderTagPage { .. } => "RenderTagPage",
            TaskKind::RenderFrontpage { .. } => "RenderFrontpage",
            TaskKind::GenerateFeed => "GenerateFeed",
            TaskKind::GenerateSitemap => "GenerateSitemap",
            TaskKind::WriteGeneratedAsset { .. } => "WriteGeneratedAsset",
            TaskKind::CopyStaticFile { .. } => "CopyStaticFile",
            TaskKind::ScaleImageVariant { .. } => "ScaleImageVariant",
            TaskKind::TranscodeVideoVariant { .. } => "TranscodeVideoVariant",
            TaskKind::ExtractVideoPoster { .. } => "ExtractVideoPoster",
            TaskKind::CopySelectedIcon { .. } => "CopySelectedIcon",
        }
    }

    /// Snake-case tag used as the task ID prefix
    pub fn id_tag(&self) -> &'static str {
        match self {
            TaskKind::RenderPage { .. } => "render_page",
            TaskKind::RenderSeriesIndex { .. } => "render_series",
            TaskKind::RenderTagPage { tag: Some(_) } => "render_tag",
            TaskKind::RenderTagPage { tag: None } => "render_tags_index",
            TaskKind::RenderFrontpage { .. } => "render_frontpage",
            TaskKind::GenerateFeed => "generate_feed",
            TaskKind::GenerateSitemap => "generate_sitemap",
            TaskKind::WriteGeneratedAsset { .. } => "generate_asset",
            TaskKind::CopyStaticFile { .. } => "copy_static",
            TaskKind::ScaleImageVariant { .. } => "img_scale",
            TaskKind::TranscodeVideoVariant { .. } => "vid_scale",
            TaskKind::ExtractVideoPoster { .. } => "vid_poster",
            TaskKind::CopySelectedIcon { .. } => "copy_icon",
        }
    }

    /// Output format version of this kind
    ///
    /// Bump a kind's number when its backend output changes shape; every
    /// cached instance of that kind then misses once.
    pub fn format_version(&self) -> u32 {
        match self {
            TaskKind::RenderPage { .. } => 1,
            TaskKind::RenderSeriesIndex { .. } => 1,
            TaskKind::RenderTagPage { .. } => 1,
            TaskKind::RenderFrontpage { .. } => 1,
            TaskKind::GenerateFeed => 1,
            TaskKind::GenerateSitemap => 1,
            TaskKind::WriteGeneratedAsset { .. } => 1,
            TaskKind::CopyStaticFile { .. } => 1,
            TaskKind::ScaleImageVariant { .. } => 1,
            TaskKind::TranscodeVideoVariant { .. } => 1,
            TaskKind::ExtractVideoPoster { .. } => 1,
            TaskKind::CopySelectedIcon { .. } => 1,
        }
    }

    /// Expensive media transcodes that honor the cache under force-regenerate
    pub fn is_media(&self) -> bool {
        matches!(
            self,
            TaskKind::ScaleImageVariant { .. }
                | TaskKind::TranscodeVideoVariant { .. }
                | TaskKind::ExtractVideoPoster { .. }
        )
    }

    /// Hashable parameter set, sorted by name
    pub fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = match self {
            TaskKind::RenderPage { source } => vec![("source", source.clone())],
            TaskKind::RenderSeriesIndex { series } => vec![("series", series.clone())],
            TaskKind::RenderTagPage { tag } => {
                vec![("tag", tag.clone().unwrap_or_default())]
            }
            TaskKind::RenderFrontpage { page } => vec![("page", page.to_string())],
            TaskKind::GenerateFeed | TaskKind::GenerateSitemap => Vec::new(),
            TaskKind::WriteGeneratedAsset { name } => vec![("name", name.clone())],
            TaskKind::CopyStaticFile { source } | TaskKind::CopySelectedIcon { source } => {
                vec![("source", source.clone())]
            }
            TaskKind::ScaleImageVariant {
                source,
                width,
                quality,
            } => vec![
                ("source", source.clone()),
                ("width", width.to_string()),
                ("quality", quality.to_string()),
            ],
            TaskKind::TranscodeVideoVariant { source, height } => {
                vec![("source", source.clone()), ("height", height.to_string())]
            }
            TaskKind::ExtractVideoPoster { source, at_sec } => {
                vec![("source", source.clone()), ("at_sec", at_sec.to_string())]
            }
        };
        params.sort();
        params
    }
}

/// One input a task reads
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputDescriptor {
    /// A source file and its content hash
    Source { path: String, hash: Digest },
    /// A named configuration fragment
    Config { fragment: String, hash: Digest },
    /// Another task's logical result
    Dependency { task: TaskId },
    /// A planning-time aggregate (sorted listing, series navigation)
    Aggregate { label: String, hash: Digest },
}

/// One unit of buildable work
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    /// The content item this task was planned for (for error reports)
    pub origin: String,
    pub inputs: Vec<InputDescriptor>,
    /// Exact files this task writes, relative to the output root
    pub outputs: Vec<PathBuf>,
    /// Task IDs that must succeed first, sorted
    pub dependencies: Vec<TaskId>,
    /// What dependents see of this task; `None` means its fingerprint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logical_result: Option<Digest>,
}

impl Task {
    pub fn new(kind: TaskKind, identity: &[&str], origin: impl Into<String>) -> Self {
        Self {
            id: TaskId::new(kind.id_tag(), identity),
            kind,
            origin: origin.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            dependencies: Vec::new(),
            logical_result: None,
        }
    }

    pub fn with_input(mut self, input: InputDescriptor) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn with_outputs(mut self, outputs: impl IntoIterator<Item = PathBuf>) -> Self {
        self.outputs.extend(outputs);
        self
    }

    pub fn with_logical_result(mut self, digest: Digest) -> Self {
        self.logical_result = Some(digest);
        self
    }

    /// Declares a dependency, mirrored as an input descriptor
    pub fn depend_on(&mut self, task: &TaskId) {
        if !self.dependencies.contains(task) {
            self.dependencies.push(task.clone());
            self.inputs
                .push(InputDescriptor::Dependency { task: task.clone() });
        }
    }
}

/// Header fields assigned during planning, applied by write-back
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "field", rename_all = "snake_case")]
pub enum HeaderUpdate {
    /// Stamp `published` with the build time
    Published { source: String },
    /// Record an assigned series part number
    Part { source: String, number: u32 },
}

impl HeaderUpdate {
    pub fn source(&self) -> &str {
        match self {
            HeaderUpdate::Published { source } | HeaderUpdate::Part { source, .. } => source,
        }
    }
}

/// The complete task DAG for one build
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildPlan {
    /// Sorted by task ID
    pub tasks: Vec<Task>,
    /// `(dependency, dependent)`, sorted
    pub edges: Vec<(TaskId, TaskId)>,
    /// Topological levels; every task's dependencies sit in earlier batches
    pub batches: Vec<Vec<TaskId>>,
    pub header_updates: Vec<HeaderUpdate>,
}

impl BuildPlan {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks
            .binary_search_by(|t| t.id.cmp(id))
            .ok()
            .map(|i| &self.tasks[i])
    }

    /// Task ID to position in `tasks`
    pub fn index(&self) -> HashMap<&TaskId, usize> {
        self.tasks.iter().enumerate().map(|(i, t)| (&t.id, i)).collect()
    }

    pub fn output_count(&self) -> usize {
        self.tasks.iter().map(|t| t.outputs.len()).sum()
    }

    /// Every declared output path
    pub fn declared_outputs(&self) -> BTreeSet<PathBuf> {
        self.tasks
            .iter()
            .flat_map(|t| t.outputs.iter().cloned())
            .collect()
    }

    /// Number of tasks per kind label
    pub fn kind_counts(&self) -> Vec<(&'static str, usize)> {
        let mut counts: std::collections::BTreeMap<&'static str, usize> = Default::default();
        for task in &self.tasks {
            *counts.entry(task.kind.label()).or_default() += 1;
        }
        counts.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_are_sorted() {
        let kind = TaskKind::ScaleImageVariant {
            source: "images/a.jpg".to_string(),
            width: 640,
            quality: 85,
        };
        let names: Vec<_> = kind.params().into_iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["quality", "source", "width"]);
    }

    #[test]
    fn media_kinds() {
        assert!(TaskKind::ScaleImageVariant {
            source: String::new(),
            width: 1,
            quality: 1
        }
        .is_media());
        assert!(TaskKind::ExtractVideoPoster {
            source: String::new(),
            at_sec: 1
        }
        .is_media());
        assert!(!TaskKind::CopyStaticFile {
            source: String::new()
        }
        .is_media());
        assert!(!TaskKind::GenerateFeed.is_media());
    }

    #[test]
    fn tag_index_has_its_own_id_tag() {
        assert_eq!(TaskKind::RenderTagPage { tag: None }.id_tag(), "render_tags_index");
        assert_eq!(
            TaskKind::RenderTagPage {
                tag: Some("rust".to_string())
            }
            .id_tag(),
            "render_tag"
        );
    }

    #[test]
    fn depend_on_is_idempotent() {
        let dep = TaskId::new("render_page", &["a"]);
        let mut task = Task::new(TaskKind::GenerateFeed, &[], "feed");
        task.depend_on(&dep);
        task.depend_on(&dep);

        assert_eq!(task.dependencies, vec![dep.clone()]);
        assert_eq!(task.inputs, vec![InputDescriptor::Dependency { task: dep }]);
    }

    #[test]
    fn plan_lookup_by_id() {
        let mut tasks = vec![
            Task::new(TaskKind::GenerateSitemap, &[], "sitemap"),
            Task::new(TaskKind::GenerateFeed, &[], "feed"),
        ];
        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        let plan = BuildPlan {
            tasks,
            ..Default::default()
        };

        let feed_id = TaskId::new("generate_feed", &[]);
        assert_eq!(plan.get(&feed_id).map(|t| t.origin.as_str()), Some("feed"));
        assert!(plan.get(&TaskId::new("nope", &[])).is_none());
    }
}
