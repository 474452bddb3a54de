//! Domain models for stbl
//!
//! Content, tasks, the dependency graph, fingerprints and the planner.
//! Nothing in here touches the filesystem or the clock.

mod config;
mod content;
mod dot;
mod fingerprint;
mod graph;
mod id;
mod listing;
mod paths;
mod planner;
mod task;
mod verify;

pub use config::{
    hash_fragment, AssetsSection, BlogSection, BuildSection, ConfigHashes, DateRounding,
    FailurePolicy, ImagesSection, MediaSection, RssSection, SiteConfig, SiteSection,
    ThemeSection, UrlStyle, VideoSection,
};
pub use content::{
    tag_slug, ContentIssue, ContentModel, ImageSource, Page, Publication, Series, StaticFile,
    Template, VideoSource,
};
pub use dot::to_dot;
pub use fingerprint::{fingerprint, logical_result, FingerprintError, FINGERPRINT_DOMAIN};
pub use graph::{DependencyGraph, GraphError};
pub use id::{Digest, IdError, StableHasher, TaskId};
pub use listing::{
    aggregate_digest, build_listing, paginate, EntrySource, ListingEntry, LATEST_PARTS,
};
pub use paths::{frontpage_key, with_extension, with_hash_suffix, PathMapper, PathMapping};
pub use planner::{number_parts, plan, PlanError, FEED_PATH, SITEMAP_PATH, VARS_CSS_NAME};
pub use task::{BuildPlan, HeaderUpdate, InputDescriptor, Task, TaskKind};
pub use verify::{Finding, Severity, VerifyReport};

#[cfg(test)]
pub(crate) use content::fixtures;
