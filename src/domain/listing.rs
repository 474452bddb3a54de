//! Front page and feed listings
//!
//! Ordering is fixed at planning time: sort date descending, then logical
//! key ascending so exact ties always resolve the same way.
//!
//! A series is listed once, dated by its newest published part and showing
//! up to [`LATEST_PARTS`] of its newest parts.

use std::cmp::Ordering;

use serde::Serialize;

use super::config::DateRounding;
use super::content::{ContentModel, Page, Series};
use super::id::{Digest, StableHasher};

/// Parts shown under a series entry
pub const LATEST_PARTS: usize = 3;

/// Which content item a listing entry stands for
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntrySource {
    Page { source: String },
    Series { key: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListingEntry {
    pub logical_key: String,
    pub sort_date: i64,
    pub summary: Digest,
    pub source: EntrySource,
    /// Source paths of the newest parts, newest first; empty for pages
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub latest: Vec<String>,
}

impl ListingEntry {
    pub fn from_page(page: &Page, rounding: DateRounding) -> Self {
        Self {
            logical_key: page.logical_key.clone(),
            sort_date: page.sort_date(rounding),
            summary: page.summary_digest(rounding),
            source: EntrySource::Page {
                source: page.source_path.clone(),
            },
            latest: Vec::new(),
        }
    }

    /// `None` when the series has no published part yet
    fn from_series(series: &Series, rounding: DateRounding) -> Option<Self> {
        let mut parts: Vec<&Page> = series
            .parts
            .iter()
            .filter(|p| !p.publication.is_draft())
            .collect();
        parts.sort_by(|a, b| {
            b.sort_date(rounding)
                .cmp(&a.sort_date(rounding))
                .then_with(|| a.logical_key.cmp(&b.logical_key))
        });
        let sort_date = parts.first()?.sort_date(rounding);
        parts.truncate(LATEST_PARTS);

        let mut summary = StableHasher::new("stbl.series-entry.v1");
        summary
            .digest(&series.index.summary_digest(rounding))
            .u64(parts.len() as u64);
        for part in &parts {
            summary.digest(&part.summary_digest(rounding));
        }

        Some(Self {
            logical_key: series.index.logical_key.clone(),
            sort_date,
            summary: summary.finish(),
            source: EntrySource::Series {
                key: series.key.clone(),
            },
            latest: parts.iter().map(|p| p.source_path.clone()).collect(),
        })
    }
}

/// The listing comparator
pub fn compare(a: &ListingEntry, b: &ListingEntry) -> Ordering {
    b.sort_date
        .cmp(&a.sort_date)
        .then_with(|| a.logical_key.cmp(&b.logical_key))
}

/// Every listed item in listing order
///
/// Published, non-info standalone pages and published series with at least
/// one published part. Parts are reachable through their series entry and
/// are not listed on their own.
pub fn build_listing(model: &ContentModel, rounding: DateRounding) -> Vec<ListingEntry> {
    let pages = model
        .pages
        .iter()
        .filter(|p| !p.publication.is_draft() && p.is_listed())
        .map(|p| ListingEntry::from_page(p, rounding));

    let series = model
        .series
        .iter()
        .filter(|s| !s.index.publication.is_draft() && s.index.is_listed())
        .filter_map(|s| ListingEntry::from_series(s, rounding));

    let mut entries: Vec<_> = pages.chain(series).collect();
    entries.sort_by(compare);
    entries
}

/// Splits a listing into front pages
///
/// `page_size == 0` keeps everything on one page. Always returns at least
/// one (possibly empty) page.
pub fn paginate(entries: &[ListingEntry], page_size: usize) -> Vec<&[ListingEntry]> {
    if page_size == 0 || entries.is_empty() {
        return vec![entries];
    }
    entries.chunks(page_size).collect()
}

/// Digest of an ordered listing slice
///
/// Sensitive to membership, order and every entry's summary.
pub fn aggregate_digest(label: &str, entries: &[ListingEntry]) -> Digest {
    let mut hasher = StableHasher::new("stbl.listing.v1");
    hasher.str(label).u64(entries.len() as u64);
    for entry in entries {
        hasher
            .str(&entry.logical_key)
            .i64(entry.sort_date)
            .digest(&entry.summary);
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::content::fixtures::{page, two_articles};
    use crate::domain::content::{Publication, Series, Template};

    #[test]
    fn newest_first() {
        let listing = build_listing(&two_articles(), DateRounding::None);
        let keys: Vec<_> = listing.iter().map(|e| e.logical_key.as_str()).collect();
        assert_eq!(keys, vec!["second", "first"]);
    }

    #[test]
    fn ties_break_on_logical_key() {
        let mut model = ContentModel::default();
        model.pages = vec![page("b", 100), page("a", 100), page("c", 100)];

        let listing = build_listing(&model, DateRounding::None);
        let keys: Vec<_> = listing.iter().map(|e| e.logical_key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn rounding_creates_ties() {
        let mut model = ContentModel::default();
        model.pages = vec![page("late", 86_400 + 500), page("early", 86_400 + 10)];

        let raw = build_listing(&model, DateRounding::None);
        assert_eq!(raw[0].logical_key, "late");

        let rounded = build_listing(&model, DateRounding::Day);
        assert_eq!(rounded[0].logical_key, "early");
    }

    #[test]
    fn drafts_info_pages_and_intro_are_excluded() {
        let mut model = two_articles();
        let mut draft = page("draft", 5);
        draft.publication = Publication::Draft;
        let mut about = page("about", 5);
        about.template = Template::Info;
        model.pages.push(draft);
        model.pages.push(about);

        let listing = build_listing(&model, DateRounding::None);
        assert_eq!(listing.len(), 2);
        assert!(listing.iter().all(|e| e.logical_key != "index"));
    }

    #[test]
    fn series_are_listed_by_their_index() {
        let mut model = ContentModel::default();
        let mut index = page("guide", 300);
        index.source_path = "articles/guide/index.md".to_string();
        model.series.push(Series {
            key: "guide".to_string(),
            index,
            parts: vec![page("guide/one", 400)],
        });

        let listing = build_listing(&model, DateRounding::None);
        assert_eq!(listing.len(), 1);
        assert_eq!(
            listing[0].source,
            EntrySource::Series {
                key: "guide".to_string()
            }
        );
        assert_eq!(listing[0].latest, vec!["articles/guide/one.md"]);
    }

    fn guide(index_date: i64, parts: Vec<Page>) -> Series {
        let mut index = page("guide", index_date);
        index.source_path = "articles/guide/index.md".to_string();
        Series {
            key: "guide".to_string(),
            index,
            parts,
        }
    }

    #[test]
    fn series_sorts_by_newest_part() {
        let mut model = ContentModel::default();
        model.pages = vec![page("old", 100), page("recent", 500_000)];
        model
            .series
            .push(guide(10, vec![page("guide/one", 50), page("guide/two", 1_000_000)]));

        let listing = build_listing(&model, DateRounding::None);
        let keys: Vec<_> = listing.iter().map(|e| e.logical_key.as_str()).collect();
        assert_eq!(keys, vec!["guide", "recent", "old"]);
        assert_eq!(listing[0].sort_date, 1_000_000);
        assert_eq!(
            listing[0].latest,
            vec!["articles/guide/two.md", "articles/guide/one.md"]
        );
    }

    #[test]
    fn series_without_published_parts_is_not_listed() {
        let mut draft = page("guide/one", 400);
        draft.publication = Publication::Draft;
        let mut model = ContentModel::default();
        model.series.push(guide(300, vec![draft]));
        model.series.push(Series {
            key: "empty".to_string(),
            ..guide(300, Vec::new())
        });

        assert!(build_listing(&model, DateRounding::None).is_empty());
    }

    #[test]
    fn series_entry_tracks_shown_parts_only() {
        let parts: Vec<Page> = (1..=4)
            .map(|i| page(&format!("guide/p{i}"), i * 100))
            .collect();
        let mut model = ContentModel::default();
        model.series.push(guide(10, parts));
        let before = build_listing(&model, DateRounding::None)[0].summary;

        // p1 is the oldest and falls outside the latest parts
        model.series[0].parts[0].title = Some("Renamed".to_string());
        assert_eq!(build_listing(&model, DateRounding::None)[0].summary, before);

        model.series[0].parts[3].title = Some("Renamed".to_string());
        assert_ne!(build_listing(&model, DateRounding::None)[0].summary, before);
    }

    #[test]
    fn pagination() {
        let mut model = ContentModel::default();
        model.pages = (0..5).map(|i| page(&format!("p{i}"), i)).collect();
        let listing = build_listing(&model, DateRounding::None);

        let pages = paginate(&listing, 2);
        assert_eq!(pages.iter().map(|p| p.len()).collect::<Vec<_>>(), vec![2, 2, 1]);

        assert_eq!(paginate(&listing, 0).len(), 1);
        assert_eq!(paginate(&[], 2).len(), 1);
    }

    #[test]
    fn aggregate_digest_tracks_order() {
        let listing = build_listing(&two_articles(), DateRounding::None);
        let mut reversed = listing.clone();
        reversed.reverse();
        assert_ne!(
            aggregate_digest("front", &listing),
            aggregate_digest("front", &reversed)
        );
    }
}
