//! Pre-build checks
//!
//! Everything planning would reject becomes an error; problems a build
//! tolerates become warnings. Nothing here executes tasks.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use super::config::SiteConfig;
use super::content::{tag_slug, ContentModel};
use super::planner::{plan, PlanError};
use super::task::HeaderUpdate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub severity: Severity,
    /// Source path or config file the finding is about
    pub item: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VerifyReport {
    pub findings: Vec<Finding>,
    /// Task count of the plan, when planning succeeded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tasks: Option<usize>,
    /// Documents with `published: false`
    pub drafts: usize,
    /// Documents write-back would touch
    pub pending_headers: usize,
}

impl VerifyReport {
    pub fn error(&mut self, item: impl Into<String>, message: impl Into<String>) {
        self.push(Severity::Error, item.into(), message.into());
    }

    pub fn warn(&mut self, item: impl Into<String>, message: impl Into<String>) {
        self.push(Severity::Warning, item.into(), message.into());
    }

    fn push(&mut self, severity: Severity, item: String, message: String) {
        self.findings.push(Finding {
            severity,
            item,
            message,
        });
    }

    pub fn errors(&self) -> usize {
        self.count(Severity::Error)
    }

    pub fn warnings(&self) -> usize {
        self.count(Severity::Warning)
    }

    fn count(&self, severity: Severity) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity == severity)
            .count()
    }

    /// `strict` turns warnings into failures
    pub fn passes(&self, strict: bool) -> bool {
        self.errors() == 0 && (!strict || self.warnings() == 0)
    }

    /// Checks one content snapshot against a config
    ///
    /// Loader issues are all reported; the plan is only attempted when
    /// there are none, since it would stop at the first.
    pub fn check(&mut self, model: &ContentModel, config: &SiteConfig) {
        for issue in &model.issues {
            self.error(&issue.item, &issue.reason);
        }
        self.drafts = model
            .all_pages()
            .filter(|p| p.publication.is_draft())
            .count();

        check_tag_spellings(self, model);
        check_stray_part_numbers(self, model);

        if model.issues.is_empty() {
            match plan(model, config) {
                Ok(plan) => {
                    self.tasks = Some(plan.len());
                    let sources: BTreeSet<&str> =
                        plan.header_updates.iter().map(HeaderUpdate::source).collect();
                    self.pending_headers = sources.len();
                }
                Err(PlanError::InvalidContent { item, reason }) => self.error(item, reason),
                Err(PlanError::OutputCollision {
                    path,
                    first,
                    second,
                }) => self.error(
                    first,
                    format!("{} also produces {}", second, path.display()),
                ),
                Err(other) => self.error("plan", other.to_string()),
            }
        }

        self.findings.sort_by(|a, b| {
            a.severity
                .cmp(&b.severity)
                .then_with(|| a.item.cmp(&b.item))
                .then_with(|| a.message.cmp(&b.message))
        });
    }
}

/// Tags whose spellings differ but share a slug end up on one tag page
fn check_tag_spellings(report: &mut VerifyReport, model: &ContentModel) {
    let mut spellings: BTreeMap<String, BTreeMap<&str, Vec<&str>>> = BTreeMap::new();
    for page in model.all_pages().filter(|p| !p.publication.is_draft()) {
        for tag in &page.tags {
            spellings
                .entry(tag_slug(tag))
                .or_default()
                .entry(tag.as_str())
                .or_default()
                .push(page.source_path.as_str());
        }
    }

    for (slug, variants) in spellings {
        if variants.len() < 2 {
            continue;
        }
        let listed: Vec<String> = variants
            .iter()
            .map(|(tag, pages)| format!("{:?} in {}", tag, pages.join(", ")))
            .collect();
        report.warn(
            format!("tags/{}", slug),
            format!("tag spelled differently: {}", listed.join("; ")),
        );
    }
}

fn check_stray_part_numbers(report: &mut VerifyReport, model: &ContentModel) {
    for page in model.pages.iter().filter(|p| p.part.is_some()) {
        report.warn(
            &page.source_path,
            "part number is set but the page is not in a series",
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::content::fixtures::{page, two_articles};
    use crate::domain::content::{ContentIssue, Publication};

    #[test]
    fn clean_site_passes() {
        let mut report = VerifyReport::default();
        report.check(&two_articles(), &SiteConfig::default());

        assert!(report.findings.is_empty());
        assert_eq!(report.tasks, Some(6));
        assert!(report.passes(true));
    }

    #[test]
    fn every_loader_issue_is_reported() {
        let mut model = two_articles();
        for item in ["articles/b.md", "articles/a.md"] {
            model.issues.push(ContentIssue {
                item: item.to_string(),
                reason: "malformed front matter".to_string(),
            });
        }

        let mut report = VerifyReport::default();
        report.check(&model, &SiteConfig::default());

        assert_eq!(report.errors(), 2);
        assert_eq!(report.findings[0].item, "articles/a.md");
        assert_eq!(report.tasks, None);
        assert!(!report.passes(false));
    }

    #[test]
    fn plan_errors_are_findings() {
        let mut model = two_articles();
        model.pages[1].media = vec!["images/gone.png".to_string()];

        let mut report = VerifyReport::default();
        report.check(&model, &SiteConfig::default());

        assert_eq!(
            report.findings,
            vec![Finding {
                severity: Severity::Error,
                item: "articles/second.md".to_string(),
                message: "references missing media file images/gone.png".to_string(),
            }]
        );
    }

    #[test]
    fn warnings_only_fail_strict_runs() {
        let mut model = two_articles();
        model.pages[0].tags = vec!["Rust".to_string()];
        model.pages[1].tags = vec!["rust".to_string()];
        let mut numbered = page("loose", 5);
        numbered.part = Some(2);
        model.pages.push(numbered);

        let mut report = VerifyReport::default();
        report.check(&model, &SiteConfig::default());

        assert_eq!(report.errors(), 0);
        assert_eq!(report.warnings(), 2);
        assert_eq!(report.findings[1].item, "tags/rust");
        assert!(report.passes(false));
        assert!(!report.passes(true));
    }

    #[test]
    fn counts_drafts_and_pending_headers() {
        let mut model = two_articles();
        model.pages[0].publication = Publication::Draft;
        model.pages[1].publication = Publication::Unstamped;

        let mut report = VerifyReport::default();
        report.check(&model, &SiteConfig::default());

        assert_eq!(report.drafts, 1);
        assert_eq!(report.pending_headers, 1);
    }
}
