//! Task fingerprints
//!
//! A pure function over already-resolved inputs. Input descriptors are
//! grouped and sorted before hashing, so the order the planner happened to
//! push them in never matters; only their values do.

use std::collections::HashMap;

use thiserror::Error;

use super::id::{Digest, StableHasher, TaskId};
use super::task::{InputDescriptor, Task};

/// Domain separation for the whole fingerprint scheme
///
/// Changing this invalidates every cached task at once.
pub const FINGERPRINT_DOMAIN: &str = "stbl.fingerprint.v1";

#[derive(Debug, Error, PartialEq)]
pub enum FingerprintError {
    #[error("Dependency {dependency} of {task} has no result yet")]
    UnresolvedDependency { task: TaskId, dependency: TaskId },
}

/// Computes a task's fingerprint
///
/// `dependency_results` maps each completed dependency to its logical result
/// digest. Every dependency the task declares must be present.
pub fn fingerprint(
    task: &Task,
    dependency_results: &HashMap<TaskId, Digest>,
) -> Result<Digest, FingerprintError> {
    let mut sources: Vec<(&str, &Digest)> = Vec::new();
    let mut configs: Vec<(&str, &Digest)> = Vec::new();
    let mut aggregates: Vec<(&str, &Digest)> = Vec::new();
    let mut dependencies: Vec<(&TaskId, Digest)> = Vec::new();

    for input in &task.inputs {
        match input {
            InputDescriptor::Source { path, hash } => sources.push((path, hash)),
            InputDescriptor::Config { fragment, hash } => configs.push((fragment, hash)),
            InputDescriptor::Aggregate { label, hash } => aggregates.push((label, hash)),
            InputDescriptor::Dependency { task: dep } => {
                let result = dependency_results.get(dep).ok_or_else(|| {
                    FingerprintError::UnresolvedDependency {
                        task: task.id.clone(),
                        dependency: dep.clone(),
                    }
                })?;
                dependencies.push((dep, *result));
            }
        }
    }

    sources.sort();
    sources.dedup();
    configs.sort();
    configs.dedup();
    aggregates.sort();
    aggregates.dedup();
    dependencies.sort();
    dependencies.dedup();

    let mut hasher = StableHasher::new(FINGERPRINT_DOMAIN);
    hasher
        .str(task.kind.label())
        .u64(u64::from(task.kind.format_version()))
        .str(&task.id.to_string());

    let params = task.kind.params();
    hasher.u64(params.len() as u64);
    for (name, value) in &params {
        hasher.str(name).str(value);
    }

    let mut outputs: Vec<_> = task.outputs.iter().map(|p| p.to_string_lossy()).collect();
    outputs.sort();
    hasher.u64(outputs.len() as u64);
    for output in &outputs {
        hasher.str(output);
    }

    let sections = [
        ("source", &sources),
        ("config", &configs),
        ("aggregate", &aggregates),
    ];
    for (section, entries) in sections {
        hasher.str(section).u64(entries.len() as u64);
        for (name, digest) in entries.iter() {
            hasher.str(name).digest(digest);
        }
    }

    hasher.str("dependency").u64(dependencies.len() as u64);
    for (id, digest) in &dependencies {
        hasher.str(&id.to_string()).digest(digest);
    }

    Ok(hasher.finish())
}

/// What a completed task exposes to its dependents
pub fn logical_result(task: &Task, fingerprint: Digest) -> Digest {
    task.logical_result.unwrap_or(fingerprint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::task::TaskKind;
    use proptest::prelude::*;
    use std::path::PathBuf;

    fn page_task(body: &str) -> Task {
        Task::new(
            TaskKind::RenderPage {
                source: "articles/a.md".to_string(),
            },
            &["a"],
            "articles/a.md",
        )
        .with_input(InputDescriptor::Source {
            path: "articles/a.md".to_string(),
            hash: Digest::of(body.as_bytes()),
        })
        .with_input(InputDescriptor::Config {
            fragment: "site".to_string(),
            hash: Digest::of(b"site"),
        })
        .with_outputs([PathBuf::from("a.html")])
    }

    #[test]
    fn same_inputs_same_fingerprint() {
        let results = HashMap::new();
        assert_eq!(
            fingerprint(&page_task("x"), &results).unwrap(),
            fingerprint(&page_task("x"), &results).unwrap()
        );
    }

    #[test]
    fn source_change_changes_fingerprint() {
        let results = HashMap::new();
        assert_ne!(
            fingerprint(&page_task("x"), &results).unwrap(),
            fingerprint(&page_task("y"), &results).unwrap()
        );
    }

    #[test]
    fn output_set_is_part_of_fingerprint() {
        let results = HashMap::new();
        let plain = page_task("x");
        let with_stub = page_task("x").with_outputs([PathBuf::from("a/index.html")]);
        assert_ne!(
            fingerprint(&plain, &results).unwrap(),
            fingerprint(&with_stub, &results).unwrap()
        );
    }

    #[test]
    fn dependency_result_feeds_fingerprint() {
        let dep = TaskId::new("render_page", &["dep"]);
        let mut feed = Task::new(TaskKind::GenerateFeed, &[], "feed");
        feed.depend_on(&dep);

        let mut results = HashMap::new();
        results.insert(dep.clone(), Digest::of(b"summary-1"));
        let first = fingerprint(&feed, &results).unwrap();

        results.insert(dep.clone(), Digest::of(b"summary-2"));
        let second = fingerprint(&feed, &results).unwrap();

        assert_ne!(first, second);
    }

    #[test]
    fn missing_dependency_result_is_an_error() {
        let dep = TaskId::new("render_page", &["dep"]);
        let mut feed = Task::new(TaskKind::GenerateFeed, &[], "feed");
        feed.depend_on(&dep);

        let err = fingerprint(&feed, &HashMap::new()).unwrap_err();
        assert_eq!(
            err,
            FingerprintError::UnresolvedDependency {
                task: feed.id.clone(),
                dependency: dep,
            }
        );
    }

    #[test]
    fn logical_result_prefers_summary() {
        let fp = Digest::of(b"fp");
        let summary = Digest::of(b"summary");
        assert_eq!(logical_result(&page_task("x"), fp), fp);
        assert_eq!(
            logical_result(&page_task("x").with_logical_result(summary), fp),
            summary
        );
    }

    proptest! {
        #[test]
        fn input_order_does_not_matter(
            names in proptest::collection::btree_set("[a-z]{1,8}", 1..8),
            seed in any::<u64>(),
        ) {
            let inputs: Vec<InputDescriptor> = names
                .iter()
                .map(|n| InputDescriptor::Aggregate {
                    label: n.clone(),
                    hash: Digest::of(n.as_bytes()),
                })
                .collect();

            let mut shuffled = inputs.clone();
            // Deterministic rotation derived from the seed
            let len = shuffled.len();
            shuffled.rotate_left((seed as usize) % len);
            shuffled.reverse();

            let mut a = Task::new(TaskKind::GenerateSitemap, &[], "sitemap");
            a.inputs = inputs;
            let mut b = Task::new(TaskKind::GenerateSitemap, &[], "sitemap");
            b.inputs = shuffled;

            let results = HashMap::new();
            prop_assert_eq!(
                fingerprint(&a, &results).unwrap(),
                fingerprint(&b, &results).unwrap()
            );
        }

        #[test]
        fn aggregate_value_change_is_detected(
            label in "[a-z]{1,8}",
            a in any::<u64>(),
            b in any::<u64>()
        ) {
            prop_assume!(a != b);
            let make = |v: u64| {
                let mut t = Task::new(TaskKind::GenerateSitemap, &[], "sitemap");
                t.inputs = vec![InputDescriptor::Aggregate {
                    label: label.clone(),
                    hash: Digest::of(&v.to_le_bytes()),
                }];
                t
            };
            let results = HashMap::new();
            prop_assert_ne!(
                fingerprint(&make(a), &results).unwrap(),
                fingerprint(&make(b), &results).unwrap()
            );
        }
    }
}
