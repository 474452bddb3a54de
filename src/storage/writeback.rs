//! Header write-back
//!
//! Planning may assign values that belong in a document's front matter: a
//! publish stamp for pages without one, a part number for series parts
//! without one. Write-back persists them after a successful build. It runs
//! outside the task graph because it edits inputs, not outputs.
//!
//! Edits only fill in missing values; anything already set is left alone.
//! The header is edited line by line, so comments, key order and quoting
//! survive. The body is preserved byte for byte.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_yaml::{Mapping, Value};

use super::content::split_front_matter;
use crate::domain::HeaderUpdate;

/// Distinct documents the updates would touch, sorted
pub fn pending_documents(updates: &[HeaderUpdate]) -> Vec<&str> {
    let mut sources: Vec<&str> = updates.iter().map(HeaderUpdate::source).collect();
    sources.sort_unstable();
    sources.dedup();
    sources
}

/// Applies header updates under `root`, returning how many files changed
///
/// `now` is the stamp written into `published`.
pub fn apply_header_updates(
    root: &Path,
    updates: &[HeaderUpdate],
    now: DateTime<Utc>,
) -> Result<usize> {
    let stamp = now.to_rfc3339_opts(SecondsFormat::Secs, true);

    let mut by_source: BTreeMap<&str, Vec<&HeaderUpdate>> = BTreeMap::new();
    for update in updates {
        by_source.entry(update.source()).or_default().push(update);
    }

    let mut modified = 0;
    for (source, edits) in by_source {
        let path = root.join(source);
        if edit_document(&path, &edits, &stamp)? {
            tracing::info!(document = source, "updated front matter");
            modified += 1;
        }
    }
    Ok(modified)
}

fn edit_document(path: &Path, edits: &[&HeaderUpdate], stamp: &str) -> Result<bool> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let (yaml, body) =
        split_front_matter(&raw).map_err(|reason| anyhow!("{}: {}", path.display(), reason))?;

    let header: Mapping = match yaml {
        Some(yaml) if !yaml.trim().is_empty() => serde_yaml::from_str(yaml)
            .with_context(|| format!("Failed to parse front matter in {}", path.display()))?,
        _ => Mapping::new(),
    };

    let mut fields: Vec<(&str, String)> = Vec::new();
    for edit in edits {
        match edit {
            HeaderUpdate::Published { .. } => {
                let unset = matches!(
                    header.get("published"),
                    None | Some(Value::Null) | Some(Value::Bool(true))
                );
                if unset {
                    fields.push(("published", stamp.to_string()));
                }
            }
            HeaderUpdate::Part { number, .. } => {
                if matches!(header.get("part"), None | Some(Value::Null)) {
                    fields.push(("part", number.to_string()));
                }
            }
        }
    }
    if fields.is_empty() {
        return Ok(false);
    }

    let content = set_header_fields(&raw, yaml.map(|yaml| (yaml, body)), &fields);

    let temp_path = path.with_extension("md.tmp");
    fs::write(&temp_path, content)
        .with_context(|| format!("Failed to write temp file: {}", temp_path.display()))?;
    fs::rename(&temp_path, path).with_context(|| {
        format!(
            "Failed to rename {} to {}",
            temp_path.display(),
            path.display()
        )
    })?;
    Ok(true)
}

/// Rewrites `raw` with each `key: value` set in its front matter
///
/// `split` is the header text and body as split from `raw`. An existing
/// top-level line for a key is replaced in place; other keys are appended
/// before the closing delimiter. Documents without a header get a new one.
fn set_header_fields(raw: &str, split: Option<(&str, &str)>, fields: &[(&str, String)]) -> String {
    let Some((yaml, body)) = split else {
        let (bom, text) = match raw.strip_prefix('\u{feff}') {
            Some(text) => ("\u{feff}", text),
            None => ("", raw),
        };
        let lines: String = fields
            .iter()
            .map(|(key, value)| format!("{}: {}\n", key, value))
            .collect();
        return format!("{}---\n{}---\n{}", bom, lines, text);
    };

    // The header sits directly before the closing delimiter line
    let head = &raw[..raw.len() - body.len()];
    let closing_start = head
        .trim_end_matches(['\n', '\r'])
        .rfind('\n')
        .map_or(0, |i| i + 1);
    let yaml_start = closing_start.saturating_sub(yaml.len());

    let eol = if head.contains("\r\n") { "\r\n" } else { "\n" };
    let mut lines: Vec<String> = yaml.split_inclusive('\n').map(str::to_string).collect();
    for (key, value) in fields {
        let line = format!("{}: {}{}", key, value, eol);
        match lines.iter().position(|l| is_key_line(l, key)) {
            Some(i) => lines[i] = line,
            None => {
                if let Some(last) = lines.last_mut().filter(|l| !l.ends_with('\n')) {
                    last.push_str(eol);
                }
                lines.push(line);
            }
        }
    }

    let mut out = String::with_capacity(raw.len() + 64);
    out.push_str(&raw[..yaml_start]);
    out.extend(lines);
    out.push_str(&raw[closing_start..]);
    out
}

/// A top-level `key:` line, not an indented or commented one
fn is_key_line(line: &str, key: &str) -> bool {
    line.strip_prefix(key)
        .is_some_and(|rest| rest.trim_start_matches([' ', '\t']).starts_with(':'))
}
