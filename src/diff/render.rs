//! Diff renderers: text, json, annotation, compact.
//!
//! Value masking is on by default: scalars render as
//! `<length>:<first>…<last>`. `show_values` opts out.

use serde::{Deserialize, Serialize};

use super::{DiffEntry, DiffKind, DiffSummary};
use crate::merge::SecretTree;

const ANSI_GREEN: &str = "\x1b[32m";
const ANSI_RED: &str = "\x1b[31m";
const ANSI_YELLOW: &str = "\x1b[33m";
const ANSI_RESET: &str = "\x1b[0m";

/// Output format for rendered diffs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum, Default)]
#[serde(rename_all = "snake_case")]
pub enum DiffFormat {
    /// ANSI-colored, one block per entry with values
    #[default]
    Text,
    /// Stable machine-readable schema with summary and entries
    Json,
    /// One machine-format annotation line per entry
    Annotation,
    /// One line per entry, no values
    Compact,
}

/// Rendering options
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub format: DiffFormat,
    /// Disable value masking
    pub show_values: bool,
    /// Emit ANSI colors (text format only)
    pub color: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self { format: DiffFormat::Text, show_values: false, color: true }
    }
}

/// Render a diff in the requested format
pub fn render(entries: &[DiffEntry], options: &RenderOptions) -> String {
    match options.format {
        DiffFormat::Text => render_text(entries, options),
        DiffFormat::Json => render_json(entries, options),
        DiffFormat::Annotation => render_annotation(entries),
        DiffFormat::Compact => render_compact(entries),
    }
}

/// Mask a scalar's display form: length plus first and last character
fn mask_scalar(display: &str) -> String {
    let mut chars = display.chars();
    let len = display.chars().count();
    match (chars.next(), display.chars().last()) {
        (Some(first), Some(last)) if len > 1 => format!("{}:{}…{}", len, first, last),
        (Some(first), _) => format!("{}:{}", len, first),
        _ => "0:".to_string(),
    }
}

/// Recursively replace scalar values with their masked form
fn mask_tree(value: &SecretTree) -> SecretTree {
    match value {
        SecretTree::Null => SecretTree::Null,
        SecretTree::Bool(b) => SecretTree::String(mask_scalar(&b.to_string())),
        SecretTree::Number(n) => SecretTree::String(mask_scalar(&n.to_string())),
        SecretTree::String(s) => SecretTree::String(mask_scalar(s)),
        SecretTree::Sequence(items) => {
            SecretTree::Sequence(items.iter().map(mask_tree).collect())
        }
        SecretTree::Set(items) => SecretTree::Set(items.iter().map(mask_tree).collect()),
        SecretTree::Mapping(map) => {
            SecretTree::Mapping(map.iter().map(|(k, v)| (k.clone(), mask_tree(v))).collect())
        }
    }
}

fn display_value(value: &SecretTree, show_values: bool) -> String {
    let rendered = if show_values { value.clone() } else { mask_tree(value) };
    rendered.to_canonical_json().unwrap_or_else(|_| "<unencodable>".to_string())
}

fn marker(kind: DiffKind) -> char {
    match kind {
        DiffKind::Added => '+',
        DiffKind::Modified => '~',
        DiffKind::Deleted => '-',
    }
}

fn render_text(entries: &[DiffEntry], options: &RenderOptions) -> String {
    let mut out = String::new();
    for entry in entries {
        let (color, reset) = if options.color {
            let color = match entry.kind {
                DiffKind::Added => ANSI_GREEN,
                DiffKind::Modified => ANSI_YELLOW,
                DiffKind::Deleted => ANSI_RED,
            };
            (color, ANSI_RESET)
        } else {
            ("", "")
        };

        out.push_str(&format!("{}{} {}{}\n", color, marker(entry.kind), entry.path, reset));
        match entry.kind {
            DiffKind::Added => {
                if let Some(after) = &entry.after {
                    out.push_str(&format!(
                        "    {}\n",
                        display_value(after, options.show_values)
                    ));
                }
            }
            DiffKind::Deleted => {
                if let Some(before) = &entry.before {
                    out.push_str(&format!(
                        "    {}\n",
                        display_value(before, options.show_values)
                    ));
                }
            }
            DiffKind::Modified => {
                if let (Some(before), Some(after)) = (&entry.before, &entry.after) {
                    out.push_str(&format!(
                        "    {} -> {}\n",
                        display_value(before, options.show_values),
                        display_value(after, options.show_values)
                    ));
                }
            }
        }
    }

    let summary = DiffSummary::from_entries(entries);
    out.push_str(&format!(
        "{} added, {} modified, {} deleted\n",
        summary.added, summary.modified, summary.deleted
    ));
    out
}

#[derive(Serialize)]
struct JsonEntry {
    path: String,
    kind: DiffKind,
    before: Option<serde_json::Value>,
    after: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct JsonDiff {
    summary: DiffSummary,
    entries: Vec<JsonEntry>,
}

fn render_json(entries: &[DiffEntry], options: &RenderOptions) -> String {
    let to_value = |value: &SecretTree| {
        if options.show_values {
            value.to_canonical_value()
        } else {
            mask_tree(value).to_canonical_value()
        }
    };

    let doc = JsonDiff {
        summary: DiffSummary::from_entries(entries),
        entries: entries
            .iter()
            .map(|entry| JsonEntry {
                path: entry.path.clone(),
                kind: entry.kind,
                before: entry.before.as_ref().map(to_value),
                after: entry.after.as_ref().map(to_value),
            })
            .collect(),
    };
    serde_json::to_string_pretty(&doc).unwrap_or_else(|_| "{}".to_string())
}

fn render_annotation(entries: &[DiffEntry]) -> String {
    entries
        .iter()
        .map(|entry| {
            let level = match entry.kind {
                DiffKind::Added => "notice",
                DiffKind::Modified | DiffKind::Deleted => "warning",
            };
            format!(
                "::{} file={}::secret {}\n",
                level,
                entry.path,
                entry.kind.to_string().to_lowercase()
            )
        })
        .collect()
}

fn render_compact(entries: &[DiffEntry]) -> String {
    entries
        .iter()
        .map(|entry| format!("{} {}\n", marker(entry.kind), entry.path))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(json: serde_json::Value) -> SecretTree {
        SecretTree::from(json)
    }

    fn sample_entries() -> Vec<DiffEntry> {
        vec![
            DiffEntry {
                path: "app/db".to_string(),
                kind: DiffKind::Added,
                before: None,
                after: Some(tree(serde_json::json!({"password": "s3cretvalue"}))),
                before_version: None,
                after_version: None,
            },
            DiffEntry {
                path: "app/old".to_string(),
                kind: DiffKind::Deleted,
                before: Some(tree(serde_json::json!("legacy"))),
                after: None,
                before_version: Some("4".to_string()),
                after_version: None,
            },
        ]
    }

    #[test]
    fn test_masking_hides_values_by_default() {
        let options = RenderOptions { format: DiffFormat::Text, show_values: false, color: false };
        let out = render(&sample_entries(), &options);
        assert!(!out.contains("s3cretvalue"));
        assert!(out.contains("11:s…e"));
    }

    #[test]
    fn test_show_values_disables_masking() {
        let options = RenderOptions { format: DiffFormat::Text, show_values: true, color: false };
        let out = render(&sample_entries(), &options);
        assert!(out.contains("s3cretvalue"));
    }

    #[test]
    fn test_text_markers_and_summary() {
        let options = RenderOptions { format: DiffFormat::Text, show_values: false, color: false };
        let out = render(&sample_entries(), &options);
        assert!(out.contains("+ app/db"));
        assert!(out.contains("- app/old"));
        assert!(out.contains("1 added, 0 modified, 1 deleted"));
    }

    #[test]
    fn test_text_colors_when_enabled() {
        let options = RenderOptions { format: DiffFormat::Text, show_values: false, color: true };
        let out = render(&sample_entries(), &options);
        assert!(out.contains(ANSI_GREEN));
        assert!(out.contains(ANSI_RED));
    }

    #[test]
    fn test_json_schema_is_stable() {
        let options = RenderOptions { format: DiffFormat::Json, show_values: true, color: false };
        let out = render(&sample_entries(), &options);
        let doc: serde_json::Value = serde_json::from_str(&out).unwrap();

        assert_eq!(doc["summary"]["added"], 1);
        assert_eq!(doc["summary"]["modified"], 0);
        assert_eq!(doc["summary"]["deleted"], 1);
        assert_eq!(doc["entries"][0]["path"], "app/db");
        assert_eq!(doc["entries"][0]["kind"], "Added");
        assert!(doc["entries"][0]["before"].is_null());
        assert_eq!(doc["entries"][1]["kind"], "Deleted");
        assert!(doc["entries"][1]["after"].is_null());
    }

    #[test]
    fn test_compact_has_no_values() {
        let options =
            RenderOptions { format: DiffFormat::Compact, show_values: true, color: false };
        let out = render(&sample_entries(), &options);
        assert_eq!(out, "+ app/db\n- app/old\n");
    }

    #[test]
    fn test_annotation_one_line_per_entry() {
        let options =
            RenderOptions { format: DiffFormat::Annotation, show_values: false, color: false };
        let out = render(&sample_entries(), &options);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "::notice file=app/db::secret added");
        assert_eq!(lines[1], "::warning file=app/old::secret deleted");
    }

    #[test]
    fn test_mask_scalar_shapes() {
        assert_eq!(mask_scalar("s3cret"), "6:s…t");
        assert_eq!(mask_scalar("x"), "1:x");
        assert_eq!(mask_scalar(""), "0:");
    }
}
