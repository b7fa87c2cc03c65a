//! Structural diff between two content documents.
//!
//! Documents are `serde_json::Value` trees. Objects are walked key-by-key in
//! sorted key order, so the change list for a given pair of inputs is always
//! the same. Anything that is not an object on both sides (scalars, arrays,
//! mismatched types) is compared as a whole value.
//!
//! Move detection is not attempted: a renamed key shows up as one `REMOVED`
//! and one `ADDED` entry, and `summary.moved` is always zero.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;
use crate::types::{DbId, Timestamp};

/// Identifier written into [`DiffMetadata::algorithm`].
pub const DIFF_ALGORITHM: &str = "structural-v1";

/// Display name used for changes that replace the whole document.
pub const ROOT_PATH_LABEL: &str = "root";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// The kind of a single change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    Added,
    Removed,
    Modified,
}

impl ChangeType {
    /// String representation for display, logging, and database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "ADDED",
            Self::Removed => "REMOVED",
            Self::Modified => "MODIFIED",
        }
    }
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a diff.
///
/// `path` is the dot-joined form of `segments`, kept for readability. Replay
/// uses `segments`, which stays unambiguous when keys contain dots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffItem {
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    pub path: String,
    #[serde(default)]
    pub segments: Vec<String>,
    #[serde(default, deserialize_with = "present_value", skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    #[serde(default, deserialize_with = "present_value", skip_serializing_if = "Option::is_none")]
    pub new_value: Option<Value>,
}

/// A key that is present deserializes to `Some`, even when it holds `null`.
fn present_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl DiffItem {
    fn new(
        change_type: ChangeType,
        segments: &[String],
        old_value: Option<&Value>,
        new_value: Option<&Value>,
    ) -> Self {
        Self {
            change_type,
            path: segments.join("."),
            segments: segments.to_vec(),
            old_value: old_value.cloned(),
            new_value: new_value.cloned(),
        }
    }

    /// True when the change replaces the whole document.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Path for display: the dotted path, or [`ROOT_PATH_LABEL`].
    pub fn display_path(&self) -> &str {
        if self.is_root() {
            ROOT_PATH_LABEL
        } else {
            &self.path
        }
    }
}

/// Change counts for a diff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub total_changes: usize,
    pub additions: usize,
    pub modifications: usize,
    pub deletions: usize,
    pub moved: usize,
}

impl DiffSummary {
    /// Tally a change list.
    pub fn from_changes(changes: &[DiffItem]) -> Self {
        let mut summary = Self::default();
        for change in changes {
            match change.change_type {
                ChangeType::Added => summary.additions += 1,
                ChangeType::Removed => summary.deletions += 1,
                ChangeType::Modified => summary.modifications += 1,
            }
        }
        summary.total_changes = changes.len();
        summary
    }
}

/// Context attached to a diff.
///
/// A bare [`diff`] only fills `algorithm`. Version comparisons add the
/// version numbers, the content identity, and who compared them and when.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiffMetadata {
    pub algorithm: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_version: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_version: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compared_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compared_by: Option<DbId>,
}

/// The full result of comparing two documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionDiff {
    pub summary: DiffSummary,
    pub changes: Vec<DiffItem>,
    pub metadata: DiffMetadata,
}

impl VersionDiff {
    /// Returns `true` if the two documents were structurally equal.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Replace the metadata block, keeping summary and changes.
    pub fn with_metadata(mut self, metadata: DiffMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

// ---------------------------------------------------------------------------
// Diff
// ---------------------------------------------------------------------------

/// Compute the structural difference from `old` to `new`.
pub fn diff(old: &Value, new: &Value) -> VersionDiff {
    let mut changes = Vec::new();
    let mut path = Vec::new();
    walk(old, new, &mut path, &mut changes);

    VersionDiff {
        summary: DiffSummary::from_changes(&changes),
        changes,
        metadata: DiffMetadata {
            algorithm: DIFF_ALGORITHM.to_string(),
            ..DiffMetadata::default()
        },
    }
}

fn walk(old: &Value, new: &Value, path: &mut Vec<String>, out: &mut Vec<DiffItem>) {
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            let keys: BTreeSet<&String> = old_map.keys().chain(new_map.keys()).collect();
            for key in keys {
                path.push(key.clone());
                match (old_map.get(key), new_map.get(key)) {
                    (None, Some(added)) => {
                        out.push(DiffItem::new(ChangeType::Added, path, None, Some(added)));
                    }
                    (Some(removed), None) => {
                        out.push(DiffItem::new(ChangeType::Removed, path, Some(removed), None));
                    }
                    (Some(before), Some(after)) => walk(before, after, path, out),
                    (None, None) => {}
                }
                path.pop();
            }
        }
        _ if old == new => {}
        _ => out.push(DiffItem::new(
            ChangeType::Modified,
            path,
            Some(old),
            Some(new),
        )),
    }
}

// ---------------------------------------------------------------------------
// Patch application
// ---------------------------------------------------------------------------

/// Replay `diff` onto `base`, producing the document the diff was computed
/// against.
///
/// Fails with [`CoreError::Validation`] when a change targets a location
/// whose parent is not an object in `base`.
pub fn apply_diff(base: &Value, diff: &VersionDiff) -> Result<Value, CoreError> {
    let mut doc = base.clone();
    for change in &diff.changes {
        apply_change(&mut doc, change)?;
    }
    Ok(doc)
}

fn apply_change(doc: &mut Value, change: &DiffItem) -> Result<(), CoreError> {
    let Some((last, parents)) = change.segments.split_last() else {
        *doc = match change.change_type {
            ChangeType::Removed => Value::Null,
            ChangeType::Added | ChangeType::Modified => {
                change.new_value.clone().unwrap_or(Value::Null)
            }
        };
        return Ok(());
    };

    let mut cursor = doc;
    for segment in parents {
        cursor = object_mut(cursor, change)?
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    let parent = object_mut(cursor, change)?;
    match change.change_type {
        ChangeType::Removed => {
            parent.remove(last);
        }
        ChangeType::Added | ChangeType::Modified => {
            parent.insert(
                last.clone(),
                change.new_value.clone().unwrap_or(Value::Null),
            );
        }
    }
    Ok(())
}

fn object_mut<'a>(
    value: &'a mut Value,
    change: &DiffItem,
) -> Result<&'a mut Map<String, Value>, CoreError> {
    value.as_object_mut().ok_or_else(|| {
        CoreError::Validation(format!(
            "Cannot apply {} at '{}': parent is not an object",
            change.change_type,
            change.display_path()
        ))
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn change_type_strings() {
        assert_eq!(ChangeType::Added.as_str(), "ADDED");
        assert_eq!(ChangeType::Removed.as_str(), "REMOVED");
        assert_eq!(format!("{}", ChangeType::Modified), "MODIFIED");
    }

    #[test]
    fn modified_scalar_field() {
        let old = json!({"title": "A", "body": "x"});
        let new = json!({"title": "A", "body": "y"});

        let d = diff(&old, &new);
        assert_eq!(d.changes.len(), 1);
        let change = &d.changes[0];
        assert_eq!(change.change_type, ChangeType::Modified);
        assert_eq!(change.path, "body");
        assert_eq!(change.old_value, Some(json!("x")));
        assert_eq!(change.new_value, Some(json!("y")));
        assert_eq!(d.summary.modifications, 1);
        assert_eq!(d.summary.total_changes, 1);
    }

    #[test]
    fn equal_documents_produce_no_changes() {
        let doc = json!({"a": {"b": [1, 2, 3]}, "c": null, "d": true});
        let d = diff(&doc, &doc);
        assert_eq!(d.summary.total_changes, 0);
        assert!(d.is_empty());
    }

    #[test]
    fn nested_paths_are_dot_joined() {
        let old = json!({"seo": {"meta": {"title": "old"}}});
        let new = json!({"seo": {"meta": {"title": "new", "robots": "index"}}});

        let d = diff(&old, &new);
        let paths: Vec<(&str, ChangeType)> = d
            .changes
            .iter()
            .map(|c| (c.path.as_str(), c.change_type))
            .collect();
        assert_eq!(
            paths,
            vec![
                ("seo.meta.robots", ChangeType::Added),
                ("seo.meta.title", ChangeType::Modified),
            ]
        );
    }

    #[test]
    fn additions_and_removals_are_counted() {
        let old = json!({"keep": 1, "gone": "bye"});
        let new = json!({"keep": 1, "fresh": {"x": 1}});

        let d = diff(&old, &new);
        assert_eq!(d.summary.additions, 1);
        assert_eq!(d.summary.deletions, 1);
        assert_eq!(d.summary.modifications, 0);
        assert_eq!(d.summary.moved, 0);

        let removed = d.changes.iter().find(|c| c.path == "gone").unwrap();
        assert_eq!(removed.change_type, ChangeType::Removed);
        assert_eq!(removed.old_value, Some(json!("bye")));
        assert_eq!(removed.new_value, None);
    }

    #[test]
    fn renamed_key_is_add_remove_pair_not_move() {
        let d = diff(&json!({"name": "x"}), &json!({"label": "x"}));
        assert_eq!(d.summary.additions, 1);
        assert_eq!(d.summary.deletions, 1);
        assert_eq!(d.summary.moved, 0);
    }

    #[test]
    fn arrays_compare_as_whole_values() {
        let d = diff(&json!({"tags": ["a", "b"]}), &json!({"tags": ["a", "c"]}));
        assert_eq!(d.changes.len(), 1);
        assert_eq!(d.changes[0].path, "tags");
        assert_eq!(d.changes[0].change_type, ChangeType::Modified);
    }

    #[test]
    fn type_change_inside_object_is_modification() {
        let d = diff(&json!({"a": {"b": 1}}), &json!({"a": "flat"}));
        assert_eq!(d.changes.len(), 1);
        assert_eq!(d.changes[0].path, "a");
        assert_eq!(d.changes[0].change_type, ChangeType::Modified);
    }

    #[test]
    fn root_scalar_replacement_uses_empty_path() {
        let d = diff(&json!("draft"), &json!(42));
        assert_eq!(d.changes.len(), 1);
        assert!(d.changes[0].is_root());
        assert_eq!(d.changes[0].path, "");
        assert_eq!(d.changes[0].display_path(), ROOT_PATH_LABEL);
    }

    #[test]
    fn diff_is_deterministic() {
        let old = json!({"z": 1, "a": 2, "m": {"y": 1, "b": 2}});
        let new = json!({"z": 2, "a": 3, "m": {"y": 2, "b": 3}, "c": 0});
        assert_eq!(diff(&old, &new), diff(&old, &new));
        let paths: Vec<String> = diff(&old, &new).changes.into_iter().map(|c| c.path).collect();
        assert_eq!(paths, vec!["a", "c", "m.b", "m.y", "z"]);
    }

    #[test]
    fn apply_reconstructs_target() {
        let pairs = [
            (
                json!({"title": "A", "body": "x"}),
                json!({"title": "A", "body": "y"}),
            ),
            (
                json!({"a": {"b": {"c": 1}}, "gone": [1, 2]}),
                json!({"a": {"b": {"c": 2, "d": null}}, "new": {"deep": {"x": true}}}),
            ),
            (json!({"a": 1}), json!(["replaced", "root"])),
            (json!(null), json!({"fresh": 1})),
            (json!({"k": {"nested": 1}}), json!({"k": 5})),
            (json!({"dotted.key": 1}), json!({"dotted.key": 2})),
        ];
        for (a, b) in pairs {
            let d = diff(&a, &b);
            assert_eq!(apply_diff(&a, &d).unwrap(), b, "round trip failed for {a} -> {b}");
        }
    }

    #[test]
    fn apply_survives_serialization_of_null_values() {
        let a = json!({"x": 1});
        let b = json!({"x": 1, "y": null});
        let d = diff(&a, &b);
        let stored = serde_json::to_string(&d).unwrap();
        let loaded: VersionDiff = serde_json::from_str(&stored).unwrap();
        assert_eq!(apply_diff(&a, &loaded).unwrap(), b);
    }

    #[test]
    fn stored_diff_keeps_explicit_null_values() {
        let d = diff(&json!({"gone": null, "x": null}), &json!({"x": 1}));
        let loaded: VersionDiff = serde_json::from_str(&serde_json::to_string(&d).unwrap()).unwrap();
        assert_eq!(loaded, d);

        let removed = loaded.changes.iter().find(|c| c.path == "gone").unwrap();
        assert_eq!(removed.old_value, Some(Value::Null));
        assert_eq!(removed.new_value, None);
        let modified = loaded.changes.iter().find(|c| c.path == "x").unwrap();
        assert_eq!(modified.old_value, Some(Value::Null));
    }

    #[test]
    fn apply_rejects_non_object_parent() {
        let d = diff(&json!({"a": {"b": 1}}), &json!({"a": {"b": 2}}));
        let err = apply_diff(&json!({"a": 7}), &d).unwrap_err();
        assert!(matches!(err, CoreError::Validation(msg) if msg.contains("a.b")));
    }

    #[test]
    fn serialized_form_uses_type_key() {
        let d = diff(&json!({"body": "x"}), &json!({"body": "y"}));
        let value = serde_json::to_value(&d).unwrap();
        assert_eq!(value["changes"][0]["type"], "MODIFIED");
        assert_eq!(value["changes"][0]["path"], "body");
        assert_eq!(value["summary"]["moved"], 0);
        assert_eq!(value["metadata"]["algorithm"], DIFF_ALGORITHM);
    }
}
