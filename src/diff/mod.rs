//! Set-based reconciliation between incoming rows and the stored snapshot
//!
//! Partitions an import into added / updated / removed / unchanged by natural
//! key. Row order in the file is irrelevant to the counts; only keys and
//! field values matter, and running the diff twice on the same inputs yields
//! identical results.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::normalize::NormalizedRow;
use crate::schema::FieldSchema;
use crate::store::StoredRecord;

/// Four-way partition counts for one import attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub added: u32,
    pub updated: u32,
    pub removed: u32,
    pub unchanged: u32,
}

/// The concrete mutation a diff entry implies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeKind::Insert => write!(f, "insert"),
            ChangeKind::Update => write!(f, "update"),
            ChangeKind::Delete => write!(f, "delete"),
        }
    }
}

/// One planned mutation, carrying enough state for history and rollback.
#[derive(Debug, Clone)]
pub struct PlannedChange {
    pub kind: ChangeKind,
    pub key: String,
    /// Stored field values before the change (None for inserts).
    pub before: Option<HashMap<String, Value>>,
    /// Field values after the change (None for deletes).
    pub after: Option<HashMap<String, Value>>,
}

/// Diff output: the counts plus the ordered change plan.
///
/// Unchanged rows produce no planned change. Changes are emitted in
/// incoming-row order, then removals in sorted key order.
#[derive(Debug, Clone, Default)]
pub struct DiffReport {
    pub summary: DiffSummary,
    pub changes: Vec<PlannedChange>,
}

/// Natural key of a normalized row under a schema, if determinate.
///
/// Key parts are joined with `|`; a missing or blank part makes the whole
/// key indeterminate.
pub fn row_key(fields: &HashMap<String, Value>, schema: &FieldSchema) -> Option<String> {
    let parts: Option<Vec<String>> = schema
        .key_fields
        .iter()
        .map(|name| match fields.get(*name) {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_lowercase()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
        .collect();
    parts.map(|p| p.join("|"))
}

/// Build a key -> record lookup from a snapshot fetch.
pub fn snapshot_lookup(records: Vec<StoredRecord>) -> HashMap<String, StoredRecord> {
    records.into_iter().map(|r| (r.key.clone(), r)).collect()
}

/// Diff incoming rows against the existing snapshot.
pub fn diff_records(
    rows: &[NormalizedRow],
    existing: &HashMap<String, StoredRecord>,
    schema: &FieldSchema,
) -> DiffReport {
    let mut report = DiffReport::default();
    let mut seen: HashSet<String> = HashSet::new();
    // key -> index into report.changes, so a duplicate incoming key replaces
    // its earlier plan (last writer wins) instead of double-applying.
    let mut planned_at: HashMap<String, usize> = HashMap::new();

    for row in rows {
        let Some(key) = row_key(&row.fields, schema) else {
            log::debug!("Line {}: indeterminate key, row not diffed", row.line);
            continue;
        };
        seen.insert(key.clone());

        let change = match existing.get(&key) {
            None => {
                report.summary.added += 1;
                Some(PlannedChange {
                    kind: ChangeKind::Insert,
                    key: key.clone(),
                    before: None,
                    after: Some(row.fields.clone()),
                })
            }
            Some(record) => {
                if records_equal(&row.fields, &record.fields, schema) {
                    report.summary.unchanged += 1;
                    None
                } else {
                    report.summary.updated += 1;
                    Some(PlannedChange {
                        kind: ChangeKind::Update,
                        key: key.clone(),
                        before: Some(record.fields.clone()),
                        after: Some(row.fields.clone()),
                    })
                }
            }
        };

        if let Some(idx) = planned_at.get(&key).copied() {
            match change {
                Some(change) => report.changes[idx] = change,
                None => {
                    report.changes.remove(idx);
                    planned_at.remove(&key);
                    for index in planned_at.values_mut() {
                        if *index > idx {
                            *index -= 1;
                        }
                    }
                }
            }
        } else if let Some(change) = change {
            planned_at.insert(key, report.changes.len());
            report.changes.push(change);
        }
    }

    // Existing keys never seen among incoming keys are removals.
    let mut removed_keys: Vec<&String> = existing.keys().filter(|k| !seen.contains(*k)).collect();
    removed_keys.sort();
    for key in removed_keys {
        let record = &existing[key];
        report.summary.removed += 1;
        report.changes.push(PlannedChange {
            kind: ChangeKind::Delete,
            key: key.clone(),
            before: Some(record.fields.clone()),
            after: None,
        });
    }

    log::info!(
        "Diff for {}: {} added, {} updated, {} removed, {} unchanged",
        schema.dataset,
        report.summary.added,
        report.summary.updated,
        report.summary.removed,
        report.summary.unchanged
    );

    report
}

/// Field-by-field equality over the schema's comparison fields.
fn records_equal(
    incoming: &HashMap<String, Value>,
    stored: &HashMap<String, Value>,
    schema: &FieldSchema,
) -> bool {
    schema
        .comparison_fields
        .iter()
        .all(|name| values_equal(incoming.get(*name), stored.get(*name)))
}

/// Compare two optional values, folding absent / null / empty string into a
/// single sentinel so "missing" and "" are not spuriously different.
fn values_equal(a: Option<&Value>, b: Option<&Value>) -> bool {
    match (canonical(a), canonical(b)) {
        (None, None) => true,
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

/// Canonical comparison form: integers as themselves, text trimmed, with
/// empties folded to None.
fn canonical(value: Option<&Value>) -> Option<String> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(i64::from(*b).to_string()),
        Some(other) => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SEGMENT_SCHEMA;
    use serde_json::json;
    use uuid::Uuid;

    fn row(marque: &str, cat_fab: &str, strategiq: i64) -> NormalizedRow {
        let mut fields = HashMap::new();
        fields.insert("marque".to_string(), json!(marque));
        fields.insert("cat_fab".to_string(), json!(cat_fab));
        fields.insert("strategiq".to_string(), json!(strategiq));
        NormalizedRow {
            line: 2,
            fields,
            auto_classified: false,
        }
    }

    fn stored(marque: &str, cat_fab: &str, strategiq: i64) -> StoredRecord {
        let r = row(marque, cat_fab, strategiq);
        StoredRecord {
            id: Uuid::new_v4(),
            key: row_key(&r.fields, &SEGMENT_SCHEMA).unwrap(),
            fields: r.fields,
        }
    }

    #[test]
    fn test_added_and_updated_partition() {
        let existing = snapshot_lookup(vec![stored("SKF", "Z16", 0)]);
        let rows = vec![row("SKF", "Z16", 1), row("NSK", "B1", 0)];

        let report = diff_records(&rows, &existing, &SEGMENT_SCHEMA);

        assert_eq!(
            report.summary,
            DiffSummary {
                added: 1,
                updated: 1,
                removed: 0,
                unchanged: 0
            }
        );
    }

    #[test]
    fn test_removed_detection() {
        let existing = snapshot_lookup(vec![stored("SKF", "A", 0), stored("NSK", "B", 0)]);
        let rows = vec![row("SKF", "A", 0)];

        let report = diff_records(&rows, &existing, &SEGMENT_SCHEMA);

        assert_eq!(report.summary.removed, 1);
        assert_eq!(report.summary.unchanged, 1);
        let delete = report
            .changes
            .iter()
            .find(|c| c.kind == ChangeKind::Delete)
            .unwrap();
        assert_eq!(delete.key, "nsk|b");
    }

    #[test]
    fn test_unchanged_rows_emit_no_planned_change() {
        let existing = snapshot_lookup(vec![stored("SKF", "Z16", 1)]);
        let rows = vec![row("SKF", "Z16", 1)];

        let report = diff_records(&rows, &existing, &SEGMENT_SCHEMA);

        assert_eq!(report.summary.unchanged, 1);
        assert!(report.changes.is_empty());
    }

    #[test]
    fn test_absent_and_empty_string_compare_equal() {
        let mut existing_record = stored("SKF", "Z16", 0);
        existing_record
            .fields
            .insert("designation".to_string(), json!(""));
        let existing = snapshot_lookup(vec![existing_record]);

        // Incoming row has no designation at all.
        let rows = vec![row("SKF", "Z16", 0)];
        let report = diff_records(&rows, &existing, &SEGMENT_SCHEMA);

        assert_eq!(report.summary.unchanged, 1);
    }

    #[test]
    fn test_diff_is_deterministic_and_order_independent() {
        let existing = snapshot_lookup(vec![stored("SKF", "A", 0), stored("NSK", "B", 1)]);
        let forward = vec![row("SKF", "A", 1), row("TRW", "C", 0)];
        let reversed: Vec<NormalizedRow> = forward.iter().rev().cloned().collect();

        let a = diff_records(&forward, &existing, &SEGMENT_SCHEMA);
        let b = diff_records(&reversed, &existing, &SEGMENT_SCHEMA);
        let again = diff_records(&forward, &existing, &SEGMENT_SCHEMA);

        assert_eq!(a.summary, b.summary);
        assert_eq!(a.summary, again.summary);
    }

    #[test]
    fn test_duplicate_incoming_key_plans_last_writer() {
        let existing = snapshot_lookup(vec![]);
        let rows = vec![row("SKF", "Z16", 0), row("SKF", "Z16", 1)];

        let report = diff_records(&rows, &existing, &SEGMENT_SCHEMA);

        let inserts: Vec<&PlannedChange> = report
            .changes
            .iter()
            .filter(|c| c.kind == ChangeKind::Insert)
            .collect();
        assert_eq!(inserts.len(), 1);
        assert_eq!(
            inserts[0].after.as_ref().unwrap().get("strategiq"),
            Some(&json!(1))
        );
    }

    #[test]
    fn test_indeterminate_key_not_counted() {
        let mut r = row("SKF", "Z16", 0);
        r.fields.remove("cat_fab");
        let report = diff_records(&[r], &snapshot_lookup(vec![]), &SEGMENT_SCHEMA);

        assert_eq!(report.summary, DiffSummary::default());
        assert!(report.changes.is_empty());
    }
}
