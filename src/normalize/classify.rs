//! Heuristic CIR auto-classification for segment mapping rows
//!
//! When a row arrives without its hierarchical classification codes, the top
//! level is inferred from the most frequent prior classification among
//! existing records of the same marque, and the subordinate levels get the
//! unclassified sentinel. This is an assumption, not a guarantee: every
//! touched row is tagged `auto_classified` so it never looks user-supplied.

use std::collections::HashMap;

use serde_json::json;

use crate::schema::{DEFAULT_CIR_NIV1, UNCLASSIFIED_CIR_CODE};
use crate::store::StoredRecord;

use super::NormalizedRow;

const LEVEL_FIELDS: [&str; 3] = ["cir_niv1", "cir_niv2", "cir_niv3"];

/// Fill missing classification codes on every row that needs them.
///
/// Appends one info message per inferred row so the caller can surface the
/// assumption to the user.
pub fn classify_rows(
    rows: &mut [NormalizedRow],
    existing: &[StoredRecord],
    messages: &mut Vec<String>,
) {
    let mut inferred = 0usize;

    for row in rows.iter_mut() {
        if LEVEL_FIELDS.iter().all(|f| row.fields.contains_key(*f)) {
            continue;
        }
        classify_row(row, existing, messages);
        inferred += 1;
    }

    if inferred > 0 {
        log::info!("Auto-classified {} rows missing CIR codes", inferred);
    }
}

fn classify_row(row: &mut NormalizedRow, existing: &[StoredRecord], messages: &mut Vec<String>) {
    if !row.fields.contains_key("cir_niv1") {
        let marque = row.text("marque").unwrap_or("").to_string();
        let (niv1, source) = match most_frequent_niv1(&marque, existing) {
            Some(code) => (code, "most frequent for this marque"),
            None => (DEFAULT_CIR_NIV1, "default, marque has no prior records"),
        };
        row.fields.insert("cir_niv1".to_string(), json!(niv1));
        messages.push(format!(
            "Line {}: CIR level 1 set to {} ({})",
            row.line, niv1, source
        ));
    }

    for field in ["cir_niv2", "cir_niv3"] {
        row.fields
            .entry(field.to_string())
            .or_insert_with(|| json!(UNCLASSIFIED_CIR_CODE));
    }

    row.auto_classified = true;
}

/// Most frequent existing top-level code for a marque (case-insensitive),
/// ties broken by smallest code for determinism.
fn most_frequent_niv1(marque: &str, existing: &[StoredRecord]) -> Option<i64> {
    let needle = marque.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }

    let mut counts: HashMap<i64, usize> = HashMap::new();
    for record in existing {
        let same_marque = record
            .fields
            .get("marque")
            .and_then(|v| v.as_str())
            .map(|m| m.trim().to_lowercase() == needle)
            .unwrap_or(false);
        if !same_marque {
            continue;
        }
        if let Some(code) = record.fields.get("cir_niv1").and_then(|v| v.as_i64()) {
            *counts.entry(code).or_insert(0) += 1;
        }
    }

    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
        .map(|(code, _)| code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::collections::HashMap as Map;
    use uuid::Uuid;

    fn row(marque: &str) -> NormalizedRow {
        let mut fields = Map::new();
        fields.insert("marque".to_string(), json!(marque));
        fields.insert("cat_fab".to_string(), json!("Z16"));
        NormalizedRow {
            line: 2,
            fields,
            auto_classified: false,
        }
    }

    fn record(marque: &str, niv1: i64) -> StoredRecord {
        let mut fields: Map<String, Value> = Map::new();
        fields.insert("marque".to_string(), json!(marque));
        fields.insert("cir_niv1".to_string(), json!(niv1));
        StoredRecord {
            id: Uuid::new_v4(),
            key: format!("{}|x", marque),
            fields,
        }
    }

    #[test]
    fn test_fallback_defaults_for_unknown_marque() {
        let mut rows = vec![row("Acme")];
        let mut messages = Vec::new();

        classify_rows(&mut rows, &[], &mut messages);

        assert_eq!(rows[0].int("cir_niv1"), Some(DEFAULT_CIR_NIV1));
        assert_eq!(rows[0].int("cir_niv2"), Some(UNCLASSIFIED_CIR_CODE));
        assert_eq!(rows[0].int("cir_niv3"), Some(UNCLASSIFIED_CIR_CODE));
        assert!(rows[0].auto_classified);
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn test_most_frequent_prior_classification_wins() {
        let existing = vec![record("SKF", 4), record("SKF", 4), record("skf", 7)];
        let mut rows = vec![row("SKF")];
        let mut messages = Vec::new();

        classify_rows(&mut rows, &existing, &mut messages);

        assert_eq!(rows[0].int("cir_niv1"), Some(4));
        assert_eq!(rows[0].int("cir_niv2"), Some(UNCLASSIFIED_CIR_CODE));
    }

    #[test]
    fn test_frequency_tie_breaks_by_smallest_code() {
        let existing = vec![record("SKF", 9), record("SKF", 3)];
        let mut rows = vec![row("SKF")];
        let mut messages = Vec::new();

        classify_rows(&mut rows, &existing, &mut messages);

        assert_eq!(rows[0].int("cir_niv1"), Some(3));
    }

    #[test]
    fn test_fully_classified_row_untouched() {
        let mut r = row("SKF");
        for (field, code) in [("cir_niv1", 5), ("cir_niv2", 2), ("cir_niv3", 1)] {
            r.fields.insert(field.to_string(), json!(code));
        }
        let mut rows = vec![r];
        let mut messages = Vec::new();

        classify_rows(&mut rows, &[record("SKF", 9)], &mut messages);

        assert_eq!(rows[0].int("cir_niv1"), Some(5));
        assert!(!rows[0].auto_classified);
        assert!(messages.is_empty());
    }

    #[test]
    fn test_supplied_top_level_kept_when_only_subordinates_missing() {
        let mut r = row("SKF");
        r.fields.insert("cir_niv1".to_string(), json!(8));
        let mut rows = vec![r];
        let mut messages = Vec::new();

        classify_rows(&mut rows, &[record("SKF", 2)], &mut messages);

        assert_eq!(rows[0].int("cir_niv1"), Some(8));
        assert_eq!(rows[0].int("cir_niv2"), Some(UNCLASSIFIED_CIR_CODE));
        assert!(rows[0].auto_classified);
    }
}
