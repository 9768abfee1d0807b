//! Row normalization
//!
//! Turns raw sheet rows into typed candidate records keyed by canonical field
//! name. Uploaded files are inherently dirty, so per-row failures are the
//! expected path: a row that cannot satisfy the schema is skipped with a
//! message naming the line and reason, and processing continues.

pub mod classify;

use std::collections::HashMap;

use calamine::Data;
use serde_json::{Value, json};

use crate::excel::RawTable;
use crate::matching::HeaderMapping;
use crate::schema::{DatasetType, FieldSchema, FieldSpec};

/// One accepted row, keyed by canonical field name.
#[derive(Debug, Clone)]
pub struct NormalizedRow {
    /// Physical line number in the sheet (header row is line 1).
    pub line: usize,
    /// Canonical field name -> typed value.
    pub fields: HashMap<String, Value>,
    /// True when hierarchical codes were inferred rather than supplied.
    pub auto_classified: bool,
}

impl NormalizedRow {
    /// String view of a field, if present and textual.
    pub fn text(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(|v| v.as_str())
    }

    /// Integer view of a field, if present and integral.
    pub fn int(&self, field: &str) -> Option<i64> {
        self.fields.get(field).and_then(|v| v.as_i64())
    }
}

/// Outcome of normalizing one sheet.
#[derive(Debug, Clone, Default)]
pub struct ParseResult {
    /// Physical data rows in the sheet (excluding the header row).
    pub total_lines: usize,
    /// Rows that became valid [`NormalizedRow`]s.
    pub valid_lines: usize,
    /// Rows skipped (blank, or failing required-field checks).
    pub skipped_lines: usize,
    /// The accepted rows, in sheet order.
    pub rows: Vec<NormalizedRow>,
    /// One human-readable message per skip or classification decision.
    pub messages: Vec<String>,
}

/// Normalize all data rows of a table against a schema.
///
/// Processing stops early only when `error_budget` message-worthy skips have
/// accumulated, so a pathological file cannot drag the pipeline on forever;
/// rows accepted before the cutoff are still returned.
pub fn normalize_rows(
    table: &RawTable,
    mapping: &HeaderMapping,
    schema: &FieldSchema,
    error_budget: usize,
) -> ParseResult {
    let mut result = ParseResult {
        total_lines: table.rows.len(),
        ..ParseResult::default()
    };
    let mut errors = 0usize;

    for (idx, row) in table.rows.iter().enumerate() {
        // Header is physical line 1, first data row is line 2.
        let line = idx + 2;

        if row.iter().all(cell_is_empty) {
            result.skipped_lines += 1;
            continue;
        }

        let mut fields = build_candidate(row, mapping, schema);
        apply_defaults(&mut fields, schema);
        derive_fields(schema.dataset, &mut fields);

        let missing: Vec<&str> = schema
            .required_fields()
            .into_iter()
            .filter(|name| !field_present(&fields, name))
            .collect();

        if missing.is_empty() {
            result.valid_lines += 1;
            result.rows.push(NormalizedRow {
                line,
                fields,
                auto_classified: false,
            });
        } else {
            // The budget allows exactly `error_budget` recorded skips; the
            // next failing row stops processing instead of being recorded.
            if errors == error_budget {
                result.messages.push(format!(
                    "Stopped at line {}: more than {} row errors (error budget exceeded); remaining lines were not processed",
                    line, error_budget
                ));
                log::warn!(
                    "Normalization of sheet '{}' truncated at line {} after {} errors",
                    table.sheet_name,
                    line,
                    errors
                );
                break;
            }
            result.skipped_lines += 1;
            errors += 1;
            result.messages.push(format!(
                "Line {}: skipped, missing required fields: {}",
                line,
                missing.join(", ")
            ));
        }
    }

    log::info!(
        "Normalized sheet '{}': {} total, {} valid, {} skipped",
        table.sheet_name,
        result.total_lines,
        result.valid_lines,
        result.skipped_lines
    );

    result
}

/// Build the candidate record for one row from its mapped columns.
///
/// Columns the mapping never claimed contribute nothing, even when their
/// header text matches a claimed column's.
fn build_candidate(
    row: &[Data],
    mapping: &HeaderMapping,
    schema: &FieldSchema,
) -> HashMap<String, Value> {
    let mut fields = HashMap::new();

    for (col_idx, field_name) in &mapping.columns {
        let Some(spec) = schema.field(field_name) else {
            continue;
        };
        let cell = row.get(*col_idx).unwrap_or(&Data::Empty);
        if let Some(value) = cell_to_value(cell, spec) {
            fields.insert(field_name.clone(), value);
        }
    }

    fields
}

fn cell_is_empty(cell: &Data) -> bool {
    match cell {
        Data::Empty => true,
        Data::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Convert one cell to a typed value under a field's constraints.
///
/// Returns `None` for absent, empty, unparseable, or out-of-range values;
/// invalid content is never fatal at this level.
fn cell_to_value(cell: &Data, spec: &FieldSpec) -> Option<Value> {
    if spec.numeric {
        let n = coerce_int(cell)?;
        if let Some((min, max)) = spec.range
            && (n < min || n > max)
        {
            return None;
        }
        if let Some(allowed) = &spec.allowed
            && !allowed.contains(&n)
        {
            return None;
        }
        return Some(json!(n));
    }

    let text = match cell {
        Data::Empty => return None,
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) if f.fract() == 0.0 => (*f as i64).to_string(),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => format!("{}", dt),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Error(_) => return None,
    };
    if text.is_empty() {
        return None;
    }

    let text = match spec.max_len {
        Some(max) if text.chars().count() > max => text.chars().take(max).collect(),
        _ => text,
    };
    Some(Value::String(text))
}

/// Coerce a cell to an integer, treating anything unparseable as absent.
fn coerce_int(cell: &Data) -> Option<i64> {
    match cell {
        Data::Int(i) => Some(*i),
        Data::Float(f) if f.fract() == 0.0 => Some(*f as i64),
        Data::Bool(b) => Some(i64::from(*b)),
        Data::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            trimmed
                .parse::<i64>()
                .ok()
                .or_else(|| trimmed.parse::<f64>().ok().filter(|f| f.fract() == 0.0).map(|f| f as i64))
        }
        _ => None,
    }
}

/// Fill type-specific defaults for fields that declare one.
fn apply_defaults(fields: &mut HashMap<String, Value>, schema: &FieldSchema) {
    for spec in &schema.fields {
        if let Some(default) = &spec.default
            && !fields.contains_key(spec.name)
        {
            fields.insert(spec.name.to_string(), default.clone());
        }
    }
}

/// Dataset-specific derived fields.
///
/// The CIR schema derives a combined code (levels joined with `.`) and a
/// combined designation; the combined code is the dataset's natural key.
fn derive_fields(dataset: DatasetType, fields: &mut HashMap<String, Value>) {
    if dataset != DatasetType::CirClassification {
        return;
    }

    let codes: Option<Vec<i64>> = ["code_niv1", "code_niv2", "code_niv3"]
        .iter()
        .map(|name| fields.get(*name).and_then(|v| v.as_i64()))
        .collect();
    if let Some(codes) = codes {
        let combined = codes
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(".");
        fields.insert("code_complet".to_string(), Value::String(combined));
    }

    let designations: Vec<&str> = ["designation_niv1", "designation_niv2", "designation_niv3"]
        .iter()
        .filter_map(|name| fields.get(*name).and_then(|v| v.as_str()))
        .collect();
    if !designations.is_empty() {
        fields.insert(
            "designation_complete".to_string(),
            Value::String(designations.join(" / ")),
        );
    }
}

fn field_present(fields: &HashMap<String, Value>, name: &str) -> bool {
    match fields.get(name) {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::match_headers;
    use crate::schema::{CIR_SCHEMA, SEGMENT_SCHEMA};

    fn table(headers: &[&str], rows: Vec<Vec<Data>>) -> RawTable {
        RawTable {
            sheet_name: "Feuil1".to_string(),
            headers: headers.iter().map(|s| s.to_string()).collect(),
            rows,
        }
    }

    fn s(text: &str) -> Data {
        Data::String(text.to_string())
    }

    fn segment_rows(rows: Vec<Vec<Data>>) -> ParseResult {
        let t = table(&["SEGMENT", "MARQUE", "CAT_FAB", "STRATEGIQ"], rows);
        let mapping = match_headers(&t.headers, &SEGMENT_SCHEMA);
        normalize_rows(&t, &mapping, &SEGMENT_SCHEMA, 100)
    }

    #[test]
    fn test_clean_rows_round_trip() {
        let result = segment_rows(vec![
            vec![s("Roulements"), s("SKF"), s("Z16"), Data::Int(1)],
            vec![s("Roulements"), s("NSK"), s("B1"), Data::Int(0)],
            vec![s("Freinage"), s("TRW"), s("F2"), Data::Int(0)],
        ]);

        assert_eq!(result.total_lines, 3);
        assert_eq!(result.valid_lines, 3);
        assert_eq!(result.skipped_lines, 0);
        assert!(result.rows.iter().all(|r| !r.auto_classified));
        assert_eq!(result.rows[0].text("marque"), Some("SKF"));
        assert_eq!(result.rows[0].int("strategiq"), Some(1));
    }

    #[test]
    fn test_blank_row_skipped_without_message() {
        let result = segment_rows(vec![
            vec![s("A"), s("SKF"), s("Z16"), Data::Int(0)],
            vec![s("A"), s("NSK"), s("B1"), Data::Int(0)],
            vec![Data::Empty, s(""), Data::Empty, Data::Empty],
            vec![s("A"), s("TRW"), s("F2"), Data::Int(0)],
            vec![s("A"), s("FAG"), s("R9"), Data::Int(0)],
        ]);

        assert_eq!(result.total_lines, 5);
        assert_eq!(result.skipped_lines, 1);
        assert_eq!(result.valid_lines, 4);
        assert!(result.messages.is_empty());
    }

    #[test]
    fn test_missing_required_field_skips_with_line_number() {
        let result = segment_rows(vec![
            vec![s("A"), s("SKF"), s("Z16"), Data::Int(0)],
            vec![s("A"), s(""), s("B1"), Data::Int(0)],
        ]);

        assert_eq!(result.valid_lines, 1);
        assert_eq!(result.skipped_lines, 1);
        // Header is line 1, so the bad second data row is line 3.
        assert!(result.messages[0].contains("Line 3"));
        assert!(result.messages[0].contains("marque"));
    }

    #[test]
    fn test_invalid_numeric_treated_as_absent_then_defaulted() {
        let result = segment_rows(vec![vec![s("A"), s("SKF"), s("Z16"), s("oui")]]);

        assert_eq!(result.valid_lines, 1);
        // "oui" is not coercible, so the strategiq default of 0 applies.
        assert_eq!(result.rows[0].int("strategiq"), Some(0));
    }

    #[test]
    fn test_disallowed_numeric_value_treated_as_absent() {
        let result = segment_rows(vec![vec![s("A"), s("SKF"), s("Z16"), Data::Int(7)]]);

        // 7 is outside strategiq's {0, 1}; default applies instead.
        assert_eq!(result.rows[0].int("strategiq"), Some(0));
    }

    #[test]
    fn test_float_whole_numbers_coerce_to_int() {
        let result = segment_rows(vec![vec![s("A"), s("SKF"), s("Z16"), Data::Float(1.0)]]);
        assert_eq!(result.rows[0].int("strategiq"), Some(1));
    }

    #[test]
    fn test_error_budget_truncates_when_exceeded() {
        let bad_row = || vec![s("A"), s(""), s("B1"), Data::Int(0)];
        let t = table(
            &["SEGMENT", "MARQUE", "CAT_FAB", "STRATEGIQ"],
            vec![bad_row(), bad_row(), bad_row(), bad_row()],
        );
        let mapping = match_headers(&t.headers, &SEGMENT_SCHEMA);
        let result = normalize_rows(&t, &mapping, &SEGMENT_SCHEMA, 2);

        assert_eq!(result.skipped_lines, 2);
        assert!(result.messages.last().unwrap().contains("error budget"));
    }

    #[test]
    fn test_error_budget_allows_exactly_budget_skips() {
        // A budget of 2 tolerates 2 skips without truncating.
        let bad_row = || vec![s("A"), s(""), s("B1"), Data::Int(0)];
        let t = table(
            &["SEGMENT", "MARQUE", "CAT_FAB", "STRATEGIQ"],
            vec![bad_row(), bad_row(), vec![s("A"), s("SKF"), s("Z16"), Data::Int(0)]],
        );
        let mapping = match_headers(&t.headers, &SEGMENT_SCHEMA);
        let result = normalize_rows(&t, &mapping, &SEGMENT_SCHEMA, 2);

        assert_eq!(result.skipped_lines, 2);
        assert_eq!(result.valid_lines, 1);
        assert!(!result.messages.iter().any(|m| m.contains("error budget")));
    }

    #[test]
    fn test_cir_derives_combined_code_and_designation() {
        let t = table(
            &["CODE_NIV1", "DESIGNATION_NIV1", "CODE_NIV2", "DESIGNATION_NIV2", "CODE_NIV3"],
            vec![vec![Data::Int(10), s("Mecanique"), Data::Int(5), s("Roulements"), Data::Int(2)]],
        );
        let mapping = match_headers(&t.headers, &CIR_SCHEMA);
        let result = normalize_rows(&t, &mapping, &CIR_SCHEMA, 100);

        assert_eq!(result.valid_lines, 1);
        assert_eq!(result.rows[0].text("code_complet"), Some("10.5.2"));
        assert_eq!(
            result.rows[0].text("designation_complete"),
            Some("Mecanique / Roulements")
        );
    }

    #[test]
    fn test_duplicate_identical_headers_read_first_column() {
        // The fourth column repeats MARQUE; its cell must not shadow the
        // value from the column that actually claimed the field.
        let t = table(
            &["SEGMENT", "MARQUE", "CAT_FAB", "MARQUE"],
            vec![vec![s("A"), s("SKF"), s("Z16"), s("NSK")]],
        );
        let mapping = match_headers(&t.headers, &SEGMENT_SCHEMA);
        let result = normalize_rows(&t, &mapping, &SEGMENT_SCHEMA, 100);

        assert_eq!(result.valid_lines, 1);
        assert_eq!(result.rows[0].text("marque"), Some("SKF"));
    }

    #[test]
    fn test_classifier_fields_left_absent_not_defaulted() {
        let result = segment_rows(vec![vec![s("A"), s("SKF"), s("Z16"), Data::Int(0)]]);
        assert!(result.rows[0].fields.get("cir_niv1").is_none());
    }
}
