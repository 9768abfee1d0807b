//! Dataset schemas for the two importable datasets
//!
//! A schema is the fixed target shape an uploaded sheet is mapped onto:
//! canonical field names, their accepted header spellings, per-field
//! constraints, the natural key, and the matcher thresholds. Two schemas
//! exist: the segment mapping (segment/marque/cat_fab rows with an optional
//! CIR classification) and the CIR classification hierarchy itself.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Default top-level CIR code assigned when nothing can be inferred.
pub const DEFAULT_CIR_NIV1: i64 = 1;

/// Sentinel code meaning "not yet classified" for subordinate CIR levels.
pub const UNCLASSIFIED_CIR_CODE: i64 = 999;

/// Which dataset an import targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetType {
    /// Segment mapping rows (marque + cat_fab keyed).
    SegmentMapping,
    /// Three-level CIR classification hierarchy (combined-code keyed).
    CirClassification,
}

impl std::fmt::Display for DatasetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatasetType::SegmentMapping => write!(f, "segment_mapping"),
            DatasetType::CirClassification => write!(f, "cir_classification"),
        }
    }
}

impl DatasetType {
    /// The schema describing this dataset's importable fields.
    pub fn schema(&self) -> &'static FieldSchema {
        match self {
            DatasetType::SegmentMapping => &SEGMENT_SCHEMA,
            DatasetType::CirClassification => &CIR_SCHEMA,
        }
    }
}

/// One canonical field and its validation constraints.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    /// Canonical field name, unique within a schema.
    pub name: &'static str,
    /// Accepted header spellings, compared case-insensitively.
    pub aliases: Vec<&'static str>,
    /// Rows missing this field after normalization are skipped.
    pub required: bool,
    /// Values are coerced to integers; unparseable text is treated as absent.
    pub numeric: bool,
    /// String values longer than this are truncated.
    pub max_len: Option<usize>,
    /// Inclusive range for numeric values; out-of-range is treated as absent.
    pub range: Option<(i64, i64)>,
    /// Enumerated allowed numeric values; anything else is treated as absent.
    pub allowed: Option<Vec<i64>>,
    /// Filled in when the cell is absent. Fields feeding the auto-classifier
    /// deliberately carry no default so absence stays detectable.
    pub default: Option<Value>,
}

impl FieldSpec {
    fn text(name: &'static str, aliases: &[&'static str]) -> Self {
        Self {
            name,
            aliases: aliases.to_vec(),
            required: false,
            numeric: false,
            max_len: Some(255),
            range: None,
            allowed: None,
            default: None,
        }
    }

    fn numeric(name: &'static str, aliases: &[&'static str]) -> Self {
        Self {
            name,
            aliases: aliases.to_vec(),
            required: false,
            numeric: true,
            max_len: None,
            range: None,
            allowed: None,
            default: None,
        }
    }

    fn required(mut self) -> Self {
        self.required = true;
        self
    }

    fn range(mut self, min: i64, max: i64) -> Self {
        self.range = Some((min, max));
        self
    }

    fn allowed(mut self, values: &[i64]) -> Self {
        self.allowed = Some(values.to_vec());
        self
    }

    fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// The fixed target shape for one dataset type.
#[derive(Debug, Clone)]
pub struct FieldSchema {
    pub dataset: DatasetType,
    /// Canonical fields in declaration order (order is the fuzzy tie-break).
    pub fields: Vec<FieldSpec>,
    /// Minimum normalized-edit-distance score a fuzzy header match must clear.
    pub fuzzy_threshold: f64,
    /// Minimum mapping confidence below which the whole file is rejected.
    pub min_confidence: f64,
    /// Fields whose combined values form the natural record key.
    pub key_fields: Vec<&'static str>,
    /// Fields compared when deciding updated vs unchanged.
    pub comparison_fields: Vec<&'static str>,
    /// Case-insensitive substrings used to pick a sheet when none is named.
    pub sheet_hints: Vec<&'static str>,
}

impl FieldSchema {
    /// Look up a field spec by canonical name.
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Canonical names of all required fields.
    pub fn required_fields(&self) -> Vec<&'static str> {
        self.fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name)
            .collect()
    }

    /// Total canonical field count (the confidence denominator).
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }
}

/// Segment mapping schema: one row per (marque, cat_fab) pair.
pub static SEGMENT_SCHEMA: Lazy<FieldSchema> = Lazy::new(|| FieldSchema {
    dataset: DatasetType::SegmentMapping,
    fields: vec![
        FieldSpec::text("segment", &["segment", "seg", "segmentation"]),
        FieldSpec::text("marque", &["marque", "brand", "mrq"]).required(),
        FieldSpec::text("cat_fab", &["cat_fab", "categorie fabricant", "cat fabricant", "catfab"])
            .required(),
        FieldSpec::text("designation", &["designation", "libelle", "description", "desig"]),
        FieldSpec::numeric("strategiq", &["strategiq", "strategique", "strat"])
            .allowed(&[0, 1])
            .default_value(json!(0)),
        FieldSpec::text("code_ext", &["code_ext", "code externe", "ext"]),
        FieldSpec::numeric("cir_niv1", &["cir_niv1", "cir niveau 1", "cir1", "niv1"]).range(0, 999),
        FieldSpec::numeric("cir_niv2", &["cir_niv2", "cir niveau 2", "cir2", "niv2"]).range(0, 999),
        FieldSpec::numeric("cir_niv3", &["cir_niv3", "cir niveau 3", "cir3", "niv3"]).range(0, 999),
    ],
    fuzzy_threshold: 0.72,
    min_confidence: 0.30,
    key_fields: vec!["marque", "cat_fab"],
    comparison_fields: vec![
        "segment",
        "designation",
        "strategiq",
        "code_ext",
        "cir_niv1",
        "cir_niv2",
        "cir_niv3",
    ],
    sheet_hints: vec!["requete", "query", "export"],
});

/// CIR classification schema: one row per three-level hierarchy entry.
/// Classification exports vary a lot in header punctuation and diacritics,
/// so the fuzzy threshold is looser than the segment schema's.
pub static CIR_SCHEMA: Lazy<FieldSchema> = Lazy::new(|| FieldSchema {
    dataset: DatasetType::CirClassification,
    fields: vec![
        FieldSpec::numeric("code_niv1", &["code_niv1", "code niveau 1", "code niv. 1", "code 1"])
            .required()
            .range(0, 999),
        FieldSpec::text(
            "designation_niv1",
            &["designation_niv1", "designation niveau 1", "libelle niveau 1"],
        )
        .required(),
        FieldSpec::numeric("code_niv2", &["code_niv2", "code niveau 2", "code niv. 2", "code 2"])
            .required()
            .range(0, 999),
        FieldSpec::text(
            "designation_niv2",
            &["designation_niv2", "designation niveau 2", "libelle niveau 2"],
        ),
        FieldSpec::numeric("code_niv3", &["code_niv3", "code niveau 3", "code niv. 3", "code 3"])
            .required()
            .range(0, 999),
        FieldSpec::text(
            "designation_niv3",
            &["designation_niv3", "designation niveau 3", "libelle niveau 3"],
        ),
    ],
    fuzzy_threshold: 0.55,
    min_confidence: 0.30,
    key_fields: vec!["code_complet"],
    comparison_fields: vec!["designation_niv1", "designation_niv2", "designation_niv3"],
    sheet_hints: vec!["classification", "cir", "hierarchie"],
});
