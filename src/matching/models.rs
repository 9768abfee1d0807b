use std::collections::HashMap;

/// How a raw header was matched to a canonical field.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchType {
    /// Case-insensitive exact alias match.
    Exact,
    /// Approximate match with its normalized edit-distance score.
    Fuzzy(f64),
}

impl MatchType {
    /// Display label for summaries shown to the user.
    pub fn label(&self) -> String {
        match self {
            MatchType::Exact => "[Exact]".to_string(),
            MatchType::Fuzzy(score) => format!("[Fuzzy {:.2}]", score),
        }
    }
}

/// Result of mapping one sheet's headers onto a schema.
///
/// Keyed by column index, not header text: two physically distinct columns
/// may carry the identical header, and only one of them claims the field.
/// Read-only once produced; the normalizer consumes it as-is.
#[derive(Debug, Clone)]
pub struct HeaderMapping {
    /// Column index -> canonical field name.
    pub columns: HashMap<usize, String>,
    /// Column index -> how its header was matched.
    pub match_types: HashMap<usize, MatchType>,
    /// Observed header text -> field, for batch audit records.
    pub by_header: HashMap<String, String>,
    /// Headers that claimed no field.
    pub unmapped: Vec<String>,
    /// Claimed fields / total canonical fields in the schema.
    pub confidence: f64,
}

impl HeaderMapping {
    /// The canonical field claimed by a column, if any.
    pub fn field_for_column(&self, index: usize) -> Option<&String> {
        self.columns.get(&index)
    }

    /// The canonical field claimed by a header text, if any.
    pub fn field_for(&self, header: &str) -> Option<&String> {
        self.by_header.get(header)
    }

    /// Canonical fields of the schema that no column claimed.
    pub fn unmatched_fields(&self, schema: &crate::schema::FieldSchema) -> Vec<String> {
        let claimed: std::collections::HashSet<&String> = self.columns.values().collect();
        schema
            .fields
            .iter()
            .map(|f| f.name.to_string())
            .filter(|name| !claimed.contains(name))
            .collect()
    }
}
