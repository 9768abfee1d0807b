//! Header-to-field matching
//!
//! Maps raw column headers onto a schema's canonical fields.
//! Priority: Exact → Fuzzy. A field can be claimed by at most one header,
//! which prevents duplicate-column ambiguity; exact claims are resolved for
//! every header before any fuzzy claim is attempted, so a fuzzy match can
//! never steal a field another header names exactly.

use std::collections::{HashMap, HashSet};

use strsim::normalized_levenshtein;

use super::models::{HeaderMapping, MatchType};
use crate::schema::FieldSchema;

/// Normalize a header or alias for comparison.
fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Best fuzzy score between a normalized header and a field's aliases.
fn best_alias_score(header: &str, aliases: &[&str]) -> f64 {
    aliases
        .iter()
        .map(|alias| normalized_levenshtein(header, &normalize(alias)))
        .fold(0.0, f64::max)
}

/// Match raw headers against a schema's canonical fields.
///
/// Matching outcome per header depends only on that header's text and the
/// set of still-unclaimed fields, so shuffling header order cannot change
/// which header claims which field.
pub fn match_headers(headers: &[String], schema: &FieldSchema) -> HeaderMapping {
    let mut columns: HashMap<usize, String> = HashMap::new();
    let mut match_types: HashMap<usize, MatchType> = HashMap::new();
    let mut by_header: HashMap<String, String> = HashMap::new();
    let mut claimed: HashSet<&str> = HashSet::new();

    // Pass 1: case-insensitive exact alias matches.
    for (idx, header) in headers.iter().enumerate() {
        let needle = normalize(header);
        if needle.is_empty() {
            continue;
        }
        let hit = schema.fields.iter().find(|field| {
            !claimed.contains(field.name)
                && field.aliases.iter().any(|alias| normalize(alias) == needle)
        });
        if let Some(field) = hit {
            claimed.insert(field.name);
            columns.insert(idx, field.name.to_string());
            match_types.insert(idx, MatchType::Exact);
            by_header.insert(header.clone(), field.name.to_string());
        }
    }

    // Pass 2: fuzzy matches against unclaimed fields only, best score wins.
    // Ties break by schema field order for determinism.
    for (idx, header) in headers.iter().enumerate() {
        if columns.contains_key(&idx) {
            continue;
        }
        let needle = normalize(header);
        if needle.is_empty() {
            continue;
        }

        let mut best: Option<(&str, f64)> = None;
        for field in &schema.fields {
            if claimed.contains(field.name) {
                continue;
            }
            let score = best_alias_score(&needle, &field.aliases);
            if best.map(|(_, s)| score > s).unwrap_or(true) {
                best = Some((field.name, score));
            }
        }

        if let Some((name, score)) = best
            && score >= schema.fuzzy_threshold
        {
            log::debug!(
                "Header '{}' fuzzy-matched to field '{}' (score {:.2})",
                header,
                name,
                score
            );
            claimed.insert(name);
            columns.insert(idx, name.to_string());
            match_types.insert(idx, MatchType::Fuzzy(score));
            by_header.insert(header.clone(), name.to_string());
        }
    }

    let unmapped: Vec<String> = headers
        .iter()
        .enumerate()
        .filter(|(idx, h)| !h.trim().is_empty() && !columns.contains_key(idx))
        .map(|(_, h)| h.clone())
        .collect();

    let confidence = claimed.len() as f64 / schema.field_count() as f64;
    log::debug!(
        "Header matching for {}: {}/{} fields claimed (confidence {:.2}), {} unmapped",
        schema.dataset,
        claimed.len(),
        schema.field_count(),
        confidence,
        unmapped.len()
    );

    HeaderMapping {
        columns,
        match_types,
        by_header,
        unmapped,
        confidence,
    }
}
