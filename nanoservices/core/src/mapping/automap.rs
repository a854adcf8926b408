//! Greedy field-mapping suggestion.
//!
//! Source fields are visited in order. Each one claims the best remaining
//! destination field, so an early source field can take a candidate a later
//! one would have matched better.

use crate::pipeline::FieldMap;

/// A fuzzy candidate must score strictly above this to be accepted.
pub const ACCEPT_THRESHOLD: f64 = 0.5;

/// Normalised name similarity in `[0, 1]`: `1.0` for a case-insensitive
/// match, else `1 - levenshtein(a, b) / (len(a) + len(b))` over lower-cased
/// names, lengths counted in chars.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    if a == b {
        return 1.0;
    }
    let total = a.chars().count() + b.chars().count();
    let distance = strsim::levenshtein(&a, &b);
    1.0 - distance as f64 / total as f64
}

/// Propose source → destination pairs. Deterministic for identical inputs;
/// ties go to the earliest remaining destination field.
pub fn automap(source_fields: &[String], destination_fields: &[String]) -> Vec<FieldMap> {
    let mut pool: Vec<&str> = destination_fields.iter().map(String::as_str).collect();
    let mut mappings = Vec::new();

    for source in source_fields {
        let mut best: Option<(usize, f64)> = None;
        for (idx, candidate) in pool.iter().enumerate() {
            let score = similarity(source, candidate);
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((idx, score));
            }
        }
        let Some((idx, score)) = best else { break };
        if score >= 1.0 || score > ACCEPT_THRESHOLD {
            let destination = pool.remove(idx);
            tracing::trace!(source = %source, destination, score, "automap pair");
            mappings.push(FieldMap::automapped(source.as_str(), destination, score));
        }
    }
    mappings
}
