use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::models::*;

/// Proposed mapping for a set of headers plus whatever could not be settled.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AutoMapping {
    pub mapping: FieldMapping,
    /// Canonical fields left for manual assignment, in schema order.
    pub unresolved: Vec<String>,
    /// The subset of `unresolved` the schema requires.
    pub missing_required: Vec<String>,
}

fn tokens(s: &str) -> BTreeSet<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Propose a mapping from source headers to the schema's canonical fields.
///
/// Three passes, each only assigning unambiguous pairs:
/// 1. header equals a field's name or label once normalized;
/// 2. header equals one of the field's synonyms;
/// 3. header tokens contain every token of the field's label or a synonym.
///
/// A field with several equally good headers, or a header claimed by several
/// fields in the same pass, stays unresolved.
pub fn auto_map(headers: &[String], schema: &ImportSchema) -> AutoMapping {
    let normalized: Vec<String> = headers.iter().map(|h| normalize_name(h)).collect();
    let header_tokens: Vec<BTreeSet<String>> = headers.iter().map(|h| tokens(h)).collect();

    let mut mapping = FieldMapping::new();
    let mut claimed: HashSet<usize> = HashSet::new();

    let passes: [&dyn Fn(&CanonicalField, usize) -> bool; 3] = [
        &|field: &CanonicalField, i: usize| {
            let n = &normalized[i];
            !n.is_empty() && (*n == normalize_name(&field.name) || *n == normalize_name(&field.label))
        },
        &|field: &CanonicalField, i: usize| {
            let n = &normalized[i];
            !n.is_empty() && field.synonyms.iter().any(|s| normalize_name(s) == *n)
        },
        &|field: &CanonicalField, i: usize| {
            let ht = &header_tokens[i];
            std::iter::once(&field.label)
                .chain(field.synonyms.iter())
                .map(|alias| tokens(alias))
                .any(|at| !at.is_empty() && at.is_subset(ht))
        },
    ];

    for is_hit in passes {
        let open: Vec<&CanonicalField> =
            schema.fields.iter().filter(|f| !mapping.columns.contains_key(&f.name)).collect();

        let candidates: Vec<(&CanonicalField, Vec<usize>)> = open
            .iter()
            .map(|f| {
                let hits = (0..headers.len()).filter(|i| !claimed.contains(i) && is_hit(*f, *i)).collect();
                (*f, hits)
            })
            .collect();

        for (field, hits) in &candidates {
            if hits.len() != 1 {
                continue;
            }
            let header = hits[0];
            let contested = candidates
                .iter()
                .filter(|(other, other_hits)| other.name != field.name && other_hits.contains(&header))
                .count();
            if contested > 0 {
                continue;
            }
            mapping.columns.insert(field.name.clone(), headers[header].clone());
            claimed.insert(header);
        }
    }

    let unresolved: Vec<String> = schema
        .fields
        .iter()
        .filter(|f| !mapping.columns.contains_key(&f.name))
        .map(|f| f.name.clone())
        .collect();
    let missing_required = mapping.missing_required(schema);

    AutoMapping { mapping, unresolved, missing_required }
}
