pub mod index;
pub mod matcher;

pub use index::*;
pub use matcher::*;

use std::collections::BTreeSet;

use crate::mapping::fix_scientific_notation;
use crate::models::KeyField;

pub const DEFAULT_FUZZY_THRESHOLD: f64 = 0.85;

/// Canonical form of an identifier for index lookups: trimmed, case-folded,
/// separators removed. Barcodes also lose leading zeros so GTIN-12 and GTIN-13
/// renderings of the same code collide.
pub fn normalize_key(field: KeyField, value: &str) -> Option<String> {
    let expanded = if field.is_numeric_code() { fix_scientific_notation(value) } else { value.to_string() };
    let mut key: String = expanded
        .trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '.' | '/' | '_' | '\u{00A0}'))
        .flat_map(|c| c.to_lowercase())
        .collect();

    if field.is_numeric_code() && key.chars().all(|c| c.is_ascii_digit()) {
        key = key.trim_start_matches('0').to_string();
    }

    if key.is_empty() || matches!(key.as_str(), "nan" | "none" | "null" | "undefined") {
        None
    } else {
        Some(key)
    }
}

/// Lower-cased alphanumeric tokens of a product name.
pub fn name_tokens(name: &str) -> BTreeSet<String> {
    name.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_fold_case_and_separators() {
        assert_eq!(normalize_key(KeyField::Mpn, " ab-12/C.3 "), Some("ab12c3".to_string()));
        assert_eq!(normalize_key(KeyField::Ean, "0012345678905"), Some("12345678905".to_string()));
        assert_eq!(normalize_key(KeyField::Ean, "012345678905"), normalize_key(KeyField::Ean, "12345678905"));
        assert_eq!(normalize_key(KeyField::Ean, "8.40E+11"), Some("840000000000".to_string()));
    }

    #[test]
    fn mpn_keeps_leading_zeros() {
        assert_eq!(normalize_key(KeyField::Mpn, "007"), Some("007".to_string()));
    }

    #[test]
    fn empty_and_placeholder_keys_are_none() {
        assert_eq!(normalize_key(KeyField::Ean, "   "), None);
        assert_eq!(normalize_key(KeyField::Ean, "000"), None);
        assert_eq!(normalize_key(KeyField::Asin, "NaN"), None);
    }
}
