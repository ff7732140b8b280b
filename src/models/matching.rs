use serde::{Deserialize, Serialize};

use crate::models::EntityId;

/// Identifier columns that can back an exact-key index.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyField {
    Ean,
    Upc,
    Mpn,
    Asin,
}

impl KeyField {
    pub fn canonical_field(&self) -> &'static str {
        match self {
            KeyField::Ean => "ean",
            KeyField::Upc => "upc",
            KeyField::Mpn => "mpn",
            KeyField::Asin => "asin",
        }
    }

    /// Barcodes are purely numeric; leading zeros carry no meaning between GTIN-12 and GTIN-13.
    pub fn is_numeric_code(&self) -> bool {
        matches!(self, KeyField::Ean | KeyField::Upc)
    }
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum MatchStrategy {
    ExactKey {
        field: KeyField,
        /// Read the key from this source column instead of the mapped field.
        #[serde(default)]
        column: Option<String>,
        #[serde(default = "enabled_by_default")]
        enabled: bool,
    },
    SecondaryKey {
        field: KeyField,
        #[serde(default)]
        column: Option<String>,
        #[serde(default = "enabled_by_default")]
        enabled: bool,
    },
    FuzzyName {
        #[serde(default)]
        column: Option<String>,
        #[serde(default)]
        threshold: Option<f64>,
        #[serde(default = "enabled_by_default")]
        enabled: bool,
    },
}

impl MatchStrategy {
    pub fn exact(field: KeyField) -> Self {
        MatchStrategy::ExactKey { field, column: None, enabled: true }
    }

    pub fn secondary(field: KeyField) -> Self {
        MatchStrategy::SecondaryKey { field, column: None, enabled: true }
    }

    pub fn fuzzy() -> Self {
        MatchStrategy::FuzzyName { column: None, threshold: None, enabled: true }
    }

    pub fn with_column(mut self, source_column: impl Into<String>) -> Self {
        match &mut self {
            MatchStrategy::ExactKey { column, .. }
            | MatchStrategy::SecondaryKey { column, .. }
            | MatchStrategy::FuzzyName { column, .. } => *column = Some(source_column.into()),
        }
        self
    }

    pub fn disabled(mut self) -> Self {
        match &mut self {
            MatchStrategy::ExactKey { enabled, .. }
            | MatchStrategy::SecondaryKey { enabled, .. }
            | MatchStrategy::FuzzyName { enabled, .. } => *enabled = false,
        }
        self
    }

    pub fn is_enabled(&self) -> bool {
        match self {
            MatchStrategy::ExactKey { enabled, .. }
            | MatchStrategy::SecondaryKey { enabled, .. }
            | MatchStrategy::FuzzyName { enabled, .. } => *enabled,
        }
    }

    pub fn column(&self) -> Option<&str> {
        match self {
            MatchStrategy::ExactKey { column, .. }
            | MatchStrategy::SecondaryKey { column, .. }
            | MatchStrategy::FuzzyName { column, .. } => column.as_deref(),
        }
    }

    pub fn key_field(&self) -> Option<KeyField> {
        match self {
            MatchStrategy::ExactKey { field, .. } | MatchStrategy::SecondaryKey { field, .. } => Some(*field),
            MatchStrategy::FuzzyName { .. } => None,
        }
    }

    pub fn method(&self) -> MatchMethod {
        match self {
            MatchStrategy::ExactKey { .. } => MatchMethod::ExactKey,
            MatchStrategy::SecondaryKey { .. } => MatchMethod::SecondaryKey,
            MatchStrategy::FuzzyName { .. } => MatchMethod::FuzzyName,
        }
    }
}

/// Ordered strategies; position is priority.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchKeyConfig {
    pub strategies: Vec<MatchStrategy>,
}

impl Default for MatchKeyConfig {
    fn default() -> Self {
        Self {
            strategies: vec![
                MatchStrategy::exact(KeyField::Ean),
                MatchStrategy::secondary(KeyField::Mpn),
                MatchStrategy::fuzzy(),
            ],
        }
    }
}

impl MatchKeyConfig {
    pub fn new(strategies: Vec<MatchStrategy>) -> Self {
        Self { strategies }
    }

    pub fn enabled(&self) -> impl Iterator<Item = &MatchStrategy> {
        self.strategies.iter().filter(|s| s.is_enabled())
    }

    /// Key fields that need an exact-key index.
    pub fn key_fields(&self) -> Vec<KeyField> {
        let mut fields: Vec<KeyField> = self.enabled().filter_map(|s| s.key_field()).collect();
        fields.sort();
        fields.dedup();
        fields
    }

    pub fn uses_fuzzy_name(&self) -> bool {
        self.enabled().any(|s| matches!(s, MatchStrategy::FuzzyName { .. }))
    }

    /// Source columns bound to strategies; these ride along on mapped records.
    pub fn custom_columns(&self) -> Vec<String> {
        let mut cols: Vec<String> = self.enabled().filter_map(|s| s.column().map(|c| c.to_string())).collect();
        cols.sort();
        cols.dedup();
        cols
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, async_graphql::Enum)]
pub enum MatchMethod {
    ExactKey,
    SecondaryKey,
    FuzzyName,
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMethod::ExactKey => "exact_key",
            MatchMethod::SecondaryKey => "secondary_key",
            MatchMethod::FuzzyName => "fuzzy_name",
        }
    }

    pub fn confidence(&self) -> ConfidenceTier {
        match self {
            MatchMethod::ExactKey => ConfidenceTier::High,
            MatchMethod::SecondaryKey => ConfidenceTier::Medium,
            MatchMethod::FuzzyName => ConfidenceTier::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, async_graphql::Enum)]
pub enum ConfidenceTier {
    High,
    Medium,
    Low,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchResult {
    pub record_id: u64,
    pub matched_entity_id: Option<EntityId>,
    pub method: Option<MatchMethod>,
    pub confidence_tier: ConfidenceTier,
    /// Similarity score for fuzzy matches.
    pub score: Option<f64>,
}

impl MatchResult {
    pub fn unmatched(record_id: u64) -> Self {
        Self {
            record_id,
            matched_entity_id: None,
            method: None,
            confidence_tier: ConfidenceTier::None,
            score: None,
        }
    }

    pub fn matched(record_id: u64, entity: EntityId, method: MatchMethod, score: Option<f64>) -> Self {
        Self {
            record_id,
            matched_entity_id: Some(entity),
            method: Some(method),
            confidence_tier: method.confidence(),
            score,
        }
    }

    pub fn is_matched(&self) -> bool {
        self.matched_entity_id.is_some()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, async_graphql::SimpleObject)]
pub struct MatchStats {
    pub exact_key: u64,
    pub secondary_key: u64,
    pub fuzzy_name: u64,
    pub unmatched: u64,
}

impl MatchStats {
    pub fn record(&mut self, result: &MatchResult) {
        match result.method {
            Some(MatchMethod::ExactKey) => self.exact_key += 1,
            Some(MatchMethod::SecondaryKey) => self.secondary_key += 1,
            Some(MatchMethod::FuzzyName) => self.fuzzy_name += 1,
            None => self.unmatched += 1,
        }
    }

    pub fn merge(&mut self, other: &MatchStats) {
        self.exact_key += other.exact_key;
        self.secondary_key += other.secondary_key;
        self.fuzzy_name += other.fuzzy_name;
        self.unmatched += other.unmatched;
    }
}
