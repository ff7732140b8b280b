use crate::matching::{normalize_key, EntityIndex, DEFAULT_FUZZY_THRESHOLD};
use crate::models::*;

/// Name used for fuzzy matching when no custom column is configured.
fn record_name(record: &MappedRecord) -> Option<&str> {
    record.text("product_name").or_else(|| record.text("title"))
}

fn strategy_value<'a>(record: &'a MappedRecord, strategy: &MatchStrategy) -> Option<&'a str> {
    let value = match (strategy.column(), strategy) {
        (Some(column), _) => record.passthrough(column),
        (None, MatchStrategy::FuzzyName { .. }) => record_name(record),
        (None, _) => strategy.key_field().and_then(|f| record.text(f.canonical_field())),
    };
    value.filter(|v| !v.trim().is_empty())
}

/// Run the enabled strategies in priority order; the first hit wins.
pub fn resolve(record: &MappedRecord, config: &MatchKeyConfig, index: &EntityIndex) -> MatchResult {
    for strategy in config.enabled() {
        let Some(value) = strategy_value(record, strategy) else { continue };

        match strategy {
            MatchStrategy::ExactKey { field, .. } | MatchStrategy::SecondaryKey { field, .. } => {
                if !index.key_available(*field) {
                    continue;
                }
                let Some(key) = normalize_key(*field, value) else { continue };
                if let Some(id) = index.lookup(*field, &key) {
                    return MatchResult::matched(record.row, id, strategy.method(), None);
                }
            }
            MatchStrategy::FuzzyName { threshold, .. } => {
                if !index.names_available() {
                    continue;
                }
                let threshold = threshold.unwrap_or(DEFAULT_FUZZY_THRESHOLD);
                if let Some((id, score)) = index.best_name_match(value, threshold) {
                    return MatchResult::matched(record.row, id, MatchMethod::FuzzyName, Some(score));
                }
            }
        }
    }
    MatchResult::unmatched(record.row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn record(fields: &[(&str, &str)]) -> MappedRecord {
        let mut r = MappedRecord::new(1);
        for (k, v) in fields {
            r.fields.insert(k.to_string(), FieldValue::Text(v.to_string()));
        }
        r
    }

    fn index(ean_id: Uuid, mpn_id: Uuid, name_id: Uuid) -> EntityIndex {
        let mut index = EntityIndex::new();
        index.insert_raw_key(KeyField::Ean, "5012345678900", ean_id);
        index.insert_raw_key(KeyField::Mpn, "WX-100", mpn_id);
        index.insert_name(name_id, "Acme Blue Widget");
        index
    }

    #[test]
    fn exact_key_beats_fuzzy() {
        let (e, m, n) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let idx = index(e, m, n);
        let r = record(&[("ean", "5012345678900"), ("product_name", "Acme Blue Widget")]);
        let result = resolve(&r, &MatchKeyConfig::default(), &idx);
        assert_eq!(result.matched_entity_id, Some(e));
        assert_eq!(result.method, Some(MatchMethod::ExactKey));
        assert_eq!(result.confidence_tier, ConfidenceTier::High);
    }

    #[test]
    fn secondary_key_when_primary_missing() {
        let (e, m, n) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let idx = index(e, m, n);
        let r = record(&[("mpn", "wx100")]);
        let result = resolve(&r, &MatchKeyConfig::default(), &idx);
        assert_eq!(result.matched_entity_id, Some(m));
        assert_eq!(result.method, Some(MatchMethod::SecondaryKey));
        assert_eq!(result.confidence_tier, ConfidenceTier::Medium);
    }

    #[test]
    fn fuzzy_name_is_last_resort() {
        let (e, m, n) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let idx = index(e, m, n);
        let r = record(&[("ean", "999"), ("product_name", "ACME blue widget")]);
        let result = resolve(&r, &MatchKeyConfig::default(), &idx);
        assert_eq!(result.matched_entity_id, Some(n));
        assert_eq!(result.confidence_tier, ConfidenceTier::Low);
        assert!(result.score.is_some());
    }

    #[test]
    fn disabled_strategies_are_skipped() {
        let (e, m, n) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let idx = index(e, m, n);
        let cfg = MatchKeyConfig::new(vec![
            MatchStrategy::exact(KeyField::Ean).disabled(),
            MatchStrategy::secondary(KeyField::Mpn),
        ]);
        let r = record(&[("ean", "5012345678900"), ("product_name", "Acme Blue Widget")]);
        let result = resolve(&r, &cfg, &idx);
        assert!(!result.is_matched());
        assert_eq!(result.method, None);
        assert_eq!(result.confidence_tier, ConfidenceTier::None);
    }

    #[test]
    fn unavailable_strategy_falls_through() {
        let (e, m, n) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let mut idx = index(e, m, n);
        idx.mark_key_unavailable(KeyField::Ean);
        let r = record(&[("ean", "5012345678900"), ("mpn", "WX-100")]);
        assert_eq!(resolve(&r, &MatchKeyConfig::default(), &idx).method, Some(MatchMethod::SecondaryKey));
    }

    #[test]
    fn custom_column_overrides_mapped_field() {
        let (e, m, n) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let idx = index(e, m, n);
        let mut r = record(&[("mpn", "nothing")]);
        r.passthrough.insert("Vendor Part".into(), "WX 100".into());
        let cfg = MatchKeyConfig::new(vec![MatchStrategy::exact(KeyField::Mpn).with_column("Vendor Part")]);
        assert_eq!(resolve(&r, &cfg, &idx).matched_entity_id, Some(m));
    }
}
