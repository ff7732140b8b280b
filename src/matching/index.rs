use std::collections::{BTreeSet, HashMap, HashSet};

use crate::matching::{name_tokens, normalize_key};
use crate::models::*;
use crate::storage::PersistenceSink;

#[derive(Debug, Clone)]
struct NameEntry {
    id: EntityId,
    joined: String,
    tokens: BTreeSet<String>,
}

/// Read-only lookup structure for one job, built before the first chunk.
///
/// Key maps keep the first id seen for a value; names keep source order so
/// fuzzy ties resolve to the earliest entity.
#[derive(Debug, Clone, Default)]
pub struct EntityIndex {
    keys: HashMap<KeyField, HashMap<String, EntityId>>,
    names: Vec<NameEntry>,
    token_postings: HashMap<String, Vec<usize>>,
    unavailable_keys: HashSet<KeyField>,
    names_unavailable: bool,
}

impl EntityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an already-normalized key.
    pub fn insert_key(&mut self, field: KeyField, key: String, id: EntityId) {
        self.keys.entry(field).or_default().entry(key).or_insert(id);
    }

    /// Normalize `raw` and insert it; placeholder values are ignored.
    pub fn insert_raw_key(&mut self, field: KeyField, raw: &str, id: EntityId) {
        if let Some(key) = normalize_key(field, raw) {
            self.insert_key(field, key, id);
        }
    }

    pub fn insert_name(&mut self, id: EntityId, name: &str) {
        let tokens = name_tokens(name);
        if tokens.is_empty() {
            return;
        }
        let position = self.names.len();
        for t in &tokens {
            self.token_postings.entry(t.clone()).or_default().push(position);
        }
        let joined = tokens.iter().cloned().collect::<Vec<_>>().join(" ");
        self.names.push(NameEntry { id, joined, tokens });
    }

    pub fn lookup(&self, field: KeyField, key: &str) -> Option<EntityId> {
        self.keys.get(&field).and_then(|m| m.get(key)).copied()
    }

    pub fn mark_key_unavailable(&mut self, field: KeyField) {
        self.unavailable_keys.insert(field);
    }

    pub fn mark_names_unavailable(&mut self) {
        self.names_unavailable = true;
    }

    pub fn key_available(&self, field: KeyField) -> bool {
        !self.unavailable_keys.contains(&field)
    }

    pub fn names_available(&self) -> bool {
        !self.names_unavailable
    }

    pub fn key_count(&self, field: KeyField) -> usize {
        self.keys.get(&field).map(|m| m.len()).unwrap_or(0)
    }

    pub fn name_count(&self) -> usize {
        self.names.len()
    }

    /// Best-scoring name at or above `threshold`. Only names sharing at least
    /// one token with the query are scored. Candidates are visited in source
    /// order and only a strictly higher score replaces the current best.
    pub fn best_name_match(&self, name: &str, threshold: f64) -> Option<(EntityId, f64)> {
        let query = name_tokens(name);
        if query.is_empty() {
            return None;
        }
        let joined = query.iter().cloned().collect::<Vec<_>>().join(" ");

        let mut candidates: Vec<usize> = query
            .iter()
            .filter_map(|t| self.token_postings.get(t))
            .flatten()
            .copied()
            .collect();
        candidates.sort_unstable();
        candidates.dedup();

        let mut best: Option<(EntityId, f64)> = None;
        for i in candidates {
            let entry = &self.names[i];
            let score = similarity(&query, &joined, &entry.tokens, &entry.joined);
            if score < threshold {
                continue;
            }
            match best {
                Some((_, s)) if score <= s => {}
                _ => best = Some((entry.id, score)),
            }
        }
        best
    }
}

/// Weighted blend of token overlap (Dice) and Jaro-Winkler over the joined tokens.
pub fn similarity(a_tokens: &BTreeSet<String>, a_joined: &str, b_tokens: &BTreeSet<String>, b_joined: &str) -> f64 {
    let total = a_tokens.len() + b_tokens.len();
    if total == 0 {
        return 0.0;
    }
    let shared = a_tokens.intersection(b_tokens).count();
    let dice = (2 * shared) as f64 / total as f64;
    0.6 * dice + 0.4 * strsim::jaro_winkler(a_joined, b_joined)
}

/// Build the index for a supplier job.
///
/// `values` holds the distinct normalized keys seen in the file, per key field.
/// Lookups go to the sink in slices of `prefetch_batch_size`. A failed lookup
/// marks that strategy unavailable instead of failing the job.
pub async fn build_index(
    sink: &dyn PersistenceSink,
    config: &MatchKeyConfig,
    values: &HashMap<KeyField, BTreeSet<String>>,
    prefetch_batch_size: usize,
) -> EntityIndex {
    let mut index = EntityIndex::new();
    let batch = prefetch_batch_size.max(1);

    for field in config.key_fields() {
        let Some(keys) = values.get(&field) else { continue };
        let keys: Vec<String> = keys.iter().cloned().collect();

        for slice in keys.chunks(batch) {
            match sink.lookup_by_key(field, slice).await {
                Ok(found) => {
                    // iterate the request slice, not the map, so insertion order is stable
                    for key in slice {
                        if let Some(id) = found.get(key) {
                            index.insert_key(field, key.clone(), *id);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(field = ?field, error = %e, "Key lookup failed; strategy disabled for this job");
                    index.mark_key_unavailable(field);
                    break;
                }
            }
        }

        tracing::debug!(field = ?field, requested = keys.len(), found = index.key_count(field), "Prefetched match keys");
    }

    if config.uses_fuzzy_name() {
        match sink.list_entity_names().await {
            Ok(names) => {
                for (id, name) in &names {
                    index.insert_name(*id, name);
                }
                tracing::debug!(names = index.name_count(), "Loaded name index");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Name listing failed; fuzzy matching disabled for this job");
                index.mark_names_unavailable();
            }
        }
    }

    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn first_key_wins() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut index = EntityIndex::new();
        index.insert_raw_key(KeyField::Ean, "0123", a);
        index.insert_raw_key(KeyField::Ean, "123", b);
        assert_eq!(index.lookup(KeyField::Ean, "123"), Some(a));
        assert_eq!(index.key_count(KeyField::Ean), 1);
    }

    #[test]
    fn fuzzy_prefers_higher_score() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut index = EntityIndex::new();
        index.insert_name(a, "Acme Blue Widget Large");
        index.insert_name(b, "Acme Blue Widget");
        let (id, score) = index.best_name_match("acme blue widget", 0.85).unwrap();
        assert_eq!(id, b);
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn fuzzy_tie_goes_to_first_in_source_order() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut index = EntityIndex::new();
        index.insert_name(a, "Blue Widget");
        index.insert_name(b, "blue-widget");
        assert_eq!(index.best_name_match("Blue Widget", 0.85).map(|m| m.0), Some(a));
    }

    #[test]
    fn fuzzy_respects_threshold() {
        let mut index = EntityIndex::new();
        index.insert_name(Uuid::new_v4(), "Garden Hose 20m");
        assert!(index.best_name_match("Kitchen Knife Set", 0.85).is_none());
        assert!(index.best_name_match("", 0.0).is_none());
    }
}
