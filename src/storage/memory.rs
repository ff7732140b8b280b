use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::matching::normalize_key;
use crate::models::*;
use crate::storage::PersistenceSink;

#[derive(Debug, Clone)]
pub struct StoredProduct {
    pub id: EntityId,
    pub record: ProductRecord,
}

#[derive(Debug, Default)]
struct MemoryState {
    products: Vec<StoredProduct>,
    product_by_ean: HashMap<String, usize>,
    links: Vec<SupplierProductLink>,
    link_by_id: HashMap<EntityId, usize>,
    suppliers: Vec<(EntityId, String)>,
}

/// Process-local sink for tests and `SINK_BACKEND=memory` runs.
#[derive(Debug, Default)]
pub struct InMemorySink {
    state: Mutex<MemoryState>,
    upsert_calls: AtomicUsize,
    failing_upserts: AtomicUsize,
    fail_lookups: AtomicBool,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>> {
        self.state.lock().map_err(|_| ImportError::Persistence("in-memory sink lock poisoned".to_string()))
    }

    /// Insert or replace a product directly, returning its id.
    pub fn seed_product(&self, record: ProductRecord) -> Result<EntityId> {
        let mut state = self.state()?;
        upsert_product(&mut state, record)
            .ok_or_else(|| ImportError::Persistence("product has no usable EAN".to_string()))
    }

    pub fn products(&self) -> Vec<StoredProduct> {
        self.state().map(|s| s.products.clone()).unwrap_or_default()
    }

    pub fn links(&self) -> Vec<SupplierProductLink> {
        self.state().map(|s| s.links.clone()).unwrap_or_default()
    }

    pub fn suppliers(&self) -> Vec<(EntityId, String)> {
        self.state().map(|s| s.suppliers.clone()).unwrap_or_default()
    }

    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    /// The next `n` upsert calls fail without writing anything.
    pub fn fail_next_upserts(&self, n: usize) {
        self.failing_upserts.store(n, Ordering::SeqCst);
    }

    pub fn set_fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }
}

fn upsert_product(state: &mut MemoryState, record: ProductRecord) -> Option<EntityId> {
    let key = normalize_key(KeyField::Ean, &record.ean)?;
    if let Some(&i) = state.product_by_ean.get(&key) {
        state.products[i].record = record;
        return Some(state.products[i].id);
    }
    let id = Uuid::new_v4();
    state.product_by_ean.insert(key, state.products.len());
    state.products.push(StoredProduct { id, record });
    Some(id)
}

fn key_value(record: &ProductRecord, field: KeyField) -> Option<&str> {
    match field {
        KeyField::Ean => Some(record.ean.as_str()),
        KeyField::Upc => record.upc.as_deref(),
        KeyField::Mpn => record.mpn.as_deref(),
        KeyField::Asin => record.asin.as_deref(),
    }
}

#[async_trait]
impl PersistenceSink for InMemorySink {
    async fn upsert_batch(&self, records: &[SinkRecord]) -> Result<BatchOutcome> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing_upserts.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_upserts.store(failing - 1, Ordering::SeqCst);
            return Err(ImportError::Persistence("simulated write failure".to_string()));
        }

        let mut state = self.state()?;
        let mut outcome = BatchOutcome::default();
        for record in records {
            match record {
                SinkRecord::Product(p) => {
                    if upsert_product(&mut state, p.clone()).is_some() {
                        outcome.upserted += 1;
                    } else {
                        outcome.rejected.push(RecordRejection {
                            row: p.source_row,
                            message: format!("Invalid EAN '{}'", p.ean),
                        });
                    }
                }
                SinkRecord::SupplierLink(link) => {
                    match state.link_by_id.get(&link.id).copied() {
                        Some(i) => state.links[i] = link.clone(),
                        None => {
                            let i = state.links.len();
                            state.link_by_id.insert(link.id, i);
                            state.links.push(link.clone());
                        }
                    }
                    outcome.upserted += 1;
                }
            }
        }
        Ok(outcome)
    }

    async fn lookup_by_key(&self, field: KeyField, values: &[String]) -> Result<HashMap<String, EntityId>> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(ImportError::MatchLookup(format!("simulated lookup failure for {:?}", field)));
        }
        let wanted: HashSet<&str> = values.iter().map(|v| v.as_str()).collect();
        let state = self.state()?;
        let mut found = HashMap::new();
        for p in &state.products {
            let Some(key) = key_value(&p.record, field).and_then(|v| normalize_key(field, v)) else { continue };
            if wanted.contains(key.as_str()) {
                found.entry(key).or_insert(p.id);
            }
        }
        Ok(found)
    }

    async fn list_entity_names(&self) -> Result<Vec<(EntityId, String)>> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(ImportError::MatchLookup("simulated name listing failure".to_string()));
        }
        let state = self.state()?;
        Ok(state.products.iter().map(|p| (p.id, p.record.title.clone())).collect())
    }

    async fn ensure_supplier(&self, name: &str) -> Result<EntityId> {
        let mut state = self.state()?;
        let wanted = name.trim();
        if let Some((id, _)) = state.suppliers.iter().find(|(_, n)| n == wanted) {
            return Ok(*id);
        }
        let id = Uuid::new_v4();
        state.suppliers.push((id, wanted.to_string()));
        Ok(id)
    }
}
