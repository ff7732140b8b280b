pub mod memory;
pub mod mongo;

pub use memory::*;
pub use mongo::*;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::handlers::{count_rows, DecodeOptions, ImportSource};
use crate::models::*;

/// Where imported records land and where existing products are looked up.
///
/// `upsert_batch` must be idempotent: re-applying a batch overwrites the
/// same rows (products by normalized EAN, links by their deterministic id).
/// Jobs never put two records with the same key into one batch.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn upsert_batch(&self, records: &[SinkRecord]) -> Result<BatchOutcome>;

    /// Map each requested normalized key to an entity id. Keys with no entity are absent.
    async fn lookup_by_key(&self, field: KeyField, values: &[String]) -> Result<HashMap<String, EntityId>>;

    /// All product names, oldest first.
    async fn list_entity_names(&self) -> Result<Vec<(EntityId, String)>>;

    /// Get-or-create a supplier by name.
    async fn ensure_supplier(&self, name: &str) -> Result<EntityId>;

    async fn count_estimate(&self, source: &ImportSource, options: &DecodeOptions) -> Result<u64> {
        let source = source.clone();
        let options = options.clone();
        tokio::task::spawn_blocking(move || count_rows(&source, &options))
            .await
            .map_err(|e| ImportError::Configuration(format!("Row count task failed: {}", e)))?
    }
}
