use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub type EntityId = Uuid;

/// Catalog product, upserted by normalized EAN.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductRecord {
    pub title: String,
    pub ean: String,
    pub brand: String,
    pub sale_price: f64,
    pub mpn: Option<String>,
    pub asin: Option<String>,
    pub upc: Option<String>,
    pub category: Option<String>,
    pub rating: Option<f64>,
    pub review_count: i64,
    pub units_sold: i64,
    pub buy_box_price: f64,
    pub amazon_fee: f64,
    pub fba_fees: f64,
    pub referral_fee: f64,
    pub buy_box_seller_name: Option<String>,
    pub source_row: u64,
}

/// Supplier line item with an optional resolved product. Unmatched links keep
/// `product_id = None` for later manual reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SupplierProductLink {
    pub id: EntityId,
    pub supplier_id: EntityId,
    pub product_id: Option<EntityId>,
    pub ean: Option<String>,
    pub mpn: Option<String>,
    pub product_name: Option<String>,
    pub brand: Option<String>,
    pub cost: f64,
    pub supplier_stock: i64,
    pub moq: i64,
    pub lead_time: String,
    pub payment_terms: String,
    /// `exact_key`, `secondary_key`, `fuzzy_name` or `none`
    pub match_method: String,
    pub source_row: u64,
}

pub const DEFAULT_MOQ: i64 = 1;
pub const DEFAULT_LEAD_TIME: &str = "3 days";
pub const DEFAULT_PAYMENT_TERMS: &str = "Net 30";

/// What identifies a supplier line across imports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKey<'a> {
    /// Normalized EAN
    Ean(&'a str),
    /// Normalized MPN, used when the row has no EAN
    Mpn(&'a str),
    /// Rows without any product code only stay stable within one job.
    Row { job_id: Uuid, row: u64 },
}

impl SupplierProductLink {
    /// Stable id per supplier and product code, so re-imports and re-applied
    /// batches overwrite the same link.
    pub fn deterministic_id(supplier_id: EntityId, key: LinkKey<'_>) -> EntityId {
        let mut hasher = Sha256::new();
        match key {
            LinkKey::Ean(ean) => {
                hasher.update(b"ean");
                hasher.update(supplier_id.as_bytes());
                hasher.update(ean.as_bytes());
            }
            LinkKey::Mpn(mpn) => {
                hasher.update(b"mpn");
                hasher.update(supplier_id.as_bytes());
                hasher.update(mpn.as_bytes());
            }
            LinkKey::Row { job_id, row } => {
                hasher.update(b"row");
                hasher.update(job_id.as_bytes());
                hasher.update(row.to_be_bytes());
            }
        }
        let digest = hasher.finalize();
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        uuid::Builder::from_random_bytes(bytes).into_uuid()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SinkRecord {
    Product(ProductRecord),
    SupplierLink(SupplierProductLink),
}

impl SinkRecord {
    pub fn source_row(&self) -> u64 {
        match self {
            SinkRecord::Product(p) => p.source_row,
            SinkRecord::SupplierLink(l) => l.source_row,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordRejection {
    pub row: u64,
    pub message: String,
}

/// Result of one batch round-trip. Rows not listed in `rejected` were written.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BatchOutcome {
    pub upserted: usize,
    pub rejected: Vec<RecordRejection>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_ids_follow_supplier_and_code() {
        let (acme, other) = (Uuid::new_v4(), Uuid::new_v4());
        let id = |s, k| SupplierProductLink::deterministic_id(s, k);

        assert_eq!(id(acme, LinkKey::Ean("5012345678900")), id(acme, LinkKey::Ean("5012345678900")));
        assert_ne!(id(acme, LinkKey::Ean("5012345678900")), id(other, LinkKey::Ean("5012345678900")));
        assert_ne!(id(acme, LinkKey::Ean("123")), id(acme, LinkKey::Mpn("123")));

        let job = Uuid::new_v4();
        assert_eq!(id(acme, LinkKey::Row { job_id: job, row: 7 }), id(other, LinkKey::Row { job_id: job, row: 7 }));
        assert_ne!(
            id(acme, LinkKey::Row { job_id: job, row: 7 }),
            id(acme, LinkKey::Row { job_id: Uuid::new_v4(), row: 7 })
        );
    }
}
