use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use mongodb::bson::{doc, Bson, DateTime as BsonDateTime, Document};
use mongodb::options::{FindOptions, IndexOptions, ReplaceOptions, UpdateOptions};
use mongodb::{Client as MongoClient, Collection, Database, IndexModel};
use uuid::Uuid;

use crate::config::Config;
use crate::matching::normalize_key;
use crate::models::*;
use crate::storage::PersistenceSink;

const PRODUCTS: &str = "products";
const SUPPLIERS: &str = "suppliers";
const LINKS: &str = "supplier_products";

/// In-flight writes per batch.
const WRITE_CONCURRENCY: usize = 16;

#[derive(Clone)]
pub struct MongoSink {
    db: Database,
}

impl MongoSink {
    pub fn with_db(db: Database) -> Self {
        Self { db }
    }

    pub async fn connect(cfg: &Config) -> Result<Self> {
        let client = MongoClient::with_uri_str(&cfg.mongodb_uri).await?;
        let sink = Self::with_db(client.database(&cfg.database_name));
        sink.ensure_indexes().await?;
        tracing::info!(database = %cfg.database_name, "Connected MongoDB sink");
        Ok(sink)
    }

    pub async fn ensure_indexes(&self) -> Result<()> {
        let unique = || IndexOptions::builder().unique(true).build();

        let products = self.db.collection::<Document>(PRODUCTS);
        products
            .create_index(IndexModel::builder().keys(doc! {"ean_key": 1}).options(unique()).build(), None)
            .await?;
        for key in ["upc_key", "mpn_key", "asin_key"] {
            products.create_index(IndexModel::builder().keys(doc! {key: 1}).build(), None).await?;
        }
        products.create_index(IndexModel::builder().keys(doc! {"created_at": 1}).build(), None).await?;

        let suppliers = self.db.collection::<Document>(SUPPLIERS);
        suppliers
            .create_index(IndexModel::builder().keys(doc! {"name": 1}).options(unique()).build(), None)
            .await?;

        let links = self.db.collection::<Document>(LINKS);
        links.create_index(IndexModel::builder().keys(doc! {"supplier_id": 1}).build(), None).await?;
        links.create_index(IndexModel::builder().keys(doc! {"product_id": 1}).build(), None).await?;
        Ok(())
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.db.collection(name)
    }

    async fn upsert_product(&self, p: &ProductRecord) -> Result<()> {
        let ean_key = normalize_key(KeyField::Ean, &p.ean)
            .ok_or_else(|| ImportError::Persistence(format!("Invalid EAN '{}'", p.ean)))?;
        let opt_key = |field: KeyField, v: &Option<String>| -> Bson {
            v.as_deref().and_then(|v| normalize_key(field, v)).map(Bson::String).unwrap_or(Bson::Null)
        };

        let fields = doc! {
            "title": p.title.as_str(),
            "ean": p.ean.as_str(),
            "ean_key": ean_key.as_str(),
            "brand": p.brand.as_str(),
            "sale_price": p.sale_price,
            "mpn": opt_string(&p.mpn),
            "mpn_key": opt_key(KeyField::Mpn, &p.mpn),
            "asin": opt_string(&p.asin),
            "asin_key": opt_key(KeyField::Asin, &p.asin),
            "upc": opt_string(&p.upc),
            "upc_key": opt_key(KeyField::Upc, &p.upc),
            "category": opt_string(&p.category),
            "rating": p.rating.map(Bson::Double).unwrap_or(Bson::Null),
            "review_count": p.review_count,
            "units_sold": p.units_sold,
            "buy_box_price": p.buy_box_price,
            "amazon_fee": p.amazon_fee,
            "fba_fees": p.fba_fees,
            "referral_fee": p.referral_fee,
            "buy_box_seller_name": opt_string(&p.buy_box_seller_name),
            "updated_at": BsonDateTime::now(),
        };
        let update = doc! {
            "$set": fields,
            "$setOnInsert": { "_id": Uuid::new_v4().to_string(), "created_at": BsonDateTime::now() },
        };
        let options = UpdateOptions::builder().upsert(true).build();
        self.collection(PRODUCTS).update_one(doc! {"ean_key": ean_key}, update, options).await?;
        Ok(())
    }

    async fn upsert_link(&self, l: &SupplierProductLink) -> Result<()> {
        let id = l.id.to_string();
        let replacement = doc! {
            "_id": id.as_str(),
            "supplier_id": l.supplier_id.to_string(),
            "product_id": l.product_id.map(|p| Bson::String(p.to_string())).unwrap_or(Bson::Null),
            "ean": opt_string(&l.ean),
            "mpn": opt_string(&l.mpn),
            "product_name": opt_string(&l.product_name),
            "brand": opt_string(&l.brand),
            "cost": l.cost,
            "supplier_stock": l.supplier_stock,
            "moq": l.moq,
            "lead_time": l.lead_time.as_str(),
            "payment_terms": l.payment_terms.as_str(),
            "match_method": l.match_method.as_str(),
            "source_row": l.source_row as i64,
            "updated_at": BsonDateTime::now(),
        };
        let options = ReplaceOptions::builder().upsert(true).build();
        self.collection(LINKS).replace_one(doc! {"_id": id}, replacement, options).await?;
        Ok(())
    }

    async fn upsert_one(&self, record: &SinkRecord) -> Result<()> {
        match record {
            SinkRecord::Product(p) => self.upsert_product(p).await,
            SinkRecord::SupplierLink(l) => self.upsert_link(l).await,
        }
    }
}

fn opt_string(v: &Option<String>) -> Bson {
    v.as_ref().map(|s| Bson::String(s.clone())).unwrap_or(Bson::Null)
}

fn parse_id(doc: &Document) -> Result<EntityId> {
    let raw = doc
        .get_str("_id")
        .map_err(|e| ImportError::Persistence(format!("Document without string _id: {}", e)))?;
    Uuid::parse_str(raw).map_err(|e| ImportError::Persistence(format!("Malformed entity id '{}': {}", raw, e)))
}

fn key_column(field: KeyField) -> &'static str {
    match field {
        KeyField::Ean => "ean_key",
        KeyField::Upc => "upc_key",
        KeyField::Mpn => "mpn_key",
        KeyField::Asin => "asin_key",
    }
}

#[async_trait]
impl PersistenceSink for MongoSink {
    async fn upsert_batch(&self, records: &[SinkRecord]) -> Result<BatchOutcome> {
        // records in one batch carry distinct keys
        let writes = records.iter().map(|r| {
            let row = r.source_row();
            self.upsert_one(r).map(move |res| (row, res))
        }).collect::<Vec<_>>();
        let results: Vec<(u64, Result<()>)> = stream::iter(writes).buffered(WRITE_CONCURRENCY).collect().await;

        let mut outcome = BatchOutcome::default();
        let mut first_error: Option<String> = None;
        for (row, result) in results {
            match result {
                Ok(()) => outcome.upserted += 1,
                Err(e) => {
                    let message = e.to_string();
                    first_error.get_or_insert_with(|| message.clone());
                    outcome.rejected.push(RecordRejection { row, message });
                }
            }
        }

        // nothing landed: treat as a transient batch failure so the caller retries
        if outcome.upserted == 0 && !records.is_empty() {
            return Err(ImportError::Persistence(first_error.unwrap_or_else(|| "batch write failed".to_string())));
        }
        if !outcome.rejected.is_empty() {
            tracing::warn!(
                upserted = outcome.upserted,
                rejected = outcome.rejected.len(),
                "Partial batch write"
            );
        }
        Ok(outcome)
    }

    async fn lookup_by_key(&self, field: KeyField, values: &[String]) -> Result<HashMap<String, EntityId>> {
        let column = key_column(field);
        let filter = doc! { column: { "$in": values.to_vec() } };
        let options = FindOptions::builder()
            .projection(doc! {"_id": 1, column: 1})
            .sort(doc! {"created_at": 1})
            .build();

        let mut cursor = self
            .collection(PRODUCTS)
            .find(filter, options)
            .await
            .map_err(|e| ImportError::MatchLookup(e.to_string()))?;

        let mut found = HashMap::new();
        while let Some(doc) = cursor.next().await {
            let doc = doc.map_err(|e| ImportError::MatchLookup(e.to_string()))?;
            if let Ok(key) = doc.get_str(column) {
                let id = parse_id(&doc)?;
                found.entry(key.to_string()).or_insert(id);
            }
        }
        Ok(found)
    }

    async fn list_entity_names(&self) -> Result<Vec<(EntityId, String)>> {
        let options = FindOptions::builder()
            .projection(doc! {"_id": 1, "title": 1})
            .sort(doc! {"created_at": 1})
            .build();
        let mut cursor = self
            .collection(PRODUCTS)
            .find(doc! {}, options)
            .await
            .map_err(|e| ImportError::MatchLookup(e.to_string()))?;

        let mut names = Vec::new();
        while let Some(doc) = cursor.next().await {
            let doc = doc.map_err(|e| ImportError::MatchLookup(e.to_string()))?;
            if let Ok(title) = doc.get_str("title") {
                names.push((parse_id(&doc)?, title.to_string()));
            }
        }
        Ok(names)
    }

    async fn ensure_supplier(&self, name: &str) -> Result<EntityId> {
        let name = name.trim();
        let suppliers = self.collection(SUPPLIERS);
        let update = doc! {
            "$setOnInsert": { "_id": Uuid::new_v4().to_string(), "name": name, "created_at": BsonDateTime::now() },
        };
        let options = UpdateOptions::builder().upsert(true).build();
        suppliers.update_one(doc! {"name": name}, update, options).await?;

        let doc = suppliers
            .find_one(doc! {"name": name}, None)
            .await?
            .ok_or_else(|| ImportError::Persistence(format!("Supplier '{}' vanished after upsert", name)))?;
        parse_id(&doc)
    }
}
