use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::models::{ImportError, Result};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, async_graphql::Enum)]
pub enum ImportKind {
    Product,
    Supplier,
}

/// Header comparison used everywhere a configured column meets the file:
/// surrounding whitespace and ASCII case are ignored.
pub fn header_matches(header: &str, column: &str) -> bool {
    header == column || header.trim().eq_ignore_ascii_case(column.trim())
}

/// One decoded CSV line. Headers are shared by every row of a file.
#[derive(Debug, Clone)]
pub struct RawRow {
    /// 1-based data row number (the header line is not counted)
    pub line: u64,
    headers: Arc<[String]>,
    values: Vec<String>,
}

impl RawRow {
    pub fn new(line: u64, headers: Arc<[String]>, values: Vec<String>) -> Self {
        Self { line, headers, values }
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value of `column`. Exact header match first, then a trimmed
    /// case-insensitive match.
    pub fn get(&self, column: &str) -> Option<&str> {
        let idx = self
            .headers
            .iter()
            .position(|h| h == column)
            .or_else(|| self.headers.iter().position(|h| header_matches(h, column)))?;
        self.values.get(idx).map(|v| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|h| h.as_str()).zip(self.values.iter().map(|v| v.as_str()))
    }
}

/// Supported canonical field types. Each variant has exactly one coercion in the mapper.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum FieldType {
    Text,
    Number,
    Date,
    Boolean,
    Selection(Vec<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Date(NaiveDate),
    Boolean(bool),
    Selection(String),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) | FieldValue::Selection(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CanonicalField {
    pub name: String,
    pub label: String,
    pub field_type: FieldType,
    pub required: bool,
    /// Product codes: scientific notation is expanded and placeholder values dropped.
    pub identifier: bool,
    pub synonyms: Vec<String>,
}

impl CanonicalField {
    fn new(name: &str, label: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            field_type,
            required: false,
            identifier: false,
            synonyms: Vec::new(),
        }
    }

    fn required(mut self) -> Self {
        self.required = true;
        self
    }

    fn identifier(mut self) -> Self {
        self.identifier = true;
        self
    }

    fn synonyms(mut self, synonyms: &[&str]) -> Self {
        self.synonyms = synonyms.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Normalized name, label and synonyms, in that order.
    pub fn aliases(&self) -> impl Iterator<Item = String> + '_ {
        std::iter::once(self.name.as_str())
            .chain(std::iter::once(self.label.as_str()))
            .chain(self.synonyms.iter().map(|s| s.as_str()))
            .map(normalize_name)
    }
}

/// Lower-cased alphanumerics only: `" Supplier_Name "` and `"supplier name"` compare equal.
pub fn normalize_name(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImportSchema {
    pub kind: ImportKind,
    pub fields: Vec<CanonicalField>,
}

impl ImportSchema {
    pub fn for_kind(kind: ImportKind) -> Self {
        match kind {
            ImportKind::Supplier => Self::supplier(),
            ImportKind::Product => Self::product(),
        }
    }

    pub fn supplier() -> Self {
        let fields = vec![
            CanonicalField::new("supplier_name", "Supplier Name", FieldType::Text)
                .required()
                .synonyms(&["supplier", "vendor", "vendor name", "distributor"]),
            CanonicalField::new("brand", "Brand", FieldType::Text)
                .synonyms(&["manufacturer", "make", "brand name"]),
            CanonicalField::new("product_name", "Product Name", FieldType::Text)
                .synonyms(&["name", "title", "product title", "item name", "description", "product description"]),
            CanonicalField::new("ean", "EAN", FieldType::Text)
                .identifier()
                .synonyms(&["ean code", "ean13", "barcode", "gtin", "ean upc"]),
            CanonicalField::new("mpn", "MPN", FieldType::Text)
                .identifier()
                .synonyms(&["manufacturer part number", "part number", "mfr part", "mfr part number"]),
            CanonicalField::new("cost", "Cost", FieldType::Number)
                .synonyms(&["supplier cost", "unit cost", "cost price", "buy price", "net price"]),
            CanonicalField::new("supplier_stock", "Supplier Stock", FieldType::Number)
                .synonyms(&["stock", "qty", "quantity", "available", "stock level"]),
            CanonicalField::new("moq", "MOQ", FieldType::Number)
                .synonyms(&["minimum order quantity", "min order", "min order qty"]),
            CanonicalField::new("lead_time", "Lead Time", FieldType::Text)
                .synonyms(&["delivery time", "lead time days"]),
            CanonicalField::new("payment_terms", "Payment Terms", FieldType::Text)
                .synonyms(&["terms"]),
        ];
        Self { kind: ImportKind::Supplier, fields }
    }

    pub fn product() -> Self {
        let fields = vec![
            CanonicalField::new("title", "Title", FieldType::Text)
                .required()
                .synonyms(&["product name", "product title", "name"]),
            CanonicalField::new("ean", "EAN", FieldType::Text)
                .required()
                .identifier()
                .synonyms(&["ean code", "ean13", "barcode", "gtin"]),
            CanonicalField::new("brand", "Brand", FieldType::Text)
                .required()
                .synonyms(&["manufacturer", "brand name"]),
            CanonicalField::new("sale_price", "Sale Price", FieldType::Number)
                .required()
                .synonyms(&["price", "saleprice", "selling price"]),
            CanonicalField::new("mpn", "MPN", FieldType::Text)
                .identifier()
                .synonyms(&["manufacturer part number", "part number"]),
            CanonicalField::new("asin", "ASIN", FieldType::Text).identifier(),
            CanonicalField::new("upc", "UPC", FieldType::Text)
                .identifier()
                .synonyms(&["upc code"]),
            CanonicalField::new("category", "Category", FieldType::Text)
                .synonyms(&["categories", "department"]),
            CanonicalField::new("rating", "Rating", FieldType::Number)
                .synonyms(&["stars", "average rating"]),
            CanonicalField::new("review_count", "Review Count", FieldType::Number)
                .synonyms(&["reviews", "number of reviews"]),
            CanonicalField::new("units_sold", "Units Sold", FieldType::Number)
                .synonyms(&["monthly units sold", "unit sold", "sales"]),
            CanonicalField::new("buy_box_price", "Buy Box Price", FieldType::Number),
            CanonicalField::new("amazon_fee", "Amazon Fee", FieldType::Number)
                .synonyms(&["amazon fees"]),
            CanonicalField::new("fba_fees", "FBA Fees", FieldType::Number)
                .synonyms(&["fba fee"]),
            CanonicalField::new("referral_fee", "Referral Fee", FieldType::Number),
            CanonicalField::new("buy_box_seller_name", "Buy Box Seller Name", FieldType::Text)
                .synonyms(&["buy box seller", "seller name"]),
        ];
        Self { kind: ImportKind::Product, fields }
    }

    pub fn field(&self, name: &str) -> Option<&CanonicalField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Resolve a canonical key or display label ("Product Name", "product_name").
    pub fn resolve(&self, name_or_label: &str) -> Option<&CanonicalField> {
        if let Some(f) = self.field(name_or_label) {
            return Some(f);
        }
        let wanted = normalize_name(name_or_label);
        self.fields
            .iter()
            .find(|f| normalize_name(&f.name) == wanted || normalize_name(&f.label) == wanted)
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &CanonicalField> {
        self.fields.iter().filter(|f| f.required)
    }

    /// Mark additional fields as required for one job.
    pub fn require(&mut self, names: &[String]) -> Result<()> {
        for name in names {
            let canonical = self
                .resolve(name)
                .map(|f| f.name.clone())
                .ok_or_else(|| ImportError::Configuration(format!("Unknown canonical field '{}'", name)))?;
            if let Some(f) = self.fields.iter_mut().find(|f| f.name == canonical) {
                f.required = true;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FieldMapping {
    /// canonical field -> source column
    pub columns: BTreeMap<String, String>,
    /// canonical field -> constant value used when the column is unmapped or empty
    #[serde(default)]
    pub defaults: BTreeMap<String, String>,
    /// source columns copied verbatim onto the mapped record
    #[serde(default)]
    pub passthrough: Vec<String>,
}

impl FieldMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_column(mut self, canonical: impl Into<String>, column: impl Into<String>) -> Self {
        self.columns.insert(canonical.into(), column.into());
        self
    }

    pub fn with_default(mut self, canonical: impl Into<String>, value: impl Into<String>) -> Self {
        self.defaults.insert(canonical.into(), value.into());
        self
    }

    pub fn column_for(&self, canonical: &str) -> Option<&str> {
        self.columns.get(canonical).map(|c| c.as_str()).filter(|c| !c.trim().is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() && self.defaults.is_empty()
    }

    /// Rewrite label-keyed entries ("Product Name") to canonical keys ("product_name").
    pub fn canonicalize(&self, schema: &ImportSchema) -> Result<FieldMapping> {
        let rekey = |map: &BTreeMap<String, String>| -> Result<BTreeMap<String, String>> {
            let mut out = BTreeMap::new();
            for (key, value) in map {
                let field = schema.resolve(key).ok_or_else(|| {
                    ImportError::Configuration(format!("Unknown canonical field '{}' in mapping", key))
                })?;
                out.insert(field.name.clone(), value.clone());
            }
            Ok(out)
        };
        Ok(FieldMapping {
            columns: rekey(&self.columns)?,
            defaults: rekey(&self.defaults)?,
            passthrough: self.passthrough.clone(),
        })
    }

    /// Required fields with neither a column nor a default.
    pub fn missing_required(&self, schema: &ImportSchema) -> Vec<String> {
        schema
            .required_fields()
            .filter(|f| self.column_for(&f.name).is_none() && !self.defaults.contains_key(&f.name))
            .map(|f| f.name.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MappedRecord {
    pub row: u64,
    pub fields: BTreeMap<String, FieldValue>,
    #[serde(default)]
    pub passthrough: BTreeMap<String, String>,
}

impl MappedRecord {
    pub fn new(row: u64) -> Self {
        Self { row, fields: BTreeMap::new(), passthrough: BTreeMap::new() }
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn text(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(|v| v.as_text())
    }

    pub fn number(&self, field: &str) -> Option<f64> {
        self.fields.get(field).and_then(|v| v.as_number())
    }

    pub fn passthrough(&self, column: &str) -> Option<&str> {
        self.passthrough.get(column).map(|v| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(headers: &[&str], values: &[&str]) -> RawRow {
        let headers: Arc<[String]> = headers.iter().map(|h| h.to_string()).collect::<Vec<_>>().into();
        RawRow::new(1, headers, values.iter().map(|v| v.to_string()).collect())
    }

    #[test]
    fn raw_row_lookup_falls_back_to_case_insensitive() {
        let r = row(&["EAN ", "Name"], &["123", "Widget"]);
        assert_eq!(r.get("Name"), Some("Widget"));
        assert_eq!(r.get("ean"), Some("123"));
        assert_eq!(r.get("cost"), None);
    }

    #[test]
    fn schema_resolves_labels_and_keys() {
        let schema = ImportSchema::supplier();
        assert_eq!(schema.resolve("Product Name").unwrap().name, "product_name");
        assert_eq!(schema.resolve("supplier_name").unwrap().name, "supplier_name");
        assert_eq!(schema.resolve("EAN").unwrap().name, "ean");
        assert!(schema.resolve("colour").is_none());
    }

    #[test]
    fn canonicalize_rekeys_labels() {
        let schema = ImportSchema::supplier();
        let mapping = FieldMapping::new()
            .with_column("EAN", "ean")
            .with_column("Product Name", "name")
            .with_default("Supplier Name", "Acme");
        let canonical = mapping.canonicalize(&schema).unwrap();
        assert_eq!(canonical.column_for("product_name"), Some("name"));
        assert_eq!(canonical.defaults.get("supplier_name").map(|s| s.as_str()), Some("Acme"));
        assert!(canonical.missing_required(&schema).is_empty());
    }

    #[test]
    fn canonicalize_rejects_unknown_fields() {
        let schema = ImportSchema::product();
        let mapping = FieldMapping::new().with_column("Colour", "colour");
        assert!(mapping.canonicalize(&schema).is_err());
    }

    #[test]
    fn extra_required_fields_are_enforced() {
        let mut schema = ImportSchema::supplier();
        schema.require(&["Cost".to_string()]).unwrap();
        let mapping = FieldMapping::new().with_column("supplier_name", "Supplier");
        assert_eq!(mapping.missing_required(&schema), vec!["cost".to_string()]);
    }
}
