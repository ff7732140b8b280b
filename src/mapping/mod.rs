pub mod auto;

pub use auto::*;

use chrono::NaiveDate;

use crate::models::*;

pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";

/// Spreadsheet exports fill empty cells with these.
const PLACEHOLDERS: &[&str] = &["nan", "none", "null", "undefined", "n/a"];

/// One canonical field with its column, default and coercion resolved up front.
#[derive(Debug, Clone)]
struct FieldPlan {
    name: String,
    column: Option<String>,
    default: Option<String>,
    field_type: FieldType,
    required: bool,
    identifier: bool,
}

/// Turns raw CSV rows into typed records for one job.
#[derive(Debug, Clone)]
pub struct FieldMapper {
    plans: Vec<FieldPlan>,
    passthrough: Vec<String>,
    date_format: String,
}

impl FieldMapper {
    pub fn new(schema: &ImportSchema, mapping: &FieldMapping) -> Self {
        let plans = schema
            .fields
            .iter()
            .map(|f| FieldPlan {
                name: f.name.clone(),
                column: mapping.column_for(&f.name).map(|c| c.to_string()),
                default: mapping.defaults.get(&f.name).cloned(),
                field_type: f.field_type.clone(),
                required: f.required,
                identifier: f.identifier,
            })
            .collect();

        Self {
            plans,
            passthrough: mapping.passthrough.clone(),
            date_format: DEFAULT_DATE_FORMAT.to_string(),
        }
    }

    pub fn with_date_format(mut self, format: impl Into<String>) -> Self {
        self.date_format = format.into();
        self
    }

    pub fn map(&self, raw: &RawRow) -> std::result::Result<MappedRecord, ValidationError> {
        let mut record = MappedRecord::new(raw.line);

        for plan in &self.plans {
            let from_column = plan
                .column
                .as_deref()
                .and_then(|c| raw.get(c))
                .map(|v| clean_text(v, plan.identifier))
                .filter(|v| !v.is_empty());

            let Some(text) = from_column.or_else(|| plan.default.clone()) else {
                if plan.required {
                    return Err(ValidationError {
                        row: raw.line,
                        field: Some(plan.name.clone()),
                        error_type: ValidationErrorType::MissingRequiredField,
                        message: format!("Missing required field '{}'", plan.name),
                    });
                }
                continue;
            };

            match self.coerce(&text, &plan.field_type) {
                Ok(value) => {
                    record.fields.insert(plan.name.clone(), value);
                }
                Err(error_type) if plan.required => {
                    return Err(ValidationError {
                        row: raw.line,
                        field: Some(plan.name.clone()),
                        message: format!("Invalid value '{}' for field '{}'", text, plan.name),
                        error_type,
                    });
                }
                Err(_) => {
                    // optional fields that do not coerce are dropped, not fatal
                    tracing::debug!(row = raw.line, field = %plan.name, value = %text, "Dropping uncoercible value");
                }
            }
        }

        for column in &self.passthrough {
            if let Some(v) = raw.get(column) {
                record.passthrough.insert(column.clone(), v.trim().to_string());
            }
        }

        Ok(record)
    }

    fn coerce(&self, text: &str, field_type: &FieldType) -> std::result::Result<FieldValue, ValidationErrorType> {
        match field_type {
            FieldType::Text => Ok(FieldValue::Text(text.to_string())),
            FieldType::Number => to_number(text).map(FieldValue::Number).ok_or(ValidationErrorType::InvalidNumber),
            FieldType::Date => to_date(text, &self.date_format).map(FieldValue::Date).ok_or(ValidationErrorType::InvalidDate),
            FieldType::Boolean => to_bool(text).map(FieldValue::Boolean).ok_or(ValidationErrorType::InvalidBoolean),
            FieldType::Selection(options) => options
                .iter()
                .find(|o| o.eq_ignore_ascii_case(text))
                .map(|o| FieldValue::Selection(o.clone()))
                .ok_or(ValidationErrorType::InvalidSelection),
        }
    }
}

fn clean_text(value: &str, identifier: bool) -> String {
    let trimmed = value.trim();
    if identifier {
        if PLACEHOLDERS.iter().any(|p| trimmed.eq_ignore_ascii_case(p)) {
            return String::new();
        }
        return fix_scientific_notation(trimmed);
    }
    trimmed.to_string()
}

/// `8.40E+11` -> `840000000000`, `5012345678900.0` -> `5012345678900`.
/// Anything that is not a plain numeric rendering is returned unchanged.
pub fn fix_scientific_notation(value: &str) -> String {
    let v = value.trim();
    if v.contains(['e', 'E']) && v.chars().all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-')) {
        if let Ok(n) = v.parse::<f64>() {
            if n.is_finite() && n >= 0.0 && n.fract() == 0.0 {
                return format!("{:.0}", n);
            }
        }
    }
    if let Some(int_part) = v.strip_suffix(".0") {
        if !int_part.is_empty() && int_part.chars().all(|c| c.is_ascii_digit()) {
            return int_part.to_string();
        }
    }
    v.to_string()
}

/// Tolerant number parsing: currency symbols, thousands separators, EU decimal
/// commas, `(1,234.56)` negatives and trailing percent signs. `None` if the
/// remaining text still is not a number.
pub fn to_number(value: &str) -> Option<f64> {
    let mut s = value.trim().to_string();
    if s.is_empty() {
        return None;
    }

    let mut negative_by_paren = false;
    if s.starts_with('(') && s.ends_with(')') {
        negative_by_paren = true;
        s = s.trim_start_matches('(').trim_end_matches(')').trim().to_string();
    }

    let mut cleaned: String = s
        .chars()
        .filter(|c| !matches!(c, ' ' | '\u{00A0}' | '$' | '€' | '£' | '¥' | '₩' | '₹' | '%'))
        .collect();

    let has_dot = cleaned.contains('.');
    let has_comma = cleaned.contains(',');

    if has_dot && has_comma {
        // rightmost separator is the decimal one
        if cleaned.rfind('.') > cleaned.rfind(',') {
            cleaned = cleaned.replace(',', "");
        } else {
            cleaned = cleaned.replace('.', "").replace(',', ".");
        }
    } else if has_comma {
        let decimal_comma = cleaned
            .rsplit_once(',')
            .map(|(_, frac)| (1..=2).contains(&frac.len()) && frac.chars().all(|c| c.is_ascii_digit()))
            .unwrap_or(false);
        cleaned = if decimal_comma && cleaned.matches(',').count() == 1 {
            cleaned.replace(',', ".")
        } else {
            cleaned.replace(',', "")
        };
    }

    if negative_by_paren && !cleaned.starts_with('-') {
        cleaned.insert(0, '-');
    }

    cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
}

pub fn to_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "on" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "off" | "0" => Some(false),
        _ => None,
    }
}

pub fn to_date(value: &str, format: &str) -> Option<NaiveDate> {
    let v = value.trim();
    NaiveDate::parse_from_str(v, format)
        .ok()
        .or_else(|| chrono::DateTime::parse_from_rfc3339(v).ok().map(|dt| dt.date_naive()))
}

/// Settle the mapping for one job: canonicalize a supplied one, or derive it
/// from the headers. Fails with `MappingAmbiguity` when required fields stay
/// unmapped.
pub fn prepare_mapping(
    headers: &[String],
    supplied: Option<&FieldMapping>,
    schema: &ImportSchema,
) -> Result<FieldMapping> {
    let mut mapping = match supplied.map(|m| m.canonicalize(schema)).transpose()? {
        Some(m) if !m.columns.is_empty() => m,
        // defaults-only mappings still get their columns detected
        other => {
            let auto = auto_map(headers, schema);
            if !auto.unresolved.is_empty() {
                tracing::debug!(unresolved = ?auto.unresolved, "Auto-mapping left fields unresolved");
            }
            let mut mapping = auto.mapping;
            if let Some(m) = other {
                mapping.defaults = m.defaults;
                mapping.passthrough = m.passthrough;
            }
            mapping
        }
    };

    // columns that are not in the file count as unmapped
    mapping.columns.retain(|_, column| headers.iter().any(|h| header_matches(h, column)));

    let missing = mapping.missing_required(schema);
    if !missing.is_empty() {
        return Err(ImportError::MappingAmbiguity { unresolved: missing });
    }
    Ok(mapping)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn raw(headers: &[&str], values: &[&str]) -> RawRow {
        let headers: Arc<[String]> = headers.iter().map(|h| h.to_string()).collect::<Vec<_>>().into();
        RawRow::new(3, headers, values.iter().map(|v| v.to_string()).collect())
    }

    #[test]
    fn to_number_us_currency() {
        assert_eq!(to_number("$1,234.56"), Some(1234.56));
    }

    #[test]
    fn to_number_eu_format() {
        assert_eq!(to_number("1.234,56"), Some(1234.56));
        assert_eq!(to_number("€ 1 234,56"), Some(1234.56));
        assert_eq!(to_number("12,5"), Some(12.5));
    }

    #[test]
    fn to_number_thousands_comma() {
        assert_eq!(to_number("1,234"), Some(1234.0));
        assert_eq!(to_number("1,234,567"), Some(1234567.0));
    }

    #[test]
    fn to_number_parentheses_and_percent() {
        assert_eq!(to_number("(1,234.56)"), Some(-1234.56));
        assert_eq!(to_number("15%"), Some(15.0));
    }

    #[test]
    fn to_number_unparseable_is_none() {
        assert_eq!(to_number("N/A"), None);
        assert_eq!(to_number(""), None);
    }

    #[test]
    fn to_bool_values() {
        for s in ["true", "YES", "y", "On", "1"] {
            assert_eq!(to_bool(s), Some(true), "case {:?}", s);
        }
        for s in ["false", "NO", "n", "Off", "0"] {
            assert_eq!(to_bool(s), Some(false), "case {:?}", s);
        }
        assert_eq!(to_bool("maybe"), None);
    }

    #[test]
    fn dates_accept_format_and_rfc3339() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(to_date("2024-03-01", DEFAULT_DATE_FORMAT), Some(d));
        assert_eq!(to_date("01/03/2024", "%d/%m/%Y"), Some(d));
        assert_eq!(to_date("2024-03-01T10:00:00Z", "%d/%m/%Y"), Some(d));
        assert_eq!(to_date("yesterday", DEFAULT_DATE_FORMAT), None);
    }

    #[test]
    fn scientific_notation_is_expanded() {
        assert_eq!(fix_scientific_notation("8.40E+11"), "840000000000");
        assert_eq!(fix_scientific_notation("5012345678900.0"), "5012345678900");
        assert_eq!(fix_scientific_notation("ABC-123"), "ABC-123");
    }

    #[test]
    fn maps_supplier_row_with_default_supplier() {
        let schema = ImportSchema::supplier();
        let mapping = FieldMapping::new()
            .with_column("ean", "ean")
            .with_column("product_name", "name")
            .with_column("cost", "cost")
            .with_default("supplier_name", "Acme");
        let mapper = FieldMapper::new(&schema, &mapping);

        let rec = mapper.map(&raw(&["ean", "name", "cost"], &["8.40E+11", "Widget", "€3,50"])).unwrap();
        assert_eq!(rec.row, 3);
        assert_eq!(rec.text("ean"), Some("840000000000"));
        assert_eq!(rec.text("supplier_name"), Some("Acme"));
        assert_eq!(rec.number("cost"), Some(3.5));
        assert!(rec.get("mpn").is_none());
    }

    #[test]
    fn missing_required_field_rejects_row() {
        let schema = ImportSchema::product();
        let mapping = FieldMapping::new()
            .with_column("title", "title")
            .with_column("ean", "ean")
            .with_column("brand", "brand")
            .with_column("sale_price", "price");
        let mapper = FieldMapper::new(&schema, &mapping);

        let err = mapper.map(&raw(&["title", "ean", "brand", "price"], &["Widget", "null", "Acme", "9.99"])).unwrap_err();
        assert_eq!(err.row, 3);
        assert_eq!(err.field.as_deref(), Some("ean"));
        assert_eq!(err.error_type, ValidationErrorType::MissingRequiredField);

        let err = mapper.map(&raw(&["title", "ean", "brand", "price"], &["Widget", "1", "Acme", "abc"])).unwrap_err();
        assert_eq!(err.error_type, ValidationErrorType::InvalidNumber);
    }

    #[test]
    fn optional_bad_number_is_dropped() {
        let schema = ImportSchema::supplier();
        let mapping = FieldMapping::new().with_column("supplier_name", "s").with_column("cost", "c");
        let rec = FieldMapper::new(&schema, &mapping).map(&raw(&["s", "c"], &["Acme", "call us"])).unwrap();
        assert!(rec.number("cost").is_none());
    }

    #[test]
    fn selection_matches_case_insensitively() {
        let mut schema = ImportSchema::supplier();
        schema.fields.push(CanonicalField {
            name: "condition".into(),
            label: "Condition".into(),
            field_type: FieldType::Selection(vec!["New".into(), "Used".into()]),
            required: true,
            identifier: false,
            synonyms: vec![],
        });
        let mapping = FieldMapping::new().with_column("supplier_name", "s").with_column("condition", "c");
        let mapper = FieldMapper::new(&schema, &mapping);

        let rec = mapper.map(&raw(&["s", "c"], &["Acme", "used"])).unwrap();
        assert_eq!(rec.get("condition"), Some(&FieldValue::Selection("Used".into())));
        let err = mapper.map(&raw(&["s", "c"], &["Acme", "broken"])).unwrap_err();
        assert_eq!(err.error_type, ValidationErrorType::InvalidSelection);
    }

    #[test]
    fn passthrough_columns_ride_along() {
        let schema = ImportSchema::supplier();
        let mut mapping = FieldMapping::new().with_column("supplier_name", "s");
        mapping.passthrough.push("Part No".into());
        let rec = FieldMapper::new(&schema, &mapping).map(&raw(&["s", "Part No"], &["Acme", " X-1 "])).unwrap();
        assert_eq!(rec.passthrough("Part No"), Some("X-1"));
    }

    #[test]
    fn prepare_mapping_rejects_unresolved_required() {
        let schema = ImportSchema::product();
        let headers: Vec<String> = ["title", "ean"].iter().map(|s| s.to_string()).collect();
        match prepare_mapping(&headers, None, &schema) {
            Err(ImportError::MappingAmbiguity { unresolved }) => {
                assert_eq!(unresolved, vec!["brand".to_string(), "sale_price".to_string()]);
            }
            other => panic!("expected ambiguity, got {:?}", other),
        }
    }

    #[test]
    fn defaults_only_mapping_is_auto_detected() {
        let schema = ImportSchema::supplier();
        let headers: Vec<String> = ["EAN", "Cost Price"].iter().map(|s| s.to_string()).collect();
        let supplied = FieldMapping::new().with_default("supplier_name", "Acme");
        let mapping = prepare_mapping(&headers, Some(&supplied), &schema).unwrap();
        assert_eq!(mapping.column_for("ean"), Some("EAN"));
        assert_eq!(mapping.defaults.get("supplier_name").map(|s| s.as_str()), Some("Acme"));
    }

    #[test]
    fn prepare_mapping_drops_columns_missing_from_file() {
        let schema = ImportSchema::supplier();
        let headers: Vec<String> = ["ean"].iter().map(|s| s.to_string()).collect();
        let supplied = FieldMapping::new().with_column("ean", "ean").with_column("supplier_name", "Vendor");
        assert!(prepare_mapping(&headers, Some(&supplied), &schema).is_err());

        let supplied = supplied.with_default("supplier_name", "Acme");
        let mapping = prepare_mapping(&headers, Some(&supplied), &schema).unwrap();
        assert_eq!(mapping.column_for("supplier_name"), None);
        assert_eq!(mapping.column_for("ean"), Some("ean"));
    }
}
