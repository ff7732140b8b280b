use std::io::Read;
use std::path::{Path, PathBuf};

use async_graphql::{Context, EmptySubscription, Json, Object, Result as GraphQLResult, Schema, SimpleObject, Upload, ID};
use serde_json::Value;
use uuid::Uuid;

use crate::handlers::ImportSource;
use crate::jobs::{ImportEngine, ImportRequest};
use crate::mapping::auto_map;
use crate::models::*;

pub type ImportServiceSchema = Schema<QueryRoot, MutationRoot, EmptySubscription>;

pub fn build_schema(engine: ImportEngine) -> ImportServiceSchema {
    Schema::build(QueryRoot, MutationRoot, EmptySubscription)
        .data(engine.config().clone())
        .data(engine)
        .finish()
}

/// Proposed column assignment for a header row.
#[derive(Debug, Clone, SimpleObject)]
pub struct AutoMapResult {
    /// canonical field -> source column
    pub mapping: Json<Value>,
    pub unresolved: Vec<String>,
    pub missing_required: Vec<String>,
}

pub struct QueryRoot;

#[Object]
impl QueryRoot {
    /// Status snapshot of one import job
    async fn import_job(&self, ctx: &Context<'_>, id: ID) -> GraphQLResult<Option<JobSummary>> {
        let engine = ctx.data::<ImportEngine>()?;
        let id = Uuid::parse_str(&id)?;
        Ok(engine.status(id).await)
    }

    /// All import jobs, newest first
    async fn import_jobs(&self, ctx: &Context<'_>) -> GraphQLResult<Vec<JobSummary>> {
        let engine = ctx.data::<ImportEngine>()?;
        Ok(engine.list().await)
    }

    /// Suggest a mapping for the given headers without starting a job
    async fn auto_map(&self, headers: Vec<String>, kind: ImportKind) -> GraphQLResult<AutoMapResult> {
        let result = auto_map(&headers, &ImportSchema::for_kind(kind));
        Ok(AutoMapResult {
            mapping: Json(serde_json::to_value(&result.mapping.columns)?),
            unresolved: result.unresolved,
            missing_required: result.missing_required,
        })
    }

    async fn health(&self) -> GraphQLResult<String> {
        Ok("OK".to_string())
    }
}

pub struct MutationRoot;

// Clients send either the full {columns, defaults, passthrough} shape or a
// flat {canonical: column} object.
fn normalize_mapping(v: Value) -> Value {
    match v {
        Value::Object(map) if !map.contains_key("columns") => {
            let mut wrapped = serde_json::Map::new();
            wrapped.insert("columns".to_string(), Value::Object(map));
            Value::Object(wrapped)
        }
        other => other,
    }
}

// Accepts a bare strategy list as shorthand for {strategies: [...]}.
fn normalize_match_config(v: Value) -> Value {
    match v {
        Value::Array(strategies) => {
            let mut wrapped = serde_json::Map::new();
            wrapped.insert("strategies".to_string(), Value::Array(strategies));
            Value::Object(wrapped)
        }
        other => other,
    }
}

struct JobInputs {
    mapping: Option<FieldMapping>,
    match_config: Option<MatchKeyConfig>,
    tuning: TuningParams,
    required_fields: Vec<String>,
}

fn parse_inputs(
    mapping: Option<Json<Value>>,
    match_config: Option<Json<Value>>,
    tuning: Option<Json<Value>>,
    required_fields: Option<Vec<String>>,
) -> GraphQLResult<JobInputs> {
    let mapping = match mapping {
        Some(m) => Some(serde_json::from_value::<FieldMapping>(normalize_mapping(m.0))?),
        None => None,
    };
    let match_config = match match_config {
        Some(m) => Some(serde_json::from_value::<MatchKeyConfig>(normalize_match_config(m.0))?),
        None => None,
    };
    let tuning = match tuning {
        Some(t) => serde_json::from_value::<TuningParams>(t.0)?,
        None => TuningParams::default(),
    };
    Ok(JobInputs { mapping, match_config, tuning, required_fields: required_fields.unwrap_or_default() })
}

fn has_csv_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("csv"))
        .unwrap_or(false)
}

async fn submit(
    engine: &ImportEngine,
    kind: ImportKind,
    source: ImportSource,
    inputs: JobInputs,
    supplier_name: Option<String>,
) -> GraphQLResult<JobSummary> {
    let mut request = ImportRequest::new(kind, source)
        .with_tuning(inputs.tuning)
        .with_required_fields(inputs.required_fields);
    request.mapping = inputs.mapping;
    request.match_config = inputs.match_config;
    request.supplier_name = supplier_name;

    let id = engine.submit(request).await?;
    engine
        .status(id)
        .await
        .ok_or_else(|| async_graphql::Error::new(format!("Job {} disappeared after submission", id)))
}

#[Object]
impl MutationRoot {
    /// Upload a CSV file and start importing it
    async fn submit_import(
        &self,
        ctx: &Context<'_>,
        kind: ImportKind,
        file: Upload,
        mapping: Option<Json<Value>>,
        match_config: Option<Json<Value>>,
        tuning: Option<Json<Value>>,
        supplier_name: Option<String>,
        required_fields: Option<Vec<String>>,
    ) -> GraphQLResult<JobSummary> {
        let engine = ctx.data::<ImportEngine>()?;
        let inputs = parse_inputs(mapping, match_config, tuning, required_fields)?;
        let upload = file.value(ctx)?;
        let file_name = upload.filename.clone();
        if !has_csv_extension(&file_name) {
            return Err(async_graphql::Error::new(format!("Only .csv files are accepted, got '{}'", file_name)));
        }

        let cfg = engine.config();
        let max_bytes = cfg.max_upload_bytes;
        let target = PathBuf::from(&cfg.upload_dir).join(format!("{}_{}", Uuid::new_v4(), file_name.replace(['/', '\\'], "_")));
        let saved = target.clone();
        let written = tokio::task::spawn_blocking(move || -> std::result::Result<u64, String> {
            let mut data = Vec::new();
            upload
                .into_read()
                .take(max_bytes + 1)
                .read_to_end(&mut data)
                .map_err(|e| format!("Failed to read upload: {}", e))?;
            if data.len() as u64 > max_bytes {
                return Err(format!("Upload exceeds the {} byte limit", max_bytes));
            }
            if let Some(dir) = saved.parent() {
                std::fs::create_dir_all(dir).map_err(|e| format!("Failed to create upload dir: {}", e))?;
            }
            std::fs::write(&saved, &data).map_err(|e| format!("Failed to store upload: {}", e))?;
            Ok(data.len() as u64)
        })
        .await?
        .map_err(async_graphql::Error::new)?;

        tracing::info!(file = %file_name, bytes = written, path = %target.display(), "Stored upload");
        submit(engine, kind, ImportSource::Path(target), inputs, supplier_name).await
    }

    /// Import a CSV file already present on the server
    async fn submit_import_from_path(
        &self,
        ctx: &Context<'_>,
        kind: ImportKind,
        path: String,
        mapping: Option<Json<Value>>,
        match_config: Option<Json<Value>>,
        tuning: Option<Json<Value>>,
        supplier_name: Option<String>,
        required_fields: Option<Vec<String>>,
    ) -> GraphQLResult<JobSummary> {
        let engine = ctx.data::<ImportEngine>()?;
        let inputs = parse_inputs(mapping, match_config, tuning, required_fields)?;
        if !has_csv_extension(&path) {
            return Err(async_graphql::Error::new(format!("Only .csv files are accepted, got '{}'", path)));
        }
        submit(engine, kind, ImportSource::Path(PathBuf::from(path)), inputs, supplier_name).await
    }

    /// Ask a job to stop at its next chunk boundary
    async fn cancel_import(&self, ctx: &Context<'_>, id: ID) -> GraphQLResult<bool> {
        let engine = ctx.data::<ImportEngine>()?;
        let id = Uuid::parse_str(&id)?;
        Ok(engine.cancel(id).await)
    }

    /// Forget a finished job
    async fn clear_import(&self, ctx: &Context<'_>, id: ID) -> GraphQLResult<bool> {
        let engine = ctx.data::<ImportEngine>()?;
        let id = Uuid::parse_str(&id)?;
        engine.clear(id).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flat_mapping_is_wrapped() {
        let m: FieldMapping = serde_json::from_value(normalize_mapping(json!({"ean": "Barcode"}))).unwrap();
        assert_eq!(m.column_for("ean"), Some("Barcode"));

        let full = json!({"columns": {"ean": "EAN"}, "defaults": {"supplier_name": "Acme"}});
        let m: FieldMapping = serde_json::from_value(normalize_mapping(full)).unwrap();
        assert_eq!(m.defaults.get("supplier_name").map(|s| s.as_str()), Some("Acme"));
    }

    #[test]
    fn strategy_list_is_wrapped() {
        let v = json!([{ "type": "FuzzyName", "threshold": 0.9, "enabled": true }]);
        let c: MatchKeyConfig = serde_json::from_value(normalize_match_config(v)).unwrap();
        assert_eq!(c.strategies.len(), 1);
        assert!(c.uses_fuzzy_name());
    }

    #[test]
    fn csv_extension_check() {
        assert!(has_csv_extension("feed.CSV"));
        assert!(!has_csv_extension("feed.xlsx"));
        assert!(!has_csv_extension("feed"));
    }
}
