use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use uuid::Uuid;

use supplier_import_service::config::Config;
use supplier_import_service::jobs::ImportEngine;
use supplier_import_service::schema::{build_schema, ImportServiceSchema};
use supplier_import_service::storage::InMemorySink;

fn schema() -> (ImportServiceSchema, ImportEngine, Arc<InMemorySink>) {
    let sink = Arc::new(InMemorySink::new());
    let cfg = Config { sink_backend: "memory".into(), max_delay_ms: 0, ..Config::default() };
    let engine = ImportEngine::new(sink.clone(), cfg);
    (build_schema(engine.clone()), engine, sink)
}

#[tokio::test]
async fn auto_map_reports_columns_and_gaps() {
    let (schema, _, _) = schema();
    let req = async_graphql::Request::new(
        "query($h:[String!]!){ autoMap(headers:$h, kind: SUPPLIER){ mapping unresolved missingRequired } }",
    )
    .variables(async_graphql::Variables::from_json(json!({"h": ["Supplier Name", "Cost", "EAN Code"]})));
    let resp = schema.execute(req).await;
    assert!(resp.errors.is_empty(), "errors: {:?}", resp.errors);

    let data = resp.data.into_json().unwrap();
    let mapping = &data["autoMap"]["mapping"];
    assert_eq!(mapping["supplier_name"], "Supplier Name");
    assert_eq!(mapping["cost"], "Cost");
    assert_eq!(mapping["ean"], "EAN Code");
    assert_eq!(data["autoMap"]["missingRequired"], json!([]));
}

#[tokio::test]
async fn submit_from_path_and_poll_until_done() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("products.csv");
    std::fs::write(&path, "Title,EAN,Brand,Sale Price\nWidget,5000000000001,Acme,9.99\nGadget,5000000000002,Acme,19.99\n")
        .unwrap();

    let (schema, engine, sink) = schema();
    let req = async_graphql::Request::new(
        "mutation($p:String!,$t:JSON){ submitImportFromPath(kind: PRODUCT, path:$p, tuning:$t){ id status } }",
    )
    .variables(async_graphql::Variables::from_json(json!({
        "p": path.display().to_string(),
        "t": {"chunk_size": 1}
    })));
    let resp = schema.execute(req).await;
    assert!(resp.errors.is_empty(), "errors: {:?}", resp.errors);
    let data = resp.data.into_json().unwrap();
    let id = data["submitImportFromPath"]["id"].as_str().unwrap().to_string();

    let job_id = Uuid::parse_str(&id).unwrap();
    tokio::time::timeout(Duration::from_secs(10), engine.wait_for_completion(job_id))
        .await
        .unwrap()
        .unwrap();

    let req = async_graphql::Request::new(
        "query($id:ID!){ importJob(id:$id){ status processed succeeded chunksCompleted progressPercent } importJobs { id } }",
    )
    .variables(async_graphql::Variables::from_json(json!({"id": id})));
    let data = schema.execute(req).await.data.into_json().unwrap();
    assert_eq!(data["importJob"]["status"], "COMPLETED");
    assert_eq!(data["importJob"]["processed"], 2);
    assert_eq!(data["importJob"]["succeeded"], 2);
    assert_eq!(data["importJob"]["chunksCompleted"], 2);
    assert_eq!(data["importJob"]["progressPercent"], 100.0);
    assert_eq!(data["importJobs"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(sink.products().len(), 2);

    let req = async_graphql::Request::new("mutation($id:ID!){ clearImport(id:$id) }")
        .variables(async_graphql::Variables::from_json(json!({"id": id})));
    let resp = schema.execute(req).await;
    assert!(resp.errors.is_empty(), "errors: {:?}", resp.errors);
    assert!(engine.status(job_id).await.is_none());
}

#[tokio::test]
async fn ambiguous_mapping_is_reported_as_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("products.csv");
    std::fs::write(&path, "Title,EAN\nWidget,5000000000001\n").unwrap();

    let (schema, engine, _) = schema();
    let req = async_graphql::Request::new("mutation($p:String!){ submitImportFromPath(kind: PRODUCT, path:$p){ id } }")
        .variables(async_graphql::Variables::from_json(json!({"p": path.display().to_string()})));
    let resp = schema.execute(req).await;
    assert_eq!(resp.errors.len(), 1);
    assert!(resp.errors[0].message.contains("brand"), "message: {}", resp.errors[0].message);
    assert!(engine.list().await.is_empty());
}

#[tokio::test]
async fn non_csv_paths_and_unknown_jobs_are_rejected() {
    let (schema, _, _) = schema();
    let resp = schema
        .execute("mutation{ submitImportFromPath(kind: SUPPLIER, path:\"feed.xlsx\"){ id } }")
        .await;
    assert!(resp.errors[0].message.contains(".csv"));

    let unknown = Uuid::new_v4().to_string();
    let req = async_graphql::Request::new("mutation($id:ID!){ cancelImport(id:$id) }")
        .variables(async_graphql::Variables::from_json(json!({"id": unknown})));
    let data = schema.execute(req).await.data.into_json().unwrap();
    assert_eq!(data["cancelImport"], false);

    let resp = schema.execute("{ health }").await;
    assert_eq!(resp.data.into_json().unwrap()["health"], "OK");
}
