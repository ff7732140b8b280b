use std::net::SocketAddr;
use std::sync::Arc;

use async_graphql_axum::{GraphQLRequest, GraphQLResponse};
use axum::{response::Html, routing::get, Extension, Router};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{fmt, EnvFilter};

mod cli;

use supplier_import_service::config::Config;
use supplier_import_service::jobs::ImportEngine;
use supplier_import_service::schema::{build_schema, ImportServiceSchema};
use supplier_import_service::storage::{InMemorySink, MongoSink, PersistenceSink};

use crate::cli::{print_import_usage, run_import_cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load this crate's .env regardless of current working directory, and override any pre-set envs
    let _ = dotenvy::from_filename_override(concat!(env!("CARGO_MANIFEST_DIR"), "/.env"));
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .json()
        .flatten_event(true)
        .with_current_span(true)
        .with_span_list(true)
        .init();

    let cfg = Config::from_env();
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 && (args[1] == "help" || args[1] == "--help" || args[1] == "-h") {
        print_import_usage();
        return Ok(());
    }

    tracing::info!(
        database = %cfg.database_name,
        sink = %cfg.sink_backend,
        max_concurrent_jobs = cfg.max_concurrent_jobs,
        "Loaded configuration"
    );

    let sink: Arc<dyn PersistenceSink> = match cfg.sink_backend.as_str() {
        "memory" => {
            tracing::warn!("Using the in-memory sink; imported data is lost on exit");
            Arc::new(InMemorySink::new())
        }
        _ => Arc::new(MongoSink::connect(&cfg).await?),
    };
    let engine = ImportEngine::new(sink, cfg.clone());

    if args.len() > 1 && args[1] == "import" {
        return run_import_cli(&engine, &args[2..]).await;
    }

    let graphql_schema = build_schema(engine);
    let app = Router::new()
        .route("/graphql", get(graphql_playground).post(graphql_handler))
        .route("/health", get(health_check))
        .layer(Extension(graphql_schema))
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("0.0.0.0:{}", cfg.port).parse()?;
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                tracing::error!(port = cfg.port, "Port is already in use. Try changing PORT env var or stop the other process.");
            }
            return Err(e.into());
        }
    };
    tracing::info!(port = cfg.port, "Supplier import service listening");
    axum::serve(listener, app).await?;

    Ok(())
}

async fn graphql_playground() -> Html<String> {
    Html(async_graphql::http::playground_source(
        async_graphql::http::GraphQLPlaygroundConfig::new("/graphql"),
    ))
}

async fn graphql_handler(
    Extension(schema): Extension<ImportServiceSchema>,
    req: GraphQLRequest,
) -> GraphQLResponse {
    schema.execute(req.into_inner()).await.into()
}

async fn health_check() -> &'static str {
    "OK"
}
