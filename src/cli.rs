use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use supplier_import_service::handlers::ImportSource;
use supplier_import_service::jobs::{ImportEngine, ImportRequest};
use supplier_import_service::models::{ImportKind, TuningParams};

struct ImportArgs {
    kind: ImportKind,
    path: PathBuf,
    tuning: TuningParams,
    supplier_name: Option<String>,
}

fn parse_import_args(args: &[String]) -> Result<ImportArgs> {
    let mut positional = Vec::new();
    let mut tuning = TuningParams::default();
    let mut supplier_name = None;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let mut value = |flag: &str| iter.next().cloned().with_context(|| format!("{} needs a value", flag));
        match arg.as_str() {
            "--strict" => tuning.strict = Some(true),
            "--chunk-size" => tuning.chunk_size = Some(value(arg)?.parse().context("--chunk-size")?),
            "--batch-size" => tuning.batch_size = Some(value(arg)?.parse().context("--batch-size")?),
            "--max-rows" => tuning.row_ceiling = Some(value(arg)?.parse().context("--max-rows")?),
            "--timeout-ms" => tuning.timeout_ms = Some(value(arg)?.parse().context("--timeout-ms")?),
            "--delimiter" => tuning.delimiter = value(arg)?.chars().next(),
            "--supplier" => supplier_name = Some(value(arg)?),
            other if other.starts_with("--") => bail!("Unknown option {}", other),
            other => positional.push(other.to_string()),
        }
    }

    let [kind, path] = positional.as_slice() else {
        bail!("Expected <supplier|product> <file.csv>");
    };
    let kind = match kind.to_ascii_lowercase().as_str() {
        "supplier" => ImportKind::Supplier,
        "product" => ImportKind::Product,
        other => bail!("Unknown import kind '{}'", other),
    };
    Ok(ImportArgs { kind, path: PathBuf::from(path), tuning, supplier_name })
}

/// Run one import to completion and print its final summary as JSON.
pub async fn run_import_cli(engine: &ImportEngine, args: &[String]) -> Result<()> {
    let parsed = match parse_import_args(args) {
        Ok(p) => p,
        Err(e) => {
            print_import_usage();
            return Err(e);
        }
    };

    let mut request = ImportRequest::new(parsed.kind, ImportSource::Path(parsed.path)).with_tuning(parsed.tuning);
    request.supplier_name = parsed.supplier_name;
    let id = engine.submit(request).await?;
    let summary = engine.wait_for_completion(id).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

pub fn print_import_usage() {
    println!(
        "Supplier Import Service

Usage:
  supplier-import-service                     start the GraphQL server
  supplier-import-service import <supplier|product> <file.csv> [options]
  supplier-import-service help

Import options:
  --strict              fail on the first malformed row
  --chunk-size <n>      rows per chunk
  --batch-size <n>      records per write
  --max-rows <n>        stop after n data rows
  --timeout-ms <n>      per-chunk timeout
  --delimiter <c>       field delimiter (default ',')
  --supplier <name>     supplier name for files without a supplier column"
    );
}
