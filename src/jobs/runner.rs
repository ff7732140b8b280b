use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::{JobTuning, PressureSignal};
use crate::handlers::{CsvRowDecoder, ImportSource};
use crate::mapping::FieldMapper;
use crate::matching::{build_index, normalize_key, resolve, EntityIndex};
use crate::models::*;
use crate::pipeline::*;
use crate::storage::PersistenceSink;

/// Everything one job needs; owned by its task.
pub(crate) struct JobContext {
    pub job_id: Uuid,
    pub kind: ImportKind,
    pub source: ImportSource,
    pub schema: ImportSchema,
    pub mapping: FieldMapping,
    pub match_config: MatchKeyConfig,
    pub tuning: JobTuning,
    pub sink: Arc<dyn PersistenceSink>,
    pub job: Arc<Mutex<ImportJob>>,
    pub cancel: Arc<AtomicBool>,
    pub status_tx: Arc<watch::Sender<JobStatus>>,
    /// Replaces the configured pressure signal when set.
    pub probe: Option<Arc<dyn PressureProbe>>,
}

impl JobContext {
    fn update<R>(&self, f: impl FnOnce(&mut ImportJob) -> R) -> R {
        let mut job = self.job.lock().unwrap_or_else(|e| e.into_inner());
        let out = f(&mut job);
        let status = job.status;
        drop(job);
        self.status_tx.send_replace(status);
        out
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn fail(&self, error: JobError) {
        let message = error.message.clone();
        if self.update(|j| j.fail(error)) {
            tracing::error!(job_id = %self.job_id, error = %message, "Import job failed");
        }
    }
}

/// Row accounting shared with the chunk future so partial progress survives a timeout.
struct ChunkWork<'a> {
    tally: &'a mut ChunkTally,
    consecutive_failures: &'a mut u32,
    buffer: &'a mut Vec<SinkRecord>,
    suppliers: &'a mut HashMap<String, EntityId>,
    /// Record key -> first row that carried it in this job
    seen: &'a mut HashMap<String, u64>,
}

enum ChunkVerdict {
    Continue,
    Escalate(JobError),
}

pub(crate) async fn run_job(ctx: JobContext) {
    if !ctx.update(|j| j.start()) {
        tracing::info!(job_id = %ctx.job_id, "Job left the queue before starting; skipping");
        return;
    }
    let start = Instant::now();
    tracing::info!(
        job_id = %ctx.job_id,
        kind = ?ctx.kind,
        file = %ctx.source.file_name(),
        chunk_size = ctx.tuning.chunk_size,
        "Starting import job"
    );

    let index = match prepare(&ctx).await {
        Ok(index) => index,
        Err(e) => {
            ctx.fail(JobError::new(JobErrorKind::Decode, e.to_string()));
            return;
        }
    };

    let hit_ceiling = execute(&ctx, &index).await;

    let cancelled = ctx.cancelled();
    let summary = ctx.update(|j| {
        if hit_ceiling && !j.is_terminal() {
            j.record_error(JobError::new(
                JobErrorKind::RowCeiling,
                format!("Stopped at the configured ceiling of {} rows", j.processed_rows),
            ));
        }
        if cancelled {
            j.cancel();
        } else {
            j.complete();
        }
        JobSummary::from(&*j)
    });

    tracing::info!(
        job_id = %ctx.job_id,
        status = ?summary.status,
        processed = summary.processed,
        succeeded = summary.succeeded,
        failed = summary.failed,
        exact_key = summary.match_stats.exact_key,
        secondary_key = summary.match_stats.secondary_key,
        fuzzy_name = summary.match_stats.fuzzy_name,
        unmatched = summary.match_stats.unmatched,
        duration_ms = start.elapsed().as_millis() as u64,
        "Import job finished"
    );
}

/// Row count and, for supplier jobs, the match index.
async fn prepare(ctx: &JobContext) -> Result<EntityIndex> {
    let precount_allowed = ctx.tuning.precount
        && ctx.source.size_bytes().map(|s| s <= ctx.tuning.precount_max_bytes).unwrap_or(false);

    match ctx.kind {
        ImportKind::Supplier => {
            let source = ctx.source.clone();
            let options = ctx.tuning.decode.clone();
            let mapper = FieldMapper::new(&ctx.schema, &ctx.mapping).with_date_format(&ctx.tuning.date_format);
            let config = ctx.match_config.clone();

            let (rows, values) = tokio::task::spawn_blocking(move || collect_keys(&source, options, &mapper, &config))
                .await
                .map_err(|e| ImportError::Configuration(format!("Prefetch task failed: {}", e)))??;
            ctx.update(|j| j.set_total_rows(rows, false));

            let index = build_index(ctx.sink.as_ref(), &ctx.match_config, &values, ctx.tuning.prefetch_batch_size).await;
            ctx.update(|j| {
                for field in ctx.match_config.key_fields() {
                    if !index.key_available(field) {
                        j.record_error(JobError::new(
                            JobErrorKind::MatchLookup,
                            format!("{:?} lookup failed; those rows fall through to later strategies", field),
                        ));
                    }
                }
                if ctx.match_config.uses_fuzzy_name() && !index.names_available() {
                    j.record_error(JobError::new(JobErrorKind::MatchLookup, "Product name listing failed; fuzzy matching skipped"));
                }
            });
            tracing::info!(
                job_id = %ctx.job_id,
                rows = rows,
                keys = values.values().map(|v| v.len()).sum::<usize>(),
                "Prefetch pass complete"
            );
            Ok(index)
        }
        ImportKind::Product => {
            if precount_allowed {
                match ctx.sink.count_estimate(&ctx.source, &ctx.tuning.decode).await {
                    Ok(rows) => ctx.update(|j| j.set_total_rows(rows, false)),
                    Err(e) => tracing::warn!(job_id = %ctx.job_id, error = %e, "Row pre-count failed; estimating while streaming"),
                }
            }
            Ok(EntityIndex::new())
        }
    }
}

/// One pass over the file gathering the distinct normalized keys each enabled
/// key strategy will look up.
fn collect_keys(
    source: &ImportSource,
    options: crate::handlers::DecodeOptions,
    mapper: &FieldMapper,
    config: &MatchKeyConfig,
) -> Result<(u64, HashMap<KeyField, BTreeSet<String>>)> {
    let mut values: HashMap<KeyField, BTreeSet<String>> = HashMap::new();
    let decoder = CsvRowDecoder::open(source, crate::handlers::DecodeOptions { strict: false, ..options })?;
    let mut rows = 0u64;

    for raw in decoder {
        rows += 1;
        let Ok(raw) = raw else { continue };
        let Ok(record) = mapper.map(&raw) else { continue };
        for strategy in config.enabled() {
            let Some(field) = strategy.key_field() else { continue };
            let value = match strategy.column() {
                Some(column) => record.passthrough(column),
                None => record.text(field.canonical_field()),
            };
            if let Some(key) = value.and_then(|v| normalize_key(field, v)) {
                values.entry(field).or_default().insert(key);
            }
        }
    }
    Ok((rows, values))
}

/// Stream chunks through match and persist. Returns whether the row ceiling cut the file short.
async fn execute(ctx: &JobContext, index: &EntityIndex) -> bool {
    let tuning = &ctx.tuning;
    let (tx, mut rx) = mpsc::channel::<Result<Chunk>>(tuning.queue_capacity);

    let queue_probe = QueueDepthProbe::new(tuning.queue_capacity);
    let depth = queue_probe.counter();
    let probe: Arc<dyn PressureProbe> = match (&ctx.probe, tuning.pressure_signal) {
        (Some(probe), _) => probe.clone(),
        (None, PressureSignal::QueueDepth) => Arc::new(queue_probe),
        (None, PressureSignal::Rss) => Arc::new(RssProbe::new(tuning.memory_budget_bytes)),
    };
    let throttle_ms = Arc::new(AtomicU64::new(0));

    let producer = {
        let source = ctx.source.clone();
        let options = tuning.decode.clone();
        let mapper = FieldMapper::new(&ctx.schema, &ctx.mapping).with_date_format(&tuning.date_format);
        let chunk_size = tuning.chunk_size;
        let cancel = ctx.cancel.clone();
        let depth = depth.clone();
        let throttle_ms = throttle_ms.clone();
        tokio::task::spawn_blocking(move || produce(source, options, mapper, chunk_size, cancel, depth, throttle_ms, tx))
    };

    let mut controller = BackpressureController::new(tuning.backpressure.clone());
    let mut consecutive_failures = 0u32;
    let mut buffer: Vec<SinkRecord> = Vec::with_capacity(controller.batch_size());
    let mut suppliers: HashMap<String, EntityId> = HashMap::new();
    let mut seen: HashMap<String, u64> = HashMap::new();
    let size_bytes = ctx.source.size_bytes();

    while let Some(item) = rx.recv().await {
        depth.fetch_sub(1, Ordering::Relaxed);
        if ctx.cancelled() {
            tracing::info!(job_id = %ctx.job_id, "Cancellation observed at chunk boundary");
            break;
        }

        let chunk = match item {
            Ok(chunk) => chunk,
            Err(e) => {
                let (row, message) = match &e {
                    ImportError::Decode { line, message } => (Some(*line), message.clone()),
                    other => (None, other.to_string()),
                };
                let mut error = JobError::new(JobErrorKind::Decode, message);
                error.row = row;
                ctx.fail(error);
                break;
            }
        };

        let chunk_index = chunk.index;
        let bytes_read = chunk.bytes_read;
        let mut tally = ChunkTally {
            rows: chunk.rows(),
            failed: chunk.rejected.len() as u64,
            errors: chunk.rejected,
            ..Default::default()
        };

        let batch_size = controller.batch_size().min(tuning.chunk_size).max(1);
        let mut timed_out = false;
        let verdict = {
            let work = ChunkWork {
                tally: &mut tally,
                consecutive_failures: &mut consecutive_failures,
                buffer: &mut buffer,
                suppliers: &mut suppliers,
                seen: &mut seen,
            };
            match tokio::time::timeout(tuning.chunk_timeout, process_chunk(ctx, index, chunk.records, batch_size, work)).await {
                Ok(verdict) => verdict,
                Err(_) => {
                    timed_out = true;
                    ChunkVerdict::Continue
                }
            }
        };

        if timed_out {
            let unacknowledged = tally.rows.saturating_sub(tally.settled());
            tally.failed += unacknowledged;
            tally.errors.push(
                JobError::new(
                    JobErrorKind::ChunkTimeout,
                    format!(
                        "{}; {} unacknowledged rows marked failed",
                        ImportError::ChunkTimeout {
                            chunk: chunk_index,
                            timeout_ms: tuning.chunk_timeout.as_millis() as u64
                        },
                        unacknowledged
                    ),
                )
                .in_chunk(chunk_index),
            );
            tracing::warn!(job_id = %ctx.job_id, chunk = chunk_index, failed_rows = unacknowledged, "Chunk timed out; moving on");
        }

        if matches!(verdict, ChunkVerdict::Escalate(_)) {
            // batches after the failing one never ran
            tally.failed += tally.rows.saturating_sub(tally.settled());
        }

        let progress = ctx.update(|j| {
            j.apply_chunk(tally);
            if j.total_rows_estimated {
                if let Some(size) = size_bytes.filter(|_| bytes_read > 0) {
                    let estimate = (j.processed_rows as f64 * size as f64 / bytes_read as f64).round() as u64;
                    j.set_total_rows(estimate.max(j.processed_rows), true);
                }
            }
            (j.processed_rows, j.total_rows, j.succeeded, j.failed)
        });
        tracing::info!(
            job_id = %ctx.job_id,
            chunk = chunk_index,
            progress = format!("{}/{}", progress.0, progress.1),
            succeeded = progress.2,
            failed = progress.3,
            "Import progress"
        );

        if let ChunkVerdict::Escalate(error) = verdict {
            ctx.fail(error);
            break;
        }

        let adjustment = controller.observe(probe.sample());
        throttle_ms.store(adjustment.delay.as_millis() as u64, Ordering::Relaxed);
        if adjustment.reclaim || timed_out {
            // hand the batch buffer's allocation back between chunks
            buffer = Vec::new();
            tracing::debug!(
                job_id = %ctx.job_id,
                pressure = adjustment.pressure,
                batch_size = adjustment.batch_size,
                delay_ms = adjustment.delay.as_millis() as u64,
                "Backpressure engaged"
            );
        }
    }

    drop(rx);
    match producer.await {
        Ok(hit_ceiling) => hit_ceiling,
        Err(e) => {
            tracing::error!(job_id = %ctx.job_id, error = %e, "Chunk producer panicked");
            false
        }
    }
}

/// Blocking side of the pipeline: decode, map, chunk, and hand chunks over in order.
#[allow(clippy::too_many_arguments)]
fn produce(
    source: ImportSource,
    options: crate::handlers::DecodeOptions,
    mapper: FieldMapper,
    chunk_size: usize,
    cancel: Arc<AtomicBool>,
    depth: Arc<AtomicUsize>,
    throttle_ms: Arc<AtomicU64>,
    tx: mpsc::Sender<Result<Chunk>>,
) -> bool {
    let strict = options.strict;
    let decoder = match CsvRowDecoder::open(&source, options) {
        Ok(d) => d,
        Err(e) => {
            let _ = tx.blocking_send(Err(e));
            return false;
        }
    };

    let mut chunker = Chunker::new(decoder, mapper, chunk_size, strict);
    for item in chunker.by_ref() {
        if cancel.load(Ordering::SeqCst) {
            break;
        }
        let delay = throttle_ms.load(Ordering::Relaxed);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        depth.fetch_add(1, Ordering::Relaxed);
        if tx.blocking_send(item).is_err() {
            depth.fetch_sub(1, Ordering::Relaxed);
            break;
        }
    }
    chunker.hit_ceiling()
}

/// Match (supplier jobs) and persist one chunk, batch by batch.
async fn process_chunk(
    ctx: &JobContext,
    index: &EntityIndex,
    records: Vec<MappedRecord>,
    batch_size: usize,
    work: ChunkWork<'_>,
) -> ChunkVerdict {
    let ChunkWork { tally, consecutive_failures, buffer, suppliers, seen } = work;
    buffer.clear();

    for record in records {
        match ctx.kind {
            ImportKind::Product => {
                let product = to_product(&record);
                // rows without a usable EAN are left for the sink to reject
                if let Some(key) = normalize_key(KeyField::Ean, &product.ean) {
                    if let Some(first) = first_seen(seen, format!("ean:{}", key), record.row) {
                        tally.reject(
                            JobError::new(
                                JobErrorKind::Validation,
                                format!("Duplicate EAN '{}'; already imported from row {}", product.ean, first),
                            )
                            .at_row(record.row),
                        );
                        continue;
                    }
                }
                buffer.push(SinkRecord::Product(product));
            }
            ImportKind::Supplier => {
                let supplier = match supplier_id(ctx, &record, suppliers).await {
                    Ok(id) => id,
                    Err(e) => {
                        tally.reject(JobError::new(JobErrorKind::Persistence, e.to_string()).at_row(record.row));
                        continue;
                    }
                };
                let id = link_id(ctx.job_id, &record, supplier);
                if let Some(first) = first_seen(seen, id.to_string(), record.row) {
                    tally.reject(
                        JobError::new(
                            JobErrorKind::Validation,
                            format!("Duplicate supplier line; same product code as row {}", first),
                        )
                        .at_row(record.row),
                    );
                    continue;
                }
                let result = resolve(&record, &ctx.match_config, index);
                tally.match_stats.record(&result);
                buffer.push(SinkRecord::SupplierLink(to_link(id, &record, supplier, &result)));
            }
        }
    }

    let batch_size = even_batch(buffer.len(), batch_size);
    let max_failures = ctx.tuning.max_consecutive_batch_failures;
    for batch in buffer.chunks(batch_size) {
        match persist_with_retry(ctx, batch).await {
            Ok(outcome) => {
                *consecutive_failures = 0;
                tally.succeeded += (batch.len() - outcome.rejected.len()) as u64;
                tally.failed += outcome.rejected.len() as u64;
                for r in outcome.rejected {
                    tally.errors.push(JobError::new(JobErrorKind::Persistence, r.message).at_row(r.row));
                }
            }
            Err(e) => {
                *consecutive_failures += 1;
                tally.failed += batch.len() as u64;
                let first_row = batch.first().map(|r| r.source_row());
                let mut error = JobError::new(JobErrorKind::Persistence, format!("Batch of {} rows failed: {}", batch.len(), e));
                error.row = first_row;
                tally.errors.push(error);

                if *consecutive_failures >= max_failures {
                    return ChunkVerdict::Escalate(JobError::new(
                        JobErrorKind::Persistence,
                        format!("{} consecutive batches failed; last error: {}", consecutive_failures, e),
                    ));
                }
            }
        }
    }
    ChunkVerdict::Continue
}

/// Remember the first row for `key`; returns that row when `key` was already seen.
fn first_seen(seen: &mut HashMap<String, u64>, key: String, row: u64) -> Option<u64> {
    match seen.entry(key) {
        Entry::Occupied(e) => Some(*e.get()),
        Entry::Vacant(e) => {
            e.insert(row);
            None
        }
    }
}

/// Spread `len` records over the fewest batches of at most `max`, without a
/// short tail batch where an even split exists.
fn even_batch(len: usize, max: usize) -> usize {
    let max = max.max(1);
    if len <= max {
        return max;
    }
    len.div_ceil(len.div_ceil(max))
}

async fn supplier_id(
    ctx: &JobContext,
    record: &MappedRecord,
    cache: &mut HashMap<String, EntityId>,
) -> Result<EntityId> {
    let name = record
        .text("supplier_name")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ImportError::Persistence("Row has no supplier name".to_string()))?;
    if let Some(id) = cache.get(&name) {
        return Ok(*id);
    }
    let id = ctx.sink.ensure_supplier(&name).await?;
    cache.insert(name, id);
    Ok(id)
}

/// Retries with exponential backoff; gives up after `persistence_max_retries` extra attempts.
async fn persist_with_retry(ctx: &JobContext, batch: &[SinkRecord]) -> Result<BatchOutcome> {
    let max_retries = ctx.tuning.persistence_max_retries;
    let base_backoff_ms = ctx.tuning.persistence_backoff_ms;
    let mut attempt: u32 = 0;
    loop {
        match ctx.sink.upsert_batch(batch).await {
            Ok(outcome) => return Ok(outcome),
            Err(e) if attempt < max_retries => {
                let backoff = base_backoff_ms.saturating_mul(1u64 << attempt.min(20));
                tracing::warn!(
                    job_id = %ctx.job_id,
                    attempt = attempt + 1,
                    backoff_ms = backoff,
                    error = %e,
                    "Batch write failed; retrying"
                );
                tokio::time::sleep(Duration::from_millis(backoff)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn whole(n: Option<f64>) -> Option<i64> {
    n.map(|v| v.round() as i64)
}

fn to_product(r: &MappedRecord) -> ProductRecord {
    let text = |f: &str| r.text(f).map(|s| s.to_string());
    ProductRecord {
        title: text("title").unwrap_or_default(),
        ean: text("ean").unwrap_or_default(),
        brand: text("brand").unwrap_or_default(),
        sale_price: r.number("sale_price").unwrap_or(0.0),
        mpn: text("mpn"),
        asin: text("asin"),
        upc: text("upc"),
        category: text("category"),
        rating: r.number("rating"),
        review_count: whole(r.number("review_count")).unwrap_or(0),
        units_sold: whole(r.number("units_sold")).unwrap_or(0),
        buy_box_price: r.number("buy_box_price").unwrap_or(0.0),
        amazon_fee: r.number("amazon_fee").unwrap_or(0.0),
        fba_fees: r.number("fba_fees").unwrap_or(0.0),
        referral_fee: r.number("referral_fee").unwrap_or(0.0),
        buy_box_seller_name: text("buy_box_seller_name"),
        source_row: r.row,
    }
}

/// Links are keyed by supplier plus normalized EAN, then MPN; rows with neither
/// fall back to their position in this job.
fn link_id(job_id: Uuid, r: &MappedRecord, supplier_id: EntityId) -> EntityId {
    let ean = r.text("ean").and_then(|v| normalize_key(KeyField::Ean, v));
    let mpn = r.text("mpn").and_then(|v| normalize_key(KeyField::Mpn, v));
    let key = match (&ean, &mpn) {
        (Some(ean), _) => LinkKey::Ean(ean),
        (None, Some(mpn)) => LinkKey::Mpn(mpn),
        (None, None) => LinkKey::Row { job_id, row: r.row },
    };
    SupplierProductLink::deterministic_id(supplier_id, key)
}

fn to_link(id: EntityId, r: &MappedRecord, supplier_id: EntityId, result: &MatchResult) -> SupplierProductLink {
    let text = |f: &str| r.text(f).map(|s| s.to_string());
    SupplierProductLink {
        id,
        supplier_id,
        product_id: result.matched_entity_id,
        ean: text("ean"),
        mpn: text("mpn"),
        product_name: text("product_name"),
        brand: text("brand"),
        cost: r.number("cost").unwrap_or(0.0),
        supplier_stock: whole(r.number("supplier_stock")).unwrap_or(0),
        moq: whole(r.number("moq")).filter(|m| *m > 0).unwrap_or(DEFAULT_MOQ),
        lead_time: text("lead_time").unwrap_or_else(|| DEFAULT_LEAD_TIME.to_string()),
        payment_terms: text("payment_terms").unwrap_or_else(|| DEFAULT_PAYMENT_TERMS.to_string()),
        match_method: result.method.map(|m| m.as_str()).unwrap_or("none").to_string(),
        source_row: r.row,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn links_fall_back_to_default_terms() {
        let mut r = MappedRecord::new(4);
        r.fields.insert("supplier_name".into(), FieldValue::Text("Acme".into()));
        r.fields.insert("cost".into(), FieldValue::Number(2.5));
        r.fields.insert("supplier_stock".into(), FieldValue::Number(11.6));
        let (job, supplier) = (Uuid::new_v4(), Uuid::new_v4());
        let id = link_id(job, &r, supplier);
        let link = to_link(id, &r, supplier, &MatchResult::unmatched(4));
        assert_eq!(link.moq, DEFAULT_MOQ);
        assert_eq!(link.lead_time, DEFAULT_LEAD_TIME);
        assert_eq!(link.payment_terms, DEFAULT_PAYMENT_TERMS);
        assert_eq!(link.supplier_stock, 12);
        assert_eq!(link.match_method, "none");
        assert_eq!(link.product_id, None);
        assert_eq!(link.id, SupplierProductLink::deterministic_id(supplier, LinkKey::Row { job_id: job, row: 4 }));
    }

    #[test]
    fn link_ids_prefer_ean_then_mpn() {
        let (supplier, job) = (Uuid::new_v4(), Uuid::new_v4());
        let mut r = MappedRecord::new(3);
        r.fields.insert("ean".into(), FieldValue::Text("05012345678900".into()));
        r.fields.insert("mpn".into(), FieldValue::Text("WX-100".into()));
        let by_ean = link_id(job, &r, supplier);
        assert_eq!(by_ean, link_id(Uuid::new_v4(), &r, supplier), "stable across jobs");

        r.fields.remove("ean");
        let by_mpn = link_id(job, &r, supplier);
        assert_ne!(by_mpn, by_ean);
        assert_eq!(by_mpn, SupplierProductLink::deterministic_id(supplier, LinkKey::Mpn("wx100")));
    }

    #[test]
    fn batches_split_evenly() {
        assert_eq!(even_batch(100, 100), 100);
        assert_eq!(even_batch(100, 90), 50);
        assert_eq!(even_batch(100, 30), 25);
        assert_eq!(even_batch(7, 3), 3);
        assert_eq!(even_batch(0, 5), 5);
        assert_eq!(even_batch(4, 0), 1);
    }

    #[test]
    fn first_seen_reports_the_earlier_row() {
        let mut seen = HashMap::new();
        assert_eq!(first_seen(&mut seen, "ean:1".into(), 2), None);
        assert_eq!(first_seen(&mut seen, "ean:1".into(), 5), Some(2));
        assert_eq!(first_seen(&mut seen, "ean:2".into(), 6), None);
    }

    #[test]
    fn product_conversion_keeps_optional_fields() {
        let mut r = MappedRecord::new(9);
        for (k, v) in [("title", "Widget"), ("ean", "5012345678900"), ("brand", "Acme"), ("asin", "B000TEST")] {
            r.fields.insert(k.into(), FieldValue::Text(v.into()));
        }
        r.fields.insert("sale_price".into(), FieldValue::Number(19.99));
        r.fields.insert("rating".into(), FieldValue::Number(4.5));
        let p = to_product(&r);
        assert_eq!(p.title, "Widget");
        assert_eq!(p.asin.as_deref(), Some("B000TEST"));
        assert_eq!(p.rating, Some(4.5));
        assert_eq!(p.review_count, 0);
        assert_eq!(p.source_row, 9);
    }
}
