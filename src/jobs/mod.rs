mod runner;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{watch, RwLock, Semaphore};
use uuid::Uuid;

use crate::config::Config;
use crate::handlers::{CsvRowDecoder, ImportSource};
use crate::mapping::prepare_mapping;
use crate::models::*;
use crate::pipeline::PressureProbe;
use crate::storage::PersistenceSink;

use runner::{run_job, JobContext};

/// Everything needed to start one import.
#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub kind: ImportKind,
    pub source: ImportSource,
    /// Explicit column mapping; auto-detected from the headers when absent.
    pub mapping: Option<FieldMapping>,
    pub match_config: Option<MatchKeyConfig>,
    pub tuning: TuningParams,
    /// Job-level supplier name for files without a supplier column.
    pub supplier_name: Option<String>,
    /// Canonical fields (names or labels) this job requires on top of the schema's own.
    pub required_fields: Vec<String>,
    /// Pressure source overriding the configured signal.
    pub probe: Option<Arc<dyn PressureProbe>>,
}

impl ImportRequest {
    pub fn new(kind: ImportKind, source: ImportSource) -> Self {
        Self {
            kind,
            source,
            mapping: None,
            match_config: None,
            tuning: TuningParams::default(),
            supplier_name: None,
            required_fields: Vec::new(),
            probe: None,
        }
    }

    pub fn with_mapping(mut self, mapping: FieldMapping) -> Self {
        self.mapping = Some(mapping);
        self
    }

    pub fn with_match_config(mut self, config: MatchKeyConfig) -> Self {
        self.match_config = Some(config);
        self
    }

    pub fn with_tuning(mut self, tuning: TuningParams) -> Self {
        self.tuning = tuning;
        self
    }

    pub fn with_supplier_name(mut self, name: impl Into<String>) -> Self {
        self.supplier_name = Some(name.into());
        self
    }

    pub fn with_required_fields(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.required_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_pressure_probe(mut self, probe: Arc<dyn PressureProbe>) -> Self {
        self.probe = Some(probe);
        self
    }
}

#[derive(Clone)]
struct JobHandle {
    job: Arc<Mutex<ImportJob>>,
    cancel: Arc<AtomicBool>,
    status_tx: Arc<watch::Sender<JobStatus>>,
}

impl JobHandle {
    fn snapshot(&self) -> ImportJob {
        self.job.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Owns the job registry and runs each import on its own task.
#[derive(Clone)]
pub struct ImportEngine {
    sink: Arc<dyn PersistenceSink>,
    cfg: Config,
    jobs: Arc<RwLock<HashMap<Uuid, JobHandle>>>,
    permits: Arc<Semaphore>,
}

impl ImportEngine {
    pub fn new(sink: Arc<dyn PersistenceSink>, cfg: Config) -> Self {
        let permits = Arc::new(Semaphore::new(cfg.max_concurrent_jobs.max(1)));
        Self { sink, cfg, jobs: Arc::new(RwLock::new(HashMap::new())), permits }
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn sink(&self) -> Arc<dyn PersistenceSink> {
        self.sink.clone()
    }

    /// Validate the request, register a queued job and start it in the background.
    ///
    /// Mapping problems surface here, before any job exists.
    pub async fn submit(&self, req: ImportRequest) -> Result<Uuid> {
        let ImportRequest { kind, source, mapping, match_config, tuning, supplier_name, required_fields, probe } = req;
        let tuning = self.cfg.tuning(&tuning)?;
        let mut schema = ImportSchema::for_kind(kind);
        schema.require(&required_fields)?;

        let headers = {
            let source = source.clone();
            let options = tuning.decode.clone();
            tokio::task::spawn_blocking(move || {
                CsvRowDecoder::open(&source, options).map(|d| d.headers().to_vec())
            })
            .await
            .map_err(|e| ImportError::Configuration(format!("Header read failed: {}", e)))??
        };

        let mut supplied = mapping;
        if let Some(name) = supplier_name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()) {
            supplied = Some(supplied.take().unwrap_or_default().with_default("supplier_name", name));
        }
        let mut mapping = prepare_mapping(&headers, supplied.as_ref(), &schema)?;

        let mut match_config = match_config.unwrap_or_default();
        for strategy in match_config.strategies.iter_mut() {
            if let MatchStrategy::FuzzyName { threshold, .. } = strategy {
                threshold.get_or_insert(tuning.fuzzy_threshold);
            }
        }
        for column in match_config.custom_columns() {
            if !headers.iter().any(|h| header_matches(h, &column)) {
                return Err(ImportError::Configuration(format!("Match column '{}' is not in the file", column)));
            }
            if !mapping.passthrough.contains(&column) {
                mapping.passthrough.push(column);
            }
        }

        let job = ImportJob::new(kind, source.file_name());
        let job_id = job.id;
        let (status_tx, _) = watch::channel(job.status);
        let handle = JobHandle {
            job: Arc::new(Mutex::new(job)),
            cancel: Arc::new(AtomicBool::new(false)),
            status_tx: Arc::new(status_tx),
        };
        self.jobs.write().await.insert(job_id, handle.clone());

        tracing::info!(
            job_id = %job_id,
            kind = ?kind,
            file = %source.file_name(),
            mapped_columns = mapping.columns.len(),
            "Import job queued"
        );

        let ctx = JobContext {
            job_id,
            kind,
            source,
            schema,
            mapping,
            match_config,
            tuning,
            sink: self.sink.clone(),
            job: handle.job,
            cancel: handle.cancel,
            status_tx: handle.status_tx,
            probe,
        };
        let permits = self.permits.clone();
        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                tracing::error!(job_id = %job_id, "Job permits closed; job not started");
                return;
            };
            run_job(ctx).await;
        });

        Ok(job_id)
    }

    pub async fn status(&self, id: Uuid) -> Option<JobSummary> {
        let jobs = self.jobs.read().await;
        jobs.get(&id).map(|h| JobSummary::from(&h.snapshot()))
    }

    /// All known jobs, newest first.
    pub async fn list(&self) -> Vec<JobSummary> {
        let jobs = self.jobs.read().await;
        let mut all: Vec<ImportJob> = jobs.values().map(|h| h.snapshot()).collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all.iter().map(JobSummary::from).collect()
    }

    /// Request cancellation. Running jobs stop at the next chunk boundary;
    /// queued jobs are cancelled on the spot. Returns false for unknown or
    /// already finished jobs.
    pub async fn cancel(&self, id: Uuid) -> bool {
        let jobs = self.jobs.read().await;
        let Some(handle) = jobs.get(&id) else { return false };

        let mut job = handle.job.lock().unwrap_or_else(|e| e.into_inner());
        if job.is_terminal() {
            return false;
        }
        handle.cancel.store(true, Ordering::SeqCst);
        if job.status == JobStatus::Queued {
            job.cancel();
            handle.status_tx.send_replace(job.status);
        }
        tracing::info!(job_id = %id, "Cancellation requested");
        true
    }

    /// Drop a finished job from the registry.
    pub async fn clear(&self, id: Uuid) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let handle = jobs.get(&id).ok_or(ImportError::JobNotFound(id))?;
        if !handle.snapshot().is_terminal() {
            return Err(ImportError::JobActive(id));
        }
        jobs.remove(&id);
        Ok(())
    }

    /// Resolve once the job reaches a terminal state.
    pub async fn wait_for_completion(&self, id: Uuid) -> Result<JobSummary> {
        let mut rx = {
            let jobs = self.jobs.read().await;
            jobs.get(&id).ok_or(ImportError::JobNotFound(id))?.status_tx.subscribe()
        };
        // a closed channel means the handle was dropped, which only happens after clear()
        let _ = rx.wait_for(|s| s.is_terminal()).await;
        self.status(id).await.ok_or(ImportError::JobNotFound(id))
    }
}
