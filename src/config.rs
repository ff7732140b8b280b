use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::handlers::DecodeOptions;
use crate::mapping::DEFAULT_DATE_FORMAT;
use crate::models::*;
use crate::pipeline::BackpressureSettings;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PressureSignal {
    QueueDepth,
    Rss,
}

impl PressureSignal {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "queue" | "queue_depth" => Some(PressureSignal::QueueDepth),
            "rss" | "memory" => Some(PressureSignal::Rss),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub port: u16,
    pub mongodb_uri: String,
    pub database_name: String,
    /// `mongodb` or `memory`
    pub sink_backend: String,
    pub upload_dir: String,
    pub max_upload_bytes: u64,
    pub default_chunk_size: usize,
    pub default_batch_size: usize,
    pub batch_step: usize,
    pub batch_floor: usize,
    pub default_delimiter: char,
    pub default_date_format: String,
    pub row_ceiling: Option<u64>,
    pub chunk_timeout_ms: u64,
    pub pressure_signal: PressureSignal,
    pub memory_budget_mb: u64,
    pub pressure_high_water: f64,
    pub pressure_low_water: f64,
    pub delay_step_ms: u64,
    pub max_delay_ms: u64,
    pub relax_after: u32,
    pub queue_capacity: usize,
    pub persistence_max_retries: u32,
    pub persistence_backoff_ms: u64,
    pub max_consecutive_batch_failures: u32,
    pub fuzzy_threshold: f64,
    pub prefetch_batch_size: usize,
    pub precount_max_bytes: u64,
    pub max_concurrent_jobs: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8091,
            mongodb_uri: "mongodb://localhost:27017".to_string(),
            database_name: "supplier_import".to_string(),
            sink_backend: "mongodb".to_string(),
            upload_dir: "uploads".to_string(),
            max_upload_bytes: 500 * 1024 * 1024,
            default_chunk_size: 100,
            default_batch_size: 100,
            batch_step: 10,
            batch_floor: 1,
            default_delimiter: ',',
            default_date_format: DEFAULT_DATE_FORMAT.to_string(),
            row_ceiling: None,
            chunk_timeout_ms: 60_000,
            pressure_signal: PressureSignal::QueueDepth,
            memory_budget_mb: 1024,
            pressure_high_water: 0.75,
            pressure_low_water: 0.25,
            delay_step_ms: 50,
            max_delay_ms: 2_000,
            relax_after: 2,
            queue_capacity: 4,
            persistence_max_retries: 3,
            persistence_backoff_ms: 500,
            max_consecutive_batch_failures: 3,
            fuzzy_threshold: 0.85,
            prefetch_batch_size: 5_000,
            precount_max_bytes: 200 * 1024 * 1024,
            max_concurrent_jobs: 2,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build from any key lookup; unset or unparsable keys keep their defaults.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();

        Self {
            port: get("PORT").and_then(|s| s.parse().ok()).unwrap_or(d.port),
            mongodb_uri: get("MONGODB_URI").unwrap_or(d.mongodb_uri),
            database_name: get("DATABASE_NAME").unwrap_or(d.database_name),
            sink_backend: get("SINK_BACKEND").unwrap_or(d.sink_backend),
            upload_dir: get("UPLOAD_DIR").unwrap_or(d.upload_dir),
            max_upload_bytes: get("MAX_UPLOAD_BYTES").and_then(|s| s.parse().ok()).unwrap_or(d.max_upload_bytes),
            default_chunk_size: get("DEFAULT_CHUNK_SIZE").and_then(|s| s.parse().ok()).unwrap_or(d.default_chunk_size),
            default_batch_size: get("DEFAULT_BATCH_SIZE").and_then(|s| s.parse().ok()).unwrap_or(d.default_batch_size),
            batch_step: get("BATCH_STEP").and_then(|s| s.parse().ok()).unwrap_or(d.batch_step),
            batch_floor: get("BATCH_FLOOR").and_then(|s| s.parse().ok()).unwrap_or(d.batch_floor),
            default_delimiter: get("CSV_DELIMITER").and_then(|s| s.chars().next()).unwrap_or(d.default_delimiter),
            default_date_format: get("DATE_FORMAT").unwrap_or(d.default_date_format),
            row_ceiling: get("ROW_CEILING").and_then(|s| s.parse().ok()).or(d.row_ceiling),
            chunk_timeout_ms: get("CHUNK_TIMEOUT_MS").and_then(|s| s.parse().ok()).unwrap_or(d.chunk_timeout_ms),
            pressure_signal: get("PRESSURE_SIGNAL").and_then(|s| PressureSignal::parse(&s)).unwrap_or(d.pressure_signal),
            memory_budget_mb: get("MEMORY_BUDGET_MB").and_then(|s| s.parse().ok()).unwrap_or(d.memory_budget_mb),
            pressure_high_water: get("PRESSURE_HIGH_WATER").and_then(|s| s.parse().ok()).unwrap_or(d.pressure_high_water),
            pressure_low_water: get("PRESSURE_LOW_WATER").and_then(|s| s.parse().ok()).unwrap_or(d.pressure_low_water),
            delay_step_ms: get("DELAY_STEP_MS").and_then(|s| s.parse().ok()).unwrap_or(d.delay_step_ms),
            max_delay_ms: get("MAX_DELAY_MS").and_then(|s| s.parse().ok()).unwrap_or(d.max_delay_ms),
            relax_after: get("RELAX_AFTER").and_then(|s| s.parse().ok()).unwrap_or(d.relax_after),
            queue_capacity: get("QUEUE_CAPACITY").and_then(|s| s.parse().ok()).unwrap_or(d.queue_capacity),
            persistence_max_retries: get("PERSISTENCE_MAX_RETRIES").and_then(|s| s.parse().ok()).unwrap_or(d.persistence_max_retries),
            persistence_backoff_ms: get("PERSISTENCE_BACKOFF_MS").and_then(|s| s.parse().ok()).unwrap_or(d.persistence_backoff_ms),
            max_consecutive_batch_failures: get("MAX_CONSECUTIVE_BATCH_FAILURES")
                .and_then(|s| s.parse().ok())
                .unwrap_or(d.max_consecutive_batch_failures),
            fuzzy_threshold: get("FUZZY_THRESHOLD").and_then(|s| s.parse().ok()).unwrap_or(d.fuzzy_threshold),
            prefetch_batch_size: get("PREFETCH_BATCH_SIZE").and_then(|s| s.parse().ok()).unwrap_or(d.prefetch_batch_size),
            precount_max_bytes: get("PRECOUNT_MAX_BYTES").and_then(|s| s.parse().ok()).unwrap_or(d.precount_max_bytes),
            max_concurrent_jobs: get("MAX_CONCURRENT_JOBS").and_then(|s| s.parse().ok()).unwrap_or(d.max_concurrent_jobs),
        }
    }

    /// Resolve the effective settings for one job: per-job overrides first,
    /// then these service defaults.
    pub fn tuning(&self, params: &TuningParams) -> Result<JobTuning> {
        let delimiter = params.delimiter.unwrap_or(self.default_delimiter);
        if !delimiter.is_ascii() {
            return Err(ImportError::Configuration(format!("Delimiter '{}' must be a single ASCII character", delimiter)));
        }

        let chunk_size = params.chunk_size.unwrap_or(self.default_chunk_size).max(1);
        let batch_size = params.batch_size.unwrap_or(self.default_batch_size).clamp(1, chunk_size);
        let high_water = params.pressure_high_water.unwrap_or(self.pressure_high_water);
        let low_water = params.pressure_low_water.unwrap_or(self.pressure_low_water);
        if !(0.0..=1.0).contains(&high_water) || !(0.0..=1.0).contains(&low_water) || low_water > high_water {
            return Err(ImportError::Configuration(format!(
                "Invalid pressure thresholds: low {} / high {}",
                low_water, high_water
            )));
        }

        Ok(JobTuning {
            chunk_size,
            decode: DecodeOptions {
                delimiter: delimiter as u8,
                strict: params.strict.unwrap_or(false),
                row_ceiling: params.row_ceiling.or(self.row_ceiling),
            },
            date_format: params.date_format.clone().unwrap_or_else(|| self.default_date_format.clone()),
            chunk_timeout: Duration::from_millis(params.timeout_ms.unwrap_or(self.chunk_timeout_ms).max(1)),
            backpressure: BackpressureSettings {
                high_water,
                low_water,
                delay_step_ms: self.delay_step_ms,
                max_delay_ms: params.max_delay_ms.unwrap_or(self.max_delay_ms),
                batch_size,
                batch_step: self.batch_step,
                batch_floor: self.batch_floor,
                shrink_batch: self.pressure_signal == PressureSignal::Rss,
                relax_after: self.relax_after,
            },
            pressure_signal: self.pressure_signal,
            memory_budget_bytes: self.memory_budget_mb.saturating_mul(1024 * 1024),
            queue_capacity: self.queue_capacity.max(1),
            precount: params.precount.unwrap_or(true),
            precount_max_bytes: self.precount_max_bytes,
            persistence_max_retries: self.persistence_max_retries,
            persistence_backoff_ms: self.persistence_backoff_ms,
            max_consecutive_batch_failures: self.max_consecutive_batch_failures.max(1),
            fuzzy_threshold: self.fuzzy_threshold,
            prefetch_batch_size: self.prefetch_batch_size.max(1),
        })
    }
}

/// Effective settings for one running job.
#[derive(Debug, Clone)]
pub struct JobTuning {
    pub chunk_size: usize,
    pub decode: DecodeOptions,
    pub date_format: String,
    pub chunk_timeout: Duration,
    pub backpressure: BackpressureSettings,
    pub pressure_signal: PressureSignal,
    pub memory_budget_bytes: u64,
    pub queue_capacity: usize,
    pub precount: bool,
    pub precount_max_bytes: u64,
    pub persistence_max_retries: u32,
    pub persistence_backoff_ms: u64,
    pub max_consecutive_batch_failures: u32,
    pub fuzzy_threshold: f64,
    pub prefetch_batch_size: usize,
}
