use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ImportError, ImportKind, MatchStats};

/// Only the first entries are kept; `error_count` carries the total.
pub const MAX_LOGGED_ERRORS: usize = 100;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, async_graphql::Enum)]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, async_graphql::Enum)]
pub enum JobErrorKind {
    Decode,
    Validation,
    MatchLookup,
    Persistence,
    ChunkTimeout,
    RowCeiling,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, async_graphql::SimpleObject)]
pub struct JobError {
    pub kind: JobErrorKind,
    pub message: String,
    pub row: Option<u64>,
    pub chunk: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

impl JobError {
    pub fn new(kind: JobErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), row: None, chunk: None, timestamp: Utc::now() }
    }

    pub fn at_row(mut self, row: u64) -> Self {
        self.row = Some(row);
        self
    }

    pub fn in_chunk(mut self, chunk: u64) -> Self {
        self.chunk = Some(chunk);
        self
    }
}

/// Row accounting for one chunk, folded into the job once the chunk settles.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkTally {
    pub rows: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub match_stats: MatchStats,
    pub errors: Vec<JobError>,
}

impl ChunkTally {
    pub fn settled(&self) -> u64 {
        self.succeeded + self.failed
    }

    /// Count one row as failed without it reaching the sink.
    pub fn reject(&mut self, error: JobError) {
        self.failed += 1;
        self.errors.push(error);
    }
}

/// Per-job overrides of the service-wide defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TuningParams {
    pub chunk_size: Option<usize>,
    pub batch_size: Option<usize>,
    pub row_ceiling: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub strict: Option<bool>,
    pub delimiter: Option<char>,
    pub date_format: Option<String>,
    pub pressure_high_water: Option<f64>,
    pub pressure_low_water: Option<f64>,
    pub max_delay_ms: Option<u64>,
    pub precount: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImportJob {
    pub id: Uuid,
    pub kind: ImportKind,
    pub file_name: String,
    pub status: JobStatus,
    pub status_message: Option<String>,
    pub total_rows: u64,
    /// true until an exact count is known
    pub total_rows_estimated: bool,
    pub processed_rows: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub chunks_completed: u64,
    pub error_log: Vec<JobError>,
    pub error_count: u64,
    pub match_stats: MatchStats,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ImportJob {
    pub fn new(kind: ImportKind, file_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            file_name: file_name.into(),
            status: JobStatus::Queued,
            status_message: None,
            total_rows: 0,
            total_rows_estimated: true,
            processed_rows: 0,
            succeeded: 0,
            failed: 0,
            chunks_completed: 0,
            error_log: Vec::new(),
            error_count: 0,
            match_stats: MatchStats::default(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn start(&mut self) -> bool {
        if self.status != JobStatus::Queued {
            return false;
        }
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
        true
    }

    pub fn complete(&mut self) -> bool {
        if self.status != JobStatus::Running {
            return false;
        }
        self.status = JobStatus::Completed;
        // the stream has ended, so the row count is exact now
        self.total_rows = self.processed_rows;
        self.total_rows_estimated = false;
        self.status_message = Some(format!(
            "Imported {} of {} rows ({} failed)",
            self.succeeded, self.processed_rows, self.failed
        ));
        self.finished_at = Some(Utc::now());
        true
    }

    pub fn fail(&mut self, error: JobError) -> bool {
        if self.status != JobStatus::Running {
            return false;
        }
        self.status = JobStatus::Failed;
        self.status_message = Some(error.message.clone());
        self.record_error(error);
        self.finished_at = Some(Utc::now());
        true
    }

    /// Queued jobs can be cancelled before they ever start.
    pub fn cancel(&mut self) -> bool {
        if !matches!(self.status, JobStatus::Queued | JobStatus::Running) {
            return false;
        }
        self.status = JobStatus::Cancelled;
        self.status_message = Some(ImportError::Cancelled.to_string());
        self.finished_at = Some(Utc::now());
        true
    }

    pub fn record_error(&mut self, error: JobError) {
        self.error_count += 1;
        if self.error_log.len() < MAX_LOGGED_ERRORS {
            self.error_log.push(error);
        }
    }

    pub fn set_total_rows(&mut self, total: u64, estimated: bool) {
        self.total_rows = total;
        self.total_rows_estimated = estimated;
    }

    pub fn apply_chunk(&mut self, tally: ChunkTally) {
        self.processed_rows += tally.rows;
        self.succeeded += tally.succeeded;
        self.failed += tally.failed;
        self.match_stats.merge(&tally.match_stats);
        self.chunks_completed += 1;
        for e in tally.errors {
            self.record_error(e);
        }
        if self.total_rows < self.processed_rows {
            self.total_rows = self.processed_rows;
        }
        self.status_message = Some(format!("Processed {} of ~{} rows", self.processed_rows, self.total_rows));
    }

    pub fn progress_percent(&self) -> f64 {
        if self.status == JobStatus::Completed {
            return 100.0;
        }
        if self.total_rows == 0 {
            return 0.0;
        }
        ((self.processed_rows as f64 / self.total_rows as f64) * 100.0).min(100.0)
    }
}

/// Side-effect free status snapshot returned to pollers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, async_graphql::SimpleObject)]
pub struct JobSummary {
    pub id: String,
    pub kind: ImportKind,
    pub file_name: String,
    pub status: JobStatus,
    pub status_message: Option<String>,
    pub progress_percent: f64,
    pub total_rows: u64,
    pub total_rows_estimated: bool,
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub chunks_completed: u64,
    pub match_stats: MatchStats,
    pub error_summary: Option<String>,
    pub errors: Vec<JobError>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&ImportJob> for JobSummary {
    fn from(job: &ImportJob) -> Self {
        let error_summary = if job.error_count > 0 {
            Some(format!("{} errors occurred during import", job.error_count))
        } else {
            None
        };

        Self {
            id: job.id.to_string(),
            kind: job.kind,
            file_name: job.file_name.clone(),
            status: job.status,
            status_message: job.status_message.clone(),
            progress_percent: job.progress_percent(),
            total_rows: job.total_rows,
            total_rows_estimated: job.total_rows_estimated,
            processed: job.processed_rows,
            succeeded: job.succeeded,
            failed: job.failed,
            chunks_completed: job.chunks_completed,
            match_stats: job.match_stats,
            error_summary,
            errors: job.error_log.clone(),
            created_at: job.created_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_one_transition_leaves_running() {
        let mut job = ImportJob::new(ImportKind::Supplier, "prices.csv");
        assert!(job.start());
        assert!(!job.start());
        assert!(job.complete());
        assert!(!job.cancel());
        assert!(!job.fail(JobError::new(JobErrorKind::Persistence, "late")));
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.error_count, 0);
    }

    #[test]
    fn queued_job_can_be_cancelled_but_not_completed() {
        let mut job = ImportJob::new(ImportKind::Product, "catalog.csv");
        assert!(!job.complete());
        assert!(job.cancel());
        assert!(!job.start());
        assert_eq!(job.status, JobStatus::Cancelled);
    }

    #[test]
    fn error_log_is_capped_but_counted() {
        let mut job = ImportJob::new(ImportKind::Product, "catalog.csv");
        for i in 0..(MAX_LOGGED_ERRORS as u64 + 25) {
            job.record_error(JobError::new(JobErrorKind::Validation, "missing title").at_row(i));
        }
        assert_eq!(job.error_log.len(), MAX_LOGGED_ERRORS);
        assert_eq!(job.error_count, MAX_LOGGED_ERRORS as u64 + 25);
    }

    #[test]
    fn progress_tracks_chunks_and_completion() {
        let mut job = ImportJob::new(ImportKind::Supplier, "prices.csv");
        job.start();
        job.set_total_rows(200, false);
        job.apply_chunk(ChunkTally { rows: 50, succeeded: 48, failed: 2, ..Default::default() });
        assert_eq!(job.progress_percent(), 25.0);
        assert_eq!(job.processed_rows, job.succeeded + job.failed);
        job.complete();
        assert_eq!(job.progress_percent(), 100.0);
        assert_eq!(job.total_rows, 50);
        assert!(!job.total_rows_estimated);
    }

    #[test]
    fn summary_reports_error_count() {
        let mut job = ImportJob::new(ImportKind::Supplier, "prices.csv");
        job.record_error(JobError::new(JobErrorKind::ChunkTimeout, "chunk 3 timed out").in_chunk(3));
        let summary = JobSummary::from(&job);
        assert_eq!(summary.error_summary.as_deref(), Some("1 errors occurred during import"));
        assert_eq!(summary.errors[0].chunk, Some(3));
    }
}
