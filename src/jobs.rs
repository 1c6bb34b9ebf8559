//! Job lifecycle: creation, execution modes, status projection, eviction.
//!
//! Jobs live in an in-memory map with a TTL sweeper; nothing is persisted.
//! Status moves strictly forward along queued → processing → completed |
//! failed, and the stored result belongs to the job until the sweeper or an
//! explicit delete evicts it.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::core::app_state::AppState;
use crate::core::config::Config;
use crate::core::types::{ErrorResponse, JobStatusResponse, ScrapeRequest, SuccessResponse};
use crate::scraping;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub enum JobResult {
    Success(SuccessResponse),
    Error(ErrorResponse),
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub request: ScrapeRequest,
    pub status: JobStatus,
    pub result: Option<JobResult>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// What a status poll resolves to; the transport layer maps these onto
/// response codes.
#[derive(Debug, Clone)]
pub enum JobProjection {
    InFlight(JobStatusResponse),
    Succeeded(SuccessResponse),
    Failed(ErrorResponse),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub total: usize,
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

pub struct JobManager {
    jobs: RwLock<HashMap<Uuid, Job>>,
    ttl: ChronoDuration,
    cleanup_interval: Duration,
}

impl JobManager {
    pub fn new(config: &Config) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            ttl: ChronoDuration::milliseconds(config.job_ttl_ms as i64),
            cleanup_interval: Duration::from_millis(config.job_cleanup_interval_ms),
        }
    }

    /// Register a new queued job and return a snapshot of it.
    pub async fn create(&self, request: ScrapeRequest) -> Job {
        let job = Job {
            id: Uuid::new_v4(),
            request,
            status: JobStatus::Queued,
            result: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        self.jobs.write().await.insert(job.id, job.clone());
        job
    }

    pub async fn get(&self, id: Uuid) -> Option<Job> {
        self.jobs.read().await.get(&id).cloned()
    }

    /// queued → processing. A job already past that point is left alone.
    pub async fn mark_processing(&self, id: Uuid) {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(&id) {
            if job.status == JobStatus::Queued {
                job.status = JobStatus::Processing;
            }
        }
    }

    /// Terminal transition. Ignored when the job is already terminal or was
    /// swept mid-flight.
    pub async fn complete(&self, id: Uuid, result: JobResult) {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(&id) {
            if matches!(job.status, JobStatus::Completed | JobStatus::Failed) {
                return;
            }
            job.status = match result {
                JobResult::Success(_) => JobStatus::Completed,
                JobResult::Error(_) => JobStatus::Failed,
            };
            job.result = Some(result);
            job.completed_at = Some(Utc::now());
        }
    }

    /// Remove a job. Idempotent: deleting an unknown id reports `false`
    /// without complaint.
    pub async fn delete(&self, id: Uuid) -> bool {
        self.jobs.write().await.remove(&id).is_some()
    }

    /// Project a job id onto the polling protocol.
    pub async fn project_status(&self, id: Uuid) -> Option<JobProjection> {
        let jobs = self.jobs.read().await;
        let job = jobs.get(&id)?;
        let projection = match (&job.status, &job.result) {
            (JobStatus::Queued | JobStatus::Processing, _) => {
                JobProjection::InFlight(JobStatusResponse {
                    job_id: id.to_string(),
                    processing: true,
                })
            }
            (_, Some(JobResult::Success(resp))) => JobProjection::Succeeded(resp.clone()),
            (_, Some(JobResult::Error(err))) => JobProjection::Failed(err.clone()),
            // Terminal without result cannot be built through the public
            // transitions; treat it as failed rather than panic.
            (_, None) => JobProjection::Failed(ErrorResponse::new("job result missing")),
        };
        Some(projection)
    }

    pub async fn counts(&self) -> JobCounts {
        let jobs = self.jobs.read().await;
        let mut counts = JobCounts {
            total: jobs.len(),
            queued: 0,
            processing: 0,
            completed: 0,
            failed: 0,
        };
        for job in jobs.values() {
            match job.status {
                JobStatus::Queued => counts.queued += 1,
                JobStatus::Processing => counts.processing += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Drop every job older than the TTL as measured at `now`.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, job| now - job.created_at <= self.ttl);
        let removed = before - jobs.len();
        if removed > 0 {
            debug!("job sweeper: evicted {removed} expired job(s)");
        }
        removed
    }

    /// Spawn the periodic TTL sweeper. Abort the handle on shutdown.
    pub fn start_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = self.clone();
        let interval = manager.cleanup_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The immediate first tick has nothing to sweep.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                manager.sweep_at(Utc::now()).await;
            }
        })
    }
}

/// Run a job to completion synchronously and record the outcome.
///
/// A scrape that reports a transport failure with no salvaged content is a
/// failed job; anything else counts as completed, block signals included.
pub async fn execute_job(state: &AppState, job: &Job) -> Result<SuccessResponse, ErrorResponse> {
    state.jobs.mark_processing(job.id).await;

    match scraping::run_scrape(state, &job.request).await {
        Ok(mut response) => {
            response.job_id = Some(job.id.to_string());
            let transport_failed = response
                .page_error
                .as_deref()
                .map(|e| !e.is_empty())
                .unwrap_or(false)
                && response.content.is_empty();
            if transport_failed {
                let error = ErrorResponse::new(
                    response.page_error.clone().unwrap_or_else(|| "scrape failed".into()),
                );
                state
                    .jobs
                    .complete(job.id, JobResult::Error(error.clone()))
                    .await;
                Err(error)
            } else {
                state
                    .jobs
                    .complete(job.id, JobResult::Success(response.clone()))
                    .await;
                Ok(response)
            }
        }
        Err(e) => {
            let error = ErrorResponse::new(e.to_string());
            state
                .jobs
                .complete(job.id, JobResult::Error(error.clone()))
                .await;
            Err(error)
        }
    }
}

/// Fire-and-forget execution for `instantReturn` requests. Failures are
/// logged; the client learns about them by polling.
pub fn start_job_async(state: AppState, job: Job) {
    info!("job {}: accepted for deferred execution", job.id);
    tokio::spawn(async move {
        if let Err(e) = execute_job(&state, &job).await {
            error!("job {}: background execution failed: {}", job.id, e.error);
        }
    });
}
