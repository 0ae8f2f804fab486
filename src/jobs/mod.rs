// src/jobs/mod.rs
//! Background batch jobs: accept a batch immediately, run it on a spawned
//! task and expose wave progress for polling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::models::PipelineRequest;
use crate::workflow::{BatchCoordinator, BatchReport, WaveProgress};

/// Unique identifier for a background job
pub type JobId = String;

/// Job status representing the current state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum JobStatus {
    /// Accepted, first wave not started yet
    Queued { total_items: usize },
    Running {
        waves_completed: usize,
        total_waves: usize,
        items_completed: usize,
        total_items: usize,
        succeeded: usize,
        failed: usize,
        progress_percent: f64,
    },
    /// Every item reached a terminal outcome; item failures live in the report
    Completed {
        report: BatchReport,
        duration_seconds: f64,
    },
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobStatus::Completed { .. })
    }

    fn running(progress: &WaveProgress) -> Self {
        let progress_percent = if progress.total_items == 0 {
            100.0
        } else {
            progress.completed_items as f64 * 100.0 / progress.total_items as f64
        };
        JobStatus::Running {
            waves_completed: progress.wave,
            total_waves: progress.total_waves,
            items_completed: progress.completed_items,
            total_items: progress.total_items,
            succeeded: progress.succeeded,
            failed: progress.failed,
            progress_percent,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJob {
    pub id: JobId,
    pub total_items: usize,
    pub wave_size: usize,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub status: JobStatus,
}

impl BatchJob {
    pub fn new(total_items: usize, wave_size: usize) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            total_items,
            wave_size,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            status: JobStatus::Queued { total_items },
        }
    }
}

/// In-memory registry of batch jobs
pub struct BatchJobManager {
    jobs: Arc<RwLock<HashMap<JobId, BatchJob>>>,
}

impl BatchJobManager {
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn create_job(&self, job: BatchJob) -> JobId {
        let job_id = job.id.clone();
        let mut jobs = self.jobs.write().await;
        jobs.insert(job_id.clone(), job);
        tracing::info!("🎬 Created batch job: {}", job_id);
        job_id
    }

    pub async fn get_job(&self, job_id: &str) -> Option<BatchJob> {
        let jobs = self.jobs.read().await;
        jobs.get(job_id).cloned()
    }

    pub async fn job_count(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn update_job_status(&self, job_id: &str, status: JobStatus) {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(job_id) {
            match &status {
                JobStatus::Running { .. } if job.started_at.is_none() => {
                    job.started_at = Some(Utc::now());
                }
                JobStatus::Completed { .. } => {
                    job.completed_at = Some(Utc::now());
                }
                _ => {}
            }
            job.status = status;
            tracing::debug!("📊 Updated batch job {} status", job_id);
        }
    }

    pub async fn record_progress(&self, job_id: &str, progress: &WaveProgress) {
        self.update_job_status(job_id, JobStatus::running(progress))
            .await;
    }

    /// Remove finished jobs that completed before `cutoff`. Returns how many were removed.
    pub async fn cleanup_finished_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|job_id, job| {
            let expired = matches!(job.completed_at, Some(completed_at) if completed_at < cutoff);
            if expired {
                tracing::debug!("🗑️ Cleaned up old batch job: {}", job_id);
            }
            !expired
        });
        before - jobs.len()
    }

    /// Cleanup completed jobs older than specified duration
    pub async fn cleanup_old_jobs(&self, max_age_hours: i64) -> usize {
        let cutoff = Utc::now() - chrono::Duration::hours(max_age_hours);
        self.cleanup_finished_before(cutoff).await
    }
}

impl Default for BatchJobManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared job manager instance (stored in AppState)
pub type SharedJobManager = Arc<BatchJobManager>;

/// Register a job for `items` and run it in the background. Returns at once.
pub async fn spawn_batch(
    manager: SharedJobManager,
    coordinator: Arc<BatchCoordinator>,
    items: Vec<PipelineRequest>,
    wave_size: usize,
) -> JobId {
    let wave_size = coordinator.effective_wave_size(wave_size);
    let job_id = manager
        .create_job(BatchJob::new(items.len(), wave_size))
        .await;

    let (tx, mut rx) = mpsc::unbounded_channel::<WaveProgress>();

    let forward_manager = manager.clone();
    let forward_id = job_id.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(progress) = rx.recv().await {
            forward_manager.record_progress(&forward_id, &progress).await;
        }
    });

    let run_id = job_id.clone();
    tokio::spawn(async move {
        let total_items = items.len();
        let total_waves = BatchCoordinator::wave_count(total_items, wave_size);
        manager
            .update_job_status(
                &run_id,
                JobStatus::Running {
                    waves_completed: 0,
                    total_waves,
                    items_completed: 0,
                    total_items,
                    succeeded: 0,
                    failed: 0,
                    progress_percent: 0.0,
                },
            )
            .await;

        let started = std::time::Instant::now();
        let report = coordinator
            .run_batch_observed(items, wave_size, Some(tx))
            .await;

        // The sender is gone once the batch returns; drain the last events first
        if let Err(e) = forwarder.await {
            tracing::warn!("Progress forwarder for job {} stopped: {}", run_id, e);
        }

        tracing::info!(
            "🏁 Batch job {} completed: {} succeeded, {} failed",
            run_id,
            report.success,
            report.failed
        );
        manager
            .update_job_status(
                &run_id,
                JobStatus::Completed {
                    report,
                    duration_seconds: started.elapsed().as_secs_f64(),
                },
            )
            .await;
    });

    job_id
}
