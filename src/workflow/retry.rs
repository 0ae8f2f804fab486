// src/workflow/retry.rs
//! Bounded per-stage retry with linear backoff and progressive persistence.

use backoff::backoff::Backoff;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::error::{ErrorClass, PipelineError, StageError, StageFailure};
use crate::models::{SessionId, StageKind};
use crate::store::StageRecorder;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Wait before attempt k+1 is `k * backoff_unit`
    pub backoff_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_unit: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    pub fn backoff(&self) -> LinearBackoff {
        LinearBackoff::new(self.backoff_unit)
    }
}

/// 1 unit, 2 units, 3 units, ... Never gives up on its own; the attempt
/// budget lives in `RetryPolicy`.
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    unit: Duration,
    attempt: u32,
}

impl LinearBackoff {
    pub fn new(unit: Duration) -> Self {
        Self { unit, attempt: 0 }
    }
}

impl Backoff for LinearBackoff {
    fn next_backoff(&mut self) -> Option<Duration> {
        self.attempt = self.attempt.saturating_add(1);
        Some(self.unit.saturating_mul(self.attempt))
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// What a stage stores as its result text on success.
pub trait StageOutput {
    /// `None` means the stage has no payload and the success label is stored.
    fn record_text(&self) -> Option<String>;
}

impl StageOutput for String {
    fn record_text(&self) -> Option<String> {
        if self.is_empty() {
            None
        } else {
            Some(self.clone())
        }
    }
}

impl StageOutput for PathBuf {
    fn record_text(&self) -> Option<String> {
        Some(self.display().to_string())
    }
}

impl StageOutput for () {
    fn record_text(&self) -> Option<String> {
        None
    }
}

pub struct RetryingStageRunner<R: ?Sized> {
    recorder: Arc<R>,
    policy: RetryPolicy,
}

impl<R: StageRecorder + ?Sized> RetryingStageRunner<R> {
    pub fn new(recorder: Arc<R>, policy: RetryPolicy) -> Self {
        Self { recorder, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run one stage: a single stage row, up to `max_attempts` invocations of
    /// `work`, and exactly one terminal transition.
    pub async fn run<T, F, Fut>(
        &self,
        session_id: SessionId,
        kind: StageKind,
        mut work: F,
        success_label: &str,
    ) -> Result<T, PipelineError>
    where
        T: StageOutput,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StageError>>,
    {
        let max_attempts = self.policy.attempts();
        let stage_id = self.recorder.begin(session_id, kind).await?;
        let mut backoff = self.policy.backoff();
        let mut failures: u32 = 0;

        info!("▶️ Stage {} started (stage_id={})", kind, stage_id);

        loop {
            match work().await {
                Ok(value) => {
                    let text = value
                        .record_text()
                        .unwrap_or_else(|| success_label.to_string());
                    self.recorder
                        .mark_completed(stage_id, &text, failures)
                        .await?;
                    info!(
                        "✅ Stage {} completed (stage_id={}, errors={})",
                        kind, stage_id, failures
                    );
                    return Ok(value);
                }
                Err(err) => {
                    failures += 1;

                    let permanent = err.class() == ErrorClass::Permanent;
                    if permanent || failures >= max_attempts {
                        error!(
                            "❌ Stage {} failed after {} attempt(s) (stage_id={}): {}",
                            kind, failures, stage_id, err
                        );
                        if let Err(store_err) = self
                            .recorder
                            .mark_failed(stage_id, &err.to_string(), failures)
                            .await
                        {
                            error!(
                                "Failed to record failure of stage {} (stage_id={}): {}",
                                kind, stage_id, store_err
                            );
                        }
                        return Err(StageFailure {
                            kind,
                            attempts: failures,
                            source: err,
                        }
                        .into());
                    }

                    let message = format!("retrying ({}/{}): {}", failures, max_attempts, err);
                    self.recorder
                        .mark_progress(stage_id, &message, failures)
                        .await?;

                    let delay = backoff.next_backoff().unwrap_or(self.policy.backoff_unit);
                    warn!(
                        "🔄 Stage {} attempt {}/{} failed, retrying in {:?}: {}",
                        kind, failures, max_attempts, delay, err
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PipelineRequest, StageStatus};
    use crate::store::{MemoryStore, SessionStore, StoreError};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    async fn runner_with_session(policy: RetryPolicy) -> (MemoryStore, RetryingStageRunner<MemoryStore>, SessionId) {
        let store = MemoryStore::new();
        let session_id = store
            .create_session(&PipelineRequest::new("http://example/v.mp4"))
            .await
            .unwrap();
        let runner = RetryingStageRunner::new(Arc::new(store.clone()), policy);
        (store, runner, session_id)
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff_unit: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_linear_backoff_grows_by_one_unit() {
        let mut backoff = LinearBackoff::new(Duration::from_secs(1));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(1)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(2)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(3)));
        backoff.reset();
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn test_fails_k_times_then_completes_with_error_count_k() {
        for k in 0..3u32 {
            let (store, runner, session_id) = runner_with_session(fast_policy()).await;
            let calls = AtomicU32::new(0);

            let value = runner
                .run(
                    session_id,
                    StageKind::Transcribe,
                    || async {
                        let n = calls.fetch_add(1, Ordering::SeqCst);
                        if n < k {
                            Err(StageError::Transcription(format!("attempt {}", n + 1)))
                        } else {
                            Ok("the transcript".to_string())
                        }
                    },
                    "Transcription complete",
                )
                .await
                .unwrap();

            assert_eq!(value, "the transcript");
            let stages = store.stages(session_id).await.unwrap();
            assert_eq!(stages.len(), 1);
            assert_eq!(stages[0].status, StageStatus::Completed);
            assert_eq!(stages[0].error_count, k);
            assert_eq!(stages[0].result_text, "the transcript");
        }
    }

    #[tokio::test]
    async fn test_exhausted_attempts_mark_failed_and_propagate() {
        let (store, runner, session_id) = runner_with_session(fast_policy()).await;
        let calls = AtomicU32::new(0);

        let result: Result<String, _> = runner
            .run(
                session_id,
                StageKind::Download,
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(StageError::Transfer("connection reset".into()))
                },
                "Download complete",
            )
            .await;

        match result {
            Err(PipelineError::Stage(failure)) => {
                assert_eq!(failure.kind, StageKind::Download);
                assert_eq!(failure.attempts, 3);
            }
            other => panic!("expected stage failure, got {:?}", other.map(|_| ())),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let stage = &store.stages(session_id).await.unwrap()[0];
        assert_eq!(stage.status, StageStatus::Failed);
        assert_eq!(stage.error_count, 3);
        assert_eq!(stage.result_text, "Transfer failed: connection reset");
    }

    #[tokio::test]
    async fn test_unit_output_stores_success_label() {
        let (store, runner, session_id) = runner_with_session(fast_policy()).await;

        runner
            .run(session_id, StageKind::Summarize, || async { Ok(()) }, "Summary stored")
            .await
            .unwrap();

        let stage = &store.stages(session_id).await.unwrap()[0];
        assert_eq!(stage.result_text, "Summary stored");
    }

    #[tokio::test]
    async fn test_empty_text_output_stores_success_label() {
        let (store, runner, session_id) = runner_with_session(fast_policy()).await;

        let value = runner
            .run(
                session_id,
                StageKind::PodcastScript,
                || async { Ok(String::new()) },
                "Script written",
            )
            .await
            .unwrap();

        assert_eq!(value, "");
        let stage = &store.stages(session_id).await.unwrap()[0];
        assert_eq!(stage.result_text, "Script written");
    }

    #[tokio::test]
    async fn test_permanent_error_fails_without_retrying() {
        let (store, runner, session_id) = runner_with_session(fast_policy()).await;
        let calls = AtomicU32::new(0);

        let result: Result<String, _> = runner
            .run(
                session_id,
                StageKind::Summarize,
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(StageError::Configuration("OPENAI_API_KEY not set".into()))
                },
                "Summary complete",
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stage = &store.stages(session_id).await.unwrap()[0];
        assert_eq!(stage.status, StageStatus::Failed);
        assert_eq!(stage.error_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_before_attempt_i_is_i_units() {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff_unit: Duration::from_secs(1),
        };
        let (_store, runner, session_id) = runner_with_session(policy).await;
        let attempts_at: Mutex<Vec<Instant>> = Mutex::new(Vec::new());

        let _ = runner
            .run(
                session_id,
                StageKind::Download,
                || async {
                    attempts_at.lock().unwrap().push(Instant::now());
                    Err::<String, _>(StageError::Transfer("timeout".into()))
                },
                "Download complete",
            )
            .await;

        let times = attempts_at.lock().unwrap().clone();
        assert_eq!(times.len(), 3);
        let first_gap = times[1] - times[0];
        let second_gap = times[2] - times[1];
        assert!(first_gap >= Duration::from_secs(1) && first_gap < Duration::from_millis(1100));
        assert!(second_gap >= Duration::from_secs(2) && second_gap < Duration::from_millis(2100));
    }

    #[tokio::test]
    async fn test_retry_progress_is_observable_between_attempts() {
        let (store, runner, session_id) = runner_with_session(fast_policy()).await;
        let observed: Mutex<Vec<(StageStatus, u32, String)>> = Mutex::new(Vec::new());
        let calls = AtomicU32::new(0);

        runner
            .run(
                session_id,
                StageKind::StudyGuidePdf,
                || async {
                    let stage = store.stages(session_id).await.unwrap().remove(0);
                    observed
                        .lock()
                        .unwrap()
                        .push((stage.status, stage.error_count, stage.result_text));
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(StageError::Publish("blob unavailable".into()))
                    } else {
                        Ok("https://blob/guide.pdf".to_string())
                    }
                },
                "Study guide published",
            )
            .await
            .unwrap();

        let observed = observed.into_inner().unwrap();
        assert_eq!(observed[0].1, 0);
        assert_eq!(observed[1].0, StageStatus::InProgress);
        assert_eq!(observed[1].1, 1);
        assert!(observed[1].2.starts_with("retrying (1/3)"));
        assert_eq!(observed[2].1, 2);
    }

    #[tokio::test]
    async fn test_begin_failure_aborts_without_running_work() {
        let store = MemoryStore::new();
        let runner = RetryingStageRunner::new(Arc::new(store), fast_policy());
        let calls = AtomicU32::new(0);

        let result: Result<String, _> = runner
            .run(
                404,
                StageKind::Download,
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("never".to_string())
                },
                "Download complete",
            )
            .await;

        assert!(matches!(
            result,
            Err(PipelineError::Store(StoreError::SessionNotFound(404)))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
