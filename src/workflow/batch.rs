// src/workflow/batch.rs
//! Runs many pipelines in fixed-size concurrent waves.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info, warn};

use super::orchestrator::{PipelineOrchestrator, PipelineReport};
use crate::models::{PipelineRequest, SessionId};
use crate::store::StoreProvider;

/// Per-item result. Failures are data here, never propagated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum BatchItemOutcome {
    Success {
        input_id: i64,
        session_id: SessionId,
        details: PipelineReport,
    },
    Error {
        input_id: i64,
        session_id: Option<SessionId>,
        error: String,
    },
}

impl BatchItemOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, BatchItemOutcome::Success { .. })
    }

    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            BatchItemOutcome::Success { session_id, .. } => Some(*session_id),
            BatchItemOutcome::Error { session_id, .. } => *session_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub total_processed: usize,
    pub success: usize,
    pub failed: usize,
    /// Same order as the submitted items
    pub results: Vec<BatchItemOutcome>,
}

impl BatchReport {
    fn from_results(results: Vec<BatchItemOutcome>) -> Self {
        let success = results.iter().filter(|r| r.is_success()).count();
        Self {
            total_processed: results.len(),
            success,
            failed: results.len() - success,
            results,
        }
    }
}

/// Emitted once per finished wave.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaveProgress {
    /// 1-based
    pub wave: usize,
    pub total_waves: usize,
    pub items_in_wave: usize,
    pub completed_items: usize,
    pub total_items: usize,
    pub succeeded: usize,
    pub failed: usize,
}

pub struct BatchCoordinator {
    orchestrator: Arc<PipelineOrchestrator>,
    provider: Arc<dyn StoreProvider>,
}

impl BatchCoordinator {
    pub fn new(orchestrator: Arc<PipelineOrchestrator>, provider: Arc<dyn StoreProvider>) -> Self {
        Self {
            orchestrator,
            provider,
        }
    }

    pub fn wave_count(total_items: usize, wave_size: usize) -> usize {
        total_items.div_ceil(wave_size.max(1))
    }

    /// The wave size actually used: at least 1, and never more items than
    /// the store can hold handles for at once.
    pub fn effective_wave_size(&self, requested: usize) -> usize {
        let mut wave_size = requested;
        if wave_size == 0 {
            warn!("Wave size 0 requested, using 1");
            wave_size = 1;
        }
        if let Some(capacity) = self.provider.max_concurrency() {
            let capacity = capacity.max(1);
            if wave_size > capacity {
                warn!(
                    "Wave size {} exceeds the {} store handles available, using {}",
                    wave_size, capacity, capacity
                );
                wave_size = capacity;
            }
        }
        wave_size
    }

    pub async fn run_batch(&self, items: Vec<PipelineRequest>, wave_size: usize) -> BatchReport {
        self.run_batch_observed(items, wave_size, None).await
    }

    /// Like `run_batch`, reporting each finished wave on `progress`.
    pub async fn run_batch_observed(
        &self,
        items: Vec<PipelineRequest>,
        wave_size: usize,
        progress: Option<UnboundedSender<WaveProgress>>,
    ) -> BatchReport {
        let wave_size = self.effective_wave_size(wave_size);
        let total_items = items.len();
        let total_waves = Self::wave_count(total_items, wave_size);
        info!(
            "📦 Starting batch of {} item(s) in {} wave(s) of up to {}",
            total_items, total_waves, wave_size
        );

        let mut results: Vec<BatchItemOutcome> = Vec::with_capacity(total_items);

        for (index, wave) in items.chunks(wave_size).enumerate() {
            let wave_number = index + 1;
            info!(
                "🌊 Wave {}/{} started with {} item(s)",
                wave_number,
                total_waves,
                wave.len()
            );

            let outcomes = join_all(wave.iter().map(|item| self.process_item(item))).await;
            results.extend(outcomes);

            let succeeded = results.iter().filter(|r| r.is_success()).count();
            let event = WaveProgress {
                wave: wave_number,
                total_waves,
                items_in_wave: wave.len(),
                completed_items: results.len(),
                total_items,
                succeeded,
                failed: results.len() - succeeded,
            };
            info!(
                "Wave {}/{} finished ({} of {} done, {} failed)",
                wave_number, total_waves, event.completed_items, total_items, event.failed
            );

            if let Some(tx) = &progress {
                // Receiver gone means nobody is watching any more
                let _ = tx.send(event);
            }
        }

        let report = BatchReport::from_results(results);
        info!(
            "✅ Batch finished: {} processed, {} succeeded, {} failed",
            report.total_processed, report.success, report.failed
        );
        report
    }

    /// Run one item on its own store handle and contain any failure.
    pub async fn process_item(&self, item: &PipelineRequest) -> BatchItemOutcome {
        let input_id = item.specific_id;

        let (store, session_id) = match self
            .orchestrator
            .start_session(self.provider.as_ref(), item)
            .await
        {
            Ok(started) => started,
            Err(e) => {
                error!("Could not start session for {}: {}", item.source_url, e);
                return BatchItemOutcome::Error {
                    input_id,
                    session_id: None,
                    error: e.to_string(),
                };
            }
        };

        match self.orchestrator.run(store, session_id, item).await {
            Ok(details) => BatchItemOutcome::Success {
                input_id,
                session_id,
                details,
            },
            Err(e) => {
                error!("Batch item {} (session {}) failed: {}", input_id, session_id, e);
                BatchItemOutcome::Error {
                    input_id,
                    session_id: Some(session_id),
                    error: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Deliverable, OutputKind, Session, Stage, StageId, StageKind, StageStatus};
    use crate::store::{MemoryStore, SessionStore, StageRecorder, StoreError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use crate::workflow::testing::{Faults, Fixture};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn items(urls: &[String]) -> Vec<PipelineRequest> {
        urls.iter()
            .enumerate()
            .map(|(i, url)| {
                let mut request = PipelineRequest::new(url.clone());
                request.specific_id = i as i64 + 1;
                request
            })
            .collect()
    }

    fn urls(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("http://example/{}.mp4", i)).collect()
    }

    fn coordinator(fx: &Fixture) -> BatchCoordinator {
        BatchCoordinator::new(fx.orchestrator.clone(), fx.provider.clone())
    }

    #[test]
    fn test_wave_count() {
        assert_eq!(BatchCoordinator::wave_count(25, 10), 3);
        assert_eq!(BatchCoordinator::wave_count(20, 10), 2);
        assert_eq!(BatchCoordinator::wave_count(0, 10), 0);
        assert_eq!(BatchCoordinator::wave_count(3, 0), 3);
    }

    #[tokio::test]
    async fn test_twenty_five_items_run_in_three_waves() {
        let fx = Fixture::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let report = coordinator(&fx)
            .run_batch_observed(items(&urls(25)), 10, Some(tx))
            .await;

        assert_eq!(report.total_processed, 25);
        assert_eq!(report.success, 25);
        assert_eq!(report.failed, 0);

        let mut waves = Vec::new();
        while let Ok(event) = rx.try_recv() {
            waves.push(event);
        }
        let sizes: Vec<usize> = waves.iter().map(|w| w.items_in_wave).collect();
        assert_eq!(sizes, vec![10, 10, 5]);
        assert_eq!(waves[2].completed_items, 25);
        assert!(waves.iter().all(|w| w.total_waves == 3));
        assert_eq!(fx.store.session_count().await, 25);
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_wave_waits_for_every_item_of_the_previous_one() {
        let fx = Fixture::with_faults(Faults {
            download_delay: Duration::from_millis(50),
            ..Default::default()
        });
        let all_urls = urls(7);

        let report = coordinator(&fx).run_batch(items(&all_urls), 3).await;
        assert_eq!(report.total_processed, 7);

        let events = fx.events.lock().unwrap().clone();
        let position = |event: String| events.iter().position(|e| *e == event).unwrap();

        for (wave_index, wave) in all_urls.chunks(3).enumerate() {
            let last_end = wave
                .iter()
                .map(|url| position(format!("end:{}", url)))
                .max()
                .unwrap();
            let first_end = wave
                .iter()
                .map(|url| position(format!("end:{}", url)))
                .min()
                .unwrap();
            let last_start = wave
                .iter()
                .map(|url| position(format!("start:{}", url)))
                .max()
                .unwrap();

            // All items of a wave are in flight together
            assert!(last_start < first_end, "wave {} did not overlap", wave_index);

            if let Some(next) = all_urls.chunks(3).nth(wave_index + 1) {
                let next_first_start = next
                    .iter()
                    .map(|url| position(format!("start:{}", url)))
                    .min()
                    .unwrap();
                assert!(last_end < next_first_start);
            }
        }
    }

    #[tokio::test]
    async fn test_failing_item_does_not_affect_siblings_or_later_waves() {
        let fx = Fixture::new();
        let mut all_urls = urls(5);
        all_urls[1] = "http://example/missing.mp4".to_string();

        let report = coordinator(&fx).run_batch(items(&all_urls), 2).await;

        assert_eq!(report.total_processed, 5);
        assert_eq!(report.success, 4);
        assert_eq!(report.failed, 1);

        let ids: Vec<i64> = report
            .results
            .iter()
            .map(|r| match r {
                BatchItemOutcome::Success { input_id, .. } => *input_id,
                BatchItemOutcome::Error { input_id, .. } => *input_id,
            })
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);

        match &report.results[1] {
            BatchItemOutcome::Error { session_id, error, .. } => {
                assert!(error.contains("download"));
                let stages = fx.store.stages(session_id.unwrap()).await.unwrap();
                assert_eq!(stages.len(), 1);
                assert_eq!(stages[0].status, StageStatus::Failed);
            }
            other => panic!("expected error outcome, got {:?}", other),
        }
    }

    /// Hands out at most `capacity` live handles; one more open fails like an
    /// exhausted pool would.
    struct CappedProvider {
        store: MemoryStore,
        live: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        capacity: usize,
    }

    struct CappedStore {
        inner: MemoryStore,
        live: Arc<AtomicUsize>,
    }

    impl Drop for CappedStore {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl StoreProvider for CappedProvider {
        async fn open(&self) -> Result<Arc<dyn SessionStore>, StoreError> {
            let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
            if now > self.capacity {
                self.live.fetch_sub(1, Ordering::SeqCst);
                return Err(StoreError::Unavailable("pool exhausted".to_string()));
            }
            self.peak.fetch_max(now, Ordering::SeqCst);
            Ok(Arc::new(CappedStore {
                inner: self.store.clone(),
                live: self.live.clone(),
            }))
        }

        fn backend(&self) -> &'static str {
            "capped"
        }

        fn max_concurrency(&self) -> Option<usize> {
            Some(self.capacity)
        }
    }

    #[async_trait]
    impl StageRecorder for CappedStore {
        async fn begin(&self, session_id: SessionId, kind: StageKind) -> Result<StageId, StoreError> {
            self.inner.begin(session_id, kind).await
        }

        async fn mark_progress(&self, stage_id: StageId, message: &str, error_count: u32) -> Result<(), StoreError> {
            self.inner.mark_progress(stage_id, message, error_count).await
        }

        async fn mark_completed(&self, stage_id: StageId, result_text: &str, error_count: u32) -> Result<(), StoreError> {
            self.inner.mark_completed(stage_id, result_text, error_count).await
        }

        async fn mark_failed(&self, stage_id: StageId, error_text: &str, error_count: u32) -> Result<(), StoreError> {
            self.inner.mark_failed(stage_id, error_text, error_count).await
        }
    }

    #[async_trait]
    impl SessionStore for CappedStore {
        async fn create_session(&self, request: &PipelineRequest) -> Result<SessionId, StoreError> {
            self.inner.create_session(request).await
        }

        async fn session(&self, session_id: SessionId) -> Result<Option<Session>, StoreError> {
            self.inner.session(session_id).await
        }

        async fn stages(&self, session_id: SessionId) -> Result<Vec<Stage>, StoreError> {
            self.inner.stages(session_id).await
        }

        async fn record_deliverable(&self, session_id: SessionId, kind: OutputKind, url: &str) -> Result<(), StoreError> {
            self.inner.record_deliverable(session_id, kind, url).await
        }

        async fn deliverables(&self, session_id: SessionId) -> Result<Vec<Deliverable>, StoreError> {
            self.inner.deliverables(session_id).await
        }

        async fn ping(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_oversized_wave_is_clamped_to_store_capacity() {
        let fx = Fixture::new();
        let peak = Arc::new(AtomicUsize::new(0));
        let provider = Arc::new(CappedProvider {
            store: fx.store.clone(),
            live: Arc::new(AtomicUsize::new(0)),
            peak: peak.clone(),
            capacity: 3,
        });
        let coordinator = BatchCoordinator::new(fx.orchestrator.clone(), provider);
        assert_eq!(coordinator.effective_wave_size(25), 3);
        assert_eq!(coordinator.effective_wave_size(0), 1);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let report = coordinator
            .run_batch_observed(items(&urls(7)), 25, Some(tx))
            .await;

        assert_eq!(report.total_processed, 7);
        assert_eq!(report.success, 7, "{:?}", report.results);
        assert!(peak.load(Ordering::SeqCst) <= 3);

        let mut sizes = Vec::new();
        while let Ok(event) = rx.try_recv() {
            sizes.push(event.items_in_wave);
        }
        assert_eq!(sizes, vec![3, 3, 1]);
    }

    #[tokio::test]
    async fn test_outcome_serializes_with_status_tag() {
        let outcome = BatchItemOutcome::Error {
            input_id: 7,
            session_id: Some(3),
            error: "boom".to_string(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["error"], "boom");
        assert_eq!(json["input_id"], 7);
    }
}
