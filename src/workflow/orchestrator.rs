// src/workflow/orchestrator.rs
//! Drives one session through the fixed stage plan.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};

use super::collaborators::Collaborators;
use super::error::{PipelineError, StageError};
use super::retry::{RetryPolicy, RetryingStageRunner};
use super::stages::{pipeline_plan, Branch, PipelineContext, StageDescriptor, StageInput, StageValue};
use crate::config::DirectoryConfig;
use crate::models::{PipelineRequest, SessionId, StageKind};
use crate::store::{SessionStore, StoreError, StoreProvider};

const PREVIEW_CHARS: usize = 100;

/// Aggregated result of a successful pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub message: String,
    pub session_id: SessionId,
    pub status: String,
    pub video_path: Option<String>,
    pub transcript_preview: Option<String>,
    pub summary_preview: Option<String>,
    pub pdf_url: Option<String>,
    pub podcast_url: Option<String>,
}

impl PipelineReport {
    fn from_context(session_id: SessionId, ctx: &PipelineContext) -> Self {
        Self {
            message: "Workflow completed successfully".to_string(),
            session_id,
            status: "success".to_string(),
            video_path: ctx.video_path.as_ref().map(|p| p.display().to_string()),
            transcript_preview: ctx.transcript.as_deref().map(preview),
            summary_preview: ctx.summary.as_deref().map(preview),
            pdf_url: ctx.pdf_url.clone(),
            podcast_url: ctx.podcast_url.clone(),
        }
    }
}

/// First 100 characters followed by `...`.
pub fn preview(text: &str) -> String {
    let head: String = text.chars().take(PREVIEW_CHARS).collect();
    format!("{}...", head)
}

pub struct PipelineOrchestrator {
    collaborators: Collaborators,
    directories: DirectoryConfig,
    policy: RetryPolicy,
}

impl PipelineOrchestrator {
    pub fn new(collaborators: Collaborators, directories: DirectoryConfig, policy: RetryPolicy) -> Self {
        Self {
            collaborators,
            directories,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Open an isolated store handle and create the session row for `request`.
    pub async fn start_session(
        &self,
        provider: &dyn StoreProvider,
        request: &PipelineRequest,
    ) -> Result<(Arc<dyn SessionStore>, SessionId), StoreError> {
        let store = provider.open().await?;
        let session_id = store.create_session(request).await?;
        info!(
            "🆕 Session {} created for {} (outputs: {:?})",
            session_id, request.source_url, request.outputs
        );
        Ok((store, session_id))
    }

    /// Create a session and run it to completion.
    pub async fn run_request(
        &self,
        provider: &dyn StoreProvider,
        request: &PipelineRequest,
    ) -> Result<PipelineReport, PipelineError> {
        let (store, session_id) = self.start_session(provider, request).await?;
        self.run(store, session_id, request).await
    }

    /// Run every planned stage for an existing session. Transient local
    /// files are removed whatever the outcome.
    pub async fn run(
        &self,
        store: Arc<dyn SessionStore>,
        session_id: SessionId,
        request: &PipelineRequest,
    ) -> Result<PipelineReport, PipelineError> {
        let span = info_span!("pipeline", session_id);

        async move {
            info!("🚀 Starting pipeline for {}", request.source_url);
            let mut ctx = PipelineContext::new(request.source_url.clone());

            let outcome = self
                .execute_plan(&store, session_id, request, &mut ctx)
                .await;
            self.cleanup(&ctx).await;

            match outcome {
                Ok(()) => {
                    info!("🎉 Pipeline completed");
                    Ok(PipelineReport::from_context(session_id, &ctx))
                }
                Err(err) => {
                    warn!("Pipeline aborted: {}", err);
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn execute_plan(
        &self,
        store: &Arc<dyn SessionStore>,
        session_id: SessionId,
        request: &PipelineRequest,
        ctx: &mut PipelineContext,
    ) -> Result<(), PipelineError> {
        let runner = RetryingStageRunner::new(Arc::clone(store), self.policy.clone());
        let mut failed_branches: HashSet<Branch> = HashSet::new();
        let mut first_branch_error: Option<PipelineError> = None;

        for descriptor in pipeline_plan(&request.outputs) {
            if failed_branches.contains(&descriptor.branch) {
                info!(
                    "⏭️ Skipping {} after an earlier failure in its branch",
                    descriptor.kind
                );
                continue;
            }

            let result = self
                .execute_stage(&runner, store, session_id, &descriptor, ctx)
                .await;

            match result {
                Ok(()) => {}
                Err(err)
                    if descriptor.branch == Branch::Core
                        || matches!(err, PipelineError::Store(_)) =>
                {
                    return Err(err);
                }
                Err(err) => {
                    warn!(
                        "Optional branch {:?} failed at {}: {}",
                        descriptor.branch, descriptor.kind, err
                    );
                    failed_branches.insert(descriptor.branch);
                    first_branch_error.get_or_insert(err);
                }
            }
        }

        match first_branch_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn execute_stage(
        &self,
        runner: &RetryingStageRunner<dyn SessionStore>,
        store: &Arc<dyn SessionStore>,
        session_id: SessionId,
        descriptor: &StageDescriptor,
        ctx: &mut PipelineContext,
    ) -> Result<(), PipelineError> {
        let kind = descriptor.kind;
        let input = ctx
            .select(descriptor.input)
            .ok_or(PipelineError::MissingInput { kind })?;
        let correlation_id = session_id.to_string();

        let value = runner
            .run(
                session_id,
                kind,
                || self.invoke(kind, &input, &correlation_id),
                descriptor.success_label,
            )
            .await?;

        if let (Some(output_kind), StageValue::Url(url)) = (kind.deliverable(), &value) {
            store.record_deliverable(session_id, output_kind, url).await?;
        }

        ctx.absorb(kind, value);
        Ok(())
    }

    /// One attempt of a stage's unit of work.
    async fn invoke(
        &self,
        kind: StageKind,
        input: &StageInput,
        correlation_id: &str,
    ) -> Result<StageValue, StageError> {
        let c = &self.collaborators;

        match (kind, input) {
            (StageKind::Download, StageInput::Url(url)) => {
                let name_hint = format!("session_{}", correlation_id);
                c.downloader
                    .download(url, &self.directories.input_video_dir, &name_hint)
                    .await
                    .map(StageValue::Path)
            }
            (StageKind::ExtractAudio, StageInput::Path(video)) => c
                .audio_extractor
                .extract(video, &self.directories.temp_audio_dir)
                .await
                .map(StageValue::Path),
            (StageKind::Transcribe, StageInput::Path(audio)) => c
                .transcriber
                .transcribe(audio, correlation_id)
                .await
                .map(StageValue::Text),
            (StageKind::Summarize, StageInput::Text(transcript)) => c
                .summarizer
                .summarize(transcript)
                .await
                .map(StageValue::Text),
            (StageKind::StudyGuidePdf, StageInput::Text(summary)) => c
                .study_guide
                .generate_and_publish(summary, correlation_id)
                .await
                .map(StageValue::Url),
            (StageKind::PodcastScript, StageInput::Text(summary)) => c
                .podcast_script
                .write_script(summary)
                .await
                .map(StageValue::Text),
            (StageKind::PodcastAudio, StageInput::Text(script)) => c
                .podcast_audio
                .generate_and_publish(script, correlation_id)
                .await
                .map(StageValue::Url),
            (kind, input) => Err(StageError::Configuration(format!(
                "stage {} cannot consume {:?}",
                kind, input
            ))),
        }
    }

    async fn cleanup(&self, ctx: &PipelineContext) {
        for path in ctx.transient_files() {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!("🧹 Removed {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OutputKind, StageStatus};
    use crate::workflow::testing::{Faults, Fixture, ALWAYS};

    fn request(outputs: Vec<OutputKind>) -> PipelineRequest {
        PipelineRequest::new("http://example/v.mp4").with_outputs(outputs)
    }

    #[test]
    fn test_preview_truncates_on_char_boundaries() {
        assert_eq!(preview("short"), "short...");
        let long = "é".repeat(150);
        let p = preview(&long);
        assert_eq!(p.chars().count(), 103);
        assert!(p.ends_with("..."));
    }

    #[tokio::test]
    async fn test_core_only_run_records_four_stages() {
        let fx = Fixture::new();
        let report = fx
            .orchestrator
            .run_request(&*fx.provider, &request(vec![]))
            .await
            .unwrap();

        assert_eq!(report.status, "success");
        assert_eq!(report.pdf_url, None);
        assert_eq!(report.podcast_url, None);
        assert!(report.summary_preview.unwrap().ends_with("..."));

        let stages = fx.store.stages(report.session_id).await.unwrap();
        let kinds: Vec<StageKind> = stages.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                StageKind::Download,
                StageKind::ExtractAudio,
                StageKind::Transcribe,
                StageKind::Summarize
            ]
        );
        assert!(stages.iter().all(|s| s.status == StageStatus::Completed));

        assert!(fx.files_in(&fx.directories.input_video_dir).is_empty());
        assert!(fx.files_in(&fx.directories.temp_audio_dir).is_empty());
    }

    #[tokio::test]
    async fn test_flaky_pdf_generator_completes_with_two_errors() {
        let fx = Fixture::with_faults(Faults {
            study_guide: 2,
            ..Default::default()
        });
        let report = fx
            .orchestrator
            .run_request(&*fx.provider, &request(vec![OutputKind::Pdf]))
            .await
            .unwrap();

        let pdf_url = report.pdf_url.clone().unwrap();
        assert!(pdf_url.ends_with(".pdf"));
        assert_eq!(fx.study_guide.flaky.calls(), 3);

        let stages = fx.store.stages(report.session_id).await.unwrap();
        let pdf_stage = stages
            .iter()
            .find(|s| s.kind == StageKind::StudyGuidePdf)
            .unwrap();
        assert_eq!(pdf_stage.status, StageStatus::Completed);
        assert_eq!(pdf_stage.error_count, 2);
        assert_eq!(pdf_stage.result_text, pdf_url);

        let deliverables = fx.store.deliverables(report.session_id).await.unwrap();
        assert_eq!(deliverables.len(), 1);
        assert_eq!(deliverables[0].kind, OutputKind::Pdf);
        assert_eq!(deliverables[0].url, pdf_url);
    }

    #[tokio::test]
    async fn test_transcription_failure_aborts_and_cleans_up() {
        let fx = Fixture::with_faults(Faults {
            transcribe: ALWAYS,
            ..Default::default()
        });
        let req = request(vec![OutputKind::Pdf, OutputKind::Podcast]);
        let (store, session_id) = fx
            .orchestrator
            .start_session(&*fx.provider, &req)
            .await
            .unwrap();

        let err = fx.orchestrator.run(store, session_id, &req).await.unwrap_err();
        assert_eq!(err.failed_stage(), Some(StageKind::Transcribe));
        assert_eq!(fx.transcriber.flaky.calls(), 3);

        let stages = fx.store.stages(session_id).await.unwrap();
        assert_eq!(stages.len(), 3);
        assert_eq!(stages[2].kind, StageKind::Transcribe);
        assert_eq!(stages[2].status, StageStatus::Failed);
        assert_eq!(stages[2].error_count, 3);
        assert_eq!(fx.study_guide.flaky.calls(), 0);

        let video = std::path::PathBuf::from(&stages[0].result_text);
        assert!(!video.exists());
        assert!(fx.files_in(&fx.directories.temp_audio_dir).is_empty());
    }

    #[tokio::test]
    async fn test_pdf_failure_still_attempts_podcast_branch() {
        let fx = Fixture::with_faults(Faults {
            study_guide: ALWAYS,
            ..Default::default()
        });
        let req = request(vec![OutputKind::Pdf, OutputKind::Podcast]);
        let (store, session_id) = fx
            .orchestrator
            .start_session(&*fx.provider, &req)
            .await
            .unwrap();

        let err = fx.orchestrator.run(store, session_id, &req).await.unwrap_err();
        assert_eq!(err.failed_stage(), Some(StageKind::StudyGuidePdf));

        let stages = fx.store.stages(session_id).await.unwrap();
        let status_of = |kind: StageKind| {
            stages
                .iter()
                .find(|s| s.kind == kind)
                .map(|s| s.status)
        };
        assert_eq!(status_of(StageKind::StudyGuidePdf), Some(StageStatus::Failed));
        assert_eq!(status_of(StageKind::PodcastScript), Some(StageStatus::Completed));
        assert_eq!(status_of(StageKind::PodcastAudio), Some(StageStatus::Completed));

        let deliverables = fx.store.deliverables(session_id).await.unwrap();
        assert_eq!(deliverables.len(), 1);
        assert_eq!(deliverables[0].kind, OutputKind::Podcast);
    }

    #[tokio::test]
    async fn test_script_failure_skips_podcast_audio() {
        let fx = Fixture::with_faults(Faults {
            podcast_script: ALWAYS,
            ..Default::default()
        });
        let req = request(vec![OutputKind::Podcast]);
        let (store, session_id) = fx
            .orchestrator
            .start_session(&*fx.provider, &req)
            .await
            .unwrap();

        let err = fx.orchestrator.run(store, session_id, &req).await.unwrap_err();
        assert_eq!(err.failed_stage(), Some(StageKind::PodcastScript));
        assert_eq!(fx.podcast_audio.flaky.calls(), 0);

        let stages = fx.store.stages(session_id).await.unwrap();
        assert_eq!(stages.len(), 5);
        assert!(stages.iter().all(|s| s.kind != StageKind::PodcastAudio));
    }

    #[tokio::test]
    async fn test_missing_source_fails_download_stage() {
        let fx = Fixture::new();
        let req = PipelineRequest::new("http://example/missing.mp4");

        let err = fx
            .orchestrator
            .run_request(&*fx.provider, &req)
            .await
            .unwrap_err();
        assert_eq!(err.failed_stage(), Some(StageKind::Download));

        let stages = fx.store.all_stages().await;
        assert_eq!(stages.len(), 1);
        assert_eq!(stages[0].status, StageStatus::Failed);
        assert!(stages[0].result_text.starts_with("Source not found"));
    }
}
