// src/store/mod.rs
//! Durable session and stage bookkeeping.
//!
//! `StageRecorder` is the narrow surface the retry runner needs; `SessionStore`
//! adds session creation and read-back; `StoreProvider` hands every pipeline
//! run its own isolated store handle (for Postgres, its own pooled connection).

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::models::{
    Deliverable, OutputKind, PipelineRequest, Session, SessionId, Stage, StageId, StageKind,
    StageStatus,
};

pub mod memory;
pub mod postgres;

pub use memory::{MemoryStore, MemoryStoreProvider};
pub use postgres::{PgSessionStore, PgStoreProvider};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("Session {0} not found")]
    SessionNotFound(SessionId),
    #[error("Stage {0} not found")]
    StageNotFound(StageId),
    #[error("Stage {stage_id} is already {status} and cannot be modified")]
    StageTerminal { stage_id: StageId, status: StageStatus },
    #[error("Stage {stage_id} error count cannot go from {current} to {requested}")]
    ErrorCountRegressed {
        stage_id: StageId,
        current: u32,
        requested: u32,
    },
    #[error("Corrupt row: {0}")]
    CorruptRow(String),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Per-stage bookkeeping. Every call is durable before it returns.
#[async_trait]
pub trait StageRecorder: Send + Sync {
    /// Insert a new stage row in `InProgress` with an error count of 0.
    async fn begin(&self, session_id: SessionId, kind: StageKind) -> Result<StageId, StoreError>;

    /// Record retry progress; the stage stays `InProgress`.
    async fn mark_progress(
        &self,
        stage_id: StageId,
        message: &str,
        error_count: u32,
    ) -> Result<(), StoreError>;

    async fn mark_completed(
        &self,
        stage_id: StageId,
        result_text: &str,
        error_count: u32,
    ) -> Result<(), StoreError>;

    async fn mark_failed(
        &self,
        stage_id: StageId,
        error_text: &str,
        error_count: u32,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait SessionStore: StageRecorder {
    async fn create_session(&self, request: &PipelineRequest) -> Result<SessionId, StoreError>;

    async fn session(&self, session_id: SessionId) -> Result<Option<Session>, StoreError>;

    /// Stages of a session in execution order.
    async fn stages(&self, session_id: SessionId) -> Result<Vec<Stage>, StoreError>;

    /// Upsert the published URL for one deliverable kind.
    async fn record_deliverable(
        &self,
        session_id: SessionId,
        kind: OutputKind,
        url: &str,
    ) -> Result<(), StoreError>;

    async fn deliverables(&self, session_id: SessionId) -> Result<Vec<Deliverable>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait StoreProvider: Send + Sync {
    /// Open an isolated handle for one pipeline run.
    async fn open(&self) -> Result<Arc<dyn SessionStore>, StoreError>;

    fn backend(&self) -> &'static str;

    /// How many handles may be open at once; `None` when unbounded.
    fn max_concurrency(&self) -> Option<usize> {
        None
    }
}

/// Shared guard for every stage mutation: terminal rows are frozen and the
/// error count never goes backwards.
pub(crate) fn check_transition(
    stage_id: StageId,
    current_status: StageStatus,
    current_count: u32,
    requested_count: u32,
) -> Result<(), StoreError> {
    if current_status.is_terminal() {
        return Err(StoreError::StageTerminal {
            stage_id,
            status: current_status,
        });
    }
    if requested_count < current_count {
        return Err(StoreError::ErrorCountRegressed {
            stage_id,
            current: current_count,
            requested: requested_count,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_transition_rejects_terminal_and_regressions() {
        assert!(check_transition(1, StageStatus::InProgress, 1, 2).is_ok());
        assert!(check_transition(1, StageStatus::InProgress, 2, 2).is_ok());
        assert!(matches!(
            check_transition(1, StageStatus::Completed, 0, 0),
            Err(StoreError::StageTerminal { .. })
        ));
        assert!(matches!(
            check_transition(1, StageStatus::InProgress, 2, 1),
            Err(StoreError::ErrorCountRegressed { current: 2, requested: 1, .. })
        ));
    }
}
