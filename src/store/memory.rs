// src/store/memory.rs
//! In-process store used for tests and for running without a database.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{check_transition, SessionStore, StageRecorder, StoreError, StoreProvider};
use crate::models::{
    Deliverable, OutputKind, PipelineRequest, Session, SessionId, Stage, StageId, StageKind,
    StageStatus,
};

#[derive(Default)]
struct MemoryState {
    next_session_id: SessionId,
    next_stage_id: StageId,
    sessions: HashMap<SessionId, Session>,
    /// Kept in insertion order so per-session filtering preserves execution order
    stages: Vec<Stage>,
    deliverables: Vec<Deliverable>,
}

/// Cloning shares the underlying state, so every handle sees the same rows.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All stages across every session, in insertion order.
    pub async fn all_stages(&self) -> Vec<Stage> {
        self.state.read().await.stages.clone()
    }

    pub async fn session_count(&self) -> usize {
        self.state.read().await.sessions.len()
    }

    async fn transition(
        &self,
        stage_id: StageId,
        status: StageStatus,
        text: &str,
        error_count: u32,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let stage = state
            .stages
            .iter_mut()
            .find(|stage| stage.id == stage_id)
            .ok_or(StoreError::StageNotFound(stage_id))?;

        check_transition(stage_id, stage.status, stage.error_count, error_count)?;

        stage.status = status;
        stage.result_text = text.to_string();
        stage.error_count = error_count;
        stage.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl StageRecorder for MemoryStore {
    async fn begin(&self, session_id: SessionId, kind: StageKind) -> Result<StageId, StoreError> {
        let mut state = self.state.write().await;
        if !state.sessions.contains_key(&session_id) {
            return Err(StoreError::SessionNotFound(session_id));
        }
        state.next_stage_id += 1;
        let id = state.next_stage_id;
        state.stages.push(Stage {
            id,
            session_id,
            kind,
            status: StageStatus::InProgress,
            result_text: "Processing...".to_string(),
            error_count: 0,
            updated_at: Utc::now(),
        });
        Ok(id)
    }

    async fn mark_progress(
        &self,
        stage_id: StageId,
        message: &str,
        error_count: u32,
    ) -> Result<(), StoreError> {
        self.transition(stage_id, StageStatus::InProgress, message, error_count)
            .await
    }

    async fn mark_completed(
        &self,
        stage_id: StageId,
        result_text: &str,
        error_count: u32,
    ) -> Result<(), StoreError> {
        self.transition(stage_id, StageStatus::Completed, result_text, error_count)
            .await
    }

    async fn mark_failed(
        &self,
        stage_id: StageId,
        error_text: &str,
        error_count: u32,
    ) -> Result<(), StoreError> {
        self.transition(stage_id, StageStatus::Failed, error_text, error_count)
            .await
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(&self, request: &PipelineRequest) -> Result<SessionId, StoreError> {
        let mut state = self.state.write().await;
        state.next_session_id += 1;
        let id = state.next_session_id;
        let mut outputs = request.outputs.clone();
        outputs.sort();
        outputs.dedup();
        state.sessions.insert(
            id,
            Session {
                id,
                specific_id: request.specific_id,
                specific_session_id: request.specific_session_id,
                label: request.label.clone(),
                source_url: request.source_url.clone(),
                user: request.user.clone(),
                outputs,
                created_at: Utc::now(),
            },
        );
        Ok(id)
    }

    async fn session(&self, session_id: SessionId) -> Result<Option<Session>, StoreError> {
        Ok(self.state.read().await.sessions.get(&session_id).cloned())
    }

    async fn stages(&self, session_id: SessionId) -> Result<Vec<Stage>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .stages
            .iter()
            .filter(|stage| stage.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn record_deliverable(
        &self,
        session_id: SessionId,
        kind: OutputKind,
        url: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if !state.sessions.contains_key(&session_id) {
            return Err(StoreError::SessionNotFound(session_id));
        }
        let now = Utc::now();
        match state
            .deliverables
            .iter_mut()
            .find(|d| d.session_id == session_id && d.kind == kind)
        {
            Some(existing) => {
                existing.url = url.to_string();
                existing.updated_at = now;
            }
            None => state.deliverables.push(Deliverable {
                session_id,
                kind,
                url: url.to_string(),
                updated_at: now,
            }),
        }
        Ok(())
    }

    async fn deliverables(&self, session_id: SessionId) -> Result<Vec<Deliverable>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .deliverables
            .iter()
            .filter(|d| d.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct MemoryStoreProvider {
    store: MemoryStore,
}

impl MemoryStoreProvider {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }
}

#[async_trait]
impl StoreProvider for MemoryStoreProvider {
    async fn open(&self) -> Result<Arc<dyn SessionStore>, StoreError> {
        Ok(Arc::new(self.store.clone()))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
