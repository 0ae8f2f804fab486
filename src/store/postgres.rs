// src/store/postgres.rs
//! Postgres-backed store. Each pipeline run holds its own pooled connection so
//! concurrent pipelines never share commit boundaries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};

use super::{check_transition, SessionStore, StageRecorder, StoreError, StoreProvider};
use crate::models::{
    Deliverable, OutputKind, PipelineRequest, Session, SessionId, Stage, StageId, StageKind,
    StageStatus,
};

pub struct PgStoreProvider {
    pool: PgPool,
    /// One permit per pooled connection; `open` queues here instead of
    /// timing out inside the pool.
    handles: Arc<Semaphore>,
    capacity: usize,
}

impl PgStoreProvider {
    pub fn new(pool: PgPool) -> Self {
        let capacity = (pool.options().get_max_connections() as usize).max(1);
        Self {
            pool,
            handles: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }
}

#[async_trait]
impl StoreProvider for PgStoreProvider {
    async fn open(&self) -> Result<Arc<dyn SessionStore>, StoreError> {
        let permit = self
            .handles
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| StoreError::Unavailable("connection gate closed".to_string()))?;
        let conn = self.pool.acquire().await?;
        Ok(Arc::new(PgSessionStore {
            conn: Mutex::new(conn),
            _permit: Some(permit),
        }))
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }

    fn max_concurrency(&self) -> Option<usize> {
        Some(self.capacity)
    }
}

pub struct PgSessionStore {
    conn: Mutex<PoolConnection<Postgres>>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl PgSessionStore {
    pub fn new(conn: PoolConnection<Postgres>) -> Self {
        Self {
            conn: Mutex::new(conn),
            _permit: None,
        }
    }

    async fn transition(
        &self,
        stage_id: StageId,
        status: StageStatus,
        text: &str,
        error_count: u32,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().await;

        // The WHERE clause enforces forward-only status and a monotonic error count
        let result = sqlx::query(
            r#"
            UPDATE pipeline_stages
            SET status = $2, result_text = $3, error_count = $4, updated_at = NOW()
            WHERE id = $1 AND status IN (1, 2) AND error_count <= $4
            "#,
        )
        .bind(stage_id)
        .bind(status.code())
        .bind(text)
        .bind(error_count as i32)
        .execute(&mut **conn)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let current: Option<(i16, i32)> =
            sqlx::query_as("SELECT status, error_count FROM pipeline_stages WHERE id = $1")
                .bind(stage_id)
                .fetch_optional(&mut **conn)
                .await?;

        match current {
            None => Err(StoreError::StageNotFound(stage_id)),
            Some((code, count)) => {
                let current_status = StageStatus::from_code(code).ok_or_else(|| {
                    StoreError::CorruptRow(format!("stage {} has status code {}", stage_id, code))
                })?;
                check_transition(stage_id, current_status, count.max(0) as u32, error_count)?;
                Err(StoreError::CorruptRow(format!(
                    "stage {} update matched no row",
                    stage_id
                )))
            }
        }
    }
}

#[async_trait]
impl StageRecorder for PgSessionStore {
    async fn begin(&self, session_id: SessionId, kind: StageKind) -> Result<StageId, StoreError> {
        let mut conn = self.conn.lock().await;
        let stage_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO pipeline_stages (session_id, stage_kind, status, result_text, error_count, updated_at)
            VALUES ($1, $2, $3, 'Processing...', 0, NOW())
            RETURNING id
            "#,
        )
        .bind(session_id)
        .bind(kind.ordinal())
        .bind(StageStatus::InProgress.code())
        .fetch_one(&mut **conn)
        .await?;

        Ok(stage_id)
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
impl SessionStore for PgSessionStore {
    async fn create_session(&self, request: &PipelineRequest) -> Result<SessionId, StoreError> {
        let mut outputs: Vec<i16> = request.outputs.iter().map(|o| o.code()).collect();
        outputs.sort_unstable();
        outputs.dedup();

        let mut conn = self.conn.lock().await;
        let session_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO pipeline_sessions
            (specific_id, specific_session_id, label, source_url, requested_by, requested_outputs, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            RETURNING id
            "#,
        )
        .bind(request.specific_id)
        .bind(request.specific_session_id)
        .bind(&request.label)
        .bind(&request.source_url)
        .bind(&request.user)
        .bind(&outputs)
        .fetch_one(&mut **conn)
        .await?;

        Ok(session_id)
    }

    async fn session(&self, session_id: SessionId) -> Result<Option<Session>, StoreError> {
        let mut conn = self.conn.lock().await;
        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT id, specific_id, specific_session_id, label, source_url, requested_by,
                   requested_outputs, created_at
            FROM pipeline_sessions
            WHERE id = $1
            "#,
        )
        .bind(session_id)
        .fetch_optional(&mut **conn)
        .await?;

        Ok(row.map(Session::from))
    }

    async fn stages(&self, session_id: SessionId) -> Result<Vec<Stage>, StoreError> {
        let mut conn = self.conn.lock().await;
        let rows = sqlx::query_as::<_, StageRow>(
            r#"
            SELECT id, session_id, stage_kind, status, result_text, error_count, updated_at
            FROM pipeline_stages
            WHERE session_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&mut **conn)
        .await?;

        rows.into_iter().map(Stage::try_from).collect()
    }

    async fn record_deliverable(
        &self,
        session_id: SessionId,
        kind: OutputKind,
        url: &str,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().await;
        sqlx::query(
            r#"
            INSERT INTO pipeline_deliverables (session_id, output_kind, url, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (session_id, output_kind)
            DO UPDATE SET url = EXCLUDED.url, updated_at = NOW()
            "#,
        )
        .bind(session_id)
        .bind(kind.code())
        .bind(url)
        .execute(&mut **conn)
        .await?;

        Ok(())
    }

    async fn deliverables(&self, session_id: SessionId) -> Result<Vec<Deliverable>, StoreError> {
        let mut conn = self.conn.lock().await;
        let rows = sqlx::query_as::<_, DeliverableRow>(
            r#"
            SELECT session_id, output_kind, url, updated_at
            FROM pipeline_deliverables
            WHERE session_id = $1
            ORDER BY output_kind ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&mut **conn)
        .await?;

        rows.into_iter().map(Deliverable::try_from).collect()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().await;
        sqlx::query("SELECT 1").execute(&mut **conn).await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: i64,
    specific_id: i64,
    specific_session_id: Option<i64>,
    label: String,
    source_url: String,
    requested_by: String,
    requested_outputs: Vec<i16>,
    created_at: DateTime<Utc>,
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        Session {
            id: row.id,
            specific_id: row.specific_id,
            specific_session_id: row.specific_session_id,
            label: row.label,
            source_url: row.source_url,
            user: row.requested_by,
            outputs: row
                .requested_outputs
                .into_iter()
                .filter_map(|code| OutputKind::from_code(code as i64))
                .collect(),
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct StageRow {
    id: i64,
    session_id: i64,
    stage_kind: i16,
    status: i16,
    result_text: String,
    error_count: i32,
    updated_at: DateTime<Utc>,
}

impl TryFrom<StageRow> for Stage {
    type Error = StoreError;

    fn try_from(row: StageRow) -> Result<Self, Self::Error> {
        let kind = StageKind::from_ordinal(row.stage_kind).ok_or_else(|| {
            StoreError::CorruptRow(format!("stage {} has kind {}", row.id, row.stage_kind))
        })?;
        let status = StageStatus::from_code(row.status).ok_or_else(|| {
            StoreError::CorruptRow(format!("stage {} has status code {}", row.id, row.status))
        })?;

        Ok(Stage {
            id: row.id,
            session_id: row.session_id,
            kind,
            status,
            result_text: row.result_text,
            error_count: row.error_count.max(0) as u32,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct DeliverableRow {
    session_id: i64,
    output_kind: i16,
    url: String,
    updated_at: DateTime<Utc>,
}

impl TryFrom<DeliverableRow> for Deliverable {
    type Error = StoreError;

    fn try_from(row: DeliverableRow) -> Result<Self, Self::Error> {
        let kind = OutputKind::from_code(row.output_kind as i64).ok_or_else(|| {
            StoreError::CorruptRow(format!(
                "deliverable for session {} has kind {}",
                row.session_id, row.output_kind
            ))
        })?;

        Ok(Deliverable {
            session_id: row.session_id,
            kind,
            url: row.url,
            updated_at: row.updated_at,
        })
    }
}
