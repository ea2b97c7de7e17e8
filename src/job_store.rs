//! The Job Store (C7): durable CRUD over `TrainingJob` plus append-only `TrainingLog` inserts.
//!
//! Every state transition is a single `UPDATE ... WHERE status = $expected` statement, so the
//! automaton in SPEC_FULL §4.8 is enforced by the database itself — a concurrent worker racing
//! another `claim_for_run`/`complete`/`fail`/`cancel` simply affects zero rows and gets
//! `StoreError::AlreadyClaimed` back, never a corrupted row.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;

use crate::error::StoreError;
use crate::progress::LogEvent;
use crate::types::{JobResult, JobStatus, NewTrainingJob, TrainingJob, TrainingLog};

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert_pending(&self, spec: NewTrainingJob, total_iterations: i64) -> Result<i64, StoreError>;
    async fn claim_for_run(&self, id: i64, worker_handle: &str) -> Result<TrainingJob, StoreError>;
    async fn update_progress(&self, id: i64, update: ProgressUpdate) -> Result<(), StoreError>;
    async fn heartbeat(&self, id: i64, worker_handle: &str) -> Result<(), StoreError>;
    async fn complete(&self, id: i64, result: JobResult) -> Result<(), StoreError>;
    async fn fail(&self, id: i64, error_message: &str) -> Result<(), StoreError>;
    async fn cancel(&self, id: i64) -> Result<(), StoreError>;
    async fn delete_if_pending(&self, id: i64) -> Result<bool, StoreError>;
    async fn is_cancelled(&self, id: i64) -> Result<bool, StoreError>;
    async fn get(&self, id: i64) -> Result<TrainingJob, StoreError>;
    async fn list_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<TrainingJob>, StoreError>;
    async fn append_log(&self, event: LogEvent);
    async fn recent_logs(&self, job_id: i64, limit: i64) -> Result<Vec<TrainingLog>, StoreError>;
}

/// Partial, best-effort progress write (§4.6). Never changes `status`.
#[derive(Debug, Clone, Default)]
pub struct ProgressUpdate {
    pub progress: f64,
    pub current_iteration: i64,
    pub total_iterations: i64,
    pub current_reward: Option<f64>,
    pub current_loss: Option<f64>,
    pub current_stage: Option<String>,
}

pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert_pending(&self, spec: NewTrainingJob, total_iterations: i64) -> Result<i64, StoreError> {
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO training_jobs
                (submitted_at, status, strategy_id, symbol, exchange, timeframe, regime,
                 optimizer, lookback_candles, n_iterations, seed,
                 progress, current_iteration, total_iterations)
            VALUES (now(), 'pending', $1, $2, $3, $4, $5, $6, $7, $8, $9, 0, 0, $10)
            RETURNING id
            "#,
        )
        .bind(spec.strategy_id)
        .bind(spec.symbol)
        .bind(spec.exchange)
        .bind(spec.timeframe)
        .bind(spec.regime)
        .bind(spec.optimizer)
        .bind(spec.lookback_candles)
        .bind(spec.n_iterations)
        .bind(spec.seed)
        .bind(total_iterations)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    async fn claim_for_run(&self, id: i64, worker_handle: &str) -> Result<TrainingJob, StoreError> {
        let job = sqlx::query_as::<_, TrainingJobRow>(
            r#"
            UPDATE training_jobs
            SET status = 'running', started_at = now(), worker_handle = $2, updated_at = now()
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(worker_handle)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::AlreadyClaimed(id))?;
        Ok(job.into())
    }

    async fn update_progress(&self, id: i64, update: ProgressUpdate) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE training_jobs
            SET progress = $2, current_iteration = $3, total_iterations = $4,
                current_reward = $5, current_loss = $6, current_stage = $7, updated_at = now()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(update.progress)
        .bind(update.current_iteration)
        .bind(update.total_iterations)
        .bind(update.current_reward)
        .bind(update.current_loss)
        .bind(update.current_stage)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn heartbeat(&self, id: i64, worker_handle: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE training_jobs
            SET updated_at = now()
            WHERE id = $1 AND status = 'running' AND worker_handle = $2
            "#,
        )
        .bind(id)
        .bind(worker_handle)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete(&self, id: i64, result: JobResult) -> Result<(), StoreError> {
        let payload = serde_json::to_value(&result).map_err(|e| StoreError::Backend(sqlx::Error::Decode(Box::new(e))))?;
        sqlx::query(
            r#"
            UPDATE training_jobs
            SET status = 'completed', completed_at = now(), result = $2,
                progress = 1.0, current_reward = $3, updated_at = now()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(payload)
        .bind(result.metrics.objective_score)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fail(&self, id: i64, error_message: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE training_jobs
            SET status = 'failed', completed_at = now(), error_message = $2, updated_at = now()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn cancel(&self, id: i64) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE training_jobs
            SET status = 'cancelled', completed_at = now(), updated_at = now()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_if_pending(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM training_jobs WHERE id = $1 AND status = 'pending'")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn is_cancelled(&self, id: i64) -> Result<bool, StoreError> {
        let row: Option<(JobStatus,)> = sqlx::query_as("SELECT status FROM training_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(matches!(row, Some((JobStatus::Cancelled,))))
    }

    async fn get(&self, id: i64) -> Result<TrainingJob, StoreError> {
        let row = sqlx::query_as::<_, TrainingJobRow>("SELECT * FROM training_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound(id))?;
        Ok(row.into())
    }

    async fn list_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<TrainingJob>, StoreError> {
        let rows = sqlx::query_as::<_, TrainingJobRow>(
            r#"
            SELECT * FROM training_jobs
            WHERE status = ANY($1)
            ORDER BY submitted_at ASC, id ASC
            "#,
        )
        .bind(statuses)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(TrainingJobRow::into).collect())
    }

    async fn append_log(&self, event: LogEvent) {
        let result = sqlx::query(
            r#"
            INSERT INTO training_logs (job_id, event_time, sequence, stage, message, progress, level)
            VALUES ($1, now(), $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event.job_id)
        .bind(event.sequence)
        .bind(&event.stage)
        .bind(&event.message)
        .bind(event.progress)
        .bind(event.level)
        .execute(&self.pool)
        .await;

        // Log-append failures are swallowed per SPEC_FULL §4.7; the row and the SSE stream
        // remain the source of truth even if this write is lost.
        if let Err(e) = result {
            tracing::warn!(job_id = event.job_id, error = %e, "failed to append training log");
        }
    }

    async fn recent_logs(&self, job_id: i64, limit: i64) -> Result<Vec<TrainingLog>, StoreError> {
        let rows = sqlx::query_as::<_, TrainingLog>(
            r#"
            SELECT log_id, job_id, event_time, sequence, stage, message, progress, level
            FROM training_logs
            WHERE job_id = $1
            ORDER BY event_time ASC, sequence ASC
            LIMIT $2
            "#,
        )
        .bind(job_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[derive(sqlx::FromRow)]
struct TrainingJobRow {
    id: i64,
    submitted_at: chrono::DateTime<Utc>,
    started_at: Option<chrono::DateTime<Utc>>,
    completed_at: Option<chrono::DateTime<Utc>>,
    updated_at: chrono::DateTime<Utc>,
    status: JobStatus,
    strategy_id: crate::types::StrategyId,
    symbol: String,
    exchange: String,
    timeframe: String,
    regime: String,
    optimizer: crate::types::OptimizerKind,
    lookback_candles: i64,
    n_iterations: i64,
    seed: Option<i64>,
    worker_handle: Option<String>,
    progress: f64,
    current_iteration: i64,
    total_iterations: i64,
    current_reward: Option<f64>,
    current_loss: Option<f64>,
    current_stage: Option<String>,
    error_message: Option<String>,
    result: Option<serde_json::Value>,
}

impl From<TrainingJobRow> for TrainingJob {
    fn from(r: TrainingJobRow) -> Self {
        TrainingJob {
            id: r.id,
            submitted_at: r.submitted_at,
            started_at: r.started_at,
            completed_at: r.completed_at,
            updated_at: r.updated_at,
            status: r.status,
            strategy_id: r.strategy_id,
            symbol: r.symbol,
            exchange: r.exchange,
            timeframe: r.timeframe,
            regime: r.regime,
            optimizer: r.optimizer,
            lookback_candles: r.lookback_candles,
            n_iterations: r.n_iterations,
            seed: r.seed,
            worker_handle: r.worker_handle,
            progress: r.progress,
            current_iteration: r.current_iteration,
            total_iterations: r.total_iterations,
            current_reward: r.current_reward,
            current_loss: r.current_loss,
            current_stage: r.current_stage,
            error_message: r.error_message,
            result: r.result,
        }
    }
}
