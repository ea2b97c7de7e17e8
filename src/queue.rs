//! Queue & Dispatcher (C8): a FIFO-by-`(submitted_at, id)` claim over `pending` rows and the
//! worker loop that drives one job from claim to terminal state.
//!
//! There is no separate broker: `claim_next` is `SELECT ... FOR UPDATE SKIP LOCKED` against the
//! Job Store's own table (SPEC_FULL §4.8/§6's "the source of truth is the Job Store"), so two
//! workers racing the same row never both win it. A job handle whose `pending` row was deleted
//! by a cancellation is skipped silently, per the same section.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::time::Instant;

use crate::bar_store::BarStore;
use crate::error::{EvalError, QueueError, StoreError};
use crate::evaluator;
use crate::job_store::{JobStore, ProgressUpdate};
use crate::monitoring::MetricsCollector;
use crate::progress::{LogSequencer, ProgressChannel, ProgressSnapshot, ProgressRegistry};
use crate::search::{BayesianSurrogate, GridSearch, RandomSearch, Suggester};
use crate::strategies;
use crate::types::{
    JobResult, JobStatus, LogLevel, MarketFriction, NewTrainingJob, OptimizerKind, ParameterVector,
    TrainingJob,
};

/// Durable FIFO identified by name `training` per SPEC_FULL §6; since the Job Store's `status`
/// column already carries the queue's only state, "popping" the queue is `claim_next`.
pub struct Queue {
    pool: PgPool,
    store: Arc<dyn JobStore>,
}

impl Queue {
    pub fn new(pool: PgPool, store: Arc<dyn JobStore>) -> Self {
        Self { pool, store }
    }

    /// Picks the oldest `pending` row under `FOR UPDATE SKIP LOCKED` so concurrent workers never
    /// block each other choosing a candidate, then hands the actual `pending -> running`
    /// transition to `JobStore::claim_for_run` — the store is the single authority over that
    /// edge (SPEC_FULL §4.7). The lock is released at this transaction's commit, so another
    /// worker can still beat us to `claim_for_run`; that race is harmless, since the store's
    /// `WHERE status = 'pending'` guard lets only one caller win and reports
    /// `StoreError::AlreadyClaimed` to the other, which we treat as "queue is empty for now".
    pub async fn claim_next(&self, worker_handle: &str) -> Result<Option<i64>, QueueError> {
        let mut tx = self.pool.begin().await?;
        let row: Option<(i64,)> = sqlx::query_as(
            r#"
            SELECT id FROM training_jobs
            WHERE status = 'pending'
            ORDER BY submitted_at ASC, id ASC
            FOR UPDATE SKIP LOCKED
            LIMIT 1
            "#,
        )
        .fetch_optional(&mut *tx)
        .await?;
        tx.commit().await?;

        let Some((id,)) = row else {
            return Ok(None);
        };

        match self.store.claim_for_run(id, worker_handle).await {
            Ok(job) => Ok(Some(job.id)),
            Err(StoreError::AlreadyClaimed(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Flag a running worker polls between candidate evaluations. Set by `DELETE /jobs/{id}`
/// (§4.8); the worker finishes the in-flight candidate, then exits without writing further
/// state — the terminal transition was the cancel itself.
pub type CancelFlag = Arc<AtomicBool>;

pub fn new_cancel_flag() -> CancelFlag {
    Arc::new(AtomicBool::new(false))
}

/// Shared handles one worker task needs for its whole lifetime.
pub struct WorkerContext {
    pub pool: PgPool,
    pub store: Arc<dyn JobStore>,
    pub bars: Arc<BarStore>,
    pub metrics: Arc<MetricsCollector>,
    pub progress_registry: ProgressRegistry,
    pub progress_throttle: Duration,
    pub heartbeat_interval: Duration,
    pub job_timeout: Duration,
    pub worker_handle: String,
}

/// One worker's main loop: block-pop, claim, run to a terminal state, repeat.
///
/// The `cancel_flags` map lets `DELETE /jobs/{id}` reach a specific in-flight job; entries are
/// removed once the job reaches a terminal state.
pub async fn run_worker(
    ctx: Arc<WorkerContext>,
    cancel_flags: Arc<dashmap::DashMap<i64, CancelFlag>>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let queue = Queue::new(ctx.pool.clone(), ctx.store.clone());
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            claimed = queue.claim_next(&ctx.worker_handle) => {
                match claimed {
                    Ok(Some(job_id)) => {
                        let flag = new_cancel_flag();
                        cancel_flags.insert(job_id, flag.clone());
                        run_job(&ctx, job_id, flag).await;
                        cancel_flags.remove(&job_id);
                    }
                    Ok(None) => {
                        tokio::time::sleep(Duration::from_millis(250)).await;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "queue claim failed");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}

/// Runs one claimed job from its initial fetch through a terminal Job Store transition.
async fn run_job(ctx: &WorkerContext, job_id: i64, cancel_flag: CancelFlag) {
    let timer = ctx.metrics.record_job_start(job_id);
    let job = match ctx.store.get(job_id).await {
        Ok(job) => job,
        Err(e) => {
            tracing::error!(job_id, error = %e, "failed to reload claimed job");
            return;
        }
    };

    let mut sequencer = LogSequencer::new(job_id);
    ctx.store
        .append_log(sequencer.emit("start", format!("claimed by {}", ctx.worker_handle), Some(0.0), LogLevel::Info))
        .await;

    let deadline = Instant::now() + ctx.job_timeout;
    let outcome = execute(ctx, &job, &cancel_flag, &mut sequencer, deadline).await;

    let job_outcome = match &outcome {
        RunOutcome::Completed => crate::monitoring::JobOutcome::Completed,
        RunOutcome::Failed => crate::monitoring::JobOutcome::Failed,
        RunOutcome::Cancelled => crate::monitoring::JobOutcome::Cancelled,
    };
    ctx.metrics.record_job_completion(timer, job_outcome);

    let stage = match outcome {
        RunOutcome::Completed => "completed",
        RunOutcome::Failed => "failed",
        RunOutcome::Cancelled => "cancelled",
    };
    ctx.store
        .append_log(sequencer.emit(stage, format!("job reached terminal state: {stage}"), Some(1.0), LogLevel::Info))
        .await;
}

/// The terminal state one job run lands in, translated to a `monitoring::JobOutcome` and a log
/// stage label by the caller.
enum RunOutcome {
    Completed,
    Failed,
    Cancelled,
}

/// A strategy or evaluator bug that panics instead of returning an error shouldn't take the
/// whole worker process down on the first occurrence — but a strategy that panics on every
/// candidate is unrecoverable, so the worker gives up and exits 2 (SPEC_FULL §6) rather than
/// spin forever re-claiming the same job.
const MAX_CONSECUTIVE_PANICS: u32 = 3;

static CONSECUTIVE_PANICS: AtomicU32 = AtomicU32::new(0);

async fn execute(
    ctx: &WorkerContext,
    job: &TrainingJob,
    cancel_flag: &CancelFlag,
    sequencer: &mut LogSequencer,
    deadline: Instant,
) -> RunOutcome {
    let strategy = strategies::strategy_for(job.strategy_id);
    let schema = strategy.schema();

    let bars = match ctx
        .bars
        .load_recent(&job.symbol, &job.exchange, &job.timeframe, job.lookback_candles, schema.min_bars)
        .await
    {
        Ok(series) => series,
        Err(e) => {
            let _ = ctx.store.fail(job.id, &e.to_string()).await;
            return RunOutcome::Failed;
        }
    };

    let mut suggester = build_suggester(job, &schema.space);
    let total_iterations = suggester
        .total()
        .map(|t| t.min(job.n_iterations as u64) as i64)
        .unwrap_or(job.n_iterations);

    let (mut channel, rx) = ProgressChannel::new(job.id, total_iterations, ctx.progress_throttle);
    ctx.progress_registry.insert(job.id, rx);

    let friction = MarketFriction::default();
    let mut history: Vec<(ParameterVector, f64)> = Vec::new();
    let mut best: Option<(ParameterVector, f64)> = None;
    let mut iteration: i64 = 0;
    let mut last_heartbeat = Instant::now();

    loop {
        if Instant::now() >= deadline {
            let _ = ctx.store.fail(job.id, "timeout").await;
            channel.finish(JobStatus::Failed);
            return RunOutcome::Failed;
        }
        if cancel_flag.load(Ordering::SeqCst) || ctx.store.is_cancelled(job.id).await.unwrap_or(false) {
            let _ = ctx.store.cancel(job.id).await;
            channel.finish(JobStatus::Cancelled);
            return RunOutcome::Cancelled;
        }
        // Checked before drawing the next candidate so `n_iterations = 0` completes with zero
        // evaluations instead of running a whole grid to exhaustion (SPEC_FULL §8).
        if iteration >= total_iterations {
            break;
        }

        let Some(params) = suggester.next(&history) else {
            break;
        };

        if let Err(e) = strategies::validate_params(&schema, &params) {
            let _ = ctx.store.fail(job.id, &e.to_string()).await;
            channel.finish(JobStatus::Failed);
            return RunOutcome::Failed;
        }

        let start = std::time::Instant::now();
        let eval_result =
            panic::catch_unwind(AssertUnwindSafe(|| evaluator::evaluate(strategy.as_ref(), bars.as_slice(), &params, &friction)));
        let score = match eval_result {
            Ok(Ok((_, metrics))) => {
                CONSECUTIVE_PANICS.store(0, Ordering::SeqCst);
                metrics.objective_score
            }
            Ok(Err(EvalError::InsufficientData | EvalError::NoTrades | EvalError::NonFiniteMetric)) => {
                CONSECUTIVE_PANICS.store(0, Ordering::SeqCst);
                f64::NEG_INFINITY
            }
            Err(_payload) => {
                let panics = CONSECUTIVE_PANICS.fetch_add(1, Ordering::SeqCst) + 1;
                tracing::error!(job_id = job.id, panics, "candidate evaluation panicked");
                if panics >= MAX_CONSECUTIVE_PANICS {
                    let _ = ctx.store.fail(job.id, "worker exiting after repeated panics during job execution").await;
                    channel.finish(JobStatus::Failed);
                    std::process::exit(2);
                }
                f64::NEG_INFINITY
            }
        };
        ctx.metrics.record_candidate_evaluation(&job.strategy_id.to_string(), start.elapsed().as_secs_f64());

        history.push((params.clone(), score));
        iteration += 1;

        let improved = best.as_ref().map(|(_, b)| score > *b).unwrap_or(score.is_finite());
        if improved {
            best = Some((params.clone(), score));
        }

        let snapshot = ProgressSnapshot {
            job_id: job.id,
            status: JobStatus::Running,
            current_iteration: iteration,
            total_iterations,
            progress: if total_iterations > 0 { iteration as f64 / total_iterations as f64 } else { 1.0 },
            current_reward: best.as_ref().map(|(_, s)| *s),
            current_loss: None,
            current_stage: Some("searching".to_string()),
        };

        let should_persist = channel.advance(snapshot.clone(), improved);
        if should_persist {
            let _ = ctx
                .store
                .update_progress(
                    job.id,
                    ProgressUpdate {
                        progress: snapshot.progress,
                        current_iteration: snapshot.current_iteration,
                        total_iterations: snapshot.total_iterations,
                        current_reward: snapshot.current_reward,
                        current_loss: snapshot.current_loss,
                        current_stage: snapshot.current_stage.clone(),
                    },
                )
                .await;
            ctx.store
                .append_log(sequencer.emit(
                    "searching",
                    format!("iteration {iteration}/{total_iterations}, best={:?}", best.as_ref().map(|(_, s)| *s)),
                    Some(snapshot.progress),
                    LogLevel::Info,
                ))
                .await;
        }

        if last_heartbeat.elapsed() >= ctx.heartbeat_interval {
            let _ = ctx.store.heartbeat(job.id, &ctx.worker_handle).await;
            last_heartbeat = Instant::now();
        }

        if total_iterations > 0 && iteration >= total_iterations {
            break;
        }
    }

    // A cancel that lands after the final candidate finished still wins: check once more
    // before declaring success (SPEC_FULL §8's "cancellation during the final candidate"
    // boundary behavior).
    if cancel_flag.load(Ordering::SeqCst) || ctx.store.is_cancelled(job.id).await.unwrap_or(false) {
        let _ = ctx.store.cancel(job.id).await;
        channel.finish(JobStatus::Cancelled);
        return RunOutcome::Cancelled;
    }

    match best {
        Some((params, score)) if score.is_finite() => {
            let rescored =
                panic::catch_unwind(AssertUnwindSafe(|| evaluator::evaluate(strategy.as_ref(), bars.as_slice(), &params, &friction)));
            let metrics = match rescored {
                Ok(Ok((_, metrics))) => {
                    CONSECUTIVE_PANICS.store(0, Ordering::SeqCst);
                    metrics
                }
                Ok(Err(_)) => {
                    let _ = ctx.store.fail(job.id, "best candidate could not be re-scored").await;
                    channel.finish(JobStatus::Failed);
                    return RunOutcome::Failed;
                }
                Err(_payload) => {
                    let panics = CONSECUTIVE_PANICS.fetch_add(1, Ordering::SeqCst) + 1;
                    tracing::error!(job_id = job.id, panics, "best-candidate re-score panicked");
                    let _ = ctx.store.fail(job.id, "worker exiting after repeated panics during job execution").await;
                    channel.finish(JobStatus::Failed);
                    if panics >= MAX_CONSECUTIVE_PANICS {
                        std::process::exit(2);
                    }
                    return RunOutcome::Failed;
                }
            };
            let _ = ctx.store.complete(job.id, JobResult { params, metrics }).await;
            channel.finish(JobStatus::Completed);
            RunOutcome::Completed
        }
        _ => {
            // Every candidate starved (§8 scenario 4): the job still completes, carrying
            // whichever vector was last tried even though its objective is -inf.
            let (params, _) = history.into_iter().last().unwrap_or_else(|| {
                (ParameterVector(Default::default()), f64::NEG_INFINITY)
            });
            let _ = ctx
                .store
                .complete(job.id, JobResult { params, metrics: crate::types::Metrics::starved() })
                .await;
            channel.finish(JobStatus::Completed);
            RunOutcome::Completed
        }
    }
}

fn build_suggester(job: &TrainingJob, space: &crate::types::SearchSpace) -> Box<dyn Suggester + Send> {
    let seed = job.seed.unwrap_or(job.id) as u64;
    match job.optimizer {
        OptimizerKind::Grid => Box::new(GridSearch::new(space.clone(), 5)),
        OptimizerKind::Random => Box::new(RandomSearch::new(space.clone(), seed, job.n_iterations.max(0) as u64)),
        OptimizerKind::Bayesian => Box::new(BayesianSurrogate::new(space.clone(), seed, job.n_iterations.max(0) as u64)),
    }
}

/// Submission-side helper (C10 boundary, SPEC_FULL §4.10): validates against the strategy
/// registry and bar availability, inserts the `pending` row, and returns its id. There is no
/// separate enqueue step; inserting with `status = 'pending'` *is* enqueuing onto `training`.
pub async fn submit(
    store: &dyn JobStore,
    bars: &BarStore,
    spec: NewTrainingJob,
) -> Result<i64, SubmitError> {
    let strategy = strategies::strategy_for(spec.strategy_id);
    let schema = strategy.schema();
    if spec.lookback_candles < schema.min_bars as i64 {
        return Err(SubmitError::LookbackBelowMinimum {
            minimum: schema.min_bars as i64,
        });
    }

    bars.load_recent(&spec.symbol, &spec.exchange, &spec.timeframe, spec.lookback_candles, schema.min_bars)
        .await
        .map_err(SubmitError::DataUnavailable)?;

    let total_iterations = match spec.optimizer {
        OptimizerKind::Grid => GridSearch::new(schema.space.clone(), 5)
            .total()
            .unwrap_or(0)
            .min(spec.n_iterations.max(0) as u64) as i64,
        _ => spec.n_iterations,
    };

    let id = store
        .insert_pending(spec, total_iterations)
        .await
        .map_err(SubmitError::Store)?;
    Ok(id)
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("lookback_candles below strategy minimum of {minimum}")]
    LookbackBelowMinimum { minimum: i64 },
    #[error("data unavailable: {0}")]
    DataUnavailable(crate::error::DataError),
    #[error("store error: {0}")]
    Store(crate::error::StoreError),
}
