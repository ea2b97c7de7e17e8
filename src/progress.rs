//! The Progress Channel (C6): fans one job's progress out to the durable row, the append-only
//! log, and any live SSE subscribers, while coalescing bursts so a fast-evaluating strategy
//! doesn't flood the store with a write per candidate.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

use crate::types::{JobStatus, LogLevel};

/// The latest state of a running job, as broadcast to SSE subscribers. Carries enough to render
/// a progress bar without a second query.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProgressSnapshot {
    pub job_id: i64,
    pub status: JobStatus,
    pub current_iteration: i64,
    pub total_iterations: i64,
    pub progress: f64,
    pub current_reward: Option<f64>,
    pub current_loss: Option<f64>,
    pub current_stage: Option<String>,
}

impl ProgressSnapshot {
    pub fn starting(job_id: i64, total_iterations: i64) -> Self {
        Self {
            job_id,
            status: JobStatus::Running,
            current_iteration: 0,
            total_iterations,
            progress: 0.0,
            current_reward: None,
            current_loss: None,
            current_stage: None,
        }
    }
}

/// One throttled publish/persist channel, held for the lifetime of a running job.
///
/// `watch` is the right primitive here: it retains only the most recently sent value, which is
/// exactly the "coalesce to latest" backpressure policy the SSE endpoint needs under bursty
/// candidate evaluation.
pub struct ProgressChannel {
    tx: watch::Sender<ProgressSnapshot>,
    min_interval: Duration,
    last_persisted: Instant,
    last_persisted_iteration: i64,
}

impl ProgressChannel {
    pub fn new(job_id: i64, total_iterations: i64, min_interval: Duration) -> (Self, watch::Receiver<ProgressSnapshot>) {
        let (tx, rx) = watch::channel(ProgressSnapshot::starting(job_id, total_iterations));
        (
            Self {
                tx,
                min_interval,
                last_persisted: Instant::now() - min_interval,
                last_persisted_iteration: -1,
            },
            rx,
        )
    }

    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.tx.subscribe()
    }

    /// Always publishes to live SSE subscribers; returns `true` when the throttle window has
    /// also elapsed, meaning the caller should additionally write through to the Job Store.
    /// `force` bypasses the throttle for terminal transitions and best-score improvements
    /// (§4.6), both of which must never be dropped by the throttle window.
    pub fn advance(&mut self, snapshot: ProgressSnapshot, force: bool) -> bool {
        let should_persist = force
            || self.last_persisted.elapsed() >= self.min_interval
            || snapshot.current_iteration >= snapshot.total_iterations
            || snapshot.current_iteration == self.last_persisted_iteration + 1 && self.last_persisted_iteration < 0;
        let iteration = snapshot.current_iteration;
        let _ = self.tx.send(snapshot);
        if should_persist {
            self.last_persisted = Instant::now();
            self.last_persisted_iteration = iteration;
        }
        should_persist
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.tx.borrow().clone()
    }

    /// Publishes a final snapshot carrying the terminal `status`, unconditionally bypassing the
    /// throttle. Must be called on every `completed`/`failed`/`cancelled` exit before the
    /// channel is dropped: the SSE endpoint's terminal `complete`/`error` event (§4.6 role 3,
    /// §6, §8 scenario 5) is derived from the last value a `watch::Receiver` observed, and a
    /// dropped sender with no terminal send just closes the stream with nothing to show for it.
    pub fn finish(&mut self, status: JobStatus) {
        let mut snapshot = self.tx.borrow().clone();
        snapshot.status = status;
        let _ = self.tx.send(snapshot);
    }
}

/// One append-only row destined for `training_logs`, produced alongside progress updates.
pub struct LogEvent {
    pub job_id: i64,
    pub sequence: i64,
    pub stage: String,
    pub message: String,
    pub progress: Option<f64>,
    pub level: LogLevel,
}

/// Assigns monotonically increasing `sequence` numbers per job so log rows sort deterministically
/// even if two writes land in the same millisecond.
pub struct LogSequencer {
    job_id: i64,
    next_sequence: i64,
}

impl LogSequencer {
    pub fn new(job_id: i64) -> Self {
        Self {
            job_id,
            next_sequence: 0,
        }
    }

    pub fn emit(&mut self, stage: &str, message: impl Into<String>, progress: Option<f64>, level: LogLevel) -> LogEvent {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        LogEvent {
            job_id: self.job_id,
            sequence,
            stage: stage.to_string(),
            message: message.into(),
            progress,
            level,
        }
    }
}

/// Registry of live `watch::Receiver` handles the SSE endpoint subscribes from, keyed by job id.
pub type ProgressRegistry = Arc<dashmap::DashMap<i64, watch::Receiver<ProgressSnapshot>>>;

pub fn new_registry() -> ProgressRegistry {
    Arc::new(dashmap::DashMap::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttle_always_persists_the_final_iteration() {
        let (mut channel, _rx) = ProgressChannel::new(1, 10, Duration::from_secs(3600));
        let mut snapshot = ProgressSnapshot::starting(1, 10);
        snapshot.current_iteration = 10;
        snapshot.progress = 1.0;
        assert!(channel.advance(snapshot, false));
    }

    #[test]
    fn force_bypasses_the_throttle_window() {
        let (mut channel, _rx) = ProgressChannel::new(1, 10, Duration::from_secs(3600));
        let mut snapshot = ProgressSnapshot::starting(1, 10);
        snapshot.current_iteration = 1;
        assert!(!channel.advance(snapshot.clone(), false));
        snapshot.current_iteration = 2;
        assert!(channel.advance(snapshot, true));
    }

    #[test]
    fn log_sequencer_increments_monotonically() {
        let mut seq = LogSequencer::new(1);
        let a = seq.emit("search", "starting", Some(0.0), LogLevel::Info);
        let b = seq.emit("search", "iteration 1", Some(0.1), LogLevel::Info);
        assert_eq!(a.sequence, 0);
        assert_eq!(b.sequence, 1);
    }
}
