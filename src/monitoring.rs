//! Performance monitoring and metrics collection.
//!
//! Prometheus metrics plus the `tracing` subscriber setup for the worker process.

use anyhow::Result;
use prometheus::{
    Counter, Gauge, GaugeVec, Histogram, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument};

/// Process-wide metrics collector, shared across the queue, evaluator, and API.
pub struct MetricsCollector {
    pub jobs_submitted: Counter,
    pub jobs_completed: Counter,
    pub jobs_failed: Counter,
    pub jobs_cancelled: Counter,
    pub candidates_evaluated: Counter,
    pub determinism_violations: Counter,

    pub active_workers: Gauge,
    pub queue_depth: Gauge,
    pub orphaned_jobs_reaped: Counter,

    pub job_duration: Histogram,
    pub candidate_evaluation_time: Histogram,
    pub indicator_calculation_time: HistogramVec,

    pub candidates_per_second: GaugeVec,

    registry: Registry,
}

impl MetricsCollector {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let jobs_submitted = Counter::new("training_jobs_submitted_total", "Total jobs submitted")?;
        let jobs_completed = Counter::new("training_jobs_completed_total", "Total jobs completed")?;
        let jobs_failed = Counter::new("training_jobs_failed_total", "Total jobs failed")?;
        let jobs_cancelled = Counter::new("training_jobs_cancelled_total", "Total jobs cancelled")?;
        let candidates_evaluated = Counter::new(
            "training_candidates_evaluated_total",
            "Total parameter candidates evaluated across all jobs",
        )?;
        let determinism_violations = Counter::new(
            "training_determinism_violations_total",
            "Total number of determinism violations detected",
        )?;

        let active_workers = Gauge::new("training_active_workers", "Number of workers currently running a job")?;
        let queue_depth = Gauge::new("training_queue_depth", "Number of pending jobs waiting to be claimed")?;
        let orphaned_jobs_reaped = Counter::new(
            "training_orphaned_jobs_reaped_total",
            "Total jobs transitioned to failed by the orphan reaper",
        )?;

        let job_duration = Histogram::with_opts(
            HistogramOpts::new("training_job_duration_seconds", "Duration of a full job run")
                .buckets(vec![1.0, 5.0, 30.0, 60.0, 300.0, 900.0, 3600.0]),
        )?;

        let candidate_evaluation_time = Histogram::with_opts(
            HistogramOpts::new(
                "training_candidate_evaluation_seconds",
                "Time to evaluate a single parameter vector",
            )
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5]),
        )?;

        let indicator_calculation_time = HistogramVec::new(
            HistogramOpts::new(
                "training_indicator_calculation_seconds",
                "Time taken to calculate one indicator",
            )
            .buckets(vec![0.00001, 0.0001, 0.001, 0.01, 0.1]),
            &["indicator_name"],
        )?;

        let candidates_per_second = GaugeVec::new(
            Opts::new("training_candidates_per_second", "Candidates evaluated per second"),
            &["strategy_id"],
        )?;

        registry.register(Box::new(jobs_submitted.clone()))?;
        registry.register(Box::new(jobs_completed.clone()))?;
        registry.register(Box::new(jobs_failed.clone()))?;
        registry.register(Box::new(jobs_cancelled.clone()))?;
        registry.register(Box::new(candidates_evaluated.clone()))?;
        registry.register(Box::new(determinism_violations.clone()))?;
        registry.register(Box::new(active_workers.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(orphaned_jobs_reaped.clone()))?;
        registry.register(Box::new(job_duration.clone()))?;
        registry.register(Box::new(candidate_evaluation_time.clone()))?;
        registry.register(Box::new(indicator_calculation_time.clone()))?;
        registry.register(Box::new(candidates_per_second.clone()))?;

        Ok(Self {
            jobs_submitted,
            jobs_completed,
            jobs_failed,
            jobs_cancelled,
            candidates_evaluated,
            determinism_violations,
            active_workers,
            queue_depth,
            orphaned_jobs_reaped,
            job_duration,
            candidate_evaluation_time,
            indicator_calculation_time,
            candidates_per_second,
            registry,
        })
    }

    #[instrument(skip(self))]
    pub fn record_job_start(&self, job_id: i64) -> JobTimer<'_> {
        self.active_workers.inc();
        self.jobs_submitted.inc();
        JobTimer {
            start_time: Instant::now(),
            job_id,
            metrics: self,
        }
    }

    pub fn record_job_completion(&self, timer: JobTimer<'_>, outcome: JobOutcome) {
        let duration = timer.start_time.elapsed();
        self.job_duration.observe(duration.as_secs_f64());
        self.active_workers.dec();

        match outcome {
            JobOutcome::Completed => self.jobs_completed.inc(),
            JobOutcome::Failed => self.jobs_failed.inc(),
            JobOutcome::Cancelled => self.jobs_cancelled.inc(),
        }

        info!(job_id = timer.job_id, ?duration, ?outcome, "job finished");
    }

    pub fn record_candidate_evaluation(&self, strategy_id: &str, duration_secs: f64) {
        self.candidate_evaluation_time.observe(duration_secs);
        self.candidates_evaluated.inc();
        if duration_secs > 0.0 {
            self.candidates_per_second
                .with_label_values(&[strategy_id])
                .set(1.0 / duration_secs);
        }
    }

    pub fn record_indicator_calculation<F, R>(&self, indicator_name: &str, calculation: F) -> R
    where
        F: FnOnce() -> R,
    {
        let start_time = Instant::now();
        let result = calculation();
        self.indicator_calculation_time
            .with_label_values(&[indicator_name])
            .observe(start_time.elapsed().as_secs_f64());
        result
    }

    pub fn set_queue_depth(&self, depth: i64) {
        self.queue_depth.set(depth as f64);
    }

    pub fn record_orphan_reaped(&self) {
        self.orphaned_jobs_reaped.inc();
    }

    pub fn record_determinism_violation(&self, job_id: i64) {
        self.determinism_violations.inc();
        error!(job_id, "determinism violation detected");
    }

    /// Renders the registry in Prometheus text exposition format for the `/metrics` endpoint.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        Ok(encoder.encode_to_string(&metric_families)?)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum JobOutcome {
    Completed,
    Failed,
    Cancelled,
}

pub struct JobTimer<'a> {
    start_time: Instant,
    job_id: i64,
    metrics: &'a MetricsCollector,
}

/// Installs the global `tracing` subscriber, honoring `RUST_LOG` with a sensible default.
pub fn setup_tracing() -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "training_engine=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Convenience wrapper for instrumenting an async operation with start/stop logging.
pub struct PerformanceMonitor {
    metrics: Arc<MetricsCollector>,
}

impl PerformanceMonitor {
    pub fn new(metrics: Arc<MetricsCollector>) -> Self {
        Self { metrics }
    }

    pub async fn monitor_execution<F, R>(&self, operation_name: &str, operation: F) -> Result<R>
    where
        F: std::future::Future<Output = Result<R>>,
    {
        let _ = &self.metrics;
        let start_time = Instant::now();
        let result = operation.await;
        let duration = start_time.elapsed();

        match &result {
            Ok(_) => info!(operation_name, ?duration, "operation completed"),
            Err(e) => error!(operation_name, ?duration, error = %e, "operation failed"),
        }

        result
    }
}
