//! Strategy-parameter optimization and backtesting service.
//!
//! Given a strategy family, a symbol/exchange/timeframe tuple, a history of bars, and a bounded
//! parameter search space, this crate finds parameter vectors that maximize a performance
//! objective by simulating trades deterministically against historical data. Jobs are durable
//! rows in Postgres, claimed FIFO-by-submission by background workers, and streamed back as
//! progress events over SSE.
//!
//! Module map (component numbers match the design's component table):
//! - [`bar_store`] — C1, loads and range-slices bars.
//! - [`indicators`] — C2, pure technical-indicator primitives.
//! - [`strategies`] — C3, the closed signal-generator registry.
//! - [`evaluator`] — C4, the per-bar trade-simulation state machine and metrics.
//! - [`search`] — C5, grid/random/Bayesian parameter suggesters.
//! - [`progress`] — C6, throttled job-row mutation, logging, and SSE fan-out.
//! - [`job_store`] — C7, durable job and log persistence.
//! - [`queue`] — C8, FIFO claim and the worker loop.
//! - [`reaper`] — C9, orphaned-job reconciliation.
//! - [`api`] — C10, the HTTP/SSE submission boundary.

pub mod api;
pub mod bar_store;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod indicators;
pub mod job_store;
pub mod monitoring;
pub mod precision;
pub mod progress;
pub mod queue;
pub mod reaper;
pub mod search;
pub mod strategies;
pub mod types;
