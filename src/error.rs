//! Typed error taxonomy at each component boundary (see SPEC_FULL.md §7).
//!
//! Components that callers need to match on (`StoreError`, `QueueError`, `EvalError`,
//! `StrategyError`) use `thiserror`. The worker loop and the CLI entrypoint, which only ever log
//! an error and move on, use `anyhow::Result` — the same split the rest of this crate uses.

use thiserror::Error;

/// Errors from the Job Store (C7).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job {0} is not pending; already claimed or terminal")]
    AlreadyClaimed(i64),
    #[error("job {0} not found")]
    NotFound(i64),
    #[error("store backend error: {0}")]
    Backend(#[from] sqlx::Error),
}

/// Errors from the Queue & Dispatcher (C8).
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue backend error: {0}")]
    Backend(#[from] sqlx::Error),
    #[error("job store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors from Bar Store loading (C1).
#[derive(Debug, Error)]
pub enum DataError {
    #[error("data unavailable: need at least {required} bars, have {available}")]
    DataUnavailable { required: usize, available: usize },
    #[error("data backend error: {0}")]
    Backend(#[from] sqlx::Error),
}

/// Evaluation errors (C4). These never fail the job; they are converted to an objective of
/// negative infinity and the optimizer continues (SPEC_FULL §4.4/§7).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EvalError {
    #[error("insufficient data for evaluation")]
    InsufficientData,
    #[error("no trades were produced")]
    NoTrades,
    #[error("a metric was non-finite")]
    NonFiniteMetric,
}

/// Strategy contract violations (C3). Unlike `EvalError`, these abort the job — they indicate
/// the strategy's declared schema/search-space was violated, not a property of the market data.
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("unknown strategy id: {0}")]
    UnknownStrategy(String),
    #[error("parameter vector missing required key: {0}")]
    MissingParameter(String),
    #[error("parameter vector has unknown key: {0}")]
    UnknownParameter(String),
    #[error("parameter {name} value {value} outside declared domain")]
    OutOfDomain { name: String, value: f64 },
}
