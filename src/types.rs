//! Core data model: bars, strategy parameters, jobs, trades and metrics.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One OHLCV observation plus its pre-computed ATR.
///
/// Bars are immutable; `BarSeries` is the unit the rest of the engine operates on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Bar {
    pub timestamp: i64, // unix milliseconds
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub atr: Decimal,
}

/// An ascending, contiguous-in-index sequence of bars for one (symbol, exchange, timeframe).
///
/// `bars[i].timestamp < bars[i+1].timestamp` holds for every adjacent pair; the constructor
/// is the only place that invariant needs checking.
#[derive(Debug, Clone)]
pub struct BarSeries {
    bars: Vec<Bar>,
}

impl BarSeries {
    /// Builds a series, rejecting non-ascending or duplicate timestamps.
    pub fn new(bars: Vec<Bar>) -> Result<Self, BarSeriesError> {
        for pair in bars.windows(2) {
            if pair[0].timestamp >= pair[1].timestamp {
                return Err(BarSeriesError::NonMonotonicTimestamps {
                    at: pair[1].timestamp,
                });
            }
        }
        Ok(Self { bars })
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn as_slice(&self) -> &[Bar] {
        &self.bars
    }

    /// A read-only view truncated to `0..=i`, for no-look-ahead checks and tests.
    pub fn prefix(&self, i: usize) -> &[Bar] {
        &self.bars[..=i]
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BarSeriesError {
    #[error("bar timestamps are not strictly ascending at {at}")]
    NonMonotonicTimestamps { at: i64 },
}

/// The closed set of signal-generator tags. Extensible only by adding a variant plus a
/// `Strategy` impl in `strategies/`; there is no runtime plugin registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrategyId {
    LiquiditySweep,
    CapitulationReversal,
    FailedBreakdown,
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StrategyId::LiquiditySweep => "LIQUIDITY_SWEEP",
            StrategyId::CapitulationReversal => "CAPITULATION_REVERSAL",
            StrategyId::FailedBreakdown => "FAILED_BREAKDOWN",
        };
        f.write_str(s)
    }
}

/// A scalar value bound to a strategy parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Integer(i64),
    Real(f64),
}

impl ParameterValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            ParameterValue::Integer(v) => *v as f64,
            ParameterValue::Real(v) => *v,
        }
    }

    pub fn as_usize(&self) -> usize {
        match self {
            ParameterValue::Integer(v) => (*v).max(0) as usize,
            ParameterValue::Real(v) => v.max(0.0) as usize,
        }
    }
}

/// A validated mapping from parameter name to value.
///
/// Ordered by name (`BTreeMap`) so serialization, hashing, and the grid-search lexicographic
/// order all agree without a separate sort step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterVector(pub BTreeMap<String, ParameterValue>);

impl ParameterVector {
    pub fn get(&self, name: &str) -> Option<ParameterValue> {
        self.0.get(name).copied()
    }

    pub fn get_f64(&self, name: &str) -> f64 {
        self.get(name).map(|v| v.as_f64()).unwrap_or_default()
    }

    pub fn get_usize(&self, name: &str) -> usize {
        self.get(name).map(|v| v.as_usize()).unwrap_or_default()
    }
}

/// One parameter's declared domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ParamDomain {
    IntRange { lo: i64, hi: i64 },
    RealInterval { lo: f64, hi: f64 },
    DiscreteReal(Vec<f64>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub domain: ParamDomain,
}

/// The bounded region a suggester draws candidates from, declared by the strategy.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SearchSpace {
    pub params: Vec<ParamSpec>,
}

/// The parameter schema: names, bounds, and the minimum bar count the strategy needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSchema {
    pub space: SearchSpace,
    pub min_bars: usize,
    pub min_trades: usize,
}

/// FLAT/LONG/SHORT direction of an open or closed position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

/// A per-bar decision emitted by a strategy. `Hold` carries no price levels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Signal {
    Hold,
    Enter {
        side: PositionSide,
        stop_loss: Decimal,
        take_profit: Decimal,
        auxiliary_score: f64,
    },
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    MaxHolding,
    EndOfData,
}

/// One closed simulated round-trip. Held in memory only; aggregate `Metrics` are what persists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub entry_index: usize,
    pub entry_time: i64,
    pub entry_price: Decimal,
    pub exit_index: usize,
    pub exit_time: i64,
    pub exit_price: Decimal,
    pub side: PositionSide,
    pub size: Decimal,
    pub realized_pnl: Decimal,
    pub exit_reason: ExitReason,
}

/// The fixed metrics record the evaluator produces for one parameter vector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Metrics {
    pub total_trades: u32,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub sharpe: f64,
    pub max_drawdown: f64,
    pub net_return: f64,
    pub objective_score: f64,
}

impl Metrics {
    /// The "starved" result used whenever the evaluator cannot score a candidate at all.
    pub fn starved() -> Self {
        Self {
            total_trades: 0,
            win_rate: 0.0,
            profit_factor: 0.0,
            sharpe: 0.0,
            max_drawdown: 0.0,
            net_return: 0.0,
            objective_score: f64::NEG_INFINITY,
        }
    }
}

/// Fixed market-friction constants the evaluator applies uniformly.
#[derive(Debug, Clone, Copy)]
pub struct MarketFriction {
    pub slippage_rate: Decimal,
    pub commission_rate: Decimal,
    pub position_size: Decimal,
    pub max_holding_periods: usize,
    pub bars_per_year: f64,
    /// Trade count that saturates the `objective_score`'s trade-frequency factor to 1.0.
    pub target_trades: u32,
}

impl Default for MarketFriction {
    fn default() -> Self {
        Self {
            slippage_rate: Decimal::new(1, 4),   // 0.0001
            commission_rate: Decimal::new(4, 4), // 0.0004 (taker-like)
            position_size: Decimal::new(1000, 0),
            max_holding_periods: 200,
            bars_per_year: 365.0 * 24.0,
            target_trades: 30,
        }
    }
}

/// `training_jobs.status`: a finite-state machine whose terminal states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// `training_jobs.optimizer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    Grid,
    Random,
    Bayesian,
}

/// A finished evaluation: the winning parameter vector plus its metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub params: ParameterVector,
    pub metrics: Metrics,
}

/// The durable job record (`training_jobs`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingJob {
    pub id: i64,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Last write to this row: claim, progress update, heartbeat, or terminal transition. The
    /// reaper (C9) compares this against `stale_threshold`, not `started_at`, since a long-running
    /// but actively heartbeating job must not be mistaken for an orphan.
    pub updated_at: DateTime<Utc>,
    pub status: JobStatus,
    pub strategy_id: StrategyId,
    pub symbol: String,
    pub exchange: String,
    pub timeframe: String,
    pub regime: String,
    pub optimizer: OptimizerKind,
    pub lookback_candles: i64,
    pub n_iterations: i64,
    pub seed: Option<i64>,
    pub worker_handle: Option<String>,
    pub progress: f64,
    pub current_iteration: i64,
    pub total_iterations: i64,
    pub current_reward: Option<f64>,
    pub current_loss: Option<f64>,
    pub current_stage: Option<String>,
    pub error_message: Option<String>,
    pub result: Option<serde_json::Value>,
}

/// A new job as accepted at the submission boundary, before a row exists.
#[derive(Debug, Clone, Deserialize)]
pub struct NewTrainingJob {
    pub strategy_id: StrategyId,
    pub symbol: String,
    pub exchange: String,
    pub timeframe: String,
    pub regime: String,
    pub optimizer: OptimizerKind,
    pub lookback_candles: i64,
    pub n_iterations: i64,
    pub seed: Option<i64>,
}

/// Log severity for `training_logs.level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// One append-only row in `training_logs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingLog {
    pub log_id: i64,
    pub job_id: i64,
    pub event_time: DateTime<Utc>,
    pub sequence: i64,
    pub stage: String,
    pub message: String,
    pub progress: Option<f64>,
    pub level: LogLevel,
}
