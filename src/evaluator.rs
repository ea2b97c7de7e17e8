//! The Backtest Evaluator (C4): turns one strategy's signal sequence into trades and a
//! `Metrics` record for a single parameter vector.
//!
//! The state machine is FLAT/LONG/SHORT per bar. Entry price is the signal bar's close adjusted
//! by `slippage_rate`; stop-loss and take-profit are shifted by the same adjustment so they are
//! computed from the slippage-adjusted entry rather than the raw signal price — the source
//! system got this backwards (see module docs on the strategies), and fixing it is load-bearing
//! for every metric downstream. Exit price is always the SL/TP level itself, never the bar's
//! touched extreme.

use rust_decimal::prelude::*;
use rust_decimal::Decimal;

use crate::error::EvalError;
use crate::indicators::IndicatorKernel;
use crate::strategies::Strategy;
use crate::types::{Bar, ExitReason, MarketFriction, Metrics, ParameterVector, PositionSide, Signal, Trade};

struct OpenPosition {
    side: PositionSide,
    entry_index: usize,
    entry_time: i64,
    entry_price: Decimal,
    stop_loss: Decimal,
    take_profit: Decimal,
    size: Decimal,
}

/// Runs one strategy's signals over `bars` and scores the resulting trade list.
///
/// Returns `Err` rather than a degenerate `Metrics` when the candidate cannot be scored at all
/// (§7): callers convert that into `Metrics::starved()` for the search loop, which must still
/// treat it as strictly worse than any real result.
pub fn evaluate(
    strategy: &dyn Strategy,
    bars: &[Bar],
    params: &ParameterVector,
    friction: &MarketFriction,
) -> Result<(Vec<Trade>, Metrics), EvalError> {
    let schema = strategy.schema();
    if bars.len() < schema.min_bars {
        return Err(EvalError::InsufficientData);
    }

    let mut indicators = IndicatorKernel::new(true);
    let signals = strategy.generate_signals(bars, &mut indicators, params);

    let trades = simulate(bars, &signals, friction);
    if trades.len() < schema.min_trades {
        return Err(EvalError::NoTrades);
    }

    let metrics = score(&trades, friction)?;
    Ok((trades, metrics))
}

fn simulate(bars: &[Bar], signals: &[Signal], friction: &MarketFriction) -> Vec<Trade> {
    let mut trades = Vec::new();
    let mut position: Option<OpenPosition> = None;

    for i in 0..bars.len() {
        if let Some(open) = position.take() {
            let held = i - open.entry_index;
            let forced_end = i == bars.len() - 1;
            if let Some((exit_price, reason)) = check_exit(&open, &bars[i]) {
                trades.push(close_trade(&open, i, bars[i].timestamp, exit_price, reason, friction));
                continue;
            } else if held >= friction.max_holding_periods || forced_end {
                let reason = if forced_end {
                    ExitReason::EndOfData
                } else {
                    ExitReason::MaxHolding
                };
                trades.push(close_trade(&open, i, bars[i].timestamp, bars[i].close, reason, friction));
                continue;
            }
            position = Some(open);
        }

        if position.is_none() {
            if let Signal::Enter {
                side,
                stop_loss,
                take_profit,
                ..
            } = signals[i]
            {
                position = Some(open_position(side, i, &bars[i], stop_loss, take_profit, friction));
            }
        }
    }

    trades
}

fn open_position(
    side: PositionSide,
    index: usize,
    bar: &Bar,
    raw_stop_loss: Decimal,
    raw_take_profit: Decimal,
    friction: &MarketFriction,
) -> OpenPosition {
    let raw_price = bar.close;
    let slippage = raw_price * friction.slippage_rate;
    let entry_price = match side {
        PositionSide::Long => raw_price + slippage,
        PositionSide::Short => raw_price - slippage,
    };
    let delta = entry_price - raw_price;
    OpenPosition {
        side,
        entry_index: index,
        entry_time: bar.timestamp,
        entry_price,
        stop_loss: raw_stop_loss + delta,
        take_profit: raw_take_profit + delta,
        size: friction.position_size,
    }
}

/// Pessimistic first-touch rule: if a bar's range could have hit both SL and TP, the stop-loss
/// is assumed to have been tested first.
fn check_exit(position: &OpenPosition, bar: &Bar) -> Option<(Decimal, ExitReason)> {
    let (hit_sl, hit_tp) = match position.side {
        PositionSide::Long => (bar.low <= position.stop_loss, bar.high >= position.take_profit),
        PositionSide::Short => (bar.high >= position.stop_loss, bar.low <= position.take_profit),
    };
    match (hit_sl, hit_tp) {
        (true, _) => Some((position.stop_loss, ExitReason::StopLoss)),
        (false, true) => Some((position.take_profit, ExitReason::TakeProfit)),
        (false, false) => None,
    }
}

fn close_trade(
    position: &OpenPosition,
    exit_index: usize,
    exit_time: i64,
    exit_price: Decimal,
    reason: ExitReason,
    friction: &MarketFriction,
) -> Trade {
    let direction = match position.side {
        PositionSide::Long => Decimal::ONE,
        PositionSide::Short => -Decimal::ONE,
    };
    let gross = (exit_price - position.entry_price) * direction * position.size / position.entry_price;
    let entry_commission = friction.commission_rate * position.size;
    let exit_commission = friction.commission_rate * position.size;
    let realized_pnl = gross - entry_commission - exit_commission;

    Trade {
        entry_index: position.entry_index,
        entry_time: position.entry_time,
        entry_price: position.entry_price,
        exit_index,
        exit_time,
        exit_price,
        side: position.side,
        size: position.size,
        realized_pnl,
        exit_reason: reason,
    }
}

fn score(trades: &[Trade], friction: &MarketFriction) -> Result<Metrics, EvalError> {
    let total_trades = trades.len() as u32;
    let returns: Vec<f64> = trades
        .iter()
        .map(|t| (t.realized_pnl / t.size).to_f64().unwrap_or(0.0))
        .collect();

    let wins = trades.iter().filter(|t| t.realized_pnl > Decimal::ZERO).count();
    let win_rate = wins as f64 / total_trades as f64;

    let gross_profit: Decimal = trades.iter().map(|t| t.realized_pnl).filter(|p| *p > Decimal::ZERO).sum();
    let gross_loss: Decimal = trades
        .iter()
        .map(|t| t.realized_pnl)
        .filter(|p| *p < Decimal::ZERO)
        .sum::<Decimal>()
        .abs();
    let profit_factor = if gross_loss.is_zero() {
        if gross_profit.is_zero() {
            0.0
        } else {
            f64::INFINITY
        }
    } else {
        (gross_profit / gross_loss).to_f64().unwrap_or(0.0)
    };

    let mean_return = returns.iter().sum::<f64>() / total_trades as f64;
    let variance =
        returns.iter().map(|r| (r - mean_return).powi(2)).sum::<f64>() / total_trades as f64;
    let stddev = variance.sqrt();

    let mean_holding = trades
        .iter()
        .map(|t| (t.exit_index - t.entry_index) as f64)
        .sum::<f64>()
        / total_trades as f64;
    let annualization = if mean_holding > 0.0 {
        (friction.bars_per_year / mean_holding).sqrt()
    } else {
        0.0
    };
    let sharpe = if stddev > 0.0 {
        (mean_return / stddev) * annualization
    } else {
        0.0
    };

    let mut cumulative = 0.0;
    let mut peak = 0.0;
    let mut max_drawdown = 0.0;
    for r in &returns {
        cumulative += r;
        if cumulative > peak {
            peak = cumulative;
        }
        let drawdown = peak - cumulative;
        if drawdown > max_drawdown {
            max_drawdown = drawdown;
        }
    }

    let net_return = returns.iter().sum::<f64>();
    let trade_frequency_factor = (total_trades as f64 / friction.target_trades as f64).min(1.0);
    let objective_score = sharpe * (1.0 - max_drawdown.min(1.0)) * trade_frequency_factor;

    if !objective_score.is_finite() {
        return Err(EvalError::NonFiniteMetric);
    }

    Ok(Metrics {
        total_trades,
        win_rate,
        profit_factor,
        sharpe,
        max_drawdown,
        net_return,
        objective_score,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::{self, validate_params};
    use crate::types::ParameterValue;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    fn bar(o: f64, h: f64, l: f64, c: f64, ts: i64) -> Bar {
        Bar {
            timestamp: ts,
            open: Decimal::from_f64(o).unwrap(),
            high: Decimal::from_f64(h).unwrap(),
            low: Decimal::from_f64(l).unwrap(),
            close: Decimal::from_f64(c).unwrap(),
            volume: dec!(1000),
            atr: dec!(1.0),
        }
    }

    #[test]
    fn pessimistic_tie_break_prefers_stop_loss() {
        let friction = MarketFriction::default();
        let position = OpenPosition {
            side: PositionSide::Long,
            entry_index: 0,
            entry_time: 0,
            entry_price: dec!(100),
            stop_loss: dec!(95),
            take_profit: dec!(110),
            size: friction.position_size,
        };
        let wide_bar = bar(100.0, 111.0, 94.0, 100.0, 0);
        let (price, reason) = check_exit(&position, &wide_bar).unwrap();
        assert_eq!(price, dec!(95));
        assert_eq!(reason, ExitReason::StopLoss);
    }

    #[test]
    fn insufficient_data_is_reported_before_signal_generation() {
        let strategy = strategies::strategy_for(crate::types::StrategyId::LiquiditySweep);
        let bars = vec![bar(100.0, 101.0, 99.0, 100.0, 0)];
        let mut params = BTreeMap::new();
        params.insert("swing_lookback_periods".to_string(), ParameterValue::Integer(20));
        params.insert("min_sweep_percentage".to_string(), ParameterValue::Real(0.001));
        params.insert("structure_confirmation_window".to_string(), ParameterValue::Integer(3));
        params.insert("risk_reward_ratio".to_string(), ParameterValue::Real(2.5));
        params.insert("atr_multiplier_sl".to_string(), ParameterValue::Real(1.0));
        params.insert("vol_multiplier".to_string(), ParameterValue::Real(1.5));
        let params = ParameterVector(params);
        assert!(validate_params(&strategy.schema(), &params).is_ok());
        let result = evaluate(strategy.as_ref(), &bars, &params, &MarketFriction::default());
        assert_eq!(result.unwrap_err(), EvalError::InsufficientData);
    }
}
