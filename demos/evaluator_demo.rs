//! Standalone demo: runs one strategy's signals through the evaluator over a synthetic bar
//! series and prints the resulting metrics. Not part of the library; a quick way to sanity-check
//! a strategy's behavior without standing up Postgres or the HTTP boundary.
//!
//! Run with: `cargo run --example evaluator_demo`.

use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use training_engine::evaluator;
use training_engine::strategies::{self, validate_params};
use training_engine::types::{Bar, MarketFriction, ParameterValue, ParameterVector, StrategyId};

fn synthetic_bars(n: usize) -> Vec<Bar> {
    (0..n as i64)
        .map(|i| {
            let t = i as f64;
            let base = 100.0 + (t * 0.04).sin() * 8.0 + t * 0.01;
            Bar {
                timestamp: i * 60_000,
                open: Decimal::from_f64_retain(base).unwrap(),
                high: Decimal::from_f64_retain(base + 2.5).unwrap(),
                low: Decimal::from_f64_retain(base - 2.5).unwrap(),
                close: Decimal::from_f64_retain(base + 0.4).unwrap(),
                volume: Decimal::from_f64_retain(1500.0 + (t * 0.17).cos().abs() * 1200.0).unwrap(),
                atr: dec!(3.0),
            }
        })
        .collect()
}

fn main() {
    let bars = synthetic_bars(3_000);
    let strategy = strategies::strategy_for(StrategyId::LiquiditySweep);
    let schema = strategy.schema();

    let mut params = std::collections::BTreeMap::new();
    params.insert("swing_lookback_periods".to_string(), ParameterValue::Integer(20));
    params.insert("min_sweep_percentage".to_string(), ParameterValue::Real(0.002));
    params.insert("structure_confirmation_window".to_string(), ParameterValue::Integer(3));
    params.insert("risk_reward_ratio".to_string(), ParameterValue::Real(2.5));
    params.insert("atr_multiplier_sl".to_string(), ParameterValue::Real(1.0));
    params.insert("vol_multiplier".to_string(), ParameterValue::Real(1.2));
    let params = ParameterVector(params);

    validate_params(&schema, &params).expect("demo parameter vector must satisfy the schema");

    match evaluator::evaluate(strategy.as_ref(), &bars, &params, &MarketFriction::default()) {
        Ok((trades, metrics)) => {
            println!("trades: {}", trades.len());
            println!("win_rate: {:.3}", metrics.win_rate);
            println!("profit_factor: {:.3}", metrics.profit_factor);
            println!("sharpe: {:.3}", metrics.sharpe);
            println!("max_drawdown: {:.3}", metrics.max_drawdown);
            println!("net_return: {:.3}", metrics.net_return);
            println!("objective_score: {:.3}", metrics.objective_score);
        }
        Err(e) => println!("candidate could not be scored: {e}"),
    }
}
