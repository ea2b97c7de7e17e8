//! End-to-end exercise of the evaluator + search driver pairing, without the durable layers
//! (those require Postgres; see `src/job_store.rs`/`src/queue.rs` for the wiring that adds
//! persistence around exactly this loop).

use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use training_engine::error::EvalError;
use training_engine::evaluator;
use training_engine::search::{GridSearch, Suggester};
use training_engine::strategies::{self, validate_params};
use training_engine::types::{MarketFriction, StrategyId};

fn trending_bars(n: usize) -> Vec<training_engine::types::Bar> {
    (0..n as i64)
        .map(|i| {
            let t = i as f64;
            let base = 100.0 + (t * 0.05).sin() * 6.0 + t * 0.02;
            training_engine::types::Bar {
                timestamp: i * 60_000,
                open: Decimal::from_f64_retain(base).unwrap(),
                high: Decimal::from_f64_retain(base + 2.0).unwrap(),
                low: Decimal::from_f64_retain(base - 2.0).unwrap(),
                close: Decimal::from_f64_retain(base + 0.3).unwrap(),
                volume: Decimal::from_f64_retain(1200.0 + (t * 0.21).cos().abs() * 900.0).unwrap(),
                atr: dec!(2.5),
            }
        })
        .collect()
}

#[test]
fn grid_search_over_liquidity_sweep_completes_within_grid_size() {
    let bars = trending_bars(2_000);
    let strategy = strategies::strategy_for(StrategyId::LiquiditySweep);
    let schema = strategy.schema();

    let mut small_space = schema.space.clone();
    small_space.params.retain(|p| {
        matches!(p.name.as_str(), "swing_lookback_periods" | "structure_confirmation_window" | "risk_reward_ratio")
    });
    assert_eq!(small_space.params.len(), 3);

    let mut search = GridSearch::new(small_space, 3);
    assert_eq!(search.total(), Some(27));

    let friction = MarketFriction::default();
    let mut history = Vec::new();
    let mut evaluated = 0;
    while let Some(partial) = search.next(&history) {
        let mut full = std::collections::BTreeMap::new();
        full.insert(
            "swing_lookback_periods".to_string(),
            partial.get("swing_lookback_periods").unwrap(),
        );
        full.insert(
            "structure_confirmation_window".to_string(),
            partial.get("structure_confirmation_window").unwrap(),
        );
        full.insert("risk_reward_ratio".to_string(), partial.get("risk_reward_ratio").unwrap());
        full.insert(
            "min_sweep_percentage".to_string(),
            training_engine::types::ParameterValue::Real(0.002),
        );
        full.insert("atr_multiplier_sl".to_string(), training_engine::types::ParameterValue::Real(1.0));
        full.insert("vol_multiplier".to_string(), training_engine::types::ParameterValue::Real(1.0));
        let params = training_engine::types::ParameterVector(full);
        assert!(validate_params(&schema, &params).is_ok());

        let score = match evaluator::evaluate(strategy.as_ref(), &bars, &params, &friction) {
            Ok((_, metrics)) => metrics.objective_score,
            Err(EvalError::InsufficientData | EvalError::NoTrades | EvalError::NonFiniteMetric) => {
                f64::NEG_INFINITY
            }
        };
        history.push((params, score));
        evaluated += 1;
    }

    assert_eq!(evaluated, 27);
}

#[test]
fn starved_candidate_scores_negative_infinity_and_is_not_an_error_path() {
    // A strategy that never fires (flat, low-volatility market) must still be *scorable* by
    // the caller: InsufficientData/NoTrades both fall back to -inf rather than propagating.
    let bars: Vec<_> = (0..200i64)
        .map(|i| training_engine::types::Bar {
            timestamp: i * 60_000,
            open: dec!(100),
            high: dec!(100.1),
            low: dec!(99.9),
            close: dec!(100),
            volume: dec!(1000),
            atr: dec!(0.1),
        })
        .collect();

    let strategy = strategies::strategy_for(StrategyId::FailedBreakdown);
    let schema = strategy.schema();
    let mut params = std::collections::BTreeMap::new();
    for spec in &schema.space.params {
        let v = match &spec.domain {
            training_engine::types::ParamDomain::IntRange { lo, .. } => {
                training_engine::types::ParameterValue::Integer(*lo)
            }
            training_engine::types::ParamDomain::RealInterval { lo, .. } => {
                training_engine::types::ParameterValue::Real(*lo)
            }
            training_engine::types::ParamDomain::DiscreteReal(values) => {
                training_engine::types::ParameterValue::Real(values[0])
            }
        };
        params.insert(spec.name.clone(), v);
    }
    let params = training_engine::types::ParameterVector(params);
    assert!(validate_params(&schema, &params).is_ok());

    let friction = MarketFriction::default();
    let result = evaluator::evaluate(strategy.as_ref(), &bars, &params, &friction);
    assert!(result.is_err());
}
