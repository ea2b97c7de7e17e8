//! Quantified invariants from SPEC_FULL §8: no look-ahead, suggester determinism, and
//! indicator bit-identical repeatability.

use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use training_engine::indicators::IndicatorKernel;
use training_engine::precision;
use training_engine::search::{GridSearch, RandomSearch, Suggester};
use training_engine::strategies::{self, validate_params};
use training_engine::types::{
    Bar, ParamDomain, ParamSpec, ParameterValue, ParameterVector, SearchSpace, StrategyId,
};

fn wavy_bars(n: usize) -> Vec<Bar> {
    (0..n as i64)
        .map(|i| {
            let t = i as f64;
            let base = 100.0 + (t * 0.07).sin() * 4.0 + (t * 0.013).cos() * 2.0;
            Bar {
                timestamp: i * 60_000,
                open: Decimal::from_f64_retain(base).unwrap(),
                high: Decimal::from_f64_retain(base + 1.5).unwrap(),
                low: Decimal::from_f64_retain(base - 1.5).unwrap(),
                close: Decimal::from_f64_retain(base + 0.2).unwrap(),
                volume: Decimal::from_f64_retain(1000.0 + (t * 0.3).sin() * 400.0).unwrap(),
                atr: dec!(2.0),
            }
        })
        .collect()
}

fn default_params(id: StrategyId) -> ParameterVector {
    let schema = strategies::strategy_for(id).schema();
    let mut map = std::collections::BTreeMap::new();
    for spec in &schema.space.params {
        let value = match &spec.domain {
            ParamDomain::IntRange { lo, hi } => ParameterValue::Integer((lo + hi) / 2),
            ParamDomain::RealInterval { lo, hi } => ParameterValue::Real((lo + hi) / 2.0),
            ParamDomain::DiscreteReal(values) => ParameterValue::Real(values[values.len() / 2]),
        };
        map.insert(spec.name.clone(), value);
    }
    ParameterVector(map)
}

#[test]
fn no_look_ahead_for_every_strategy() {
    let bars = wavy_bars(300);
    for id in [StrategyId::LiquiditySweep, StrategyId::CapitulationReversal, StrategyId::FailedBreakdown] {
        let strategy = strategies::strategy_for(id);
        let params = default_params(id);
        assert!(validate_params(&strategy.schema(), &params).is_ok());

        let mut full_kernel = IndicatorKernel::new(true);
        let full_signals = strategy.generate_signals(&bars, &mut full_kernel, &params);

        // Check several cut points: the decision at index i must not change whether the
        // strategy sees bars[..=i] or the entire series.
        for &i in &[100usize, 150, 200, 299] {
            let mut prefix_kernel = IndicatorKernel::new(true);
            let prefix_signals = strategy.generate_signals(&bars[..=i], &mut prefix_kernel, &params);
            assert_eq!(
                format!("{:?}", prefix_signals[i]),
                format!("{:?}", full_signals[i]),
                "strategy {:?} looked ahead past bar {i}",
                id
            );
        }
    }
}

#[test]
fn grid_search_is_byte_identical_across_runs() {
    let space = SearchSpace {
        params: vec![
            ParamSpec { name: "a".into(), domain: ParamDomain::IntRange { lo: 0, hi: 2 } },
            ParamSpec { name: "b".into(), domain: ParamDomain::DiscreteReal(vec![1.0, 2.0, 3.0]) },
            ParamSpec { name: "c".into(), domain: ParamDomain::RealInterval { lo: 0.0, hi: 1.0 } },
        ],
    };
    let mut a = GridSearch::new(space.clone(), 3);
    let mut b = GridSearch::new(space, 3);
    assert_eq!(a.total(), Some(27));
    let seq_a: Vec<_> = std::iter::from_fn(|| a.next(&[])).collect();
    let seq_b: Vec<_> = std::iter::from_fn(|| b.next(&[])).collect();
    assert_eq!(seq_a.len(), 27);
    for (x, y) in seq_a.iter().zip(seq_b.iter()) {
        assert_eq!(x.0, y.0);
    }
}

#[test]
fn random_search_sequence_is_reproducible_for_a_seed() {
    let space = SearchSpace {
        params: vec![ParamSpec { name: "x".into(), domain: ParamDomain::RealInterval { lo: -1.0, hi: 1.0 } }],
    };
    let mut a = RandomSearch::new(space.clone(), 1234, 25);
    let mut b = RandomSearch::new(space, 1234, 25);
    let seq_a: Vec<_> = std::iter::from_fn(|| a.next(&[])).collect();
    let seq_b: Vec<_> = std::iter::from_fn(|| b.next(&[])).collect();
    assert_eq!(seq_a.len(), 25);
    assert_eq!(
        seq_a.iter().map(|v| format!("{:?}", v.0)).collect::<Vec<_>>(),
        seq_b.iter().map(|v| format!("{:?}", v.0)).collect::<Vec<_>>()
    );
}

#[test]
fn fp_determinism_self_check_passes() {
    assert!(precision::validate_fp_determinism().is_ok());
}
