//! The closed strategy registry (C3).
//!
//! Each strategy is a pure function of bars and a parameter vector to a signal sequence.
//! There is no dynamic loading: adding a strategy means adding a `StrategyId` variant, a module
//! here, and a dispatch arm in [`strategy_for`]. `generate_signals` must never look past the bar
//! it is deciding on — every indicator value it reads has to come from `IndicatorKernel`, which
//! is itself computed causally over the whole series once per candidate.

pub mod capitulation_reversal;
pub mod failed_breakdown;
pub mod liquidity_sweep;

use crate::error::StrategyError;
use crate::indicators::IndicatorKernel;
use crate::types::{Bar, ParamDomain, ParamSchema, ParameterVector, Signal, StrategyId};

/// A rule-based signal generator bound to one `StrategyId`.
pub trait Strategy: Send + Sync {
    fn id(&self) -> StrategyId;

    /// Parameter names, domains, and the minimum bar/trade counts the evaluator enforces.
    fn schema(&self) -> ParamSchema;

    /// One decision per bar, causal in `bars[..=i]` only. `params` is assumed already validated
    /// against `schema()` by [`validate_params`].
    fn generate_signals(
        &self,
        bars: &[Bar],
        indicators: &mut IndicatorKernel,
        params: &ParameterVector,
    ) -> Vec<Signal>;
}

/// Resolves a `StrategyId` to its implementation. The match is exhaustive by construction: a
/// new variant on `StrategyId` fails to compile here until it has an arm.
pub fn strategy_for(id: StrategyId) -> Box<dyn Strategy> {
    match id {
        StrategyId::LiquiditySweep => Box::new(liquidity_sweep::LiquiditySweep),
        StrategyId::CapitulationReversal => Box::new(capitulation_reversal::CapitulationReversal),
        StrategyId::FailedBreakdown => Box::new(failed_breakdown::FailedBreakdown),
    }
}

/// Checks that `params` has exactly the keys `schema` declares and that every value falls
/// inside its declared domain. Strategies call this before touching their parameters so a bad
/// vector is rejected uniformly rather than producing silently wrong signals.
pub fn validate_params(schema: &ParamSchema, params: &ParameterVector) -> Result<(), StrategyError> {
    for spec in &schema.space.params {
        let value = params
            .get(&spec.name)
            .ok_or_else(|| StrategyError::MissingParameter(spec.name.clone()))?;
        let v = value.as_f64();
        let in_domain = match &spec.domain {
            ParamDomain::IntRange { lo, hi } => v >= *lo as f64 && v <= *hi as f64,
            ParamDomain::RealInterval { lo, hi } => v >= *lo && v <= *hi,
            ParamDomain::DiscreteReal(values) => values.iter().any(|x| (x - v).abs() < 1e-9),
        };
        if !in_domain {
            return Err(StrategyError::OutOfDomain {
                name: spec.name.clone(),
                value: v,
            });
        }
    }
    let declared: std::collections::HashSet<&str> =
        schema.space.params.iter().map(|p| p.name.as_str()).collect();
    for key in params.0.keys() {
        if !declared.contains(key.as_str()) {
            return Err(StrategyError::UnknownParameter(key.clone()));
        }
    }
    Ok(())
}
