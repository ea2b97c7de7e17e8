//! Failed breakdown (Wyckoff spring): price consolidates into a tight range, wicks below
//! support on weak volume, then reclaims support on strong volume within a short window.
//!
//! Grounded in the range-then-spring-then-recovery detector: a consolidation range is
//! re-validated on every bar from the trailing lookback window, a breakdown below its support
//! is tracked for up to `spring_max_duration` bars, and a recovery above support on
//! above-average volume within `recovery_speed` bars of the breakdown confirms the spring.

use rust_decimal::prelude::*;

use crate::indicators::IndicatorKernel;
use crate::strategies::Strategy;
use crate::types::{
    Bar, ParamDomain, ParamSchema, ParamSpec, ParameterVector, PositionSide, SearchSpace, Signal,
    StrategyId,
};

pub struct FailedBreakdown;

impl Strategy for FailedBreakdown {
    fn id(&self) -> StrategyId {
        StrategyId::FailedBreakdown
    }

    fn schema(&self) -> ParamSchema {
        ParamSchema {
            space: SearchSpace {
                params: vec![
                    ParamSpec {
                        name: "range_lookback_periods".into(),
                        domain: ParamDomain::IntRange { lo: 50, hi: 150 },
                    },
                    ParamSpec {
                        name: "range_tightness_threshold".into(),
                        domain: ParamDomain::RealInterval { lo: 0.02, hi: 0.08 },
                    },
                    ParamSpec {
                        name: "breakdown_volume_threshold".into(),
                        domain: ParamDomain::RealInterval { lo: 0.3, hi: 0.8 },
                    },
                    ParamSpec {
                        name: "spring_max_duration".into(),
                        domain: ParamDomain::IntRange { lo: 3, hi: 15 },
                    },
                    ParamSpec {
                        name: "recovery_volume_threshold".into(),
                        domain: ParamDomain::RealInterval { lo: 2.0, hi: 4.0 },
                    },
                    ParamSpec {
                        name: "recovery_speed".into(),
                        domain: ParamDomain::IntRange { lo: 2, hi: 8 },
                    },
                    ParamSpec {
                        name: "accumulation_score_minimum".into(),
                        domain: ParamDomain::RealInterval { lo: 0.5, hi: 0.9 },
                    },
                    ParamSpec {
                        name: "atr_multiplier_sl".into(),
                        domain: ParamDomain::RealInterval { lo: 0.8, hi: 2.0 },
                    },
                    ParamSpec {
                        name: "risk_reward_ratio".into(),
                        domain: ParamDomain::RealInterval { lo: 1.5, hi: 3.0 },
                    },
                ],
            },
            min_bars: 160,
            min_trades: 3,
        }
    }

    fn generate_signals(
        &self,
        bars: &[Bar],
        indicators: &mut IndicatorKernel,
        params: &ParameterVector,
    ) -> Vec<Signal> {
        let range_lookback = params.get_usize("range_lookback_periods");
        let tightness = params.get_f64("range_tightness_threshold");
        let breakdown_volume_threshold = params.get_f64("breakdown_volume_threshold");
        let spring_max_duration = params.get_usize("spring_max_duration");
        let recovery_volume_threshold = params.get_f64("recovery_volume_threshold");
        let recovery_speed = params.get_usize("recovery_speed");
        let accumulation_minimum = params.get_f64("accumulation_score_minimum");
        let atr_mult = params.get_f64("atr_multiplier_sl");
        let risk_reward = params.get_f64("risk_reward_ratio");

        let mut out = vec![Signal::Hold; bars.len()];
        if bars.len() <= range_lookback + spring_max_duration + recovery_speed {
            return out;
        }

        let volume_ratio = indicators.volume_ratio(bars, 20);

        for i in (range_lookback + spring_max_duration + recovery_speed)..bars.len() {
            let range_window = &bars[i - range_lookback..i];
            let high = range_window.iter().map(|b| b.high).fold(Decimal::MIN, Decimal::max);
            let low = range_window.iter().map(|b| b.low).fold(Decimal::MAX, Decimal::min);
            if low.is_zero() {
                continue;
            }
            let range_size = ((high - low) / low).to_f64().unwrap_or(f64::MAX);
            if range_size > tightness {
                continue;
            }
            let support = low;

            let breakdown_idx = ((i - spring_max_duration - recovery_speed)..i)
                .rev()
                .find(|&j| bars[j].low < support && volume_ratio[j].unwrap_or(1.0) <= breakdown_volume_threshold);
            let Some(breakdown_idx) = breakdown_idx else {
                continue;
            };
            if i - breakdown_idx > spring_max_duration + recovery_speed {
                continue;
            }

            let recovered_by_now = bars[i].close > support;
            let strong_volume = volume_ratio[i].unwrap_or(0.0) >= recovery_volume_threshold;
            if !recovered_by_now || !strong_volume {
                continue;
            }

            let breakdown_component = if volume_ratio[breakdown_idx].unwrap_or(1.0) <= breakdown_volume_threshold {
                0.3
            } else {
                0.0
            };
            let recovery_component = if strong_volume { 0.3 } else { 0.0 };
            let accumulation_score = 0.4 + breakdown_component + recovery_component;
            if accumulation_score < accumulation_minimum {
                continue;
            }
            // Only accept the spring while price is still near support (within 3%); further
            // above it the setup has already played out and entering chases the move.
            let distance_from_support = ((bars[i].close - support) / support).to_f64().unwrap_or(f64::MAX);
            if distance_from_support > 0.03 {
                continue;
            }

            let stop_loss = support - bars[i].atr * Decimal::from_f64(atr_mult).unwrap_or_default();
            let stop_distance = bars[i].close - stop_loss;
            let take_profit = bars[i].close + stop_distance * Decimal::from_f64(risk_reward).unwrap_or_default();
            out[i] = Signal::Enter {
                side: PositionSide::Long,
                stop_loss,
                take_profit,
                auxiliary_score: accumulation_score,
            };
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn bar(o: f64, h: f64, l: f64, c: f64, v: f64, ts: i64) -> Bar {
        Bar {
            timestamp: ts,
            open: Decimal::from_f64(o).unwrap(),
            high: Decimal::from_f64(h).unwrap(),
            low: Decimal::from_f64(l).unwrap(),
            close: Decimal::from_f64(c).unwrap(),
            volume: Decimal::from_f64(v).unwrap(),
            atr: dec!(1.0),
        }
    }

    #[test]
    fn no_signals_when_no_consolidation_range_exists() {
        let bars: Vec<Bar> = (0..200)
            .map(|i| {
                let p = 100.0 + i as f64 * 0.5;
                bar(p, p + 1.0, p - 1.0, p + 0.3, 1000.0, i * 60_000)
            })
            .collect();
        let mut ind = IndicatorKernel::new(false);
        let params = ParameterVector(
            [
                ("range_lookback_periods", 100.0),
                ("range_tightness_threshold", 0.05),
                ("breakdown_volume_threshold", 0.5),
                ("spring_max_duration", 10.0),
                ("recovery_volume_threshold", 3.0),
                ("recovery_speed", 5.0),
                ("accumulation_score_minimum", 0.7),
                ("atr_multiplier_sl", 1.2),
                ("risk_reward_ratio", 2.0),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), crate::types::ParameterValue::Real(v)))
            .collect(),
        );
        let signals = FailedBreakdown.generate_signals(&bars, &mut ind, &params);
        assert!(signals.iter().all(|s| matches!(s, Signal::Hold)));
    }
}
