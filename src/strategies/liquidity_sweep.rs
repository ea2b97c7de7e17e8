//! Liquidity sweep: a wick trades through a recent swing level and closes back inside it,
//! then price breaks the minor structure that formed around the sweep.
//!
//! Grounded in the "A+ setup" sweep-then-structure-shift rule: the higher-timeframe sweep and
//! lower-timeframe confirmation are collapsed onto a single bar series here, since the engine
//! evaluates one series per candidate. The confirmation window stands in for the original's
//! separate lower-timeframe candle.

use rust_decimal::prelude::*;

use crate::indicators::IndicatorKernel;
use crate::strategies::Strategy;
use crate::types::{
    Bar, ParamDomain, ParamSchema, ParamSpec, ParameterVector, PositionSide, SearchSpace, Signal,
    StrategyId,
};

pub struct LiquiditySweep;

impl Strategy for LiquiditySweep {
    fn id(&self) -> StrategyId {
        StrategyId::LiquiditySweep
    }

    fn schema(&self) -> ParamSchema {
        ParamSchema {
            space: SearchSpace {
                params: vec![
                    ParamSpec {
                        name: "swing_lookback_periods".into(),
                        domain: ParamDomain::IntRange { lo: 10, hi: 50 },
                    },
                    ParamSpec {
                        name: "min_sweep_percentage".into(),
                        domain: ParamDomain::RealInterval { lo: 0.0005, hi: 0.01 },
                    },
                    ParamSpec {
                        name: "structure_confirmation_window".into(),
                        domain: ParamDomain::IntRange { lo: 2, hi: 10 },
                    },
                    ParamSpec {
                        name: "risk_reward_ratio".into(),
                        domain: ParamDomain::RealInterval { lo: 1.5, hi: 4.0 },
                    },
                    ParamSpec {
                        name: "atr_multiplier_sl".into(),
                        domain: ParamDomain::RealInterval { lo: 0.5, hi: 2.0 },
                    },
                    ParamSpec {
                        name: "vol_multiplier".into(),
                        domain: ParamDomain::RealInterval { lo: 1.0, hi: 4.0 },
                    },
                ],
            },
            min_bars: 60,
            min_trades: 5,
        }
    }

    fn generate_signals(
        &self,
        bars: &[Bar],
        indicators: &mut IndicatorKernel,
        params: &ParameterVector,
    ) -> Vec<Signal> {
        let lookback = params.get_usize("swing_lookback_periods");
        let min_sweep_pct = params.get_f64("min_sweep_percentage");
        let confirm_window = params.get_usize("structure_confirmation_window").max(1);
        let risk_reward = params.get_f64("risk_reward_ratio");
        let atr_mult = params.get_f64("atr_multiplier_sl");
        let vol_multiplier = params.get_f64("vol_multiplier");

        let mut out = vec![Signal::Hold; bars.len()];
        if bars.len() <= lookback + confirm_window {
            return out;
        }

        // volume ÷ rolling-mean volume over the same swing lookback, per SPEC_FULL §4.3: a
        // sweep only qualifies when it prints on above-average volume.
        let volume_ratio = indicators.volume_ratio(bars, lookback);

        for i in (lookback + confirm_window)..bars.len() {
            let window = &bars[i - lookback..i];
            let has_volume = volume_ratio[i].map(|r| r >= vol_multiplier).unwrap_or(false);
            if !has_volume {
                continue;
            }

            if let Some(swing_low) = most_recent_swing_low(window) {
                let threshold = swing_low * (Decimal::ONE - Decimal::from_f64(min_sweep_pct).unwrap_or_default());
                let is_sweep = bars[i].low < threshold && bars[i].close > swing_low;
                if is_sweep {
                    let minor_high = bars[i - confirm_window..i]
                        .iter()
                        .map(|b| b.close)
                        .fold(Decimal::MIN, Decimal::max);
                    if bars[i].close > minor_high {
                        let stop_loss = bars[i].low - bars[i].atr * Decimal::from_f64(atr_mult).unwrap_or_default();
                        let risk = bars[i].close - stop_loss;
                        let take_profit =
                            bars[i].close + risk * Decimal::from_f64(risk_reward).unwrap_or_default();
                        out[i] = Signal::Enter {
                            side: PositionSide::Long,
                            stop_loss,
                            take_profit,
                            auxiliary_score: 0.85,
                        };
                        continue;
                    }
                }
            }

            if let Some(swing_high) = most_recent_swing_high(window) {
                let threshold = swing_high * (Decimal::ONE + Decimal::from_f64(min_sweep_pct).unwrap_or_default());
                let is_sweep = bars[i].high > threshold && bars[i].close < swing_high;
                if is_sweep {
                    let minor_low = bars[i - confirm_window..i]
                        .iter()
                        .map(|b| b.close)
                        .fold(Decimal::MAX, Decimal::min);
                    if bars[i].close < minor_low {
                        let stop_loss = bars[i].high + bars[i].atr * Decimal::from_f64(atr_mult).unwrap_or_default();
                        let risk = stop_loss - bars[i].close;
                        let take_profit =
                            bars[i].close - risk * Decimal::from_f64(risk_reward).unwrap_or_default();
                        out[i] = Signal::Enter {
                            side: PositionSide::Short,
                            stop_loss,
                            take_profit,
                            auxiliary_score: 0.85,
                        };
                    }
                }
            }
        }

        out
    }
}

/// Most recent local minimum: `low[i-1] > low[i] < low[i+1]`.
fn most_recent_swing_low(window: &[Bar]) -> Option<Decimal> {
    window
        .windows(3)
        .rev()
        .find(|w| w[0].low > w[1].low && w[1].low < w[2].low)
        .map(|w| w[1].low)
}

/// Most recent local maximum: `high[i-1] < high[i] > high[i+1]`.
fn most_recent_swing_high(window: &[Bar]) -> Option<Decimal> {
    window
        .windows(3)
        .rev()
        .find(|w| w[0].high < w[1].high && w[1].high > w[2].high)
        .map(|w| w[1].high)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

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
    fn no_signals_before_min_bars() {
        let bars: Vec<Bar> = (0..20).map(|i| bar(100.0, 101.0, 99.0, 100.0, i * 60_000)).collect();
        let mut ind = IndicatorKernel::new(false);
        let params = ParameterVector(
            [
                ("swing_lookback_periods".to_string(), crate::types::ParameterValue::Integer(20)),
                ("min_sweep_percentage".to_string(), crate::types::ParameterValue::Real(0.001)),
                (
                    "structure_confirmation_window".to_string(),
                    crate::types::ParameterValue::Integer(3),
                ),
                ("risk_reward_ratio".to_string(), crate::types::ParameterValue::Real(2.5)),
                ("atr_multiplier_sl".to_string(), crate::types::ParameterValue::Real(1.0)),
                ("vol_multiplier".to_string(), crate::types::ParameterValue::Real(1.5)),
            ]
            .into_iter()
            .collect(),
        );
        let signals = LiquiditySweep.generate_signals(&bars, &mut ind, &params);
        assert!(signals.iter().all(|s| matches!(s, Signal::Hold)));
    }
}
