//! Capitulation reversal: a weighted panic score (volume, velocity, ATR, wick exhaustion, RSI
//! extremes) flags a recent capitulation or euphoria event, and the current bar's reversal
//! candle plus an RSI recovery/decline confirms the entry.
//!
//! Grounded in the panic-event/recovery two-stage detector: a panic score is built from five
//! weighted booleans and thresholded, then a short lookback window is scanned for a qualifying
//! event before a reversal candle is accepted.

use rust_decimal::prelude::*;

use crate::indicators::{self, IndicatorKernel};
use crate::strategies::Strategy;
use crate::types::{
    Bar, ParamDomain, ParamSchema, ParamSpec, ParameterVector, PositionSide, SearchSpace, Signal,
    StrategyId,
};

const PANIC_WINDOW: usize = 15;
const PANIC_THRESHOLD: f64 = 0.4;

pub struct CapitulationReversal;

impl Strategy for CapitulationReversal {
    fn id(&self) -> StrategyId {
        StrategyId::CapitulationReversal
    }

    fn schema(&self) -> ParamSchema {
        ParamSchema {
            space: SearchSpace {
                params: vec![
                    ParamSpec {
                        name: "volume_explosion_threshold".into(),
                        domain: ParamDomain::RealInterval { lo: 1.3, hi: 2.2 },
                    },
                    ParamSpec {
                        name: "price_velocity_threshold".into(),
                        domain: ParamDomain::RealInterval { lo: 0.006, hi: 0.015 },
                    },
                    ParamSpec {
                        name: "atr_explosion_threshold".into(),
                        domain: ParamDomain::RealInterval { lo: 1.3, hi: 2.5 },
                    },
                    ParamSpec {
                        name: "exhaustion_wick_ratio".into(),
                        domain: ParamDomain::RealInterval { lo: 1.5, hi: 2.5 },
                    },
                    ParamSpec {
                        name: "rsi_extreme_threshold".into(),
                        domain: ParamDomain::DiscreteReal(vec![25.0, 30.0, 35.0]),
                    },
                    ParamSpec {
                        name: "rsi_divergence_lookback".into(),
                        domain: ParamDomain::DiscreteReal(vec![10.0, 15.0]),
                    },
                    ParamSpec {
                        name: "consecutive_panic_candles".into(),
                        domain: ParamDomain::DiscreteReal(vec![2.0, 3.0]),
                    },
                    ParamSpec {
                        name: "atr_multiplier_sl".into(),
                        domain: ParamDomain::RealInterval { lo: 1.2, hi: 2.0 },
                    },
                    ParamSpec {
                        name: "risk_reward_ratio".into(),
                        domain: ParamDomain::RealInterval { lo: 1.5, hi: 3.0 },
                    },
                    ParamSpec {
                        name: "lookback_periods".into(),
                        domain: ParamDomain::DiscreteReal(vec![50.0, 75.0, 100.0]),
                    },
                ],
            },
            min_bars: 120,
            min_trades: 3,
        }
    }

    fn generate_signals(
        &self,
        bars: &[Bar],
        indicators: &mut IndicatorKernel,
        params: &ParameterVector,
    ) -> Vec<Signal> {
        let volume_explosion_threshold = params.get_f64("volume_explosion_threshold");
        let price_velocity_threshold = params.get_f64("price_velocity_threshold");
        let atr_explosion_threshold = params.get_f64("atr_explosion_threshold");
        let exhaustion_wick_ratio = params.get_f64("exhaustion_wick_ratio");
        let rsi_extreme_threshold = params.get_f64("rsi_extreme_threshold");
        let rsi_lookback = params.get_usize("rsi_divergence_lookback").max(1);
        let min_panic_candles = params.get_usize("consecutive_panic_candles").max(1);
        let atr_mult = params.get_f64("atr_multiplier_sl");
        let risk_reward = params.get_f64("risk_reward_ratio");
        let lookback_periods = params.get_usize("lookback_periods");

        let mut out = vec![Signal::Hold; bars.len()];
        if bars.len() <= lookback_periods.max(20) {
            return out;
        }

        let volume_ratio = indicators.volume_ratio(bars, 20);
        let atr_values: Vec<f64> = bars.iter().map(|b| b.atr.to_f64().unwrap_or(0.0)).collect();
        let atr_ma = indicators::sma(&atr_values, 20, false);
        let velocity = indicators.price_velocity(bars);
        let velocity_ma = indicators::sma(&velocity, 20, false);
        let rsi = indicators.rsi(bars, 14);
        let wick = indicators.wick_ratio(bars);
        let bullish: Vec<bool> = bars.iter().map(|b| b.close > b.open).collect();
        let bearish: Vec<bool> = bars.iter().map(|b| b.close < b.open).collect();

        let panic_score = |i: usize| -> f64 {
            if atr_ma[i].is_none() || velocity_ma[i].is_none() {
                return 0.0;
            }
            let volume_explosion = (volume_ratio[i].unwrap_or(0.0) >= volume_explosion_threshold) as i32 as f64;
            let velocity_extreme = (velocity[i] >= price_velocity_threshold
                && atr_ma[i].map(|m| velocity[i] >= m).unwrap_or(false)) as i32 as f64;
            let atr_explosion =
                (atr_values[i] >= atr_ma[i].unwrap_or(0.0) * atr_explosion_threshold) as i32 as f64;
            let exhaustion_wick = (wick[i] >= exhaustion_wick_ratio) as i32 as f64;
            let rsi_extreme = rsi[i]
                .map(|r| r <= rsi_extreme_threshold || r >= 100.0 - rsi_extreme_threshold)
                .unwrap_or(false) as i32 as f64;
            0.3 * volume_explosion
                + 0.25 * velocity_extreme
                + 0.2 * atr_explosion
                + 0.15 * exhaustion_wick
                + 0.1 * rsi_extreme
        };

        let panic_scores: Vec<f64> = (0..bars.len())
            .map(|i| if i >= 20 { panic_score(i) } else { 0.0 })
            .collect();

        for i in lookback_periods.max(PANIC_WINDOW + 1)..bars.len() {
            let window_start = i.saturating_sub(PANIC_WINDOW);
            let recent_scores = &panic_scores[window_start..i];
            let max_panic = recent_scores.iter().cloned().fold(0.0_f64, f64::max);
            if max_panic < PANIC_THRESHOLD {
                continue;
            }

            let bearish_count = bearish[window_start..i].iter().filter(|b| **b).count();
            let bullish_count = bullish[window_start..i].iter().filter(|b| **b).count();
            let rsi_start = i.saturating_sub(rsi_lookback);
            let recent_rsi: Vec<f64> = rsi[rsi_start..i].iter().filter_map(|r| *r).collect();

            if bearish_count >= min_panic_candles && bullish[i] {
                let was_oversold = recent_rsi.iter().any(|r| *r < 35.0);
                let is_recovering = rsi[i].map(|r| r >= 25.0).unwrap_or(false);
                if was_oversold && is_recovering {
                    let stop_loss = bars[i].close - bars[i].atr * Decimal::from_f64(atr_mult).unwrap_or_default();
                    let take_profit = bars[i].close
                        + bars[i].atr
                            * Decimal::from_f64(atr_mult).unwrap_or_default()
                            * Decimal::from_f64(risk_reward).unwrap_or_default();
                    out[i] = Signal::Enter {
                        side: PositionSide::Long,
                        stop_loss,
                        take_profit,
                        auxiliary_score: max_panic,
                    };
                    continue;
                }
            }

            if bullish_count >= min_panic_candles && bearish[i] {
                let was_overbought = recent_rsi.iter().any(|r| *r > 65.0);
                let is_declining = rsi[i].map(|r| r <= 75.0).unwrap_or(false);
                if was_overbought && is_declining {
                    let stop_loss = bars[i].close + bars[i].atr * Decimal::from_f64(atr_mult).unwrap_or_default();
                    let take_profit = bars[i].close
                        - bars[i].atr
                            * Decimal::from_f64(atr_mult).unwrap_or_default()
                            * Decimal::from_f64(risk_reward).unwrap_or_default();
                    out[i] = Signal::Enter {
                        side: PositionSide::Short,
                        stop_loss,
                        take_profit,
                        auxiliary_score: max_panic,
                    };
                }
            }
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

    fn flat_bars(n: usize) -> Vec<Bar> {
        (0..n as i64)
            .map(|i| bar(100.0, 101.0, 99.0, 100.0, 1000.0, i * 60_000))
            .collect()
    }

    #[test]
    fn no_signals_on_flat_quiet_market() {
        let bars = flat_bars(150);
        let mut ind = IndicatorKernel::new(false);
        let params = ParameterVector(
            [
                ("volume_explosion_threshold", 1.5),
                ("price_velocity_threshold", 0.01),
                ("atr_explosion_threshold", 1.5),
                ("exhaustion_wick_ratio", 2.0),
                ("rsi_extreme_threshold", 30.0),
                ("rsi_divergence_lookback", 10.0),
                ("consecutive_panic_candles", 3.0),
                ("atr_multiplier_sl", 1.5),
                ("risk_reward_ratio", 2.5),
                ("lookback_periods", 100.0),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), crate::types::ParameterValue::Real(v)))
            .collect(),
        );
        let signals = CapitulationReversal.generate_signals(&bars, &mut ind, &params);
        assert!(signals.iter().all(|s| matches!(s, Signal::Hold)));
    }
}
