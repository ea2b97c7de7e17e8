//! Pure, deterministic technical indicators over a bar series.
//!
//! Every function returns a sequence the same length as its input, with the leading
//! `window - 1` entries `None` ("undefined" per the warmup window). All are side-effect-free:
//! identical inputs yield bit-identical outputs in `Decimal` arithmetic and within a documented
//! ULP bound in `f64` arithmetic, which is what `precision::validate_fp_determinism` guards.

use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;

use crate::types::Bar;

const WICK_EPSILON: f64 = 0.0001;

/// A small per-job cache in front of the pure functions below, so a strategy that needs the
/// same indicator at several parameter settings within one candidate evaluation doesn't
/// recompute it. Mirrors the cache/`enable_simd` split the indicator registry this crate is
/// built from already used.
pub struct IndicatorKernel {
    enable_simd: bool,
    cache: HashMap<(String, usize), Vec<Option<f64>>>,
}

impl IndicatorKernel {
    pub fn new(enable_simd: bool) -> Self {
        Self {
            enable_simd,
            cache: HashMap::new(),
        }
    }

    fn cached(
        &mut self,
        key: &str,
        period: usize,
        compute: impl FnOnce() -> Vec<Option<f64>>,
    ) -> Vec<Option<f64>> {
        let cache_key = (key.to_string(), period);
        if let Some(hit) = self.cache.get(&cache_key) {
            return hit.clone();
        }
        let values = compute();
        self.cache.insert(cache_key, values.clone());
        values
    }

    pub fn atr(&mut self, bars: &[Bar], period: usize) -> Vec<Option<f64>> {
        self.cached("atr", period, || atr(bars, period))
    }

    pub fn rsi(&mut self, bars: &[Bar], period: usize) -> Vec<Option<f64>> {
        self.cached("rsi", period, || rsi(bars, period))
    }

    pub fn sma(&mut self, bars: &[Bar], period: usize) -> Vec<Option<f64>> {
        let simd = self.enable_simd;
        self.cached("sma", period, || sma(&closes(bars), period, simd))
    }

    pub fn rolling_max(&mut self, bars: &[Bar], window: usize) -> Vec<Option<f64>> {
        self.cached("rolling_max", window, || {
            rolling_max(&highs(bars), window)
        })
    }

    pub fn rolling_min(&mut self, bars: &[Bar], window: usize) -> Vec<Option<f64>> {
        self.cached("rolling_min", window, || rolling_min(&lows(bars), window))
    }

    pub fn volume_ratio(&mut self, bars: &[Bar], window: usize) -> Vec<Option<f64>> {
        self.cached("volume_ratio", window, || volume_ratio(bars, window))
    }

    pub fn wick_ratio(&mut self, bars: &[Bar]) -> Vec<f64> {
        wick_ratio(bars)
    }

    pub fn price_velocity(&mut self, bars: &[Bar]) -> Vec<f64> {
        price_velocity(bars)
    }
}

fn closes(bars: &[Bar]) -> Vec<f64> {
    bars.iter().map(|b| b.close.to_f64().unwrap_or(0.0)).collect()
}

fn highs(bars: &[Bar]) -> Vec<f64> {
    bars.iter().map(|b| b.high.to_f64().unwrap_or(0.0)).collect()
}

fn lows(bars: &[Bar]) -> Vec<f64> {
    bars.iter().map(|b| b.low.to_f64().unwrap_or(0.0)).collect()
}

/// Wilder-smoothed Average True Range. `period` warmup entries are `None`.
pub fn atr(bars: &[Bar], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; bars.len()];
    if bars.len() <= period || period == 0 {
        return out;
    }

    let true_range = |i: usize| -> f64 {
        let hl = bars[i].high - bars[i].low;
        let hc = (bars[i].high - bars[i - 1].close).abs();
        let lc = (bars[i].low - bars[i - 1].close).abs();
        hl.max(hc).max(lc).to_f64().unwrap_or(0.0)
    };

    let mut sum = 0.0;
    for i in 1..=period {
        sum += true_range(i);
    }
    let mut prev = sum / period as f64;
    out[period] = Some(prev);

    for i in (period + 1)..bars.len() {
        let tr = true_range(i);
        prev = (prev * (period - 1) as f64 + tr) / period as f64;
        out[i] = Some(prev);
    }
    out
}

/// Wilder RSI. `period` warmup entries are `None`.
pub fn rsi(bars: &[Bar], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; bars.len()];
    if bars.len() <= period || period == 0 {
        return out;
    }

    let mut gains = Vec::with_capacity(bars.len() - 1);
    let mut losses = Vec::with_capacity(bars.len() - 1);
    for i in 1..bars.len() {
        let change = (bars[i].close - bars[i - 1].close).to_f64().unwrap_or(0.0);
        if change > 0.0 {
            gains.push(change);
            losses.push(0.0);
        } else {
            gains.push(0.0);
            losses.push(-change);
        }
    }

    let mut avg_gain = gains[0..period].iter().sum::<f64>() / period as f64;
    let mut avg_loss = losses[0..period].iter().sum::<f64>() / period as f64;

    let rsi_from = |avg_gain: f64, avg_loss: f64| -> f64 {
        if avg_loss == 0.0 {
            100.0
        } else {
            let rs = avg_gain / avg_loss;
            100.0 - (100.0 / (1.0 + rs))
        }
    };

    out[period] = Some(rsi_from(avg_gain, avg_loss));

    for i in period..gains.len() {
        avg_gain = (avg_gain * (period - 1) as f64 + gains[i]) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + losses[i]) / period as f64;
        out[i + 1] = Some(rsi_from(avg_gain, avg_loss));
    }
    out
}

/// Simple moving average of an arbitrary series (not necessarily closes).
pub fn sma(x: &[f64], period: usize, enable_simd: bool) -> Vec<Option<f64>> {
    let mut out = vec![None; x.len()];
    if period == 0 || x.len() < period {
        return out;
    }
    for i in (period - 1)..x.len() {
        let window = &x[i + 1 - period..=i];
        let sum = if enable_simd && window.len() >= 8 {
            simd_sum(window)
        } else {
            window.iter().sum()
        };
        out[i] = Some(sum / period as f64);
    }
    out
}

fn simd_sum(data: &[f64]) -> f64 {
    let mut sum = 0.0;
    for chunk in data.chunks_exact(8) {
        sum += chunk.iter().sum::<f64>();
    }
    let remainder = data.len() % 8;
    if remainder > 0 {
        sum += data[data.len() - remainder..].iter().sum::<f64>();
    }
    sum
}

pub fn rolling_max(x: &[f64], w: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; x.len()];
    if w == 0 || x.len() < w {
        return out;
    }
    for i in (w - 1)..x.len() {
        let m = x[i + 1 - w..=i].iter().cloned().fold(f64::MIN, f64::max);
        out[i] = Some(m);
    }
    out
}

pub fn rolling_min(x: &[f64], w: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; x.len()];
    if w == 0 || x.len() < w {
        return out;
    }
    for i in (w - 1)..x.len() {
        let m = x[i + 1 - w..=i].iter().cloned().fold(f64::MAX, f64::min);
        out[i] = Some(m);
    }
    out
}

/// volume ÷ simple moving average of volume over `w`.
pub fn volume_ratio(bars: &[Bar], w: usize) -> Vec<Option<f64>> {
    let volumes: Vec<f64> = bars.iter().map(|b| b.volume.to_f64().unwrap_or(0.0)).collect();
    let mean = sma(&volumes, w, false);
    volumes
        .iter()
        .zip(mean.iter())
        .map(|(v, m)| m.map(|m| if m > 0.0 { v / m } else { 0.0 }))
        .collect()
}

/// (upper_wick + lower_wick) / max(body, epsilon). Defined for every bar; no warmup window.
pub fn wick_ratio(bars: &[Bar]) -> Vec<f64> {
    bars.iter()
        .map(|b| {
            let open = b.open.to_f64().unwrap_or(0.0);
            let close = b.close.to_f64().unwrap_or(0.0);
            let high = b.high.to_f64().unwrap_or(0.0);
            let low = b.low.to_f64().unwrap_or(0.0);
            let body = (close - open).abs();
            let upper_wick = high - open.max(close);
            let lower_wick = open.min(close) - low;
            (upper_wick + lower_wick) / body.max(WICK_EPSILON)
        })
        .collect()
}

/// |close - open| / open. Defined for every bar; no warmup window.
pub fn price_velocity(bars: &[Bar]) -> Vec<f64> {
    bars.iter()
        .map(|b| {
            let open = b.open.to_f64().unwrap_or(0.0);
            let close = b.close.to_f64().unwrap_or(0.0);
            if open.abs() < f64::EPSILON {
                0.0
            } else {
                (close - open).abs() / open
            }
        })
        .collect()
}

/// Average True Range on the `Decimal` path, used to pre-populate `Bar::atr` for storage.
/// Produces `Decimal::ZERO` for the undefined warmup window rather than `None`, since the
/// Bar Store always materializes a concrete number into the stored column.
pub fn atr_decimal(bars: &[Bar], period: usize) -> Vec<Decimal> {
    let mut out = vec![dec!(0.0); bars.len()];
    if bars.len() <= period || period == 0 {
        return out;
    }
    let true_range = |i: usize| -> Decimal {
        let hl = bars[i].high - bars[i].low;
        let hc = (bars[i].high - bars[i - 1].close).abs();
        let lc = (bars[i].low - bars[i - 1].close).abs();
        hl.max(hc).max(lc)
    };
    let mut sum = dec!(0.0);
    for i in 1..=period {
        sum += true_range(i);
    }
    let mut prev = sum / Decimal::from(period);
    out[period] = prev;
    for i in (period + 1)..bars.len() {
        prev = (prev * Decimal::from(period - 1) + true_range(i)) / Decimal::from(period);
        out[i] = prev;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(o: f64, h: f64, l: f64, c: f64, v: f64, ts: i64) -> Bar {
        Bar {
            timestamp: ts,
            open: Decimal::from_f64(o).unwrap(),
            high: Decimal::from_f64(h).unwrap(),
            low: Decimal::from_f64(l).unwrap(),
            close: Decimal::from_f64(c).unwrap(),
            volume: Decimal::from_f64(v).unwrap(),
            atr: dec!(0.0),
        }
    }

    fn sample_bars(n: usize) -> Vec<Bar> {
        (0..n as i64)
            .map(|i| {
                let p = 100.0 + i as f64;
                bar(p, p + 1.0, p - 1.0, p + 0.5, 1000.0, i * 60_000)
            })
            .collect()
    }

    #[test]
    fn sma_has_warmup_window_undefined() {
        let bars = sample_bars(10);
        let closes = closes(&bars);
        let out = sma(&closes, 3, false);
        assert!(out[0].is_none());
        assert!(out[1].is_none());
        assert!(out[2].is_some());
    }

    #[test]
    fn wick_ratio_avoids_division_by_zero_on_doji() {
        let doji = bar(100.0, 101.0, 99.0, 100.0, 1.0, 0);
        let ratios = wick_ratio(&[doji]);
        assert!(ratios[0].is_finite());
    }

    #[test]
    fn price_velocity_is_defined_from_the_first_bar() {
        let bars = sample_bars(5);
        let v = price_velocity(&bars);
        assert_eq!(v.len(), 5);
        assert!(v.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn atr_determinism() {
        let bars = sample_bars(30);
        let a = atr(&bars, 14);
        let b = atr(&bars, 14);
        assert_eq!(a, b);
    }
}
