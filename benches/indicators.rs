use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use training_engine::indicators;
use training_engine::types::Bar;

fn sample_bars(n: usize) -> Vec<Bar> {
    (0..n as i64)
        .map(|i| {
            let t = i as f64 * 0.01;
            let price = 100.0 + t.sin() * 5.0 + (i as f64) * 0.001;
            Bar {
                timestamp: i * 60_000,
                open: Decimal::from_f64_retain(price).unwrap_or(dec!(100)),
                high: Decimal::from_f64_retain(price + 1.0).unwrap_or(dec!(101)),
                low: Decimal::from_f64_retain(price - 1.0).unwrap_or(dec!(99)),
                close: Decimal::from_f64_retain(price + 0.3).unwrap_or(dec!(100)),
                volume: dec!(1000),
                atr: dec!(1.0),
            }
        })
        .collect()
}

fn bench_indicators(c: &mut Criterion) {
    let bars = sample_bars(5_000);
    let closes: Vec<f64> = bars.iter().map(|b| b.close.to_string().parse().unwrap()).collect();

    c.bench_function("atr_14", |b| b.iter(|| indicators::atr(black_box(&bars), 14)));
    c.bench_function("rsi_14", |b| b.iter(|| indicators::rsi(black_box(&bars), 14)));
    c.bench_function("sma_20", |b| b.iter(|| indicators::sma(black_box(&closes), 20, true)));
    c.bench_function("rolling_max_50", |b| b.iter(|| indicators::rolling_max(black_box(&closes), 50)));
    c.bench_function("volume_ratio_20", |b| b.iter(|| indicators::volume_ratio(black_box(&bars), 20)));
    c.bench_function("wick_ratio", |b| b.iter(|| indicators::wick_ratio(black_box(&bars))));
}

criterion_group!(benches, bench_indicators);
criterion_main!(benches);
