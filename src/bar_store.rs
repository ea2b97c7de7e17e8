//! The Bar Store (C1): loads and range-slices OHLCV bars from the relational store.
//!
//! Bars are read once per job and cached in memory for the job's duration. The cache is shared
//! read-only across workers behind a mutex; per SPEC_FULL §5 it is a performance optimization,
//! never required for correctness, so a cache miss just falls through to Postgres.

use std::collections::HashMap;
use std::sync::Mutex;

use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::error::DataError;
use crate::types::{Bar, BarSeries};

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct CacheKey {
    symbol: String,
    exchange: String,
    timeframe: String,
    lookback_candles: i64,
}

/// Read-only accessor over `bars`, keyed by `(symbol, exchange, timeframe)`.
pub struct BarStore {
    pool: PgPool,
    cache: Mutex<HashMap<CacheKey, Vec<Bar>>>,
}

impl BarStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the most recent `lookback_candles` bars in ascending time order, failing with
    /// `DataError::DataUnavailable` if fewer than `min_required` bars exist for the tuple.
    pub async fn load_recent(
        &self,
        symbol: &str,
        exchange: &str,
        timeframe: &str,
        lookback_candles: i64,
        min_required: usize,
    ) -> Result<BarSeries, DataError> {
        let key = CacheKey {
            symbol: symbol.to_string(),
            exchange: exchange.to_string(),
            timeframe: timeframe.to_string(),
            lookback_candles,
        };

        if let Some(bars) = self.cache.lock().expect("bar cache poisoned").get(&key).cloned() {
            return build_series(bars, min_required);
        }

        let rows = sqlx::query_as::<_, BarRow>(
            r#"
            SELECT timestamp, open, high, low, close, volume, atr
            FROM bars
            WHERE symbol = $1 AND exchange = $2 AND timeframe = $3
            ORDER BY timestamp DESC
            LIMIT $4
            "#,
        )
        .bind(symbol)
        .bind(exchange)
        .bind(timeframe)
        .bind(lookback_candles)
        .fetch_all(&self.pool)
        .await?;

        let mut bars: Vec<Bar> = rows.into_iter().map(BarRow::into_bar).collect();
        bars.reverse(); // rows come back newest-first; the engine wants ascending order

        self.cache.lock().expect("bar cache poisoned").insert(key, bars.clone());
        build_series(bars, min_required)
    }
}

fn build_series(bars: Vec<Bar>, min_required: usize) -> Result<BarSeries, DataError> {
    if bars.len() < min_required {
        return Err(DataError::DataUnavailable {
            required: min_required,
            available: bars.len(),
        });
    }
    BarSeries::new(bars).map_err(|_| DataError::DataUnavailable {
        required: min_required,
        available: 0,
    })
}

#[derive(sqlx::FromRow)]
struct BarRow {
    timestamp: i64,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: Decimal,
    atr: Decimal,
}

impl BarRow {
    fn into_bar(self) -> Bar {
        Bar {
            timestamp: self.timestamp,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            atr: self.atr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn build_series_rejects_short_history() {
        let bars = vec![Bar {
            timestamp: 0,
            open: dec!(1),
            high: dec!(1),
            low: dec!(1),
            close: dec!(1),
            volume: dec!(1),
            atr: dec!(0),
        }];
        let err = build_series(bars, 5).unwrap_err();
        assert!(matches!(err, DataError::DataUnavailable { required: 5, available: 1 }));
    }
}
