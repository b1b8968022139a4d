use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::{debug, info};

use super::sink::CandleSink;
use super::types::{Candle, DataError, DataResult};

// =================================================================
// Repository Implementation
// =================================================================

/// SQLite-backed kline store
pub struct KlineRepository {
    pool: SqlitePool,
}

impl KlineRepository {
    /// Open (and create if missing) the database behind `url`.
    pub async fn connect(url: &str, max_connections: u32) -> DataResult<Self> {
        let opts = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        info!("Kline store connected: {}", url);
        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connectivity check
    pub async fn ping(&self) -> DataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Ensure klines table exists
    pub async fn ensure_klines_table(&self) -> DataResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS klines (
                symbol TEXT NOT NULL,
                interval TEXT NOT NULL,
                open_time INTEGER NOT NULL,
                close_time INTEGER NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume REAL NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_klines_symbol_open_time ON klines(symbol, interval, open_time);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Number of stored candles for a symbol
    pub async fn count(&self, symbol: &str) -> DataResult<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM klines WHERE symbol = ?1")
            .bind(symbol)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Stored open times for a symbol, ascending
    pub async fn open_times(&self, symbol: &str) -> DataResult<Vec<i64>> {
        let rows = sqlx::query_scalar::<_, i64>(
            "SELECT open_time FROM klines WHERE symbol = ?1 ORDER BY open_time ASC",
        )
        .bind(symbol)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    fn validate_candle(candle: &Candle) -> DataResult<[f64; 5]> {
        if candle.close_time < candle.open_time {
            return Err(DataError::Validation(format!(
                "close_time {} before open_time {}",
                candle.close_time, candle.open_time
            )));
        }
        candle.ohlcv_f64().ok_or_else(|| {
            DataError::Validation(format!("candle {} not representable as f64", candle.open_time))
        })
    }
}

#[async_trait]
impl CandleSink for KlineRepository {
    async fn insert_batch(
        &self,
        symbol: &str,
        interval: &str,
        candles: &[Candle],
    ) -> DataResult<usize> {
        if candles.is_empty() {
            return Ok(0);
        }

        // Convert up front so a bad record aborts before the transaction opens.
        let rows = candles
            .iter()
            .map(|c| Self::validate_candle(c).map(|ohlcv| (c, ohlcv)))
            .collect::<DataResult<Vec<_>>>()?;

        let mut tx = self.pool.begin().await?;
        for (candle, ohlcv) in &rows {
            let [open, high, low, close, volume] = *ohlcv;
            sqlx::query(
                r#"
                INSERT INTO klines
                (symbol, interval, open_time, close_time, open, high, low, close, volume)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )
            .bind(symbol)
            .bind(interval)
            .bind(candle.open_time)
            .bind(candle.close_time)
            .bind(open)
            .bind(high)
            .bind(low)
            .bind(close)
            .bind(volume)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!("Inserted {} klines for {} {}", rows.len(), symbol, interval);
        Ok(rows.len())
    }

    async fn truncate_all(&self) -> DataResult<u64> {
        let result = sqlx::query("DELETE FROM klines").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    async fn memory_repository() -> KlineRepository {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let repo = KlineRepository::from_pool(pool);
        repo.ensure_klines_table().await.unwrap();
        repo
    }

    fn candle(open_time: i64) -> Candle {
        Candle {
            open_time,
            close_time: open_time + 59_999,
            open: dec!(100.5),
            high: dec!(101),
            low: dec!(99.25),
            close: dec!(100),
            volume: dec!(12.5),
            quote_volume: dec!(1250),
            trade_count: 42,
            taker_buy_base_volume: dec!(6),
            taker_buy_quote_volume: dec!(600),
            is_closed: true,
        }
    }

    #[tokio::test]
    async fn test_insert_batch_and_count() {
        let repo = memory_repository().await;
        let batch = vec![candle(0), candle(60_000), candle(120_000)];

        let written = repo.insert_batch("BTCUSDT", "1m", &batch).await.unwrap();

        assert_eq!(written, 3);
        assert_eq!(repo.count("BTCUSDT").await.unwrap(), 3);
        assert_eq!(repo.count("ETHUSDT").await.unwrap(), 0);
        assert_eq!(repo.open_times("BTCUSDT").await.unwrap(), vec![0, 60_000, 120_000]);
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let repo = memory_repository().await;
        assert_eq!(repo.insert_batch("BTCUSDT", "1m", &[]).await.unwrap(), 0);
        assert_eq!(repo.count("BTCUSDT").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_invalid_candle_rejects_whole_batch() {
        let repo = memory_repository().await;
        let mut broken = candle(60_000);
        broken.close_time = 0;

        let result = repo.insert_batch("BTCUSDT", "1m", &[candle(0), broken]).await;

        assert!(matches!(result, Err(DataError::Validation(_))));
        assert_eq!(repo.count("BTCUSDT").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_truncate_all() {
        let repo = memory_repository().await;
        repo.insert_batch("BTCUSDT", "1m", &[candle(0), candle(60_000)])
            .await
            .unwrap();

        assert_eq!(repo.truncate_all().await.unwrap(), 2);
        assert_eq!(repo.count("BTCUSDT").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ping() {
        let repo = memory_repository().await;
        assert!(repo.ping().await.is_ok());
    }
}
