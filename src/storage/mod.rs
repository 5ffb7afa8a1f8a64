use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    FromRow, Row, SqlitePool,
};
use tracing::warn;

use crate::error::CacheError;

mod memory;

pub use memory::MemoryBlockTimeStore;

pub type DbPool = SqlitePool;

/// Key-value capability behind the block time cache. A height's block time
/// never changes, so implementations only need write-once semantics.
#[async_trait]
pub trait BlockTimeStore: Send + Sync {
    async fn get(&self, height: u64) -> Result<Option<DateTime<Utc>>, CacheError>;

    async fn set(&self, height: u64, time: DateTime<Utc>) -> Result<(), CacheError>;
}

pub async fn init_pool(database_url: &str) -> Result<DbPool> {
    ensure_dir_exists(database_url)?;

    let options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("invalid DATABASE_URL {}", database_url))?
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .context("failed to connect to SQLite")?;

    apply_schema(&pool).await?;
    Ok(pool)
}

fn ensure_dir_exists(database_url: &str) -> Result<()> {
    if let Some(path) = database_url.strip_prefix("sqlite://") {
        if path != ":memory:" {
            if let Some(dir) = Path::new(path).parent() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("failed creating db directory {:?}", dir))?;
            }
        }
    }
    Ok(())
}

async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS block_times (
            height INTEGER PRIMARY KEY,
            block_time TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    verify_block_time_column(pool).await?;
    Ok(())
}

async fn verify_block_time_column(pool: &SqlitePool) -> Result<()> {
    let rows = sqlx::query("PRAGMA table_info(block_times);")
        .fetch_all(pool)
        .await?;

    let mut block_time_is_text = false;
    for row in rows {
        let name: String = row.try_get("name")?;
        let col_type: Option<String> = row.try_get("type")?;
        if name == "block_time" {
            block_time_is_text = col_type.as_deref() == Some("TEXT");
        }
    }

    if !block_time_is_text {
        warn!("block_times.block_time is not TEXT; delete/recreate DB to pick up new schema");
    }
    Ok(())
}

/// SQLite-backed block time cache that survives restarts.
#[derive(Debug, Clone)]
pub struct SqliteBlockTimeStore {
    pool: DbPool,
}

impl SqliteBlockTimeStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn open(database_url: &str) -> Result<Self> {
        Ok(Self::new(init_pool(database_url).await?))
    }

    pub async fn len(&self) -> Result<u64, CacheError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM block_times;")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl BlockTimeStore for SqliteBlockTimeStore {
    async fn get(&self, height: u64) -> Result<Option<DateTime<Utc>>, CacheError> {
        #[derive(FromRow)]
        struct BlockTimeRow {
            block_time: String,
        }

        let row = sqlx::query_as::<_, BlockTimeRow>(
            r#"
            SELECT block_time
            FROM block_times
            WHERE height = ?1;
            "#,
        )
        .bind(height_key(height))
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            DateTime::parse_from_rfc3339(&row.block_time)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|_| CacheError::Corrupt {
                    height,
                    value: row.block_time,
                })
        })
        .transpose()
    }

    async fn set(&self, height: u64, time: DateTime<Utc>) -> Result<(), CacheError> {
        sqlx::query(
            r#"
            INSERT INTO block_times (height, block_time)
            VALUES (?1, ?2)
            ON CONFLICT(height) DO NOTHING;
            "#,
        )
        .bind(height_key(height))
        .bind(time.to_rfc3339_opts(SecondsFormat::AutoSi, true))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// SQLite integers are signed; heights never get near i64::MAX.
fn height_key(height: u64) -> i64 {
    i64::try_from(height).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn temp_db_url() -> String {
        let dir = std::env::temp_dir();
        let file = format!(
            "pokt_monitor_block_times_{}.sqlite",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        );
        format!("sqlite://{}", dir.join(file).to_string_lossy())
    }

    #[tokio::test]
    async fn sqlite_store_round_trips_block_time() {
        let store = SqliteBlockTimeStore::open(&temp_db_url()).await.unwrap();
        let t = Utc.with_ymd_and_hms(2022, 6, 1, 8, 30, 15).unwrap()
            + chrono::Duration::milliseconds(250);

        assert_eq!(store.get(7).await.unwrap(), None);
        store.set(7, t).await.unwrap();
        assert_eq!(store.get(7).await.unwrap(), Some(t));
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn sqlite_store_is_write_once() {
        let store = SqliteBlockTimeStore::open(&temp_db_url()).await.unwrap();
        let first = Utc.with_ymd_and_hms(2022, 6, 1, 0, 0, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();

        store.set(9, first).await.unwrap();
        store.set(9, second).await.unwrap();
        assert_eq!(store.get(9).await.unwrap(), Some(first));
    }

    #[tokio::test]
    async fn corrupt_row_is_reported() {
        let store = SqliteBlockTimeStore::open(&temp_db_url()).await.unwrap();
        sqlx::query("INSERT INTO block_times (height, block_time) VALUES (3, 'yesterday');")
            .execute(&store.pool)
            .await
            .unwrap();

        let err = store.get(3).await.unwrap_err();
        assert!(matches!(err, CacheError::Corrupt { height: 3, .. }));
    }
}
