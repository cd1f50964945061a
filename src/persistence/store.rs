//! Durable key-value ledger and append-only order journal.
//!
//! The ledger carries everything that must survive a crash: idempotency
//! markers, cooldown timestamps, and the stream-pushed account snapshot.
//! The journal records every order-lifecycle transition for offline audit.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use tracing::debug;

/// One row of the append-only order journal.
#[derive(Debug, Clone)]
pub struct OrderRecord {
    pub ts: DateTime<Utc>,
    pub idem_key: String,
    pub cl_ord_id: String,
    pub ord_id: Option<String>,
    pub inst_id: String,
    pub side: String,
    pub pos_side: String,
    pub sz: Decimal,
    pub px: Option<Decimal>,
    pub state: String,
    pub note: Option<String>,
}

/// Durable map plus order journal.
///
/// Writes are per-key upserts; no cross-key transactions are needed because
/// each key's lifecycle is self-contained.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn kv_get(&self, key: &str) -> Result<Option<String>>;
    async fn kv_set(&self, key: &str, value: &str) -> Result<()>;
    async fn kv_delete(&self, key: &str) -> Result<()>;
    async fn record_order(&self, rec: &OrderRecord) -> Result<()>;

    async fn kv_get_decimal(&self, key: &str) -> Result<Option<Decimal>> {
        Ok(self
            .kv_get(key)
            .await?
            .and_then(|v| Decimal::from_str(v.trim()).ok()))
    }

    async fn kv_get_i64(&self, key: &str) -> Result<Option<i64>> {
        Ok(self
            .kv_get(key)
            .await?
            .and_then(|v| v.trim().parse::<i64>().ok()))
    }
}

/// SQLite-backed ledger. WAL mode keeps stream-task writes and control-loop
/// reads from blocking each other.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `path`.
    pub async fn open(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.create_tables().await?;
        Ok(store)
    }

    /// Private in-memory database, used by tests and dry runs.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new().in_memory(true);
        // One connection only: each sqlite memory connection is its own db
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.create_tables().await?;
        Ok(store)
    }

    async fn create_tables(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                k          TEXT PRIMARY KEY,
                v          TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS orders (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                ts         TEXT NOT NULL,
                idem_key   TEXT NOT NULL,
                cl_ord_id  TEXT NOT NULL,
                ord_id     TEXT,
                inst_id    TEXT NOT NULL,
                side       TEXT NOT NULL,
                pos_side   TEXT NOT NULL,
                sz         TEXT NOT NULL,
                px         TEXT,
                state      TEXT NOT NULL,
                note       TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Most recent journal rows, newest first.
    pub async fn recent_orders(&self, limit: u32) -> Result<Vec<OrderRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT ts, idem_key, cl_ord_id, ord_id, inst_id, side, pos_side, sz, px, state, note
            FROM orders
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let ts: String = row.try_get("ts")?;
            let sz: String = row.try_get("sz")?;
            let px: Option<String> = row.try_get("px")?;
            records.push(OrderRecord {
                ts: DateTime::parse_from_rfc3339(&ts)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
                idem_key: row.try_get("idem_key")?,
                cl_ord_id: row.try_get("cl_ord_id")?,
                ord_id: row.try_get("ord_id")?,
                inst_id: row.try_get("inst_id")?,
                side: row.try_get("side")?,
                pos_side: row.try_get("pos_side")?,
                sz: Decimal::from_str(&sz).unwrap_or_default(),
                px: px.and_then(|p| Decimal::from_str(&p).ok()),
                state: row.try_get("state")?,
                note: row.try_get("note")?,
            });
        }
        Ok(records)
    }
}

#[async_trait]
impl Ledger for SqliteStore {
    async fn kv_get(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT v FROM kv WHERE k = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(r) => Some(r.try_get("v")?),
            None => None,
        })
    }

    async fn kv_set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO kv (k, v, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(k) DO UPDATE SET v = excluded.v, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn kv_delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv WHERE k = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_order(&self, rec: &OrderRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (ts, idem_key, cl_ord_id, ord_id, inst_id, side, pos_side, sz, px, state, note)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(rec.ts.to_rfc3339())
        .bind(&rec.idem_key)
        .bind(&rec.cl_ord_id)
        .bind(&rec.ord_id)
        .bind(&rec.inst_id)
        .bind(&rec.side)
        .bind(&rec.pos_side)
        .bind(rec.sz.to_string())
        .bind(rec.px.map(|p| p.to_string()))
        .bind(&rec.state)
        .bind(&rec.note)
        .execute(&self.pool)
        .await?;

        debug!(
            idem_key = %rec.idem_key,
            cl_ord_id = %rec.cl_ord_id,
            state = %rec.state,
            "order journal row appended"
        );
        Ok(())
    }
}
