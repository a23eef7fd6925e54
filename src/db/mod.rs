//! Event store backed by SQLite

mod schema;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite, SqlitePool};
use tracing::{debug, info, warn};

use crate::config::DatabaseConfig;
use crate::error::Result;

/// Connection state recorded for an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnState {
    Disconnect = 0,
    Connect = 1,
}

impl ConnState {
    fn from_i64(value: i64) -> Self {
        if value == 1 {
            ConnState::Connect
        } else {
            ConnState::Disconnect
        }
    }
}

/// A connect or disconnect occurrence extracted from a log line.
///
/// `acctid` is None for disconnects: the log line carries only the IP, so
/// the event stays unattributed until correlated by address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub acctid: Option<i64>,
    pub state: ConnState,
    pub ipaddr: String,
    pub timestamp: DateTime<Utc>,
}

/// An event pending insertion, before the store assigns an id.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub acctid: Option<i64>,
    pub state: ConnState,
    pub ipaddr: String,
    pub timestamp: DateTime<Utc>,
}

/// Ingestion progress marker: the most recently completed log file.
#[derive(Debug, Clone, Serialize)]
pub struct Checkpoint {
    pub last_file: String,
    pub last_scan: DateTime<Utc>,
}

#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = SqlitePool::connect(&format!("sqlite:{}?mode=rwc", config.url)).await?;
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<()> {
        // WAL lets ingestion workers write while lookups read
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&self.pool)
            .await?;
        sqlx::query("PRAGMA synchronous=NORMAL")
            .execute(&self.pool)
            .await?;

        sqlx::query(schema::CREATE_USER_TABLE)
            .execute(&self.pool)
            .await?;
        sqlx::query(schema::CREATE_EVENT_TABLE)
            .execute(&self.pool)
            .await?;
        sqlx::query(schema::CREATE_CHECKPOINT_TABLE)
            .execute(&self.pool)
            .await?;
        sqlx::query(schema::CREATE_INDEX_ACCTID)
            .execute(&self.pool)
            .await?;
        sqlx::query(schema::CREATE_INDEX_IPADDR)
            .execute(&self.pool)
            .await?;
        sqlx::query(schema::CREATE_INDEX_TIMESTAMP)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Create the user row if absent. Safe to call repeatedly.
    pub async fn upsert_user(&self, account: i64) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO user (account) VALUES (?)")
            .bind(account)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn insert_event(&self, event: &NewEvent) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO event (acctid, state, ipaddr, timestamp) VALUES (?, ?, ?, ?)",
        )
        .bind(event.acctid)
        .bind(event.state as i64)
        .bind(&event.ipaddr)
        .bind(event.timestamp.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Commit one file's worth of events atomically. The checkpoint must not
    /// advance unless this returns Ok.
    pub async fn insert_file_events(&self, events: &[NewEvent]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        for event in events {
            sqlx::query("INSERT INTO event (acctid, state, ipaddr, timestamp) VALUES (?, ?, ?, ?)")
                .bind(event.acctid)
                .bind(event.state as i64)
                .bind(&event.ipaddr)
                .bind(event.timestamp.timestamp_millis())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(events.len() as u64)
    }

    /// Remove duplicate events, keeping the lowest id in each group of
    /// identical timestamps. Single statement, so the pass is all-or-nothing.
    pub async fn deduplicate_events(&self) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM event WHERE id NOT IN (SELECT MIN(id) FROM event GROUP BY timestamp)",
        )
        .execute(&self.pool)
        .await?;

        let deleted = result.rows_affected();
        if deleted > 0 {
            info!("Removed {} duplicate events", deleted);
        }
        Ok(deleted)
    }

    pub async fn events_by_account(&self, acctid: i64) -> Result<Vec<Event>> {
        let rows: Vec<(i64, Option<i64>, i64, String, i64)> = sqlx::query_as(
            "SELECT id, acctid, state, ipaddr, timestamp FROM event WHERE acctid = ?",
        )
        .bind(acctid)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(row_to_event).collect())
    }

    pub async fn events_by_ip(&self, ipaddr: &str) -> Result<Vec<Event>> {
        let rows: Vec<(i64, Option<i64>, i64, String, i64)> = sqlx::query_as(
            "SELECT id, acctid, state, ipaddr, timestamp FROM event WHERE ipaddr = ?",
        )
        .bind(ipaddr)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(row_to_event).collect())
    }

    /// Distinct IPs an account has connected from.
    pub async fn ips_by_account(&self, acctid: i64) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT ipaddr FROM event WHERE acctid = ?")
                .bind(acctid)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(ip,)| ip).collect())
    }

    /// Distinct accounts seen on an IP. Unattributed disconnects are skipped.
    pub async fn accounts_by_ip(&self, ipaddr: &str) -> Result<Vec<i64>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT DISTINCT acctid FROM event WHERE ipaddr = ? AND acctid IS NOT NULL",
        )
        .bind(ipaddr)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(acct,)| acct).collect())
    }

    /// Read the ingestion checkpoint. On the first run against a fresh
    /// database the schema may not exist yet; initialize it once and retry
    /// the read before giving up.
    pub async fn get_checkpoint(&self) -> Result<Option<Checkpoint>> {
        match self.fetch_checkpoint().await {
            Ok(checkpoint) => Ok(checkpoint),
            Err(e) if is_missing_schema(&e) => {
                warn!("Schema missing on first read, initializing database");
                self.run_migrations().await?;
                Ok(self.fetch_checkpoint().await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn fetch_checkpoint(&self) -> std::result::Result<Option<Checkpoint>, sqlx::Error> {
        let row: Option<(String, i64)> =
            sqlx::query_as("SELECT last_file, last_scan FROM checkpoint WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(last_file, last_scan)| Checkpoint {
            last_file,
            last_scan: DateTime::from_timestamp_millis(last_scan).unwrap_or_else(Utc::now),
        }))
    }

    pub async fn set_checkpoint(&self, last_file: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO checkpoint (id, last_file, last_scan) VALUES (1, ?, ?)
            ON CONFLICT(id) DO UPDATE SET last_file = excluded.last_file, last_scan = excluded.last_scan
            "#,
        )
        .bind(last_file)
        .bind(at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        debug!("Checkpoint advanced to {}", last_file);
        Ok(())
    }

    pub async fn user_count(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM user")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    pub async fn event_count(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM event")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    #[cfg(test)]
    pub(crate) async fn open_in_memory() -> Result<Self> {
        // Single connection: each in-memory connection is its own database
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }
}

fn row_to_event((id, acctid, state, ipaddr, timestamp): (i64, Option<i64>, i64, String, i64)) -> Event {
    Event {
        id,
        acctid,
        state: ConnState::from_i64(state),
        ipaddr,
        timestamp: DateTime::from_timestamp_millis(timestamp).unwrap_or_else(Utc::now),
    }
}

fn is_missing_schema(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => db_err.message().contains("no such table"),
        _ => false,
    }
}
