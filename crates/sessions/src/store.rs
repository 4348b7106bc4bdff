//! Durable credential snapshot store.

use std::{
    fmt,
    str::FromStr,
    time::{SystemTime, UNIX_EPOCH},
};

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
};

use crate::error::{Result, SessionError};

/// Lifecycle status stored next to a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotStatus {
    Active,
    Inactive,
    /// The blob failed to decode; restores refuse it until cleared.
    Corrupt,
}

impl SnapshotStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Corrupt => "corrupt",
        }
    }
}

impl fmt::Display for SnapshotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SnapshotStatus {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "corrupt" => Ok(Self::Corrupt),
            other => Err(SessionError::Store(format!(
                "unknown snapshot status '{other}'"
            ))),
        }
    }
}

/// One durable row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRecord {
    pub id: String,
    pub status: SnapshotStatus,
    pub blob: Vec<u8>,
    /// Unix milliseconds.
    pub updated_at: u64,
}

/// Row metadata without the blob, for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSummary {
    pub id: String,
    pub status: SnapshotStatus,
    pub size: usize,
    pub updated_at: u64,
}

/// Key-value store keyed by session id.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn upsert(&self, id: &str, status: SnapshotStatus, blob: &[u8]) -> Result<()>;
    async fn set_status(&self, id: &str, status: SnapshotStatus) -> Result<()>;
    async fn find(&self, id: &str) -> Result<Option<SnapshotRecord>>;
    /// Returns whether a row was removed.
    async fn delete(&self, id: &str) -> Result<bool>;
    async fn list(&self) -> Result<Vec<SnapshotSummary>>;
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ── SQLite-backed store ─────────────────────────────────────────────

pub struct SqliteSnapshotStore {
    pool: sqlx::SqlitePool,
}

#[derive(sqlx::FromRow)]
struct SnapshotRow {
    id: String,
    status: String,
    blob: Vec<u8>,
    updated_at: i64,
}

impl TryFrom<SnapshotRow> for SnapshotRecord {
    type Error = SessionError;

    fn try_from(r: SnapshotRow) -> Result<Self> {
        Ok(Self {
            status: r.status.parse()?,
            id: r.id,
            blob: r.blob,
            updated_at: r.updated_at as u64,
        })
    }
}

impl SqliteSnapshotStore {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to `url` and make sure the table exists.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = sqlx::SqlitePool::connect(url).await?;
        Self::init(&pool).await?;
        Ok(Self::new(pool))
    }

    /// Private in-memory database on a single connection.
    pub async fn in_memory() -> Result<Self> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::init(&pool).await?;
        Ok(Self::new(pool))
    }

    /// Create the `auth_snapshots` table if it doesn't exist.
    pub async fn init(pool: &sqlx::SqlitePool) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS auth_snapshots (
                id         TEXT PRIMARY KEY,
                status     TEXT NOT NULL,
                blob       BLOB NOT NULL,
                updated_at INTEGER NOT NULL
            )"#,
        )
        .execute(pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for SqliteSnapshotStore {
    async fn upsert(&self, id: &str, status: SnapshotStatus, blob: &[u8]) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO auth_snapshots (id, status, blob, updated_at)
               VALUES (?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 status = excluded.status,
                 blob = excluded.blob,
                 updated_at = excluded.updated_at"#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(blob)
        .bind(now_ms() as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_status(&self, id: &str, status: SnapshotStatus) -> Result<()> {
        sqlx::query("UPDATE auth_snapshots SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(now_ms() as i64)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find(&self, id: &str) -> Result<Option<SnapshotRecord>> {
        sqlx::query_as::<_, SnapshotRow>("SELECT * FROM auth_snapshots WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(SnapshotRecord::try_from)
            .transpose()
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let done = sqlx::query("DELETE FROM auth_snapshots WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn list(&self) -> Result<Vec<SnapshotSummary>> {
        sqlx::query_as::<_, SnapshotRow>("SELECT * FROM auth_snapshots ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|row| {
                let size = row.blob.len();
                SnapshotRecord::try_from(row).map(|r| SnapshotSummary {
                    id: r.id,
                    status: r.status,
                    size,
                    updated_at: r.updated_at,
                })
            })
            .collect()
    }
}
