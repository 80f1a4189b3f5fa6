use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use rusqlite::{params, Connection};
use tracing::debug;

use crate::error::{KeelraceError, Result};
use crate::profile::{Profile, ProfilePatch, ProfileStore, ROUND_STAT_RETENTION};
use crate::statistics::RoundStatistic;

/// Guest-local persistence with the same shape as the remote profile store,
/// backed by sqlite. Best-effort by design: gameplay never depends on a
/// write landing.
#[derive(Debug)]
pub struct StatsDb {
    conn: Mutex<Connection>,
}

impl StatsDb {
    /// Open (or create) the database at the platform data directory.
    pub fn new() -> Result<Self> {
        let db_path = Self::default_db_path().unwrap_or_else(|| PathBuf::from("keelrace_stats.db"));
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| KeelraceError::storage(format!("failed to create state dir: {e}")))?;
        }
        Self::open(Connection::open(&db_path)?)
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Result<Self> {
        Self::open(Connection::open(path.into())?)
    }

    /// In-memory database for tests.
    pub fn in_memory() -> Result<Self> {
        Self::open(Connection::open_in_memory()?)
    }

    fn open(conn: Connection) -> Result<Self> {
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS round_stats (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                wpm INTEGER NOT NULL,
                gross_wpm INTEGER NOT NULL,
                accuracy REAL NOT NULL,
                wpm_per_second TEXT NOT NULL,
                gross_wpm_per_second TEXT NOT NULL,
                errors TEXT NOT NULL,
                total_occurrences TEXT NOT NULL,
                mistakes_made TEXT NOT NULL,
                consistency REAL NOT NULL
            )
            "#,
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_round_stats_user ON round_stats(user_id, id)",
            [],
        )?;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS profiles (
                user_id TEXT PRIMARY KEY,
                data TEXT NOT NULL
            )
            "#,
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn default_db_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "keelrace").map(|pd| pd.data_local_dir().join("stats.db"))
    }

    fn load_profile(conn: &Connection, user_id: &str) -> Result<Profile> {
        let mut stmt = conn.prepare("SELECT data FROM profiles WHERE user_id = ?1")?;
        let mut rows = stmt.query([user_id])?;
        match rows.next()? {
            Some(row) => {
                let data: String = row.get(0)?;
                Ok(serde_json::from_str(&data)?)
            }
            None => Ok(Profile::default()),
        }
    }

    fn store_profile(conn: &Connection, user_id: &str, profile: &Profile) -> Result<()> {
        let data = serde_json::to_string(profile)?;
        conn.execute(
            r#"
            INSERT INTO profiles (user_id, data) VALUES (?1, ?2)
            ON CONFLICT(user_id) DO UPDATE SET data = excluded.data
            "#,
            params![user_id, data],
        )
        .map_err(map_quota)?;
        Ok(())
    }

    fn json_column<T>(row: &rusqlite::Row<'_>, idx: usize, field: &str) -> rusqlite::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let raw: String = row.get(idx)?;
        serde_json::from_str(&raw).map_err(|_| {
            rusqlite::Error::InvalidColumnType(idx, field.to_string(), rusqlite::types::Type::Text)
        })
    }

    fn row_to_stat(row: &rusqlite::Row<'_>) -> rusqlite::Result<RoundStatistic> {
        let created_at: String = row.get(1)?;
        let timestamp = DateTime::parse_from_rfc3339(&created_at)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        Ok(RoundStatistic {
            id: row.get::<_, i64>(0)? as u64,
            timestamp,
            wpm: row.get::<_, i64>(2)? as u32,
            gross_wpm: row.get::<_, i64>(3)? as u32,
            accuracy: row.get(4)?,
            wpm_per_second: Self::json_column(row, 5, "wpm_per_second")?,
            gross_wpm_per_second: Self::json_column(row, 6, "gross_wpm_per_second")?,
            errors: Self::json_column(row, 7, "errors")?,
            total_occurrences: Self::json_column(row, 8, "total_occurrences")?,
            mistakes_made: Self::json_column(row, 9, "mistakes_made")?,
            consistency: row.get(10)?,
        })
    }
}

/// Sqlite's disk-full family maps to the distinct quota error so callers
/// can downgrade it to a warning.
fn map_quota(err: rusqlite::Error) -> KeelraceError {
    if let rusqlite::Error::SqliteFailure(inner, _) = &err {
        if inner.code == rusqlite::ErrorCode::DiskFull {
            return KeelraceError::StorageQuota(err.to_string());
        }
    }
    err.into()
}

#[async_trait]
impl ProfileStore for StatsDb {
    async fn get_profile(&self, user_id: &str) -> Result<Profile> {
        let conn = self.conn.lock().expect("stats db poisoned");
        Self::load_profile(&conn, user_id)
    }

    async fn update_profile(&self, user_id: &str, patch: ProfilePatch) -> Result<()> {
        let conn = self.conn.lock().expect("stats db poisoned");
        let mut profile = Self::load_profile(&conn, user_id)?;
        patch.apply_to(&mut profile);
        Self::store_profile(&conn, user_id, &profile)
    }

    async fn append_round_stat(&self, user_id: &str, stat: &RoundStatistic) -> Result<()> {
        let conn = self.conn.lock().expect("stats db poisoned");

        // Trim to the retention limit before inserting, oldest rows first.
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM round_stats WHERE user_id = ?1",
            [user_id],
            |row| row.get(0),
        )?;
        let excess = (count as usize).saturating_sub(ROUND_STAT_RETENTION);
        if excess > 0 {
            let deleted = conn.execute(
                r#"
                DELETE FROM round_stats WHERE id IN (
                    SELECT id FROM round_stats WHERE user_id = ?1 ORDER BY id ASC LIMIT ?2
                )
                "#,
                params![user_id, excess as i64],
            )?;
            debug!(deleted, "trimmed old round stats at retention limit");
        }

        conn.execute(
            r#"
            INSERT INTO round_stats
            (user_id, created_at, wpm, gross_wpm, accuracy, wpm_per_second,
             gross_wpm_per_second, errors, total_occurrences, mistakes_made, consistency)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                user_id,
                stat.timestamp.to_rfc3339(),
                stat.wpm,
                stat.gross_wpm,
                stat.accuracy,
                serde_json::to_string(&stat.wpm_per_second)?,
                serde_json::to_string(&stat.gross_wpm_per_second)?,
                serde_json::to_string(&stat.errors)?,
                serde_json::to_string(&stat.total_occurrences)?,
                serde_json::to_string(&stat.mistakes_made)?,
                stat.consistency,
            ],
        )
        .map_err(map_quota)?;
        Ok(())
    }

    async fn get_recent_round_stats(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<RoundStatistic>> {
        let conn = self.conn.lock().expect("stats db poisoned");
        let mut stmt = conn.prepare(
            r#"
            SELECT id, created_at, wpm, gross_wpm, accuracy, wpm_per_second,
                   gross_wpm_per_second, errors, total_occurrences, mistakes_made, consistency
            FROM round_stats
            WHERE user_id = ?1
            ORDER BY id DESC
            LIMIT ?2
            "#,
        )?;
        let mut stats: Vec<RoundStatistic> = stmt
            .query_map(params![user_id, limit as i64], Self::row_to_stat)?
            .collect::<rusqlite::Result<_>>()?;
        // fetched newest-first for the LIMIT; callers get oldest-first
        stats.reverse();
        Ok(stats)
    }
}
