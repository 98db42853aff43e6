use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use privsweep_contracts::{AnalysisResult, RiskLevel, UsageRecord};
use sqlx::Row;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(2);
const MIGRATE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub enum StoreError {
    Timeout,
    Io(std::io::Error),
    Sqlx(sqlx::Error),
    Migrate(sqlx::migrate::MigrateError),
    Corrupt(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Timeout => write!(f, "store operation timed out"),
            StoreError::Io(err) => write!(f, "store io error: {}", err),
            StoreError::Sqlx(err) => write!(f, "store sql error: {}", err),
            StoreError::Migrate(err) => write!(f, "store migration error: {}", err),
            StoreError::Corrupt(msg) => write!(f, "store row corrupt: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(err) => Some(err),
            StoreError::Sqlx(err) => Some(err),
            StoreError::Migrate(err) => Some(err),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(value: sqlx::Error) -> Self {
        StoreError::Sqlx(value)
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(value: sqlx::migrate::MigrateError) -> Self {
        StoreError::Migrate(value)
    }
}

/// SQLite-backed store for privilege usage and analysis snapshots.
///
/// WAL journaling, `synchronous=NORMAL` and foreign-key enforcement are set on
/// every connection; the schema is applied idempotently on open.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    write_timeout: Duration,
}

impl Store {
    /// Opens (or creates) the database file at `path`.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        if let Some(dir) = Path::new(path).parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir).map_err(StoreError::Io)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        };
        store.migrate().await?;
        Ok(store)
    }

    /// Opens an in-memory database (for tests). The pool is pinned to a single
    /// connection so the database survives between queries.
    pub async fn open_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        tokio::time::timeout(MIGRATE_TIMEOUT, sqlx::migrate!("./migrations").run(&self.pool))
            .await
            .map_err(|_| StoreError::Timeout)??;
        Ok(())
    }

    /// Upserts a batch of usage records in one transaction. On conflict the
    /// timestamp advances to the most recent observation and call counts
    /// accumulate. Either every record lands or none does.
    pub async fn batch_record_usage(&self, records: &[UsageRecord]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }

        tokio::time::timeout(self.write_timeout, async {
            let mut tx = self.pool.begin().await?;

            for record in records {
                sqlx::query(
                    "INSERT INTO privilege_usage (timestamp, identity, privilege, call_count) \
                     VALUES (?, ?, ?, ?) \
                     ON CONFLICT(identity, privilege) DO UPDATE SET \
                         timestamp  = MAX(privilege_usage.timestamp, excluded.timestamp), \
                         call_count = privilege_usage.call_count + excluded.call_count",
                )
                .bind(record.timestamp.timestamp())
                .bind(&record.identity)
                .bind(&record.privilege)
                .bind(record.call_count)
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;
            Ok::<(), sqlx::Error>(())
        })
        .await
        .map_err(|_| StoreError::Timeout)??;

        Ok(())
    }

    /// Distinct identities with at least one observation at or after `since`.
    pub async fn observed_identities(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<String>, StoreError> {
        let identities = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT identity FROM privilege_usage WHERE timestamp >= ?",
        )
        .bind(since.timestamp())
        .fetch_all(&self.pool)
        .await?;
        Ok(identities)
    }

    /// Distinct privileges observed for `identity` at or after `since`.
    pub async fn used_privileges(
        &self,
        identity: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<String>, StoreError> {
        let privileges = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT privilege FROM privilege_usage \
             WHERE identity = ? AND timestamp >= ?",
        )
        .bind(identity)
        .bind(since.timestamp())
        .fetch_all(&self.pool)
        .await?;
        Ok(privileges)
    }

    /// Upserts an analysis snapshot; at most one row per identity.
    pub async fn save_analysis_result(&self, result: &AnalysisResult) -> Result<(), StoreError> {
        let assigned = encode_list(&result.assigned)?;
        let used = encode_list(&result.used)?;
        let unused = encode_list(&result.unused)?;

        tokio::time::timeout(
            self.write_timeout,
            sqlx::query(
                "INSERT INTO analysis_results \
                 (analysis_date, identity, assigned_privileges, used_privileges, unused_privileges, risk_level) \
                 VALUES (?, ?, ?, ?, ?, ?) \
                 ON CONFLICT(identity) DO UPDATE SET \
                     analysis_date       = excluded.analysis_date, \
                     assigned_privileges = excluded.assigned_privileges, \
                     used_privileges     = excluded.used_privileges, \
                     unused_privileges   = excluded.unused_privileges, \
                     risk_level          = excluded.risk_level",
            )
            .bind(result.analyzed_at.timestamp())
            .bind(&result.identity)
            .bind(assigned)
            .bind(used)
            .bind(unused)
            .bind(result.risk_level.as_str())
            .execute(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        Ok(())
    }

    /// The latest snapshot for every identity, ordered by identity. The unique
    /// index on identity guarantees at most one row each.
    pub async fn latest_analysis_results(&self) -> Result<Vec<AnalysisResult>, StoreError> {
        let rows = sqlx::query(
            "SELECT identity, analysis_date, assigned_privileges, used_privileges, unused_privileges, risk_level \
             FROM analysis_results ORDER BY identity",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            let identity: String = row.try_get("identity")?;
            let analysis_date: i64 = row.try_get("analysis_date")?;
            let analyzed_at = DateTime::from_timestamp(analysis_date, 0).ok_or_else(|| {
                StoreError::Corrupt(format!(
                    "analysis_date {} out of range for {}",
                    analysis_date, identity
                ))
            })?;
            let risk_raw: String = row.try_get("risk_level")?;
            let risk_level = RiskLevel::from_str(&risk_raw).map_err(|_| {
                StoreError::Corrupt(format!("risk_level {:?} for {}", risk_raw, identity))
            })?;

            results.push(AnalysisResult {
                analyzed_at,
                assigned: decode_list(row.try_get("assigned_privileges")?, &identity)?,
                used: decode_list(row.try_get("used_privileges")?, &identity)?,
                unused: decode_list(row.try_get("unused_privileges")?, &identity)?,
                risk_level,
                identity,
            });
        }
        Ok(results)
    }

    /// Timestamp of the earliest usage record, or `None` when the table is
    /// empty.
    pub async fn oldest_observation(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let min: Option<i64> =
            sqlx::query_scalar("SELECT MIN(timestamp) FROM privilege_usage")
                .fetch_one(&self.pool)
                .await?;

        match min {
            None => Ok(None),
            Some(ts) => {
                let at = DateTime::from_timestamp(ts, 0).ok_or_else(|| {
                    StoreError::Corrupt(format!("observation timestamp {} out of range", ts))
                })?;
                Ok(Some(at))
            }
        }
    }

    /// Deletes usage records strictly older than `before`; returns the count.
    pub async fn purge_old_records(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = tokio::time::timeout(
            self.write_timeout,
            sqlx::query("DELETE FROM privilege_usage WHERE timestamp < ?")
                .bind(before.timestamp())
                .execute(&self.pool),
        )
        .await
        .map_err(|_| StoreError::Timeout)??;

        Ok(result.rows_affected())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn encode_list(list: &[String]) -> Result<String, StoreError> {
    serde_json::to_string(list).map_err(|err| StoreError::Corrupt(err.to_string()))
}

fn decode_list(raw: String, identity: &str) -> Result<Vec<String>, StoreError> {
    serde_json::from_str(&raw)
        .map_err(|err| StoreError::Corrupt(format!("privilege list for {}: {}", identity, err)))
}
