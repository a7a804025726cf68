//! libSQL storage layer for monitored targets and their observation history.
//!
//! The [`Storage`] struct wraps a local libSQL database. Observations are
//! append-only: rows are never updated except for the `is_current` flag, and
//! are only removed by the cascade when their target is deleted.
//!
//! **Access rules:**
//! - `pagewatch serve` / target management: read-write via [`Storage::open`]
//! - history inspection: read-only via [`Storage::open_readonly`]

mod migrations;

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database, TransactionBehavior, params};
use pagewatch_shared::{MonitoredTarget, Observation, PageWatchError, Result, Schedule, TargetId};
use uuid::Uuid;

/// How long a write waits for another process's lock before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

fn storage_err(e: libsql::Error) -> PageWatchError {
    PageWatchError::Storage(e.to_string())
}

/// Fixed-width RFC 3339 timestamp so string order matches time order.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PageWatchError::Storage(format!("invalid date: {e}")))
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PageWatchError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.enable_foreign_keys().await?;
        storage.set_busy_timeout().await?;
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PageWatchError::Storage(format!(
                "database not found at {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: true,
        };
        storage.set_busy_timeout().await?;
        Ok(storage)
    }

    /// Cascading target deletes rely on SQLite foreign key enforcement.
    async fn enable_foreign_keys(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// `serve` shares the file with one-shot commands; wait for their locks.
    async fn set_busy_timeout(&self) -> Result<()> {
        let mut rows = self
            .conn
            .query(
                &format!("PRAGMA busy_timeout = {}", BUSY_TIMEOUT.as_millis()),
                params![],
            )
            .await
            .map_err(storage_err)?;
        rows.next().await.map_err(storage_err)?;
        Ok(())
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        PageWatchError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(PageWatchError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Target operations
    // -----------------------------------------------------------------------

    /// Insert a new monitored target.
    pub async fn insert_target(&self, target: &MonitoredTarget) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO targets (id, url, selector, schedule_json, active, custom_instruction, created_at, activated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    target.id.to_string(),
                    target.url.as_str(),
                    target.selector.as_str(),
                    target.schedule.to_json(),
                    i64::from(target.active),
                    target.custom_instruction.as_deref(),
                    timestamp(target.created_at),
                    timestamp(target.activated_at),
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Get a target by ID.
    pub async fn get_target(&self, id: &TargetId) -> Result<Option<MonitoredTarget>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, url, selector, schedule_json, active, custom_instruction, created_at, activated_at
                 FROM targets WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_target(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// List all targets, oldest first.
    pub async fn list_targets(&self) -> Result<Vec<MonitoredTarget>> {
        self.query_targets(
            "SELECT id, url, selector, schedule_json, active, custom_instruction, created_at, activated_at
             FROM targets ORDER BY created_at",
        )
        .await
    }

    /// List targets whose active flag is set, oldest first.
    pub async fn list_active_targets(&self) -> Result<Vec<MonitoredTarget>> {
        self.query_targets(
            "SELECT id, url, selector, schedule_json, active, custom_instruction, created_at, activated_at
             FROM targets WHERE active = 1 ORDER BY created_at",
        )
        .await
    }

    async fn query_targets(&self, sql: &str) -> Result<Vec<MonitoredTarget>> {
        let mut rows = self.conn.query(sql, params![]).await.map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(row_to_target(&row)?);
        }
        Ok(results)
    }

    /// Set a target's active flag. Returns `false` if the target does not exist.
    ///
    /// Going from paused to active stamps `activated_at`, so a running
    /// scheduler re-registers the target even if it never saw the pause.
    pub async fn set_active(&self, id: &TargetId, active: bool) -> Result<bool> {
        self.check_writable()?;
        let changed = self
            .conn
            .execute(
                "UPDATE targets
                 SET activated_at = CASE WHEN ?1 = 1 AND active = 0 THEN ?3 ELSE activated_at END,
                     active = ?1
                 WHERE id = ?2",
                params![i64::from(active), id.to_string(), timestamp(Utc::now())],
            )
            .await
            .map_err(storage_err)?;
        Ok(changed > 0)
    }

    /// Delete a target and, by cascade, its observations.
    /// Returns `false` if the target does not exist.
    pub async fn delete_target(&self, id: &TargetId) -> Result<bool> {
        self.check_writable()?;
        let changed = self
            .conn
            .execute("DELETE FROM targets WHERE id = ?1", params![id.to_string()])
            .await
            .map_err(storage_err)?;
        Ok(changed > 0)
    }

    /// Replace (or clear, with `None`) a target's custom summarization instruction.
    pub async fn set_custom_instruction(
        &self,
        id: &TargetId,
        instruction: Option<&str>,
    ) -> Result<bool> {
        self.check_writable()?;
        let instruction = instruction.map(str::trim).filter(|s| !s.is_empty());
        let changed = self
            .conn
            .execute(
                "UPDATE targets SET custom_instruction = ?1 WHERE id = ?2",
                params![instruction, id.to_string()],
            )
            .await
            .map_err(storage_err)?;
        Ok(changed > 0)
    }

    /// The target's custom summarization instruction, if any.
    pub async fn custom_instruction(&self, id: &TargetId) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT custom_instruction FROM targets WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<String>(0).ok().filter(|s| !s.is_empty())),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    // -----------------------------------------------------------------------
    // Observation operations
    // -----------------------------------------------------------------------

    /// Fingerprint of the target's most recent observation.
    ///
    /// Only the latest row is considered, current or not. Returns `None` when
    /// the target has no observations or the latest one records a failure.
    pub async fn current_fingerprint(&self, target_id: &TargetId) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT content_hash FROM observations
                 WHERE target_id = ?1
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT 1",
                params![target_id.to_string()],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<String>(0).ok()),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Clear the current flag on the target's current observation.
    /// Idempotent; returns the number of rows demoted (0 or 1).
    pub async fn demote_current(&self, target_id: &TargetId) -> Result<u64> {
        self.check_writable()?;
        self.conn
            .execute(
                "UPDATE observations SET is_current = 0 WHERE target_id = ?1 AND is_current = 1",
                params![target_id.to_string()],
            )
            .await
            .map_err(storage_err)
    }

    /// Demote the current observation and insert a new current one, atomically.
    pub async fn insert_observation(
        &self,
        target_id: &TargetId,
        content: &str,
        fingerprint: Option<&str>,
        summary: Option<&str>,
    ) -> Result<Observation> {
        self.check_writable()?;

        let observation = Observation {
            id: Uuid::now_v7().to_string(),
            target_id: *target_id,
            content: content.to_string(),
            fingerprint: fingerprint.map(String::from),
            summary: summary.map(String::from),
            created_at: Utc::now(),
            is_current: true,
        };
        let target_key = target_id.to_string();

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .await
            .map_err(storage_err)?;
        let written = async {
            tx.execute(
                "UPDATE observations SET is_current = 0 WHERE target_id = ?1 AND is_current = 1",
                params![target_key.as_str()],
            )
            .await?;
            tx.execute(
                "INSERT INTO observations (id, target_id, content, content_hash, summary, created_at, is_current)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1)",
                params![
                    observation.id.as_str(),
                    target_key.as_str(),
                    observation.content.as_str(),
                    observation.fingerprint.as_deref(),
                    observation.summary.as_deref(),
                    timestamp(observation.created_at),
                ],
            )
            .await?;
            Ok::<(), libsql::Error>(())
        }
        .await;

        match written {
            Ok(()) => tx.commit().await.map_err(storage_err)?,
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(error = %rollback, "rollback after failed insert also failed");
                }
                return Err(storage_err(e));
            }
        }

        Ok(observation)
    }

    /// Most recent observations for a target, newest first.
    pub async fn list_recent(
        &self,
        target_id: &TargetId,
        limit: u32,
        only_current: bool,
    ) -> Result<Vec<Observation>> {
        let sql = if only_current {
            "SELECT id, target_id, content, content_hash, summary, created_at, is_current
             FROM observations WHERE target_id = ?1 AND is_current = 1
             ORDER BY created_at DESC, rowid DESC LIMIT ?2"
        } else {
            "SELECT id, target_id, content, content_hash, summary, created_at, is_current
             FROM observations WHERE target_id = ?1
             ORDER BY created_at DESC, rowid DESC LIMIT ?2"
        };

        let mut rows = self
            .conn
            .query(sql, params![target_id.to_string(), limit])
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(row_to_observation(&row)?);
        }
        Ok(results)
    }
}

/// Convert a database row to a [`MonitoredTarget`].
fn row_to_target(row: &libsql::Row) -> Result<MonitoredTarget> {
    let id: String = row.get(0).map_err(storage_err)?;
    let schedule_json: String = row.get(3).map_err(storage_err)?;
    let created_at = parse_timestamp(&row.get::<String>(6).map_err(storage_err)?)?;
    let activated_at = match row.get::<String>(7) {
        Ok(stamp) => parse_timestamp(&stamp)?,
        Err(_) => created_at,
    };

    Ok(MonitoredTarget {
        id: id
            .parse()
            .map_err(|e| PageWatchError::Storage(format!("invalid target id {id}: {e}")))?,
        url: row.get::<String>(1).map_err(storage_err)?,
        selector: row.get::<String>(2).map_err(storage_err)?,
        schedule: Schedule::from_json(&schedule_json)?,
        active: row.get::<i64>(4).map_err(storage_err)? != 0,
        custom_instruction: row.get::<String>(5).ok(),
        created_at,
        activated_at,
    })
}

/// Convert a database row to an [`Observation`].
fn row_to_observation(row: &libsql::Row) -> Result<Observation> {
    let target_id: String = row.get(1).map_err(storage_err)?;
    let created_at: String = row.get(5).map_err(storage_err)?;

    Ok(Observation {
        id: row.get::<String>(0).map_err(storage_err)?,
        target_id: target_id
            .parse()
            .map_err(|e| PageWatchError::Storage(format!("invalid target id {target_id}: {e}")))?,
        content: row.get::<String>(2).map_err(storage_err)?,
        fingerprint: row.get::<String>(3).ok(),
        summary: row.get::<String>(4).ok(),
        created_at: parse_timestamp(&created_at)?,
        is_current: row.get::<i64>(6).map_err(storage_err)? != 0,
    })
}
