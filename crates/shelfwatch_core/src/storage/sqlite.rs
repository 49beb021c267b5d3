//! SQLite-backed storage.
//!
//! # Responsibility
//! - Open file or in-memory caches and migrate them before first use.
//! - Persist blobs in the single `kv_blobs` table.
//!
//! # Invariants
//! - Returned storages have migrations fully applied.
//! - One connection is shared behind a mutex; no statement outlives a call.

use super::migrations::apply_migrations;
use super::{lock, Storage, StorageResult};
use log::{error, info};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Opens a cache file and applies all pending migrations.
    ///
    /// # Side effects
    /// - Emits `cache_open` logging events with duration and status.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        Self::open_with("file", || Connection::open(path))
    }

    /// Opens a private in-memory cache.
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::open_with("memory", Connection::open_in_memory)
    }

    fn open_with(
        mode: &'static str,
        connect: impl FnOnce() -> rusqlite::Result<Connection>,
    ) -> StorageResult<Self> {
        let started_at = Instant::now();
        info!("event=cache_open module=storage status=start mode={mode}");

        let mut conn = match connect() {
            Ok(conn) => conn,
            Err(err) => {
                error!(
                    "event=cache_open module=storage status=error mode={} duration_ms={} error_code=open_failed error={}",
                    mode,
                    started_at.elapsed().as_millis(),
                    err
                );
                return Err(err.into());
            }
        };

        if let Err(err) = bootstrap_connection(&mut conn) {
            error!(
                "event=cache_open module=storage status=error mode={} duration_ms={} error_code=bootstrap_failed error={}",
                mode,
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err);
        }

        info!(
            "event=cache_open module=storage status=ok mode={} duration_ms={}",
            mode,
            started_at.elapsed().as_millis()
        );
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn bootstrap_connection(conn: &mut Connection) -> StorageResult<()> {
    conn.busy_timeout(Duration::from_secs(5))?;
    apply_migrations(conn)?;
    Ok(())
}

impl Storage for SqliteStorage {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let conn = lock(&self.conn);
        let blob = conn
            .query_row(
                "SELECT blob FROM kv_blobs WHERE key = ?1;",
                [key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(blob)
    }

    fn set(&self, key: &str, blob: &str) -> StorageResult<()> {
        let conn = lock(&self.conn);
        conn.execute(
            "INSERT INTO kv_blobs (key, blob) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET
                blob = excluded.blob,
                updated_at = (strftime('%s', 'now') * 1000);",
            params![key, blob],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let conn = lock(&self.conn);
        conn.execute("DELETE FROM kv_blobs WHERE key = ?1;", [key])?;
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let conn = lock(&self.conn);
        let mut stmt = conn.prepare("SELECT key FROM kv_blobs WHERE key >= ?1 ORDER BY key ASC;")?;
        let mut rows = stmt.query([prefix])?;
        let mut keys = Vec::new();
        while let Some(row) = rows.next()? {
            let key: String = row.get(0)?;
            if !key.starts_with(prefix) {
                break;
            }
            keys.push(key);
        }
        Ok(keys)
    }
}
