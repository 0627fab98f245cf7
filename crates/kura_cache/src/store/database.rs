//! SQLite-backed store: one database per cache directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{Connection, ErrorCode, OpenFlags, OptionalExtension, TransactionBehavior, params};
use tracing::{debug, info, warn};

use super::lock::StoreLock;
use super::{CacheStore, StoreStats};
use crate::key::CacheKey;
use crate::CacheError;

/// Database file name inside the store directory.
pub const DB_FILE: &str = "kura.db";

/// Busy timeout for read-only stores, which have no configured lock timeout.
const READ_ONLY_BUSY_TIMEOUT: Duration = Duration::from_secs(1);

/// Idle connections kept for reuse.
const MAX_IDLE_CONNECTIONS: usize = 8;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS entries (
        key TEXT PRIMARY KEY NOT NULL,
        value BLOB NOT NULL,
        updated_at INTEGER NOT NULL
    );
";

/// Store keeping every entry in a single SQLite database.
///
/// The database runs in WAL mode so readers never wait for a writer.
/// Writers hold the store-wide lock and write inside an `IMMEDIATE`
/// transaction, so a reader sees either the old blob or the new one.
pub struct DatabaseStore {
    dir: PathBuf,
    db_path: PathBuf,
    busy_timeout: Duration,
    read_only: bool,
    /// Idle connections. Never held while a query runs.
    idle: Mutex<Vec<Connection>>,
}

impl DatabaseStore {
    /// Creates a writable store; nothing is created until the first write.
    pub fn new(dir: impl Into<PathBuf>, lock_timeout: Duration) -> Self {
        let dir = dir.into();
        Self {
            db_path: dir.join(DB_FILE),
            dir,
            busy_timeout: lock_timeout,
            read_only: false,
            idle: Mutex::new(Vec::new()),
        }
    }

    /// Opens an existing database read-only.
    pub fn open_read_only(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        let db_path = dir.join(DB_FILE);
        if !db_path.is_file() {
            return Err(CacheError::StoreNotFound { path: dir });
        }
        Ok(Self {
            dir,
            db_path,
            busy_timeout: READ_ONLY_BUSY_TIMEOUT,
            read_only: true,
            idle: Mutex::new(Vec::new()),
        })
    }

    /// Returns the database file path.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self, create: bool) -> Result<Connection, CacheError> {
        let mode = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else if create {
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };

        let conn =
            Connection::open_with_flags(&self.db_path, mode | OpenFlags::SQLITE_OPEN_NO_MUTEX)?;
        conn.busy_timeout(self.busy_timeout)?;
        if create {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.execute_batch(SCHEMA)?;
        }
        Ok(conn)
    }

    fn checkout(&self) -> Option<Connection> {
        self.idle.lock().pop()
    }

    fn checkin(&self, conn: Connection) {
        let mut idle = self.idle.lock();
        if idle.len() < MAX_IDLE_CONNECTIONS {
            idle.push(conn);
        }
    }

    fn read(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, CacheError> {
        let conn = match self.checkout() {
            Some(conn) => conn,
            None => self.connect(false)?,
        };
        let value = conn
            .query_row(
                "SELECT value FROM entries WHERE key = ?1",
                params![key.to_hex()],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        self.checkin(conn);
        Ok(value)
    }

    fn write(&self, key: &CacheKey, blob: &[u8]) -> Result<(), CacheError> {
        let mut conn = self.connect(true)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO entries (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key.to_hex(), blob, unix_now()],
        )?;
        tx.commit()?;
        self.checkin(conn);
        Ok(())
    }

    /// Deletes the database files so the next write starts from scratch.
    ///
    /// Must only be called while holding the store lock.
    fn recreate(&self) -> Result<(), CacheError> {
        self.idle.lock().clear();
        for suffix in ["", "-wal", "-shm"] {
            let mut name = self.db_path.clone().into_os_string();
            name.push(suffix);
            let path = PathBuf::from(name);
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(CacheError::io(path, e)),
            }
        }
        info!("Recreated cache database at {}", self.db_path.display());
        Ok(())
    }
}

impl CacheStore for DatabaseStore {
    fn get(&self, key: &CacheKey) -> Option<Vec<u8>> {
        if !self.db_path.exists() {
            return None;
        }
        match self.read(key) {
            Ok(value) => value,
            Err(e) => {
                debug!("Cache read failed for {}: {}", key, e);
                None
            }
        }
    }

    fn put(&self, key: &CacheKey, blob: &[u8]) -> Result<(), CacheError> {
        if self.read_only {
            return Err(CacheError::ReadOnly {
                path: self.dir.clone(),
            });
        }

        std::fs::create_dir_all(&self.dir).map_err(|e| CacheError::io(&self.dir, e))?;
        let _lock = StoreLock::acquire(&self.dir, self.busy_timeout)?;

        match self.write(key, blob) {
            Err(CacheError::Database(e)) if is_corruption(&e) => {
                warn!(
                    "Cache database at {} is unreadable ({}), recreating it",
                    self.db_path.display(),
                    e
                );
                self.recreate()?;
                self.write(key, blob)
            }
            result => result,
        }
    }

    fn stats(&self) -> Result<StoreStats, CacheError> {
        if !self.db_path.exists() {
            return Ok(StoreStats::default());
        }
        let conn = match self.checkout() {
            Some(conn) => conn,
            None => self.connect(false)?,
        };
        let (count, bytes) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(LENGTH(value)), 0) FROM entries",
            [],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )?;
        self.checkin(conn);
        Ok(StoreStats {
            entry_count: u64::try_from(count).unwrap_or(0),
            total_bytes: u64::try_from(bytes).unwrap_or(0),
        })
    }

    fn dir(&self) -> &Path {
        &self.dir
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}

fn is_corruption(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if matches!(err.code, ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt)
    )
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
