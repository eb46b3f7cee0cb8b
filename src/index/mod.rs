//! Persistent file index.
//!
//! A single SQLite file per output root (`index.db`) with one table of
//! source records. The index is the only durable state of a run: derived
//! paths are always recomputed, and metadata found during a run is written
//! back here immediately.
//!
//! # Schema
//!
//! ```text
//! files(id, path, file_mtime, date, metadata BLOB, "exists", processed)
//! ```
//!
//! Older indexes may lack later columns; they are added with defaults on
//! open. A deprecated `file_date` column is read (never written) so the
//! reconciliation pass can adopt it as the modification time.

mod reconcile;
mod record;
mod scan;
mod worker;


pub use reconcile::{ObservedFile, ReconcileStats, Transition, plan};
pub use record::SourceRecord;
pub use scan::SourceScanner;
pub use worker::{ReconcileError, reconcile};

use parking_lot::Mutex;
use rusqlite::{Connection, params};
use rustc_hash::FxHashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::asset::AssetMetadata;
use crate::debug;

/// Index file name inside the output root.
pub const INDEX_FILE: &str = "index.db";

/// Isolated index copy used by dry runs.
pub const DRY_RUN_INDEX_FILE: &str = "index.dry-run.db";

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

const CREATE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS files (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    path        TEXT NOT NULL,
    file_mtime  INTEGER,
    date        INTEGER,
    metadata    BLOB,
    "exists"    INTEGER NOT NULL DEFAULT 1,
    processed   INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_files_path ON files(path);
"#;

/// Columns added after the first schema, with the definition used to add
/// them to an older table.
const LATER_COLUMNS: &[(&str, &str)] = &[
    ("file_mtime", "file_mtime INTEGER"),
    ("date", "date INTEGER"),
    ("metadata", "metadata BLOB"),
    ("exists", r#""exists" INTEGER NOT NULL DEFAULT 1"#),
    ("processed", "processed INTEGER NOT NULL DEFAULT 0"),
];

/// Deprecated observed-date column.
const LEGACY_DATE_COLUMN: &str = "file_date";

/// Expression reading the deprecated column whatever affinity it was stored with.
const LEGACY_DATE_SELECT: &str = "CAST(file_date AS INTEGER)";

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("cannot create index directory {}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot open index {}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("cannot copy index for dry run")]
    Copy(#[source] io::Error),

    #[error("index query failed")]
    Sql(#[from] rusqlite::Error),

    #[error("cannot encode metadata")]
    Encode(#[from] serde_json::Error),
}

/// Handle to the persistent index.
///
/// Statements are serialized through one connection, so per-asset writes
/// from concurrent workers are safe without further locking.
pub struct Index {
    conn: Mutex<Connection>,
    path: PathBuf,
    has_legacy_date: bool,
}

impl Index {
    /// Open (or create) `<dir>/index.db`.
    pub fn open(dir: &Path) -> Result<Self, IndexError> {
        create_dir(dir)?;
        Self::open_file(&dir.join(INDEX_FILE))
    }

    /// Open a fresh copy of `<dir>/index.db` at `<dir>/index.dry-run.db`.
    ///
    /// The real index is never opened for writing; the copy is left on disk.
    pub fn open_isolated_copy(dir: &Path) -> Result<Self, IndexError> {
        create_dir(dir)?;
        let real = dir.join(INDEX_FILE);
        let copy = dir.join(DRY_RUN_INDEX_FILE);

        if real.is_file() {
            fs::copy(&real, &copy).map_err(IndexError::Copy)?;
        } else {
            crate::utils::fs::remove_if_present(&copy).map_err(IndexError::Copy)?;
        }
        Self::open_file(&copy)
    }

    fn open_file(path: &Path) -> Result<Self, IndexError> {
        let conn = connect(path).map_err(|source| IndexError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let has_legacy_date = migrate(&conn)?;

        debug!("index"; "opened {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
            has_legacy_date,
        })
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every record, tombstones included, ordered by id.
    pub fn records(&self) -> Result<Vec<SourceRecord>, IndexError> {
        Ok(load_records(&self.conn.lock(), self.has_legacy_date)?)
    }

    /// Records seen in the latest scan.
    pub fn live_records(&self) -> Result<Vec<SourceRecord>, IndexError> {
        let mut records = self.records()?;
        records.retain(|r| r.live);
        Ok(records)
    }

    pub fn set_metadata(&self, id: i64, metadata: &AssetMetadata) -> Result<(), IndexError> {
        let blob = metadata.to_blob()?;
        self.conn
            .lock()
            .execute("UPDATE files SET metadata = ?1 WHERE id = ?2", params![blob, id])?;
        Ok(())
    }

    pub fn set_capture_date(&self, id: i64, date_ms: i64) -> Result<(), IndexError> {
        self.conn
            .lock()
            .execute("UPDATE files SET date = ?1 WHERE id = ?2", params![date_ms, id])?;
        Ok(())
    }

    pub fn mark_processed(&self, ids: &[i64]) -> Result<(), IndexError> {
        self.set_processed(ids, true)
    }

    pub fn clear_processed(&self, ids: &[i64]) -> Result<(), IndexError> {
        self.set_processed(ids, false)
    }

    fn set_processed(&self, ids: &[i64], processed: bool) -> Result<(), IndexError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare("UPDATE files SET processed = ?1 WHERE id = ?2")?;
            for id in ids {
                stmt.execute(params![processed, id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

fn create_dir(dir: &Path) -> Result<(), IndexError> {
    fs::create_dir_all(dir).map_err(|source| IndexError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })
}

/// Open a connection with the settings every index user shares.
pub(crate) fn connect(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}

/// Create the table, add missing columns, and report whether the
/// deprecated date column exists.
pub(crate) fn migrate(conn: &Connection) -> rusqlite::Result<bool> {
    conn.execute_batch(CREATE_SQL)?;

    let columns = table_columns(conn)?;
    for (name, definition) in LATER_COLUMNS {
        if !columns.contains(*name) {
            conn.execute(&format!("ALTER TABLE files ADD COLUMN {definition}"), [])?;
            debug!("index"; "added missing column `{}`", name);
        }
    }
    Ok(columns.contains(LEGACY_DATE_COLUMN))
}

fn table_columns(conn: &Connection) -> rusqlite::Result<FxHashSet<String>> {
    let mut stmt = conn.prepare("PRAGMA table_info(files)")?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    names.collect()
}

pub(crate) fn load_records(
    conn: &Connection,
    has_legacy_date: bool,
) -> rusqlite::Result<Vec<SourceRecord>> {
    let legacy = if has_legacy_date {
        LEGACY_DATE_SELECT
    } else {
        "NULL"
    };
    let mut stmt = conn.prepare(&SourceRecord::select_sql(legacy))?;
    let rows = stmt.query_map([], SourceRecord::from_row)?;
    rows.collect()
}
