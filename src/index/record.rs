//! One row of the `files` table.

use rusqlite::Row;
use rusqlite::types::ValueRef;

use crate::asset::AssetMetadata;
use crate::debug;

/// A source file known to the index.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    pub id: i64,
    /// Path relative to the library root, `/`-separated
    pub path: String,
    /// Last observed modification time (ms since epoch)
    pub mtime: Option<i64>,
    /// Best-effort capture time (ms since epoch), set by metadata extraction
    pub date: Option<i64>,
    /// Deprecated observed-date column of old indexes
    pub legacy_date: Option<i64>,
    pub metadata: Option<AssetMetadata>,
    /// Seen in the latest scan
    pub live: bool,
    /// All applicable stages completed since the last content change
    pub processed: bool,
}

impl SourceRecord {
    /// Column list matching [`SourceRecord::from_row`].
    ///
    /// `legacy` is the expression for the deprecated date column, or `NULL`
    /// when the table never had one.
    pub(super) fn select_sql(legacy: &str) -> String {
        format!(
            r#"SELECT id, path, CAST(file_mtime AS INTEGER), date, metadata, "exists", processed, {legacy} FROM files ORDER BY id"#
        )
    }

    pub(super) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let id: i64 = row.get(0)?;
        let path: String = row.get(1)?;
        // Older writers stored the JSON as TEXT
        let blob = match row.get_ref(4)? {
            ValueRef::Blob(bytes) | ValueRef::Text(bytes) => Some(bytes),
            _ => None,
        };

        let metadata = blob.and_then(|blob| match AssetMetadata::from_blob(blob) {
            Ok(meta) => Some(meta),
            Err(e) => {
                debug!("index"; "ignoring unreadable metadata of {}: {}", path, e);
                None
            }
        });

        Ok(Self {
            id,
            mtime: row.get(2)?,
            date: row.get(3)?,
            metadata,
            live: row.get::<_, Option<bool>>(5)?.unwrap_or(true),
            processed: row.get::<_, Option<bool>>(6)?.unwrap_or(false),
            legacy_date: row.get(7)?,
            path,
        })
    }
}
