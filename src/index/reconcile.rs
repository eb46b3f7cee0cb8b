//! Reconciliation: diff a source-tree listing against the index.
//!
//! [`plan`] is pure and decides every transition; [`apply`] writes them in
//! one transaction so a run's reconciliation commits entirely or not at all.

use rusqlite::{Connection, params};
use rustc_hash::{FxHashMap, FxHashSet};
use std::fmt;

use super::SourceRecord;

/// A media file found by the scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedFile {
    /// Path relative to the library root, `/`-separated
    pub rel_path: String,
    /// Modification time (ms since epoch)
    pub mtime: i64,
}

/// One index mutation decided by [`plan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Not previously indexed
    Insert { path: String, mtime: i64 },
    /// Row has a deprecated observed date but no modification time
    AdoptLegacyDate { id: i64, path: String, mtime: i64 },
    /// Modification time changed: new time, unprocessed, live
    Touch { id: i64, path: String, mtime: i64 },
    /// Tombstone seen again with an unchanged modification time
    Revive { id: i64, path: String },
    /// Live row no longer on disk
    Tombstone { id: i64, path: String },
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert { path, .. } => write!(f, "added {path}"),
            Self::AdoptLegacyDate { path, .. } => {
                write!(f, "{path}: no modification time, adopting legacy date")
            }
            Self::Touch { path, .. } => {
                write!(f, "{path}: modification time changed, marked unprocessed")
            }
            Self::Revive { path, .. } => write!(f, "{path}: added back"),
            Self::Tombstone { path, .. } => write!(f, "{path}: removed"),
        }
    }
}

/// Counts of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub scanned: usize,
    pub inserted: usize,
    pub adopted: usize,
    pub touched: usize,
    pub revived: usize,
    pub tombstoned: usize,
}

impl ReconcileStats {
    fn count(&mut self, transition: &Transition) {
        match transition {
            Transition::Insert { .. } => self.inserted += 1,
            Transition::AdoptLegacyDate { .. } => self.adopted += 1,
            Transition::Touch { .. } => self.touched += 1,
            Transition::Revive { .. } => self.revived += 1,
            Transition::Tombstone { .. } => self.tombstoned += 1,
        }
    }

    /// Whether the pass changed no row.
    pub fn is_unchanged(&self) -> bool {
        self.inserted + self.adopted + self.touched + self.revived + self.tombstoned == 0
    }
}

/// Decide the transitions that bring `records` in line with `observed`.
///
/// Rows sharing a path are matched by their lowest id; the others count as
/// not seen.
pub fn plan(records: &[SourceRecord], observed: &[ObservedFile]) -> Vec<Transition> {
    let mut by_path: FxHashMap<&str, &SourceRecord> = FxHashMap::default();
    for record in records {
        by_path.entry(record.path.as_str()).or_insert(record);
    }

    let mut transitions = Vec::new();
    let mut seen: FxHashSet<i64> = FxHashSet::default();

    for file in observed {
        let Some(record) = by_path.get(file.rel_path.as_str()) else {
            transitions.push(Transition::Insert {
                path: file.rel_path.clone(),
                mtime: file.mtime,
            });
            continue;
        };
        seen.insert(record.id);

        let mut known_mtime = record.mtime.filter(|m| *m != 0);
        if known_mtime.is_none()
            && let Some(legacy) = record.legacy_date.filter(|d| *d != 0)
        {
            transitions.push(Transition::AdoptLegacyDate {
                id: record.id,
                path: record.path.clone(),
                mtime: legacy,
            });
            known_mtime = Some(legacy);
        }

        if known_mtime != Some(file.mtime) {
            transitions.push(Transition::Touch {
                id: record.id,
                path: record.path.clone(),
                mtime: file.mtime,
            });
        } else if !record.live {
            transitions.push(Transition::Revive {
                id: record.id,
                path: record.path.clone(),
            });
        }
    }

    for record in records {
        if record.live && !seen.contains(&record.id) {
            transitions.push(Transition::Tombstone {
                id: record.id,
                path: record.path.clone(),
            });
        }
    }

    transitions
}

/// Apply `transitions` atomically, reporting each one to `on_log`.
pub fn apply(
    conn: &mut Connection,
    transitions: &[Transition],
    mut on_log: impl FnMut(String),
) -> rusqlite::Result<ReconcileStats> {
    let mut stats = ReconcileStats::default();
    let tx = conn.transaction()?;

    for transition in transitions {
        match transition {
            Transition::Insert { path, mtime } => tx.execute(
                r#"INSERT INTO files (path, file_mtime, date, metadata, "exists", processed)
                   VALUES (?1, ?2, NULL, NULL, 1, 0)"#,
                params![path, mtime],
            )?,
            Transition::AdoptLegacyDate { id, mtime, .. } => tx.execute(
                "UPDATE files SET file_mtime = ?1 WHERE id = ?2",
                params![mtime, id],
            )?,
            Transition::Touch { id, mtime, .. } => tx.execute(
                r#"UPDATE files SET file_mtime = ?1, processed = 0, "exists" = 1 WHERE id = ?2"#,
                params![mtime, id],
            )?,
            Transition::Revive { id, .. } => {
                tx.execute(r#"UPDATE files SET "exists" = 1 WHERE id = ?1"#, params![id])?
            }
            Transition::Tombstone { id, .. } => tx.execute(
                r#"UPDATE files SET "exists" = 0, processed = 0 WHERE id = ?1"#,
                params![id],
            )?,
        };
        stats.count(transition);
        on_log(transition.to_string());
    }

    tx.commit()?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: i64, path: &str, mtime: i64, live: bool, processed: bool) -> SourceRecord {
        SourceRecord {
            id,
            path: path.to_owned(),
            mtime: Some(mtime),
            date: None,
            legacy_date: None,
            metadata: None,
            live,
            processed,
        }
    }

    fn seen(path: &str, mtime: i64) -> ObservedFile {
        ObservedFile {
            rel_path: path.to_owned(),
            mtime,
        }
    }

    #[test]
    fn test_unchanged_tree_plans_nothing() {
        let records = vec![record(1, "a.jpg", 10, true, true)];
        assert!(plan(&records, &[seen("a.jpg", 10)]).is_empty());
    }

    #[test]
    fn test_insert_new_file() {
        let plan = plan(&[], &[seen("a.jpg", 10)]);
        assert_eq!(
            plan,
            [Transition::Insert {
                path: "a.jpg".into(),
                mtime: 10
            }]
        );
    }

    #[test]
    fn test_touch_clears_processed() {
        let records = vec![record(1, "a.jpg", 10, true, true)];
        let plan = plan(&records, &[seen("a.jpg", 11)]);
        assert_eq!(
            plan,
            [Transition::Touch {
                id: 1,
                path: "a.jpg".into(),
                mtime: 11
            }]
        );
    }

    #[test]
    fn test_tombstone_and_revive() {
        let records = vec![
            record(1, "gone.jpg", 10, true, true),
            record(2, "back.jpg", 20, false, false),
            record(3, "old.jpg", 30, false, false),
        ];
        let plan = plan(&records, &[seen("back.jpg", 20)]);
        assert_eq!(
            plan,
            [
                Transition::Revive {
                    id: 2,
                    path: "back.jpg".into()
                },
                Transition::Tombstone {
                    id: 1,
                    path: "gone.jpg".into()
                },
            ]
        );
    }

    #[test]
    fn test_revived_with_new_mtime_is_touched() {
        let records = vec![record(2, "back.jpg", 20, false, false)];
        let plan = plan(&records, &[seen("back.jpg", 21)]);
        assert!(matches!(plan.as_slice(), [Transition::Touch { id: 2, .. }]));
    }

    #[test]
    fn test_legacy_date_adopted_before_comparison() {
        let mut legacy = record(1, "a.jpg", 0, true, true);
        legacy.mtime = None;
        legacy.legacy_date = Some(10);

        let plan_same = plan(std::slice::from_ref(&legacy), &[seen("a.jpg", 10)]);
        assert!(matches!(
            plan_same.as_slice(),
            [Transition::AdoptLegacyDate { id: 1, mtime: 10, .. }]
        ));

        let plan_changed = plan(&[legacy], &[seen("a.jpg", 12)]);
        assert!(matches!(
            plan_changed.as_slice(),
            [
                Transition::AdoptLegacyDate { .. },
                Transition::Touch { mtime: 12, .. }
            ]
        ));
    }

    #[test]
    fn test_duplicate_paths_match_lowest_id() {
        let records = vec![
            record(1, "a.jpg", 10, true, true),
            record(2, "a.jpg", 10, true, true),
        ];
        let plan = plan(&records, &[seen("a.jpg", 10)]);
        assert!(matches!(plan.as_slice(), [Transition::Tombstone { id: 2, .. }]));
    }

    #[test]
    fn test_transition_messages() {
        let t = Transition::Tombstone {
            id: 1,
            path: "a.jpg".into(),
        };
        assert_eq!(t.to_string(), "a.jpg: removed");
    }
}
