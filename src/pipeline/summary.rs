//! Run-end summary.

use std::time::Duration;

use super::context::Problem;
use super::gc::GcReport;
use super::stage::StageReport;
use crate::index::ReconcileStats;
use crate::{debug, log};

/// Outcome of one run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub dry_run: bool,
    pub interrupted: bool,
    pub elapsed: Duration,
    pub reconcile: ReconcileStats,
    pub stages: Vec<StageReport>,
    /// Companion clips dropped by the eligibility filter
    pub filtered: usize,
    /// Assets marked processed this run
    pub processed: usize,
    pub gc: GcReport,
    pub problems: Vec<Problem>,
}

impl RunSummary {
    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Successful (or, in a dry run, planned) tasks of a stage.
    pub fn completed(&self, name: &str) -> usize {
        self.stage(name).map_or(0, StageReport::succeeded)
    }

    pub fn attempted(&self, name: &str) -> usize {
        self.stage(name).map_or(0, |s| s.attempted)
    }

    pub fn converted(&self) -> usize {
        self.completed("convert")
    }

    pub fn resized(&self) -> usize {
        self.completed("resize")
    }

    pub fn previews(&self) -> usize {
        self.completed("preview")
    }

    pub fn linked(&self) -> usize {
        self.completed("link")
    }

    pub fn deleted(&self) -> usize {
        self.gc.deleted
    }

    /// Whether the run did nothing at all.
    pub fn is_noop(&self) -> bool {
        self.reconcile.is_unchanged()
            && self.stages.iter().all(|s| s.total == 0)
            && self.processed == 0
            && self.gc == GcReport::default()
            && self.problems.is_empty()
    }

    /// Print the summary through the logger.
    pub fn log(&self) {
        let title = if self.dry_run { "done (DRY RUN)" } else { "done" };
        let r = &self.reconcile;
        log!(
            "webimg";
            "{}: {} files, {} new, {} changed, {} removed",
            title, r.scanned, r.inserted, r.touched, r.tombstoned
        );
        log!(
            "webimg";
            "processed {}, converted {}, resized {}, previews {}, linked {}, deleted {}",
            self.processed,
            self.converted(),
            self.resized(),
            self.previews(),
            self.linked(),
            self.deleted()
        );
        for s in self.stages.iter().filter(|s| s.total > 0) {
            debug!(
                "webimg";
                "{}: {}/{} attempted, {} failed, {} skipped",
                s.name, s.attempted, s.total, s.failed, s.skipped
            );
        }
        if self.is_noop() {
            log!("webimg"; "everything up to date");
        }
        if self.filtered > 0 {
            log!("webimg"; "skipped {} live-photo clips", self.filtered);
        }
        if self.interrupted {
            log!("warn"; "interrupted: unfinished assets stay unprocessed");
        }
        log!("webimg"; "time {:.2}s", self.elapsed.as_secs_f64());

        if !self.problems.is_empty() {
            log!("problem"; "{} problem files:", self.problems.len());
            for p in &self.problems {
                log!("problem"; "{} [{}] {}", p.rel_path, p.stage, p.cause);
            }
        }
    }
}
