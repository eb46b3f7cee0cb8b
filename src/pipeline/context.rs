//! Run-scoped accumulator passed through the stage pipeline.

use rayon::ThreadPool;
use rustc_hash::FxHashSet;
use std::path::PathBuf;

use super::ProgressObserver;
use super::stage::StageReport;
use crate::index::Index;
use crate::tools::MediaTools;

/// A per-asset failure. Run-scoped, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Problem {
    pub asset_id: i64,
    pub rel_path: String,
    pub stage: &'static str,
    pub cause: String,
}

/// Everything a run shares between stages, plus what it has accumulated.
pub struct RunContext<'a> {
    pub index: &'a Index,
    pub tools: &'a dyn MediaTools,
    pub progress: &'a dyn ProgressObserver,
    pub pool: ThreadPool,
    pub dry_run: bool,
    pub archive: Option<PathBuf>,

    problems: Vec<Problem>,
    stages: Vec<StageReport>,
    /// Assets with a failed or skipped task this run
    incomplete: FxHashSet<i64>,
}

impl<'a> RunContext<'a> {
    pub fn new(
        index: &'a Index,
        tools: &'a dyn MediaTools,
        progress: &'a dyn ProgressObserver,
        pool: ThreadPool,
        dry_run: bool,
        archive: Option<PathBuf>,
    ) -> Self {
        Self {
            index,
            tools,
            progress,
            pool,
            dry_run,
            archive,
            problems: Vec::new(),
            stages: Vec::new(),
            incomplete: FxHashSet::default(),
        }
    }

    pub fn add_problem(&mut self, problem: Problem) {
        self.incomplete.insert(problem.asset_id);
        self.problems.push(problem);
    }

    pub fn mark_incomplete(&mut self, asset_id: i64) {
        self.incomplete.insert(asset_id);
    }

    /// Whether every task of the asset succeeded so far.
    pub fn is_complete(&self, asset_id: i64) -> bool {
        !self.incomplete.contains(&asset_id)
    }

    pub fn record_stage(&mut self, report: StageReport) {
        self.stages.push(report);
    }

    pub fn into_parts(self) -> (Vec<StageReport>, Vec<Problem>) {
        (self.stages, self.problems)
    }
}
