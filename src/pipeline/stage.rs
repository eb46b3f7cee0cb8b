//! Stage abstraction and the per-stage runner.
//!
//! A stage splits into a pure planning half ([`Stage::plan`]: applicability
//! and staleness) and an acting half ([`Stage::execute`]). The runner plans
//! every asset, then either logs the plan (dry run) or executes the tasks
//! on the worker pool, isolating each failure as a [`Problem`].

use anyhow::{Context, Result};
use rayon::prelude::*;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use super::context::{Problem, RunContext};
use crate::asset::{AssetDescriptor, AssetMetadata};
use crate::core::is_shutdown;
use crate::index::Index;
use crate::tools::MediaTools;
use crate::utils::fs::{prepare_destination, remove_if_present};
use crate::{debug, log};

/// One unit of work a stage wants done for an asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    ExtractMetadata,
    ClassifyHdr,
    Convert { dest: PathBuf },
    Resize { profile: String, height: u32, dest: PathBuf },
    /// `dest` is unknown until the video is HDR-classified
    Preview { profile: String, height: u32, dest: Option<PathBuf> },
    LinkOriginal { dest: PathBuf },
}

impl Task {
    /// File the task produces, if it produces one at a known path.
    pub fn dest(&self) -> Option<&Path> {
        match self {
            Self::ExtractMetadata | Self::ClassifyHdr => None,
            Self::Convert { dest } | Self::Resize { dest, .. } | Self::LinkOriginal { dest } => {
                Some(dest)
            }
            Self::Preview { dest, .. } => dest.as_deref(),
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExtractMetadata => f.write_str("extract metadata"),
            Self::ClassifyHdr => f.write_str("classify HDR"),
            Self::Convert { dest } => write!(f, "convert to {}", dest.display()),
            Self::Resize { profile, height, .. } => write!(f, "resize for {profile} ({height}px)"),
            Self::Preview { profile, height, .. } => {
                write!(f, "generate preview for {profile} ({height}px)")
            }
            Self::LinkOriginal { dest } => write!(f, "link original at {}", dest.display()),
        }
    }
}

/// What a successful task changes on the run's descriptors.
#[derive(Debug)]
pub enum Effect {
    None,
    /// New metadata, already written to the index
    Metadata(AssetMetadata),
}

/// Shared, read-only environment handed to [`Stage::execute`].
pub struct StageEnv<'a> {
    pub index: &'a Index,
    pub tools: &'a dyn MediaTools,
    /// Relocation archive for converted artifacts
    pub archive: Option<&'a Path>,
}

/// A named step of the pipeline.
pub trait Stage: Sync {
    fn name(&self) -> &'static str;

    /// Tasks `asset` still needs from this stage; empty when not applicable
    /// or up to date.
    fn plan(&self, asset: &AssetDescriptor) -> Vec<Task>;

    /// Perform one planned task.
    fn execute(&self, asset: &AssetDescriptor, task: &Task, env: &StageEnv<'_>) -> Result<Effect>;
}

/// Counts of one stage run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub name: &'static str,
    /// Tasks planned
    pub total: usize,
    /// Tasks executed (or, in a dry run, that would be executed)
    pub attempted: usize,
    pub failed: usize,
    /// Tasks not started because of an interrupt
    pub skipped: usize,
}

impl StageReport {
    fn new(name: &'static str, total: usize) -> Self {
        Self {
            name,
            total,
            attempted: 0,
            failed: 0,
            skipped: 0,
        }
    }

    pub fn succeeded(&self) -> usize {
        self.attempted - self.failed
    }
}

enum Outcome {
    Skipped,
    Done(Result<Effect>),
}

/// Plan and run `stage` over `assets`, recording the report in `ctx`.
pub fn run_stage(stage: &dyn Stage, assets: &mut [AssetDescriptor], ctx: &mut RunContext<'_>) {
    let name = stage.name();
    let work: Vec<(usize, Task)> = assets
        .iter()
        .enumerate()
        .flat_map(|(i, asset)| stage.plan(asset).into_iter().map(move |task| (i, task)))
        .collect();

    let total = work.len();
    let mut report = StageReport::new(name, total);
    debug!(name; "{} of {} assets need work ({} tasks)", distinct_assets(&work), assets.len(), total);

    if total == 0 {
        ctx.record_stage(report);
        return;
    }

    if ctx.dry_run {
        for (i, task) in &work {
            log!("dry-run"; "{}: would {}", assets[*i].rel_path, task);
        }
        report.attempted = total;
        ctx.record_stage(report);
        return;
    }

    let env = StageEnv {
        index: ctx.index,
        tools: ctx.tools,
        archive: ctx.archive.as_deref(),
    };
    let progress = ctx.progress;
    let done = AtomicUsize::new(0);
    let shared: &[AssetDescriptor] = assets;

    let outcomes: Vec<Outcome> = ctx.pool.install(|| {
        work.par_iter()
            .map(|(i, task)| {
                if is_shutdown() {
                    return Outcome::Skipped;
                }
                let asset = &shared[*i];
                let result = perform(stage, asset, task, &env);
                let completed = done.fetch_add(1, Ordering::Relaxed) + 1;
                progress.update(name, completed, total, &asset.rel_path);
                Outcome::Done(result)
            })
            .collect()
    });
    progress.finish(name, done.load(Ordering::Relaxed), total);

    for ((i, task), outcome) in work.into_iter().zip(outcomes) {
        let asset = &mut assets[i];
        match outcome {
            Outcome::Skipped => {
                report.skipped += 1;
                ctx.mark_incomplete(asset.id);
            }
            Outcome::Done(Ok(effect)) => {
                report.attempted += 1;
                if let Effect::Metadata(metadata) = effect {
                    asset.metadata = Some(metadata);
                }
            }
            Outcome::Done(Err(e)) => {
                report.attempted += 1;
                report.failed += 1;
                let cause = format!("{e:#}");
                log!("problem"; "{}: cannot {}: {}", asset.rel_path, task, cause);
                ctx.add_problem(Problem {
                    asset_id: asset.id,
                    rel_path: asset.rel_path.clone(),
                    stage: name,
                    cause,
                });
            }
        }
    }

    ctx.record_stage(report);
}

/// Execute one task, making sure no partial output survives a failure.
fn perform(
    stage: &dyn Stage,
    asset: &AssetDescriptor,
    task: &Task,
    env: &StageEnv<'_>,
) -> Result<Effect> {
    if let Some(dest) = task.dest() {
        prepare_destination(dest)
            .with_context(|| format!("cannot prepare {}", dest.display()))?;
    }

    let result = stage.execute(asset, task, env);
    if result.is_err()
        && let Some(dest) = task.dest()
    {
        let _ = remove_if_present(dest);
    }
    result
}

fn distinct_assets(work: &[(usize, Task)]) -> usize {
    let mut last = None;
    work.iter()
        .filter(|(i, _)| last.replace(*i) != Some(*i))
        .count()
}
