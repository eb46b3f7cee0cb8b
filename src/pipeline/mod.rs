//! Incremental processing pipeline.
//!
//! # Architecture
//!
//! ```text
//! reconcile (worker) ──► live rows ──► AssetDescriptors
//!                                          │
//!   metadata ─► filter ─► hdr ─► convert ─► resize ─► preview ─► link
//!                                          │
//!                                    commit processed ─► garbage collection
//! ```
//!
//! Stages run one after another; the tasks inside a stage run on a rayon
//! pool. Per-asset failures become [`Problem`]s and never stop the run.
//! Only index/reconciliation failures and an unreadable output tree are
//! fatal.

mod context;
mod gc;
mod stage;
mod stages;
mod summary;

#[cfg(test)]
mod tests;

pub use context::{Problem, RunContext};
pub use gc::GcReport;
pub use stage::{Effect, Stage, StageEnv, StageReport, Task, run_stage};
pub use summary::RunSummary;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Instant;

use crate::asset::{AssetDescriptor, OutputProfile, media_root};
use crate::config::RunConfig;
use crate::core::is_shutdown;
use crate::index::{self, Index, ReconcileStats, SourceScanner};
use crate::tools::MediaTools;
use crate::{debug, log};
use stages::{ConvertStage, HdrStage, LinkStage, MetadataStage, PreviewStage, ResizeStage};

/// Receives progress while a stage executes.
pub trait ProgressObserver: Sync {
    /// `completed` of `total` tasks of `stage` are done; `current` is the
    /// asset just finished.
    fn update(&self, stage: &str, completed: usize, total: usize, current: &str);

    /// The stage has no more tasks running.
    fn finish(&self, _stage: &str, _completed: usize, _total: usize) {}
}

/// Observer that ignores everything.
pub struct NullProgress;

impl ProgressObserver for NullProgress {
    fn update(&self, _stage: &str, _completed: usize, _total: usize, _current: &str) {}
}

/// Run the whole pipeline once.
pub fn run(
    config: &RunConfig,
    tools: &dyn MediaTools,
    progress: &dyn ProgressObserver,
) -> Result<RunSummary> {
    let started = Instant::now();

    let index = if config.dry_run {
        Index::open_isolated_copy(&config.output)
    } else {
        Index::open(&config.output)
    }
    .context("cannot open the file index")?;

    let scanner =
        SourceScanner::new(&config.input, &config.exclude).context("invalid exclude pattern")?;
    let reconcile = index::reconcile(&index, &scanner).context("cannot update the file index")?;
    log_reconcile(&reconcile);

    let profiles: Arc<[OutputProfile]> = config.profiles.clone().into();
    let mut assets: Vec<AssetDescriptor> = index
        .live_records()
        .context("cannot read the file index")?
        .iter()
        .filter_map(|record| {
            AssetDescriptor::from_record(record, &config.input, &config.output, profiles.clone())
        })
        .collect();

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.jobs.unwrap_or(0))
        .thread_name(|i| format!("webimg-worker-{i}"))
        .build()
        .context("cannot start worker threads")?;

    let mut ctx = RunContext::new(
        &index,
        tools,
        progress,
        pool,
        config.dry_run,
        config.relocate_converted.clone(),
    );

    run_stage(&MetadataStage, &mut assets, &mut ctx);
    let (mut assets, filtered) = filter_eligible(assets, &ctx)?;
    run_stage(&HdrStage, &mut assets, &mut ctx);
    run_stage(&ConvertStage, &mut assets, &mut ctx);
    run_stage(&ResizeStage, &mut assets, &mut ctx);
    run_stage(&PreviewStage, &mut assets, &mut ctx);
    run_stage(&LinkStage, &mut assets, &mut ctx);

    let processed = commit_processed(&assets, &ctx)?;

    let interrupted = is_shutdown();
    let gc = if interrupted {
        log!("gc"; "skipped: run was interrupted");
        GcReport::default()
    } else {
        collect_garbage(&assets, config)?
    };

    let (stages, problems) = ctx.into_parts();
    Ok(RunSummary {
        dry_run: config.dry_run,
        interrupted,
        elapsed: started.elapsed(),
        reconcile,
        stages,
        filtered,
        processed,
        gc,
        problems,
    })
}

fn log_reconcile(stats: &ReconcileStats) {
    if stats.is_unchanged() {
        log!("index"; "{} files, no changes", stats.scanned);
    } else {
        log!(
            "index";
            "{} files: {} added, {} changed, {} back, {} removed",
            stats.scanned, stats.inserted, stats.touched, stats.revived, stats.tombstoned
        );
    }
    if stats.adopted > 0 {
        log!("index"; "{} legacy rows adopted their observed date", stats.adopted);
    }
}

/// Drop assets failing the capability check.
///
/// Dropped assets that were marked processed are cleared so they are never
/// considered done.
fn filter_eligible(
    assets: Vec<AssetDescriptor>,
    ctx: &RunContext<'_>,
) -> Result<(Vec<AssetDescriptor>, usize)> {
    let (eligible, filtered): (Vec<_>, Vec<_>) =
        assets.into_iter().partition(AssetDescriptor::is_eligible);

    for asset in &filtered {
        debug!("filter"; "{}: live-photo clip, skipped", asset.rel_path);
    }

    let clear: Vec<i64> = filtered.iter().filter(|a| a.processed).map(|a| a.id).collect();
    if !clear.is_empty() {
        if ctx.dry_run {
            log!("dry-run"; "would mark {} skipped clips unprocessed", clear.len());
        } else {
            ctx.index
                .clear_processed(&clear)
                .context("cannot update the file index")?;
        }
    }
    Ok((eligible, filtered.len()))
}

/// Mark surviving assets processed.
///
/// Narrower than "every survivor": an asset with a problem or an
/// interrupted task this run stays unprocessed so the next run retries it,
/// even where its outputs exist.
fn commit_processed(assets: &[AssetDescriptor], ctx: &RunContext<'_>) -> Result<usize> {
    let ids: Vec<i64> = assets
        .iter()
        .filter(|a| !a.processed && ctx.is_complete(a.id))
        .map(|a| a.id)
        .collect();

    if ids.is_empty() {
        return Ok(0);
    }
    if ctx.dry_run {
        log!("dry-run"; "would mark {} assets processed", ids.len());
    } else {
        ctx.index
            .mark_processed(&ids)
            .context("cannot update the file index")?;
    }
    Ok(ids.len())
}

fn collect_garbage(assets: &[AssetDescriptor], config: &RunConfig) -> Result<GcReport> {
    let media = media_root(&config.output);
    let mut report = gc::collect(&media, &gc::media_keep_set(assets), config.dry_run)
        .with_context(|| format!("cannot clean {}", media.display()))?;

    if let Some(archive) = &config.relocate_converted {
        report += gc::collect(archive, &gc::archive_keep_set(assets, archive), config.dry_run)
            .with_context(|| format!("cannot clean {}", archive.display()))?;
    }

    if report.deleted > 0 {
        log!("gc"; "{} orphaned files, {} empty directories", report.deleted, report.pruned_dirs);
    }
    Ok(report)
}
