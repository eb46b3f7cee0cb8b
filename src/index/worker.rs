//! Reconciliation worker.
//!
//! The scan and the reconciliation transaction run on their own thread with
//! their own connection. The worker streams log lines and ends with exactly
//! one terminal message; the controller blocks until it arrives, so nothing
//! else touches the index while reconciliation is in flight.
//!
//! ```text
//! controller ──spawn(job)──► worker
//!            ◄── Log ...
//!            ◄── Complete(stats) | Failed(error)
//! ```

use anyhow::Context;
use crossbeam::channel::{self, Sender};
use std::io;
use std::path::PathBuf;
use std::thread;
use thiserror::Error;

use super::reconcile::apply;
use super::{Index, ReconcileStats, SourceScanner, connect, load_records, migrate, plan};
use crate::debug;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("cannot start reconciliation worker")]
    Spawn(#[source] io::Error),

    #[error("reconciliation failed: {0}")]
    Worker(String),

    #[error("reconciliation worker exited without reporting")]
    Disconnected,
}

/// Work description handed to the worker.
struct ReconcileJob {
    db_path: PathBuf,
    scanner: SourceScanner,
}

enum WorkerMessage {
    Log(String),
    Complete(ReconcileStats),
    Failed(String),
}

/// Reconcile `index` with the tree `scanner` walks, on a worker thread.
///
/// Returns only after the worker's terminal message; a failure or a worker
/// that vanishes without reporting is an error.
pub fn reconcile(index: &Index, scanner: &SourceScanner) -> Result<ReconcileStats, ReconcileError> {
    let job = ReconcileJob {
        db_path: index.path().to_path_buf(),
        scanner: scanner.clone(),
    };

    let (tx, rx) = channel::unbounded();
    let handle = thread::Builder::new()
        .name("index-worker".into())
        .spawn(move || run_job(job, &tx))
        .map_err(ReconcileError::Spawn)?;

    let outcome = loop {
        match rx.recv() {
            Ok(WorkerMessage::Log(line)) => debug!("index"; "{}", line),
            Ok(WorkerMessage::Complete(stats)) => break Ok(stats),
            Ok(WorkerMessage::Failed(error)) => break Err(ReconcileError::Worker(error)),
            Err(_) => break Err(ReconcileError::Disconnected),
        }
    };

    let _ = handle.join();
    outcome
}

fn run_job(job: ReconcileJob, tx: &Sender<WorkerMessage>) {
    let message = match execute(&job, tx) {
        Ok(stats) => WorkerMessage::Complete(stats),
        Err(e) => WorkerMessage::Failed(format!("{e:#}")),
    };
    let _ = tx.send(message);
}

fn execute(job: &ReconcileJob, tx: &Sender<WorkerMessage>) -> anyhow::Result<ReconcileStats> {
    let root = job.scanner.root();
    let observed = job
        .scanner
        .scan()
        .with_context(|| format!("cannot scan {}", root.display()))?;
    let _ = tx.send(WorkerMessage::Log(format!(
        "{} media files under {}",
        observed.len(),
        root.display()
    )));

    let mut conn = connect(&job.db_path)
        .with_context(|| format!("cannot open {}", job.db_path.display()))?;
    let has_legacy_date = migrate(&conn)?;
    let records = load_records(&conn, has_legacy_date)?;

    let transitions = plan(&records, &observed);
    let mut stats = apply(&mut conn, &transitions, |line| {
        let _ = tx.send(WorkerMessage::Log(line));
    })
    .context("reconciliation transaction failed")?;

    stats.scanned = observed.len();
    Ok(stats)
}
