//! Logging utilities with colored output and progress display.
//!
//! This module provides:
//! - `log!` / `debug!` macros for terminal output with colored prefixes
//! - a plain-text mirror of every line into `webimg.log`
//! - `StageProgress`, the in-place progress line drawn while a stage runs
//!
//! # Example
//!
//! ```ignore
//! log!("index"; "{} files scanned", count);
//!
//! let progress = StageProgress::new();
//! progress.update("resize", 3, 10, "2023/a.jpg");
//! progress.finish("resize", 10, 10);
//! ```

use chrono::Local;
use crossterm::{
    cursor, execute,
    terminal::{Clear, ClearType},
};
use owo_colors::OwoColorize;
use parking_lot::Mutex;
use std::{
    fs::{File, OpenOptions},
    io::{self, Write, stdout},
    path::Path,
    sync::atomic::{AtomicBool, Ordering},
};

use crate::pipeline::ProgressObserver;

/// Global verbose flag (set by --verbose CLI argument)
static VERBOSE: AtomicBool = AtomicBool::new(false);

/// A progress line currently occupies the cursor row.
static BAR_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Log file mirror, installed once the output root is known.
static FILE_SINK: Mutex<Option<File>> = Mutex::new(None);

/// Set verbose mode globally
pub fn set_verbose(v: bool) {
    VERBOSE.store(v, Ordering::SeqCst);
}

/// Check if verbose mode is enabled
pub fn is_verbose() -> bool {
    VERBOSE.load(Ordering::SeqCst)
}

// ============================================================================
// Log Macro
// ============================================================================

/// Log a message with a colored module prefix
///
/// # Usage
/// ```ignore
/// log!("module"; "message with {} formatting", args);
/// ```
#[macro_export]
macro_rules! log {
    ($module:expr; $($arg:tt)*) => {{
        $crate::logger::log($module, &format!($($arg)*))
    }};
}

/// Log a debug message (only shown when --verbose is enabled)
///
/// # Usage
/// ```ignore
/// debug!("module"; "debug info: {}", value);
/// ```
#[macro_export]
macro_rules! debug {
    ($module:expr; $($arg:tt)*) => {{
        if $crate::logger::is_verbose() {
            $crate::logger::log($module, &format!($($arg)*))
        }
    }};
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Log a message with a colored module prefix
pub fn log(module: &str, message: &str) {
    write_file_line(module, message);

    let prefix = colorize_prefix(module);
    let mut stdout = stdout().lock();

    if BAR_ACTIVE.load(Ordering::SeqCst) {
        // Print above the progress line; the next update redraws it.
        execute!(stdout, cursor::MoveToColumn(0), Clear(ClearType::CurrentLine)).ok();
    }

    writeln!(stdout, "{prefix} {message}").ok();
    stdout.flush().ok();
}

/// Apply color to a module prefix based on module type
fn colorize_prefix(module: &str) -> String {
    let prefix = format!("[{module}]");
    match module.to_ascii_lowercase().as_str() {
        "error" | "problem" => prefix.bright_red().bold().to_string(),
        "warn" => prefix.bright_magenta().bold().to_string(),
        "gc" => prefix.bright_green().bold().to_string(),
        "dry-run" => prefix.bright_blue().bold().to_string(),
        _ => prefix.bright_yellow().bold().to_string(),
    }
}

// ============================================================================
// Log File
// ============================================================================

/// Mirror every subsequent log line into `path` (appending).
pub fn install_file_sink(path: &Path) -> io::Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    *FILE_SINK.lock() = Some(file);
    Ok(())
}

/// Flush and detach the log file.
pub fn close_file_sink() {
    if let Some(mut file) = FILE_SINK.lock().take() {
        file.flush().ok();
    }
}

fn write_file_line(module: &str, message: &str) {
    let mut sink = FILE_SINK.lock();
    if let Some(file) = sink.as_mut() {
        let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        for line in message.lines() {
            writeln!(file, "{stamp} [{module}] {line}").ok();
        }
    }
}

// ============================================================================
// Stage Progress (single-line, overwritten in place)
// ============================================================================

/// Single-line progress display for the stage runner
///
/// Displays: `[resize] 42/371 2023/trip/a.jpg`
///
/// Updates come from worker threads; `try_lock` skips a redraw instead of
/// blocking a worker when another thread is drawing.
pub struct StageProgress {
    lock: Mutex<()>,
}

impl StageProgress {
    pub const fn new() -> Self {
        Self {
            lock: Mutex::new(()),
        }
    }

    fn draw(stage: &str, completed: usize, total: usize, current: &str) {
        let prefix = colorize_prefix(stage);
        let mut stdout = stdout().lock();
        execute!(stdout, cursor::MoveToColumn(0), Clear(ClearType::CurrentLine)).ok();
        write!(stdout, "{prefix} {completed}/{total} {}", current.dimmed()).ok();
        stdout.flush().ok();
    }
}

impl Default for StageProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressObserver for StageProgress {
    fn update(&self, stage: &str, completed: usize, total: usize, current: &str) {
        if let Some(_guard) = self.lock.try_lock() {
            BAR_ACTIVE.store(true, Ordering::SeqCst);
            Self::draw(stage, completed, total, current);
        }
    }

    fn finish(&self, stage: &str, completed: usize, total: usize) {
        let _guard = self.lock.lock(); // Wait for any pending draw
        BAR_ACTIVE.store(false, Ordering::SeqCst);

        let prefix = colorize_prefix(stage);
        let mut stdout = stdout().lock();
        execute!(stdout, cursor::MoveToColumn(0), Clear(ClearType::CurrentLine)).ok();
        writeln!(stdout, "{prefix} {completed}/{total} done").ok();
        stdout.flush().ok();
    }
}

// ============================================================================
// Tests
// ============================================================================
