//! webimg - keeps a web-ready copy of a photo/video library in sync.

mod asset;
mod cli;
mod config;
mod core;
mod index;
mod logger;
mod pipeline;
mod tools;
mod utils;

use anyhow::{Context, Result};
use clap::{ColorChoice, Parser};
use cli::Cli;
use config::RunConfig;
use logger::StageProgress;
use tools::ExternalTools;

/// Log file inside the output root.
const LOG_FILE: &str = "webimg.log";

fn main() -> Result<()> {
    // Setup global Ctrl+C handler (before any blocking operations)
    core::setup_shutdown_handler()?;

    let cli = Cli::parse();

    // Set global color override based on CLI option
    match cli.color {
        ColorChoice::Always => owo_colors::set_override(true),
        ColorChoice::Never => owo_colors::set_override(false),
        ColorChoice::Auto => {} // owo-colors auto-detects TTY
    }
    logger::set_verbose(cli.verbose);

    let config = RunConfig::load(&cli)?;

    std::fs::create_dir_all(&config.output)
        .with_context(|| format!("cannot create {}", config.output.display()))?;
    let log_path = config.output.join(LOG_FILE);
    if let Err(e) = logger::install_file_sink(&log_path) {
        log!("warn"; "cannot write {}: {}", log_path.display(), e);
    }

    let result = process(&config);
    logger::close_file_sink();
    result
}

fn process(config: &RunConfig) -> Result<()> {
    log!(
        "webimg";
        "{} -> {}{}",
        config.input.display(),
        config.output.display(),
        if config.dry_run { " (DRY RUN)" } else { "" }
    );

    let tools = if config.dry_run {
        ExternalTools::detached()
    } else {
        let missing = tools::missing_programs();
        if !missing.is_empty() {
            log!(
                "warn";
                "not found on PATH: {}; affected files will be reported as problems",
                missing.join(", ")
            );
        }
        ExternalTools::open()
    };
    let progress = StageProgress::new();
    let summary = pipeline::run(config, &tools, &progress);
    tools.close();

    summary?.log();
    Ok(())
}
