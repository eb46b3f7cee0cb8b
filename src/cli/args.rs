//! Command-line interface definitions.

use clap::{ColorChoice, Parser};
use std::path::PathBuf;

/// Incremental photo/video library processor
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Library root to read photos and videos from
    #[arg(short, long, value_hint = clap::ValueHint::DirPath)]
    pub input: Option<PathBuf>,

    /// Output root for the index and the derived media tree
    #[arg(short, long, value_hint = clap::ValueHint::DirPath)]
    pub output: Option<PathBuf>,

    /// Config file path (TOML)
    #[arg(short = 'C', long, value_hint = clap::ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// Glob of library paths to skip (repeatable), e.g. `trash/**`
    #[arg(long, value_name = "GLOB")]
    pub exclude: Vec<String>,

    /// Move converted files to this directory and link them back
    #[arg(long, value_name = "DIR", value_hint = clap::ValueHint::DirPath)]
    pub relocate_converted: Option<PathBuf>,

    /// Report what would be done without touching files or the index
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Number of parallel jobs (default: available cores)
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Control colored output (auto, always, never)
    #[arg(long, default_value = "auto")]
    pub color: ColorChoice,
}
