//! Run configuration.
//!
//! Values come from an optional TOML file and the command line; the command
//! line wins. Relative paths in the file resolve against the file's
//! directory, relative paths on the command line against the working
//! directory.
//!
//! # Example
//!
//! ```toml
//! input = "~/Pictures/library"
//! output = "web"
//! exclude = ["trash/**", "**/*.tmp.jpg"]
//! relocate_converted = "/mnt/archive/converted"
//! jobs = 4
//!
//! [[profiles]]
//! name = "small"
//! image_height = 220
//! ```

mod error;

pub use error::ConfigError;

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::asset::{OutputProfile, default_profiles, validate_profiles};
use crate::cli::Cli;
use crate::log;

/// Contents of the TOML config file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    exclude: Vec<String>,
    relocate_converted: Option<PathBuf>,
    dry_run: bool,
    jobs: Option<usize>,
    profiles: Option<Vec<OutputProfile>>,
}

/// Fully resolved settings of one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Library root (canonical)
    pub input: PathBuf,
    /// Output root (absolute)
    pub output: PathBuf,
    /// Globs relative to `input`
    pub exclude: Vec<String>,
    /// Archive for converted artifacts
    pub relocate_converted: Option<PathBuf>,
    pub dry_run: bool,
    /// Worker count; `None` uses every core
    pub jobs: Option<usize>,
    pub profiles: Vec<OutputProfile>,
}

impl RunConfig {
    /// Merge the config file named by `cli` (if any) with `cli` itself.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let (file, base) = match &cli.config {
            Some(path) => {
                let path = absolute(&expand_tilde(path))?;
                let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
                (Self::read_file(&path)?, base)
            }
            None => (FileConfig::default(), PathBuf::new()),
        };
        Self::merge(cli, file, &base)
    }

    fn merge(cli: &Cli, file: FileConfig, base: &Path) -> Result<Self, ConfigError> {
        let from_file = |path: PathBuf| base.join(expand_tilde(&path));

        let input = match (&cli.input, file.input) {
            (Some(path), _) => absolute(path)?,
            (None, Some(path)) => from_file(path),
            (None, None) => {
                return Err(ConfigError::Validation(
                    "no input directory (use --input or `input` in the config file)".into(),
                ));
            }
        };
        let input = fs::canonicalize(&input).map_err(|e| ConfigError::Io(input, e))?;
        if !input.is_dir() {
            return Err(ConfigError::Validation(format!(
                "input `{}` is not a directory",
                input.display()
            )));
        }

        let output = match (&cli.output, file.output) {
            (Some(path), _) => absolute(path)?,
            (None, Some(path)) => absolute(&from_file(path))?,
            (None, None) => {
                return Err(ConfigError::Validation(
                    "no output directory (use --output or `output` in the config file)".into(),
                ));
            }
        };

        let relocate_converted = match (&cli.relocate_converted, file.relocate_converted) {
            (Some(path), _) => Some(absolute(path)?),
            (None, Some(path)) => Some(absolute(&from_file(path))?),
            (None, None) => None,
        };

        let exclude = if cli.exclude.is_empty() {
            file.exclude
        } else {
            cli.exclude.clone()
        };

        let jobs = cli.jobs.or(file.jobs);
        if jobs == Some(0) {
            return Err(ConfigError::Validation("`jobs` must be at least 1".into()));
        }

        if let Some(overrides) = &file.profiles {
            validate_profiles(overrides).map_err(ConfigError::Validation)?;
            log!("warn"; "custom `profiles` are ignored; the built-in profiles are used");
        }

        Ok(Self {
            input,
            output,
            exclude,
            relocate_converted,
            dry_run: cli.dry_run || file.dry_run,
            jobs,
            profiles: default_profiles(),
        })
    }

    /// Load the config file, warning about unknown keys.
    fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
        let content =
            fs::read_to_string(path).map_err(|err| ConfigError::Io(path.to_path_buf(), err))?;

        let (config, ignored) = parse_with_ignored(&content)?;
        if !ignored.is_empty() {
            log!("warn"; "unknown fields in {} ignored: {}", path.display(), ignored.join(", "));
        }
        Ok(config)
    }
}

/// Parse TOML content, collecting any unknown fields.
fn parse_with_ignored(content: &str) -> Result<(FileConfig, Vec<String>), ConfigError> {
    let mut ignored = Vec::new();
    let deserializer = toml::Deserializer::new(content);
    let config = serde_ignored::deserialize(deserializer, |path: serde_ignored::Path| {
        ignored.push(path.to_string());
    })?;
    Ok((config, ignored))
}

/// Expand a leading `~` to the home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    match path.to_str() {
        Some(s) => PathBuf::from(shellexpand::tilde(s).into_owned()),
        None => path.to_path_buf(),
    }
}

fn absolute(path: &Path) -> Result<PathBuf, ConfigError> {
    std::path::absolute(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))
}
