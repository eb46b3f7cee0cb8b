//! External media collaborators.
//!
//! The pipeline only sees [`MediaTools`]: every action takes a source path
//! (plus destination and size where relevant) and either produces the
//! artifact or fails with a [`ToolError`] wrapping the underlying cause.
//! Pixel and stream work is delegated to ImageMagick, FFmpeg and ExifTool,
//! except image resizing, which uses the `image` crate.

mod exiftool;
mod external;
mod resize;

pub use exiftool::ExifToolSession;
pub use external::ExternalTools;

use std::io;
use std::path::Path;
use thiserror::Error;

use crate::asset::{MediaKind, MetadataBag};
use crate::utils::exec::ExecError;

/// Programs the external tools call.
pub const REQUIRED_PROGRAMS: &[&str] = &["exiftool", "magick", "ffmpeg", "ffprobe"];

#[derive(Debug, Error)]
pub enum ToolError {
    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("`{0}` is not available")]
    Unavailable(&'static str),

    #[error("cannot decode `{tool}` output")]
    Decode {
        tool: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("image processing failed")]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("{0}")]
    Failed(String),
}

/// Fallible media actions consumed by the stage runner.
///
/// Implementations are shared across worker threads. An action that fails
/// may leave a partial file at `dest`; the runner removes it.
pub trait MediaTools: Sync {
    /// Opaque metadata fields of `src`.
    fn extract_metadata(&self, src: &Path) -> Result<MetadataBag, ToolError>;

    /// Whether the primary video stream of `src` is HDR.
    fn probe_hdr(&self, src: &Path) -> Result<bool, ToolError>;

    /// Convert `src` into the format implied by `dest`'s extension.
    fn convert(&self, kind: MediaKind, src: &Path, dest: &Path) -> Result<(), ToolError>;

    /// Orientation-corrected copy of `src` scaled to `height`.
    fn resize_image(&self, src: &Path, dest: &Path, height: u32) -> Result<(), ToolError>;

    fn resize_video(&self, src: &Path, dest: &Path, height: u32) -> Result<(), ToolError>;

    /// One frame of `src` scaled to `height`, tone-mapped to SDR when `hdr`.
    fn extract_preview(
        &self,
        src: &Path,
        dest: &Path,
        height: u32,
        hdr: bool,
    ) -> Result<(), ToolError>;
}

/// Programs from [`REQUIRED_PROGRAMS`] that are not on `PATH`.
pub fn missing_programs() -> Vec<&'static str> {
    REQUIRED_PROGRAMS
        .iter()
        .copied()
        .filter(|program| which::which(program).is_err())
        .collect()
}
