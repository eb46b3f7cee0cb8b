//! [`MediaTools`] backed by ExifTool, ImageMagick and FFmpeg.

use std::path::Path;

use super::resize::resize_to_height;
use super::{ExifToolSession, MediaTools, ToolError};
use crate::asset::{MediaKind, MetadataBag};
use crate::exec;
use crate::utils::exec::SILENT_FILTER;

/// Tone-map chain applied to HDR frames before scaling.
const TONEMAP_FILTER: &str =
    "zscale=t=linear:npl=100,format=gbrpf32le,tonemap=hable,zscale=t=bt709:m=bt709:r=tv,format=yuv420p";

/// Transfer/gamut marker of wide-gamut HDR video.
const HDR_MARKER: &str = "bt2020";

/// The production collaborator set.
///
/// Owns the ExifTool session; call [`ExternalTools::close`] when the run
/// ends (dropping also closes it).
pub struct ExternalTools {
    exiftool: ExifToolSession,
}

impl ExternalTools {
    pub fn open() -> Self {
        Self {
            exiftool: ExifToolSession::start(),
        }
    }

    /// Tools that spawn nothing up front, for runs that only plan.
    pub fn detached() -> Self {
        Self {
            exiftool: ExifToolSession::detached(),
        }
    }

    pub fn close(&self) {
        self.exiftool.close();
    }
}

impl MediaTools for ExternalTools {
    fn extract_metadata(&self, src: &Path) -> Result<MetadataBag, ToolError> {
        self.exiftool.extract(src)
    }

    fn probe_hdr(&self, src: &Path) -> Result<bool, ToolError> {
        let output = exec!(
            "ffprobe";
            "-v", "error",
            "-select_streams", "v:0",
            "-show_entries", "stream=color_space,color_transfer,color_primaries",
            "-of", "default=noprint_wrappers=1",
            src
        )?;
        Ok(classify_hdr_probe(&String::from_utf8_lossy(&output.stdout)))
    }

    fn convert(&self, kind: MediaKind, src: &Path, dest: &Path) -> Result<(), ToolError> {
        match kind {
            MediaKind::Image => exec!("magick"; src, dest)?,
            MediaKind::Video => exec!(
                filter=&SILENT_FILTER;
                "ffmpeg";
                "-hide_banner", "-loglevel", "error", "-y",
                "-i", src,
                dest
            )?,
        };
        Ok(())
    }

    fn resize_image(&self, src: &Path, dest: &Path, height: u32) -> Result<(), ToolError> {
        resize_to_height(src, dest, height)
    }

    fn resize_video(&self, src: &Path, dest: &Path, height: u32) -> Result<(), ToolError> {
        exec!(
            filter=&SILENT_FILTER;
            "ffmpeg";
            "-hide_banner", "-loglevel", "error", "-y",
            "-i", src,
            "-vf", format!("scale=-2:{height}"),
            dest
        )?;
        Ok(())
    }

    fn extract_preview(
        &self,
        src: &Path,
        dest: &Path,
        height: u32,
        hdr: bool,
    ) -> Result<(), ToolError> {
        exec!(
            filter=&SILENT_FILTER;
            "ffmpeg";
            "-hide_banner", "-loglevel", "error", "-y",
            "-i", src,
            "-vf", preview_filter(height, hdr),
            "-vframes", "1",
            dest
        )?;
        Ok(())
    }
}

/// Video filter for a preview frame.
fn preview_filter(height: u32, hdr: bool) -> String {
    let scale = format!("scale=-1:{height}");
    if hdr {
        format!("{TONEMAP_FILTER},{scale}")
    } else {
        scale
    }
}

/// Classify `ffprobe` stream output as HDR.
///
/// Only the first line (the color space) is read; a missing or unrecognised
/// line counts as SDR.
pub fn classify_hdr_probe(stdout: &str) -> bool {
    stdout
        .lines()
        .next()
        .and_then(|line| line.split_once('='))
        .is_some_and(|(_, value)| value.to_ascii_lowercase().contains(HDR_MARKER))
}
