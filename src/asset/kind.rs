//! Media kind detection.

use std::path::Path;

/// Kind of source media, determines which stages apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    /// Still image (.jpg, .png, .heic)
    Image,
    /// Video clip (.mov, .mp4)
    Video,
}

/// Extensions that need a format conversion before the web can use them,
/// paired with the extension of the converted artifact.
const CONVERSIONS: &[(&str, &str)] = &[("heic", ".jpg"), ("mov", ".mp4")];

impl MediaKind {
    /// Detect media kind from file extension (case-insensitive).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "png" | "heic" => Some(Self::Image),
            "mov" | "mp4" => Some(Self::Video),
            _ => None,
        }
    }

    /// Detect media kind from file path.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// Check if a path is a recognised media file.
    #[inline]
    pub fn is_media_file(path: &Path) -> bool {
        Self::from_path(path).is_some()
    }
}

/// Target extension (with leading dot) when `path` needs conversion.
pub fn conversion_target(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    CONVERSIONS
        .iter()
        .find(|(from, _)| *from == ext)
        .map(|(_, to)| *to)
}
