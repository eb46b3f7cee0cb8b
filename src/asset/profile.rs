//! Output profiles (named rendition targets).

use serde::{Deserialize, Serialize};

use super::MediaKind;

/// Directory names under `media/` that a profile must not shadow.
pub const RESERVED_NAMES: &[&str] = &["original", "converted"];

/// A named rendition target.
///
/// A profile with an image height produces resized images and, for videos,
/// a preview frame of that height. A profile with a video height produces
/// resized videos.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputProfile {
    pub name: String,
    #[serde(default)]
    pub image_height: Option<u32>,
    #[serde(default)]
    pub video_height: Option<u32>,
    /// Set to `false` to suppress video previews for this profile.
    #[serde(default = "default_true")]
    pub video_preview: bool,
}

const fn default_true() -> bool {
    true
}

impl OutputProfile {
    pub fn image(name: &str, height: u32) -> Self {
        Self {
            name: name.to_owned(),
            image_height: Some(height),
            video_height: None,
            video_preview: true,
        }
    }

    /// Disable preview frames for this profile.
    pub fn without_preview(mut self) -> Self {
        self.video_preview = false;
        self
    }

    /// Target height for resizing media of `kind`, if this profile has one.
    pub fn target_height(&self, kind: MediaKind) -> Option<u32> {
        match kind {
            MediaKind::Image => self.image_height,
            MediaKind::Video => self.video_height,
        }
    }

    /// Height of the video preview frame, if this profile produces one.
    pub fn preview_height(&self) -> Option<u32> {
        self.image_height.filter(|_| self.video_preview)
    }
}

/// Compiled-in profiles.
pub fn default_profiles() -> Vec<OutputProfile> {
    vec![
        OutputProfile::image("large", 1440).without_preview(),
        OutputProfile::image("small", 220),
        OutputProfile::image("thumb", 120),
    ]
}

/// Check a profile list for empty, reserved or duplicate names.
pub fn validate_profiles(profiles: &[OutputProfile]) -> Result<(), String> {
    for (i, profile) in profiles.iter().enumerate() {
        let name = profile.name.as_str();
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(format!("invalid profile name `{name}`"));
        }
        if RESERVED_NAMES.contains(&name) {
            return Err(format!("profile name `{name}` is reserved"));
        }
        if profiles[..i].iter().any(|p| p.name == name) {
            return Err(format!("duplicate profile `{name}`"));
        }
    }
    Ok(())
}
