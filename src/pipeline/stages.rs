//! The producing stages, in pipeline order.
//!
//! | stage      | applies to            | stale when                          |
//! |------------|-----------------------|-------------------------------------|
//! | `metadata` | all                   | no extracted fields                 |
//! | `hdr`      | videos                | HDR flag unknown                    |
//! | `convert`  | heic, mov             | converted file missing or unprocessed |
//! | `resize`   | profiles with a size  | rendition missing or unprocessed    |
//! | `preview`  | videos, preview profiles | frame missing or unprocessed     |
//! | `link`     | all                   | link missing or pointing elsewhere  |

use anyhow::{Context, Result, bail};

use super::stage::{Effect, Stage, StageEnv, Task};
use crate::asset::{AssetDescriptor, AssetMetadata, MediaKind};
use crate::utils::fs::{move_file, symlink};

/// Regenerate when the artifact is missing or the source changed.
fn is_stale(asset: &AssetDescriptor, exists: bool) -> bool {
    !exists || !asset.processed
}

// ============================================================================
// Metadata
// ============================================================================

pub struct MetadataStage;

impl Stage for MetadataStage {
    fn name(&self) -> &'static str {
        "metadata"
    }

    fn plan(&self, asset: &AssetDescriptor) -> Vec<Task> {
        let extracted = asset.metadata.as_ref().is_some_and(AssetMetadata::has_fields);
        if extracted {
            Vec::new()
        } else {
            vec![Task::ExtractMetadata]
        }
    }

    fn execute(&self, asset: &AssetDescriptor, _task: &Task, env: &StageEnv<'_>) -> Result<Effect> {
        let fields = env.tools.extract_metadata(&asset.source)?;

        let mut metadata = AssetMetadata::from_fields(fields);
        metadata.hdr = asset.hdr();

        env.index.set_metadata(asset.id, &metadata)?;
        env.index
            .set_capture_date(asset.id, metadata.capture_timestamp_ms())?;
        Ok(Effect::Metadata(metadata))
    }
}

// ============================================================================
// HDR classification
// ============================================================================

pub struct HdrStage;

impl Stage for HdrStage {
    fn name(&self) -> &'static str {
        "hdr"
    }

    fn plan(&self, asset: &AssetDescriptor) -> Vec<Task> {
        if asset.is_video() && asset.hdr().is_none() {
            vec![Task::ClassifyHdr]
        } else {
            Vec::new()
        }
    }

    fn execute(&self, asset: &AssetDescriptor, _task: &Task, env: &StageEnv<'_>) -> Result<Effect> {
        let hdr = env.tools.probe_hdr(&asset.source)?;

        let mut metadata = asset.metadata.clone().unwrap_or_default();
        metadata.hdr = Some(hdr);

        env.index.set_metadata(asset.id, &metadata)?;
        Ok(Effect::Metadata(metadata))
    }
}

// ============================================================================
// Format conversion
// ============================================================================

pub struct ConvertStage;

impl Stage for ConvertStage {
    fn name(&self) -> &'static str {
        "convert"
    }

    fn plan(&self, asset: &AssetDescriptor) -> Vec<Task> {
        match asset.conversion_dest() {
            Some(dest) if is_stale(asset, dest.exists()) => vec![Task::Convert { dest }],
            _ => Vec::new(),
        }
    }

    fn execute(&self, asset: &AssetDescriptor, task: &Task, env: &StageEnv<'_>) -> Result<Effect> {
        let Task::Convert { dest } = task else {
            bail!("unexpected task `{task}`");
        };
        env.tools.convert(asset.kind, &asset.source, dest)?;

        // Move the artifact to the archive and leave a link in its place,
        // so later stages keep reading `dest`.
        if let Some(archive) = env.archive
            && let Some(relocated) = asset.relocated_path(archive)
        {
            move_file(dest, &relocated)
                .with_context(|| format!("cannot move to {}", relocated.display()))?;
            symlink(&relocated, dest)
                .with_context(|| format!("cannot link {}", dest.display()))?;
        }
        Ok(Effect::None)
    }
}

// ============================================================================
// Resizing
// ============================================================================

pub struct ResizeStage;

impl Stage for ResizeStage {
    fn name(&self) -> &'static str {
        "resize"
    }

    fn plan(&self, asset: &AssetDescriptor) -> Vec<Task> {
        asset
            .resize_targets()
            .map(|(profile, height)| (profile, height, asset.resized_dest(profile)))
            .filter(|(_, _, dest)| is_stale(asset, dest.exists()))
            .map(|(profile, height, dest)| Task::Resize {
                profile: profile.name.clone(),
                height,
                dest,
            })
            .collect()
    }

    fn execute(&self, asset: &AssetDescriptor, task: &Task, env: &StageEnv<'_>) -> Result<Effect> {
        let Task::Resize { height, dest, .. } = task else {
            bail!("unexpected task `{task}`");
        };
        let src = asset.working_source();
        match asset.kind {
            MediaKind::Image => env.tools.resize_image(&src, dest, *height)?,
            MediaKind::Video => env.tools.resize_video(&src, dest, *height)?,
        }
        Ok(Effect::None)
    }
}

// ============================================================================
// Video previews
// ============================================================================

pub struct PreviewStage;

impl Stage for PreviewStage {
    fn name(&self) -> &'static str {
        "preview"
    }

    fn plan(&self, asset: &AssetDescriptor) -> Vec<Task> {
        asset
            .preview_targets()
            .map(|(profile, height)| (profile, height, asset.preview_dest(profile)))
            .filter(|(_, _, dest)| is_stale(asset, dest.as_ref().is_some_and(|d| d.exists())))
            .map(|(profile, height, dest)| Task::Preview {
                profile: profile.name.clone(),
                height,
                dest,
            })
            .collect()
    }

    fn execute(&self, asset: &AssetDescriptor, task: &Task, env: &StageEnv<'_>) -> Result<Effect> {
        let Task::Preview { height, dest, .. } = task else {
            bail!("unexpected task `{task}`");
        };
        let (Some(dest), Some(hdr)) = (dest, asset.hdr()) else {
            bail!("HDR classification unknown");
        };
        env.tools.extract_preview(&asset.source, dest, *height, hdr)?;
        Ok(Effect::None)
    }
}

// ============================================================================
// Original links
// ============================================================================

pub struct LinkStage;

impl Stage for LinkStage {
    fn name(&self) -> &'static str {
        "link"
    }

    fn plan(&self, asset: &AssetDescriptor) -> Vec<Task> {
        if asset.is_original_linked() {
            Vec::new()
        } else {
            vec![Task::LinkOriginal {
                dest: asset.original_dest(),
            }]
        }
    }

    fn execute(&self, asset: &AssetDescriptor, task: &Task, _env: &StageEnv<'_>) -> Result<Effect> {
        let Task::LinkOriginal { dest } = task else {
            bail!("unexpected task `{task}`");
        };
        symlink(&asset.source, dest)
            .with_context(|| format!("cannot link {}", dest.display()))?;
        Ok(Effect::None)
    }
}
