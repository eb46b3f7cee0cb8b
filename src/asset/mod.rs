//! Asset descriptors and derived-path mapping.
//!
//! Every derived path is a pure function of the asset's relative path, the
//! output root and a profile, so the garbage collector can recompute exactly
//! what the stages wrote.
//!
//! ```text
//! <output>/media/
//! ├── original/<rel>                  → symlink to the source
//! ├── converted/<rel>__.jpg|.mp4      → converted artifact (or link to archive)
//! └── <profile>/
//!     ├── <dest-rel>                  → resized rendition
//!     └── <rel>__.jpg|.png            → video preview (png when HDR)
//! ```

mod kind;
mod meta;
mod profile;

pub use kind::{MediaKind, conversion_target};
pub use meta::{AssetMetadata, MetadataBag};
pub use profile::{OutputProfile, default_profiles, validate_profiles};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::index::SourceRecord;
use crate::utils::fs::{join_rel, links_to};

/// Root of the derived tree inside the output directory.
pub const MEDIA_DIR: &str = "media";
pub const ORIGINAL_DIR: &str = "original";
pub const CONVERTED_DIR: &str = "converted";

const PREVIEW_EXT: &str = ".jpg";
const PREVIEW_EXT_HDR: &str = ".png";

/// `<output>/media`
pub fn media_root(output_root: &Path) -> PathBuf {
    output_root.join(MEDIA_DIR)
}

/// A live source asset, hydrated from its index row for one run.
///
/// The descriptor is never persisted; metadata changes made during a run are
/// written to the index by the stage that makes them.
#[derive(Debug, Clone)]
pub struct AssetDescriptor {
    /// Index row id
    pub id: i64,
    /// Path relative to the library root, `/`-separated
    pub rel_path: String,
    /// Absolute source path
    pub source: PathBuf,
    pub output_root: PathBuf,
    pub kind: MediaKind,
    pub metadata: Option<AssetMetadata>,
    pub processed: bool,
    pub profiles: Arc<[OutputProfile]>,
}

impl AssetDescriptor {
    /// Build a descriptor from an index row.
    ///
    /// Returns `None` when the row's extension is not a recognised media type.
    pub fn from_record(
        record: &SourceRecord,
        source_root: &Path,
        output_root: &Path,
        profiles: Arc<[OutputProfile]>,
    ) -> Option<Self> {
        let source = join_rel(source_root, &record.path);
        let kind = MediaKind::from_path(&source)?;
        Some(Self {
            id: record.id,
            rel_path: record.path.clone(),
            source,
            output_root: output_root.to_path_buf(),
            kind,
            metadata: record.metadata.clone(),
            processed: record.processed,
            profiles,
        })
    }

    pub fn is_video(&self) -> bool {
        self.kind == MediaKind::Video
    }

    /// Extension (with dot) of the converted artifact, if conversion is needed.
    pub fn converted_ext(&self) -> Option<&'static str> {
        conversion_target(&self.source)
    }

    pub fn needs_conversion(&self) -> bool {
        self.converted_ext().is_some()
    }

    /// Relative path of renditions: `<rel>__<ext>` for converted assets.
    pub fn dest_rel_path(&self) -> String {
        match self.converted_ext() {
            Some(ext) => format!("{}__{}", self.rel_path, ext),
            None => self.rel_path.clone(),
        }
    }

    fn media(&self) -> PathBuf {
        media_root(&self.output_root)
    }

    pub fn original_dest(&self) -> PathBuf {
        join_rel(&self.media().join(ORIGINAL_DIR), &self.rel_path)
    }

    pub fn conversion_dest(&self) -> Option<PathBuf> {
        self.needs_conversion()
            .then(|| join_rel(&self.media().join(CONVERTED_DIR), &self.dest_rel_path()))
    }

    /// Where a converted artifact lives when relocated to `archive`.
    pub fn relocated_path(&self, archive: &Path) -> Option<PathBuf> {
        self.needs_conversion()
            .then(|| join_rel(archive, &self.dest_rel_path()))
    }

    /// File that resizing reads from: the converted artifact when there is one.
    pub fn working_source(&self) -> PathBuf {
        self.conversion_dest().unwrap_or_else(|| self.source.clone())
    }

    pub fn resized_dest(&self, profile: &OutputProfile) -> PathBuf {
        join_rel(&self.media().join(&profile.name), &self.dest_rel_path())
    }

    /// Cached HDR classification.
    pub fn hdr(&self) -> Option<bool> {
        self.metadata.as_ref().and_then(|m| m.hdr)
    }

    /// Preview frame path; unknown until the video has been HDR-classified.
    pub fn preview_dest(&self, profile: &OutputProfile) -> Option<PathBuf> {
        let ext = if self.hdr()? { PREVIEW_EXT_HDR } else { PREVIEW_EXT };
        Some(self.preview_path_with(profile, ext))
    }

    /// Both possible preview paths, for when the HDR flag is unknown.
    pub fn preview_candidates(&self, profile: &OutputProfile) -> [PathBuf; 2] {
        [
            self.preview_path_with(profile, PREVIEW_EXT),
            self.preview_path_with(profile, PREVIEW_EXT_HDR),
        ]
    }

    fn preview_path_with(&self, profile: &OutputProfile, ext: &str) -> PathBuf {
        join_rel(
            &self.media().join(&profile.name),
            &format!("{}__{}", self.rel_path, ext),
        )
    }

    /// Capability check: companion clips of live photos are skipped.
    pub fn is_eligible(&self) -> bool {
        match self.kind {
            MediaKind::Image => true,
            MediaKind::Video => !self
                .metadata
                .as_ref()
                .is_some_and(AssetMetadata::is_companion_clip),
        }
    }

    /// Profiles with a size target for this asset's media kind.
    pub fn resize_targets(&self) -> impl Iterator<Item = (&OutputProfile, u32)> {
        self.profiles
            .iter()
            .filter_map(|p| p.target_height(self.kind).map(|h| (p, h)))
    }

    /// Profiles that produce a preview frame (videos only).
    pub fn preview_targets(&self) -> impl Iterator<Item = (&OutputProfile, u32)> {
        let is_video = self.is_video();
        self.profiles
            .iter()
            .filter(move |_| is_video)
            .filter_map(|p| p.preview_height().map(|h| (p, h)))
    }

    /// Every path under `media/` this asset should have after a full run.
    pub fn derived_paths(&self) -> Vec<PathBuf> {
        let mut paths = vec![self.original_dest()];
        paths.extend(self.conversion_dest());
        paths.extend(self.resize_targets().map(|(p, _)| self.resized_dest(p)));
        for (profile, _) in self.preview_targets() {
            match self.preview_dest(profile) {
                Some(path) => paths.push(path),
                None => paths.extend(self.preview_candidates(profile)),
            }
        }
        paths
    }

    /// Whether the original link exists and points at the current source.
    ///
    /// A link left behind by a moved library root does not count.
    pub fn is_original_linked(&self) -> bool {
        links_to(&self.original_dest(), &self.source)
    }
}
