//! End-to-end runs against a recording fake of the media tools.

use parking_lot::Mutex;
use serde_json::json;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

use super::*;
use crate::asset::{MediaKind, MetadataBag, default_profiles};
use crate::index::Index;
use crate::tools::ToolError;

// ============================================================================
// Fake tools
// ============================================================================

#[derive(Default)]
struct FakeTools {
    /// `(action, source file name)` in call order
    calls: Mutex<Vec<(&'static str, String)>>,
    /// Every action on a source with this file name fails
    fail_on: Option<&'static str>,
    /// Sources reported as live-photo companion clips
    companions: Vec<&'static str>,
    /// Resizing this file name to this height fails
    fail_resize: Option<(&'static str, u32)>,
    hdr: bool,
}

impl FakeTools {
    fn record(&self, action: &'static str, src: &Path) -> Result<(), ToolError> {
        let name = file_name(src);
        self.calls.lock().push((action, name.clone()));
        if self.fail_on.is_some_and(|f| name.starts_with(f)) {
            return Err(ToolError::Failed(format!("{action} failed")));
        }
        Ok(())
    }

    fn resize(&self, src: &Path, dest: &Path, height: u32) -> Result<(), ToolError> {
        self.record("resize", src)?;
        if self
            .fail_resize
            .is_some_and(|(name, h)| h == height && file_name(src) == name)
        {
            return Err(ToolError::Failed(format!("resize to {height} failed")));
        }
        write_placeholder(dest)
    }

    fn count(&self, action: &str) -> usize {
        self.calls.lock().iter().filter(|(a, _)| *a == action).count()
    }

    fn total(&self) -> usize {
        self.calls.lock().len()
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn write_placeholder(dest: &Path) -> Result<(), ToolError> {
    fs::write(dest, b"derived")?;
    Ok(())
}

impl MediaTools for FakeTools {
    fn extract_metadata(&self, src: &Path) -> Result<MetadataBag, ToolError> {
        self.record("metadata", src)?;
        let mut fields = MetadataBag::new();
        fields.insert("DateTimeOriginal".into(), json!("2023:06:01 10:00:00"));
        let name = file_name(src);
        if self.companions.iter().any(|c| *c == name) {
            fields.insert("LivePhotoAuto".into(), json!(1));
        }
        Ok(fields)
    }

    fn probe_hdr(&self, src: &Path) -> Result<bool, ToolError> {
        self.record("hdr", src)?;
        Ok(self.hdr)
    }

    fn convert(&self, _kind: MediaKind, src: &Path, dest: &Path) -> Result<(), ToolError> {
        self.record("convert", src)?;
        write_placeholder(dest)
    }

    fn resize_image(&self, src: &Path, dest: &Path, height: u32) -> Result<(), ToolError> {
        self.resize(src, dest, height)
    }

    fn resize_video(&self, src: &Path, dest: &Path, height: u32) -> Result<(), ToolError> {
        self.resize(src, dest, height)
    }

    fn extract_preview(
        &self,
        src: &Path,
        dest: &Path,
        _height: u32,
        _hdr: bool,
    ) -> Result<(), ToolError> {
        self.record("preview", src)?;
        write_placeholder(dest)
    }
}

// ============================================================================
// Fixture
// ============================================================================

struct Library {
    _temp: TempDir,
    root: PathBuf,
    lib: PathBuf,
    out: PathBuf,
}

impl Library {
    fn new(files: &[&str]) -> Self {
        let temp = TempDir::new().unwrap();
        let root = fs::canonicalize(temp.path()).unwrap();
        let lib = root.join("lib");
        fs::create_dir(&lib).unwrap();
        let library = Self {
            _temp: temp,
            out: root.join("out"),
            root,
            lib,
        };
        for file in files {
            library.add(file);
        }
        library
    }

    fn add(&self, rel: &str) {
        let path = self.lib.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, rel.as_bytes()).unwrap();
        set_mtime(&path, 1_000);
    }

    fn config(&self) -> RunConfig {
        RunConfig {
            input: self.lib.clone(),
            output: self.out.clone(),
            exclude: Vec::new(),
            relocate_converted: None,
            dry_run: false,
            jobs: Some(2),
            profiles: default_profiles(),
        }
    }

    fn media(&self, rel: &str) -> PathBuf {
        self.out.join("media").join(rel)
    }

    fn processed(&self) -> Vec<(String, bool)> {
        let index = Index::open(&self.out).unwrap();
        let mut rows: Vec<_> = index
            .live_records()
            .unwrap()
            .into_iter()
            .map(|r| (r.path, r.processed))
            .collect();
        rows.sort();
        rows
    }
}

fn set_mtime(path: &Path, secs: u64) {
    File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
        .unwrap();
}

fn run_with(config: &RunConfig, tools: &FakeTools) -> RunSummary {
    run(config, tools, &NullProgress).unwrap()
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_first_run_builds_every_rendition() {
    let library = Library::new(&["a.heic", "2023/b.jpg"]);
    let tools = FakeTools::default();

    let summary = run_with(&library.config(), &tools);

    assert_eq!(summary.reconcile.inserted, 2);
    assert_eq!(summary.converted(), 1);
    assert_eq!(summary.resized(), 6);
    assert_eq!(summary.linked(), 2);
    assert_eq!(summary.processed, 2);
    assert!(summary.problems.is_empty());

    assert!(library.media("converted/a.heic__.jpg").is_file());
    for profile in ["large", "small", "thumb"] {
        assert!(library.media(&format!("{profile}/a.heic__.jpg")).is_file());
        assert!(library.media(&format!("{profile}/2023/b.jpg")).is_file());
    }
    let link = library.media("original/2023/b.jpg");
    assert_eq!(fs::read_link(&link).unwrap(), library.lib.join("2023/b.jpg"));

    assert_eq!(
        library.processed(),
        [("2023/b.jpg".to_owned(), true), ("a.heic".to_owned(), true)]
    );
}

#[test]
fn test_second_run_is_noop() {
    let library = Library::new(&["a.heic", "b.jpg"]);
    let tools = FakeTools::default();
    run_with(&library.config(), &tools);
    let calls = tools.total();

    let summary = run_with(&library.config(), &tools);
    assert!(summary.is_noop(), "{summary:?}");
    assert_eq!(tools.total(), calls);
}

#[test]
fn test_modified_source_is_regenerated() {
    let library = Library::new(&["a.heic", "b.jpg"]);
    let tools = FakeTools::default();
    run_with(&library.config(), &tools);

    set_mtime(&library.lib.join("b.jpg"), 2_000);
    let summary = run_with(&library.config(), &tools);

    assert_eq!(summary.reconcile.touched, 1);
    assert_eq!(summary.converted(), 0);
    assert_eq!(summary.resized(), 3);
    assert_eq!(summary.processed, 1);
    assert!(library.processed().iter().all(|(_, done)| *done));
}

#[test]
fn test_removed_source_is_collected_then_revived() {
    let library = Library::new(&["a.heic", "b.jpg"]);
    let tools = FakeTools::default();
    run_with(&library.config(), &tools);

    let source = library.lib.join("b.jpg");
    fs::remove_file(&source).unwrap();
    let summary = run_with(&library.config(), &tools);

    assert_eq!(summary.reconcile.tombstoned, 1);
    // original link plus three renditions
    assert_eq!(summary.deleted(), 4);
    assert!(!library.media("small/b.jpg").exists());
    assert!(fs::symlink_metadata(library.media("original/b.jpg")).is_err());
    assert!(library.media("small/a.heic__.jpg").exists());

    // Same bytes, same modification time: the tombstone comes back
    library.add("b.jpg");
    let summary = run_with(&library.config(), &tools);
    assert_eq!(summary.reconcile.revived, 1);
    assert_eq!(summary.resized(), 3);
    assert_eq!(summary.linked(), 1);
    assert!(library.media("small/b.jpg").is_file());
}

#[test]
fn test_orphans_in_media_are_deleted() {
    let library = Library::new(&["b.jpg"]);
    let stray = library.media("thumb/old/gone.jpg");
    fs::create_dir_all(stray.parent().unwrap()).unwrap();
    fs::write(&stray, b"x").unwrap();

    let summary = run_with(&library.config(), &FakeTools::default());
    assert_eq!(summary.deleted(), 1);
    assert!(!library.media("thumb/old").exists());
    assert!(library.media("thumb/b.jpg").is_file());
}

#[test]
fn test_failure_stays_with_its_asset() {
    let library = Library::new(&["a.heic", "b.jpg"]);
    let failing = FakeTools {
        fail_on: Some("b.jpg"),
        ..Default::default()
    };

    let summary = run_with(&library.config(), &failing);

    assert!(!summary.problems.is_empty());
    assert!(summary.problems.iter().all(|p| p.rel_path == "b.jpg"));
    assert_eq!(summary.processed, 1);
    assert_eq!(
        library.processed(),
        [("a.heic".to_owned(), true), ("b.jpg".to_owned(), false)]
    );

    // Healthy tools finish the job on the next run
    let tools = FakeTools::default();
    let summary = run_with(&library.config(), &tools);
    assert!(summary.problems.is_empty());
    assert_eq!(summary.processed, 1);
    assert_eq!(tools.count("convert"), 0);
    assert!(library.media("large/b.jpg").is_file());
}

#[test]
fn test_one_failed_rendition_is_one_problem() {
    let library = Library::new(&["a.heic", "b.jpg", "v.mp4"]);
    let tools = FakeTools {
        fail_resize: Some(("b.jpg", 220)),
        ..Default::default()
    };

    let summary = run_with(&library.config(), &tools);

    assert_eq!(summary.problems.len(), 1, "{:?}", summary.problems);
    let problem = &summary.problems[0];
    assert_eq!((problem.rel_path.as_str(), problem.stage), ("b.jpg", "resize"));
    let resize = summary.stage("resize").unwrap();
    assert_eq!((resize.attempted, resize.failed), (6, 1));

    // Later stages still ran for every asset, the failing one included
    assert_eq!(summary.previews(), 2);
    assert_eq!(summary.linked(), 3);
    assert!(library.media("large/b.jpg").is_file());
    assert!(library.media("thumb/b.jpg").is_file());
    assert!(!library.media("small/b.jpg").exists());
    assert!(library.media("small/a.heic__.jpg").is_file());
    assert!(library.media("original/b.jpg").exists());

    // Present outputs do not make the failing asset processed
    assert_eq!(summary.processed, 2);
    assert_eq!(
        library.processed(),
        [
            ("a.heic".to_owned(), true),
            ("b.jpg".to_owned(), false),
            ("v.mp4".to_owned(), true),
        ]
    );

    // The next run redoes the unprocessed asset only
    let tools = FakeTools::default();
    let summary = run_with(&library.config(), &tools);
    assert_eq!(tools.count("resize"), 3);
    assert_eq!(tools.count("preview"), 0);
    assert_eq!(summary.processed, 1);
    assert!(library.media("small/b.jpg").is_file());
}

#[test]
fn test_moved_library_relinks_originals() {
    let library = Library::new(&["a.heic", "2023/b.jpg"]);
    let tools = FakeTools::default();
    run_with(&library.config(), &tools);

    let moved = library.root.join("moved");
    fs::rename(&library.lib, &moved).unwrap();
    let config = RunConfig {
        input: moved.clone(),
        ..library.config()
    };
    let summary = run_with(&config, &tools);

    assert!(summary.reconcile.is_unchanged());
    assert_eq!(summary.linked(), 2);
    for rel in ["a.heic", "2023/b.jpg"] {
        let link = library.media(&format!("original/{rel}"));
        assert_eq!(fs::read_link(&link).unwrap(), moved.join(rel));
        assert!(link.exists(), "{} dangles", link.display());
    }

    let summary = run_with(&config, &tools);
    assert!(summary.is_noop(), "{summary:?}");
}

#[test]
fn test_failed_resize_leaves_no_partial_output() {
    struct PartialWrites;

    impl MediaTools for PartialWrites {
        fn extract_metadata(&self, _: &Path) -> Result<MetadataBag, ToolError> {
            Ok(MetadataBag::new())
        }
        fn probe_hdr(&self, _: &Path) -> Result<bool, ToolError> {
            Ok(false)
        }
        fn convert(&self, _: MediaKind, _: &Path, _: &Path) -> Result<(), ToolError> {
            Ok(())
        }
        fn resize_image(&self, _: &Path, dest: &Path, _: u32) -> Result<(), ToolError> {
            fs::write(dest, b"trunc")?;
            Err(ToolError::Failed("disk full".into()))
        }
        fn resize_video(&self, _: &Path, _: &Path, _: u32) -> Result<(), ToolError> {
            Ok(())
        }
        fn extract_preview(&self, _: &Path, _: &Path, _: u32, _: bool) -> Result<(), ToolError> {
            Ok(())
        }
    }

    let library = Library::new(&["b.png"]);
    let summary = run(&library.config(), &PartialWrites, &NullProgress).unwrap();

    assert_eq!(summary.stage("resize").unwrap().failed, 3);
    assert!(!library.media("small/b.png").exists());
    assert_eq!(summary.processed, 0);
}

#[test]
fn test_dry_run_changes_nothing() {
    let library = Library::new(&["a.heic", "b.jpg"]);
    let tools = FakeTools::default();
    let config = RunConfig {
        dry_run: true,
        ..library.config()
    };

    let summary = run_with(&config, &tools);

    assert!(summary.dry_run);
    assert_eq!(tools.total(), 0);
    assert_eq!(summary.attempted("convert"), 1);
    assert_eq!(summary.attempted("link"), 2);
    assert_eq!(summary.processed, 2);
    assert!(!library.media("").exists());
    assert!(!library.out.join(crate::index::INDEX_FILE).exists());

    // The real index is untouched, so a real run still does everything
    let summary = run_with(&library.config(), &tools);
    assert_eq!(summary.reconcile.inserted, 2);
    assert_eq!(summary.converted(), 1);
}

#[test]
fn test_dry_run_does_not_collect() {
    let library = Library::new(&["b.jpg"]);
    run_with(&library.config(), &FakeTools::default());
    fs::remove_file(library.lib.join("b.jpg")).unwrap();

    let config = RunConfig {
        dry_run: true,
        ..library.config()
    };
    let summary = run_with(&config, &FakeTools::default());
    assert_eq!(summary.deleted(), 4);
    assert!(library.media("small/b.jpg").is_file());
    assert_eq!(library.processed(), [("b.jpg".to_owned(), true)]);
}

#[test]
fn test_converted_artifacts_relocated() {
    let library = Library::new(&["a.heic"]);
    let archive = library.root.join("archive");
    let config = RunConfig {
        relocate_converted: Some(archive.clone()),
        ..library.config()
    };
    let tools = FakeTools::default();

    run_with(&config, &tools);

    let relocated = archive.join("a.heic__.jpg");
    let converted = library.media("converted/a.heic__.jpg");
    assert!(relocated.is_file());
    assert_eq!(fs::read_link(&converted).unwrap(), relocated);
    assert!(library.media("thumb/a.heic__.jpg").is_file());

    let summary = run_with(&config, &tools);
    assert!(summary.is_noop(), "{summary:?}");
    assert!(relocated.is_file());
}

#[test]
fn test_video_previews_follow_hdr() {
    let library = Library::new(&["clip.mov", "v.mp4"]);
    let tools = FakeTools {
        hdr: true,
        ..Default::default()
    };

    let summary = run_with(&library.config(), &tools);

    assert_eq!(tools.count("hdr"), 2);
    assert_eq!(summary.converted(), 1);
    // small and thumb; large has previews disabled
    assert_eq!(summary.previews(), 4);
    assert!(library.media("converted/clip.mov__.mp4").is_file());
    assert!(library.media("small/v.mp4__.png").is_file());
    assert!(library.media("thumb/clip.mov__.png").is_file());
    assert!(!library.media("large/v.mp4__.png").exists());
    assert!(summary.problems.is_empty());

    // The HDR flag is cached in the index
    let summary = run_with(&library.config(), &tools);
    assert!(summary.is_noop(), "{summary:?}");
    assert_eq!(tools.count("hdr"), 2);
}

#[test]
fn test_companion_clips_are_skipped() {
    let library = Library::new(&["IMG_1.heic", "IMG_1.mov"]);
    let tools = FakeTools {
        companions: vec!["IMG_1.mov"],
        ..Default::default()
    };

    let summary = run_with(&library.config(), &tools);

    assert_eq!(summary.filtered, 1);
    assert_eq!(tools.count("hdr"), 0);
    assert_eq!(summary.linked(), 1);
    assert!(fs::symlink_metadata(library.media("original/IMG_1.mov")).is_err());
    assert_eq!(
        library.processed(),
        [("IMG_1.heic".to_owned(), true), ("IMG_1.mov".to_owned(), false)]
    );
}

#[test]
fn test_excluded_paths_are_not_indexed() {
    let library = Library::new(&["keep.jpg", "trash/drop.jpg"]);
    let config = RunConfig {
        exclude: vec!["trash/**".into()],
        ..library.config()
    };

    let summary = run_with(&config, &FakeTools::default());
    assert_eq!(summary.reconcile.inserted, 1);
    assert!(!library.media("small/trash").exists());
}

#[test]
fn test_missing_input_is_fatal() {
    let library = Library::new(&[]);
    let config = RunConfig {
        input: library.root.join("nowhere"),
        ..library.config()
    };
    assert!(run(&config, &FakeTools::default(), &NullProgress).is_err());
}
