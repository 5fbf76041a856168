//! Dataset layout and episode manifest tests.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use handcontact::{
    AnnotationError, DatasetLayout, EpisodeFrames, EpisodeManifest, FrameRecord,
    dataset::{EpisodeEntry, UNKNOWN_TASK, resolve_task},
};

fn write_meta(root: &Path, episodes: &str, tasks: Option<&str>) {
    let meta = root.join("meta");
    fs::create_dir_all(&meta).expect("Failed to create meta dir");
    fs::write(meta.join("episodes.jsonl"), episodes).expect("Failed to write episodes");
    if let Some(tasks) = tasks {
        fs::write(meta.join("tasks.jsonl"), tasks).expect("Failed to write tasks");
    }
}

// ── Layout ─────────────────────────────────────────────────────────

#[test]
fn video_path_uses_chunks() {
    let layout = DatasetLayout::new("/data/set");
    assert_eq!(
        layout.video_path(7),
        PathBuf::from("/data/set/videos/chunk-000/observation.images.cam_third/episode_000007.mp4")
    );
    assert_eq!(
        layout.video_path(1234),
        PathBuf::from("/data/set/videos/chunk-001/observation.images.cam_third/episode_001234.mp4")
    );
}

#[test]
fn layout_overrides() {
    let layout = DatasetLayout::new("root")
        .with_camera_key("observation.images.cam_head")
        .with_chunk_size(10);
    assert_eq!(layout.episode_chunk(25), 2);
    assert_eq!(
        layout.video_path(25),
        PathBuf::from("root/videos/chunk-002/observation.images.cam_head/episode_000025.mp4")
    );
    assert_eq!(DatasetLayout::new("root").with_chunk_size(0).episode_chunk(5), 5);
}

#[test]
fn reads_episodes_and_tasks() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    write_meta(
        directory.path(),
        "{\"episode_index\": 0, \"task_index\": 1, \"length\": 300}\n\n{\"episode_index\": 1, \"tasks\": [\"wipe\"]}\n",
        Some("{\"task_index\": 0, \"task\": \"pick cup\"}\n{\"task_index\": 1, \"task\": \"place cup\"}\n"),
    );
    let layout = DatasetLayout::new(directory.path());

    let episodes = layout.episodes(None).unwrap();
    assert_eq!(episodes.len(), 2);
    assert_eq!(episodes[0].task_index, Some(1));
    assert_eq!(episodes[1].tasks, ["wipe"]);

    let tasks = layout.tasks().unwrap();
    assert_eq!(resolve_task(&episodes[0], &tasks), "place cup");
    // No task index: index 0 is looked up first.
    assert_eq!(resolve_task(&episodes[1], &tasks), "pick cup");

    assert_eq!(layout.episodes(Some(1)).unwrap().len(), 1);
}

#[test]
fn missing_task_table_is_empty() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    write_meta(directory.path(), "{\"episode_index\": 0}\n", None);
    let layout = DatasetLayout::new(directory.path());
    assert!(layout.tasks().unwrap().is_empty());
}

#[test]
fn task_fallbacks() {
    let tasks = BTreeMap::new();
    let inline = EpisodeEntry {
        episode_index: 0,
        task_index: Some(3),
        tasks: vec!["stack blocks".to_string()],
    };
    assert_eq!(resolve_task(&inline, &tasks), "stack blocks");

    let bare = EpisodeEntry {
        episode_index: 0,
        task_index: None,
        tasks: Vec::new(),
    };
    assert_eq!(resolve_task(&bare, &tasks), UNKNOWN_TASK);
}

#[test]
fn bad_metadata_line_is_reported() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    write_meta(directory.path(), "{\"episode_index\": 0}\nnot json\n", None);
    let layout = DatasetLayout::new(directory.path());

    match layout.episodes(None) {
        Err(AnnotationError::InvalidMetadata { reason, .. }) => {
            assert!(reason.starts_with("line 2:"), "{reason}");
        }
        other => panic!("Expected InvalidMetadata, got: {other:?}"),
    }
}

// ── Manifest ───────────────────────────────────────────────────────

fn frames(indices: &[u64]) -> Vec<FrameRecord> {
    indices
        .iter()
        .map(|&frame_index| FrameRecord {
            frame_index,
            path: PathBuf::from(format!("frames/frame_{frame_index:06}.jpg")),
        })
        .collect()
}

#[test]
fn manifest_save_and_load() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let path = directory.path().join("episodes_meta.json");
    let manifest = EpisodeManifest::new(vec![EpisodeFrames {
        episode_index: 3,
        task_index: 1,
        task: "pick cup".to_string(),
        frames: frames(&[0, 10, 20]),
    }]);

    manifest.save(&path).unwrap();
    let loaded = EpisodeManifest::load(&path).unwrap();
    assert_eq!(loaded, manifest);
    assert_eq!(loaded.frame_count(), 3);

    // Stored as a plain array.
    let text = fs::read_to_string(&path).unwrap();
    assert!(text.starts_with('['));
}

#[test]
fn manifest_rejects_unordered_frames() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let path = directory.path().join("episodes_meta.json");
    EpisodeManifest::new(vec![EpisodeFrames {
        episode_index: 0,
        task_index: 0,
        task: String::new(),
        frames: frames(&[0, 20, 10]),
    }])
    .save(&path)
    .unwrap();

    assert!(matches!(
        EpisodeManifest::load(&path),
        Err(AnnotationError::InvalidMetadata { .. })
    ));
}

#[test]
fn manifest_task_index_is_optional() {
    let text = r#"[{"episode_index": 1, "task": "t", "frames": []}]"#;
    let manifest: EpisodeManifest = serde_json::from_str(text).unwrap();
    assert_eq!(manifest.episodes[0].task_index, 0);
    assert_eq!(manifest.frame_count(), 0);
}
