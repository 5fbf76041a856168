//! Frame sampler tests.
//!
//! Decoding tests require `tests/fixtures/sample_video.mp4` and are skipped
//! when it is absent.

use std::fs;
use std::path::Path;

use handcontact::{
    AnnotationError, CancellationToken, DatasetLayout, PipelineOptions, SampleOptions,
    sample_dataset, sample_episode, sample_video,
    sampler::{episode_dir_name, frame_file_name},
};

fn sample_video_path() -> &'static str {
    "tests/fixtures/sample_video.mp4"
}

#[test]
fn file_names() {
    assert_eq!(frame_file_name(40), "frame_000040.jpg");
    assert_eq!(episode_dir_name(3), "episode_000003");
}

#[test]
fn zero_step_rejected() {
    let result = sample_video(sample_video_path(), 0, &PipelineOptions::new(), |_, _| Ok(()));
    assert!(matches!(result, Err(AnnotationError::InvalidInterval)));
    assert!(SampleOptions::new(0).validate().is_err());
}

#[test]
fn missing_video_is_file_open_error() {
    let result = sample_video(
        "this_file_does_not_exist.mp4",
        5,
        &PipelineOptions::new(),
        |_, _| Ok(()),
    );
    assert!(matches!(result, Err(AnnotationError::FileOpen { .. })));
}

#[test]
fn invalid_video_is_rejected() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let path = directory.path().join("invalid.mp4");
    fs::write(&path, b"this is not a video").expect("Failed to write invalid file");

    let result = sample_video(&path, 5, &PipelineOptions::new(), |_, _| Ok(()));
    assert!(result.is_err());
}

#[test]
fn sampled_indices_are_multiples_of_step() {
    let path = sample_video_path();
    if !Path::new(path).exists() {
        return;
    }

    let mut indices = Vec::new();
    let count = sample_video(path, 7, &PipelineOptions::new(), |index, image| {
        assert!(image.width() > 0 && image.height() > 0);
        indices.push(index);
        Ok(())
    })
    .expect("Failed to sample fixture");

    assert_eq!(count as usize, indices.len());
    assert_eq!(indices.first(), Some(&0));
    assert!(indices.iter().all(|index| index % 7 == 0));
    assert!(indices.windows(2).all(|pair| pair[1] - pair[0] == 7));
}

#[test]
fn cancelled_sampling_returns_error() {
    let path = sample_video_path();
    if !Path::new(path).exists() {
        return;
    }

    let token = CancellationToken::new();
    token.cancel();
    let pipeline = PipelineOptions::new().with_cancellation(token);
    let result = sample_video(path, 1, &pipeline, |_, _| Ok(()));
    assert!(matches!(result, Err(AnnotationError::Cancelled)));
}

#[test]
fn sample_episode_keeps_existing_files() {
    let path = sample_video_path();
    if !Path::new(path).exists() {
        return;
    }

    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let episode_dir = directory.path().join(episode_dir_name(0));
    fs::create_dir_all(&episode_dir).unwrap();
    let sentinel = episode_dir.join(frame_file_name(0));
    fs::write(&sentinel, b"keep me").unwrap();

    let records = sample_episode(
        path,
        &episode_dir,
        &SampleOptions::new(10),
        &PipelineOptions::new(),
    )
    .expect("Failed to sample episode");

    assert!(!records.is_empty());
    assert_eq!(records[0].frame_index, 0);
    assert_eq!(records[0].path, sentinel);
    assert_eq!(fs::read(&sentinel).unwrap(), b"keep me");
    assert!(records.iter().skip(1).all(|record| record.path.exists()));

    let overwritten = sample_episode(
        path,
        &episode_dir,
        &SampleOptions::new(10).with_overwrite(true),
        &PipelineOptions::new(),
    )
    .expect("Failed to resample episode");
    assert_eq!(overwritten.len(), records.len());
    assert_ne!(fs::read(&sentinel).unwrap(), b"keep me");
}

#[test]
fn sample_dataset_skips_missing_videos() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let root = directory.path().join("dataset");
    fs::create_dir_all(root.join("meta")).unwrap();
    fs::write(
        root.join("meta").join("episodes.jsonl"),
        "{\"episode_index\": 0}\n{\"episode_index\": 1}\n",
    )
    .unwrap();

    let layout = DatasetLayout::new(&root);
    let have_fixture = Path::new(sample_video_path()).exists();
    if have_fixture {
        let target = layout.video_path(1);
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::copy(sample_video_path(), &target).unwrap();
    }

    let out = directory.path().join("frames");
    let report = sample_dataset(&layout, &out, &SampleOptions::new(10), &PipelineOptions::new())
        .expect("Sampling should skip, not fail");

    assert!(report.manifest_path.exists());
    assert_eq!(report.failed[0].episode_index, 0);
    if have_fixture {
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.manifest.episodes.len(), 1);
        assert_eq!(report.manifest.episodes[0].episode_index, 1);
        assert_eq!(report.manifest.episodes[0].task, "unknown task");
    } else {
        assert_eq!(report.failed.len(), 2);
        assert!(report.manifest.episodes.is_empty());
    }
}
