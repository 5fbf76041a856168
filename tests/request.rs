//! Batch request encoding tests.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use handcontact::{
    AnnotationError, CancellationToken, EpisodeFrames, EpisodeManifest, FrameRecord, ImageDetail,
    OperationType, PipelineOptions, ProgressCallback, ProgressInfo, RequestOptions,
    RequestSummary, StripOptions, WorkUnitId, write_batch,
    prompt::{LABEL_FIELDS, SCHEMA_NAME},
    request::{ContentPart, MessageContent, WorkUnit, encode_work_unit, work_unit},
};
use image::{DynamicImage, Rgb, RgbImage};
use serde_json::Value;

fn write_frame(dir: &Path, frame_index: u64) -> PathBuf {
    std::fs::create_dir_all(dir).expect("Failed to create frame dir");
    let path = dir.join(format!("frame_{frame_index:06}.jpg"));
    DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 12, Rgb([10, 20, 30])))
        .save(&path)
        .expect("Failed to write frame");
    path
}

fn episode(dir: &Path, episode_index: u64, frame_indices: &[u64]) -> EpisodeFrames {
    EpisodeFrames {
        episode_index,
        task_index: 0,
        task: format!("pick the cup ({episode_index})"),
        frames: frame_indices
            .iter()
            .map(|&frame_index| FrameRecord {
                frame_index,
                path: write_frame(dir, frame_index),
            })
            .collect(),
    }
}

fn lines(buffer: &[u8]) -> Vec<Value> {
    String::from_utf8(buffer.to_vec())
        .expect("Output is not UTF-8")
        .lines()
        .map(|line| serde_json::from_str(line).expect("Line is not JSON"))
        .collect()
}

// ── Work unit shape ────────────────────────────────────────────────

#[test]
fn work_unit_wire_shape() {
    let id = WorkUnitId::new(3, 142).unwrap();
    let options = RequestOptions::new("test-model");
    let unit = work_unit(id, "image/jpeg", b"abc", "stack the blocks", &options);
    let value = serde_json::to_value(&unit).unwrap();

    assert_eq!(value["custom_id"], "ep000003_fr000142");
    assert_eq!(value["method"], "POST");
    assert_eq!(value["url"], "/v1/chat/completions");
    assert_eq!(value["body"]["model"], "test-model");

    let messages = value["body"]["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "system");
    assert!(messages[0]["content"].is_string());
    assert_eq!(messages[1]["role"], "user");

    let parts = messages[1]["content"].as_array().unwrap();
    assert_eq!(parts[0]["type"], "image_url");
    assert_eq!(parts[0]["image_url"]["url"], "data:image/jpeg;base64,YWJj");
    assert_eq!(parts[0]["image_url"]["detail"], "high");
    assert_eq!(parts[1]["type"], "text");
    assert!(parts[1]["text"].as_str().unwrap().contains("stack the blocks"));
}

#[test]
fn response_format_is_strict_schema() {
    let unit = work_unit(
        WorkUnitId::new(0, 0).unwrap(),
        "image/jpeg",
        b"",
        "task",
        &RequestOptions::default(),
    );
    let format = &unit.body.response_format;

    assert_eq!(format["type"], "json_schema");
    assert_eq!(format["json_schema"]["name"], SCHEMA_NAME);
    assert_eq!(format["json_schema"]["strict"], true);

    let schema = &format["json_schema"]["schema"];
    assert_eq!(schema["additionalProperties"], false);
    let required: Vec<&str> = schema["required"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert_eq!(required, LABEL_FIELDS);
    assert_eq!(
        schema["properties"]["left_hand_contact"]["type"],
        serde_json::json!(["boolean", "null"])
    );
    assert_eq!(
        schema["properties"]["contact_object"]["type"],
        serde_json::json!(["string", "null"])
    );
    assert_eq!(
        schema["properties"]["confidence"]["enum"],
        serde_json::json!(["high", "medium", "low"])
    );
}

#[test]
fn prompts_reference_strip_size_and_center() {
    let options = RequestOptions::default().with_strip(StripOptions::new(5));
    let unit = work_unit(
        WorkUnitId::new(0, 0).unwrap(),
        "image/jpeg",
        b"",
        "wipe the table",
        &options,
    );

    let MessageContent::Text(system) = &unit.body.messages[0].content else {
        panic!("system message should be plain text");
    };
    assert!(system.contains("strip of 5 consecutive frames"));
    assert!(system.contains(&options.robot_description));

    let MessageContent::Parts(parts) = &unit.body.messages[1].content else {
        panic!("user message should have parts");
    };
    let ContentPart::Text { text } = &parts[1] else {
        panic!("second part should be text");
    };
    assert!(text.contains("wipe the table"));
    assert!(text.contains("frame 3"));
}

#[test]
fn detail_hint_is_configurable() {
    let options = RequestOptions::default().with_detail(ImageDetail::Low);
    let unit = work_unit(WorkUnitId::new(0, 0).unwrap(), "image/jpeg", b"", "t", &options);
    let value = serde_json::to_value(&unit).unwrap();
    assert_eq!(value["body"]["messages"][1]["content"][0]["image_url"]["detail"], "low");
}

#[test]
fn work_unit_survives_serialization() {
    let unit = work_unit(
        WorkUnitId::new(7, 70).unwrap(),
        "image/jpeg",
        b"\x00\x01\x02",
        "fold the towel",
        &RequestOptions::default(),
    );
    let text = serde_json::to_string(&unit).unwrap();
    let parsed: WorkUnit = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed, unit);

    let summary = RequestSummary::from_work_unit(&parsed).unwrap();
    assert_eq!(summary.image_bytes.as_deref(), Some(&b"\x00\x01\x02"[..]));
}

#[test]
fn encode_work_unit_renders_strip() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let paths = [
        write_frame(directory.path(), 0),
        write_frame(directory.path(), 0),
        write_frame(directory.path(), 10),
    ];
    let unit = encode_work_unit(1, 0, &paths, "task", &RequestOptions::default()).unwrap();
    assert_eq!(unit.custom_id, "ep000001_fr000000");

    let summary = RequestSummary::from_work_unit(&unit).unwrap();
    let strip = image::load_from_memory(summary.image_bytes.as_deref().unwrap()).unwrap();
    assert_eq!((strip.width(), strip.height()), (48, 12));
}

#[test]
fn encode_work_unit_rejects_oversized_index() {
    let result = encode_work_unit::<PathBuf>(0, 1_000_000, &[], "task", &RequestOptions::default());
    assert!(matches!(
        result,
        Err(AnnotationError::IdentifierOutOfRange { field: "frame", .. })
    ));
}

// ── Batch writing ──────────────────────────────────────────────────

#[test]
fn write_batch_one_line_per_sampled_frame() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let manifest = EpisodeManifest::new(vec![
        episode(&directory.path().join("a"), 0, &[0, 10, 20]),
        episode(&directory.path().join("b"), 1, &[0, 10]),
    ]);

    let mut buffer = Vec::new();
    let report = write_batch(
        &manifest,
        &RequestOptions::default(),
        &PipelineOptions::new(),
        &mut buffer,
    )
    .unwrap();

    assert_eq!(report.episodes, 2);
    assert_eq!(report.frames, 5);
    assert_eq!(report.written, 5);
    assert!(report.skipped.is_empty());

    let ids: Vec<String> = lines(&buffer)
        .iter()
        .map(|line| line["custom_id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(
        ids,
        [
            "ep000000_fr000000",
            "ep000000_fr000010",
            "ep000000_fr000020",
            "ep000001_fr000000",
            "ep000001_fr000010",
        ]
    );
}

#[test]
fn write_batch_is_deterministic() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let manifest = EpisodeManifest::new(vec![
        episode(&directory.path().join("a"), 4, &[0, 5, 10, 15]),
        episode(&directory.path().join("b"), 9, &[3]),
    ]);
    let options = RequestOptions::default().with_strip(StripOptions::new(5).with_scale(0.5));

    let mut first = Vec::new();
    let mut second = Vec::new();
    write_batch(&manifest, &options, &PipelineOptions::new(), &mut first).unwrap();
    write_batch(&manifest, &options, &PipelineOptions::new(), &mut second).unwrap();
    assert_eq!(first, second);
}

#[test]
fn missing_frame_skips_only_affected_units() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let episode_dir = directory.path().join("episode");
    let manifest = EpisodeManifest::new(vec![episode(&episode_dir, 2, &[0, 10, 20, 30, 40])]);

    // Frame 0 only appears in the strips centered on 0 and 10.
    let missing = episode_dir.join("frame_000000.jpg");
    std::fs::remove_file(&missing).unwrap();

    let mut buffer = Vec::new();
    let report = write_batch(
        &manifest,
        &RequestOptions::default(),
        &PipelineOptions::new(),
        &mut buffer,
    )
    .unwrap();

    assert_eq!(report.written, 3);
    let skipped: Vec<String> = report.skipped.iter().map(|unit| unit.id.to_string()).collect();
    assert_eq!(skipped, ["ep000002_fr000000", "ep000002_fr000010"]);
    // Clamping puts frame 0 twice into the first strip.
    assert_eq!(report.skipped[0].missing, vec![missing.clone(), missing.clone()]);
    assert_eq!(report.skipped[1].missing, vec![missing]);

    let ids: Vec<String> = lines(&buffer)
        .iter()
        .map(|line| line["custom_id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(
        ids,
        ["ep000002_fr000020", "ep000002_fr000030", "ep000002_fr000040"]
    );
}

#[test]
fn write_batch_rejects_invalid_strip_options() {
    let manifest = EpisodeManifest::default();
    let options = RequestOptions::default().with_strip(StripOptions::new(0));
    let result = write_batch(&manifest, &options, &PipelineOptions::new(), &mut Vec::new());
    assert!(matches!(result, Err(AnnotationError::InvalidStripSize(0))));
}

#[test]
fn write_batch_honors_cancellation() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let manifest = EpisodeManifest::new(vec![episode(directory.path(), 0, &[0, 10])]);

    let token = CancellationToken::new();
    token.cancel();
    let pipeline = PipelineOptions::new().with_cancellation(token);

    let result = write_batch(
        &manifest,
        &RequestOptions::default(),
        &pipeline,
        &mut Vec::new(),
    );
    assert!(matches!(result, Err(AnnotationError::Cancelled)));
}

struct RecordingProgress {
    infos: Mutex<Vec<ProgressInfo>>,
}

impl ProgressCallback for RecordingProgress {
    fn on_progress(&self, info: &ProgressInfo) {
        self.infos.lock().unwrap().push(info.clone());
    }
}

#[test]
fn write_batch_reports_progress() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let manifest = EpisodeManifest::new(vec![
        episode(&directory.path().join("a"), 0, &[0, 10, 20]),
        episode(&directory.path().join("b"), 1, &[0]),
    ]);

    let recorder = Arc::new(RecordingProgress {
        infos: Mutex::new(Vec::new()),
    });
    let pipeline = PipelineOptions::new().with_progress(recorder.clone());
    write_batch(
        &manifest,
        &RequestOptions::default(),
        &pipeline,
        &mut Vec::new(),
    )
    .unwrap();

    let infos = recorder.infos.lock().unwrap();
    assert!(!infos.is_empty());
    let last = infos.last().unwrap();
    assert_eq!(last.operation, OperationType::RequestBuilding);
    assert_eq!(last.current, 4);
    assert_eq!(last.total, Some(4));
}

#[test]
fn write_batch_reports_every_center_frame() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let mut broken = episode(&directory.path().join("b"), 1, &[0, 10]);
    broken.frames[1].path = directory.path().join("gone.jpg");
    let manifest = EpisodeManifest::new(vec![
        episode(&directory.path().join("a"), 0, &[0, 10, 20]),
        broken,
    ]);

    let recorder = Arc::new(RecordingProgress {
        infos: Mutex::new(Vec::new()),
    });
    let pipeline = PipelineOptions::new()
        .with_progress(recorder.clone())
        .with_batch_size(1);
    write_batch(
        &manifest,
        &RequestOptions::default(),
        &pipeline,
        &mut Vec::new(),
    )
    .unwrap();

    let infos = recorder.infos.lock().unwrap();
    // One snapshot per center frame (skipped ones included), then the closing one.
    assert_eq!(infos.len(), 6);
    let mut counts: Vec<u64> = infos[..5].iter().map(|info| info.current).collect();
    counts.sort_unstable();
    assert_eq!(counts, vec![1, 2, 3, 4, 5]);
    assert!(infos[..5].iter().all(|info| info.current_frame.is_some()));
    assert!(
        infos[..5]
            .iter()
            .any(|info| info.current_episode == Some(1) && info.current_frame == Some(10))
    );
    assert_eq!(infos[5].current, 5);
    assert_eq!(infos[5].percentage, Some(100.0));
}
