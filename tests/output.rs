//! Annotation output file tests.

use std::fs;

use handcontact::{
    AnnotatedFrame, AnnotationSet, Confidence, ContactLabel, LabelSource, reconcile,
    write_annotations,
    output::{COMBINED_FILE_NAME, SUMMARY_FILE_NAME, render_combined, render_summary},
};
use serde_json::{Value, json};

fn label(left: Option<bool>, right: Option<bool>, object: Option<&str>, reason: &str) -> ContactLabel {
    ContactLabel {
        left_hand_contact: left,
        right_hand_contact: right,
        contact_object: object.map(str::to_string),
        confidence: Confidence::High,
        reason: reason.to_string(),
    }
}

fn sample_set() -> AnnotationSet {
    let mut set = AnnotationSet::new();
    set.insert(AnnotatedFrame::new(
        1,
        20,
        label(Some(true), Some(false), Some("cup"), "left hand on cup"),
        LabelSource::Response,
    ));
    set.insert(AnnotatedFrame::new(
        0,
        10,
        label(None, Some(true), Some("red cup, small"), "says \"hi\""),
        LabelSource::Response,
    ));
    set.insert(AnnotatedFrame::new(
        1,
        0,
        ContactLabel::placeholder("parse error: expected value"),
        LabelSource::Placeholder,
    ));
    set
}

#[test]
fn summary_csv_rows_and_cells() {
    let csv = render_summary(&sample_set());
    let lines: Vec<&str> = csv.lines().collect();

    assert_eq!(
        lines[0],
        "episode_index,frame_index,left_hand_contact,right_hand_contact,contact_object,confidence,reason"
    );
    assert_eq!(lines[1], "0,10,,true,\"red cup, small\",high,\"says \"\"hi\"\"\"");
    assert_eq!(lines[2], "1,0,,,,low,parse error: expected value");
    assert_eq!(lines[3], "1,20,true,false,cup,high,left hand on cup");
    assert_eq!(lines.len(), 4);
}

#[test]
fn combined_json_groups_and_sorts() {
    let text = render_combined(&sample_set()).unwrap();
    let value: Value = serde_json::from_str(&text).unwrap();
    let episodes = value.as_array().unwrap();

    assert_eq!(episodes.len(), 2);
    assert_eq!(episodes[0]["episode_index"], 0);
    assert_eq!(episodes[1]["episode_index"], 1);

    let frames = episodes[1]["frames"].as_array().unwrap();
    assert_eq!(frames[0]["frame_index"], 0);
    assert_eq!(frames[0]["source"], "placeholder");
    assert_eq!(frames[0]["left_hand_contact"], Value::Null);
    assert_eq!(frames[1]["frame_index"], 20);
    assert_eq!(frames[1]["contact_object"], "cup");
    assert_eq!(frames[1]["source"], "response");
    // Two-space indentation.
    assert!(text.contains("\n  {\n    \"episode_index\": 0"));
}

#[test]
fn writes_all_views() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let out = directory.path().join("annotations");
    let paths = write_annotations(&sample_set(), &out).unwrap();

    assert_eq!(paths.combined, out.join(COMBINED_FILE_NAME));
    assert_eq!(paths.summary, out.join(SUMMARY_FILE_NAME));
    assert_eq!(
        paths.episodes,
        [
            out.join("episode_000000_contact.json"),
            out.join("episode_000001_contact.json")
        ]
    );

    let episode: Value =
        serde_json::from_str(&fs::read_to_string(&paths.episodes[1]).unwrap()).unwrap();
    assert_eq!(episode["episode_index"], 1);
    assert_eq!(episode["frames"].as_array().unwrap().len(), 2);
}

#[test]
fn rewriting_is_byte_identical() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let set = sample_set();

    let first = write_annotations(&set, directory.path().join("first")).unwrap();
    let second = write_annotations(&set, directory.path().join("second")).unwrap();

    for (a, b) in [
        (&first.combined, &second.combined),
        (&first.summary, &second.summary),
        (&first.episodes[0], &second.episodes[0]),
        (&first.episodes[1], &second.episodes[1]),
    ] {
        assert_eq!(fs::read(a).unwrap(), fs::read(b).unwrap());
    }
}

fn completion(custom_id: &str, content: &str) -> Value {
    json!({
        "custom_id": custom_id,
        "response": {
            "status_code": 200,
            "body": {"choices": [{"message": {"content": content}}]},
        },
        "error": null,
    })
}

#[test]
fn reconciling_same_records_twice_is_byte_identical() {
    let answer = |left: bool, reason: &str| {
        json!({
            "left_hand_contact": left,
            "right_hand_contact": null,
            "contact_object": "cup",
            "confidence": "high",
            "reason": reason,
        })
        .to_string()
    };
    let records = vec![
        completion("ep000001_fr000020", &answer(true, "holding, firmly")),
        completion("ep000000_fr000010", &answer(false, "hands away")),
        completion("ep000002_fr000050", "definitely not JSON"),
        completion("ep000001_fr000020", &answer(false, "released \"cup\"")),
        json!({"custom_id": "ep000000_fr000000", "response": null, "error": {"message": "timeout"}}),
        completion("garbage", &answer(true, "ignored")),
    ];

    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let mut written = Vec::new();
    for run in ["first", "second"] {
        let result = reconcile(&records);
        assert_eq!(result.report.duplicates, 1);
        assert_eq!(result.annotations.placeholder_count(), 2);
        written.push(
            write_annotations(&result.annotations, directory.path().join(run))
                .expect("Failed to write annotations"),
        );
    }

    let (first, second) = (&written[0], &written[1]);
    assert_eq!(first.episodes.len(), 3);
    assert_eq!(first.episodes.len(), second.episodes.len());
    assert_eq!(fs::read(&first.combined).unwrap(), fs::read(&second.combined).unwrap());
    assert_eq!(fs::read(&first.summary).unwrap(), fs::read(&second.summary).unwrap());
    for (a, b) in first.episodes.iter().zip(&second.episodes) {
        assert_eq!(fs::read(a).unwrap(), fs::read(b).unwrap());
    }

    let summary = fs::read_to_string(&first.summary).unwrap();
    assert!(summary.contains("released \"\"cup\"\""));
    assert!(!summary.contains("holding, firmly"));
}

#[test]
fn empty_set_writes_header_only() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let paths = write_annotations(&AnnotationSet::new(), directory.path()).unwrap();

    assert!(paths.episodes.is_empty());
    assert_eq!(fs::read_to_string(&paths.combined).unwrap(), "[]\n");
    assert_eq!(fs::read_to_string(&paths.summary).unwrap().lines().count(), 1);
}
