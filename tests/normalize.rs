use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde_json::json;
use tempfile::tempdir;

use chatsubs::schema::{load_dump, Dump};
use chatsubs::style::Tuning;
use chatsubs::timeline::{normalize, NormalizeOptions, NormalizeReport};

const BASE: i64 = 1_604_840_000;

fn record(author: &str, text: &str, unix_sec: i64, offset: Option<f64>) -> serde_json::Value {
    let mut value = json!({
        "action_type": "add_chat_item",
        "message_id": format!("{author}-{unix_sec}"),
        "author": author,
        "author_id": format!("UC{author}"),
        "message": text,
        "timestamp": unix_sec * 1_000_000,
    });
    if let Some(offset) = offset {
        let whole = offset.floor() as i64;
        value["video_offset_time_msec"] = json!(offset * 1000.0);
        value["time_in_seconds"] = json!(whole);
        value["time_text"] = json!(format!("{}:{:02}", whole / 60, whole % 60));
    }
    value
}

fn load(path: &Path, records: &[serde_json::Value]) -> Dump {
    fs::write(path, serde_json::Value::Array(records.to_vec()).to_string())
        .expect("dump should write");
    load_dump(path).expect("dump should load")
}

fn run(dumps: &[Dump], options: &NormalizeOptions) -> NormalizeReport {
    normalize(dumps, options, &Tuning::default()).expect("normalize should succeed")
}

fn options() -> NormalizeOptions {
    NormalizeOptions {
        dedup_window: 10.0,
        ..NormalizeOptions::default()
    }
}

#[test]
fn live_capture_fills_gaps_in_the_vod_rip() {
    let dir = tempdir().expect("tempdir should create");
    let vod = load(
        &dir.path().join("vod.json"),
        &[
            record("alice", "hello", BASE + 20, Some(20.0)),
            record("bob", "brb", BASE + 35, Some(35.0)),
            record("alice", "back", BASE + 50, Some(50.0)),
        ],
    );
    let live = load(
        &dir.path().join("live.json"),
        &[
            record("bob", "brb", BASE + 35, None),
            record("carol", "late", BASE + 42, None),
        ],
    );

    let report = run(&[vod, live], &options());
    assert_eq!(report.stats.merged, 4, "shared identity should collapse");
    let times: Vec<f64> = report.messages.iter().map(|m| m.video_time).collect();
    assert_eq!(times, vec![20.0, 35.0, 42.0, 50.0]);
    let texts: Vec<&str> = report.messages.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, vec!["hello", "brb", "late", "back"]);
}

#[test]
fn old_era_fractional_seconds_survive() {
    let dir = tempdir().expect("tempdir should create");
    let dump = load(
        &dir.path().join("old.json"),
        &[
            json!({
                "author": "ed",
                "author_id": "UCed",
                "message": "first",
                "time_in_seconds": 93.4,
                "time_text": "1:33.4",
            }),
            json!({
                "author": "ed",
                "author_id": "UCed",
                "message": "second",
                "time_in_seconds": 200.25,
                "time_text": "3:20.25",
            }),
        ],
    );

    let report = run(&[dump], &options());
    let times: Vec<f64> = report.messages.iter().map(|m| m.video_time).collect();
    assert_eq!(times, vec![93.4, 200.25]);
}

#[test]
fn superchat_payload_survives_normalization() {
    let dir = tempdir().expect("tempdir should create");
    let mut paid = record("dana", "", BASE + 14, Some(15.0));
    paid["money"] = json!({"text": "¥1,000", "body_bgcolour": "#ff8000ff"});
    paid["badges"] = json!(["Moderator", "Member (1 year)"]);
    let dump = load(
        &dir.path().join("chat.json"),
        &[paid, record("alice", "anchor talk", BASE + 20, Some(20.0))],
    );

    let report = run(&[dump], &options());
    assert_eq!(report.messages.len(), 2);
    let paid = &report.messages[0];
    let money = paid.money.as_ref().expect("money should survive");
    assert_eq!(money.text, "¥1,000");
    assert_eq!(money.body_colour.as_deref(), Some("ff8000"));
    assert!(paid.has_badge("moderator"), "badge lookup ignores case");
    // A superchat's own offset is not trusted as an anchor; its time comes
    // from interpolating the wall clock against the plain anchor.
    assert_eq!(paid.video_time, 14.0);
}

#[test]
fn deletions_recorded_in_one_dump_apply_to_all() {
    let dir = tempdir().expect("tempdir should create");
    let vod = load(
        &dir.path().join("vod.json"),
        &[
            record("alice", "regret", BASE + 20, Some(20.0)),
            record("bob", "stays", BASE + 25, Some(25.0)),
        ],
    );
    let live = load(
        &dir.path().join("live.json"),
        &[json!({
            "action_type": "mark_deleted",
            "target_message_id": format!("alice-{}", BASE + 20),
        })],
    );

    let report = run(&[vod, live], &options());
    let authors: Vec<&str> = report.messages.iter().map(|m| m.author_id.as_str()).collect();
    assert_eq!(authors, vec!["UCbob"]);
    assert_eq!(report.stats.deleted, 1);

    let vod = load(
        &dir.path().join("vod2.json"),
        &[
            record("alice", "regret", BASE + 20, Some(20.0)),
            record("bob", "stays", BASE + 25, Some(25.0)),
        ],
    );
    let live = load(
        &dir.path().join("live2.json"),
        &[json!({
            "action_type": "mark_deleted",
            "target_message_id": format!("alice-{}", BASE + 20),
        })],
    );
    let mut keep = options();
    keep.keep_deleted = true;
    let report = run(&[vod, live], &keep);
    assert_eq!(report.messages.len(), 2);
}

#[test]
fn spam_is_suppressed_within_the_window() {
    let dir = tempdir().expect("tempdir should create");
    let dump = load(
        &dir.path().join("chat.json"),
        &[
            record("alice", "LOL", BASE + 20, Some(20.0)),
            record("alice", "LOL", BASE + 25, Some(25.0)),
            record("alice", "LOL", BASE + 32, Some(32.0)),
        ],
    );

    let report = run(&[dump], &options());
    let times: Vec<f64> = report.messages.iter().map(|m| m.video_time).collect();
    assert_eq!(times, vec![20.0, 32.0]);
    assert_eq!(report.stats.duplicates, 1);
}

#[test]
fn near_duplicate_across_dumps_is_suppressed() {
    let dir = tempdir().expect("tempdir should create");
    let vod = load(
        &dir.path().join("vod.json"),
        &[record("dana", "hello", BASE + 20, Some(20.0))],
    );
    // The live capture saw the same message land twice.
    let live = load(
        &dir.path().join("live.json"),
        &[
            record("dana", "hello", BASE + 20, Some(20.0)),
            record("dana", "hello", BASE + 25, Some(25.0)),
        ],
    );

    let report = run(&[vod, live], &options());
    assert_eq!(report.stats.merged, 2);
    assert_eq!(report.stats.duplicates, 1);
    let times: Vec<f64> = report.messages.iter().map(|m| m.video_time).collect();
    assert_eq!(times, vec![20.0]);
}

#[test]
fn broadcast_restart_resets_the_clock() {
    let dir = tempdir().expect("tempdir should create");
    // The wall clock runs 110s between anchors but the video only advances
    // 5s: the broadcast restarted, so the interpolated message in between
    // was measured against a dead clock.
    let dump = load(
        &dir.path().join("chat.json"),
        &[
            record("alice", "before", BASE + 20, Some(20.0)),
            record("bob", "during", BASE + 30, None),
            record("carol", "after", BASE + 130, Some(25.0)),
        ],
    );

    let report = run(&[dump], &options());
    let times: Vec<f64> = report.messages.iter().map(|m| m.video_time).collect();
    assert_eq!(times, vec![20.0, 25.0]);
    assert_eq!(report.stats.drift_resets, 1);
    assert_eq!(report.stats.dropped_pending, 1);
}

#[test]
fn output_is_sorted_with_unique_stable_ids() {
    let dir = tempdir().expect("tempdir should create");
    let records = [
        record("carol", "third", BASE + 44, Some(44.0)),
        record("alice", "first", BASE + 20, Some(20.0)),
        record("bob", "second", BASE + 31, None),
    ];
    let one = load(&dir.path().join("one.json"), &records);
    let two = load(&dir.path().join("two.json"), &records);

    let first = run(&[one], &options());
    let second = run(&[two], &options());

    for pair in first.messages.windows(2) {
        assert!(pair[0].video_time <= pair[1].video_time);
    }
    let ids: HashSet<&str> = first.messages.iter().map(|m| m.message_id.as_str()).collect();
    assert_eq!(ids.len(), first.messages.len(), "ids should be unique");
    for id in &ids {
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    let first_ids: Vec<&str> = first.messages.iter().map(|m| m.message_id.as_str()).collect();
    let second_ids: Vec<&str> = second.messages.iter().map(|m| m.message_id.as_str()).collect();
    assert_eq!(first_ids, second_ids, "ids should be stable across runs");
}

#[test]
fn renormalizing_the_output_changes_nothing() {
    let dir = tempdir().expect("tempdir should create");
    let dump = load(
        &dir.path().join("chat.json"),
        &[
            record("alice", "hello", BASE + 20, Some(20.0)),
            record("alice", "hello", BASE + 25, Some(25.0)),
            record("bob", "yo", BASE + 40, Some(40.0)),
        ],
    );
    let first = run(&[dump], &options());
    assert_eq!(first.stats.duplicates, 1);

    let rebuilt: Vec<serde_json::Value> = first
        .messages
        .iter()
        .map(|m| {
            let whole = m.video_time.floor() as i64;
            json!({
                "action_type": "add_chat_item",
                "message_id": m.message_id,
                "author": m.display_name,
                "author_id": m.author_id,
                "message": m.text,
                "timestamp": m.unix_usec,
                "video_offset_time_msec": m.video_time * 1000.0,
                "time_in_seconds": whole,
                "time_text": format!("{}:{:02}", whole / 60, whole % 60),
            })
        })
        .collect();
    let again = load(&dir.path().join("rebuilt.json"), &rebuilt);
    let second = run(&[again], &options());

    assert_eq!(second.stats.duplicates, 0);
    let first_ids: Vec<&str> = first.messages.iter().map(|m| m.message_id.as_str()).collect();
    let second_ids: Vec<&str> = second.messages.iter().map(|m| m.message_id.as_str()).collect();
    assert_eq!(second_ids, first_ids);
}
