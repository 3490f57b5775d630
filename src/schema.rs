//! On-disk chat dump model.
//!
//! Dumps are the JSON output of chat-archival tools. Two field generations
//! exist: older rips carry a fractional `time_in_seconds` plus a `time_text`
//! that may include decimals; newer rips add `video_offset_time_msec` (the
//! precise value) and truncate `time_text` to whole seconds. Both are
//! accepted here. A dump file is either one JSON array of records or one
//! record per line.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::error::{ChatError, Result};

/// One record as it appears on disk. Every field is optional because the
/// archival tools disagree about which ones exist; [`RawEvent::from_record`]
/// decides what is usable.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRecord {
    #[serde(default)]
    pub action_type: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub author_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    /// Unix wall-clock time in microseconds.
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub time_in_seconds: Option<f64>,
    #[serde(default)]
    pub video_offset_time_msec: Option<f64>,
    #[serde(default)]
    pub time_text: Option<String>,
    #[serde(default)]
    pub amount: Option<String>,
    #[serde(default)]
    pub body_color: Option<BodyColor>,
    #[serde(default)]
    pub money: Option<Money>,
    #[serde(default)]
    pub badges: Option<Badges>,
    #[serde(default)]
    pub target_message_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BodyColor {
    #[serde(default)]
    pub hex: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Money {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub body_bgcolour: Option<ColorValue>,
}

/// Colours appear as "#rrggbbaa" strings in some rips and packed ARGB
/// integers in others.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ColorValue {
    Hex(String),
    Packed(u32),
}

/// Badge lists appear as an array of titles or one comma-joined string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Badges {
    List(Vec<String>),
    Text(String),
}

impl Badges {
    fn into_vec(self) -> Vec<String> {
        match self {
            Badges::List(items) => items,
            Badges::Text(joined) => joined
                .split(',')
                .map(|part| part.trim().to_owned())
                .filter(|part| !part.is_empty())
                .collect(),
        }
    }
}

/// Monetary attachment of a superchat, reduced to what the emitter needs.
#[derive(Debug, Clone, PartialEq)]
pub struct MoneyInfo {
    /// Display string, e.g. "¥1,000".
    pub text: String,
    /// Card colour as lowercase "rrggbb", when the rip carried one.
    pub body_colour: Option<String>,
}

/// One validated action from a dump.
#[derive(Debug, Clone)]
pub enum RawEvent {
    AddMessage(AddMessage),
    DeleteMessage { target_id: String },
    DeleteByAuthor { author_id: String },
}

#[derive(Debug, Clone)]
pub struct AddMessage {
    /// The dump's own message id, used only to honor deletion records.
    pub source_id: Option<String>,
    pub author_id: String,
    pub author_name: Option<String>,
    pub text: String,
    /// Unix microseconds; part of the cross-dump identity key.
    pub unix_usec: i64,
    /// Video-relative seconds, when the rip carried one.
    pub video_offset: Option<f64>,
    /// Integer seconds as reported alongside the offset (newer rips).
    pub time_in_seconds: Option<f64>,
    pub time_text: Option<String>,
    pub money: Option<MoneyInfo>,
    pub badges: Vec<String>,
}

impl AddMessage {
    pub fn is_monetary(&self) -> bool {
        self.money.is_some()
    }

    pub fn has_badge(&self, title: &str) -> bool {
        self.badges
            .iter()
            .any(|badge| badge.eq_ignore_ascii_case(title))
    }
}

/// Why a record was not turned into an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordOutcome {
    Event,
    /// A known non-message action (ticker, banner, poll); not an error.
    Ignored,
    Malformed,
}

#[derive(Debug, Clone, Default)]
pub struct DumpStats {
    pub records: usize,
    pub events: usize,
    pub ignored: usize,
    pub malformed: usize,
}

#[derive(Debug)]
pub struct Dump {
    pub path: std::path::PathBuf,
    pub events: Vec<RawEvent>,
    pub stats: DumpStats,
}

impl RawEvent {
    /// Projects a wire record onto a typed event. `None` means the record is
    /// either a non-message action or malformed; the caller counts which.
    fn from_record(record: RawRecord) -> (Option<RawEvent>, RecordOutcome) {
        match record.action_type.as_deref() {
            None | Some("add_chat_item") => {}
            Some("mark_deleted") | Some("delete") => {
                return match record.target_message_id {
                    Some(target_id) => (
                        Some(RawEvent::DeleteMessage { target_id }),
                        RecordOutcome::Event,
                    ),
                    None => (None, RecordOutcome::Malformed),
                };
            }
            Some("ban_user") | Some("delete_author") => {
                return match record.author_id {
                    Some(author_id) => (
                        Some(RawEvent::DeleteByAuthor { author_id }),
                        RecordOutcome::Event,
                    ),
                    None => (None, RecordOutcome::Malformed),
                };
            }
            Some(_) => return (None, RecordOutcome::Ignored),
        }

        let author_id = match record.author_id.clone() {
            Some(id) if !id.is_empty() => id,
            _ => return (None, RecordOutcome::Malformed),
        };

        let money = money_info(&record);
        let text = strip_skin_tones(record.message.as_deref().unwrap_or(""));
        if text.is_empty() && money.is_none() {
            return (None, RecordOutcome::Malformed);
        }

        let video_offset = record
            .video_offset_time_msec
            .map(|msec| msec / 1000.0)
            .or(record.time_in_seconds);

        // Old rips have no wall clock at all; the offset stands in for it so
        // the identity key and anchor math still work (the anchor resolves
        // to zero).
        let unix_usec = match record.timestamp {
            Some(usec) => usec,
            None => match video_offset {
                Some(seconds) => (seconds * 1_000_000.0) as i64,
                None => return (None, RecordOutcome::Malformed),
            },
        };

        let badges = record.badges.map(Badges::into_vec).unwrap_or_default();

        (
            Some(RawEvent::AddMessage(AddMessage {
                source_id: record.message_id,
                author_id,
                author_name: record.author,
                text,
                unix_usec,
                video_offset,
                time_in_seconds: record.time_in_seconds,
                time_text: record.time_text,
                money,
                badges,
            })),
            RecordOutcome::Event,
        )
    }
}

fn money_info(record: &RawRecord) -> Option<MoneyInfo> {
    let text = record
        .money
        .as_ref()
        .and_then(|money| money.text.clone())
        .or_else(|| record.amount.clone())?;

    let body_colour = record
        .body_color
        .as_ref()
        .and_then(|body| body.hex.as_deref())
        .and_then(parse_hex_colour)
        .or_else(|| {
            record
                .money
                .as_ref()
                .and_then(|money| money.body_bgcolour.as_ref())
                .and_then(|value| match value {
                    ColorValue::Hex(hex) => parse_hex_colour(hex),
                    ColorValue::Packed(argb) => Some(format!("{:06x}", argb & 0x00ff_ffff)),
                })
        });

    Some(MoneyInfo { text, body_colour })
}

/// Accepts "#rrggbbaa", "#rrggbb", and the same without '#'; returns
/// lowercase "rrggbb".
fn parse_hex_colour(raw: &str) -> Option<String> {
    let hex = raw.strip_prefix('#').unwrap_or(raw);
    let rgb = match hex.len() {
        8 => &hex[..6],
        6 => hex,
        _ => return None,
    };
    rgb.chars()
        .all(|ch| ch.is_ascii_hexdigit())
        .then(|| rgb.to_ascii_lowercase())
}

/// Skin tone modifiers do not render in subtitle fonts; drop them.
pub fn strip_skin_tones(text: &str) -> String {
    text.chars()
        .filter(|ch| !('\u{1F3FB}'..='\u{1F3FF}').contains(ch))
        .collect()
}

/// Reads one dump file: a JSON array of records, or JSON-lines.
pub fn load_dump(path: &Path) -> Result<Dump> {
    let raw = fs::read_to_string(path).map_err(|source| ChatError::DumpRead {
        path: path.to_owned(),
        source,
    })?;

    let mut stats = DumpStats::default();
    let mut events = Vec::new();

    let trimmed = raw.trim_start();
    if trimmed.starts_with('[') {
        let values: Vec<serde_json::Value> =
            serde_json::from_str(trimmed).map_err(|_| ChatError::DumpFormat {
                path: path.to_owned(),
            })?;
        for value in values {
            stats.records += 1;
            match serde_json::from_value::<RawRecord>(value) {
                Ok(record) => collect_record(record, &mut events, &mut stats),
                Err(error) => {
                    debug!(dump = %path.display(), %error, "unreadable record");
                    stats.malformed += 1;
                }
            }
        }
    } else if trimmed.starts_with('{') {
        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            stats.records += 1;
            match serde_json::from_str::<RawRecord>(line) {
                Ok(record) => collect_record(record, &mut events, &mut stats),
                Err(error) => {
                    debug!(dump = %path.display(), %error, "unreadable record");
                    stats.malformed += 1;
                }
            }
        }
    } else {
        return Err(ChatError::DumpFormat {
            path: path.to_owned(),
        });
    }

    stats.events = events.len();
    Ok(Dump {
        path: path.to_owned(),
        events,
        stats,
    })
}

fn collect_record(record: RawRecord, events: &mut Vec<RawEvent>, stats: &mut DumpStats) {
    let (event, outcome) = RawEvent::from_record(record);
    match outcome {
        RecordOutcome::Event => {}
        RecordOutcome::Ignored => stats.ignored += 1,
        RecordOutcome::Malformed => stats.malformed += 1,
    }
    if let Some(event) = event {
        events.push(event);
    }
}

/// Loads an emote shortcut map: one JSON object of shortcut → replacement.
pub fn load_emote_map(path: &Path) -> Result<HashMap<String, String>> {
    let raw = fs::read_to_string(path).map_err(|source| ChatError::DumpRead {
        path: path.to_owned(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|_| ChatError::DumpFormat {
        path: path.to_owned(),
    })
}

/// Applies emote shortcuts by plain substring replacement, longest shortcut
/// first so overlapping shortcuts resolve the same way every run.
pub fn apply_emotes(text: &str, emotes: &HashMap<String, String>) -> String {
    if emotes.is_empty() || !text.contains(':') {
        return text.to_owned();
    }
    let mut shortcuts: Vec<(&String, &String)> = emotes.iter().collect();
    shortcuts.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(b.0)));
    let mut out = text.to_owned();
    for (shortcut, replacement) in shortcuts {
        if out.contains(shortcut.as_str()) {
            out = out.replace(shortcut.as_str(), replacement);
        }
    }
    out
}
