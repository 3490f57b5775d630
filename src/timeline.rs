//! Timeline normalization.
//!
//! Merges any number of dump files into one deduplicated message sequence
//! anchored to video-relative time. The caller lists the VOD dump first;
//! supplementary live captures only contribute messages the VOD rip missed.

use std::collections::{BTreeMap, HashMap, HashSet};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{ChatError, Result};
use crate::schema::{AddMessage, Dump, MoneyInfo, RawEvent};
use crate::style::Tuning;

/// Resolved video times beyond this are treated as clock garbage.
const MAX_VIDEO_SECONDS: f64 = 4096.0 * 4096.0;

#[derive(Debug, Clone)]
pub struct NormalizedMessage {
    /// Stable across runs; derived from the cross-dump identity key.
    pub message_id: String,
    pub author_id: String,
    pub display_name: String,
    pub video_time: f64,
    pub text: String,
    pub money: Option<MoneyInfo>,
    pub badges: Vec<String>,
    pub unix_usec: i64,
}

impl NormalizedMessage {
    pub fn is_monetary(&self) -> bool {
        self.money.is_some()
    }

    pub fn has_badge(&self, title: &str) -> bool {
        self.badges.iter().any(|badge| badge.eq_ignore_ascii_case(title))
    }
}

#[derive(Debug, Clone, Default)]
pub struct NormalizeOptions {
    /// Seconds; repeats of (author, text) closer than this to the last kept
    /// one are suppressed. Zero disables suppression.
    pub dedup_window: f64,
    pub keep_deleted: bool,
    /// Unix seconds at video 0:00; substitutes for an in-stream anchor.
    pub start_time_hint: Option<f64>,
    /// Constant shift applied to every resolved video time.
    pub offset_hint: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizeStats {
    /// Union size before any dropping.
    pub merged: usize,
    pub deleted: usize,
    pub duplicates: usize,
    /// Interpolated messages discarded by drift resets.
    pub dropped_pending: usize,
    /// Messages whose resolved time was negative or absurd.
    pub dropped_out_of_range: usize,
    pub drift_resets: usize,
    /// Messages whose display name needed an author id suffix.
    pub disambiguated: usize,
}

#[derive(Debug, Clone)]
pub struct NormalizeReport {
    pub messages: Vec<NormalizedMessage>,
    pub stats: NormalizeStats,
}

pub fn normalize(
    dumps: &[Dump],
    options: &NormalizeOptions,
    tuning: &Tuning,
) -> Result<NormalizeReport> {
    // ---- union and deletion accounting ----

    let mut union: BTreeMap<(i64, &str), &AddMessage> = BTreeMap::new();
    let mut deleted_ids: HashSet<&str> = HashSet::new();
    let mut deleted_authors: HashSet<&str> = HashSet::new();

    for dump in dumps {
        for event in &dump.events {
            match event {
                RawEvent::AddMessage(msg) => {
                    union
                        .entry((msg.unix_usec, msg.author_id.as_str()))
                        .or_insert(msg);
                }
                RawEvent::DeleteMessage { target_id } => {
                    deleted_ids.insert(target_id.as_str());
                }
                RawEvent::DeleteByAuthor { author_id } => {
                    deleted_authors.insert(author_id.as_str());
                }
            }
        }
    }

    let mut stats = NormalizeStats {
        merged: union.len(),
        ..NormalizeStats::default()
    };

    // Name collisions are detected over the full union, deletions included;
    // a name is ambiguous if any two author ids ever shared it.
    let ambiguous_names = collect_ambiguous_names(union.values().copied());

    if !options.keep_deleted {
        let before = union.len();
        union.retain(|_, msg| {
            let hit = msg
                .source_id
                .as_deref()
                .map(|id| deleted_ids.contains(id))
                .unwrap_or(false)
                || deleted_authors.contains(msg.author_id.as_str());
            !hit
        });
        stats.deleted = before - union.len();
    }

    // ---- offset resolution and drift detection ----

    let mut resolver = OffsetResolver::new(options.start_time_hint, tuning);
    for msg in union.values() {
        resolver.push(msg)?;
    }
    let (mut timed, resolver_stats) = resolver.finish()?;
    stats.dropped_pending = resolver_stats.dropped_pending;
    stats.drift_resets = resolver_stats.drift_resets;

    // ---- hint shift and range filtering ----

    let shift = options.offset_hint.unwrap_or(0.0);
    let before = timed.len();
    for entry in &mut timed {
        entry.video_time += shift;
    }
    timed.retain(|entry| entry.video_time >= 0.0 && entry.video_time < MAX_VIDEO_SECONDS);
    stats.dropped_out_of_range = resolver_stats.dropped_out_of_range + (before - timed.len());

    timed.sort_by(|a, b| {
        a.video_time
            .total_cmp(&b.video_time)
            .then_with(|| a.msg.author_id.cmp(&b.msg.author_id))
    });

    // ---- near-duplicate suppression ----

    if options.dedup_window > 0.0 {
        let mut last_kept: HashMap<(&str, &str), f64> = HashMap::new();
        let mut keep = vec![true; timed.len()];
        for (index, entry) in timed.iter().enumerate() {
            let key = (entry.msg.author_id.as_str(), entry.msg.text.as_str());
            match last_kept.get(&key) {
                Some(last) if entry.video_time - last < options.dedup_window => {
                    keep[index] = false;
                    stats.duplicates += 1;
                }
                _ => {
                    last_kept.insert(key, entry.video_time);
                }
            }
        }
        let mut index = 0;
        timed.retain(|_| {
            let kept = keep[index];
            index += 1;
            kept
        });
    }

    // ---- name disambiguation and final assembly ----

    let messages = timed
        .into_iter()
        .map(|entry| {
            let msg = entry.msg;
            let base_name = msg.author_name.as_deref().unwrap_or(&msg.author_id);
            let display_name = if ambiguous_names.contains(base_name) {
                stats.disambiguated += 1;
                format!("{base_name}  ({})", msg.author_id)
            } else {
                base_name.to_owned()
            };
            NormalizedMessage {
                message_id: message_id(msg.unix_usec, &msg.author_id),
                author_id: msg.author_id.clone(),
                display_name,
                video_time: entry.video_time,
                text: msg.text.clone(),
                money: msg.money.clone(),
                badges: msg.badges.clone(),
                unix_usec: msg.unix_usec,
            }
        })
        .collect();

    Ok(NormalizeReport { messages, stats })
}

/// Stable message identity: a truncated digest of the cross-dump key.
pub fn message_id(unix_usec: i64, author_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(unix_usec.to_be_bytes());
    hasher.update(author_id.as_bytes());
    let digest = hasher.finalize();
    let mut id = String::with_capacity(16);
    for byte in &digest[..8] {
        id.push_str(&format!("{byte:02x}"));
    }
    id
}

fn collect_ambiguous_names<'a>(messages: impl Iterator<Item = &'a AddMessage>) -> HashSet<String> {
    let mut name_to_ids: HashMap<&str, HashSet<&str>> = HashMap::new();
    for msg in messages {
        if let Some(name) = msg.author_name.as_deref() {
            name_to_ids
                .entry(name)
                .or_default()
                .insert(msg.author_id.as_str());
        }
    }
    name_to_ids
        .into_iter()
        .filter(|(_, ids)| ids.len() > 1)
        .map(|(name, _)| name.to_owned())
        .collect()
}

struct TimedEntry<'a> {
    msg: &'a AddMessage,
    video_time: f64,
}

#[derive(Debug, Default)]
struct ResolverStats {
    dropped_pending: usize,
    dropped_out_of_range: usize,
    drift_resets: usize,
}

/// The anchor state machine. Messages flow through in unix order; anything
/// without a trustworthy offset rides in a buffer until the next anchor
/// decides whether the clock it was interpolated against still holds.
struct OffsetResolver<'a> {
    tuning: &'a Tuning,
    /// Unix seconds at video 0:00, once known.
    unix_offset: Option<f64>,
    /// Interpolated against `unix_offset`; discarded wholesale on a reset.
    pending: Vec<TimedEntry<'a>>,
    /// Seen before any offset existed; resolved retroactively.
    unresolved: Vec<&'a AddMessage>,
    committed: Vec<TimedEntry<'a>>,
    stats: ResolverStats,
}

impl<'a> OffsetResolver<'a> {
    fn new(start_time_hint: Option<f64>, tuning: &'a Tuning) -> Self {
        Self {
            tuning,
            unix_offset: start_time_hint,
            pending: Vec::new(),
            unresolved: Vec::new(),
            committed: Vec::new(),
            stats: ResolverStats::default(),
        }
    }

    fn push(&mut self, msg: &'a AddMessage) -> Result<()> {
        check_time_integrity(msg)?;

        let unix_sec = msg.unix_usec as f64 / 1_000_000.0;

        if let Some(offset) = msg.video_offset {
            if offset < 0.0 {
                self.stats.dropped_out_of_range += 1;
                return Ok(());
            }
            // Monetary offsets and offsets right at stream start are not
            // trustworthy enough to anchor the clock.
            if offset >= self.tuning.anchor_trust_seconds && !msg.is_monetary() {
                self.adopt_anchor(unix_sec, offset);
                self.committed.push(TimedEntry {
                    msg,
                    video_time: offset,
                });
                return Ok(());
            }
        }

        match self.unix_offset {
            Some(unix_offset) => self.pending.push(TimedEntry {
                msg,
                video_time: unix_sec - unix_offset,
            }),
            None => self.unresolved.push(msg),
        }
        Ok(())
    }

    fn adopt_anchor(&mut self, unix_sec: f64, offset: f64) {
        let candidate = unix_sec - offset;
        match self.unix_offset {
            None => {
                // First anchor: everything seen so far resolves against it.
                let unresolved = std::mem::take(&mut self.unresolved);
                for msg in unresolved {
                    let video_time = msg.unix_usec as f64 / 1_000_000.0 - candidate;
                    self.committed.push(TimedEntry { msg, video_time });
                }
            }
            Some(current) => {
                let drift = (candidate - current).abs();
                if drift >= self.tuning.drift_reset_seconds {
                    // The broadcast restarted; interpolations against the
                    // old clock are garbage.
                    debug!(
                        drift_seconds = drift,
                        discarded = self.pending.len(),
                        "anchor drift reset"
                    );
                    self.stats.dropped_pending += self.pending.len();
                    self.pending.clear();
                    self.stats.drift_resets += 1;
                } else {
                    if drift >= self.tuning.anchor_trust_seconds {
                        debug!(drift_seconds = drift, "anchor clock correction");
                    }
                    self.committed.append(&mut self.pending);
                }
            }
        }
        self.unix_offset = Some(candidate);
    }

    fn finish(mut self) -> Result<(Vec<TimedEntry<'a>>, ResolverStats)> {
        self.committed.append(&mut self.pending);

        if !self.unresolved.is_empty() {
            // No anchor ever appeared and no hint was given.
            return Err(ChatError::MissingAnchor);
        }

        Ok((self.committed, self.stats))
    }
}

/// Verifies the textual clock against the numeric fields. A mismatch means
/// the dump was malformed or hand-edited, which poisons everything
/// downstream; refuse loudly.
fn check_time_integrity(msg: &AddMessage) -> Result<()> {
    let (Some(offset), Some(time_text)) = (msg.video_offset, msg.time_text.as_deref()) else {
        return Ok(());
    };
    if time_text.starts_with('-') || offset < 0.0 {
        // Negative times are dropped later, not worth cross-checking.
        return Ok(());
    }
    let Some(text_seconds) = parse_time_text(time_text) else {
        return Ok(());
    };

    let offset_whole = offset.floor();
    let int_seconds = msg.time_in_seconds.map(|s| s.floor()).unwrap_or(offset_whole);

    if offset_whole != int_seconds || int_seconds != text_seconds as f64 {
        return Err(ChatError::TimeIntegrity {
            record: format!("{} @ unix {}", msg.author_id, msg.unix_usec),
            text_seconds: text_seconds as f64,
            offset_seconds: offset,
        });
    }
    Ok(())
}

/// Parses "H:MM:SS" or "MM:SS", ignoring a fractional tail.
fn parse_time_text(text: &str) -> Option<i64> {
    let whole = text.split('.').next().unwrap_or(text);
    let parts: Vec<&str> = whole.split(':').collect();
    let (h, m, s) = match parts.as_slice() {
        [h, m, s] => (h.parse::<i64>().ok()?, m.parse::<i64>().ok()?, s.parse::<i64>().ok()?),
        [m, s] => (0, m.parse::<i64>().ok()?, s.parse::<i64>().ok()?),
        _ => return None,
    };
    Some(60 * (60 * h + m) + s)
}
