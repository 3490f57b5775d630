//! Placement of wrapped messages on the screen.
//!
//! Danmaku mode is an online interval-packing problem: each message is a
//! rigid rectangle entering at the right edge at its timestamp and scrolling
//! left at constant speed, and the engine assigns it a vertical lane that
//! minimizes overlap with everything else in flight. Box mode is a plain
//! bottom-anchored stack.

use tracing::debug;

use crate::style::{BoxArea, Screen, Tuning};
use crate::timeline::NormalizedMessage;
use crate::wrap::WrapResult;

/// Screen-width fractions at which edge crossings are tracked, ordered from
/// the right edge of travel inward.
const FRACTIONS: [f32; 5] = [0.1, 0.2, 0.5, 0.7, 0.9];

/// How long the final box-mode stack stays on screen.
const BOX_LINGER_SECONDS: f64 = 10.0;

/// One lane-search tier: a member of the in-flight set conflicts when the
/// entering message's left edge reaches either checkpoint before the
/// member's right edge has cleared it. Ordered strictest to loosest; the
/// first tier with any free interval wins.
#[derive(Debug, Clone, Copy)]
struct Tier {
    checks: [usize; 2],
    /// Use the looser overlap allowance when subtracting occupied lanes.
    loose: bool,
}

const TIERS: [Tier; 3] = [
    // Still inside the 10..90% band in a comparable phase.
    Tier {
        checks: [1, 2],
        loose: false,
    },
    // The 30..90% band.
    Tier {
        checks: [0, 3],
        loose: false,
    },
    // Only near-total horizontal overlap counts.
    Tier {
        checks: [0, 4],
        loose: true,
    },
];

/// A normalized message together with its wrapped dimensions.
#[derive(Debug, Clone)]
pub struct WrappedMessage {
    pub message: NormalizedMessage,
    pub wrap: WrapResult,
}

#[derive(Debug, Clone)]
pub struct DanmakuEvent {
    pub message: NormalizedMessage,
    pub lines: Vec<String>,
    pub entry_time: f64,
    pub exit_time: f64,
    /// Top edge of the block.
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Default)]
pub struct DanmakuLayout {
    pub events: Vec<DanmakuEvent>,
    /// Monetary messages, kept separate so the emitter can layer them above
    /// ordinary chat.
    pub supers: Vec<DanmakuEvent>,
    /// Messages that found no free lane in any tier.
    pub degraded: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct DanmakuConfig {
    pub screen: Screen,
    pub font_size: f32,
    /// Scroll speed in pixels per second.
    pub speed: f32,
    /// Even vertical distribution instead of center-seeking.
    pub spread: bool,
    pub seed: u64,
}

/// In-flight member: where it sits and when its right edge clears each
/// tracked screen fraction.
#[derive(Debug, Clone, Copy)]
struct VisEntry {
    y: f32,
    height: f32,
    rights: [f64; 5],
}

/// The entering message's timing profile: when its left edge reaches each
/// tracked fraction.
#[derive(Debug, Clone, Copy)]
struct Probe {
    lefts: [f64; 5],
    height: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LaneChoice {
    Tier(usize),
    Random,
}

pub fn place_danmaku(
    prepared: Vec<WrappedMessage>,
    config: &DanmakuConfig,
    tuning: &Tuning,
) -> DanmakuLayout {
    let screen_w = config.screen.width as f32;
    let screen_h = config.screen.height as f32;

    let mut layout = DanmakuLayout::default();
    let mut vis: Vec<VisEntry> = Vec::new();

    for (index, wrapped) in prepared.into_iter().enumerate() {
        let t0 = wrapped.message.video_time;
        let lines = wrapped.wrap.lines;
        let monetary = wrapped.message.is_monetary();
        let badged = wrapped.message.has_badge("moderator");

        let mut width = wrapped.wrap.width + tuning.margin_px;
        let mut height = wrapped.wrap.height;
        if lines.len() > 1 {
            height +=
                (config.font_size * tuning.line_compensation * (lines.len() - 1) as f32).ceil();
        }
        if monetary {
            // The amount badge renders next to the text but is not part of
            // the measured width.
            width += height * tuning.monetary_pad_heights;
        }
        if badged {
            width += height;
        }

        let duration_mul = if monetary {
            tuning.monetary_duration_mul
        } else {
            1.0
        };
        let duration =
            f64::from((screen_w + width - width * tuning.duration_boost) * duration_mul)
                / f64::from(config.speed);
        let exit_time = t0 + duration;
        let abs_speed = f64::from(screen_w + width) / duration;

        let mut rights = [0.0f64; 5];
        let mut lefts = [0.0f64; 5];
        for (i, fraction) in FRACTIONS.iter().enumerate() {
            rights[i] = t0 + f64::from(width + screen_w * fraction) / abs_speed;
            lefts[i] = t0 + f64::from(screen_w * fraction) / abs_speed;
        }

        // Anything whose right edge already cleared mid-screen no longer
        // competes with a message just entering from the right.
        vis.retain(|member| t0 <= member.rights[2]);

        let probe = Probe {
            lefts,
            height,
        };
        let jitter = hash_u64(
            config.seed ^ ((index as u64) << 17) ^ t0.to_bits(),
        );
        let (y, choice) = select_lane(&vis, &probe, screen_h, config.spread, jitter, tuning);
        if choice == LaneChoice::Random {
            debug!(time = t0, "no free lane in any tier");
            layout.degraded += 1;
        }

        vis.push(VisEntry {
            y,
            height,
            rights,
        });

        let event = DanmakuEvent {
            message: wrapped.message,
            lines,
            entry_time: t0,
            exit_time,
            y,
            width,
            height,
        };
        if monetary {
            layout.supers.push(event);
        } else {
            layout.events.push(event);
        }
    }

    layout
}

/// Runs the tier cascade and picks a vertical position for the probe.
fn select_lane(
    vis: &[VisEntry],
    probe: &Probe,
    screen_h: f32,
    spread: bool,
    jitter: u64,
    tuning: &Tuning,
) -> (f32, LaneChoice) {
    let ymax = (screen_h - probe.height).max(0.0);

    for (tier_index, tier) in TIERS.iter().enumerate() {
        let mut conflicts: Vec<(f32, f32)> = vis
            .iter()
            .filter(|member| {
                tier.checks
                    .iter()
                    .any(|&check| probe.lefts[check] < member.rights[check])
            })
            .map(|member| (member.y, member.y + member.height))
            .collect();
        conflicts.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));

        let allowance = if tier.loose {
            tuning.overlap_loose
        } else {
            tuning.overlap_clean
        };
        let keep_min = probe.height * (1.0 - allowance);
        let frees = free_intervals(ymax, &conflicts, keep_min);
        if frees.is_empty() {
            continue;
        }

        let y = if spread {
            pick_spread(&frees, probe.height, jitter)
        } else {
            pick_centered(&frees, probe.height, screen_h, jitter)
        };
        return (y.clamp(0.0, ymax), LaneChoice::Tier(tier_index));
    }

    let range = (ymax.floor() as u64).max(1);
    ((jitter % range) as f32, LaneChoice::Random)
}

/// Subtracts occupied vertical spans from the position interval `[0, ymax]`.
/// Remainder slivers shorter than `keep_min` are discarded; a technically
/// free but cramped slot reads worse than a mild overlap elsewhere.
fn free_intervals(ymax: f32, occupied: &[(f32, f32)], keep_min: f32) -> Vec<(f32, f32)> {
    let mut frees = vec![(0.0f32, ymax)];
    for &(y1, y2) in occupied {
        let mut next = Vec::with_capacity(frees.len() + 1);
        for &(fy1, fy2) in &frees {
            if fy1 >= y2 || y1 >= fy2 {
                next.push((fy1, fy2));
                continue;
            }
            if y1 > fy1 && y1 - fy1 > keep_min {
                next.push((fy1, y1));
            }
            if fy2 > y2 && fy2 - y2 > keep_min {
                next.push((y2, fy2));
            }
        }
        frees = next;
    }
    frees
}

/// Spread placement: the largest free interval, centered when the message
/// barely fits, otherwise jittered inside the slack.
fn pick_spread(frees: &[(f32, f32)], height: f32, jitter: u64) -> f32 {
    let mut best = (0.0f32, 0.0f32, 0.0f32);
    for &(y0, y1) in frees {
        let avail = y1 - y0;
        if avail > best.0 || (avail == best.0 && y0 > best.1) {
            best = (avail, y0, y1);
        }
    }
    let (avail, y0, _) = best;
    if avail <= height {
        y0 + (avail - height) / 2.0
    } else {
        let slack = ((avail - height).floor() as u64).max(1);
        y0 + (jitter % slack) as f32
    }
}

/// Center-seeking placement: a perfect straddle of mid-screen when some
/// interval contains it, otherwise the interval edge nearest the center.
fn pick_centered(frees: &[(f32, f32)], height: f32, screen_h: f32, jitter: u64) -> f32 {
    let target = screen_h / 2.0;
    let mut best = f32::MAX;
    let mut chosen = None;

    for &(y0, y1) in frees {
        if y0 <= target && y1 >= target + height {
            return target;
        } else if y0 >= target {
            let distance = y0 - target;
            if distance < best {
                best = distance;
                chosen = Some(y0);
            }
        } else if y1 <= target + height {
            let distance = target - (y1 - height);
            if distance < best {
                best = distance;
                chosen = Some(y1 - height);
            }
        }
    }

    match chosen {
        Some(y) => y,
        // Unreachable for a non-empty interval set; fall back rather than
        // panic.
        None => (jitter % (screen_h as u64).max(1)) as f32,
    }
}

fn hash_u64(mut value: u64) -> u64 {
    value ^= value >> 33;
    value = value.wrapping_mul(0xff51_afd7_ed55_8ccd);
    value ^= value >> 33;
    value = value.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    value ^= value >> 33;
    value
}

// ---- box mode ----

#[derive(Debug, Clone, Copy)]
pub struct BoxConfig {
    pub area: BoxArea,
}

/// One message as rendered inside the box stack.
#[derive(Debug, Clone)]
pub struct BoxMember {
    pub message: NormalizedMessage,
    pub lines: Vec<String>,
    pub height: f32,
}

/// One subtitle event: the stack visible during `[start, end)`, as indices
/// into [`BoxLayout::members`], oldest first.
#[derive(Debug, Clone)]
pub struct BoxEvent {
    pub start: f64,
    pub end: f64,
    pub stack: Vec<usize>,
}

#[derive(Debug, Default)]
pub struct BoxLayout {
    pub members: Vec<BoxMember>,
    pub events: Vec<BoxEvent>,
}

/// Bottom-anchored stack: every arrival shifts the visible messages up by
/// its own height (plus spacing) and evicts whatever leaves the top.
pub fn place_box(prepared: Vec<WrappedMessage>, config: &BoxConfig, tuning: &Tuning) -> BoxLayout {
    let top = config.area.y as f32;
    let anchor = (config.area.y + config.area.height) as f32;

    let mut layout = BoxLayout::default();
    let mut vis: Vec<(usize, f32)> = Vec::new();

    let count = prepared.len();
    let mut starts = Vec::with_capacity(count);
    for wrapped in prepared {
        starts.push(wrapped.message.video_time);
        layout.members.push(BoxMember {
            height: wrapped.wrap.height,
            lines: wrapped.wrap.lines,
            message: wrapped.message,
        });
    }

    for index in 0..count {
        let start = starts[index];
        let end = match starts.get(index + 1) {
            Some(next) => *next,
            None => start + BOX_LINGER_SECONDS,
        };

        let shift = layout.members[index].height * tuning.box_spacing;
        for (_, bottom) in &mut vis {
            *bottom -= shift;
        }
        let members = &layout.members;
        vis.retain(|&(member, bottom)| bottom - members[member].height >= top);
        vis.push((index, anchor));

        layout.events.push(BoxEvent {
            start,
            end,
            stack: vis.iter().map(|&(member, _)| member).collect(),
        });
    }

    layout
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::MoneyInfo;
    use crate::timeline::message_id;

    fn message(unix_sec: f64, author: &str, text: &str, time: f64) -> NormalizedMessage {
        NormalizedMessage {
            message_id: message_id((unix_sec * 1e6) as i64, author),
            author_id: author.to_owned(),
            display_name: author.to_owned(),
            video_time: time,
            text: text.to_owned(),
            money: None,
            badges: Vec::new(),
            unix_usec: (unix_sec * 1e6) as i64,
        }
    }

    fn wrapped(time: f64, width: f32, height: f32) -> WrappedMessage {
        WrappedMessage {
            message: message(time + 1000.0, "author", "text", time),
            wrap: WrapResult {
                lines: vec!["text".to_owned()],
                width,
                height,
            },
        }
    }

    fn config() -> DanmakuConfig {
        DanmakuConfig {
            screen: Screen {
                width: 1000,
                height: 1000,
            },
            font_size: 24.0,
            speed: 100.0,
            spread: false,
            seed: 0,
        }
    }

    fn probe_at(lefts: [f64; 5], height: f32) -> Probe {
        Probe { lefts, height }
    }

    #[test]
    fn free_intervals_subtract_and_discard_slivers() {
        // 30-wide span in the middle of [0, 100]; entering height 20 keeps
        // only remainders longer than 18.
        let frees = free_intervals(100.0, &[(40.0, 70.0)], 18.0);
        assert_eq!(frees, vec![(0.0, 40.0), (70.0, 100.0)]);

        // Slivers vanish instead of surviving as cramped slots.
        let frees = free_intervals(100.0, &[(10.0, 95.0)], 18.0);
        assert!(frees.is_empty());
    }

    #[test]
    fn saturated_strict_tier_falls_back_to_next() {
        // Two members cover all positions. Their right edges have cleared
        // the 90% and 70% checkpoints (no conflict in the middle tier) but
        // not the 80%/50% ones (conflict in the strict tier).
        let lefts = [10.0, 20.0, 50.0, 70.0, 90.0];
        let member_rights = [10.0, 25.0, 55.0, 70.0, 95.0];
        let vis = vec![
            VisEntry {
                y: 0.0,
                height: 500.0,
                rights: member_rights,
            },
            VisEntry {
                y: 500.0,
                height: 500.0,
                rights: member_rights,
            },
        ];
        let probe = probe_at(lefts, 10.0);
        let (y, choice) = select_lane(&vis, &probe, 1000.0, false, 7, &Tuning::default());
        assert_eq!(choice, LaneChoice::Tier(1));
        // The middle tier sees no conflicts at all, so the center straddle
        // is available.
        assert_eq!(y, 500.0);
    }

    #[test]
    fn fully_saturated_tiers_degrade_to_random() {
        let lefts = [10.0, 20.0, 50.0, 70.0, 90.0];
        let vis = vec![
            VisEntry {
                y: 0.0,
                height: 500.0,
                rights: [1000.0; 5],
            },
            VisEntry {
                y: 500.0,
                height: 500.0,
                rights: [1000.0; 5],
            },
        ];
        let probe = probe_at(lefts, 10.0);
        let (y, choice) = select_lane(&vis, &probe, 1000.0, false, 12345, &Tuning::default());
        assert_eq!(choice, LaneChoice::Random);
        assert!(y >= 0.0 && y < 990.0);
    }

    #[test]
    fn centered_pick_prefers_straddle_then_nearest_edge() {
        let y = pick_centered(&[(0.0, 1000.0)], 20.0, 1000.0, 0);
        assert_eq!(y, 500.0);

        // No straddle: intervals end below and start above the center.
        let y = pick_centered(&[(0.0, 300.0), (700.0, 900.0)], 20.0, 1000.0, 0);
        // 300 - 20 is 220 from target; 700 is 200 from target.
        assert_eq!(y, 700.0);
    }

    #[test]
    fn spread_pick_uses_largest_interval() {
        let frees = vec![(0.0, 300.0), (400.0, 900.0)];
        let y = pick_spread(&frees, 20.0, 7);
        // Largest slack is 480; jitter 7 lands at 407.
        assert_eq!(y, 407.0);

        // A slot smaller than the message centers the overhang.
        let y = pick_spread(&[(100.0, 110.0)], 20.0, 7);
        assert_eq!(y, 95.0);
    }

    #[test]
    fn eviction_frees_the_center_lane() {
        let mut cfg = config();
        cfg.screen = Screen {
            width: 1000,
            height: 1000,
        };
        // Second message enters after the first's right edge cleared 50%.
        let layout = place_danmaku(
            vec![wrapped(0.0, 50.0, 20.0), wrapped(6.0, 50.0, 20.0)],
            &cfg,
            &Tuning::default(),
        );
        assert_eq!(layout.events.len(), 2);
        assert_eq!(layout.events[0].y, 500.0);
        assert_eq!(layout.events[1].y, 500.0);
        assert_eq!(layout.degraded, 0);
    }

    #[test]
    fn concurrent_messages_take_distinct_lanes() {
        let layout = place_danmaku(
            vec![wrapped(0.0, 300.0, 40.0), wrapped(0.5, 300.0, 40.0)],
            &config(),
            &Tuning::default(),
        );
        let first = &layout.events[0];
        let second = &layout.events[1];
        let overlap = (first.y.max(second.y))
            < (first.y + first.height).min(second.y + second.height);
        assert!(!overlap, "lanes {} and {} overlap", first.y, second.y);
    }

    #[test]
    fn monetary_messages_go_to_supers_with_doubled_duration() {
        let plain = wrapped(0.0, 100.0, 20.0);
        let mut paid = wrapped(0.0, 100.0, 20.0);
        paid.message.money = Some(MoneyInfo {
            text: "$5.00".to_owned(),
            body_colour: Some("1de9b6".to_owned()),
        });
        let tuning = Tuning::default();
        let layout = place_danmaku(vec![plain, paid], &config(), &tuning);
        assert_eq!(layout.events.len(), 1);
        assert_eq!(layout.supers.len(), 1);

        let plain_duration = layout.events[0].exit_time - layout.events[0].entry_time;
        let paid_duration = layout.supers[0].exit_time - layout.supers[0].entry_time;
        // Twice the duration of an equally-wide plain message, after the
        // amount badge broadened it.
        assert!(paid_duration > plain_duration * 1.9);
        // Badge reservation widened the rectangle.
        assert!(layout.supers[0].width > layout.events[0].width);
    }

    #[test]
    fn multi_line_height_compensation_applies() {
        let mut tall = wrapped(0.0, 100.0, 40.0);
        tall.wrap.lines = vec!["one".to_owned(), "two".to_owned(), "three".to_owned()];
        let layout = place_danmaku(vec![tall], &config(), &Tuning::default());
        // 40 + ceil(24 * 0.25 * 2) = 52.
        assert_eq!(layout.events[0].height, 52.0);
    }

    #[test]
    fn deterministic_given_seed() {
        let build = || {
            place_danmaku(
                (0..40)
                    .map(|i| wrapped(i as f64 * 0.2, 250.0, 30.0))
                    .collect(),
                &DanmakuConfig {
                    spread: true,
                    ..config()
                },
                &Tuning::default(),
            )
        };
        let one = build();
        let two = build();
        let ys1: Vec<f32> = one.events.iter().map(|event| event.y).collect();
        let ys2: Vec<f32> = two.events.iter().map(|event| event.y).collect();
        assert_eq!(ys1, ys2);
    }

    #[test]
    fn box_stack_shifts_and_evicts() {
        let area = BoxArea {
            width: 300,
            height: 100,
            x: 0,
            y: 0,
        };
        let prepared = vec![
            wrapped(0.0, 100.0, 30.0),
            wrapped(1.0, 100.0, 30.0),
            wrapped(2.0, 100.0, 30.0),
        ];
        let layout = place_box(prepared, &BoxConfig { area }, &Tuning::default());
        assert_eq!(layout.events.len(), 3);
        assert_eq!(layout.events[0].stack, vec![0]);
        assert_eq!(layout.events[1].stack, vec![0, 1]);
        // The first message's top passes the box top on the third arrival:
        // 100 - 36 - 36 - 30 < 0.
        assert_eq!(layout.events[2].stack, vec![1, 2]);
    }

    #[test]
    fn box_events_tile_the_timeline() {
        let area = BoxArea {
            width: 300,
            height: 400,
            x: 10,
            y: 20,
        };
        let prepared = vec![wrapped(5.0, 100.0, 30.0), wrapped(8.0, 100.0, 30.0)];
        let layout = place_box(prepared, &BoxConfig { area }, &Tuning::default());
        assert_eq!(layout.events[0].start, 5.0);
        assert_eq!(layout.events[0].end, 8.0);
        assert_eq!(layout.events[1].end, 8.0 + BOX_LINGER_SECONDS);
    }
}
