//! Placement and wrapping benchmarks over a synthetic chat burst.
//!
//! Run: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use chatsubs::layout::{place_box, place_danmaku, BoxConfig, DanmakuConfig, WrappedMessage};
use chatsubs::metrics::FixedAdvance;
use chatsubs::style::{BoxArea, Screen, Tuning};
use chatsubs::timeline::{message_id, NormalizedMessage};
use chatsubs::wrap::{optimal_break, WrapResult};

/// A plausible stream: messages every 80ms with mixed widths, one in
/// sixteen spanning two lines.
fn synthetic_burst(count: usize) -> Vec<WrappedMessage> {
    (0..count)
        .map(|i| {
            let time = i as f64 * 0.08;
            let width = 120.0 + (i % 13) as f32 * 36.0;
            let lines = if i % 16 == 0 {
                vec![format!("message {i} line one"), "line two".to_owned()]
            } else {
                vec![format!("message {i}")]
            };
            let height = 28.0 * lines.len() as f32;
            WrappedMessage {
                message: NormalizedMessage {
                    message_id: message_id(i as i64, "UCbench"),
                    author_id: format!("UC{}", i % 97),
                    display_name: format!("viewer{}", i % 97),
                    video_time: time,
                    text: lines.join(" "),
                    money: None,
                    badges: Vec::new(),
                    unix_usec: i as i64,
                },
                wrap: WrapResult {
                    lines,
                    width,
                    height,
                },
            }
        })
        .collect()
}

fn bench_placement(c: &mut Criterion) {
    let screen = Screen {
        width: 1280,
        height: 720,
    };
    let tuning = Tuning::default();
    let burst = synthetic_burst(2000);

    let mut group = c.benchmark_group("placement");
    group.sample_size(50);

    let danmaku = DanmakuConfig {
        screen,
        font_size: 24.0,
        speed: 256.0,
        spread: false,
        seed: 0,
    };
    group.bench_function("danmaku_2000", |b| {
        b.iter(|| {
            let layout = place_danmaku(black_box(burst.clone()), &danmaku, &tuning);
            black_box(layout.events.len())
        })
    });

    let spread = DanmakuConfig {
        spread: true,
        ..danmaku
    };
    group.bench_function("danmaku_2000_spread", |b| {
        b.iter(|| {
            let layout = place_danmaku(black_box(burst.clone()), &spread, &tuning);
            black_box(layout.events.len())
        })
    });

    let boxed = BoxConfig {
        area: BoxArea {
            width: 400,
            height: 300,
            x: 32,
            y: 380,
        },
    };
    group.bench_function("box_2000", |b| {
        b.iter(|| {
            let layout = place_box(black_box(burst.clone()), &boxed, &tuning);
            black_box(layout.events.len())
        })
    });

    group.finish();
}

fn bench_wrapping(c: &mut Criterion) {
    let paragraph = "so that was the most incredible clutch I have ever seen in my \
                     entire life and I cannot believe the chat is still standing after \
                     that finale honestly"
        .repeat(4);

    let mut group = c.benchmark_group("wrapping");
    group.sample_size(50);

    group.bench_function("optimal_break_paragraph", |b| {
        let mut measurer = FixedAdvance::new(11.0);
        b.iter(|| {
            let lines = optimal_break(&mut measurer, black_box(&paragraph), 420.0);
            black_box(lines.len())
        })
    });

    group.finish();
}

criterion_group!(benches, bench_placement, bench_wrapping);
criterion_main!(benches);
