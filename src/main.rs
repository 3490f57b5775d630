use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use chatsubs::ass::hms;
use chatsubs::pipeline::{self, Mode, RenderConfig};
use chatsubs::style::{self, BoxArea, Tuning};
use chatsubs::timeline::NormalizeOptions;

#[derive(Debug, Parser)]
#[command(name = "chatsubs")]
#[command(about = "Convert recorded live-chat dumps into ASS subtitle overlays")]
#[command(version = version_string())]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Convert dump files into an .ass script.
    Render(RenderArgs),
    /// Parse and normalize dumps, printing statistics without rendering.
    Check(CheckArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    /// Bottom-anchored stack inside a fixed area.
    Box,
    /// Messages scroll right to left across the video.
    Danmaku,
}

#[derive(Debug, Args)]
struct RenderArgs {
    /// Chat dump files; the trusted VOD rip first, live captures after.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Output path; defaults to the first input with .ass appended.
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Overlay style.
    #[arg(short = 'm', long, value_enum, default_value_t = ModeArg::Box)]
    mode: ModeArg,

    /// Video resolution, WxH.
    #[arg(short = 'r', long, default_value = "1280x720")]
    resolution: String,

    /// Box area, WxH+X+Y; defaults to the full screen.
    #[arg(short = 'b', long = "box")]
    box_area: Option<String>,

    /// Draw a background pad behind box-mode text.
    #[arg(short = 'f', long)]
    fill: bool,

    /// Font file used for measurement; common directories are searched
    /// when omitted.
    #[arg(long)]
    font: Option<PathBuf>,

    /// Font family name written into the script header.
    #[arg(long, default_value = "Noto Sans CJK JP Regular")]
    font_family: String,

    /// Font size in points; 0 picks 18 for box and 24 for danmaku.
    #[arg(long, default_value_t = 0)]
    font_size: u32,

    /// Danmaku scroll speed, pixels per second.
    #[arg(long, default_value_t = 256.0)]
    speed: f32,

    /// Danmaku: distribute lanes evenly instead of center-first.
    #[arg(long)]
    spread: bool,

    /// Placement jitter seed.
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Replace kanji with hiragana readings (requires mecab).
    #[arg(long)]
    kana: bool,

    /// JSON map of emote shortcuts to replacement glyphs.
    #[arg(long)]
    emotes: Option<PathBuf>,

    /// Media file to cross-check the chat duration against.
    #[arg(long)]
    media: Option<PathBuf>,

    /// Worker threads; 0 uses all cores.
    #[arg(long, default_value_t = 0)]
    threads: usize,

    #[command(flatten)]
    normalize: NormalizeArgs,

    /// YAML file overriding layout tuning knobs.
    #[arg(long)]
    style: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct CheckArgs {
    /// Chat dump files; the trusted VOD rip first, live captures after.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    #[command(flatten)]
    normalize: NormalizeArgs,

    /// YAML file overriding layout tuning knobs.
    #[arg(long)]
    style: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct NormalizeArgs {
    /// Seconds within which a repeated (author, text) pair is dropped;
    /// 0 keeps everything.
    #[arg(long, default_value_t = 10.0)]
    dedup_window: f64,

    /// Keep messages that were deleted or whose author was banned.
    #[arg(long)]
    keep_deleted: bool,

    /// Wall-clock time of video position 0:00, as unix seconds or RFC 3339;
    /// substitutes for an in-stream anchor.
    #[arg(long)]
    start_time: Option<String>,

    /// Seconds added to every message time after resolution.
    #[arg(long)]
    offset: Option<f64>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Render(args) => run_render(args),
        Commands::Check(args) => run_check(args),
    }
}

fn run_render(args: RenderArgs) -> Result<()> {
    let tuning = load_tuning(args.style.as_deref())?;
    let screen = style::parse_screen(&args.resolution)?;
    let box_area = match args.box_area.as_deref() {
        Some(raw) => style::parse_box_area(raw)?,
        None => BoxArea::full(screen),
    };

    let mode = match args.mode {
        ModeArg::Box => Mode::Box,
        ModeArg::Danmaku => Mode::Danmaku,
    };
    let font_size = if args.font_size == 0 {
        match mode {
            Mode::Box => 18,
            Mode::Danmaku => 24,
        }
    } else {
        args.font_size
    };

    let config = RenderConfig {
        inputs: args.inputs,
        output: args.output,
        mode,
        screen,
        box_area,
        fill: args.fill,
        font_path: args.font,
        font_family: args.font_family,
        font_size,
        speed: args.speed,
        spread: args.spread,
        seed: args.seed,
        kana: args.kana,
        emotes: args.emotes,
        media: args.media,
        threads: args.threads,
        normalize: normalize_options(&args.normalize)?,
        tuning,
    };

    let summary = pipeline::render(&config)?;
    if summary.supers > 0 {
        println!(
            "Wrote {} ({} events + {} superchats from {} messages)",
            summary.output.display(),
            summary.events,
            summary.supers,
            summary.messages,
        );
    } else {
        println!(
            "Wrote {} ({} events from {} messages)",
            summary.output.display(),
            summary.events,
            summary.messages,
        );
    }
    Ok(())
}

fn run_check(args: CheckArgs) -> Result<()> {
    let tuning = load_tuning(args.style.as_deref())?;
    let options = normalize_options(&args.normalize)?;
    let report = pipeline::load_and_normalize(&args.inputs, &options, &tuning)?;

    let span = match (report.messages.first(), report.messages.last()) {
        (Some(first), Some(last)) => {
            format!("{} to {}", hms(first.video_time), hms(last.video_time))
        }
        _ => "empty".to_owned(),
    };
    println!(
        "OK: {} messages from {} dump file(s), {}",
        report.messages.len(),
        args.inputs.len(),
        span,
    );
    println!(
        "Merged: {} / duplicates: {} / deleted: {} / out of range: {} / drift resets: {}",
        report.stats.merged,
        report.stats.duplicates,
        report.stats.deleted,
        report.stats.dropped_out_of_range,
        report.stats.drift_resets,
    );
    Ok(())
}

fn load_tuning(path: Option<&Path>) -> Result<Tuning> {
    match path {
        Some(path) => style::load_tuning(path),
        None => Ok(Tuning::default()),
    }
}

fn normalize_options(args: &NormalizeArgs) -> Result<NormalizeOptions> {
    let start_time_hint = match args.start_time.as_deref() {
        Some(raw) => Some(parse_start_time(raw)?),
        None => None,
    };
    Ok(NormalizeOptions {
        dedup_window: args.dedup_window,
        keep_deleted: args.keep_deleted,
        start_time_hint,
        offset_hint: args.offset,
    })
}

/// Accepts plain unix seconds or an RFC 3339 timestamp.
fn parse_start_time(raw: &str) -> Result<f64> {
    if let Ok(seconds) = raw.parse::<f64>() {
        return Ok(seconds);
    }
    let parsed = chrono::DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("invalid start time {raw:?}; give unix seconds or RFC 3339"))?;
    Ok(parsed.timestamp_micros() as f64 / 1_000_000.0)
}

fn version_string() -> String {
    match option_env!("CHATSUBS_GIT_HASH") {
        Some(hash) => format!("{} ({hash})", env!("CARGO_PKG_VERSION")),
        None => env!("CARGO_PKG_VERSION").to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_time_accepts_unix_seconds_and_rfc3339() {
        assert_eq!(
            parse_start_time("1604840580").expect("unix seconds"),
            1_604_840_580.0
        );
        let parsed = parse_start_time("2020-11-08T12:23:00Z").expect("rfc 3339");
        assert_eq!(parsed, 1_604_838_180.0);
        assert!(parse_start_time("yesterday").is_err());
    }
}
