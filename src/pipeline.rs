//! End-to-end conversion: dump files in, subtitle script out.
//!
//! Loading, normalization, layout and serialization are sequential;
//! measurement and wrapping fan out over a worker pool because each message
//! is independent given a read-only font and its worker's own tokenizer.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use fontdue::Font;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::ass::{self, EmitterConfig};
use crate::error::ChatError;
use crate::layout::{self, BoxConfig, DanmakuConfig, WrappedMessage};
use crate::metrics::{self, FontMetrics};
use crate::probe;
use crate::schema::{self, Dump};
use crate::style::{BoxArea, Screen, Tuning};
use crate::timeline::{self, NormalizeOptions, NormalizeReport, NormalizedMessage};
use crate::tokenize::{mecab_available, MecabMode, MecabProcess, Segmenter};
use crate::wrap::{self, contains_kanji, is_cjk_dominant, WrapResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Box,
    Danmaku,
}

#[derive(Debug)]
pub struct RenderConfig {
    /// Trusted VOD rip first, live captures after.
    pub inputs: Vec<PathBuf>,
    pub output: Option<PathBuf>,
    pub mode: Mode,
    pub screen: Screen,
    pub box_area: BoxArea,
    pub fill: bool,
    /// Explicit font file; otherwise the usual directories are searched.
    pub font_path: Option<PathBuf>,
    pub font_family: String,
    pub font_size: u32,
    pub speed: f32,
    pub spread: bool,
    pub seed: u64,
    pub kana: bool,
    pub emotes: Option<PathBuf>,
    pub media: Option<PathBuf>,
    /// Worker threads; zero takes the pool default.
    pub threads: usize,
    pub normalize: NormalizeOptions,
    pub tuning: Tuning,
}

#[derive(Debug)]
pub struct RenderSummary {
    pub output: PathBuf,
    pub messages: usize,
    pub events: usize,
    pub supers: usize,
    /// Danmaku messages that found no free lane in any tier.
    pub degraded: usize,
}

pub fn load_dumps(paths: &[PathBuf]) -> Result<Vec<Dump>> {
    if paths.is_empty() {
        bail!("no dump files given");
    }
    let mut dumps = Vec::with_capacity(paths.len());
    for path in paths {
        info!(path = %path.display(), "loading dump");
        let dump = schema::load_dump(path)?;
        debug!(
            records = dump.stats.records,
            events = dump.stats.events,
            ignored = dump.stats.ignored,
            malformed = dump.stats.malformed,
            "parsed dump"
        );
        dumps.push(dump);
    }
    Ok(dumps)
}

/// Loading and normalization up to the point where rendering decisions
/// start; also the whole of what `check` runs.
pub fn load_and_normalize(
    inputs: &[PathBuf],
    options: &NormalizeOptions,
    tuning: &Tuning,
) -> Result<NormalizeReport> {
    let dumps = load_dumps(inputs)?;
    let report = timeline::normalize(&dumps, options, tuning)?;
    info!(
        messages = report.messages.len(),
        merged = report.stats.merged,
        duplicates = report.stats.duplicates,
        deleted = report.stats.deleted,
        drift_resets = report.stats.drift_resets,
        "normalized timeline"
    );
    Ok(report)
}

pub fn render(config: &RenderConfig) -> Result<RenderSummary> {
    if config.kana && !mecab_available() {
        return Err(ChatError::TokenizerUnavailable(
            "--kana requested but the mecab binary is missing".to_owned(),
        )
        .into());
    }

    let report = load_and_normalize(&config.inputs, &config.normalize, &config.tuning)?;
    let messages = report.messages;
    if messages.is_empty() {
        bail!("no renderable messages in the given dump file(s)");
    }

    if let Some(media) = &config.media {
        let chat_end = messages.last().map(|msg| msg.video_time).unwrap_or(0.0);
        probe::check_duration(media, chat_end);
    }

    let emotes = match &config.emotes {
        Some(path) => Some(schema::load_emote_map(path)?),
        None => None,
    };

    let font_path = match &config.font_path {
        Some(path) => path.clone(),
        None => metrics::find_font()?,
    };
    info!(font = %font_path.display(), size = config.font_size, "measuring with");
    let font = metrics::load_font(&font_path)?;

    let budget = match config.mode {
        Mode::Box => config.box_area.width as f32,
        // The renderer wraps anything wider than the screen anyway; half
        // keeps scroll durations sane.
        Mode::Danmaku => config.screen.width as f32 / 2.0,
    };

    let job = WrapJob {
        budget,
        kana: config.kana,
        emotes: emotes.as_ref(),
        tuning: &config.tuning,
    };
    let wraps = wrap_messages(
        &messages,
        &font,
        config.font_size as f32,
        config.threads,
        &job,
    )?;
    let prepared: Vec<WrappedMessage> = messages
        .into_iter()
        .zip(wraps)
        .map(|(message, wrap)| WrappedMessage { message, wrap })
        .collect();
    let message_count = prepared.len();

    let output = config
        .output
        .clone()
        .unwrap_or_else(|| derive_output(&config.inputs[0]));
    let file = File::create(&output)
        .with_context(|| format!("failed to create {}", output.display()))?;
    let mut out = BufWriter::new(file);
    let emitter = EmitterConfig {
        screen: config.screen,
        font_family: config.font_family.clone(),
        font_size: config.font_size,
        fill: config.fill,
    };

    let summary = match config.mode {
        Mode::Danmaku => {
            let placed = layout::place_danmaku(
                prepared,
                &DanmakuConfig {
                    screen: config.screen,
                    font_size: config.font_size as f32,
                    speed: config.speed,
                    spread: config.spread,
                    seed: config.seed,
                },
                &config.tuning,
            );
            if placed.degraded > 0 {
                warn!(
                    count = placed.degraded,
                    "messages placed at random because every lane was taken"
                );
            }
            info!(
                events = placed.events.len(),
                supers = placed.supers.len(),
                "placed danmaku"
            );
            ass::write_danmaku(&mut out, &placed, &emitter)?;
            RenderSummary {
                output: output.clone(),
                messages: message_count,
                events: placed.events.len(),
                supers: placed.supers.len(),
                degraded: placed.degraded,
            }
        }
        Mode::Box => {
            let placed = layout::place_box(
                prepared,
                &BoxConfig {
                    area: config.box_area,
                },
                &config.tuning,
            );
            info!(events = placed.events.len(), "placed box stack");
            ass::write_box(&mut out, &placed, config.box_area, &emitter)?;
            RenderSummary {
                output: output.clone(),
                messages: message_count,
                events: placed.events.len(),
                supers: 0,
                degraded: 0,
            }
        }
    };
    out.flush()
        .with_context(|| format!("failed to write {}", output.display()))?;

    Ok(summary)
}

/// Per-worker state: an independent measurement cache and, when mecab is
/// present, the worker's own tokenizer processes.
struct WorkerContext {
    measurer: FontMetrics,
    wakati: Option<MecabProcess>,
    yomi: Option<MecabProcess>,
}

/// Shared read-only inputs of the wrapping stage.
struct WrapJob<'a> {
    budget: f32,
    kana: bool,
    emotes: Option<&'a HashMap<String, String>>,
    tuning: &'a Tuning,
}

fn wrap_messages(
    messages: &[NormalizedMessage],
    font: &Arc<Font>,
    font_size: f32,
    threads: usize,
    job: &WrapJob<'_>,
) -> Result<Vec<WrapResult>> {
    // Fails here rather than inside the pool if the font is unusable.
    let template = FontMetrics::new(Arc::clone(font), font_size)?;
    let use_mecab = mecab_available();
    let kana = job.kana;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .context("failed to build worker pool")?;

    info!(messages = messages.len(), "wrapping");
    let wraps: std::result::Result<Vec<WrapResult>, ChatError> = pool.install(|| {
        messages
            .par_iter()
            .map_init(
                || WorkerContext {
                    measurer: template.clone(),
                    wakati: use_mecab.then(|| spawn_tokenizer(MecabMode::Wakati)).flatten(),
                    yomi: (kana && use_mecab)
                        .then(|| spawn_tokenizer(MecabMode::Yomi))
                        .flatten(),
                },
                |ctx, msg| wrap_one(ctx, msg, job),
            )
            .collect()
    });
    Ok(wraps?)
}

fn spawn_tokenizer(mode: MecabMode) -> Option<MecabProcess> {
    match MecabProcess::spawn(mode) {
        Ok(process) => Some(process),
        Err(error) => {
            warn!("tokenizer failed to start in worker: {error}");
            None
        }
    }
}

fn wrap_one(
    ctx: &mut WorkerContext,
    msg: &NormalizedMessage,
    job: &WrapJob<'_>,
) -> std::result::Result<WrapResult, ChatError> {
    let mut text = match job.emotes {
        Some(map) => schema::apply_emotes(&msg.text, map),
        None => msg.text.clone(),
    };

    let cjk = is_cjk_dominant(&text);
    if job.kana && cjk && contains_kanji(&text) {
        if let Some(yomi) = ctx.yomi.as_mut() {
            text = crate::tokenize::katakana_to_hiragana(&yomi.analyze(&text)?);
        }
    }

    let segmenter = ctx
        .wakati
        .as_mut()
        .map(|process| process as &mut dyn Segmenter);
    wrap::wrap_message(&mut ctx.measurer, segmenter, &text, job.budget, cjk, job.tuning)
}

fn derive_output(input: &Path) -> PathBuf {
    let mut name = input.as_os_str().to_owned();
    name.push(".ass");
    PathBuf::from(name)
}
