//! Media duration cross-check.
//!
//! Chat rips carry no reference to the recording they belong to, so pairing
//! the wrong dump with a video is an easy mistake. Probing the container
//! duration and comparing it against the chat span catches most of those.

use std::path::Path;
use std::process::Command;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

/// Waiting rooms and encode tails make small differences normal; beyond
/// this the dump probably belongs to a different recording.
const DURATION_SLACK_SECONDS: f64 = 60.0;

/// Container duration in seconds, via ffprobe.
pub fn media_duration(path: &Path) -> Result<f64> {
    #[derive(Debug, Deserialize)]
    struct FfprobeOutput {
        #[serde(default)]
        format: Option<FfprobeFormat>,
    }

    #[derive(Debug, Deserialize)]
    struct FfprobeFormat {
        #[serde(default)]
        duration: Option<String>,
    }

    let output = Command::new("ffprobe")
        .arg("-v")
        .arg("error")
        .arg("-show_format")
        .arg("-print_format")
        .arg("json")
        .arg(path)
        .output()
        .with_context(|| format!("failed to spawn ffprobe for {}", path.display()))?;

    if !output.status.success() {
        bail!(
            "ffprobe failed for {} (exit status: {})",
            path.display(),
            output.status
        );
    }

    let parsed: FfprobeOutput = serde_json::from_slice(&output.stdout)
        .with_context(|| format!("failed to parse ffprobe JSON for {}", path.display()))?;

    parsed
        .format
        .as_ref()
        .and_then(|format| format.duration.as_deref())
        .and_then(parse_duration)
        .ok_or_else(|| {
            anyhow!(
                "ffprobe did not report a duration for {}",
                path.display()
            )
        })
}

/// Compares the chat span against the media container and logs the verdict.
/// A mismatch is worth a warning, never an abort.
pub fn check_duration(media: &Path, chat_end: f64) {
    let media_dur = match media_duration(media) {
        Ok(duration) => duration,
        Err(error) => {
            warn!("could not verify chat duration: {error:#}");
            return;
        }
    };

    let delta = (chat_end - media_dur).abs();
    let percent = delta * 100.0 / media_dur.max(chat_end).max(1.0);
    if delta > DURATION_SLACK_SECONDS {
        warn!(
            media_seconds = format_args!("{media_dur:.0}"),
            chat_seconds = format_args!("{chat_end:.0}"),
            "media and chat durations differ by {delta:.0}s ({percent:.2}%)"
        );
    } else {
        info!("chat duration appears correct; differs from media by {delta:.0}s ({percent:.2}%)");
    }
}

fn parse_duration(value: &str) -> Option<f64> {
    let parsed = value.trim().parse::<f64>().ok()?;
    (parsed.is_finite() && parsed > 0.0).then_some(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_accepts_ffprobe_output() {
        assert_eq!(parse_duration("5427.283000\n"), Some(5427.283));
        assert_eq!(parse_duration("N/A"), None);
        assert_eq!(parse_duration("0"), None);
        assert_eq!(parse_duration("-3.0"), None);
    }

    #[test]
    fn missing_media_file_is_an_error() {
        let missing = Path::new("/nonexistent/recording.mkv");
        if Command::new("ffprobe").arg("-version").output().is_err() {
            eprintln!("ffprobe not installed; skipping");
            return;
        }
        assert!(media_duration(missing).is_err());
    }
}
