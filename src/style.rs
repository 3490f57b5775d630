//! Run configuration: screen geometry and the empirically tuned constants.
//!
//! The constants were calibrated against one specific subtitle renderer, so
//! they are data, not code: every one can be overridden from a YAML file
//! passed with `--style`.

use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use anyhow::{bail, Context};
use regex::Regex;
use serde::Deserialize;

use crate::error::{ChatError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Screen {
    pub width: u32,
    pub height: u32,
}

/// Box-mode chat area, in screen pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxArea {
    pub width: u32,
    pub height: u32,
    pub x: u32,
    pub y: u32,
}

impl BoxArea {
    /// Default: the whole screen, anchored top-left.
    pub fn full(screen: Screen) -> Self {
        Self {
            width: screen.width,
            height: screen.height,
            x: 0,
            y: 0,
        }
    }
}

pub fn parse_screen(raw: &str) -> Result<Screen> {
    static SCREEN_RE: OnceLock<Regex> = OnceLock::new();
    let re = SCREEN_RE.get_or_init(|| {
        Regex::new(r"^(\d{2,5})[xX](\d{2,5})$").expect("screen geometry regex should compile")
    });
    let capture = re.captures(raw.trim()).ok_or_else(|| ChatError::Geometry {
        input: raw.to_owned(),
        reason: "expected WxH, e.g. 1280x720".to_owned(),
    })?;
    let parse = |index: usize| -> Result<u32> {
        capture[index].parse().map_err(|_| ChatError::Geometry {
            input: raw.to_owned(),
            reason: "dimension out of range".to_owned(),
        })
    };
    Ok(Screen {
        width: parse(1)?,
        height: parse(2)?,
    })
}

pub fn parse_box_area(raw: &str) -> Result<BoxArea> {
    static BOX_RE: OnceLock<Regex> = OnceLock::new();
    let re = BOX_RE.get_or_init(|| {
        Regex::new(r"^(\d{1,5})[xX](\d{1,5})\+(\d{1,5})\+(\d{1,5})$")
            .expect("box geometry regex should compile")
    });
    let capture = re.captures(raw.trim()).ok_or_else(|| ChatError::Geometry {
        input: raw.to_owned(),
        reason: "expected WxH+X+Y, e.g. 320x500+24+96".to_owned(),
    })?;
    let parse = |index: usize| -> Result<u32> {
        capture[index].parse().map_err(|_| ChatError::Geometry {
            input: raw.to_owned(),
            reason: "dimension out of range".to_owned(),
        })
    };
    Ok(BoxArea {
        width: parse(1)?,
        height: parse(2)?,
        x: parse(3)?,
        y: parse(4)?,
    })
}

/// Empirical constants. Defaults match the values the pipeline was tuned
/// with; override any of them from a `--style` YAML file.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Tuning {
    /// Wrapped-block height gets this many descents of extra padding to
    /// cover systematic undermeasurement.
    pub descent_pad: f32,
    /// Box mode shifts the visible stack up by the new message's height
    /// times this.
    pub box_spacing: f32,
    /// Fraction of a danmaku's own width that does not count toward its
    /// on-screen duration; a shrinking visible remainder still reads as
    /// "on screen".
    pub duration_boost: f32,
    /// Extra height per additional wrapped line, in font sizes; the
    /// renderer's line spacing exceeds the measured block height.
    pub line_compensation: f32,
    /// Tolerated vertical overlap when subtracting occupied lanes, as a
    /// fraction of the entering message's height. Clean applies to the two
    /// strict collision tiers, loose to the last one.
    pub overlap_clean: f32,
    pub overlap_loose: f32,
    /// Video offsets below this many seconds are too close to stream start
    /// to trust as anchors.
    pub anchor_trust_seconds: f64,
    /// Anchor drift at or beyond this many seconds means the broadcast
    /// restarted; interpolated messages in between are discarded.
    pub drift_reset_seconds: f64,
    pub monetary_duration_mul: f32,
    /// Reserved width for a superchat's amount badge, in message heights.
    pub monetary_pad_heights: f32,
    /// Horizontal clearance added to every danmaku's width.
    pub margin_px: f32,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            descent_pad: 2.5,
            box_spacing: 1.2,
            duration_boost: 0.7,
            line_compensation: 0.25,
            overlap_clean: 0.1,
            overlap_loose: 0.2,
            anchor_trust_seconds: 10.0,
            drift_reset_seconds: 60.0,
            monetary_duration_mul: 2.0,
            monetary_pad_heights: 4.0,
            margin_px: 8.0,
        }
    }
}

impl Tuning {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..=10.0).contains(&self.descent_pad) {
            bail!("descent_pad must be in [0, 10], got {}", self.descent_pad);
        }
        if !(1.0..=3.0).contains(&self.box_spacing) {
            bail!("box_spacing must be in [1, 3], got {}", self.box_spacing);
        }
        if !(0.0..1.0).contains(&self.duration_boost) {
            bail!(
                "duration_boost must be in [0, 1), got {}",
                self.duration_boost
            );
        }
        if !(0.0..=1.0).contains(&self.line_compensation) {
            bail!(
                "line_compensation must be in [0, 1], got {}",
                self.line_compensation
            );
        }
        for (name, value) in [
            ("overlap_clean", self.overlap_clean),
            ("overlap_loose", self.overlap_loose),
        ] {
            if !(0.0..1.0).contains(&value) {
                bail!("{name} must be in [0, 1), got {value}");
            }
        }
        if self.anchor_trust_seconds < 0.0 {
            bail!(
                "anchor_trust_seconds must be >= 0, got {}",
                self.anchor_trust_seconds
            );
        }
        if self.drift_reset_seconds <= self.anchor_trust_seconds {
            bail!(
                "drift_reset_seconds ({}) must exceed anchor_trust_seconds ({})",
                self.drift_reset_seconds,
                self.anchor_trust_seconds
            );
        }
        if self.monetary_duration_mul < 1.0 {
            bail!(
                "monetary_duration_mul must be >= 1, got {}",
                self.monetary_duration_mul
            );
        }
        if self.monetary_pad_heights < 0.0 || self.margin_px < 0.0 {
            bail!("monetary_pad_heights and margin_px must be >= 0");
        }
        Ok(())
    }
}

pub fn load_tuning(path: &Path) -> anyhow::Result<Tuning> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read style file {}", path.display()))?;
    let tuning: Tuning = serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to parse style file {}", path.display()))?;
    tuning
        .validate()
        .with_context(|| format!("invalid style file {}", path.display()))?;
    Ok(tuning)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_screen_geometry() {
        let screen = parse_screen("1280x720").expect("geometry should parse");
        assert_eq!(screen.width, 1280);
        assert_eq!(screen.height, 720);
        assert!(parse_screen("1280").is_err());
        assert!(parse_screen("axb").is_err());
    }

    #[test]
    fn parses_box_geometry() {
        let area = parse_box_area("320x500+24+96").expect("geometry should parse");
        assert_eq!((area.width, area.height, area.x, area.y), (320, 500, 24, 96));
        assert!(parse_box_area("320x500").is_err());
    }

    #[test]
    fn default_tuning_is_valid() {
        Tuning::default().validate().expect("defaults should pass");
    }

    #[test]
    fn partial_style_file_overrides_one_field() {
        let tuning: Tuning =
            serde_yaml::from_str("duration_boost: 0.5\n").expect("style yaml should parse");
        assert!((tuning.duration_boost - 0.5).abs() < 1e-6);
        assert!((tuning.box_spacing - 1.2).abs() < 1e-6);
    }

    #[test]
    fn rejects_out_of_range_boost() {
        let tuning = Tuning {
            duration_boost: 1.0,
            ..Tuning::default()
        };
        assert!(tuning.validate().is_err());
    }
}
