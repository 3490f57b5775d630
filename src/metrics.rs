//! Text measurement.
//!
//! Everything downstream of the wrapper works in measured pixels, so the
//! measurer is the one collaborator the run cannot start without. Each
//! parallel worker owns its own [`FontMetrics`] instance; the parsed font is
//! shared read-only behind an `Arc`, the cache is not.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fontdue::Font;

use crate::error::{ChatError, Result};

/// Strings longer than this are not worth caching; they rarely repeat.
const CACHE_MAX_CHARS: usize = 24;
/// Drop the whole cache once it grows past this many entries.
const CACHE_CLEAR_LEN: usize = 1024 * 64;

/// Pixel measurement of text blocks. Embedded newlines separate lines.
pub trait TextMeasurer {
    fn measure(&mut self, text: &str) -> (f32, f32);
    /// Distance from the baseline to the bottom of the em box, positive.
    fn descent(&self) -> f32;
    fn font_size(&self) -> f32;
}

#[derive(Clone)]
pub struct FontMetrics {
    font: Arc<Font>,
    size: f32,
    descent: f32,
    line_height: f32,
    cache: HashMap<String, (f32, f32)>,
}

impl FontMetrics {
    pub fn new(font: Arc<Font>, size: f32) -> Result<Self> {
        let line = font.horizontal_line_metrics(size).ok_or_else(|| {
            ChatError::FontUnavailable("font has no horizontal metrics".to_owned())
        })?;
        Ok(Self {
            font,
            size,
            descent: -line.descent,
            line_height: line.new_line_size,
            cache: HashMap::new(),
        })
    }

    fn line_width(&self, line: &str) -> f32 {
        let mut width = 0.0;
        let mut prev: Option<char> = None;
        for ch in line.chars() {
            if let Some(prev) = prev {
                if let Some(kern) = self.font.horizontal_kern(prev, ch, self.size) {
                    width += kern;
                }
            }
            width += self.font.metrics(ch, self.size).advance_width;
            prev = Some(ch);
        }
        width
    }

    fn measure_uncached(&self, text: &str) -> (f32, f32) {
        let mut width = 0.0f32;
        let mut lines = 0usize;
        for line in text.split('\n') {
            width = width.max(self.line_width(line));
            lines += 1;
        }
        (width, lines as f32 * self.line_height)
    }
}

impl TextMeasurer for FontMetrics {
    fn measure(&mut self, text: &str) -> (f32, f32) {
        if text.chars().count() > CACHE_MAX_CHARS {
            return self.measure_uncached(text);
        }
        if let Some(size) = self.cache.get(text) {
            return *size;
        }
        if self.cache.len() > CACHE_CLEAR_LEN {
            self.cache.clear();
        }
        let size = self.measure_uncached(text);
        self.cache.insert(text.to_owned(), size);
        size
    }

    fn descent(&self) -> f32 {
        self.descent
    }

    fn font_size(&self) -> f32 {
        self.size
    }
}

/// Fixed-advance measurer for tests: every character is `advance` wide,
/// every line `line_height` tall. No font file needed.
pub struct FixedAdvance {
    pub advance: f32,
    pub line_height: f32,
    pub descent: f32,
}

impl FixedAdvance {
    pub fn new(advance: f32) -> Self {
        Self {
            advance,
            line_height: 20.0,
            descent: 4.0,
        }
    }
}

impl TextMeasurer for FixedAdvance {
    fn measure(&mut self, text: &str) -> (f32, f32) {
        let mut width = 0usize;
        let mut lines = 0usize;
        for line in text.split('\n') {
            width = width.max(line.chars().count());
            lines += 1;
        }
        (width as f32 * self.advance, lines as f32 * self.line_height)
    }

    fn descent(&self) -> f32 {
        self.descent
    }

    fn font_size(&self) -> f32 {
        self.line_height * 0.8
    }
}

pub fn load_font(path: &Path) -> Result<Arc<Font>> {
    let bytes = fs::read(path).map_err(|error| {
        ChatError::FontUnavailable(format!("failed to read {}: {error}", path.display()))
    })?;
    let font = Font::from_bytes(bytes, fontdue::FontSettings::default()).map_err(|error| {
        ChatError::FontUnavailable(format!("failed to parse {}: {error}", path.display()))
    })?;
    Ok(Arc::new(font))
}

/// Looks for a CJK-capable font in the usual places when the caller did not
/// name one.
pub fn find_font() -> Result<PathBuf> {
    const NAMES: [&str; 5] = [
        "NotoSansCJKjp-Regular.otf",
        "NotoSansCJK-Regular.otf",
        "NotoSansJP-Regular.otf",
        "NotoSans-Regular.ttf",
        "DejaVuSans.ttf",
    ];

    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut dirs: Vec<PathBuf> = Vec::new();
    if let Some(home) = &home {
        dirs.push(home.join(".fonts"));
        dirs.push(home.join(".local/share/fonts"));
        dirs.push(home.join("fonts"));
    }
    dirs.push(PathBuf::from("/usr/share/fonts/opentype/noto"));
    dirs.push(PathBuf::from("/usr/share/fonts/truetype/noto"));
    dirs.push(PathBuf::from("/usr/share/fonts/noto-cjk"));
    dirs.push(PathBuf::from("/usr/local/share/fonts"));
    dirs.push(PathBuf::from("/usr/share/fonts/truetype/dejavu"));

    let mut tried = Vec::new();
    for dir in &dirs {
        for name in NAMES {
            let candidate = dir.join(name);
            if candidate.exists() {
                return Ok(candidate);
            }
            tried.push(candidate);
        }
    }

    let listing: Vec<String> = tried
        .iter()
        .map(|path| format!("  {}", path.display()))
        .collect();
    Err(ChatError::FontUnavailable(format!(
        "no usable font found; pass --font or install one of:\n{}",
        listing.join("\n")
    )))
}
