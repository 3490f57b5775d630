//! Line wrapping into a pixel budget.
//!
//! Primary algorithm is the classic optimal-fit paragraph breaker
//! (least squared slack over all lines, O(n²) with back-pointer
//! reconstruction). Japanese-dominant text that still overflows gets two
//! fallbacks: re-segmentation on punctuation classes, then word boundaries
//! from the tokenizer with a repair pass for leading punctuation.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::Result;
use crate::metrics::TextMeasurer;
use crate::style::Tuning;
use crate::tokenize::Segmenter;

/// Characters that must not start a line; a run of them glues to the
/// previous line.
const TRAILING_CLASS: &str =
    "　、。〇〉》」』】〕〗〙〛〜〞〟・…⋯！＂）＊－．／＞？＠＼］＿～｡｣･￭￮";
/// Characters that must not end a line; a run of them glues to the next.
const LEADING_CLASS: &str = "〈《「『【〔〖〘〚〝（＜［｀｢";

#[derive(Debug, Clone, PartialEq)]
pub struct WrapResult {
    pub lines: Vec<String>,
    pub width: f32,
    pub height: f32,
}

/// True when kanji+kana dominate the message enough that ascii-whitespace
/// wrapping is unlikely to find break points.
pub fn is_cjk_dominant(text: &str) -> bool {
    let mut kanji = 0usize;
    let mut kana = 0usize;
    let mut ascii = 0usize;
    for ch in text.chars() {
        match ch {
            '\u{4E00}'..='\u{9FAF}' => kanji += 1,
            '\u{3040}'..='\u{30FF}' => kana += 1,
            'a'..='z' | 'A'..='Z' => ascii += 1,
            _ => {}
        }
    }
    (kanji + kana) as f64 / ((kanji + kana + ascii) as f64 + 0.1) > 0.7
}

/// Whether a kana transcription would change anything.
pub fn contains_kanji(text: &str) -> bool {
    text.chars().any(|ch| ('\u{4E00}'..='\u{9FAF}').contains(&ch))
}

/// Optimal-fit break of whitespace-delimited tokens into `budget` pixels.
///
/// Token widths are measured with a trailing guard glyph standing in for
/// the inter-token gap. A token too wide for the budget on its own still
/// gets its own line (penalized by its overshoot) so the chain never
/// disconnects.
pub fn optimal_break(measurer: &mut dyn TextMeasurer, text: &str, budget: f32) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let count = words.len();
    if count == 0 {
        return Vec::new();
    }

    let mut offsets = Vec::with_capacity(count + 1);
    offsets.push(0.0f32);
    for word in &words {
        let (width, _) = measurer.measure(&format!("{word}_"));
        let last = *offsets.last().unwrap_or(&0.0);
        offsets.push(last + width);
    }

    let mut minima = vec![f64::INFINITY; count + 1];
    minima[0] = 0.0;
    let mut breaks = vec![0usize; count + 1];

    for i in 0..count {
        for j in (i + 1)..=count {
            let width = offsets[j] - offsets[i] + (j - i - 1) as f32;
            if width > budget {
                if j == i + 1 {
                    let over = f64::from(width - budget);
                    let cost = minima[i] + over * over;
                    if cost < minima[j] {
                        minima[j] = cost;
                        breaks[j] = i;
                    }
                }
                break;
            }
            let slack = f64::from(budget - width);
            let cost = minima[i] + slack * slack;
            if cost < minima[j] {
                minima[j] = cost;
                breaks[j] = i;
            }
        }
    }

    let mut lines = Vec::new();
    let mut j = count;
    while j > 0 {
        let i = breaks[j];
        lines.push(words[i..j].join(" "));
        j = i;
    }
    lines.reverse();
    lines
}

fn trailing_class_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!("([{TRAILING_CLASS}]+)"))
            .expect("trailing punctuation regex should compile")
    })
}

fn leading_class_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!("([{LEADING_CLASS}]+)"))
            .expect("leading punctuation regex should compile")
    })
}

/// Breaks after runs of trailing-class punctuation and before runs of
/// leading-class punctuation.
fn split_on_punctuation(text: &str) -> Vec<String> {
    let broken = trailing_class_re().replace_all(text, "$1\n");
    let broken = leading_class_re().replace_all(&broken, "\n$1");
    broken.split('\n').map(str::to_owned).collect()
}

/// Wraps tokenizer output, then glues the boundary spaces back together and
/// moves any trailing-class run that ended up starting a line onto the line
/// above.
fn wrap_on_boundaries(
    measurer: &mut dyn TextMeasurer,
    segmented: &str,
    budget: f32,
) -> Vec<String> {
    let mut lines: Vec<String> = optimal_break(measurer, segmented, budget)
        .iter()
        .map(|line| line.replace(' ', ""))
        .collect();

    for n in 1..lines.len() {
        let run_len = lines[n]
            .chars()
            .take_while(|ch| TRAILING_CLASS.contains(*ch))
            .map(char::len_utf8)
            .sum::<usize>();
        if run_len > 0 {
            let run: String = lines[n][..run_len].to_owned();
            lines[n - 1].push_str(&run);
            lines[n].drain(..run_len);
        }
    }
    lines
}

/// Wraps one message. `segmenter` is only consulted for the last-resort
/// fallback on Japanese text.
pub fn wrap_message(
    measurer: &mut dyn TextMeasurer,
    segmenter: Option<&mut dyn Segmenter>,
    text: &str,
    budget: f32,
    cjk: bool,
    tuning: &Tuning,
) -> Result<WrapResult> {
    let mut lines = optimal_break(measurer, text, budget);
    let (mut width, mut height) = measurer.measure(&lines.join("\n"));

    if width >= budget && cjk {
        lines = split_on_punctuation(text);
        let measured = measurer.measure(&lines.join("\n"));
        width = measured.0;
        height = measured.1;

        if width >= budget {
            if let Some(segmenter) = segmenter {
                let segmented = segmenter.segment(text)?;
                lines = wrap_on_boundaries(measurer, &segmented, budget);
                let measured = measurer.measure(&lines.join("\n"));
                width = measured.0;
                height = measured.1;
            }
        }
    }

    lines.retain(|line| !line.trim().is_empty());

    Ok(WrapResult {
        lines,
        width,
        height: height + measurer.descent() * tuning.descent_pad + 0.8,
    })
}
