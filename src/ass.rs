//! ASS script serialization.
//!
//! One style, alignment bottom-left, every event a `Dialogue` line. Danmaku
//! events carry a `\move` across the full screen width; box events re-render
//! the visible stack at a fixed `\pos` anchor. Escaping targets mpv's
//! libass reading of override blocks.

use std::collections::HashMap;
use std::io::Write;

use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::layout::{BoxLayout, DanmakuEvent, DanmakuLayout};
use crate::style::{BoxArea, Screen};

/// Name colour for moderator badges, BGR. YouTube's moderator blue.
const MODERATOR_COLOUR: &str = "f1845e";

/// Card colour when a monetary message arrives without one, RGB.
const DEFAULT_MONEY_RGB: &str = "1de9b6";

#[derive(Debug, Clone)]
pub struct EmitterConfig {
    pub screen: Screen,
    pub font_family: String,
    pub font_size: u32,
    /// Background pad behind box-mode text.
    pub fill: bool,
}

/// `H:MM:SS.cc`, hours unpadded.
pub fn hms(seconds: f64) -> String {
    let total = seconds.max(0.0);
    let hours = (total / 3600.0) as u64;
    let minutes = ((total % 3600.0) / 60.0) as u64;
    let secs = total % 60.0;
    format!("{hours}:{minutes:02}:{secs:05.2}")
}

/// Escapes message text for use inside a Dialogue line. Braces would open
/// override blocks; a backslash in front of `N`, `n` or `h` would form a
/// control sequence. Renderers strip trailing spaces, so those become hard
/// spaces, and a trailing backslash gets a space so it cannot swallow the
/// override block that follows.
pub fn assan(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' => out.push_str("\\{"),
            '}' => out.push_str("\\}"),
            '\\' if matches!(chars.peek(), Some('N' | 'n' | 'h')) => out.push_str("\\\\"),
            _ => out.push(c),
        }
    }
    let kept = out.trim_end_matches(' ').len();
    let stripped = out.len() - kept;
    if stripped > 0 {
        out.truncate(kept);
        for _ in 0..stripped {
            out.push_str("\\h");
        }
    } else if out.ends_with('\\') {
        out.push(' ');
    }
    out
}

/// Per-author name colours: a hash of the author id picks a hue, so colours
/// are stable across runs and dumps. Box mode uses brighter colours than
/// danmaku because the stack sits on a pad instead of moving video.
struct NameColours {
    saturation: f32,
    value: f32,
    cache: HashMap<String, String>,
}

impl NameColours {
    fn for_danmaku() -> Self {
        NameColours {
            saturation: 0.8,
            value: 0.4,
            cache: HashMap::new(),
        }
    }

    fn for_box() -> Self {
        NameColours {
            saturation: 1.0,
            value: 0.5,
            cache: HashMap::new(),
        }
    }

    /// BGR hex digits for this author's name.
    fn colour(&mut self, author_id: &str, moderator: bool) -> &str {
        if moderator {
            return MODERATOR_COLOUR;
        }
        let (saturation, value) = (self.saturation, self.value);
        self.cache
            .entry(author_id.to_owned())
            .or_insert_with(|| {
                let digest = Sha256::digest(author_id.as_bytes());
                let hue = f32::from(digest[0]) / 256.0;
                let (r, g, b) = hsv_to_rgb(hue, saturation, value);
                format!("{b:02x}{g:02x}{r:02x}")
            })
    }
}

fn hsv_to_rgb(hue: f32, saturation: f32, value: f32) -> (u8, u8, u8) {
    let sector = (hue * 6.0).floor();
    let f = hue * 6.0 - sector;
    let p = value * (1.0 - saturation);
    let q = value * (1.0 - f * saturation);
    let t = value * (1.0 - (1.0 - f) * saturation);
    let (r, g, b) = match (sector as i32).rem_euclid(6) {
        0 => (value, t, p),
        1 => (q, value, p),
        2 => (p, value, t),
        3 => (p, q, value),
        4 => (t, p, value),
        _ => (value, p, q),
    };
    ((r * 255.0) as u8, (g * 255.0) as u8, (b * 255.0) as u8)
}

/// RGB hex digits to ASS's BGR channel order.
fn bgr(rgb: &str) -> String {
    match (rgb.get(0..2), rgb.get(2..4), rgb.get(4..6)) {
        (Some(r), Some(g), Some(b)) if rgb.len() == 6 => format!("{b}{g}{r}"),
        _ => rgb.to_owned(),
    }
}

fn write_header<W: Write>(out: &mut W, config: &EmitterConfig) -> Result<()> {
    // Fill pads each line with a background box; otherwise plain outline
    // and a soft shadow.
    let (outline_alpha, shadow_alpha, border_style) = if config.fill {
        ("80", "80", 4)
    } else {
        ("00", "80", 1)
    };
    let Screen { width, height } = config.screen;
    let aspect = width as f32 / height as f32;
    write!(
        out,
        "\
[Script Info]
Title: chatsubs
ScriptType: v4.00+
WrapStyle: 0
ScaledBorderAndShadow: yes
YCbCr Matrix: None
PlayResX: {width}
PlayResY: {height}

[Aegisub Project Garbage]
Last Style Storage: Default
Video File: ?dummy:30.000000:40000:{width}:{height}:47:163:254:
Video AR Value: {aspect:.6}
Video Zoom Percent: 1.000000

[V4+ Styles]
Format: Name, Fontname, Fontsize, PrimaryColour, SecondaryColour, OutlineColour, BackColour, Bold, Italic, Underline, StrikeOut, ScaleX, ScaleY, Spacing, Angle, BorderStyle, Outline, Shadow, Alignment, MarginL, MarginR, MarginV, Encoding
Style: a,{font},{size},&H00FFFFFF,&H000000FF,&H{outline_alpha}000000,&H{shadow_alpha}000000,0,0,0,0,100,100,0,0,{border_style},2,1,1,0,0,0,1

[Events]
Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text
",
        font = config.font_family,
        size = config.font_size,
    )?;
    Ok(())
}

/// Writes the complete script for a danmaku layout. Monetary events go
/// last so they layer above ordinary chat.
pub fn write_danmaku<W: Write>(
    out: &mut W,
    layout: &DanmakuLayout,
    config: &EmitterConfig,
) -> Result<()> {
    write_header(out, config)?;
    let mut colours = NameColours::for_danmaku();
    for event in &layout.events {
        write_danmaku_event(out, event, &mut colours, config)?;
    }
    for event in &layout.supers {
        write_danmaku_event(out, event, &mut colours, config)?;
    }
    Ok(())
}

fn write_danmaku_event<W: Write>(
    out: &mut W,
    event: &DanmakuEvent,
    colours: &mut NameColours,
    config: &EmitterConfig,
) -> Result<()> {
    let msg = &event.message;
    let moderator = msg.has_badge("moderator");

    let mut text = event
        .lines
        .iter()
        .map(|line| assan(line))
        .collect::<Vec<_>>()
        .join("\\N");
    if let Some(money) = &msg.money {
        let card = money.body_colour.as_deref().unwrap_or(DEFAULT_MONEY_RGB);
        text = format!(
            "{{\\bord4\\shad4\\3c&H{}&\\c&H000000&}}{} {}",
            bgr(card),
            assan(&money.text),
            text,
        );
    }
    if moderator {
        text = format!("{{\\bord24\\shad6}}*{{\\bord6}}{text}");
    }

    let baseline = (event.y + event.height).round() as i64;
    let exit_x = -(event.width.round() as i64);
    let colour = colours.colour(&msg.author_id, moderator);
    writeln!(
        out,
        "Dialogue: 0,{},{},a,,0,0,0,,{{\\move({},{},{},{})\\3c&H{}&}}{}{{\\fscx40\\fscy40\\bord1}}\\N{}",
        hms(event.entry_time),
        hms(event.exit_time),
        config.screen.width,
        baseline,
        exit_x,
        baseline,
        colour,
        text,
        assan(&msg.display_name),
    )?;
    Ok(())
}

/// Writes the complete script for a box layout: one Dialogue per stack
/// state, the whole stack re-rendered each time a message arrives.
pub fn write_box<W: Write>(
    out: &mut W,
    layout: &BoxLayout,
    area: BoxArea,
    config: &EmitterConfig,
) -> Result<()> {
    write_header(out, config)?;
    let mut colours = NameColours::for_box();

    // A member's rendered lines are identical in every stack state it
    // appears in.
    let mut rendered: Vec<Vec<String>> = Vec::with_capacity(layout.members.len());
    for member in &layout.members {
        let msg = &member.message;
        let moderator = msg.has_badge("moderator");
        let mut lines = Vec::with_capacity(member.lines.len() + 2);
        let mut nick = format!(
            "{{\\3c&H{}&}}{}",
            colours.colour(&msg.author_id, moderator),
            assan(&msg.display_name),
        );
        if moderator {
            nick.push_str(" {\\bord16\\shad6}*");
        }
        lines.push(nick);
        if let Some(money) = &msg.money {
            let card = money.body_colour.as_deref().unwrap_or(DEFAULT_MONEY_RGB);
            lines.push(format!(
                "{{\\bord4\\shad4\\3c&H{}&\\c&H000000&}}{}",
                bgr(card),
                assan(&money.text),
            ));
        }
        lines.extend(member.lines.iter().map(|line| assan(line)));
        rendered.push(lines);
    }

    let anchor_x = area.x;
    let anchor_y = area.y + area.height;
    for event in &layout.events {
        let mut text = format!("{{\\pos({anchor_x},{anchor_y})}}");
        for &member in &event.stack {
            let mut pad = "";
            for line in &rendered[member] {
                text.push_str(pad);
                text.push_str(line);
                text.push_str("\\N{\\r}");
                pad = "\\h\\h";
            }
        }
        writeln!(
            out,
            "Dialogue: 0,{},{},a,,0,0,0,,{}",
            hms(event.start),
            hms(event.end),
            text,
        )?;
    }
    Ok(())
}
