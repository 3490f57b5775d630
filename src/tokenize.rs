//! Morphological tokenizer collaborator.
//!
//! Wraps a persistent `mecab` child process, one line in, one line out.
//! `-Owakati` yields space-separated word boundaries for the wrap fallback,
//! `-Oyomi` yields katakana readings for `--kana`. Workers each spawn their
//! own child; the processes are tiny and stdin/stdout framing is not
//! shareable.

use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use crate::error::{ChatError, Result};

/// Word-boundary segmentation, space-separated. The wrapper only needs this
/// one operation, so tests can fake it.
pub trait Segmenter {
    fn segment(&mut self, text: &str) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MecabMode {
    /// Space-separated surface forms.
    Wakati,
    /// Katakana reading of the whole line.
    Yomi,
}

impl MecabMode {
    fn flag(self) -> &'static str {
        match self {
            MecabMode::Wakati => "-Owakati",
            MecabMode::Yomi => "-Oyomi",
        }
    }
}

pub struct MecabProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl MecabProcess {
    pub fn spawn(mode: MecabMode) -> Result<Self> {
        let mut child = Command::new("mecab")
            .arg(mode.flag())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|error| {
                if error.kind() == ErrorKind::NotFound {
                    ChatError::TokenizerUnavailable(
                        "mecab was not found on PATH. Install mecab and a dictionary and verify \
                         `mecab --version` works."
                            .to_owned(),
                    )
                } else {
                    ChatError::TokenizerUnavailable(format!("failed to spawn mecab: {error}"))
                }
            })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            ChatError::TokenizerUnavailable("failed to capture mecab stdin".to_owned())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            ChatError::TokenizerUnavailable("failed to capture mecab stdout".to_owned())
        })?;

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    /// Sends one line and reads the analysis for it. Embedded newlines are
    /// flattened first; mecab's framing is strictly line-per-line.
    pub fn analyze(&mut self, text: &str) -> Result<String> {
        let flat = text.replace('\n', " ");
        self.stdin.write_all(flat.as_bytes())?;
        self.stdin.write_all(b"\n")?;
        self.stdin.flush()?;

        let mut line = String::new();
        let read = self.stdout.read_line(&mut line)?;
        if read == 0 {
            return Err(ChatError::TokenizerUnavailable(
                "mecab closed its output mid-run".to_owned(),
            ));
        }
        Ok(line.trim_end().to_owned())
    }

    pub fn finish(mut self) -> Result<()> {
        drop(self.stdin);
        let status = self.child.wait()?;
        if !status.success() {
            return Err(ChatError::TokenizerUnavailable(format!(
                "mecab exited with status {status}"
            )));
        }
        Ok(())
    }
}

impl Segmenter for MecabProcess {
    fn segment(&mut self, text: &str) -> Result<String> {
        self.analyze(text)
    }
}

pub fn mecab_available() -> bool {
    Command::new("mecab")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Shifts katakana codepoints down to their hiragana counterparts; anything
/// else passes through.
pub fn katakana_to_hiragana(text: &str) -> String {
    text.chars()
        .map(|ch| {
            if ('\u{30A1}'..='\u{30F6}').contains(&ch) {
                let code = ch as u32 - (0x30A1 - 0x3041);
                char::from_u32(code).unwrap_or(ch)
            } else {
                ch
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn katakana_shifts_to_hiragana() {
        assert_eq!(katakana_to_hiragana("コンニチハ"), "こんにちは");
        assert_eq!(katakana_to_hiragana("mixed カナ text"), "mixed かな text");
    }

    #[test]
    fn long_vowel_mark_passes_through() {
        assert_eq!(katakana_to_hiragana("ラーメン"), "らーめん");
    }

    #[test]
    fn wakati_round_trip_if_mecab_installed() {
        if !mecab_available() {
            eprintln!("skipping: mecab not on PATH");
            return;
        }
        let mut mecab = MecabProcess::spawn(MecabMode::Wakati).expect("spawn mecab");
        let segmented = mecab.analyze("吾輩は猫である").expect("analyze");
        assert!(segmented.contains(' '));
        mecab.finish().expect("finish");
    }
}
