//! Error taxonomy for the conversion pipeline.
//!
//! Input-integrity and resource-unavailable conditions abort the whole run;
//! everything recoverable (malformed records, saturated lanes) is handled at
//! the call site and never surfaces here.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChatError>;

#[derive(Debug, Error)]
pub enum ChatError {
    /// A record's textual clock ("HH:MM:SS") disagrees with its numeric
    /// offset. The dump is malformed or hand-edited; refuse to guess.
    #[error("time integrity check failed for {record}: text says {text_seconds}s, offset says {offset_seconds}s")]
    TimeIntegrity {
        record: String,
        text_seconds: f64,
        offset_seconds: f64,
    },

    /// No message in any dump carried a trustworthy video offset and the
    /// caller supplied neither --start-time nor --offset.
    #[error("no usable time anchor in any dump; pass --start-time or --offset")]
    MissingAnchor,

    #[error("font unavailable: {0}")]
    FontUnavailable(String),

    #[error("tokenizer unavailable: {0}")]
    TokenizerUnavailable(String),

    #[error("failed to read dump {path}")]
    DumpRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file as a whole is not parseable as a chat dump (individual bad
    /// records inside an otherwise valid dump are skipped, not fatal).
    #[error("dump {path} is not a JSON array or JSON-lines chat dump")]
    DumpFormat { path: PathBuf },

    #[error("bad geometry {input:?}: {reason}")]
    Geometry { input: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
