//! Batch converter turning recorded live-chat dumps into timed, positioned
//! ASS subtitle overlays: scrolling danmaku or a bottom-anchored box stack.

pub mod ass;
pub mod error;
pub mod layout;
pub mod metrics;
pub mod pipeline;
pub mod probe;
pub mod schema;
pub mod style;
pub mod timeline;
pub mod tokenize;
pub mod wrap;
