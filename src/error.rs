//! Typed errors for the model, audio engine and playback controller.
//!
//! Storage, scanning and CLI code report failures through `anyhow`; the types
//! here cover the cases callers are expected to match on.

use std::path::PathBuf;
use thiserror::Error;

use crate::model::{SPEED_MAX, SPEED_MIN};

/// A book, chapter or bookmark that breaks the model invariants.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    #[error("book `{0}` has no chapters")]
    NoChapters(String),

    #[error("chapter `{}` appears more than once", .0.display())]
    DuplicateChapter(PathBuf),

    #[error("`{}` is not a chapter of book `{book}`", .path.display())]
    UnknownChapter { book: String, path: PathBuf },

    #[error("book name must not be empty")]
    EmptyName,

    #[error("book root must not be empty")]
    EmptyRoot,

    #[error("speed {0} is outside [{}, {}]", SPEED_MIN, SPEED_MAX)]
    SpeedOutOfRange(f32),

    #[error("position {time}ms is outside chapter `{}` ({duration}ms)", .path.display())]
    PositionOutOfRange {
        path: PathBuf,
        time: i64,
        duration: i64,
    },
}

/// Failures reported by an [`AudioEngine`](crate::engine::AudioEngine).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no media is prepared")]
    NotPrepared,

    #[error("failed to prepare `{}`: {reason}", .path.display())]
    Prepare { path: PathBuf, reason: String },
}

/// Errors returned by [`PlayerController`](crate::playback::PlayerController) operations.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("no book is bound to the player")]
    NoBook,

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}
