//! Error taxonomy (spec §7, §12).
//!
//! Request-validation and admission errors are surfaced to the HTTP caller;
//! everything from [`SessionError`] onward is swallowed into the log by the
//! worker thread that owns the failing session (spec §7 propagation
//! policy).

use derive_more::{Display, Error, From};
use std::path::PathBuf;

/// Top-level error type returned by fallible library entry points.
#[derive(Debug, Display, Error, From)]
pub enum Error {
    #[display(fmt = "configuration error: {}", _0)]
    Config(ConfigError),

    #[display(fmt = "invalid request: {}", _0)]
    #[from(ignore)]
    Validation(#[error(not(source))] String),

    #[display(fmt = "duplicate task for key {:?}", _0)]
    #[from(ignore)]
    AlreadyRunning(#[error(not(source))] String),

    #[display(fmt = "task queue is full")]
    QueueFull,

    #[display(fmt = "no matching task")]
    NotFound,

    #[display(fmt = "session error: {}", _0)]
    Session(SessionError),
}

/// Configuration load/validation failures (spec §11).
#[derive(Debug, Display, Error)]
pub enum ConfigError {
    #[display(fmt = "failed to read configuration: {}", _0)]
    Load(config::ConfigError),

    #[display(fmt = "invalid configuration: {}", _0)]
    Invalid(#[error(not(source))] String),
}

/// Failures arising inside a single [`crate::session::MediaSession`] (spec
/// §7 items 3-5). These never reach the HTTP caller; the worker logs them
/// and tears the session down.
#[derive(Debug, Display, Error)]
pub enum SessionError {
    #[display(fmt = "failed to create output directory {}: {}", "dir.display()", source)]
    CreateDir {
        dir: PathBuf,
        source: std::io::Error,
    },

    #[display(fmt = "failed to open input {}: {}", url, source)]
    OpenInput {
        url: String,
        source: ffmpeg_next::Error,
    },

    #[display(fmt = "no video stream found in {}", url)]
    NoVideoStream { url: String },

    #[display(fmt = "codec error: {}", _0)]
    Codec(ffmpeg_next::Error),

    #[display(fmt = "failed to open output {}: {}", url, source)]
    OpenOutput {
        url: String,
        source: ffmpeg_next::Error,
    },

    #[display(fmt = "write failed: {}", _0)]
    Write(ffmpeg_next::Error),

    #[display(fmt = "input stalled for more than the configured timeout")]
    Timeout,
}

impl From<ffmpeg_next::Error> for SessionError {
    fn from(e: ffmpeg_next::Error) -> Self {
        SessionError::Codec(e)
    }
}

/// Convenience alias for fallible session-internal operations.
pub type SessionResult<T> = Result<T, SessionError>;
