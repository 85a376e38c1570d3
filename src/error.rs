//! Typed errors for the codec, endpoints, and pipelines.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Codec-level failures. Always fatal to the current connection, never to
/// the endpoint manager that owns it.
#[derive(Debug, Error)]
pub enum FramingError {
    #[error("stream ended before the 4-byte length header")]
    TruncatedHeader,

    #[error("frame length {length} out of range")]
    LengthOutOfRange { length: u64 },

    #[error("stream ended before {expected} body bytes arrived")]
    TruncatedBody { expected: usize },

    #[error("malformed message body: {0}")]
    MalformedPayload(String),

    #[error("i/o error during framing: {0}")]
    Io(io::Error),
}

/// Caller-visible endpoint failures. Recoverable by retrying `send` after
/// connectivity returns.
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("no connected peer")]
    NotConnected,

    #[error("send failed: {0}")]
    SendFailed(io::Error),

    #[error(transparent)]
    Framing(#[from] FramingError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Batch-level ingestion failures. Reported to the peer as a
/// `DownloadFailed` device event; the pipeline stays armed.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("device subpath missing: {0}")]
    SourceMissing(PathBuf),

    #[error("failed to enumerate {path}: {source}")]
    Enumerate {
        path: PathBuf,
        source: walkdir::Error,
    },

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("enumeration task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Cycle-level retention failures. Per-file copy and delete problems are
/// logged and skipped; only enumeration, snapshot creation, and
/// verification can fail a cycle.
#[derive(Debug, Error)]
pub enum RetentionError {
    #[error("failed to enumerate holding directory {path}: {source}")]
    Enumerate { path: PathBuf, source: io::Error },

    #[error("failed to create snapshot directory {path}: {source}")]
    CreateSnapshot { path: PathBuf, source: io::Error },

    #[error("backup verification failed for {} file(s)", failures.len())]
    VerificationFailed {
        snapshot: PathBuf,
        failures: Vec<String>,
    },
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to watch {path}: {source}")]
    Watcher {
        path: PathBuf,
        source: notify::Error,
    },
}
