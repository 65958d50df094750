//! Error types shared by the pipeline.
//!
//! `CatalogError` is what the catalog client reports. `DownloadError` is the
//! per-track failure taxonomy; its `Display` strings end up verbatim in
//! `errors.txt`, so keep them user-facing.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Failure reported by a [`crate::catalog::CatalogClient`].
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The catalog answered, but with an API-level error (unpublished album,
    /// region block, unknown id, ...).
    #[error("catalog API error: {message}")]
    Api { message: String },

    #[error("catalog returned status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("catalog request failed: {0}")]
    Transport(String),

    #[error("failed to decode catalog response: {0}")]
    Decode(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CatalogError {
    pub fn api(message: impl Into<String>) -> Self {
        CatalogError::Api {
            message: message.into(),
        }
    }

    /// True for not-found/forbidden answers, the ones that mean "this stream
    /// is not obtainable" rather than "the network hiccuped".
    pub fn is_unavailable(&self) -> bool {
        matches!(self, CatalogError::Status { status: 403 | 404, .. })
    }

    pub fn is_api(&self) -> bool {
        matches!(self, CatalogError::Api { .. })
    }
}

/// What sent a track into the fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryTrigger {
    /// The record has no content hash yet.
    NotEncoded,
    /// The stream transfer was refused (403/404).
    StreamUnavailable,
}

impl fmt::Display for RetryTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryTrigger::NotEncoded => write!(f, "Track not yet encoded"),
            RetryTrigger::StreamUnavailable => {
                write!(f, "Track not available on the catalog's servers")
            }
        }
    }
}

/// Terminal per-track failure.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Track not yet encoded!")]
    TrackNotEncoded,

    #[error("Track not available on the catalog's servers!")]
    StreamUnavailable,

    #[error("Track not found at desired bitrate.")]
    BitrateUnavailable,

    #[error("Track is not available in Reality Audio 360.")]
    FormatUnsupported,

    #[error("{trigger} and no alternative found!")]
    SearchExhausted { trigger: RetryTrigger },

    #[error("Catalog request failed: {0}")]
    CatalogApi(#[from] CatalogError),

    #[error("Local uploads can't be downloaded from the catalog.")]
    LocalTrack,

    #[error("Failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DownloadError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DownloadError::Io {
            path: path.into(),
            source,
        }
    }

    /// The terminal error for an exhausted chain, matching its trigger.
    pub fn exhausted(trigger: RetryTrigger) -> Self {
        match trigger {
            RetryTrigger::NotEncoded => DownloadError::TrackNotEncoded,
            RetryTrigger::StreamUnavailable => DownloadError::StreamUnavailable,
        }
    }
}

/// A quality tier outside every known family.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown quality tier '{0}' (expected flac, mp3_320, mp3_128, 360_hq, 360_mq or 360_lq)")]
pub struct InvalidTier(pub String);
