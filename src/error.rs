//! Error types shared by every curation stage

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Curation error types
#[derive(Debug, Error)]
pub enum CurationError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to decode image {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Failed to encode image {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Could not open video {path}: {reason}")]
    VideoOpen { path: PathBuf, reason: String },

    #[error("Failed to decode video {path}: {reason}")]
    VideoDecode { path: PathBuf, reason: String },

    #[error("Could not read a frame from video {0}")]
    NoFrames(PathBuf),

    #[error("Invalid frame rate for video {0}")]
    InvalidFrameRate(PathBuf),

    #[error("Person detector unavailable: {0}")]
    DetectorUnavailable(String),

    #[error("Detection failed for {path}: {reason}")]
    Detection { path: PathBuf, reason: String },

    #[error("Enhancer unavailable: {0}")]
    EnhancerUnavailable(String),

    #[error("`{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("`{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl CurationError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Per-asset failures that are logged and counted but never abort a stage.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Decode { .. }
                | Self::Encode { .. }
                | Self::VideoOpen { .. }
                | Self::VideoDecode { .. }
                | Self::NoFrames(_)
                | Self::InvalidFrameRate(_)
                | Self::Detection { .. }
                | Self::Timeout { .. }
                | Self::CommandFailed { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, CurationError>;
