//! Error types for codec-verify operations.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::raster::RasterShape;

/// Result type alias for codec-verify operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while verifying a codec.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Source image could not be loaded or converted to a canonical raster.
    ///
    /// The batch runner always skips the file; this never aborts a run.
    #[error("Unsupported input: {path}: {reason}")]
    UnsupportedInput {
        /// Path to the source image.
        path: PathBuf,
        /// Reason for the failure.
        reason: String,
    },

    /// The codec failed while encoding.
    #[error("Encode failed (near={near}): {status}{}", stderr_suffix(.stderr))]
    EncodeFailed {
        /// Tolerance parameter passed to the encoder.
        near: u32,
        /// Exit status description.
        status: String,
        /// Captured diagnostic output.
        stderr: String,
    },

    /// The codec failed while decoding.
    #[error("Decode failed: {status}{}", stderr_suffix(.stderr))]
    DecodeFailed {
        /// Exit status description.
        status: String,
        /// Captured diagnostic output.
        stderr: String,
    },

    /// A raster written by the codec is unreadable or not 8-bit gray/RGB.
    #[error("Unreadable raster: {path}: {reason}")]
    InvalidRaster {
        /// Path to the decoder output.
        path: PathBuf,
        /// Reason for the failure.
        reason: String,
    },

    /// Reconstructed raster differs in dimensions or channel mode.
    #[error("Shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch {
        /// Shape of the reference raster.
        expected: RasterShape,
        /// Shape of the raster under test.
        actual: RasterShape,
    },

    /// Reconstruction error exceeds the allowed bound.
    #[error("Tolerance exceeded: max_abs_err={max_error}, allowed={allowed} (near={near})")]
    ToleranceExceeded {
        /// Largest absolute sample difference observed.
        max_error: u32,
        /// Bound the error was checked against.
        allowed: u32,
        /// Tolerance parameter of the trial.
        near: u32,
    },

    /// The codec executable could not be started.
    #[error("Failed to start {program}: {source}")]
    Spawn {
        /// Executable that was invoked.
        program: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The codec does not honor the configured invocation protocol.
    #[error("Protocol check failed: {0}")]
    Protocol(String),

    /// The input corpus could not be read.
    #[error("Corpus error: {0}")]
    Corpus(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A trial failed under the abort policy.
    #[error("Aborted on {file} (near={near}): {source}")]
    Aborted {
        /// File identifier of the failing trial.
        file: String,
        /// Tolerance parameter of the failing trial.
        near: u32,
        /// The trial failure.
        source: Box<Error>,
    },

    /// I/O error wrapper.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl Error {
    /// Classify a trial-level failure.
    ///
    /// Returns `None` for errors that are not attributable to a single trial.
    #[must_use]
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::EncodeFailed { .. } => Some(FailureKind::EncodeFailed),
            Self::DecodeFailed { .. } | Self::InvalidRaster { .. } => {
                Some(FailureKind::DecodeFailed)
            }
            Self::ShapeMismatch { .. } => Some(FailureKind::ShapeMismatch),
            Self::ToleranceExceeded { .. } => Some(FailureKind::ToleranceExceeded),
            Self::Aborted { source, .. } => source.failure_kind(),
            _ => None,
        }
    }
}

/// Serializable classification of a failed trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Nonzero exit (or missing output) while encoding.
    EncodeFailed,
    /// Nonzero exit (or unreadable output) while decoding.
    DecodeFailed,
    /// Dimensions or channel mode changed through the round trip.
    ShapeMismatch,
    /// Reconstruction error above the allowed bound.
    ToleranceExceeded,
}

impl FailureKind {
    /// Short code used in CSV output and logs.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::EncodeFailed => "encode_failed",
            Self::DecodeFailed => "decode_failed",
            Self::ShapeMismatch => "shape_mismatch",
            Self::ToleranceExceeded => "tolerance_exceeded",
        }
    }
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}
