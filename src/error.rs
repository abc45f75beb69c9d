use std::path::PathBuf;

use crate::data::array::Coordinate;
use crate::data::model::Frame;

/// Errors raised while decoding `.sif` files or assembling spectra from them.
#[derive(Debug, thiserror::Error)]
pub enum SifError {
    /// The file could not be read from disk.
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Wrong magic marker or an unsupported format version. Never retried.
    #[error("malformed header: {reason}")]
    MalformedHeader { reason: String },

    /// A header record ended before all of its fields were read.
    #[error("truncated header: record '{record}' expected {expected} field(s), found {actual}")]
    TruncatedHeader {
        record: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A token that should be numeric could not be parsed.
    #[error("cannot parse field '{field}' from token {token:?}")]
    FieldParseError { field: &'static str, token: String },

    /// The payload holds fewer samples than the declared geometry needs.
    /// `partial` holds every frame decoded before the cut.
    #[error(
        "truncated payload: {expected_frames} frame(s) need {expected_bytes} bytes, found {available_bytes} ({} complete frame(s))",
        .partial.len()
    )]
    TruncatedPayload {
        expected_frames: usize,
        expected_bytes: usize,
        available_bytes: usize,
        partial: Vec<Frame>,
    },

    #[error("unknown noise window '{0}' (expected narrow, wide or pinched)")]
    UnknownWindow(String),

    #[error("coordinate {coordinate:?} is assigned more than once")]
    DuplicateCoordinate { coordinate: Coordinate },

    #[error("coordinate {coordinate:?} lies outside grid shape {shape:?}")]
    CoordinateOutOfBounds {
        coordinate: Coordinate,
        shape: Vec<usize>,
    },

    #[error("grid incomplete: {} of {expected} coordinate(s) never filled", .missing.len())]
    IncompleteGrid {
        expected: usize,
        missing: Vec<Coordinate>,
    },

    #[error("shape mismatch: expected {expected} samples, found {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    /// Both frame dimensions exceed one and no reduction axis was requested.
    #[error("frame is {width}x{height}; choose a reduction axis explicitly")]
    AmbiguousGeometry { width: usize, height: usize },

    #[error("frame {index} requested but the file holds {frames} frame(s)")]
    FrameOutOfRange { index: usize, frames: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("batch cancelled")]
    Cancelled,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
}

impl SifError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SifError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        SifError::MalformedHeader {
            reason: reason.into(),
        }
    }

    /// Frames recovered before a truncated payload, if that is what happened.
    pub fn partial_frames(&self) -> Option<&[Frame]> {
        match self {
            SifError::TruncatedPayload { partial, .. } => Some(partial),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SifError>;
