//! Error taxonomy for the survey core.
//!
//! Every variant is a local, recoverable condition. Callers decide the
//! fallback (skip a slot, skip a file, substitute an empty address); nothing
//! here is meant to end the process.

use std::path::PathBuf;

use thiserror::Error;

use crate::models::PhotoSlot;

// ---

#[derive(Debug, Error)]
pub enum SurveyError {
    // ---
    /// Required operator input is missing or out of range.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The sampling window ended without a single fix.
    #[error("no location fix received during the sampling window")]
    NoFix,

    /// The location source could not be subscribed at all.
    #[error("location provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("address resolution failed: {0}")]
    AddressResolution(String),

    #[error("{slot} photo is {size} bytes, limit is {limit} bytes")]
    OversizeAttachment {
        slot: PhotoSlot,
        size: usize,
        limit: usize,
    },

    #[error("{slot} photo could not be processed: {source}")]
    Image {
        slot: PhotoSlot,
        #[source]
        source: image::ImageError,
    },

    /// A batch input file (or one feature inside it) is not a valid record.
    #[error("{file}: {reason}")]
    Format { file: String, reason: String },

    /// The user dismissed the share handoff for this artifact.
    #[error("saving {filename} was cancelled by the user")]
    PersistenceCancelled { filename: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SurveyError {
    // ---
    /// Whether the condition was caused by an explicit user decision rather
    /// than a fault. Such outcomes are logged at `info`, not `warn`.
    pub fn is_user_decision(&self) -> bool {
        matches!(self, SurveyError::PersistenceCancelled { .. })
    }
}

pub type SurveyResult<T> = Result<T, SurveyError>;
