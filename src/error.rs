//! Error taxonomy for the ingestion and classification pipeline.
//!
//! Plumbing (database worker, startup, configuration) uses `anyhow`; the
//! enums below are the failures callers are expected to match on.

use std::time::Duration;

use crate::db::models::EventState;

/// Failure to obtain one still frame from the camera stream. Recovered by
/// the scheduler; never stored on an event.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("camera stream returned HTTP {0}")]
    Status(reqwest::StatusCode),

    #[error("camera request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("capture timed out after {0:?}")]
    Timeout(Duration),

    #[error("frame exceeded {limit} bytes without an end marker")]
    FrameTooLarge { limit: usize },

    #[error("frame of {size} bytes is below the {min} byte minimum")]
    FrameTooSmall { size: usize, min: usize },

    #[error("stream ended before a complete frame was read")]
    Incomplete,

    #[error("failed to store captured frame: {0}")]
    Io(#[from] std::io::Error),
}

/// Invalid input at the ingestion boundary. Reported to the caller; no event
/// is created.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid metadata format: {0}")]
    Metadata(String),

    #[error("Invalid sensor data: {0}")]
    SensorData(String),

    #[error("Invalid image format: {0}")]
    ImageContentType(String),

    #[error("Invalid date/time: {0}")]
    Time(String),
}

/// One failed inference attempt. Every variant is retryable.
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("inference request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("inference service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("inference response had no text content")]
    EmptyResponse,

    #[error("inference response is not a valid classification: {0}")]
    Malformed(String),
}

/// Rejected state-machine mutation.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("event {0} not found")]
    NotFound(i64),

    #[error("event {id} cannot move from {from} to {to}")]
    Illegal {
        id: i64,
        from: EventState,
        to: EventState,
    },
}
