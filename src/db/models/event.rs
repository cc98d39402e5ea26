//! Observation event data models.
//!
//! An `ObservationEvent` is the record of one capture-and-classify cycle. It is
//! created `Pending`, moved to `Processing` by the classification task, and
//! ends in exactly one terminal state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Category;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EventState {
    Pending,
    Processing,
    Completed,
    Error,
}

impl EventState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventState::Pending => "pending",
            EventState::Processing => "processing",
            EventState::Completed => "completed",
            EventState::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EventState::Completed | EventState::Error)
    }

    /// States from which a move to `next` is legal.
    pub fn allowed_sources(next: EventState) -> &'static [EventState] {
        match next {
            EventState::Pending => &[],
            EventState::Processing => &[EventState::Pending],
            EventState::Completed => &[EventState::Processing],
            EventState::Error => &[EventState::Pending, EventState::Processing],
        }
    }

    pub fn can_transition_to(&self, next: EventState) -> bool {
        EventState::allowed_sources(next).contains(self)
    }
}

impl std::fmt::Display for EventState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Environmental readings captured alongside an image. Any value may be
/// missing when that sensor failed during capture.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SensorReading {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub illuminance: Option<f64>,
}

impl SensorReading {
    pub fn new(temperature: f64, humidity: f64, illuminance: f64) -> Self {
        Self {
            temperature: Some(temperature),
            humidity: Some(humidity),
            illuminance: Some(illuminance),
        }
    }
}

/// Opaque handle to stored image bytes. Today this is a filesystem path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct ImageRef(String);

impl ImageRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<std::path::PathBuf> for ImageRef {
    fn from(path: std::path::PathBuf) -> Self {
        Self(path.to_string_lossy().into_owned())
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationEvent {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub image_ref: ImageRef,
    pub reading: SensorReading,
    /// Set if and only if `state == Completed`.
    pub category: Option<Category>,
    pub state: EventState,
    /// Diagnostic only; present when `state == Error`.
    pub error_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Number of events per processing state.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StateCounts {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub error: u64,
}
