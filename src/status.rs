//! Read-side queries over completed events.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::Serialize;

use crate::classifier::{ClassificationClient, ModelInfo};
use crate::db::models::StateCounts;
use crate::db::{Database, ObservationEvent};
use crate::error::ValidationError;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub category: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub illuminance: Option<f64>,
    pub event_id: Option<i64>,
    pub note: Option<String>,
}

impl StatusReport {
    fn from_event(event: ObservationEvent) -> Self {
        Self {
            category: event.category.map(|c| c.as_str().to_string()),
            timestamp: event.created_at,
            temperature: event.reading.temperature,
            humidity: event.reading.humidity,
            illuminance: event.reading.illuminance,
            event_id: Some(event.id),
            note: None,
        }
    }

    fn no_data(timestamp: DateTime<Utc>, note: &str) -> Self {
        Self {
            category: None,
            timestamp,
            temperature: None,
            humidity: None,
            illuminance: None,
            event_id: None,
            note: Some(note.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub model: ModelInfo,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub pending_events: u64,
    pub latest_event_time: Option<DateTime<Utc>>,
    pub latest_category: Option<String>,
    pub counts: StateCounts,
    pub timestamp: DateTime<Utc>,
}

/// Validates a calendar minute and reads it as UTC.
pub fn resolve_time(
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
) -> Result<DateTime<Utc>, ValidationError> {
    let naive = NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_opt(hour, minute, 0))
        .ok_or_else(|| {
            ValidationError::Time(format!(
                "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}"
            ))
        })?;
    Ok(Utc.from_utc_datetime(&naive))
}

#[derive(Clone)]
pub struct StatusService {
    db: Database,
    classifier: Arc<ClassificationClient>,
}

impl StatusService {
    pub fn new(db: Database, classifier: Arc<ClassificationClient>) -> Self {
        Self { db, classifier }
    }

    pub async fn current(&self) -> Result<StatusReport> {
        Ok(match self.db.latest_completed().await? {
            Some(event) => StatusReport::from_event(event),
            None => StatusReport::no_data(Utc::now(), "No data available"),
        })
    }

    /// Completed event nearest to the given UTC minute.
    pub async fn at(
        &self,
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        minute: u32,
    ) -> Result<StatusReport> {
        let target = resolve_time(year, month, day, hour, minute)?;
        Ok(match self.db.nearest_to(target).await? {
            Some(event) => StatusReport::from_event(event),
            None => StatusReport::no_data(target, "No data available for the specified time"),
        })
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            status: "healthy",
            timestamp: Utc::now(),
            model: self.classifier.info(),
        }
    }

    pub async fn statistics(&self) -> Result<Statistics> {
        let counts = self.db.count_by_state().await?;
        let latest = self.db.latest_completed().await?;
        Ok(Statistics {
            pending_events: counts.pending,
            latest_event_time: latest.as_ref().map(|event| event.created_at),
            latest_category: latest
                .and_then(|event| event.category)
                .map(|category| category.as_str().to_string()),
            counts,
            timestamp: Utc::now(),
        })
    }
}
