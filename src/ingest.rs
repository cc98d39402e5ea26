use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{error, info};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classifier::ClassificationClient;
use crate::db::{Database, ImageRef, SensorReading};
use crate::error::ValidationError;
use crate::pipeline;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("failed to store observation: {0:#}")]
    Storage(anyhow::Error),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReceipt {
    pub event_id: i64,
    pub created_at: DateTime<Utc>,
    pub message: String,
}

#[derive(Deserialize)]
struct SensorPayload {
    temperature: f64,
    humidity: f64,
    illuminance: f64,
}

/// Parses the metadata part of an upload. All three readings are required
/// and must be numbers.
pub fn parse_sensor_metadata(metadata: &str) -> Result<SensorReading, ValidationError> {
    let value: serde_json::Value = serde_json::from_str(metadata)
        .map_err(|err| ValidationError::Metadata(err.to_string()))?;
    let payload: SensorPayload = serde_json::from_value(value)
        .map_err(|err| ValidationError::SensorData(err.to_string()))?;
    Ok(SensorReading::new(
        payload.temperature,
        payload.humidity,
        payload.illuminance,
    ))
}

fn check_content_type(content_type: Option<&str>) -> Result<(), ValidationError> {
    match content_type {
        Some(value) if value.trim().to_ascii_lowercase().starts_with("image/") => Ok(()),
        other => Err(ValidationError::ImageContentType(
            other.unwrap_or("missing").to_string(),
        )),
    }
}

/// `<YYYYmmddHHMMSS>_<8 hex chars>.jpg`
fn image_file_name(now: DateTime<Utc>) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{}_{}.jpg", now.format("%Y%m%d%H%M%S"), &id[..8])
}

/// Entry point for device uploads: validates, stores the image, records a
/// pending event and hands it to a classification task.
#[derive(Clone)]
pub struct Ingestor {
    db: Database,
    classifier: Arc<ClassificationClient>,
    images_dir: PathBuf,
}

impl Ingestor {
    pub fn new(db: Database, classifier: Arc<ClassificationClient>, images_dir: PathBuf) -> Self {
        Self {
            db,
            classifier,
            images_dir,
        }
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    pub async fn ingest(
        &self,
        metadata: &str,
        content_type: Option<&str>,
        image: Vec<u8>,
    ) -> Result<IngestReceipt, IngestError> {
        let reading = parse_sensor_metadata(metadata)?;
        check_content_type(content_type)?;

        let path = self.images_dir.join(image_file_name(Utc::now()));
        tokio::fs::create_dir_all(&self.images_dir)
            .await
            .map_err(|err| IngestError::Storage(err.into()))?;
        tokio::fs::write(&path, &image)
            .await
            .map_err(|err| IngestError::Storage(err.into()))?;
        info!("Image saved: {}", path.display());

        let event = match self.db.create_event(ImageRef::from(path.clone()), reading).await {
            Ok(event) => event,
            Err(err) => {
                error!("Failed to create event: {err:#}");
                if let Err(remove_err) = tokio::fs::remove_file(&path).await {
                    error!("Failed to remove orphaned image {}: {remove_err}", path.display());
                }
                return Err(IngestError::Storage(err));
            }
        };

        let receipt = IngestReceipt {
            event_id: event.id,
            created_at: event.created_at,
            message: "Data received and processing started".into(),
        };
        pipeline::dispatch(&self.db, &self.classifier, event);
        Ok(receipt)
    }
}
