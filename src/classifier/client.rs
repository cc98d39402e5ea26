use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::{
    backend::InferenceBackend,
    image_prep::{prepare_image, JPEG_MIME},
    prompt::build_prompt,
    retry::RetryPolicy,
};
use crate::db::models::{Category, CategorySet, Coerced, ImageRef, SensorReading};
use crate::error::InferenceError;

/// The only shape accepted from the model.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClassificationResponse {
    status: String,
}

fn parse_response(text: &str) -> Result<String, InferenceError> {
    serde_json::from_str::<ClassificationResponse>(text.trim())
        .map(|response| response.status)
        .map_err(|err| InferenceError::Malformed(format!("{err}: {}", text.trim())))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassificationOutcome {
    Completed { category: Category },
    Error { message: String },
}

impl ClassificationOutcome {
    fn error(message: impl Into<String>) -> Self {
        ClassificationOutcome::Error {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub model_name: String,
    pub api_key_configured: bool,
    pub supported_categories: Vec<String>,
}

/// Turns an (image, sensor reading) pair into a category.
///
/// `classify*` never fails: every problem ends up in
/// [`ClassificationOutcome::Error`]. The client keeps no state between calls
/// and writes nothing to the database.
pub struct ClassificationClient {
    backend: Arc<dyn InferenceBackend>,
    categories: CategorySet,
    retry: RetryPolicy,
}

impl ClassificationClient {
    pub fn new(backend: Arc<dyn InferenceBackend>, categories: CategorySet) -> Self {
        Self::with_retry(backend, categories, RetryPolicy::default())
    }

    pub fn with_retry(
        backend: Arc<dyn InferenceBackend>,
        categories: CategorySet,
        retry: RetryPolicy,
    ) -> Self {
        info!(
            "Classification client initialized with model: {}",
            backend.model_name()
        );
        Self {
            backend,
            categories,
            retry,
        }
    }

    pub fn categories(&self) -> &CategorySet {
        &self.categories
    }

    pub fn info(&self) -> ModelInfo {
        ModelInfo {
            model_name: self.backend.model_name().to_string(),
            api_key_configured: self.backend.is_configured(),
            supported_categories: self.categories.members().to_vec(),
        }
    }

    /// Reads the referenced image from disk and classifies it.
    pub async fn classify_stored(
        &self,
        image_ref: &ImageRef,
        reading: &SensorReading,
    ) -> ClassificationOutcome {
        match tokio::fs::read(image_ref.as_str()).await {
            Ok(bytes) => self.classify(bytes, reading).await,
            Err(err) => {
                warn!("Image file not readable: {image_ref}: {err}");
                ClassificationOutcome::error(format!("Failed to load image: {err}"))
            }
        }
    }

    pub async fn classify(&self, image: Vec<u8>, reading: &SensorReading) -> ClassificationOutcome {
        let prepared = match tokio::task::spawn_blocking(move || prepare_image(&image)).await {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(err)) => {
                warn!("Error loading image: {err:#}");
                return ClassificationOutcome::error(format!("Failed to load image: {err:#}"));
            }
            Err(join_err) => {
                return ClassificationOutcome::error(format!(
                    "image preparation worker failed: {join_err}"
                ));
            }
        };

        let prompt = build_prompt(&self.categories, reading);
        let answer = self
            .retry
            .retry(|_| async {
                self.backend
                    .generate(&prompt, &prepared, JPEG_MIME)
                    .await
                    .and_then(|text| parse_response(&text))
            })
            .await;

        let raw = match answer {
            Ok(raw) => raw,
            Err(err) => {
                return ClassificationOutcome::error(format!(
                    "classification failed after {} attempts: {err}",
                    self.retry.max_attempts.max(1)
                ));
            }
        };

        let category = match self.categories.coerce(&raw) {
            Coerced::Known(category) => category,
            Coerced::Fallback { raw, category } => {
                warn!("Unknown status category: {raw}, defaulting to {category}");
                category
            }
        };

        info!("Analysis completed: {category}");
        ClassificationOutcome::Completed { category }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{encoded_image, transient, ScriptedBackend};
    use image::ImageFormat;
    use std::time::Duration;

    fn client(backend: Arc<ScriptedBackend>) -> ClassificationClient {
        ClassificationClient::with_retry(
            backend,
            CategorySet::default(),
            RetryPolicy::new(3, Duration::from_millis(1), 2.0, Duration::from_millis(4)),
        )
    }

    fn jpeg() -> Vec<u8> {
        encoded_image(64, 48, ImageFormat::Jpeg)
    }

    fn reading() -> SensorReading {
        SensorReading::new(22.0, 50.0, 15.0)
    }

    fn completed(name: &str) -> ClassificationOutcome {
        ClassificationOutcome::Completed {
            category: CategorySet::default().coerce(name).into_category(),
        }
    }

    #[tokio::test]
    async fn recovers_after_two_transient_failures() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            transient(),
            transient(),
            Ok(r#"{"status": "PC_WORK"}"#.into()),
        ]));
        let outcome = client(backend.clone()).classify(jpeg(), &reading()).await;

        assert_eq!(outcome, completed("PC_WORK"));
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_three_failures() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            transient(),
            transient(),
            transient(),
            Ok(r#"{"status": "AWAY"}"#.into()),
        ]));
        let outcome = client(backend.clone()).classify(jpeg(), &reading()).await;

        match outcome {
            ClassificationOutcome::Error { message } => assert!(!message.is_empty()),
            other => panic!("expected error, got {other:?}"),
        }
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test]
    async fn unknown_category_is_coerced_not_failed() {
        let backend = Arc::new(ScriptedBackend::answering(r#"{"status": "DANCING"}"#));
        let outcome = client(backend.clone()).classify(jpeg(), &reading()).await;

        assert_eq!(outcome, completed("OTHER"));
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn malformed_answers_are_retried() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Ok("I think they are sleeping".into()),
            Ok(r#"{"status": "SLEEPING", "confidence": 0.9}"#.into()),
            Ok(r#"{"status": "SLEEPING"}"#.into()),
        ]));
        let outcome = client(backend.clone()).classify(jpeg(), &reading()).await;

        assert_eq!(outcome, completed("SLEEPING"));
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test]
    async fn wrong_field_type_fails_closed() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Ok(r#"{"status": 3}"#.into()),
            Ok(r#"{"category": "AWAY"}"#.into()),
            Ok("[]".into()),
        ]));
        let outcome = client(backend.clone()).classify(jpeg(), &reading()).await;

        assert!(matches!(outcome, ClassificationOutcome::Error { .. }));
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test]
    async fn unreadable_image_never_reaches_the_model() {
        let backend = Arc::new(ScriptedBackend::answering(r#"{"status": "AWAY"}"#));
        let outcome = client(backend.clone())
            .classify(b"garbage".to_vec(), &reading())
            .await;

        match outcome {
            ClassificationOutcome::Error { message } => {
                assert!(message.starts_with("Failed to load image"))
            }
            other => panic!("expected error, got {other:?}"),
        }
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn missing_file_is_an_error_outcome() {
        let backend = Arc::new(ScriptedBackend::answering(r#"{"status": "AWAY"}"#));
        let outcome = client(backend.clone())
            .classify_stored(&ImageRef::new("/nonexistent/frame.jpg"), &reading())
            .await;

        assert!(matches!(outcome, ClassificationOutcome::Error { .. }));
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn classifies_image_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.jpg");
        std::fs::write(&path, jpeg()).unwrap();

        let backend = Arc::new(ScriptedBackend::answering("  {\"status\": \"GAMING\"}\n"));
        let outcome = client(backend)
            .classify_stored(&ImageRef::from(path), &reading())
            .await;
        assert_eq!(outcome, completed("GAMING"));
    }

    #[test]
    fn reports_model_info() {
        let backend = Arc::new(ScriptedBackend::answering("{}"));
        let info = client(backend).info();
        assert_eq!(info.model_name, "scripted");
        assert!(info.api_key_configured);
        assert!(info.supported_categories.contains(&"OTHER".to_string()));
    }
}
