use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::classifier::ClassificationClient;
use crate::db::Database;
use crate::settings::Settings;

use super::capture::{CaptureSource, MjpegCapture};
use super::loop_worker::{collection_loop, CollectorContext, SchedulerTiming};
use super::mock_sensor::MockSensorGenerator;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub running: bool,
    pub camera_url: String,
    pub capture_interval_secs: u64,
}

/// Owns the periodic collection loop. At most one loop runs per scheduler.
pub struct CollectionScheduler {
    db: Database,
    classifier: Arc<ClassificationClient>,
    camera_url: String,
    capture_dir: PathBuf,
    timing: SchedulerTiming,
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl CollectionScheduler {
    pub fn new(db: Database, classifier: Arc<ClassificationClient>, settings: &Settings) -> Self {
        Self {
            db,
            classifier,
            camera_url: settings.demo.camera_url.clone(),
            capture_dir: settings.capture_dir.clone(),
            timing: SchedulerTiming::with_interval(settings.capture_interval()),
            handle: None,
            cancel_token: None,
        }
    }

    pub fn with_timing(mut self, timing: SchedulerTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            running: self.is_running(),
            camera_url: self.camera_url.clone(),
            capture_interval_secs: self.timing.interval.as_secs(),
        }
    }

    /// Starts collecting from the configured MJPEG camera.
    pub fn start(&mut self) -> Result<bool> {
        if self.is_running() {
            warn!("Collection already running");
            return Ok(false);
        }
        let capture = MjpegCapture::new(self.camera_url.clone(), self.capture_dir.clone())
            .context("failed to set up camera capture")?;
        Ok(self.start_with(Arc::new(capture)))
    }

    /// Starts the loop over `capture`. Returns `false`, and changes nothing,
    /// if a loop is already running.
    pub fn start_with(&mut self, capture: Arc<dyn CaptureSource>) -> bool {
        if self.is_running() {
            warn!("Collection already running");
            return false;
        }

        let cancel_token = CancellationToken::new();
        let ctx = CollectorContext {
            db: self.db.clone(),
            classifier: Arc::clone(&self.classifier),
            capture,
            sensors: MockSensorGenerator,
            timing: self.timing,
        };
        let handle = tokio::spawn(collection_loop(ctx, cancel_token.clone()));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        info!("Collection started ({})", self.camera_url);
        true
    }

    /// Stops scheduling new ticks and waits for the loop to exit. The loop
    /// owns the capture source, so its connections are released here.
    /// Classification tasks already dispatched keep running.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("collection loop task failed to join")?;
            info!("Collection stopped");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{InferenceBackend, RetryPolicy};
    use crate::db::{CategorySet, EventState, ImageRef};
    use crate::error::{CaptureError, InferenceError};
    use crate::test_support::{encoded_image, ScriptedBackend};
    use async_trait::async_trait;
    use image::ImageFormat;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use tokio::time::Duration;

    /// Writes a fresh JPEG per call, or fails every call.
    struct StubCapture {
        dir: PathBuf,
        fail: bool,
        calls: AtomicUsize,
    }

    impl StubCapture {
        fn new(dir: &TempDir, fail: bool) -> Arc<Self> {
            let frames = dir.path().join("frames");
            std::fs::create_dir_all(&frames).unwrap();
            Arc::new(Self {
                dir: frames,
                fail,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CaptureSource for StubCapture {
        async fn capture(&self) -> Result<ImageRef, CaptureError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(CaptureError::Incomplete);
            }
            let path = self.dir.join(format!("frame_{n}.jpg"));
            tokio::fs::write(&path, encoded_image(16, 16, ImageFormat::Jpeg)).await?;
            Ok(ImageRef::from(path))
        }
    }

    /// Answers after a pause, so a stop can land while a task is in flight.
    struct SlowBackend;

    #[async_trait]
    impl InferenceBackend for SlowBackend {
        fn model_name(&self) -> &str {
            "slow"
        }

        async fn generate(&self, _: &str, _: &[u8], _: &str) -> Result<String, InferenceError> {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok(r#"{"status": "SLEEPING"}"#.into())
        }
    }

    fn timing() -> SchedulerTiming {
        SchedulerTiming {
            interval: Duration::from_millis(20),
            capture_retry_delay: Duration::from_millis(10),
            error_delay: Duration::from_millis(10),
        }
    }

    fn scheduler(
        dir: &TempDir,
        backend: Arc<dyn InferenceBackend>,
        timing: SchedulerTiming,
    ) -> (CollectionScheduler, Database) {
        let db = Database::new(dir.path().join("events.sqlite3")).unwrap();
        let classifier = Arc::new(ClassificationClient::with_retry(
            backend,
            CategorySet::default(),
            RetryPolicy::new(1, Duration::from_millis(1), 2.0, Duration::from_millis(1)),
        ));
        let settings = Settings::default();
        let scheduler =
            CollectionScheduler::new(db.clone(), classifier, &settings).with_timing(timing);
        (scheduler, db)
    }

    async fn wait_for<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !check().await {
            assert!(tokio::time::Instant::now() < deadline, "condition never held");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn captured_frames_become_classified_events() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend::new(
            (0..50).map(|_| Ok(r#"{"status": "PC_WORK"}"#.to_string())).collect(),
        ));
        let (mut scheduler, db) = scheduler(&dir, backend, timing());

        assert!(scheduler.start_with(StubCapture::new(&dir, false)));
        wait_for(|| {
            let db = db.clone();
            async move { db.count_by_state().await.unwrap().completed >= 2 }
        })
        .await;
        scheduler.stop().await.unwrap();
        assert!(!scheduler.is_running());

        let latest = db.latest_completed().await.unwrap().unwrap();
        assert_eq!(latest.category.unwrap().as_str(), "PC_WORK");
        assert!(latest.reading.temperature.is_some());
    }

    #[tokio::test]
    async fn second_start_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let (mut scheduler, _db) =
            scheduler(&dir, Arc::new(ScriptedBackend::new(vec![])), timing());

        let first = StubCapture::new(&dir, true);
        let second = StubCapture::new(&dir, true);
        assert!(scheduler.start_with(first.clone()));
        assert!(!scheduler.start_with(second.clone()));
        assert!(scheduler.is_running());

        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.stop().await.unwrap();
        assert!(first.calls() > 0);
        assert_eq!(second.calls(), 0);
    }

    #[tokio::test]
    async fn capture_failures_create_no_events_and_keep_retrying() {
        let dir = tempfile::tempdir().unwrap();
        let (mut scheduler, db) =
            scheduler(&dir, Arc::new(ScriptedBackend::new(vec![])), timing());

        let capture = StubCapture::new(&dir, true);
        scheduler.start_with(capture.clone());
        wait_for(|| {
            let capture = capture.clone();
            async move { capture.calls() >= 3 }
        })
        .await;
        scheduler.stop().await.unwrap();

        let counts = db.count_by_state().await.unwrap();
        assert_eq!(counts.pending + counts.processing + counts.completed + counts.error, 0);
    }

    #[tokio::test]
    async fn tick_errors_back_off_and_leave_no_frames_behind() {
        let dir = tempfile::tempdir().unwrap();
        let (mut scheduler, db) =
            scheduler(&dir, Arc::new(ScriptedBackend::new(vec![])), timing());
        db.execute(|conn| {
            conn.execute_batch("DROP TABLE events")?;
            Ok(())
        })
        .await
        .unwrap();

        let capture = StubCapture::new(&dir, false);
        scheduler.start_with(capture.clone());
        wait_for(|| {
            let capture = capture.clone();
            async move { capture.calls() >= 3 }
        })
        .await;
        assert!(scheduler.is_running());
        scheduler.stop().await.unwrap();

        let leftover = std::fs::read_dir(dir.path().join("frames")).unwrap().count();
        assert_eq!(leftover, 0);
    }

    #[tokio::test]
    async fn stop_ends_ticks_but_lets_in_flight_work_finish() {
        let dir = tempfile::tempdir().unwrap();
        let slow = SchedulerTiming {
            interval: Duration::from_secs(60),
            ..timing()
        };
        let (mut scheduler, db) = scheduler(&dir, Arc::new(SlowBackend), slow);

        let capture = StubCapture::new(&dir, false);
        scheduler.start_with(capture.clone());
        wait_for(|| {
            let db = db.clone();
            async move { db.count_by_state().await.unwrap().processing == 1 }
        })
        .await;

        scheduler.stop().await.unwrap();
        assert_eq!(capture.calls(), 1);

        wait_for(|| {
            let db = db.clone();
            async move { db.count_by_state().await.unwrap().completed == 1 }
        })
        .await;
        let event = db.latest_completed().await.unwrap().unwrap();
        assert_eq!(event.state, EventState::Completed);
    }

    #[tokio::test]
    async fn stop_without_start_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        let (mut scheduler, _db) =
            scheduler(&dir, Arc::new(ScriptedBackend::new(vec![])), timing());
        scheduler.stop().await.unwrap();
        assert!(!scheduler.status().running);
    }

    #[tokio::test]
    async fn status_reports_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("events.sqlite3")).unwrap();
        let classifier = Arc::new(ClassificationClient::new(
            Arc::new(ScriptedBackend::new(vec![])),
            CategorySet::default(),
        ));
        let scheduler = CollectionScheduler::new(db, classifier, &Settings::default());

        let status = scheduler.status();
        assert!(!status.running);
        assert_eq!(status.camera_url, "http://localhost:8081/stream");
        assert_eq!(status.capture_interval_secs, 30);
    }
}
