use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Local;
use rand::Rng;

use crate::db::models::ImageRef;
use crate::error::CaptureError;

use super::frame::{FrameExtractor, CHUNK_SIZE};

const ENABLE_LOGS: bool = true;

use crate::log_debug;

pub const CAPTURE_TIMEOUT_SECS: u64 = 10;

/// Something that yields one stored still image per call.
#[async_trait]
pub trait CaptureSource: Send + Sync {
    async fn capture(&self) -> Result<ImageRef, CaptureError>;
}

/// Grabs the first complete JPEG frame from an MJPEG HTTP stream.
///
/// Each capture opens a fresh connection and drops it as soon as a frame
/// (or a failure) is in hand.
pub struct MjpegCapture {
    client: reqwest::Client,
    url: String,
    output_dir: PathBuf,
    timeout: Duration,
}

impl MjpegCapture {
    pub fn new(url: impl Into<String>, output_dir: impl Into<PathBuf>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("failed to build camera HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
            output_dir: output_dir.into(),
            timeout: Duration::from_secs(CAPTURE_TIMEOUT_SECS),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn read_frame(&self) -> Result<Vec<u8>, CaptureError> {
        let mut response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CaptureError::Status(status));
        }

        let mut extractor = FrameExtractor::new();
        while let Some(bytes) = response.chunk().await? {
            for chunk in bytes.chunks(CHUNK_SIZE) {
                if let Some(frame) = extractor.push(chunk)? {
                    return Ok(frame);
                }
            }
        }
        Err(CaptureError::Incomplete)
    }
}

#[async_trait]
impl CaptureSource for MjpegCapture {
    async fn capture(&self) -> Result<ImageRef, CaptureError> {
        let frame = tokio::time::timeout(self.timeout, self.read_frame())
            .await
            .map_err(|_| CaptureError::Timeout(self.timeout))??;

        let path = save_frame(&self.output_dir, &frame).await?;
        log_debug!("captured {} byte frame to {}", frame.len(), path.display());
        Ok(ImageRef::from(path))
    }
}

/// `capture_<YYYYmmddHHMMSS>_<100..=999>.jpg`
fn frame_file_name() -> String {
    let suffix: u16 = rand::thread_rng().gen_range(100..=999);
    format!("capture_{}_{suffix}.jpg", Local::now().format("%Y%m%d%H%M%S"))
}

async fn save_frame(dir: &Path, frame: &[u8]) -> Result<PathBuf, CaptureError> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(frame_file_name());
    tokio::fs::write(&path, frame).await?;
    Ok(path)
}
