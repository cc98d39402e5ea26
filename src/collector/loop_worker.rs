use anyhow::Result;
use std::sync::Arc;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::classifier::ClassificationClient;
use crate::db::Database;
use crate::pipeline;

use super::capture::CaptureSource;
use super::mock_sensor::MockSensorGenerator;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

pub const CAPTURE_RETRY_DELAY_SECS: u64 = 5;
pub const ERROR_RETRY_DELAY_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerTiming {
    /// Wait after a tick that produced an event.
    pub interval: Duration,
    /// Wait after the camera failed to deliver a frame.
    pub capture_retry_delay: Duration,
    /// Wait after any other failure inside a tick.
    pub error_delay: Duration,
}

impl SchedulerTiming {
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            capture_retry_delay: Duration::from_secs(CAPTURE_RETRY_DELAY_SECS),
            error_delay: Duration::from_secs(ERROR_RETRY_DELAY_SECS),
        }
    }
}

pub(crate) struct CollectorContext {
    pub db: Database,
    pub classifier: Arc<ClassificationClient>,
    pub capture: Arc<dyn CaptureSource>,
    pub sensors: MockSensorGenerator,
    pub timing: SchedulerTiming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickOutcome {
    Dispatched(i64),
    CaptureFailed,
}

pub(crate) async fn collection_loop(ctx: CollectorContext, cancel_token: CancellationToken) {
    log_info!(
        "collection loop started (interval {:?})",
        ctx.timing.interval
    );

    loop {
        if cancel_token.is_cancelled() {
            break;
        }

        let wait = match run_tick(&ctx).await {
            Ok(TickOutcome::Dispatched(_)) => ctx.timing.interval,
            Ok(TickOutcome::CaptureFailed) => ctx.timing.capture_retry_delay,
            Err(err) => {
                log_error!("collection tick failed: {err:#}");
                ctx.timing.error_delay
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = cancel_token.cancelled() => break,
        }
    }

    log_info!("collection loop shutting down");
}

/// One capture -> event -> dispatch cycle. The tick itself is not
/// interrupted by cancellation so an event is never left half-dispatched.
async fn run_tick(ctx: &CollectorContext) -> Result<TickOutcome> {
    let image_ref = match ctx.capture.capture().await {
        Ok(image_ref) => image_ref,
        Err(err) => {
            log_warn!("Failed to capture image: {err}");
            return Ok(TickOutcome::CaptureFailed);
        }
    };

    let reading = ctx.sensors.generate();
    let event = match ctx.db.create_event(image_ref.clone(), reading).await {
        Ok(event) => event,
        Err(err) => {
            // No event points at the frame, so nothing would ever read it.
            if let Err(remove_err) = tokio::fs::remove_file(image_ref.as_str()).await {
                log_error!("Failed to remove orphaned frame {image_ref}: {remove_err}");
            }
            return Err(err.context("failed to create event for captured frame"));
        }
    };

    let id = event.id;
    log_info!("Event created: ID {id}");
    pipeline::dispatch(&ctx.db, &ctx.classifier, event);
    Ok(TickOutcome::Dispatched(id))
}
