pub mod classifier;
pub mod collector;
pub mod db;
pub mod error;
pub mod ingest;
pub mod pipeline;
pub mod settings;
pub mod status;
pub mod utils;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{info, warn};
use tokio::sync::Mutex;

use classifier::{ClassificationClient, GeminiBackend, InferenceBackend};
use collector::CollectionScheduler;
use db::Database;
use ingest::Ingestor;
use settings::Settings;
use status::StatusService;

/// Everything a front end needs, wired to one database and one
/// classification client.
pub struct AppState {
    pub db: Database,
    pub classifier: Arc<ClassificationClient>,
    pub ingestor: Ingestor,
    pub status: StatusService,
    pub scheduler: Mutex<CollectionScheduler>,
}

impl AppState {
    pub async fn initialize(settings: &Settings) -> Result<Self> {
        let database = Database::new(settings.database_path.clone())?;

        if let Some(days) = settings.retention_days {
            let cutoff = retention_cutoff(Utc::now(), days)?;
            let removed = database.delete_events_older_than(cutoff).await?;
            if removed > 0 {
                info!("Deleted {removed} events older than {days} days");
            }
        }

        let backend = GeminiBackend::new(&settings.inference)?;
        if !backend.is_configured() {
            warn!("No inference API key configured; classification requests will be rejected");
        }
        let classifier = Arc::new(ClassificationClient::new(
            Arc::new(backend),
            settings.categories.to_set()?,
        ));

        pipeline::recover_pending(&database, &classifier, settings.recover_pending_limit)
            .await
            .context("failed to re-dispatch pending events")?;

        Ok(Self {
            ingestor: Ingestor::new(
                database.clone(),
                Arc::clone(&classifier),
                settings.images_dir.clone(),
            ),
            status: StatusService::new(database.clone(), Arc::clone(&classifier)),
            scheduler: Mutex::new(CollectionScheduler::new(
                database.clone(),
                Arc::clone(&classifier),
                settings,
            )),
            db: database,
            classifier,
        })
    }
}

fn retention_cutoff(now: DateTime<Utc>, days: u32) -> Result<DateTime<Utc>> {
    chrono::Duration::try_days(i64::from(days))
        .and_then(|window| now.checked_sub_signed(window))
        .with_context(|| format!("retention window of {days} days is out of range"))
}

async fn serve(settings: Settings) -> Result<()> {
    let state = AppState::initialize(&settings).await?;

    if settings.demo.enabled {
        info!("Demo mode enabled - collecting from {}", settings.demo.camera_url);
        state.scheduler.lock().await.start()?;
    } else {
        info!("Production mode - waiting for device uploads");
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutting down");

    let stopped = state.scheduler.lock().await.stop().await;
    stopped
}

pub fn run() -> Result<()> {
    utils::logging::init();
    info!("WhatAreYouDoing starting up...");

    let settings = Settings::load(&Settings::default_path())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build async runtime")?;
    runtime.block_on(serve(settings))
}
