//! Background classification of stored events.
//!
//! One task per event: claim it (`pending -> processing`), classify, then
//! settle it as `completed` or `error`. Tasks share nothing but a cloned
//! database handle and the stateless classification client.

use std::sync::Arc;

use anyhow::{Context, Result};
use log::{error, info, warn};
use tokio::task::JoinHandle;

use crate::classifier::{ClassificationClient, ClassificationOutcome};
use crate::db::{Database, EventState, ObservationEvent};

/// Runs one event through the state machine and returns where it ended.
///
/// Fails only if the event could not be claimed (another task owns it, or
/// it is already terminal) or the database is gone.
pub async fn process_event(
    db: Database,
    classifier: Arc<ClassificationClient>,
    event: ObservationEvent,
) -> Result<EventState> {
    let id = event.id;
    db.mark_processing(id)
        .await
        .with_context(|| format!("failed to claim event {id}"))?;
    info!("Processing event {id}");

    match classifier
        .classify_stored(&event.image_ref, &event.reading)
        .await
    {
        ClassificationOutcome::Completed { category } => {
            match db.mark_completed(id, category.clone()).await {
                Ok(()) => {
                    info!("Event {id} completed: {category}");
                    Ok(EventState::Completed)
                }
                Err(err) => {
                    error!("Failed to record result for event {id}: {err:#}");
                    let reason = format!("failed to record classification: {err:#}");
                    db.mark_error(id, &reason)
                        .await
                        .with_context(|| format!("failed to mark event {id} as error"))?;
                    Ok(EventState::Error)
                }
            }
        }
        ClassificationOutcome::Error { message } => {
            warn!("Event {id} failed: {message}");
            db.mark_error(id, &message)
                .await
                .with_context(|| format!("failed to mark event {id} as error"))?;
            Ok(EventState::Error)
        }
    }
}

/// Hands the event to a detached task. The caller does not wait; stopping
/// whoever dispatched it leaves the task running to completion.
pub fn dispatch(
    db: &Database,
    classifier: &Arc<ClassificationClient>,
    event: ObservationEvent,
) -> JoinHandle<()> {
    let db = db.clone();
    let classifier = Arc::clone(classifier);
    tokio::spawn(async move {
        let id = event.id;
        if let Err(err) = process_event(db, classifier, event).await {
            error!("Classification task for event {id} failed: {err:#}");
        }
    })
}

/// Re-dispatches events left `pending` by a previous run, oldest first.
/// Returns how many were picked up.
pub async fn recover_pending(
    db: &Database,
    classifier: &Arc<ClassificationClient>,
    limit: usize,
) -> Result<usize> {
    let pending = db.pending_batch(limit).await?;
    let count = pending.len();
    for event in pending {
        dispatch(db, classifier, event);
    }
    if count > 0 {
        info!("Re-dispatched {count} pending events");
    }
    Ok(count)
}
