use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, parse_state, state_list, to_i64, to_u64},
    models::{
        Category, EventState, ImageRef, ObservationEvent, SensorReading, StateCounts,
    },
};
use crate::error::TransitionError;

const EVENT_COLUMNS: &str = "id, created_at, image_ref, temperature, humidity, illuminance, \
                             category, state, error_reason, updated_at";

fn row_to_event(row: &Row) -> Result<ObservationEvent> {
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let state: String = row.get("state")?;
    let image_ref: String = row.get("image_ref")?;
    let category: Option<String> = row.get("category")?;

    Ok(ObservationEvent {
        id: row.get("id")?,
        created_at: parse_datetime(&created_at, "created_at")?,
        image_ref: ImageRef::new(image_ref),
        reading: SensorReading {
            temperature: row.get("temperature")?,
            humidity: row.get("humidity")?,
            illuminance: row.get("illuminance")?,
        },
        category: category.map(Category::from_stored),
        state: parse_state(&state)?,
        error_reason: row.get("error_reason")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

fn query_events(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<ObservationEvent>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut events = Vec::new();
    while let Some(row) = rows.next()? {
        events.push(row_to_event(row)?);
    }
    Ok(events)
}

fn query_one(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Option<ObservationEvent>> {
    Ok(query_events(conn, sql, params)?.into_iter().next())
}

/// Applies one state-machine step as a single conditional UPDATE. When no row
/// changes, a follow-up read tells an absent event from an illegal move.
fn apply_transition(
    conn: &Connection,
    id: i64,
    to: EventState,
    category: Option<&Category>,
    error_reason: Option<&str>,
) -> Result<()> {
    let sources = EventState::allowed_sources(to);
    let sql = format!(
        "UPDATE events
         SET state = ?1,
             category = ?2,
             error_reason = ?3,
             updated_at = ?4
         WHERE id = ?5 AND state IN ({})",
        state_list(sources)
    );

    let changed = conn.execute(
        &sql,
        params![
            to.as_str(),
            category.map(|c| c.as_str()),
            error_reason,
            Utc::now().to_rfc3339(),
            id,
        ],
    )?;

    if changed == 1 {
        return Ok(());
    }

    let current: Option<String> = conn
        .query_row("SELECT state FROM events WHERE id = ?1", params![id], |row| {
            row.get(0)
        })
        .optional()?;

    match current {
        None => Err(TransitionError::NotFound(id).into()),
        Some(state) => Err(TransitionError::Illegal {
            id,
            from: parse_state(&state)?,
            to,
        }
        .into()),
    }
}

impl Database {
    /// Records a new observation in state `pending`, stamped with the current time.
    pub async fn create_event(
        &self,
        image_ref: ImageRef,
        reading: SensorReading,
    ) -> Result<ObservationEvent> {
        self.create_event_at(image_ref, reading, Utc::now()).await
    }

    pub async fn create_event_at(
        &self,
        image_ref: ImageRef,
        reading: SensorReading,
        created_at: DateTime<Utc>,
    ) -> Result<ObservationEvent> {
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO events (
                    created_at,
                    created_at_ms,
                    image_ref,
                    temperature,
                    humidity,
                    illuminance,
                    category,
                    state,
                    updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, ?7, ?8)",
                params![
                    created_at.to_rfc3339(),
                    created_at.timestamp_millis(),
                    image_ref.as_str(),
                    reading.temperature,
                    reading.humidity,
                    reading.illuminance,
                    EventState::Pending.as_str(),
                    created_at.to_rfc3339(),
                ],
            )
            .context("failed to insert event")?;

            Ok(ObservationEvent {
                id: conn.last_insert_rowid(),
                created_at,
                image_ref,
                reading,
                category: None,
                state: EventState::Pending,
                error_reason: None,
                updated_at: created_at,
            })
        })
        .await
    }

    pub async fn get_event(&self, id: i64) -> Result<Option<ObservationEvent>> {
        self.execute(move |conn| {
            query_one(
                conn,
                &format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1"),
                params![id],
            )
        })
        .await
    }

    /// `pending -> processing`.
    pub async fn mark_processing(&self, id: i64) -> Result<()> {
        self.execute(move |conn| apply_transition(conn, id, EventState::Processing, None, None))
            .await
    }

    /// `processing -> completed`, storing the category.
    pub async fn mark_completed(&self, id: i64, category: Category) -> Result<()> {
        self.execute(move |conn| {
            apply_transition(conn, id, EventState::Completed, Some(&category), None)
        })
        .await
    }

    /// `pending | processing -> error`. The reason is kept for diagnostics.
    pub async fn mark_error(&self, id: i64, reason: &str) -> Result<()> {
        let reason = reason.to_string();
        self.execute(move |conn| {
            apply_transition(conn, id, EventState::Error, None, Some(&reason))
        })
        .await
    }

    /// Most recently created completed event.
    pub async fn latest_completed(&self) -> Result<Option<ObservationEvent>> {
        self.execute(|conn| {
            query_one(
                conn,
                &format!(
                    "SELECT {EVENT_COLUMNS} FROM events
                     WHERE state = 'completed'
                     ORDER BY created_at_ms DESC, id DESC
                     LIMIT 1"
                ),
                params![],
            )
        })
        .await
    }

    /// Completed event closest in time to `at`; ties go to the lower id.
    pub async fn nearest_to(&self, at: DateTime<Utc>) -> Result<Option<ObservationEvent>> {
        let target_ms = at.timestamp_millis();
        self.execute(move |conn| {
            query_one(
                conn,
                &format!(
                    "SELECT {EVENT_COLUMNS} FROM events
                     WHERE state = 'completed'
                     ORDER BY ABS(created_at_ms - ?1) ASC, id ASC
                     LIMIT 1"
                ),
                params![target_ms],
            )
        })
        .await
    }

    /// Up to `limit` pending events, oldest first.
    pub async fn pending_batch(&self, limit: usize) -> Result<Vec<ObservationEvent>> {
        let limit = to_i64(limit as u64)?;
        self.execute(move |conn| {
            query_events(
                conn,
                &format!(
                    "SELECT {EVENT_COLUMNS} FROM events
                     WHERE state = 'pending'
                     ORDER BY created_at_ms ASC, id ASC
                     LIMIT ?1"
                ),
                params![limit],
            )
        })
        .await
    }

    pub async fn count_by_state(&self) -> Result<StateCounts> {
        self.execute(|conn| {
            let mut stmt = conn.prepare("SELECT state, COUNT(*) FROM events GROUP BY state")?;
            let mut rows = stmt.query([])?;
            let mut counts = StateCounts::default();
            while let Some(row) = rows.next()? {
                let state: String = row.get(0)?;
                let count = to_u64(row.get::<_, i64>(1)?, "count")?;
                match parse_state(&state)? {
                    EventState::Pending => counts.pending = count,
                    EventState::Processing => counts.processing = count,
                    EventState::Completed => counts.completed = count,
                    EventState::Error => counts.error = count,
                }
            }
            Ok(counts)
        })
        .await
    }

    /// Retention pruning. Returns the number of rows removed.
    pub async fn delete_events_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let cutoff_ms = cutoff.timestamp_millis();
        self.execute(move |conn| {
            let deleted = conn
                .execute(
                    "DELETE FROM events WHERE created_at_ms < ?1",
                    params![cutoff_ms],
                )
                .context("failed to delete old events")?;
            Ok(deleted)
        })
        .await
    }
}
