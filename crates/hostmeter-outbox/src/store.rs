//! Persistence operations for the event outbox.
//!
//! Writes go through [`create_outbox_record`], which is meant to run inside
//! the same transaction as the host writes that produced the event. Delivery
//! bookkeeping goes through [`fetch_pending`] and [`mark_sent`].

use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};

use hostmeter_types::CanonicalEvent;

use crate::error::OutboxError;
use crate::record::{DeliveryState, OutboxRecord};

const RECORD_COLUMNS: &str = "id, org_id, event_json, state, created_at, sent_at";

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<OutboxRecord> {
    let event_json: String = row.get(2)?;
    let event: CanonicalEvent = serde_json::from_str(&event_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;
    let state: String = row.get(3)?;
    let state: DeliveryState = state
        .parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;

    Ok(OutboxRecord {
        id: row.get(0)?,
        org_id: row.get(1)?,
        event,
        state,
        created_at: row.get(4)?,
        sent_at: row.get(5)?,
    })
}

/// Stores a canonical event as a pending outbox record.
///
/// # Errors
///
/// Returns `OutboxError::Serialization` if the event cannot be serialized
/// and `OutboxError::Database` on SQL failure.
pub fn create_outbox_record(
    conn: &Connection,
    event: &CanonicalEvent,
) -> Result<OutboxRecord, OutboxError> {
    let event_json = serde_json::to_string(event)?;

    let (id, created_at) = conn.query_row(
        "INSERT INTO event_outbox
            (event_id, org_id, instance_id, event_type, event_source, service_type,
             event_timestamp, event_json, state)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         RETURNING id, created_at",
        params![
            event.event_id.to_string(),
            event.org_id,
            event.instance_id,
            event.event_type.as_str(),
            event.event_source,
            event.service_type,
            event.timestamp.to_rfc3339(),
            event_json,
            DeliveryState::Pending.as_str(),
        ],
        |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
    )?;

    tracing::debug!(
        outbox_id = id,
        org_id = %event.org_id,
        instance_id = %event.instance_id,
        event_type = event.event_type.as_str(),
        "created outbox record"
    );

    Ok(OutboxRecord {
        id,
        org_id: event.org_id.clone(),
        event: event.clone(),
        state: DeliveryState::Pending,
        created_at,
        sent_at: None,
    })
}

/// Oldest pending records first, at most `limit`.
pub fn fetch_pending(conn: &Connection, limit: usize) -> Result<Vec<OutboxRecord>, OutboxError> {
    let sql = format!(
        "SELECT {RECORD_COLUMNS} FROM event_outbox
         WHERE state = 'pending'
         ORDER BY id ASC
         LIMIT ?1"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([i64::try_from(limit).unwrap_or(i64::MAX)], record_from_row)?;

    let mut records = Vec::new();
    for row in rows {
        records.push(row?);
    }
    Ok(records)
}

/// Marks records sent, atomically. Returns how many changed state.
pub fn mark_sent(conn: &Connection, ids: &[i64]) -> Result<usize, OutboxError> {
    if ids.is_empty() {
        return Ok(0);
    }
    let tx = conn.unchecked_transaction()?;
    let mut changed = 0;
    {
        let mut stmt = tx.prepare(
            "UPDATE event_outbox SET state = 'sent', sent_at = datetime('now')
             WHERE id = ?1 AND state = 'pending'",
        )?;
        for id in ids {
            changed += stmt.execute([id])?;
        }
    }
    tx.commit()?;
    Ok(changed)
}

pub fn count_pending(conn: &Connection) -> Result<i64, OutboxError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM event_outbox WHERE state = 'pending'",
        [],
        |row| row.get(0),
    )?)
}

/// Every record of an org, oldest first.
pub fn find_by_org_id(conn: &Connection, org_id: &str) -> Result<Vec<OutboxRecord>, OutboxError> {
    let sql = format!("SELECT {RECORD_COLUMNS} FROM event_outbox WHERE org_id = ?1 ORDER BY id ASC");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([org_id], record_from_row)?;

    let mut records = Vec::new();
    for row in rows {
        records.push(row?);
    }
    Ok(records)
}

/// Deletes records that were sent at least `older_than_seconds` ago.
pub fn purge_sent_records(conn: &Connection, older_than_seconds: u64) -> Result<usize, OutboxError> {
    Ok(conn.execute(
        "DELETE FROM event_outbox
         WHERE state = 'sent' AND sent_at <= datetime('now', ?1)",
        params![format!("-{older_than_seconds} seconds")],
    )?)
}
