//! Host rows.

use hostmeter_facts::HostRole;
use hostmeter_types::HbiHost;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::HostError;

const HOST_COLUMNS: &str = "id, org_id, inventory_id, subscription_manager_id, instance_id,
     hypervisor_uuid, is_unmapped_guest, latest_hbi_event_data, creation_date, last_updated";

/// A stored host.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedHost {
    pub id: i64,
    pub org_id: String,
    pub inventory_id: Option<String>,
    pub subscription_manager_id: Option<String>,
    pub instance_id: Option<String>,
    pub hypervisor_uuid: Option<String>,
    pub is_unmapped_guest: bool,
    /// Latest raw host as JSON. `None` for placeholders.
    pub latest_hbi_event_data: Option<String>,
    pub creation_date: String,
    pub last_updated: String,
}

impl PersistedHost {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            org_id: row.get(1)?,
            inventory_id: row.get(2)?,
            subscription_manager_id: row.get(3)?,
            instance_id: row.get(4)?,
            hypervisor_uuid: row.get(5)?,
            is_unmapped_guest: row.get(6)?,
            latest_hbi_event_data: row.get(7)?,
            creation_date: row.get(8)?,
            last_updated: row.get(9)?,
        })
    }

    /// A hypervisor known only because a guest named it.
    pub fn is_placeholder(&self) -> bool {
        self.latest_hbi_event_data.is_none()
    }

    /// Decodes the stored raw host.
    ///
    /// # Errors
    ///
    /// Returns `HostError::Serialization` if the stored JSON is corrupt.
    pub fn latest_host(&self) -> Result<Option<HbiHost>, HostError> {
        self.latest_hbi_event_data
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(HostError::from)
    }
}

/// Values written by [`upsert_host`].
#[derive(Debug, Clone, Copy)]
pub struct HostUpsert<'a> {
    pub org_id: &'a str,
    pub inventory_id: &'a str,
    pub subscription_manager_id: Option<&'a str>,
    pub instance_id: &'a str,
    pub hypervisor_uuid: Option<&'a str>,
    pub is_unmapped_guest: bool,
    pub host: &'a HbiHost,
}

/// Inserts or updates a reporting host.
///
/// The row is matched by inventory id first, then by (org id,
/// subscription-manager id), which adopts a placeholder created for this host
/// by one of its guests. When both match different rows, the placeholder's
/// guests move to the inventory row and the placeholder is removed.
///
/// # Errors
///
/// Returns `HostError::Database` on SQL failure or
/// `HostError::Serialization` if the host cannot be serialized.
pub fn upsert_host(conn: &Connection, upsert: &HostUpsert<'_>) -> Result<PersistedHost, HostError> {
    let data = serde_json::to_string(upsert.host)?;

    let by_inventory = find_host_by_inventory_id(conn, upsert.inventory_id)?;
    let by_subman = match upsert.subscription_manager_id {
        Some(subman) => find_host_by_subscription_manager_id(conn, upsert.org_id, subman)?,
        None => None,
    };

    let target = match (by_inventory, by_subman) {
        (Some(row), Some(other)) if row.id != other.id => {
            absorb(conn, &other, &row)?;
            Some(row)
        }
        (Some(row), _) => Some(row),
        (None, other) => other,
    };

    let id = match target {
        Some(row) => {
            conn.execute(
                "UPDATE hosts SET
                    org_id = ?2, inventory_id = ?3, subscription_manager_id = ?4,
                    instance_id = ?5, hypervisor_uuid = ?6, is_unmapped_guest = ?7,
                    latest_hbi_event_data = ?8, last_updated = datetime('now')
                 WHERE id = ?1",
                params![
                    row.id,
                    upsert.org_id,
                    upsert.inventory_id,
                    upsert.subscription_manager_id,
                    upsert.instance_id,
                    upsert.hypervisor_uuid,
                    upsert.is_unmapped_guest,
                    data,
                ],
            )?;
            row.id
        }
        None => conn.query_row(
            "INSERT INTO hosts
                (org_id, inventory_id, subscription_manager_id, instance_id,
                 hypervisor_uuid, is_unmapped_guest, latest_hbi_event_data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             RETURNING id",
            params![
                upsert.org_id,
                upsert.inventory_id,
                upsert.subscription_manager_id,
                upsert.instance_id,
                upsert.hypervisor_uuid,
                upsert.is_unmapped_guest,
                data,
            ],
            |row| row.get(0),
        )?,
    };

    find_host_by_id(conn, id)?.ok_or(HostError::Database(rusqlite::Error::QueryReturnedNoRows))
}

/// Moves `from`'s guests to `into` and deletes `from`.
///
/// Only ever called with a placeholder or a superseded registration of the
/// same machine as `from`.
fn absorb(conn: &Connection, from: &PersistedHost, into: &PersistedHost) -> Result<(), HostError> {
    tracing::info!(
        org_id = %from.org_id,
        from_host_id = from.id,
        into_host_id = into.id,
        "merging duplicate host rows"
    );
    conn.execute(
        "UPDATE hypervisor_guest_relationships
         SET hypervisor_host_id = ?2, updated_at = datetime('now')
         WHERE hypervisor_host_id = ?1 AND guest_host_id <> ?2",
        params![from.id, into.id],
    )?;
    conn.execute("DELETE FROM hosts WHERE id = ?1", [from.id])?;
    Ok(())
}

/// Returns the host row for a hypervisor uuid, creating a placeholder when
/// none exists.
///
/// # Errors
///
/// Returns `HostError::Database` on SQL failure.
pub fn ensure_placeholder_host(
    conn: &Connection,
    org_id: &str,
    subscription_manager_id: &str,
) -> Result<PersistedHost, HostError> {
    if let Some(existing) = find_host_by_subscription_manager_id(conn, org_id, subscription_manager_id)? {
        return Ok(existing);
    }
    let id: i64 = conn.query_row(
        "INSERT INTO hosts (org_id, subscription_manager_id) VALUES (?1, ?2) RETURNING id",
        params![org_id, subscription_manager_id],
        |row| row.get(0),
    )?;
    tracing::debug!(org_id, subscription_manager_id, host_id = id, "created placeholder hypervisor");
    find_host_by_id(conn, id)?.ok_or(HostError::Database(rusqlite::Error::QueryReturnedNoRows))
}

pub fn find_host_by_id(conn: &Connection, id: i64) -> Result<Option<PersistedHost>, HostError> {
    let sql = format!("SELECT {HOST_COLUMNS} FROM hosts WHERE id = ?1");
    Ok(conn.query_row(&sql, [id], PersistedHost::from_row).optional()?)
}

/// Inventory ids are unique across orgs.
pub fn find_host_by_inventory_id(
    conn: &Connection,
    inventory_id: &str,
) -> Result<Option<PersistedHost>, HostError> {
    let sql = format!("SELECT {HOST_COLUMNS} FROM hosts WHERE inventory_id = ?1");
    Ok(conn
        .query_row(&sql, [inventory_id], PersistedHost::from_row)
        .optional()?)
}

pub fn find_host_by_subscription_manager_id(
    conn: &Connection,
    org_id: &str,
    subscription_manager_id: &str,
) -> Result<Option<PersistedHost>, HostError> {
    let sql = format!(
        "SELECT {HOST_COLUMNS} FROM hosts WHERE org_id = ?1 AND subscription_manager_id = ?2"
    );
    Ok(conn
        .query_row(&sql, params![org_id, subscription_manager_id], PersistedHost::from_row)
        .optional()?)
}

/// Guests linked to a hypervisor row, optionally only those still flagged
/// unmapped. Ordered by host id.
pub fn find_guests(
    conn: &Connection,
    hypervisor_host_id: i64,
    only_unmapped: bool,
) -> Result<Vec<PersistedHost>, HostError> {
    let sql = format!(
        "SELECT {} FROM hosts h
         JOIN hypervisor_guest_relationships r ON r.guest_host_id = h.id
         WHERE r.hypervisor_host_id = ?1 AND (?2 = 0 OR h.is_unmapped_guest = 1)
         ORDER BY h.id",
        prefixed_columns("h")
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![hypervisor_host_id, only_unmapped], PersistedHost::from_row)?;

    let mut guests = Vec::new();
    for row in rows {
        guests.push(row?);
    }
    Ok(guests)
}

fn prefixed_columns(alias: &str) -> String {
    HOST_COLUMNS
        .split(',')
        .map(|c| format!("{alias}.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn set_unmapped_guest(conn: &Connection, host_id: i64, unmapped: bool) -> Result<(), HostError> {
    conn.execute(
        "UPDATE hosts SET is_unmapped_guest = ?2, last_updated = datetime('now') WHERE id = ?1",
        params![host_id, unmapped],
    )?;
    Ok(())
}

/// Deletes a host row. Its relationships go with it.
pub fn delete_host(conn: &Connection, host_id: i64) -> Result<bool, HostError> {
    Ok(conn.execute("DELETE FROM hosts WHERE id = ?1", [host_id])? > 0)
}

/// Turns a deleted hypervisor into a placeholder so its guests stay linked.
pub fn demote_to_placeholder(conn: &Connection, host_id: i64) -> Result<(), HostError> {
    conn.execute(
        "UPDATE hosts SET
            inventory_id = NULL, instance_id = NULL, hypervisor_uuid = NULL,
            is_unmapped_guest = 0, latest_hbi_event_data = NULL,
            last_updated = datetime('now')
         WHERE id = ?1",
        [host_id],
    )?;
    Ok(())
}

/// Deletes `host_id` if it is a placeholder nobody maps to any more.
pub fn prune_orphan_placeholder(conn: &Connection, host_id: i64) -> Result<bool, HostError> {
    let deleted = conn.execute(
        "DELETE FROM hosts
         WHERE id = ?1
           AND latest_hbi_event_data IS NULL
           AND NOT EXISTS (
               SELECT 1 FROM hypervisor_guest_relationships WHERE hypervisor_host_id = ?1
           )",
        [host_id],
    )?;
    if deleted > 0 {
        tracing::debug!(host_id, "pruned orphaned placeholder hypervisor");
    }
    Ok(deleted > 0)
}

/// `true` when a non-placeholder host with this subscription-manager id
/// exists in the org.
pub fn is_known_host(
    conn: &Connection,
    org_id: &str,
    subscription_manager_id: &str,
) -> Result<bool, HostError> {
    Ok(conn.query_row(
        "SELECT EXISTS(
            SELECT 1 FROM hosts
            WHERE org_id = ?1 AND subscription_manager_id = ?2
              AND latest_hbi_event_data IS NOT NULL
         )",
        params![org_id, subscription_manager_id],
        |row| row.get(0),
    )?)
}

/// Derives a host's role from stored relationships.
///
/// A host is a hypervisor when guests map to its subscription-manager id; a
/// guest is unmapped while its hypervisor has not reported itself.
pub fn host_role(
    conn: &Connection,
    org_id: &str,
    subscription_manager_id: Option<&str>,
    hypervisor_uuid: Option<&str>,
    is_guest: bool,
) -> Result<HostRole, HostError> {
    let is_hypervisor = crate::relationship::guest_count(conn, org_id, subscription_manager_id)? > 0;
    let is_unmapped_guest = match hypervisor_uuid.filter(|_| is_guest) {
        Some(uuid) => !is_known_host(conn, org_id, uuid)?,
        None => false,
    };
    Ok(HostRole {
        is_hypervisor,
        is_unmapped_guest,
    })
}
