//! Guest to hypervisor relationships.
//!
//! A guest has at most one relationship row. Moving a guest re-points that
//! row in place; `UNIQUE(guest_host_id)` backs this up against concurrent
//! writers.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::HostError;
use crate::repository::{ensure_placeholder_host, prune_orphan_placeholder, PersistedHost};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HypervisorGuestRelationship {
    pub id: i64,
    pub hypervisor_host_id: i64,
    pub guest_host_id: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// What [`link_guest`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipChange {
    Created,
    Repointed { previous_hypervisor_host_id: i64 },
    Unchanged,
}

pub fn find_relationship_by_guest(
    conn: &Connection,
    guest_host_id: i64,
) -> Result<Option<HypervisorGuestRelationship>, HostError> {
    Ok(conn
        .query_row(
            "SELECT id, hypervisor_host_id, guest_host_id, created_at, updated_at
             FROM hypervisor_guest_relationships WHERE guest_host_id = ?1",
            [guest_host_id],
            |row| {
                Ok(HypervisorGuestRelationship {
                    id: row.get(0)?,
                    hypervisor_host_id: row.get(1)?,
                    guest_host_id: row.get(2)?,
                    created_at: row.get(3)?,
                    updated_at: row.get(4)?,
                })
            },
        )
        .optional()?)
}

/// Links a guest to a hypervisor, inserting or re-pointing its single row.
///
/// # Errors
///
/// Returns `HostError::RelationshipConflict` when a concurrent writer inserted
/// a row for the same guest first, `HostError::Database` otherwise.
pub fn link_guest(
    conn: &Connection,
    guest_host_id: i64,
    hypervisor_host_id: i64,
) -> Result<RelationshipChange, HostError> {
    match find_relationship_by_guest(conn, guest_host_id)? {
        Some(existing) if existing.hypervisor_host_id == hypervisor_host_id => {
            Ok(RelationshipChange::Unchanged)
        }
        Some(existing) => {
            conn.execute(
                "UPDATE hypervisor_guest_relationships
                 SET hypervisor_host_id = ?2, updated_at = datetime('now')
                 WHERE id = ?1",
                params![existing.id, hypervisor_host_id],
            )?;
            Ok(RelationshipChange::Repointed {
                previous_hypervisor_host_id: existing.hypervisor_host_id,
            })
        }
        None => match conn.execute(
            "INSERT INTO hypervisor_guest_relationships (hypervisor_host_id, guest_host_id)
             VALUES (?1, ?2)",
            params![hypervisor_host_id, guest_host_id],
        ) {
            Ok(_) => Ok(RelationshipChange::Created),
            Err(rusqlite::Error::SqliteFailure(err, msg))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                // The only UNIQUE column is guest_host_id; FK failures are
                // also constraint violations and must not be retried.
                if find_relationship_by_guest(conn, guest_host_id)?.is_some() {
                    Err(HostError::RelationshipConflict { guest_host_id })
                } else {
                    Err(HostError::Database(rusqlite::Error::SqliteFailure(err, msg)))
                }
            }
            Err(e) => Err(e.into()),
        },
    }
}

/// Removes a guest's relationship, returning the hypervisor row it pointed at.
pub fn unlink_guest(conn: &Connection, guest_host_id: i64) -> Result<Option<i64>, HostError> {
    Ok(conn
        .query_row(
            "DELETE FROM hypervisor_guest_relationships WHERE guest_host_id = ?1
             RETURNING hypervisor_host_id",
            [guest_host_id],
            |row| row.get(0),
        )
        .optional()?)
}

/// Number of guests mapped to a hypervisor row.
pub fn count_guests(conn: &Connection, hypervisor_host_id: i64) -> Result<i64, HostError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM hypervisor_guest_relationships WHERE hypervisor_host_id = ?1",
        [hypervisor_host_id],
        |row| row.get(0),
    )?)
}

/// Number of guests mapped to the hypervisor with this subscription-manager
/// id. A missing or blank id has no guests.
pub fn guest_count(
    conn: &Connection,
    org_id: &str,
    hypervisor_uuid: Option<&str>,
) -> Result<i64, HostError> {
    let Some(uuid) = hypervisor_uuid.filter(|u| !u.trim().is_empty()) else {
        return Ok(0);
    };
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM hypervisor_guest_relationships r
         JOIN hosts h ON h.id = r.hypervisor_host_id
         WHERE h.org_id = ?1 AND h.subscription_manager_id = ?2",
        params![org_id, uuid],
        |row| row.get(0),
    )?)
}

/// Outcome of [`RelationshipResolver::resolve`].
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRelationship {
    /// The hypervisor row the guest now maps to.
    pub hypervisor: Option<PersistedHost>,
    pub change: Option<RelationshipChange>,
    /// The hypervisor row a removed relationship pointed at.
    pub unlinked_from: Option<i64>,
}

/// Keeps a host's guest relationship in line with its latest facts.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelationshipResolver;

impl RelationshipResolver {
    /// Links `guest` to the hypervisor named by `hypervisor_uuid`, or removes
    /// its relationship when it no longer names one.
    ///
    /// Placeholders left without guests by a move or removal are deleted.
    ///
    /// # Errors
    ///
    /// See [`link_guest`].
    pub fn resolve(
        &self,
        conn: &Connection,
        guest: &PersistedHost,
        hypervisor_uuid: Option<&str>,
    ) -> Result<ResolvedRelationship, HostError> {
        let hypervisor = match hypervisor_uuid {
            Some(uuid) => Some(ensure_placeholder_host(conn, &guest.org_id, uuid)?),
            None => None,
        };

        let Some(hypervisor) = hypervisor.filter(|h| h.id != guest.id) else {
            let previous = unlink_guest(conn, guest.id)?;
            if let Some(previous) = previous {
                tracing::info!(
                    org_id = %guest.org_id,
                    guest_host_id = guest.id,
                    hypervisor_host_id = previous,
                    "removed relationship for host no longer reporting a hypervisor"
                );
                prune_orphan_placeholder(conn, previous)?;
            }
            return Ok(ResolvedRelationship {
                hypervisor: None,
                change: None,
                unlinked_from: previous,
            });
        };

        let change = link_guest(conn, guest.id, hypervisor.id)?;
        if let RelationshipChange::Repointed {
            previous_hypervisor_host_id,
        } = change
        {
            tracing::info!(
                org_id = %guest.org_id,
                guest_host_id = guest.id,
                from = previous_hypervisor_host_id,
                to = hypervisor.id,
                "guest moved to a different hypervisor"
            );
            prune_orphan_placeholder(conn, previous_hypervisor_host_id)?;
        }

        Ok(ResolvedRelationship {
            hypervisor: Some(hypervisor),
            change: Some(change),
            unlinked_from: None,
        })
    }
}
