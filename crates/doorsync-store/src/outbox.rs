//! Pending-change outbox.
//!
//! `record` runs inside the caller's transaction, so a mutation and the
//! outbox entry documenting it commit or roll back together — exactly
//! one entry per successful mutation, never an orphaned entry.

use chrono::{DateTime, SecondsFormat, Utc};
use duckdb::{params, Transaction};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::store::LocalStore;
use crate::types::{ChangeOp, EntityKind, PendingChange};

/// Append a pending change within `tx`. Returns the generated id.
pub(crate) fn record(
    tx: &Transaction<'_>,
    operation: ChangeOp,
    entity: EntityKind,
    data: serde_json::Value,
) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    // Normalized fractional width keeps lexicographic order chronological.
    let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
    let seq: i64 = tx.query_row(
        "SELECT coalesce(max(seq), 0) + 1 FROM pending_changes",
        [],
        |row| row.get(0),
    )?;
    tx.execute(
        "INSERT INTO pending_changes (seq, id, created_at, operation, entity, data)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![
            seq,
            id,
            created_at,
            operation.as_str(),
            entity.as_str(),
            serde_json::to_string(&data)?
        ],
    )?;
    Ok(id)
}

impl LocalStore {
    /// All pending entries, ordered by origination time ascending with
    /// insertion order as tiebreak. Restartable: entries discarded since
    /// the previous call simply no longer appear.
    pub fn drain(&self) -> Result<Vec<PendingChange>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, created_at, operation, entity, data
             FROM pending_changes ORDER BY created_at, seq",
        )?;
        let raw: Vec<(String, String, String, String, String)> = stmt
            .query_map([], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            })?
            .collect::<duckdb::Result<_>>()?;
        let mut pending = Vec::with_capacity(raw.len());
        for (id, created_at, operation, entity, data) in raw {
            let timestamp: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_at)
                .map_err(|e| StoreError::Invalid(format!("corrupt outbox timestamp: {e}")))?
                .with_timezone(&Utc);
            pending.push(PendingChange {
                id,
                timestamp,
                operation: operation.parse()?,
                entity: entity.parse()?,
                data: serde_json::from_str(&data)?,
            });
        }
        Ok(pending)
    }

    /// Remove one entry after confirmed replay. A no-op when the entry
    /// is already gone; two racing sync attempts may both discard it.
    pub fn discard(&self, id: &str) -> Result<()> {
        let conn = self.lock();
        conn.execute("DELETE FROM pending_changes WHERE id = ?", params![id])?;
        Ok(())
    }

    /// Number of queued changes — the signal presentation layers show
    /// while sync failures degrade to "will retry later".
    pub fn pending_count(&self) -> Result<u64> {
        let conn = self.lock();
        let count: i64 =
            conn.query_row("SELECT count(*) FROM pending_changes", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{employee_fields, room_fields};
    use crate::types::Building;

    #[test]
    fn every_mutation_queues_exactly_one_entry_in_call_order() {
        let store = LocalStore::open_in_memory().expect("store");
        let room = store
            .create_room(&room_fields("101", Building::Main, 1))
            .expect("room");
        let employee = store
            .create_employee(&employee_fields("Ivanov", "EMP001"))
            .expect("employee");
        store.grant_access(employee.id, room.id).expect("grant");
        store
            .update_room(room.id, &room_fields("101a", Building::Main, 1))
            .expect("update");

        let pending = store.drain().expect("drain");
        let ops: Vec<(ChangeOp, EntityKind)> =
            pending.iter().map(|p| (p.operation, p.entity)).collect();
        assert_eq!(
            ops,
            vec![
                (ChangeOp::Create, EntityKind::Room),
                (ChangeOp::Create, EntityKind::Employee),
                (ChangeOp::Grant, EntityKind::Access),
                (ChangeOp::Update, EntityKind::Room),
            ]
        );
        assert!(pending.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn drain_is_restartable_after_partial_consumption() {
        let store = LocalStore::open_in_memory().expect("store");
        store
            .create_room(&room_fields("101", Building::Main, 1))
            .expect("a");
        store
            .create_room(&room_fields("102", Building::Main, 1))
            .expect("b");

        let first = store.drain().expect("drain");
        assert_eq!(first.len(), 2);
        store.discard(&first[0].id).expect("discard");

        let rest = store.drain().expect("re-drain");
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, first[1].id);
    }

    #[test]
    fn discard_of_absent_entry_is_a_no_op() {
        let store = LocalStore::open_in_memory().expect("store");
        store.discard("no-such-id").expect("silent no-op");
        store
            .create_room(&room_fields("101", Building::Main, 1))
            .expect("room");
        let pending = store.drain().expect("drain");
        store.discard(&pending[0].id).expect("first discard");
        store.discard(&pending[0].id).expect("second discard");
        assert_eq!(store.pending_count().expect("count"), 0);
    }

    #[test]
    fn failed_mutation_records_nothing() {
        let store = LocalStore::open_in_memory().expect("store");
        store
            .create_room(&room_fields("101", Building::Main, 1))
            .expect("room");
        let _ = store
            .create_room(&room_fields("101", Building::Main, 1))
            .expect_err("conflict");
        assert_eq!(store.pending_count().expect("count"), 1);
    }
}
