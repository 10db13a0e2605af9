//! Access-rights consistency engine.
//!
//! The only legitimate writer of the access relation and of the
//! denormalized `Employee::access_rooms` list. Both halves of every
//! change commit in one transaction, so at every quiescent point an
//! employee's room list equals the set of relation rows naming them.

use duckdb::params;
use serde_json::json;
use tracing::debug;

use crate::error::Result;
use crate::outbox;
use crate::store::LocalStore;
use crate::types::{ChangeOp, EntityKind};

impl LocalStore {
    /// Grant an employee access to a room. Idempotent: granting an
    /// existing pair succeeds without a duplicate row, a duplicate list
    /// entry, or an outbox record. Returns whether a new grant was made.
    pub fn grant_access(&self, employee_id: i64, room_id: i64) -> Result<bool> {
        self.with_tx(|tx| {
            Self::load_employee(tx, employee_id)?;
            Self::load_room(tx, room_id)?;
            let present: i64 = tx.query_row(
                "SELECT count(*) FROM access_rights WHERE employee_id = ? AND room_id = ?",
                params![employee_id, room_id],
                |row| row.get(0),
            )?;
            if present > 0 {
                debug!(employee_id, room_id, "grant already present");
                return Ok(false);
            }
            let id = Self::next_id(tx, "access_rights")?;
            tx.execute(
                "INSERT INTO access_rights (id, employee_id, room_id) VALUES (?, ?, ?)",
                params![id, employee_id, room_id],
            )?;
            let mut rooms = Self::load_access_rooms(tx, employee_id)?;
            if !rooms.contains(&room_id) {
                rooms.push(room_id);
                Self::store_access_rooms(tx, employee_id, &rooms)?;
            }
            outbox::record(
                tx,
                ChangeOp::Grant,
                EntityKind::Access,
                json!({ "employeeId": employee_id, "roomId": room_id }),
            )?;
            Ok(true)
        })
    }

    /// Revoke an employee's access to a room. Idempotent: revoking a
    /// non-existent pair is a success no-op and records nothing.
    /// Returns whether anything was revoked.
    pub fn revoke_access(&self, employee_id: i64, room_id: i64) -> Result<bool> {
        self.with_tx(|tx| {
            let removed = tx.execute(
                "DELETE FROM access_rights WHERE employee_id = ? AND room_id = ?",
                params![employee_id, room_id],
            )?;
            if removed == 0 {
                debug!(employee_id, room_id, "revoke of absent pair");
                return Ok(false);
            }
            let mut rooms = Self::load_access_rooms(tx, employee_id)?;
            rooms.retain(|&r| r != room_id);
            Self::store_access_rooms(tx, employee_id, &rooms)?;
            outbox::record(
                tx,
                ChangeOp::Revoke,
                EntityKind::Access,
                json!({ "employeeId": employee_id, "roomId": room_id }),
            )?;
            Ok(true)
        })
    }

    /// Move a room's set of grant holders to `desired_employee_ids` by
    /// applying the minimal add/remove delta. Never delete-all-re-add:
    /// unchanged grants produce no outbox churn.
    pub fn reconcile_room_access(&self, room_id: i64, desired_employee_ids: &[i64]) -> Result<()> {
        let current: Vec<i64> = self
            .get_access_rights(Some(room_id), None)?
            .into_iter()
            .map(|r| r.employee_id)
            .collect();
        let (to_add, to_remove) = set_delta(&current, desired_employee_ids);
        for employee_id in to_add {
            self.grant_access(employee_id, room_id)?;
        }
        for employee_id in to_remove {
            self.revoke_access(employee_id, room_id)?;
        }
        Ok(())
    }

    /// Move an employee's set of accessible rooms to `desired_room_ids`
    /// by applying the minimal add/remove delta.
    pub fn reconcile_employee_access(&self, employee_id: i64, desired_room_ids: &[i64]) -> Result<()> {
        let current: Vec<i64> = self
            .get_access_rights(None, Some(employee_id))?
            .into_iter()
            .map(|r| r.room_id)
            .collect();
        let (to_add, to_remove) = set_delta(&current, desired_room_ids);
        for room_id in to_add {
            self.grant_access(employee_id, room_id)?;
        }
        for room_id in to_remove {
            self.revoke_access(employee_id, room_id)?;
        }
        Ok(())
    }
}

/// `(desired − current, current − desired)`, each in stable order.
fn set_delta(current: &[i64], desired: &[i64]) -> (Vec<i64>, Vec<i64>) {
    let to_add = desired
        .iter()
        .copied()
        .filter(|id| !current.contains(id))
        .collect();
    let to_remove = current
        .iter()
        .copied()
        .filter(|id| !desired.contains(id))
        .collect();
    (to_add, to_remove)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::test_support::{assert_access_invariant, employee_fields, room_fields};
    use crate::types::Building;

    #[test]
    fn grant_is_idempotent() {
        let store = LocalStore::open_in_memory().expect("store");
        let room = store
            .create_room(&room_fields("101", Building::Main, 1))
            .expect("room");
        let employee = store
            .create_employee(&employee_fields("Ivanov", "EMP001"))
            .expect("employee");

        assert!(store.grant_access(employee.id, room.id).expect("first"));
        assert!(!store.grant_access(employee.id, room.id).expect("second"));

        let rights = store
            .get_access_rights(Some(room.id), Some(employee.id))
            .expect("rights");
        assert_eq!(rights.len(), 1);
        let employee = store.get_employee(employee.id).expect("reload");
        assert_eq!(employee.access_rooms, vec![room.id]);
        assert_access_invariant(&store);
    }

    #[test]
    fn second_grant_records_no_outbox_entry() {
        let store = LocalStore::open_in_memory().expect("store");
        let room = store
            .create_room(&room_fields("101", Building::Main, 1))
            .expect("room");
        let employee = store
            .create_employee(&employee_fields("Ivanov", "EMP001"))
            .expect("employee");
        store.grant_access(employee.id, room.id).expect("first");
        let before = store.pending_count().expect("count");
        store.grant_access(employee.id, room.id).expect("second");
        assert_eq!(store.pending_count().expect("count"), before);
    }

    #[test]
    fn revoke_of_absent_pair_is_success_noop() {
        let store = LocalStore::open_in_memory().expect("store");
        let room = store
            .create_room(&room_fields("101", Building::Main, 1))
            .expect("room");
        let employee = store
            .create_employee(&employee_fields("Ivanov", "EMP001"))
            .expect("employee");
        let before = store.pending_count().expect("count");
        assert!(!store.revoke_access(employee.id, room.id).expect("revoke"));
        assert_eq!(store.pending_count().expect("count"), before);
        assert_access_invariant(&store);
    }

    #[test]
    fn grant_to_missing_entity_is_not_found() {
        let store = LocalStore::open_in_memory().expect("store");
        let room = store
            .create_room(&room_fields("101", Building::Main, 1))
            .expect("room");
        assert!(matches!(
            store.grant_access(999, room.id),
            Err(StoreError::NotFound(_))
        ));
        assert!(store.drain().expect("drain").is_empty());
    }

    #[test]
    fn grant_then_revoke_restores_initial_state() {
        let store = LocalStore::open_in_memory().expect("store");
        let room = store
            .create_room(&room_fields("101", Building::Main, 1))
            .expect("room");
        let employee = store
            .create_employee(&employee_fields("Ivanov", "EMP001"))
            .expect("employee");
        store.grant_access(employee.id, room.id).expect("grant");
        assert!(store.revoke_access(employee.id, room.id).expect("revoke"));

        assert!(store
            .get_access_rights(Some(room.id), Some(employee.id))
            .expect("rights")
            .is_empty());
        let employee = store.get_employee(employee.id).expect("reload");
        assert!(employee.access_rooms.is_empty());
        assert_access_invariant(&store);
    }

    #[test]
    fn reconcile_applies_minimal_delta_without_outbox_churn() {
        let store = LocalStore::open_in_memory().expect("store");
        let rooms: Vec<i64> = (1..=3)
            .map(|i| {
                store
                    .create_room(&room_fields(&format!("10{i}"), Building::Main, 1))
                    .expect("room")
                    .id
            })
            .collect();
        let employee = store
            .create_employee(&employee_fields("Ivanov", "EMP001"))
            .expect("employee");
        store.grant_access(employee.id, rooms[0]).expect("g0");
        store.grant_access(employee.id, rooms[1]).expect("g1");

        let before = store.pending_count().expect("count");
        // Keep rooms[1], drop rooms[0], add rooms[2]: one grant + one revoke.
        store
            .reconcile_employee_access(employee.id, &[rooms[1], rooms[2]])
            .expect("reconcile");
        assert_eq!(store.pending_count().expect("count"), before + 2);

        let mut held: Vec<i64> = store
            .get_access_rights(None, Some(employee.id))
            .expect("rights")
            .into_iter()
            .map(|r| r.room_id)
            .collect();
        held.sort_unstable();
        assert_eq!(held, vec![rooms[1], rooms[2]]);
        assert_access_invariant(&store);
    }

    #[test]
    fn reconcile_room_side_mirrors_employee_side() {
        let store = LocalStore::open_in_memory().expect("store");
        let room = store
            .create_room(&room_fields("101", Building::Main, 1))
            .expect("room");
        let a = store
            .create_employee(&employee_fields("Ivanov", "EMP001"))
            .expect("a");
        let b = store
            .create_employee(&employee_fields("Petrov", "EMP002"))
            .expect("b");
        store.grant_access(a.id, room.id).expect("grant a");

        store
            .reconcile_room_access(room.id, &[b.id])
            .expect("reconcile");

        let holders: Vec<i64> = store
            .get_access_rights(Some(room.id), None)
            .expect("rights")
            .into_iter()
            .map(|r| r.employee_id)
            .collect();
        assert_eq!(holders, vec![b.id]);
        assert_access_invariant(&store);
    }

    #[test]
    fn reconcile_to_same_set_changes_nothing() {
        let store = LocalStore::open_in_memory().expect("store");
        let room = store
            .create_room(&room_fields("101", Building::Main, 1))
            .expect("room");
        let employee = store
            .create_employee(&employee_fields("Ivanov", "EMP001"))
            .expect("employee");
        store.grant_access(employee.id, room.id).expect("grant");

        let before = store.pending_count().expect("count");
        store
            .reconcile_employee_access(employee.id, &[room.id])
            .expect("reconcile");
        assert_eq!(store.pending_count().expect("count"), before);
    }
}
