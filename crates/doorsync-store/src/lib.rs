//! Durable local store for the doorsync engine.
//!
//! Owns the four persisted collections — rooms, employees, the access
//! relation, and the pending-change outbox — behind one transactional
//! surface. Every local mutation records exactly one outbox entry in
//! the same transaction; snapshot imports from the remote authority
//! bypass the outbox entirely.

pub mod access;
pub mod error;
pub mod outbox;
mod schema;
pub mod store;
pub mod types;

pub use error::{Result, StoreError};
pub use store::LocalStore;
pub use types::{
    AccessRight, Building, ChangeOp, Employee, EmployeeFields, EntityKind, PendingChange, Room,
    RoomFields,
};

#[cfg(test)]
pub(crate) mod test_support {
    use crate::store::LocalStore;
    use crate::types::{Building, EmployeeFields, RoomFields};

    pub fn room_fields(number: &str, building: Building, floor: u32) -> RoomFields {
        RoomFields {
            number: number.to_string(),
            building,
            floor,
        }
    }

    pub fn employee_fields(last_name: &str, badge: &str) -> EmployeeFields {
        EmployeeFields {
            last_name: last_name.to_string(),
            first_name: "Ivan".to_string(),
            middle_name: "Ivanovich".to_string(),
            employee_id: badge.to_string(),
        }
    }

    /// Every employee's denormalized room list equals the set of
    /// relation rows naming them.
    pub fn assert_access_invariant(store: &LocalStore) {
        for employee in store.list_employees(None).expect("employees") {
            let mut from_relation: Vec<i64> = store
                .get_access_rights(None, Some(employee.id))
                .expect("rights")
                .into_iter()
                .map(|r| r.room_id)
                .collect();
            from_relation.sort_unstable();
            let mut denormalized = employee.access_rooms.clone();
            denormalized.sort_unstable();
            assert_eq!(
                denormalized, from_relation,
                "access_rooms drifted for employee {}",
                employee.id
            );
        }
    }
}
