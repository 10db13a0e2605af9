//! Deterministic in-memory authority for tests.
//!
//! Behaves like an idempotent remote: re-sending a create for an
//! existing natural key upserts instead of rejecting, matching the
//! at-least-once replay contract. Reachability and per-method failures
//! are scriptable so sync edge cases can be exercised precisely.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use doorsync_store::{AccessRight, Building, Employee, Room};

use crate::{GatewayError, GatewayResult, RemoteGateway};

#[derive(Default)]
struct FixtureState {
    unreachable: bool,
    failures: HashMap<&'static str, VecDeque<GatewayError>>,
    rooms: Vec<Room>,
    employees: Vec<Employee>,
    access_rights: Vec<AccessRight>,
    next_access_id: i64,
}

/// In-memory stand-in for the remote authority.
#[derive(Default)]
pub struct FixtureGateway {
    state: Mutex<FixtureState>,
}

impl FixtureGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FixtureState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Toggle the network path. While unreachable every call fails
    /// with [`GatewayError::Unreachable`].
    pub fn set_reachable(&self, reachable: bool) {
        self.lock().unreachable = !reachable;
    }

    /// Script the next call of `method` (trait method name) to fail
    /// with `error`. Queued failures are consumed in order.
    pub fn fail_next(&self, method: &'static str, error: GatewayError) {
        self.lock().failures.entry(method).or_default().push_back(error);
    }

    pub fn rooms(&self) -> Vec<Room> {
        self.lock().rooms.clone()
    }

    pub fn employees(&self) -> Vec<Employee> {
        self.lock().employees.clone()
    }

    pub fn access_rights(&self) -> Vec<AccessRight> {
        self.lock().access_rights.clone()
    }

    pub fn seed_rooms(&self, rooms: Vec<Room>) {
        self.lock().rooms = rooms;
    }

    pub fn seed_employees(&self, employees: Vec<Employee>) {
        self.lock().employees = employees;
    }

    pub fn seed_access_rights(&self, rights: Vec<AccessRight>) {
        self.lock().access_rights = rights;
    }

    fn gate(state: &mut FixtureState, method: &'static str) -> GatewayResult<()> {
        if state.unreachable {
            return Err(GatewayError::Unreachable);
        }
        if let Some(queue) = state.failures.get_mut(method) {
            if let Some(err) = queue.pop_front() {
                return Err(err);
            }
        }
        Ok(())
    }

    fn upsert_room(state: &mut FixtureState, room: &Room) {
        state
            .rooms
            .retain(|r| r.id != room.id && !(r.number == room.number && r.building == room.building));
        state.rooms.push(room.clone());
    }

    fn upsert_employee(state: &mut FixtureState, employee: &Employee) {
        state
            .employees
            .retain(|e| e.id != employee.id && e.employee_id != employee.employee_id);
        state.employees.push(employee.clone());
    }

    fn insert_pair(state: &mut FixtureState, employee_id: i64, room_id: i64) {
        let exists = state
            .access_rights
            .iter()
            .any(|a| a.employee_id == employee_id && a.room_id == room_id);
        if !exists {
            state.next_access_id += 1;
            state.access_rights.push(AccessRight {
                id: Some(state.next_access_id),
                employee_id,
                room_id,
            });
        }
    }
}

#[async_trait::async_trait]
impl RemoteGateway for FixtureGateway {
    async fn fetch_rooms(&self, building: Option<Building>) -> GatewayResult<Vec<Room>> {
        let mut state = self.lock();
        Self::gate(&mut state, "fetch_rooms")?;
        Ok(state
            .rooms
            .iter()
            .filter(|r| building.is_none_or(|b| r.building == b))
            .cloned()
            .collect())
    }

    async fn fetch_room(&self, id: i64) -> GatewayResult<Room> {
        let mut state = self.lock();
        Self::gate(&mut state, "fetch_room")?;
        state
            .rooms
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(GatewayError::Rejected {
                status: 404,
                message: format!("room {id} not found"),
            })
    }

    async fn create_room(&self, room: &Room) -> GatewayResult<()> {
        let mut state = self.lock();
        Self::gate(&mut state, "create_room")?;
        Self::upsert_room(&mut state, room);
        Ok(())
    }

    async fn update_room(&self, room: &Room) -> GatewayResult<()> {
        let mut state = self.lock();
        Self::gate(&mut state, "update_room")?;
        Self::upsert_room(&mut state, room);
        Ok(())
    }

    async fn delete_room(&self, id: i64) -> GatewayResult<()> {
        let mut state = self.lock();
        Self::gate(&mut state, "delete_room")?;
        state.rooms.retain(|r| r.id != id);
        state.access_rights.retain(|a| a.room_id != id);
        Ok(())
    }

    async fn fetch_employees(&self, search: Option<&str>) -> GatewayResult<Vec<Employee>> {
        let mut state = self.lock();
        Self::gate(&mut state, "fetch_employees")?;
        let needle = search.map(str::to_lowercase).unwrap_or_default();
        Ok(state
            .employees
            .iter()
            .filter(|e| {
                if needle.is_empty() {
                    return true;
                }
                let name =
                    format!("{} {} {}", e.last_name, e.first_name, e.middle_name).to_lowercase();
                name.contains(&needle) || e.employee_id.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect())
    }

    async fn create_employee(&self, employee: &Employee) -> GatewayResult<()> {
        let mut state = self.lock();
        Self::gate(&mut state, "create_employee")?;
        Self::upsert_employee(&mut state, employee);
        Ok(())
    }

    async fn update_employee(&self, employee: &Employee) -> GatewayResult<()> {
        let mut state = self.lock();
        Self::gate(&mut state, "update_employee")?;
        Self::upsert_employee(&mut state, employee);
        Ok(())
    }

    async fn delete_employee(&self, id: i64) -> GatewayResult<()> {
        let mut state = self.lock();
        Self::gate(&mut state, "delete_employee")?;
        state.employees.retain(|e| e.id != id);
        state.access_rights.retain(|a| a.employee_id != id);
        Ok(())
    }

    async fn fetch_access_rights(
        &self,
        room_id: Option<i64>,
        employee_id: Option<i64>,
    ) -> GatewayResult<Vec<AccessRight>> {
        let mut state = self.lock();
        Self::gate(&mut state, "fetch_access_rights")?;
        Ok(state
            .access_rights
            .iter()
            .filter(|a| {
                room_id.is_none_or(|r| a.room_id == r)
                    && employee_id.is_none_or(|e| a.employee_id == e)
            })
            .cloned()
            .collect())
    }

    async fn create_access_right(&self, employee_id: i64, room_id: i64) -> GatewayResult<()> {
        let mut state = self.lock();
        Self::gate(&mut state, "create_access_right")?;
        Self::insert_pair(&mut state, employee_id, room_id);
        Ok(())
    }

    async fn delete_access_right(&self, employee_id: i64, room_id: i64) -> GatewayResult<()> {
        let mut state = self.lock();
        Self::gate(&mut state, "delete_access_right")?;
        state
            .access_rights
            .retain(|a| !(a.employee_id == employee_id && a.room_id == room_id));
        Ok(())
    }

    async fn bulk_create_rooms(&self, rooms: &[Room]) -> GatewayResult<u64> {
        let mut state = self.lock();
        Self::gate(&mut state, "bulk_create_rooms")?;
        for room in rooms {
            Self::upsert_room(&mut state, room);
        }
        Ok(rooms.len() as u64)
    }

    async fn bulk_create_employees(&self, employees: &[Employee]) -> GatewayResult<u64> {
        let mut state = self.lock();
        Self::gate(&mut state, "bulk_create_employees")?;
        for employee in employees {
            Self::upsert_employee(&mut state, employee);
        }
        Ok(employees.len() as u64)
    }

    async fn bulk_create_access_rights(&self, rights: &[AccessRight]) -> GatewayResult<u64> {
        let mut state = self.lock();
        Self::gate(&mut state, "bulk_create_access_rights")?;
        for right in rights {
            Self::insert_pair(&mut state, right.employee_id, right.room_id);
        }
        Ok(rights.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(id: i64, number: &str) -> Room {
        Room {
            id,
            number: number.to_string(),
            building: Building::Main,
            floor: 1,
        }
    }

    #[tokio::test]
    async fn unreachable_fails_every_call() {
        let gw = FixtureGateway::new();
        gw.set_reachable(false);
        assert!(matches!(
            gw.fetch_rooms(None).await,
            Err(GatewayError::Unreachable)
        ));
        gw.set_reachable(true);
        assert!(gw.fetch_rooms(None).await.expect("rooms").is_empty());
    }

    #[tokio::test]
    async fn scripted_failures_are_consumed_in_order() {
        let gw = FixtureGateway::new();
        gw.fail_next(
            "create_room",
            GatewayError::Rejected {
                status: 500,
                message: "boom".into(),
            },
        );
        let err = gw.create_room(&room(1, "101")).await.expect_err("scripted");
        assert!(matches!(err, GatewayError::Rejected { status: 500, .. }));
        gw.create_room(&room(1, "101")).await.expect("second try");
        assert_eq!(gw.rooms().len(), 1);
    }

    #[tokio::test]
    async fn replayed_create_upserts_instead_of_duplicating() {
        let gw = FixtureGateway::new();
        gw.create_room(&room(1, "101")).await.expect("first");
        gw.create_room(&room(1, "101")).await.expect("replay");
        assert_eq!(gw.rooms().len(), 1);

        gw.create_access_right(5, 1).await.expect("grant");
        gw.create_access_right(5, 1).await.expect("replayed grant");
        assert_eq!(gw.access_rights().len(), 1);
    }

    #[tokio::test]
    async fn delete_room_cascades_remote_access_rights() {
        let gw = FixtureGateway::new();
        gw.create_room(&room(1, "101")).await.expect("room");
        gw.create_access_right(5, 1).await.expect("grant");
        gw.delete_room(1).await.expect("delete");
        assert!(gw.rooms().is_empty());
        assert!(gw.access_rights().is_empty());
    }
}
