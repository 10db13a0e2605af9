//! DuckDB-backed local store.
//!
//! One `LocalStore` owns one connection; all operations are serialized
//! through it and run inside a transaction, so concurrent callers see
//! either fully-applied or fully-absent effects of each mutation. Every
//! write is durable before the call returns.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use duckdb::{params, Connection, Transaction};
use serde_json::json;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::outbox;
use crate::schema;
use crate::types::{
    AccessRight, Building, ChangeOp, Employee, EmployeeFields, EntityKind, Room, RoomFields,
};

/// Durable, indexed, transactional storage for rooms, employees, the
/// access relation, and the pending-change outbox.
///
/// Construct one instance per process and share it via `Arc`; there is
/// no implicit global store.
pub struct LocalStore {
    conn: Mutex<Connection>,
}

impl LocalStore {
    /// Open (or create) a store backed by a database file.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open a transient in-memory store.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` inside a transaction; commit on `Ok`, roll back on `Err`.
    pub(crate) fn with_tx<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    pub(crate) fn next_id(tx: &Connection, table: &str) -> Result<i64> {
        let id = tx.query_row(
            &format!("SELECT coalesce(max(id), 0) + 1 FROM {table}"),
            [],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    // ========== Rooms ==========

    pub fn create_room(&self, fields: &RoomFields) -> Result<Room> {
        validate_room(fields)?;
        self.with_tx(|tx| {
            let room = Self::insert_room(tx, fields)?;
            outbox::record(
                tx,
                ChangeOp::Create,
                EntityKind::Room,
                serde_json::to_value(&room)?,
            )?;
            Ok(room)
        })
    }

    pub fn get_room(&self, id: i64) -> Result<Room> {
        let conn = self.lock();
        Self::load_room(&conn, id)
    }

    pub fn list_rooms(&self, building: Option<Building>) -> Result<Vec<Room>> {
        let conn = self.lock();
        let (sql, filter) = match building {
            Some(b) => (
                "SELECT id, number, building, floor FROM rooms WHERE building = ? ORDER BY id",
                Some(b.as_u8()),
            ),
            None => (
                "SELECT id, number, building, floor FROM rooms ORDER BY id",
                None,
            ),
        };
        let mut stmt = conn.prepare(sql)?;
        let raw: Vec<(i64, String, u8, u32)> = match filter {
            Some(b) => stmt
                .query_map(params![b], room_row)?
                .collect::<duckdb::Result<_>>()?,
            None => stmt
                .query_map([], room_row)?
                .collect::<duckdb::Result<_>>()?,
        };
        raw.into_iter().map(room_from_raw).collect()
    }

    pub fn update_room(&self, id: i64, fields: &RoomFields) -> Result<Room> {
        validate_room(fields)?;
        self.with_tx(|tx| {
            Self::load_room(tx, id)?;
            let clash: i64 = tx.query_row(
                "SELECT count(*) FROM rooms WHERE number = ? AND building = ? AND id <> ?",
                params![fields.number, fields.building.as_u8(), id],
                |row| row.get(0),
            )?;
            if clash > 0 {
                return Err(StoreError::Conflict(format!(
                    "room {} in building {} already exists",
                    fields.number,
                    fields.building.as_u8()
                )));
            }
            tx.execute(
                "UPDATE rooms SET number = ?, building = ?, floor = ? WHERE id = ?",
                params![fields.number, fields.building.as_u8(), fields.floor, id],
            )?;
            let room = Room {
                id,
                number: fields.number.clone(),
                building: fields.building,
                floor: fields.floor,
            };
            outbox::record(
                tx,
                ChangeOp::Update,
                EntityKind::Room,
                serde_json::to_value(&room)?,
            )?;
            Ok(room)
        })
    }

    /// Delete a room and cascade: every access right referencing it is
    /// removed, and its id disappears from every employee's room list.
    pub fn delete_room(&self, id: i64) -> Result<()> {
        self.with_tx(|tx| {
            Self::load_room(tx, id)?;
            Self::cascade_remove_room(tx, id)?;
            outbox::record(tx, ChangeOp::Delete, EntityKind::Room, json!({ "id": id }))?;
            Ok(())
        })
    }

    fn insert_room(tx: &Transaction<'_>, fields: &RoomFields) -> Result<Room> {
        let dup: i64 = tx.query_row(
            "SELECT count(*) FROM rooms WHERE number = ? AND building = ?",
            params![fields.number, fields.building.as_u8()],
            |row| row.get(0),
        )?;
        if dup > 0 {
            return Err(StoreError::Conflict(format!(
                "room {} in building {} already exists",
                fields.number,
                fields.building.as_u8()
            )));
        }
        let id = Self::next_id(tx, "rooms")?;
        tx.execute(
            "INSERT INTO rooms (id, number, building, floor) VALUES (?, ?, ?, ?)",
            params![id, fields.number, fields.building.as_u8(), fields.floor],
        )?;
        Ok(Room {
            id,
            number: fields.number.clone(),
            building: fields.building,
            floor: fields.floor,
        })
    }

    pub(crate) fn load_room(conn: &Connection, id: i64) -> Result<Room> {
        match conn.query_row(
            "SELECT id, number, building, floor FROM rooms WHERE id = ?",
            params![id],
            room_row,
        ) {
            Ok(raw) => room_from_raw(raw),
            Err(duckdb::Error::QueryReturnedNoRows) => {
                Err(StoreError::NotFound(format!("room {id}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn cascade_remove_room(tx: &Transaction<'_>, id: i64) -> Result<()> {
        let mut stmt =
            tx.prepare("SELECT DISTINCT employee_id FROM access_rights WHERE room_id = ?")?;
        let holders: Vec<i64> = stmt
            .query_map(params![id], |row| row.get(0))?
            .collect::<duckdb::Result<_>>()?;
        tx.execute("DELETE FROM access_rights WHERE room_id = ?", params![id])?;
        for employee_id in holders {
            let mut rooms = Self::load_access_rooms(tx, employee_id)?;
            rooms.retain(|&r| r != id);
            Self::store_access_rooms(tx, employee_id, &rooms)?;
        }
        tx.execute("DELETE FROM rooms WHERE id = ?", params![id])?;
        Ok(())
    }

    // ========== Employees ==========

    pub fn create_employee(&self, fields: &EmployeeFields) -> Result<Employee> {
        validate_employee(fields)?;
        self.with_tx(|tx| {
            let employee = Self::insert_employee(tx, fields)?;
            outbox::record(
                tx,
                ChangeOp::Create,
                EntityKind::Employee,
                serde_json::to_value(&employee)?,
            )?;
            Ok(employee)
        })
    }

    pub fn get_employee(&self, id: i64) -> Result<Employee> {
        let conn = self.lock();
        Self::load_employee(&conn, id)
    }

    /// List employees, optionally filtered by a case-insensitive
    /// substring match over the concatenated name and the badge id.
    pub fn list_employees(&self, filter: Option<&str>) -> Result<Vec<Employee>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, last_name, first_name, middle_name, employee_id, access_rooms
             FROM employees ORDER BY id",
        )?;
        let raw: Vec<(i64, String, String, String, String, String)> = stmt
            .query_map([], employee_row)?
            .collect::<duckdb::Result<_>>()?;
        let mut employees = Vec::with_capacity(raw.len());
        for row in raw {
            employees.push(employee_from_raw(row)?);
        }
        let needle = filter.map(str::to_lowercase).unwrap_or_default();
        if needle.is_empty() {
            return Ok(employees);
        }
        Ok(employees
            .into_iter()
            .filter(|e| {
                let name =
                    format!("{} {} {}", e.last_name, e.first_name, e.middle_name).to_lowercase();
                name.contains(&needle) || e.employee_id.to_lowercase().contains(&needle)
            })
            .collect())
    }

    pub fn update_employee(&self, id: i64, fields: &EmployeeFields) -> Result<Employee> {
        validate_employee(fields)?;
        self.with_tx(|tx| {
            Self::load_employee(tx, id)?;
            let clash: i64 = tx.query_row(
                "SELECT count(*) FROM employees WHERE employee_id = ? AND id <> ?",
                params![fields.employee_id, id],
                |row| row.get(0),
            )?;
            if clash > 0 {
                return Err(StoreError::Conflict(format!(
                    "badge {} already assigned",
                    fields.employee_id
                )));
            }
            tx.execute(
                "UPDATE employees
                 SET last_name = ?, first_name = ?, middle_name = ?, employee_id = ?
                 WHERE id = ?",
                params![
                    fields.last_name,
                    fields.first_name,
                    fields.middle_name,
                    fields.employee_id,
                    id
                ],
            )?;
            let employee = Self::load_employee(tx, id)?;
            outbox::record(
                tx,
                ChangeOp::Update,
                EntityKind::Employee,
                serde_json::to_value(&employee)?,
            )?;
            Ok(employee)
        })
    }

    /// Delete an employee and cascade to their access rights.
    pub fn delete_employee(&self, id: i64) -> Result<()> {
        self.with_tx(|tx| {
            Self::load_employee(tx, id)?;
            Self::cascade_remove_employee(tx, id)?;
            outbox::record(
                tx,
                ChangeOp::Delete,
                EntityKind::Employee,
                json!({ "id": id }),
            )?;
            Ok(())
        })
    }

    fn insert_employee(tx: &Transaction<'_>, fields: &EmployeeFields) -> Result<Employee> {
        let dup: i64 = tx.query_row(
            "SELECT count(*) FROM employees WHERE employee_id = ?",
            params![fields.employee_id],
            |row| row.get(0),
        )?;
        if dup > 0 {
            return Err(StoreError::Conflict(format!(
                "badge {} already assigned",
                fields.employee_id
            )));
        }
        let id = Self::next_id(tx, "employees")?;
        tx.execute(
            "INSERT INTO employees (id, last_name, first_name, middle_name, employee_id, access_rooms)
             VALUES (?, ?, ?, ?, ?, '[]')",
            params![
                id,
                fields.last_name,
                fields.first_name,
                fields.middle_name,
                fields.employee_id
            ],
        )?;
        Ok(Employee {
            id,
            last_name: fields.last_name.clone(),
            first_name: fields.first_name.clone(),
            middle_name: fields.middle_name.clone(),
            employee_id: fields.employee_id.clone(),
            access_rooms: Vec::new(),
        })
    }

    pub(crate) fn load_employee(conn: &Connection, id: i64) -> Result<Employee> {
        match conn.query_row(
            "SELECT id, last_name, first_name, middle_name, employee_id, access_rooms
             FROM employees WHERE id = ?",
            params![id],
            employee_row,
        ) {
            Ok(raw) => employee_from_raw(raw),
            Err(duckdb::Error::QueryReturnedNoRows) => {
                Err(StoreError::NotFound(format!("employee {id}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn cascade_remove_employee(tx: &Transaction<'_>, id: i64) -> Result<()> {
        tx.execute(
            "DELETE FROM access_rights WHERE employee_id = ?",
            params![id],
        )?;
        tx.execute("DELETE FROM employees WHERE id = ?", params![id])?;
        Ok(())
    }

    pub(crate) fn load_access_rooms(conn: &Connection, employee_id: i64) -> Result<Vec<i64>> {
        let raw: String = match conn.query_row(
            "SELECT access_rooms FROM employees WHERE id = ?",
            params![employee_id],
            |row| row.get(0),
        ) {
            Ok(raw) => raw,
            Err(duckdb::Error::QueryReturnedNoRows) => {
                return Err(StoreError::NotFound(format!("employee {employee_id}")))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&raw)?)
    }

    pub(crate) fn store_access_rooms(
        conn: &Connection,
        employee_id: i64,
        rooms: &[i64],
    ) -> Result<()> {
        conn.execute(
            "UPDATE employees SET access_rooms = ? WHERE id = ?",
            params![serde_json::to_string(rooms)?, employee_id],
        )?;
        Ok(())
    }

    /// Re-derive an employee's denormalized room list from the relation.
    pub(crate) fn derive_access_rooms(conn: &Connection, employee_id: i64) -> Result<()> {
        let mut stmt = conn
            .prepare("SELECT room_id FROM access_rights WHERE employee_id = ? ORDER BY room_id")?;
        let rooms: Vec<i64> = stmt
            .query_map(params![employee_id], |row| row.get(0))?
            .collect::<duckdb::Result<_>>()?;
        Self::store_access_rooms(conn, employee_id, &rooms)
    }

    // ========== Access relation (reads) ==========

    /// Query the access relation. Both filters present → exact-pair
    /// lookup; one → filter by that side; neither → full relation.
    pub fn get_access_rights(
        &self,
        room_id: Option<i64>,
        employee_id: Option<i64>,
    ) -> Result<Vec<AccessRight>> {
        let conn = self.lock();
        let base = "SELECT id, employee_id, room_id FROM access_rights";
        let mut rights: Vec<(i64, i64, i64)> = match (room_id, employee_id) {
            (Some(r), Some(e)) => {
                let mut stmt =
                    conn.prepare(&format!("{base} WHERE room_id = ? AND employee_id = ?"))?;
                stmt.query_map(params![r, e], access_row)?
                    .collect::<duckdb::Result<_>>()?
            }
            (Some(r), None) => {
                let mut stmt = conn.prepare(&format!("{base} WHERE room_id = ? ORDER BY id"))?;
                stmt.query_map(params![r], access_row)?
                    .collect::<duckdb::Result<_>>()?
            }
            (None, Some(e)) => {
                let mut stmt =
                    conn.prepare(&format!("{base} WHERE employee_id = ? ORDER BY id"))?;
                stmt.query_map(params![e], access_row)?
                    .collect::<duckdb::Result<_>>()?
            }
            (None, None) => {
                let mut stmt = conn.prepare(&format!("{base} ORDER BY id"))?;
                stmt.query_map([], access_row)?
                    .collect::<duckdb::Result<_>>()?
            }
        };
        Ok(rights
            .drain(..)
            .map(|(id, employee_id, room_id)| AccessRight {
                id: Some(id),
                employee_id,
                room_id,
            })
            .collect())
    }

    // ========== Local bulk creation (records one outbox entry) ==========

    /// Create a batch of rooms in one transaction with a single `bulk`
    /// outbox entry. Any conflict aborts the whole batch.
    pub fn bulk_create_rooms(&self, batch: &[RoomFields]) -> Result<Vec<Room>> {
        for fields in batch {
            validate_room(fields)?;
        }
        self.with_tx(|tx| {
            let mut rooms = Vec::with_capacity(batch.len());
            for fields in batch {
                rooms.push(Self::insert_room(tx, fields)?);
            }
            if !rooms.is_empty() {
                outbox::record(
                    tx,
                    ChangeOp::Bulk,
                    EntityKind::Room,
                    json!({ "rooms": rooms }),
                )?;
            }
            Ok(rooms)
        })
    }

    /// Create a batch of employees in one transaction with a single
    /// `bulk` outbox entry. Any conflict aborts the whole batch.
    pub fn bulk_create_employees(&self, batch: &[EmployeeFields]) -> Result<Vec<Employee>> {
        for fields in batch {
            validate_employee(fields)?;
        }
        self.with_tx(|tx| {
            let mut employees = Vec::with_capacity(batch.len());
            for fields in batch {
                employees.push(Self::insert_employee(tx, fields)?);
            }
            if !employees.is_empty() {
                outbox::record(
                    tx,
                    ChangeOp::Bulk,
                    EntityKind::Employee,
                    json!({ "employees": employees }),
                )?;
            }
            Ok(employees)
        })
    }

    // ========== Snapshot imports (bypass the outbox) ==========

    /// Upsert rooms pulled from the remote authority. Local rows that
    /// collide on id or `(number, building)` are replaced; replaced rows
    /// with a different id cascade like a delete. Records nothing in the
    /// outbox.
    pub fn import_rooms(&self, rooms: &[Room]) -> Result<u64> {
        self.with_tx(|tx| {
            for room in rooms {
                let mut stmt = tx.prepare(
                    "SELECT id FROM rooms WHERE id = ? OR (number = ? AND building = ?)",
                )?;
                let stale: Vec<i64> = stmt
                    .query_map(
                        params![room.id, room.number, room.building.as_u8()],
                        |row| row.get(0),
                    )?
                    .collect::<duckdb::Result<_>>()?;
                for old_id in stale {
                    if old_id == room.id {
                        tx.execute("DELETE FROM rooms WHERE id = ?", params![old_id])?;
                    } else {
                        Self::cascade_remove_room(tx, old_id)?;
                    }
                }
                tx.execute(
                    "INSERT INTO rooms (id, number, building, floor) VALUES (?, ?, ?, ?)",
                    params![room.id, room.number, room.building.as_u8(), room.floor],
                )?;
            }
            debug!(count = rooms.len(), "imported rooms");
            Ok(rooms.len() as u64)
        })
    }

    /// Upsert employees pulled from the remote authority. The wire
    /// `accessRooms` value is ignored; the denormalized list is derived
    /// from the local relation so the access invariant holds even when
    /// the access-right fetch failed this cycle.
    pub fn import_employees(&self, employees: &[Employee]) -> Result<u64> {
        self.with_tx(|tx| {
            for employee in employees {
                let mut stmt =
                    tx.prepare("SELECT id FROM employees WHERE id = ? OR employee_id = ?")?;
                let stale: Vec<i64> = stmt
                    .query_map(params![employee.id, employee.employee_id], |row| row.get(0))?
                    .collect::<duckdb::Result<_>>()?;
                for old_id in stale {
                    if old_id == employee.id {
                        tx.execute("DELETE FROM employees WHERE id = ?", params![old_id])?;
                    } else {
                        Self::cascade_remove_employee(tx, old_id)?;
                    }
                }
                tx.execute(
                    "INSERT INTO employees
                     (id, last_name, first_name, middle_name, employee_id, access_rooms)
                     VALUES (?, ?, ?, ?, ?, '[]')",
                    params![
                        employee.id,
                        employee.last_name,
                        employee.first_name,
                        employee.middle_name,
                        employee.employee_id
                    ],
                )?;
                Self::derive_access_rooms(tx, employee.id)?;
            }
            debug!(count = employees.len(), "imported employees");
            Ok(employees.len() as u64)
        })
    }

    /// Upsert access rights pulled from the remote authority, keyed by
    /// the `(employee_id, room_id)` pair; remote row ids are not
    /// meaningful locally. Pairs referencing entities absent from the
    /// local store are skipped. Every employee's denormalized room list
    /// is re-derived afterwards.
    pub fn import_access_rights(&self, rights: &[AccessRight]) -> Result<u64> {
        self.with_tx(|tx| {
            let mut applied = 0u64;
            for right in rights {
                let endpoints: i64 = tx.query_row(
                    "SELECT (SELECT count(*) FROM employees WHERE id = ?)
                          + (SELECT count(*) FROM rooms WHERE id = ?)",
                    params![right.employee_id, right.room_id],
                    |row| row.get(0),
                )?;
                if endpoints < 2 {
                    debug!(
                        employee_id = right.employee_id,
                        room_id = right.room_id,
                        "skipping access right with missing endpoint"
                    );
                    continue;
                }
                let present: i64 = tx.query_row(
                    "SELECT count(*) FROM access_rights WHERE employee_id = ? AND room_id = ?",
                    params![right.employee_id, right.room_id],
                    |row| row.get(0),
                )?;
                if present == 0 {
                    let id = Self::next_id(tx, "access_rights")?;
                    tx.execute(
                        "INSERT INTO access_rights (id, employee_id, room_id) VALUES (?, ?, ?)",
                        params![id, right.employee_id, right.room_id],
                    )?;
                }
                applied += 1;
            }
            let mut stmt = tx.prepare("SELECT id FROM employees")?;
            let ids: Vec<i64> = stmt
                .query_map([], |row| row.get(0))?
                .collect::<duckdb::Result<_>>()?;
            for employee_id in ids {
                Self::derive_access_rooms(tx, employee_id)?;
            }
            debug!(applied, "imported access rights");
            Ok(applied)
        })
    }
}

fn validate_room(fields: &RoomFields) -> Result<()> {
    if fields.number.trim().is_empty() {
        return Err(StoreError::Invalid("room number must not be empty".into()));
    }
    if fields.floor == 0 {
        return Err(StoreError::Invalid("floor must be positive".into()));
    }
    Ok(())
}

fn validate_employee(fields: &EmployeeFields) -> Result<()> {
    for (label, value) in [
        ("last name", &fields.last_name),
        ("first name", &fields.first_name),
        ("middle name", &fields.middle_name),
        ("badge id", &fields.employee_id),
    ] {
        if value.trim().is_empty() {
            return Err(StoreError::Invalid(format!("{label} must not be empty")));
        }
    }
    Ok(())
}

fn room_row(row: &duckdb::Row<'_>) -> duckdb::Result<(i64, String, u8, u32)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn room_from_raw((id, number, building, floor): (i64, String, u8, u32)) -> Result<Room> {
    Ok(Room {
        id,
        number,
        building: Building::try_from(building)?,
        floor,
    })
}

fn employee_row(
    row: &duckdb::Row<'_>,
) -> duckdb::Result<(i64, String, String, String, String, String)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn employee_from_raw(
    (id, last_name, first_name, middle_name, employee_id, access_rooms): (
        i64,
        String,
        String,
        String,
        String,
        String,
    ),
) -> Result<Employee> {
    Ok(Employee {
        id,
        last_name,
        first_name,
        middle_name,
        employee_id,
        access_rooms: serde_json::from_str(&access_rooms)?,
    })
}

fn access_row(row: &duckdb::Row<'_>) -> duckdb::Result<(i64, i64, i64)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}
