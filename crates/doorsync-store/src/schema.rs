//! Persisted layout: four tables and the indexes required by the
//! lookup paths.
//!
//! Ids are assigned inside the owning transaction (`max(id) + 1`) rather
//! than by a sequence, so snapshot imports can write authority-assigned
//! ids without colliding with a stale sequence counter.

use duckdb::Connection;

use crate::error::Result;

pub(crate) fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS rooms (
            id        BIGINT PRIMARY KEY,
            number    TEXT NOT NULL,
            building  INTEGER NOT NULL,
            floor     INTEGER NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_rooms_number_building
            ON rooms (number, building);
        CREATE INDEX IF NOT EXISTS idx_rooms_building ON rooms (building);
        CREATE INDEX IF NOT EXISTS idx_rooms_floor ON rooms (floor);

        CREATE TABLE IF NOT EXISTS employees (
            id           BIGINT PRIMARY KEY,
            last_name    TEXT NOT NULL,
            first_name   TEXT NOT NULL,
            middle_name  TEXT NOT NULL,
            employee_id  TEXT NOT NULL,
            access_rooms TEXT NOT NULL DEFAULT '[]'
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_employees_badge
            ON employees (employee_id);
        CREATE INDEX IF NOT EXISTS idx_employees_name
            ON employees (last_name, first_name, middle_name);

        CREATE TABLE IF NOT EXISTS access_rights (
            id          BIGINT PRIMARY KEY,
            employee_id BIGINT NOT NULL,
            room_id     BIGINT NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_access_pair
            ON access_rights (employee_id, room_id);
        CREATE INDEX IF NOT EXISTS idx_access_employee
            ON access_rights (employee_id);
        CREATE INDEX IF NOT EXISTS idx_access_room
            ON access_rights (room_id);

        CREATE TABLE IF NOT EXISTS pending_changes (
            seq        BIGINT NOT NULL,
            id         TEXT PRIMARY KEY,
            created_at TEXT NOT NULL,
            operation  TEXT NOT NULL,
            entity     TEXT NOT NULL,
            data       TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_pending_created_at
            ON pending_changes (created_at);
        ",
    )?;
    Ok(())
}
