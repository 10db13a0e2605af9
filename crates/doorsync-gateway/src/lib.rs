//! Remote authority gateway.
//!
//! Stateless adapter translating entity operations into remote calls.
//! Two implementations, chosen at construction time: [`HttpGateway`]
//! for the real request/response protocol and [`FixtureGateway`] as a
//! deterministic in-memory authority for tests. The gateway performs no
//! local mutation and no retries — retry policy lives in the sync
//! orchestrator.

pub mod fixture;
pub mod http;

use async_trait::async_trait;
use thiserror::Error;

use doorsync_store::{AccessRight, Building, Employee, Room};

pub use fixture::FixtureGateway;
pub use http::HttpGateway;

/// Gateway fault taxonomy. All variants are retryable from the
/// orchestrator's point of view: the pending change stays queued.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// No network path to the remote authority.
    #[error("remote authority unreachable")]
    Unreachable,

    /// The bounded wait for a response elapsed.
    #[error("remote call timed out")]
    Timeout,

    /// The authority refused the payload (validation, duplicate, ...).
    #[error("remote rejected request: {status} {message}")]
    Rejected { status: u16, message: String },
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout
        } else {
            GatewayError::Unreachable
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// One method per local store operation, plus bulk variants returning
/// the count of accepted records.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    // ========== Rooms ==========

    async fn fetch_rooms(&self, building: Option<Building>) -> GatewayResult<Vec<Room>>;
    async fn fetch_room(&self, id: i64) -> GatewayResult<Room>;
    async fn create_room(&self, room: &Room) -> GatewayResult<()>;
    async fn update_room(&self, room: &Room) -> GatewayResult<()>;
    async fn delete_room(&self, id: i64) -> GatewayResult<()>;

    // ========== Employees ==========

    async fn fetch_employees(&self, search: Option<&str>) -> GatewayResult<Vec<Employee>>;
    async fn create_employee(&self, employee: &Employee) -> GatewayResult<()>;
    async fn update_employee(&self, employee: &Employee) -> GatewayResult<()>;
    async fn delete_employee(&self, id: i64) -> GatewayResult<()>;

    // ========== Access relation ==========

    async fn fetch_access_rights(
        &self,
        room_id: Option<i64>,
        employee_id: Option<i64>,
    ) -> GatewayResult<Vec<AccessRight>>;
    async fn create_access_right(&self, employee_id: i64, room_id: i64) -> GatewayResult<()>;
    async fn delete_access_right(&self, employee_id: i64, room_id: i64) -> GatewayResult<()>;

    // ========== Bulk ==========

    async fn bulk_create_rooms(&self, rooms: &[Room]) -> GatewayResult<u64>;
    async fn bulk_create_employees(&self, employees: &[Employee]) -> GatewayResult<u64>;
    async fn bulk_create_access_rights(&self, rights: &[AccessRight]) -> GatewayResult<u64>;
}
