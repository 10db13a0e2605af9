//! HTTP implementation of the gateway against the entity-oriented
//! remote protocol.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use doorsync_store::{AccessRight, Building, Employee, Room};

use crate::{GatewayError, GatewayResult, RemoteGateway};

/// Gateway speaking the remote authority's request/response protocol.
///
/// Credentials are the caller's concern: hand in a pre-configured
/// `reqwest::Client` via [`HttpGateway::with_client`].
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpGateway {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, timeout)
    }

    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            base_url,
            timeout,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn ok(resp: reqwest::Response) -> GatewayResult<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let message = resp
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        debug!(status = status.as_u16(), %message, "remote rejected request");
        Err(GatewayError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

#[derive(Serialize)]
struct RoomsBulk<'a> {
    rooms: &'a [Room],
}

#[derive(Serialize)]
struct EmployeesBulk<'a> {
    employees: &'a [Employee],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AccessRightsBulk<'a> {
    access_rights: &'a [AccessRight],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AccessPair {
    employee_id: i64,
    room_id: i64,
}

#[derive(Deserialize)]
struct BulkCount {
    count: u64,
}

#[async_trait::async_trait]
impl RemoteGateway for HttpGateway {
    async fn fetch_rooms(&self, building: Option<Building>) -> GatewayResult<Vec<Room>> {
        let mut req = self.client.get(self.url("rooms")).timeout(self.timeout);
        if let Some(b) = building {
            req = req.query(&[("building", b.as_u8().to_string())]);
        }
        let resp = Self::ok(req.send().await?).await?;
        Ok(resp.json().await?)
    }

    async fn fetch_room(&self, id: i64) -> GatewayResult<Room> {
        let resp = self
            .client
            .get(self.url(&format!("rooms/{id}")))
            .timeout(self.timeout)
            .send()
            .await?;
        Ok(Self::ok(resp).await?.json().await?)
    }

    async fn create_room(&self, room: &Room) -> GatewayResult<()> {
        let resp = self
            .client
            .post(self.url("rooms"))
            .timeout(self.timeout)
            .json(room)
            .send()
            .await?;
        Self::ok(resp).await.map(|_| ())
    }

    async fn update_room(&self, room: &Room) -> GatewayResult<()> {
        let resp = self
            .client
            .put(self.url(&format!("rooms/{}", room.id)))
            .timeout(self.timeout)
            .json(room)
            .send()
            .await?;
        Self::ok(resp).await.map(|_| ())
    }

    async fn delete_room(&self, id: i64) -> GatewayResult<()> {
        let resp = self
            .client
            .delete(self.url(&format!("rooms/{id}")))
            .timeout(self.timeout)
            .send()
            .await?;
        Self::ok(resp).await.map(|_| ())
    }

    async fn fetch_employees(&self, search: Option<&str>) -> GatewayResult<Vec<Employee>> {
        let mut req = self.client.get(self.url("employees")).timeout(self.timeout);
        if let Some(text) = search {
            req = req.query(&[("search", text)]);
        }
        let resp = Self::ok(req.send().await?).await?;
        Ok(resp.json().await?)
    }

    async fn create_employee(&self, employee: &Employee) -> GatewayResult<()> {
        let resp = self
            .client
            .post(self.url("employees"))
            .timeout(self.timeout)
            .json(employee)
            .send()
            .await?;
        Self::ok(resp).await.map(|_| ())
    }

    async fn update_employee(&self, employee: &Employee) -> GatewayResult<()> {
        let resp = self
            .client
            .put(self.url(&format!("employees/{}", employee.id)))
            .timeout(self.timeout)
            .json(employee)
            .send()
            .await?;
        Self::ok(resp).await.map(|_| ())
    }

    async fn delete_employee(&self, id: i64) -> GatewayResult<()> {
        let resp = self
            .client
            .delete(self.url(&format!("employees/{id}")))
            .timeout(self.timeout)
            .send()
            .await?;
        Self::ok(resp).await.map(|_| ())
    }

    async fn fetch_access_rights(
        &self,
        room_id: Option<i64>,
        employee_id: Option<i64>,
    ) -> GatewayResult<Vec<AccessRight>> {
        let mut req = self.client.get(self.url("access")).timeout(self.timeout);
        if let Some(r) = room_id {
            req = req.query(&[("roomId", r.to_string())]);
        }
        if let Some(e) = employee_id {
            req = req.query(&[("employeeId", e.to_string())]);
        }
        let resp = Self::ok(req.send().await?).await?;
        Ok(resp.json().await?)
    }

    async fn create_access_right(&self, employee_id: i64, room_id: i64) -> GatewayResult<()> {
        let resp = self
            .client
            .post(self.url("access"))
            .timeout(self.timeout)
            .json(&AccessPair {
                employee_id,
                room_id,
            })
            .send()
            .await?;
        Self::ok(resp).await.map(|_| ())
    }

    async fn delete_access_right(&self, employee_id: i64, room_id: i64) -> GatewayResult<()> {
        let resp = self
            .client
            .delete(self.url("access"))
            .timeout(self.timeout)
            .query(&[
                ("employeeId", employee_id.to_string()),
                ("roomId", room_id.to_string()),
            ])
            .send()
            .await?;
        Self::ok(resp).await.map(|_| ())
    }

    async fn bulk_create_rooms(&self, rooms: &[Room]) -> GatewayResult<u64> {
        let resp = self
            .client
            .post(self.url("rooms/bulk"))
            .timeout(self.timeout)
            .json(&RoomsBulk { rooms })
            .send()
            .await?;
        let count: BulkCount = Self::ok(resp).await?.json().await?;
        Ok(count.count)
    }

    async fn bulk_create_employees(&self, employees: &[Employee]) -> GatewayResult<u64> {
        let resp = self
            .client
            .post(self.url("employees/bulk"))
            .timeout(self.timeout)
            .json(&EmployeesBulk { employees })
            .send()
            .await?;
        let count: BulkCount = Self::ok(resp).await?.json().await?;
        Ok(count.count)
    }

    async fn bulk_create_access_rights(&self, rights: &[AccessRight]) -> GatewayResult<u64> {
        let resp = self
            .client
            .post(self.url("access/bulk"))
            .timeout(self.timeout)
            .json(&AccessRightsBulk {
                access_rights: rights,
            })
            .send()
            .await?;
        let count: BulkCount = Self::ok(resp).await?.json().await?;
        Ok(count.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_normalized() {
        let gw = HttpGateway::new("http://authority.local/api/", Duration::from_secs(5));
        assert_eq!(gw.url("rooms"), "http://authority.local/api/rooms");
        assert_eq!(gw.url("rooms/7"), "http://authority.local/api/rooms/7");
    }

    #[tokio::test]
    async fn refused_connection_maps_to_unreachable() {
        // Port 1 is never listening.
        let gw = HttpGateway::new("http://127.0.0.1:1", Duration::from_secs(1));
        let err = gw.fetch_rooms(None).await.expect_err("must fail");
        assert!(matches!(
            err,
            GatewayError::Unreachable | GatewayError::Timeout
        ));
    }
}
