//! Bidirectional sync orchestrator.
//!
//! Replays the pending-change outbox against the remote gateway
//! (local→remote) and pulls entity snapshots back (remote→local). One
//! cycle at a time; per-entry and per-entity-type failures are logged
//! and contained, never fatal to the cycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use doorsync_gateway::RemoteGateway;
use doorsync_store::{
    AccessRight, ChangeOp, Employee, EntityKind, LocalStore, PendingChange, Room,
};

use crate::config::SyncConfig;

/// Result of one sync direction (or a full cycle).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// At least one change was replayed or one entity type imported.
    Progress,
    /// Reachable, but there was nothing to do (or nothing succeeded).
    NoProgress,
    /// No network path; skipped without touching the outbox.
    Offline,
    /// Another cycle was already in flight; this request was a no-op.
    AlreadySyncing,
}

/// Coordinates outbox replay and snapshot pull against one store and
/// one gateway. Construct one per process and share via `Arc`.
pub struct SyncOrchestrator {
    store: Arc<LocalStore>,
    gateway: Arc<dyn RemoteGateway>,
    online_rx: watch::Receiver<bool>,
    syncing: AtomicBool,
    last_sync_time: Mutex<Option<DateTime<Utc>>>,
    config: SyncConfig,
}

struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SyncOrchestrator {
    pub fn new(
        store: Arc<LocalStore>,
        gateway: Arc<dyn RemoteGateway>,
        online_rx: watch::Receiver<bool>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            online_rx,
            syncing: AtomicBool::new(false),
            last_sync_time: Mutex::new(None),
            config,
        }
    }

    pub fn is_online(&self) -> bool {
        *self.online_rx.borrow()
    }

    /// "Is syncing" signal for presentation layers.
    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }

    /// Queued-change count signal for presentation layers.
    pub fn pending_count(&self) -> Result<u64> {
        Ok(self.store.pending_count()?)
    }

    pub fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        *self.lock_last_sync()
    }

    fn lock_last_sync(&self) -> MutexGuard<'_, Option<DateTime<Utc>>> {
        self.last_sync_time
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn begin_cycle(&self) -> Option<CycleGuard<'_>> {
        self.syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| CycleGuard(&self.syncing))
    }

    /// Drain the outbox to the remote authority.
    pub async fn sync_to_server(&self) -> Result<SyncOutcome> {
        let Some(_guard) = self.begin_cycle() else {
            debug!("sync requested while a cycle is in flight");
            return Ok(SyncOutcome::AlreadySyncing);
        };
        self.push_outbox().await
    }

    /// Pull entity snapshots from the remote authority.
    pub async fn sync_from_server(&self) -> Result<SyncOutcome> {
        let Some(_guard) = self.begin_cycle() else {
            debug!("sync requested while a cycle is in flight");
            return Ok(SyncOutcome::AlreadySyncing);
        };
        self.pull_snapshot().await
    }

    /// Outbox replay then snapshot pull, each fault-isolated; overall
    /// progress if either direction made progress.
    pub async fn full_sync(&self) -> Result<SyncOutcome> {
        let Some(_guard) = self.begin_cycle() else {
            debug!("sync requested while a cycle is in flight");
            return Ok(SyncOutcome::AlreadySyncing);
        };
        let pushed = match self.push_outbox().await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(error = %err, "outbox drain failed");
                SyncOutcome::NoProgress
            }
        };
        let pulled = match self.pull_snapshot().await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(error = %err, "snapshot pull failed");
                SyncOutcome::NoProgress
            }
        };
        Ok(match (pushed, pulled) {
            (SyncOutcome::Progress, _) | (_, SyncOutcome::Progress) => SyncOutcome::Progress,
            (SyncOutcome::Offline, SyncOutcome::Offline) => SyncOutcome::Offline,
            _ => SyncOutcome::NoProgress,
        })
    }

    /// Opportunistic push after a successful local mutation. Quietly
    /// does nothing while offline or mid-cycle.
    pub async fn sync_after_mutation(&self) {
        if !self.is_online() {
            return;
        }
        match self.sync_to_server().await {
            Ok(outcome) => debug!(?outcome, "post-mutation sync"),
            Err(err) => warn!(error = %err, "post-mutation sync failed"),
        }
    }

    /// Watch the reachability signal and run a debounced full sync on
    /// every offline→online transition.
    pub fn spawn_reconnect_trigger(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            let mut rx = orchestrator.online_rx.clone();
            let mut was_online = *rx.borrow();
            while rx.changed().await.is_ok() {
                let online = *rx.borrow();
                if online && !was_online {
                    let debounce = Duration::from_millis(orchestrator.config.reconnect_debounce_ms);
                    tokio::time::sleep(debounce).await;
                    if !*rx.borrow() {
                        // Went offline again during the debounce window.
                        was_online = false;
                        continue;
                    }
                    info!("network restored; starting sync");
                    if let Err(err) = orchestrator.full_sync().await {
                        error!(error = %err, "reconnect sync failed");
                    }
                }
                was_online = *rx.borrow();
            }
        })
    }

    async fn push_outbox(&self) -> Result<SyncOutcome> {
        if !self.is_online() {
            debug!("offline; skipping outbox drain");
            return Ok(SyncOutcome::Offline);
        }
        let pending = self.store.drain()?;
        if pending.is_empty() {
            debug!("outbox empty");
            return Ok(SyncOutcome::NoProgress);
        }
        let total = pending.len();
        let mut replayed = 0usize;
        for change in pending {
            match self.dispatch(&change).await {
                Ok(()) => {
                    self.store.discard(&change.id)?;
                    replayed += 1;
                }
                Err(err) => {
                    // Leave it queued for the next cycle; one bad record
                    // must not block the rest.
                    warn!(change_id = %change.id, error = %err, "replay failed; change stays queued");
                }
            }
        }
        info!(replayed, total, "outbox drain finished");
        Ok(SyncOutcome::Progress)
    }

    async fn dispatch(&self, change: &PendingChange) -> Result<()> {
        #[derive(Deserialize)]
        struct IdPayload {
            id: i64,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct PairPayload {
            employee_id: i64,
            room_id: i64,
        }
        #[derive(Deserialize)]
        struct RoomsPayload {
            rooms: Vec<Room>,
        }
        #[derive(Deserialize)]
        struct EmployeesPayload {
            employees: Vec<Employee>,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct AccessRightsPayload {
            access_rights: Vec<AccessRight>,
        }

        let data = change.data.clone();
        match (change.operation, change.entity) {
            (ChangeOp::Create, EntityKind::Room) => {
                let room: Room = serde_json::from_value(data)?;
                self.gateway.create_room(&room).await?;
            }
            (ChangeOp::Update, EntityKind::Room) => {
                let room: Room = serde_json::from_value(data)?;
                self.gateway.update_room(&room).await?;
            }
            (ChangeOp::Delete, EntityKind::Room) => {
                let payload: IdPayload = serde_json::from_value(data)?;
                self.gateway.delete_room(payload.id).await?;
            }
            (ChangeOp::Create, EntityKind::Employee) => {
                let employee: Employee = serde_json::from_value(data)?;
                self.gateway.create_employee(&employee).await?;
            }
            (ChangeOp::Update, EntityKind::Employee) => {
                let employee: Employee = serde_json::from_value(data)?;
                self.gateway.update_employee(&employee).await?;
            }
            (ChangeOp::Delete, EntityKind::Employee) => {
                let payload: IdPayload = serde_json::from_value(data)?;
                self.gateway.delete_employee(payload.id).await?;
            }
            (ChangeOp::Grant, EntityKind::Access) => {
                let pair: PairPayload = serde_json::from_value(data)?;
                self.gateway
                    .create_access_right(pair.employee_id, pair.room_id)
                    .await?;
            }
            (ChangeOp::Revoke, EntityKind::Access) => {
                let pair: PairPayload = serde_json::from_value(data)?;
                self.gateway
                    .delete_access_right(pair.employee_id, pair.room_id)
                    .await?;
            }
            (ChangeOp::Bulk, EntityKind::Room) => {
                let payload: RoomsPayload = serde_json::from_value(data)?;
                self.gateway.bulk_create_rooms(&payload.rooms).await?;
            }
            (ChangeOp::Bulk, EntityKind::Employee) => {
                let payload: EmployeesPayload = serde_json::from_value(data)?;
                self.gateway
                    .bulk_create_employees(&payload.employees)
                    .await?;
            }
            (ChangeOp::Bulk, EntityKind::Access) => {
                let payload: AccessRightsPayload = serde_json::from_value(data)?;
                self.gateway
                    .bulk_create_access_rights(&payload.access_rights)
                    .await?;
            }
            (operation, entity) => {
                return Err(anyhow!(
                    "malformed pending change: {} on {}",
                    operation.as_str(),
                    entity.as_str()
                ));
            }
        }
        Ok(())
    }

    async fn pull_snapshot(&self) -> Result<SyncOutcome> {
        if !self.is_online() {
            debug!("offline; skipping snapshot pull");
            return Ok(SyncOutcome::Offline);
        }
        let mut imported = false;
        imported |= self.pull_rooms().await;
        imported |= self.pull_employees().await;
        imported |= self.pull_access_rights().await;
        if imported {
            *self.lock_last_sync() = Some(Utc::now());
            info!("snapshot pull made progress");
            Ok(SyncOutcome::Progress)
        } else {
            Ok(SyncOutcome::NoProgress)
        }
    }

    async fn pull_rooms(&self) -> bool {
        match self.gateway.fetch_rooms(None).await {
            Ok(rooms) if rooms.is_empty() => {
                debug!("remote has no rooms");
                false
            }
            Ok(rooms) => match self.store.import_rooms(&rooms) {
                Ok(count) => {
                    debug!(count, "imported rooms");
                    true
                }
                Err(err) => {
                    warn!(error = %err, "room import failed");
                    false
                }
            },
            Err(err) => {
                warn!(error = %err, "room snapshot fetch failed");
                false
            }
        }
    }

    async fn pull_employees(&self) -> bool {
        match self.gateway.fetch_employees(None).await {
            Ok(employees) if employees.is_empty() => {
                debug!("remote has no employees");
                false
            }
            Ok(employees) => match self.store.import_employees(&employees) {
                Ok(count) => {
                    debug!(count, "imported employees");
                    true
                }
                Err(err) => {
                    warn!(error = %err, "employee import failed");
                    false
                }
            },
            Err(err) => {
                warn!(error = %err, "employee snapshot fetch failed");
                false
            }
        }
    }

    async fn pull_access_rights(&self) -> bool {
        match self.gateway.fetch_access_rights(None, None).await {
            Ok(rights) if rights.is_empty() => {
                debug!("remote has no access rights");
                false
            }
            Ok(rights) => match self.store.import_access_rights(&rights) {
                Ok(count) => {
                    debug!(count, "imported access rights");
                    true
                }
                Err(err) => {
                    warn!(error = %err, "access-right import failed");
                    false
                }
            },
            Err(err) => {
                warn!(error = %err, "access-right snapshot fetch failed");
                false
            }
        }
    }
}
