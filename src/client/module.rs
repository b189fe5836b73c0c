//! Per-role module slots.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::driver::DriverEvent;
use crate::conn::Connection;
use crate::core::{ClientError, ConnId, Protocol};
use crate::trans::ConnectionSource;

pub(crate) struct DriverHandle {
    pub tx: mpsc::UnboundedSender<DriverEvent>,
    pub task: JoinHandle<()>,
}

#[derive(Default)]
struct Slot {
    active: Option<Arc<Connection>>,
    driver: Option<DriverHandle>,
    /// Bumped on every start; a driver only publishes under its own.
    generation: u64,
}

/// Lifecycle and active connection of one protocol role.
pub(crate) struct ProtocolModule {
    protocol: Protocol,
    slot: Mutex<Slot>,
}

impl ProtocolModule {
    fn new(protocol: Protocol) -> Self {
        Self {
            protocol,
            slot: Mutex::new(Slot::default()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.slot.lock().driver.is_some()
    }

    /// Install a driver unless one is already running. `spawn` receives the
    /// generation the driver must present to [`set_active`](Self::set_active).
    /// Returns `false` if `spawn` was not called.
    pub fn start(&self, spawn: impl FnOnce(u64) -> DriverHandle) -> bool {
        let mut slot = self.slot.lock();
        if slot.driver.is_some() {
            return false;
        }
        slot.generation += 1;
        slot.driver = Some(spawn(slot.generation));
        true
    }

    /// Remove the driver and the active connection.
    pub fn stop(&self) -> Option<DriverHandle> {
        let mut slot = self.slot.lock();
        slot.active = None;
        slot.driver.take()
    }

    pub fn command(&self, event: DriverEvent) -> Result<(), ClientError> {
        let slot = self.slot.lock();
        let driver = slot
            .driver
            .as_ref()
            .ok_or(ClientError::NotInitialized(self.protocol))?;
        driver
            .tx
            .send(event)
            .map_err(|_| ClientError::NotInitialized(self.protocol))
    }

    pub fn active(&self) -> Option<Arc<Connection>> {
        self.slot
            .lock()
            .active
            .clone()
            .filter(|conn| conn.is_ready())
    }

    /// Publish `conn` as the role's connection. Rejected unless the driver of
    /// `generation` is still the installed one.
    pub fn set_active(&self, generation: u64, conn: Arc<Connection>) -> bool {
        let mut slot = self.slot.lock();
        if slot.driver.is_none() || slot.generation != generation {
            return false;
        }
        slot.active = Some(conn);
        true
    }

    pub fn clear_active(&self, conn_id: ConnId) {
        let mut slot = self.slot.lock();
        if slot.active.as_ref().is_some_and(|c| c.id() == conn_id) {
            slot.active = None;
        }
    }
}

/// All four role modules.
pub(crate) struct Modules([ProtocolModule; 4]);

impl Modules {
    pub fn new() -> Self {
        Self(Protocol::ALL.map(ProtocolModule::new))
    }

    pub fn get(&self, protocol: Protocol) -> &ProtocolModule {
        &self.0[protocol.index()]
    }
}

impl ConnectionSource for Modules {
    fn active_connection(&self, protocol: Protocol) -> Option<Arc<Connection>> {
        self.get(protocol).active()
    }
}
