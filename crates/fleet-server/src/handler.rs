//! [`ConnectionHandler`] – the coordinator's answer to each inbound call.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use fleet_registry::{OwnerId, Registry};
use fleet_rpc::{CallHandler, PeerHandle};
use fleet_types::{
    ACK_OK, Call, DriveStatus, FleetError, QueryFilter, ReplyValue, VehicleCommand, VehicleStats,
};
use tracing::{debug, info, warn};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Per-connection protocol adapter.
///
/// Bound to at most one VIN, set by a successful `Register`.  When the
/// connection goes away the record it registered is removed, unless the
/// vehicle already unregistered or another connection has since taken the
/// VIN over.
pub struct ConnectionHandler {
    id: OwnerId,
    registry: Registry,
    peer_addr: String,
    bound_vin: Mutex<Option<String>>,
}

impl ConnectionHandler {
    pub fn new(registry: Registry, peer_addr: impl Into<String>) -> Self {
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            registry,
            peer_addr: peer_addr.into(),
            bound_vin: Mutex::new(None),
        }
    }

    /// VIN this connection registered, if any.
    pub fn bound_vin(&self) -> Option<String> {
        self.bound().clone()
    }

    // Lock order: `bound_vin` before the registry, never the reverse.
    fn bound(&self) -> MutexGuard<'_, Option<String>> {
        self.bound_vin.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, vin: String) -> Result<ReplyValue, FleetError> {
        let mut bound = self.bound();
        if let Some(existing) = bound.as_ref() {
            warn!(peer = %self.peer_addr, bound = %existing, vin = %vin, "second registration on one connection");
            return Err(FleetError::AlreadyBound(existing.clone()));
        }
        self.registry.register_owned(&vin, self.id)?;
        *bound = Some(vin);
        Ok(ReplyValue::Ack(ACK_OK))
    }

    fn unregister(&self, vin: String) -> Result<ReplyValue, FleetError> {
        let mut bound = self.bound();
        self.registry.unregister(&vin)?;
        if bound.as_deref() == Some(vin.as_str()) {
            *bound = None;
        }
        Ok(ReplyValue::Ack(ACK_OK))
    }

    async fn update_stats(
        &self,
        peer: &PeerHandle,
        stats: VehicleStats,
    ) -> Result<ReplyValue, FleetError> {
        if stats.speed == 0 {
            self.check_drive_status(peer, &stats.vin).await;
        }
        if stats.drive_status() == Some(DriveStatus::Reverse) {
            self.push_command(peer, &stats.vin, VehicleCommand::Honk).await;
        }
        self.registry.update_stats(&stats)?;
        Ok(ReplyValue::Ack(ACK_OK))
    }

    async fn check_drive_status(&self, peer: &PeerHandle, vin: &str) {
        match peer.call(Call::ReportDriveStatus(0)).await {
            Ok(ReplyValue::DriveStatus(status)) => {
                info!(vin, status = %status, "stopped vehicle reported drive status");
            }
            Ok(other) => warn!(vin, reply = ?other, "unexpected reply to drive status check"),
            Err(e) => warn!(vin, error = %e, "drive status check failed"),
        }
    }

    async fn push_command(&self, peer: &PeerHandle, vin: &str, command: VehicleCommand) {
        match peer.call(Call::ExecuteCommand(command.to_string())).await {
            Ok(ReplyValue::CommandResult(ACK_OK)) => info!(vin, %command, "command executed"),
            Ok(ReplyValue::CommandResult(code)) => {
                warn!(vin, %command, code, "vehicle refused command");
            }
            Ok(other) => warn!(vin, %command, reply = ?other, "unexpected reply to command"),
            Err(e) => warn!(vin, %command, error = %e, "command push failed"),
        }
    }

    fn query(&self, command: &str) -> ReplyValue {
        match QueryFilter::parse(command) {
            Some(filter) => ReplyValue::Vehicles(self.registry.query(&filter)),
            None => {
                warn!(peer = %self.peer_addr, command, "unrecognised query");
                ReplyValue::Vehicles(Vec::new())
            }
        }
    }
}

#[async_trait]
impl CallHandler for ConnectionHandler {
    async fn handle_call(&self, peer: &PeerHandle, call: Call) -> Result<ReplyValue, FleetError> {
        match call {
            Call::Register(vin) => self.register(vin),
            Call::UnRegister(vin) => self.unregister(vin),
            Call::UpdateStats(stats) => self.update_stats(peer, stats).await,
            Call::Query(command) => Ok(self.query(&command)),
            other @ (Call::ReportDriveStatus(_) | Call::ExecuteCommand(_)) => {
                Err(FleetError::UnsupportedCall(other.method().to_string()))
            }
        }
    }

    async fn on_disconnect(&self) {
        let vin = self.bound().take();
        match vin {
            Some(vin) => match self.registry.unregister_owned(&vin, self.id) {
                Some(_) => info!(peer = %self.peer_addr, vin = %vin, "vehicle dropped with its connection"),
                None => debug!(peer = %self.peer_addr, vin = %vin, "record already gone or re-registered elsewhere"),
            },
            None => debug!(peer = %self.peer_addr, "unbound connection closed"),
        }
    }
}
