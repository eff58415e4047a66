//! [`VehicleResponder`] – the vehicle's side of coordinator-initiated calls.

use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use fleet_rpc::{CallHandler, PeerHandle};
use fleet_types::{ACK_OK, Call, DriveStatus, FleetError, ReplyValue, VehicleCommand};
use tracing::{info, warn};

/// Result code for a command the vehicle does not understand.
pub const UNKNOWN_COMMAND: i32 = -1;

#[derive(Debug)]
struct Cabin {
    drive_status: DriveStatus,
    headlights_on: bool,
    doors_locked: bool,
}

/// Tracks what the vehicle is doing so it can answer the coordinator.
///
/// Shared between the report loop, which updates the drive status, and the
/// session, which answers calls.
#[derive(Debug)]
pub struct VehicleResponder {
    vin: String,
    cabin: Mutex<Cabin>,
}

impl VehicleResponder {
    pub fn new(vin: impl Into<String>) -> Self {
        Self {
            vin: vin.into(),
            cabin: Mutex::new(Cabin {
                drive_status: DriveStatus::Parked,
                headlights_on: false,
                doors_locked: false,
            }),
        }
    }

    pub fn drive_status(&self) -> DriveStatus {
        self.cabin().drive_status
    }

    pub fn set_drive_status(&self, status: DriveStatus) {
        self.cabin().drive_status = status;
    }

    pub fn headlights_on(&self) -> bool {
        self.cabin().headlights_on
    }

    pub fn doors_locked(&self) -> bool {
        self.cabin().doors_locked
    }

    /// Carry out `command`.  Returns [`ACK_OK`] or [`UNKNOWN_COMMAND`].
    pub fn execute(&self, command: &str) -> i32 {
        let Some(command) = VehicleCommand::parse(command) else {
            warn!(vin = %self.vin, command, "unknown command");
            return UNKNOWN_COMMAND;
        };
        let mut cabin = self.cabin();
        match command {
            VehicleCommand::Honk => {}
            VehicleCommand::ToggleHeadlights => cabin.headlights_on = !cabin.headlights_on,
            VehicleCommand::ToggleDoorLock => cabin.doors_locked = !cabin.doors_locked,
        }
        info!(
            vin = %self.vin,
            %command,
            headlights_on = cabin.headlights_on,
            doors_locked = cabin.doors_locked,
            "command executed"
        );
        ACK_OK
    }

    fn cabin(&self) -> MutexGuard<'_, Cabin> {
        self.cabin.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl CallHandler for VehicleResponder {
    async fn handle_call(&self, _peer: &PeerHandle, call: Call) -> Result<ReplyValue, FleetError> {
        match call {
            Call::ReportDriveStatus(_) => {
                Ok(ReplyValue::DriveStatus(self.drive_status().to_string()))
            }
            Call::ExecuteCommand(command) => Ok(ReplyValue::CommandResult(self.execute(&command))),
            other => Err(FleetError::UnsupportedCall(other.method().to_string())),
        }
    }

    async fn on_disconnect(&self) {
        info!(vin = %self.vin, "disconnected from coordinator");
    }
}
