//! `fleet-types` – shared vocabulary of the fleet coordinator.
//!
//! Everything that crosses a crate boundary or the wire lives here: the
//! [`Vehicle`] record, the [`VehicleStats`] payload a vehicle reports, the
//! drive-status and command vocabulary, the [`QueryFilter`] grammar, the
//! [`wire`] frames and the global [`FleetError`].

pub mod wire;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use wire::{ACK_OK, Call, Frame, ReplyValue};

/// One tracked vehicle as held by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vehicle {
    pub vin: String,
    pub x: i64,
    pub y: i64,
    /// 0 means parked.
    pub speed: u32,
    /// Free-form on the wire; see [`DriveStatus`] for the values rules act on.
    pub drive_status: String,
    pub is_pacer: bool,
    /// Registration time or time of the last stats update.
    pub updated_at: DateTime<Utc>,
}

impl Vehicle {
    /// A freshly registered vehicle: origin, stopped, no status, not pacer.
    pub fn new(vin: impl Into<String>) -> Self {
        Self {
            vin: vin.into(),
            x: 0,
            y: 0,
            speed: 0,
            drive_status: String::new(),
            is_pacer: false,
            updated_at: Utc::now(),
        }
    }

    /// Overwrite position, speed and status from `stats`, keeping `vin` and
    /// `is_pacer`.
    pub fn apply(&mut self, stats: &VehicleStats) {
        self.x = stats.x;
        self.y = stats.y;
        self.speed = stats.speed;
        self.drive_status = stats.drive_status.clone();
        self.updated_at = Utc::now();
    }
}

/// Payload of an `UpdateStats` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleStats {
    pub vin: String,
    pub x: i64,
    pub y: i64,
    pub speed: u32,
    pub drive_status: String,
}

impl VehicleStats {
    /// The reported status, if it is one the coordinator understands.
    pub fn drive_status(&self) -> Option<DriveStatus> {
        DriveStatus::parse(&self.drive_status)
    }
}

/// Drive states that business rules react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriveStatus {
    Parked,
    Driving,
    Reverse,
}

impl DriveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriveStatus::Parked => "parked",
            DriveStatus::Driving => "driving",
            DriveStatus::Reverse => "reverse",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "parked" => Some(DriveStatus::Parked),
            "driving" => Some(DriveStatus::Driving),
            "reverse" => Some(DriveStatus::Reverse),
            _ => None,
        }
    }
}

impl fmt::Display for DriveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Commands the coordinator may push to a vehicle via `ExecuteCommand`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VehicleCommand {
    Honk,
    ToggleHeadlights,
    ToggleDoorLock,
}

impl VehicleCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleCommand::Honk => "honk",
            VehicleCommand::ToggleHeadlights => "toggle headlights",
            VehicleCommand::ToggleDoorLock => "toggle door lock",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "honk" => Some(VehicleCommand::Honk),
            "toggle headlights" => Some(VehicleCommand::ToggleHeadlights),
            "toggle door lock" => Some(VehicleCommand::ToggleDoorLock),
            _ => None,
        }
    }
}

impl fmt::Display for VehicleCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which records a `Query` call selects.
///
/// The textual grammar is `all` or `vin <id>`, optionally prefixed with the
/// query tool's `show` verb.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryFilter {
    All,
    Vin(String),
}

impl QueryFilter {
    /// Parse a query command.  Returns `None` for anything outside the
    /// grammar.
    pub fn parse(command: &str) -> Option<Self> {
        let mut words = command.split_whitespace().peekable();
        if words.peek() == Some(&"show") {
            words.next();
        }
        match (words.next(), words.next(), words.next()) {
            (Some("all"), None, None) => Some(QueryFilter::All),
            (Some("vin"), Some(vin), None) => Some(QueryFilter::Vin(vin.to_string())),
            _ => None,
        }
    }
}

impl fmt::Display for QueryFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryFilter::All => f.write_str("all"),
            QueryFilter::Vin(vin) => write!(f, "vin {vin}"),
        }
    }
}

/// Global error type.  Serialisable because protocol failures travel back to
/// the caller inside a reply frame.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FleetError {
    #[error("vehicle {0} is already registered")]
    DuplicateVin(String),

    #[error("vehicle {0} is not registered")]
    UnknownVin(String),

    #[error("connection is already bound to vehicle {0}")]
    AlreadyBound(String),

    #[error("call {0} is not supported by this peer")]
    UnsupportedCall(String),

    #[error("{method} call timed out after {after_ms} ms")]
    Timeout { method: String, after_ms: u64 },

    #[error("peer disconnected")]
    Disconnected,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("cannot bind {addr}: {details}")]
    Bind { addr: String, details: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(vin: &str, speed: u32, status: &str) -> VehicleStats {
        VehicleStats {
            vin: vin.to_string(),
            x: 3,
            y: -4,
            speed,
            drive_status: status.to_string(),
        }
    }

    #[test]
    fn new_vehicle_starts_at_rest() {
        let v = Vehicle::new("J1A2B3");
        assert_eq!(v.vin, "J1A2B3");
        assert_eq!((v.x, v.y, v.speed), (0, 0, 0));
        assert!(v.drive_status.is_empty());
        assert!(!v.is_pacer);
    }

    #[test]
    fn apply_keeps_identity_and_pacer_flag() {
        let mut v = Vehicle::new("J1A2B3");
        v.is_pacer = true;
        v.apply(&stats("ignored", 42, "driving"));
        assert_eq!(v.vin, "J1A2B3");
        assert!(v.is_pacer);
        assert_eq!((v.x, v.y, v.speed), (3, -4, 42));
        assert_eq!(v.drive_status, "driving");
    }

    #[test]
    fn drive_status_only_matches_known_values() {
        assert_eq!(stats("a", 1, "reverse").drive_status(), Some(DriveStatus::Reverse));
        assert_eq!(stats("a", 0, "parked").drive_status(), Some(DriveStatus::Parked));
        assert_eq!(stats("a", 1, "Reverse").drive_status(), None);
        assert_eq!(stats("a", 1, "").drive_status(), None);
    }

    #[test]
    fn vehicle_command_vocabulary() {
        for cmd in [
            VehicleCommand::Honk,
            VehicleCommand::ToggleHeadlights,
            VehicleCommand::ToggleDoorLock,
        ] {
            assert_eq!(VehicleCommand::parse(cmd.as_str()), Some(cmd));
        }
        assert_eq!(VehicleCommand::parse("launch"), None);
    }

    #[test]
    fn query_filter_grammar() {
        assert_eq!(QueryFilter::parse("all"), Some(QueryFilter::All));
        assert_eq!(QueryFilter::parse("show all"), Some(QueryFilter::All));
        assert_eq!(
            QueryFilter::parse("vin J1A2B3"),
            Some(QueryFilter::Vin("J1A2B3".to_string()))
        );
        assert_eq!(
            QueryFilter::parse("  show   vin   J9  "),
            Some(QueryFilter::Vin("J9".to_string()))
        );
        assert_eq!(QueryFilter::parse("vin"), None);
        assert_eq!(QueryFilter::parse("show"), None);
        assert_eq!(QueryFilter::parse("all extra"), None);
        assert_eq!(QueryFilter::parse(""), None);
    }

    #[test]
    fn query_filter_display_is_parseable() {
        let filter = QueryFilter::Vin("J77".to_string());
        assert_eq!(filter.to_string(), "vin J77");
        assert_eq!(QueryFilter::parse(&filter.to_string()), Some(filter));
    }

    #[test]
    fn fleet_error_display() {
        let err = FleetError::DuplicateVin("J1".to_string());
        assert!(err.to_string().contains("already registered"));

        let err = FleetError::Timeout {
            method: "ReportDriveStatus".to_string(),
            after_ms: 250,
        };
        assert_eq!(err.to_string(), "ReportDriveStatus call timed out after 250 ms");
    }
}
