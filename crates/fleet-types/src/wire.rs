//! JSON frames exchanged over a coordinator connection.
//!
//! Both ends may issue calls on the same connection.  Each side allocates ids
//! for its own calls; a [`Frame::Reply`] carries the id of the call it
//! answers.
//!
//! ```json
//! {"kind":"call","id":7,"call":{"method":"Register","params":"J1A2B3"}}
//! {"kind":"reply","id":7,"result":{"Ok":{"type":"Ack","value":0}}}
//! ```

use serde::{Deserialize, Serialize};

use crate::{FleetError, Vehicle, VehicleStats};

/// Acknowledgement code returned by successful mutating calls.
pub const ACK_OK: i32 = 0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Frame {
    Call {
        id: u64,
        call: Call,
    },
    Reply {
        id: u64,
        result: Result<ReplyValue, FleetError>,
    },
}

/// Every remote operation, in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum Call {
    // vehicle / query tool -> coordinator
    Register(String),
    UnRegister(String),
    UpdateStats(VehicleStats),
    Query(String),

    // coordinator -> vehicle
    /// The argument is unused.
    ReportDriveStatus(i32),
    ExecuteCommand(String),
}

impl Call {
    /// Method name, for logs and error messages.
    pub fn method(&self) -> &'static str {
        match self {
            Call::Register(_) => "Register",
            Call::UnRegister(_) => "UnRegister",
            Call::UpdateStats(_) => "UpdateStats",
            Call::Query(_) => "Query",
            Call::ReportDriveStatus(_) => "ReportDriveStatus",
            Call::ExecuteCommand(_) => "ExecuteCommand",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum ReplyValue {
    Ack(i32),
    Vehicles(Vec<Vehicle>),
    DriveStatus(String),
    /// 0 = executed, -1 = unknown command.
    CommandResult(i32),
}
