//! The per-connection contract between a [`Session`][crate::Session] and the
//! code that gives calls their meaning.

use async_trait::async_trait;
use fleet_types::{Call, FleetError, ReplyValue};

use crate::session::PeerHandle;

/// Answers inbound calls for one connection.
///
/// # Contract
///
/// * `handle_call` – invoked once per inbound call, strictly in arrival
///   order.  `peer` may be used to call back into the remote side while the
///   inbound call is in progress; replies to those calls are delivered
///   independently, so awaiting them here cannot stall the connection.
///
/// * `on_disconnect` – invoked exactly once, after the connection is gone and
///   every inbound call already received has been answered.
#[async_trait]
pub trait CallHandler: Send + Sync + 'static {
    async fn handle_call(&self, peer: &PeerHandle, call: Call) -> Result<ReplyValue, FleetError>;

    async fn on_disconnect(&self) {}
}

/// Handler for connections that only ever make calls (the query tool).
pub struct NoInboundCalls;

#[async_trait]
impl CallHandler for NoInboundCalls {
    async fn handle_call(&self, _peer: &PeerHandle, call: Call) -> Result<ReplyValue, FleetError> {
        Err(FleetError::UnsupportedCall(call.method().to_string()))
    }
}
