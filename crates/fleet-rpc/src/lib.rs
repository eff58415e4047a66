//! `fleet-rpc` – bidirectional call/reply sessions over a WebSocket.
//!
//! A coordinator connection carries calls in both directions: vehicles call
//! the coordinator (`Register`, `UpdateStats`, …) and the coordinator calls
//! back into the vehicle mid-request (`ReportDriveStatus`, `ExecuteCommand`).
//! This crate owns the plumbing and knows nothing about what the calls mean.
//!
//! # Modules
//!
//! - [`handler`] – [`CallHandler`], the trait each side implements to answer
//!   inbound calls and to observe disconnection.
//! - [`session`] – [`Session`] / [`PeerHandle`]: one task per connection that
//!   routes replies to waiting callers, dispatches inbound calls in arrival
//!   order and bounds every outbound call with a timeout.

pub mod handler;
pub mod session;

pub use handler::{CallHandler, NoInboundCalls};
pub use session::{
    DEFAULT_CALL_TIMEOUT, PeerHandle, Session, SessionConfig, accept, connect, spawn_session,
};
