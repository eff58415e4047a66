//! `fleet-server` – the coordinator side of the fleet protocol.
//!
//! - [`handler`] – [`ConnectionHandler`], one per accepted connection: maps
//!   inbound calls onto [`Registry`][fleet_registry::Registry] operations and
//!   pushes status checks and commands back to the vehicle.
//! - [`server`] – [`FleetServer`], the accept loop with its housekeeping tick.

pub mod handler;
pub mod server;

pub use handler::ConnectionHandler;
pub use server::{DEFAULT_ADDR, FleetServer, ServerConfig};
