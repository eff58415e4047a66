//! `fleet-vehicle` – a simulated vehicle that drives itself around and keeps
//! the coordinator informed.
//!
//! - [`plan`] – [`MovementPlan`], the deterministic route the vehicle loops.
//! - [`responder`] – [`VehicleResponder`], answers the coordinator's status
//!   checks and commands.
//! - [`sim`] – [`VehicleSim`], the connect / register / report loop.

pub mod plan;
pub mod responder;
pub mod sim;

pub use plan::{Movement, MovementPlan};
pub use responder::VehicleResponder;
pub use sim::{SimConfig, VehicleSim, random_vin};
