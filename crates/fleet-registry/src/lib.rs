//! `fleet-registry` – the authoritative in-memory store of connected vehicles.
//!
//! [`Registry`] owns the VIN → [`Vehicle`] map and the pace-vehicle
//! designation behind a single mutex.  Callers only ever see copies; every
//! mutation goes through one of the atomic operations below, so no caller can
//! read a record, change it and write it back non-atomically.
//!
//! # Pacer election
//!
//! Whenever the registry notices a pacer vacancy (first vehicle in, pacer
//! out) it submits an election pass as a separate unit of work: a task on the
//! ambient tokio runtime, or a plain thread when there is none.  The pass
//! takes the lock itself, so it never runs inside the critical section that
//! discovered the vacancy.  At most one pass is queued at a time; vacancies
//! seen while one is pending ride on it.  Electing when a pacer already
//! exists is a no-op.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use fleet_types::{FleetError, QueryFilter, Vehicle, VehicleStats};
use tracing::{debug, info, warn};

/// Shared vehicle registry.  Clone it cheaply – all clones share the same
/// state.
#[derive(Clone, Default)]
pub struct Registry {
    state: Arc<Mutex<FleetState>>,
}

/// Identifies the connection that registered a vehicle.
pub type OwnerId = u64;

#[derive(Default)]
struct FleetState {
    vehicles: HashMap<String, Vehicle>,
    owners: HashMap<String, OwnerId>,
    pacer: Option<String>,
    election_pending: bool,
}

impl FleetState {
    /// Reserve the single election slot.  False when a pass is already queued.
    fn claim_election(&mut self) -> bool {
        if self.election_pending {
            return false;
        }
        self.election_pending = true;
        true
    }

    /// Drop `vin` and its owner.  The flag is true when an election pass
    /// must be scheduled.
    fn remove(&mut self, vin: &str) -> Option<(Vehicle, bool)> {
        let removed = self.vehicles.remove(vin)?;
        self.owners.remove(vin);
        let mut schedule = false;
        if removed.is_pacer {
            self.pacer = None;
            info!(vin, "pacer left, electing a replacement");
            schedule = self.claim_election();
        }
        info!(vin, vehicles = self.vehicles.len(), "vehicle unregistered");
        Some((removed, schedule))
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fresh record for `vin`.
    ///
    /// # Errors
    ///
    /// [`FleetError::DuplicateVin`] if `vin` is already registered; the
    /// existing record is left untouched.
    pub fn register(&self, vin: &str) -> Result<(), FleetError> {
        self.insert(vin, None)
    }

    /// [`register`](Self::register), remembering `owner` so that only the
    /// same owner can later remove the record with
    /// [`unregister_owned`](Self::unregister_owned).
    ///
    /// # Errors
    ///
    /// [`FleetError::DuplicateVin`] if `vin` is already registered.
    pub fn register_owned(&self, vin: &str, owner: OwnerId) -> Result<(), FleetError> {
        self.insert(vin, Some(owner))
    }

    fn insert(&self, vin: &str, owner: Option<OwnerId>) -> Result<(), FleetError> {
        let schedule = {
            let mut state = self.lock();
            if state.vehicles.contains_key(vin) {
                warn!(vin, "duplicate registration rejected");
                return Err(FleetError::DuplicateVin(vin.to_string()));
            }
            state.vehicles.insert(vin.to_string(), Vehicle::new(vin));
            if let Some(owner) = owner {
                state.owners.insert(vin.to_string(), owner);
            }
            info!(vin, vehicles = state.vehicles.len(), "vehicle registered");
            state.pacer.is_none() && state.claim_election()
        };
        if schedule {
            self.schedule_election();
        }
        Ok(())
    }

    /// Remove the record for `vin` and return it.
    ///
    /// # Errors
    ///
    /// [`FleetError::UnknownVin`] if `vin` is not registered.
    pub fn unregister(&self, vin: &str) -> Result<Vehicle, FleetError> {
        let removed = self.lock().remove(vin);
        let Some((removed, schedule)) = removed else {
            warn!(vin, "unregister of unknown vehicle rejected");
            return Err(FleetError::UnknownVin(vin.to_string()));
        };
        if schedule {
            self.schedule_election();
        }
        Ok(removed)
    }

    /// Remove `vin` only if `owner` registered the current record.  Returns
    /// `None` when the VIN is gone or now belongs to someone else.
    pub fn unregister_owned(&self, vin: &str, owner: OwnerId) -> Option<Vehicle> {
        let removed = {
            let mut state = self.lock();
            if state.owners.get(vin) != Some(&owner) {
                debug!(vin, owner, "record not held by this owner, left in place");
                return None;
            }
            state.remove(vin)
        };
        let (removed, schedule) = removed?;
        if schedule {
            self.schedule_election();
        }
        Some(removed)
    }

    /// Overwrite position, speed and drive status of `stats.vin`.  The pacer
    /// flag is preserved.  Returns the updated record.
    ///
    /// # Errors
    ///
    /// [`FleetError::UnknownVin`] if the vehicle is not registered; nothing is
    /// created in that case.
    pub fn update_stats(&self, stats: &VehicleStats) -> Result<Vehicle, FleetError> {
        let mut state = self.lock();
        let Some(vehicle) = state.vehicles.get_mut(&stats.vin) else {
            warn!(vin = %stats.vin, "stats update for unknown vehicle rejected");
            return Err(FleetError::UnknownVin(stats.vin.clone()));
        };
        vehicle.apply(stats);
        debug!(
            vin = %vehicle.vin,
            is_pacer = vehicle.is_pacer,
            x = vehicle.x,
            y = vehicle.y,
            speed = vehicle.speed,
            drive_status = %vehicle.drive_status,
            "stats updated"
        );
        Ok(vehicle.clone())
    }

    /// Copies of the records selected by `filter`.  Order is unspecified for
    /// [`QueryFilter::All`]; a VIN miss yields an empty list.
    pub fn query(&self, filter: &QueryFilter) -> Vec<Vehicle> {
        let state = self.lock();
        match filter {
            QueryFilter::All => state.vehicles.values().cloned().collect(),
            QueryFilter::Vin(vin) => state.vehicles.get(vin).cloned().into_iter().collect(),
        }
    }

    /// Designate a pacer if there is none and the registry is not empty.
    ///
    /// Which record wins is arbitrary.  Returns the newly elected VIN, or
    /// `None` when nothing changed.
    pub fn elect_pacer(&self) -> Option<String> {
        let mut state = self.lock();
        state.election_pending = false;
        if state.pacer.is_some() {
            return None;
        }
        let vin = state.vehicles.keys().next()?.clone();
        if let Some(vehicle) = state.vehicles.get_mut(&vin) {
            vehicle.is_pacer = true;
        }
        state.pacer = Some(vin.clone());
        info!(vin = %vin, "pacer elected");
        Some(vin)
    }

    /// VIN of the current pacer.
    pub fn pacer(&self) -> Option<String> {
        self.lock().pacer.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().vehicles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().vehicles.is_empty()
    }

    /// VINs whose last update is older than `max_age`.  The order of the
    /// returned list is unspecified.
    pub fn stale(&self, max_age: Duration) -> Vec<String> {
        let now = Utc::now();
        self.lock()
            .vehicles
            .values()
            .filter(|v| {
                now.signed_duration_since(v.updated_at)
                    .to_std()
                    .is_ok_and(|age| age > max_age)
            })
            .map(|v| v.vin.clone())
            .collect()
    }

    fn schedule_election(&self) {
        let registry = self.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    registry.elect_pacer();
                });
            }
            Err(_) => {
                std::thread::spawn(move || {
                    registry.elect_pacer();
                });
            }
        }
    }

    // A panic while holding the lock cannot leave the map half-written: every
    // critical section is a single map operation.
    fn lock(&self) -> MutexGuard<'_, FleetState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
