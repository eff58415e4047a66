//! Scripted movement: park, back out, then drive a diagonal that lengthens
//! by two steps per report until the vehicle parks again.

use fleet_types::{DriveStatus, VehicleStats};

/// Position, speed and status for one report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Movement {
    pub x: i64,
    pub y: i64,
    pub speed: u32,
    pub status: DriveStatus,
}

impl Movement {
    pub fn stats(&self, vin: &str) -> VehicleStats {
        VehicleStats {
            vin: vin.to_string(),
            x: self.x,
            y: self.y,
            speed: self.speed,
            drive_status: self.status.to_string(),
        }
    }
}

/// Endless iterator over the route.
#[derive(Debug, Clone, Default)]
pub struct MovementPlan {
    counter: i64,
}

impl MovementPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next step of the route.
    pub fn advance(&mut self) -> Movement {
        let c = self.counter;
        let movement = match c {
            0 => Movement {
                x: 30,
                y: 20,
                speed: 0,
                status: DriveStatus::Parked,
            },
            -1 => Movement {
                x: 11 - c,
                y: 20 + c,
                speed: speed(10 - c),
                status: DriveStatus::Reverse,
            },
            _ => Movement {
                x: 30 - c,
                y: 20 + c,
                speed: speed(50 + c),
                status: DriveStatus::Driving,
            },
        };
        self.counter = match c {
            0 => -1,
            c if c > 20 => 0,
            c => c + 2,
        };
        movement
    }
}

impl Iterator for MovementPlan {
    type Item = Movement;

    fn next(&mut self) -> Option<Movement> {
        Some(self.advance())
    }
}

fn speed(value: i64) -> u32 {
    u32::try_from(value).unwrap_or(0)
}
