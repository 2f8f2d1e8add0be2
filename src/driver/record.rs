//! Driver records and per-car lap statistics.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::events::{CarId, DriverGuid, Vec3};

/// What a collision was with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollisionKind {
    #[serde(rename = "with other car")]
    WithCar,
    #[serde(rename = "with environment")]
    WithEnvironment,
}

/// A recorded contact involving this driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collision {
    pub id: String,
    pub kind: CollisionKind,
    pub time: DateTime<Utc>,
    /// Impact speed in km/h.
    pub speed: f64,
    /// For car-car contact: the other party, when the other slot resolved
    /// to a connected driver.
    pub other_driver_guid: Option<DriverGuid>,
    pub other_driver_name: Option<String>,
}

impl Collision {
    pub fn new(kind: CollisionKind, time: DateTime<Utc>, speed_kmh: f64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            time,
            speed: speed_kmh,
            other_driver_guid: None,
            other_driver_name: None,
        }
    }
}

/// Current slot assignment and presentation data for a driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarInfo {
    pub car_id: CarId,
    pub driver_guid: DriverGuid,
    pub driver_name: String,
    pub driver_initials: String,
    pub car_model: String,
}

/// Lap statistics for one car model driven by a driver this session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarLapInfo {
    pub total_lap_time: Duration,
    pub last_lap: Duration,
    pub num_laps: u32,
    /// Minimum clean-lap duration, or zero if no clean lap yet.
    pub best_lap: Duration,
    /// Peak speed on the lap in progress, km/h.
    pub top_speed_this_lap: f64,
    /// Peak speed recorded on the best lap, km/h.
    pub top_speed_best_lap: f64,
    pub last_lap_completed_at: Option<DateTime<Utc>>,
}

impl CarLapInfo {
    pub const EMPTY: CarLapInfo = CarLapInfo {
        total_lap_time: Duration::ZERO,
        last_lap: Duration::ZERO,
        num_laps: 0,
        best_lap: Duration::ZERO,
        top_speed_this_lap: 0.0,
        top_speed_best_lap: 0.0,
        last_lap_completed_at: None,
    };

    pub fn has_best_lap(&self) -> bool {
        self.best_lap > Duration::ZERO
    }
}

impl Default for CarLapInfo {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Authoritative record for one driver identity.
///
/// Created on first connect, moved between the connected and disconnected
/// maps over the driver's lifecycle, and reset in place when a new session
/// empties car info.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    pub car_info: CarInfo,
    /// Per-car-model lap statistics for every car driven this session.
    pub cars: HashMap<String, CarLapInfo>,
    /// Laps completed across all cars this session.
    pub total_num_laps: u32,
    /// 1-based standing; valid only immediately after a sort.
    pub position: u32,
    /// Gap to the driver ahead; valid only immediately after a sort.
    pub split: String,
    pub connected_at: Option<DateTime<Utc>>,
    pub loaded_at: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub last_pos: Vec3,
    pub collisions: Vec<Collision>,
    /// Cancel handle of the in-flight swap supervisor, if one is running
    /// for this driver's slot.
    #[serde(skip)]
    pub swap_cancel: Option<CancellationToken>,
}

impl Driver {
    /// Creates a fresh record with an empty stats entry for the current car.
    pub fn new(car_info: CarInfo) -> Self {
        let mut cars = HashMap::new();
        cars.insert(car_info.car_model.clone(), CarLapInfo::default());

        Self {
            car_info,
            cars,
            total_num_laps: 0,
            position: 0,
            split: String::new(),
            connected_at: None,
            loaded_at: None,
            last_seen: None,
            last_pos: Vec3::ZERO,
            collisions: Vec::new(),
            swap_cancel: None,
        }
    }

    pub fn guid(&self) -> &DriverGuid {
        &self.car_info.driver_guid
    }

    /// Stats for the car currently in use.
    pub fn current_car(&self) -> &CarLapInfo {
        self.cars
            .get(&self.car_info.car_model)
            .unwrap_or(&CarLapInfo::EMPTY)
    }

    /// Mutable stats for the car currently in use, created if absent.
    pub fn current_car_mut(&mut self) -> &mut CarLapInfo {
        self.cars
            .entry(self.car_info.car_model.clone())
            .or_default()
    }

    /// Resets the record in place, keeping identity and slot assignment but
    /// zeroing all session statistics.
    pub fn reset(&mut self) {
        *self = Driver::new(self.car_info.clone());
    }
}

impl PartialEq for Driver {
    fn eq(&self, other: &Self) -> bool {
        // swap_cancel is a runtime handle, not driver state
        self.car_info == other.car_info
            && self.cars == other.cars
            && self.total_num_laps == other.total_num_laps
            && self.position == other.position
            && self.split == other.split
            && self.connected_at == other.connected_at
            && self.loaded_at == other.loaded_at
            && self.last_seen == other.last_seen
            && self.last_pos == other.last_pos
            && self.collisions == other.collisions
    }
}
