//! Car-update handling: liveness detection and speed/position tracking.
//!
//! A per-identity counter tracks how many consecutive car-updates a driver
//! has missed. A client that stops updating (crash, alt-F4) is presumed
//! gone once it misses more than [`LIVENESS_MISS_FACTOR`] updates per
//! connected driver, and is disconnected through the normal handler.

use std::sync::Arc;

use tracing::{debug, error};

use crate::driver::CarInfo;
use crate::events::CarUpdate;

use super::{meters_per_second_to_kmh, RaceControl, RaceControlError};

/// Missed updates tolerated per connected driver before a client is
/// presumed crashed.
pub(crate) const LIVENESS_MISS_FACTOR: usize = 5;

impl RaceControl {
    /// Handles a real-time car update.
    ///
    /// Returns whether any driver was disconnected by the liveness check,
    /// which is the dispatcher's cue to broadcast.
    pub(crate) fn on_car_update(
        self: &Arc<Self>,
        update: &CarUpdate,
    ) -> Result<bool, RaceControlError> {
        let driver = self.find_connected_driver_by_car_id(update.car_id)?;

        // Collect stale drivers under the counter lock, disconnect after it
        // is released; the disconnect handler takes write locks of its own.
        let mut to_disconnect: Vec<CarInfo> = Vec::new();

        if let Ok(mut counters) = self.update_counters.write() {
            let threshold = self.connected.len() * LIVENESS_MISS_FACTOR;

            for (guid, missed) in counters.iter_mut() {
                *missed += 1;

                if *missed > threshold {
                    if let Some(stale) = self.connected.get(guid) {
                        to_disconnect.push(stale.car_info.clone());
                    }
                }
            }
        }

        for car_info in &to_disconnect {
            debug!(
                driver = %car_info.driver_name,
                guid = %car_info.driver_guid,
                "Driver has missed too many car updates, disconnecting"
            );

            if let Err(err) = self.disconnect_driver(car_info) {
                error!(
                    driver = %car_info.driver_name,
                    guid = %car_info.driver_guid,
                    error = %err,
                    "Could not disconnect driver"
                );
                continue;
            }
        }

        if let Ok(mut counters) = self.update_counters.write() {
            counters.insert(driver.car_info.driver_guid.clone(), 0);
        }

        let planar_speed = f64::from(update.velocity.x).hypot(f64::from(update.velocity.z));
        let speed_kmh = meters_per_second_to_kmh(planar_speed);

        let now = self.clock.now();
        self.connected.update(driver.guid(), |driver| {
            if speed_kmh > driver.current_car().top_speed_this_lap {
                driver.current_car_mut().top_speed_this_lap = speed_kmh;
            }
            driver.last_seen = Some(now);
            driver.last_pos = update.pos;
        });

        Ok(!to_disconnect.is_empty())
    }
}
