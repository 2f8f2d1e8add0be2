//! Lap accounting, standings and collision records.

use std::time::Duration;

use tracing::debug;

use crate::driver::{Collision, CollisionKind};
use crate::events::{
    CollisionWithCar, CollisionWithEnvironment, DriverGuid, LapCompleted, SessionType,
};

use super::{format_duration, meters_per_second_to_kmh, RaceControl, RaceControlError};

impl RaceControl {
    /// Handles a completed lap: updates the driver's per-car statistics,
    /// re-sorts the standings and recomputes the affected splits.
    pub(crate) fn on_lap_completed(&self, lap: &LapCompleted) -> Result<(), RaceControlError> {
        let driver = self.find_connected_driver_by_car_id(lap.car_id)?;
        let guid = driver.guid().clone();

        let lap_duration = Duration::from_millis(u64::from(lap.lap_time_ms));

        debug!(
            driver = %driver.car_info.driver_name,
            guid = %guid,
            lap = %format_duration(lap_duration),
            cuts = lap.cuts,
            "Lap completed"
        );

        let now = self.clock.now();

        self.connected.update(&guid, |driver| {
            driver.total_num_laps += 1;

            let car = driver.current_car_mut();
            car.total_lap_time += lap_duration;
            car.last_lap = lap_duration;
            car.num_laps += 1;
            car.last_lap_completed_at = Some(now);

            if lap.cuts == 0 && (lap_duration < car.best_lap || car.best_lap.is_zero()) {
                car.best_lap = lap_duration;
                car.top_speed_best_lap = car.top_speed_this_lap;
            }

            car.top_speed_this_lap = 0.0;
        });

        let session_type = self.session_type();
        self.connected.sort(session_type);

        if session_type == SessionType::Race {
            self.compute_race_split(&guid);
        } else {
            self.compute_best_lap_splits();
        }

        Ok(())
    }

    /// Race gap: time behind the driver immediately ahead, or a lap count
    /// when more than a lap down. Only the lap completer's split changes.
    fn compute_race_split(&self, guid: &DriverGuid) {
        let Some(driver) = self.connected.get(guid) else {
            return;
        };

        if driver.position == 1 {
            self.connected.update(guid, |driver| {
                driver.split = "0s".to_owned();
            });
            return;
        }

        let mut ahead: Option<(u32, Duration)> = None;
        self.connected.each(|other| {
            if other.position == driver.position - 1 {
                let car = other.current_car();
                ahead = Some((car.num_laps, car.total_lap_time));
            }
        });

        let Some((ahead_laps, ahead_total)) = ahead else {
            return;
        };

        let car = driver.current_car();
        let lap_difference = i64::from(ahead_laps) - i64::from(car.num_laps);

        let split = if lap_difference <= 0 {
            format_duration(car.total_lap_time.saturating_sub(ahead_total))
        } else if lap_difference == 1 {
            "1 lap".to_owned()
        } else {
            format!("{lap_difference} laps")
        };

        self.connected.update(guid, |driver| {
            driver.split = split;
        });
    }

    /// Non-race gap: best-lap difference to the next-faster driver, walked
    /// in presentation order.
    fn compute_best_lap_splits(&self) {
        let mut previous_best: Option<Duration> = None;

        self.connected.each_mut(|driver| {
            let best = driver.current_car().best_lap;

            driver.split = match previous_best {
                None => "0s".to_owned(),
                Some(prev) => {
                    if best >= prev && !best.is_zero() {
                        format_duration(best - prev)
                    } else {
                        String::new()
                    }
                }
            };

            previous_best = Some(best);
        });
    }

    /// Records a car-to-car collision against the reporting driver,
    /// resolving the other party when possible.
    pub(crate) fn on_collision_with_car(
        &self,
        collision: &CollisionWithCar,
    ) -> Result<(), RaceControlError> {
        let driver = self.find_connected_driver_by_car_id(collision.car_id)?;

        let mut record = Collision::new(
            CollisionKind::WithCar,
            self.clock.now(),
            meters_per_second_to_kmh(f64::from(collision.impact_speed)),
        );

        // the other slot may already be empty; record the collision anyway
        if let Ok(other) = self.find_connected_driver_by_car_id(collision.other_car_id) {
            record.other_driver_guid = Some(other.car_info.driver_guid.clone());
            record.other_driver_name = Some(other.car_info.driver_name.clone());
        }

        debug!(
            driver = %driver.car_info.driver_name,
            speed_kmh = record.speed,
            "Collision with car"
        );

        self.connected.update(driver.guid(), |driver| {
            driver.collisions.push(record);
        });

        Ok(())
    }

    /// Records a collision with the environment against the reporting
    /// driver.
    pub(crate) fn on_collision_with_environment(
        &self,
        collision: &CollisionWithEnvironment,
    ) -> Result<(), RaceControlError> {
        let driver = self.find_connected_driver_by_car_id(collision.car_id)?;

        let record = Collision::new(
            CollisionKind::WithEnvironment,
            self.clock.now(),
            meters_per_second_to_kmh(f64::from(collision.impact_speed)),
        );

        debug!(
            driver = %driver.car_info.driver_name,
            speed_kmh = record.speed,
            "Collision with environment"
        );

        self.connected.update(driver.guid(), |driver| {
            driver.collisions.push(record);
        });

        Ok(())
    }
}
