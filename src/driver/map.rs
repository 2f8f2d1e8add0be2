//! Ordered driver maps.
//!
//! The registry keeps two of these: one for connected drivers and one for
//! disconnected drivers with laps on the board. Each map embeds its own
//! read/write lock and keeps its entries in presentation order; the order
//! is only meaningful immediately after [`DriverMap::sort`].
//!
//! Iteration runs under the read lock. Callers that need to mutate drivers
//! found during iteration must collect the targets first and mutate after
//! the iteration ends; taking a write lock while iterating deadlocks.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::events::{DriverGuid, SessionType};

use super::record::Driver;

/// Which table a map represents. The sort policy differs between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverGroup {
    Connected,
    Disconnected,
}

struct Inner {
    drivers: HashMap<DriverGuid, Driver>,
    order: Vec<DriverGuid>,
}

/// An ordered, internally locked map of driver records.
pub struct DriverMap {
    group: DriverGroup,
    inner: RwLock<Inner>,
}

impl DriverMap {
    pub fn new(group: DriverGroup) -> Self {
        Self {
            group,
            inner: RwLock::new(Inner {
                drivers: HashMap::new(),
                order: Vec::new(),
            }),
        }
    }

    pub fn group(&self) -> DriverGroup {
        self.group
    }

    /// Inserts or replaces the record for its identity.
    pub fn insert(&self, driver: Driver) {
        if let Ok(mut inner) = self.inner.write() {
            let guid = driver.guid().clone();
            if inner.drivers.insert(guid.clone(), driver).is_none() {
                inner.order.push(guid);
            }
        }
    }

    /// Removes and returns the record for `guid`.
    pub fn remove(&self, guid: &DriverGuid) -> Option<Driver> {
        let mut inner = self.inner.write().ok()?;
        let removed = inner.drivers.remove(guid);
        if removed.is_some() {
            inner.order.retain(|g| g != guid);
        }
        removed
    }

    pub fn contains(&self, guid: &DriverGuid) -> bool {
        self.inner
            .read()
            .map(|inner| inner.drivers.contains_key(guid))
            .unwrap_or(false)
    }

    /// Returns a clone of the record for `guid`.
    pub fn get(&self, guid: &DriverGuid) -> Option<Driver> {
        self.inner.read().ok()?.drivers.get(guid).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .map(|inner| inner.drivers.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Applies `f` to the record for `guid`, if present.
    pub fn update<R>(&self, guid: &DriverGuid, f: impl FnOnce(&mut Driver) -> R) -> Option<R> {
        let mut inner = self.inner.write().ok()?;
        inner.drivers.get_mut(guid).map(f)
    }

    /// Visits every record in presentation order under the read lock.
    pub fn each(&self, mut f: impl FnMut(&Driver)) {
        if let Ok(inner) = self.inner.read() {
            for guid in &inner.order {
                if let Some(driver) = inner.drivers.get(guid) {
                    f(driver);
                }
            }
        }
    }

    /// Visits every record mutably in presentation order under the write
    /// lock.
    pub fn each_mut(&self, mut f: impl FnMut(&mut Driver)) {
        if let Ok(mut inner) = self.inner.write() {
            let order = inner.order.clone();
            for guid in &order {
                if let Some(driver) = inner.drivers.get_mut(guid) {
                    f(driver);
                }
            }
        }
    }

    /// Identities currently in the map, in presentation order.
    pub fn guids(&self) -> Vec<DriverGuid> {
        self.inner
            .read()
            .map(|inner| inner.order.clone())
            .unwrap_or_default()
    }

    /// Clones of all records, in presentation order.
    pub fn drivers(&self) -> Vec<Driver> {
        self.inner
            .read()
            .map(|inner| {
                inner
                    .order
                    .iter()
                    .filter_map(|guid| inner.drivers.get(guid))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut inner) = self.inner.write() {
            inner.drivers.clear();
            inner.order.clear();
        }
    }

    /// Re-sorts the presentation order for `session_type` and reassigns
    /// 1-based positions.
    pub fn sort(&self, session_type: SessionType) {
        if let Ok(mut inner) = self.inner.write() {
            let Inner { drivers, order } = &mut *inner;
            let group = self.group;

            order.sort_by(|a, b| match (drivers.get(a), drivers.get(b)) {
                (Some(a), Some(b)) => compare_drivers(session_type, group, a, b),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            });

            for (index, guid) in order.iter().enumerate() {
                if let Some(driver) = drivers.get_mut(guid) {
                    driver.position = index as u32 + 1;
                }
            }
        }
    }
}

/// Presentation ordering for two drivers.
///
/// Race sessions rank connected drivers by laps then cumulative time, and
/// disconnected drivers by most recent lap. Other session types rank by
/// best lap, with lapless drivers at the back ordered by activity.
fn compare_drivers(
    session_type: SessionType,
    group: DriverGroup,
    a: &Driver,
    b: &Driver,
) -> Ordering {
    let car_a = a.current_car();
    let car_b = b.current_car();

    if session_type == SessionType::Race {
        match group {
            DriverGroup::Connected => car_b
                .num_laps
                .cmp(&car_a.num_laps)
                .then(car_a.total_lap_time.cmp(&car_b.total_lap_time)),
            DriverGroup::Disconnected => {
                car_b.last_lap_completed_at.cmp(&car_a.last_lap_completed_at)
            }
        }
    } else if !car_a.has_best_lap() && !car_b.has_best_lap() {
        car_b
            .num_laps
            .cmp(&car_a.num_laps)
            .then(car_a.last_lap_completed_at.cmp(&car_b.last_lap_completed_at))
    } else if !car_a.has_best_lap() {
        Ordering::Greater
    } else if !car_b.has_best_lap() {
        Ordering::Less
    } else {
        car_a.best_lap.cmp(&car_b.best_lap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::record::CarInfo;
    use crate::events::CarId;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use std::time::Duration;

    fn driver(guid: &str, slot: u8) -> Driver {
        Driver::new(CarInfo {
            car_id: CarId(slot),
            driver_guid: DriverGuid::from(guid),
            driver_name: guid.to_owned(),
            driver_initials: "XX".into(),
            car_model: "gt3_cup".into(),
        })
    }

    fn with_laps(mut d: Driver, laps: u32, total_secs: u64, best_secs: u64) -> Driver {
        let car = d.current_car_mut();
        car.num_laps = laps;
        car.total_lap_time = Duration::from_secs(total_secs);
        car.best_lap = Duration::from_secs(best_secs);
        d.total_num_laps = laps;
        d
    }

    #[test]
    fn race_order_is_laps_then_total_time() {
        let map = DriverMap::new(DriverGroup::Connected);
        map.insert(with_laps(driver("slow", 0), 2, 200, 95));
        map.insert(with_laps(driver("leader", 1), 3, 290, 90));
        map.insert(with_laps(driver("fast", 2), 2, 190, 91));

        map.sort(SessionType::Race);

        assert_eq!(
            map.guids(),
            vec![
                DriverGuid::from("leader"),
                DriverGuid::from("fast"),
                DriverGuid::from("slow"),
            ]
        );
        assert_eq!(map.get(&DriverGuid::from("leader")).unwrap().position, 1);
        assert_eq!(map.get(&DriverGuid::from("slow")).unwrap().position, 3);
    }

    #[test]
    fn practice_order_is_best_lap_with_lapless_last() {
        let map = DriverMap::new(DriverGroup::Connected);
        map.insert(with_laps(driver("nolap", 0), 0, 0, 0));
        map.insert(with_laps(driver("p2", 1), 4, 400, 91));
        map.insert(with_laps(driver("p1", 2), 2, 200, 90));

        map.sort(SessionType::Practice);

        assert_eq!(
            map.guids(),
            vec![
                DriverGuid::from("p1"),
                DriverGuid::from("p2"),
                DriverGuid::from("nolap"),
            ]
        );
    }

    #[test]
    fn practice_lapless_drivers_rank_by_laps_then_activity() {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        let mut early = driver("early", 0);
        early.current_car_mut().num_laps = 1;
        early.current_car_mut().last_lap_completed_at = Some(t0);

        let mut late = driver("late", 1);
        late.current_car_mut().num_laps = 1;
        late.current_car_mut().last_lap_completed_at = Some(t0 + ChronoDuration::seconds(30));

        let map = DriverMap::new(DriverGroup::Connected);
        map.insert(late);
        map.insert(early);
        map.sort(SessionType::Qualify);

        assert_eq!(
            map.guids(),
            vec![DriverGuid::from("early"), DriverGuid::from("late")]
        );
    }

    #[test]
    fn disconnected_race_order_is_most_recent_lap_first() {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        let mut old = driver("old", 0);
        old.current_car_mut().last_lap_completed_at = Some(t0);
        let mut fresh = driver("fresh", 1);
        fresh.current_car_mut().last_lap_completed_at = Some(t0 + ChronoDuration::minutes(5));

        let map = DriverMap::new(DriverGroup::Disconnected);
        map.insert(old);
        map.insert(fresh);
        map.sort(SessionType::Race);

        assert_eq!(
            map.guids(),
            vec![DriverGuid::from("fresh"), DriverGuid::from("old")]
        );
    }

    #[test]
    fn insert_replaces_without_duplicating_order() {
        let map = DriverMap::new(DriverGroup::Connected);
        map.insert(driver("G1", 0));
        map.insert(driver("G1", 4));

        assert_eq!(map.len(), 1);
        assert_eq!(map.guids().len(), 1);
        assert_eq!(map.get(&DriverGuid::from("G1")).unwrap().car_info.car_id, CarId(4));
    }

    #[test]
    fn remove_drops_order_entry() {
        let map = DriverMap::new(DriverGroup::Connected);
        map.insert(driver("G1", 0));
        map.insert(driver("G2", 1));

        let removed = map.remove(&DriverGuid::from("G1")).unwrap();
        assert_eq!(removed.guid(), &DriverGuid::from("G1"));
        assert_eq!(map.guids(), vec![DriverGuid::from("G2")]);
        assert!(map.remove(&DriverGuid::from("G1")).is_none());
    }
}
