//! Driver registry primitives.
//!
//! - [`record`] - the per-identity driver record and its lap statistics
//! - [`map`] - the ordered, internally locked driver maps and sort policy
//! - [`name`] - display-name normalization

mod map;
mod name;
mod record;

pub use map::{DriverGroup, DriverMap};
pub use name::{driver_initials, normalize_driver_name};
pub use record::{CarInfo, CarLapInfo, Collision, CollisionKind, Driver};
