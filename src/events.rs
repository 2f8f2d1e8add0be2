//! Decoded telemetry events and outbound UDP messages.
//!
//! The wire codec lives outside this crate; it decodes raw simulation-server
//! datagrams into the [`Event`] values consumed by the dispatcher, and
//! encodes the [`OutboundMessage`] values the core sends back through the
//! process collaborator.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Maximum characters accepted in a single outbound chat message.
///
/// The wire format carries the text with a single-byte length prefix, so
/// anything longer cannot be encoded.
pub const MAX_CHAT_LEN: usize = 255;

/// Numeric car slot assigned by the simulation server.
///
/// Slots are reused across sessions and may be reassigned on reconnect; the
/// slot → identity mapping is an auxiliary index only. All driver lookups
/// resolve through [`DriverGuid`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CarId(pub u8);

impl fmt::Display for CarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque stable identity of a human driver.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DriverGuid(pub String);

impl fmt::Display for DriverGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DriverGuid {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// 3-D position or velocity vector in simulation coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// True when any axis differs from `other` by more than `threshold`.
    pub fn moved_beyond(&self, other: &Vec3, threshold: f32) -> bool {
        (self.x - other.x).abs() > threshold
            || (self.y - other.y).abs() > threshold
            || (self.z - other.z).abs() > threshold
    }
}

/// Session type reported by the simulation server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionType {
    #[default]
    Practice,
    Qualify,
    Race,
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::Practice => "practice",
            SessionType::Qualify => "qualify",
            SessionType::Race => "race",
        }
    }
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a `SessionInfo` event opens a new session or refreshes the
/// current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionEventKind {
    NewSession,
    Update,
}

/// Session metadata carried by new-session and session-update events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_type: SessionType,
    pub name: String,
    pub track: String,
    pub track_config: String,
    pub elapsed_ms: i64,
    pub ambient_temp: u8,
    pub road_temp: u8,
    pub weather_graphics: String,
}

/// Connection lifecycle kind carried by a `SessionCarInfo` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionEventKind {
    NewConnection,
    ConnectionClosed,
}

/// Per-car session info: announces a client connecting or disconnecting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionCarInfo {
    pub car_id: CarId,
    pub driver_guid: DriverGuid,
    pub driver_name: String,
    pub driver_initials: String,
    pub car_model: String,
    pub event_kind: ConnectionEventKind,
}

/// Real-time position report for one car.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CarUpdate {
    pub car_id: CarId,
    pub pos: Vec3,
    pub velocity: Vec3,
}

/// Lap completion report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LapCompleted {
    pub car_id: CarId,
    pub lap_time_ms: u32,
    pub cuts: u8,
}

/// Car-to-car contact report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CollisionWithCar {
    pub car_id: CarId,
    pub other_car_id: CarId,
    /// Impact speed in metres per second.
    pub impact_speed: f32,
}

/// Car-to-environment contact report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CollisionWithEnvironment {
    pub car_id: CarId,
    /// Impact speed in metres per second.
    pub impact_speed: f32,
}

/// Server version announcement, sent once at process startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version(pub u8);

/// A decoded inbound event from the simulation server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    Version(Version),
    SessionInfo {
        kind: SessionEventKind,
        info: SessionInfo,
    },
    /// Session ended; the payload is the path of the result file the server
    /// wrote.
    EndSession(String),
    CarUpdate(CarUpdate),
    SessionCarInfo(SessionCarInfo),
    /// A client finished loading into the session.
    ClientLoaded(CarId),
    CollisionWithCar(CollisionWithCar),
    CollisionWithEnvironment(CollisionWithEnvironment),
    LapCompleted(LapCompleted),
    /// Chat relayed from a client. Recorded for completeness; the dispatcher
    /// ignores it.
    Chat { car_id: CarId, message: String },
}

/// Failure to construct an outbound message.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    /// Chat text exceeds the wire limit.
    #[error("chat message is {len} characters, wire limit is {MAX_CHAT_LEN}")]
    ChatTooLong { len: usize },
}

/// A message the core sends to the simulation server via the process
/// collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    /// Ask the server to report current session info.
    GetSessionInfo,
    /// Deliver a chat line to one car slot.
    SendChat { car_id: CarId, message: String },
    /// Kick the occupant of a car slot.
    KickUser { car_id: CarId },
}

impl OutboundMessage {
    /// Builds a chat message, enforcing the wire length limit.
    pub fn send_chat(car_id: CarId, message: impl Into<String>) -> Result<Self, EncodeError> {
        let message = message.into();
        let len = message.chars().count();
        if len > MAX_CHAT_LEN {
            return Err(EncodeError::ChatTooLong { len });
        }
        Ok(OutboundMessage::SendChat { car_id, message })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moved_beyond_single_axis() {
        let a = Vec3::new(100.0, 0.0, 100.0);
        assert!(Vec3::new(120.0, 0.0, 100.0).moved_beyond(&a, 10.0));
        assert!(Vec3::new(100.0, 0.0, 89.0).moved_beyond(&a, 10.0));
        assert!(!Vec3::new(105.0, 5.0, 95.0).moved_beyond(&a, 10.0));
        // exactly at the threshold does not count as movement
        assert!(!Vec3::new(110.0, 0.0, 100.0).moved_beyond(&a, 10.0));
    }

    #[test]
    fn send_chat_rejects_oversized_messages() {
        let long = "x".repeat(MAX_CHAT_LEN + 1);
        let err = OutboundMessage::send_chat(CarId(1), long).unwrap_err();
        assert_eq!(
            err,
            EncodeError::ChatTooLong {
                len: MAX_CHAT_LEN + 1
            }
        );

        let ok = OutboundMessage::send_chat(CarId(1), "pit now").unwrap();
        assert!(matches!(ok, OutboundMessage::SendChat { .. }));
    }
}
