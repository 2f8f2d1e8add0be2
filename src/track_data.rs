//! Track metadata gateway.
//!
//! Track info and track-map data are looked up once per new session. A
//! failing [`track_info`](TrackDataGateway::track_info) lookup aborts
//! new-session handling; a failing [`track_map`](TrackDataGateway::track_map)
//! lookup is logged and ignored.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from the track metadata gateway.
#[derive(Debug, Error)]
pub enum TrackDataError {
    #[error("track {track} ({layout}) not found")]
    NotFound { track: String, layout: String },

    #[error("track data gateway unavailable: {0}")]
    Unavailable(String),
}

/// Static description of a track layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub name: String,
    pub city: String,
    pub country: String,
    /// Lap length in metres.
    pub length: f64,
    pub pitboxes: u32,
    pub run: String,
}

/// Geometry used to draw the live track map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackMapData {
    pub width: f64,
    pub height: f64,
    pub offset_x: f64,
    pub offset_z: f64,
    pub scale_factor: f64,
}

/// Lookup service for track metadata.
pub trait TrackDataGateway: Send + Sync {
    fn track_info(&self, track: &str, layout: &str) -> Result<TrackInfo, TrackDataError>;

    fn track_map(&self, track: &str, layout: &str) -> Result<TrackMapData, TrackDataError>;
}
