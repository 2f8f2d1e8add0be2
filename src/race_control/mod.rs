//! Race control: the live race-session state machine.
//!
//! [`RaceControl`] is the single entry point for decoded telemetry events.
//! Each event is routed to exactly one handler; handlers mutate the driver
//! registry and session state, and signal when the change is worth
//! broadcasting. On such a change the dispatcher publishes the full
//! race-control snapshot and schedules a persistence flush in the
//! background.
//!
//! # Architecture
//!
//! ```text
//! decoded event ──► handle_event ──► handler (registry / session / timing)
//!                        │
//!                        ├──► broadcast: event forwarded verbatim
//!                        ├──► broadcast: snapshot (event code 200), when signalled
//!                        └──► tokio::spawn(persist flush), when signalled
//! ```
//!
//! Long-running activities (the session-info poller and the per-slot
//! driver-swap supervisors) are spawned tasks, each cancelable through its
//! own [`CancellationToken`].
//!
//! Handler errors are logged and swallowed at the dispatcher boundary;
//! ingestion never aborts.

mod connection;
mod liveness;
mod session;
mod swap;
mod timing;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::broadcast::{BroadcastError, BroadcastMessage, Broadcaster};
use crate::clock::Clock;
use crate::driver::{Driver, DriverGroup, DriverMap};
use crate::events::{
    CarId, ConnectionEventKind, DriverGuid, EncodeError, Event, OutboundMessage, SessionEventKind,
    SessionInfo, SessionType, Version,
};
use crate::penalties::{PenaltyError, PenaltyService};
use crate::process::{ProcessError, ServerProcess};
use crate::store::{LiveTimingsSnapshot, Store, StoreError};
use crate::track_data::{TrackDataError, TrackDataGateway, TrackInfo, TrackMapData};

/// Errors surfaced by event handlers.
///
/// All of these are logged and discarded at the dispatcher boundary.
#[derive(Debug, Error)]
pub enum RaceControlError {
    /// No driver occupies the car slot.
    #[error("no driver occupies car slot {0}")]
    UnknownSlot(CarId),

    /// The identity is not in the connected map.
    #[error("driver {0} is not connected")]
    UnknownDriver(DriverGuid),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Broadcast(#[from] BroadcastError),

    #[error(transparent)]
    TrackData(#[from] TrackDataError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Penalty(#[from] PenaltyError),
}

/// A driver-swap penalty accumulated during the session.
#[derive(Debug, Clone, PartialEq)]
pub struct SwapPenalty {
    /// Total penalty time owed.
    pub total: Duration,
    /// Car model the penalty is keyed against in the results.
    pub car_model: String,
}

/// Serializable point-in-time view of race control, broadcast after every
/// state change and sent to newly connected consumers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RaceControlSnapshot {
    pub session_info: SessionInfo,
    pub track_info: Option<TrackInfo>,
    pub track_map: Option<TrackMapData>,
    pub session_started_at: Option<DateTime<Utc>>,
    pub server_version: Option<Version>,
    pub connected_drivers: Vec<Driver>,
    pub disconnected_drivers: Vec<Driver>,
}

struct SessionState {
    info: SessionInfo,
    track_info: Option<TrackInfo>,
    track_map: Option<TrackMapData>,
    started_at: Option<DateTime<Utc>>,
    server_version: Option<Version>,
}

/// The live race-session state machine.
///
/// Construct with [`RaceControl::new`] and feed every decoded event through
/// [`RaceControl::handle_event`] from within a Tokio runtime; the dispatcher
/// spawns the session-info poller, driver-swap supervisors and persistence
/// flushes as background tasks.
pub struct RaceControl {
    broadcaster: Arc<dyn Broadcaster>,
    track_data: Arc<dyn TrackDataGateway>,
    process: Arc<dyn ServerProcess>,
    store: Arc<dyn Store>,
    penalties: Arc<dyn PenaltyService>,
    clock: Arc<dyn Clock>,

    session: RwLock<SessionState>,
    connected: DriverMap,
    disconnected: DriverMap,

    /// Auxiliary car-slot → identity index. Every car-update reads it; it
    /// is only written on connect/disconnect.
    slot_index: DashMap<CarId, DriverGuid>,

    /// Consecutive car-updates each identity has missed.
    update_counters: RwLock<HashMap<DriverGuid, usize>>,

    /// Session-scoped driver-swap penalty accumulator.
    swap_penalties: Mutex<HashMap<DriverGuid, SwapPenalty>>,

    /// Active swap supervisors keyed by slot. A supervisor removes its own
    /// entry on exit.
    active_swaps: Mutex<HashMap<CarId, CancellationToken>>,

    /// Cancel handle of the running session-info poller.
    poller_cancel: Mutex<Option<CancellationToken>>,

    /// Only one snapshot writer at a time; latest wins.
    persist_lock: Mutex<()>,
}

impl RaceControl {
    pub fn new(
        broadcaster: Arc<dyn Broadcaster>,
        track_data: Arc<dyn TrackDataGateway>,
        process: Arc<dyn ServerProcess>,
        store: Arc<dyn Store>,
        penalties: Arc<dyn PenaltyService>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        Arc::new(Self {
            broadcaster,
            track_data,
            process,
            store,
            penalties,
            clock,
            session: RwLock::new(SessionState {
                info: SessionInfo::default(),
                track_info: None,
                track_map: None,
                started_at: None,
                server_version: None,
            }),
            connected: DriverMap::new(DriverGroup::Connected),
            disconnected: DriverMap::new(DriverGroup::Disconnected),
            slot_index: DashMap::new(),
            update_counters: RwLock::new(HashMap::new()),
            swap_penalties: Mutex::new(HashMap::new()),
            active_swaps: Mutex::new(HashMap::new()),
            poller_cancel: Mutex::new(None),
            persist_lock: Mutex::new(()),
        })
    }

    /// Routes one decoded event to its handler.
    ///
    /// Must be called from within a Tokio runtime. Concurrent invocation is
    /// permitted; handlers do their own locking.
    pub fn handle_event(self: &Arc<Self>, event: Event) {
        let mut send_status = false;

        let result = match &event {
            Event::Version(version) => self.on_version(*version),
            Event::SessionInfo { kind, info } => match kind {
                SessionEventKind::NewSession => {
                    send_status = true;
                    self.on_new_session(info)
                }
                SessionEventKind::Update => self.on_session_update(info).map(|changed| {
                    send_status = changed;
                }),
            },
            Event::EndSession(result_file) => {
                send_status = true;
                self.on_end_session(result_file)
            }
            Event::CarUpdate(update) => self.on_car_update(update).map(|disconnected_any| {
                send_status = disconnected_any;
            }),
            Event::SessionCarInfo(info) => {
                send_status = true;
                match info.event_kind {
                    ConnectionEventKind::NewConnection => self.on_client_connect(info),
                    ConnectionEventKind::ConnectionClosed => self.on_client_disconnect(info),
                }
            }
            Event::ClientLoaded(car_id) => {
                send_status = true;
                self.on_client_loaded(*car_id)
            }
            Event::CollisionWithCar(collision) => {
                send_status = true;
                self.on_collision_with_car(collision)
            }
            Event::CollisionWithEnvironment(collision) => {
                send_status = true;
                self.on_collision_with_environment(collision)
            }
            Event::LapCompleted(lap) => {
                send_status = true;
                self.on_lap_completed(lap)
            }
            // unhandled event kinds are dropped without forwarding
            Event::Chat { .. } => return,
        };

        if let Err(err) = result {
            error!(error = %err, "Unable to handle event");
            return;
        }

        if let Err(err) = self.broadcaster.send(BroadcastMessage::Event(event)) {
            error!(error = %err, "Unable to forward event to broadcast channel");
        }

        if send_status {
            self.broadcast_status();

            let control = Arc::clone(self);
            tokio::spawn(async move {
                control.persist_timing_data();
            });
        }
    }

    fn on_version(&self, version: Version) -> Result<(), RaceControlError> {
        debug!(version = version.0, "Simulation server started");
        if let Ok(mut session) = self.session.write() {
            session.server_version = Some(version);
        }
        Ok(())
    }

    /// Current session metadata.
    pub fn session_info(&self) -> SessionInfo {
        self.session
            .read()
            .map(|session| session.info.clone())
            .unwrap_or_default()
    }

    pub(crate) fn session_type(&self) -> SessionType {
        self.session
            .read()
            .map(|session| session.info.session_type)
            .unwrap_or_default()
    }

    /// Connected drivers in presentation order.
    pub fn connected_drivers(&self) -> Vec<Driver> {
        self.connected.drivers()
    }

    /// Disconnected drivers in presentation order.
    pub fn disconnected_drivers(&self) -> Vec<Driver> {
        self.disconnected.drivers()
    }

    /// Driver-swap penalties accumulated this session.
    pub fn swap_penalties(&self) -> HashMap<DriverGuid, SwapPenalty> {
        self.swap_penalties
            .lock()
            .map(|penalties| penalties.clone())
            .unwrap_or_default()
    }

    /// Builds the full broadcast snapshot.
    pub fn snapshot(&self) -> RaceControlSnapshot {
        let (session_info, track_info, track_map, session_started_at, server_version) = self
            .session
            .read()
            .map(|session| {
                (
                    session.info.clone(),
                    session.track_info.clone(),
                    session.track_map.clone(),
                    session.started_at,
                    session.server_version,
                )
            })
            .unwrap_or_default();

        RaceControlSnapshot {
            session_info,
            track_info,
            track_map,
            session_started_at,
            server_version,
            connected_drivers: self.connected.drivers(),
            disconnected_drivers: self.disconnected.drivers(),
        }
    }

    pub(crate) fn broadcast_status(&self) {
        let snapshot = Box::new(self.snapshot());
        if let Err(err) = self.broadcaster.send(BroadcastMessage::Status(snapshot)) {
            error!(error = %err, "Unable to broadcast race control status");
        }
    }

    /// Flushes the current driver table to the store. Latest-wins; only one
    /// writer runs at a time.
    pub(crate) fn persist_timing_data(&self) {
        let _guard = match self.persist_lock.lock() {
            Ok(guard) => guard,
            Err(_) => return,
        };

        let info = self.session_info();
        let mut drivers = HashMap::new();
        // connected wins on identity collision
        self.disconnected.each(|driver| {
            drivers.insert(driver.guid().clone(), driver.clone());
        });
        self.connected.each(|driver| {
            drivers.insert(driver.guid().clone(), driver.clone());
        });

        let snapshot = LiveTimingsSnapshot {
            session_type: info.session_type,
            track: info.track,
            track_layout: info.track_config,
            session_name: info.name,
            drivers,
        };

        if let Err(err) = self.store.upsert_live_timings(&snapshot) {
            error!(error = %err, "Could not save live timings data");
        }
    }

    /// Resolves a car slot to a clone of the connected driver occupying it.
    pub(crate) fn find_connected_driver_by_car_id(
        &self,
        car_id: CarId,
    ) -> Result<Driver, RaceControlError> {
        let guid = self
            .slot_index
            .get(&car_id)
            .map(|entry| entry.value().clone())
            .ok_or(RaceControlError::UnknownSlot(car_id))?;

        self.connected
            .get(&guid)
            .ok_or(RaceControlError::UnknownDriver(guid))
    }

    /// Builds and sends a chat line to one car slot, logging and swallowing
    /// failures so supervisor state machines keep running.
    pub(crate) fn send_chat(&self, car_id: CarId, text: &str) {
        match OutboundMessage::send_chat(car_id, text) {
            Ok(message) => {
                if let Err(err) = self.process.send_udp_message(message) {
                    error!(slot = %car_id, error = %err, "Unable to send chat message");
                }
            }
            Err(err) => {
                error!(slot = %car_id, error = %err, "Unable to build chat message");
            }
        }
    }
}

pub(crate) fn meters_per_second_to_kmh(mps: f64) -> f64 {
    mps * 3.6
}

/// Formats a duration the way the chat and split strings expect: `0s`,
/// `250ms`, `13s`, `1m30.25s`.
pub(crate) fn format_duration(duration: Duration) -> String {
    if duration.is_zero() {
        return "0s".to_owned();
    }

    let total_ms = duration.as_millis();
    if total_ms < 1_000 {
        return format!("{total_ms}ms");
    }

    let minutes = total_ms / 60_000;
    let remainder_ms = total_ms % 60_000;
    let seconds = format_seconds(remainder_ms);

    if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{seconds}s")
    }
}

fn format_seconds(ms: u128) -> String {
    let whole = ms / 1_000;
    let frac = ms % 1_000;
    if frac == 0 {
        format!("{whole}")
    } else {
        let mut frac = format!("{frac:03}");
        while frac.ends_with('0') {
            frac.pop();
        }
        format!("{whole}.{frac}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speed_conversion() {
        assert!((meters_per_second_to_kmh(10.0) - 36.0).abs() < f64::EPSILON);
        assert_eq!(meters_per_second_to_kmh(0.0), 0.0);
    }

    #[test]
    fn duration_formatting() {
        assert_eq!(format_duration(Duration::ZERO), "0s");
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_secs(13)), "13s");
        assert_eq!(format_duration(Duration::from_millis(90_250)), "1m30.25s");
        assert_eq!(format_duration(Duration::from_millis(95_500)), "1m35.5s");
        assert_eq!(format_duration(Duration::from_secs(120)), "2m0s");
    }
}
