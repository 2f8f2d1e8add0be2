//! Shared test doubles for the race-control integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{TimeZone, Utc};
use tokio_util::sync::CancellationToken;

use pitwall::broadcast::{BroadcastError, BroadcastMessage, Broadcaster};
use pitwall::clock::ManualClock;
use pitwall::events::{
    CarId, CarUpdate, ConnectionEventKind, DriverGuid, Event, LapCompleted, OutboundMessage,
    SessionCarInfo, SessionEventKind, SessionInfo, SessionType, Vec3,
};
use pitwall::penalties::{PenaltyError, PenaltyService};
use pitwall::process::{ProcessError, ServerConfig, ServerProcess};
use pitwall::race_control::RaceControl;
use pitwall::store::MemoryStore;
use pitwall::track_data::{TrackDataError, TrackDataGateway, TrackInfo, TrackMapData};

/// Process double that records every outbound message.
pub struct MockProcess {
    pub sent: Mutex<Vec<OutboundMessage>>,
    pub done: CancellationToken,
    pub config: Mutex<ServerConfig>,
}

impl MockProcess {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            done: CancellationToken::new(),
            config: Mutex::new(ServerConfig::default()),
        }
    }

    pub fn set_config(&self, config: ServerConfig) {
        *self.config.lock().unwrap() = config;
    }

    pub fn sent_messages(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn chat_lines(&self) -> Vec<String> {
        self.sent_messages()
            .into_iter()
            .filter_map(|message| match message {
                OutboundMessage::SendChat { message, .. } => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn kick_count(&self) -> usize {
        self.sent_messages()
            .iter()
            .filter(|message| matches!(message, OutboundMessage::KickUser { .. }))
            .count()
    }

    pub fn session_info_requests(&self) -> usize {
        self.sent_messages()
            .iter()
            .filter(|message| matches!(message, OutboundMessage::GetSessionInfo))
            .count()
    }
}

impl ServerProcess for MockProcess {
    fn send_udp_message(&self, message: OutboundMessage) -> Result<(), ProcessError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    fn done(&self) -> CancellationToken {
        self.done.clone()
    }

    fn server_config(&self) -> ServerConfig {
        self.config.lock().unwrap().clone()
    }
}

/// Broadcaster double that collects every published message.
pub struct CollectingBroadcaster {
    pub messages: Mutex<Vec<BroadcastMessage>>,
}

impl CollectingBroadcaster {
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
        }
    }

    pub fn status_count(&self) -> usize {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|message| matches!(message, BroadcastMessage::Status(_)))
            .count()
    }

    pub fn forwarded_events(&self) -> Vec<Event> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter_map(|message| match message {
                BroadcastMessage::Event(event) => Some(event.clone()),
                _ => None,
            })
            .collect()
    }
}

impl Broadcaster for CollectingBroadcaster {
    fn send(&self, message: BroadcastMessage) -> Result<(), BroadcastError> {
        self.messages.lock().unwrap().push(message);
        Ok(())
    }
}

/// Gateway double; track-info failure can be toggled per test.
pub struct MockTrackData {
    pub fail_track_info: AtomicBool,
}

impl MockTrackData {
    pub fn new() -> Self {
        Self {
            fail_track_info: AtomicBool::new(false),
        }
    }
}

impl TrackDataGateway for MockTrackData {
    fn track_info(&self, track: &str, layout: &str) -> Result<TrackInfo, TrackDataError> {
        if self.fail_track_info.load(Ordering::SeqCst) {
            return Err(TrackDataError::NotFound {
                track: track.to_owned(),
                layout: layout.to_owned(),
            });
        }
        Ok(TrackInfo {
            name: track.to_owned(),
            ..Default::default()
        })
    }

    fn track_map(&self, _track: &str, _layout: &str) -> Result<TrackMapData, TrackDataError> {
        Ok(TrackMapData::default())
    }
}

/// Penalty service double that records every application.
pub struct RecordingPenalties {
    pub applied: Mutex<Vec<(String, DriverGuid, String, f64, bool)>>,
}

impl RecordingPenalties {
    pub fn new() -> Self {
        Self {
            applied: Mutex::new(Vec::new()),
        }
    }
}

impl PenaltyService for RecordingPenalties {
    fn apply_penalty(
        &self,
        result_filename: &str,
        guid: &DriverGuid,
        car_model: &str,
        seconds: f64,
        is_driver_swap: bool,
    ) -> Result<(), PenaltyError> {
        self.applied.lock().unwrap().push((
            result_filename.to_owned(),
            guid.clone(),
            car_model.to_owned(),
            seconds,
            is_driver_swap,
        ));
        Ok(())
    }
}

/// Everything a test needs to drive the core.
pub struct Harness {
    pub control: Arc<RaceControl>,
    pub process: Arc<MockProcess>,
    pub broadcaster: Arc<CollectingBroadcaster>,
    pub track_data: Arc<MockTrackData>,
    pub store: Arc<MemoryStore>,
    pub penalties: Arc<RecordingPenalties>,
    pub clock: Arc<ManualClock>,
}

pub fn harness() -> Harness {
    harness_with_store(Arc::new(MemoryStore::new()))
}

/// Harness variant sharing an existing store, for restart scenarios.
pub fn harness_with_store(store: Arc<MemoryStore>) -> Harness {
    let process = Arc::new(MockProcess::new());
    let broadcaster = Arc::new(CollectingBroadcaster::new());
    let track_data = Arc::new(MockTrackData::new());
    let penalties = Arc::new(RecordingPenalties::new());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
    ));

    let control = RaceControl::new(
        broadcaster.clone(),
        track_data.clone(),
        process.clone(),
        store.clone(),
        penalties.clone(),
        clock.clone(),
    );

    Harness {
        control,
        process,
        broadcaster,
        track_data,
        store,
        penalties,
        clock,
    }
}

// ── Event constructors ───────────────────────────────────────────────────

pub fn new_session(session_type: SessionType, track: &str, layout: &str, name: &str) -> Event {
    Event::SessionInfo {
        kind: SessionEventKind::NewSession,
        info: SessionInfo {
            session_type,
            name: name.to_owned(),
            track: track.to_owned(),
            track_config: layout.to_owned(),
            ..Default::default()
        },
    }
}

pub fn session_update(info: SessionInfo) -> Event {
    Event::SessionInfo {
        kind: SessionEventKind::Update,
        info,
    }
}

pub fn connect(slot: u8, guid: &str, name: &str, model: &str) -> Event {
    Event::SessionCarInfo(SessionCarInfo {
        car_id: CarId(slot),
        driver_guid: DriverGuid::from(guid),
        driver_name: name.to_owned(),
        driver_initials: String::new(),
        car_model: model.to_owned(),
        event_kind: ConnectionEventKind::NewConnection,
    })
}

pub fn disconnect(slot: u8, guid: &str, name: &str, model: &str) -> Event {
    Event::SessionCarInfo(SessionCarInfo {
        car_id: CarId(slot),
        driver_guid: DriverGuid::from(guid),
        driver_name: name.to_owned(),
        driver_initials: String::new(),
        car_model: model.to_owned(),
        event_kind: ConnectionEventKind::ConnectionClosed,
    })
}

pub fn loaded(slot: u8) -> Event {
    Event::ClientLoaded(CarId(slot))
}

pub fn lap(slot: u8, lap_time_ms: u32, cuts: u8) -> Event {
    Event::LapCompleted(LapCompleted {
        car_id: CarId(slot),
        lap_time_ms,
        cuts,
    })
}

pub fn car_update(slot: u8, pos: Vec3, velocity: Vec3) -> Event {
    Event::CarUpdate(CarUpdate {
        car_id: CarId(slot),
        pos,
        velocity,
    })
}

/// Lets tasks spawned by the dispatcher (persistence flushes, supervisors)
/// run on the current-thread test runtime.
pub async fn settle() {
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
}
