//! Pitwall - live race-session management core
//!
//! This library ingests the stream of decoded telemetry events emitted by a
//! simulation server (connections, position updates, lap completions,
//! collisions, session transitions) and maintains an authoritative live view
//! of every driver in the session. It computes standings, gaps and best-lap
//! statistics, supervises driver-swap compliance, records collisions,
//! persists a recoverable live-timings snapshot and broadcasts updates to
//! downstream consumers.
//!
//! # High-Level API
//!
//! The [`race_control`] module provides the entry point:
//!
//! ```ignore
//! use pitwall::race_control::RaceControl;
//! use pitwall::clock::SystemClock;
//!
//! let control = RaceControl::new(broadcaster, track_data, process, store, penalties, clock);
//!
//! // Feed every decoded event through the dispatcher
//! control.handle_event(event);
//! ```
//!
//! The UDP wire codec, the process supervisor, the track metadata service,
//! the persistence store and the penalty service are external collaborators
//! reached through the traits in [`process`], [`track_data`], [`store`],
//! [`broadcast`] and [`penalties`].

pub mod broadcast;
pub mod clock;
pub mod driver;
pub mod events;
pub mod logging;
pub mod penalties;
pub mod process;
pub mod race_control;
pub mod store;
pub mod track_data;

/// Version of the pitwall library.
///
/// Defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
