//! Session lifecycle: new-session, session-update, end-session and the
//! periodic session-info poller.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::events::{OutboundMessage, SessionInfo, SessionType};
use crate::process::ProcessError;

use super::{RaceControl, RaceControlError};

/// How often the poller asks the server for fresh session info.
pub(crate) const SESSION_INFO_INTERVAL: Duration = Duration::from_secs(30);

impl RaceControl {
    /// Handles a new-session event.
    ///
    /// Car info is emptied unless the session is a looped practice (same
    /// type, track, layout and name as the previous session with at least
    /// one driver known). Failure to fetch track info aborts the handler
    /// before any state is touched.
    pub(crate) fn on_new_session(
        self: &Arc<Self>,
        info: &SessionInfo,
    ) -> Result<(), RaceControlError> {
        // Fatal lookup first: on failure the session must stay untouched.
        let track_info = self
            .track_data
            .track_info(&info.track, &info.track_config)?;

        let track_map = match self.track_data.track_map(&info.track, &info.track_config) {
            Ok(map) => Some(map),
            Err(err) => {
                error!(error = %err, "Could not load track map data");
                None
            }
        };

        let now = self.clock.now();

        let old_info = {
            let mut session = match self.session.write() {
                Ok(session) => session,
                Err(_) => return Ok(()),
            };
            let old_info = std::mem::replace(&mut session.info, info.clone());
            session.track_info = Some(track_info);
            session.track_map = track_map;
            session.started_at = Some(now);
            old_info
        };

        if let Ok(mut counters) = self.update_counters.write() {
            counters.clear();
        }

        if let Ok(mut penalties) = self.swap_penalties.lock() {
            penalties.clear();
        }

        let any_driver_known = !self.connected.is_empty() || !self.disconnected.is_empty();
        let looped_practice = any_driver_known
            && info.session_type == SessionType::Practice
            && old_info.session_type == info.session_type
            && old_info.track == info.track
            && old_info.track_config == info.track_config
            && old_info.name == info.name;

        if !looped_practice {
            self.connected.each_mut(|driver| driver.reset());
            // disconnected entries would only show empty rows once their
            // stats are gone
            self.disconnected.clear();
        }

        self.connected
            .each_mut(|driver| driver.current_car_mut().last_lap_completed_at = Some(now));

        debug!(
            session_type = %info.session_type,
            track = %info.track,
            layout = %info.track_config,
            empty_car_info = !looped_practice,
            "New session detected"
        );

        self.launch_session_info_poller();
        self.restore_persisted_timings(info);

        Ok(())
    }

    /// Merges a previously persisted snapshot into the disconnected map when
    /// it belongs to this session.
    fn restore_persisted_timings(&self, info: &SessionInfo) {
        match self.store.load_live_timings() {
            Ok(Some(persisted))
                if persisted.matches(
                    info.session_type,
                    &info.track,
                    &info.track_config,
                    &info.name,
                ) =>
            {
                let num_drivers = persisted.drivers.len();

                for (guid, driver) in persisted.drivers {
                    if !self.connected.contains(&guid) && !self.disconnected.contains(&guid) {
                        self.disconnected.insert(driver);
                    }
                }
                self.disconnected.sort(info.session_type);

                info!(
                    track = %info.track,
                    layout = %info.track_config,
                    num_drivers,
                    "Loaded previous live timings data"
                );
            }
            Ok(_) => {}
            Err(err) => {
                debug!(error = %err, "Could not load persisted live timings data");
            }
        }
    }

    /// Handles a session-update event.
    ///
    /// Only ambient temperature, road temperature, weather graphics and
    /// elapsed time are copied over; the decoded session type is wrong on
    /// updates and must not overwrite the stored one. Returns whether the
    /// change is worth broadcasting.
    pub(crate) fn on_session_update(&self, info: &SessionInfo) -> Result<bool, RaceControlError> {
        let mut session = match self.session.write() {
            Ok(session) => session,
            Err(_) => return Ok(false),
        };

        let changed = session.info.ambient_temp != info.ambient_temp
            || session.info.road_temp != info.road_temp
            || session.info.weather_graphics != info.weather_graphics;

        session.info.ambient_temp = info.ambient_temp;
        session.info.road_temp = info.road_temp;
        session.info.weather_graphics = info.weather_graphics.clone();
        session.info.elapsed_ms = info.elapsed_ms;

        Ok(changed)
    }

    /// Handles an end-session event: stops the poller, cancels every active
    /// swap supervisor and applies the accumulated swap penalties against
    /// the session result file.
    pub(crate) fn on_end_session(&self, result_file: &str) -> Result<(), RaceControlError> {
        if let Ok(mut poller) = self.poller_cancel.lock() {
            if let Some(cancel) = poller.take() {
                cancel.cancel();
            }
        }

        if let Ok(swaps) = self.active_swaps.lock() {
            for cancel in swaps.values() {
                cancel.cancel();
            }
        }

        let filename = Path::new(result_file)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| result_file.to_owned());

        info!(result_file = %filename, "End of session");

        let penalties = self.swap_penalties();

        for (guid, penalty) in penalties {
            if let Err(err) = self.penalties.apply_penalty(
                &filename,
                &guid,
                &penalty.car_model,
                penalty.total.as_secs_f64(),
                true,
            ) {
                error!(
                    driver = %guid,
                    penalty_secs = penalty.total.as_secs_f64(),
                    error = %err,
                    "Could not apply driver swap penalty"
                );
                continue;
            }
        }

        Ok(())
    }

    /// Spawns the session-info poller, replacing (and cancelling) any
    /// previous one.
    fn launch_session_info_poller(self: &Arc<Self>) {
        let cancel = CancellationToken::new();

        if let Ok(mut slot) = self.poller_cancel.lock() {
            if let Some(old) = slot.replace(cancel.clone()) {
                old.cancel();
            }
        }

        let control = Arc::clone(self);
        tokio::spawn(async move {
            control.run_session_info_poller(cancel).await;
        });
    }

    /// Periodically requests session info until cancelled or until the
    /// process terminates. Process termination disconnects every connected
    /// driver and broadcasts once.
    async fn run_session_info_poller(self: Arc<Self>, cancel: CancellationToken) {
        let done = self.process.done();

        let mut interval = tokio::time::interval(SESSION_INFO_INTERVAL);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // Skip the first immediate tick
        interval.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("Session info poller stopped");
                    return;
                }

                _ = done.cancelled() => {
                    debug!("Simulation process completed, disconnecting all connected drivers");

                    // each() holds the read lock; collect first, disconnect after
                    let mut drivers = Vec::new();
                    self.connected.each(|driver| drivers.push(driver.car_info.clone()));

                    for car_info in drivers {
                        if let Err(err) = self.disconnect_driver(&car_info) {
                            error!(
                                driver = %car_info.driver_name,
                                guid = %car_info.driver_guid,
                                error = %err,
                                "Could not disconnect driver"
                            );
                            continue;
                        }
                    }

                    self.broadcast_status();
                    return;
                }

                _ = interval.tick() => {
                    match self.process.send_udp_message(OutboundMessage::GetSessionInfo) {
                        Err(ProcessError::NoOpenConnection) => {
                            warn!("Couldn't send session info request, connection closed; stopping poller");
                            return;
                        }
                        Err(err) => {
                            error!(error = %err, "Couldn't send session info request");
                        }
                        Ok(()) => {}
                    }
                }
            }
        }
    }
}
