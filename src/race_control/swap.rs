//! Driver-swap supervision.
//!
//! A swap supervisor is launched when a client disconnects while driver
//! swaps are enabled. It watches the vacated slot for the incoming driver
//! and enforces the minimum pit hold time: leaving far too early is a kick,
//! leaving somewhat early is a time penalty collected at end of session,
//! and waiting out the countdown earns a clear-to-leave message.
//!
//! Each supervisor ticks once a second and is cancelable through its own
//! token: end-session cancels every active supervisor, and the supervisor
//! cancels itself when it finishes so the handle on the driver record
//! always reflects whether supervision is still running.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::events::{CarId, DriverGuid, OutboundMessage, Vec3};
use crate::process::RaceConfig;

use super::{format_duration, RaceControl, SwapPenalty};

/// Movement beyond this many metres on any axis counts as leaving the pits.
const MOVE_THRESHOLD: f32 = 10.0;

/// Pause between the kick notice and the kick itself.
const KICK_GRACE: Duration = Duration::from_secs(5);

/// Extra seconds added on top of the remaining countdown when a penalty is
/// recorded.
const PENALTY_SURCHARGE: Duration = Duration::from_secs(5);

enum SwapState {
    /// No replacement driver seen in the slot yet.
    WaitingForNewDriver,
    /// Replacement found; waiting for their first position report.
    AwaitingFirstPosition,
    /// Countdown running; movement is policed.
    CountingDown,
}

impl RaceControl {
    /// Launches a swap supervisor for a vacated slot.
    ///
    /// A slot already under supervision keeps its running supervisor: a
    /// driver kicked mid-swap still owes the remainder of the wait when
    /// they return, so the original countdown must survive their
    /// disconnect.
    pub(crate) fn launch_driver_swap(
        self: &Arc<Self>,
        slot: CarId,
        initial_guid: DriverGuid,
        captured_pos: Vec3,
        config: RaceConfig,
    ) {
        let cancel = CancellationToken::new();

        {
            let mut swaps = match self.active_swaps.lock() {
                Ok(swaps) => swaps,
                Err(_) => return,
            };
            if swaps.contains_key(&slot) {
                return;
            }
            swaps.insert(slot, cancel.clone());
        }

        // Expose the handle on the record, when one survived the disconnect
        self.disconnected.update(&initial_guid, |driver| {
            driver.swap_cancel = Some(cancel.clone());
        });

        info!(
            slot = %slot,
            x = captured_pos.x,
            y = captured_pos.y,
            z = captured_pos.z,
            "Driver swap initiated; next driver is expected to connect in the same position"
        );

        let control = Arc::clone(self);
        tokio::spawn(async move {
            control
                .run_driver_swap(slot, initial_guid, captured_pos, config, cancel)
                .await;
        });
    }

    async fn run_driver_swap(
        self: Arc<Self>,
        slot: CarId,
        initial_guid: DriverGuid,
        captured_pos: Vec3,
        config: RaceConfig,
        cancel: CancellationToken,
    ) {
        let complete_time = Duration::from_secs(config.driver_swap_min_time);
        let disqualify_window = Duration::from_secs(config.driver_swap_disqualify_time);
        let penalty_window = Duration::from_secs(config.driver_swap_penalty_time);

        let mut state = SwapState::WaitingForNewDriver;
        let mut current_guid = initial_guid.clone();
        let mut total_time = Duration::ZERO;

        let mut interval = tokio::time::interval(Duration::from_secs(1));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // Skip the first immediate tick
        interval.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                _ = interval.tick() => match state {
                    SwapState::WaitingForNewDriver => {
                        let mut new_driver: Option<DriverGuid> = None;
                        let mut reconnected = false;

                        self.connected.each(|driver| {
                            if driver.car_info.car_id != slot {
                                return;
                            }
                            if driver.car_info.driver_guid == current_guid {
                                reconnected = true;
                            } else if driver.loaded_at.is_some() {
                                new_driver = Some(driver.car_info.driver_guid.clone());
                            }
                        });

                        if reconnected {
                            info!(guid = %initial_guid, "Driver reconnected, swap aborted");
                            break;
                        }

                        if let Some(guid) = new_driver {
                            info!(slot = %slot, guid = %guid, "Replacement driver connected");
                            current_guid = guid;
                            state = SwapState::AwaitingFirstPosition;
                        }
                    }

                    SwapState::AwaitingFirstPosition => {
                        let pos = self
                            .connected
                            .get(&current_guid)
                            .map(|driver| driver.last_pos)
                            .unwrap_or(Vec3::ZERO);

                        if pos != Vec3::ZERO {
                            let countdown = complete_time.saturating_sub(total_time);
                            self.send_chat(
                                slot,
                                &format!(
                                    "Hi! You are mid way through a driver swap, \
                                     please wait {} before leaving the pits",
                                    format_duration(countdown)
                                ),
                            );
                            state = SwapState::CountingDown;
                        }
                    }

                    SwapState::CountingDown => {
                        total_time += Duration::from_secs(1);
                        let countdown = complete_time.saturating_sub(total_time);

                        if countdown.is_zero() {
                            self.send_chat(slot, "You are clear to leave the pits, go go go!");
                            info!(slot = %slot, "Driver swap completed, driver is free to leave the pits");
                            break;
                        }

                        let current_pos = self
                            .connected
                            .get(&current_guid)
                            .map(|driver| driver.last_pos)
                            .unwrap_or(captured_pos);

                        if current_pos.moved_beyond(&captured_pos, MOVE_THRESHOLD) {
                            if countdown >= disqualify_window {
                                self.kick_for_early_leave(slot, countdown).await;
                                // keep ticking: the driver still owes the
                                // wait if they reconnect
                            } else if countdown >= penalty_window {
                                self.record_swap_penalty(&current_guid, countdown);
                                self.send_chat(
                                    slot,
                                    &format!(
                                        "You have been given a {} penalty for leaving \
                                         the pits {} early during a driver swap",
                                        format_duration(countdown + PENALTY_SURCHARGE),
                                        format_duration(countdown)
                                    ),
                                );
                                break;
                            }
                        }

                        self.send_chat(
                            slot,
                            &format!("Free to leave pits in {}", format_duration(countdown)),
                        );
                    }
                },
            }
        }

        self.finish_swap(slot, &cancel);
    }

    /// Sends the kick notice, waits out the grace period, then kicks the
    /// slot's occupant.
    async fn kick_for_early_leave(&self, slot: CarId, countdown: Duration) {
        self.send_chat(
            slot,
            &format!(
                "You have been kicked from the session for leaving \
                 the pits {} early during a driver swap",
                format_duration(countdown)
            ),
        );

        tokio::time::sleep(KICK_GRACE).await;

        match self
            .process
            .send_udp_message(OutboundMessage::KickUser { car_id: slot })
        {
            Ok(()) => {
                info!(
                    slot = %slot,
                    countdown = %format_duration(countdown),
                    "Driver kicked for leaving the pits early during a driver swap"
                );
            }
            Err(err) => {
                tracing::error!(slot = %slot, error = %err, "Unable to send kick command");
            }
        }
    }

    /// Adds a penalty of `countdown` plus the surcharge for the driver,
    /// summing with any penalty already on record.
    fn record_swap_penalty(&self, guid: &DriverGuid, countdown: Duration) {
        let amount = countdown + PENALTY_SURCHARGE;

        let car_model = self
            .connected
            .get(guid)
            .map(|driver| driver.car_info.car_model.clone())
            .unwrap_or_default();

        if let Ok(mut penalties) = self.swap_penalties.lock() {
            penalties
                .entry(guid.clone())
                .and_modify(|penalty| penalty.total += amount)
                .or_insert_with(|| SwapPenalty {
                    total: amount,
                    car_model,
                });
        }

        info!(
            guid = %guid,
            penalty = %format_duration(amount),
            "Driver penalised for leaving the pits early during a driver swap"
        );
    }

    /// Removes the supervisor's registration and cancels its token so the
    /// handle left on the driver record reads as finished.
    fn finish_swap(&self, slot: CarId, cancel: &CancellationToken) {
        // The entry for this slot always belongs to this supervisor:
        // launches while an entry exists are refused.
        if let Ok(mut swaps) = self.active_swaps.lock() {
            swaps.remove(&slot);
        }

        cancel.cancel();
        debug!(slot = %slot, "Driver swap supervisor finished");
    }
}
