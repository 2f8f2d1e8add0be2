//! Client connection lifecycle: connect, disconnect, loaded.

use std::sync::Arc;

use tracing::{debug, error};

use crate::driver::{driver_initials, normalize_driver_name, CarInfo, Driver};
use crate::events::{CarId, ConnectionEventKind, SessionCarInfo};

use super::{RaceControl, RaceControlError};

/// Column at which welcome chat lines wrap.
const CHAT_WRAP_COLUMN: usize = 60;

impl RaceControl {
    /// Handles a new client connection.
    ///
    /// Records the slot → identity mapping. A driver known from earlier in
    /// the session is promoted back from the disconnected map with its lap
    /// data intact; anyone else gets a fresh record.
    pub(crate) fn on_client_connect(&self, client: &SessionCarInfo) -> Result<(), RaceControlError> {
        self.slot_index
            .insert(client.car_id, client.driver_guid.clone());

        let car_info = CarInfo {
            car_id: client.car_id,
            driver_guid: client.driver_guid.clone(),
            driver_name: normalize_driver_name(&client.driver_name),
            driver_initials: driver_initials(&client.driver_name),
            car_model: client.car_model.clone(),
        };

        let mut driver = match self.disconnected.remove(&client.driver_guid) {
            Some(mut driver) => {
                driver.car_info = car_info;
                debug!(
                    driver = %driver.car_info.driver_name,
                    guid = %driver.car_info.driver_guid,
                    car_model = %driver.car_info.car_model,
                    slot = %client.car_id,
                    "Driver reconnected"
                );
                driver
            }
            None => {
                let driver = Driver::new(car_info);
                debug!(
                    driver = %driver.car_info.driver_name,
                    guid = %driver.car_info.driver_guid,
                    car_model = %driver.car_info.car_model,
                    slot = %client.car_id,
                    "Driver connected"
                );
                driver
            }
        };

        let now = self.clock.now();
        driver.connected_at = Some(now);
        driver.current_car_mut().last_lap_completed_at = Some(now);

        self.connected.insert(driver);

        Ok(())
    }

    /// Handles a client disconnection.
    ///
    /// The record is retained in the disconnected map only when the driver
    /// has completed laps. When driver swaps are enabled, a swap supervisor
    /// is launched for the vacated slot.
    pub(crate) fn on_client_disconnect(
        self: &Arc<Self>,
        client: &SessionCarInfo,
    ) -> Result<(), RaceControlError> {
        if let Ok(mut counters) = self.update_counters.write() {
            counters.remove(&client.driver_guid);
        }

        let mut driver = self
            .connected
            .remove(&client.driver_guid)
            .ok_or_else(|| RaceControlError::UnknownDriver(client.driver_guid.clone()))?;

        debug!(
            driver = %driver.car_info.driver_name,
            guid = %driver.car_info.driver_guid,
            "Driver disconnected"
        );

        driver.loaded_at = None;

        // keep the index consistent: only drop the mapping if the slot
        // still points at this identity
        self.slot_index
            .remove_if(&driver.car_info.car_id, |_, guid| {
                guid == &driver.car_info.driver_guid
            });

        let config = self.process.server_config();
        let launch_swap = config.race.driver_swap_enabled();
        let last_pos = driver.last_pos;
        let slot = driver.car_info.car_id;

        if driver.total_num_laps > 0 {
            self.disconnected.insert(driver);
            self.disconnected.sort(self.session_type());
        }

        if launch_swap {
            self.launch_driver_swap(slot, client.driver_guid.clone(), last_pos, config.race);
        }

        Ok(())
    }

    /// Disconnects a driver on the core's own initiative (liveness timeout
    /// or process termination), reusing the disconnect handler.
    pub(crate) fn disconnect_driver(self: &Arc<Self>, car_info: &CarInfo) -> Result<(), RaceControlError> {
        let client = SessionCarInfo {
            car_id: car_info.car_id,
            driver_guid: car_info.driver_guid.clone(),
            driver_name: car_info.driver_name.clone(),
            driver_initials: car_info.driver_initials.clone(),
            car_model: car_info.car_model.clone(),
            event_kind: ConnectionEventKind::ConnectionClosed,
        };

        self.on_client_disconnect(&client)
    }

    /// Handles a client finishing loading: stamps the loaded time and sends
    /// the wrapped welcome chat.
    pub(crate) fn on_client_loaded(&self, car_id: CarId) -> Result<(), RaceControlError> {
        let driver = self.find_connected_driver_by_car_id(car_id)?;

        let config = self.process.server_config();

        let sol_advisory = if config.race.is_sol() {
            Some(
                "This server is running Sol. For the best experience please \
                 install Sol, and remember the other drivers may be driving \
                 in night conditions.",
            )
        } else {
            None
        };

        let live_link = config.global.base_url.as_ref().map(|base_url| {
            format!("You can view live timings for this event at {base_url}/live-timing")
        });

        let mut welcome = format!(
            "Hi, {}! Welcome to the {} server!",
            driver.car_info.driver_name,
            config.global.display_name(),
        );
        for part in [
            Some(config.global.join_message.as_str()),
            sol_advisory,
            Some("Make this race count!"),
            live_link.as_deref(),
        ]
        .into_iter()
        .flatten()
        {
            if !part.is_empty() {
                welcome.push(' ');
                welcome.push_str(part);
            }
        }

        for line in wrap_words(&welcome, CHAT_WRAP_COLUMN) {
            self.send_chat(car_id, &line);
        }

        debug!(
            driver = %driver.car_info.driver_name,
            guid = %driver.car_info.driver_guid,
            "Driver loaded"
        );

        let now = self.clock.now();
        let updated = self
            .connected
            .update(driver.guid(), |driver| driver.loaded_at = Some(now));
        if updated.is_none() {
            error!(guid = %driver.car_info.driver_guid, "Driver vanished while handling loaded event");
        }

        Ok(())
    }
}

/// Greedy word wrap: each returned line holds as many whitespace-separated
/// words as fit in `width` columns. A word longer than `width` gets a line
/// of its own.
fn wrap_words(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        if current.is_empty() {
            current.push_str(word);
        } else if current.len() + 1 + word.len() <= width {
            current.push(' ');
            current.push_str(word);
        } else {
            lines.push(std::mem::take(&mut current));
            current.push_str(word);
        }
    }

    if !current.is_empty() {
        lines.push(current);
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_words_respects_width() {
        let text = "Hi, Ada Lovelace! Welcome to the Tuesday GT3 server! Make this race count!";
        let lines = wrap_words(text, 60);

        assert!(lines.len() > 1);
        for line in &lines {
            assert!(line.len() <= 60, "line too long: {line:?}");
        }
        assert_eq!(lines.join(" "), text);
    }

    #[test]
    fn wrap_words_handles_oversized_word() {
        let word = "x".repeat(80);
        let lines = wrap_words(&word, 60);
        assert_eq!(lines, vec![word]);
    }

    #[test]
    fn wrap_words_empty_input() {
        assert!(wrap_words("", 60).is_empty());
    }
}
