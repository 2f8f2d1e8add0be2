//! Simulation server process collaborator.
//!
//! The process supervisor owns the simulation child process. The core only
//! needs three capabilities from it: sending UDP plugin messages, observing
//! process termination, and reading the active server configuration.

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::events::OutboundMessage;

/// Errors returned by the process collaborator.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The plugin UDP socket is not open. The session-info poller treats
    /// this as process termination and stops.
    #[error("no open UDP connection to the simulation server")]
    NoOpenConnection,

    /// Sending the message failed for another reason.
    #[error("failed to send UDP message: {0}")]
    SendFailed(String),
}

/// Handle to the simulation server process.
pub trait ServerProcess: Send + Sync {
    /// Sends a plugin message to the simulation server.
    fn send_udp_message(&self, message: OutboundMessage) -> Result<(), ProcessError>;

    /// Returns a token that is cancelled when the process exits.
    fn done(&self) -> CancellationToken;

    /// Returns the configuration the server was started with.
    fn server_config(&self) -> ServerConfig;
}

/// Global (per-server) configuration values the core reads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalConfig {
    /// Display name of the server, used in the welcome chat.
    pub name: String,
    /// Operator-configured extra join message, appended to the welcome chat.
    pub join_message: String,
    /// Base URL of the live-timing UI, if one is deployed.
    pub base_url: Option<String>,
}

impl GlobalConfig {
    /// Server name with a fallback for unconfigured servers.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            "Unnamed"
        } else {
            &self.name
        }
    }
}

/// Per-event race configuration values the core reads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RaceConfig {
    /// 1 when driver swaps are allowed in this event.
    pub driver_swap_enabled: u8,
    /// Minimum pit hold time for a swap, in seconds.
    pub driver_swap_min_time: u64,
    /// Leaving with at least this much countdown remaining is a kick, in
    /// seconds.
    pub driver_swap_disqualify_time: u64,
    /// Leaving with at least this much countdown remaining (but below the
    /// disqualify window) is a time penalty, in seconds.
    pub driver_swap_penalty_time: u64,
    /// 1 when the server runs the Sol weather mod.
    pub is_sol: u8,
}

impl RaceConfig {
    pub fn driver_swap_enabled(&self) -> bool {
        self.driver_swap_enabled == 1
    }

    pub fn is_sol(&self) -> bool {
        self.is_sol == 1
    }
}

/// Configuration snapshot read from the process collaborator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerConfig {
    pub global: GlobalConfig,
    pub race: RaceConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_falls_back_when_unset() {
        let config = GlobalConfig::default();
        assert_eq!(config.display_name(), "Unnamed");

        let config = GlobalConfig {
            name: "Tuesday GT3".into(),
            ..Default::default()
        };
        assert_eq!(config.display_name(), "Tuesday GT3");
    }

    #[test]
    fn swap_enabled_flag() {
        let mut race = RaceConfig::default();
        assert!(!race.driver_swap_enabled());
        race.driver_swap_enabled = 1;
        assert!(race.driver_swap_enabled());
    }
}
