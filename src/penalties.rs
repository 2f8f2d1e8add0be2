//! Penalty application collaborator.
//!
//! Driver-swap penalties accumulate in the session controller during a
//! session and are applied through this service when the session ends,
//! keyed by the session result file the server wrote.

use thiserror::Error;

use crate::events::DriverGuid;

/// Errors applying a penalty.
#[derive(Debug, Error)]
pub enum PenaltyError {
    #[error("result file {0} not found")]
    ResultNotFound(String),

    #[error("failed to apply penalty: {0}")]
    ApplyFailed(String),
}

/// Applies time penalties to session results.
pub trait PenaltyService: Send + Sync {
    /// Adds `seconds` to the named driver's result in `result_filename`.
    fn apply_penalty(
        &self,
        result_filename: &str,
        guid: &DriverGuid,
        car_model: &str,
        seconds: f64,
        is_driver_swap: bool,
    ) -> Result<(), PenaltyError>;
}
