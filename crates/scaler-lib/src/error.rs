//! Error taxonomy for the scaler
//!
//! None of these terminate the process: the reconciliation loop treats
//! every operational error as retryable at the next cycle boundary.

use crate::models::ResourceKind;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScalerError {
    /// A collaborator (inventory, usage source, forecast oracle, actuator)
    /// was unreachable or returned an error. Aborts the current cycle only.
    #[error("{collaborator} request failed: {message}")]
    Transient {
        collaborator: &'static str,
        message: String,
    },

    /// An expected resource dimension was absent from an aggregate. The
    /// dimension is excluded from the decision for this cycle, never
    /// coerced to zero.
    #[error("no value for {0} in the aggregate, this should not happen")]
    IncompleteData(ResourceKind),

    /// The configured node shape cannot be used as a divisor for this
    /// dimension. Indicates a deployment misconfiguration.
    #[error("node shape has no usable {0} quantity, excluding the dimension")]
    Configuration(ResourceKind),

    /// The forecast oracle is not ready to be primed yet. Expected during
    /// warm-up; retried with a fixed delay, never a hard failure.
    #[error("forecast oracle not ready: {0}")]
    WarmUpNotReady(String),
}

impl ScalerError {
    /// Wrap a collaborator failure
    pub fn transient(collaborator: &'static str, err: impl fmt::Display) -> Self {
        ScalerError::Transient {
            collaborator,
            message: err.to_string(),
        }
    }
}
