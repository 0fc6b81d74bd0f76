//! Error types for the control loop.

use std::fmt;

use thiserror::Error;

use livequery_bridge::BridgeError;
use livequery_engine::EngineError;

/// Result type for control-loop operations.
pub type ControlResult<T> = Result<T, ControlError>;

/// Which engine transition an apply failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    /// `start_sync` was attempted.
    Start,
    /// `stop_sync` was attempted.
    Stop,
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncAction::Start => f.write_str("start"),
            SyncAction::Stop => f.write_str("stop"),
        }
    }
}

/// Errors reported by the sync control loop.
#[derive(Error, Debug)]
pub enum ControlError {
    /// A statement against the store failed.
    #[error("engine operation failed: {0}")]
    Engine(#[from] EngineError),

    /// Subscribing the flag observation failed.
    #[error("bridge operation failed: {0}")]
    Bridge(#[from] BridgeError),

    /// Applying an observed flag value to the engine failed.
    ///
    /// The loop keeps observing; the state channel still carries the
    /// storage value and the next snapshot retries the transition.
    #[error("failed to {action} sync: {message}")]
    Apply {
        /// The transition that failed.
        action: SyncAction,
        /// The engine's failure message.
        message: String,
    },

    /// The control loop's worker is gone.
    #[error("control loop is shut down")]
    Closed,
}

impl ControlError {
    /// Returns true if this is an apply failure.
    pub fn is_apply(&self) -> bool {
        matches!(self, ControlError::Apply { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_display_names_the_action() {
        let error = ControlError::Apply {
            action: SyncAction::Start,
            message: "radio off".into(),
        };
        assert!(error.is_apply());
        assert_eq!(error.to_string(), "failed to start sync: radio off");

        let error = ControlError::Apply {
            action: SyncAction::Stop,
            message: "radio off".into(),
        };
        assert!(error.to_string().contains("stop"));
    }

    #[test]
    fn conversions_from_collaborator_errors() {
        let error: ControlError = EngineError::EngineClosed.into();
        assert!(matches!(error, ControlError::Engine(_)));
        assert!(!error.is_apply());

        let error: ControlError = BridgeError::Registration(EngineError::EngineClosed).into();
        assert!(matches!(error, ControlError::Bridge(_)));
    }
}
