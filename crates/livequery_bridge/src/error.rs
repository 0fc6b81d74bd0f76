//! Error types for the observation bridge.

use thiserror::Error;

use livequery_engine::EngineError;

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors that can occur in the observation bridge.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Registering the subscription or observer with the engine failed.
    #[error("registration failed: {0}")]
    Registration(#[from] EngineError),

    /// Releasing a handle's registrations failed.
    #[error("disposal failed: {0}")]
    Disposal(#[from] DisposalError),

    /// A value could not be encoded into a document.
    #[error("encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A single row failed to decode into the requested type.
///
/// Decode failures are per-row and non-fatal: the stream skips the row and
/// reports the failure on its diagnostics channel.
#[derive(Error, Debug)]
#[error("row {row_index} of delivery {sequence} failed to decode: {source}")]
pub struct DecodeError {
    /// Which delivery the row belonged to.
    pub sequence: u64,
    /// Zero-based position of the row within the delivery.
    pub row_index: usize,
    /// The underlying decode failure.
    #[source]
    pub source: serde_json::Error,
}

/// Failure releasing a handle's paired engine registrations.
///
/// Closing a handle always attempts both releases; the variants record
/// which of them failed.
#[derive(Error, Debug)]
pub enum DisposalError {
    /// Releasing the observer failed; the subscription was released.
    #[error("failed to release observer: {0}")]
    Observer(EngineError),

    /// Releasing the subscription failed; the observer was released.
    #[error("failed to release subscription: {0}")]
    Subscription(EngineError),

    /// Both releases failed.
    #[error("failed to release observer ({observer}) and subscription ({subscription})")]
    Both {
        /// The observer release failure.
        observer: EngineError,
        /// The subscription release failure.
        subscription: EngineError,
    },
}

impl DisposalError {
    /// Combines per-token release outcomes into one error, if any failed.
    pub(crate) fn from_parts(
        observer: Option<EngineError>,
        subscription: Option<EngineError>,
    ) -> Option<Self> {
        match (observer, subscription) {
            (None, None) => None,
            (Some(observer), None) => Some(Self::Observer(observer)),
            (None, Some(subscription)) => Some(Self::Subscription(subscription)),
            (Some(observer), Some(subscription)) => Some(Self::Both {
                observer,
                subscription,
            }),
        }
    }

    /// Returns the observer release failure, if any.
    pub fn observer_error(&self) -> Option<&EngineError> {
        match self {
            Self::Observer(error) | Self::Both { observer: error, .. } => Some(error),
            Self::Subscription(_) => None,
        }
    }

    /// Returns the subscription release failure, if any.
    pub fn subscription_error(&self) -> Option<&EngineError> {
        match self {
            Self::Subscription(error)
            | Self::Both {
                subscription: error,
                ..
            } => Some(error),
            Self::Observer(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_parts_combinations() {
        assert!(DisposalError::from_parts(None, None).is_none());

        let only_observer =
            DisposalError::from_parts(Some(EngineError::EngineClosed), None).unwrap();
        assert!(only_observer.observer_error().is_some());
        assert!(only_observer.subscription_error().is_none());

        let only_subscription =
            DisposalError::from_parts(None, Some(EngineError::EngineClosed)).unwrap();
        assert!(only_subscription.observer_error().is_none());
        assert!(only_subscription.subscription_error().is_some());

        let both = DisposalError::from_parts(
            Some(EngineError::EngineClosed),
            Some(EngineError::EngineClosed),
        )
        .unwrap();
        assert!(both.observer_error().is_some());
        assert!(both.subscription_error().is_some());
    }

    #[test]
    fn error_display() {
        let error = DisposalError::Both {
            observer: EngineError::EngineClosed,
            subscription: EngineError::EngineClosed,
        };
        let text = error.to_string();
        assert!(text.contains("observer"));
        assert!(text.contains("subscription"));

        let error = BridgeError::Registration(EngineError::missing_parameter("id"));
        assert!(error.to_string().contains("registration failed"));
    }
}
