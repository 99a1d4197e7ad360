use thiserror::Error;

use crate::device::TrackingState;

/// Error type shared by all tracking devices and the network client.
#[derive(Debug, Error)]
pub enum TrackingError {
    /// The peer is unreachable or the connection broke down. Retrying is safe.
    #[error("connection failed: {0}")]
    Connection(String),

    /// No response within the allowed time. Retrying is safe.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Operation called from the wrong device state.
    #[error("invalid device state: operation requires {required:?} but device is in {actual:?}")]
    InvalidState {
        required: TrackingState,
        actual: TrackingState,
    },

    /// The vendor SDK or the hardware itself reported a failure.
    #[error("hardware failure: {0}")]
    Hardware(String),

    /// Bad configuration data, e.g. a malformed tool definition file.
    #[error("configuration error: {0}")]
    Config(String),
}

impl TrackingError {
    /// Expected runtime conditions callers may retry without reconfiguring.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TrackingError::Connection(_) | TrackingError::Timeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_and_timeout_are_recoverable() {
        assert!(TrackingError::Connection("no server".into()).is_recoverable());
        assert!(TrackingError::Timeout("no data".into()).is_recoverable());
    }

    #[test]
    fn state_hardware_and_config_errors_are_fatal() {
        let state_error = TrackingError::InvalidState {
            required: TrackingState::Ready,
            actual: TrackingState::Setup,
        };
        assert!(!state_error.is_recoverable());
        assert!(!TrackingError::Hardware("camera gone".into()).is_recoverable());
        assert!(!TrackingError::Config("bad tool file".into()).is_recoverable());
    }
}
