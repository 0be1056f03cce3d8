use thiserror::Error;

use crate::controller::state::LifecycleState;

/// Capture subsystem errors.
#[derive(Debug, Clone, Error)]
pub enum CaptureError {
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("device disconnected: {0}")]
    DeviceDisconnected(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("{operation} is not allowed while {state}")]
    InvalidState {
        operation: &'static str,
        state: LifecycleState,
    },

    #[error("settings error: {0}")]
    Settings(String),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),
}

impl CaptureError {
    /// Whether this error means the device went away mid-session.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::DeviceDisconnected(_))
    }
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, CaptureError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_state_message_names_operation_and_state() {
        let err = CaptureError::InvalidState {
            operation: "start",
            state: LifecycleState::Stopping,
        };
        assert_eq!(err.to_string(), "start is not allowed while stopping");
    }

    #[test]
    fn only_disconnected_counts_as_disconnect() {
        assert!(CaptureError::DeviceDisconnected("usb".into()).is_disconnect());
        assert!(!CaptureError::DeviceUnavailable("usb".into()).is_disconnect());
        assert!(!CaptureError::StorageUnavailable("disk".into()).is_disconnect());
    }
}
