use serde::Serialize;
use std::fmt;

/// Phase of the capture controller. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LifecycleState {
    #[default]
    Uninitialized,
    Initializing,
    Initialized,
    Started,
    Stopping,
    Stopped,
    Error,
}

impl LifecycleState {
    /// States `initialize` may run from. `Initialized` is accepted
    /// separately as a no-op.
    pub fn can_initialize(self) -> bool {
        matches!(self, Self::Uninitialized | Self::Stopped | Self::Error)
    }

    pub fn can_start(self) -> bool {
        matches!(self, Self::Initialized | Self::Stopped | Self::Error)
    }

    pub fn can_stop(self) -> bool {
        self == Self::Started
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Initialized => "initialized",
            Self::Started => "started",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}
