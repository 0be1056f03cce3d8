// Capture controller: lifecycle state machine, acquisition loop, status events.

pub mod capture;
pub mod notifier;
pub mod state;
