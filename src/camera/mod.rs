// Camera domain: device trait, session handle, simulated and mock devices.

pub mod backend;
pub mod dummy;
pub mod error;
pub mod mock;
pub mod session;
pub mod types;
