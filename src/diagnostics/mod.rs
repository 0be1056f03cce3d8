// Per-session capture counters.

pub mod stats;
