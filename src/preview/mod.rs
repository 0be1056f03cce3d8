// Preview pipeline: depth colorizing, frame rendering, and image hand-off.

pub mod colorize;
pub mod render;
pub mod slot;
