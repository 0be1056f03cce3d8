// Dataset recording: capture targets and the PNG sequence writer.

pub mod target;
pub mod writer;
