// Capture settings: JSON-backed configuration.

pub mod store;
pub mod types;
