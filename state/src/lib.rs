pub mod config;
pub mod engine;
pub mod error;


pub use engine::tracker::{InMemoryTracker, ResolvedPermissions, TrackerConfig};
pub use error::StateError;
