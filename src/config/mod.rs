//! Persistent player settings

mod settings;

pub use settings::{ConfigError, Settings};
