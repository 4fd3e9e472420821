//! PrintKit Settings Crate
//!
//! Handles the configuration file and the durable session variable store.

pub mod config;
pub mod error;
pub mod variables;

pub use config::{PersistenceConfig, PrintkitConfig, MIN_HISTORY_SIZE};
pub use error::{SettingsError, SettingsResult};
pub use variables::FileVariableStore;
