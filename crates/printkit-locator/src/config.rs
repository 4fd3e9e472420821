//! Locator tuning parameters

use serde::{Deserialize, Serialize};

/// Tuning for the resume search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    /// Number of dispatched moves kept in history
    pub history_size: usize,
    /// Filament length between the runout sensor and the nozzle (mm)
    pub dead_length: f64,
    /// Minimum extrusion to back up by when no material is missing (mm)
    pub gravity_min: f64,
    /// Extrusion the backup should approach without exceeding (mm)
    pub gravity_target: f64,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            history_size: 500,
            dead_length: 13.5,
            gravity_min: 0.0,
            gravity_target: 0.0,
        }
    }
}

impl LocatorConfig {
    /// Whether gravity-loss compensation is enabled
    pub fn gravity_configured(&self) -> bool {
        self.gravity_min > 0.0
    }
}
