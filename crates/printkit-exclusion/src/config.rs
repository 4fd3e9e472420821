//! Exclusion filter tuning

use serde::{Deserialize, Serialize};

/// Object exclusion settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExclusionConfig {
    /// Maximum number of object definitions before tracking is disabled
    pub max_objects: usize,
    /// Close-count threshold that signals an exclusion overrun
    pub overrun_threshold: u32,
    /// Pause after a region start inside an excluded region, in milliseconds
    pub settle_delay_ms: u64,
    /// Extruding moves the stage observes before it starts suppressing
    pub warmup_extrusions: u32,
}

impl Default for ExclusionConfig {
    fn default() -> Self {
        Self {
            max_objects: 64,
            overrun_threshold: 3,
            settle_delay_ms: 20,
            warmup_extrusions: 5,
        }
    }
}
