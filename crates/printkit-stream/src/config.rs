//! Streaming configuration

use serde::{Deserialize, Serialize};

/// Sequence run when an exclusion overrun forces the job to finish early
pub const DEFAULT_EXCLUSION_FINISH_SCRIPT: &str = "G92 E0
M106 S0
M107
M104 S0
M140 S0
G91
G1 Z0.5 F6000
G90
G28";

/// Job streaming settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Bytes per background read
    pub chunk_size: usize,
    /// How long to wait on the read worker before logging and retrying
    pub read_timeout_ms: u64,
    /// Pause between read polls once a read has timed out
    pub read_retry_ms: u64,
    /// Back-off while another request holds the dispatcher
    pub contention_backoff_ms: u64,
    /// Run when a fresh job is loaded
    pub start_script: String,
    /// Run when a job completes
    pub end_script: String,
    /// Run once when a job fails
    pub error_script: String,
    /// Run once when an exclusion overrun ends the job
    pub exclusion_finish_script: String,
    /// Run once before the first line of a resumed job
    pub resume_prepare_script: String,
    /// Check the runout sensor before the first line of each activation
    pub runout_check: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            chunk_size: 8192,
            read_timeout_ms: 1000,
            read_retry_ms: 10,
            contention_backoff_ms: 100,
            start_script: "START_PRINT".to_string(),
            end_script: "END_PRINT".to_string(),
            error_script: String::new(),
            exclusion_finish_script: DEFAULT_EXCLUSION_FINISH_SCRIPT.to_string(),
            resume_prepare_script: String::new(),
            runout_check: true,
        }
    }
}
