//! Job state and status reporting

use crate::reader::SharedFile;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle phase of the current job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    /// No job loaded
    #[default]
    Idle,
    /// A job is open but has not started streaming
    Loading,
    /// The dispatch loop is running
    Running,
    /// Streaming stopped with the job still open
    Paused,
    /// The job ran to the end
    Completed,
    /// The job was cancelled
    Cancelled,
    /// The job stopped on an error
    Error,
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobPhase::Idle => "idle",
            JobPhase::Loading => "loading",
            JobPhase::Running => "running",
            JobPhase::Paused => "paused",
            JobPhase::Completed => "completed",
            JobPhase::Cancelled => "cancelled",
            JobPhase::Error => "error",
        };
        write!(f, "{}", name)
    }
}

/// The open job file
#[derive(Debug, Clone)]
pub(crate) struct JobFile {
    pub(crate) handle: SharedFile,
    pub(crate) path: String,
}

/// Mutable executor state, never held across a dispatch or an await
#[derive(Debug, Default)]
pub(crate) struct JobState {
    pub(crate) file: Option<JobFile>,
    pub(crate) position: u64,
    pub(crate) next_position: u64,
    pub(crate) size: u64,
    pub(crate) phase: JobPhase,
    pub(crate) active: bool,
    pub(crate) must_pause: bool,
    pub(crate) cancel_requested: bool,
    pub(crate) resume_pending: bool,
    pub(crate) runout_paused: bool,
    pub(crate) from_job: bool,
    pub(crate) last_error: Option<String>,
}

impl JobState {
    pub(crate) fn close(&mut self) {
        self.file = None;
        self.position = 0;
        self.next_position = 0;
        self.size = 0;
        self.resume_pending = false;
        self.runout_paused = false;
    }
}

/// Status snapshot of the executor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatus {
    /// Path of the open job
    pub file_path: Option<String>,
    /// Fraction of the file consumed
    pub progress: f64,
    /// Whether the dispatch loop is running
    pub is_active: bool,
    /// Byte offset of the next line
    pub file_position: u64,
    /// Job file size
    pub file_size: u64,
    /// Lifecycle phase
    pub phase: JobPhase,
    /// Message of the last failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl JobStatus {
    pub(crate) fn from_state(state: &JobState) -> Self {
        let progress = if state.size > 0 {
            state.position as f64 / state.size as f64
        } else {
            0.0
        };
        Self {
            file_path: state.file.as_ref().map(|f| f.path.clone()),
            progress,
            is_active: state.active,
            file_position: state.position,
            file_size: state.size,
            phase: state.phase,
            last_error: state.last_error.clone(),
        }
    }
}
