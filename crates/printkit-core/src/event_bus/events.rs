//! Event type definitions for the event bus.
//!
//! Events are cloneable and serializable so they can be logged or
//! replayed from history.

use crate::data::Position4;
use serde::{Deserialize, Serialize};

/// Root event enum
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AppEvent {
    /// Job streaming lifecycle
    Job(JobEvent),
    /// Object exclusion changes
    Exclusion(ExclusionEvent),
    /// Resume location and checkpointing
    Recovery(RecoveryEvent),
}

impl AppEvent {
    /// Get the category of this event
    pub fn category(&self) -> EventCategory {
        match self {
            AppEvent::Job(_) => EventCategory::Job,
            AppEvent::Exclusion(_) => EventCategory::Exclusion,
            AppEvent::Recovery(_) => EventCategory::Recovery,
        }
    }

    /// Get a short description of this event for logging
    pub fn description(&self) -> String {
        match self {
            AppEvent::Job(e) => e.description(),
            AppEvent::Exclusion(e) => e.description(),
            AppEvent::Recovery(e) => e.description(),
        }
    }
}

impl From<JobEvent> for AppEvent {
    fn from(event: JobEvent) -> Self {
        AppEvent::Job(event)
    }
}

impl From<ExclusionEvent> for AppEvent {
    fn from(event: ExclusionEvent) -> Self {
        AppEvent::Exclusion(event)
    }
}

impl From<RecoveryEvent> for AppEvent {
    fn from(event: RecoveryEvent) -> Self {
        AppEvent::Recovery(event)
    }
}

/// Event category for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventCategory {
    /// Job streaming events.
    Job,
    /// Object exclusion events.
    Exclusion,
    /// Resume and checkpoint events.
    Recovery,
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventCategory::Job => write!(f, "Job"),
            EventCategory::Exclusion => write!(f, "Exclusion"),
            EventCategory::Recovery => write!(f, "Recovery"),
        }
    }
}

/// Job streaming events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JobEvent {
    /// A job started from the beginning of its file.
    Started {
        /// Path of the job file.
        path: String,
    },
    /// Streaming stopped at a byte offset and may be resumed.
    Paused {
        /// Byte offset the next read starts from.
        position: u64,
    },
    /// The job ran to the end of its file.
    Completed {
        /// Path of the job file.
        path: String,
    },
    /// The job was cancelled.
    Cancelled,
    /// The job ended with an error.
    Failed {
        /// Error message.
        error: String,
    },
    /// Exclusion bookkeeping overran and the job was finished early.
    ExclusionOverrun {
        /// The object whose close count tripped the threshold.
        object: String,
    },
}

impl JobEvent {
    fn description(&self) -> String {
        match self {
            JobEvent::Started { path } => format!("Job started: {}", path),
            JobEvent::Paused { position } => format!("Job paused at byte {}", position),
            JobEvent::Completed { path } => format!("Job completed: {}", path),
            JobEvent::Cancelled => "Job cancelled".to_string(),
            JobEvent::Failed { error } => format!("Job failed: {}", error),
            JobEvent::ExclusionOverrun { object } => {
                format!("Exclusion overrun on {}, finishing job", object)
            }
        }
    }
}

/// Object exclusion events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExclusionEvent {
    /// An object was added to the excluded set.
    ObjectExcluded {
        /// Object name.
        name: String,
    },
    /// An object was removed from the excluded set.
    ObjectIncluded {
        /// Object name.
        name: String,
    },
    /// Object tracking was disabled (capacity exceeded or by command).
    Disabled,
}

impl ExclusionEvent {
    fn description(&self) -> String {
        match self {
            ExclusionEvent::ObjectExcluded { name } => format!("Excluding object {}", name),
            ExclusionEvent::ObjectIncluded { name } => format!("Including object {}", name),
            ExclusionEvent::Disabled => "Object exclusion disabled".to_string(),
        }
    }
}

/// Resume and checkpoint events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RecoveryEvent {
    /// The locator chose a resume offset.
    ResumeLocated {
        /// Byte offset selected.
        offset: u64,
        /// Number of history records examined.
        examined: usize,
    },
    /// A power-loss checkpoint was written.
    CheckpointSaved {
        /// Byte offset recorded in the checkpoint.
        position: u64,
        /// Commanded toolhead position at the time.
        toolhead: Position4,
    },
}

impl RecoveryEvent {
    fn description(&self) -> String {
        match self {
            RecoveryEvent::ResumeLocated { offset, examined } => {
                format!("Resume located at byte {} ({} records examined)", offset, examined)
            }
            RecoveryEvent::CheckpointSaved { position, toolhead } => {
                format!("Checkpoint saved at byte {} ({})", position, toolhead)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_categories() {
        let event: AppEvent = JobEvent::Cancelled.into();
        assert_eq!(event.category(), EventCategory::Job);

        let event: AppEvent = ExclusionEvent::Disabled.into();
        assert_eq!(event.category(), EventCategory::Exclusion);
    }

    #[test]
    fn test_event_description() {
        let event = AppEvent::Recovery(RecoveryEvent::ResumeLocated {
            offset: 120,
            examined: 3,
        });
        assert_eq!(
            event.description(),
            "Resume located at byte 120 (3 records examined)"
        );
    }

    #[test]
    fn test_event_serialization() {
        let event = AppEvent::Job(JobEvent::Paused { position: 42 });
        let json = serde_json::to_string(&event).unwrap();
        let back: AppEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
