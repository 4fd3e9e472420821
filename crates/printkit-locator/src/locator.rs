//! Resume locator service
//!
//! The job streamer brackets every dispatched line with
//! [`ResumeLocator::record_begin`] and [`ResumeLocator::record_end`]. When
//! a runout or pause is detected, the recovery path saves the live motion
//! report under a tag with [`ResumeLocator::save_context`] and later
//! calls [`ResumeLocator::restore_context`], which runs the lookback and
//! points the streamer at the selected line.

use crate::config::LocatorConfig;
use crate::history::{History, MoveRecord};
use crate::search::{locate, LocateResult};
use parking_lot::RwLock;
use printkit_core::{
    register_reply_handler, thread_safe, CommandDispatcher, CommandError, CommandLine,
    CommandReply, EventBus, MotionModeSnapshot, MotionReport, MotionState, Position4,
    RecoveryEvent, ResumeTarget, ThreadSafe,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Instant;

/// Saved motion state name restored when the job resumes
pub const PAUSE_STATE: &str = "PAUSE_STATE";

/// Live motion state captured at an event
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SavedContext {
    /// Event time the state was captured for
    pub event_time: f64,
    /// Toolhead position at that time, if the report knew it
    pub live_position: Option<Position4>,
}

/// Status snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocatorStatus {
    /// History capacity
    pub history_size: usize,
    /// Records currently held
    pub history_len: usize,
    /// Sensor-to-nozzle dead length
    pub dead_length: f64,
    /// Gravity compensation minimum
    pub gravity_min: f64,
    /// Gravity compensation target
    pub gravity_target: f64,
}

#[derive(Debug)]
struct PendingRecord {
    line: String,
    offset: u64,
    timestamp: Instant,
    before: Position4,
    mode: MotionModeSnapshot,
}

#[derive(Debug)]
struct LocatorState {
    history: History,
    config: LocatorConfig,
    pending: Option<PendingRecord>,
    saved: HashMap<String, SavedContext>,
}

/// History-based resume point locator
pub struct ResumeLocator {
    state: ThreadSafe<LocatorState>,
    motion_state: Arc<dyn MotionState>,
    motion_report: Option<Arc<dyn MotionReport>>,
    target: RwLock<Option<Weak<dyn ResumeTarget>>>,
    events: Arc<EventBus>,
}

impl ResumeLocator {
    /// Create a locator with an empty history
    pub fn new(
        config: LocatorConfig,
        motion_state: Arc<dyn MotionState>,
        motion_report: Option<Arc<dyn MotionReport>>,
        events: Arc<EventBus>,
    ) -> Self {
        tracing::info!(
            history_size = config.history_size,
            dead_length = config.dead_length,
            "Resume locator ready"
        );
        Self {
            state: thread_safe(LocatorState {
                history: History::new(config.history_size),
                config,
                pending: None,
                saved: HashMap::new(),
            }),
            motion_state,
            motion_report,
            target: RwLock::new(None),
            events,
        }
    }

    /// Set the receiver of located resume offsets
    ///
    /// Held weakly; the streamer owns the locator, not the other way round.
    pub fn attach_target(&self, target: Weak<dyn ResumeTarget>) {
        *self.target.write() = Some(target);
    }

    /// Register `SET_LOCATOR_PARAMS`
    pub fn register_commands(self: &Arc<Self>, dispatcher: &Arc<dyn CommandDispatcher>) {
        register_reply_handler(dispatcher, "SET_LOCATOR_PARAMS", self, Self::cmd_set_params);
    }

    /// Start a record for the line about to be dispatched
    pub fn record_begin(&self, line: &str, offset: u64) {
        let pending = PendingRecord {
            line: line.to_string(),
            offset,
            timestamp: Instant::now(),
            before: self.motion_state.gcode_position(),
            mode: self.motion_state.snapshot(),
        };
        self.state.lock().pending = Some(pending);
    }

    /// Complete the open record and push it into history
    pub fn record_end(&self) {
        let mut state = self.state.lock();
        let Some(pending) = state.pending.take() else {
            return;
        };
        let record = MoveRecord {
            line: pending.line,
            offset: pending.offset,
            timestamp: pending.timestamp,
            before: pending.before,
            after: self.motion_state.gcode_position(),
            mode: pending.mode,
        };
        state.history.push(record);
    }

    /// Capture the live motion report under `key`
    pub fn save_context(&self, key: &str, event_time: f64) {
        let live_position = self
            .motion_report
            .as_ref()
            .and_then(|report| report.live_position(event_time));
        self.state.lock().saved.insert(
            key.to_string(),
            SavedContext {
                event_time,
                live_position,
            },
        );
    }

    /// Pop the context saved under `key` and resume from it
    ///
    /// Returns `None` when nothing usable was saved.
    pub fn restore_context(&self, key: &str) -> Option<LocateResult> {
        let saved = self.state.lock().saved.remove(key)?;
        let Some(live) = saved.live_position else {
            tracing::info!(key, "No live position saved, resume offset unchanged");
            return None;
        };
        Some(self.restore(live.e))
    }

    /// Run the lookback for `live_e` and apply the selected record
    ///
    /// With no selection the streamer's offset is left untouched.
    pub fn restore(&self, live_e: f64) -> LocateResult {
        let result = {
            let state = self.state.lock();
            locate(&state.history, live_e, &state.config)
        };

        let Some(record) = &result.candidate else {
            tracing::info!(examined = result.examined, "No resume point selected");
            return result;
        };

        let target = self.target.read().as_ref().and_then(Weak::upgrade);
        match target {
            Some(target) => target.set_resume_file_position(record.offset),
            None => {
                tracing::warn!(offset = record.offset, "No resume target attached");
                return result;
            }
        }
        self.motion_state.restore_snapshot(PAUSE_STATE, record.mode);
        tracing::info!(offset = record.offset, line = %record.line, "Resume point located");
        self.events.publish(RecoveryEvent::ResumeLocated {
            offset: record.offset,
            examined: result.examined,
        });
        result
    }

    /// Adjust tuning at runtime
    pub fn set_params(
        &self,
        history_size: Option<i64>,
        dead_length: Option<f64>,
        gravity_min: Option<f64>,
        gravity_target: Option<f64>,
    ) -> Result<(), CommandError> {
        let history_size = history_size
            .map(|size| {
                usize::try_from(size)
                    .map_err(|_| CommandError::rejected(format!("Invalid history size {}", size)))
            })
            .transpose()?;

        let mut state = self.state.lock();
        if let Some(size) = history_size {
            if size != state.config.history_size {
                state.history.set_capacity(size);
                state.config.history_size = size;
                tracing::info!(history_size = size, "History capacity changed");
            }
        }
        if let Some(value) = dead_length {
            state.config.dead_length = value;
            tracing::info!(dead_length = value, "Dead length changed");
        }
        if let Some(value) = gravity_min {
            state.config.gravity_min = value;
            tracing::info!(gravity_min = value, "Gravity minimum changed");
        }
        if let Some(value) = gravity_target {
            state.config.gravity_target = value;
            tracing::info!(gravity_target = value, "Gravity target changed");
        }
        Ok(())
    }

    /// Drop all history
    pub fn clear_history(&self) {
        let mut state = self.state.lock();
        state.history.clear();
        state.pending = None;
    }

    /// Number of records held
    pub fn history_len(&self) -> usize {
        self.state.lock().history.len()
    }

    /// Status snapshot
    pub fn status(&self) -> LocatorStatus {
        let state = self.state.lock();
        LocatorStatus {
            history_size: state.config.history_size,
            history_len: state.history.len(),
            dead_length: state.config.dead_length,
            gravity_min: state.config.gravity_min,
            gravity_target: state.config.gravity_target,
        }
    }

    fn cmd_set_params(&self, cmd: &CommandLine) -> CommandReply {
        let history_size = cmd.get_int("S")?;
        let dead_length = cmd.get_float("E")?;
        let gravity_min = cmd.get_float("N")?;
        let gravity_target = cmd.get_float("T")?;
        self.set_params(history_size, dead_length, gravity_min, gravity_target)?;
        Ok(None)
    }
}

impl std::fmt::Debug for ResumeLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResumeLocator")
            .field("status", &self.status())
            .finish()
    }
}
