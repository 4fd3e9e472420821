//! Power-loss checkpoints and interrupted job recovery
//!
//! `SAVE_CHECKPOINT` records where the running job is, in the file and in
//! space, together with the exclusion state. `RESUME_INTERRUPTED` reads
//! that record back, restores the exclusion set and the coordinate modes,
//! and reopens the job at the saved offset.

use crate::executor::StreamExecutor;
use printkit_core::{
    register_reply_handler, run_script, CommandDispatcher, CommandError, CommandLine,
    CommandReply, EventBus, MotionState, Position4, PrintStats, RecoveryEvent, VariableMap,
    VariableStore,
};
use printkit_exclusion::ExcludeObject;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

fn default_enabled() -> bool {
    true
}

/// Durable record of an interrupted job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Set while a checkpointed job has not been resumed
    pub was_interrupted: bool,
    /// Path of the job file
    pub sd_filename: String,
    /// Byte offset of the checkpoint line
    pub file_position: u64,
    /// Commanded extruder position
    pub e_pos: f64,
    /// Commanded X position
    pub x_pos: f64,
    /// Commanded Y position
    pub y_pos: f64,
    /// Commanded Z position
    pub z_pos: f64,
    /// Extruder in absolute mode (M82)
    pub absolute_extrude: bool,
    /// Axes in absolute mode (G90)
    pub absolute_coordinates: bool,
    /// Elapsed print time in seconds
    pub print_duration: f64,
    /// Objects excluded when the checkpoint was taken
    #[serde(default)]
    pub excluded_objects: Vec<String>,
    /// Exclusion enable flag
    #[serde(default = "default_enabled")]
    pub objects_enabled: bool,
}

impl Checkpoint {
    /// Toolhead position at the checkpoint
    pub fn position(&self) -> Position4 {
        Position4::new(self.x_pos, self.y_pos, self.z_pos, self.e_pos)
    }

    /// Flatten into session variables
    pub fn to_variables(&self) -> Result<VariableMap, serde_json::Error> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => Ok(map.into_iter().collect()),
            _ => Ok(VariableMap::new()),
        }
    }

    /// Read back from session variables; unrelated keys are ignored
    pub fn from_variables(variables: &VariableMap) -> Result<Self, serde_json::Error> {
        let map: serde_json::Map<String, serde_json::Value> = variables
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        serde_json::from_value(serde_json::Value::Object(map))
    }
}

/// Checkpoint writer and interrupted job recovery
pub struct PowerLossRecovery {
    executor: Arc<StreamExecutor>,
    exclusion: Option<Arc<ExcludeObject>>,
    motion_state: Arc<dyn MotionState>,
    stats: Arc<dyn PrintStats>,
    store: Arc<dyn VariableStore>,
    dispatcher: Arc<dyn CommandDispatcher>,
    events: Arc<EventBus>,
}

impl PowerLossRecovery {
    /// Create the recovery service around a job executor
    ///
    /// `exclusion` is optional; without it checkpoints carry an empty
    /// exclusion set.
    pub fn new(
        executor: Arc<StreamExecutor>,
        exclusion: Option<Arc<ExcludeObject>>,
        motion_state: Arc<dyn MotionState>,
        stats: Arc<dyn PrintStats>,
        store: Arc<dyn VariableStore>,
        dispatcher: Arc<dyn CommandDispatcher>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            executor,
            exclusion,
            motion_state,
            stats,
            store,
            dispatcher,
            events,
        }
    }

    /// Register `SAVE_CHECKPOINT` and `RESUME_INTERRUPTED`
    pub fn register_commands(self: &Arc<Self>, dispatcher: &Arc<dyn CommandDispatcher>) {
        register_reply_handler(dispatcher, "SAVE_CHECKPOINT", self, |this, _cmd| {
            this.save_checkpoint();
            Ok(None)
        });
        register_reply_handler(dispatcher, "RESUME_INTERRUPTED", self, Self::cmd_resume);
    }

    /// Record the running job's progress
    ///
    /// Does nothing while no job is streaming. Failures are logged.
    pub fn save_checkpoint(&self) -> Option<Checkpoint> {
        let status = self.executor.report_status();
        if !status.is_active {
            tracing::debug!("No job streaming, checkpoint skipped");
            return None;
        }
        let sd_filename = status.file_path?;

        let position = self.motion_state.gcode_position();
        let modes = self.motion_state.snapshot();
        let (excluded_objects, objects_enabled) = match &self.exclusion {
            Some(exclusion) => (exclusion.excluded_objects(), exclusion.enabled()),
            None => (Vec::new(), true),
        };
        let checkpoint = Checkpoint {
            was_interrupted: true,
            sd_filename,
            file_position: status.file_position,
            e_pos: position.e,
            x_pos: position.x,
            y_pos: position.y,
            z_pos: position.z,
            absolute_extrude: modes.absolute_extrude,
            absolute_coordinates: modes.absolute_coordinates,
            print_duration: self.stats.print_duration(),
            excluded_objects,
            objects_enabled,
        };

        match checkpoint.to_variables() {
            Ok(vars) => self.store.set_variables(vars),
            Err(e) => {
                tracing::error!(error = %e, "Checkpoint serialization failed");
                return None;
            }
        }
        tracing::debug!(file_position = checkpoint.file_position, "Checkpoint saved");
        self.events.publish(RecoveryEvent::CheckpointSaved {
            position: checkpoint.file_position,
            toolhead: position,
        });
        Some(checkpoint)
    }

    /// Reopen the job recorded by the last checkpoint
    pub fn resume_interrupted(&self) -> CommandReply {
        if self.executor.is_active() {
            return Ok(Some("Job is running, can't resume interrupted".to_string()));
        }
        let checkpoint = Checkpoint::from_variables(&self.store.variables())
            .map_err(|e| CommandError::rejected(format!("No usable checkpoint: {}", e)))?;
        if !checkpoint.was_interrupted {
            return Ok(Some("No interrupted job to resume".to_string()));
        }

        tracing::info!(
            file = %checkpoint.sd_filename,
            file_position = checkpoint.file_position,
            position = %checkpoint.position(),
            "Resuming interrupted job"
        );

        if let Some(exclusion) = &self.exclusion {
            exclusion.restore_state(checkpoint.objects_enabled, &checkpoint.excluded_objects)?;
        }

        let modes = format!(
            "{}\nG92 E{}\n{}",
            if checkpoint.absolute_extrude { "M82" } else { "M83" },
            checkpoint.e_pos,
            if checkpoint.absolute_coordinates { "G90" } else { "G91" },
        );
        run_script(self.dispatcher.as_ref(), &modes)?;

        self.executor.recover_print(
            &checkpoint.sd_filename,
            checkpoint.file_position,
            checkpoint.print_duration,
        )?;

        let mut cleared = VariableMap::new();
        cleared.insert("was_interrupted".to_string(), false.into());
        self.store.set_variables(cleared);

        Ok(Some(format!(
            "Resuming {} at byte {}",
            checkpoint.sd_filename, checkpoint.file_position
        )))
    }

    fn cmd_resume(&self, _cmd: &CommandLine) -> CommandReply {
        self.resume_interrupted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpoint() -> Checkpoint {
        Checkpoint {
            was_interrupted: true,
            sd_filename: "/jobs/part.gcode".to_string(),
            file_position: 4096,
            e_pos: 12.5,
            x_pos: 10.0,
            y_pos: 20.0,
            z_pos: 0.6,
            absolute_extrude: false,
            absolute_coordinates: true,
            print_duration: 321.0,
            excluded_objects: vec!["B".to_string()],
            objects_enabled: true,
        }
    }

    #[test]
    fn test_checkpoint_variable_names() {
        let vars = checkpoint().to_variables().unwrap();
        for key in [
            "was_interrupted",
            "sd_filename",
            "file_position",
            "e_pos",
            "x_pos",
            "y_pos",
            "z_pos",
            "absolute_extrude",
            "absolute_coordinates",
            "print_duration",
            "excluded_objects",
            "objects_enabled",
        ] {
            assert!(vars.contains_key(key), "missing {}", key);
        }
        assert_eq!(vars["file_position"], serde_json::json!(4096));
    }

    #[test]
    fn test_checkpoint_ignores_unrelated_variables() {
        let mut vars = checkpoint().to_variables().unwrap();
        vars.insert("nozzle_wipes".to_string(), serde_json::json!(3));
        vars.remove("excluded_objects");
        vars.remove("objects_enabled");
        let restored = Checkpoint::from_variables(&vars).unwrap();
        assert!(restored.excluded_objects.is_empty());
        assert!(restored.objects_enabled);
        assert_eq!(restored.position(), Position4::new(10.0, 20.0, 0.6, 12.5));
    }

    #[test]
    fn test_missing_checkpoint_is_an_error() {
        assert!(Checkpoint::from_variables(&VariableMap::new()).is_err());
    }
}
