//! Collaborator interfaces consumed from the host
//!
//! The job executor, exclusion filter and resume locator never talk to
//! hardware or parse the command language themselves. They consume the
//! narrow interfaces below, which the host process provides once at
//! startup through the context.

use crate::command::CommandLine;
use crate::data::{MotionModeSnapshot, Position4};
use crate::error::{CommandError, Result};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

/// Handler invoked by the dispatcher for a registered command word
pub type CommandHandler =
    Arc<dyn Fn(&CommandLine) -> std::result::Result<(), CommandError> + Send + Sync>;

/// Result of a command handler that may answer the operator
pub type CommandReply = std::result::Result<Option<String>, CommandError>;

/// Durable session variables, keyed by name
pub type VariableMap = BTreeMap<String, serde_json::Value>;

/// Command dispatcher
///
/// Routes a line of text to the handler registered for its command word.
pub trait CommandDispatcher: Send + Sync {
    /// Register a handler for a command word
    fn register_command(&self, name: &str, handler: CommandHandler);

    /// Dispatch one line synchronously
    fn dispatch(&self, line: &str) -> std::result::Result<(), CommandError>;

    /// Non-blocking contention probe
    ///
    /// Returns `false` while another pending request holds the dispatcher,
    /// in which case the job streamer yields and retries later.
    fn try_acquire(&self) -> bool;

    /// Send an informational response to the operator
    fn respond_info(&self, message: &str);
}

/// Physical motion pipeline at the tail of the interception chain
pub trait MotionPipeline: Send + Sync {
    /// Last position handed to the pipeline
    fn position(&self) -> Position4;

    /// Queue a move to `pos` at `speed` (mm/s)
    fn move_to(&self, pos: Position4, speed: f64) -> Result<()>;

    /// Print time of the last queued move
    fn last_move_time(&self) -> f64;
}

/// Command-level motion state (coordinate modes, commanded position)
pub trait MotionState: Send + Sync {
    /// Last commanded position in command coordinates
    fn gcode_position(&self) -> Position4;

    /// Snapshot of the active motion modes
    fn snapshot(&self) -> MotionModeSnapshot;

    /// Store `snapshot` under `name` so a later restore applies it
    fn restore_snapshot(&self, name: &str, snapshot: MotionModeSnapshot);

    /// Re-read the commanded position from the interception chain
    fn reset_last_position(&self);
}

/// Live motion report, used to find where the toolhead physically was
pub trait MotionReport: Send + Sync {
    /// Toolhead position at `event_time`, if known
    fn live_position(&self, event_time: f64) -> Option<Position4>;
}

/// Durable key-value persistence for session variables
pub trait VariableStore: Send + Sync {
    /// Merge `variables` into the store and schedule a best-effort write
    fn set_variables(&self, variables: VariableMap);

    /// Snapshot of all variables
    fn variables(&self) -> VariableMap;
}

/// Print statistics tracker
pub trait PrintStats: Send + Sync {
    /// A new job file was selected
    fn set_current_file(&self, path: &str);
    /// Streaming started or resumed
    fn note_start(&self);
    /// Streaming paused
    fn note_pause(&self);
    /// The job ran to completion
    fn note_complete(&self);
    /// The job failed
    fn note_error(&self, message: &str);
    /// The job was cancelled
    fn note_cancel(&self);
    /// Clear all statistics
    fn reset(&self);
    /// Elapsed print duration in seconds
    fn print_duration(&self) -> f64;
    /// Overwrite the elapsed print duration, used when resuming
    fn set_print_duration(&self, seconds: f64);
}

/// Material presence sensor
pub trait RunoutSensor: Send + Sync {
    /// Whether material is detected at the sensor
    fn filament_present(&self) -> bool;
}

/// Receiver of resume offsets computed by the locator
pub trait ResumeTarget: Send + Sync {
    /// Current byte offset the next read would start from
    fn resume_file_position(&self) -> u64;

    /// Overwrite the byte offset the next read starts from
    fn set_resume_file_position(&self, pos: u64);
}

/// Dispatch a multi-line script, stopping at the first failing line
pub fn run_script(
    dispatcher: &dyn CommandDispatcher,
    script: &str,
) -> std::result::Result<(), CommandError> {
    for line in script.lines() {
        if line.trim().is_empty() {
            continue;
        }
        dispatcher.dispatch(line)?;
    }
    Ok(())
}

/// Register a handler that is a method on a shared service
///
/// The handler's reply, if any, is sent back through the dispatcher's
/// informational channel. The dispatcher is held weakly so that a
/// service registered on it does not keep it alive.
pub fn register_reply_handler<T, F>(
    dispatcher: &Arc<dyn CommandDispatcher>,
    name: &str,
    target: &Arc<T>,
    handler: F,
) where
    T: Send + Sync + 'static,
    F: Fn(&T, &CommandLine) -> CommandReply + Send + Sync + 'static,
{
    let target = Arc::clone(target);
    let responder: Weak<dyn CommandDispatcher> = Arc::downgrade(dispatcher);
    dispatcher.register_command(
        name,
        Arc::new(move |cmd: &CommandLine| {
            if let Some(message) = handler(target.as_ref(), cmd)? {
                if let Some(dispatcher) = responder.upgrade() {
                    dispatcher.respond_info(&message);
                }
            }
            Ok(())
        }),
    );
}
