//! Simulated machine
//!
//! A headless stand-in for the host firmware: a command dispatcher, a
//! G-code move handler feeding the interception chain, a motion pipeline
//! that records what reaches it, print statistics, a runout switch and a
//! live position report. Used by the `run` command and the tests.

use crate::context::Collaborators;
use parking_lot::{Mutex, RwLock};
use printkit_core::{
    thread_safe, Axis, CommandDispatcher, CommandError, CommandHandler, CommandLine,
    MotionModeSnapshot, MotionPipeline, MotionReport, MotionState, Position4, PrintStats,
    Result, RunoutSensor, SharedChain, TransformChain,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Motion pipeline that records every delivered move
#[derive(Debug, Default)]
pub struct SimPipeline {
    moves: Mutex<Vec<Position4>>,
    position: Mutex<Position4>,
    print_time: Mutex<f64>,
}

impl SimPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves delivered so far
    pub fn moves(&self) -> Vec<Position4> {
        self.moves.lock().clone()
    }
}

impl MotionPipeline for SimPipeline {
    fn position(&self) -> Position4 {
        *self.position.lock()
    }

    fn move_to(&self, pos: Position4, speed: f64) -> Result<()> {
        let distance = {
            let mut current = self.position.lock();
            let delta = pos - *current;
            *current = pos;
            (delta.x * delta.x + delta.y * delta.y + delta.z * delta.z).sqrt()
        };
        if speed > 0.0 {
            *self.print_time.lock() += distance / speed;
        }
        self.moves.lock().push(pos);
        Ok(())
    }

    fn last_move_time(&self) -> f64 {
        *self.print_time.lock()
    }
}

#[derive(Debug)]
struct GcodeState {
    /// Last commanded position in machine space
    last_position: Position4,
    /// Machine-space origin set by `G92`
    base: Position4,
    absolute_coordinates: bool,
    absolute_extrude: bool,
    speed: f64,
    speed_factor: f64,
    extrude_factor: f64,
    saved: HashMap<String, MotionModeSnapshot>,
}

impl Default for GcodeState {
    fn default() -> Self {
        let modes = MotionModeSnapshot::default();
        Self {
            last_position: Position4::zero(),
            base: Position4::zero(),
            absolute_coordinates: modes.absolute_coordinates,
            absolute_extrude: modes.absolute_extrude,
            speed: modes.speed,
            speed_factor: modes.speed_factor,
            extrude_factor: modes.extrude_factor,
            saved: HashMap::new(),
        }
    }
}

type GcodeHandler = fn(&SimGcode, &CommandLine) -> std::result::Result<(), CommandError>;

/// G-code move handling in front of the interception chain
pub struct SimGcode {
    chain: SharedChain,
    state: Mutex<GcodeState>,
}

impl SimGcode {
    pub fn new(chain: SharedChain) -> Self {
        Self {
            chain,
            state: Mutex::new(GcodeState::default()),
        }
    }

    /// Register the motion commands
    pub fn register_commands(self: &Arc<Self>, dispatcher: &dyn CommandDispatcher) {
        let handlers: [(&str, GcodeHandler); 10] = [
            ("G0", Self::cmd_move),
            ("G1", Self::cmd_move),
            ("G28", Self::cmd_home),
            ("G90", |this, _| this.set_modes(Some(true), None)),
            ("G91", |this, _| this.set_modes(Some(false), None)),
            ("M82", |this, _| this.set_modes(None, Some(true))),
            ("M83", |this, _| this.set_modes(None, Some(false))),
            ("G92", Self::cmd_set_position),
            ("SAVE_GCODE_STATE", Self::cmd_save_state),
            ("RESTORE_GCODE_STATE", Self::cmd_restore_state),
        ];
        for (name, handler) in handlers {
            let this = Arc::clone(self);
            dispatcher.register_command(
                name,
                Arc::new(move |cmd: &CommandLine| handler(&this, cmd)),
            );
        }
    }

    fn cmd_move(&self, cmd: &CommandLine) -> std::result::Result<(), CommandError> {
        let (target, speed) = {
            let mut state = self.state.lock();
            let mut target = state.last_position;
            for (axis, key) in [(Axis::X, "X"), (Axis::Y, "Y"), (Axis::Z, "Z")] {
                if let Some(value) = cmd.get_float(key)? {
                    target[axis] = if state.absolute_coordinates {
                        value + state.base[axis]
                    } else {
                        target[axis] + value
                    };
                }
            }
            if let Some(value) = cmd.get_float("E")? {
                let value = value * state.extrude_factor;
                target.e = if state.absolute_coordinates && state.absolute_extrude {
                    value + state.base.e
                } else {
                    target.e + value
                };
            }
            if let Some(feed) = cmd.get_float("F")? {
                if feed <= 0.0 {
                    return Err(cmd.malformed("F", "feed rate must be positive"));
                }
                state.speed = feed / 60.0;
            }
            state.last_position = target;
            (target, state.speed * state.speed_factor)
        };
        self.chain
            .lock()
            .move_to(target, speed)
            .map_err(|e| CommandError::rejected(e.to_string()))
    }

    fn cmd_home(&self, cmd: &CommandLine) -> std::result::Result<(), CommandError> {
        let (target, speed) = {
            let mut state = self.state.lock();
            let mut target = state.last_position;
            let all = !["X", "Y", "Z"].iter().any(|key| cmd.has(key));
            for (axis, key) in [(Axis::X, "X"), (Axis::Y, "Y"), (Axis::Z, "Z")] {
                if all || cmd.has(key) {
                    target[axis] = 0.0;
                    state.base[axis] = 0.0;
                }
            }
            state.last_position = target;
            (target, state.speed)
        };
        self.chain
            .lock()
            .move_to(target, speed)
            .map_err(|e| CommandError::rejected(e.to_string()))
    }

    fn set_modes(
        &self,
        absolute_coordinates: Option<bool>,
        absolute_extrude: Option<bool>,
    ) -> std::result::Result<(), CommandError> {
        let mut state = self.state.lock();
        if let Some(value) = absolute_coordinates {
            state.absolute_coordinates = value;
        }
        if let Some(value) = absolute_extrude {
            state.absolute_extrude = value;
        }
        Ok(())
    }

    fn cmd_set_position(&self, cmd: &CommandLine) -> std::result::Result<(), CommandError> {
        let mut state = self.state.lock();
        let keys = [(Axis::X, "X"), (Axis::Y, "Y"), (Axis::Z, "Z"), (Axis::E, "E")];
        let mut any = false;
        for (axis, key) in keys {
            if let Some(value) = cmd.get_float(key)? {
                state.base[axis] = state.last_position[axis] - value;
                any = true;
            }
        }
        if !any {
            state.base = state.last_position;
        }
        Ok(())
    }

    fn cmd_save_state(&self, cmd: &CommandLine) -> std::result::Result<(), CommandError> {
        let name = cmd.get("NAME").unwrap_or("default").to_lowercase();
        let snapshot = self.snapshot();
        self.state.lock().saved.insert(name, snapshot);
        Ok(())
    }

    fn cmd_restore_state(&self, cmd: &CommandLine) -> std::result::Result<(), CommandError> {
        let name = cmd.get("NAME").unwrap_or("default").to_lowercase();
        let mut state = self.state.lock();
        let snapshot = state
            .saved
            .get(&name)
            .copied()
            .ok_or_else(|| CommandError::rejected(format!("Unknown g-code state: {}", name)))?;
        state.absolute_coordinates = snapshot.absolute_coordinates;
        state.absolute_extrude = snapshot.absolute_extrude;
        state.speed = snapshot.speed;
        state.speed_factor = snapshot.speed_factor;
        state.extrude_factor = snapshot.extrude_factor;
        Ok(())
    }

    /// Saved state by name
    pub fn saved_state(&self, name: &str) -> Option<MotionModeSnapshot> {
        self.state.lock().saved.get(&name.to_lowercase()).copied()
    }
}

impl MotionState for SimGcode {
    fn gcode_position(&self) -> Position4 {
        let state = self.state.lock();
        state.last_position - state.base
    }

    fn snapshot(&self) -> MotionModeSnapshot {
        let state = self.state.lock();
        MotionModeSnapshot {
            absolute_coordinates: state.absolute_coordinates,
            absolute_extrude: state.absolute_extrude,
            speed: state.speed,
            speed_factor: state.speed_factor,
            extrude_factor: state.extrude_factor,
            last_position: state.last_position,
        }
    }

    fn restore_snapshot(&self, name: &str, snapshot: MotionModeSnapshot) {
        self.state.lock().saved.insert(name.to_lowercase(), snapshot);
    }

    fn reset_last_position(&self) {
        let position = self.chain.lock().position();
        self.state.lock().last_position = position;
    }
}

/// Command dispatcher for the simulated host
///
/// Commands without a handler are accepted and recorded as ignored
/// unless the dispatcher is strict.
#[derive(Default)]
pub struct SimDispatcher {
    handlers: RwLock<HashMap<String, CommandHandler>>,
    dispatched: Mutex<Vec<String>>,
    ignored: Mutex<Vec<String>>,
    responses: Mutex<Vec<String>>,
    busy: AtomicBool,
    strict: bool,
}

impl SimDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject commands without a handler
    pub fn strict() -> Self {
        Self {
            strict: true,
            ..Self::default()
        }
    }

    /// Make `try_acquire` report contention
    pub fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::SeqCst);
    }

    /// Every line that reached a command word, in order
    pub fn dispatched(&self) -> Vec<String> {
        self.dispatched.lock().clone()
    }

    /// Lines accepted without a handler
    pub fn ignored(&self) -> Vec<String> {
        self.ignored.lock().clone()
    }

    /// Informational responses
    pub fn responses(&self) -> Vec<String> {
        self.responses.lock().clone()
    }
}

impl CommandDispatcher for SimDispatcher {
    fn register_command(&self, name: &str, handler: CommandHandler) {
        self.handlers.write().insert(name.to_uppercase(), handler);
    }

    fn dispatch(&self, line: &str) -> std::result::Result<(), CommandError> {
        let Some(cmd) = CommandLine::parse(line) else {
            return Ok(());
        };
        self.dispatched.lock().push(cmd.raw().to_string());
        // Handlers may dispatch nested commands
        let handler = self.handlers.read().get(cmd.name()).cloned();
        match handler {
            Some(handler) => handler(&cmd),
            None if self.strict => Err(CommandError::UnknownCommand {
                name: cmd.name().to_string(),
            }),
            None => {
                tracing::debug!(command = %cmd.name(), "No handler, command ignored");
                self.ignored.lock().push(cmd.raw().to_string());
                Ok(())
            }
        }
    }

    fn try_acquire(&self) -> bool {
        !self.busy.load(Ordering::SeqCst)
    }

    fn respond_info(&self, message: &str) {
        tracing::info!(target: "printkit::console", "{}", message);
        self.responses.lock().push(message.to_string());
    }
}

/// Print statistics snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimStatsSnapshot {
    pub filename: String,
    pub state: &'static str,
    pub message: String,
    pub print_duration: f64,
}

#[derive(Debug)]
struct StatsState {
    filename: String,
    state: &'static str,
    message: String,
    duration: f64,
    started: Option<Instant>,
}

/// Print statistics tracked in memory
#[derive(Debug)]
pub struct SimPrintStats {
    state: Mutex<StatsState>,
}

impl Default for SimPrintStats {
    fn default() -> Self {
        Self {
            state: Mutex::new(StatsState {
                filename: String::new(),
                state: "standby",
                message: String::new(),
                duration: 0.0,
                started: None,
            }),
        }
    }
}

impl SimPrintStats {
    pub fn snapshot(&self) -> SimStatsSnapshot {
        let state = self.state.lock();
        SimStatsSnapshot {
            filename: state.filename.clone(),
            state: state.state,
            message: state.message.clone(),
            print_duration: duration(&state),
        }
    }

    fn transition(&self, to: &'static str, message: &str) {
        let mut state = self.state.lock();
        state.duration = duration(&state);
        state.started = (to == "printing").then(Instant::now);
        state.state = to;
        state.message = message.to_string();
    }
}

fn duration(state: &StatsState) -> f64 {
    state.duration
        + state
            .started
            .map(|started| started.elapsed().as_secs_f64())
            .unwrap_or(0.0)
}

impl PrintStats for SimPrintStats {
    fn set_current_file(&self, path: &str) {
        self.reset();
        self.state.lock().filename = path.to_string();
    }

    fn note_start(&self) {
        self.transition("printing", "");
    }

    fn note_pause(&self) {
        self.transition("paused", "");
    }

    fn note_complete(&self) {
        self.transition("complete", "");
    }

    fn note_error(&self, message: &str) {
        self.transition("error", message);
    }

    fn note_cancel(&self) {
        self.transition("cancelled", "");
    }

    fn reset(&self) {
        let mut state = self.state.lock();
        state.filename.clear();
        state.state = "standby";
        state.message.clear();
        state.duration = 0.0;
        state.started = None;
    }

    fn print_duration(&self) -> f64 {
        duration(&self.state.lock())
    }

    fn set_print_duration(&self, seconds: f64) {
        self.state.lock().duration = seconds;
    }
}

/// Filament switch
#[derive(Debug)]
pub struct SimRunout(AtomicBool);

impl SimRunout {
    pub fn new(present: bool) -> Self {
        Self(AtomicBool::new(present))
    }

    pub fn set_present(&self, present: bool) {
        self.0.store(present, Ordering::SeqCst);
    }
}

impl RunoutSensor for SimRunout {
    fn filament_present(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Live position report
///
/// Reports the pipeline position, optionally with a fixed extruder lag
/// standing in for material that never left the nozzle.
pub struct SimReport {
    pipeline: Arc<SimPipeline>,
    extruder_lag: Mutex<f64>,
}

impl SimReport {
    pub fn new(pipeline: Arc<SimPipeline>) -> Self {
        Self {
            pipeline,
            extruder_lag: Mutex::new(0.0),
        }
    }

    pub fn set_extruder_lag(&self, lag: f64) {
        *self.extruder_lag.lock() = lag;
    }
}

impl MotionReport for SimReport {
    fn live_position(&self, _event_time: f64) -> Option<Position4> {
        let mut position = self.pipeline.position();
        position.e -= *self.extruder_lag.lock();
        Some(position)
    }
}

/// All simulated collaborators wired together
pub struct SimMachine {
    pub pipeline: Arc<SimPipeline>,
    pub chain: SharedChain,
    pub gcode: Arc<SimGcode>,
    pub dispatcher: Arc<SimDispatcher>,
    pub stats: Arc<SimPrintStats>,
    pub runout: Arc<SimRunout>,
    pub report: Arc<SimReport>,
}

impl SimMachine {
    pub fn new() -> Self {
        Self::with_dispatcher(SimDispatcher::new())
    }

    pub fn with_dispatcher(dispatcher: SimDispatcher) -> Self {
        let pipeline = Arc::new(SimPipeline::new());
        let chain = thread_safe(TransformChain::new(pipeline.clone()));
        let gcode = Arc::new(SimGcode::new(chain.clone()));
        let dispatcher = Arc::new(dispatcher);
        gcode.register_commands(dispatcher.as_ref());
        Self {
            report: Arc::new(SimReport::new(pipeline.clone())),
            pipeline,
            chain,
            gcode,
            dispatcher,
            stats: Arc::new(SimPrintStats::default()),
            runout: Arc::new(SimRunout::new(true)),
        }
    }

    /// Collaborators for a context; the variable store is left to the caller
    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            dispatcher: Some(self.dispatcher.clone()),
            chain: Some(self.chain.clone()),
            motion_state: Some(self.gcode.clone()),
            stats: Some(self.stats.clone()),
            motion_report: Some(self.report.clone()),
            runout: Some(self.runout.clone()),
            ..Default::default()
        }
    }
}

impl Default for SimMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolute_and_relative_moves() {
        let machine = SimMachine::new();
        let dispatcher = machine.dispatcher.as_ref();
        dispatcher.dispatch("G1 X10 Y5 Z0.2 E1 F600").unwrap();
        dispatcher.dispatch("M83").unwrap();
        dispatcher.dispatch("G1 X12 E0.5").unwrap();
        dispatcher.dispatch("G91").unwrap();
        dispatcher.dispatch("G1 Y1").unwrap();

        let moves = machine.pipeline.moves();
        assert_eq!(moves[0], Position4::new(10.0, 5.0, 0.2, 1.0));
        assert_eq!(moves[1], Position4::new(12.0, 5.0, 0.2, 1.5));
        assert_eq!(moves[2], Position4::new(12.0, 6.0, 0.2, 1.5));
        assert_eq!(machine.gcode.gcode_position(), moves[2]);
    }

    #[test]
    fn test_set_position_offsets_gcode_coordinates() {
        let machine = SimMachine::new();
        let dispatcher = machine.dispatcher.as_ref();
        dispatcher.dispatch("G1 X1 E5").unwrap();
        dispatcher.dispatch("G92 E0").unwrap();
        assert_eq!(machine.gcode.gcode_position().e, 0.0);

        dispatcher.dispatch("G1 E2").unwrap();
        assert_eq!(machine.pipeline.position().e, 7.0);
        assert_eq!(machine.gcode.gcode_position().e, 2.0);
    }

    #[test]
    fn test_unknown_commands() {
        let lenient = SimMachine::new();
        lenient.dispatcher.dispatch("M104 S200").unwrap();
        assert_eq!(lenient.dispatcher.ignored(), vec!["M104 S200"]);

        let strict = SimMachine::with_dispatcher(SimDispatcher::strict());
        assert!(matches!(
            strict.dispatcher.dispatch("M104 S200"),
            Err(CommandError::UnknownCommand { .. })
        ));
    }

    #[test]
    fn test_save_and_restore_modes() {
        let machine = SimMachine::new();
        let dispatcher = machine.dispatcher.as_ref();
        dispatcher.dispatch("SAVE_GCODE_STATE NAME=before").unwrap();
        dispatcher.dispatch("G91").unwrap();
        assert!(!machine.gcode.snapshot().absolute_coordinates);
        dispatcher.dispatch("RESTORE_GCODE_STATE NAME=before").unwrap();
        assert!(machine.gcode.snapshot().absolute_coordinates);
        assert!(dispatcher.dispatch("RESTORE_GCODE_STATE NAME=missing").is_err());
    }

    #[test]
    fn test_stats_transitions() {
        let stats = SimPrintStats::default();
        stats.set_current_file("part.gcode");
        stats.note_start();
        stats.note_error("heater fault");
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.filename, "part.gcode");
        assert_eq!(snapshot.state, "error");
        assert_eq!(snapshot.message, "heater fault");

        stats.set_print_duration(42.0);
        assert_eq!(stats.print_duration(), 42.0);
    }
}
