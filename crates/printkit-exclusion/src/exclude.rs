//! Object exclusion service and control commands
//!
//! Owns the object registry and installs the [`ExclusionStage`] at the
//! head of the motion chain the first time anything is excluded. The
//! stage stays in place until the job file is reset.
//!
//! Registered commands:
//! - `EXCLUDE_OBJECT_START NAME=<name>`
//! - `EXCLUDE_OBJECT_END [NAME=<name>]`
//! - `EXCLUDE_OBJECT [NAME=<name>] [CURRENT=1] [RESET=1]`
//! - `EXCLUDE_OBJECT_DEFINE [NAME=<name>] [CENTER=x,y] [POLYGON=[[x,y],...]] [RESET=1] [JSON=1]`
//! - `SET_EXCLUDE_ENABLE [ENABLE=0|1]`

use crate::config::ExclusionConfig;
use crate::registry::{DefineOutcome, ObjectDefinition};
use crate::stage::{ExclusionStage, ExclusionState, EXCLUSION_STAGE};
use printkit_core::{
    register_reply_handler, thread_safe, CommandDispatcher, CommandError, CommandLine,
    CommandReply, EventBus, ExclusionEvent, MotionState, SharedChain, ThreadSafe, VariableMap,
    VariableStore,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Variable key holding the sorted excluded object names
pub const EXCLUDED_OBJECTS_KEY: &str = "excluded_objects";
/// Variable key holding the object tracking enable flag
pub const OBJECTS_ENABLED_KEY: &str = "objects_enabled";

/// Snapshot reported to status consumers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExclusionStatus {
    /// Defined objects in name order
    pub objects: Vec<ObjectDefinition>,
    /// Excluded names in order
    pub excluded_objects: Vec<String>,
    /// The region currently open
    pub current_object: Option<String>,
    /// Whether object tracking is enabled
    pub enabled: bool,
}

/// Object exclusion service
pub struct ExcludeObject {
    state: ThreadSafe<ExclusionState>,
    chain: SharedChain,
    motion_state: Arc<dyn MotionState>,
    store: Arc<dyn VariableStore>,
    events: Arc<EventBus>,
    config: ExclusionConfig,
}

impl ExcludeObject {
    /// Create the service; nothing is installed in the chain yet
    pub fn new(
        config: ExclusionConfig,
        chain: SharedChain,
        motion_state: Arc<dyn MotionState>,
        store: Arc<dyn VariableStore>,
        events: Arc<EventBus>,
    ) -> Self {
        let state = ExclusionState::new(config.max_objects, config.warmup_extrusions);
        Self {
            state: thread_safe(state),
            chain,
            motion_state,
            store,
            events,
            config,
        }
    }

    /// Register the exclusion control commands
    pub fn register_commands(self: &Arc<Self>, dispatcher: &Arc<dyn CommandDispatcher>) {
        register_reply_handler(dispatcher, "EXCLUDE_OBJECT_START", self, Self::cmd_start);
        register_reply_handler(dispatcher, "EXCLUDE_OBJECT_END", self, Self::cmd_end);
        register_reply_handler(dispatcher, "EXCLUDE_OBJECT", self, Self::cmd_exclude_object);
        register_reply_handler(dispatcher, "EXCLUDE_OBJECT_DEFINE", self, Self::cmd_define);
        register_reply_handler(dispatcher, "SET_EXCLUDE_ENABLE", self, Self::cmd_set_enable);
    }

    /// Open the region for `name`, defining it if it is unknown
    pub fn begin_region(&self, name: &str) {
        let name = name.to_uppercase();
        let mut state = self.state.lock();

        let mut disabled = false;
        if !state.registry.is_defined(&name) {
            let outcome = state.registry.define(ObjectDefinition::new(&name));
            disabled = outcome == DefineOutcome::Disabled;
        }

        state.region_excluded = state.registry.is_excluded(&name);
        state.registry.set_current(Some(name));
        if state.suppressing() {
            state.settle_pending = true;
        }
        drop(state);

        if disabled {
            self.on_capacity_exceeded();
        }
    }

    /// Close the open region
    ///
    /// Returns an informational message for a missing or mismatched
    /// region, and `ExclusionOverrun` once an excluded object has been
    /// closed more than the configured threshold without any printed
    /// object closing in between.
    pub fn end_region(&self, name: Option<&str>) -> CommandReply {
        let mut state = self.state.lock();
        let Some(current) = state.registry.current().map(str::to_string) else {
            return Ok(Some(
                "EXCLUDE_OBJECT_END called, but no object is currently active".to_string(),
            ));
        };

        let message = name.map(str::to_uppercase).and_then(|name| {
            (name != current).then(|| {
                format!(
                    "EXCLUDE_OBJECT_END NAME={} does not match the current object NAME={}",
                    name, current
                )
            })
        });

        let was_suppressing = state.suppressing();
        state.registry.set_current(None);
        state.region_excluded = false;

        if !was_suppressing {
            state.registry.reset_close_counts();
            return Ok(message);
        }

        let (object, count) = state.registry.note_close(&current);
        if count > self.config.overrun_threshold {
            tracing::warn!(object = %object, count, "Excluded object close count overran");
            return Err(CommandError::ExclusionOverrun { object, count });
        }
        Ok(message)
    }

    /// Exclude an object by name
    pub fn exclude(&self, name: &str) -> Result<String, CommandError> {
        let name = name.to_uppercase();
        self.ensure_stage()
            .map_err(|e| CommandError::rejected(e.to_string()))?;

        let added = {
            let mut state = self.state.lock();
            let added = state.registry.exclude(&name);
            if added && state.registry.current() == Some(name.as_str()) {
                state.region_excluded = true;
            }
            added
        };

        if added {
            tracing::info!(object = %name, "Excluding object");
            self.persist_excluded();
            self.events
                .publish(ExclusionEvent::ObjectExcluded { name: name.clone() });
        }
        Ok(format!("Excluding object {}", name))
    }

    /// Exclude the object whose region is open
    pub fn exclude_current(&self) -> Result<String, CommandError> {
        let current = self.state.lock().registry.current().map(str::to_string);
        match current {
            Some(name) => self.exclude(&name),
            None => Err(CommandError::rejected("There is no current object to cancel")),
        }
    }

    /// Remove an object from the excluded set
    pub fn include(&self, name: &str) -> String {
        let name = name.to_uppercase();
        let removed = {
            let mut state = self.state.lock();
            let removed = state.registry.include(&name);
            if removed && state.registry.current() == Some(name.as_str()) {
                state.region_excluded = false;
            }
            removed
        };

        if removed {
            tracing::info!(object = %name, "Including object");
            self.persist_excluded();
            self.events
                .publish(ExclusionEvent::ObjectIncluded { name: name.clone() });
        }
        format!("Unexcluding object {}", name)
    }

    /// Clear the excluded set
    pub fn include_all(&self) {
        let names = {
            let mut state = self.state.lock();
            state.region_excluded = false;
            state.registry.include_all()
        };
        self.persist_excluded();
        for name in names {
            self.events.publish(ExclusionEvent::ObjectIncluded { name });
        }
    }

    /// Add or replace an object definition
    pub fn define(&self, definition: ObjectDefinition) -> DefineOutcome {
        let outcome = self.state.lock().registry.define(definition);
        if outcome == DefineOutcome::Disabled {
            self.on_capacity_exceeded();
        }
        outcome
    }

    /// Enable or disable object tracking and persist the flag
    pub fn set_enabled(&self, enabled: bool) {
        self.state.lock().registry.set_enabled(enabled);
        self.persist(OBJECTS_ENABLED_KEY, serde_json::Value::Bool(enabled));
        if !enabled {
            self.events.publish(ExclusionEvent::Disabled);
        }
    }

    /// Re-apply a persisted enable flag and excluded set
    pub fn restore_state(&self, enabled: bool, excluded: &[String]) -> Result<(), CommandError> {
        if !enabled {
            self.set_enabled(false);
        }
        for name in excluded {
            self.exclude(name)?;
        }
        Ok(())
    }

    /// Forget all objects and remove the stage from the chain
    pub fn reset_file(&self) {
        {
            let mut state = self.state.lock();
            state.registry.reset();
            state.region_excluded = false;
            state.settle_pending = false;
        }

        let removed = {
            let mut chain = self.chain.lock();
            chain.contains(EXCLUSION_STAGE) && chain.remove(EXCLUSION_STAGE).is_ok()
        };
        if removed {
            tracing::debug!("Exclusion stage removed");
            self.motion_state.reset_last_position();
        }
    }

    /// Delay owed after a region start inside an excluded region
    pub fn take_settle_delay(&self) -> Option<Duration> {
        let pending = std::mem::take(&mut self.state.lock().settle_pending);
        pending.then(|| Duration::from_millis(self.config.settle_delay_ms))
    }

    /// Skip the extrusion warm-up of the installed stage
    pub fn clear_warmup(&self) {
        self.state.lock().filter.clear_warmup();
    }

    /// Whether any object is excluded
    pub fn has_excluded(&self) -> bool {
        self.state.lock().registry.has_excluded()
    }

    /// Excluded names in order
    pub fn excluded_objects(&self) -> Vec<String> {
        self.state.lock().registry.excluded_names()
    }

    /// Whether object tracking is enabled
    pub fn enabled(&self) -> bool {
        self.state.lock().registry.enabled()
    }

    /// Whether the stage is installed in the chain
    pub fn stage_installed(&self) -> bool {
        self.chain.lock().contains(EXCLUSION_STAGE)
    }

    /// Write the excluded set and enable flag to the variable store
    pub fn persist_state(&self) {
        let (excluded, enabled) = {
            let state = self.state.lock();
            (state.registry.excluded_names(), state.registry.enabled())
        };
        let mut vars = VariableMap::new();
        vars.insert(EXCLUDED_OBJECTS_KEY.to_string(), excluded.into());
        vars.insert(OBJECTS_ENABLED_KEY.to_string(), enabled.into());
        self.store.set_variables(vars);
    }

    /// Status snapshot
    pub fn status(&self) -> ExclusionStatus {
        let state = self.state.lock();
        ExclusionStatus {
            objects: state.registry.objects().cloned().collect(),
            excluded_objects: state.registry.excluded_names(),
            current_object: state.registry.current().map(str::to_string),
            enabled: state.registry.enabled(),
        }
    }

    /// Space-separated list of known objects, or JSON when requested
    pub fn list_objects(&self, json: bool) -> String {
        let state = self.state.lock();
        let list = if json {
            let objects: Vec<&ObjectDefinition> = state.registry.objects().collect();
            serde_json::to_string(&objects).unwrap_or_default()
        } else {
            state.registry.object_names().join(" ")
        };
        format!("Known objects: {}", list)
    }

    /// Space-separated list of excluded objects
    pub fn list_excluded(&self) -> String {
        format!(
            "Excluded objects: {}",
            self.state.lock().registry.excluded_names().join(" ")
        )
    }

    fn ensure_stage(&self) -> printkit_core::Result<()> {
        let mut chain = self.chain.lock();
        if chain.contains(EXCLUSION_STAGE) {
            return Ok(());
        }

        let downstream = chain.position();
        {
            let mut state = self.state.lock();
            state.filter = crate::filter::ExclusionFilter::new(self.config.warmup_extrusions);
            state.filter.sync(downstream);
        }
        chain.insert_head(Box::new(ExclusionStage::new(Arc::clone(&self.state))))?;
        tracing::debug!(position = %downstream, "Exclusion stage installed");
        Ok(())
    }

    fn on_capacity_exceeded(&self) {
        tracing::warn!(
            max_objects = self.config.max_objects,
            "Too many object definitions, object exclusion disabled"
        );
        self.persist(OBJECTS_ENABLED_KEY, serde_json::Value::Bool(false));
        self.events.publish(ExclusionEvent::Disabled);
    }

    fn persist_excluded(&self) {
        let excluded = self.excluded_objects();
        self.persist(EXCLUDED_OBJECTS_KEY, excluded.into());
    }

    fn persist(&self, key: &str, value: serde_json::Value) {
        let mut vars = VariableMap::new();
        vars.insert(key.to_string(), value);
        self.store.set_variables(vars);
    }

    fn cmd_start(&self, cmd: &CommandLine) -> CommandReply {
        let name = cmd.require("NAME")?;
        self.begin_region(name);
        Ok(None)
    }

    fn cmd_end(&self, cmd: &CommandLine) -> CommandReply {
        self.end_region(cmd.get("NAME"))
    }

    fn cmd_exclude_object(&self, cmd: &CommandLine) -> CommandReply {
        let name = cmd
            .get("NAME")
            .map(str::to_uppercase)
            .filter(|name| !name.is_empty());

        if cmd.has("RESET") {
            match name {
                Some(name) => Ok(Some(self.include(&name))),
                None => {
                    self.include_all();
                    Ok(None)
                }
            }
        } else if let Some(name) = name {
            self.exclude(&name).map(Some)
        } else if cmd.has("CURRENT") {
            self.exclude_current().map(Some)
        } else {
            Ok(Some(self.list_excluded()))
        }
    }

    fn cmd_define(&self, cmd: &CommandLine) -> CommandReply {
        if !self.enabled() {
            return Ok(None);
        }
        if cmd.has("RESET") {
            self.reset_file();
            return Ok(None);
        }
        let Some(name) = cmd.get("NAME").filter(|name| !name.is_empty()) else {
            return Ok(Some(self.list_objects(cmd.has("JSON"))));
        };

        let mut definition = ObjectDefinition::new(name);
        for (key, value) in cmd.params() {
            match key.as_str() {
                "NAME" => {}
                "CENTER" => definition.center = Some(parse_point(cmd, value)?),
                "POLYGON" => {
                    let polygon = serde_json::from_str::<Vec<[f64; 2]>>(value)
                        .map_err(|e| cmd.malformed("POLYGON", e.to_string()))?;
                    definition.polygon = Some(polygon);
                }
                _ => {
                    definition.extra.insert(key.to_lowercase(), value.clone());
                }
            }
        }
        self.define(definition);
        Ok(None)
    }

    fn cmd_set_enable(&self, cmd: &CommandLine) -> CommandReply {
        let enabled = cmd.get_int("ENABLE")?.unwrap_or(1) != 0;
        self.set_enabled(enabled);
        Ok(Some(format!(
            "Object exclusion {}",
            if enabled { "enabled" } else { "disabled" }
        )))
    }
}

impl std::fmt::Debug for ExcludeObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExcludeObject")
            .field("config", &self.config)
            .finish()
    }
}

fn parse_point(cmd: &CommandLine, value: &str) -> Result<[f64; 2], CommandError> {
    let coords: Vec<f64> = value
        .trim_matches(|c| c == '[' || c == ']')
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|_| cmd.malformed("CENTER", "expected x,y"))?;
    match coords.as_slice() {
        [x, y] => Ok([*x, *y]),
        _ => Err(cmd.malformed("CENTER", "expected x,y")),
    }
}
