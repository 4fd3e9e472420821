//! Service context
//!
//! Builds the streamer, the exclusion service, the resume locator and the
//! recovery commands from the host's collaborators and owns them for the
//! lifetime of the process. Collaborators are supplied once, at build
//! time; missing mandatory ones fail the build.

use printkit_core::{
    CommandDispatcher, Error, EventBus, MotionReport, MotionState, PrintStats, Result,
    ResumeTarget, RunoutSensor, SharedChain, VariableStore,
};
use printkit_exclusion::{ExcludeObject, ExclusionStatus};
use printkit_locator::{LocatorStatus, ResumeLocator};
use printkit_settings::{FileVariableStore, PrintkitConfig};
use printkit_stream::{JobStatus, PowerLossRecovery, StreamExecutor};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Host-provided services
#[derive(Clone, Default)]
pub struct Collaborators {
    /// Command router, mandatory
    pub dispatcher: Option<Arc<dyn CommandDispatcher>>,
    /// Interception chain in front of the motion pipeline
    pub chain: Option<SharedChain>,
    /// Commanded position and coordinate modes, mandatory
    pub motion_state: Option<Arc<dyn MotionState>>,
    /// Durable session variables, mandatory
    pub variable_store: Option<Arc<dyn VariableStore>>,
    /// Print statistics, mandatory
    pub stats: Option<Arc<dyn PrintStats>>,
    /// Live toolhead position, needed to relocate after a runout
    pub motion_report: Option<Arc<dyn MotionReport>>,
    /// Filament sensor checked before each line
    pub runout: Option<Arc<dyn RunoutSensor>>,
    /// Set when the variable store is file backed so its writer follows
    /// the context lifecycle
    pub file_store: Option<Arc<FileVariableStore>>,
}

impl Collaborators {
    /// Use a file-backed variable store
    pub fn with_file_store(mut self, store: Arc<FileVariableStore>) -> Self {
        self.variable_store = Some(store.clone());
        self.file_store = Some(store);
        self
    }

    /// Use any variable store
    pub fn with_variable_store(mut self, store: Arc<dyn VariableStore>) -> Self {
        self.variable_store = Some(store);
        self
    }
}

fn require<T: Clone>(value: &Option<T>, name: &str) -> Result<T> {
    value
        .clone()
        .ok_or_else(|| Error::other(format!("Missing collaborator: {}", name)))
}

/// Combined status of all services
#[derive(Debug, Clone, Serialize)]
pub struct ContextStatus {
    /// Streamer state
    pub job: JobStatus,
    /// Objects and exclusion flags
    pub exclusion: ExclusionStatus,
    /// History occupancy and tuning
    pub locator: LocatorStatus,
}

/// Owns the services and their lifecycle
pub struct PrintContext {
    config: PrintkitConfig,
    events: Arc<EventBus>,
    dispatcher: Arc<dyn CommandDispatcher>,
    executor: Arc<StreamExecutor>,
    exclusion: Arc<ExcludeObject>,
    locator: Arc<ResumeLocator>,
    recovery: Arc<PowerLossRecovery>,
    file_store: Option<Arc<FileVariableStore>>,
    initialized: AtomicBool,
}

impl PrintContext {
    /// Wire the services together
    pub fn build(config: PrintkitConfig, collaborators: Collaborators) -> Result<Self> {
        config
            .validate()
            .map_err(|e| Error::other(format!("Invalid configuration: {}", e)))?;

        let dispatcher = require(&collaborators.dispatcher, "dispatcher")?;
        let chain = require(&collaborators.chain, "motion pipeline")?;
        let motion_state = require(&collaborators.motion_state, "motion state")?;
        let store = require(&collaborators.variable_store, "variable store")?;
        let stats = require(&collaborators.stats, "print stats")?;

        let events = Arc::new(EventBus::new());

        let exclusion = Arc::new(ExcludeObject::new(
            config.exclusion.clone(),
            chain,
            motion_state.clone(),
            store.clone(),
            events.clone(),
        ));

        let locator = Arc::new(ResumeLocator::new(
            config.locator.clone(),
            motion_state.clone(),
            collaborators.motion_report.clone(),
            events.clone(),
        ));

        let mut executor = StreamExecutor::new(
            config.stream.clone(),
            dispatcher.clone(),
            stats.clone(),
            events.clone(),
        )
        .with_exclusion(exclusion.clone())
        .with_locator(locator.clone());
        if let Some(runout) = &collaborators.runout {
            executor = executor.with_runout(runout.clone());
        }
        let executor = Arc::new(executor);

        let target: Arc<dyn ResumeTarget> = executor.clone();
        locator.attach_target(Arc::downgrade(&target));

        let recovery = Arc::new(PowerLossRecovery::new(
            executor.clone(),
            Some(exclusion.clone()),
            motion_state,
            stats,
            store,
            dispatcher.clone(),
            events.clone(),
        ));

        tracing::info!(
            runout = collaborators.runout.is_some(),
            motion_report = collaborators.motion_report.is_some(),
            "Print context built"
        );

        Ok(Self {
            config,
            events,
            dispatcher,
            executor,
            exclusion,
            locator,
            recovery,
            file_store: collaborators.file_store,
            initialized: AtomicBool::new(false),
        })
    }

    /// Register every service's commands with the dispatcher
    pub fn init(&self) {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return;
        }
        self.exclusion.register_commands(&self.dispatcher);
        self.locator.register_commands(&self.dispatcher);
        self.executor.register_commands(&self.dispatcher);
        self.recovery.register_commands(&self.dispatcher);
        if let Some(store) = &self.file_store {
            store.register_commands(&self.dispatcher);
        }
        tracing::debug!("Commands registered");
    }

    /// Start the variable writer
    pub fn start(&self) -> Result<()> {
        if let Some(store) = &self.file_store {
            store.start()?;
        }
        Ok(())
    }

    /// Cancel any job, then drain and stop the variable writer
    pub async fn stop(&self) {
        self.executor.cancel().await;
        if let Some(store) = self.file_store.clone() {
            if tokio::task::spawn_blocking(move || store.stop()).await.is_err() {
                tracing::error!("Variable writer shutdown failed");
            }
        }
        tracing::info!("Print context stopped");
    }

    /// Close the job and clear the exclusion state
    pub async fn reset(&self) -> Result<()> {
        self.executor.reset_file().await?;
        Ok(())
    }

    /// Combined status of the streamer, exclusion and locator
    pub fn status_snapshot(&self) -> ContextStatus {
        ContextStatus {
            job: self.executor.report_status(),
            exclusion: self.exclusion.status(),
            locator: self.locator.status(),
        }
    }

    /// Configuration the context was built with
    pub fn config(&self) -> &PrintkitConfig {
        &self.config
    }

    /// Bus carrying job, exclusion and recovery events
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Dispatcher the commands are registered with
    pub fn dispatcher(&self) -> &Arc<dyn CommandDispatcher> {
        &self.dispatcher
    }

    /// Job streamer
    pub fn executor(&self) -> &Arc<StreamExecutor> {
        &self.executor
    }

    /// Object exclusion service
    pub fn exclusion(&self) -> &Arc<ExcludeObject> {
        &self.exclusion
    }

    /// Resume point locator
    pub fn locator(&self) -> &Arc<ResumeLocator> {
        &self.locator
    }

    /// Checkpoint and interrupted job recovery
    pub fn recovery(&self) -> &Arc<PowerLossRecovery> {
        &self.recovery
    }
}
