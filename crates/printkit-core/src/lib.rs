//! # PrintKit Core
//!
//! Core types, traits, and utilities for PrintKit.
//! Provides the fundamental abstractions shared by the job streamer,
//! the object exclusion filter and the resume locator:
//! positions, the error taxonomy, the collaborator interfaces consumed
//! from the host, the motion interception chain, and the event bus.

pub mod chain;
pub mod collaborators;
pub mod command;
pub mod data;
pub mod error;
pub mod event_bus;
pub mod types;

pub use chain::{MoveSink, MoveTransform, SharedChain, TransformChain};

pub use collaborators::{
    register_reply_handler, run_script, CommandDispatcher, CommandHandler, CommandReply,
    MotionPipeline, MotionReport, MotionState, PrintStats, ResumeTarget, RunoutSensor, VariableMap,
    VariableStore,
};

pub use command::CommandLine;

pub use data::{Axis, MotionModeSnapshot, Position4};

pub use error::{ChainError, CommandError, Error, JobError, PersistenceError, Result};

pub use event_bus::{
    AppEvent, EventBus, EventBusConfig, EventCategory, EventFilter, ExclusionEvent, JobEvent,
    RecoveryEvent, SubscriptionId,
};

pub use types::{thread_safe, ThreadSafe};
