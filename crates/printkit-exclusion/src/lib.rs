//! # PrintKit Exclusion
//!
//! Suppresses motion belonging to cancelled object regions while keeping
//! the extruder and position state consistent. The pieces are:
//! - [`ObjectRegistry`]: sorted object definitions, excluded set, close counts
//! - [`ExclusionFilter`]: the offset accumulator applied to each move
//! - [`ExclusionStage`]: the head-of-chain stage wrapping the filter
//! - [`ExcludeObject`]: the service and its control commands

pub mod config;
pub mod exclude;
pub mod filter;
pub mod registry;
pub mod stage;

pub use config::ExclusionConfig;
pub use exclude::{ExcludeObject, ExclusionStatus, EXCLUDED_OBJECTS_KEY, OBJECTS_ENABLED_KEY};
pub use filter::{ExclusionFilter, RegionState};
pub use registry::{DefineOutcome, ObjectDefinition, ObjectRegistry};
pub use stage::{ExclusionStage, EXCLUSION_STAGE};
