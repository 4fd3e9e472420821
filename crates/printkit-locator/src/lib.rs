//! # PrintKit Locator
//!
//! Finds a safe place to resume a job after material ran out or the
//! job was interrupted. Every dispatched line is recorded with the
//! command position before and after it; the lookback walks those
//! records from newest to oldest to find the line where material stopped
//! reaching the nozzle, without backing up across a layer change.

pub mod config;
pub mod history;
pub mod locator;
pub mod search;
pub mod zcheck;

pub use config::LocatorConfig;
pub use history::{History, MoveRecord};
pub use locator::{LocatorStatus, ResumeLocator, SavedContext, PAUSE_STATE};
pub use search::{locate, LocateResult, StopReason};
pub use zcheck::{ZChangeDetector, ZStop};
