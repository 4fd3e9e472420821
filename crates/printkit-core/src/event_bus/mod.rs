//! # Event Bus Module
//!
//! Publish/subscribe notifications for job, exclusion and recovery
//! activity. A single bus is owned by the print context and handed to each
//! subsystem, so observers (status reporting, logging, tests) can follow
//! what happens without the subsystems knowing about them.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use printkit_core::event_bus::{AppEvent, EventBus, EventCategory, EventFilter};
//!
//! let bus = EventBus::new();
//! let sub = bus.subscribe(
//!     EventFilter::Categories(vec![EventCategory::Job]),
//!     |event| tracing::info!("{}", event.description()),
//! );
//! bus.unsubscribe(sub);
//! ```

mod bus;
mod events;

pub use bus::*;
pub use events::*;
