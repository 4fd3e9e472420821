//! # PrintKit
//!
//! Job streaming, object exclusion and interruption recovery for
//! file-driven fabrication devices.
//!
//! ## Architecture
//!
//! PrintKit is organized as a workspace with multiple crates:
//!
//! 1. **printkit-core** - Errors, positions, collaborator traits, motion chain, events
//! 2. **printkit-exclusion** - Object regions and suppression of cancelled objects
//! 3. **printkit-locator** - Move history and resume point search
//! 4. **printkit-stream** - Job file streaming, checkpoints and recovery
//! 5. **printkit-settings** - Configuration file and durable session variables
//! 6. **printkit** - Service context, simulated machine and the binary

pub mod context;
pub mod sim;

pub use context::{Collaborators, ContextStatus, PrintContext};
pub use sim::{SimDispatcher, SimGcode, SimMachine, SimPipeline, SimPrintStats, SimReport, SimRunout};

pub use printkit_core::{Error, Result};
pub use printkit_settings::{FileVariableStore, PrintkitConfig};
pub use printkit_stream::{JobPhase, JobStatus};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Initialize logging
///
/// Sets up structured logging with:
/// - RUST_LOG environment variable support, INFO by default
/// - Pretty console output, or one JSON object per line when `json` is set
///
/// Logs go to stderr so that command output on stdout stays parseable.
pub fn init_logging(json: bool) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_names(true)
            .json();
        registry.with(fmt_layer).try_init()?;
    } else {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_line_number(true)
            .pretty();
        registry.with(fmt_layer).try_init()?;
    }

    Ok(())
}
