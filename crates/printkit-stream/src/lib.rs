//! # PrintKit Stream
//!
//! Streams a job file into the command dispatcher one line at a time.
//! Provides:
//! - [`StreamExecutor`]: load, resume, pause, cancel and status of a job
//! - [`ChunkReader`] and [`LineSplitter`]: background chunk reads and
//!   byte-exact line splitting
//! - [`PowerLossRecovery`]: checkpoints and interrupted job recovery

pub mod config;
pub mod executor;
pub mod reader;
pub mod recovery;
pub mod rewind;
pub mod splitter;
pub mod state;

pub use config::{StreamConfig, DEFAULT_EXCLUSION_FINISH_SCRIPT};
pub use executor::{StreamExecutor, RUNOUT_CONTEXT};
pub use reader::{ChunkReader, SharedFile};
pub use recovery::{Checkpoint, PowerLossRecovery};
pub use rewind::{realign_to_region_start, REGION_START_MARKER};
pub use splitter::LineSplitter;
pub use state::{JobPhase, JobStatus};
