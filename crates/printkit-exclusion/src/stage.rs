//! Interception stage wrapping the exclusion filter

use crate::filter::ExclusionFilter;
use crate::registry::ObjectRegistry;
use printkit_core::{MoveSink, MoveTransform, Position4, Result, ThreadSafe};

/// Name the stage is registered under in the interception chain
pub const EXCLUSION_STAGE: &str = "exclude_object";

/// State shared between the command handlers and the chain stage
#[derive(Debug)]
pub struct ExclusionState {
    pub(crate) registry: ObjectRegistry,
    pub(crate) filter: ExclusionFilter,
    /// Whether the open region was excluded when it began
    pub(crate) region_excluded: bool,
    pub(crate) settle_pending: bool,
}

impl ExclusionState {
    pub(crate) fn new(max_objects: usize, warmup: u32) -> Self {
        Self {
            registry: ObjectRegistry::new(max_objects),
            filter: ExclusionFilter::new(warmup),
            region_excluded: false,
            settle_pending: false,
        }
    }

    /// Whether moves in the open region are being suppressed
    pub(crate) fn suppressing(&self) -> bool {
        self.region_excluded && !self.filter.warming_up()
    }
}

/// Head-of-chain stage routing moves through the exclusion filter
pub struct ExclusionStage {
    state: ThreadSafe<ExclusionState>,
}

impl ExclusionStage {
    pub(crate) fn new(state: ThreadSafe<ExclusionState>) -> Self {
        Self { state }
    }
}

impl MoveTransform for ExclusionStage {
    fn name(&self) -> &str {
        EXCLUSION_STAGE
    }

    fn requires_head(&self) -> bool {
        true
    }

    fn move_to(&mut self, pos: Position4, speed: f64, next: &mut dyn MoveSink) -> Result<()> {
        let mut state = self.state.lock();
        let suppressing = state.suppressing();
        match state.filter.apply(pos, suppressing) {
            Some(out) => next.move_to(out, speed),
            None => Ok(()),
        }
    }

    fn position(&mut self, next: &mut dyn MoveSink) -> Position4 {
        let downstream = next.position();
        self.state.lock().filter.position(downstream)
    }
}
