//! Motion interception chain
//!
//! An explicit, ordered list of interception stages sitting between
//! command dispatch and the physical motion pipeline. Each stage sees a
//! move, may rewrite or swallow it, and forwards whatever it keeps to the
//! rest of the chain through a [`MoveSink`].
//!
//! Ordering is checked at insertion time: a stage that reports
//! [`MoveTransform::requires_head`] may only sit at position zero, and no
//! stage may be inserted in front of it.

use crate::collaborators::MotionPipeline;
use crate::data::Position4;
use crate::error::{ChainError, Result};
use crate::types::ThreadSafe;
use std::sync::Arc;

/// Downstream half of the chain as seen from one stage
pub trait MoveSink {
    /// Forward a move to the next stage (or the pipeline)
    fn move_to(&mut self, pos: Position4, speed: f64) -> Result<()>;

    /// Position reported by the next stage (or the pipeline)
    fn position(&mut self) -> Position4;
}

/// A motion interception stage
pub trait MoveTransform: Send {
    /// Unique stage name
    fn name(&self) -> &str;

    /// Whether the stage must occupy position zero while installed
    fn requires_head(&self) -> bool {
        false
    }

    /// Handle a move, forwarding what should reach the pipeline to `next`
    fn move_to(&mut self, pos: Position4, speed: f64, next: &mut dyn MoveSink) -> Result<()>;

    /// Report the position in this stage's coordinate space
    fn position(&mut self, next: &mut dyn MoveSink) -> Position4;
}

/// Chain shared between command handlers on the control thread
pub type SharedChain = ThreadSafe<TransformChain>;

/// Ordered interception stages in front of a motion pipeline
pub struct TransformChain {
    stages: Vec<Box<dyn MoveTransform>>,
    pipeline: Arc<dyn MotionPipeline>,
}

impl TransformChain {
    /// Create an empty chain in front of `pipeline`
    pub fn new(pipeline: Arc<dyn MotionPipeline>) -> Self {
        Self {
            stages: Vec::new(),
            pipeline,
        }
    }

    /// Insert a stage at `index`
    ///
    /// Fails if the ordering invariant would be broken: a head-only stage
    /// must go to index zero, and nothing may displace an installed
    /// head-only stage.
    pub fn insert(&mut self, index: usize, stage: Box<dyn MoveTransform>) -> Result<()> {
        if self.contains(stage.name()) {
            return Err(ChainError::DuplicateStage {
                stage: stage.name().to_string(),
            }
            .into());
        }
        if stage.requires_head() && index != 0 {
            return Err(ChainError::ExclusionNotFirst {
                stage: stage.name().to_string(),
            }
            .into());
        }
        if index == 0 {
            if let Some(head) = self.stages.first() {
                if head.requires_head() {
                    return Err(ChainError::ExclusionNotFirst {
                        stage: head.name().to_string(),
                    }
                    .into());
                }
            }
        }

        let index = index.min(self.stages.len());
        tracing::debug!("Installing motion stage '{}' at {}", stage.name(), index);
        self.stages.insert(index, stage);
        Ok(())
    }

    /// Insert a stage at the head of the chain
    pub fn insert_head(&mut self, stage: Box<dyn MoveTransform>) -> Result<()> {
        self.insert(0, stage)
    }

    /// Append a stage just in front of the pipeline
    pub fn push(&mut self, stage: Box<dyn MoveTransform>) -> Result<()> {
        let index = self.stages.len();
        self.insert(index, stage)
    }

    /// Remove a stage by name
    pub fn remove(&mut self, name: &str) -> Result<Box<dyn MoveTransform>> {
        let index = self
            .stages
            .iter()
            .position(|s| s.name() == name)
            .ok_or_else(|| ChainError::StageNotFound {
                stage: name.to_string(),
            })?;
        tracing::debug!("Removing motion stage '{}'", name);
        Ok(self.stages.remove(index))
    }

    /// Whether a stage with `name` is installed
    pub fn contains(&self, name: &str) -> bool {
        self.stages.iter().any(|s| s.name() == name)
    }

    /// Stage names in order from head to tail
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Number of installed stages
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether no stages are installed
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Send a move through every stage
    pub fn move_to(&mut self, pos: Position4, speed: f64) -> Result<()> {
        Downstream {
            stages: &mut self.stages,
            pipeline: self.pipeline.as_ref(),
        }
        .move_to(pos, speed)
    }

    /// Position as seen from the head of the chain
    pub fn position(&mut self) -> Position4 {
        Downstream {
            stages: &mut self.stages,
            pipeline: self.pipeline.as_ref(),
        }
        .position()
    }

    /// The physical pipeline at the tail
    pub fn pipeline(&self) -> &Arc<dyn MotionPipeline> {
        &self.pipeline
    }
}

impl std::fmt::Debug for TransformChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformChain")
            .field("stages", &self.stage_names())
            .finish()
    }
}

/// The remaining stages after the one currently handling a move
struct Downstream<'a> {
    stages: &'a mut [Box<dyn MoveTransform>],
    pipeline: &'a dyn MotionPipeline,
}

impl MoveSink for Downstream<'_> {
    fn move_to(&mut self, pos: Position4, speed: f64) -> Result<()> {
        match self.stages.split_first_mut() {
            Some((head, rest)) => {
                let mut next = Downstream {
                    stages: rest,
                    pipeline: self.pipeline,
                };
                head.move_to(pos, speed, &mut next)
            }
            None => self.pipeline.move_to(pos, speed),
        }
    }

    fn position(&mut self) -> Position4 {
        match self.stages.split_first_mut() {
            Some((head, rest)) => {
                let mut next = Downstream {
                    stages: rest,
                    pipeline: self.pipeline,
                };
                head.position(&mut next)
            }
            None => self.pipeline.position(),
        }
    }
}
