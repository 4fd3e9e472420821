//! Collision guard for the lookback walk
//!
//! Walking back through history is only safe while the toolhead would
//! not have to drop into material printed after the candidate line. The
//! detector locks the printing height at the first extruding move with
//! no Z travel, then flags:
//! - a lowering move that ends below that height
//! - a rising move that starts below it (a layer change)
//! - any other Z move that also extrudes
//!
//! The last case is a heuristic safety stop; sliced jobs should not move
//! Z and E together, so such a record is not trusted as a resume point.

use crate::history::MoveRecord;

const THRESHOLD: f64 = 1e-9;

/// Reason the walk must stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZStop {
    /// Resuming would lower the nozzle into the part
    Collision,
    /// Resuming would cross a layer change
    LayerChange,
    /// Z and E moved together
    Abnormal,
}

/// Stateful Z-change detector, fed newest to oldest
#[derive(Debug, Clone, Default)]
pub struct ZChangeDetector {
    locked: bool,
    printing_height: f64,
    examined: usize,
}

impl ZChangeDetector {
    /// Create an unlocked detector
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect the next older record
    pub fn check(&mut self, record: &MoveRecord) -> Option<ZStop> {
        self.examined += 1;
        let (start, end) = (record.before, record.after);
        let delta_z = record.delta_z();
        let delta_e = record.delta_e();

        if delta_z.abs() < THRESHOLD {
            if delta_e > THRESHOLD && !self.locked {
                self.locked = true;
                self.printing_height = end.z;
            }
            return None;
        }

        if delta_z < 0.0 {
            if self.locked && end.z < self.printing_height {
                tracing::info!(
                    from = %start,
                    to = %end,
                    height = self.printing_height,
                    "Lookback stopped to avoid collision"
                );
                return Some(ZStop::Collision);
            }
        } else if start.z < self.printing_height {
            tracing::info!(
                from = start.z,
                height = self.printing_height,
                "Lookback stopped at layer change"
            );
            return Some(ZStop::LayerChange);
        }

        if delta_e.abs() > THRESHOLD {
            tracing::info!(from = %start, to = %end, "Lookback stopped at abnormal move");
            return Some(ZStop::Abnormal);
        }
        None
    }

    /// Locked printing height, if any
    pub fn printing_height(&self) -> Option<f64> {
        self.locked.then_some(self.printing_height)
    }

    /// Number of records inspected
    pub fn examined(&self) -> usize {
        self.examined
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use printkit_core::{MotionModeSnapshot, Position4};
    use std::time::Instant;

    fn rec(z0: f64, e0: f64, z1: f64, e1: f64) -> MoveRecord {
        MoveRecord {
            line: String::new(),
            offset: 0,
            timestamp: Instant::now(),
            before: Position4::new(0.0, 0.0, z0, e0),
            after: Position4::new(1.0, 0.0, z1, e1),
            mode: MotionModeSnapshot::default(),
        }
    }

    #[test]
    fn test_locks_on_flat_extrusion() {
        let mut detector = ZChangeDetector::new();
        assert_eq!(detector.check(&rec(0.4, 0.0, 0.4, 0.0)), None);
        assert_eq!(detector.printing_height(), None);
        assert_eq!(detector.check(&rec(0.4, 1.0, 0.4, 2.0)), None);
        assert_eq!(detector.printing_height(), Some(0.4));
        // Only the first lock counts
        detector.check(&rec(0.2, 0.0, 0.2, 1.0));
        assert_eq!(detector.printing_height(), Some(0.4));
    }

    #[test]
    fn test_layer_change_stops() {
        let mut detector = ZChangeDetector::new();
        detector.check(&rec(5.0, 2.0, 5.0, 3.0));
        assert_eq!(detector.check(&rec(3.0, 2.0, 5.0, 2.0)), Some(ZStop::LayerChange));
    }

    #[test]
    fn test_lowering_below_height_stops() {
        let mut detector = ZChangeDetector::new();
        detector.check(&rec(3.0, 2.0, 3.0, 3.0));
        assert_eq!(detector.check(&rec(5.0, 2.0, 2.0, 2.0)), Some(ZStop::Collision));
    }

    #[test]
    fn test_z_hop_without_extrusion_continues() {
        let mut detector = ZChangeDetector::new();
        detector.check(&rec(3.0, 2.0, 3.0, 3.0));
        // Lowering back onto the printing height
        assert_eq!(detector.check(&rec(3.4, 2.0, 3.0, 2.0)), None);
        // Hop up from the printing height
        assert_eq!(detector.check(&rec(3.0, 2.0, 3.4, 2.0)), None);
        assert_eq!(detector.examined(), 3);
    }

    #[test]
    fn test_z_with_extrusion_is_abnormal() {
        let mut detector = ZChangeDetector::new();
        assert_eq!(detector.check(&rec(1.0, 0.0, 1.2, 0.5)), Some(ZStop::Abnormal));
    }
}
