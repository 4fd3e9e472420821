//! Offset accumulator for suppressed motion
//!
//! While a region is excluded, moves are swallowed and the difference
//! between where the job thinks the toolhead is and where it really is
//! builds up in a per-axis offset. When normal motion resumes the offset
//! is wound down in steps rather than all at once:
//! - XY (and Z with it) clears on the first delivered move whose XY
//!   differs from the last suppressed position; the pending extruder
//!   adjustment is folded into E at the same moment
//! - Z clears on its own the first time a delivered Z differs
//! - a still-pending extruder adjustment is folded in on the first
//!   delivered E change
//!
//! The extruder adjustment compensates for a retraction difference
//! between the last printed region and the excluded one.

use printkit_core::Position4;

/// Transition of the current move relative to the previous one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionState {
    /// Normal region, previous move was delivered
    Normal,
    /// Excluded region, previous move was delivered
    EnteringExcluded,
    /// Excluded region, previous move was suppressed
    InExcluded,
    /// Normal region, previous move was suppressed
    LeavingExcluded,
}

/// Pure accumulator algebra behind the exclusion stage
#[derive(Debug, Clone)]
pub struct ExclusionFilter {
    offset: Position4,
    last_position: Position4,
    last_delivered: Position4,
    last_suppressed: Position4,
    max_e_delivered: f64,
    max_e_suppressed: f64,
    extruder_adjustment: f64,
    warmup_remaining: u32,
    in_excluded: bool,
}

impl ExclusionFilter {
    /// Create a filter that delivers `warmup` extruding moves before it
    /// is allowed to suppress anything
    pub fn new(warmup: u32) -> Self {
        Self {
            offset: Position4::zero(),
            last_position: Position4::zero(),
            last_delivered: Position4::zero(),
            last_suppressed: Position4::zero(),
            max_e_delivered: 0.0,
            max_e_suppressed: 0.0,
            extruder_adjustment: 0.0,
            warmup_remaining: warmup,
            in_excluded: false,
        }
    }

    /// Align the tracked positions with the downstream position
    pub fn sync(&mut self, downstream: Position4) {
        self.position(downstream);
        self.last_delivered = self.last_position;
        self.last_suppressed = self.last_position;
    }

    /// Position in job coordinates given the downstream position
    pub fn position(&mut self, downstream: Position4) -> Position4 {
        self.last_position = downstream + self.offset;
        self.last_position
    }

    /// Whether the filter is still observing its first extruding moves
    pub fn warming_up(&self) -> bool {
        self.warmup_remaining > 0
    }

    /// Skip the warm-up
    pub fn clear_warmup(&mut self) {
        self.warmup_remaining = 0;
    }

    /// Whether the previous move was suppressed
    pub fn in_excluded(&self) -> bool {
        self.in_excluded
    }

    /// Current pending offset
    pub fn offset(&self) -> Position4 {
        self.offset
    }

    /// Extruder adjustment not yet folded into the offset
    pub fn pending_adjustment(&self) -> f64 {
        self.extruder_adjustment
    }

    /// Classify the next move
    pub fn region_state(&self, region_excluded: bool) -> RegionState {
        match (region_excluded, self.in_excluded) {
            (false, false) => RegionState::Normal,
            (true, false) => RegionState::EnteringExcluded,
            (true, true) => RegionState::InExcluded,
            (false, true) => RegionState::LeavingExcluded,
        }
    }

    /// Route a move; returns the position to forward, if any
    pub fn apply(&mut self, newpos: Position4, region_excluded: bool) -> Option<Position4> {
        match self.region_state(region_excluded) {
            RegionState::Normal => Some(self.deliver_move(newpos)),
            RegionState::EnteringExcluded => {
                self.in_excluded = true;
                self.suppress_move(newpos);
                None
            }
            RegionState::InExcluded => {
                self.suppress_move(newpos);
                None
            }
            RegionState::LeavingExcluded => {
                self.in_excluded = false;
                self.extruder_adjustment = (self.max_e_suppressed - self.last_suppressed.e)
                    - (self.max_e_delivered - self.last_delivered.e);
                Some(self.deliver_move(newpos))
            }
        }
    }

    /// Account for a move that reaches the pipeline
    ///
    /// Returns the position to forward downstream.
    pub fn deliver_move(&mut self, newpos: Position4) -> Position4 {
        if self.warmup_remaining > 0 && self.last_position.e != newpos.e {
            self.warmup_remaining -= 1;
        }

        self.last_position = newpos;
        self.last_delivered = newpos;
        self.max_e_delivered = self.max_e_delivered.max(newpos.e);

        if (self.offset.x != 0.0 || self.offset.y != 0.0)
            && newpos.xy_differs(&self.last_suppressed)
        {
            self.offset.x = 0.0;
            self.offset.y = 0.0;
            self.offset.z = 0.0;
            self.offset.e += self.extruder_adjustment;
            self.extruder_adjustment = 0.0;
        }

        if self.offset.z != 0.0 && newpos.z != self.last_suppressed.z {
            self.offset.z = 0.0;
        }

        if self.extruder_adjustment != 0.0 && newpos.e != self.last_suppressed.e {
            self.offset.e += self.extruder_adjustment;
            self.extruder_adjustment = 0.0;
        }

        newpos - self.offset
    }

    /// Account for a move that must not reach the pipeline
    pub fn suppress_move(&mut self, newpos: Position4) {
        self.offset.x = newpos.x - self.last_delivered.x;
        self.offset.y = newpos.y - self.last_delivered.y;
        self.offset.z = newpos.z - self.last_delivered.z;
        self.offset.e += newpos.e - self.last_position.e;

        self.last_position = newpos;
        self.last_suppressed = newpos;
        self.max_e_suppressed = self.max_e_suppressed.max(newpos.e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(x: f64, y: f64, z: f64, e: f64) -> Position4 {
        Position4::new(x, y, z, e)
    }

    #[test]
    fn test_normal_moves_pass_through() {
        let mut filter = ExclusionFilter::new(0);
        assert_eq!(filter.apply(p(10.0, 10.0, 0.2, 1.0), false), Some(p(10.0, 10.0, 0.2, 1.0)));
        assert_eq!(filter.offset(), Position4::zero());
    }

    #[test]
    fn test_region_state_transitions() {
        let mut filter = ExclusionFilter::new(0);
        assert_eq!(filter.region_state(false), RegionState::Normal);
        assert_eq!(filter.region_state(true), RegionState::EnteringExcluded);
        filter.apply(p(1.0, 1.0, 0.2, 1.0), true);
        assert!(filter.in_excluded());
        assert_eq!(filter.region_state(true), RegionState::InExcluded);
        assert_eq!(filter.region_state(false), RegionState::LeavingExcluded);
    }

    #[test]
    fn test_suppressed_extrusion_is_withheld() {
        let mut filter = ExclusionFilter::new(0);
        filter.apply(p(0.0, 0.0, 0.2, 5.0), false);

        assert_eq!(filter.apply(p(50.0, 50.0, 0.2, 6.0), true), None);
        assert_eq!(filter.apply(p(60.0, 50.0, 0.2, 8.0), true), None);
        assert_eq!(filter.offset(), p(60.0, 50.0, 0.0, 3.0));

        // First move back in a printed region jumps straight there and
        // continues extrusion from where the pipeline left off
        let out = filter.apply(p(5.0, 5.0, 0.2, 9.0), false).unwrap();
        assert_eq!(out, p(5.0, 5.0, 0.2, 6.0));
        assert_eq!(filter.offset(), p(0.0, 0.0, 0.0, 3.0));
    }

    #[test]
    fn test_retraction_difference_adjusts_extruder() {
        let mut filter = ExclusionFilter::new(0);
        // Printed region ends retracted by 1mm
        filter.apply(p(0.0, 0.0, 0.25, 5.0), false);
        filter.apply(p(0.0, 0.0, 0.25, 4.0), false);

        // Excluded region sits higher and ends retracted by 2mm
        filter.apply(p(50.0, 50.0, 0.75, 8.0), true);
        filter.apply(p(50.0, 50.0, 0.75, 6.0), true);
        assert_eq!(filter.offset(), p(50.0, 50.0, 0.5, 2.0));

        // adjustment = (8 - 6) - (5 - 4) = 1
        filter.apply(p(50.0, 50.0, 0.5, 6.0), false);
        assert_eq!(filter.pending_adjustment(), 1.0);

        // Z cleared on its own, XY offset still pending
        assert_eq!(filter.offset().z, 0.0);
        assert_eq!(filter.offset().x, 50.0);

        let out = filter.apply(p(10.0, 10.0, 0.5, 6.5), false).unwrap();
        assert_eq!(filter.pending_adjustment(), 0.0);
        assert_eq!(filter.offset(), p(0.0, 0.0, 0.0, 3.0));
        assert_eq!(out, p(10.0, 10.0, 0.5, 3.5));
    }

    #[test]
    fn test_warmup_counts_extruding_moves() {
        let mut filter = ExclusionFilter::new(2);
        filter.apply(p(0.0, 0.0, 0.0, 0.0), false);
        assert!(filter.warming_up());
        filter.apply(p(1.0, 0.0, 0.0, 1.0), false);
        filter.apply(p(2.0, 0.0, 0.0, 1.0), false);
        assert!(filter.warming_up());
        filter.apply(p(3.0, 0.0, 0.0, 2.0), false);
        assert!(!filter.warming_up());
    }

    #[test]
    fn test_position_includes_offset() {
        let mut filter = ExclusionFilter::new(0);
        filter.sync(p(1.0, 2.0, 3.0, 4.0));
        filter.apply(p(11.0, 2.0, 3.0, 6.0), true);
        assert_eq!(filter.position(p(1.0, 2.0, 3.0, 4.0)), p(11.0, 2.0, 3.0, 6.0));
    }
}
