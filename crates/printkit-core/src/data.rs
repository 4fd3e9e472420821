//! Data models for positions and motion mode state
//!
//! This module provides:
//! - Four-axis toolhead position (X, Y, Z, E)
//! - Axis indexing for per-axis accumulator arithmetic
//! - The saved motion mode snapshot restored on resume

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Index, IndexMut, Sub};

/// Toolhead axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    /// X-axis
    X,
    /// Y-axis
    Y,
    /// Z-axis
    Z,
    /// Extruder axis
    E,
}

impl Axis {
    /// All axes in storage order
    pub const ALL: [Axis; 4] = [Axis::X, Axis::Y, Axis::Z, Axis::E];
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::X => write!(f, "X"),
            Axis::Y => write!(f, "Y"),
            Axis::Z => write!(f, "Z"),
            Axis::E => write!(f, "E"),
        }
    }
}

/// Toolhead position with extruder coordinate
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position4 {
    /// X-axis position
    pub x: f64,
    /// Y-axis position
    pub y: f64,
    /// Z-axis position
    pub z: f64,
    /// Extruder position
    pub e: f64,
}

impl Position4 {
    /// Create a position from all four coordinates
    pub fn new(x: f64, y: f64, z: f64, e: f64) -> Self {
        debug_assert!(
            x.is_finite() && y.is_finite() && z.is_finite() && e.is_finite(),
            "Position4 axes must be finite: x={x}, y={y}, z={z}, e={e}"
        );
        Self { x, y, z, e }
    }

    /// Origin position
    pub fn zero() -> Self {
        Self::default()
    }

    /// Build a position from an `[x, y, z, e]` array
    pub fn from_array(axes: [f64; 4]) -> Self {
        Self::new(axes[0], axes[1], axes[2], axes[3])
    }

    /// Get all axes as an `[x, y, z, e]` array
    pub fn to_array(self) -> [f64; 4] {
        [self.x, self.y, self.z, self.e]
    }

    /// Whether X or Y differs from `other`
    pub fn xy_differs(&self, other: &Position4) -> bool {
        self.x != other.x || self.y != other.y
    }

    /// Whether every axis is exactly zero
    pub fn is_zero(&self) -> bool {
        self.x == 0.0 && self.y == 0.0 && self.z == 0.0 && self.e == 0.0
    }
}

impl Index<Axis> for Position4 {
    type Output = f64;

    fn index(&self, axis: Axis) -> &f64 {
        match axis {
            Axis::X => &self.x,
            Axis::Y => &self.y,
            Axis::Z => &self.z,
            Axis::E => &self.e,
        }
    }
}

impl IndexMut<Axis> for Position4 {
    fn index_mut(&mut self, axis: Axis) -> &mut f64 {
        match axis {
            Axis::X => &mut self.x,
            Axis::Y => &mut self.y,
            Axis::Z => &mut self.z,
            Axis::E => &mut self.e,
        }
    }
}

impl Add for Position4 {
    type Output = Position4;

    fn add(self, rhs: Position4) -> Position4 {
        Position4 {
            x: self.x + rhs.x,
            y: self.y + rhs.y,
            z: self.z + rhs.z,
            e: self.e + rhs.e,
        }
    }
}

impl Sub for Position4 {
    type Output = Position4;

    fn sub(self, rhs: Position4) -> Position4 {
        Position4 {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
            z: self.z - rhs.z,
            e: self.e - rhs.e,
        }
    }
}

impl fmt::Display for Position4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "X:{:.3} Y:{:.3} Z:{:.3} E:{:.3}",
            self.x, self.y, self.z, self.e
        )
    }
}

/// Saved motion mode state
///
/// Captured alongside every dispatched line so that a resume can put the
/// command interpreter back in the coordinate and extrusion modes that were
/// active when the line originally ran.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionModeSnapshot {
    /// Absolute (G90) or relative (G91) coordinates
    pub absolute_coordinates: bool,
    /// Absolute (M82) or relative (M83) extrusion
    pub absolute_extrude: bool,
    /// Current feed rate in mm/s
    pub speed: f64,
    /// Speed override factor
    pub speed_factor: f64,
    /// Extrusion override factor
    pub extrude_factor: f64,
    /// Last commanded position in command coordinates
    pub last_position: Position4,
}

impl Default for MotionModeSnapshot {
    fn default() -> Self {
        Self {
            absolute_coordinates: true,
            absolute_extrude: true,
            speed: 25.0,
            speed_factor: 1.0,
            extrude_factor: 1.0,
            last_position: Position4::zero(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axis_indexing() {
        let mut pos = Position4::new(1.0, 2.0, 3.0, 4.0);
        assert_eq!(pos[Axis::Z], 3.0);
        pos[Axis::E] += 1.5;
        assert_eq!(pos.e, 5.5);
    }

    #[test]
    fn test_position_arithmetic() {
        let a = Position4::new(10.0, 10.0, 0.2, 5.0);
        let b = Position4::new(4.0, 1.0, 0.2, 2.0);
        assert_eq!(a - b, Position4::new(6.0, 9.0, 0.0, 3.0));
        assert_eq!((a - b) + b, a);
        assert!(a.xy_differs(&b));
        assert!(!a.xy_differs(&Position4::new(10.0, 10.0, 9.0, 9.0)));
    }
}
