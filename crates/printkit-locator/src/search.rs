//! The resume point search
//!
//! Walks history newest to oldest looking for the line during which the
//! nozzle ran out of material. `pos_missing` is the extruder coordinate
//! at which material stopped reaching the nozzle: the live extruder
//! position plus the sensor-to-nozzle dead length.

use crate::config::LocatorConfig;
use crate::history::{History, MoveRecord};
use crate::zcheck::{ZChangeDetector, ZStop};

/// Outcome of a search
#[derive(Debug, Clone, PartialEq)]
pub struct LocateResult {
    /// The record to resume from, if one was selected
    pub candidate: Option<MoveRecord>,
    /// Number of records walked
    pub examined: usize,
    /// Why the walk ended
    pub stop: StopReason,
}

/// Why the walk ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// History was empty
    Empty,
    /// Every record was walked
    Exhausted,
    /// The record straddling the missing point was found
    Straddle,
    /// A Z change made walking further unsafe
    ZChange(ZStop),
    /// No material was missing and gravity compensation is off
    NotMissing,
    /// The gravity window was satisfied
    GravityWindow,
    /// The gravity window cannot be met
    InvalidWindow,
    /// A line printed normally after the missing point
    NothingToRecover,
}

/// Gravity window verdict for the accumulated compensation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Window {
    Continue,
    Satisfied,
    Invalid,
}

fn check_window(compensation: f64, config: &LocatorConfig) -> Window {
    match (
        compensation < config.gravity_min,
        compensation < config.gravity_target,
    ) {
        (true, true) | (false, true) => Window::Continue,
        (true, false) => Window::Invalid,
        (false, false) => Window::Satisfied,
    }
}

/// Pick the record to resume from
///
/// A Z stop always ends the walk and keeps the previous candidate, so a
/// collision risk takes precedence over recovering missing material.
pub fn locate(history: &History, live_e: f64, config: &LocatorConfig) -> LocateResult {
    if history.is_empty() {
        return LocateResult {
            candidate: None,
            examined: 0,
            stop: StopReason::Empty,
        };
    }

    let pos_missing = live_e + config.dead_length;
    let mut detector = ZChangeDetector::new();
    let mut candidate: Option<&MoveRecord> = None;
    let mut compensation = 0.0;
    let mut examined = 0;
    let mut stop = StopReason::Exhausted;

    for record in history.newest_first() {
        examined += 1;
        let remaining = pos_missing - record.after.e;
        let delta_e = record.delta_e();

        if let Some(reason) = detector.check(record) {
            stop = StopReason::ZChange(reason);
            break;
        }

        if remaining > 0.0 {
            if !config.gravity_configured() {
                stop = StopReason::NotMissing;
                break;
            }
            compensation += delta_e;
            match check_window(compensation, config) {
                Window::Continue => {}
                Window::Invalid => {
                    stop = StopReason::InvalidWindow;
                    break;
                }
                Window::Satisfied => {
                    if candidate.is_none() {
                        candidate = Some(record);
                    }
                    stop = StopReason::GravityWindow;
                    break;
                }
            }
        } else if pos_missing < record.before.e {
            if record.after.e < live_e {
                stop = StopReason::NothingToRecover;
                break;
            }
        } else {
            candidate = Some(record);
            stop = StopReason::Straddle;
            break;
        }

        if delta_e > 0.0 {
            candidate = Some(record);
        }
    }

    tracing::info!(
        examined,
        compensation,
        stop = ?stop,
        offset = candidate.map(|r| r.offset),
        "Lookback finished"
    );

    LocateResult {
        candidate: candidate.cloned(),
        examined,
        stop,
    }
}
