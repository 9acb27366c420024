//! Measurement position grid.
//!
//! Pure computation: given a target frequency/power and azimuth/elevation
//! ranges with sample densities, produce the ordered sequence of turntable
//! positions a sweep will visit. No I/O and no device dependency; the
//! turntable soft limits enter only through [`PositionGrid::check_limits`].
//!
//! Positions are laid out in boustrophedon (serpentine) order: elevation
//! advances once per full azimuth pass, and the azimuth direction alternates
//! between passes so the turntable never has to slew back across its whole
//! range between rows.

use crate::config::LimitPolicy;
use crate::error::ChamberError;
use crate::instrument::SoftLimits;
use log::warn;
use std::ops::Index;

/// One measurement position. Immutable once created.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    /// Turntable azimuth in degrees.
    pub azimuth: f64,
    /// Turntable elevation in degrees.
    pub elevation: f64,
    /// Transmit frequency in Hz. 64-bit so high-GHz values fit exactly.
    pub frequency_hz: i64,
    /// Transmit power in dBm.
    pub power_dbm: i32,
}

/// Parameters for grid generation.
#[derive(Debug, Clone, Copy)]
pub struct GridRequest {
    pub frequency_hz: i64,
    pub power_dbm: i32,
    pub azimuth_min: f64,
    pub azimuth_max: f64,
    pub elevation_min: f64,
    pub elevation_max: f64,
    pub azimuth_density: f64,
    pub elevation_density: f64,
}

/// An ordered, 0-indexed sequence of positions of fixed length. Constructed
/// once per sweep definition (generated or loaded from a savestate) and
/// never mutated afterwards; only the [`SweepCursor`] changes.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionGrid {
    positions: Vec<Position>,
}

impl PositionGrid {
    /// Rebuild a grid from already-validated positions (savestate load).
    pub fn from_positions(positions: Vec<Position>) -> Self {
        Self { positions }
    }

    pub fn total(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Position> {
        self.positions.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Position> {
        self.positions.iter()
    }

    /// Check every position against the turntable soft limits.
    ///
    /// Under [`LimitPolicy::Warn`] an out-of-limits position is reported and
    /// kept; under [`LimitPolicy::Reject`] the first offender fails the
    /// whole grid.
    pub fn check_limits(
        &self,
        limits: &SoftLimits,
        policy: LimitPolicy,
    ) -> Result<(), ChamberError> {
        for (index, position) in self.positions.iter().enumerate() {
            if limits.contains(position.azimuth, position.elevation) {
                continue;
            }
            match policy {
                LimitPolicy::Warn => warn!(
                    "position {} ({},{}) is outside the turntable soft limits",
                    index, position.azimuth, position.elevation
                ),
                LimitPolicy::Reject => {
                    return Err(ChamberError::PositionOutOfLimits {
                        azimuth: position.azimuth,
                        elevation: position.elevation,
                    })
                }
            }
        }
        Ok(())
    }
}

impl Index<usize> for PositionGrid {
    type Output = Position;

    fn index(&self, index: usize) -> &Position {
        &self.positions[index]
    }
}

impl<'a> IntoIterator for &'a PositionGrid {
    type Item = &'a Position;
    type IntoIter = std::slice::Iter<'a, Position>;

    fn into_iter(self) -> Self::IntoIter {
        self.positions.iter()
    }
}

/// Resume cursor into a [`PositionGrid`]. The only mutable state shared
/// between the sweep controller and the savestate store.
///
/// Invariant: `0 <= next <= total`; `next == total` means the sweep is
/// complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepCursor {
    total: usize,
    next: usize,
}

impl SweepCursor {
    /// Fresh cursor at the start of a grid.
    pub fn new(total: usize) -> Self {
        Self { total, next: 0 }
    }

    /// Cursor restored from a savestate.
    pub fn resumed(total: usize, next: usize) -> Result<Self, ChamberError> {
        if next > total {
            return Err(ChamberError::Configuration(format!(
                "savestate cursor {next} exceeds total {total}"
            )));
        }
        Ok(Self { total, next })
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn next(&self) -> usize {
        self.next
    }

    pub fn remaining(&self) -> usize {
        self.total - self.next
    }

    pub fn is_complete(&self) -> bool {
        self.next == self.total
    }

    /// Advance past the position just recorded. Called exactly once per
    /// completed Recording step, never on a failed move or measurement.
    pub fn advance(&mut self) {
        debug_assert!(self.next < self.total);
        if self.next < self.total {
            self.next += 1;
        }
    }
}

/// Number of samples an axis contributes: a zero-width range contributes a
/// single sample, otherwise both endpoints are included.
fn axis_samples(range: f64, density: f64) -> usize {
    if range == 0.0 {
        1
    } else {
        (range / density).round() as usize + 1
    }
}

/// Generate the full position grid for a sweep definition.
///
/// A density larger than its range is clamped down to the range (not an
/// error); a zero density or an inverted range is rejected. Axis values are
/// clamped to the axis maximum so rounding in the sample count can never
/// push a commanded position past the requested range.
pub fn generate(request: &GridRequest) -> Result<PositionGrid, ChamberError> {
    // NaN slips past ordering comparisons, so non-finite bounds and
    // densities must be rejected explicitly.
    if !request.azimuth_min.is_finite()
        || !request.azimuth_max.is_finite()
        || !request.elevation_min.is_finite()
        || !request.elevation_max.is_finite()
    {
        return Err(ChamberError::InvalidRange);
    }
    if !request.azimuth_density.is_finite() || !request.elevation_density.is_finite() {
        return Err(ChamberError::InvalidDensity);
    }

    let azimuth_range = request.azimuth_max - request.azimuth_min;
    let elevation_range = request.elevation_max - request.elevation_min;

    if azimuth_range < 0.0 || elevation_range < 0.0 {
        return Err(ChamberError::InvalidRange);
    }
    if request.azimuth_density == 0.0 || request.elevation_density == 0.0 {
        return Err(ChamberError::InvalidDensity);
    }

    let azimuth_density = if request.azimuth_density > azimuth_range && azimuth_range > 0.0 {
        azimuth_range
    } else {
        request.azimuth_density
    };
    let elevation_density =
        if request.elevation_density > elevation_range && elevation_range > 0.0 {
            elevation_range
        } else {
            request.elevation_density
        };

    let azimuth_samples = axis_samples(azimuth_range, azimuth_density);
    let elevation_samples = axis_samples(elevation_range, elevation_density);
    let total = azimuth_samples * elevation_samples;

    let mut positions = Vec::with_capacity(total);
    for i in 0..total {
        let row = i / azimuth_samples;
        let column = i % azimuth_samples;
        // Serpentine order: odd rows run the azimuth pass backwards.
        let azimuth_index = if row % 2 == 1 {
            azimuth_samples - 1 - column
        } else {
            column
        };

        let azimuth =
            (request.azimuth_min + azimuth_density * azimuth_index as f64).min(request.azimuth_max);
        let elevation =
            (request.elevation_min + elevation_density * row as f64).min(request.elevation_max);

        positions.push(Position {
            azimuth,
            elevation,
            frequency_hz: request.frequency_hz,
            power_dbm: request.power_dbm,
        });
    }

    Ok(PositionGrid { positions })
}
