//! Instrument capability traits.
//!
//! The sweep core works exclusively against these traits; concrete drivers
//! (VISA GPIB for the turntable axes and signal generator, SCPI-over-TCP for
//! the FieldFox) live in submodules, and [`mock`] provides scriptable
//! in-memory implementations for tests.
//!
//! All of these instruments signal busy/complete by polling (`*OPC?` style);
//! nothing pushes. Commands that start motion are fire-and-forget, with
//! completion observed separately through the readiness queries.

pub mod fieldfox;
pub mod mock;
pub mod scpi;
pub mod visa;

use anyhow::Result;
use async_trait::async_trait;

/// Turntable axis selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Azimuth,
    Elevation,
}

/// Soft travel limits reported by the turntable controllers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SoftLimits {
    pub azimuth_min: f64,
    pub azimuth_max: f64,
    pub elevation_min: f64,
    pub elevation_max: f64,
}

impl SoftLimits {
    /// True when the position lies inside both axes' limits. NaN on either
    /// coordinate is never valid.
    pub fn contains(&self, azimuth: f64, elevation: f64) -> bool {
        if azimuth.is_nan() || elevation.is_nan() {
            return false;
        }
        (self.azimuth_min..=self.azimuth_max).contains(&azimuth)
            && (self.elevation_min..=self.elevation_max).contains(&elevation)
    }
}

/// Spectrum analyzer trace accumulation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceMode {
    /// Live trace, rewritten every sweep.
    ClearRewrite,
    /// Hold the maximum seen per bin across sweeps.
    MaxHold,
}

/// Interpret an instrument's `*OPC?` reply. The chamber hardware answers
/// with either a bare digit or a `+`-prefixed one.
pub fn parse_operation_complete(response: &str) -> Option<bool> {
    match response.trim() {
        "1" | "+1" => Some(true),
        "0" | "+0" => Some(false),
        _ => None,
    }
}

/// Two-axis turntable capability.
#[async_trait]
pub trait Turntable: Send + Sync {
    /// Per-axis "operation complete" poll. Meaningful only after a command
    /// has been issued on that axis.
    async fn axis_ready(&mut self, axis: Axis) -> Result<bool>;

    /// Command both axes toward a position. Fire-and-forget: completion must
    /// be observed via [`Turntable::axis_ready`].
    async fn move_to(&mut self, azimuth: f64, elevation: f64) -> Result<()>;

    /// Realized position on one axis, as parsed value plus the raw response
    /// text (preserved verbatim in the data record).
    async fn current_position(&mut self, axis: Axis) -> Result<(f64, String)>;

    /// Soft travel limits configured in the motor controllers.
    async fn soft_limits(&mut self) -> Result<SoftLimits>;
}

/// RF signal generator capability.
#[async_trait]
pub trait SignalGenerator: Send + Sync {
    async fn is_ready(&mut self) -> Result<bool>;

    /// Set output frequency to `hz * 10^exponent` Hz.
    async fn set_frequency(&mut self, hz: f64, exponent: i32) -> Result<()>;

    async fn set_power(&mut self, dbm: f64) -> Result<()>;

    async fn set_modulation(&mut self, on: bool) -> Result<()>;

    /// Enable or disable the RF output.
    async fn set_output(&mut self, on: bool) -> Result<()>;

    async fn current_frequency(&mut self) -> Result<f64>;

    async fn current_power(&mut self) -> Result<f64>;
}

/// Spectrum analyzer capability.
#[async_trait]
pub trait SpectrumAnalyzer: Send + Sync {
    async fn is_ready(&mut self) -> Result<bool>;

    async fn preset(&mut self) -> Result<()>;

    /// Select an instrument mode, e.g. `"SA"`.
    async fn set_mode(&mut self, mode: &str) -> Result<()>;

    async fn set_range_start(&mut self, hz: f64, exponent: i32) -> Result<()>;

    async fn set_range_stop(&mut self, hz: f64, exponent: i32) -> Result<()>;

    async fn set_resolution_bandwidth(&mut self, hz: f64, exponent: i32) -> Result<()>;

    async fn set_video_bandwidth(&mut self, hz: f64, exponent: i32) -> Result<()>;

    async fn set_sweep_points(&mut self, points: u32) -> Result<()>;

    /// Place a normal marker at a frequency.
    async fn set_marker(&mut self, marker: u32, hz: f64, exponent: i32) -> Result<()>;

    async fn set_trace_mode(&mut self, mode: TraceMode) -> Result<()>;

    /// Continuous capture on/off.
    async fn set_continuous(&mut self, on: bool) -> Result<()>;

    /// Single immediate capture. Blocks until the sweep finishes; this is
    /// what the measurement-time calibration times.
    async fn trigger_immediate(&mut self) -> Result<()>;

    /// Marker amplitude, as parsed value plus the raw response text.
    async fn marker_value(&mut self, marker: u32) -> Result<(f64, String)>;
}

/// The full set of instruments a sweep drives, behind trait objects so the
/// controller and tests are hardware-agnostic.
pub struct Devices {
    pub turntable: Box<dyn Turntable>,
    pub signal_generator: Box<dyn SignalGenerator>,
    pub analyzer: Box<dyn SpectrumAnalyzer>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opc_responses() {
        assert_eq!(parse_operation_complete("1\r\n"), Some(true));
        assert_eq!(parse_operation_complete("+1"), Some(true));
        assert_eq!(parse_operation_complete("0"), Some(false));
        assert_eq!(parse_operation_complete("+0\n"), Some(false));
        assert_eq!(parse_operation_complete("ERR"), None);
    }

    #[test]
    fn soft_limits_contains() {
        let limits = SoftLimits {
            azimuth_min: -180.0,
            azimuth_max: 180.0,
            elevation_min: -30.0,
            elevation_max: 30.0,
        };
        assert!(limits.contains(0.0, 0.0));
        assert!(limits.contains(-180.0, 30.0));
        assert!(!limits.contains(180.1, 0.0));
        assert!(!limits.contains(f64::NAN, 0.0));
    }
}
