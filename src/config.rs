//! Configuration management.
//!
//! All tunable values live in an immutable [`Settings`] structure built once
//! at startup and passed by reference into the core components. Every field
//! carries a serde default matching the chamber hardware in the EE building,
//! so the program runs with no config file at all; a TOML file (searched as
//! `config/<name>.toml`) overrides individual values.

use crate::error::ChamberError;
use config::Config;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Settings {
    pub log_level: LogLevel,
    pub instruments: InstrumentSettings,
    pub timing: TimingSettings,
    pub analyzer: AnalyzerSetup,
    pub signal_generator: SignalGeneratorLimits,
    pub storage: StorageSettings,
    pub sweep: SweepDefaults,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(transparent)]
pub struct LogLevel(pub String);

impl Default for LogLevel {
    fn default() -> Self {
        Self("info".to_string())
    }
}

/// Instrument addresses. The turntable axes and the signal generator sit on
/// the GPIB bus; the FieldFox answers SCPI over its LAN socket.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct InstrumentSettings {
    pub turntable_azimuth_resource: String,
    pub turntable_elevation_resource: String,
    pub signal_generator_resource: String,
    pub analyzer_addr: String,
}

impl Default for InstrumentSettings {
    fn default() -> Self {
        Self {
            turntable_azimuth_resource: "GPIB0::18::INSTR".to_string(),
            turntable_elevation_resource: "GPIB0::19::INSTR".to_string(),
            signal_generator_resource: "GPIB0::20::INSTR".to_string(),
            analyzer_addr: "192.168.0.1:5025".to_string(),
        }
    }
}

/// Timing knobs for the sweep loop, all in milliseconds.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TimingSettings {
    /// How many analyzer sweep cycles each measurement hold should span.
    pub desired_samples: u32,
    /// Floor for the calibrated measurement hold.
    pub min_measurement_ms: u64,
    /// Hold duration used if calibration is somehow skipped.
    pub default_measurement_ms: u64,
    /// Seed for the running movement-time average before any move completes.
    pub default_movement_estimate_ms: u64,
    /// Per-step instrument I/O latency not otherwise modeled. An empirical
    /// fudge factor for the remaining-time estimate; tune per installation.
    pub fixed_io_overhead_ms: u64,
    /// Sleep between device readiness polls while instruments are not
    /// responding.
    pub readiness_poll_ms: u64,
    /// Sleep between turntable "operation complete" polls during a move.
    pub movement_poll_ms: u64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            desired_samples: 3,
            min_measurement_ms: 1_000,
            default_measurement_ms: 10_000,
            default_movement_estimate_ms: 4_000,
            fixed_io_overhead_ms: 6_000,
            readiness_poll_ms: 10_000,
            movement_poll_ms: 500,
        }
    }
}

/// Spectrum analyzer setup issued before a sweep (unless `--manual`).
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AnalyzerSetup {
    /// Half-width of the frequency window centered on the target, in Hz.
    pub range_scale_hz: i64,
    pub resolution_bandwidth_hz: i64,
    pub video_bandwidth_hz: i64,
    /// Usually odd (401, 1001) so there is a clear middle point.
    pub sweep_points: u32,
    pub marker: u32,
}

impl Default for AnalyzerSetup {
    fn default() -> Self {
        Self {
            range_scale_hz: 500_000_000,
            resolution_bandwidth_hz: 500_000,
            video_bandwidth_hz: 5_000,
            sweep_points: 1001,
            marker: 1,
        }
    }
}

/// Output power range the signal generator supports.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SignalGeneratorLimits {
    pub min_power_dbm: f64,
    pub max_power_dbm: f64,
}

impl Default for SignalGeneratorLimits {
    fn default() -> Self {
        Self {
            min_power_dbm: -30.0,
            max_power_dbm: 5.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageSettings {
    /// Default measurement record destination; `--output` overrides it.
    pub data_path: String,
    /// Savestate (checkpoint) file location.
    pub savestate_path: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_path: "chamber-data.csv".to_string(),
            savestate_path: ".chamber-savestate.dat".to_string(),
        }
    }
}

/// What to do when a generated position falls outside the turntable soft
/// limits.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LimitPolicy {
    /// Report the position and keep it in the grid. The operator is expected
    /// to catch it in the preview table.
    #[default]
    Warn,
    /// Fail grid validation outright.
    Reject,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SweepDefaults {
    pub azimuth_density: f64,
    pub elevation_density: f64,
    pub limit_policy: LimitPolicy,
}

impl Default for SweepDefaults {
    fn default() -> Self {
        Self {
            azimuth_density: 1.0,
            elevation_density: 1.0,
            limit_policy: LimitPolicy::Warn,
        }
    }
}

impl Settings {
    /// Load settings, layering `config/<name>.toml` (if present) over the
    /// built-in defaults.
    pub fn new(config_name: Option<&str>) -> Result<Self, ChamberError> {
        let config_path = format!("config/{}", config_name.unwrap_or("default"));
        let s = Config::builder()
            .add_source(config::File::with_name(&config_path).required(false))
            .build()
            .map_err(ChamberError::Config)?;

        s.try_deserialize().map_err(ChamberError::Config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_chamber_hardware() {
        let settings = Settings::default();
        assert_eq!(settings.timing.desired_samples, 3);
        assert_eq!(settings.timing.min_measurement_ms, 1_000);
        assert_eq!(settings.timing.fixed_io_overhead_ms, 6_000);
        assert_eq!(
            settings.instruments.turntable_azimuth_resource,
            "GPIB0::18::INSTR"
        );
        assert_eq!(settings.storage.savestate_path, ".chamber-savestate.dat");
        assert_eq!(settings.sweep.limit_policy, LimitPolicy::Warn);
    }

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let settings = Settings::new(Some("does-not-exist")).expect("defaults should load");
        assert_eq!(settings.analyzer.sweep_points, 1001);
        assert_eq!(settings.signal_generator.min_power_dbm, -30.0);
    }
}
