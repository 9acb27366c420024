//! Custom error types for the application.
//!
//! This module defines the primary error type, `ChamberError`, for the entire
//! application. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the failure classes of a chamber run:
//!
//! - **`Config` / `Configuration`**: file-level parse failures from the
//!   `config` crate, and semantic problems (inverted ranges, zero densities,
//!   out-of-range frequency or power) that pass parsing but are logically
//!   invalid. Both are fatal before any hardware is touched.
//! - **`DeviceInit`**: a device failed to connect or respond during startup.
//!   Fatal, but the caller offers a savestate first so grid parameters are
//!   not lost.
//! - **`Instrument`**: a mid-run driver failure (VISA/SCPI exchange).
//! - **`Checkpoint`**: the savestate file is version-mismatched, truncated,
//!   or malformed. Fatal for a resume attempt.
//! - **`FeatureNotEnabled`**: the build lacks a compile-time feature (e.g.
//!   `instrument_visa`) that the requested operation needs.
//!
//! Transient device unreadiness and single data-record write failures are
//! deliberately *not* represented here: they are recovered locally in the
//! sweep loop (indefinite retry with an audible alert, or a logged skip).

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, ChamberError>;

/// Errors produced while reading a savestate file.
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("unsupported savestate version {found} (this build reads version {expected})")]
    VersionMismatch { found: u32, expected: u32 },

    #[error("savestate ends early: read {found} of {expected} position records")]
    Truncated { expected: usize, found: usize },

    #[error("malformed savestate line {line}: {reason}")]
    Malformed { line: usize, reason: String },
}

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum ChamberError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Elevation and azimuth ranges must not be inverted")]
    InvalidRange,

    #[error("Azimuth and elevation densities must not be zero")]
    InvalidDensity,

    #[error("Position {azimuth},{elevation} is outside the turntable soft limits")]
    PositionOutOfLimits { azimuth: f64, elevation: f64 },

    #[error("Device initialization error: {0}")]
    DeviceInit(String),

    #[error("Instrument error: {0}")]
    Instrument(String),

    #[error("Savestate error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    #[error("Run aborted by operator")]
    Aborted,
}

// Instrument drivers report through `anyhow` with context chains; collapse
// those into the instrument error class when they cross into the core.
impl From<anyhow::Error> for ChamberError {
    fn from(err: anyhow::Error) -> Self {
        ChamberError::Instrument(format!("{err:#}"))
    }
}
