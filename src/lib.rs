//! Automated antenna-pattern measurements in an anechoic chamber.
//!
//! The program steers a two-axis turntable, keys a signal generator, and
//! reads a spectrum analyzer marker across a grid of azimuth/elevation
//! positions, recording one measurement per position. Sweeps run for hours,
//! so progress is checkpointed to a savestate file and can be resumed after
//! an interruption or a hardware fault.
//!
//! Layering, leaves first:
//!
//! - [`grid`] derives the ordered position sequence from range/density
//!   parameters (pure computation).
//! - [`checkpoint`] persists and restores the grid plus the resume cursor.
//! - [`instrument`] defines the device capability traits, their VISA/SCPI
//!   drivers, and scriptable mocks.
//! - [`readiness`] aggregates the devices' polled "operation complete"
//!   status.
//! - [`sweep`] is the measurement loop itself.
//! - [`app`] wires it all to the command line.

pub mod app;
pub mod cancel;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod grid;
pub mod instrument;
pub mod operator;
pub mod readiness;
pub mod sink;
pub mod sweep;

pub use error::{AppResult, ChamberError};
