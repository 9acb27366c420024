//! VISA GPIB drivers for the turntable axes and the signal generator.
//!
//! The motor controllers and the signal generator sit on the GPIB bus and
//! are reached through a VISA resource manager. VISA I/O is synchronous, so
//! every exchange runs on Tokio's blocking executor.
//!
//! Built without the `instrument_visa` feature, the drivers compile but
//! every operation fails with a rebuild hint, which keeps the default build
//! free of the vendor VISA library.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::time::Duration;

#[cfg(feature = "instrument_visa")]
use anyhow::Context;
#[cfg(feature = "instrument_visa")]
use log::debug;
#[cfg(feature = "instrument_visa")]
use std::sync::Arc;
#[cfg(feature = "instrument_visa")]
use tokio::sync::Mutex;

#[cfg(feature = "instrument_visa")]
use visa_rs::{DefaultRM, Instrument, VISA};

use super::{parse_operation_complete, Axis, SignalGenerator, SoftLimits, Turntable};

/// One VISA session, e.g. "GPIB0::18::INSTR".
///
/// Wraps the synchronous visa-rs session so callers get plain async
/// `write`/`query` calls; each exchange hops to a blocking thread.
pub struct VisaChannel {
    resource_string: String,
    timeout: Duration,
    line_terminator: String,
    #[cfg(feature = "instrument_visa")]
    instrument: Option<Arc<Mutex<Box<dyn Instrument>>>>,
}

impl VisaChannel {
    pub fn new(resource_string: impl Into<String>) -> Self {
        Self {
            resource_string: resource_string.into(),
            timeout: Duration::from_secs(5),
            line_terminator: "\r\n".to_string(),
            #[cfg(feature = "instrument_visa")]
            instrument: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn resource(&self) -> &str {
        &self.resource_string
    }

    #[cfg(feature = "instrument_visa")]
    pub async fn connect(&mut self) -> Result<()> {
        let resource_str = self.resource_string.clone();
        let timeout_ms = self.timeout.as_millis() as u32;

        let instrument = tokio::task::spawn_blocking(move || {
            let rm = DefaultRM::new().context("failed to create VISA resource manager")?;
            let instr = rm
                .open(&resource_str, timeout_ms, 0)
                .with_context(|| format!("failed to open VISA resource {resource_str}"))?;
            Ok::<Box<dyn Instrument>, anyhow::Error>(instr)
        })
        .await
        .context("VISA open task panicked")??;

        self.instrument = Some(Arc::new(Mutex::new(instrument)));
        debug!(
            "VISA resource '{}' opened with {}ms timeout",
            self.resource_string,
            self.timeout.as_millis()
        );
        Ok(())
    }

    #[cfg(not(feature = "instrument_visa"))]
    pub async fn connect(&mut self) -> Result<()> {
        Err(Self::disabled_error())
    }

    /// Fire-and-forget write, no response read.
    #[cfg(feature = "instrument_visa")]
    pub async fn write(&self, command: &str) -> Result<()> {
        let instrument = self
            .instrument
            .as_ref()
            .ok_or_else(|| anyhow!("VISA resource {} not connected", self.resource_string))?
            .clone();
        let framed = format!("{}{}", command, self.line_terminator);
        let command_for_log = command.to_string();
        let timeout = self.timeout;

        tokio::task::spawn_blocking(move || {
            let mut guard = instrument.blocking_lock();
            guard
                .set_timeout(timeout.as_millis() as u32)
                .context("failed to set VISA timeout")?;
            guard
                .write(&framed)
                .with_context(|| format!("VISA write failed for: {command_for_log}"))?;
            debug!("VISA write sent: {command_for_log}");
            Ok(())
        })
        .await
        .context("VISA write task panicked")?
    }

    #[cfg(not(feature = "instrument_visa"))]
    pub async fn write(&self, _command: &str) -> Result<()> {
        Err(Self::disabled_error())
    }

    /// Write then read one response, trimmed.
    #[cfg(feature = "instrument_visa")]
    pub async fn query(&self, command: &str) -> Result<String> {
        let instrument = self
            .instrument
            .as_ref()
            .ok_or_else(|| anyhow!("VISA resource {} not connected", self.resource_string))?
            .clone();
        let framed = format!("{}{}", command, self.line_terminator);
        let command_for_log = command.to_string();
        let timeout = self.timeout;

        tokio::task::spawn_blocking(move || {
            let mut guard = instrument.blocking_lock();
            guard
                .set_timeout(timeout.as_millis() as u32)
                .context("failed to set VISA timeout")?;
            let response = guard
                .query(&framed)
                .with_context(|| format!("VISA query failed for: {command_for_log}"))?;
            let response = response.trim().to_string();
            debug!("VISA query '{command_for_log}' -> '{response}'");
            Ok(response)
        })
        .await
        .context("VISA query task panicked")?
    }

    #[cfg(not(feature = "instrument_visa"))]
    pub async fn query(&self, _command: &str) -> Result<String> {
        Err(Self::disabled_error())
    }

    #[cfg(not(feature = "instrument_visa"))]
    fn disabled_error() -> anyhow::Error {
        anyhow!("VISA support not enabled. Rebuild with --features instrument_visa")
    }
}

async fn opc_ready(channel: &VisaChannel) -> Result<bool> {
    let response = channel.query("*OPC?").await?;
    parse_operation_complete(&response).ok_or_else(|| {
        anyhow!(
            "unrecognized *OPC? response from {}: '{response}'",
            channel.resource()
        )
    })
}

fn parse_numeric(raw: &str, what: &str, resource: &str) -> Result<f64> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| anyhow!("unparseable {what} from {resource}: '{raw}'"))
}

/// Two-axis positioner built from independent GPIB motor controllers.
///
/// The controllers speak a terse command set: `GOTO <deg>` starts a move,
/// `CP` reports current position, `UL`/`LL` report the configured soft
/// limits, `*OPC?` reports motion completion.
pub struct GpibTurntable {
    azimuth: VisaChannel,
    elevation: VisaChannel,
}

impl GpibTurntable {
    pub fn new(azimuth: VisaChannel, elevation: VisaChannel) -> Self {
        Self { azimuth, elevation }
    }

    pub async fn connect(&mut self) -> Result<()> {
        self.azimuth.connect().await?;
        self.elevation.connect().await
    }

    fn channel(&self, axis: Axis) -> &VisaChannel {
        match axis {
            Axis::Azimuth => &self.azimuth,
            Axis::Elevation => &self.elevation,
        }
    }

    async fn read_axis_limits(&self, axis: Axis) -> Result<(f64, f64)> {
        let channel = self.channel(axis);
        let upper = channel.query("UL").await?;
        let upper = parse_numeric(&upper, "upper limit", channel.resource())?;
        let lower = channel.query("LL").await?;
        let lower = parse_numeric(&lower, "lower limit", channel.resource())?;
        Ok((lower, upper))
    }
}

#[async_trait]
impl Turntable for GpibTurntable {
    async fn axis_ready(&mut self, axis: Axis) -> Result<bool> {
        opc_ready(self.channel(axis)).await
    }

    async fn move_to(&mut self, azimuth: f64, elevation: f64) -> Result<()> {
        // Controllers accept hundredths of a degree.
        self.azimuth.write(&format!("GOTO {azimuth:.2}")).await?;
        self.elevation.write(&format!("GOTO {elevation:.2}")).await
    }

    async fn current_position(&mut self, axis: Axis) -> Result<(f64, String)> {
        let channel = self.channel(axis);
        let raw = channel.query("CP").await?;
        let value = parse_numeric(&raw, "position", channel.resource())?;
        Ok((value, raw))
    }

    async fn soft_limits(&mut self) -> Result<SoftLimits> {
        let (azimuth_min, azimuth_max) = self.read_axis_limits(Axis::Azimuth).await?;
        let (elevation_min, elevation_max) = self.read_axis_limits(Axis::Elevation).await?;
        Ok(SoftLimits {
            azimuth_min,
            azimuth_max,
            elevation_min,
            elevation_max,
        })
    }
}

/// GPIB RF signal generator.
pub struct GpibSignalGenerator {
    channel: VisaChannel,
}

impl GpibSignalGenerator {
    pub fn new(channel: VisaChannel) -> Self {
        Self { channel }
    }

    pub async fn connect(&mut self) -> Result<()> {
        self.channel.connect().await
    }

    pub async fn reset(&mut self) -> Result<()> {
        self.channel.write("*RST").await
    }
}

#[async_trait]
impl SignalGenerator for GpibSignalGenerator {
    async fn is_ready(&mut self) -> Result<bool> {
        opc_ready(&self.channel).await
    }

    async fn set_frequency(&mut self, hz: f64, exponent: i32) -> Result<()> {
        self.channel.write(&format!("FREQ {hz}E{exponent}Hz")).await
    }

    async fn set_power(&mut self, dbm: f64) -> Result<()> {
        self.channel.write(&format!("POW {dbm}dBm")).await
    }

    async fn set_modulation(&mut self, on: bool) -> Result<()> {
        let status = if on { "ON" } else { "OFF" };
        self.channel.write(&format!("OUTP:MOD {status}")).await
    }

    async fn set_output(&mut self, on: bool) -> Result<()> {
        let status = if on { "ON" } else { "OFF" };
        self.channel.write(&format!("OUTPUT {status}")).await
    }

    async fn current_frequency(&mut self) -> Result<f64> {
        let raw = self.channel.query("FREQ?").await?;
        parse_numeric(&raw, "frequency", self.channel.resource())
    }

    async fn current_power(&mut self) -> Result<f64> {
        let raw = self.channel.query("POW?").await?;
        parse_numeric(&raw, "power", self.channel.resource())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[cfg(not(feature = "instrument_visa"))]
    async fn disabled_build_reports_rebuild_hint() {
        let channel = VisaChannel::new("GPIB0::18::INSTR");
        let err = channel.query("*OPC?").await.unwrap_err();
        assert!(err.to_string().contains("instrument_visa"));
    }

    #[test]
    fn numeric_parse_failures_name_the_resource() {
        let err = parse_numeric("garbage", "position", "GPIB0::18::INSTR").unwrap_err();
        assert!(err.to_string().contains("GPIB0::18::INSTR"));
    }
}
