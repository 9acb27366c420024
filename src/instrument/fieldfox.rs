//! Keysight FieldFox spectrum analyzer driver (SCPI over TCP).
//!
//! The FieldFox is the one chamber instrument not on the GPIB bus; it is
//! reached over the LAN. Most setter commands are followed by an `*OPC?`
//! poll so a slow command surfaces as "not ready" rather than silently
//! overlapping the next one.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::warn;

use super::scpi::ScpiTcpTransport;
use super::{parse_operation_complete, SpectrumAnalyzer, TraceMode};

/// Markers the FieldFox front panel exposes.
const MARKER_RANGE: std::ops::RangeInclusive<u32> = 1..=6;

pub struct FieldFox {
    transport: ScpiTcpTransport,
}

impl FieldFox {
    pub fn new(transport: ScpiTcpTransport) -> Self {
        Self { transport }
    }

    /// Open the LAN connection. Must be called before any command.
    pub async fn connect(&mut self) -> Result<()> {
        self.transport.connect().await
    }

    pub async fn close(&mut self) {
        self.transport.close().await;
    }

    async fn opc_ready(&mut self) -> Result<bool> {
        let response = self.transport.query("*OPC?").await?;
        parse_operation_complete(&response)
            .ok_or_else(|| anyhow!("unrecognized *OPC? response from analyzer: '{response}'"))
    }

    /// Issue a setter then wait for the analyzer to report it complete.
    async fn send_and_settle(&mut self, command: &str) -> Result<()> {
        self.transport.send(command).await?;
        if !self.opc_ready().await? {
            warn!("analyzer still busy after '{command}'");
        }
        Ok(())
    }

    fn check_marker(marker: u32) -> Result<()> {
        if MARKER_RANGE.contains(&marker) {
            Ok(())
        } else {
            Err(anyhow!("marker number {marker} out of range 1..=6"))
        }
    }
}

#[async_trait]
impl SpectrumAnalyzer for FieldFox {
    async fn is_ready(&mut self) -> Result<bool> {
        self.opc_ready().await
    }

    async fn preset(&mut self) -> Result<()> {
        self.send_and_settle("SYST:PRES;").await
    }

    async fn set_mode(&mut self, mode: &str) -> Result<()> {
        self.send_and_settle(&format!("INST:SEL '{mode}';")).await
    }

    async fn set_range_start(&mut self, hz: f64, exponent: i32) -> Result<()> {
        self.send_and_settle(&format!("SENS:FREQ:START {hz}E{exponent}Hz;"))
            .await
    }

    async fn set_range_stop(&mut self, hz: f64, exponent: i32) -> Result<()> {
        self.send_and_settle(&format!("SENS:FREQ:STOP {hz}E{exponent}Hz;"))
            .await
    }

    async fn set_resolution_bandwidth(&mut self, hz: f64, exponent: i32) -> Result<()> {
        self.send_and_settle(&format!("SENS:BAND:RES {hz}E{exponent}Hz;"))
            .await
    }

    async fn set_video_bandwidth(&mut self, hz: f64, exponent: i32) -> Result<()> {
        self.send_and_settle(&format!("SENS:BAND:VID {hz}E{exponent}Hz;"))
            .await
    }

    async fn set_sweep_points(&mut self, points: u32) -> Result<()> {
        self.send_and_settle(&format!("SENS:SWEEP:POINTS {points};"))
            .await
    }

    async fn set_marker(&mut self, marker: u32, hz: f64, exponent: i32) -> Result<()> {
        Self::check_marker(marker)?;
        self.transport
            .send(&format!("CALC:MARK{marker} NORM;"))
            .await?;
        self.send_and_settle(&format!("CALC:MARK{marker}:X {hz}E{exponent};"))
            .await
    }

    async fn set_trace_mode(&mut self, mode: TraceMode) -> Result<()> {
        // Max-hold accumulates from whatever the trace held; pass through
        // clear/rewrite first so every hold starts from a fresh trace.
        match mode {
            TraceMode::ClearRewrite => self.send_and_settle("TRAC:TYPE CLRW;").await,
            TraceMode::MaxHold => {
                self.send_and_settle("TRAC:TYPE CLRW;").await?;
                self.send_and_settle("TRAC:TYPE MAXH;").await
            }
        }
    }

    async fn set_continuous(&mut self, on: bool) -> Result<()> {
        let status = if on { "ON" } else { "OFF" };
        self.send_and_settle(&format!("INIT:CONT {status};")).await
    }

    async fn trigger_immediate(&mut self) -> Result<()> {
        self.transport.send("INIT:CONT OFF;").await?;
        self.transport.send("INIT:IMM;").await?;
        // *OPC? holds until the single capture finishes. Callers time this
        // call to calibrate the per-position measurement hold.
        if !self.opc_ready().await? {
            warn!("analyzer reported incomplete after immediate capture");
        }
        Ok(())
    }

    async fn marker_value(&mut self, marker: u32) -> Result<(f64, String)> {
        Self::check_marker(marker)?;
        let raw = self
            .transport
            .query(&format!("CALC:MARK{marker}:Y?;"))
            .await?;
        let value = raw
            .trim()
            .parse::<f64>()
            .map_err(|_| anyhow!("unparseable marker amplitude from analyzer: '{raw}'"))?;
        Ok((value, raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_numbers_outside_front_panel_range_rejected() {
        assert!(FieldFox::check_marker(0).is_err());
        assert!(FieldFox::check_marker(1).is_ok());
        assert!(FieldFox::check_marker(6).is_ok());
        assert!(FieldFox::check_marker(7).is_err());
    }
}
