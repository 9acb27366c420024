//! Measurement record sink.
//!
//! One line per completed measurement step, appended as it happens so a
//! crash mid-sweep loses at most the record in flight. Destination defaults
//! to `chamber-data.csv` and is configurable.

use anyhow::{Context, Result};
use log::info;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

/// One recorded measurement: commanded cursor index plus the realized
/// instrument readings.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementRecord {
    /// Seconds since the Unix epoch at the moment of readback.
    pub timestamp: i64,
    /// Cursor index of the position this record belongs to.
    pub index: usize,
    /// Realized turntable azimuth in degrees.
    pub azimuth: f64,
    /// Realized turntable elevation in degrees.
    pub elevation: f64,
    /// Realized transmit frequency in Hz.
    pub frequency_hz: f64,
    /// Realized transmit power in dBm.
    pub power_dbm: f64,
    /// Analyzer marker amplitude in dBm.
    pub measured_power_dbm: f64,
}

/// Append-only record destination.
pub trait RecordSink: Send {
    fn append(&mut self, record: &MeasurementRecord) -> Result<()>;
}

/// CSV file sink. A header row is written when the file is created; an
/// existing file is appended to, so a resumed sweep continues the same data
/// file.
pub struct CsvSink {
    path: PathBuf,
    writer: csv::Writer<std::fs::File>,
}

impl CsvSink {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let is_new = !path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open data file at {}", path.display()))?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if is_new {
            writer
                .write_record([
                    "timestamp",
                    "index",
                    "azimuth",
                    "elevation",
                    "frequency_hz",
                    "power_dbm",
                    "measured_power_dbm",
                ])
                .context("failed to write data file header")?;
            writer.flush().context("failed to flush data file header")?;
        }
        info!("data sink open at '{}'", path.display());
        Ok(Self { path, writer })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordSink for CsvSink {
    fn append(&mut self, record: &MeasurementRecord) -> Result<()> {
        self.writer
            .write_record(&[
                record.timestamp.to_string(),
                record.index.to_string(),
                record.azimuth.to_string(),
                record.elevation.to_string(),
                record.frequency_hz.to_string(),
                record.power_dbm.to_string(),
                record.measured_power_dbm.to_string(),
            ])
            .context("failed to write data record")?;
        // Flush per record: a multi-hour sweep must not buffer results.
        self.writer.flush().context("failed to flush data record")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(index: usize) -> MeasurementRecord {
        MeasurementRecord {
            timestamp: 1_730_383_623,
            index,
            azimuth: -45.0,
            elevation: 0.0,
            frequency_hz: 2.4e9,
            power_dbm: 0.0,
            measured_power_dbm: -61.25,
        }
    }

    #[test]
    fn writes_header_then_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.csv");

        {
            let mut sink = CsvSink::open(&path).unwrap();
            sink.append(&record(0)).unwrap();
        }
        // Reopen: no second header, records accumulate.
        {
            let mut sink = CsvSink::open(&path).unwrap();
            sink.append(&record(1)).unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("timestamp,index,"));
        assert!(lines[1].starts_with("1730383623,0,"));
        assert!(lines[2].starts_with("1730383623,1,"));
    }
}
