//! Mock instruments for tests.
//!
//! Each mock records the commands issued to it (in the wire syntax the real
//! driver would send) and can be scripted: readiness sequences, reported
//! values, injected failures. Handles to the command logs survive the mocks
//! being boxed into a [`Devices`](crate::instrument::Devices) set, so tests
//! can drive a whole sweep and then inspect the traffic.

use crate::instrument::{Axis, SignalGenerator, SoftLimits, SpectrumAnalyzer, TraceMode, Turntable};
use crate::operator::Operator;
use crate::sink::{MeasurementRecord, RecordSink};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Shared command log handle.
pub type CommandLog = Arc<Mutex<Vec<String>>>;

fn log_command(log: &CommandLog, command: impl Into<String>) {
    if let Ok(mut entries) = log.lock() {
        entries.push(command.into());
    }
}

#[derive(Debug, Default)]
struct ReadinessScript {
    queued: Mutex<VecDeque<bool>>,
    fallback: Mutex<bool>,
}

impl ReadinessScript {
    fn ready() -> Self {
        Self {
            queued: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(true),
        }
    }

    fn push(&self, values: impl IntoIterator<Item = bool>) {
        if let Ok(mut queued) = self.queued.lock() {
            queued.extend(values);
        }
    }

    fn set_fallback(&self, value: bool) {
        if let Ok(mut fallback) = self.fallback.lock() {
            *fallback = value;
        }
    }

    fn next(&self) -> bool {
        if let Ok(mut queued) = self.queued.lock() {
            if let Some(value) = queued.pop_front() {
                return value;
            }
        }
        self.fallback.lock().map(|v| *v).unwrap_or(true)
    }
}

fn should_fail(fail_list: &Mutex<Vec<String>>, command: &str) -> bool {
    fail_list
        .lock()
        .map(|patterns| patterns.iter().any(|p| command.contains(p.as_str())))
        .unwrap_or(false)
}

// ============================================================================
// Turntable
// ============================================================================

pub struct MockTurntable {
    commands: CommandLog,
    azimuth_ready: ReadinessScript,
    elevation_ready: ReadinessScript,
    limits: SoftLimits,
    target: Mutex<(f64, f64)>,
    fail_commands: Mutex<Vec<String>>,
}

impl Default for MockTurntable {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTurntable {
    pub fn new() -> Self {
        Self {
            commands: Arc::new(Mutex::new(Vec::new())),
            azimuth_ready: ReadinessScript::ready(),
            elevation_ready: ReadinessScript::ready(),
            limits: SoftLimits {
                azimuth_min: -180.0,
                azimuth_max: 180.0,
                elevation_min: -45.0,
                elevation_max: 45.0,
            },
            target: Mutex::new((0.0, 0.0)),
            fail_commands: Mutex::new(Vec::new()),
        }
    }

    pub fn with_limits(mut self, limits: SoftLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Handle to the command log; clone before boxing the mock.
    pub fn commands(&self) -> CommandLog {
        self.commands.clone()
    }

    /// Queue azimuth `*OPC?` answers; once exhausted the axis reports ready.
    pub fn script_azimuth_readiness(&self, values: impl IntoIterator<Item = bool>) {
        self.azimuth_ready.push(values);
    }

    /// Pin the azimuth readiness answer permanently.
    pub fn script_azimuth_readiness_forever(&self, value: bool) {
        self.azimuth_ready.set_fallback(value);
    }

    pub fn script_elevation_readiness(&self, values: impl IntoIterator<Item = bool>) {
        self.elevation_ready.push(values);
    }

    /// Make any command containing `pattern` fail.
    pub fn fail_on(&self, pattern: impl Into<String>) {
        if let Ok(mut patterns) = self.fail_commands.lock() {
            patterns.push(pattern.into());
        }
    }
}

#[async_trait]
impl Turntable for MockTurntable {
    async fn axis_ready(&mut self, axis: Axis) -> Result<bool> {
        Ok(match axis {
            Axis::Azimuth => self.azimuth_ready.next(),
            Axis::Elevation => self.elevation_ready.next(),
        })
    }

    async fn move_to(&mut self, azimuth: f64, elevation: f64) -> Result<()> {
        let command = format!("AZ:GOTO {azimuth:.2};EL:GOTO {elevation:.2}");
        log_command(&self.commands, &command);
        if should_fail(&self.fail_commands, &command) {
            return Err(anyhow!("injected turntable fault on '{command}'"));
        }
        if let Ok(mut target) = self.target.lock() {
            *target = (azimuth, elevation);
        }
        Ok(())
    }

    async fn current_position(&mut self, axis: Axis) -> Result<(f64, String)> {
        let (azimuth, elevation) = self.target.lock().map(|t| *t).unwrap_or((0.0, 0.0));
        let value = match axis {
            Axis::Azimuth => azimuth,
            Axis::Elevation => elevation,
        };
        Ok((value, format!("{value:.2}")))
    }

    async fn soft_limits(&mut self) -> Result<SoftLimits> {
        Ok(self.limits)
    }
}

// ============================================================================
// Signal generator
// ============================================================================

pub struct MockSignalGenerator {
    commands: CommandLog,
    ready: ReadinessScript,
    frequency_hz: Mutex<f64>,
    power_dbm: Mutex<f64>,
    fail_commands: Mutex<Vec<String>>,
}

impl Default for MockSignalGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSignalGenerator {
    pub fn new() -> Self {
        Self {
            commands: Arc::new(Mutex::new(Vec::new())),
            ready: ReadinessScript::ready(),
            frequency_hz: Mutex::new(2.4e9),
            power_dbm: Mutex::new(0.0),
            fail_commands: Mutex::new(Vec::new()),
        }
    }

    pub fn commands(&self) -> CommandLog {
        self.commands.clone()
    }

    pub fn script_readiness(&self, values: impl IntoIterator<Item = bool>) {
        self.ready.push(values);
    }

    pub fn fail_on(&self, pattern: impl Into<String>) {
        if let Ok(mut patterns) = self.fail_commands.lock() {
            patterns.push(pattern.into());
        }
    }

    fn issue(&self, command: String) -> Result<()> {
        log_command(&self.commands, &command);
        if should_fail(&self.fail_commands, &command) {
            return Err(anyhow!("injected signal generator fault on '{command}'"));
        }
        Ok(())
    }
}

#[async_trait]
impl SignalGenerator for MockSignalGenerator {
    async fn is_ready(&mut self) -> Result<bool> {
        Ok(self.ready.next())
    }

    async fn set_frequency(&mut self, hz: f64, exponent: i32) -> Result<()> {
        self.issue(format!("FREQ {hz}E{exponent}Hz"))?;
        if let Ok(mut frequency) = self.frequency_hz.lock() {
            *frequency = hz * 10f64.powi(exponent);
        }
        Ok(())
    }

    async fn set_power(&mut self, dbm: f64) -> Result<()> {
        self.issue(format!("POW {dbm}dBm"))?;
        if let Ok(mut power) = self.power_dbm.lock() {
            *power = dbm;
        }
        Ok(())
    }

    async fn set_modulation(&mut self, on: bool) -> Result<()> {
        self.issue(format!("OUTP:MOD {}", if on { "ON" } else { "OFF" }))
    }

    async fn set_output(&mut self, on: bool) -> Result<()> {
        self.issue(format!("OUTPUT {}", if on { "ON" } else { "OFF" }))
    }

    async fn current_frequency(&mut self) -> Result<f64> {
        Ok(self.frequency_hz.lock().map(|f| *f).unwrap_or(0.0))
    }

    async fn current_power(&mut self) -> Result<f64> {
        Ok(self.power_dbm.lock().map(|p| *p).unwrap_or(0.0))
    }
}

// ============================================================================
// Spectrum analyzer
// ============================================================================

pub struct MockAnalyzer {
    commands: CommandLog,
    ready: ReadinessScript,
    /// Simulated sweep duration for `trigger_immediate`.
    capture_time: Mutex<Duration>,
    marker_values: Mutex<VecDeque<f64>>,
    fail_commands: Mutex<Vec<String>>,
}

impl Default for MockAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAnalyzer {
    pub fn new() -> Self {
        Self {
            commands: Arc::new(Mutex::new(Vec::new())),
            ready: ReadinessScript::ready(),
            capture_time: Mutex::new(Duration::ZERO),
            marker_values: Mutex::new(VecDeque::new()),
            fail_commands: Mutex::new(Vec::new()),
        }
    }

    pub fn commands(&self) -> CommandLog {
        self.commands.clone()
    }

    pub fn script_readiness(&self, values: impl IntoIterator<Item = bool>) {
        self.ready.push(values);
    }

    /// Simulated blocking-capture duration (drives measurement-time
    /// calibration in tests).
    pub fn set_capture_time(&self, duration: Duration) {
        if let Ok(mut capture) = self.capture_time.lock() {
            *capture = duration;
        }
    }

    /// Queue marker readings; once exhausted a fixed floor value is
    /// reported.
    pub fn script_marker_values(&self, values: impl IntoIterator<Item = f64>) {
        if let Ok(mut queued) = self.marker_values.lock() {
            queued.extend(values);
        }
    }

    pub fn fail_on(&self, pattern: impl Into<String>) {
        if let Ok(mut patterns) = self.fail_commands.lock() {
            patterns.push(pattern.into());
        }
    }

    fn issue(&self, command: String) -> Result<()> {
        log_command(&self.commands, &command);
        if should_fail(&self.fail_commands, &command) {
            return Err(anyhow!("injected analyzer fault on '{command}'"));
        }
        Ok(())
    }
}

#[async_trait]
impl SpectrumAnalyzer for MockAnalyzer {
    async fn is_ready(&mut self) -> Result<bool> {
        Ok(self.ready.next())
    }

    async fn preset(&mut self) -> Result<()> {
        self.issue("SYST:PRES".to_string())
    }

    async fn set_mode(&mut self, mode: &str) -> Result<()> {
        self.issue(format!("INST:SEL '{mode}'"))
    }

    async fn set_range_start(&mut self, hz: f64, exponent: i32) -> Result<()> {
        self.issue(format!("SENS:FREQ:START {hz}E{exponent}Hz"))
    }

    async fn set_range_stop(&mut self, hz: f64, exponent: i32) -> Result<()> {
        self.issue(format!("SENS:FREQ:STOP {hz}E{exponent}Hz"))
    }

    async fn set_resolution_bandwidth(&mut self, hz: f64, exponent: i32) -> Result<()> {
        self.issue(format!("SENS:BAND:RES {hz}E{exponent}Hz"))
    }

    async fn set_video_bandwidth(&mut self, hz: f64, exponent: i32) -> Result<()> {
        self.issue(format!("SENS:BAND:VID {hz}E{exponent}Hz"))
    }

    async fn set_sweep_points(&mut self, points: u32) -> Result<()> {
        self.issue(format!("SENS:SWEEP:POINTS {points}"))
    }

    async fn set_marker(&mut self, marker: u32, hz: f64, exponent: i32) -> Result<()> {
        self.issue(format!("CALC:MARK{marker} NORM"))?;
        self.issue(format!("CALC:MARK{marker}:X {hz}E{exponent}"))
    }

    async fn set_trace_mode(&mut self, mode: TraceMode) -> Result<()> {
        match mode {
            TraceMode::ClearRewrite => self.issue("TRAC:TYPE CLRW".to_string()),
            TraceMode::MaxHold => self.issue("TRAC:TYPE MAXH".to_string()),
        }
    }

    async fn set_continuous(&mut self, on: bool) -> Result<()> {
        self.issue(format!("INIT:CONT {}", if on { "ON" } else { "OFF" }))
    }

    async fn trigger_immediate(&mut self) -> Result<()> {
        self.issue("INIT:IMM".to_string())?;
        let capture = self.capture_time.lock().map(|c| *c).unwrap_or_default();
        if !capture.is_zero() {
            tokio::time::sleep(capture).await;
        }
        Ok(())
    }

    async fn marker_value(&mut self, marker: u32) -> Result<(f64, String)> {
        self.issue(format!("CALC:MARK{marker}:Y?"))?;
        let value = self
            .marker_values
            .lock()
            .ok()
            .and_then(|mut queued| queued.pop_front())
            .unwrap_or(-60.0);
        Ok((value, format!("{value:.3}")))
    }
}

// ============================================================================
// Operator and sink
// ============================================================================

/// Scriptable operator: queued confirmation answers (default yes), with all
/// prompts and notifications retained for inspection.
pub struct MockOperator {
    answers: Mutex<VecDeque<bool>>,
    prompts: Mutex<Vec<String>>,
    notifications: Mutex<Vec<String>>,
    successes: AtomicUsize,
    failures: AtomicUsize,
}

impl Default for MockOperator {
    fn default() -> Self {
        Self::new()
    }
}

impl MockOperator {
    pub fn new() -> Self {
        Self {
            answers: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
            notifications: Mutex::new(Vec::new()),
            successes: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        }
    }

    pub fn script_answers(&self, answers: impl IntoIterator<Item = bool>) {
        if let Ok(mut queued) = self.answers.lock() {
            queued.extend(answers);
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn notifications(&self) -> Vec<String> {
        self.notifications
            .lock()
            .map(|n| n.clone())
            .unwrap_or_default()
    }

    pub fn success_count(&self) -> usize {
        self.successes.load(Ordering::Relaxed)
    }

    pub fn failure_count(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }
}

impl Operator for MockOperator {
    fn confirm(&self, prompt: &str) -> bool {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        self.answers
            .lock()
            .ok()
            .and_then(|mut queued| queued.pop_front())
            .unwrap_or(true)
    }

    fn notify(&self, message: &str) {
        if let Ok(mut notifications) = self.notifications.lock() {
            notifications.push(message.to_string());
        }
    }

    fn signal_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    fn signal_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }
}

/// In-memory record sink with optional single-record failure injection.
pub struct MockSink {
    records: Arc<Mutex<Vec<MeasurementRecord>>>,
    fail_on_index: Option<usize>,
}

impl Default for MockSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSink {
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(Vec::new())),
            fail_on_index: None,
        }
    }

    /// Fail the append for the record with this cursor index.
    pub fn fail_on_index(mut self, index: usize) -> Self {
        self.fail_on_index = Some(index);
        self
    }

    pub fn records(&self) -> Arc<Mutex<Vec<MeasurementRecord>>> {
        self.records.clone()
    }
}

impl RecordSink for MockSink {
    fn append(&mut self, record: &MeasurementRecord) -> Result<()> {
        if self.fail_on_index == Some(record.index) {
            return Err(anyhow!("injected sink failure at index {}", record.index));
        }
        if let Ok(mut records) = self.records.lock() {
            records.push(record.clone());
        }
        Ok(())
    }
}
