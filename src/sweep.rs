//! Sweep controller.
//!
//! The stateful measurement loop. Per remaining position: wait for all
//! devices to report ready, move the turntable, hold a timed measurement
//! window with the RF source keyed on, read back the realized instrument
//! state, emit one data record, and advance the cursor. The loop is
//! single-threaded and blocking by design; cancellation is sampled only at
//! iteration boundaries, so a measurement hold is never cut short.
//!
//! Step sequence per position:
//!
//! ```text
//! Estimating -> Confirming -> [ Moving -> Measuring -> Recording ]* -> Completed
//!                                   ^ interrupt observed here -> Interrupted
//! ```
//!
//! The cursor advances only after Recording, so a failed move or measurement
//! never claims progress; a failed record *write* is tolerated (one lost
//! sample beats losing a multi-hour run) and still advances.

use crate::cancel::CancelToken;
use crate::config::Settings;
use crate::error::{AppResult, ChamberError};
use crate::grid::{PositionGrid, SweepCursor};
use crate::instrument::{Axis, Devices, TraceMode};
use crate::operator::Operator;
use crate::readiness::ReadinessGate;
use crate::sink::{MeasurementRecord, RecordSink};
use log::{error, info};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How many upcoming positions the confirmation preview shows.
const PREVIEW_POSITIONS: usize = 10;

/// Shakedown offset commanded before the first real position, to verify the
/// axes respond and to seat the gearing.
const SHAKEDOWN_POSITION: (f64, f64) = (0.9, -0.9);

/// How a sweep run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    /// Every position was measured.
    Completed { elapsed: Duration },
    /// The operator declined the pre-run confirmation.
    Declined,
    /// Cancellation was observed at a step boundary with positions left.
    Interrupted { elapsed: Duration },
}

/// Drives one sweep over a position grid.
pub struct SweepController {
    settings: Arc<Settings>,
    devices: Devices,
    sink: Box<dyn RecordSink>,
    operator: Arc<dyn Operator>,
    cancel: CancelToken,
    gate: ReadinessGate,
    /// Calibrated measurement hold; seeded from config until Estimating runs.
    measurement_time: Duration,
    /// Running average of observed move durations, in milliseconds.
    movement_average_ms: f64,
    completed_moves: u64,
}

/// Readback of one measurement, with the raw instrument response text kept
/// for the console line.
struct ReadBack {
    record: MeasurementRecord,
    azimuth_text: String,
    elevation_text: String,
    marker_text: String,
}

impl SweepController {
    pub fn new(
        settings: Arc<Settings>,
        devices: Devices,
        sink: Box<dyn RecordSink>,
        operator: Arc<dyn Operator>,
        cancel: CancelToken,
    ) -> Self {
        let timing = &settings.timing;
        let gate = ReadinessGate::new(Duration::from_millis(timing.readiness_poll_ms));
        let measurement_time = Duration::from_millis(timing.default_measurement_ms);
        let movement_average_ms = timing.default_movement_estimate_ms as f64;
        Self {
            settings,
            devices,
            sink,
            operator,
            cancel,
            gate,
            measurement_time,
            movement_average_ms,
            completed_moves: 0,
        }
    }

    /// Calibrated (or default) measurement hold duration.
    pub fn measurement_time(&self) -> Duration {
        self.measurement_time
    }

    /// Remaining-time estimate for `remaining` positions. Approximate by
    /// construction: the I/O overhead term is an empirical constant.
    pub fn remaining_estimate(&self, remaining: usize) -> Duration {
        let per_position_ms = self.measurement_time.as_millis() as u64
            + self.movement_average_ms as u64
            + self.settings.timing.fixed_io_overhead_ms;
        Duration::from_millis(remaining as u64 * per_position_ms)
    }

    /// Run the sweep from the cursor's current point to completion,
    /// interruption, or operator decline.
    pub async fn run(
        &mut self,
        grid: &PositionGrid,
        cursor: &mut SweepCursor,
    ) -> AppResult<SweepOutcome> {
        if grid.total() != cursor.total() {
            return Err(ChamberError::Configuration(format!(
                "cursor total {} does not match grid total {}",
                cursor.total(),
                grid.total()
            )));
        }

        self.estimate_measurement_time().await?;

        if !self.confirm_run(grid, cursor) {
            return Ok(SweepOutcome::Declined);
        }
        self.operator
            .notify("Data format is | timestamp, azimuth, elevation, frequency, powerTx, powerRx");

        // Shakedown: a small off-zero move, then the first remaining
        // position, before the measured loop begins.
        self.move_and_wait(SHAKEDOWN_POSITION.0, SHAKEDOWN_POSITION.1)
            .await?;
        if let Some(first) = grid.get(cursor.next()) {
            self.move_and_wait(first.azimuth, first.elevation).await?;
        }

        let run_started = Instant::now();
        let outcome = loop {
            if cursor.is_complete() {
                break SweepOutcome::Completed {
                    elapsed: run_started.elapsed(),
                };
            }
            if self.cancel.is_cancelled() {
                break SweepOutcome::Interrupted {
                    elapsed: run_started.elapsed(),
                };
            }

            if !self.await_devices_ready().await {
                break SweepOutcome::Interrupted {
                    elapsed: run_started.elapsed(),
                };
            }

            let target = grid[cursor.next()];

            // Moving
            let move_started = Instant::now();
            self.move_and_wait(target.azimuth, target.elevation).await?;
            let move_elapsed = move_started.elapsed();

            // Measuring: reset trace accumulation, then key the source for
            // exactly the measurement hold. Atomic; not cancellable.
            self.devices
                .analyzer
                .set_trace_mode(TraceMode::ClearRewrite)
                .await?;
            self.devices
                .analyzer
                .set_trace_mode(TraceMode::MaxHold)
                .await?;
            self.devices.signal_generator.set_output(true).await?;
            tokio::time::sleep(self.measurement_time).await;
            self.devices.signal_generator.set_output(false).await?;

            // Recording
            let read_back = self.read_back(cursor.next()).await?;
            self.record_move(move_elapsed);
            let remaining_after = cursor.remaining() - 1;
            let estimate = self.remaining_estimate(remaining_after);

            // Console first, in case file operations fail.
            self.operator.notify(&format!(
                "[{}/{}] {} min {} sec left | {},{},{},{},{},{}",
                cursor.next() + 1,
                cursor.total(),
                estimate.as_secs() / 60,
                estimate.as_secs() % 60,
                read_back.record.timestamp,
                read_back.azimuth_text,
                read_back.elevation_text,
                read_back.record.frequency_hz,
                read_back.record.power_dbm,
                read_back.marker_text,
            ));
            match self.sink.append(&read_back.record) {
                Ok(()) => self.operator.signal_success(),
                Err(err) => {
                    error!("Failed to write data record: {err:#}");
                    self.operator.signal_failure();
                }
            }

            cursor.advance();
        };

        match outcome {
            SweepOutcome::Completed { elapsed } | SweepOutcome::Interrupted { elapsed } => {
                self.operator.notify(&format!(
                    "Sweep run time: {} minutes {} seconds",
                    elapsed.as_secs() / 60,
                    elapsed.as_secs() % 60
                ));
            }
            SweepOutcome::Declined => {}
        }
        Ok(outcome)
    }

    /// Estimating: one real blocking capture calibrates the measurement
    /// hold, since analyzer sweep duration depends on the configured
    /// bandwidth and points and is not reliably knowable in advance.
    async fn estimate_measurement_time(&mut self) -> AppResult<()> {
        self.operator
            .notify("Estimating spectrum analyzer measurement time...");
        self.devices
            .analyzer
            .set_trace_mode(TraceMode::ClearRewrite)
            .await?;
        let started = Instant::now();
        self.devices.analyzer.trigger_immediate().await?;
        let observed = started.elapsed();
        // Restore normal operation.
        self.devices.analyzer.set_continuous(true).await?;
        self.devices
            .analyzer
            .set_trace_mode(TraceMode::MaxHold)
            .await?;

        let timing = &self.settings.timing;
        let scaled = observed * timing.desired_samples;
        let floor = Duration::from_millis(timing.min_measurement_ms);
        self.measurement_time = scaled.max(floor);
        info!(
            "measurement hold calibrated to {} ms ({} analyzer cycles of {} ms)",
            self.measurement_time.as_millis(),
            timing.desired_samples,
            observed.as_millis()
        );
        Ok(())
    }

    /// Confirming: preview the head of the grid and the time estimate, then
    /// ask. Returns `false` on an explicit decline.
    fn confirm_run(&self, grid: &PositionGrid, cursor: &SweepCursor) -> bool {
        self.operator.notify("Sweep mode current settings:");
        for position in grid.iter().take(PREVIEW_POSITIONS) {
            self.operator.notify(&format!(
                "{},{},{},{}",
                position.azimuth, position.elevation, position.frequency_hz, position.power_dbm
            ));
        }
        let resume_note = if cursor.next() != 0 {
            format!(" (starting at position {})", cursor.next() + 1)
        } else {
            String::new()
        };
        self.operator.notify(&format!(
            "Total positions: {}{}",
            cursor.total(),
            resume_note
        ));
        self.operator.notify(&format!(
            "Time of each measurement: {} seconds",
            self.measurement_time.as_secs()
        ));
        let estimate = self.remaining_estimate(cursor.remaining());
        self.operator.notify(&format!(
            "Time estimate: {} minutes {} seconds",
            estimate.as_secs() / 60,
            estimate.as_secs() % 60
        ));
        self.operator.signal_success();
        self.operator.confirm("Proceed with these values?")
    }

    /// Gate a step on all devices being ready, alerting the operator once
    /// per failed cycle. Returns `false` if cancelled while waiting.
    async fn await_devices_ready(&mut self) -> bool {
        let operator = self.operator.clone();
        let mut warned = false;
        self.gate
            .await_all(&mut self.devices, &self.cancel, |snapshot| {
                if !warned {
                    error!("Some instruments are not responding... ({snapshot})");
                    warned = true;
                }
                operator.signal_failure();
            })
            .await
    }

    /// Command both axes and poll until motion completes. Fire-and-forget
    /// command; completion is only observable through the readiness query.
    async fn move_and_wait(&mut self, azimuth: f64, elevation: f64) -> AppResult<()> {
        let poll = Duration::from_millis(self.settings.timing.movement_poll_ms);
        self.devices.turntable.move_to(azimuth, elevation).await?;
        loop {
            let azimuth_done = self.devices.turntable.axis_ready(Axis::Azimuth).await?;
            let elevation_done = self.devices.turntable.axis_ready(Axis::Elevation).await?;
            if azimuth_done && elevation_done {
                return Ok(());
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Query the realized state of every instrument for one record.
    async fn read_back(&mut self, index: usize) -> AppResult<ReadBack> {
        let timestamp = chrono::Utc::now().timestamp();
        let (azimuth, azimuth_text) = self
            .devices
            .turntable
            .current_position(Axis::Azimuth)
            .await?;
        let (elevation, elevation_text) = self
            .devices
            .turntable
            .current_position(Axis::Elevation)
            .await?;
        let frequency_hz = self.devices.signal_generator.current_frequency().await?;
        let power_dbm = self.devices.signal_generator.current_power().await?;
        let marker = self.settings.analyzer.marker;
        let (measured_power_dbm, marker_text) =
            self.devices.analyzer.marker_value(marker).await?;

        Ok(ReadBack {
            record: MeasurementRecord {
                timestamp,
                index,
                azimuth,
                elevation,
                frequency_hz,
                power_dbm,
                measured_power_dbm,
            },
            azimuth_text,
            elevation_text,
            marker_text,
        })
    }

    /// Fold one observed move duration into the running average:
    /// `avg' = avg + (sample - avg) / (n + 1)` with `n` the 1-based count of
    /// completed moves, so early noisy samples cannot dominate but the
    /// estimate still converges quickly.
    fn record_move(&mut self, elapsed: Duration) {
        let n = (self.completed_moves + 1) as f64;
        let sample_ms = elapsed.as_millis() as f64;
        self.movement_average_ms += (sample_ms - self.movement_average_ms) / (n + 1.0);
        self.completed_moves += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller_for_timing() -> SweepController {
        let settings = Arc::new(Settings::default());
        let devices = Devices {
            turntable: Box::new(crate::instrument::mock::MockTurntable::new()),
            signal_generator: Box::new(crate::instrument::mock::MockSignalGenerator::new()),
            analyzer: Box::new(crate::instrument::mock::MockAnalyzer::new()),
        };
        SweepController::new(
            settings,
            devices,
            Box::new(crate::instrument::mock::MockSink::new()),
            Arc::new(crate::instrument::mock::MockOperator::new()),
            CancelToken::new(),
        )
    }

    #[test]
    fn movement_average_converges() {
        let mut controller = controller_for_timing();
        // Seeded with the 4000 ms default estimate.
        assert_eq!(controller.movement_average_ms, 4000.0);
        controller.record_move(Duration::from_millis(2000));
        // 4000 + (2000 - 4000) / 2
        assert_eq!(controller.movement_average_ms, 3000.0);
        controller.record_move(Duration::from_millis(3000));
        // 3000 + (3000 - 3000) / 3
        assert_eq!(controller.movement_average_ms, 3000.0);
        assert_eq!(controller.completed_moves, 2);
    }

    #[test]
    fn remaining_estimate_counts_every_term() {
        let controller = controller_for_timing();
        // default measurement 10000 + movement 4000 + io 6000 = 20000 ms each
        assert_eq!(
            controller.remaining_estimate(3),
            Duration::from_millis(60_000)
        );
        assert_eq!(controller.remaining_estimate(0), Duration::ZERO);
    }
}
