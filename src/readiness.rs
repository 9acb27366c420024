//! Device readiness gate.
//!
//! All four instruments signal completion by polling, so the retry policy
//! lives here once instead of at every call site. The gate aggregates the
//! per-device "operation complete" queries into a snapshot and provides the
//! wait-until-all-ready wrapper the sweep loop uses before each step.
//!
//! Waiting retries indefinitely: a lab instrument that stops answering needs
//! a human, not an automatic abandonment. Only operator cancellation bounds
//! the wait.

use crate::cancel::CancelToken;
use crate::instrument::{Axis, Devices};
use log::warn;
use std::fmt;
use std::time::Duration;

/// Transient readiness snapshot, recomputed by polling before every state
/// transition that depends on hardware. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessSnapshot {
    pub spectrum_analyzer: bool,
    pub signal_generator: bool,
    pub turntable_azimuth: bool,
    pub turntable_elevation: bool,
}

impl ReadinessSnapshot {
    pub fn all_ready(&self) -> bool {
        self.spectrum_analyzer
            && self.signal_generator
            && self.turntable_azimuth
            && self.turntable_elevation
    }
}

impl fmt::Display for ReadinessSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = |ready: bool| if ready { "ready" } else { "NOT READY" };
        write!(
            f,
            "analyzer {}, signal generator {}, azimuth {}, elevation {}",
            mark(self.spectrum_analyzer),
            mark(self.signal_generator),
            mark(self.turntable_azimuth),
            mark(self.turntable_elevation)
        )
    }
}

/// Polls the devices' ready capabilities with a fixed interval between
/// cycles.
pub struct ReadinessGate {
    poll_interval: Duration,
}

impl ReadinessGate {
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    /// One poll cycle across all devices. A query error counts as not
    /// ready; the fault is logged and retried on the next cycle rather than
    /// aborting the sweep.
    pub async fn poll_all(&self, devices: &mut Devices) -> ReadinessSnapshot {
        let spectrum_analyzer = match devices.analyzer.is_ready().await {
            Ok(ready) => ready,
            Err(err) => {
                warn!("spectrum analyzer readiness poll failed: {err:#}");
                false
            }
        };
        let signal_generator = match devices.signal_generator.is_ready().await {
            Ok(ready) => ready,
            Err(err) => {
                warn!("signal generator readiness poll failed: {err:#}");
                false
            }
        };
        let turntable_azimuth = match devices.turntable.axis_ready(Axis::Azimuth).await {
            Ok(ready) => ready,
            Err(err) => {
                warn!("turntable azimuth readiness poll failed: {err:#}");
                false
            }
        };
        let turntable_elevation = match devices.turntable.axis_ready(Axis::Elevation).await {
            Ok(ready) => ready,
            Err(err) => {
                warn!("turntable elevation readiness poll failed: {err:#}");
                false
            }
        };

        ReadinessSnapshot {
            spectrum_analyzer,
            signal_generator,
            turntable_azimuth,
            turntable_elevation,
        }
    }

    /// Block until every device reports ready, invoking `on_not_ready` once
    /// per failed cycle and sleeping the poll interval between cycles.
    /// Returns `false` if cancellation was requested before the devices came
    /// back.
    pub async fn await_all(
        &self,
        devices: &mut Devices,
        cancel: &CancelToken,
        mut on_not_ready: impl FnMut(&ReadinessSnapshot) + Send,
    ) -> bool {
        loop {
            let snapshot = self.poll_all(devices).await;
            if snapshot.all_ready() {
                return true;
            }
            on_not_ready(&snapshot);
            if cancel.is_cancelled() {
                return false;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::mock::{MockAnalyzer, MockSignalGenerator, MockTurntable};

    fn mock_devices() -> Devices {
        Devices {
            turntable: Box::new(MockTurntable::new()),
            signal_generator: Box::new(MockSignalGenerator::new()),
            analyzer: Box::new(MockAnalyzer::new()),
        }
    }

    #[tokio::test]
    async fn snapshot_aggregates_with_logical_and() {
        let mut devices = mock_devices();
        let gate = ReadinessGate::new(Duration::from_millis(1));

        let snapshot = gate.poll_all(&mut devices).await;
        assert!(snapshot.all_ready());

        let turntable = MockTurntable::new();
        turntable.script_azimuth_readiness([false]);
        devices.turntable = Box::new(turntable);
        let snapshot = gate.poll_all(&mut devices).await;
        assert!(!snapshot.turntable_azimuth);
        assert!(snapshot.signal_generator);
        assert!(!snapshot.all_ready());
    }

    #[tokio::test]
    async fn await_all_retries_until_ready() {
        let mut devices = mock_devices();
        let turntable = MockTurntable::new();
        // Two failed cycles before the axis recovers.
        turntable.script_azimuth_readiness([false, false, true]);
        devices.turntable = Box::new(turntable);

        let gate = ReadinessGate::new(Duration::from_millis(1));
        let cancel = CancelToken::new();
        let mut alerts = 0;
        let ready = gate
            .await_all(&mut devices, &cancel, |_| alerts += 1)
            .await;
        assert!(ready);
        assert_eq!(alerts, 2);
    }

    #[tokio::test]
    async fn await_all_observes_cancellation() {
        let mut devices = mock_devices();
        let turntable = MockTurntable::new();
        turntable.script_azimuth_readiness_forever(false);
        devices.turntable = Box::new(turntable);

        let gate = ReadinessGate::new(Duration::from_millis(1));
        let cancel = CancelToken::new();
        cancel.cancel();
        let ready = gate.await_all(&mut devices, &cancel, |_| {}).await;
        assert!(!ready);
    }
}
