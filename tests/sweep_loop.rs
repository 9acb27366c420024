//! End-to-end sweep runs against scripted mock instruments.

use chamber_sweep::cancel::CancelToken;
use chamber_sweep::config::Settings;
use chamber_sweep::grid::{self, GridRequest, PositionGrid, SweepCursor};
use chamber_sweep::instrument::mock::{
    MockAnalyzer, MockOperator, MockSignalGenerator, MockSink, MockTurntable,
};
use chamber_sweep::instrument::Devices;
use chamber_sweep::sweep::{SweepController, SweepOutcome};
use std::sync::Arc;
use std::time::Duration;

/// Settings with millisecond-scale timing so a full mock sweep runs fast.
fn fast_settings() -> Arc<Settings> {
    let mut settings = Settings::default();
    settings.timing.min_measurement_ms = 5;
    settings.timing.default_measurement_ms = 5;
    settings.timing.default_movement_estimate_ms = 10;
    settings.timing.readiness_poll_ms = 1;
    settings.timing.movement_poll_ms = 1;
    Arc::new(settings)
}

fn five_position_grid() -> (PositionGrid, SweepCursor) {
    let grid = grid::generate(&GridRequest {
        frequency_hz: 2_400_000_000,
        power_dbm: 0,
        azimuth_min: -90.0,
        azimuth_max: 90.0,
        elevation_min: 0.0,
        elevation_max: 0.0,
        azimuth_density: 45.0,
        elevation_density: 1.0,
    })
    .unwrap();
    let cursor = SweepCursor::new(grid.total());
    (grid, cursor)
}

fn controller_with(
    turntable: MockTurntable,
    signal_generator: MockSignalGenerator,
    analyzer: MockAnalyzer,
    sink: MockSink,
    operator: Arc<MockOperator>,
    cancel: CancelToken,
) -> SweepController {
    let devices = Devices {
        turntable: Box::new(turntable),
        signal_generator: Box::new(signal_generator),
        analyzer: Box::new(analyzer),
    };
    SweepController::new(
        fast_settings(),
        devices,
        Box::new(sink),
        operator,
        cancel,
    )
}

#[tokio::test]
async fn full_sweep_records_every_position_in_order() {
    let turntable = MockTurntable::new();
    let turntable_log = turntable.commands();
    let sink = MockSink::new();
    let records = sink.records();
    let operator = Arc::new(MockOperator::new());

    let mut controller = controller_with(
        turntable,
        MockSignalGenerator::new(),
        MockAnalyzer::new(),
        sink,
        operator.clone(),
        CancelToken::new(),
    );

    let (grid, mut cursor) = five_position_grid();
    let outcome = controller.run(&grid, &mut cursor).await.unwrap();

    assert!(matches!(outcome, SweepOutcome::Completed { .. }));
    assert!(cursor.is_complete());

    let written = records.lock().unwrap();
    assert_eq!(written.len(), 5);
    let indices: Vec<usize> = written.iter().map(|r| r.index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    // One audible success cue per recorded point (plus the confirmation cue).
    assert!(operator.success_count() >= 5);

    // The shakedown move precedes the first grid position.
    let moves = turntable_log.lock().unwrap();
    assert_eq!(moves[0], "AZ:GOTO 0.90;EL:GOTO -0.90");
    assert_eq!(moves[1], "AZ:GOTO -90.00;EL:GOTO 0.00");
}

#[tokio::test]
async fn declined_confirmation_aborts_before_any_motion() {
    let turntable = MockTurntable::new();
    let turntable_log = turntable.commands();
    let sink = MockSink::new();
    let records = sink.records();
    let operator = Arc::new(MockOperator::new());
    operator.script_answers([false]);

    let mut controller = controller_with(
        turntable,
        MockSignalGenerator::new(),
        MockAnalyzer::new(),
        sink,
        operator.clone(),
        CancelToken::new(),
    );

    let (grid, mut cursor) = five_position_grid();
    let outcome = controller.run(&grid, &mut cursor).await.unwrap();

    assert_eq!(outcome, SweepOutcome::Declined);
    assert_eq!(cursor.next(), 0);
    assert!(records.lock().unwrap().is_empty());
    assert!(turntable_log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn one_failed_record_write_is_tolerated() {
    let sink = MockSink::new().fail_on_index(1);
    let records = sink.records();
    let operator = Arc::new(MockOperator::new());

    let mut controller = controller_with(
        MockTurntable::new(),
        MockSignalGenerator::new(),
        MockAnalyzer::new(),
        sink,
        operator.clone(),
        CancelToken::new(),
    );

    let (grid, mut cursor) = five_position_grid();
    let outcome = controller.run(&grid, &mut cursor).await.unwrap();

    // The sweep still completes; only the one record is lost.
    assert!(matches!(outcome, SweepOutcome::Completed { .. }));
    assert!(cursor.is_complete());
    let indices: Vec<usize> = records.lock().unwrap().iter().map(|r| r.index).collect();
    assert_eq!(indices, vec![0, 2, 3, 4]);
    assert!(operator.failure_count() >= 1);
}

#[tokio::test]
async fn measuring_fault_leaves_the_cursor_unchanged() {
    let signal_generator = MockSignalGenerator::new();
    signal_generator.fail_on("OUTPUT ON");
    let sink = MockSink::new();
    let records = sink.records();

    let mut controller = controller_with(
        MockTurntable::new(),
        signal_generator,
        MockAnalyzer::new(),
        sink,
        Arc::new(MockOperator::new()),
        CancelToken::new(),
    );

    let (grid, mut cursor) = five_position_grid();
    let result = controller.run(&grid, &mut cursor).await;

    assert!(result.is_err());
    assert_eq!(cursor.next(), 0);
    assert!(records.lock().unwrap().is_empty());
}

#[tokio::test]
async fn cancellation_interrupts_at_the_step_boundary() {
    let sink = MockSink::new();
    let records = sink.records();
    let cancel = CancelToken::new();
    cancel.cancel();

    let mut controller = controller_with(
        MockTurntable::new(),
        MockSignalGenerator::new(),
        MockAnalyzer::new(),
        sink,
        Arc::new(MockOperator::new()),
        cancel,
    );

    let (grid, mut cursor) = five_position_grid();
    let outcome = controller.run(&grid, &mut cursor).await.unwrap();

    assert!(matches!(outcome, SweepOutcome::Interrupted { .. }));
    assert_eq!(cursor.next(), 0);
    assert!(records.lock().unwrap().is_empty());
}

#[tokio::test]
async fn measurement_time_is_floored_at_the_configured_minimum() {
    // Analyzer captures are near-instant, so the calibrated hold falls back
    // to the configured floor.
    let mut controller = controller_with(
        MockTurntable::new(),
        MockSignalGenerator::new(),
        MockAnalyzer::new(),
        MockSink::new(),
        Arc::new(MockOperator::new()),
        CancelToken::new(),
    );

    let grid = PositionGrid::from_positions(Vec::new());
    let mut cursor = SweepCursor::new(0);
    controller.run(&grid, &mut cursor).await.unwrap();
    assert_eq!(controller.measurement_time(), Duration::from_millis(5));
}

#[tokio::test]
async fn measurement_time_scales_with_observed_capture_duration() {
    let analyzer = MockAnalyzer::new();
    analyzer.set_capture_time(Duration::from_millis(50));

    let mut controller = controller_with(
        MockTurntable::new(),
        MockSignalGenerator::new(),
        analyzer,
        MockSink::new(),
        Arc::new(MockOperator::new()),
        CancelToken::new(),
    );

    let grid = PositionGrid::from_positions(Vec::new());
    let mut cursor = SweepCursor::new(0);
    controller.run(&grid, &mut cursor).await.unwrap();
    // Three desired samples of a >= 50 ms capture.
    assert!(controller.measurement_time() >= Duration::from_millis(150));
}
