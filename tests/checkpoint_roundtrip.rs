//! Savestate file behavior against a real filesystem.

use chamber_sweep::checkpoint::{CheckpointStore, SaveOutcome};
use chamber_sweep::error::{ChamberError, CheckpointError};
use chamber_sweep::grid::{self, GridRequest, PositionGrid, SweepCursor};
use chamber_sweep::instrument::mock::MockOperator;

fn sample_grid() -> PositionGrid {
    grid::generate(&GridRequest {
        frequency_hz: 5_800_000_000,
        power_dbm: -10,
        azimuth_min: -90.0,
        azimuth_max: 90.0,
        elevation_min: -10.0,
        elevation_max: 10.0,
        azimuth_density: 45.0,
        elevation_density: 10.0,
    })
    .unwrap()
}

#[test]
fn round_trip_reproduces_every_field() {
    let dir = tempfile::tempdir().unwrap();
    let store = CheckpointStore::new(dir.path().join("savestate.dat"));
    let operator = MockOperator::new();

    let grid = sample_grid();
    let mut cursor = SweepCursor::new(grid.total());
    cursor.advance();
    cursor.advance();

    let outcome = store.save(&grid, &cursor, &operator).unwrap();
    assert_eq!(outcome, SaveOutcome::Written);

    let (loaded_grid, loaded_cursor) = store.load().unwrap().unwrap();
    assert_eq!(loaded_grid, grid);
    assert_eq!(loaded_cursor, cursor);
    // The 64-bit frequency survives without float formatting loss.
    assert_eq!(loaded_grid[0].frequency_hz, 5_800_000_000);
}

#[test]
fn missing_file_is_none_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let store = CheckpointStore::new(dir.path().join("absent.dat"));
    assert!(store.load().unwrap().is_none());
    // Clearing an absent savestate is also fine.
    store.clear().unwrap();
}

#[test]
fn declined_overwrite_leaves_the_file_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("savestate.dat");
    let store = CheckpointStore::new(&path);

    let grid = sample_grid();
    let cursor = SweepCursor::new(grid.total());
    let operator = MockOperator::new();
    store.save(&grid, &cursor, &operator).unwrap();
    let before = std::fs::read(&path).unwrap();

    // Second save with progress, but the operator declines the overwrite.
    let mut advanced = cursor;
    advanced.advance();
    let decliner = MockOperator::new();
    decliner.script_answers([false]);
    let outcome = store.save(&grid, &advanced, &decliner).unwrap();
    assert_eq!(outcome, SaveOutcome::Skipped);

    let after = std::fs::read(&path).unwrap();
    assert_eq!(before, after);
}

#[test]
fn clear_removes_the_savestate() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("savestate.dat");
    let store = CheckpointStore::new(&path);

    let grid = sample_grid();
    store
        .save(&grid, &SweepCursor::new(grid.total()), &MockOperator::new())
        .unwrap();
    assert!(path.exists());

    store.clear().unwrap();
    assert!(!path.exists());
    assert!(store.load().unwrap().is_none());
}

#[test]
fn corrupt_files_fail_loudly() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("savestate.dat");
    let store = CheckpointStore::new(&path);

    // Unsupported version.
    std::fs::write(&path, "9\n1730383623\n0\n1\n0,0,1000,0\n").unwrap();
    let err = store.load().unwrap_err();
    assert!(matches!(
        err,
        ChamberError::Checkpoint(CheckpointError::VersionMismatch { found: 9, .. })
    ));

    // Fewer records than the declared total.
    std::fs::write(&path, "1\n1730383623\n0\n2\n0,0,1000,0\n").unwrap();
    let err = store.load().unwrap_err();
    assert!(matches!(
        err,
        ChamberError::Checkpoint(CheckpointError::Truncated {
            expected: 2,
            found: 1
        })
    ));

    // A record with the wrong field count.
    std::fs::write(&path, "1\n1730383623\n0\n1\n0,0,1000\n").unwrap();
    let err = store.load().unwrap_err();
    assert!(matches!(
        err,
        ChamberError::Checkpoint(CheckpointError::Malformed { line: 5, .. })
    ));
}
