//! Savestate (checkpoint) persistence.
//!
//! A savestate is the persisted image of a sweep: format version, creation
//! timestamp, the resume cursor, and the full position table. The format is
//! line-oriented and version-tagged, readable only by the version that wrote
//! it:
//!
//! ```text
//! 1                    <- format version
//! 1730383623           <- creation timestamp (informational)
//! 2                    <- next cursor index
//! 5                    <- total positions
//! -90,0,2400000000,0   <- azimuth,elevation,frequency_hz,power_dbm  (x total)
//! ...
//! ```
//!
//! The record count must equal `total` exactly; any mismatch is corruption,
//! never a silent truncation. Frequency is written as the integer it is, so
//! round-trips lose nothing to float formatting.

use crate::error::{CheckpointError, ChamberError};
use crate::grid::{Position, PositionGrid, SweepCursor};
use crate::operator::Operator;
use log::{debug, info};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Savestate format version this build reads and writes.
pub const SAVE_FORMAT_VERSION: u32 = 1;

/// Whether a save request actually wrote the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Written,
    /// The operator declined to overwrite an existing savestate.
    Skipped,
}

/// Owns the savestate path and the on-disk format.
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist the grid and cursor. If a savestate already exists the
    /// operator is asked before overwriting; declining leaves the prior
    /// file untouched.
    pub fn save(
        &self,
        grid: &PositionGrid,
        cursor: &SweepCursor,
        operator: &dyn Operator,
    ) -> Result<SaveOutcome, ChamberError> {
        if self.path.exists()
            && !operator.confirm("Should the existing savestate file be overwritten?")
        {
            info!("program state will not be saved");
            return Ok(SaveOutcome::Skipped);
        }
        self.write(grid, cursor)?;
        Ok(SaveOutcome::Written)
    }

    fn write(&self, grid: &PositionGrid, cursor: &SweepCursor) -> Result<(), ChamberError> {
        let mut contents = String::new();
        // Infallible: writing to a String cannot fail.
        let _ = writeln!(contents, "{SAVE_FORMAT_VERSION}");
        let _ = writeln!(contents, "{}", chrono::Utc::now().timestamp());
        let _ = writeln!(contents, "{}", cursor.next());
        let _ = writeln!(contents, "{}", cursor.total());
        for position in grid {
            let _ = writeln!(
                contents,
                "{},{},{},{}",
                position.azimuth, position.elevation, position.frequency_hz, position.power_dbm
            );
        }
        std::fs::write(&self.path, contents)?;
        debug!("savestate written to {}", self.path.display());
        Ok(())
    }

    /// Load a savestate if one exists. `Ok(None)` means no file; a present
    /// but unreadable file is always an error, never a partial result.
    pub fn load(&self) -> Result<Option<(PositionGrid, SweepCursor)>, ChamberError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let (grid, cursor) = parse_savestate(&contents)?;
        info!(
            "savestate loaded from {} ({}/{} positions done)",
            self.path.display(),
            cursor.next(),
            cursor.total()
        );
        Ok(Some((grid, cursor)))
    }

    /// Remove the savestate file if present. Called after a fully completed
    /// sweep so no stale resume point is left behind.
    pub fn clear(&self) -> Result<(), ChamberError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("savestate {} removed", self.path.display());
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

fn header_line<'a>(
    lines: &mut impl Iterator<Item = &'a str>,
    line_number: usize,
    what: &str,
) -> Result<&'a str, CheckpointError> {
    lines.next().ok_or_else(|| CheckpointError::Malformed {
        line: line_number,
        reason: format!("missing {what} line"),
    })
}

fn parse_savestate(contents: &str) -> Result<(PositionGrid, SweepCursor), CheckpointError> {
    let mut lines = contents.lines();

    let version_line = header_line(&mut lines, 1, "version")?;
    let version: u32 = version_line
        .trim()
        .parse()
        .map_err(|_| CheckpointError::Malformed {
            line: 1,
            reason: format!("version is not an integer: '{version_line}'"),
        })?;
    if version != SAVE_FORMAT_VERSION {
        return Err(CheckpointError::VersionMismatch {
            found: version,
            expected: SAVE_FORMAT_VERSION,
        });
    }

    // Timestamp is informational only; its presence is required but its
    // value is not validated.
    let _timestamp = header_line(&mut lines, 2, "timestamp")?;

    let next_line = header_line(&mut lines, 3, "next-index")?;
    let next: usize = next_line
        .trim()
        .parse()
        .map_err(|_| CheckpointError::Malformed {
            line: 3,
            reason: format!("next index is not an integer: '{next_line}'"),
        })?;

    let total_line = header_line(&mut lines, 4, "total-count")?;
    let total: usize = total_line
        .trim()
        .parse()
        .map_err(|_| CheckpointError::Malformed {
            line: 4,
            reason: format!("total count is not an integer: '{total_line}'"),
        })?;

    if next > total {
        return Err(CheckpointError::Malformed {
            line: 3,
            reason: format!("next index {next} exceeds total {total}"),
        });
    }

    let mut positions = Vec::with_capacity(total);
    for (offset, line) in lines.enumerate() {
        let line_number = offset + 5;
        if positions.len() == total {
            if line.trim().is_empty() {
                continue;
            }
            return Err(CheckpointError::Malformed {
                line: line_number,
                reason: "more position records than the declared total".to_string(),
            });
        }
        positions.push(parse_record(line, line_number)?);
    }

    if positions.len() != total {
        return Err(CheckpointError::Truncated {
            expected: total,
            found: positions.len(),
        });
    }

    let cursor = SweepCursor::resumed(total, next).map_err(|_| CheckpointError::Malformed {
        line: 3,
        reason: format!("next index {next} exceeds total {total}"),
    })?;
    Ok((PositionGrid::from_positions(positions), cursor))
}

fn parse_record(line: &str, line_number: usize) -> Result<Position, CheckpointError> {
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() != 4 {
        return Err(CheckpointError::Malformed {
            line: line_number,
            reason: format!("expected 4 comma-separated fields, found {}", fields.len()),
        });
    }

    let malformed = |what: &str, value: &str| CheckpointError::Malformed {
        line: line_number,
        reason: format!("{what} is not numeric: '{value}'"),
    };

    Ok(Position {
        azimuth: fields[0]
            .trim()
            .parse()
            .map_err(|_| malformed("azimuth", fields[0]))?,
        elevation: fields[1]
            .trim()
            .parse()
            .map_err(|_| malformed("elevation", fields[1]))?,
        frequency_hz: fields[2]
            .trim()
            .parse()
            .map_err(|_| malformed("frequency", fields[2]))?,
        power_dbm: fields[3]
            .trim()
            .parse()
            .map_err(|_| malformed("power", fields[3]))?,
    })
}
