//! Application wiring: CLI, startup validation, device bring-up, and the
//! sweep lifecycle around the controller.
//!
//! The flow is linear: parse arguments, probe for a savestate, build the
//! position grid (generated from arguments or loaded from the savestate),
//! connect the instruments, program them for the target frequency unless the
//! operator asked for manual settings, run the sweep, and finally either
//! clear the savestate (completed) or write one (interrupted or failed).

use crate::cancel::CancelToken;
use crate::checkpoint::{CheckpointStore, SaveOutcome};
use crate::config::{Settings, SignalGeneratorLimits};
use crate::error::{AppResult, ChamberError};
use crate::grid::{self, GridRequest, PositionGrid, SweepCursor};
use crate::instrument::fieldfox::FieldFox;
use crate::instrument::scpi::ScpiTcpTransport;
use crate::instrument::visa::{GpibSignalGenerator, GpibTurntable, VisaChannel};
use crate::instrument::{Devices, TraceMode};
use crate::operator::{ConsoleOperator, Operator};
use crate::sink::CsvSink;
use crate::sweep::{SweepController, SweepOutcome};
use clap::{CommandFactory, Parser};
use log::{info, warn};
use std::process::ExitCode;
use std::sync::Arc;

/// Frequencies at or above 1 THz are outside anything the chamber hardware
/// can produce and are rejected up front.
const MAX_FREQUENCY_HZ: i64 = 1_000_000_000_000;

#[derive(Parser, Debug)]
#[command(
    name = "chamber-sweep",
    version,
    about = "Antenna-pattern measurement sweeps in the anechoic chamber"
)]
pub struct Cli {
    /// Transmit frequency in Hz (required for --sweep)
    #[arg(short = 'f', long = "freq")]
    pub frequency_hz: Option<i64>,

    /// Transmit power in dBm
    #[arg(short = 'p', long = "power", default_value_t = 0)]
    pub power_dbm: i32,

    /// Data output file (defaults to the configured path)
    #[arg(short = 'o', long = "output")]
    pub output: Option<String>,

    /// Resume from the savestate file
    #[arg(short = 'r', long = "resume")]
    pub resume: bool,

    /// Sweep mode: azimuth and elevation ranges in degrees
    #[arg(
        short = 's',
        long = "sweep",
        num_args = 4,
        allow_negative_numbers = true,
        value_names = ["AZI_MIN", "AZI_MAX", "ELE_MIN", "ELE_MAX"]
    )]
    pub sweep: Option<Vec<f64>>,

    /// Azimuth sample density in degrees
    #[arg(long = "azi-density")]
    pub azimuth_density: Option<f64>,

    /// Elevation sample density in degrees
    #[arg(long = "ele-density")]
    pub elevation_density: Option<f64>,

    /// Keep the analyzer and signal generator on their current (manually
    /// set) configuration
    #[arg(short = 'm', long = "manual")]
    pub manual: bool,

    /// Verbose logging
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Configuration name (reads config/<NAME>.toml)
    #[arg(short = 'c', long = "config")]
    pub config: Option<String>,
}

/// Reject frequencies the hardware cannot produce.
pub fn validate_frequency(frequency_hz: i64) -> AppResult<()> {
    if (0..MAX_FREQUENCY_HZ).contains(&frequency_hz) {
        Ok(())
    } else {
        Err(ChamberError::Configuration(
            "frequency must be positive and below the THz range".to_string(),
        ))
    }
}

/// Reject powers outside what the signal generator supports.
pub fn validate_power(power_dbm: i32, limits: &SignalGeneratorLimits) -> AppResult<()> {
    let power = f64::from(power_dbm);
    if power < limits.min_power_dbm || power > limits.max_power_dbm {
        return Err(ChamberError::Configuration(format!(
            "power {power_dbm} dBm is outside the signal generator range [{}, {}]",
            limits.min_power_dbm, limits.max_power_dbm
        )));
    }
    Ok(())
}

/// Analyzer frequency window: the target plus/minus the configured scale,
/// shifted up if the lower edge would dip below zero.
pub fn analyzer_window(frequency_hz: i64, range_scale_hz: i64) -> (i64, i64) {
    let mut start = frequency_hz - range_scale_hz;
    let mut stop = frequency_hz + range_scale_hz;
    if start < 0 {
        stop -= start;
        start = 0;
    }
    (start, stop)
}

/// Program the signal generator and analyzer for the sweep target. Skipped
/// entirely when the operator passed `--manual`.
pub async fn program_instruments(
    devices: &mut Devices,
    settings: &Settings,
    frequency_hz: i64,
    power_dbm: i32,
) -> AppResult<()> {
    devices
        .signal_generator
        .set_frequency(frequency_hz as f64, 0)
        .await?;
    devices
        .signal_generator
        .set_power(f64::from(power_dbm))
        .await?;
    devices.signal_generator.set_modulation(false).await?;
    devices.signal_generator.set_output(false).await?;

    let (start, stop) = analyzer_window(frequency_hz, settings.analyzer.range_scale_hz);
    devices.analyzer.preset().await?;
    devices.analyzer.set_mode("SA").await?;
    devices.analyzer.set_range_start(start as f64, 0).await?;
    devices.analyzer.set_range_stop(stop as f64, 0).await?;
    devices
        .analyzer
        .set_resolution_bandwidth(settings.analyzer.resolution_bandwidth_hz as f64, 0)
        .await?;
    devices
        .analyzer
        .set_video_bandwidth(settings.analyzer.video_bandwidth_hz as f64, 0)
        .await?;
    devices
        .analyzer
        .set_sweep_points(settings.analyzer.sweep_points)
        .await?;
    devices
        .analyzer
        .set_marker(settings.analyzer.marker, frequency_hz as f64, 0)
        .await?;
    devices.analyzer.set_trace_mode(TraceMode::MaxHold).await?;
    info!(
        "instruments programmed for {frequency_hz} Hz at {power_dbm} dBm (analyzer window {start}..{stop} Hz)"
    );
    Ok(())
}

/// Program the instruments for the sweep target, or leave their current
/// front-panel configuration alone when the operator passed `--manual`.
pub async fn apply_instrument_setup(
    devices: &mut Devices,
    settings: &Settings,
    manual: bool,
    frequency_hz: i64,
    power_dbm: i32,
    operator: &dyn Operator,
) -> AppResult<()> {
    if manual {
        operator
            .notify("Manual settings on the spectrum analyzer and signal generator will be used.");
        return Ok(());
    }
    program_instruments(devices, settings, frequency_hz, power_dbm).await
}

async fn connect_devices(settings: &Settings) -> AppResult<Devices> {
    let instruments = &settings.instruments;

    let mut turntable = GpibTurntable::new(
        VisaChannel::new(&instruments.turntable_azimuth_resource),
        VisaChannel::new(&instruments.turntable_elevation_resource),
    );
    turntable
        .connect()
        .await
        .map_err(|err| ChamberError::DeviceInit(format!("turntable: {err:#}")))?;

    let mut signal_generator =
        GpibSignalGenerator::new(VisaChannel::new(&instruments.signal_generator_resource));
    signal_generator
        .connect()
        .await
        .map_err(|err| ChamberError::DeviceInit(format!("signal generator: {err:#}")))?;

    let mut analyzer = FieldFox::new(ScpiTcpTransport::new(&instruments.analyzer_addr));
    analyzer
        .connect()
        .await
        .map_err(|err| ChamberError::DeviceInit(format!("spectrum analyzer: {err:#}")))?;

    Ok(Devices {
        turntable: Box::new(turntable),
        signal_generator: Box::new(signal_generator),
        analyzer: Box::new(analyzer),
    })
}

/// Offer a savestate so a defined grid is not lost to a failure or an early
/// exit. Never fatal; a refused or failed save is reported and the original
/// error keeps precedence.
fn offer_savestate(
    store: &CheckpointStore,
    grid: &PositionGrid,
    cursor: &SweepCursor,
    operator: &dyn Operator,
) {
    if !operator.confirm("Would you like to savestate the current settings, for later?") {
        operator.notify("Savestate will not be created.");
        return;
    }
    match store.save(grid, cursor, operator) {
        Ok(_) => operator.notify("Savestate created."),
        Err(err) => warn!("failed to write savestate: {err}"),
    }
}

/// Save an interrupted sweep's progress and report what actually happened:
/// the operator may decline overwriting an existing savestate, in which case
/// no file was written and the report must say so.
fn save_interrupted_progress(
    store: &CheckpointStore,
    grid: &PositionGrid,
    cursor: &SweepCursor,
    operator: &dyn Operator,
) -> AppResult<()> {
    let progress = format!("Progress was [{}/{}]", cursor.next(), cursor.total());
    match store.save(grid, cursor, operator)? {
        SaveOutcome::Written => operator.notify(&format!("Save state file created. {progress}")),
        SaveOutcome::Skipped => {
            operator.notify(&format!("Savestate was not written. {progress}"))
        }
    }
    Ok(())
}

fn build_grid_request(cli: &Cli, settings: &Settings, ranges: &[f64]) -> AppResult<GridRequest> {
    let frequency_hz = cli.frequency_hz.ok_or_else(|| {
        ChamberError::Configuration("sweep mode requires a target frequency (--freq)".to_string())
    })?;
    validate_frequency(frequency_hz)?;
    validate_power(cli.power_dbm, &settings.signal_generator)?;

    Ok(GridRequest {
        frequency_hz,
        power_dbm: cli.power_dbm,
        azimuth_min: ranges[0],
        azimuth_max: ranges[1],
        elevation_min: ranges[2],
        elevation_max: ranges[3],
        azimuth_density: cli.azimuth_density.unwrap_or(settings.sweep.azimuth_density),
        elevation_density: cli
            .elevation_density
            .unwrap_or(settings.sweep.elevation_density),
    })
}

/// Full program flow for one invocation. Returns the process exit code.
pub async fn run(cli: Cli, settings: Arc<Settings>, cancel: CancelToken) -> AppResult<ExitCode> {
    if !cli.resume && cli.sweep.is_none() {
        Cli::command().print_help().map_err(ChamberError::Io)?;
        println!();
        return Ok(ExitCode::SUCCESS);
    }

    let operator: Arc<dyn Operator> = Arc::new(ConsoleOperator::new());
    let store = CheckpointStore::new(&settings.storage.savestate_path);

    // Probe the savestate before committing to anything.
    let saved = match store.load() {
        Ok(saved) => saved,
        Err(err) if cli.resume => return Err(err),
        Err(err) => {
            warn!("ignoring unreadable savestate: {err}");
            None
        }
    };
    if saved.is_some() {
        operator.notify("Save state file was detected.");
    }

    let (grid, mut cursor) = if let Some(ranges) = &cli.sweep {
        if saved.is_some()
            && !operator.confirm(
                "Proceed with command line values, rather than the savestate? \
                 The current savestate may be overwritten.",
            )
        {
            return Err(ChamberError::Aborted);
        }
        let request = build_grid_request(&cli, &settings, ranges)?;
        let grid = grid::generate(&request)?;
        let cursor = SweepCursor::new(grid.total());
        (grid, cursor)
    } else {
        saved.ok_or_else(|| {
            ChamberError::Configuration("no savestate file to resume from".to_string())
        })?
    };

    let mut devices = match connect_devices(&settings).await {
        Ok(devices) => devices,
        Err(err) => {
            operator.notify("Failed to connect to some devices.");
            offer_savestate(&store, &grid, &cursor, operator.as_ref());
            return Err(err);
        }
    };

    let limits = devices.turntable.soft_limits().await?;
    grid.check_limits(&limits, settings.sweep.limit_policy)?;

    // Every position shares one frequency/power, so the first position
    // carries the target even on a resumed run.
    if let Some(first) = grid.get(0) {
        apply_instrument_setup(
            &mut devices,
            &settings,
            cli.manual,
            first.frequency_hz,
            first.power_dbm,
            operator.as_ref(),
        )
        .await?;
    }

    let sink = CsvSink::open(
        cli.output
            .clone()
            .unwrap_or_else(|| settings.storage.data_path.clone()),
    )?;

    let mut controller = SweepController::new(
        settings.clone(),
        devices,
        Box::new(sink),
        operator.clone(),
        cancel,
    );

    match controller.run(&grid, &mut cursor).await {
        Ok(SweepOutcome::Completed { .. }) => {
            store.clear()?;
            operator.notify("Sweep completed.");
            Ok(ExitCode::SUCCESS)
        }
        Ok(SweepOutcome::Declined) => {
            operator.notify("Please correct the program settings, and try again.");
            offer_savestate(&store, &grid, &cursor, operator.as_ref());
            Ok(ExitCode::FAILURE)
        }
        Ok(SweepOutcome::Interrupted { .. }) => {
            save_interrupted_progress(&store, &grid, &cursor, operator.as_ref())?;
            Ok(ExitCode::FAILURE)
        }
        Err(err) => {
            // Preserve progress before surfacing the fault.
            offer_savestate(&store, &grid, &cursor, operator.as_ref());
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::mock::{
        MockAnalyzer, MockOperator, MockSignalGenerator, MockTurntable,
    };

    #[test]
    fn frequency_bounds() {
        assert!(validate_frequency(0).is_ok());
        assert!(validate_frequency(2_400_000_000).is_ok());
        assert!(validate_frequency(-1).is_err());
        assert!(validate_frequency(1_000_000_000_000).is_err());
    }

    #[test]
    fn power_bounds_follow_configured_limits() {
        let limits = SignalGeneratorLimits {
            min_power_dbm: -30.0,
            max_power_dbm: 5.0,
        };
        assert!(validate_power(0, &limits).is_ok());
        assert!(validate_power(-30, &limits).is_ok());
        assert!(validate_power(5, &limits).is_ok());
        assert!(validate_power(6, &limits).is_err());
        assert!(validate_power(-31, &limits).is_err());
    }

    #[test]
    fn analyzer_window_shifts_up_from_negative_start() {
        // Centered case.
        assert_eq!(
            analyzer_window(2_400_000_000, 500_000_000),
            (1_900_000_000, 2_900_000_000)
        );
        // Low target: keep the window width, pin the start at zero.
        assert_eq!(analyzer_window(100_000_000, 500_000_000), (0, 1_000_000_000));
    }

    #[tokio::test]
    async fn programming_issues_the_full_setup_sequence() {
        let analyzer = MockAnalyzer::new();
        let analyzer_log = analyzer.commands();
        let signal_generator = MockSignalGenerator::new();
        let generator_log = signal_generator.commands();
        let mut devices = Devices {
            turntable: Box::new(MockTurntable::new()),
            signal_generator: Box::new(signal_generator),
            analyzer: Box::new(analyzer),
        };

        let settings = Settings::default();
        program_instruments(&mut devices, &settings, 2_400_000_000, 0)
            .await
            .unwrap();

        let generator_commands = generator_log.lock().unwrap();
        assert_eq!(generator_commands[0], "FREQ 2400000000E0Hz");
        assert!(generator_commands.contains(&"OUTP:MOD OFF".to_string()));
        assert!(generator_commands.contains(&"OUTPUT OFF".to_string()));

        let analyzer_commands = analyzer_log.lock().unwrap();
        assert_eq!(analyzer_commands[0], "SYST:PRES");
        assert!(analyzer_commands.contains(&"INST:SEL 'SA'".to_string()));
        assert!(analyzer_commands.contains(&"SENS:SWEEP:POINTS 1001".to_string()));
        assert!(analyzer_commands.contains(&"TRAC:TYPE MAXH".to_string()));
    }

    #[tokio::test]
    async fn manual_mode_issues_no_setup_commands() {
        let analyzer = MockAnalyzer::new();
        let analyzer_log = analyzer.commands();
        let signal_generator = MockSignalGenerator::new();
        let generator_log = signal_generator.commands();
        let mut devices = Devices {
            turntable: Box::new(MockTurntable::new()),
            signal_generator: Box::new(signal_generator),
            analyzer: Box::new(analyzer),
        };

        let operator = MockOperator::new();
        apply_instrument_setup(
            &mut devices,
            &Settings::default(),
            true,
            2_400_000_000,
            0,
            &operator,
        )
        .await
        .unwrap();

        assert!(analyzer_log.lock().unwrap().is_empty());
        assert!(generator_log.lock().unwrap().is_empty());
        assert!(operator
            .notifications()
            .iter()
            .any(|n| n.contains("Manual settings")));
    }

    #[test]
    fn interrupted_save_report_matches_the_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("savestate.dat"));
        let grid = crate::grid::generate(&GridRequest {
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
        let mut cursor = SweepCursor::new(grid.total());
        cursor.advance();

        // First save writes and reports the file as created.
        let operator = MockOperator::new();
        save_interrupted_progress(&store, &grid, &cursor, &operator).unwrap();
        let notes = operator.notifications();
        assert!(notes.iter().any(|n| n.contains("Save state file created")));
        assert!(notes.iter().any(|n| n.contains("[1/5]")));

        // A declined overwrite must not claim a file was created.
        let decliner = MockOperator::new();
        decliner.script_answers([false]);
        save_interrupted_progress(&store, &grid, &cursor, &decliner).unwrap();
        let notes = decliner.notifications();
        assert!(notes.iter().any(|n| n.contains("Savestate was not written")));
        assert!(!notes.iter().any(|n| n.contains("Save state file created")));
    }
}
