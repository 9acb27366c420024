use chamber_sweep::app::{self, Cli};
use chamber_sweep::cancel::{install_ctrl_c_handler, CancelToken};
use chamber_sweep::config::Settings;
use clap::Parser;
use log::error;
use std::process::ExitCode;
use std::sync::Arc;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match Settings::new(cli.config.as_deref()) {
        Ok(settings) => Arc::new(settings),
        Err(err) => {
            eprintln!("Failed to load configuration: {err}");
            return ExitCode::FAILURE;
        }
    };

    let default_filter = if cli.verbose {
        "debug"
    } else {
        settings.log_level.0.as_str()
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let cancel = CancelToken::new();
    install_ctrl_c_handler(cancel.clone());

    match app::run(cli, settings, cancel).await {
        Ok(code) => code,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
