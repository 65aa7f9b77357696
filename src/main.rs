use cadence::cli::Cli;
use cadence::config::Config;
use directories::ProjectDirs;
use flexi_logger::{
    detailed_format, Cleanup, Criterion, Duplicate, FileSpec, FlexiLoggerError, Logger,
    LoggerHandle, Naming,
};
use log::{debug, error, info};

fn main() {
    let Some(project_dirs) = ProjectDirs::from("", "", "cadence") else {
        eprintln!("Could not determine the cadence data directory");
        std::process::exit(1);
    };

    let config = Config::load_config(&project_dirs);

    // Keep the handle alive so buffered log lines are flushed on exit
    let _logger = match setup_logging(&project_dirs, &config) {
        Ok(handle) => Some(handle),
        Err(e) => {
            eprintln!("Failed to start logging: {}", e);
            None
        }
    };

    info!("cadence v{} starting", env!("CARGO_PKG_VERSION"));
    debug!("Command-line args: {:?}", std::env::args_os().collect::<Vec<_>>());

    if let Err(err) = Cli::handle_command_line(&config, &project_dirs) {
        error!("{:?}", err);
        eprintln!("{}", err);
        std::process::exit(1);
    }
}

fn setup_logging(
    project_dirs: &ProjectDirs,
    config: &Config,
) -> Result<LoggerHandle, FlexiLoggerError> {
    let log_dir = project_dirs.data_local_dir().join("logs");

    Logger::try_with_str(config.logging.log_spec())?
        .log_to_file(FileSpec::default().directory(log_dir).basename("cadence"))
        .format(detailed_format)
        .rotate(
            Criterion::Size(5_000_000),
            Naming::Timestamps,
            Cleanup::KeepLogFiles(5),
        )
        .duplicate_to_stderr(Duplicate::Warn)
        .start()
}
