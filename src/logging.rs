use std::fs::{self, File};

use tracing_error::ErrorLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::cli;
use crate::config::{self, CRATE_NAME};
use crate::error::{Error, ErrorKind};

/// Set up logging to a log file in the platform data directory.
///
/// Never logs to stdout/stderr: those are reserved for the remote session and
/// the local echo of typed input, and a stray log line there would corrupt the
/// terminal the operator is driving the remote server through.
pub fn init(args: &cli::Args) -> Result<(), Error> {
    let data_dir = config::data_dir();
    fs::create_dir_all(data_dir).map_err(ErrorKind::from)?;

    let log_file =
        File::create(data_dir.join(format!("{CRATE_NAME}.log"))).map_err(ErrorKind::from)?;

    let env_filter = EnvFilter::builder()
        .with_default_directive(args.log_level.into())
        .from_env()
        .map_err(|e| ErrorKind::Cli(format!("invalid environment log level: {e}")))?;

    let file_subscriber = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(false)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(file_subscriber)
        .with(ErrorLayer::default())
        .init();

    Ok(())
}
