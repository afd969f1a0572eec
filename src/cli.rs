use std::path::PathBuf;

use clap::Parser;
use tracing::level_filters::LevelFilter;

use crate::config::version;

#[derive(Debug, Clone, Parser)]
#[command(author, about, version = version())]
pub struct Args {
    /// Host name or IP address of the Telnet server to connect to.
    pub host: String,

    /// TCP port of the Telnet server to connect to.
    pub port: u16,

    #[arg(short, long, value_name = "PATH", help = "Path to a config file.")]
    pub config: Option<PathBuf>,

    #[arg(
        short,
        long,
        value_name = "LEVEL",
        default_value = "INFO",
        help = "Log level filter."
    )]
    pub log_level: LevelFilter,
    // If you add new CLI args, don't forget to update the user guide.
}
