use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpStream;
use tracing::{error, info, instrument};

use otelnet::config::Config;
use otelnet::error::{Error, ErrorKind};
use otelnet::session::Session;
use otelnet::telnet::TelnetSession;
use otelnet::{cli, logging, panic};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    panic::install_handler();
    ignore_sigpipe();

    let args = cli::Args::parse();
    if let Err(e) = logging::init(&args) {
        eprintln!("failed to initialise logging: {e}");
        return ExitCode::FAILURE;
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let _ = panic::restore_terminal();
            error!("{e}");
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Ignore `SIGPIPE` so a write to a closed socket or a helper's closed stdin
/// surfaces as an `EPIPE` error through the normal error path instead of
/// killing the process outright.
fn ignore_sigpipe() {
    // Safety: SIG_IGN is a well-known sentinel value, not a function pointer
    // we call into; this just installs the default "ignore" disposition.
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}

#[instrument(skip(args))]
async fn run(args: cli::Args) -> Result<(), Error> {
    info!(host = %args.host, port = args.port, "connecting");

    let config = Config::load(args.config.as_deref())?;

    let tcp = TcpStream::connect((args.host.as_str(), args.port))
        .await
        .map_err(|e| ErrorKind::Transport(otelnet::error::TransportError::Io(e)))?;
    let telnet = TelnetSession::new(tcp);

    let cancel = Arc::new(AtomicBool::new(false));
    let session = Session::new(telnet, config, cancel);
    session.run().await
}
