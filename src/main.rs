use std::error::Error;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use termcolor::{ColorChoice, StandardStream};
use tracing::info;

use osc_client::general::{run_console, status};
use osc_client::config::TargetConfig;
use osc_client::{logging, Config, Protocol, Session};

#[derive(Parser, Debug)]
#[command(
    name = "osc-client",
    version,
    about = "Send and receive OSC over UDP or TCP from a line console"
)]
struct Args {
    /// JSON config file; missing file means defaults
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// udp or tcp
    #[arg(long)]
    protocol: Option<Protocol>,

    /// Local port to bind (0 = ephemeral)
    #[arg(long)]
    local_port: Option<u16>,

    /// Initial target
    #[arg(long, value_name = "HOST:PORT")]
    target: Option<TargetConfig>,

    /// Verbose logging
    #[arg(long)]
    debug: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    logging::init_tracing(args.debug);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let mut config = Config::load_or_default(&args.config)?;
    if let Some(protocol) = args.protocol {
        config.protocol = protocol;
    }
    if let Some(port) = args.local_port {
        config.local_port = port;
    }
    if args.target.is_some() {
        config.target = args.target;
    }

    let mut session = Session::from_config(&config);
    session.add_listener(status::print_received);

    let mut stdout = StandardStream::stdout(ColorChoice::Auto);
    status::print_banner(&mut stdout, &session)?;

    let stdin = io::stdin();
    run_console(&mut session, stdin.lock(), &mut stdout)?;

    session.disconnect();
    info!("exiting");
    Ok(())
}
