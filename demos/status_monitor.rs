// Status register monitoring example
//
// Polls the INternal state change Register and reports every flag that is
// raised until interrupted.

use clap::Parser;
use lecroy_rs::{load_config, LeCroyScope};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "status_monitor")]
#[command(version = "1.0")]
#[command(about = "Poll the status registers of a LeCroy oscilloscope")]
struct Args {
    /// Resource string, e.g. TCPIP0::192.168.1.20::5025::SOCKET
    resource: Option<String>,

    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Polling interval in milliseconds
    #[arg(short, long, default_value_t = 500)]
    interval: u64,

    /// Also print the full ALST? reply on every poll
    #[arg(short, long)]
    all: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref())?;
    if let Some(resource) = args.resource {
        config.connection.resource = resource;
    }
    env_logger::Builder::from_default_env()
        .filter_level(config.logging.level_filter())
        .init();

    let mut scope = LeCroyScope::connect(&config)?;
    scope.message("Remote status monitor attached")?;
    println!("Monitoring {} (Ctrl+C to stop)\n", scope.scope_model());

    loop {
        let inr = scope.inr_query()?;
        let flags = inr.active_flags();
        if !flags.is_empty() {
            println!("INR {:#06x}: {}", inr.0, flags.join(", "));
        }
        if args.all {
            println!("{}", scope.alst_query()?);
        }
        thread::sleep(Duration::from_millis(args.interval));
    }
}
