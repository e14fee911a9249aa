// Waveform acquisition example
//
// Arms the scope, forces a trigger and reads one trace, printing the scaled
// samples through polars.

use clap::Parser;
use lecroy_rs::{load_config, Channel, LeCroyScope, TriggerMode};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "acquire_waveform")]
#[command(version = "1.0")]
#[command(about = "Acquire a single waveform from a LeCroy oscilloscope")]
struct Args {
    /// Resource string, overrides the configuration file
    #[arg(short, long)]
    resource: Option<String>,

    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Channel to read
    #[arg(long, default_value = "C1")]
    channel: String,

    /// Force a trigger instead of waiting for one
    #[arg(short, long)]
    force: bool,

    /// Enable verbose logging
    #[arg(short, long, help = "Show debug information and detailed logs")]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref())?;
    if let Some(resource) = args.resource {
        config.connection.resource = resource;
    }

    let level = if args.verbose {
        log::LevelFilter::Debug
    } else {
        config.logging.level_filter()
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    let channel: Channel = args.channel.parse()?;

    let mut scope = LeCroyScope::connect(&config)?;
    println!("✓ Connected to {}", scope.scope_model());

    scope.set_trig_mode(TriggerMode::Single)?;
    scope.arm_acquisition()?;
    if args.force {
        scope.force_trigger()?;
    }

    let waveform = scope.get_waveform(channel)?;
    println!(
        "Read {} samples ({} bytes, {} reads)",
        waveform.len(),
        waveform.declared_byte_count,
        waveform.payload_reads
    );
    if let Some(warning) = &waveform.warning {
        println!("⚠ {}", warning);
    }

    let descriptor = scope.wave_descriptor(channel)?;
    let df = waveform.to_lazy_frame(&descriptor)?.collect()?;
    println!("{}", df.head(Some(10)));

    Ok(())
}
