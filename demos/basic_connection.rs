// Basic device discovery and connection example
//
// This example lists LeCroy USB devices and identifies a scope given by a
// resource string (or the first USB device found). Settings come from
// lecroy.toml and LECROY__ environment variables when present.

use lecroy_rs::{load_config_or_default, LeCroyConnector, LeCroyScope};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config_or_default(None);
    env_logger::Builder::from_default_env()
        .filter_level(config.logging.level_filter())
        .init();

    println!("LeCroy Device Discovery Example");
    println!("===============================\n");

    println!("1. Discovering LeCroy USB devices...");
    let devices = LeCroyConnector::get_available_devices()?;
    if devices.is_empty() {
        println!("No LeCroy USB devices found.");
    }
    for (i, device) in devices.iter().enumerate() {
        println!("  {}. {} at {} ({})", i + 1, device.name, device.port, device.resource());
    }
    println!();

    match (std::env::args().nth(1), devices.first()) {
        (Some(resource), _) => config.connection.resource = resource,
        (None, Some(device)) => config.connection.resource = device.resource(),
        (None, None) => {
            println!("Pass a resource string, e.g. TCPIP0::192.168.1.20::5025::SOCKET");
            return Ok(());
        }
    }

    println!("2. Connecting to {}...", config.connection.resource);
    let mut scope = LeCroyScope::connect(&config)?;
    let identity = scope.identity().clone();
    println!("Successfully connected!");

    println!("\n3. Device information:");
    println!("  Manufacturer: {}", identity.manufacturer);
    println!("  Model:        {}", identity.model);
    println!("  Serial:       {}", identity.serial_number);
    println!("  Firmware:     {}", identity.firmware);
    println!("  Channels:     {:?}", scope.channels());
    println!("  Resolution:   {:?}", scope.resolution());

    println!("\n4. Testing basic communication...");
    println!("  Header format: {}", scope.comm_header()?);
    println!("  Data type:     {}", scope.comm_format_data_type()?);
    println!("  Trigger mode:  {}", scope.trig_mode()?);

    println!("\n5. Connection test completed successfully!");
    Ok(())
}
