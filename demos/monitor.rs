use std::env;
use std::sync::Arc;

use toon_thermostat::{Config, MessageLogMode, ThermostatConnectionBuilder};

#[tokio::main]
async fn main() -> toon_thermostat::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let config_path = args.get(1).expect("usage: monitor <config.json> [--log <file>]");
    let log_path = args
        .iter()
        .position(|a| a == "--log")
        .and_then(|i| args.get(i + 1));

    let config = Config::from_path(config_path)?;
    let mut builder = ThermostatConnectionBuilder::from_config(&config)?.on_update(|status| {
        println!(
            "{} | setpoint {} | burner: {:?} | program {:?}",
            status.temperature(),
            status.setpoint(),
            status.burner,
            status.program_state,
        );
    });
    if let Some(path) = log_path {
        builder = builder.message_log(MessageLogMode::Diffed, path.as_str());
    }

    let connection = Arc::new(builder.build()?);
    println!("Logging in as {}...", config.name);
    connection.initialize().await?;
    if let Some(agreement) = connection.agreement() {
        println!("Monitoring {agreement} ({})", connection.display_name().unwrap_or("-"));
    }

    let handle = connection.start()?;
    if let Err(e) = handle.await {
        eprintln!("Polling task ended: {e}");
    }
    Ok(())
}
