use std::env;

use toon_thermostat::{Config, ThermostatConnectionBuilder};

#[tokio::main]
async fn main() -> toon_thermostat::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let usage = "usage: set_temperature <config.json> <celsius>";
    let config_path = args.get(1).expect(usage);
    let celsius: f64 = args
        .get(2)
        .and_then(|v| v.parse().ok())
        .expect(usage);

    let config = Config::from_path(config_path)?;
    let connection = ThermostatConnectionBuilder::from_config(&config)?.build()?;
    connection.initialize().await?;

    // A write needs a full record to merge into, so poll first.
    if connection.poll_once().await?.is_none() {
        eprintln!("Toon returned no thermostat data");
        return Ok(());
    }
    println!(
        "Now {:.1}\u{00b0}C, setpoint {:.1}\u{00b0}C",
        connection.current_temperature().unwrap_or_default(),
        connection.current_setpoint().unwrap_or_default(),
    );

    let status = connection.set_temperature(celsius).await?;
    println!("Toon confirmed setpoint {}", status.setpoint());

    connection.auth().logout().await;
    Ok(())
}
