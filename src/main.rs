use anyhow::Context as _;
use btleplug::api::Manager as _;
use btleplug::platform::Manager;
use clap::Parser;
use log::info;

mod config;
mod filter;
mod gateway;
mod messages;
mod mqtt;
mod protocol;
mod scanner;

/// BLE to MQTT gateway for RAPT Pill fermentation sensors.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: std::path::PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();
    let args = Args::parse();

    let config_contents = std::fs::read_to_string(&args.config)
        .with_context(|| format!("reading config from {}", args.config.display()))?;
    let config: config::AppConfig = toml::de::from_str(&config_contents)?;

    info!("starting up");
    let cycle = scanner::ScanCycle::new(config.scan.interval(), config.scan.duration());
    let registry = filter::DeviceRegistry::new(config.devices);

    let (mqtt_client, session) = mqtt::MqttClient::new(&config.mqtt);
    tokio::spawn(session.run());

    let bt_manager = Manager::new().await?;
    let adapters = bt_manager.adapters().await?;
    let central = adapters
        .into_iter()
        .next()
        .context("no bluetooth adapter found")?;
    let source = scanner::BtleSource::new(central);

    let core = gateway::Gateway::new(source, registry, cycle, mqtt_client);
    core.run_loop().await
}
