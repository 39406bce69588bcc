use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::{error, info};
use tokio::sync::broadcast;

mod config;
mod coordinator;
mod messages;
mod mqtt;
mod notify;
mod presence;
mod prober;

use crate::coordinator::Coordinator;
use crate::notify::LogNotifier;
use crate::presence::Presence;
use crate::prober::PingProber;

/// Works out where a device is by pinging the hosts it could be near.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Log events instead of publishing them over MQTT
    #[arg(long)]
    dry_run: bool,

    /// Run a single round, print the location and exit
    #[arg(long)]
    once: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut logger = pretty_env_logger::formatted_builder();
    if let Ok(filters) = std::env::var("RUST_LOG") {
        logger.parse_filters(&filters);
    } else {
        logger.filter_level(log::LevelFilter::Info);
    }
    if args.verbose {
        logger.filter_module(module_path!(), log::LevelFilter::Debug);
    }
    logger.init();

    let config = config::AppConfig::load(&args.config)?;

    info!(
        "Locating {} across: {:?}",
        config.device.name,
        config
            .locations
            .iter()
            .map(|l| l.label.as_str())
            .collect::<Vec<_>>()
    );

    let coordinator = Coordinator::new(
        Arc::new(PingProber::new(
            &config.ping_program(),
            config.attempt_timeout(),
        )),
        config.targets(),
        config.policy(),
        config.round_budget(),
    );

    if args.once {
        println!("{}", coordinator.locate().await);
        return Ok(());
    }

    let mut mqtt_client = None;
    let presence = match (&config.mqtt, args.dry_run) {
        (Some(mqtt_config), false) => {
            let (client, mut eventloop) = mqtt::MqttClient::new(mqtt_config, &config.device.name);
            client.subscribe().await?;

            let (tx, rx) = broadcast::channel(10);
            let listener = client.clone();
            tokio::task::spawn(async move {
                listener.event_loop(&mut eventloop, tx).await;
            });

            let client = Arc::new(client);
            mqtt_client = Some(client.clone());
            Presence::new(&config.device.name, coordinator, config.period(), client.clone())
                .with_indicator(client)
                .with_scan_requests(rx)
        }
        _ => {
            info!("Not publishing over MQTT, events will only be logged");
            Presence::new(
                &config.device.name,
                coordinator,
                config.period(),
                Arc::new(LogNotifier),
            )
            .with_indicator(Arc::new(LogNotifier))
        }
    };
    let presence = presence.with_home_locations(config.device.home_locations.clone());

    tokio::select! {
        _ = presence.run() => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                error!("Unable to listen for shutdown signal: {:?}", err);
            }
            info!("Shutting down");
        }
    }

    if let Some(client) = mqtt_client {
        client.disconnect().await?;
    }

    Ok(())
}
