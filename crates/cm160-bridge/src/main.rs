//! `cm160`: forward OWL CM160 readings to MQTT.

use std::process::ExitCode;
use std::sync::atomic::Ordering;

use chrono::Utc;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use cm160_bridge::metrics::describe_metrics;
use cm160_bridge::{
    AnnounceMessage, BridgeConfig, BridgeError, Cli, ManagerConfig, MqttSettings, MqttSink, Origin,
    Publisher, ReadingSink, RusbBus, SerialLineReset, SessionManager,
};

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match BridgeConfig::load(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("cm160: {}", e);
            return ExitCode::FAILURE;
        }
    };

    init_logging(config.debug);

    match run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// RUST_LOG wins; otherwise `info`, or `debug` for our crates with `--debug`.
fn init_logging(debug: bool) {
    let default = if debug {
        "info,cm160=debug,cm160_bridge=debug,cm160_protocol=debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn run(config: &BridgeConfig) -> Result<(), BridgeError> {
    if let Some(addr) = config.metrics_listen {
        #[cfg(feature = "prometheus")]
        {
            cm160_bridge::metrics::install_prometheus(addr).map_err(BridgeError::Metrics)?;
            info!("serving metrics on {}", addr);
        }
        #[cfg(not(feature = "prometheus"))]
        warn!("built without the prometheus feature, ignoring metrics address {}", addr);
    }
    describe_metrics();

    let origin = Origin::detect();
    let mut settings = MqttSettings::new(
        config.host.clone(),
        config.port,
        config.client_id_for(&origin.location),
    );
    if let Some(topic) = &config.announce_topic {
        settings = settings.with_last_will(topic.clone(), AnnounceMessage::offline(&origin).to_json()?);
    }

    let mut sink = MqttSink::connect(&settings)?;
    if let Some(topic) = &config.announce_topic {
        sink.publish(topic, AnnounceMessage::online(&origin, Utc::now()).to_json()?)?;
    }

    let bus = RusbBus::new(SerialLineReset::new(config.serial_device.clone()))?;
    let publisher = Publisher::new(config.topic.clone(), f64::from(config.voltage), origin.clone());
    let manager_config = ManagerConfig {
        read_timeout: config.read_timeout(),
        ..ManagerConfig::default()
    };
    let mut manager = SessionManager::new(bus, sink, publisher, manager_config);

    let running = manager.running_flag();
    ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))?;

    info!(
        "publishing to {}:{} topic {} at {} V",
        config.host, config.port, config.topic, config.voltage
    );
    manager.run();
    info!("shutting down");

    let mut sink = manager.into_sink();
    if let Some(topic) = &config.announce_topic {
        let goodbye = AnnounceMessage::offline(&origin).to_json()?;
        if let Err(e) = sink.publish(topic, goodbye) {
            warn!("cannot announce shutdown: {}", e);
        }
    }
    sink.disconnect();
    Ok(())
}
