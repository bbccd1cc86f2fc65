pub mod channels;
pub mod clock;
pub mod command;
pub mod config;
pub mod coordinator;
pub mod energy;
pub mod entities;
pub mod error;
pub mod mqtt;
pub mod options;
pub mod pi30;
pub mod prelude;
pub mod scheduler;
pub mod store;
pub mod transport;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{LocalCalendar, SystemClock};
use crate::coordinator::Coordinator;
use crate::entities::{Entities, LogSink, Settings};
use crate::mqtt::{Mqtt, MqttSink};
use crate::options::Options;
use crate::prelude::*;
use crate::store::JsonFileStore;
use crate::transport::SerialPort;

const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Wire up the serial link, MQTT and the engine, and run until ctrl-c or
/// the optional runtime limit.
pub async fn app(options: Options, config: Config) -> Result<()> {
    info!("pi30-bridge {} starting", CARGO_PKG_VERSION);
    config.log_summary();

    let channels = Channels::new();

    let settings = Settings::from_config(&config.numbers, &config.selects)?;
    let mut entities = Entities::new(settings);
    if config.mqtt().enabled() {
        let to_mqtt = channels.to_mqtt.clone();
        entities.bind_all(|kind, key| Arc::new(MqttSink::new(kind, key, to_mqtt.clone())));
    } else {
        entities.bind_all(|kind, key| Arc::new(LogSink::new(kind, key)));
    }

    let store = JsonFileStore::open(config.energy().store_file())?;
    let (serial, link) = SerialPort::new(config.serial().clone(), channels.clone());

    let coordinator = Coordinator::new(
        &config,
        link,
        Box::new(SystemClock::new()),
        Box::new(LocalCalendar),
        Box::new(store),
        entities,
    );
    let mqtt = Mqtt::new(config.mqtt().clone(), channels.clone());

    let shutdown = {
        let channels = channels.clone();
        let mqtt = mqtt.clone();
        async move {
            match options.runtime {
                Some(secs) => {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(secs)) => {
                            info!("runtime of {}s reached", secs);
                        }
                        _ = tokio::signal::ctrl_c() => {}
                    }
                }
                None => {
                    tokio::signal::ctrl_c().await?;
                }
            }

            info!("Shutdown signal received, stopping components...");
            let _ = channels.shutdown.send(());
            mqtt.stop().await?;
            Ok::<(), anyhow::Error>(())
        }
    };

    supervise(
        &channels,
        async {
            futures::try_join!(serial.start(), mqtt.start(), shutdown)?;
            Ok::<(), anyhow::Error>(())
        },
        coordinator.run(channels.clone(), config.tick_ms()),
    )
    .await?;

    info!("Application shutdown complete");
    Ok(())
}

/// Run the engine next to the other components. The engine is never
/// dropped mid-flight: if a component fails, shutdown is broadcast and the
/// engine finishes its final save before the component's error is returned.
pub async fn supervise<C, E>(channels: &Channels, components: C, engine: E) -> Result<()>
where
    C: Future<Output = Result<()>>,
    E: Future<Output = Result<()>>,
{
    let components = async {
        let result = components.await;
        if result.is_err() {
            warn!("a component failed, stopping the engine");
            let _ = channels.shutdown.send(());
        }
        result
    };

    let (engine, components) = futures::join!(engine, components);
    components?;
    engine
}
