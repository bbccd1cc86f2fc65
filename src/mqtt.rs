use crate::coordinator::controls::ControlRequest;
use crate::entities::{self, BooleanSink, EntityKind, EnumSink, NumericSink, TextSink};
use crate::prelude::*;

use rumqttc::{AsyncClient, Event, EventLoop, Incoming, LastWill, MqttOptions, Publish, QoS};

// Message {{{
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub retain: bool,
    pub payload: String,
}

impl Message {
    /// Entity state topic, relative to the namespace.
    pub fn for_entity(kind: EntityKind, key: &str, payload: String) -> Self {
        Self {
            topic: format!("{}/{}", kind.as_str(), key),
            retain: true,
            payload,
        }
    }

    // cmd/switch/buzzer_control    ON|OFF
    // cmd/select/battery_type      Flooded
    // cmd/number/max_charging_current  30
    // cmd/raw                      QPIGS
    pub fn to_control(&self) -> Result<ControlRequest> {
        use ControlRequest::*;

        let parts = self.split_cmd_topic()?;

        let r = match parts[..] {
            ["switch", key] => match entities::Flag::from_key(key) {
                Some(flag) => Flag(flag, self.payload_bool()),
                None => bail!("unknown switch {}", key),
            },
            ["select", key] => match entities::Select::from_key(key) {
                Some(select) => Select(select, self.payload.trim().to_string()),
                None => bail!("unknown select {}", key),
            },
            ["number", key] => match entities::Numeric::from_key(key) {
                Some(number) => Number(number, self.payload_float()?),
                None => bail!("unknown number {}", key),
            },
            ["raw"] => {
                let raw = self.payload.trim();
                if raw.is_empty() {
                    bail!("empty raw command");
                }
                Raw(Command::new(raw))
            }
            [..] => bail!("unhandled: {:?}", self),
        };

        Ok(r)
    }

    // cmd/select/battery_type => ['select', 'battery_type']
    fn split_cmd_topic(&self) -> Result<Vec<&str>> {
        let parts: Vec<&str> = self.topic.split('/').collect();

        // our subscription is <namespace>/cmd/# so this should not happen
        if parts.len() < 2 || parts[0] != "cmd" {
            bail!("ignoring badly formed MQTT topic: {}", self.topic);
        }

        Ok(parts[1..].to_vec())
    }

    fn payload_float(&self) -> Result<f32> {
        self.payload
            .trim()
            .parse()
            .map_err(|err| anyhow!("payload_float: {}", err))
    }

    fn payload_bool(&self) -> bool {
        matches!(
            self.payload.to_ascii_lowercase().as_str(),
            "1" | "t" | "true" | "on" | "y" | "yes"
        )
    }
} // }}}

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum ChannelData {
    Message(Message),
    Shutdown,
}

pub type Sender = broadcast::Sender<ChannelData>;

// MqttSink {{{
/// Publishes one entity's state to `<namespace>/<kind>/<key>`, retained.
#[derive(Debug, Clone)]
pub struct MqttSink {
    kind: EntityKind,
    key: &'static str,
    to_mqtt: Sender,
}

impl MqttSink {
    pub fn new(kind: EntityKind, key: &'static str, to_mqtt: Sender) -> Self {
        Self { kind, key, to_mqtt }
    }

    fn send(&self, payload: String) {
        let message = Message::for_entity(self.kind, self.key, payload);
        // no receiver just means MQTT is not running
        let _ = self.to_mqtt.send(ChannelData::Message(message));
    }
}

impl BooleanSink for MqttSink {
    fn update(&self, state: bool) {
        self.send(if state { "ON" } else { "OFF" }.to_string());
    }
}

impl NumericSink for MqttSink {
    fn publish(&self, value: f32) {
        self.send(value.to_string());
    }
}

impl TextSink for MqttSink {
    fn publish(&self, value: &str) {
        self.send(value.to_string());
    }
}

impl EnumSink for MqttSink {
    fn publish_option(&self, option: &str) {
        self.send(option.to_string());
    }
} // }}}

const PUBLISH_ATTEMPTS: usize = 3;

#[derive(Clone)]
pub struct Mqtt {
    config: config::Mqtt,
    channels: Channels,
}

impl Mqtt {
    pub fn new(config: config::Mqtt, channels: Channels) -> Self {
        Self { config, channels }
    }

    pub async fn start(&self) -> Result<()> {
        let c = &self.config;

        if !c.enabled() {
            info!("mqtt disabled, skipping");
            return Ok(());
        }

        let mut options = MqttOptions::new("pi30-bridge", c.host(), c.port());

        let will = LastWill {
            topic: self.lwt_topic(),
            message: bytes::Bytes::from("offline"),
            qos: QoS::AtLeastOnce,
            retain: true,
        };
        options.set_last_will(will);

        options.set_keep_alive(std::time::Duration::from_secs(60));
        if let (Some(u), Some(p)) = (c.username(), c.password()) {
            options.set_credentials(u, p);
        }

        info!("initializing mqtt at {}:{}", c.host(), c.port());

        let (client, eventloop) = AsyncClient::new(options, 10);

        futures::try_join!(
            self.setup(client.clone()),
            self.receiver(eventloop),
            self.sender(client)
        )?;

        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        info!("Stopping MQTT client...");
        let _ = self.channels.to_mqtt.send(ChannelData::Shutdown);
        Ok(())
    }

    async fn setup(&self, client: AsyncClient) -> Result<()> {
        client
            .publish(self.lwt_topic(), QoS::AtLeastOnce, true, "online")
            .await?;

        client
            .subscribe(
                format!("{}/cmd/#", self.config.namespace()),
                QoS::AtMostOnce,
            )
            .await?;

        Ok(())
    }

    // mqtt -> coordinator
    async fn receiver(&self, mut eventloop: EventLoop) -> Result<()> {
        let mut shutdown = self.channels.shutdown.subscribe();

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("MQTT receiver shutting down");
                    break;
                }
                event = tokio::time::timeout(std::time::Duration::from_secs(1), eventloop.poll()) => {
                    match event {
                        Ok(Ok(Event::Incoming(Incoming::Publish(publish)))) => {
                            if let Err(err) = self.handle_message(publish) {
                                warn!("{}", err);
                            }
                        }
                        Ok(Err(e)) => {
                            error!("{}", e);
                            info!("reconnecting in 5s");
                            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        }
                        _ => {} // keepalives, poll timeout
                    }
                }
            }
        }

        info!("MQTT receiver loop exiting");
        Ok(())
    }

    fn handle_message(&self, publish: Publish) -> Result<()> {
        // strip "<namespace>/"; works even if the namespace contains a /
        let Some(topic) = publish.topic.get(self.config.namespace().len() + 1..) else {
            bail!("ignoring topic outside namespace: {}", publish.topic);
        };

        let message = Message {
            topic: topic.to_owned(),
            retain: publish.retain,
            payload: String::from_utf8(publish.payload.to_vec())?,
        };
        debug!("RX: {:?}", message);
        if self
            .channels
            .from_mqtt
            .send(ChannelData::Message(message))
            .is_err()
        {
            bail!("send(from_mqtt) failed - channel closed?");
        }

        Ok(())
    }

    // coordinator -> mqtt
    async fn sender(&self, client: AsyncClient) -> Result<()> {
        use ChannelData::*;

        let mut receiver = self.channels.to_mqtt.subscribe();

        loop {
            match receiver.recv().await {
                Ok(Shutdown) => {
                    info!("MQTT sender received shutdown signal");
                    let _ = client.disconnect().await;
                    break;
                }
                Ok(Message(message)) => {
                    let topic = format!("{}/{}", self.config.namespace(), message.topic);
                    debug!("publishing: {} = {}", topic, message.payload);
                    self.publish(&client, &topic, message.retain, message.payload)
                        .await;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("MQTT sender lagged, {} messages dropped", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }

        info!("MQTT sender loop exiting");
        Ok(())
    }

    async fn publish(&self, client: &AsyncClient, topic: &str, retain: bool, payload: String) {
        for attempt in 1..=PUBLISH_ATTEMPTS {
            match client
                .publish(topic, QoS::AtLeastOnce, retain, payload.as_bytes().to_vec())
                .await
            {
                Ok(_) => return,
                Err(err) => {
                    error!(
                        "MQTT publish failed: {:?} (attempt {}/{})",
                        err, attempt, PUBLISH_ATTEMPTS
                    );
                    if attempt < PUBLISH_ATTEMPTS {
                        tokio::time::sleep(std::time::Duration::from_secs(10)).await;
                    }
                }
            }
        }
        warn!("giving up on {}", topic);
    }

    fn lwt_topic(&self) -> String {
        format!("{}/LWT", self.config.namespace())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Flag, Numeric, Select};

    fn message(topic: &str, payload: &str) -> Message {
        Message {
            topic: topic.to_string(),
            retain: false,
            payload: payload.to_string(),
        }
    }

    #[test]
    fn controls_from_topics() -> Result<()> {
        assert_eq!(
            message("cmd/switch/buzzer_control", "ON").to_control()?,
            ControlRequest::Flag(Flag::BuzzerControl, true)
        );
        assert_eq!(
            message("cmd/switch/power_saving", "off").to_control()?,
            ControlRequest::Flag(Flag::PowerSaving, false)
        );
        assert_eq!(
            message("cmd/select/equalization_enable", "Enabled\n").to_control()?,
            ControlRequest::Select(Select::EqualizationEnable, "Enabled".to_string())
        );
        assert_eq!(
            message("cmd/number/max_charging_current", "30").to_control()?,
            ControlRequest::Number(Numeric::MaxChargingCurrent, 30.0)
        );
        assert_eq!(
            message("cmd/raw", "QPIGS").to_control()?,
            ControlRequest::Raw(Command::new("QPIGS"))
        );
        Ok(())
    }

    #[test]
    fn bad_controls() {
        for (topic, payload) in [
            ("cmd/switch/nope", "ON"),
            ("cmd/number/max_charging_current", "lots"),
            ("cmd/raw", " "),
            ("cmd/frobnicate/x", "1"),
            ("state/number/x", "1"),
            ("cmd", ""),
        ] {
            assert!(message(topic, payload).to_control().is_err(), "{}", topic);
        }
    }

    #[test]
    fn sink_publishes_retained_state() {
        let channels = Channels::new();
        let mut rx = channels.to_mqtt.subscribe();

        let sink = MqttSink::new(EntityKind::Switch, "buzzer_control", channels.to_mqtt.clone());
        BooleanSink::update(&sink, true);

        let sink = MqttSink::new(EntityKind::Sensor, "grid_voltage", channels.to_mqtt.clone());
        NumericSink::publish(&sink, 230.5);

        assert_eq!(
            rx.try_recv().unwrap(),
            ChannelData::Message(Message {
                topic: "switch/buzzer_control".to_string(),
                retain: true,
                payload: "ON".to_string(),
            })
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            ChannelData::Message(Message {
                topic: "sensor/grid_voltage".to_string(),
                retain: true,
                payload: "230.5".to_string(),
            })
        );
    }
}
