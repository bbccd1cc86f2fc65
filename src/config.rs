use crate::prelude::*;

use serde::Deserialize;
use std::collections::HashMap;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub serial: Serial,

    #[serde(default = "Config::default_mqtt")]
    pub mqtt: Mqtt,

    #[serde(default = "Config::default_energy")]
    pub energy: Energy,

    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,

    pub tick_ms: Option<u64>,
    pub startup_delay_ms: Option<u64>,
    pub response_timeout_ms: Option<u64>,
    pub max_frame_len: Option<usize>,

    #[serde(default = "Config::default_startup_commands")]
    pub startup_commands: Vec<String>,

    #[serde(default = "Config::default_poll")]
    pub poll: Vec<Poll>,

    /// Overrides of the built-in writable numbers, keyed by entity.
    #[serde(default)]
    pub numbers: HashMap<String, Number>,

    /// Overrides of the built-in selects, keyed by entity.
    #[serde(default)]
    pub selects: HashMap<String, Select>,
}

// Serial {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Serial {
    pub port: String,
    pub baud_rate: Option<u32>,
    pub reconnect_delay_ms: Option<u64>,
}

impl Serial {
    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate.unwrap_or(2400)
    }

    pub fn reconnect_delay_ms(&self) -> u64 {
        self.reconnect_delay_ms.unwrap_or(5000)
    }
} // }}}

// Poll {{{
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Poll {
    pub command: String,
    pub interval_ms: u64,
} // }}}

// Mqtt {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Mqtt {
    #[serde(default = "Config::default_enabled")]
    pub enabled: bool,

    #[serde(default = "Config::default_mqtt_host")]
    pub host: String,
    #[serde(default = "Config::default_mqtt_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,

    #[serde(default = "Config::default_mqtt_namespace")]
    pub namespace: String,
}

impl Mqtt {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> &Option<String> {
        &self.username
    }

    pub fn password(&self) -> &Option<String> {
        &self.password
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
} // }}}

// Energy {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Energy {
    pub sample_interval_ms: Option<u64>,
    pub save_interval_ms: Option<u64>,
    pub store_file: Option<String>,
}

impl Energy {
    pub fn sample_interval_ms(&self) -> u64 {
        self.sample_interval_ms.unwrap_or(1000)
    }

    pub fn save_interval_ms(&self) -> u64 {
        self.save_interval_ms.unwrap_or(60_000)
    }

    pub fn store_file(&self) -> &str {
        self.store_file.as_deref().unwrap_or("energy.json")
    }
} // }}}

// Number / Select overrides {{{
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Number {
    pub prefix: Option<String>,
    pub format: Option<String>,
    pub min: Option<f32>,
    pub max: Option<f32>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Select {
    pub prefix: Option<String>,
    pub parameters: Option<Vec<String>>,
    pub options: Option<Vec<String>>,
} // }}}

impl Config {
    pub fn new(file: String) -> Result<Self> {
        let content = std::fs::read_to_string(&file)
            .map_err(|err| anyhow!("error reading {}: {}", file, err))?;

        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Logged once the logger is set up with the configured level.
    pub fn log_summary(&self) {
        info!("Configuration loaded successfully:");
        info!("  Serial: {} at {} baud", self.serial.port(), self.serial.baud_rate());
        info!("  Tick: {}ms", self.tick_ms());
        info!("  Startup delay: {}ms", self.startup_delay_ms());
        info!("  Response timeout: {}ms", self.response_timeout_ms());
        info!("  Max frame length: {} bytes", self.max_frame_len());
        info!("  Startup commands: {}", self.startup_commands.join(", "));
        info!("  Poll table:");
        for poll in &self.poll {
            info!("    {} every {}ms", poll.command, poll.interval_ms);
        }

        info!("  MQTT: {}", if self.mqtt.enabled { "enabled" } else { "disabled" });
        if self.mqtt.enabled {
            info!("    Host: {}", self.mqtt.host);
            info!("    Port: {}", self.mqtt.port);
            info!("    Namespace: {}", self.mqtt.namespace);
        }

        info!("  Energy:");
        info!("    Sample interval: {}ms", self.energy.sample_interval_ms());
        info!("    Save interval: {}ms", self.energy.save_interval_ms());
        info!("    Store file: {}", self.energy.store_file());

        if !self.numbers.is_empty() {
            info!("  Number overrides: {}", self.numbers.len());
        }
        if !self.selects.is_empty() {
            info!("  Select overrides: {}", self.selects.len());
        }
        info!("  Log Level: {}", self.loglevel);
    }

    fn validate(&self) -> Result<()> {
        if self.serial.port.is_empty() {
            bail!("serial.port cannot be empty");
        }
        if self.serial.baud_rate() == 0 {
            bail!("serial.baud_rate must be greater than 0");
        }

        if self.tick_ms() == 0 {
            bail!("tick_ms must be greater than 0");
        }
        if self.response_timeout_ms() == 0 {
            bail!("response_timeout_ms must be greater than 0");
        }
        if self.max_frame_len() < 4 {
            bail!("max_frame_len must be at least 4");
        }

        if self.poll.is_empty() {
            bail!("poll table cannot be empty");
        }
        for (i, poll) in self.poll.iter().enumerate() {
            if poll.command.is_empty() {
                bail!("poll[{}].command cannot be empty", i);
            }
            if poll.interval_ms == 0 {
                bail!("poll[{}].interval_ms must be greater than 0", i);
            }
        }

        if self.energy.sample_interval_ms() < 1000 {
            bail!("energy.sample_interval_ms must be at least 1000");
        }
        if self.energy.save_interval_ms() == 0 {
            bail!("energy.save_interval_ms must be greater than 0");
        }

        if self.mqtt.enabled {
            if self.mqtt.port == 0 {
                bail!("mqtt.port must be between 1 and 65535");
            }
            if self.mqtt.host.is_empty() {
                bail!("mqtt.host cannot be empty");
            }
        }

        // checks keys and select table shapes
        crate::entities::Settings::from_config(&self.numbers, &self.selects)?;

        Ok(())
    }

    pub fn tick_ms(&self) -> u64 {
        self.tick_ms.unwrap_or(10)
    }

    pub fn startup_delay_ms(&self) -> u64 {
        self.startup_delay_ms.unwrap_or(3000)
    }

    pub fn response_timeout_ms(&self) -> u64 {
        self.response_timeout_ms.unwrap_or(3000)
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len.unwrap_or(512)
    }

    pub fn startup_commands(&self) -> &[String] {
        &self.startup_commands
    }

    pub fn poll(&self) -> &[Poll] {
        &self.poll
    }

    pub fn mqtt(&self) -> &Mqtt {
        &self.mqtt
    }

    pub fn energy(&self) -> &Energy {
        &self.energy
    }

    pub fn serial(&self) -> &Serial {
        &self.serial
    }

    pub fn loglevel(&self) -> &str {
        &self.loglevel
    }

    fn default_enabled() -> bool {
        true
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }

    fn default_mqtt() -> Mqtt {
        Mqtt {
            enabled: false,
            host: Self::default_mqtt_host(),
            port: Self::default_mqtt_port(),
            username: None,
            password: None,
            namespace: Self::default_mqtt_namespace(),
        }
    }

    fn default_mqtt_host() -> String {
        "localhost".to_string()
    }

    fn default_mqtt_port() -> u16 {
        1883
    }

    fn default_mqtt_namespace() -> String {
        "pi30".to_string()
    }

    fn default_energy() -> Energy {
        Energy {
            sample_interval_ms: None,
            save_interval_ms: None,
            store_file: None,
        }
    }

    fn default_startup_commands() -> Vec<String> {
        vec!["QPI".to_string(), "QID".to_string()]
    }

    fn default_poll() -> Vec<Poll> {
        [
            ("QPIRI", 3000),
            ("QMOD", 3000),
            ("QPIGS", 1000),
            ("QFLAG", 3000),
            ("QPIWS", 1000),
            ("QBEQI", 3000),
        ]
        .into_iter()
        .map(|(command, interval_ms)| Poll {
            command: command.to_string(),
            interval_ms,
        })
        .collect()
    }
}
