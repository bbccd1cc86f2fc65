pub mod settings;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use log::info;

use crate::error::ProtocolError;
pub use settings::{NumberSetting, SelectSetting, Settings};

/// Declares a closed set of entities together with their stable string
/// keys. The key is what appears in MQTT topics, config and the store.
macro_rules! entity_keys {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $key:literal,)* }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum $name {
            $($variant,)*
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant,)*];

            pub fn key(&self) -> &'static str {
                match self {
                    $($name::$variant => $key,)*
                }
            }

            pub fn from_key(key: &str) -> Option<Self> {
                Self::ALL.iter().copied().find(|k| k.key() == key)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.key())
            }
        }
    };
}

entity_keys! {
    /// Every numeric value: live sensors, ratings, writable numbers and
    /// the energy accumulators.
    Numeric {
        GridVoltage => "grid_voltage",
        GridFrequency => "grid_freq",
        AcOutputVoltage => "ac_output_voltage",
        AcOutputFrequency => "ac_output_freq",
        OutputApparentPower => "output_apparent_power",
        OutputActivePower => "output_active_power",
        OutputLoadPercent => "output_load_percent",
        BusVoltage => "bus_voltage",
        BatteryVoltage => "battery_voltage",
        BatteryChargingCurrent => "battery_charging_current",
        BatteryCapacity => "battery_capacity",
        InverterTemperature => "inverter_temp",
        PvInputCurrent => "pv_input_current",
        PvInputVoltage => "pv_input_voltage",
        BatteryVoltageFromScc => "battery_voltage_from_scc",
        BatteryDischargeCurrent => "battery_discharge_current",
        FanOnVoltageOffset => "fan_on_voltage_offset",
        PvChargingPower => "pv_charging_power",
        ChargingMode => "charging_mode",

        GridRatingVoltage => "grid_rating_voltage",
        GridRatingCurrent => "grid_rating_current",
        AcOutputRatingVoltage => "ac_output_rating_voltage",
        AcOutputRatingFrequency => "ac_output_rating_frequency",
        AcOutputRatingCurrent => "ac_output_rating_current",
        AcOutputApparentPower => "ac_output_apparent_power",
        AcOutputActivePower => "ac_output_active_power",
        BatteryRatingVoltage => "battery_rating_voltage",
        BatteryRechargeVoltage => "battery_recharge_voltage",
        BatteryUndervoltage => "battery_undervoltage",
        BatteryBulkVoltage => "battery_bulk_voltage",
        BatteryFloatVoltage => "battery_float_voltage",
        MaxAcChargingCurrent => "max_ac_charging_current",
        MaxChargingCurrent => "max_charging_current",
        ParallelMaxNumber => "parallel_max_number",
        BatteryRedischargeVoltage => "battery_redischarge_voltage",
        UnlabeledRating => "unlabeled_rating",
        GridTieCurrent => "grid_tie_current",
        OperationLogic => "operation_logic",

        EqualizationTime => "equalization_time",
        EqualizationPeriod => "equalization_period",
        EqualizationMaxCurrent => "equalization_max_current",
        EqualizationVoltage => "equalization_voltage",
        EqualizationOverTime => "equalization_over_time",
        EqualizationElapsedTime => "equalization_elapsed_time",

        SolarEnergyToday => "energy_solar_today",
        SolarEnergyMonth => "energy_solar_month",
        SolarEnergyYear => "energy_solar_year",
        SolarEnergyTotal => "energy_solar_total",
        InverterEnergyToday => "energy_inverter_today",
        InverterEnergyMonth => "energy_inverter_month",
        InverterEnergyYear => "energy_inverter_year",
        InverterEnergyTotal => "energy_inverter_total",
    }
}

entity_keys! {
    /// Read-only device status bits.
    Binary {
        PvOrAcPoweringLoad => "pv_or_ac_powering_load",
        ConfigChanged => "config_changed",
        SccFirmwareUpdated => "scc_fw_updated",
        LoadOn => "load_on",
        ChargingOn => "charging_on",
        SccChargingOn => "scc_charging_on",
        AcChargingOn => "ac_charging_on",
        ChargingToFloat => "charging_to_float",
        InverterOn => "inverter_on",
        DustproofInstalled => "dustproof_installed",
    }
}

entity_keys! {
    /// Device flags, read with QFLAG and written with PE/PD.
    Flag {
        BuzzerControl => "buzzer_control",
        OverloadBypass => "overload_bypass",
        DisplayEscapeToDefaultPage => "display_escape_to_default_page",
        OverloadRestart => "overload_restart",
        OverTemperatureRestart => "over_temperature_restart",
        BacklightControl => "backlight_control",
        AlarmPrimarySourceInterrupt => "alarm_primary_source_interrupt",
        FaultCodeRecord => "fault_code_record",
        PowerSaving => "power_saving",
        DataLogPopup => "data_log_popup",
        SolarFeedToGrid => "solar_feed_to_grid",
        GridChargeEnable => "grid_charge_enable",
    }
}

impl Flag {
    pub fn letter(&self) -> char {
        match self {
            Flag::BuzzerControl => 'a',
            Flag::OverloadBypass => 'b',
            Flag::DisplayEscapeToDefaultPage => 'k',
            Flag::OverloadRestart => 'u',
            Flag::OverTemperatureRestart => 'v',
            Flag::BacklightControl => 'x',
            Flag::AlarmPrimarySourceInterrupt => 'y',
            Flag::FaultCodeRecord => 'z',
            Flag::PowerSaving => 'w',
            Flag::DataLogPopup => 'm',
            Flag::SolarFeedToGrid => 'd',
            Flag::GridChargeEnable => 'g',
        }
    }
}

entity_keys! {
    Text {
        ProtocolId => "protocol_id",
        SerialNumber => "serial_number",
        DeviceMode => "device_mode",
        DeviceModeText => "device_mode_text",
        EepromVersion => "eeprom_version",
        ChargingModeText => "charging_mode_text",
        WarningStatus => "warning_status",
    }
}

entity_keys! {
    /// Enumerated settings. A protocol code maps to a human label and back.
    Select {
        EqualizationEnable => "equalization_enable",
        EqualizationActive => "equalization_active",
        BatteryType => "battery_type",
        InputVoltageRange => "input_voltage_range",
        OutputSourcePriority => "output_source_priority",
        ChargerSourcePriority => "charger_source_priority",
        MachineType => "machine_type",
        Topology => "topology",
        OutputMode => "output_mode",
        PvOkCondition => "pv_ok_condition",
        PvPowerBalance => "pv_power_balance",
    }
}

/// What kind of thing an entity is from the outside; also the topic segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Sensor,
    Number,
    BinarySensor,
    Switch,
    Text,
    Select,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Sensor => "sensor",
            EntityKind::Number => "number",
            EntityKind::BinarySensor => "binary_sensor",
            EntityKind::Switch => "switch",
            EntityKind::Text => "text",
            EntityKind::Select => "select",
        }
    }
}

pub const UNKNOWN: &str = "Unknown";

pub trait BooleanSink: Send + Sync {
    fn update(&self, state: bool);
}

pub trait NumericSink: Send + Sync {
    fn publish(&self, value: f32);
}

pub trait TextSink: Send + Sync {
    fn publish(&self, value: &str);
}

pub trait EnumSink: Send + Sync {
    fn publish_option(&self, option: &str);
}

/// Writes every update to the log. Bound to all entities when nothing
/// better is configured.
#[derive(Debug, Clone)]
pub struct LogSink {
    name: String,
}

impl LogSink {
    pub fn new(kind: EntityKind, key: &str) -> Self {
        Self {
            name: format!("{}/{}", kind.as_str(), key),
        }
    }
}

impl BooleanSink for LogSink {
    fn update(&self, state: bool) {
        info!("{} = {}", self.name, state);
    }
}

impl NumericSink for LogSink {
    fn publish(&self, value: f32) {
        info!("{} = {}", self.name, value);
    }
}

impl TextSink for LogSink {
    fn publish(&self, value: &str) {
        info!("{} = {:?}", self.name, value);
    }
}

impl EnumSink for LogSink {
    fn publish_option(&self, option: &str) {
        info!("{} = {:?}", self.name, option);
    }
}

/// Bound sinks plus the last value published to each entity. Entities
/// without a sink still keep their last value; the energy integrator reads
/// power from here.
#[derive(Default)]
pub struct Entities {
    settings: Settings,
    numeric: HashMap<Numeric, Arc<dyn NumericSink>>,
    binary: HashMap<Binary, Arc<dyn BooleanSink>>,
    flags: HashMap<Flag, Arc<dyn BooleanSink>>,
    text: HashMap<Text, Arc<dyn TextSink>>,
    selects: HashMap<Select, Arc<dyn EnumSink>>,
    values: HashMap<Numeric, f32>,
    flag_states: HashMap<Flag, bool>,
    select_states: HashMap<Select, String>,
}

impl Entities {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            ..Default::default()
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn numeric_kind(&self, key: Numeric) -> EntityKind {
        if self.settings.number(key).is_some() {
            EntityKind::Number
        } else {
            EntityKind::Sensor
        }
    }

    pub fn bind_numeric(&mut self, key: Numeric, sink: Arc<dyn NumericSink>) {
        self.numeric.insert(key, sink);
    }

    pub fn bind_binary(&mut self, key: Binary, sink: Arc<dyn BooleanSink>) {
        self.binary.insert(key, sink);
    }

    pub fn bind_flag(&mut self, key: Flag, sink: Arc<dyn BooleanSink>) {
        self.flags.insert(key, sink);
    }

    pub fn bind_text(&mut self, key: Text, sink: Arc<dyn TextSink>) {
        self.text.insert(key, sink);
    }

    pub fn bind_select(&mut self, key: Select, sink: Arc<dyn EnumSink>) {
        self.selects.insert(key, sink);
    }

    /// Bind every known entity to a sink built by `make`.
    pub fn bind_all<S, F>(&mut self, mut make: F)
    where
        S: NumericSink + BooleanSink + TextSink + EnumSink + 'static,
        F: FnMut(EntityKind, &'static str) -> Arc<S>,
    {
        for &key in Numeric::ALL {
            let sink = make(self.numeric_kind(key), key.key());
            self.bind_numeric(key, sink);
        }
        for &key in Binary::ALL {
            let sink = make(EntityKind::BinarySensor, key.key());
            self.bind_binary(key, sink);
        }
        for &key in Flag::ALL {
            let sink = make(EntityKind::Switch, key.key());
            self.bind_flag(key, sink);
        }
        for &key in Text::ALL {
            let sink = make(EntityKind::Text, key.key());
            self.bind_text(key, sink);
        }
        for &key in Select::ALL {
            let sink = make(EntityKind::Select, key.key());
            self.bind_select(key, sink);
        }
    }

    pub fn publish_numeric(&mut self, key: Numeric, value: f32) {
        self.values.insert(key, value);
        if let Some(sink) = self.numeric.get(&key) {
            sink.publish(value);
        }
    }

    pub fn value(&self, key: Numeric) -> Option<f32> {
        self.values.get(&key).copied()
    }

    pub fn update_binary(&mut self, key: Binary, state: bool) {
        if let Some(sink) = self.binary.get(&key) {
            sink.update(state);
        }
    }

    pub fn update_flag(&mut self, key: Flag, state: bool) {
        self.flag_states.insert(key, state);
        if let Some(sink) = self.flags.get(&key) {
            sink.update(state);
        }
    }

    pub fn flag_state(&self, key: Flag) -> Option<bool> {
        self.flag_states.get(&key).copied()
    }

    pub fn publish_text(&mut self, key: Text, value: &str) {
        if let Some(sink) = self.text.get(&key) {
            sink.publish(value);
        }
    }

    /// Publish the label for a protocol code. An unknown code publishes
    /// "Unknown" and is reported back to the caller.
    pub fn update_select_from_code(&mut self, key: Select, code: &str) -> Result<(), ProtocolError> {
        let option = self
            .settings
            .select(key)
            .and_then(|setting| setting.option_for(code))
            .map(String::from);

        let result = match &option {
            Some(_) => Ok(()),
            None => Err(ProtocolError::UnknownCode {
                entity: key.key().to_string(),
                code: code.to_string(),
            }),
        };

        self.publish_select(key, option.as_deref().unwrap_or(UNKNOWN));
        result
    }

    pub fn publish_select(&mut self, key: Select, option: &str) {
        self.select_states.insert(key, option.to_string());
        if let Some(sink) = self.selects.get(&key) {
            sink.publish_option(option);
        }
    }

    pub fn select_state(&self, key: Select) -> Option<&str> {
        self.select_states.get(&key).map(String::as_str)
    }
}
