use std::collections::HashMap;

use anyhow::{bail, Result};

use super::{Numeric, Select};
use crate::config;

/// Code/label table of an enumerated setting. Without a prefix the
/// setting can be read but not written.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectSetting {
    pub prefix: Option<String>,
    pub parameters: Vec<String>,
    pub options: Vec<String>,
}

impl SelectSetting {
    fn new(prefix: Option<&str>, table: &[(&str, &str)]) -> Self {
        Self {
            prefix: prefix.map(String::from),
            parameters: table.iter().map(|(code, _)| code.to_string()).collect(),
            options: table.iter().map(|(_, label)| label.to_string()).collect(),
        }
    }

    pub fn option_for(&self, code: &str) -> Option<&str> {
        self.parameters
            .iter()
            .position(|p| p == code)
            .and_then(|i| self.options.get(i))
            .map(String::as_str)
    }

    // several codes can share a label, the first one wins
    pub fn parameter_for(&self, option: &str) -> Option<&str> {
        self.options
            .iter()
            .position(|o| o == option)
            .and_then(|i| self.parameters.get(i))
            .map(String::as_str)
    }
}

/// How a writable number becomes a command: `<prefix><format(value)>`.
#[derive(Debug, Clone, PartialEq)]
pub struct NumberSetting {
    pub prefix: String,
    pub format: String,
    pub min: Option<f32>,
    pub max: Option<f32>,
}

impl NumberSetting {
    fn new(prefix: &str, format: &str, min: f32, max: f32) -> Self {
        Self {
            prefix: prefix.to_string(),
            format: format.to_string(),
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn in_range(&self, value: f32) -> bool {
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value <= max)
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    selects: HashMap<Select, SelectSetting>,
    numbers: HashMap<Numeric, NumberSetting>,
}

impl Default for Settings {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Settings {
    pub fn builtin() -> Self {
        let selects = [
            (
                Select::EqualizationEnable,
                SelectSetting::new(Some("PBEQE"), &[("0", "Disabled"), ("1", "Enabled")]),
            ),
            (
                Select::EqualizationActive,
                SelectSetting::new(Some("PBEQA"), &[("0", "Inactive"), ("1", "Active")]),
            ),
            (
                Select::BatteryType,
                SelectSetting::new(
                    None,
                    &[
                        ("0", "AGM"),
                        ("1", "Flooded"),
                        ("2", "User"),
                        ("3", "LIB"),
                        ("4", "LIC"),
                        ("5", "LIP"),
                        ("6", "LIL"),
                    ],
                ),
            ),
            (
                Select::InputVoltageRange,
                SelectSetting::new(None, &[("0", "Appliance"), ("1", "UPS")]),
            ),
            (
                Select::OutputSourcePriority,
                SelectSetting::new(
                    None,
                    &[
                        ("0", "Utility-Solar-Battery"),
                        ("1", "Solar-Utility-Battery"),
                        ("2", "Solar-Battery-Utility"),
                        ("3", "Solar-Battery-Utility"),
                    ],
                ),
            ),
            (
                Select::ChargerSourcePriority,
                SelectSetting::new(
                    None,
                    &[
                        ("0", "Solar first"),
                        ("1", "Solar + Utility"),
                        ("2", "Only Solar"),
                        ("3", "Solar first"),
                    ],
                ),
            ),
            (
                Select::MachineType,
                SelectSetting::new(
                    None,
                    &[("00", "Grid tie"), ("01", "Off Grid"), ("10", "Hybrid")],
                ),
            ),
            (
                Select::Topology,
                SelectSetting::new(None, &[("0", "Transformerless"), ("1", "Transformer")]),
            ),
            (
                Select::OutputMode,
                SelectSetting::new(
                    None,
                    &[
                        ("0", "Single"),
                        ("1", "Parallel"),
                        ("2", "Phase 1 of 3"),
                        ("3", "Phase 2 of 3"),
                        ("4", "Phase 3 of 3"),
                    ],
                ),
            ),
            (
                Select::PvOkCondition,
                SelectSetting::new(None, &[("0", "Any unit"), ("1", "All units")]),
            ),
            (
                Select::PvPowerBalance,
                SelectSetting::new(
                    None,
                    &[("0", "Charge current limit"), ("1", "Charge + load power")],
                ),
            ),
        ]
        .into_iter()
        .collect();

        let numbers = [
            (
                Numeric::EqualizationVoltage,
                NumberSetting::new("PBEQV", "%05.2f", 48.0, 61.0),
            ),
            (
                Numeric::EqualizationTime,
                NumberSetting::new("PBEQT", "%03d", 5.0, 900.0),
            ),
            (
                Numeric::EqualizationOverTime,
                NumberSetting::new("PBEQOT", "%03d", 5.0, 900.0),
            ),
            (
                Numeric::EqualizationPeriod,
                NumberSetting::new("PBEQP", "%03d", 0.0, 90.0),
            ),
            (
                Numeric::BatteryRechargeVoltage,
                NumberSetting::new("PBCV", "%04.1f", 42.0, 51.0),
            ),
            (
                Numeric::BatteryRedischargeVoltage,
                NumberSetting::new("PBDV", "%04.1f", 48.0, 58.0),
            ),
            (
                Numeric::MaxChargingCurrent,
                NumberSetting::new("MNCHGC", "%03d", 10.0, 120.0),
            ),
            (
                Numeric::MaxAcChargingCurrent,
                NumberSetting::new("MUCHGC", "%03d", 2.0, 100.0),
            ),
            (
                Numeric::AcOutputRatingFrequency,
                NumberSetting::new("F", "%02d", 50.0, 60.0),
            ),
            (
                Numeric::AcOutputRatingVoltage,
                NumberSetting::new("V", "%03d", 220.0, 240.0),
            ),
        ]
        .into_iter()
        .collect();

        Self { selects, numbers }
    }

    /// Built-in tables with the config file's overrides laid on top.
    pub fn from_config(
        numbers: &HashMap<String, config::Number>,
        selects: &HashMap<String, config::Select>,
    ) -> Result<Self> {
        let mut settings = Self::builtin();

        for (key, number) in numbers {
            let Some(entity) = Numeric::from_key(key) else {
                bail!("numbers.{}: unknown entity", key);
            };

            let current = settings.numbers.get(&entity);
            let prefix = number
                .prefix
                .clone()
                .or_else(|| current.map(|c| c.prefix.clone()));
            let format = number
                .format
                .clone()
                .or_else(|| current.map(|c| c.format.clone()));

            let (Some(prefix), Some(format)) = (prefix, format) else {
                bail!("numbers.{}: needs both prefix and format", key);
            };

            settings.numbers.insert(
                entity,
                NumberSetting {
                    prefix,
                    format,
                    min: number.min.or_else(|| current.and_then(|c| c.min)),
                    max: number.max.or_else(|| current.and_then(|c| c.max)),
                },
            );
        }

        for (key, select) in selects {
            let Some(entity) = Select::from_key(key) else {
                bail!("selects.{}: unknown entity", key);
            };

            let current = settings.selects.get(&entity).cloned();
            let mut setting = current.unwrap_or(SelectSetting {
                prefix: None,
                parameters: Vec::new(),
                options: Vec::new(),
            });

            if select.prefix.is_some() {
                setting.prefix = select.prefix.clone();
            }
            if let Some(parameters) = &select.parameters {
                setting.parameters = parameters.clone();
            }
            if let Some(options) = &select.options {
                setting.options = options.clone();
            }

            if setting.parameters.len() != setting.options.len() {
                bail!(
                    "selects.{}: {} parameters but {} options",
                    key,
                    setting.parameters.len(),
                    setting.options.len()
                );
            }

            settings.selects.insert(entity, setting);
        }

        Ok(settings)
    }

    pub fn select(&self, key: Select) -> Option<&SelectSetting> {
        self.selects.get(&key)
    }

    pub fn number(&self, key: Numeric) -> Option<&NumberSetting> {
        self.numbers.get(&key)
    }
}
