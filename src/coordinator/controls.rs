use super::Coordinator;
use crate::entities::{Flag, Numeric, Select};
use crate::pi30::fields::Family;
use crate::pi30::format::format_parameter;
use crate::prelude::*;
use crate::transport::Transport;

/// A change requested from outside, e.g. over MQTT.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlRequest {
    Flag(Flag, bool),
    Select(Select, String),
    Number(Numeric, f32),
    /// Sent verbatim.
    Raw(Command),
}

impl<T: Transport> Coordinator<T> {
    pub fn handle_control(&mut self, request: ControlRequest) {
        let result = match request {
            ControlRequest::Flag(flag, enable) => {
                self.set_flag(flag, enable);
                Ok(())
            }
            ControlRequest::Select(select, option) => self.select_option(select, &option),
            ControlRequest::Number(key, value) => self.control_number(key, value),
            ControlRequest::Raw(command) => {
                info!("queueing raw command {}", command);
                self.enqueue_priority(command);
                Ok(())
            }
        };

        if let Err(err) = result {
            warn!("control rejected: {}", err);
        }
    }

    /// PE/PD the flag, then read the flags back.
    pub fn set_flag(&mut self, flag: Flag, enable: bool) {
        info!("setting {} to {}", flag, enable);
        self.enqueue_priority(Command::flag(flag.letter(), enable));
        self.enqueue_priority(Query::Flags.into());
        self.entities.update_flag(flag, enable);
    }

    pub fn select_option(&mut self, key: Select, option: &str) -> Result<(), ProtocolError> {
        let setting = self
            .entities
            .settings()
            .select(key)
            .ok_or_else(|| ProtocolError::ReadOnly(key.to_string()))?;
        let prefix = setting
            .prefix
            .as_deref()
            .ok_or_else(|| ProtocolError::ReadOnly(key.to_string()))?;
        let parameter = setting
            .parameter_for(option)
            .ok_or_else(|| ProtocolError::UnknownOption {
                entity: key.to_string(),
                option: option.to_string(),
            })?;

        let command = Command::with_parameter(prefix, parameter);
        info!("setting {} to {:?} with {}", key, option, command);
        self.enqueue_priority(command);
        self.refresh(Family::of_select(key));
        self.entities.publish_select(key, option);
        Ok(())
    }

    /// Format and send a numeric write. Out of range values and values the
    /// format cannot express are rejected before anything is queued.
    pub fn control_number(&mut self, key: Numeric, value: f32) -> Result<(), ProtocolError> {
        let setting = self
            .entities
            .settings()
            .number(key)
            .ok_or_else(|| ProtocolError::ReadOnly(key.to_string()))?;

        if !setting.in_range(value) {
            return Err(ProtocolError::OutOfRange {
                entity: key.to_string(),
                value,
                min: setting.min.unwrap_or(f32::NEG_INFINITY),
                max: setting.max.unwrap_or(f32::INFINITY),
            });
        }

        let parameter = format_parameter(&setting.format, value)?;
        let command = Command::with_parameter(&setting.prefix, &parameter);
        info!("setting {} to {} with {}", key, value, command);
        self.enqueue_priority(command);
        self.refresh(Family::of_numeric(key));
        self.entities.publish_numeric(key, value);
        Ok(())
    }

    fn refresh(&mut self, family: Option<Family>) {
        if let Some(family) = family {
            self.enqueue_priority(family.query().into());
        }
    }
}
