use crate::command::Query;
use crate::entities::{Numeric, Select, Text};
use crate::error::ProtocolError;

pub const DELIMITER: char = ' ';

/// Split a payload into fields. A trailing delimiter does not produce an
/// empty last field, but empty fields in the middle are kept so positions
/// stay aligned.
pub fn split_fields(payload: &str) -> Vec<String> {
    let mut fields: Vec<String> = payload.split(DELIMITER).map(String::from).collect();
    if fields.last().map_or(false, |f| f.is_empty()) {
        fields.pop();
    }
    fields
}

/// Whole string must be a finite number, no surrounding junk. `inf` and
/// `NaN` are rejected like any other non-number.
pub fn parse_number(field: &str) -> Result<f32, ProtocolError> {
    match field.parse::<f32>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(ProtocolError::FieldParse {
            value: field.to_string(),
        }),
    }
}

/// Where one field of a multi-field reply ends up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldTarget {
    Numeric(Numeric),
    /// published as `value * factor`
    Scaled(Numeric, f32),
    Text(Text),
    Select(Select),
    StatusBits,
    SecondaryBits,
}

use self::FieldTarget as F;

const STATUS_FIELDS: [FieldTarget; 21] = [
    F::Numeric(Numeric::GridVoltage),
    F::Numeric(Numeric::GridFrequency),
    F::Numeric(Numeric::AcOutputVoltage),
    F::Numeric(Numeric::AcOutputFrequency),
    F::Numeric(Numeric::OutputApparentPower),
    F::Numeric(Numeric::OutputActivePower),
    F::Numeric(Numeric::OutputLoadPercent),
    F::Numeric(Numeric::BusVoltage),
    F::Numeric(Numeric::BatteryVoltage),
    F::Numeric(Numeric::BatteryChargingCurrent),
    F::Numeric(Numeric::BatteryCapacity),
    F::Numeric(Numeric::InverterTemperature),
    F::Numeric(Numeric::PvInputCurrent),
    F::Numeric(Numeric::PvInputVoltage),
    F::Numeric(Numeric::BatteryVoltageFromScc),
    F::Numeric(Numeric::BatteryDischargeCurrent),
    F::StatusBits,
    F::Scaled(Numeric::FanOnVoltageOffset, 0.01),
    F::Text(Text::EepromVersion),
    F::Numeric(Numeric::PvChargingPower),
    F::SecondaryBits,
];

const RATINGS_FIELDS: [FieldTarget; 28] = [
    F::Numeric(Numeric::GridRatingVoltage),
    F::Numeric(Numeric::GridRatingCurrent),
    F::Numeric(Numeric::AcOutputRatingVoltage),
    F::Numeric(Numeric::AcOutputRatingFrequency),
    F::Numeric(Numeric::AcOutputRatingCurrent),
    F::Numeric(Numeric::AcOutputApparentPower),
    F::Numeric(Numeric::AcOutputActivePower),
    F::Numeric(Numeric::BatteryRatingVoltage),
    F::Numeric(Numeric::BatteryRechargeVoltage),
    F::Numeric(Numeric::BatteryUndervoltage),
    F::Numeric(Numeric::BatteryBulkVoltage),
    F::Numeric(Numeric::BatteryFloatVoltage),
    F::Select(Select::BatteryType),
    F::Numeric(Numeric::MaxAcChargingCurrent),
    F::Numeric(Numeric::MaxChargingCurrent),
    F::Select(Select::InputVoltageRange),
    F::Select(Select::OutputSourcePriority),
    F::Select(Select::ChargerSourcePriority),
    F::Numeric(Numeric::ParallelMaxNumber),
    F::Select(Select::MachineType),
    F::Select(Select::Topology),
    F::Select(Select::OutputMode),
    F::Numeric(Numeric::BatteryRedischargeVoltage),
    F::Select(Select::PvOkCondition),
    F::Select(Select::PvPowerBalance),
    F::Numeric(Numeric::UnlabeledRating),
    F::Numeric(Numeric::GridTieCurrent),
    F::Numeric(Numeric::OperationLogic),
];

// positions 4 and 6 are not used
const EQUALIZATION_FIELDS: [Option<FieldTarget>; 10] = [
    Some(F::Select(Select::EqualizationEnable)),
    Some(F::Numeric(Numeric::EqualizationTime)),
    Some(F::Numeric(Numeric::EqualizationPeriod)),
    Some(F::Numeric(Numeric::EqualizationMaxCurrent)),
    None,
    Some(F::Numeric(Numeric::EqualizationVoltage)),
    None,
    Some(F::Numeric(Numeric::EqualizationOverTime)),
    Some(F::Select(Select::EqualizationActive)),
    Some(F::Numeric(Numeric::EqualizationElapsedTime)),
];

/// The three replies that are published one field per step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Status,
    Ratings,
    Equalization,
}

impl Family {
    pub const ALL: [Family; 3] = [Family::Status, Family::Ratings, Family::Equalization];

    pub fn from_query(query: Query) -> Option<Self> {
        match query {
            Query::Status => Some(Family::Status),
            Query::Ratings => Some(Family::Ratings),
            Query::Equalization => Some(Family::Equalization),
            _ => None,
        }
    }

    pub fn query(&self) -> Query {
        match self {
            Family::Status => Query::Status,
            Family::Ratings => Query::Ratings,
            Family::Equalization => Query::Equalization,
        }
    }

    pub fn name(&self) -> &'static str {
        self.query().mnemonic()
    }

    /// Replies with fewer fields are dropped whole. Only the status reply
    /// has a minimum.
    pub fn min_fields(&self) -> usize {
        match self {
            Family::Status => STATUS_FIELDS.len(),
            Family::Ratings | Family::Equalization => 0,
        }
    }

    /// How many steps a reply with `found` fields takes to publish.
    pub fn width(&self, found: usize) -> usize {
        match self {
            Family::Status => STATUS_FIELDS.len(),
            Family::Ratings | Family::Equalization => found,
        }
    }

    pub fn target(&self, index: usize) -> Option<FieldTarget> {
        match self {
            Family::Status => STATUS_FIELDS.get(index).copied(),
            Family::Ratings => RATINGS_FIELDS.get(index).copied(),
            Family::Equalization => EQUALIZATION_FIELDS.get(index).copied().flatten(),
        }
    }

    fn targets(&self) -> impl Iterator<Item = FieldTarget> + '_ {
        let len = match self {
            Family::Status => STATUS_FIELDS.len(),
            Family::Ratings => RATINGS_FIELDS.len(),
            Family::Equalization => EQUALIZATION_FIELDS.len(),
        };
        (0..len).filter_map(move |i| self.target(i))
    }

    /// The reply that carries a numeric entity, used to read back a write.
    pub fn of_numeric(key: Numeric) -> Option<Self> {
        Self::ALL.into_iter().find(|family| {
            family
                .targets()
                .any(|t| matches!(t, F::Numeric(k) | F::Scaled(k, _) if k == key))
        })
    }

    pub fn of_select(key: Select) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|family| family.targets().any(|t| t == F::Select(key)))
    }
}

/// Resumable position in one reply. Loading a new reply restarts it; each
/// call to `next` hands out exactly one field until the reply is used up.
#[derive(Debug, Clone)]
pub struct ChunkCursor {
    family: Family,
    fields: Vec<String>,
    index: usize,
    width: usize,
    ready: bool,
}

impl ChunkCursor {
    pub fn new(family: Family) -> Self {
        Self {
            family,
            fields: Vec::new(),
            index: 0,
            width: 0,
            ready: false,
        }
    }

    pub fn family(&self) -> Family {
        self.family
    }

    pub fn load(&mut self, payload: &str) -> Result<(), ProtocolError> {
        self.fields = split_fields(payload);
        self.index = 0;
        self.width = self.family.width(self.fields.len());

        let required = self.family.min_fields();
        if self.fields.len() < required {
            self.ready = false;
            return Err(ProtocolError::FieldCount {
                family: self.family.name(),
                found: self.fields.len(),
                required,
            });
        }

        self.ready = self.width > 0;
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.ready
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// The next position and its raw field, if the reply had one there.
    pub fn next(&mut self) -> Option<(usize, Option<&str>)> {
        if !self.ready {
            return None;
        }

        let index = self.index;
        self.index += 1;
        if self.index >= self.width {
            self.ready = false;
        }

        Some((index, self.fields.get(index).map(String::as_str)))
    }
}
