use thiserror::Error;

/// Everything that can go wrong between sending a command and publishing
/// the decoded reply. None of these are fatal; the coordinator logs them
/// and carries on from Idle.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("checksum mismatch: received {received:#06x}, calculated {calculated:#06x}")]
    Framing { received: u16, calculated: u16 },

    #[error("frame too short ({0} bytes)")]
    ShortFrame(usize),

    #[error("frame exceeded {limit} bytes without a terminator, discarded")]
    Oversize { limit: usize },

    #[error("no reply to {command} within {timeout_ms}ms")]
    Timeout { command: String, timeout_ms: u64 },

    #[error("{family} payload has {found} fields, need at least {required}")]
    FieldCount {
        family: &'static str,
        found: usize,
        required: usize,
    },

    #[error("field {value:?} is not a number")]
    FieldParse { value: String },

    #[error("unknown code {code:?} for {entity}")]
    UnknownCode { entity: String, code: String },

    #[error("cannot format {value} with {format:?}: {reason}")]
    Format {
        format: String,
        value: f32,
        reason: String,
    },

    #[error("{option:?} is not an option of {entity}")]
    UnknownOption { entity: String, option: String },

    #[error("{value} is outside {min}..={max} for {entity}")]
    OutOfRange {
        entity: String,
        value: f32,
        min: f32,
        max: f32,
    },

    #[error("{0} has no write command")]
    ReadOnly(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
