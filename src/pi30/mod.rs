pub mod bits;
pub mod fields;
pub mod format;
pub mod frame;

/// Payload of a successful write command.
pub const ACK: &str = "ACK";
/// Payload of a rejected write command. Treated like ACK: the cycle just ends.
pub const NAK: &str = "NAK";
