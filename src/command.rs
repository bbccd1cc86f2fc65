use std::fmt;

/// One wire command, without framing. Either a bare query mnemonic such as
/// `QPIGS` or a write prefix with its parameter already appended, e.g.
/// `PBEQV58.40`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Command(String);

impl Command {
    pub fn new<S: Into<String>>(command: S) -> Self {
        Self(command.into())
    }

    pub fn with_parameter(prefix: &str, parameter: &str) -> Self {
        Self(format!("{}{}", prefix, parameter))
    }

    // PE<letter> enables a flag, PD<letter> disables it
    pub fn flag(letter: char, enable: bool) -> Self {
        let prefix = if enable { "PE" } else { "PD" };
        Self(format!("{}{}", prefix, letter))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// The query this command is, if it is one. Write commands never match,
    /// their replies are ACK/NAK only.
    pub fn query(&self) -> Option<Query> {
        Query::from_mnemonic(&self.0)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Command {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<Query> for Command {
    fn from(query: Query) -> Self {
        Self::new(query.mnemonic())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Query {
    ProtocolId,
    SerialNumber,
    Status,
    Ratings,
    Mode,
    Flags,
    Warnings,
    Equalization,
}

impl Query {
    pub const ALL: [Query; 8] = [
        Query::ProtocolId,
        Query::SerialNumber,
        Query::Status,
        Query::Ratings,
        Query::Mode,
        Query::Flags,
        Query::Warnings,
        Query::Equalization,
    ];

    pub fn mnemonic(&self) -> &'static str {
        match self {
            Query::ProtocolId => "QPI",
            Query::SerialNumber => "QID",
            Query::Status => "QPIGS",
            Query::Ratings => "QPIRI",
            Query::Mode => "QMOD",
            Query::Flags => "QFLAG",
            Query::Warnings => "QPIWS",
            Query::Equalization => "QBEQI",
        }
    }

    pub fn from_mnemonic(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|q| q.mnemonic() == s)
    }
}
