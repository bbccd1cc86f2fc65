pub use anyhow::{anyhow, bail, Result};
pub use log::{debug, error, info, trace, warn};
pub use tokio::sync::broadcast;

pub use std::str::FromStr;

pub use crate::channels::Channels;
pub use crate::command::{Command, Query};
pub use crate::config::{self, Config};
pub use crate::error::ProtocolError;
pub use crate::mqtt;
