use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{codec::DEFAULT_MAX_FRAME_LENGTH, error::Error, format::FormatKind};

/// The default per-direction buffer of each socket connection, in messages.
pub const DEFAULT_CONNECTION_CAPACITY: usize = 16;

/// Everything needed to open a channel to a daemon over a Unix socket.
///
/// Only `socket_path` and `version` are required when deserializing; durations inside `channel`
/// are written in [`humantime`](https://docs.rs/humantime) notation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SocketConfig {
    /// The Unix socket the daemon listens on.
    pub socket_path: PathBuf,
    /// The version reported to the daemon in the startup message.
    pub version: String,
    /// The serialization format of each frame.
    #[serde(default)]
    pub format: FormatKind,
    /// The longest frame that will be sent or accepted.
    #[serde(default = "default_max_frame_length")]
    pub max_frame_length: usize,
    /// The per-direction buffer of each socket connection, in messages.
    #[serde(default = "default_connection_capacity")]
    pub connection_capacity: usize,
    /// Backoff and queueing of the channel itself.
    #[serde(default)]
    pub channel: relentless::Config,
}

fn default_max_frame_length() -> usize {
    DEFAULT_MAX_FRAME_LENGTH
}

fn default_connection_capacity() -> usize {
    DEFAULT_CONNECTION_CAPACITY
}

impl SocketConfig {
    /// A configuration with every optional setting at its default.
    pub fn new(socket_path: impl Into<PathBuf>, version: impl Into<String>) -> Self {
        SocketConfig {
            socket_path: socket_path.into(),
            version: version.into(),
            format: FormatKind::default(),
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            connection_capacity: DEFAULT_CONNECTION_CAPACITY,
            channel: relentless::Config::default(),
        }
    }

    /// Reject settings which no amount of retrying could make work.
    pub fn validate(&self) -> Result<(), Error> {
        if self.socket_path.as_os_str().is_empty() {
            return Err(Error::Config("socket path is empty".to_string()));
        }
        if self.max_frame_length == 0 || self.max_frame_length > u32::MAX as usize {
            return Err(Error::Config(format!(
                "max frame length {} does not fit a 4-byte length field",
                self.max_frame_length
            )));
        }
        if self.connection_capacity == 0 {
            return Err(Error::Config("connection capacity must be positive".to_string()));
        }
        Ok(())
    }
}
