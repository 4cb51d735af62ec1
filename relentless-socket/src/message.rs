use serde::{Deserialize, Serialize};

use crate::{error::Error, format::Format};

/// The message type of the startup message.
pub const STARTUP_MESSAGE_TYPE: &str = "StartupData";

/// The service which receives the startup message.
pub const SYSTEM_SERVICE: &str = "system";

/// The destination of a [`Message`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    /// The name of the service the message is for.
    pub service_name: String,
}

/// An opaque envelope exchanged with the daemon. The channel never looks inside `data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// What kind of message this is, as understood by its recipient.
    pub message_type: String,
    /// Where the message is going.
    pub destination: Address,
    /// The payload, already serialized by the sender.
    pub data: Vec<u8>,
}

/// Identifies a service process to the daemon. Sent as the first message on every connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartupData {
    /// The process id of the service.
    pub pid: i64,
    /// The service's version string.
    pub version: String,
}

impl StartupData {
    /// Startup data for the current process.
    pub fn current(version: impl Into<String>) -> Self {
        StartupData {
            pid: i64::from(std::process::id()),
            version: version.into(),
        }
    }
}

impl Message {
    /// Encode `startup` in `format` as a [`Message`] of type [`STARTUP_MESSAGE_TYPE`], addressed to
    /// the [`SYSTEM_SERVICE`].
    pub fn startup<F: Format>(startup: &StartupData, format: &F) -> Result<Message, Error> {
        let data = format
            .serialize(startup)
            .map_err(|error| Error::Startup(error.into()))?;
        Ok(Message {
            message_type: STARTUP_MESSAGE_TYPE.to_string(),
            destination: Address {
                service_name: SYSTEM_SERVICE.to_string(),
            },
            data: data.to_vec(),
        })
    }

    /// Check whether this is a startup message.
    pub fn is_startup(&self) -> bool {
        self.message_type == STARTUP_MESSAGE_TYPE && self.destination.service_name == SYSTEM_SERVICE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::FormatKind;

    #[test]
    fn startup_message_is_addressed_to_the_system() {
        for format in &[FormatKind::Bincode, FormatKind::Json] {
            let startup = StartupData::current("1.2.3");
            let message = Message::startup(&startup, format).unwrap();
            assert!(message.is_startup());
            assert_eq!(message.destination.service_name, "system");
            let decoded: StartupData = format.deserialize(&message.data).unwrap();
            assert_eq!(decoded, startup);
            assert_eq!(decoded.pid, i64::from(std::process::id()));
        }
    }
}
