use crate::backoff::Backoff;

/// The default capacity of the outbound and inbound queues of a
/// [`RelentlessChannel`](crate::RelentlessChannel).
pub const DEFAULT_QUEUE_CAPACITY: usize = 128;

/// The default number of unobserved connection errors retained for
/// [`next_error`](crate::RelentlessChannel::next_error).
pub const DEFAULT_ERRORS_CAPACITY: usize = 16;

/// Tunable parameters of a [`RelentlessChannel`](crate::RelentlessChannel).
///
/// With the `serde` feature enabled, this can be deserialized from any format serde supports, with
/// durations written in [`humantime`](https://docs.rs/humantime) notation (`"1s"`, `"250ms"`) and
/// every field optional.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default, deny_unknown_fields)
)]
pub struct Config {
    /// Pacing of reconnection after a connection that had completed its handshake fails.
    pub backoff: Backoff,
    /// Pacing of reconnection after a connection fails before its handshake completes.
    pub handshake_backoff: Backoff,
    /// Capacity of the outbound queue; `None` for unbounded. When bounded and full,
    /// [`send`](crate::RelentlessChannel::send) waits.
    pub outbound_capacity: Option<usize>,
    /// Capacity of the inbound queue; `None` for unbounded. When bounded and full, the channel
    /// stops reading from its current connection until there is room.
    pub inbound_capacity: Option<usize>,
    /// How many connection errors are kept for observation before further ones are dropped.
    pub errors_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            backoff: Backoff::default(),
            handshake_backoff: Backoff::default(),
            outbound_capacity: Some(DEFAULT_QUEUE_CAPACITY),
            inbound_capacity: Some(DEFAULT_QUEUE_CAPACITY),
            errors_capacity: DEFAULT_ERRORS_CAPACITY,
        }
    }
}

#[cfg(all(test, feature = "serde"))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn deserialize_partial_with_humantime() {
        let config: Config = serde_json::from_str(
            r#"{
                "backoff": { "initial_delay": "250ms", "max_delay": "30s" },
                "outbound_capacity": null
            }"#,
        )
        .unwrap();
        assert_eq!(config.backoff.initial(), Duration::from_millis(250));
        assert_eq!(config.backoff.cap(), Duration::from_secs(30));
        assert_eq!(config.outbound_capacity, None);
        assert_eq!(config.inbound_capacity, Some(DEFAULT_QUEUE_CAPACITY));
        assert_eq!(config.handshake_backoff, Config::default().handshake_backoff);
    }

    #[test]
    fn unknown_fields_rejected() {
        assert!(serde_json::from_str::<Config>(r#"{ "retries": 3 }"#).is_err());
    }
}
