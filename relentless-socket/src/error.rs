use relentless::ConnectionError;
use std::io;
use thiserror::Error;

/// An error opening a socket channel. Both kinds are programmer errors: retrying cannot fix them.
#[derive(Debug, Error)]
pub enum Error {
    /// The startup message could not be encoded.
    #[error("unable to encode startup data: {0}")]
    Startup(#[source] CodecError),
    /// The configuration is unusable.
    #[error("invalid socket configuration: {0}")]
    Config(String),
}

/// An error encoding or decoding a framed [`Message`](crate::Message).
#[derive(Debug, Error)]
pub enum CodecError {
    /// The underlying framing failed: an I/O error, or a frame longer than the maximum length.
    #[error("framing error: {0}")]
    Io(#[from] io::Error),
    /// The [`Bincode`](crate::format::Bincode) format failed.
    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
    /// The [`Json`](crate::format::Json) format failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<CodecError> for ConnectionError {
    fn from(error: CodecError) -> Self {
        match error {
            CodecError::Io(error) => ConnectionError::Io(error),
            other => ConnectionError::transport(other),
        }
    }
}
