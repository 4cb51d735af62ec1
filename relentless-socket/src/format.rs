//! Serialization formats for the payloads carried inside each frame.
//!
//! The currently supported formats are:
//!
//! - [`Bincode`], via the [`bincode`] crate (the default)
//! - [`Json`], via the [`serde_json`] crate
//!
//! [`FormatKind`] selects between them at runtime, e.g. from a configuration file.

use bytes::Bytes;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::CodecError;

/// A serialization format: an object which can serialize any [`Serialize`] value to bytes, and
/// deserialize any owned [`Deserialize`] value from bytes.
pub trait Format {
    /// The type of errors during serialization or deserialization.
    type Error: Into<CodecError>;

    /// Serialize a reference to any [`Serialize`] value.
    fn serialize<T: Serialize>(&self, item: &T) -> Result<Bytes, Self::Error>;

    /// Deserialize any owned [`Deserialize`] value.
    fn deserialize<T: DeserializeOwned>(&self, src: &[u8]) -> Result<T, Self::Error>;
}

/// The [Bincode](bincode) binary serialization format.
///
/// To construct with default options, use `Bincode::default()`. To configure custom options, use
/// the Bincode crate's [`bincode::Options`] builder, then the [`.into()`](Into::into) method to
/// construct a [`Bincode`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Bincode<O: bincode::Options = bincode::DefaultOptions>(O);

impl<O: bincode::Options> From<O> for Bincode<O> {
    fn from(o: O) -> Self {
        Bincode(o)
    }
}

impl<O: bincode::Options + Clone> Format for Bincode<O> {
    type Error = bincode::Error;

    fn serialize<T: Serialize>(&self, item: &T) -> Result<Bytes, Self::Error> {
        self.0.clone().serialize(item).map(Into::into)
    }

    fn deserialize<T: DeserializeOwned>(&self, src: &[u8]) -> Result<T, Self::Error> {
        self.0.clone().deserialize(src)
    }
}

/// The [JSON](serde_json) serialization format.
#[derive(Debug, Clone, Copy, Default)]
pub struct Json {
    pretty: bool,
}

impl Json {
    /// Construct a new `Json` serialization format.
    pub fn new() -> Self {
        Json::default()
    }

    /// Construct a new `Json` serialization format which pretty-formats its output. Frames are
    /// length-delimited, so the embedded newlines are harmless.
    pub fn pretty() -> Self {
        Json { pretty: true }
    }
}

impl Format for Json {
    type Error = serde_json::Error;

    fn serialize<T: Serialize>(&self, item: &T) -> Result<Bytes, Self::Error> {
        let bytes = if self.pretty {
            serde_json::to_vec_pretty(item)?
        } else {
            serde_json::to_vec(item)?
        };
        Ok(bytes.into())
    }

    fn deserialize<T: DeserializeOwned>(&self, src: &[u8]) -> Result<T, Self::Error> {
        serde_json::from_slice(src)
    }
}

/// A runtime choice of [`Format`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatKind {
    /// [`Bincode`] with default options.
    Bincode,
    /// Compact [`Json`].
    Json,
}

impl Default for FormatKind {
    fn default() -> Self {
        FormatKind::Bincode
    }
}

impl Format for FormatKind {
    type Error = CodecError;

    fn serialize<T: Serialize>(&self, item: &T) -> Result<Bytes, Self::Error> {
        Ok(match self {
            FormatKind::Bincode => <Bincode>::default().serialize(item)?,
            FormatKind::Json => Json::new().serialize(item)?,
        })
    }

    fn deserialize<T: DeserializeOwned>(&self, src: &[u8]) -> Result<T, Self::Error> {
        Ok(match self {
            FormatKind::Bincode => <Bincode>::default().deserialize(src)?,
            FormatKind::Json => Json::new().deserialize(src)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn formats_disagree_on_the_wire() {
        let value: BTreeMap<String, u32> = vec![("a".to_string(), 1)].into_iter().collect();
        let bincode = Format::serialize(&FormatKind::Bincode, &value).unwrap();
        let json = Format::serialize(&FormatKind::Json, &value).unwrap();
        assert_eq!(&json[..], br#"{"a":1}"#);
        assert_ne!(bincode, json);
        assert_eq!(
            FormatKind::Bincode
                .deserialize::<BTreeMap<String, u32>>(&bincode)
                .unwrap(),
            value
        );
        assert!(FormatKind::Json
            .deserialize::<BTreeMap<String, u32>>(&bincode)
            .is_err());
    }

    #[test]
    fn pretty_json_reads_back() {
        let bytes = Json::pretty().serialize(&vec![1, 2, 3]).unwrap();
        assert!(bytes.contains(&b'\n'));
        assert_eq!(Json::new().deserialize::<Vec<u8>>(&bytes).unwrap(), [1, 2, 3]);
    }

    #[test]
    fn kind_names() {
        assert_eq!(
            serde_json::from_str::<FormatKind>(r#""json""#).unwrap(),
            FormatKind::Json
        );
        assert_eq!(FormatKind::default(), FormatKind::Bincode);
    }
}
