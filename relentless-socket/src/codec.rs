use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::{error::CodecError, format::Format, message::Message};

/// The default maximum length of a single frame: 8 MiB.
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 8 * 1024 * 1024;

/// Frames each [`Message`] as a 4-byte big-endian length followed by the message serialized in the
/// format `F`.
#[derive(Debug, Clone)]
pub struct MessageCodec<F> {
    format: F,
    frames: LengthDelimitedCodec,
}

impl<F: Format> MessageCodec<F> {
    /// Construct a codec which rejects frames longer than `max_frame_length`, in either direction.
    pub fn new(format: F, max_frame_length: usize) -> Self {
        MessageCodec {
            format,
            frames: LengthDelimitedCodec::builder()
                .length_field_length(4)
                .max_frame_length(max_frame_length)
                .new_codec(),
        }
    }
}

impl<F: Format> Encoder<Message> for MessageCodec<F> {
    type Error = CodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let bytes = self.format.serialize(&item).map_err(Into::into)?;
        self.frames.encode(bytes, dst)?;
        Ok(())
    }
}

impl<F: Format> Decoder for MessageCodec<F> {
    type Item = Message;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.frames.decode(src)? {
            Some(frame) => Ok(Some(self.format.deserialize(&frame).map_err(Into::into)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{format::FormatKind, message::Address};

    fn message(data: Vec<u8>) -> Message {
        Message {
            message_type: "Ping".to_string(),
            destination: Address {
                service_name: "pinger".to_string(),
            },
            data,
        }
    }

    #[test]
    fn frames_are_length_prefixed() {
        let mut codec = MessageCodec::new(FormatKind::Json, DEFAULT_MAX_FRAME_LENGTH);
        let mut buf = BytesMut::new();
        codec.encode(message(vec![7]), &mut buf).unwrap();

        let body = FormatKind::Json.serialize(&message(vec![7])).unwrap();
        assert_eq!(&buf[..4], &(body.len() as u32).to_be_bytes());
        assert_eq!(&buf[4..], &body[..]);
    }

    #[test]
    fn partial_frames_wait_for_more() {
        let mut codec = MessageCodec::new(FormatKind::Bincode, DEFAULT_MAX_FRAME_LENGTH);
        let mut encoded = BytesMut::new();
        codec.encode(message(vec![1, 2, 3]), &mut encoded).unwrap();
        codec.encode(message(vec![4]), &mut encoded).unwrap();

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encoded[..3]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&encoded[3..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(message(vec![1, 2, 3])));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(message(vec![4])));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn oversized_frames_are_rejected() {
        let mut codec = MessageCodec::new(FormatKind::Bincode, 16);
        let mut buf = BytesMut::new();
        assert!(matches!(
            codec.encode(message(vec![0; 64]), &mut buf),
            Err(CodecError::Io(_))
        ));
    }

    #[test]
    fn garbage_is_a_format_error() {
        let mut codec = MessageCodec::new(FormatKind::Json, DEFAULT_MAX_FRAME_LENGTH);
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&3u32.to_be_bytes());
        buf.extend_from_slice(b"{{{");
        assert!(matches!(codec.decode(&mut buf), Err(CodecError::Json(_))));
    }
}
