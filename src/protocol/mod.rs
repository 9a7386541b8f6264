//! Framed radio protocol.
//!
//! A frame on the wire is `COBS(postcard(Frame))` followed by a `0x00`
//! delimiter. The frame carries the message category and the postcard-encoded
//! message body, which is at most [`DEFAULT_PROTOCOL_WRITE_BUFFER_SIZE`]
//! bytes.

pub mod link;
pub mod messages;

pub use link::{LinkStats, ProtocolRx, ProtocolSender, RxError, Transport, TransportError, UartReceiver};
pub use messages::{MessageId, Node};

use crate::config::{DEFAULT_PROTOCOL_WRITE_BUFFER_SIZE, PROTOCOL_TX_FRAME_SZ_BYTES};
use arrayvec::ArrayVec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("message body exceeds {DEFAULT_PROTOCOL_WRITE_BUFFER_SIZE} bytes")]
    BodyTooLarge,
    #[error("failed to serialize message: {0}")]
    Serialize(postcard::Error),
    #[error("malformed frame: {0}")]
    MalformedFrame(postcard::Error),
    #[error("frame body does not decode as {0}")]
    MalformedBody(&'static str),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Header and body of one frame, before COBS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame<'a> {
    pub message_id: MessageId,
    #[serde(with = "serde_bytes")]
    pub body: &'a [u8],
}

/// Caller-owned serialization buffer for one outbound message body.
#[derive(Debug, Default, Clone)]
pub struct WriteBuffer {
    bytes: ArrayVec<u8, DEFAULT_PROTOCOL_WRITE_BUFFER_SIZE>,
}

impl WriteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the buffer contents with `message` serialized.
    pub fn serialize<T: Serialize>(&mut self, message: &T) -> Result<(), ProtocolError> {
        let mut scratch = [0u8; DEFAULT_PROTOCOL_WRITE_BUFFER_SIZE];
        let used = postcard::to_slice(message, &mut scratch).map_err(|e| match e {
            postcard::Error::SerializeBufferFull => ProtocolError::BodyTooLarge,
            other => ProtocolError::Serialize(other),
        })?;
        self.bytes.clear();
        self.bytes
            .try_extend_from_slice(used)
            .map_err(|_| ProtocolError::BodyTooLarge)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Frames `body` into `out`, delimiter included, and returns the used part.
pub fn encode_frame<'b>(
    message_id: MessageId,
    body: &[u8],
    out: &'b mut [u8; PROTOCOL_TX_FRAME_SZ_BYTES],
) -> Result<&'b [u8], ProtocolError> {
    if body.len() > DEFAULT_PROTOCOL_WRITE_BUFFER_SIZE {
        return Err(ProtocolError::BodyTooLarge);
    }
    let frame = Frame { message_id, body };
    let encoded: &[u8] = postcard::to_slice_cobs(&frame, out).map_err(ProtocolError::Serialize)?;
    Ok(encoded)
}

/// Decodes one COBS frame in place. `raw` must not contain the delimiter.
pub fn decode_frame(raw: &mut [u8]) -> Result<Frame<'_>, ProtocolError> {
    postcard::from_bytes_cobs(raw).map_err(ProtocolError::MalformedFrame)
}

/// Deserializes a frame body into the message type named by its category.
pub fn decode_body<'a, T: Deserialize<'a>>(body: &'a [u8]) -> Result<T, ProtocolError> {
    postcard::from_bytes(body).map_err(|_| ProtocolError::MalformedBody(core::any::type_name::<T>()))
}

#[cfg(test)]
mod tests {
    use super::messages::{ControlBody, ControlMessage};
    use super::*;

    fn ping() -> ControlMessage {
        ControlMessage {
            source: Node::Rcu,
            target: Node::Pmb,
            source_sequence_num: 7,
            body: Some(ControlBody::Ping),
        }
    }

    #[test]
    fn test_frame_has_no_interior_zeros_and_ends_with_delimiter() {
        let mut buf = WriteBuffer::new();
        buf.serialize(&ping()).unwrap();

        let mut out = [0u8; PROTOCOL_TX_FRAME_SZ_BYTES];
        let frame = encode_frame(MessageId::Control, buf.as_bytes(), &mut out).unwrap();
        let (last, body) = frame.split_last().unwrap();
        assert_eq!(*last, 0);
        assert!(body.iter().all(|&b| b != 0));
    }

    #[test]
    fn test_decoded_frame_yields_category_and_body() {
        let mut buf = WriteBuffer::new();
        buf.serialize(&ping()).unwrap();
        let mut out = [0u8; PROTOCOL_TX_FRAME_SZ_BYTES];
        let len = encode_frame(MessageId::Control, buf.as_bytes(), &mut out).unwrap().len();

        let mut raw = out[..len - 1].to_vec();
        let frame = decode_frame(&mut raw).unwrap();
        assert_eq!(frame.message_id, MessageId::Control);
        assert_eq!(decode_body::<ControlMessage>(frame.body).unwrap(), ping());
    }

    #[test]
    fn test_oversized_body_is_rejected() {
        let body = [1u8; DEFAULT_PROTOCOL_WRITE_BUFFER_SIZE + 1];
        let mut out = [0u8; PROTOCOL_TX_FRAME_SZ_BYTES];
        assert!(matches!(
            encode_frame(MessageId::Telemetry, &body, &mut out),
            Err(ProtocolError::BodyTooLarge)
        ));
    }

    #[test]
    fn test_garbage_frame_is_an_error() {
        // Valid COBS, but 9 is not a message id.
        let mut raw = [0x02, 0x09];
        assert!(decode_frame(&mut raw).is_err());
    }
}
