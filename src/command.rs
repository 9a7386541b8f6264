//! Commands exchanged between tasks.
//!
//! A [`Command`] is a kind, a 16-bit sub-opcode whose meaning is scoped to the
//! kind and the receiving task, and an optional bounded [`Payload`]. Payloads
//! are move-only: whoever owns the command when it is dropped releases the
//! payload, so a command that is ignored, rejected by a full queue or handled
//! to completion is released exactly once.

use crate::config::MAX_COMMAND_PAYLOAD_BYTES;
use heapless::Vec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level command category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    /// Ask a task to do something (sample, transmit).
    Request,
    /// Deliver a data sample in the payload.
    Data,
    /// Opcode meaning defined by the receiving task alone.
    TaskSpecific,
    /// Flight control action, opcode is a `RocketControlCommand`.
    ControlAction,
    Heartbeat,
    /// Opcode is the new telemetry period in milliseconds.
    TelemetryChangePeriod,
    /// Raw protocol traffic for the protocol task.
    Protocol,
}

/// Declares a `u16` opcode enum with lossless conversions both ways.
macro_rules! opcode_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($(#[$vmeta:meta])* $variant:ident = $value:expr,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u16)]
        pub enum $name {
            $($(#[$vmeta])* $variant = $value,)+
        }

        impl From<$name> for u16 {
            fn from(op: $name) -> u16 {
                op as u16
            }
        }

        impl TryFrom<u16> for $name {
            type Error = u16;

            fn try_from(value: u16) -> Result<Self, Self::Error> {
                match value {
                    $(v if v == $value => Ok($name::$variant),)+
                    other => Err(other),
                }
            }
        }
    };
}
pub(crate) use opcode_enum;

opcode_enum! {
    /// Sub-opcodes of [`CommandKind::Request`].
    pub enum RequestOpcode {
        TransmitState = 1,
        NewSample = 2,
    }
}

opcode_enum! {
    /// Sub-opcodes of [`CommandKind::Data`].
    pub enum DataOpcode {
        BmsUpdate = 1,
        ChargerUpdate = 2,
        FuelGaugeUpdate = 3,
    }
}

opcode_enum! {
    /// Sub-opcodes of [`CommandKind::TaskSpecific`].
    pub enum TaskOpcode {
        /// Erases the whole flash; the flash task stalls until it completes.
        EraseAllFlash = 1,
        /// Payload is a `PersistedState`.
        WriteSystemState = 2,
        FlashLogEnable = 3,
        FlashLogDisable = 4,
        HeartbeatStatusSend = 5,
    }
}

opcode_enum! {
    /// Sub-opcodes of [`CommandKind::Heartbeat`].
    pub enum HeartbeatOpcode {
        RadioHeartbeatRequest = 1,
    }
}

opcode_enum! {
    /// Sub-opcodes of [`CommandKind::Protocol`].
    pub enum ProtocolOpcode {
        /// Payload is one COBS-encoded frame without its delimiter.
        PacketReceived = 1,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("payload of {0} bytes exceeds the {MAX_COMMAND_PAYLOAD_BYTES} byte limit")]
    TooLarge(usize),
    #[error("command carries no payload")]
    Missing,
    #[error("payload encoding failed")]
    Encode,
    #[error("payload does not decode as the expected type")]
    Decode,
}

/// Bounded, move-only byte buffer owned by a command.
#[derive(Debug, PartialEq, Eq)]
pub struct Payload(Vec<u8, MAX_COMMAND_PAYLOAD_BYTES>);

impl Payload {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, PayloadError> {
        Vec::from_slice(bytes)
            .map(Payload)
            .map_err(|()| PayloadError::TooLarge(bytes.len()))
    }

    /// Serializes a typed value into a new payload.
    pub fn encode<T: Serialize>(value: &T) -> Result<Self, PayloadError> {
        let mut buf = [0u8; MAX_COMMAND_PAYLOAD_BYTES];
        let used = postcard::to_slice(value, &mut buf).map_err(|_| PayloadError::Encode)?;
        Self::from_slice(used)
    }

    /// Copies the payload out into a typed value.
    pub fn decode<'a, T: Deserialize<'a>>(&'a self) -> Result<T, PayloadError> {
        postcard::from_bytes(&self.0).map_err(|_| PayloadError::Decode)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A typed, optionally payload-bearing message between tasks.
#[derive(Debug)]
pub struct Command {
    kind: CommandKind,
    opcode: u16,
    payload: Option<Payload>,
}

impl Command {
    pub fn new(kind: CommandKind, opcode: impl Into<u16>) -> Self {
        Self {
            kind,
            opcode: opcode.into(),
            payload: None,
        }
    }

    pub fn with_payload(kind: CommandKind, opcode: impl Into<u16>, payload: Payload) -> Self {
        Self {
            kind,
            opcode: opcode.into(),
            payload: Some(payload),
        }
    }

    /// Builds a command whose payload is `data` serialized.
    pub fn with_data<T: Serialize>(
        kind: CommandKind,
        opcode: impl Into<u16>,
        data: &T,
    ) -> Result<Self, PayloadError> {
        Ok(Self::with_payload(kind, opcode, Payload::encode(data)?))
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn opcode(&self) -> u16 {
        self.opcode
    }

    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    /// Moves the payload out, leaving the command without one.
    pub fn take_payload(&mut self) -> Option<Payload> {
        self.payload.take()
    }

    /// Decodes the payload into a typed value.
    pub fn copy_data<'a, T: Deserialize<'a>>(&'a self) -> Result<T, PayloadError> {
        self.payload
            .as_ref()
            .ok_or(PayloadError::Missing)?
            .decode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        voltage_mv: u16,
        current_ma: i32,
    }

    #[test]
    fn test_opcode_conversion_rejects_unknown_values() {
        assert_eq!(DataOpcode::try_from(2), Ok(DataOpcode::ChargerUpdate));
        assert_eq!(DataOpcode::try_from(99), Err(99));
        assert_eq!(u16::from(TaskOpcode::EraseAllFlash), 1);
    }

    #[test]
    fn test_typed_data_survives_the_payload() {
        let sample = Sample { voltage_mv: 3700, current_ma: -450 };
        let cmd = Command::with_data(CommandKind::Data, DataOpcode::BmsUpdate, &sample).unwrap();
        assert_eq!(cmd.kind(), CommandKind::Data);
        assert_eq!(cmd.copy_data::<Sample>().unwrap(), sample);
    }

    #[test]
    fn test_oversized_payload_is_rejected() {
        let bytes = [0xAAu8; MAX_COMMAND_PAYLOAD_BYTES + 1];
        assert_eq!(
            Payload::from_slice(&bytes),
            Err(PayloadError::TooLarge(MAX_COMMAND_PAYLOAD_BYTES + 1))
        );
    }

    #[test]
    fn test_missing_payload_reports_missing() {
        let cmd = Command::new(CommandKind::Data, DataOpcode::BmsUpdate);
        assert_eq!(cmd.copy_data::<Sample>(), Err(PayloadError::Missing));
    }

    #[test]
    fn test_take_payload_leaves_command_empty() {
        let payload = Payload::from_slice(&[1, 2, 3]).unwrap();
        let mut cmd = Command::with_payload(CommandKind::Protocol, ProtocolOpcode::PacketReceived, payload);
        assert_eq!(cmd.take_payload().map(|p| p.len()), Some(3));
        assert!(cmd.payload().is_none());
    }
}
