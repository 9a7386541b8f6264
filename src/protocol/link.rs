//! Radio link plumbing: the shared transmit path and the interrupt-side
//! frame reassembler.

use super::messages::{ControlBody, ControlMessage, MessageId, Node, TelemetryBody, TelemetryMessage};
use super::{encode_frame, ProtocolError, WriteBuffer};
use crate::command::{Command, CommandKind, Payload, ProtocolOpcode};
use crate::config::{PROTOCOL_RX_BUFFER_SZ_BYTES, PROTOCOL_TX_FRAME_SZ_BYTES};
use crate::queue::IsrSender;
use heapless::Vec;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("link is down")]
    LinkDown,
    #[error("link I/O failed: {0}")]
    Io(String),
}

/// Byte-oriented transmit side of a serial link, polled through `nb`.
pub trait Transport: Send {
    fn write(&mut self, byte: u8) -> nb::Result<(), TransportError>;

    fn flush(&mut self) -> nb::Result<(), TransportError>;
}

/// Per-byte reception errors reported by the UART.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RxError {
    #[error("framing error")]
    Framing,
    #[error("noise detected")]
    Noise,
    #[error("receiver overrun")]
    Overrun,
    #[error("parity error")]
    Parity,
}

/// Receiver of bytes delivered from interrupt context.
pub trait UartReceiver {
    fn interrupt_rx_data(&mut self, rx: Result<u8, RxError>);
}

/// Serializes and transmits outbound messages. Cloned into every task that
/// talks to the radio; all clones share one link and one sequence counter.
#[derive(Clone)]
pub struct ProtocolSender {
    node: Node,
    link: Arc<Mutex<Box<dyn Transport>>>,
    sequence: Arc<AtomicU32>,
}

impl core::fmt::Debug for ProtocolSender {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProtocolSender")
            .field("node", &self.node)
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ProtocolSender {
    pub fn new(node: Node, transport: Box<dyn Transport>) -> Self {
        Self {
            node,
            link: Arc::new(Mutex::new(transport)),
            sequence: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn node(&self) -> Node {
        self.node
    }

    pub fn next_sequence(&self) -> u32 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// Frames an already serialized body and writes it to the link. The link
    /// is held for the whole frame so concurrent senders never interleave.
    pub fn send_wire_message(&self, buffer: &WriteBuffer, message_id: MessageId) -> Result<(), ProtocolError> {
        let mut out = [0u8; PROTOCOL_TX_FRAME_SZ_BYTES];
        let frame = encode_frame(message_id, buffer.as_bytes(), &mut out)?;

        let mut link = self.link.lock().unwrap_or_else(PoisonError::into_inner);
        for &byte in frame {
            nb::block!(link.write(byte))?;
        }
        nb::block!(link.flush())?;
        trace!(?message_id, len = frame.len(), "frame sent");
        Ok(())
    }

    pub fn send_control(&self, target: Node, body: ControlBody) -> Result<(), ProtocolError> {
        let msg = ControlMessage {
            source: self.node,
            target,
            source_sequence_num: self.next_sequence(),
            body: Some(body),
        };
        let mut buffer = WriteBuffer::new();
        buffer.serialize(&msg)?;
        self.send_wire_message(&buffer, MessageId::Control)
    }

    pub fn send_telemetry(&self, target: Node, body: TelemetryBody) -> Result<(), ProtocolError> {
        let msg = TelemetryMessage {
            source: self.node,
            target,
            body: Some(body),
        };
        let mut buffer = WriteBuffer::new();
        buffer.serialize(&msg)?;
        self.send_wire_message(&buffer, MessageId::Telemetry)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LinkStats {
    pub frames_queued: u32,
    pub frames_dropped: u32,
    pub rx_errors: u32,
    pub overflows: u32,
}

/// Reassembles delimiter-terminated frames from single bytes and hands each
/// complete frame to the protocol task. Runs in interrupt context, so it only
/// ever uses the non-blocking enqueue.
#[derive(Debug)]
pub struct ProtocolRx {
    frame: Vec<u8, PROTOCOL_RX_BUFFER_SZ_BYTES>,
    overflowed: bool,
    queue: IsrSender,
    stats: LinkStats,
}

impl ProtocolRx {
    pub fn new(queue: IsrSender) -> Self {
        Self {
            frame: Vec::new(),
            overflowed: false,
            queue,
            stats: LinkStats::default(),
        }
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    fn reset(&mut self) {
        self.frame.clear();
        self.overflowed = false;
    }

    fn complete_frame(&mut self) {
        if self.overflowed {
            self.stats.overflows = self.stats.overflows.wrapping_add(1);
            self.reset();
            return;
        }
        if self.frame.is_empty() {
            return;
        }

        let queued = Payload::from_slice(&self.frame)
            .ok()
            .map(|payload| Command::with_payload(CommandKind::Protocol, ProtocolOpcode::PacketReceived, payload))
            .map(|cmd| self.queue.send_from_isr(cmd));
        match queued {
            Some(Ok(())) => self.stats.frames_queued = self.stats.frames_queued.wrapping_add(1),
            // The rejected command is dropped here, releasing the frame.
            _ => self.stats.frames_dropped = self.stats.frames_dropped.wrapping_add(1),
        }
        self.reset();
    }
}

impl UartReceiver for ProtocolRx {
    fn interrupt_rx_data(&mut self, rx: Result<u8, RxError>) {
        match rx {
            Err(_) => {
                self.stats.rx_errors = self.stats.rx_errors.wrapping_add(1);
                self.reset();
            }
            Ok(0) => self.complete_frame(),
            Ok(byte) => {
                if self.frame.push(byte).is_err() {
                    self.overflowed = true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::command_queue;

    #[test]
    fn test_complete_frame_is_queued_without_its_delimiter() {
        let (tx, mut rx) = command_queue(2);
        let mut protocol_rx = ProtocolRx::new(tx.isr_sender());

        for byte in [0x03, 0x11, 0x22, 0x00] {
            protocol_rx.interrupt_rx_data(Ok(byte));
        }

        let cmd = rx.receive().unwrap();
        assert_eq!(cmd.kind(), CommandKind::Protocol);
        assert_eq!(cmd.payload().unwrap().as_bytes(), &[0x03, 0x11, 0x22]);
        assert_eq!(protocol_rx.stats().frames_queued, 1);
    }

    #[test]
    fn test_rx_error_discards_the_partial_frame() {
        let (tx, mut rx) = command_queue(2);
        let mut protocol_rx = ProtocolRx::new(tx.isr_sender());

        protocol_rx.interrupt_rx_data(Ok(0x05));
        protocol_rx.interrupt_rx_data(Err(RxError::Noise));
        protocol_rx.interrupt_rx_data(Ok(0x02));
        protocol_rx.interrupt_rx_data(Ok(0x00));

        assert_eq!(rx.receive().unwrap().payload().unwrap().as_bytes(), &[0x02]);
        assert_eq!(protocol_rx.stats().rx_errors, 1);
    }

    #[test]
    fn test_link_counters_wrap() {
        let (tx, mut rx) = command_queue(2);
        let mut protocol_rx = ProtocolRx::new(tx.isr_sender());
        protocol_rx.stats.rx_errors = u32::MAX;
        protocol_rx.stats.frames_queued = u32::MAX;

        protocol_rx.interrupt_rx_data(Err(RxError::Overrun));
        protocol_rx.interrupt_rx_data(Ok(0x01));
        protocol_rx.interrupt_rx_data(Ok(0x00));

        assert!(rx.receive().is_some());
        assert_eq!(protocol_rx.stats().rx_errors, 0);
        assert_eq!(protocol_rx.stats().frames_queued, 0);
    }

    #[test]
    fn test_oversized_frame_is_dropped() {
        let (tx, mut rx) = command_queue(2);
        let mut protocol_rx = ProtocolRx::new(tx.isr_sender());

        for _ in 0..=PROTOCOL_RX_BUFFER_SZ_BYTES {
            protocol_rx.interrupt_rx_data(Ok(0x7F));
        }
        protocol_rx.interrupt_rx_data(Ok(0x00));

        assert!(rx.receive().is_none());
        assert_eq!(protocol_rx.stats().overflows, 1);
    }

    #[test]
    fn test_full_queue_drops_the_frame() {
        let (tx, mut rx) = command_queue(1);
        let mut protocol_rx = ProtocolRx::new(tx.isr_sender());

        for frame in [[0x02, 0x01, 0x00], [0x02, 0x02, 0x00]] {
            for byte in frame {
                protocol_rx.interrupt_rx_data(Ok(byte));
            }
        }

        assert_eq!(rx.receive().unwrap().payload().unwrap().as_bytes(), &[0x02, 0x01]);
        assert!(rx.receive().is_none());
        assert_eq!(protocol_rx.stats().frames_dropped, 1);
    }
}
