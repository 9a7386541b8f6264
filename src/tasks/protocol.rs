//! PMB protocol task: validates inbound radio frames and turns them into
//! commands for the tasks that act on them.

use crate::command::{Command, CommandKind, HeartbeatOpcode, ProtocolOpcode, TaskOpcode};
use crate::config::{PROTOCOL_RX_BUFFER_SZ_BYTES, TELEMETRY_MAXIMUM_LOG_PERIOD_MS};
use crate::machines::RocketControlCommand;
use crate::protocol::messages::{
    AckNack, CommandBody, CommandMessage, ControlBody, ControlMessage, MessageId, Node, PmbCommandCode,
    SystemCommand, SystemControl,
};
use crate::protocol::{decode_body, decode_frame, ProtocolSender};
use crate::queue::CommandReceiver;
use crate::task::TaskHandle;
use tracing::{debug, info, trace, warn};

/// Tasks the protocol task forwards to.
#[derive(Debug, Clone)]
pub struct ProtocolRoutes {
    pub flight: TaskHandle,
    pub watchdog: TaskHandle,
    pub flash: TaskHandle,
    pub telemetry: TaskHandle,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolStats {
    pub frames: u32,
    pub malformed: u32,
    pub misaddressed: u32,
    pub acks_sent: u32,
}

pub struct PmbProtocolTask {
    node: Node,
    peer: Node,
    sender: ProtocolSender,
    routes: ProtocolRoutes,
    stats: ProtocolStats,
}

impl PmbProtocolTask {
    pub fn new(peer: Node, sender: ProtocolSender, routes: ProtocolRoutes) -> Self {
        Self {
            node: sender.node(),
            peer,
            sender,
            routes,
            stats: ProtocolStats::default(),
        }
    }

    pub fn stats(&self) -> ProtocolStats {
        self.stats
    }

    pub async fn run(mut self, mut rx: CommandReceiver) {
        while let Some(cmd) = rx.receive_wait().await {
            self.handle_command(cmd).await;
        }
    }

    pub async fn handle_command(&mut self, mut cmd: Command) {
        match (cmd.kind(), ProtocolOpcode::try_from(cmd.opcode())) {
            (CommandKind::Protocol, Ok(ProtocolOpcode::PacketReceived)) => match cmd.take_payload() {
                Some(payload) => self.handle_packet(payload.as_bytes()).await,
                None => debug!("ProtocolTask - packet command without a frame"),
            },
            (kind, _) => warn!("ProtocolTask - Received Unsupported Command {:?}/{}", kind, cmd.opcode()),
        }
    }

    async fn handle_packet(&mut self, raw: &[u8]) {
        let mut frame_buf = [0u8; PROTOCOL_RX_BUFFER_SZ_BYTES];
        let Some(frame_slot) = frame_buf.get_mut(..raw.len()) else {
            self.stats.malformed = self.stats.malformed.wrapping_add(1);
            return;
        };
        frame_slot.copy_from_slice(raw);

        let frame = match decode_frame(frame_slot) {
            Ok(frame) => frame,
            Err(e) => {
                self.stats.malformed = self.stats.malformed.wrapping_add(1);
                trace!("ProtocolTask - dropping frame: {}", e);
                return;
            }
        };
        self.stats.frames = self.stats.frames.wrapping_add(1);

        match frame.message_id {
            MessageId::Command => match decode_body::<CommandMessage>(frame.body) {
                Ok(msg) => self.handle_command_message(msg).await,
                Err(e) => self.malformed(e),
            },
            MessageId::Control => match decode_body::<ControlMessage>(frame.body) {
                Ok(msg) => self.handle_control_message(msg).await,
                Err(e) => self.malformed(e),
            },
            MessageId::Telemetry => {}
            MessageId::Invalid => self.stats.malformed = self.stats.malformed.wrapping_add(1),
        }
    }

    fn malformed(&mut self, err: crate::protocol::ProtocolError) {
        self.stats.malformed = self.stats.malformed.wrapping_add(1);
        trace!("ProtocolTask - dropping message: {}", err);
    }

    fn addressed_to_us(&mut self, source: Node, target: Node) -> bool {
        let ok = source == self.peer && target == self.node;
        if !ok {
            self.stats.misaddressed = self.stats.misaddressed.wrapping_add(1);
            trace!(?source, ?target, "ProtocolTask - ignoring message not addressed to us");
        }
        ok
    }

    async fn handle_command_message(&mut self, msg: CommandMessage) {
        if !self.addressed_to_us(msg.source, msg.target) {
            return;
        }
        let Some(CommandBody::Pmb(pmb)) = msg.command else {
            return;
        };

        match pmb.command_enum {
            PmbCommandCode::RscAnyToAbort => {
                info!("ProtocolTask - abort commanded by {:?}", msg.source);
                self.routes
                    .flight
                    .send_command(Command::new(CommandKind::ControlAction, RocketControlCommand::AnyToAbort))
                    .await;
            }
            PmbCommandCode::RscAbortToPreLaunch => {
                self.routes
                    .flight
                    .send_command(Command::new(CommandKind::ControlAction, RocketControlCommand::AbortToPreLaunch))
                    .await;
            }
            PmbCommandCode::None => {}
        }
    }

    async fn handle_control_message(&mut self, msg: ControlMessage) {
        if !self.addressed_to_us(msg.source, msg.target) {
            return;
        }

        match msg.body {
            Some(ControlBody::Heartbeat) => {
                self.routes
                    .watchdog
                    .send_command(Command::new(CommandKind::Heartbeat, HeartbeatOpcode::RadioHeartbeatRequest))
                    .await;
            }
            Some(ControlBody::Ping) => self.send_ack(msg.source, msg.source_sequence_num),
            Some(ControlBody::SysCtrl(ctrl)) => self.handle_system_control(ctrl).await,
            Some(ControlBody::Ack(_) | ControlBody::Nack(_) | ControlBody::SysState(_)) | None => {}
        }
    }

    fn send_ack(&mut self, source: Node, sequence: u32) {
        let ack = ControlBody::Ack(AckNack {
            acking_msg_source: source,
            acking_sequence_num: sequence,
        });
        match self.sender.send_control(self.peer, ack) {
            Ok(()) => self.stats.acks_sent = self.stats.acks_sent.wrapping_add(1),
            Err(e) => warn!("ProtocolTask - failed to send ack: {}", e),
        }
    }

    async fn handle_system_control(&mut self, ctrl: SystemControl) {
        match ctrl.sys_cmd {
            SystemCommand::FlashLogEnable => {
                self.routes
                    .flash
                    .send_command(Command::new(CommandKind::TaskSpecific, TaskOpcode::FlashLogEnable))
                    .await;
            }
            SystemCommand::FlashLogDisable => {
                self.routes
                    .flash
                    .send_command(Command::new(CommandKind::TaskSpecific, TaskOpcode::FlashLogDisable))
                    .await;
            }
            SystemCommand::Reset => crate::halt!("System reset requested!"),
            SystemCommand::CriticalFlashFullErase => {
                // Stalls the flash task until the erase completes.
                self.routes
                    .flash
                    .send_command(Command::new(CommandKind::TaskSpecific, TaskOpcode::EraseAllFlash))
                    .await;
            }
            SystemCommand::LogPeriodChange => {
                let period_ms = clamp_log_period(ctrl.cmd_param);
                self.routes
                    .telemetry
                    .send_command(Command::new(CommandKind::TelemetryChangePeriod, period_ms))
                    .await;
            }
            SystemCommand::None => {}
        }
    }
}

/// Fits a requested log period into the 16-bit opcode.
pub fn clamp_log_period(param_ms: u32) -> u16 {
    param_ms.min(TELEMETRY_MAXIMUM_LOG_PERIOD_MS) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_period_is_clamped_below_u16_max() {
        assert_eq!(clamp_log_period(70_000), 0xFFFE);
        assert_eq!(clamp_log_period(0xFFFF), 0xFFFE);
        assert_eq!(clamp_log_period(250), 250);
    }
}
