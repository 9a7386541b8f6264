//! Watchdog task: tracks radio heartbeats and aborts the flight when the
//! link goes silent.

use crate::command::{Command, CommandKind, HeartbeatOpcode, TaskOpcode};
use crate::machines::RocketControlCommand;
use crate::protocol::messages::{ControlBody, Node};
use crate::protocol::ProtocolSender;
use crate::queue::CommandReceiver;
use crate::task::TaskHandle;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

pub struct WatchdogTask {
    timeout: Duration,
    check_period: Duration,
    last_heartbeat: Option<Instant>,
    abort_sent: bool,
    heartbeats: u32,
    flight: TaskHandle,
    peer: Node,
    sender: ProtocolSender,
}

impl WatchdogTask {
    pub fn new(
        timeout: Duration,
        check_period: Duration,
        flight: TaskHandle,
        peer: Node,
        sender: ProtocolSender,
    ) -> Self {
        Self {
            timeout,
            check_period,
            last_heartbeat: None,
            abort_sent: false,
            heartbeats: 0,
            flight,
            peer,
            sender,
        }
    }

    pub fn heartbeats(&self) -> u32 {
        self.heartbeats
    }

    pub async fn run(mut self, mut rx: CommandReceiver) {
        loop {
            match rx.receive_timeout(self.check_period).await {
                Ok(Some(cmd)) => self.handle_command(cmd, Instant::now()),
                Ok(None) => {}
                Err(_closed) => return,
            }
            self.check_heartbeat(Instant::now()).await;
        }
    }

    pub fn handle_command(&mut self, cmd: Command, now: Instant) {
        match (cmd.kind(), cmd.opcode()) {
            (CommandKind::Heartbeat, op) if op == u16::from(HeartbeatOpcode::RadioHeartbeatRequest) => {
                if self.abort_sent {
                    info!("WatchdogTask - radio heartbeat regained");
                }
                self.last_heartbeat = Some(now);
                self.abort_sent = false;
                self.heartbeats = self.heartbeats.wrapping_add(1);
            }
            (CommandKind::TaskSpecific, op) if op == u16::from(TaskOpcode::HeartbeatStatusSend) => {
                if let Err(e) = self.sender.send_control(self.peer, ControlBody::Heartbeat) {
                    warn!("WatchdogTask - failed to send heartbeat: {}", e);
                }
            }
            (kind, op) => warn!("WatchdogTask - Received Unsupported Command {:?}/{}", kind, op),
        }
    }

    /// Sends one abort per loss of the radio heartbeat. Nothing is checked
    /// until the first heartbeat has arrived.
    pub async fn check_heartbeat(&mut self, now: Instant) -> bool {
        let Some(last) = self.last_heartbeat else {
            return false;
        };
        if self.abort_sent || now.saturating_duration_since(last) < self.timeout {
            return false;
        }

        error!("WatchdogTask - radio heartbeat lost for {:?}, aborting", self.timeout);
        self.abort_sent = true;
        self.flight
            .send_command(Command::new(CommandKind::ControlAction, RocketControlCommand::AnyToAbort))
            .await
    }
}
