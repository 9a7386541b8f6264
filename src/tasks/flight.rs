//! Flight task: owns the rocket state machine and reports system state.

use crate::command::{Command, CommandKind, RequestOpcode, TaskOpcode};
use crate::config::FLIGHT_TASK_BOOTUP_TELE_CYCLES;
use crate::fsm::StateId;
use crate::hardware::PersistedState;
use crate::machines::rocket::PowerSelectCtx;
use crate::machines::{RocketSm, RocketStateId};
use crate::protocol::messages::{ControlBody, Node, SystemState, SystemStatus};
use crate::protocol::ProtocolSender;
use crate::queue::CommandReceiver;
use crate::task::TaskHandle;
use tracing::{info, warn};

pub struct FlightTask {
    rsm: RocketSm,
    first_state_sent: u8,
    peer: Node,
    sender: ProtocolSender,
    flash: TaskHandle,
}

/// Picks the phase to resume in after a reset. A missing or invalid record
/// resumes in Abort.
pub fn restore_state(persisted: Option<PersistedState>) -> RocketStateId {
    match persisted.map(|p| RocketStateId::from_index(p.rocket_state)) {
        Some(RocketStateId::None) | None => RocketStateId::Abort,
        Some(state) => state,
    }
}

impl FlightTask {
    pub fn new(
        persisted: Option<PersistedState>,
        power: PowerSelectCtx,
        peer: Node,
        sender: ProtocolSender,
        flash: TaskHandle,
    ) -> Self {
        let starting = restore_state(persisted);
        info!("FlightTask - resuming in [ {} ]", starting.name());
        Self {
            rsm: RocketSm::new(starting, true, power),
            first_state_sent: 0,
            peer,
            sender,
            flash,
        }
    }

    pub fn current_state(&self) -> RocketStateId {
        self.rsm.current_state()
    }

    pub async fn run(mut self, mut rx: CommandReceiver) {
        while let Some(cmd) = rx.receive_wait().await {
            self.handle_command(cmd).await;
        }
    }

    pub async fn handle_command(&mut self, cmd: Command) {
        // Rocket state changes always arrive as control actions.
        if cmd.kind() == CommandKind::Request && cmd.opcode() == u16::from(RequestOpcode::TransmitState) {
            self.send_rocket_state();
            return;
        }

        let before = self.rsm.current_state();
        let after = self.rsm.handle_command(&cmd);
        if after != before {
            self.persist(after).await;
        }
    }

    /// Boot reports first: one `UncaughtReset`, then `BootupComplete` until
    /// the boot cycles are used up, then `NormalOperation`.
    fn next_system_status(&mut self) -> SystemStatus {
        if self.first_state_sent >= FLIGHT_TASK_BOOTUP_TELE_CYCLES {
            return SystemStatus::NormalOperation;
        }
        let status = if self.first_state_sent < 1 {
            SystemStatus::UncaughtReset
        } else {
            SystemStatus::BootupComplete
        };
        self.first_state_sent += 1;
        status
    }

    fn send_rocket_state(&mut self) {
        let report = SystemState {
            sys_state: self.next_system_status(),
            rocket_state: self.rsm.rocket_state_as_proto(),
        };
        if let Err(e) = self.sender.send_control(self.peer, ControlBody::SysState(report)) {
            warn!("FlightTask - failed to send rocket state: {}", e);
        }
    }

    async fn persist(&mut self, state: RocketStateId) {
        let record = PersistedState {
            rocket_state: state.index() as u8,
        };
        match Command::with_data(CommandKind::TaskSpecific, TaskOpcode::WriteSystemState, &record) {
            Ok(cmd) => {
                self.flash.send_command(cmd).await;
            }
            Err(e) => warn!("FlightTask - failed to build state record: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_or_invalid_record_resumes_in_abort() {
        assert_eq!(restore_state(None), RocketStateId::Abort);
        assert_eq!(restore_state(Some(PersistedState { rocket_state: 42 })), RocketStateId::Abort);
        assert_eq!(restore_state(Some(PersistedState { rocket_state: 1 })), RocketStateId::Arm);
    }
}
