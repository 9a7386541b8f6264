//! Rocket flight-phase state machine.

use crate::command::{opcode_enum, Command, CommandKind};
use crate::fsm::{MachineState, StateId, StateMachine, TransitionStats};
use crate::hardware::PowerSelect;
use crate::protocol::messages::RocketState as ProtoRocketState;
use tracing::{info, warn};

const STATE_COUNT: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RocketStateId {
    PreLaunch,
    Arm,
    Launch,
    Burn,
    Coast,
    Descent,
    Recovery,
    Abort,
    /// Invalid, must be last.
    None,
}

impl StateId for RocketStateId {
    const COUNT: usize = STATE_COUNT;

    fn index(self) -> usize {
        self as usize
    }

    fn name(self) -> &'static str {
        match self {
            RocketStateId::PreLaunch => "PreLaunch",
            RocketStateId::Arm => "Arm",
            RocketStateId::Launch => "Launch",
            RocketStateId::Burn => "Burn",
            RocketStateId::Coast => "Coast",
            RocketStateId::Descent => "Descent",
            RocketStateId::Recovery => "Recovery",
            RocketStateId::Abort => "Abort",
            RocketStateId::None => "None",
        }
    }
}

impl RocketStateId {
    const ALL: [RocketStateId; STATE_COUNT] = [
        RocketStateId::PreLaunch,
        RocketStateId::Arm,
        RocketStateId::Launch,
        RocketStateId::Burn,
        RocketStateId::Coast,
        RocketStateId::Descent,
        RocketStateId::Recovery,
        RocketStateId::Abort,
    ];

    /// Maps a persisted raw index back to a state; anything out of range is `None`.
    pub fn from_index(raw: u8) -> RocketStateId {
        Self::ALL.get(usize::from(raw)).copied().unwrap_or(RocketStateId::None)
    }
}

opcode_enum! {
    /// Sub-opcodes of `CommandKind::ControlAction`.
    pub enum RocketControlCommand {
        AnyToAbort = 1,
        AbortToPreLaunch = 2,
        PreLaunchToArm = 3,
        ArmToPreLaunch = 4,
        ArmToLaunch = 5,
        LaunchToBurn = 6,
        BurnToCoast = 7,
        CoastToDescent = 8,
        DescentToRecovery = 9,
    }
}

pub type PowerSelectCtx = Box<dyn PowerSelect>;

/// One flight phase. Phases carry no data of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RocketState(RocketStateId);

impl RocketState {
    /// Next phase for a control action received in this phase.
    pub fn handle_control(&self, action: RocketControlCommand) -> RocketStateId {
        use RocketControlCommand as C;
        use RocketStateId as S;

        match (self.0, action) {
            (_, C::AnyToAbort) => S::Abort,
            (S::Abort, C::AbortToPreLaunch) => S::PreLaunch,
            (S::PreLaunch, C::PreLaunchToArm) => S::Arm,
            (S::Arm, C::ArmToPreLaunch) => S::PreLaunch,
            (S::Arm, C::ArmToLaunch) => S::Launch,
            (S::Launch, C::LaunchToBurn) => S::Burn,
            (S::Burn, C::BurnToCoast) => S::Coast,
            (S::Coast, C::CoastToDescent) => S::Descent,
            (S::Descent, C::DescentToRecovery) => S::Recovery,
            (current, action) => {
                warn!("RocketSM - {:?} not valid in [ {} ]", action, current.name());
                current
            }
        }
    }
}

impl MachineState for RocketState {
    type Id = RocketStateId;
    type Context = PowerSelectCtx;

    fn id(&self) -> RocketStateId {
        self.0
    }

    fn on_enter(&mut self, power: &mut PowerSelectCtx) {
        match self.0 {
            RocketStateId::PreLaunch => power.select_umbilical(),
            RocketStateId::Arm => power.select_internal(),
            RocketStateId::Abort => info!("RocketSM - entered Abort, awaiting operator reset"),
            _ => {}
        }
    }

    fn on_exit(&mut self, _power: &mut PowerSelectCtx) {}
}

pub struct RocketSm {
    sm: StateMachine<RocketState, STATE_COUNT>,
}

impl RocketSm {
    /// Halts if `starting` is not a real state.
    pub fn new(starting: RocketStateId, enter_starting: bool, power: PowerSelectCtx) -> Self {
        let states = RocketStateId::ALL.map(RocketState);
        Self {
            sm: StateMachine::new("ROCKET", states, starting, enter_starting, power),
        }
    }

    /// Applies a `ControlAction` command. Everything else is ignored.
    pub fn handle_command(&mut self, cmd: &Command) -> RocketStateId {
        if cmd.kind() != CommandKind::ControlAction {
            warn!("RocketSM - Received Unsupported Command {:?}", cmd.kind());
            return self.current_state();
        }
        match RocketControlCommand::try_from(cmd.opcode()) {
            Ok(action) => self.sm.dispatch(|state, _| state.handle_control(action)),
            Err(opcode) => {
                warn!("RocketSM - Unknown control action: {}", opcode);
                self.current_state()
            }
        }
    }

    pub fn transition_state(&mut self, next: RocketStateId) -> RocketStateId {
        self.sm.transition_state(next)
    }

    pub fn current_state(&self) -> RocketStateId {
        self.sm.current_state()
    }

    pub fn power_is_internal(&self) -> bool {
        self.sm.context().is_internal()
    }

    pub fn stats(&self) -> &TransitionStats<STATE_COUNT> {
        self.sm.stats()
    }

    pub fn rocket_state_as_proto(&self) -> ProtoRocketState {
        match self.current_state() {
            RocketStateId::PreLaunch => ProtoRocketState::RsPreLaunch,
            RocketStateId::Arm => ProtoRocketState::RsArm,
            RocketStateId::Launch => ProtoRocketState::RsLaunch,
            RocketStateId::Burn => ProtoRocketState::RsBurn,
            RocketStateId::Coast => ProtoRocketState::RsCoast,
            RocketStateId::Descent => ProtoRocketState::RsDescent,
            RocketStateId::Recovery => ProtoRocketState::RsRecovery,
            RocketStateId::Abort => ProtoRocketState::RsAbort,
            RocketStateId::None => ProtoRocketState::RsNone,
        }
    }
}
