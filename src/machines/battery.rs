//! Battery lifecycle state machine.
//!
//! Enter and exit hooks drive the charge and discharge FETs; data handlers
//! look at BMS, charger and fuel-gauge samples and pick the next state.

use crate::command::{Command, CommandKind, DataOpcode};
use crate::fsm::{MachineState, StateId, StateMachine, TransitionStats};
use crate::hardware::{BmsData, ChargerData, FuelGaugeData, PowerPath};
use crate::protocol::messages::BatteryState as ProtoBatteryState;
use tracing::warn;

/// Pack current below this magnitude counts as no load.
pub const DISCHARGE_THRESHOLD_MA: i32 = 50;

const STATE_COUNT: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatteryStateId {
    Idle,
    Charging,
    Discharging,
    Fault,
    /// Invalid, must be last.
    None,
}

impl StateId for BatteryStateId {
    const COUNT: usize = STATE_COUNT;

    fn index(self) -> usize {
        self as usize
    }

    fn name(self) -> &'static str {
        match self {
            BatteryStateId::Idle => "Idle",
            BatteryStateId::Charging => "Charging",
            BatteryStateId::Discharging => "Discharging",
            BatteryStateId::Fault => "Fault",
            BatteryStateId::None => "None",
        }
    }
}

pub type PowerPathCtx = Box<dyn PowerPath>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatteryState {
    Idle,
    Charging,
    Discharging,
    /// Latest fault flags reported while faulted.
    Fault { flags: u16 },
}

impl BatteryState {
    fn table() -> [BatteryState; STATE_COUNT] {
        [
            BatteryState::Idle,
            BatteryState::Charging,
            BatteryState::Discharging,
            BatteryState::Fault { flags: 0 },
        ]
    }

    pub fn handle_bms_data(&mut self, bms: &BmsData) -> BatteryStateId {
        if bms.fault_flags != 0 {
            return BatteryStateId::Fault;
        }

        match self {
            BatteryState::Idle if bms.current_ma <= -DISCHARGE_THRESHOLD_MA => BatteryStateId::Discharging,
            BatteryState::Discharging if bms.current_ma.abs() < DISCHARGE_THRESHOLD_MA => BatteryStateId::Idle,
            BatteryState::Fault { .. } => BatteryStateId::Idle,
            _ => self.id(),
        }
    }

    pub fn handle_charger_data(&mut self, charger: &ChargerData) -> BatteryStateId {
        if charger.fault {
            return BatteryStateId::Fault;
        }

        match self {
            BatteryState::Idle | BatteryState::Discharging if charger.charging => BatteryStateId::Charging,
            BatteryState::Charging if !charger.charging => BatteryStateId::Idle,
            _ => self.id(),
        }
    }

    pub fn handle_fuel_gauge_data(&mut self, _fuel_gauge: &FuelGaugeData) -> BatteryStateId {
        self.id()
    }
}

impl MachineState for BatteryState {
    type Id = BatteryStateId;
    type Context = PowerPathCtx;

    fn id(&self) -> BatteryStateId {
        match self {
            BatteryState::Idle => BatteryStateId::Idle,
            BatteryState::Charging => BatteryStateId::Charging,
            BatteryState::Discharging => BatteryStateId::Discharging,
            BatteryState::Fault { .. } => BatteryStateId::Fault,
        }
    }

    fn on_enter(&mut self, power: &mut PowerPathCtx) {
        match self {
            BatteryState::Idle | BatteryState::Fault { .. } => {
                power.set_charge_fet(false);
                power.set_discharge_fet(false);
            }
            BatteryState::Charging => {
                power.set_charge_fet(true);
                power.set_discharge_fet(false);
            }
            BatteryState::Discharging => {
                power.set_charge_fet(false);
                power.set_discharge_fet(true);
            }
        }
    }

    fn on_exit(&mut self, power: &mut PowerPathCtx) {
        match self {
            BatteryState::Charging => power.set_charge_fet(false),
            BatteryState::Discharging => {
                power.set_charge_fet(false);
                power.set_discharge_fet(false);
            }
            BatteryState::Idle | BatteryState::Fault { .. } => {}
        }
    }
}

pub struct BatterySm {
    sm: StateMachine<BatteryState, STATE_COUNT>,
}

impl BatterySm {
    /// Halts if `starting` is not a real state.
    pub fn new(starting: BatteryStateId, enter_starting: bool, power: PowerPathCtx) -> Self {
        Self {
            sm: StateMachine::new("BATTERY", BatteryState::table(), starting, enter_starting, power),
        }
    }

    /// Feeds a `Data` command through the current state. Anything else is
    /// ignored.
    pub fn handle_command(&mut self, cmd: &Command) -> BatteryStateId {
        if cmd.kind() != CommandKind::Data {
            return self.current_state();
        }

        match DataOpcode::try_from(cmd.opcode()) {
            Ok(DataOpcode::BmsUpdate) => match cmd.copy_data::<BmsData>() {
                Ok(bms) => self.handle_bms_data(&bms),
                Err(e) => self.reject(cmd, e),
            },
            Ok(DataOpcode::ChargerUpdate) => match cmd.copy_data::<ChargerData>() {
                Ok(charger) => self.handle_charger_data(&charger),
                Err(e) => self.reject(cmd, e),
            },
            Ok(DataOpcode::FuelGaugeUpdate) => match cmd.copy_data::<FuelGaugeData>() {
                Ok(fuel_gauge) => self.handle_fuel_gauge_data(&fuel_gauge),
                Err(e) => self.reject(cmd, e),
            },
            Err(opcode) => {
                warn!("BatterySM - Unknown data opcode: {}", opcode);
                self.current_state()
            }
        }
    }

    fn reject(&self, cmd: &Command, err: crate::command::PayloadError) -> BatteryStateId {
        warn!(opcode = cmd.opcode(), "BatterySM - dropping data command: {}", err);
        self.current_state()
    }

    /// A report with fault flags latches them into the Fault state before
    /// the transition, so they are in place when Fault is entered.
    pub fn handle_bms_data(&mut self, bms: &BmsData) -> BatteryStateId {
        if bms.fault_flags != 0 {
            if let Some(BatteryState::Fault { flags }) = self.sm.state_mut(BatteryStateId::Fault) {
                *flags = bms.fault_flags;
            }
        }
        self.sm.dispatch(|state, _| state.handle_bms_data(bms))
    }

    pub fn handle_charger_data(&mut self, charger: &ChargerData) -> BatteryStateId {
        self.sm.dispatch(|state, _| state.handle_charger_data(charger))
    }

    pub fn handle_fuel_gauge_data(&mut self, fuel_gauge: &FuelGaugeData) -> BatteryStateId {
        self.sm.dispatch(|state, _| state.handle_fuel_gauge_data(fuel_gauge))
    }

    pub fn transition_state(&mut self, next: BatteryStateId) -> BatteryStateId {
        self.sm.transition_state(next)
    }

    pub fn current_state(&self) -> BatteryStateId {
        self.sm.current_state()
    }

    /// Flags of the most recent fault report.
    pub fn fault_flags(&self) -> u16 {
        match self.sm.state(BatteryStateId::Fault) {
            Some(BatteryState::Fault { flags }) => *flags,
            _ => 0,
        }
    }

    pub fn stats(&self) -> &TransitionStats<STATE_COUNT> {
        self.sm.stats()
    }

    pub fn battery_state_as_proto(&self) -> ProtoBatteryState {
        match self.current_state() {
            BatteryStateId::Idle => ProtoBatteryState::BsIdle,
            BatteryStateId::Charging => ProtoBatteryState::BsCharging,
            BatteryStateId::Discharging => ProtoBatteryState::BsDischarging,
            BatteryStateId::Fault => ProtoBatteryState::BsFault,
            BatteryStateId::None => ProtoBatteryState::BsNone,
        }
    }
}
