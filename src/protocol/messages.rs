//! Wire messages exchanged with the RCU and the other boards.
//!
//! Every enum is encoded by declaration order, so variants are only ever
//! appended. Each message has exactly one populated body, modelled as an
//! `Option` of a body enum.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Node {
    Any,
    Rcu,
    Dmb,
    Pmb,
    Pbb,
    Sob,
    Invalid,
}

/// Category carried in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageId {
    Invalid,
    Command,
    Control,
    Telemetry,
}

// Command messages

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandMessage {
    pub source: Node,
    pub target: Node,
    pub source_sequence_num: u32,
    pub command: Option<CommandBody>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandBody {
    Dmb(DmbCommand),
    Pbb(PbbCommand),
    Pmb(PmbCommand),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DmbCommand {
    pub command_enum: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PbbCommand {
    pub command_enum: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PmbCommand {
    pub command_enum: PmbCommandCode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PmbCommandCode {
    None,
    RscAnyToAbort,
    RscAbortToPreLaunch,
}

// Control messages

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub source: Node,
    pub target: Node,
    pub source_sequence_num: u32,
    pub body: Option<ControlBody>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlBody {
    Heartbeat,
    Ping,
    Ack(AckNack),
    Nack(AckNack),
    SysCtrl(SystemControl),
    SysState(SystemState),
}

/// Identifies the message being acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckNack {
    pub acking_msg_source: Node,
    pub acking_sequence_num: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemControl {
    pub sys_cmd: SystemCommand,
    /// Only meaningful for [`SystemCommand::LogPeriodChange`], in ms.
    pub cmd_param: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SystemCommand {
    None,
    FlashLogEnable,
    FlashLogDisable,
    Reset,
    CriticalFlashFullErase,
    LogPeriodChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemState {
    pub sys_state: SystemStatus,
    pub rocket_state: RocketState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SystemStatus {
    Invalid,
    NormalOperation,
    BootupComplete,
    UncaughtReset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RocketState {
    RsPreLaunch,
    RsArm,
    RsLaunch,
    RsBurn,
    RsCoast,
    RsDescent,
    RsRecovery,
    RsAbort,
    RsNone,
}

// Telemetry messages

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryMessage {
    pub source: Node,
    pub target: Node,
    pub body: Option<TelemetryBody>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TelemetryBody {
    BatteryStatus(BatteryStatus),
    ValveStatus(ValveStatus),
}

/// Battery lifecycle state on the wire. The discharging variant keeps the
/// numeric value of the historical `BS_DISCHHARGING` spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum BatteryState {
    BsIdle = 0,
    BsCharging = 1,
    BsDischarging = 2,
    BsFault = 3,
    BsNone = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatteryStatus {
    pub state: BatteryState,
    pub pack_voltage_mv: u16,
    pub current_ma: i32,
    pub state_of_charge: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValveStatus {
    pub vent_open: bool,
    pub drain_open: bool,
    pub mev_open: bool,
    pub internal_power: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discharging_keeps_its_wire_value() {
        assert_eq!(BatteryState::BsDischarging as u8, 2);
        let bytes = postcard::to_allocvec(&BatteryState::BsDischarging).unwrap();
        assert_eq!(bytes, vec![2]);
    }

    #[test]
    fn test_message_ids_encode_by_position() {
        assert_eq!(postcard::to_allocvec(&MessageId::Control).unwrap(), vec![2]);
    }

    #[test]
    fn test_control_message_round_trips() {
        let msg = ControlMessage {
            source: Node::Rcu,
            target: Node::Pmb,
            source_sequence_num: 300,
            body: Some(ControlBody::SysCtrl(SystemControl {
                sys_cmd: SystemCommand::LogPeriodChange,
                cmd_param: 70_000,
            })),
        };
        let bytes = postcard::to_allocvec(&msg).unwrap();
        assert_eq!(postcard::from_bytes::<ControlMessage>(&bytes).unwrap(), msg);
    }
}
