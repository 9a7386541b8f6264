//! BMS task: samples the battery sensors and owns the battery state machine.

use crate::command::{Command, CommandKind, DataOpcode, RequestOpcode};
use crate::hardware::{BatteryMonitor, BmsData, ChargerMonitor, FuelGauge, FuelGaugeData};
use crate::machines::battery::PowerPathCtx;
use crate::machines::{BatteryStateId, BatterySm};
use crate::protocol::messages::{BatteryStatus, Node, TelemetryBody};
use crate::protocol::ProtocolSender;
use crate::queue::CommandReceiver;
use tracing::warn;

/// Sensors read on every sample request.
pub struct BmsSensors {
    pub bms: Box<dyn BatteryMonitor>,
    pub charger: Box<dyn ChargerMonitor>,
    pub fuel_gauge: Box<dyn FuelGauge>,
}

pub struct BmsTask {
    bsm: BatterySm,
    sensors: BmsSensors,
    latest_bms: BmsData,
    latest_fuel_gauge: FuelGaugeData,
    peer: Node,
    sender: ProtocolSender,
}

impl BmsTask {
    /// The battery always cold-boots into Idle with both FETs off.
    pub fn new(power: PowerPathCtx, sensors: BmsSensors, peer: Node, sender: ProtocolSender) -> Self {
        Self {
            bsm: BatterySm::new(BatteryStateId::Idle, true, power),
            sensors,
            latest_bms: BmsData::default(),
            latest_fuel_gauge: FuelGaugeData::default(),
            peer,
            sender,
        }
    }

    pub fn battery_state(&self) -> BatteryStateId {
        self.bsm.current_state()
    }

    pub async fn run(mut self, mut rx: CommandReceiver) {
        while let Some(cmd) = rx.receive_wait().await {
            self.handle_command(cmd);
        }
    }

    pub fn handle_command(&mut self, cmd: Command) {
        match cmd.kind() {
            CommandKind::Request => match RequestOpcode::try_from(cmd.opcode()) {
                Ok(RequestOpcode::NewSample) => self.sample(),
                Ok(RequestOpcode::TransmitState) => self.transmit(),
                Err(opcode) => warn!("BMSTask - Received Unsupported REQUEST_COMMAND {{{}}}", opcode),
            },
            CommandKind::Data => {
                // Samples pushed by other tasks count as the latest readings too.
                match DataOpcode::try_from(cmd.opcode()) {
                    Ok(DataOpcode::BmsUpdate) => {
                        if let Ok(bms) = cmd.copy_data::<BmsData>() {
                            self.latest_bms = bms;
                        }
                    }
                    Ok(DataOpcode::FuelGaugeUpdate) => {
                        if let Ok(fuel_gauge) = cmd.copy_data::<FuelGaugeData>() {
                            self.latest_fuel_gauge = fuel_gauge;
                        }
                    }
                    _ => {}
                }
                self.bsm.handle_command(&cmd);
            }
            other => warn!("BMSTask - Received Unsupported Command {{{:?}}}", other),
        }
    }

    /// Reads every sensor and feeds each successful reading through the
    /// state machine.
    fn sample(&mut self) {
        match self.sensors.bms.read_bms() {
            Ok(bms) => {
                self.latest_bms = bms;
                self.bsm.handle_bms_data(&bms);
            }
            Err(e) => warn!("BMSTask - {}", e),
        }
        match self.sensors.charger.read_charger() {
            Ok(charger) => {
                self.bsm.handle_charger_data(&charger);
            }
            Err(e) => warn!("BMSTask - {}", e),
        }
        match self.sensors.fuel_gauge.read_fuel_gauge() {
            Ok(fuel_gauge) => {
                self.latest_fuel_gauge = fuel_gauge;
                self.bsm.handle_fuel_gauge_data(&fuel_gauge);
            }
            Err(e) => warn!("BMSTask - {}", e),
        }
    }

    fn transmit(&self) {
        let status = BatteryStatus {
            state: self.bsm.battery_state_as_proto(),
            pack_voltage_mv: self.latest_bms.pack_voltage_mv,
            current_ma: self.latest_bms.current_ma,
            state_of_charge: self.latest_fuel_gauge.state_of_charge,
        };
        if let Err(e) = self.sender.send_telemetry(self.peer, TelemetryBody::BatteryStatus(status)) {
            warn!("BMSTask - failed to send battery status: {}", e);
        }
    }
}
