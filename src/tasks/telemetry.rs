//! Telemetry task: paces the periodic sample/transmit cycle.

use crate::command::{Command, CommandKind, RequestOpcode, TaskOpcode};
use crate::config::{
    TELEMETRY_HEARTBEAT_TIMER_PERIOD_MS, TELEMETRY_MAXIMUM_LOG_PERIOD_MS, TELEMETRY_MINIMUM_LOG_PERIOD_MS,
};
use crate::hardware::GpioStatus;
use crate::protocol::messages::{Node, TelemetryBody, ValveStatus};
use crate::protocol::ProtocolSender;
use crate::queue::CommandReceiver;
use crate::task::TaskHandle;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct TelemetryRoutes {
    pub flight: TaskHandle,
    pub watchdog: TaskHandle,
    pub bms: TaskHandle,
}

pub struct TelemetryTask {
    logging_period_ms: u32,
    non_control_logs: u32,
    gpio: Box<dyn GpioStatus>,
    routes: TelemetryRoutes,
    peer: Node,
    sender: ProtocolSender,
}

/// Keeps a requested period inside the supported log rate range.
pub fn clamp_period(period_ms: u32) -> u32 {
    period_ms.clamp(TELEMETRY_MINIMUM_LOG_PERIOD_MS, TELEMETRY_MAXIMUM_LOG_PERIOD_MS)
}

impl TelemetryTask {
    pub fn new(
        period_ms: u32,
        gpio: Box<dyn GpioStatus>,
        routes: TelemetryRoutes,
        peer: Node,
        sender: ProtocolSender,
    ) -> Self {
        Self {
            logging_period_ms: clamp_period(period_ms),
            non_control_logs: 0,
            gpio,
            routes,
            peer,
            sender,
        }
    }

    pub fn logging_period_ms(&self) -> u32 {
        self.logging_period_ms
    }

    /// Drains the queue, waits one period, then runs a log sequence.
    pub async fn run(mut self, mut rx: CommandReceiver) {
        loop {
            while let Some(cmd) = rx.receive() {
                self.handle_command(cmd);
            }

            tokio::time::sleep(Duration::from_millis(u64::from(self.logging_period_ms))).await;
            self.run_log_sequence().await;
        }
    }

    pub fn handle_command(&mut self, cmd: Command) {
        match cmd.kind() {
            CommandKind::TelemetryChangePeriod => {
                self.logging_period_ms = clamp_period(u32::from(cmd.opcode()));
                info!("TelemetryTask - logging period set to {} ms", self.logging_period_ms);
            }
            other => warn!("TelemetryTask - Received Unsupported Command {{{:?}}}", other),
        }
    }

    pub async fn run_log_sequence(&mut self) {
        self.routes
            .flight
            .send_command(Command::new(CommandKind::Request, RequestOpcode::TransmitState))
            .await;

        // Heartbeat status is rate limited independently of the log period.
        self.non_control_logs += 1;
        if self.non_control_logs >= TELEMETRY_HEARTBEAT_TIMER_PERIOD_MS / self.logging_period_ms {
            self.non_control_logs = 0;
            self.routes
                .watchdog
                .send_command(Command::new(CommandKind::TaskSpecific, TaskOpcode::HeartbeatStatusSend))
                .await;
        }

        self.send_valve_status();

        self.routes
            .bms
            .send_command(Command::new(CommandKind::Request, RequestOpcode::NewSample))
            .await;
        self.routes
            .bms
            .send_command(Command::new(CommandKind::Request, RequestOpcode::TransmitState))
            .await;
    }

    fn send_valve_status(&self) {
        let gpio = self.gpio.read_gpio();
        let status = ValveStatus {
            vent_open: gpio.vent_open,
            drain_open: gpio.drain_open,
            mev_open: gpio.mev_open,
            internal_power: gpio.internal_power,
        };
        if let Err(e) = self.sender.send_telemetry(self.peer, TelemetryBody::ValveStatus(status)) {
            warn!("TelemetryTask - failed to send valve status: {}", e);
        }
    }
}
