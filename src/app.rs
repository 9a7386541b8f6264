//! Application context: constructs every task once and wires them together.

use crate::config::{ConfigError, SystemConfig};
use crate::hardware::Hardware;
use crate::protocol::{ProtocolRx, ProtocolSender, Transport};
use crate::task::{Task, TaskHandle};
use crate::tasks::{
    BmsSensors, BmsTask, FlashTask, FlightTask, PmbProtocolTask, ProtocolRoutes, TelemetryRoutes, TelemetryTask,
    WatchdogTask,
};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("radio link error: {0}")]
    Io(#[from] std::io::Error),
}

/// Queue addresses of every task.
#[derive(Debug, Clone)]
pub struct AppHandles {
    pub flight: TaskHandle,
    pub protocol: TaskHandle,
    pub telemetry: TaskHandle,
    pub bms: TaskHandle,
    pub watchdog: TaskHandle,
    pub flash: TaskHandle,
}

pub struct AppContext {
    config: SystemConfig,
    sender: ProtocolSender,
    flight: Task,
    protocol: Task,
    telemetry: Task,
    bms: Task,
    watchdog: Task,
    flash: Task,
}

impl AppContext {
    /// Builds every task and its queue. Nothing runs until [`AppContext::init`].
    pub fn new(config: SystemConfig, transport: Box<dyn Transport>) -> Result<Self, AppError> {
        config.validate()?;
        let t = &config.tasks;
        Ok(Self {
            sender: ProtocolSender::new(config.node, transport),
            flight: Task::new("FlightTask", t.flight),
            protocol: Task::new("ProtocolTask", t.protocol),
            telemetry: Task::new("TelemetryTask", t.telemetry),
            bms: Task::new("BMSTask", t.bms),
            watchdog: Task::new("WatchdogTask", t.watchdog),
            flash: Task::new("FlashTask", t.flash),
            config,
        })
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn sender(&self) -> ProtocolSender {
        self.sender.clone()
    }

    pub fn handles(&self) -> AppHandles {
        AppHandles {
            flight: self.flight.handle(),
            protocol: self.protocol.handle(),
            telemetry: self.telemetry.handle(),
            bms: self.bms.handle(),
            watchdog: self.watchdog.handle(),
            flash: self.flash.handle(),
        }
    }

    /// Interrupt-side receiver feeding the protocol task.
    pub fn protocol_rx(&self) -> ProtocolRx {
        ProtocolRx::new(self.protocol.handle().isr_sender())
    }

    /// Spawns every task on the current tokio runtime. Calling it a second
    /// time halts.
    pub fn init(&mut self, hardware: Hardware) {
        let Hardware {
            power_path,
            power_select,
            bms,
            charger,
            fuel_gauge,
            gpio,
            flash,
            mut storage,
        } = hardware;
        let handles = self.handles();
        let peer = self.config.peer;

        let persisted = storage.read();
        let flight = FlightTask::new(persisted, power_select, peer, self.sender(), handles.flash.clone());
        self.flight.init(move |rx| flight.run(rx));

        let protocol = PmbProtocolTask::new(
            peer,
            self.sender(),
            ProtocolRoutes {
                flight: handles.flight.clone(),
                watchdog: handles.watchdog.clone(),
                flash: handles.flash.clone(),
                telemetry: handles.telemetry.clone(),
            },
        );
        self.protocol.init(move |rx| protocol.run(rx));

        let telemetry = TelemetryTask::new(
            self.config.telemetry_period_ms,
            gpio,
            TelemetryRoutes {
                flight: handles.flight.clone(),
                watchdog: handles.watchdog.clone(),
                bms: handles.bms.clone(),
            },
            peer,
            self.sender(),
        );
        self.telemetry.init(move |rx| telemetry.run(rx));

        let sensors = BmsSensors {
            bms,
            charger,
            fuel_gauge,
        };
        let bms_task = BmsTask::new(power_path, sensors, peer, self.sender());
        self.bms.init(move |rx| bms_task.run(rx));

        let watchdog = WatchdogTask::new(
            Duration::from_millis(self.config.heartbeat_timeout_ms),
            Duration::from_millis(self.config.watchdog_check_period_ms),
            handles.flight.clone(),
            peer,
            self.sender(),
        );
        self.watchdog.init(move |rx| watchdog.run(rx));

        let flash_task = FlashTask::new(flash, storage);
        self.flash.init(move |rx| flash_task.run(rx));

        info!(node = ?self.config.node, peer = ?peer, "all tasks started");
    }

    /// Stops every task.
    pub fn shutdown(&self) {
        for task in [&self.flight, &self.protocol, &self.telemetry, &self.bms, &self.watchdog, &self.flash] {
            task.abort();
        }
    }
}
