//! Orchestrating tasks. Each owns its state and runs one loop on its own
//! command queue.

pub mod bms;
pub mod flash;
pub mod flight;
pub mod protocol;
pub mod telemetry;
pub mod watchdog;

pub use bms::{BmsSensors, BmsTask};
pub use flash::FlashTask;
pub use flight::FlightTask;
pub use protocol::{PmbProtocolTask, ProtocolRoutes};
pub use telemetry::{TelemetryRoutes, TelemetryTask};
pub use watchdog::WatchdogTask;
