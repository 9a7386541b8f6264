//! # PMB Avionics
//!
//! Firmware core for the power management board (PMB) of a rocket, hosted on
//! a tokio runtime with the board's hardware behind capability traits.
//!
//! ## Features
//!
//! - **Task/command dispatch**: bounded per-task command queues with an
//!   interrupt-safe enqueue path
//! - **State machines**: a generic FSM engine instantiated for the battery
//!   lifecycle and the rocket flight phase
//! - **Radio protocol**: COBS-framed postcard messages with node addressing,
//!   acks, heartbeats and system control
//! - **Fail-fast**: contract violations and reset requests halt through
//!   [`halt!`]
//!
//! ## Quick Start
//!
//! ```no_run
//! use pmb_avionics::hardware::sim::{simulated, LinkTransport, SimFlash};
//! use pmb_avionics::{AppContext, SystemConfig};
//!
//! # async fn boot() -> Result<(), pmb_avionics::AppError> {
//! let (frames_tx, _frames_rx) = tokio::sync::mpsc::unbounded_channel();
//! let mut app = AppContext::new(SystemConfig::default(), Box::new(LinkTransport::new(frames_tx)))?;
//! let (hardware, _sim) = simulated(SimFlash::new());
//! app.init(hardware);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`command`], [`queue`], [`task`] - the dispatch framework
//! - [`fsm`], [`machines`] - state machine engine and domain machines
//! - [`protocol`] - wire format, transmit path and frame reassembly
//! - [`tasks`] - flight, protocol, telemetry, BMS, watchdog and flash tasks
//! - [`app`] - constructs and starts everything once

#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod fault;

pub mod app;
pub mod command;
pub mod config;
pub mod fsm;
pub mod hardware;
pub mod machines;
pub mod protocol;
pub mod queue;
pub mod task;
pub mod tasks;

pub use app::{AppContext, AppError, AppHandles};
pub use command::{Command, CommandKind, Payload};
pub use config::SystemConfig;
pub use queue::{command_queue, CommandReceiver, CommandSender, IsrSender};
pub use task::{Task, TaskHandle};
