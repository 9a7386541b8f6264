//! Domain state machines built on [`crate::fsm`].

pub mod battery;
pub mod rocket;

pub use battery::{BatteryState, BatteryStateId, BatterySm};
pub use rocket::{RocketControlCommand, RocketState, RocketStateId, RocketSm};
