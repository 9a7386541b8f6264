//! Capability interfaces for everything the board touches outside the CPU.
//!
//! Register-level drivers live behind these traits. The hosted build wires
//! in the simulated implementations from [`sim`].

pub mod sim;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HardwareError {
    #[error("{0} did not respond")]
    NoResponse(&'static str),
    #[error("flash operation failed: {0}")]
    Flash(&'static str),
}

/// One sample from the battery monitor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BmsData {
    pub pack_voltage_mv: u16,
    /// Positive into the pack, negative out of it.
    pub current_ma: i32,
    pub min_cell_mv: u16,
    pub max_cell_mv: u16,
    pub temperature_c: i8,
    /// Non-zero when the monitor reports any protection fault.
    pub fault_flags: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargerData {
    pub input_present: bool,
    pub charging: bool,
    pub charge_current_ma: u16,
    pub fault: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuelGaugeData {
    pub state_of_charge: u8,
    pub remaining_capacity_mah: u16,
    pub time_to_empty_min: u16,
}

/// Open/closed state of the GPIO-driven actuators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GpioReading {
    pub vent_open: bool,
    pub drain_open: bool,
    pub mev_open: bool,
    pub internal_power: bool,
}

/// What survives a reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    /// Raw rocket state index; validated on restore.
    pub rocket_state: u8,
}

/// Charge/discharge FET actuation.
pub trait PowerPath: Send {
    fn set_charge_fet(&mut self, on: bool);
    fn set_discharge_fet(&mut self, on: bool);
}

/// Internal battery vs. umbilical supply selection.
pub trait PowerSelect: Send {
    fn select_internal(&mut self);
    fn select_umbilical(&mut self);
    fn is_internal(&self) -> bool;
}

pub trait BatteryMonitor: Send {
    fn read_bms(&mut self) -> Result<BmsData, HardwareError>;
}

pub trait ChargerMonitor: Send {
    fn read_charger(&mut self) -> Result<ChargerData, HardwareError>;
}

pub trait FuelGauge: Send {
    fn read_fuel_gauge(&mut self) -> Result<FuelGaugeData, HardwareError>;
}

pub trait GpioStatus: Send {
    fn read_gpio(&self) -> GpioReading;
}

pub trait FlashController: Send {
    /// Erases the whole part. Blocks until done.
    fn erase_all(&mut self) -> Result<(), HardwareError>;
    fn set_logging(&mut self, enabled: bool);
}

pub trait SystemStorage: Send {
    /// `None` when nothing valid has been written yet.
    fn read(&mut self) -> Option<PersistedState>;
    fn write(&mut self, state: &PersistedState) -> Result<(), HardwareError>;
}

/// Every collaborator the application needs, handed over once at startup.
pub struct Hardware {
    pub power_path: Box<dyn PowerPath>,
    pub power_select: Box<dyn PowerSelect>,
    pub bms: Box<dyn BatteryMonitor>,
    pub charger: Box<dyn ChargerMonitor>,
    pub fuel_gauge: Box<dyn FuelGauge>,
    pub gpio: Box<dyn GpioStatus>,
    pub flash: Box<dyn FlashController>,
    pub storage: Box<dyn SystemStorage>,
}
