//! Simulated hardware for the hosted build and the tests.
//!
//! Each simulated part is a cheap clone around shared state, so the
//! application owns one clone while a test or the simulator binary keeps
//! another to drive and observe it.

use super::{
    BatteryMonitor, BmsData, ChargerData, ChargerMonitor, FlashController, FuelGauge, FuelGaugeData, GpioReading,
    GpioStatus, Hardware, HardwareError, PersistedState, PowerPath, PowerSelect, SystemStorage,
};
use crate::protocol::{Transport, TransportError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::UnboundedSender;

const NOMINAL_VOLTAGE_MV: u16 = 7400;
const MAX_VOLTAGE_MV: u16 = 8400;
const CRITICAL_VOLTAGE_MV: u16 = 6400;
const CELLS: u16 = 2;
const CAPACITY_MAH: u16 = 2200;
const CHARGE_CURRENT_MA: u16 = 1000;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct BatteryModel {
    voltage_mv: u16,
    load_ma: i32,
    charger_connected: bool,
    fault_flags: u16,
    charger_fault: bool,
    temperature_c: i8,
}

impl BatteryModel {
    fn charging(&self) -> bool {
        self.charger_connected && !self.charger_fault && self.voltage_mv < MAX_VOLTAGE_MV
    }

    fn net_current_ma(&self) -> i32 {
        let charge = if self.charging() { i32::from(CHARGE_CURRENT_MA) } else { 0 };
        charge - self.load_ma
    }

    fn state_of_charge(&self) -> u8 {
        let range = MAX_VOLTAGE_MV - CRITICAL_VOLTAGE_MV;
        let above = self.voltage_mv.saturating_sub(CRITICAL_VOLTAGE_MV);
        ((u32::from(above) * 100) / u32::from(range)).min(100) as u8
    }

    /// Moves the pack voltage a step in the direction of the net current.
    fn step(&mut self) {
        let delta = (self.net_current_ma() / 100).clamp(-20, 20);
        let next = i32::from(self.voltage_mv) + delta;
        self.voltage_mv = next.clamp(0, i32::from(MAX_VOLTAGE_MV)) as u16;
    }
}

/// Battery pack with its monitor, charger and fuel gauge.
#[derive(Debug, Clone)]
pub struct SimBattery {
    model: Arc<Mutex<BatteryModel>>,
}

impl Default for SimBattery {
    fn default() -> Self {
        Self {
            model: Arc::new(Mutex::new(BatteryModel {
                voltage_mv: NOMINAL_VOLTAGE_MV,
                load_ma: 0,
                charger_connected: false,
                fault_flags: 0,
                charger_fault: false,
                temperature_c: 22,
            })),
        }
    }
}

impl SimBattery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect_charger(&self, connected: bool) {
        lock(&self.model).charger_connected = connected;
    }

    /// Current drawn from the pack, in mA.
    pub fn set_load_ma(&self, load_ma: i32) {
        lock(&self.model).load_ma = load_ma;
    }

    pub fn inject_fault(&self, flags: u16) {
        lock(&self.model).fault_flags = flags;
    }

    pub fn set_charger_fault(&self, fault: bool) {
        lock(&self.model).charger_fault = fault;
    }

    pub fn clear_faults(&self) {
        let mut model = lock(&self.model);
        model.fault_flags = 0;
        model.charger_fault = false;
    }

    pub fn voltage_mv(&self) -> u16 {
        lock(&self.model).voltage_mv
    }
}

impl BatteryMonitor for SimBattery {
    fn read_bms(&mut self) -> Result<BmsData, HardwareError> {
        let mut model = lock(&self.model);
        model.step();
        let cell = model.voltage_mv / CELLS;
        Ok(BmsData {
            pack_voltage_mv: model.voltage_mv,
            current_ma: model.net_current_ma(),
            min_cell_mv: cell.saturating_sub(5),
            max_cell_mv: cell + 5,
            temperature_c: model.temperature_c,
            fault_flags: model.fault_flags,
        })
    }
}

impl ChargerMonitor for SimBattery {
    fn read_charger(&mut self) -> Result<ChargerData, HardwareError> {
        let model = lock(&self.model);
        let charging = model.charging();
        Ok(ChargerData {
            input_present: model.charger_connected,
            charging,
            charge_current_ma: if charging { CHARGE_CURRENT_MA } else { 0 },
            fault: model.charger_fault,
        })
    }
}

impl FuelGauge for SimBattery {
    fn read_fuel_gauge(&mut self) -> Result<FuelGaugeData, HardwareError> {
        let model = lock(&self.model);
        let soc = model.state_of_charge();
        let remaining = (u32::from(CAPACITY_MAH) * u32::from(soc) / 100) as u16;
        let time_to_empty_min = match u32::try_from(model.load_ma) {
            Ok(load) if load > 0 => (u32::from(remaining) * 60 / load).min(u32::from(u16::MAX)) as u16,
            _ => u16::MAX,
        };
        Ok(FuelGaugeData {
            state_of_charge: soc,
            remaining_capacity_mah: remaining,
            time_to_empty_min,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fet {
    Charge,
    Discharge,
}

/// Power path that records every FET command in order.
#[derive(Debug, Clone, Default)]
pub struct SimPowerPath {
    events: Arc<Mutex<Vec<(Fet, bool)>>>,
}

impl SimPowerPath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(Fet, bool)> {
        lock(&self.events).clone()
    }

    pub fn clear(&self) {
        lock(&self.events).clear();
    }

    fn last(&self, fet: Fet) -> bool {
        lock(&self.events)
            .iter()
            .rev()
            .find(|(f, _)| *f == fet)
            .is_some_and(|(_, on)| *on)
    }

    pub fn charge_on(&self) -> bool {
        self.last(Fet::Charge)
    }

    pub fn discharge_on(&self) -> bool {
        self.last(Fet::Discharge)
    }
}

impl PowerPath for SimPowerPath {
    fn set_charge_fet(&mut self, on: bool) {
        lock(&self.events).push((Fet::Charge, on));
    }

    fn set_discharge_fet(&mut self, on: bool) {
        lock(&self.events).push((Fet::Discharge, on));
    }
}

/// Power select line, shared with [`SimGpio`] so telemetry sees it.
#[derive(Debug, Clone, Default)]
pub struct SimPowerSelect {
    internal: Arc<AtomicBool>,
}

impl PowerSelect for SimPowerSelect {
    fn select_internal(&mut self) {
        self.internal.store(true, Ordering::SeqCst);
    }

    fn select_umbilical(&mut self) {
        self.internal.store(false, Ordering::SeqCst);
    }

    fn is_internal(&self) -> bool {
        self.internal.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimGpio {
    vent: Arc<AtomicBool>,
    drain: Arc<AtomicBool>,
    mev: Arc<AtomicBool>,
    internal: Arc<AtomicBool>,
}

impl SimGpio {
    pub fn set_vent(&self, open: bool) {
        self.vent.store(open, Ordering::SeqCst);
    }

    pub fn set_drain(&self, open: bool) {
        self.drain.store(open, Ordering::SeqCst);
    }

    pub fn set_mev(&self, open: bool) {
        self.mev.store(open, Ordering::SeqCst);
    }
}

impl GpioStatus for SimGpio {
    fn read_gpio(&self) -> GpioReading {
        GpioReading {
            vent_open: self.vent.load(Ordering::SeqCst),
            drain_open: self.drain.load(Ordering::SeqCst),
            mev_open: self.mev.load(Ordering::SeqCst),
            internal_power: self.internal.load(Ordering::SeqCst),
        }
    }
}

#[derive(Debug, Default)]
struct FlashModel {
    erase_count: u32,
    logging: bool,
    stored: Option<PersistedState>,
}

/// Flash part that also backs the persisted system state.
#[derive(Debug, Clone, Default)]
pub struct SimFlash {
    model: Arc<Mutex<FlashModel>>,
}

impl SimFlash {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flash that already holds `state`, as after a reset.
    pub fn with_state(state: PersistedState) -> Self {
        let flash = Self::default();
        lock(&flash.model).stored = Some(state);
        flash
    }

    pub fn erase_count(&self) -> u32 {
        lock(&self.model).erase_count
    }

    pub fn logging(&self) -> bool {
        lock(&self.model).logging
    }

    pub fn stored(&self) -> Option<PersistedState> {
        lock(&self.model).stored
    }
}

impl FlashController for SimFlash {
    fn erase_all(&mut self) -> Result<(), HardwareError> {
        let mut model = lock(&self.model);
        model.erase_count += 1;
        model.stored = None;
        Ok(())
    }

    fn set_logging(&mut self, enabled: bool) {
        lock(&self.model).logging = enabled;
    }
}

impl SystemStorage for SimFlash {
    fn read(&mut self) -> Option<PersistedState> {
        lock(&self.model).stored
    }

    fn write(&mut self, state: &PersistedState) -> Result<(), HardwareError> {
        lock(&self.model).stored = Some(*state);
        Ok(())
    }
}

/// Transport that collects bytes until flush and then forwards the whole
/// frame over a channel.
#[derive(Debug)]
pub struct LinkTransport {
    pending: Vec<u8>,
    frames: UnboundedSender<Vec<u8>>,
}

impl LinkTransport {
    pub fn new(frames: UnboundedSender<Vec<u8>>) -> Self {
        Self {
            pending: Vec::new(),
            frames,
        }
    }
}

impl Transport for LinkTransport {
    fn write(&mut self, byte: u8) -> nb::Result<(), TransportError> {
        self.pending.push(byte);
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), TransportError> {
        let frame = std::mem::take(&mut self.pending);
        self.frames
            .send(frame)
            .map_err(|_| nb::Error::Other(TransportError::LinkDown))
    }
}

/// Observation handles for a simulated [`Hardware`] set.
#[derive(Debug, Clone)]
pub struct SimHandles {
    pub battery: SimBattery,
    pub power_path: SimPowerPath,
    pub power_select: SimPowerSelect,
    pub gpio: SimGpio,
    pub flash: SimFlash,
}

/// Builds a full simulated hardware set around `flash`.
pub fn simulated(flash: SimFlash) -> (Hardware, SimHandles) {
    let battery = SimBattery::new();
    let power_path = SimPowerPath::new();
    let power_select = SimPowerSelect::default();
    let gpio = SimGpio {
        internal: Arc::clone(&power_select.internal),
        ..SimGpio::default()
    };

    let hardware = Hardware {
        power_path: Box::new(power_path.clone()),
        power_select: Box::new(power_select.clone()),
        bms: Box::new(battery.clone()),
        charger: Box::new(battery.clone()),
        fuel_gauge: Box::new(battery.clone()),
        gpio: Box::new(gpio.clone()),
        flash: Box::new(flash.clone()),
        storage: Box::new(flash.clone()),
    };
    let handles = SimHandles {
        battery,
        power_path,
        power_select,
        gpio,
        flash,
    };
    (hardware, handles)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_charger_connection_shows_up_as_charging() {
        let mut battery = SimBattery::new();
        assert!(!battery.read_charger().unwrap().charging);

        battery.connect_charger(true);
        let charger = battery.read_charger().unwrap();
        assert!(charger.charging);
        assert!(battery.read_bms().unwrap().current_ma > 0);
    }

    #[test]
    fn test_load_discharges_the_pack() {
        let mut battery = SimBattery::new();
        battery.set_load_ma(800);
        let before = battery.voltage_mv();
        let bms = battery.read_bms().unwrap();
        assert_eq!(bms.current_ma, -800);
        assert!(battery.voltage_mv() < before);
    }

    #[test]
    fn test_gpio_reflects_power_select() {
        let (_hw, handles) = simulated(SimFlash::new());
        let mut select = handles.power_select.clone();
        select.select_internal();
        assert!(handles.gpio.read_gpio().internal_power);
    }

    #[test]
    fn test_link_transport_forwards_on_flush() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut link = LinkTransport::new(tx);
        link.write(1).unwrap();
        link.write(0).unwrap();
        assert!(rx.try_recv().is_err());
        link.flush().unwrap();
        assert_eq!(rx.try_recv().unwrap(), vec![1, 0]);
    }
}
