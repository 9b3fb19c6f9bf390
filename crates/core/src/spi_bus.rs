//! SPI chip-select bus.
//!
//! The bus owns the attached slave devices, one per chip-select slot, and
//! tracks which one (if any) is currently selected. The master never talks to
//! a slave directly: it asserts a chip select with [`ChipSelectBus::set_cs`]
//! and then shifts data through [`ChipSelectBus::send`] /
//! [`ChipSelectBus::receive`], which reach only the active slave.

use crate::error::{BusError, SaveStateError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pass to [`ChipSelectBus::set_cs`] to deselect every device.
pub const NO_CS: u8 = 0xFF;

/// Chip-select lines on the SAM3S SPI controller (NPCS0..3).
pub const DEFAULT_SLOTS: usize = 4;

/// State a slave reports back to the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlaveState {
    /// Chip select deasserted, device is tristated.
    NoCs,
    /// Selected and ready to receive.
    Idle,
    /// Selected and holding data for the master.
    DataPending,
}

/// Capability contract every SPI slave device implements.
pub trait SpiSlave {
    /// Device name for diagnostics.
    fn name(&self) -> &str;

    /// Called once when the device is attached to a bus.
    fn init(&mut self) {}

    /// Chip-select line changed.
    fn chip_select(&mut self, selected: bool);

    /// Master to slave: `bits` significant bits of `data`.
    fn send(&mut self, data: u32, bits: u8) -> SlaveState;

    /// Slave to master.
    fn receive(&mut self) -> (SlaveState, u32);

    /// Poll the device state.
    fn state(&self) -> SlaveState;

    /// Serialized device contents for a save state. Stateless devices keep the default.
    fn snapshot(&self) -> Option<Vec<u8>> {
        None
    }

    /// Check that [`SpiSlave::restore`] would accept `data`, without applying it.
    fn check_snapshot(&self, _data: &[u8]) -> Result<(), SaveStateError> {
        Ok(())
    }

    /// Restore contents produced by [`SpiSlave::snapshot`].
    fn restore(&mut self, _data: &[u8]) -> Result<(), SaveStateError> {
        Ok(())
    }
}

pub struct ChipSelectBus {
    slots: Vec<Option<Box<dyn SpiSlave>>>,
    cur_slave: u8,
}

impl fmt::Debug for ChipSelectBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<Option<&str>> = self.slots.iter().map(|s| s.as_ref().map(|d| d.name())).collect();
        f.debug_struct("ChipSelectBus")
            .field("slots", &names)
            .field("cur_slave", &self.cur_slave)
            .finish()
    }
}

impl Default for ChipSelectBus {
    fn default() -> Self {
        Self::new(DEFAULT_SLOTS)
    }
}

impl ChipSelectBus {
    /// Create a bus with `num_slots` chip selects and nothing attached.
    pub fn new(num_slots: usize) -> Self {
        let mut slots = Vec::with_capacity(num_slots);
        slots.resize_with(num_slots, || None);
        ChipSelectBus { slots, cur_slave: NO_CS }
    }

    /// Bind `slave` to chip select `cs` and run its init hook.
    pub fn attach(&mut self, mut slave: Box<dyn SpiSlave>, cs: u8) -> Result<(), BusError> {
        let slots = self.slots.len();
        let slot = self
            .slots
            .get_mut(cs as usize)
            .ok_or(BusError::CsOutOfRange { cs, slots })?;
        if let Some(existing) = slot {
            return Err(BusError::CsInUse { cs, name: existing.name().to_string() });
        }
        slave.init();
        log::debug!("spi bus: attached {} on cs{}", slave.name(), cs);
        *slot = Some(slave);
        Ok(())
    }

    /// Change the chip select. [`NO_CS`] deselects everything.
    pub fn set_cs(&mut self, cs: u8) -> Result<(), BusError> {
        if cs == NO_CS {
            for slave in self.slots.iter_mut().flatten() {
                slave.chip_select(false);
            }
            self.cur_slave = NO_CS;
            return Ok(());
        }

        match self.slots.get(cs as usize) {
            None => return Err(BusError::CsOutOfRange { cs, slots: self.slots.len() }),
            Some(None) => return Err(BusError::NotAttached { cs }),
            Some(Some(_)) => {}
        }
        if cs == self.cur_slave {
            return Ok(());
        }

        if let Some(prev) = self.active_mut() {
            prev.chip_select(false);
        }
        self.cur_slave = cs;
        if let Some(next) = self.active_mut() {
            log::trace!("spi bus: cs{} -> {}", cs, next.name());
            next.chip_select(true);
        }
        Ok(())
    }

    /// Currently asserted chip select, or [`NO_CS`].
    pub fn cs(&self) -> u8 {
        self.cur_slave
    }

    pub fn state(&self) -> SlaveState {
        self.active().map_or(SlaveState::NoCs, |s| s.state())
    }

    pub fn send(&mut self, data: u32, bits: u8) -> SlaveState {
        match self.active_mut() {
            Some(slave) => slave.send(data, bits),
            None => SlaveState::NoCs,
        }
    }

    pub fn receive(&mut self) -> (SlaveState, u32) {
        match self.active_mut() {
            Some(slave) => slave.receive(),
            None => (SlaveState::NoCs, 0),
        }
    }

    /// Full-duplex exchange: send then collect the response.
    pub fn transfer(&mut self, data: u32, bits: u8) -> u32 {
        if self.send(data, bits) == SlaveState::NoCs {
            return 0;
        }
        self.receive().1
    }

    /// Snapshot every attached slave that carries state, keyed by chip select.
    pub fn snapshot_slaves(&self) -> Vec<(u8, Vec<u8>)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(cs, slot)| Some((cs as u8, slot.as_ref()?.snapshot()?)))
            .collect()
    }

    /// Check every saved entry against its slave. Entries for empty slots pass.
    pub fn check_slaves(&self, saved: &[(u8, Vec<u8>)]) -> Result<(), SaveStateError> {
        for (cs, data) in saved {
            if let Some(slave) = self.slave(*cs) {
                slave.check_snapshot(data)?;
            }
        }
        Ok(())
    }

    /// Hand saved contents back to the slaves. Nothing is restored unless every
    /// entry passes [`ChipSelectBus::check_slaves`]. Entries for empty slots are skipped.
    pub fn restore_slaves(&mut self, saved: &[(u8, Vec<u8>)]) -> Result<(), SaveStateError> {
        self.check_slaves(saved)?;
        for (cs, data) in saved {
            match self.slots.get_mut(*cs as usize) {
                Some(Some(slave)) => slave.restore(data)?,
                _ => log::warn!("spi bus: no slave on cs{} to restore", cs),
            }
        }
        Ok(())
    }

    pub fn slave(&self, cs: u8) -> Option<&dyn SpiSlave> {
        self.slots.get(cs as usize)?.as_deref()
    }

    fn active(&self) -> Option<&dyn SpiSlave> {
        self.slave(self.cur_slave)
    }

    fn active_mut(&mut self) -> Option<&mut (dyn SpiSlave + 'static)> {
        self.slots.get_mut(self.cur_slave as usize)?.as_deref_mut()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Event {
        Select(&'static str, bool),
        Send(&'static str, u32, u8),
    }

    /// Slave that records every callback and answers with `data ^ xor`.
    pub struct Recorder {
        pub name: &'static str,
        pub log: Rc<RefCell<Vec<Event>>>,
        pub xor: u32,
        selected: bool,
        pending: Option<u32>,
    }

    impl Recorder {
        pub fn new(name: &'static str, log: Rc<RefCell<Vec<Event>>>, xor: u32) -> Self {
            Recorder { name, log, xor, selected: false, pending: None }
        }
    }

    impl SpiSlave for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn chip_select(&mut self, selected: bool) {
            self.selected = selected;
            self.log.borrow_mut().push(Event::Select(self.name, selected));
        }

        fn send(&mut self, data: u32, bits: u8) -> SlaveState {
            self.log.borrow_mut().push(Event::Send(self.name, data, bits));
            self.pending = Some(data ^ self.xor);
            SlaveState::DataPending
        }

        fn receive(&mut self) -> (SlaveState, u32) {
            (SlaveState::Idle, self.pending.take().unwrap_or(0))
        }

        fn state(&self) -> SlaveState {
            match (self.selected, self.pending) {
                (false, _) => SlaveState::NoCs,
                (true, Some(_)) => SlaveState::DataPending,
                (true, None) => SlaveState::Idle,
            }
        }
    }

    fn two_slave_bus() -> (ChipSelectBus, Rc<RefCell<Vec<Event>>>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut bus = ChipSelectBus::default();
        bus.attach(Box::new(Recorder::new("s0", log.clone(), 0)), 0).unwrap();
        bus.attach(Box::new(Recorder::new("s1", log.clone(), 0xFF)), 1).unwrap();
        (bus, log)
    }

    #[test]
    fn test_attach_errors() {
        let (mut bus, log) = two_slave_bus();
        let err = bus.attach(Box::new(Recorder::new("dup", log.clone(), 0)), 1).unwrap_err();
        assert_eq!(err, BusError::CsInUse { cs: 1, name: "s1".into() });
        let err = bus.attach(Box::new(Recorder::new("far", log, 0)), 4).unwrap_err();
        assert_eq!(err, BusError::CsOutOfRange { cs: 4, slots: 4 });
    }

    #[test]
    fn test_switch_order() {
        let (mut bus, log) = two_slave_bus();
        bus.set_cs(0).unwrap();
        bus.set_cs(1).unwrap();
        assert_eq!(
            *log.borrow(),
            vec![
                Event::Select("s0", true),
                Event::Select("s0", false),
                Event::Select("s1", true),
            ]
        );
        log.borrow_mut().clear();

        assert_eq!(bus.transfer(0x0F, 8), 0xF0);
        assert_eq!(*log.borrow(), vec![Event::Send("s1", 0x0F, 8)]);
        assert_eq!(bus.cs(), 1);
    }

    #[test]
    fn test_no_cs() {
        let (mut bus, log) = two_slave_bus();
        bus.set_cs(1).unwrap();
        log.borrow_mut().clear();
        bus.set_cs(NO_CS).unwrap();
        assert_eq!(
            *log.borrow(),
            vec![Event::Select("s0", false), Event::Select("s1", false)]
        );
        assert_eq!(bus.send(0x55, 8), SlaveState::NoCs);
        assert_eq!(bus.receive(), (SlaveState::NoCs, 0));
        assert_eq!(bus.state(), SlaveState::NoCs);
    }

    #[test]
    fn test_unbound_cs_keeps_selection() {
        let (mut bus, _log) = two_slave_bus();
        bus.set_cs(0).unwrap();
        assert_eq!(bus.set_cs(3), Err(BusError::NotAttached { cs: 3 }));
        assert_eq!(bus.set_cs(9), Err(BusError::CsOutOfRange { cs: 9, slots: 4 }));
        assert_eq!(bus.cs(), 0);
    }

    #[test]
    fn test_reselect_same_is_quiet() {
        let (mut bus, log) = two_slave_bus();
        bus.set_cs(0).unwrap();
        bus.set_cs(0).unwrap();
        assert_eq!(*log.borrow(), vec![Event::Select("s0", true)]);
    }
}
