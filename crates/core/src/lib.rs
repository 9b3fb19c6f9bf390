//! # sam3s-core
//!
//! Memory-mapped models of AT91SAM3S peripherals for a full-system emulator.
//!
//! The host emulator owns the CPU, the address-space dispatch and interrupt
//! delivery; this crate supplies devices with narrow entry points: register
//! `read`/`write` by offset, a side-effect-free debug path, a periodic `tick`,
//! a level-triggered [`irq::IrqLine`] per device and `save_state`/`load_state`
//! snapshot structs.
//!
//! ## Architecture
//!
//! - [`Machine`] - Wires the devices at their board addresses and drives the tick scheduler
//! - [`DebugPort`] - Debugger access that bypasses FIFOs and status side effects
//! - [`peripherals`] - SPI controller, PMC, RTT, system controller stub
//! - [`spi_bus`] - Chip-select bus and the [`spi_bus::SpiSlave`] contract
//! - [`slaves`] - SPI slave devices (serial NOR flash)
//! - [`scheduler`] - Periodic tick timers in host cycles
//! - [`savestate`] - Versioned snapshot container
//! - [`regmap`] - Register decode tables
//!
//! Register accesses never fail the machine. Bad offsets, locked registers and
//! invalid configurations are reported on the `guest_error` log target and
//! the access is dropped (reads return 0).

pub mod error;
pub mod irq;
pub mod regmap;
pub mod spi_bus;
pub mod peripherals;
pub mod scheduler;
pub mod savestate;
pub mod slaves;

use serde::{Deserialize, Serialize};
use std::path::Path;

pub use error::{AccessError, BusError, SaveStateError};
pub use peripherals::{Board, Pmc, Rtt, SpiController, SysCtl};
pub use scheduler::{Scheduler, TickSource};
pub use spi_bus::{ChipSelectBus, SlaveState, SpiSlave, NO_CS};

use peripherals::{pmc, rtt, spi, sysctl};
use savestate::{SaveState, SlaveSnapshot};

/// Default master clock used to convert tick rates into host cycles: 64 MHz
pub const DEFAULT_HOST_CLOCK_HZ: u64 = 64_000_000;
/// Default PMC/RTT tick rate
pub const DEFAULT_SLOW_TICK_HZ: u32 = 10;
/// Default main crystal: 12 MHz
pub const DEFAULT_MAIN_CRYSTAL_HZ: u32 = 12_000_000;

/// Machine configuration. Persisted in snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    pub board: Board,
    /// Host cycles per second, the unit of [`Machine::advance`]
    pub host_clock_hz: u64,
    /// PMC and RTT tick rate
    pub slow_tick_hz: u32,
    pub main_crystal_hz: u32,
}

impl Default for MachineConfig {
    fn default() -> Self {
        MachineConfig {
            board: Board::default(),
            host_clock_hz: DEFAULT_HOST_CLOCK_HZ,
            slow_tick_hz: DEFAULT_SLOW_TICK_HZ,
            main_crystal_hz: DEFAULT_MAIN_CRYSTAL_HZ,
        }
    }
}

/// A memory-mapped device on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Spi,
    Pmc,
    Rtt,
    SysCtl,
}

impl Device {
    /// Dispatch order. The system controller window overlaps the RTT, which wins.
    pub const ALL: [Device; 4] = [Device::Spi, Device::Pmc, Device::Rtt, Device::SysCtl];

    pub fn name(self) -> &'static str {
        match self {
            Device::Spi => "spi",
            Device::Pmc => "pmc",
            Device::Rtt => "rtt",
            Device::SysCtl => "sysctl",
        }
    }

    pub fn base(self) -> u32 {
        match self {
            Device::Spi => peripherals::SPI_BASE,
            Device::Pmc => peripherals::PMC_BASE,
            Device::Rtt => peripherals::RTT_BASE,
            Device::SysCtl => peripherals::SYSCTL_BASE,
        }
    }

    pub fn size(self) -> u32 {
        match self {
            Device::Spi => spi::SPI_WINDOW,
            Device::Pmc => pmc::PMC_WINDOW,
            Device::Rtt => rtt::RTT_WINDOW,
            Device::SysCtl => sysctl::SYSCTL_WINDOW,
        }
    }

    pub fn irq(self) -> u32 {
        match self {
            Device::Spi => peripherals::IRQ_SPI,
            Device::Pmc => peripherals::IRQ_PMC,
            Device::Rtt => peripherals::IRQ_RTT,
            Device::SysCtl => peripherals::IRQ_SYSCTL,
        }
    }

    /// Find the device owning `addr` and the offset within its window.
    pub fn decode(addr: u32) -> Option<(Device, u32)> {
        Device::ALL
            .iter()
            .copied()
            .find(|d| addr >= d.base() && addr - d.base() < d.size())
            .map(|d| (d, addr - d.base()))
    }
}

fn unmapped(addr: u32) -> AccessError {
    AccessError::BadOffset { device: "bus", offset: addr }
}

/// The board: every peripheral at its address plus the tick scheduler.
pub struct Machine {
    config: MachineConfig,
    pub spi: SpiController,
    pub pmc: Pmc,
    pub rtt: Rtt,
    pub sysctl: SysCtl,
    scheduler: Scheduler,
}

impl Machine {
    pub fn new(config: MachineConfig) -> Self {
        log::info!(
            "{}: host clock {} Hz, tick {} Hz",
            config.board.name(),
            config.host_clock_hz,
            config.slow_tick_hz
        );
        Machine {
            spi: SpiController::new(),
            pmc: Pmc::new(config.main_crystal_hz),
            rtt: Rtt::new(),
            sysctl: SysCtl::new(config.board),
            scheduler: Scheduler::new(config.host_clock_hz, config.slow_tick_hz),
            config,
        }
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    /// Reset every device and restart the tick timers. Slaves stay attached.
    pub fn reset(&mut self) {
        self.spi.reset();
        self.pmc.reset();
        self.rtt.reset();
        self.sysctl.reset();
        self.scheduler = Scheduler::new(self.config.host_clock_hz, self.config.slow_tick_hz);
    }

    /// Attach an SPI slave on chip select `cs`.
    pub fn attach_slave(&mut self, slave: Box<dyn SpiSlave>, cs: u8) -> Result<(), BusError> {
        self.spi.bus_mut().attach(slave, cs)
    }

    pub fn try_read(&mut self, addr: u32) -> Result<u32, AccessError> {
        let (dev, off) = Device::decode(addr).ok_or_else(|| unmapped(addr))?;
        match dev {
            Device::Spi => self.spi.try_read(off),
            Device::Pmc => self.pmc.try_read(off),
            Device::Rtt => self.rtt.try_read(off),
            Device::SysCtl => self.sysctl.try_read(off),
        }
    }

    pub fn try_write(&mut self, addr: u32, value: u32) -> Result<(), AccessError> {
        let (dev, off) = Device::decode(addr).ok_or_else(|| unmapped(addr))?;
        match dev {
            Device::Spi => self.spi.try_write(off, value),
            Device::Pmc => self.pmc.try_write(off, value),
            Device::Rtt => self.rtt.try_write(off, value),
            Device::SysCtl => self.sysctl.try_write(off, value),
        }
    }

    /// 32-bit bus read. Errors are logged and read as zero.
    pub fn read(&mut self, addr: u32) -> u32 {
        error::read_or_zero(self.try_read(addr))
    }

    /// 32-bit bus write. Errors are logged and the write dropped.
    pub fn write(&mut self, addr: u32, value: u32) {
        error::log_write(self.try_write(addr, value))
    }

    /// Debugger access handle.
    pub fn debug(&mut self) -> DebugPort<'_> {
        DebugPort { machine: self }
    }

    /// Deliver one tick to `source`.
    pub fn tick(&mut self, source: TickSource) {
        match source {
            TickSource::Pmc => self.pmc.tick(),
            TickSource::Rtt => self.rtt.tick(),
        }
    }

    /// Advance host time by `cycles`, dispatching every tick that falls due.
    /// Returns the number of ticks delivered.
    pub fn advance(&mut self, cycles: u64) -> usize {
        let fired = self.scheduler.advance(cycles);
        for &source in &fired {
            self.tick(source);
        }
        fired.len()
    }

    pub fn now(&self) -> u64 {
        self.scheduler.now()
    }

    /// IRQ numbers whose line is currently asserted, ascending.
    pub fn pending_irqs(&self) -> Vec<u32> {
        let mut irqs: Vec<u32> = [
            (Device::Rtt, self.rtt.irq().level()),
            (Device::Pmc, self.pmc.irq().level()),
            (Device::Spi, self.spi.irq().level()),
        ]
        .iter()
        .filter(|(_, level)| *level)
        .map(|(dev, _)| dev.irq())
        .collect();
        irqs.sort_unstable();
        irqs
    }

    /// Capture state for save state.
    pub fn save_state(&self) -> SaveState {
        SaveState {
            config: self.config.clone(),
            spi: self.spi.save_state(),
            pmc: self.pmc.save_state(),
            rtt: self.rtt.save_state(),
            sysctl: self.sysctl.save_state(),
            scheduler: self.scheduler.save_state(),
            slaves: self
                .spi
                .bus()
                .snapshot_slaves()
                .into_iter()
                .map(|(cs, data)| SlaveSnapshot { cs, data })
                .collect(),
        }
    }

    /// Restore state from save state. The board must match.
    pub fn load_state(&mut self, s: &SaveState) -> Result<(), SaveStateError> {
        if s.config.board != self.config.board {
            return Err(SaveStateError::BoardMismatch {
                found: s.config.board.name().to_string(),
                expected: self.config.board.name().to_string(),
            });
        }
        let saved: Vec<(u8, Vec<u8>)> = s.slaves.iter().map(|x| (x.cs, x.data.clone())).collect();
        self.spi.bus_mut().restore_slaves(&saved)?;

        self.config = s.config.clone();
        self.pmc = Pmc::new(self.config.main_crystal_hz);
        self.scheduler = Scheduler::new(self.config.host_clock_hz, self.config.slow_tick_hz);
        self.spi.load_state(&s.spi);
        self.pmc.load_state(&s.pmc);
        self.rtt.load_state(&s.rtt);
        self.sysctl.load_state(&s.sysctl);
        self.scheduler.load_state(&s.scheduler);
        Ok(())
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), SaveStateError> {
        savestate::save_to_file(&self.save_state(), path)
    }

    pub fn load_from_file(&mut self, path: &Path) -> Result<(), SaveStateError> {
        let state = savestate::load_from_file(path, self.config.board)?;
        self.load_state(&state)
    }
}

/// Debugger view of the machine.
///
/// SPI accesses use the controller's raw register path: no FIFO traffic, no
/// status updates, and the live RDR/TDR registers switch to their shadow
/// copies until [`DebugPort::end_session`]. Devices without a debug path are
/// accessed normally.
pub struct DebugPort<'a> {
    machine: &'a mut Machine,
}

impl DebugPort<'_> {
    pub fn read(&mut self, addr: u32) -> Result<u32, AccessError> {
        match Device::decode(addr) {
            Some((Device::Spi, off)) => self.machine.spi.debug_read(off),
            Some(_) => self.machine.try_read(addr),
            None => Err(unmapped(addr)),
        }
    }

    pub fn write(&mut self, addr: u32, value: u32) -> Result<(), AccessError> {
        match Device::decode(addr) {
            Some((Device::Spi, off)) => self.machine.spi.debug_write(off, value),
            Some(_) => self.machine.try_write(addr, value),
            None => Err(unmapped(addr)),
        }
    }

    /// Leave SPI shadow mode.
    pub fn end_session(self) {
        self.machine.spi.end_debug_session();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode() {
        assert_eq!(Device::decode(0x4000_8004), Some((Device::Spi, 4)));
        assert_eq!(Device::decode(0x400E_0468), Some((Device::Pmc, 0x68)));
        assert_eq!(Device::decode(0x400E_1438), Some((Device::Rtt, 8)));
        assert_eq!(Device::decode(0x400E_0740), Some((Device::SysCtl, 0)));
        assert_eq!(Device::decode(0x2000_0000), None);
    }

    #[test]
    fn test_unmapped_reads_zero() {
        let mut m = Machine::new(MachineConfig::default());
        assert_eq!(m.read(0x1234_5678), 0);
        assert_eq!(m.try_read(0x1234_5678), Err(unmapped(0x1234_5678)));
        m.write(0x1234_5678, 1);
    }

    #[test]
    fn test_config_serde_defaults() {
        let cfg = MachineConfig::default();
        assert_eq!(cfg.slow_tick_hz, 10);
        assert_eq!(cfg.main_crystal_hz, 12_000_000);
        let bytes = bincode::serialize(&cfg).unwrap();
        let back: MachineConfig = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn test_advance_drives_rtt() {
        let cfg = MachineConfig { host_clock_hz: 1_000, ..MachineConfig::default() };
        let mut m = Machine::new(cfg);
        assert_eq!(m.advance(1_000), 20);
        assert_eq!(m.rtt.value(), 10);
        assert_eq!(m.pending_irqs(), vec![peripherals::IRQ_RTT]);
    }
}
