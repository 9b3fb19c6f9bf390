//! AT91SAM3S peripheral emulation.
//!
//! Memory-mapped device models, each addressed by offset within its window:
//!
//! - [`SpiController`] - SPI master with 8-deep TX/RX FIFOs and a chip-select bus
//! - [`Pmc`] - Power Management Controller (oscillator start-up, PLL lock)
//! - [`Rtt`] - Real-time timer (counter + alarm)
//! - [`SysCtl`] - System controller stub (chip identification)

mod fifo;
pub mod spi;
pub mod pmc;
pub mod rtt;
pub mod sysctl;

pub use fifo::{Fifo, FIFO_DEPTH};
pub use spi::{SpiController, SpiReg};
pub use pmc::{Pmc, PmcReg};
pub use rtt::{Rtt, RttReg};
pub use sysctl::{Board, CoreShadow, SysCtl};

// Board memory map
pub const SPI_BASE: u32 = 0x4000_8000;
pub const PMC_BASE: u32 = 0x400E_0400;
pub const SYSCTL_BASE: u32 = 0x400E_0740;
pub const RTT_BASE: u32 = 0x400E_1430;

// NVIC interrupt numbers
pub const IRQ_RTT: u32 = 3;
pub const IRQ_PMC: u32 = 5;
pub const IRQ_SPI: u32 = 21;
pub const IRQ_SYSCTL: u32 = 28;
