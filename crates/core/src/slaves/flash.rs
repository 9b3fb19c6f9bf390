//! Serial NOR flash (Winbond W25Qxx command set) as an SPI slave.
//!
//! Supported commands:
//! - 0x03: Read Data (addr24, then continuous read)
//! - 0x0B: Fast Read (addr24 + dummy, then continuous read)
//! - 0x9F: JEDEC ID → EF 40 <capacity>
//! - 0xAB: Release Power Down / Device ID (3 dummy bytes, then ID)
//! - 0x05: Read Status Register 1 (BUSY always 0, WEL)
//! - 0xB9: Power Down
//! - 0x06 / 0x04: Write Enable / Write Disable
//! - 0x02: Page Program (addr24 + data, wraps within the 256-byte page)
//! - 0x20: Sector Erase (4 KiB)
//!
//! One command per chip-select assertion; deselecting aborts whatever is in
//! progress.

use serde::{Deserialize, Serialize};

use crate::error::SaveStateError;
use crate::spi_bus::{SlaveState, SpiSlave};

const MFR_WINBOND: u8 = 0xEF;
const MEM_TYPE_SPI: u8 = 0x40;
const PAGE_SIZE: u32 = 256;
const SECTOR_SIZE: usize = 4096;

pub const STATUS_WEL: u8 = 1 << 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AddrOp {
    Read,
    FastRead,
    Program,
    Erase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Waiting for the opcode.
    Command,
    Address { op: AddrOp, count: u8, addr: u32 },
    Dummy { addr: u32 },
    Reading { addr: u32 },
    Programming { addr: u32 },
    JedecId { idx: u8 },
    DeviceId { idx: u8 },
    Status,
    /// Command finished; further bytes are ignored until deselect.
    Done,
}

#[derive(Serialize, Deserialize)]
struct FlashState {
    data: Vec<u8>,
    write_enabled: bool,
    powered_down: bool,
}

pub struct SpiFlash {
    name: String,
    data: Vec<u8>,
    phase: Phase,
    selected: bool,
    /// MISO byte produced by the last send.
    response: Option<u8>,
    write_enabled: bool,
    powered_down: bool,
}

impl SpiFlash {
    /// Create an erased flash of `size` bytes, rounded up to a power of two
    /// of at least one sector.
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        let size = size.max(SECTOR_SIZE).next_power_of_two();
        SpiFlash {
            name: name.into(),
            data: vec![0xFF; size],
            phase: Phase::Command,
            selected: false,
            response: None,
            write_enabled: false,
            powered_down: false,
        }
    }

    /// Copy `bin` into the array at `offset`, truncating at the end of flash.
    pub fn load_data_at(&mut self, bin: &[u8], offset: usize) {
        if offset >= self.data.len() {
            return;
        }
        let end = (offset + bin.len()).min(self.data.len());
        self.data[offset..end].copy_from_slice(&bin[..end - offset]);
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Third JEDEC ID byte: log2 of the size in bytes.
    fn capacity_code(&self) -> u8 {
        self.data.len().trailing_zeros() as u8
    }

    /// Decode a snapshot, rejecting one taken from a flash of another size.
    fn decode_snapshot(&self, data: &[u8]) -> Result<FlashState, SaveStateError> {
        let state: FlashState = bincode::deserialize(data)?;
        if state.data.len() != self.data.len() {
            return Err(SaveStateError::SlaveSize {
                device: self.name.clone(),
                found: state.data.len(),
                expected: self.data.len(),
            });
        }
        Ok(state)
    }

    fn mask(&self, addr: u32) -> u32 {
        addr & (self.data.len() as u32 - 1)
    }

    pub fn status(&self) -> u8 {
        if self.write_enabled {
            STATUS_WEL
        } else {
            0
        }
    }

    fn command(&mut self, op: u8) -> u8 {
        if self.powered_down && op != 0xAB {
            log::debug!("{}: ignoring {:#04x} while powered down", self.name, op);
            self.phase = Phase::Done;
            return 0xFF;
        }
        self.phase = match op {
            0x03 => Phase::Address { op: AddrOp::Read, count: 0, addr: 0 },
            0x0B => Phase::Address { op: AddrOp::FastRead, count: 0, addr: 0 },
            0x02 => Phase::Address { op: AddrOp::Program, count: 0, addr: 0 },
            0x20 => Phase::Address { op: AddrOp::Erase, count: 0, addr: 0 },
            0x9F => Phase::JedecId { idx: 0 },
            0xAB => {
                self.powered_down = false;
                Phase::DeviceId { idx: 0 }
            }
            0x05 => Phase::Status,
            0xB9 => {
                self.powered_down = true;
                Phase::Done
            }
            0x06 => {
                self.write_enabled = true;
                Phase::Done
            }
            0x04 => {
                self.write_enabled = false;
                Phase::Done
            }
            _ => {
                log::debug!("{}: unknown command {:#04x}", self.name, op);
                Phase::Done
            }
        };
        0xFF
    }

    /// Shift one byte through the device and return the MISO byte.
    fn exchange(&mut self, mosi: u8) -> u8 {
        match self.phase {
            Phase::Command => self.command(mosi),

            Phase::Address { op, count, addr } => {
                let addr = (addr << 8) | mosi as u32;
                if count < 2 {
                    self.phase = Phase::Address { op, count: count + 1, addr };
                    return 0xFF;
                }
                let addr = self.mask(addr);
                self.phase = match op {
                    AddrOp::Read => Phase::Reading { addr },
                    AddrOp::FastRead => Phase::Dummy { addr },
                    AddrOp::Program => Phase::Programming { addr },
                    AddrOp::Erase => {
                        self.erase_sector(addr);
                        Phase::Done
                    }
                };
                0xFF
            }

            Phase::Dummy { addr } => {
                self.phase = Phase::Reading { addr };
                0xFF
            }

            Phase::Reading { addr } => {
                let val = self.data[addr as usize];
                self.phase = Phase::Reading { addr: self.mask(addr.wrapping_add(1)) };
                val
            }

            Phase::Programming { addr } => {
                if self.write_enabled {
                    // Programming can only clear bits
                    self.data[addr as usize] &= mosi;
                    let next = (addr & !(PAGE_SIZE - 1)) | (addr.wrapping_add(1) & (PAGE_SIZE - 1));
                    self.phase = Phase::Programming { addr: next };
                } else {
                    self.phase = Phase::Done;
                }
                0xFF
            }

            Phase::JedecId { idx } => {
                self.phase = Phase::JedecId { idx: idx.saturating_add(1) };
                match idx {
                    0 => MFR_WINBOND,
                    1 => MEM_TYPE_SPI,
                    2 => self.capacity_code(),
                    _ => 0x00,
                }
            }

            Phase::DeviceId { idx } => {
                self.phase = Phase::DeviceId { idx: idx.saturating_add(1) };
                if idx >= 3 {
                    self.capacity_code() - 1
                } else {
                    0xFF
                }
            }

            Phase::Status => self.status(),

            Phase::Done => 0xFF,
        }
    }

    fn erase_sector(&mut self, addr: u32) {
        if self.write_enabled {
            let start = addr as usize & !(SECTOR_SIZE - 1);
            let end = (start + SECTOR_SIZE).min(self.data.len());
            self.data[start..end].fill(0xFF);
            log::debug!("{}: erased sector {:#08x}", self.name, start);
        }
        self.write_enabled = false;
    }

    /// Finish a page program: WEL drops once the command ends.
    fn end_command(&mut self) {
        if let Phase::Programming { .. } = self.phase {
            self.write_enabled = false;
        }
        self.phase = Phase::Command;
        self.response = None;
    }
}

impl SpiSlave for SpiFlash {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self) {
        self.end_command();
        self.selected = false;
    }

    fn chip_select(&mut self, selected: bool) {
        if self.selected && !selected {
            self.end_command();
        }
        self.selected = selected;
    }

    fn send(&mut self, data: u32, _bits: u8) -> SlaveState {
        if !self.selected {
            return SlaveState::NoCs;
        }
        let miso = self.exchange(data as u8);
        self.response = Some(miso);
        SlaveState::DataPending
    }

    fn receive(&mut self) -> (SlaveState, u32) {
        if !self.selected {
            return (SlaveState::NoCs, 0);
        }
        (SlaveState::Idle, self.response.take().unwrap_or(0xFF) as u32)
    }

    fn state(&self) -> SlaveState {
        match (self.selected, self.response) {
            (false, _) => SlaveState::NoCs,
            (true, Some(_)) => SlaveState::DataPending,
            (true, None) => SlaveState::Idle,
        }
    }

    fn snapshot(&self) -> Option<Vec<u8>> {
        let state = FlashState {
            data: self.data.clone(),
            write_enabled: self.write_enabled,
            powered_down: self.powered_down,
        };
        match bincode::serialize(&state) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                log::error!("{}: snapshot failed: {}", self.name, e);
                None
            }
        }
    }

    fn check_snapshot(&self, data: &[u8]) -> Result<(), SaveStateError> {
        self.decode_snapshot(data).map(|_| ())
    }

    fn restore(&mut self, data: &[u8]) -> Result<(), SaveStateError> {
        let state = self.decode_snapshot(data)?;
        self.data = state.data;
        self.write_enabled = state.write_enabled;
        self.powered_down = state.powered_down;
        self.phase = Phase::Command;
        self.response = None;
        Ok(())
    }
}
