//! System controller stub.
//!
//! Answers the chip identification registers for the selected board and
//! carries the Cortex-M system control block fields the board keeps in its
//! snapshots. Nothing else in the window is implemented.

use serde::{Deserialize, Serialize};

use crate::error::{self, AccessError};
use crate::regmap::RegisterBlock;
use crate::savestate::SysCtlState;

pub const SYSCTL_WINDOW: u32 = 0x1000;

/// Supported SAM3S board variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Board {
    #[default]
    At91Sam3s8,
    At91Sam3sd8,
}

impl Board {
    pub const ALL: [Board; 2] = [Board::At91Sam3s8, Board::At91Sam3sd8];

    pub fn name(self) -> &'static str {
        match self {
            Board::At91Sam3s8 => "AT91SAM3S8",
            Board::At91Sam3sd8 => "AT91SAM3SD8",
        }
    }

    /// CHIPID_CIDR value.
    pub fn cidr(self) -> u32 {
        match self {
            Board::At91Sam3s8 => 0x28AB_0A60,
            Board::At91Sam3sd8 => 0x29AB_0A60,
        }
    }

    /// CHIPID_EXID value.
    pub fn exid(self) -> u32 {
        0
    }

    /// Case-insensitive lookup by board name.
    pub fn from_name(name: &str) -> Option<Board> {
        Board::ALL.iter().copied().find(|b| b.name().eq_ignore_ascii_case(name))
    }

    /// Type byte stored in the save state header.
    pub fn id(self) -> u8 {
        match self {
            Board::At91Sam3s8 => 0,
            Board::At91Sam3sd8 => 1,
        }
    }
}

crate::register_block! {
    device = "sysctl";
    pub enum SysCtlReg {
        Cidr = 0x00 => "CHIPID_CIDR", ReadOnly, Open;
        Exid = 0x04 => "CHIPID_EXID", ReadOnly, Open;
    }
}

/// Cortex-M3 system control block fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreShadow {
    pub actlr: u32,
    pub cpuid: u32,
    pub icsr: u32,
    pub vtor: u32,
    pub aircr: u32,
    pub scr: u32,
    pub ccr: u32,
    pub shcsr: u32,
}

impl Default for CoreShadow {
    fn default() -> Self {
        CoreShadow {
            actlr: 0,
            cpuid: 0x412F_C230, // Cortex-M3 r2p0
            icsr: 0,
            vtor: 0,
            aircr: 0xFA05_0000,
            scr: 0,
            ccr: 0x0000_0200,
            shcsr: 0,
        }
    }
}

#[derive(Debug)]
pub struct SysCtl {
    board: Board,
    pub core: CoreShadow,
}

impl SysCtl {
    pub fn new(board: Board) -> Self {
        SysCtl { board, core: CoreShadow::default() }
    }

    pub fn reset(&mut self) {
        self.core = CoreShadow::default();
    }

    pub fn board(&self) -> Board {
        self.board
    }

    pub fn read(&self, offset: u32) -> u32 {
        error::read_or_zero(self.try_read(offset))
    }

    pub fn write(&mut self, offset: u32, value: u32) {
        error::log_write(self.try_write(offset, value))
    }

    pub fn try_read(&self, offset: u32) -> Result<u32, AccessError> {
        Ok(match SysCtlReg::decode_read(offset)? {
            SysCtlReg::Cidr => self.board.cidr(),
            SysCtlReg::Exid => self.board.exid(),
        })
    }

    pub fn try_write(&mut self, offset: u32, _value: u32) -> Result<(), AccessError> {
        let reg = SysCtlReg::decode_write(offset, false)?;
        Err(AccessError::ReadOnly { device: SysCtlReg::DEVICE, reg: reg.name() })
    }

    pub fn save_state(&self) -> SysCtlState {
        SysCtlState { core: self.core }
    }

    pub fn load_state(&mut self, s: &SysCtlState) {
        self.core = s.core;
    }
}
