//! Real-time timer.
//!
//! A free-running 32-bit counter with an alarm comparator. Unlike the SPI
//! controller and PMC, the status bits drive the interrupt line directly and
//! the status register clears on read.

use crate::error::{self, AccessError};
use crate::irq::IrqLine;
use crate::regmap::RegisterBlock;
use crate::savestate::RttState;

pub const RTT_WINDOW: u32 = 0x20;

// RTT_MR
pub const MR_ALMIEN: u32 = 1 << 16;
pub const MR_RTTINCIEN: u32 = 1 << 17;
pub const MR_RTTRST: u32 = 1 << 18;

// RTT_SR
pub const SR_ALMS: u32 = 1 << 0;
pub const SR_RTTINC: u32 = 1 << 1;

crate::register_block! {
    device = "rtt";
    pub enum RttReg {
        Mr = 0x00 => "RTT_MR", ReadWrite, Open;
        Ar = 0x04 => "RTT_AR", ReadWrite, Open;
        Vr = 0x08 => "RTT_VR", ReadOnly,  Open;
        Sr = 0x0c => "RTT_SR", ReadOnly,  Open;
    }
}

#[derive(Debug)]
pub struct Rtt {
    mr: u32,
    ar: u32,
    vr: u32,
    sr: u32,
    irq: IrqLine,
}

impl Rtt {
    pub fn new() -> Self {
        Rtt { mr: 0x0000_8000, ar: 0xFFFF_FFFF, vr: 0, sr: 0, irq: IrqLine::new() }
    }

    pub fn reset(&mut self) {
        *self = Rtt::new();
    }

    pub fn read(&mut self, offset: u32) -> u32 {
        error::read_or_zero(self.try_read(offset))
    }

    pub fn write(&mut self, offset: u32, value: u32) {
        error::log_write(self.try_write(offset, value))
    }

    pub fn try_read(&mut self, offset: u32) -> Result<u32, AccessError> {
        let val = match RttReg::decode_read(offset)? {
            RttReg::Mr => self.mr,
            RttReg::Ar => self.ar,
            RttReg::Vr => self.vr,
            RttReg::Sr => {
                let sr = self.sr;
                self.sr = 0;
                self.update_line();
                sr
            }
        };
        Ok(val)
    }

    pub fn try_write(&mut self, offset: u32, value: u32) -> Result<(), AccessError> {
        let reg = RttReg::decode_write(offset, false)?;
        log::trace!("rtt: {} <= {:#010x}", reg.name(), value);
        match reg {
            RttReg::Mr => self.mr = value,
            RttReg::Ar => self.ar = value,
            RttReg::Vr | RttReg::Sr => {
                return Err(AccessError::ReadOnly { device: RttReg::DEVICE, reg: reg.name() })
            }
        }
        self.update();
        Ok(())
    }

    /// One slow tick: bump the counter and re-evaluate alarm state.
    pub fn tick(&mut self) {
        self.vr = self.vr.wrapping_add(1);
        self.sr |= SR_RTTINC;
        self.update();
    }

    fn update(&mut self) {
        if self.mr & MR_RTTRST != 0 {
            self.vr = 0;
            self.mr &= !MR_RTTRST;
        }
        if self.vr == self.ar {
            self.sr |= SR_ALMS;
        }
        self.update_line();
    }

    /// Status bits are wired to the line regardless of ALMIEN/RTTINCIEN.
    fn update_line(&mut self) {
        self.irq.set(self.sr & (SR_ALMS | SR_RTTINC) != 0);
    }

    pub fn value(&self) -> u32 {
        self.vr
    }

    pub fn irq(&self) -> &IrqLine {
        &self.irq
    }

    pub fn save_state(&self) -> RttState {
        RttState { mr: self.mr, ar: self.ar, vr: self.vr, sr: self.sr }
    }

    pub fn load_state(&mut self, s: &RttState) {
        self.mr = s.mr;
        self.ar = s.ar;
        self.vr = s.vr;
        self.sr = s.sr;
        self.update_line();
    }
}

impl Default for Rtt {
    fn default() -> Self {
        Self::new()
    }
}
