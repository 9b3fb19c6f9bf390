//! Power Management Controller emulation.
//!
//! Only enough of the clock tree is modeled for firmware to get past its
//! clock setup: the main oscillator start-up countdown, PLL A/B lock
//! countdowns, master clock source selection and the peripheral/system clock
//! enable bookkeeping. Counters advance once per [`Pmc::tick`], which the
//! machine's scheduler calls at the slow tick rate.

use crate::error::{self, AccessError};
use crate::irq::{self, IrqLine};
use crate::regmap::RegisterBlock;
use crate::savestate::PmcState;

pub const PMC_WINDOW: u32 = 0x200;
/// Slow clock (32 kHz crystal / RC).
pub const SLOW_CLOCK_HZ: u32 = 32_768;

// PMC_SCER / SCDR / SCSR
pub const SC_PCK0: u32 = 1 << 8;
pub const SC_PCK1: u32 = 1 << 9;
pub const SC_PCK2: u32 = 1 << 10;
const SC_PCK_MASK: u32 = SC_PCK0 | SC_PCK1 | SC_PCK2;

// CKGR_MOR
pub const MOR_MOSCXTEN: u32 = 1 << 0;
pub const MOR_MOSCXTBY: u32 = 1 << 1;
pub const MOR_MOSCRCEN: u32 = 1 << 3;
const MOR_MOSCRCF_SHIFT: u32 = 4;
const MOR_MOSCXTST_MASK: u32 = 0xff << 8;
pub const MOR_KEY: u32 = 0x37 << 16;
const MOR_KEY_MASK: u32 = 0xff << 16;
pub const MOR_MOSCSEL: u32 = 1 << 24;

// CKGR_MCFR
pub const MCFR_MAINF: u32 = 0xffff;
pub const MCFR_MAINFRDY: u32 = 1 << 16;

// CKGR_PLLxR
pub const PLL_ONE: u32 = 1 << 29;
const PLL_COUNT_MASK: u32 = 0x3f << 8;
const PLL_MUL_SHIFT: u32 = 16;

// PMC_MCKR
pub const MCKR_CSS_MASK: u32 = 0x3;
pub const CSS_SLOW: u32 = 0;
pub const CSS_MAIN: u32 = 1;
pub const CSS_PLLA: u32 = 2;
pub const CSS_PLLB: u32 = 3;
const MCKR_PRES_MASK: u32 = 0x7 << 4;

// PMC_SR / IER / IDR / IMR
pub const SR_MOSCXTS: u32 = 1 << 0;
pub const SR_LOCKA: u32 = 1 << 1;
pub const SR_LOCKB: u32 = 1 << 2;
pub const SR_MCKRDY: u32 = 1 << 3;
pub const SR_MOSCSELS: u32 = 1 << 16;

// PMC_WPMR / WPSR
pub const WPMR_WPEN: u32 = 1 << 0;
/// "PMC" in ASCII.
pub const WPMR_KEY: u32 = 0x50_4d_43;
pub const WPSR_WPVS: u32 = 1 << 0;

crate::register_block! {
    device = "pmc";
    pub enum PmcReg {
        Scer  = 0x000 => "PMC_SCER",   WriteOnly, Protected;
        Scdr  = 0x004 => "PMC_SCDR",   WriteOnly, Protected;
        Scsr  = 0x008 => "PMC_SCSR",   ReadOnly,  Open;
        Pcer0 = 0x010 => "PMC_PCER0",  WriteOnly, Protected;
        Pcdr0 = 0x014 => "PMC_PCDR0",  WriteOnly, Protected;
        Pcsr0 = 0x018 => "PMC_PCSR0",  ReadOnly,  Open;
        Mor   = 0x020 => "CKGR_MOR",   ReadWrite, Protected;
        Mcfr  = 0x024 => "CKGR_MCFR",  ReadOnly,  Open;
        Pllar = 0x028 => "CKGR_PLLAR", ReadWrite, Protected;
        Pllbr = 0x02c => "CKGR_PLLBR", ReadWrite, Protected;
        Mckr  = 0x030 => "PMC_MCKR",   ReadWrite, Protected;
        Usb   = 0x038 => "PMC_USB",    ReadWrite, Protected;
        Pck0  = 0x040 => "PMC_PCK0",   ReadWrite, Protected;
        Pck1  = 0x044 => "PMC_PCK1",   ReadWrite, Protected;
        Pck2  = 0x048 => "PMC_PCK2",   ReadWrite, Protected;
        Ier   = 0x060 => "PMC_IER",    WriteOnly, Open;
        Idr   = 0x064 => "PMC_IDR",    WriteOnly, Open;
        Sr    = 0x068 => "PMC_SR",     ReadOnly,  Open;
        Imr   = 0x06c => "PMC_IMR",    ReadOnly,  Open;
        Fsmr  = 0x070 => "PMC_FSMR",   ReadWrite, Protected;
        Fspr  = 0x074 => "PMC_FSPR",   ReadWrite, Protected;
        Focr  = 0x078 => "PMC_FOCR",   WriteOnly, Open;
        Wpmr  = 0x0e4 => "PMC_WPMR",   ReadWrite, Open;
        Wpsr  = 0x0e8 => "PMC_WPSR",   ReadOnly,  Open;
        Pcer1 = 0x100 => "PMC_PCER1",  WriteOnly, Protected;
        Pcdr1 = 0x104 => "PMC_PCDR1",  WriteOnly, Protected;
        Pcsr1 = 0x108 => "PMC_PCSR1",  ReadOnly,  Open;
        Ocr   = 0x110 => "PMC_OCR",    ReadWrite, Protected;
    }
}

/// Lock countdown for one PLL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct PllCounter {
    count: u32,
    /// Reconfigured and still waiting for lock.
    pending: bool,
}

impl PllCounter {
    fn restart(&mut self) {
        self.count = 0;
        self.pending = true;
    }
}

#[derive(Debug)]
pub struct Pmc {
    scer: u32,
    scdr: u32,
    scsr: u32,
    pcer: [u32; 2],
    pcdr: [u32; 2],
    pcsr: [u32; 2],
    mor: u32,
    mcfr: u32,
    pllar: u32,
    pllbr: u32,
    mckr: u32,
    usb: u32,
    pck: [u32; 3],
    ier: u32,
    idr: u32,
    imr: u32,
    sr: u32,
    fsmr: u32,
    fspr: u32,
    focr: u32,
    wpmr: u32,
    wpsr: u32,
    ocr: u32,
    /// Main oscillator start-up counter
    startup: u32,
    plla: PllCounter,
    pllb: PllCounter,
    mck_change: bool,
    main_crystal_hz: u32,
    irq: IrqLine,
}

impl Pmc {
    pub fn new(main_crystal_hz: u32) -> Self {
        let mut pmc = Pmc::zeroed(main_crystal_hz);
        pmc.reset();
        pmc
    }

    pub fn reset(&mut self) {
        *self = Pmc {
            scsr: 0x0000_0001,
            mor: 0x0000_0001,
            pllar: 0x0000_3f00,
            pllbr: 0x0000_3f00,
            mckr: 0x0000_0001,
            sr: 0x0001_0008,
            ocr: 0x0040_4040,
            ..Pmc::zeroed(self.main_crystal_hz)
        };
    }

    fn zeroed(main_crystal_hz: u32) -> Self {
        Pmc {
            scer: 0, scdr: 0, scsr: 0, pcer: [0; 2], pcdr: [0; 2], pcsr: [0; 2],
            mor: 0, mcfr: 0, pllar: 0, pllbr: 0, mckr: 0, usb: 0, pck: [0; 3],
            ier: 0, idr: 0, imr: 0, sr: 0, fsmr: 0, fspr: 0, focr: 0,
            wpmr: 0, wpsr: 0, ocr: 0, startup: 0,
            plla: PllCounter::default(), pllb: PllCounter::default(),
            mck_change: false, main_crystal_hz, irq: IrqLine::new(),
        }
    }

    pub fn read(&self, offset: u32) -> u32 {
        error::read_or_zero(self.try_read(offset))
    }

    pub fn write(&mut self, offset: u32, value: u32) {
        error::log_write(self.try_write(offset, value))
    }

    pub fn try_read(&self, offset: u32) -> Result<u32, AccessError> {
        let reg = PmcReg::decode_read(offset)?;
        let val = match reg {
            PmcReg::Scsr => self.scsr,
            PmcReg::Pcsr0 => self.pcsr[0],
            PmcReg::Pcsr1 => self.pcsr[1],
            PmcReg::Mor => self.mor,
            PmcReg::Mcfr => {
                if self.mcfr & MCFR_MAINFRDY == 0 {
                    log::debug!("pmc: MAINF read before ready");
                }
                self.mcfr
            }
            PmcReg::Pllar => self.pllar,
            PmcReg::Pllbr => self.pllbr,
            PmcReg::Mckr => self.mckr,
            PmcReg::Usb => self.usb,
            PmcReg::Pck0 => self.pck[0],
            PmcReg::Pck1 => self.pck[1],
            PmcReg::Pck2 => self.pck[2],
            PmcReg::Sr => self.sr,
            PmcReg::Imr => self.imr,
            PmcReg::Fsmr => self.fsmr,
            PmcReg::Fspr => self.fspr,
            PmcReg::Wpmr => self.wpmr,
            PmcReg::Wpsr => self.wpsr,
            PmcReg::Ocr => self.ocr,
            PmcReg::Scer | PmcReg::Scdr | PmcReg::Pcer0 | PmcReg::Pcdr0 | PmcReg::Pcer1
            | PmcReg::Pcdr1 | PmcReg::Ier | PmcReg::Idr | PmcReg::Focr => {
                return Err(AccessError::WriteOnly { device: PmcReg::DEVICE, reg: reg.name() })
            }
        };
        log::trace!("pmc: {} -> {:#010x}", reg.name(), val);
        Ok(val)
    }

    pub fn try_write(&mut self, offset: u32, value: u32) -> Result<(), AccessError> {
        let reg = match PmcReg::decode_write(offset, self.write_protected()) {
            Ok(reg) => reg,
            Err(e) => {
                if let AccessError::WriteProtected { .. } = e {
                    self.wpsr = WPSR_WPVS | ((offset & 0xffff) << 8);
                }
                return Err(e);
            }
        };
        log::trace!("pmc: {} <= {:#010x}", reg.name(), value);

        match reg {
            PmcReg::Scer => {
                self.scer = value;
                self.scsr |= value;
            }
            PmcReg::Scdr => {
                self.scdr = value;
                self.scsr &= !value;
            }
            PmcReg::Pcer0 => self.enable_clocks(0, value),
            PmcReg::Pcdr0 => self.disable_clocks(0, value),
            PmcReg::Pcer1 => self.enable_clocks(1, value),
            PmcReg::Pcdr1 => self.disable_clocks(1, value),
            PmcReg::Mor => {
                if value & MOR_KEY_MASK != MOR_KEY {
                    return Err(self.invalid(reg, "missing MOR key"));
                }
                self.mor = value & !MOR_KEY_MASK;
            }
            PmcReg::Pllar => {
                if self.sr & SR_LOCKA != 0 {
                    return Err(self.invalid(reg, "PLLA already locked"));
                }
                if value & PLL_ONE == 0 {
                    return Err(self.invalid(reg, "bit 29 must be written 1"));
                }
                self.pllar = value;
                self.plla.restart();
                log::debug!("pmc: PLLA configured, lock after {} ticks", pll_target(value));
            }
            PmcReg::Pllbr => {
                if self.sr & SR_LOCKB != 0 {
                    return Err(self.invalid(reg, "PLLB already locked"));
                }
                if value & PLL_ONE == 0 {
                    return Err(self.invalid(reg, "bit 29 must be written 1"));
                }
                self.pllbr = value;
                self.pllb.restart();
                log::debug!("pmc: PLLB configured, lock after {} ticks", pll_target(value));
            }
            PmcReg::Mckr => {
                let changed = (value ^ self.mckr) & (MCKR_CSS_MASK | MCKR_PRES_MASK);
                if changed != 0 {
                    self.mck_change = true;
                }
                self.mckr = value;
            }
            PmcReg::Usb => self.usb = value,
            PmcReg::Pck0 | PmcReg::Pck1 | PmcReg::Pck2 => {
                let n = (offset - 0x40) as usize >> 2;
                if self.scsr & (SC_PCK0 << n) != 0 {
                    return Err(self.invalid(reg, "programmable clock is enabled"));
                }
                self.pck[n] = value;
            }
            PmcReg::Ier => {
                self.imr |= value;
                self.idr &= !value;
            }
            PmcReg::Idr => {
                self.imr &= !value;
                self.idr |= value;
            }
            PmcReg::Fsmr => self.fsmr = value,
            PmcReg::Fspr => self.fspr = value,
            PmcReg::Focr => self.focr = value,
            PmcReg::Wpmr => self.wpmr = value,
            PmcReg::Ocr => self.ocr = value,
            PmcReg::Scsr | PmcReg::Pcsr0 | PmcReg::Pcsr1 | PmcReg::Mcfr | PmcReg::Sr
            | PmcReg::Imr | PmcReg::Wpsr => {
                return Err(AccessError::ReadOnly { device: PmcReg::DEVICE, reg: reg.name() })
            }
        }
        self.update();
        Ok(())
    }

    fn invalid(&self, reg: PmcReg, reason: &'static str) -> AccessError {
        AccessError::InvalidConfig { device: PmcReg::DEVICE, reg: reg.name(), reason }
    }

    fn enable_clocks(&mut self, bank: usize, value: u32) {
        self.pcer[bank] |= value;
        self.pcdr[bank] &= !value;
    }

    fn disable_clocks(&mut self, bank: usize, value: u32) {
        self.pcdr[bank] |= value;
        self.pcer[bank] &= !value;
    }

    /// Advance the oscillator and PLL countdowns by one slow tick.
    pub fn tick(&mut self) {
        if self.mor & MOR_MOSCXTEN != 0 && self.startup < self.startup_target() {
            self.startup += 1;
        }
        let target_a = pll_target(self.pllar);
        if self.plla.count < target_a {
            self.plla.count += 1;
        }
        let target_b = pll_target(self.pllbr);
        if self.pllb.count < target_b {
            self.pllb.count += 1;
        }
        self.update();
    }

    /// Recompute derived status and the interrupt line.
    fn update(&mut self) {
        self.pcsr[0] = !self.pcdr[0] & self.pcer[0];
        self.pcsr[1] = !self.pcdr[1] & self.pcer[1];

        let osc_ready = self.mor & MOR_MOSCXTBY != 0
            || (self.mor & MOR_MOSCXTEN != 0 && self.startup >= self.startup_target());
        if osc_ready {
            self.sr |= SR_MOSCXTS;
        } else {
            self.sr &= !SR_MOSCXTS;
        }

        if self.mck_change {
            self.sr |= SR_MCKRDY;
            self.mck_change = false;
        }

        self.sr = (self.sr & !SC_PCK_MASK) | (self.scsr & SC_PCK_MASK);

        if self.plla.pending && self.plla.count == pll_target(self.pllar) {
            self.plla.pending = false;
            self.sr |= SR_LOCKA;
            log::debug!("pmc: PLLA locked");
        }
        if self.pllb.pending && self.pllb.count == pll_target(self.pllbr) {
            self.pllb.pending = false;
            self.sr |= SR_LOCKB;
            log::debug!("pmc: PLLB locked");
        }

        let css = self.mckr & MCKR_CSS_MASK;
        if (css == CSS_PLLA && self.sr & SR_LOCKA == 0) || (css == CSS_PLLB && self.sr & SR_LOCKB == 0) {
            log::debug!("pmc: MCKR selects an unlocked PLL, falling back to slow clock");
            self.mckr = (self.mckr & !MCKR_CSS_MASK) | CSS_SLOW;
        }

        self.mcfr = match self.main_clock_hz() {
            Some(hz) => mainf(hz) | MCFR_MAINFRDY,
            None => 0,
        };

        self.ier = self.sr;
        self.irq.set(irq::pending(self.ier, self.idr, self.imr));
    }

    fn startup_target(&self) -> u32 {
        (self.mor & MOR_MOSCXTST_MASK) >> 5
    }

    /// Main clock frequency, or None while the selected oscillator is not running.
    pub fn main_clock_hz(&self) -> Option<u32> {
        if self.mor & MOR_MOSCSEL != 0 {
            (self.sr & SR_MOSCXTS != 0).then_some(self.main_crystal_hz)
        } else if self.mor & MOR_MOSCRCEN != 0 {
            let sel = (self.mor >> MOR_MOSCRCF_SHIFT) & 0x7;
            Some(match sel {
                0 => 4_000_000,
                1 => 8_000_000,
                _ => 12_000_000,
            })
        } else {
            None
        }
    }

    /// Master clock frequency after source selection and prescaler.
    pub fn master_clock_hz(&self) -> u32 {
        let main = self.main_clock_hz().unwrap_or(0);
        let src = match self.mckr & MCKR_CSS_MASK {
            CSS_SLOW => SLOW_CLOCK_HZ,
            CSS_MAIN => main,
            CSS_PLLA => pll_output(main, self.pllar),
            _ => pll_output(main, self.pllbr),
        };
        let pres = (self.mckr & MCKR_PRES_MASK) >> 4;
        match pres {
            7 => src / 3,
            p => src >> p,
        }
    }

    pub fn status(&self) -> u32 {
        self.sr
    }

    pub fn write_protected(&self) -> bool {
        self.wpmr & WPMR_WPEN != 0 && self.wpmr >> 8 == WPMR_KEY
    }

    pub fn irq(&self) -> &IrqLine {
        &self.irq
    }

    pub fn save_state(&self) -> PmcState {
        PmcState {
            scer: self.scer, scdr: self.scdr, scsr: self.scsr,
            pcer: self.pcer, pcdr: self.pcdr, pcsr: self.pcsr,
            mor: self.mor, mcfr: self.mcfr, pllar: self.pllar, pllbr: self.pllbr,
            mckr: self.mckr, usb: self.usb, pck: self.pck,
            ier: self.ier, idr: self.idr, imr: self.imr, sr: self.sr,
            fsmr: self.fsmr, fspr: self.fspr, focr: self.focr,
            wpmr: self.wpmr, wpsr: self.wpsr, ocr: self.ocr,
            startup: self.startup,
            plla_count: self.plla.count, plla_pending: self.plla.pending,
            pllb_count: self.pllb.count, pllb_pending: self.pllb.pending,
            irq_level: self.irq.level(),
        }
    }

    pub fn load_state(&mut self, s: &PmcState) {
        self.scer = s.scer; self.scdr = s.scdr; self.scsr = s.scsr;
        self.pcer = s.pcer; self.pcdr = s.pcdr; self.pcsr = s.pcsr;
        self.mor = s.mor; self.mcfr = s.mcfr; self.pllar = s.pllar; self.pllbr = s.pllbr;
        self.mckr = s.mckr; self.usb = s.usb; self.pck = s.pck;
        self.ier = s.ier; self.idr = s.idr; self.imr = s.imr; self.sr = s.sr;
        self.fsmr = s.fsmr; self.fspr = s.fspr; self.focr = s.focr;
        self.wpmr = s.wpmr; self.wpsr = s.wpsr; self.ocr = s.ocr;
        self.startup = s.startup;
        self.plla = PllCounter { count: s.plla_count, pending: s.plla_pending };
        self.pllb = PllCounter { count: s.pllb_count, pending: s.pllb_pending };
        self.mck_change = false;
        self.irq.set(s.irq_level);
    }
}

/// PLLxCOUNT field: slow clock ticks until lock.
fn pll_target(pllr: u32) -> u32 {
    (pllr & PLL_COUNT_MASK) >> 8
}

fn pll_output(main_hz: u32, pllr: u32) -> u32 {
    let mul = (pllr >> PLL_MUL_SHIFT) & 0x7ff;
    let div = pllr & 0xff;
    if mul == 0 || div == 0 {
        return 0;
    }
    ((main_hz as u64 * (mul as u64 + 1)) / div as u64) as u32
}

/// Main clock cycles counted over 16 slow clock periods.
fn mainf(main_hz: u32) -> u32 {
    ((main_hz as u64 * 16 / SLOW_CLOCK_HZ as u64) as u32) & MCFR_MAINF
}
