//! SPI controller emulation.
//!
//! Models the SAM3S SPI master: control/mode/chip-select registers, 8-entry
//! transmit and receive FIFOs, status and interrupt logic, and a chip-select
//! bus that fans transfers out to the attached slave devices. A write to
//! TDR while the controller is enabled shifts the queued words out
//! immediately (no bit-clock delay) so a polling driver sees TDRE/TXEMPTY
//! set again on its next status read.
//!
//! A second, debug access path ([`SpiController::debug_read`] /
//! [`SpiController::debug_write`]) reads and writes the raw registers without
//! touching the FIFOs, status bits or bus. Any debug write switches the live
//! RDR/TDR registers into shadow mode until [`SpiController::end_debug_session`].

use crate::error::{self, AccessError};
use crate::irq::{self, IrqLine};
use crate::regmap::RegisterBlock;
use crate::savestate::SpiState;
use crate::spi_bus::{ChipSelectBus, NO_CS};
use super::fifo::{Fifo, FIFO_DEPTH};

/// Register window size.
pub const SPI_WINDOW: u32 = 0x1000;

// SPI_CR
pub const CR_SPIEN: u32 = 1 << 0;
pub const CR_SPIDIS: u32 = 1 << 1;
pub const CR_SWRST: u32 = 1 << 7;
pub const CR_LASTXFER: u32 = 1 << 24;

// SPI_MR
pub const MR_MSTR: u32 = 1 << 0;
pub const MR_PS: u32 = 1 << 1;
pub const MR_PCSDEC: u32 = 1 << 2;
pub const MR_MODFDIS: u32 = 1 << 4;
pub const MR_LLB: u32 = 1 << 7;
const PCS_SHIFT: u32 = 16;

// SPI_SR
pub const SR_RDRF: u32 = 1 << 0;
pub const SR_TDRE: u32 = 1 << 1;
pub const SR_MODF: u32 = 1 << 2;
pub const SR_OVRES: u32 = 1 << 3;
pub const SR_ENDRX: u32 = 1 << 4;
pub const SR_ENDTX: u32 = 1 << 5;
pub const SR_RXBUFF: u32 = 1 << 6;
pub const SR_TXBUFE: u32 = 1 << 7;
pub const SR_NSSR: u32 = 1 << 8;
pub const SR_TXEMPTY: u32 = 1 << 9;
pub const SR_SPIENS: u32 = 1 << 16;

// SPI_CSRx
const CSR_BITS_SHIFT: u32 = 4;

// SPI_WPMR / SPI_WPSR
pub const WPMR_WPEN: u32 = 1 << 0;
/// Vendor debug mode: live RDR/TDR accesses hit the shadow registers.
pub const WPMR_DBGM: u32 = 1 << 1;
/// "SPI" in ASCII.
pub const WPMR_KEY: u32 = 0x53_50_49;
pub const WPSR_WPVS: u32 = 1 << 0;

/// Peripheral identification bytes at 0xFE0..0xFFC.
const SPI_ID: [u8; 8] = [0x22, 0x10, 0x04, 0x00, 0x0d, 0xf0, 0x05, 0xb1];

crate::register_block! {
    device = "spi";
    /// SPI register map.
    pub enum SpiReg {
        Cr   = 0x00 => "SPI_CR",   WriteOnly, Protected;
        Mr   = 0x04 => "SPI_MR",   ReadWrite, Protected;
        Rdr  = 0x08 => "SPI_RDR",  ReadOnly,  Open;
        Tdr  = 0x0c => "SPI_TDR",  ReadWrite, Protected;
        Sr   = 0x10 => "SPI_SR",   ReadOnly,  Open;
        Ier  = 0x14 => "SPI_IER",  WriteOnly, Protected;
        Idr  = 0x18 => "SPI_IDR",  WriteOnly, Protected;
        Imr  = 0x1c => "SPI_IMR",  ReadOnly,  Open;
        Csr0 = 0x30 => "SPI_CSR0", ReadWrite, Protected;
        Csr1 = 0x34 => "SPI_CSR1", ReadWrite, Protected;
        Csr2 = 0x38 => "SPI_CSR2", ReadWrite, Protected;
        Csr3 = 0x3c => "SPI_CSR3", ReadWrite, Protected;
        Wpmr = 0xe4 => "SPI_WPMR", ReadWrite, Open;
        Wpsr = 0xe8 => "SPI_WPSR", ReadOnly,  Open;
    }
}

fn id_byte(offset: u32) -> Option<u32> {
    if (0xfe0..SPI_WINDOW).contains(&offset) {
        Some(SPI_ID[((offset - 0xfe0) >> 2) as usize] as u32)
    } else {
        None
    }
}

#[derive(Debug)]
pub struct SpiController {
    cr: u32,
    mr: u32,
    rdr: u32,
    tdr: u32,
    sr: u32,
    /// FIFO threshold requests, rebuilt by every status update.
    ier: u32,
    idr: u32,
    imr: u32,
    csr: [u32; 4],
    wpmr: u32,
    wpsr: u32,
    tx_fifo: Fifo,
    rx_fifo: Fifo,
    /// Set by any debug-path write.
    debug_shadow: bool,
    irq: IrqLine,
    bus: ChipSelectBus,
}

impl SpiController {
    /// Create a controller with an empty chip-select bus, in reset state.
    pub fn new() -> Self {
        let mut spi = SpiController {
            cr: 0,
            mr: 0,
            rdr: 0,
            tdr: 0,
            sr: 0,
            ier: 0,
            idr: 0,
            imr: 0,
            csr: [0; 4],
            wpmr: 0,
            wpsr: 0,
            tx_fifo: Fifo::new(),
            rx_fifo: Fifo::new(),
            debug_shadow: false,
            irq: IrqLine::new(),
            bus: ChipSelectBus::default(),
        };
        spi.reset();
        spi
    }

    /// Power-on reset. Attached slaves stay attached but are deselected.
    pub fn reset(&mut self) {
        self.mr = 0;
        self.csr = [0; 4];
        self.wpmr = 0;
        self.wpsr = 0;
        self.debug_shadow = false;
        self.software_reset();
    }

    /// SWRST: everything except the write-protect configuration.
    fn software_reset(&mut self) {
        self.cr = 0;
        self.mr = 0;
        self.rdr = 0;
        self.tdr = 0;
        self.ier = 0;
        self.idr = 0;
        self.imr = 0;
        self.csr = [0; 4];
        self.tx_fifo.clear();
        self.rx_fifo.clear();
        self.sr = SR_TDRE | SR_TXEMPTY;
        self.release_cs();
        self.update();
    }

    // ─── Guest-visible entry points ────────────────────────────────────────

    /// Register read from the address-space dispatcher.
    pub fn read(&mut self, offset: u32) -> u32 {
        error::read_or_zero(self.try_read(offset))
    }

    /// Register write from the address-space dispatcher.
    pub fn write(&mut self, offset: u32, value: u32) {
        error::log_write(self.try_write(offset, value))
    }

    pub fn try_read(&mut self, offset: u32) -> Result<u32, AccessError> {
        if let Some(id) = id_byte(offset) {
            return Ok(id);
        }
        let reg = SpiReg::decode_read(offset)?;
        let val = match reg {
            SpiReg::Mr => self.mr,
            SpiReg::Rdr => {
                if self.shadow_mode() {
                    self.rdr
                } else {
                    self.receive()
                }
            }
            SpiReg::Tdr => {
                if self.shadow_mode() {
                    self.tdr
                } else {
                    log::warn!(target: error::GUEST_ERROR, "spi: SPI_TDR read outside debug mode");
                    0xFFFF_FFFF
                }
            }
            SpiReg::Sr => self.sr,
            SpiReg::Imr => self.imr,
            SpiReg::Csr0 => self.csr[0],
            SpiReg::Csr1 => self.csr[1],
            SpiReg::Csr2 => self.csr[2],
            SpiReg::Csr3 => self.csr[3],
            SpiReg::Wpmr => self.wpmr,
            SpiReg::Wpsr => self.wpsr,
            SpiReg::Cr | SpiReg::Ier | SpiReg::Idr => {
                return Err(AccessError::WriteOnly { device: SpiReg::DEVICE, reg: reg.name() })
            }
        };
        log::trace!("spi: {} -> {:#010x}", reg.name(), val);
        Ok(val)
    }

    /// Register write. Rejected writes leave the state unchanged, except for
    /// [`AccessError::Unsupported`], which is returned after MR was latched.
    pub fn try_write(&mut self, offset: u32, value: u32) -> Result<(), AccessError> {
        let reg = match SpiReg::decode_write(offset, self.write_protected()) {
            Ok(reg) => reg,
            Err(e) => {
                if let AccessError::WriteProtected { .. } = e {
                    self.wpsr = WPSR_WPVS | ((offset & 0xff) << 8);
                }
                return Err(e);
            }
        };
        log::trace!("spi: {} <= {:#010x}", reg.name(), value);

        match reg {
            SpiReg::Cr => self.write_cr(value),
            SpiReg::Mr => {
                self.mr = value;
                if value & MR_MSTR == 0 {
                    return Err(AccessError::Unsupported { device: SpiReg::DEVICE, what: "slave mode" });
                }
            }
            SpiReg::Tdr => {
                self.tdr = value;
                if !self.shadow_mode() && self.is_enabled() {
                    self.transmit(value);
                }
            }
            SpiReg::Ier => {
                self.imr |= value;
                self.idr &= !value;
                self.update();
            }
            SpiReg::Idr => {
                self.imr &= !value;
                self.idr |= value;
                self.update();
            }
            SpiReg::Csr0 => self.csr[0] = value,
            SpiReg::Csr1 => self.csr[1] = value,
            SpiReg::Csr2 => self.csr[2] = value,
            SpiReg::Csr3 => self.csr[3] = value,
            SpiReg::Wpmr => self.wpmr = value,
            SpiReg::Rdr | SpiReg::Sr | SpiReg::Imr | SpiReg::Wpsr => {
                return Err(AccessError::ReadOnly { device: SpiReg::DEVICE, reg: reg.name() })
            }
        }
        Ok(())
    }

    // ─── Debug path ────────────────────────────────────────────────────────

    /// Raw register read with no side effects.
    pub fn debug_read(&self, offset: u32) -> Result<u32, AccessError> {
        if let Some(id) = id_byte(offset) {
            return Ok(id);
        }
        Ok(match SpiReg::decode(offset)? {
            SpiReg::Cr => self.cr,
            SpiReg::Mr => self.mr,
            SpiReg::Rdr => self.rdr,
            SpiReg::Tdr => self.tdr,
            SpiReg::Sr => self.sr,
            SpiReg::Ier => self.ier,
            SpiReg::Idr => self.idr,
            SpiReg::Imr => self.imr,
            SpiReg::Csr0 => self.csr[0],
            SpiReg::Csr1 => self.csr[1],
            SpiReg::Csr2 => self.csr[2],
            SpiReg::Csr3 => self.csr[3],
            SpiReg::Wpmr => self.wpmr,
            SpiReg::Wpsr => self.wpsr,
        })
    }

    /// Raw register write: no FIFO, status, bus or interrupt activity.
    pub fn debug_write(&mut self, offset: u32, value: u32) -> Result<(), AccessError> {
        self.debug_shadow = true;
        let slot = match SpiReg::decode(offset)? {
            SpiReg::Cr => &mut self.cr,
            SpiReg::Mr => &mut self.mr,
            SpiReg::Rdr => &mut self.rdr,
            SpiReg::Tdr => &mut self.tdr,
            SpiReg::Sr => &mut self.sr,
            SpiReg::Ier => &mut self.ier,
            SpiReg::Idr => &mut self.idr,
            SpiReg::Imr => &mut self.imr,
            SpiReg::Csr0 => &mut self.csr[0],
            SpiReg::Csr1 => &mut self.csr[1],
            SpiReg::Csr2 => &mut self.csr[2],
            SpiReg::Csr3 => &mut self.csr[3],
            SpiReg::Wpmr => &mut self.wpmr,
            SpiReg::Wpsr => &mut self.wpsr,
        };
        *slot = value;
        Ok(())
    }

    /// Leave shadow mode entered by a debug write.
    pub fn end_debug_session(&mut self) {
        self.debug_shadow = false;
    }

    // ─── Transfer engine ───────────────────────────────────────────────────

    fn write_cr(&mut self, value: u32) {
        self.cr = value;
        if value & CR_SWRST != 0 {
            log::debug!("spi: software reset");
            self.software_reset();
            return;
        }
        if value & CR_SPIDIS != 0 {
            self.sr &= !SR_SPIENS;
        } else if value & CR_SPIEN != 0 {
            self.sr |= SR_SPIENS;
        }
        if value & CR_LASTXFER != 0 {
            self.release_cs();
        }
        self.update();
    }

    /// Queue `value` and shift out as much as RX has room for. Only called
    /// while SR.SPIENS is set.
    fn transmit(&mut self, value: u32) {
        if self.tx_fifo.push(value as u16) {
            self.sr &= !(SR_TXEMPTY | SR_TDRE);
        } else {
            log::debug!("spi: TX FIFO full, dropped {:#06x}", value & 0xffff);
        }
        self.update();

        while !self.rx_fifo.is_full() {
            let Some(word) = self.tx_fifo.pop() else { break };
            let resp = if self.mr & MR_LLB != 0 {
                self.rdr = word as u32;
                word
            } else {
                self.exchange(word)
            };
            self.rx_fifo.push(resp);
            self.sr |= SR_RDRF;
        }

        self.sr |= SR_TXEMPTY | SR_TDRE;
        self.update();
    }

    /// Shift one word through the currently addressed slave. A chip select
    /// with nothing attached leaves the bus idle and the word reads back 0.
    fn exchange(&mut self, word: u16) -> u16 {
        let cs = self.peripheral_cs();
        let target = cs.unwrap_or(NO_CS);
        if self.bus.cs() != target {
            if let Err(e) = self.bus.set_cs(target) {
                log::warn!(target: error::GUEST_ERROR, "spi: {}", e);
                self.release_cs();
            }
        }
        let bits = self.bits_per_transfer(cs.unwrap_or(0));
        let mask = (1u32 << bits) - 1;
        let resp = self.bus.transfer(word as u32 & mask, bits) & mask;
        log::trace!("spi: cs{} MOSI={:#06x} MISO={:#06x}", self.bus.cs(), word, resp);
        resp as u16
    }

    fn receive(&mut self) -> u32 {
        let loopback = self.mr & MR_LLB != 0;
        let val = match self.rx_fifo.pop() {
            Some(v) => v as u32,
            None if loopback => self.rdr & 0xffff,
            None => 0,
        };
        if loopback {
            self.tdr = 0;
            self.rdr = 0;
        }
        self.sr &= !SR_RDRF;
        self.update();
        val
    }

    /// Recompute the FIFO-derived status bits, threshold requests and IRQ line.
    fn update(&mut self) {
        if self.tx_fifo.is_empty() {
            self.sr |= SR_TXBUFE;
        } else {
            self.sr &= !SR_TXBUFE;
        }
        if self.rx_fifo.is_full() {
            self.sr |= SR_RXBUFF;
        } else {
            self.sr &= !SR_RXBUFF;
        }

        self.ier = 0;
        if self.rx_fifo.len() >= FIFO_DEPTH / 2 {
            self.ier |= SR_RXBUFF;
        }
        if self.tx_fifo.len() <= FIFO_DEPTH / 2 {
            self.ier |= SR_TXBUFE;
        }

        self.irq.set(irq::pending(self.ier, self.idr, self.imr));
    }

    /// Decode the peripheral chip select for the next transfer.
    /// Fixed mode takes MR.PCS, variable mode the PCS bits of the last TDR write.
    fn peripheral_cs(&self) -> Option<u8> {
        let src = if self.mr & MR_PS != 0 { self.tdr } else { self.mr };
        let pcs = ((src >> PCS_SHIFT) & 0xf) as u8;
        if self.mr & MR_PCSDEC != 0 {
            return if pcs == 0xf { None } else { Some(pcs) };
        }
        match pcs {
            p if p & 0b0001 == 0 => Some(0),
            p if p & 0b0011 == 0b0001 => Some(1),
            p if p & 0b0111 == 0b0011 => Some(2),
            0b0111 => Some(3),
            _ => None,
        }
    }

    fn bits_per_transfer(&self, cs: u8) -> u8 {
        let field = (self.csr[(cs as usize) & 3] >> CSR_BITS_SHIFT) & 0xf;
        8 + field.min(8) as u8
    }

    fn release_cs(&mut self) {
        if self.bus.cs() != NO_CS {
            // NO_CS never fails
            let _ = self.bus.set_cs(NO_CS);
        }
    }

    // ─── Queries ───────────────────────────────────────────────────────────

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.sr & SR_SPIENS != 0
    }

    pub fn write_protected(&self) -> bool {
        self.wpmr & WPMR_WPEN != 0 && self.wpmr >> 8 == WPMR_KEY
    }

    /// Live RDR/TDR accesses are redirected to the shadow registers.
    pub fn shadow_mode(&self) -> bool {
        self.debug_shadow || self.wpmr & WPMR_DBGM != 0
    }

    pub fn status(&self) -> u32 {
        self.sr
    }

    pub fn tx_len(&self) -> usize {
        self.tx_fifo.len()
    }

    pub fn rx_len(&self) -> usize {
        self.rx_fifo.len()
    }

    pub fn irq(&self) -> &IrqLine {
        &self.irq
    }

    pub fn bus(&self) -> &ChipSelectBus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut ChipSelectBus {
        &mut self.bus
    }

    // ─── Save state ────────────────────────────────────────────────────────

    /// Capture state for save state. Slave devices are not included.
    pub fn save_state(&self) -> SpiState {
        SpiState {
            cr: self.cr, mr: self.mr, rdr: self.rdr, tdr: self.tdr, sr: self.sr,
            ier: self.ier, idr: self.idr, imr: self.imr, csr: self.csr,
            wpmr: self.wpmr, wpsr: self.wpsr,
            tx_fifo: *self.tx_fifo.slots(),
            rx_fifo: *self.rx_fifo.slots(),
            tx_head: self.tx_fifo.head() as u32,
            rx_head: self.rx_fifo.head() as u32,
            tx_len: self.tx_fifo.len() as u32,
            rx_len: self.rx_fifo.len() as u32,
            debug_shadow: self.debug_shadow,
            irq_level: self.irq.level(),
            cs: self.bus.cs(),
        }
    }

    /// Restore state from save state.
    pub fn load_state(&mut self, s: &SpiState) {
        self.cr = s.cr; self.mr = s.mr; self.rdr = s.rdr; self.tdr = s.tdr; self.sr = s.sr;
        self.ier = s.ier; self.idr = s.idr; self.imr = s.imr; self.csr = s.csr;
        self.wpmr = s.wpmr; self.wpsr = s.wpsr;
        self.tx_fifo = Fifo::from_parts(s.tx_fifo, s.tx_head as usize, s.tx_len as usize);
        self.rx_fifo = Fifo::from_parts(s.rx_fifo, s.rx_head as usize, s.rx_len as usize);
        self.debug_shadow = s.debug_shadow;
        self.irq.set(s.irq_level);
        if s.cs != self.bus.cs() {
            if let Err(e) = self.bus.set_cs(s.cs) {
                log::warn!("spi: restoring chip select: {}", e);
            }
        }
    }
}

impl Default for SpiController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spi_bus::tests::{Event, Recorder};
    use std::cell::RefCell;
    use std::rc::Rc;

    const CR: u32 = 0x00;
    const MR: u32 = 0x04;
    const RDR: u32 = 0x08;
    const TDR: u32 = 0x0c;
    const SR: u32 = 0x10;
    const IER: u32 = 0x14;
    const IDR: u32 = 0x18;
    const IMR: u32 = 0x1c;
    const CSR0: u32 = 0x30;
    const CSR1: u32 = 0x34;
    const WPMR: u32 = 0xe4;
    const WPSR: u32 = 0xe8;

    fn loopback_spi() -> SpiController {
        let mut spi = SpiController::new();
        spi.write(MR, MR_MSTR | MR_LLB);
        spi.write(CR, CR_SPIEN);
        spi
    }

    fn check_invariants(spi: &SpiController) {
        assert!(spi.tx_len() <= FIFO_DEPTH);
        assert!(spi.rx_len() <= FIFO_DEPTH);
        assert_eq!(spi.status() & SR_TXBUFE != 0, spi.tx_len() == 0);
        assert_eq!(spi.status() & SR_RXBUFF != 0, spi.rx_len() == FIFO_DEPTH);
    }

    #[test]
    fn test_reset_state() {
        let spi = SpiController::new();
        assert_eq!(spi.status(), SR_TDRE | SR_TXEMPTY | SR_TXBUFE);
        assert!(!spi.is_enabled());
        assert!(!spi.irq().level());
        assert_eq!(spi.bus().cs(), NO_CS);
    }

    #[test]
    fn test_loopback_echo() {
        let mut spi = loopback_spi();
        spi.write(TDR, 0x41);
        assert_eq!(spi.read(RDR), 0x41);
        assert_ne!(spi.read(SR) & SR_TXEMPTY, 0);
        assert_eq!(spi.read(SR) & SR_RDRF, 0);
    }

    #[test]
    fn test_loopback_preserves_order() {
        for burst in 1..=12u32 {
            let mut spi = loopback_spi();
            let mut expected = Vec::new();
            for i in 0..burst {
                let v = 0x1234u32.wrapping_mul(i + 1) & 0xffff;
                spi.write(TDR, v);
                expected.push(v);
                check_invariants(&spi);
            }
            // Beyond eight unread words the RX FIFO is full and TX keeps the rest
            let readable = (burst as usize).min(FIFO_DEPTH);
            for &v in &expected[..readable] {
                assert_eq!(spi.read(RDR), v);
                check_invariants(&spi);
            }
        }
    }

    #[test]
    fn test_rx_full_keeps_tx_queued() {
        let mut spi = loopback_spi();
        for i in 0..8 {
            spi.write(TDR, i);
        }
        assert_eq!(spi.rx_len(), 8);
        assert_ne!(spi.status() & SR_RXBUFF, 0);

        spi.write(TDR, 8);
        assert_eq!(spi.tx_len(), 1);
        assert_eq!(spi.rx_len(), 8);
        assert_eq!(spi.status() & SR_TXBUFE, 0);

        assert_eq!(spi.read(RDR), 0);
        // Next write drains the backlog first
        spi.write(TDR, 9);
        assert_eq!(spi.tx_len(), 1);
        for expect in 1..=8 {
            assert_eq!(spi.read(RDR), expect);
        }
    }

    #[test]
    fn test_invariants_under_mixed_traffic() {
        let mut spi = loopback_spi();
        let mut seed = 0x2545_f491u32;
        for _ in 0..500 {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            match seed % 5 {
                0 | 1 => spi.write(TDR, seed & 0xffff),
                2 => {
                    spi.read(RDR);
                }
                3 => spi.write(IER, SR_TXBUFE | SR_RXBUFF),
                _ => spi.write(IDR, SR_RXBUFF),
            }
            check_invariants(&spi);
        }
    }

    #[test]
    fn test_disabled_ignores_tdr() {
        let mut spi = SpiController::new();
        spi.write(MR, MR_MSTR | MR_LLB);
        spi.write(TDR, 0x55);
        assert_eq!(spi.tx_len(), 0);
        assert_eq!(spi.rx_len(), 0);
        assert_eq!(spi.debug_read(TDR), Ok(0x55));
        // Loopback receive clears the TDR shadow
        assert_eq!(spi.read(RDR), 0);
        assert_eq!(spi.debug_read(TDR), Ok(0));
    }

    #[test]
    fn test_spidis_wins() {
        let mut spi = SpiController::new();
        spi.write(CR, CR_SPIEN);
        assert!(spi.is_enabled());
        spi.write(CR, CR_SPIEN | CR_SPIDIS);
        assert!(!spi.is_enabled());
    }

    #[test]
    fn test_swrst_empties_fifos() {
        let mut spi = loopback_spi();
        for i in 0..10 {
            spi.write(TDR, i);
        }
        spi.write(CR, CR_SWRST);
        assert_eq!(spi.tx_len(), 0);
        assert_eq!(spi.rx_len(), 0);
        assert!(!spi.is_enabled());
        assert_eq!(spi.read(MR), 0);
        check_invariants(&spi);
    }

    #[test]
    fn test_slave_mode_unsupported() {
        let mut spi = SpiController::new();
        // Slave mode is MSTR == 0; the value is still latched
        assert_eq!(
            spi.try_write(MR, MR_LLB),
            Err(AccessError::Unsupported { device: "spi", what: "slave mode" })
        );
        assert_eq!(spi.read(MR), MR_LLB);
        assert_eq!(spi.try_write(MR, MR_MSTR), Ok(()));
    }

    #[test]
    fn test_bad_offsets() {
        let mut spi = SpiController::new();
        assert_eq!(spi.try_read(0x20), Err(AccessError::BadOffset { device: "spi", offset: 0x20 }));
        assert_eq!(spi.read(0x20), 0);
        assert!(matches!(spi.try_read(CR), Err(AccessError::WriteOnly { .. })));
        assert!(matches!(spi.try_write(SR, 0), Err(AccessError::ReadOnly { .. })));
        spi.write(0x44, 0xdead);
        assert_eq!(spi.status(), SR_TDRE | SR_TXEMPTY | SR_TXBUFE);
    }

    #[test]
    fn test_id_bytes() {
        let mut spi = SpiController::new();
        assert_eq!(spi.read(0xfe0), 0x22);
        assert_eq!(spi.read(0xffc), 0xb1);
        assert_eq!(spi.debug_read(0xff0), Ok(0x0d));
    }

    #[test]
    fn test_tdr_read_direction() {
        let mut spi = loopback_spi();
        spi.write(TDR, 0x99);
        assert_eq!(spi.read(TDR), 0xFFFF_FFFF);
        spi.write(WPMR, WPMR_DBGM);
        assert_eq!(spi.read(TDR), 0x99);
        // Shadow mode: RDR returns the raw register, FIFO untouched
        assert_eq!(spi.read(RDR), 0x99);
        assert_eq!(spi.rx_len(), 1);
    }

    #[test]
    fn test_write_protect() {
        let mut spi = SpiController::new();
        spi.write(WPMR, (WPMR_KEY << 8) | WPMR_WPEN);
        assert!(spi.write_protected());
        assert!(matches!(spi.try_write(MR, MR_MSTR), Err(AccessError::WriteProtected { .. })));
        assert_eq!(spi.read(MR), 0);
        assert_eq!(spi.read(WPSR), WPSR_WPVS | (MR << 8));
        assert!(matches!(spi.try_write(CSR1, 0x80), Err(AccessError::WriteProtected { .. })));

        // Wrong key never enables protection
        spi.write(WPMR, (0x123456 << 8) | WPMR_WPEN);
        assert!(!spi.write_protected());
        spi.write(MR, MR_MSTR);
        assert_eq!(spi.read(MR), MR_MSTR);
    }

    #[test]
    fn test_interrupt_line() {
        let mut spi = SpiController::new();
        assert_eq!(spi.read(IMR), 0);
        spi.write(IER, SR_TXBUFE);
        assert_eq!(spi.read(IMR), SR_TXBUFE);
        assert!(spi.irq().level()); // TX FIFO at or below half
        spi.write(IDR, SR_TXBUFE);
        assert!(!spi.irq().level());
        assert_eq!(spi.read(IMR), 0);

        // RXBUFF request once four words wait in RX
        let mut spi = loopback_spi();
        spi.write(IER, SR_RXBUFF);
        for i in 0..3 {
            spi.write(TDR, i);
            assert!(!spi.irq().level());
        }
        spi.write(TDR, 3);
        assert!(spi.irq().level());
        spi.read(RDR);
        assert!(!spi.irq().level());
    }

    #[test]
    fn test_debug_path_is_inert() {
        let mut spi = loopback_spi();
        spi.write(TDR, 0x11);
        spi.write(TDR, 0x22);
        let (tx, rx) = (spi.tx_len(), spi.rx_len());

        spi.debug_write(TDR, 0x7777).unwrap();
        spi.debug_write(CR, CR_SWRST).unwrap();
        spi.debug_write(IMR, 0x7ff).unwrap();
        assert_eq!(spi.debug_write(0x20, 1), Err(AccessError::BadOffset { device: "spi", offset: 0x20 }));
        assert_eq!(spi.tx_len(), tx);
        assert_eq!(spi.rx_len(), rx);
        assert_eq!(spi.debug_read(CR), Ok(CR_SWRST));
        assert_eq!(spi.debug_read(IMR), Ok(0x7ff));
        assert_eq!(spi.debug_read(CSR0), Ok(0)); // IMR does not spill into CSR0
        assert!(spi.shadow_mode());

        // Live TDR writes are held off while the session is open
        spi.write(TDR, 0x33);
        assert_eq!(spi.tx_len(), tx);
        assert_eq!(spi.rx_len(), rx);
        assert_eq!(spi.debug_read(TDR), Ok(0x33));
        assert_eq!(spi.read(RDR), 0x22); // last looped-back word

        spi.end_debug_session();
        assert_eq!(spi.read(RDR), 0x11);
    }

    fn spi_with_slaves() -> (SpiController, Rc<RefCell<Vec<Event>>>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut spi = SpiController::new();
        spi.bus_mut().attach(Box::new(Recorder::new("s0", log.clone(), 0x00ff)), 0).unwrap();
        spi.bus_mut().attach(Box::new(Recorder::new("s1", log.clone(), 0xffff)), 1).unwrap();
        spi.write(CR, CR_SPIEN);
        (spi, log)
    }

    #[test]
    fn test_fixed_peripheral_select() {
        let (mut spi, log) = spi_with_slaves();
        spi.write(MR, MR_MSTR); // PCS = 0000 -> NPCS0
        spi.write(TDR, 0x5a);
        assert_eq!(spi.read(RDR), 0x5a ^ 0xff);

        spi.write(MR, MR_MSTR | (0b1101 << 16)); // xx01 -> NPCS1
        spi.write(CSR1, 8 << 4); // 16-bit transfers
        spi.write(TDR, 0x1234);
        assert_eq!(spi.read(RDR), 0x1234 ^ 0xffff);

        assert_eq!(
            *log.borrow(),
            vec![
                Event::Select("s0", true),
                Event::Send("s0", 0x5a, 8),
                Event::Select("s0", false),
                Event::Select("s1", true),
                Event::Send("s1", 0x1234, 16),
            ]
        );
    }

    #[test]
    fn test_variable_select_and_lastxfer() {
        let (mut spi, log) = spi_with_slaves();
        spi.write(MR, MR_MSTR | MR_PS);
        spi.write(TDR, (0b1101 << 16) | 0x01);
        assert_eq!(spi.bus().cs(), 1);
        spi.write(CR, CR_LASTXFER);
        assert_eq!(spi.bus().cs(), NO_CS);
        assert!(log.borrow().contains(&Event::Select("s1", false)));
    }

    #[test]
    fn test_unattached_select_idles_bus() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut spi = SpiController::new();
        spi.bus_mut().attach(Box::new(Recorder::new("s0", log.clone(), 0xff)), 0).unwrap();
        spi.write(CR, CR_SPIEN);
        spi.write(MR, MR_MSTR); // NPCS0
        spi.write(TDR, 0x11);
        assert_eq!(spi.read(RDR), 0x11 ^ 0xff);

        spi.write(MR, MR_MSTR | (0b1011 << 16)); // x011 -> NPCS2, nothing attached
        spi.write(TDR, 0x22);
        assert_eq!(spi.read(RDR), 0);
        assert_eq!(spi.bus().cs(), NO_CS);
        assert!(!log.borrow().contains(&Event::Send("s0", 0x22, 8)));
        assert_eq!(log.borrow().last(), Some(&Event::Select("s0", false)));
    }

    #[test]
    fn test_width_masks_data() {
        let (mut spi, log) = spi_with_slaves();
        spi.write(MR, MR_MSTR);
        spi.write(TDR, 0xABCD); // CSR0 BITS = 0 -> 8 bits
        assert_eq!(spi.read(RDR), 0xCD ^ 0xff);
        assert!(log.borrow().contains(&Event::Send("s0", 0xCD, 8)));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let mut spi = loopback_spi();
        spi.write(IER, SR_TXBUFE);
        for v in [3, 1, 4, 1, 5] {
            spi.write(TDR, v);
        }
        spi.read(RDR);
        let snap = spi.save_state();

        let mut other = SpiController::new();
        other.load_state(&snap);
        assert_eq!(other.save_state(), snap);
        assert_eq!(other.read(RDR), 1);
        assert_eq!(other.read(RDR), 4);
    }
}
