//! Level-triggered interrupt output line.
//!
//! Every peripheral owns one line. The host's interrupt controller samples
//! [`IrqLine::level`] (or [`crate::Machine::pending_irqs`]); the device only
//! ever drives it.

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IrqLine {
    level: bool,
}

impl IrqLine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drive the line.
    pub fn set(&mut self, level: bool) {
        if level != self.level {
            log::trace!("irq: line {}", if level { "raised" } else { "lowered" });
        }
        self.level = level;
    }

    #[inline]
    pub fn level(&self) -> bool {
        self.level
    }
}

/// The `(~IDR) & IER & IMR` formula shared by the SPI controller and PMC.
#[inline]
pub fn pending(ier: u32, idr: u32, imr: u32) -> bool {
    (!idr) & ier & imr != 0
}
