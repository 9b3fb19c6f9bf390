//! Error types shared by the peripheral models.
//!
//! None of these are fatal to the emulated machine. Register accessors come
//! in two flavours: `try_read` / `try_write` return the error to the caller,
//! while the plain `read` / `write` entry points used by the address-space
//! dispatcher report it on the `guest_error` log target and carry on.

use thiserror::Error;

/// Log target for guest programming errors (bad offsets, locked registers).
pub const GUEST_ERROR: &str = "guest_error";

/// A rejected or questionable register access.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    /// No register is mapped at this offset.
    #[error("{device}: bad offset {offset:#x}")]
    BadOffset { device: &'static str, offset: u32 },

    /// Write to a register the guest can only read.
    #[error("{device}: {reg} is read-only")]
    ReadOnly { device: &'static str, reg: &'static str },

    /// Read of a register the guest can only write.
    #[error("{device}: {reg} is write-only")]
    WriteOnly { device: &'static str, reg: &'static str },

    /// Write rejected because the write-protect mode is active.
    #[error("{device}: {reg} is write-protected")]
    WriteProtected { device: &'static str, reg: &'static str },

    /// Write rejected because the value or current state does not allow it.
    #[error("{device}: {reg}: {reason}")]
    InvalidConfig {
        device: &'static str,
        reg: &'static str,
        reason: &'static str,
    },

    /// The value was latched but selects behaviour that is not modelled.
    #[error("{device}: {what} not implemented")]
    Unsupported { device: &'static str, what: &'static str },
}

/// Chip-select bus bookkeeping errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("chip select {cs} out of range (bus has {slots} slots)")]
    CsOutOfRange { cs: u8, slots: usize },

    #[error("chip select {cs} already bound to {name}")]
    CsInUse { cs: u8, name: String },

    #[error("no slave attached to chip select {cs}")]
    NotAttached { cs: u8 },
}

/// Snapshot encode/decode failures.
#[derive(Debug, Error)]
pub enum SaveStateError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("snapshot too small ({0} bytes)")]
    TooSmall(usize),

    #[error("invalid snapshot (bad magic)")]
    BadMagic,

    #[error("unsupported snapshot version {found} (expected {expected})")]
    Version { found: u32, expected: u32 },

    #[error("board mismatch: snapshot={found} current={expected}")]
    BoardMismatch { found: String, expected: String },

    #[error("{device}: snapshot holds {found} bytes, device has {expected}")]
    SlaveSize { device: String, found: usize, expected: usize },
}

/// Report a guest programming error and swallow it.
pub(crate) fn report(err: &AccessError) {
    log::warn!(target: GUEST_ERROR, "{}", err);
}

/// Unwrap a read result for the dispatcher path: errors read as zero.
pub(crate) fn read_or_zero(res: Result<u32, AccessError>) -> u32 {
    match res {
        Ok(v) => v,
        Err(e) => {
            report(&e);
            0
        }
    }
}

/// Discard a write result for the dispatcher path, logging any error.
pub(crate) fn log_write(res: Result<(), AccessError>) {
    if let Err(e) = res {
        report(&e);
    }
}
