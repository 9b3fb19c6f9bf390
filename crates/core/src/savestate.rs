//! Save state for the SAM3S peripheral models.
//!
//! Captures every device register, FIFO and counter plus the scheduler clock
//! and the contents of stateful SPI slaves, using bincode serialization.
//!
//! ## File format
//!
//! ```text
//! +------------------+
//! | Magic "S3PS"     |  4 bytes
//! +------------------+
//! | Format version   |  u32 little-endian (currently 1)
//! +------------------+
//! | Board            |  u8 (0 = AT91SAM3S8, 1 = AT91SAM3SD8)
//! +------------------+
//! | Payload          |  bincode, uncompressed
//! +------------------+
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::SaveStateError;
use crate::peripherals::{Board, CoreShadow};
use crate::MachineConfig;

/// Magic bytes identifying a SAM3S peripheral snapshot.
const MAGIC: &[u8; 4] = b"S3PS";
/// Current save state format version.
pub const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 9;

// ─── Per-component state structs ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpiState {
    pub cr: u32,
    pub mr: u32,
    pub rdr: u32,
    pub tdr: u32,
    pub sr: u32,
    pub ier: u32,
    pub idr: u32,
    pub imr: u32,
    pub csr: [u32; 4],
    pub wpmr: u32,
    pub wpsr: u32,
    pub tx_fifo: [u16; 8],
    pub rx_fifo: [u16; 8],
    pub tx_head: u32,
    pub rx_head: u32,
    pub tx_len: u32,
    pub rx_len: u32,
    pub debug_shadow: bool,
    pub irq_level: bool,
    pub cs: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PmcState {
    pub scer: u32,
    pub scdr: u32,
    pub scsr: u32,
    pub pcer: [u32; 2],
    pub pcdr: [u32; 2],
    pub pcsr: [u32; 2],
    pub mor: u32,
    pub mcfr: u32,
    pub pllar: u32,
    pub pllbr: u32,
    pub mckr: u32,
    pub usb: u32,
    pub pck: [u32; 3],
    pub ier: u32,
    pub idr: u32,
    pub imr: u32,
    pub sr: u32,
    pub fsmr: u32,
    pub fspr: u32,
    pub focr: u32,
    pub wpmr: u32,
    pub wpsr: u32,
    pub ocr: u32,
    pub startup: u32,
    pub plla_count: u32,
    pub plla_pending: bool,
    pub pllb_count: u32,
    pub pllb_pending: bool,
    pub irq_level: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RttState {
    pub mr: u32,
    pub ar: u32,
    pub vr: u32,
    pub sr: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SysCtlState {
    pub core: CoreShadow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerState {
    pub now: u64,
    /// Next deadline per tick source, in source order
    pub deadlines: Vec<u64>,
}

/// Opaque slave contents, keyed by chip select.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaveSnapshot {
    pub cs: u8,
    pub data: Vec<u8>,
}

// ─── Top-level save state ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveState {
    pub config: MachineConfig,
    pub spi: SpiState,
    pub pmc: PmcState,
    pub rtt: RttState,
    pub sysctl: SysCtlState,
    pub scheduler: SchedulerState,
    pub slaves: Vec<SlaveSnapshot>,
}

// ─── Encoding ───────────────────────────────────────────────────────────────

/// Encode with header. The board byte comes from `state.config`.
pub fn save_to_bytes(state: &SaveState) -> Result<Vec<u8>, SaveStateError> {
    let payload = bincode::serialize(state)?;

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.push(state.config.board.id());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Decode, verifying magic, version and board.
pub fn load_from_bytes(data: &[u8], expected_board: Board) -> Result<SaveState, SaveStateError> {
    if data.len() < HEADER_LEN {
        return Err(SaveStateError::TooSmall(data.len()));
    }
    if &data[0..4] != MAGIC {
        return Err(SaveStateError::BadMagic);
    }
    let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    if version != FORMAT_VERSION {
        return Err(SaveStateError::Version { found: version, expected: FORMAT_VERSION });
    }
    let board = data[8];
    if board != expected_board.id() {
        let found = Board::ALL
            .iter()
            .find(|b| b.id() == board)
            .map_or_else(|| format!("unknown ({})", board), |b| b.name().to_string());
        return Err(SaveStateError::BoardMismatch {
            found,
            expected: expected_board.name().to_string(),
        });
    }

    Ok(bincode::deserialize(&data[HEADER_LEN..])?)
}

pub fn save_to_file(state: &SaveState, path: &Path) -> Result<(), SaveStateError> {
    let bytes = save_to_bytes(state)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

pub fn load_from_file(path: &Path, expected_board: Board) -> Result<SaveState, SaveStateError> {
    let data = std::fs::read(path)?;
    load_from_bytes(&data, expected_board)
}
