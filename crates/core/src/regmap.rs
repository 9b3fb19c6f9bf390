//! Register decode tables.
//!
//! Each peripheral declares its register window once with
//! [`register_block!`]: offset, datasheet name, guest access direction and
//! write-protect class. Decoding an offset either yields a variant that the
//! device then handles in an exhaustive `match`, or a [`AccessError`] that
//! the caller reports. Nothing outside the table is ever touched.

use crate::error::AccessError;

/// Direction the guest may access a register in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadWrite,
    ReadOnly,
    WriteOnly,
}

/// Whether the write-protect mode gates writes to a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    Open,
    Protected,
}

pub trait RegisterBlock: Copy + Sized + 'static {
    /// Device name used in diagnostics.
    const DEVICE: &'static str;
    /// Every register in the window, in offset order.
    const ALL: &'static [Self];

    fn offset(self) -> u32;
    fn name(self) -> &'static str;
    fn access(self) -> Access;
    fn protection(self) -> Protection;

    /// Look up the register at `offset`, regardless of access direction.
    fn decode(offset: u32) -> Result<Self, AccessError> {
        Self::ALL
            .iter()
            .copied()
            .find(|r| r.offset() == offset)
            .ok_or(AccessError::BadOffset { device: Self::DEVICE, offset })
    }

    /// Decode a guest read.
    fn decode_read(offset: u32) -> Result<Self, AccessError> {
        let reg = Self::decode(offset)?;
        match reg.access() {
            Access::WriteOnly => Err(AccessError::WriteOnly { device: Self::DEVICE, reg: reg.name() }),
            _ => Ok(reg),
        }
    }

    /// Decode a guest write. `locked` is the device's current write-protect state.
    fn decode_write(offset: u32, locked: bool) -> Result<Self, AccessError> {
        let reg = Self::decode(offset)?;
        if reg.access() == Access::ReadOnly {
            return Err(AccessError::ReadOnly { device: Self::DEVICE, reg: reg.name() });
        }
        if locked && reg.protection() == Protection::Protected {
            return Err(AccessError::WriteProtected { device: Self::DEVICE, reg: reg.name() });
        }
        Ok(reg)
    }
}

/// Declare a register window.
///
/// ```ignore
/// register_block! {
///     device = "rtt";
///     pub enum RttReg {
///         Mr = 0x00 => "RTT_MR", ReadWrite, Open;
///         Sr = 0x0c => "RTT_SR", ReadOnly, Open;
///     }
/// }
/// ```
#[macro_export]
macro_rules! register_block {
    (
        device = $device:literal;
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($variant:ident = $offset:literal => $label:literal, $access:ident, $prot:ident;)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        $vis enum $name {
            $($variant,)+
        }

        impl $crate::regmap::RegisterBlock for $name {
            const DEVICE: &'static str = $device;
            const ALL: &'static [Self] = &[$($name::$variant,)+];

            fn offset(self) -> u32 {
                match self {
                    $($name::$variant => $offset,)+
                }
            }

            fn name(self) -> &'static str {
                match self {
                    $($name::$variant => $label,)+
                }
            }

            fn access(self) -> $crate::regmap::Access {
                match self {
                    $($name::$variant => $crate::regmap::Access::$access,)+
                }
            }

            fn protection(self) -> $crate::regmap::Protection {
                match self {
                    $($name::$variant => $crate::regmap::Protection::$prot,)+
                }
            }
        }
    };
}
