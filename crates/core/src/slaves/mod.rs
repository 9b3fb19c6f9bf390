//! SPI slave devices that can be attached to a [`crate::spi_bus::ChipSelectBus`].

pub mod flash;

pub use flash::SpiFlash;
