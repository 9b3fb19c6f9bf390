//! End-to-end scenarios through the board address map.

use sam3s_core::peripherals::{pmc, rtt, spi, IRQ_PMC, IRQ_RTT, IRQ_SPI, PMC_BASE, RTT_BASE, SPI_BASE, SYSCTL_BASE};
use sam3s_core::slaves::SpiFlash;
use sam3s_core::{savestate, Board, Machine, MachineConfig, SaveStateError};

const SPI_CR: u32 = SPI_BASE;
const SPI_MR: u32 = SPI_BASE + 0x04;
const SPI_RDR: u32 = SPI_BASE + 0x08;
const SPI_TDR: u32 = SPI_BASE + 0x0c;
const SPI_SR: u32 = SPI_BASE + 0x10;
const SPI_IER: u32 = SPI_BASE + 0x14;

const PMC_PLLAR: u32 = PMC_BASE + 0x28;
const PMC_IER: u32 = PMC_BASE + 0x60;
const PMC_SR: u32 = PMC_BASE + 0x68;

const RTT_MR: u32 = RTT_BASE;
const RTT_AR: u32 = RTT_BASE + 0x04;
const RTT_VR: u32 = RTT_BASE + 0x08;
const RTT_SR: u32 = RTT_BASE + 0x0c;

/// One slow tick is 100 host cycles.
fn machine() -> Machine {
    Machine::new(MachineConfig { host_clock_hz: 1_000, ..MachineConfig::default() })
}

fn machine_with_flash() -> Machine {
    let mut m = machine();
    let mut flash = SpiFlash::new("w25q", 64 * 1024);
    flash.load_data_at(&[0xDE, 0xAD, 0xBE, 0xEF], 0x200);
    m.attach_slave(Box::new(flash), 0).unwrap();
    m.write(SPI_MR, spi::MR_MSTR); // fixed peripheral select, NPCS0
    m.write(SPI_CR, spi::CR_SPIEN);
    m
}

/// Clock `bytes` out to the flash in one chip-select assertion.
fn flash_command(m: &mut Machine, bytes: &[u8]) -> Vec<u8> {
    let out = bytes
        .iter()
        .map(|&b| {
            m.write(SPI_TDR, b as u32);
            m.read(SPI_RDR) as u8
        })
        .collect();
    m.write(SPI_CR, spi::CR_LASTXFER);
    out
}

#[test]
fn test_loopback_scenario() {
    let mut m = machine();
    m.write(SPI_MR, spi::MR_MSTR | spi::MR_LLB);
    m.write(SPI_CR, spi::CR_SPIEN);
    m.write(SPI_TDR, 0x41);
    assert_eq!(m.read(SPI_RDR), 0x41);
    assert_ne!(m.read(SPI_SR) & spi::SR_TXEMPTY, 0);
}

#[test]
fn test_flash_read_through_controller() {
    let mut m = machine_with_flash();
    assert_eq!(flash_command(&mut m, &[0x9F, 0, 0, 0]), vec![0xFF, 0xEF, 0x40, 0x10]);
    let data = flash_command(&mut m, &[0x03, 0x00, 0x02, 0x00, 0, 0, 0, 0]);
    assert_eq!(&data[4..], &[0xDEu8, 0xAD, 0xBE, 0xEF]);
    assert_eq!(m.spi.bus().cs(), sam3s_core::NO_CS);
}

#[test]
fn test_pll_lock_via_scheduler() {
    let mut m = machine();
    m.write(PMC_IER, pmc::SR_LOCKA);
    m.write(PMC_PLLAR, pmc::PLL_ONE | (3 << 8));
    m.advance(299);
    assert_eq!(m.read(PMC_SR) & pmc::SR_LOCKA, 0);
    assert!(!m.pending_irqs().contains(&IRQ_PMC));
    m.advance(1);
    assert_ne!(m.read(PMC_SR) & pmc::SR_LOCKA, 0);
    assert!(m.pending_irqs().contains(&IRQ_PMC));
}

#[test]
fn test_rtt_alarm_and_reset() {
    let mut m = machine();
    m.advance(400);
    assert_eq!(m.read(RTT_VR), 4);
    m.write(RTT_MR, 0x8000 | rtt::MR_RTTRST);
    assert_eq!(m.read(RTT_VR), 0);

    m.read(RTT_SR);
    assert!(m.pending_irqs().is_empty());
    m.write(RTT_AR, 0);
    assert_eq!(m.pending_irqs(), vec![IRQ_RTT]);
    assert_eq!(m.read(RTT_SR), rtt::SR_ALMS);
    assert!(m.pending_irqs().is_empty());
}

#[test]
fn test_debug_port_is_side_effect_free() {
    let mut m = machine();
    m.write(SPI_MR, spi::MR_MSTR | spi::MR_LLB);
    m.write(SPI_CR, spi::CR_SPIEN);
    m.write(SPI_TDR, 0x10);
    m.write(SPI_TDR, 0x20);
    let before = (m.spi.tx_len(), m.spi.rx_len());

    let mut dbg = m.debug();
    assert_eq!(dbg.read(SPI_TDR), Ok(0x20));
    dbg.write(SPI_TDR, 0xAA).unwrap();
    assert_eq!(dbg.read(SPI_CR), Ok(spi::CR_SPIEN));
    assert_eq!(dbg.read(SYSCTL_BASE), Ok(Board::At91Sam3s8.cidr()));
    assert!(dbg.read(0x0000_0000).is_err());
    dbg.end_session();

    assert_eq!((m.spi.tx_len(), m.spi.rx_len()), before);
    assert_eq!(m.read(SPI_RDR), 0x10);
    assert_eq!(m.read(SPI_RDR), 0x20);
}

#[test]
fn test_spi_interrupt_number() {
    let mut m = machine();
    m.write(SPI_IER, spi::SR_TXBUFE);
    assert_eq!(m.pending_irqs(), vec![IRQ_SPI]);
}

#[test]
fn test_snapshot_restores_everything() {
    let mut m = machine_with_flash();
    m.advance(250);
    m.write(PMC_PLLAR, pmc::PLL_ONE | (4 << 8));
    m.advance(100);
    flash_command(&mut m, &[0x06]);
    flash_command(&mut m, &[0x02, 0x00, 0x03, 0x00, 0x42]);
    let bytes = savestate::save_to_bytes(&m.save_state()).unwrap();

    // Keep running, then rewind
    m.advance(1_000);
    flash_command(&mut m, &[0x06]);
    flash_command(&mut m, &[0x20, 0x00, 0x03, 0x00]);
    let state = savestate::load_from_bytes(&bytes, Board::At91Sam3s8).unwrap();
    m.load_state(&state).unwrap();

    assert_eq!(m.now(), 350);
    assert_eq!(m.read(RTT_VR), 3);
    assert_eq!(m.read(PMC_SR) & pmc::SR_LOCKA, 0);
    m.advance(300);
    assert_ne!(m.read(PMC_SR) & pmc::SR_LOCKA, 0);
    assert_eq!(flash_command(&mut m, &[0x03, 0x00, 0x03, 0x00, 0])[4], 0x42);
}

#[test]
fn test_rejected_snapshot_leaves_machine_untouched() {
    let mut m = machine_with_flash();
    m.advance(500);
    let state = m.save_state();

    // Same board, but a 128 KiB flash on NPCS0
    let mut other = machine();
    other.attach_slave(Box::new(SpiFlash::new("w25q", 128 * 1024)), 0).unwrap();
    other.advance(100);
    assert!(matches!(other.load_state(&state), Err(SaveStateError::SlaveSize { .. })));
    assert_eq!(other.now(), 100);
    assert_eq!(other.read(RTT_VR), 1);
}

#[test]
fn test_snapshot_board_mismatch() {
    let m = machine();
    let state = m.save_state();
    let mut other = Machine::new(MachineConfig { board: Board::At91Sam3sd8, ..MachineConfig::default() });
    assert!(matches!(other.load_state(&state), Err(SaveStateError::BoardMismatch { .. })));
}
