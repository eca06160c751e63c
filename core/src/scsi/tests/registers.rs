//! Register file access, byte lanes and documented side effects

use super::{ScriptedTarget, controller, op_int};
use crate::scsi::regs::HA_ID;
use crate::scsi::target::TargetPhase;

#[test]
fn multibyte_lane_roundtrip() {
    let mut c = controller();

    // DSA, TEMP, DNAD, DSPS, SCRATCHA, SCRATCHB as 4 independent lanes
    for base in [0x10u32, 0x1C, 0x28, 0x30, 0x34, 0x5C] {
        for lane in 0..4 {
            c.write_register(base + lane, 0x11 * (lane as u8 + 1));
        }
        for lane in 0..4 {
            assert_eq!(
                c.read_register(base + lane),
                0x11 * (lane as u8 + 1),
                "register {:02X} lane {}",
                base,
                lane
            );
        }
        // Writing one lane leaves the others alone
        c.write_register(base + 2, 0xAB);
        assert_eq!(c.read_register(base + 1), 0x22);
        assert_eq!(c.read_register(base + 2), 0xAB);
        assert_eq!(c.read_register(base + 3), 0x44);
    }
}

#[test]
fn dbc_is_24bit() {
    let mut c = controller();

    c.write_register(0x24, 0x78);
    c.write_register(0x25, 0x56);
    c.write_register(0x26, 0x34);
    assert_eq!(c.regs.dbc, 0x0034_5678);
    // 0x27 is DCMD, not a fourth DBC lane
    assert_eq!(c.read_register(0x27), 0x40);
}

#[test]
fn io_window_compose_and_alias() {
    let mut c = controller();

    c.io_write32(0x10, 0xDEAD_BEEF);
    assert_eq!(c.regs.dsa, 0xDEAD_BEEF);
    assert_eq!(c.io_read32(0x10), 0xDEAD_BEEF);
    assert_eq!(c.io_read16(0x12), 0xDEAD);

    // Window aliases on the low 8 bits of the address
    assert_eq!(c.io_read32(0x0310), 0xDEAD_BEEF);
    assert_eq!(c.mmio_read32(0xFFFF_1F10), 0xDEAD_BEEF);
}

#[test]
fn readonly_offsets_ignore_writes() {
    let mut c = controller();

    // Revision ID
    c.write_register(0x08, 0xFF);
    assert_eq!(c.read_register(0x08), 0x00);
    // SSID/SBCL and the 0x0C-0x0F block probed by Linux on startup
    for offset in 0x0A..=0x0F {
        c.write_register(offset, 0xFF);
    }
    assert_eq!(c.regs.ssid, 0);
    assert_eq!(c.regs.dstat.0 & 0x7F, 0);
}

#[test]
fn constant_registers() {
    let mut c = controller();

    assert_eq!(c.read_register(0x18), 0xFF); // CTEST0
    assert_eq!(c.read_register(0x19), 0xF0); // CTEST1: DMA FIFO empty
    assert_eq!(c.read_register(0x20), 0x00); // DFIFO
    assert_eq!(c.read_register(0x23), 0x00); // CTEST6
    assert_eq!(c.read_register(0x46), 0x4F); // MACNTL
    assert_eq!(c.read_register(0x52), 0xE0); // STEST4
}

#[test]
fn scid_reads_without_bit6() {
    let mut c = controller();

    assert_eq!(c.regs.scid, HA_ID);
    c.write_register(0x04, 0x47);
    assert_eq!(c.regs.scid, 0x47);
    assert_eq!(c.read_register(0x04), 0x07);
}

#[test]
fn sdid_masks_to_id() {
    let mut c = controller();

    c.write_register(0x06, 0xF5);
    assert_eq!(c.read_register(0x06), 0x05);
}

#[test]
fn dstat_read_clears_unless_intf() {
    let mut c = controller();

    c.regs.dstat.set_sir(true);
    let val = c.read_register(0x0C);
    // DFE always reads set
    assert_eq!(val, 0x84);
    assert_eq!(c.read_register(0x0C), 0x80);

    // With INTF pending the causes are preserved across the read
    c.regs.dstat.set_sir(true);
    c.regs.istat.set_intf(true);
    assert_eq!(c.read_register(0x0C), 0x84);
    assert_eq!(c.read_register(0x0C), 0x84);
}

#[test]
fn sist_read_clears() {
    let mut c = controller();

    c.regs.sist0.set_ma(true);
    c.regs.sist1.set_sto(true);
    assert_eq!(c.read_register(0x42), 0x80);
    assert_eq!(c.read_register(0x42), 0x00);
    assert_eq!(c.read_register(0x43), 0x04);
    assert_eq!(c.read_register(0x43), 0x00);
}

#[test]
fn ctest2_latches_sigp() {
    let mut c = controller();

    c.regs.istat.set_sigp(true);
    let val = c.read_register(0x1A);
    assert_ne!(val & 0x40, 0);
    assert!(!c.regs.istat.sigp());
    assert_eq!(c.read_register(0x1A) & 0x40, 0);
    // DACK and CM always read set
    assert_ne!(c.read_register(0x1A) & 0x11, 0x00);
}

#[test]
fn istat_intf_write_one_to_clear() {
    let mut c = controller();

    c.regs.istat.set_intf(true);
    c.write_register(0x14, 0x04);
    assert!(!c.regs.istat.intf());
}

#[test]
fn istat_srst_soft_resets() {
    let mut c = controller();

    c.regs.dsp = 0x1234_5678;
    c.regs.scntl3 = 0x55;
    c.write_register(0x14, 0x40);
    assert_eq!(c.regs.dsp, 0);
    assert_eq!(c.regs.scntl3, 0);
    assert_eq!(c.regs.istat.0, 0);
    assert_eq!(c.regs.scid, HA_ID);
}

#[test]
fn istat_abrt_raises_dma_interrupt() {
    let mut c = controller();

    c.write_register(0x14, 0x80);
    assert!(c.regs.dstat.abrt());
    assert!(c.regs.istat.dip());
}

#[test]
fn soft_reset_resets_targets() {
    let mut c = controller();
    let (target, log) = ScriptedTarget::new(TargetPhase::Status, vec![], 0);
    c.attach_target_at(target, 3).unwrap();

    c.soft_reset();
    assert_eq!(log.borrow().resets, 1);
}

#[test]
fn attach_rejects_out_of_range_id() {
    let mut c = controller();
    let (target, _) = ScriptedTarget::status_only(0);

    assert!(c.attach_target_at(target, 8).is_err());
    assert!(!c.target_present(8));
}

#[test]
fn scntl1_rst_edge_raises_interrupt() {
    let mut c = controller();

    c.write_register(0x01, 0x08);
    assert!(c.regs.sstat0.rst());
    assert!(c.regs.sist0.rst());
    assert!(c.regs.istat.sip());

    // Still asserted: no second edge
    c.regs.sist0.0 = 0;
    c.write_register(0x01, 0x08);
    assert!(!c.regs.sist0.rst());

    // Deassert
    c.write_register(0x01, 0x00);
    assert!(!c.regs.sstat0.rst());
}

#[test]
fn stime1_raises_gen_immediately() {
    let mut c = controller();

    c.write_register(0x49, 0x03);
    assert!(c.regs.sist1.gen_timer());
    assert!(c.regs.istat.sip());
}

#[test]
fn irq_line_follows_masks() {
    let mut c = controller();

    // Masked cause: pending bit set, line stays low
    c.write_register(0x49, 0x03);
    assert!(c.regs.sist1.gen_timer());
    assert!(!c.irq_asserted());

    // Unmasking raises the line
    c.write_register(0x41, 0x02);
    assert!(c.irq_asserted());

    // Reading SIST1 clears the cause and drops the line
    assert_eq!(c.read_register(0x43) & 0x02, 0x02);
    assert!(!c.irq_asserted());
    assert!(!c.regs.istat.sip());
}

#[test]
fn dsp_write_starts_scripts() {
    let mut c = controller();
    c.bus.write_insn(0x1000, op_int(), 0xCAFE);

    assert!(c.stopped());
    c.io_write32(0x2C, 0x1000);
    assert!(!c.stopped());

    c.step();
    assert!(c.stopped());
    assert!(c.regs.dstat.sir());
    assert_eq!(c.regs.dsps, 0xCAFE);
    assert_eq!(c.regs.dsp, 0x1008);
}

#[test]
fn dsp_write_with_manual_mode_does_not_start() {
    let mut c = controller();
    c.bus.write_insn(0x1000, op_int(), 0xCAFE);

    c.write_register(0x38, 0x01); // DMODE.MAN
    c.io_write32(0x2C, 0x1000);
    assert!(c.stopped());

    // DCNTL.STD starts it regardless
    c.write_register(0x3B, 0x04);
    assert!(!c.stopped());
    c.step();
    assert!(c.regs.dstat.sir());
}

#[test]
fn scntl0_start_flags_arbitration() {
    let mut c = controller();

    c.write_register(0x00, 0x20);
    assert!(c.regs.sstat0.aip());
}

#[test]
fn sstat2_reflects_bus_free() {
    let mut c = controller();

    assert_eq!(c.read_register(0x0F), 2);
    c.regs.scntl1.set_con(true);
    assert_eq!(c.read_register(0x0F), 0);
}
