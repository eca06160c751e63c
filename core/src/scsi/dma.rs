//! DMA transfer unit
//!
//! Moves bytes between the guest and the chip's buffers. The DMODE mode
//! bits select I/O space independently per direction (SIOM for fetches,
//! DIOM for stores); I/O-space transfers are performed one byte-wide port
//! access per byte at incrementing port numbers. Guest-memory accesses are
//! assumed to always succeed; length bookkeeping is the interpreter's job.

use crate::bus::{Address, GuestBus};

/// Staging buffer size for guest-to-guest memory moves
const STAGING_BUF_SIZE: usize = 4096;

/// Reads from the guest into `buf`, from I/O space if `io_space` is set
pub fn guest_fetch<TBus: GuestBus>(bus: &mut TBus, io_space: bool, addr: Address, buf: &mut [u8]) {
    if io_space {
        log::trace!("DMA fetch from I/O address {:04X}", addr as u16);
        for (i, b) in buf.iter_mut().enumerate() {
            *b = bus.port_read((addr as u16).wrapping_add(i as u16));
        }
    } else {
        bus.mem_read(addr, buf);
    }
}

/// Writes `buf` out to the guest, to I/O space if `io_space` is set
pub fn guest_store<TBus: GuestBus>(bus: &mut TBus, io_space: bool, addr: Address, buf: &[u8]) {
    if io_space {
        log::trace!("DMA store to I/O address {:04X}", addr as u16);
        for (i, b) in buf.iter().enumerate() {
            bus.port_write((addr as u16).wrapping_add(i as u16), *b);
        }
    } else {
        bus.mem_write(addr, buf);
    }
}

/// Guest-to-guest copy through a bounded staging buffer (Memory Move
/// instruction). Honors the I/O-space mode bits on both sides.
pub fn guest_copy<TBus: GuestBus>(
    bus: &mut TBus,
    src_io: bool,
    dest_io: bool,
    mut src: Address,
    mut dest: Address,
    mut count: u32,
) {
    let mut buf = [0u8; STAGING_BUF_SIZE];

    while count > 0 {
        let n = (count as usize).min(STAGING_BUF_SIZE);
        guest_fetch(bus, src_io, src, &mut buf[..n]);
        guest_store(bus, dest_io, dest, &buf[..n]);
        src += n as Address;
        dest += n as Address;
        count -= n as u32;
    }
}
