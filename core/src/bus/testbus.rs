use std::collections::HashMap;

use super::{Address, GuestBus};

/// Sparse guest memory/port space for tests.
///
/// Unwritten memory reads as zero. Port accesses are recorded so tests can
/// assert on the I/O-space DMA path.
pub struct Testbus {
    pub mem: HashMap<Address, u8>,
    pub ports: HashMap<u16, u8>,
    pub port_log: Vec<(u16, Option<u8>)>,
}

impl Testbus {
    pub fn new() -> Self {
        Self {
            mem: HashMap::new(),
            ports: HashMap::new(),
            port_log: vec![],
        }
    }

    pub fn write_byte(&mut self, addr: Address, val: u8) {
        self.mem.insert(addr, val);
    }

    pub fn read_byte(&self, addr: Address) -> u8 {
        *self.mem.get(&addr).unwrap_or(&0)
    }

    pub fn write_dword(&mut self, addr: Address, val: u32) {
        for (i, b) in val.to_le_bytes().into_iter().enumerate() {
            self.mem.insert(addr + i as Address, b);
        }
    }

    pub fn read_dword(&self, addr: Address) -> u32 {
        let mut buf = [0; 4];
        for (i, b) in buf.iter_mut().enumerate() {
            *b = self.read_byte(addr + i as Address);
        }
        u32::from_le_bytes(buf)
    }

    /// Lays down a SCRIPTS instruction (two dwords) at the given address
    pub fn write_insn(&mut self, addr: Address, insn: u32, operand: u32) {
        self.write_dword(addr, insn);
        self.write_dword(addr + 4, operand);
    }
}

impl GuestBus for Testbus {
    fn mem_read(&mut self, addr: Address, buf: &mut [u8]) {
        for (i, b) in buf.iter_mut().enumerate() {
            *b = *self.mem.get(&(addr + i as Address)).unwrap_or(&0);
        }
    }

    fn mem_write(&mut self, addr: Address, buf: &[u8]) {
        for (i, b) in buf.iter().enumerate() {
            self.mem.insert(addr + i as Address, *b);
        }
    }

    fn port_read(&mut self, port: u16) -> u8 {
        let val = *self.ports.get(&port).unwrap_or(&0);
        self.port_log.push((port, None));
        val
    }

    fn port_write(&mut self, port: u16, val: u8) {
        self.ports.insert(port, val);
        self.port_log.push((port, Some(val)));
    }
}
