pub mod testbus;

/// Guest physical address as seen by the bus-mastering DMA engine
pub type Address = u32;

/// Access to the guest's memory and I/O port space, as consumed by the
/// adapter's DMA engine and SCRIPTS instruction fetch.
///
/// These accessors are assumed to always succeed; the adapter performs its
/// own length/phase bookkeeping and there is no partial-failure path at
/// this layer.
pub trait GuestBus {
    fn mem_read(&mut self, addr: Address, buf: &mut [u8]);
    fn mem_write(&mut self, addr: Address, buf: &[u8]);
    fn port_read(&mut self, port: u16) -> u8;
    fn port_write(&mut self, port: u16, val: u8);

    /// Reads a little-endian dword from guest memory (SCRIPTS fetches,
    /// indirect and table operands).
    fn mem_read_dword(&mut self, addr: Address) -> u32 {
        let mut buf = [0; 4];
        self.mem_read(addr, &mut buf);
        u32::from_le_bytes(buf)
    }
}
