//! 53C810 operating register file
//!
//! Storage and bit-field layout only; read/write side effects live in the
//! controller. Multi-byte registers (DSA, TEMP, DBC, DNAD, DSP, DSPS,
//! SCRATCHA/B) are kept as native integers and exposed to the guest as
//! little-endian byte lanes.

use proc_bitfield::bitfield;
use serde::{Deserialize, Serialize};

use super::PHASE_MASK;

bitfield! {
    /// SCNTL0 - SCSI Control 0
    #[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Scntl0(pub u8): Debug, FromStorage, IntoStorage, DerefStorage {
        pub trg: bool @ 0,
        pub aap: bool @ 1,
        pub epc: bool @ 3,
        pub watn: bool @ 4,
        pub start: bool @ 5,
        /// Full arbitration mode select
        pub arb: u8 @ 6..=7,
    }
}

bitfield! {
    /// SCNTL1 - SCSI Control 1
    #[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Scntl1(pub u8): Debug, FromStorage, IntoStorage, DerefStorage {
        /// Start SCSI transfer (not writable)
        pub sst: bool @ 0,
        /// Immediate arbitration
        pub iarb: bool @ 1,
        pub aesp: bool @ 2,
        /// Assert SCSI RST
        pub rst: bool @ 3,
        /// Connected
        pub con: bool @ 4,
        pub dhp: bool @ 5,
        pub adb: bool @ 6,
        pub exc: bool @ 7,
    }
}

bitfield! {
    /// ISTAT - Interrupt Status
    #[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Istat(pub u8): Debug, FromStorage, IntoStorage, DerefStorage {
        /// DMA interrupt pending
        pub dip: bool @ 0,
        /// SCSI interrupt pending
        pub sip: bool @ 1,
        /// Interrupt on the fly
        pub intf: bool @ 2,
        pub con: bool @ 3,
        pub sem: bool @ 4,
        /// Signal process (software doorbell)
        pub sigp: bool @ 5,
        /// Software reset
        pub srst: bool @ 6,
        /// Abort operation
        pub abrt: bool @ 7,
    }
}

bitfield! {
    /// SSTAT0 - SCSI Status 0
    #[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Sstat0(pub u8): Debug, FromStorage, IntoStorage, DerefStorage {
        pub sdp0: bool @ 0,
        /// SCSI RST received
        pub rst: bool @ 1,
        /// Won arbitration
        pub woa: bool @ 2,
        /// Lost arbitration
        pub loa: bool @ 3,
        /// Arbitration in progress
        pub aip: bool @ 4,
        pub olf: bool @ 5,
        pub orf: bool @ 6,
        pub ilf: bool @ 7,
    }
}

bitfield! {
    /// SIST0 - SCSI Interrupt Status 0
    #[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Sist0(pub u8): Debug, FromStorage, IntoStorage, DerefStorage {
        /// Parity error
        pub par: bool @ 0,
        /// SCSI RST received
        pub rst: bool @ 1,
        /// Unexpected disconnect
        pub udc: bool @ 2,
        /// Scatter/gather error
        pub sge: bool @ 3,
        /// Reselected
        pub rsl: bool @ 4,
        /// Selected
        pub sel: bool @ 5,
        /// Function complete
        pub cmp: bool @ 6,
        /// Phase mismatch
        pub ma: bool @ 7,
    }
}

bitfield! {
    /// SIST1 - SCSI Interrupt Status 1
    #[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Sist1(pub u8): Debug, FromStorage, IntoStorage, DerefStorage {
        /// Handshake-to-handshake timeout
        pub hth: bool @ 0,
        /// General purpose timer expired
        pub gen_timer: bool @ 1,
        /// Selection timeout
        pub sto: bool @ 2,
        pub sbmc: bool @ 4,
    }
}

bitfield! {
    /// SOCL - SCSI Output Control Latch
    #[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Socl(pub u8): Debug, FromStorage, IntoStorage, DerefStorage {
        pub io: bool @ 0,
        pub cd: bool @ 1,
        pub msg: bool @ 2,
        pub atn: bool @ 3,
        pub sel: bool @ 4,
        pub bsy: bool @ 5,
        pub ack: bool @ 6,
        pub req: bool @ 7,
    }
}

bitfield! {
    /// DSTAT - DMA Status
    #[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Dstat(pub u8): Debug, FromStorage, IntoStorage, DerefStorage {
        /// Illegal instruction
        pub iid: bool @ 0,
        /// SCRIPTS interrupt instruction
        pub sir: bool @ 2,
        /// Single-step interrupt
        pub ssi: bool @ 3,
        /// Aborted
        pub abrt: bool @ 4,
        /// Bus fault
        pub bf: bool @ 5,
        pub mdpe: bool @ 6,
        /// DMA FIFO empty
        pub dfe: bool @ 7,
    }
}

bitfield! {
    /// DMODE - DMA Mode
    #[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Dmode(pub u8): Debug, FromStorage, IntoStorage, DerefStorage {
        /// Manual start mode
        pub man: bool @ 0,
        pub bof: bool @ 1,
        pub ermp: bool @ 2,
        pub erl: bool @ 3,
        /// Destination I/O memory enable (writes go to I/O space)
        pub diom: bool @ 4,
        /// Source I/O memory enable (reads come from I/O space)
        pub siom: bool @ 5,
    }
}

bitfield! {
    /// DCNTL - DMA Control
    #[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Dcntl(pub u8): Debug, FromStorage, IntoStorage, DerefStorage {
        pub com: bool @ 0,
        pub irqd: bool @ 1,
        /// Start DMA operation
        pub std: bool @ 2,
        pub irqm: bool @ 3,
        /// Single-step mode
        pub ssm: bool @ 4,
        pub pfen: bool @ 5,
        pub pff: bool @ 6,
        pub clse: bool @ 7,
    }
}

bitfield! {
    /// CTEST2 - Chip Test 2
    #[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Ctest2(pub u8): Debug, FromStorage, IntoStorage, DerefStorage {
        pub dack: bool @ 0,
        pub dreq: bool @ 1,
        pub teop: bool @ 2,
        pub pcicie: bool @ 3,
        /// Configured as memory
        pub cm: bool @ 4,
        pub cio: bool @ 5,
        /// SIGP (latched from ISTAT, cleared on read)
        pub sigp: bool @ 6,
        pub ddir: bool @ 7,
    }
}

/// Host adapter's own SCSI ID
pub const HA_ID: u8 = 7;

/// Enable Response to Reselection bits in SCID
pub const SCID_RRE: u8 = 0x60;

/// Complete operating register set of the narrow (8-bit) chip
#[derive(Clone, Serialize, Deserialize)]
pub struct RegisterFile {
    pub scntl0: Scntl0,
    pub scntl1: Scntl1,
    pub scntl2: u8,
    pub scntl3: u8,
    pub scid: u8,
    pub sxfer: u8,
    pub sdid: u8,
    pub ssid: u8,
    pub gpreg: u8,
    pub sfbr: u8,
    pub socl: Socl,
    pub sstat0: Sstat0,
    /// SSTAT1: current bus phase in the low 3 bits
    pub sstat1: u8,
    pub dsa: u32,
    pub istat: Istat,
    pub mbox0: u8,
    pub mbox1: u8,
    pub ctest2: Ctest2,
    pub ctest3: u8,
    pub ctest4: u8,
    pub ctest5: u8,
    pub dfifo: u8,
    pub temp: u32,
    /// DMA byte counter (24-bit)
    pub dbc: u32,
    /// DMA command: bits 31:24 of the last fetched instruction
    pub dcmd: u8,
    pub dnad: u32,
    /// DMA SCRIPTS pointer
    pub dsp: u32,
    /// DMA SCRIPTS pointer save / second instruction word
    pub dsps: u32,
    pub scratcha: u32,
    pub scratchb: u32,
    pub dmode: Dmode,
    pub dien: u8,
    pub sbr: u8,
    pub dcntl: Dcntl,
    /// Adder output (relative jump address debug readback)
    pub adder: u32,
    pub sien0: u8,
    pub sien1: u8,
    pub sist0: Sist0,
    pub sist1: Sist1,
    pub gpcntl: u8,
    pub stime0: u8,
    pub respid0: u8,
    pub stest1: u8,
    pub stest2: u8,
    pub stest3: u8,
    /// SIDL: last byte latched during MSG IN
    pub sidl0: u8,
    pub dstat: Dstat,
    pub chip_rev: u8,
}

impl RegisterFile {
    pub fn new() -> Self {
        let mut regs = Self {
            scntl0: Scntl0(0),
            scntl1: Scntl1(0),
            scntl2: 0,
            scntl3: 0,
            scid: 0,
            sxfer: 0,
            sdid: 0,
            ssid: 0,
            gpreg: 0,
            sfbr: 0,
            socl: Socl(0),
            sstat0: Sstat0(0),
            sstat1: 0,
            dsa: 0,
            istat: Istat(0),
            mbox0: 0,
            mbox1: 0,
            ctest2: Ctest2(0),
            ctest3: 0,
            ctest4: 0,
            ctest5: 0,
            dfifo: 0,
            temp: 0,
            dbc: 0,
            dcmd: 0,
            dnad: 0,
            dsp: 0,
            dsps: 0,
            scratcha: 0,
            scratchb: 0,
            dmode: Dmode(0),
            dien: 0,
            sbr: 0,
            dcntl: Dcntl(0),
            adder: 0,
            sien0: 0,
            sien1: 0,
            sist0: Sist0(0),
            sist1: Sist1(0),
            gpcntl: 0,
            stime0: 0,
            respid0: 0,
            stest1: 0,
            stest2: 0,
            stest3: 0,
            sidl0: 0,
            dstat: Dstat(0),
            chip_rev: 0,
        };
        regs.reset();
        regs
    }

    /// Resets all registers to their power-on/soft-reset values
    pub fn reset(&mut self) {
        let chip_rev = self.chip_rev;
        *self = Self {
            scntl0: Scntl0(0xC0),
            scntl1: Scntl1(0),
            scntl2: 0,
            scntl3: 0,
            scid: HA_ID,
            sxfer: 0,
            sdid: 0,
            ssid: 0,
            gpreg: 0,
            sfbr: 0,
            socl: Socl(0),
            sstat0: Sstat0(0),
            sstat1: 0,
            dsa: 0,
            istat: Istat(0),
            mbox0: 0,
            mbox1: 0,
            ctest2: Ctest2(0).with_dack(true),
            ctest3: 0,
            ctest4: 0,
            ctest5: 0,
            dfifo: 0,
            temp: 0,
            dbc: 0,
            dcmd: 0x40,
            dnad: 0,
            dsp: 0,
            dsps: 0,
            scratcha: 0,
            scratchb: 0,
            dmode: Dmode(0),
            dien: 0,
            sbr: 0,
            dcntl: Dcntl(0),
            adder: 0,
            sien0: 0,
            sien1: 0,
            sist0: Sist0(0),
            sist1: Sist1(0),
            gpcntl: 0x03,
            stime0: 1,
            respid0: 0x80,
            stest1: 0,
            stest2: 0,
            stest3: 0,
            sidl0: 0,
            dstat: Dstat(0).with_dfe(true),
            chip_rev,
        };
    }

    /// Current bus phase bits (low 3 bits of SSTAT1)
    pub fn phase_bits(&self) -> u8 {
        self.sstat1 & PHASE_MASK
    }

    pub fn set_phase_bits(&mut self, phase: u8) {
        self.sstat1 = (self.sstat1 & !PHASE_MASK) | (phase & PHASE_MASK);
    }
}

/// Extracts one little-endian byte lane from a multi-byte register
pub fn reg_lane(value: u32, lane: u32) -> u8 {
    (value >> (lane * 8)) as u8
}

/// Replaces one little-endian byte lane of a multi-byte register
pub fn set_reg_lane(value: &mut u32, lane: u32, val: u8) {
    let shift = lane * 8;
    *value = (*value & !(0xFF << shift)) | (u32::from(val) << shift);
}
