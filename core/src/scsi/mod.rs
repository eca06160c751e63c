//! Symbios 53C810 SCSI controller and associated code

pub mod controller;
pub mod dma;
pub mod instruction;
pub mod regs;
pub mod target;

#[cfg(test)]
mod tests;

use num_derive::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

pub const STATUS_GOOD: u8 = 0;

/// Maximum length of buffered MSG IN data
pub const MAX_MSGIN_LEN: usize = 8;

/// SCSI message bytes handled in the MSG OUT phase
pub const MSG_COMMAND_COMPLETE: u8 = 0x00;
pub const MSG_EXTENDED: u8 = 0x01;
pub const MSG_DISCONNECT: u8 = 0x04;
pub const MSG_ABORT: u8 = 0x06;
pub const MSG_MESSAGE_REJECT: u8 = 0x07;
pub const MSG_NOP: u8 = 0x08;
pub const MSG_BUS_DEVICE_RESET: u8 = 0x0C;
pub const MSG_ABORT_TAG: u8 = 0x0D;
pub const MSG_CLEAR_QUEUE: u8 = 0x0E;
pub const MSG_SIMPLE_QUEUE: u8 = 0x20;
pub const MSG_HEAD_QUEUE: u8 = 0x21;
pub const MSG_ORDERED_QUEUE: u8 = 0x22;

/// Extended message codes (second byte of an extended message)
pub const EXTMSG_SDTR: u8 = 0x01;
pub const EXTMSG_WDTR: u8 = 0x03;
pub const EXTMSG_PPR: u8 = 0x05;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    FromPrimitive,
    ToPrimitive,
    strum::IntoStaticStr,
    Serialize,
    Deserialize,
)]
/// SCSI bus phase, in the chip's 3-bit MSG/CD/IO encoding as held in the
/// low bits of SSTAT1 and in SCRIPTS instruction words.
pub enum ScsiPhase {
    /// Initiator -> Target
    DataOut = 0,
    /// Target -> Initiator
    DataIn = 1,
    Command = 2,
    Status = 3,
    MessageOut = 6,
    MessageIn = 7,
}

/// Phase field mask within SSTAT1 / instruction words
pub const PHASE_MASK: u8 = 7;
