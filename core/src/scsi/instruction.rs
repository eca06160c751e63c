//! SCRIPTS instruction word decoding
//!
//! A SCRIPTS instruction is a pair of 32-bit words; the first selects one of
//! four instruction classes in bits 31:30 and carries all mode/condition
//! bits, the second is an address/operand resolved at execution time.
//! Decoding is separated from execution so each class can be exercised on
//! its own; anything needing device or guest-memory state (indirect
//! operands, condition evaluation) stays with the interpreter.

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

/// Sign-extends the low 24 bits of a SCRIPTS operand
pub fn sext24(value: u32) -> i32 {
    ((value << 8) as i32) >> 8
}

/// Addressing mode of a Block Move instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockAddressing {
    /// Operand is the transfer address
    Direct,
    /// Operand points to the transfer address
    Indirect,
    /// Signed 24-bit operand offsets a (count, address) table entry off DSA
    TableIndirect,
}

/// I/O class opcodes (class 1, opcode < 5)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOp {
    Select,
    WaitDisconnect,
    WaitReselect,
    Set(SignalBits),
    Clear(SignalBits),
}

/// Bus signal/flag selection of the Set/Clear instructions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalBits {
    pub atn: bool,
    pub ack: bool,
    pub target_mode: bool,
    pub carry: bool,
}

/// Operand routing of the register read/write instructions
/// (class 1, opcode >= 5)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegOpKind {
    /// SFBR op data8 -> register
    FromSfbr,
    /// register op data8 -> SFBR
    ToSfbr,
    /// register op (data8|SFBR) -> register
    ReadModifyWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum AluOp {
    Move = 0,
    ShiftLeft = 1,
    Or = 2,
    Xor = 3,
    And = 4,
    ShiftRight = 5,
    Add = 6,
    AddWithCarry = 7,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Jump,
    Call,
    Return,
    /// `on_the_fly` raises ISTAT.INTF instead of a DMA interrupt
    Interrupt { on_the_fly: bool },
    /// Reserved opcodes 4..=7
    Illegal,
}

/// Condition expression of a Transfer Control instruction.
///
/// Evaluation starts from the jump/no-jump polarity and ANDs in each
/// enabled comparison; a failed comparison short-circuits the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Condition {
    /// True = branch when the expression holds, false = when it does not
    pub jump_if: bool,
    pub test_carry: bool,
    pub test_phase: bool,
    /// Phase to compare against (bits 26:24)
    pub phase: u8,
    pub test_data: bool,
    /// Comparison mask: complement of bits 15:8
    pub mask: u8,
    /// Comparison data: bits 7:0
    pub data: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    /// Class 0: move `count` bytes in the given phase
    BlockMove {
        phase: u8,
        count: u32,
        addressing: BlockAddressing,
    },
    /// Class 1, opcodes 0-4: Select/Disconnect/Wait Reselect/Set/Clear.
    ///
    /// `table_indirect` sources the target id from a DSA-relative table
    /// entry (offset = sign-extended low 24 bits), `alt_relative` makes the
    /// operand word a DSP-relative alternate address.
    Io {
        op: IoOp,
        id: u8,
        table_indirect: bool,
        table_offset: i32,
        alt_relative: bool,
        select_atn: bool,
    },
    /// Class 1, opcodes 5-7: register ALU micro-operation
    RegisterOp {
        kind: RegOpKind,
        op: AluOp,
        reg: u8,
        data: u8,
        /// Second operand is SFBR instead of the immediate (RMW only)
        use_sfbr: bool,
    },
    /// Class 2 with none of the function bits set
    Nop,
    /// Class 2: conditional Jump/Call/Return/Interrupt
    TransferControl {
        kind: TransferKind,
        cond: Condition,
        relative: bool,
    },
    /// Class 3, bit 29 clear: guest-to-guest copy; the destination address
    /// is a third instruction word fetched at execution time
    MemoryMove { count: u32 },
    /// Class 3, bit 29 set: load/store `count` registers from/to memory
    RegisterMove {
        load: bool,
        reg: u8,
        count: u8,
        dsa_relative: bool,
    },
}

impl Instruction {
    pub fn decode(insn: u32) -> Self {
        match insn >> 30 {
            0 => Self::decode_block_move(insn),
            1 => Self::decode_io(insn),
            2 => Self::decode_transfer_control(insn),
            3 => Self::decode_memory_move(insn),
            _ => unreachable!(),
        }
    }

    fn decode_block_move(insn: u32) -> Self {
        let addressing = if insn & (1 << 29) != 0 {
            BlockAddressing::Indirect
        } else if insn & (1 << 28) != 0 {
            BlockAddressing::TableIndirect
        } else {
            BlockAddressing::Direct
        };
        Self::BlockMove {
            phase: ((insn >> 24) & 7) as u8,
            count: insn & 0x00FF_FFFF,
            addressing,
        }
    }

    fn decode_io(insn: u32) -> Self {
        let opcode = (insn >> 27) & 7;
        if opcode >= 5 {
            let kind = match opcode {
                5 => RegOpKind::FromSfbr,
                6 => RegOpKind::ToSfbr,
                7 => RegOpKind::ReadModifyWrite,
                _ => unreachable!(),
            };
            return Self::RegisterOp {
                kind,
                op: AluOp::from_u32((insn >> 24) & 7).unwrap(),
                reg: (((insn >> 16) & 0x7F) | (insn & 0x80)) as u8,
                data: ((insn >> 8) & 0xFF) as u8,
                use_sfbr: insn & (1 << 23) != 0,
            };
        }

        let flags = SignalBits {
            atn: insn & (1 << 3) != 0,
            ack: insn & (1 << 6) != 0,
            target_mode: insn & (1 << 9) != 0,
            carry: insn & (1 << 10) != 0,
        };
        let op = match opcode {
            0 => IoOp::Select,
            1 => IoOp::WaitDisconnect,
            2 => IoOp::WaitReselect,
            3 => IoOp::Set(flags),
            4 => IoOp::Clear(flags),
            _ => unreachable!(),
        };
        Self::Io {
            op,
            id: ((insn >> 16) & 0xF) as u8,
            table_indirect: insn & (1 << 25) != 0,
            table_offset: sext24(insn),
            alt_relative: insn & (1 << 26) != 0,
            select_atn: insn & (1 << 24) != 0,
        }
    }

    fn decode_transfer_control(insn: u32) -> Self {
        if insn & 0x002E_0000 == 0 {
            return Self::Nop;
        }
        let kind = match (insn >> 27) & 7 {
            0 => TransferKind::Jump,
            1 => TransferKind::Call,
            2 => TransferKind::Return,
            3 => TransferKind::Interrupt {
                on_the_fly: insn & (1 << 20) != 0,
            },
            _ => TransferKind::Illegal,
        };
        Self::TransferControl {
            kind,
            cond: Condition {
                jump_if: insn & (1 << 19) != 0,
                test_carry: insn & (1 << 21) != 0,
                test_phase: insn & (1 << 17) != 0,
                phase: ((insn >> 24) & 7) as u8,
                test_data: insn & (1 << 18) != 0,
                mask: ((!insn >> 8) & 0xFF) as u8,
                data: (insn & 0xFF) as u8,
            },
            relative: insn & (1 << 23) != 0,
        }
    }

    fn decode_memory_move(insn: u32) -> Self {
        if insn & (1 << 29) == 0 {
            Self::MemoryMove {
                count: insn & 0x00FF_FFFF,
            }
        } else {
            Self::RegisterMove {
                load: insn & (1 << 24) != 0,
                reg: ((insn >> 16) & 0xFF) as u8,
                count: (insn & 7) as u8,
                dsa_relative: insn & (1 << 28) != 0,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sext24_values() {
        assert_eq!(sext24(0x0000_0010), 0x10);
        assert_eq!(sext24(0x00FF_FFF8), -8);
        assert_eq!(sext24(0xAB7F_FFFF), 0x007F_FFFF);
        assert_eq!(sext24(0xAB80_0000), -0x0080_0000);
    }

    #[test]
    fn decode_block_move() {
        // Data In, 512 bytes, direct
        assert_eq!(
            Instruction::decode(0x0100_0200),
            Instruction::BlockMove {
                phase: 1,
                count: 512,
                addressing: BlockAddressing::Direct,
            }
        );
        // Command phase, indirect
        assert_eq!(
            Instruction::decode(0x2200_000C),
            Instruction::BlockMove {
                phase: 2,
                count: 12,
                addressing: BlockAddressing::Indirect,
            }
        );
        // Status, table indirect
        assert_eq!(
            Instruction::decode(0x1300_0001),
            Instruction::BlockMove {
                phase: 3,
                count: 1,
                addressing: BlockAddressing::TableIndirect,
            }
        );
    }

    #[test]
    fn decode_select() {
        // Select with ATN, id 2
        let Instruction::Io {
            op,
            id,
            table_indirect,
            select_atn,
            ..
        } = Instruction::decode(0x4102_0000)
        else {
            panic!("wrong class");
        };
        assert_eq!(op, IoOp::Select);
        assert_eq!(id, 2);
        assert!(!table_indirect);
        assert!(select_atn);

        // Table-indirect select, negative offset
        let Instruction::Io {
            table_indirect,
            table_offset,
            ..
        } = Instruction::decode(0x4200_0000 | 0x00FF_FFF0)
        else {
            panic!("wrong class");
        };
        assert!(table_indirect);
        assert_eq!(table_offset, -16);
    }

    #[test]
    fn decode_set_clear() {
        // Set carry + ATN
        let Instruction::Io { op, .. } = Instruction::decode(0x5800_0408) else {
            panic!("wrong class");
        };
        assert_eq!(
            op,
            IoOp::Set(SignalBits {
                atn: true,
                ack: false,
                target_mode: false,
                carry: true,
            })
        );

        // Clear ACK
        let Instruction::Io { op, .. } = Instruction::decode(0x6000_0040) else {
            panic!("wrong class");
        };
        assert_eq!(
            op,
            IoOp::Clear(SignalBits {
                atn: false,
                ack: true,
                target_mode: false,
                carry: false,
            })
        );
    }

    #[test]
    fn decode_register_op() {
        // Move 0x55 to SFBR (opcode 6, operator 0)
        assert_eq!(
            Instruction::decode(0x7000_5500 | (0x34 << 16)),
            Instruction::RegisterOp {
                kind: RegOpKind::ToSfbr,
                op: AluOp::Move,
                reg: 0x34,
                data: 0x55,
                use_sfbr: false,
            }
        );
        // RMW ADD register 0x0A with SFBR (bit 23)
        assert_eq!(
            Instruction::decode(0x7E80_0000 | (0x0A << 16)),
            Instruction::RegisterOp {
                kind: RegOpKind::ReadModifyWrite,
                op: AluOp::Add,
                reg: 0x0A,
                data: 0,
                use_sfbr: true,
            }
        );
        // High register bank bit (insn bit 7) folds into the register number
        let Instruction::RegisterOp { reg, .. } = Instruction::decode(0x7000_0080 | (0x1C << 16))
        else {
            panic!("wrong class");
        };
        assert_eq!(reg, 0x9C);
    }

    #[test]
    fn decode_transfer_control() {
        // NOP: no function bits
        assert_eq!(Instruction::decode(0x8000_0000), Instruction::Nop);

        // Jump if phase == Message In
        let Instruction::TransferControl { kind, cond, relative } =
            Instruction::decode(0x870A_0000)
        else {
            panic!("wrong class");
        };
        assert_eq!(kind, TransferKind::Jump);
        assert!(!relative);
        assert!(cond.jump_if);
        assert!(cond.test_phase);
        assert_eq!(cond.phase, 7);

        // Data compare: mask is the complement of bits 15:8
        let Instruction::TransferControl { cond, .. } = Instruction::decode(0x804C_0F81) else {
            panic!("wrong class");
        };
        assert!(cond.test_data);
        assert_eq!(cond.mask, 0xF0);
        assert_eq!(cond.data, 0x81);

        // Reserved opcode
        let Instruction::TransferControl { kind, .. } = Instruction::decode(0xA00A_0000) else {
            panic!("wrong class");
        };
        assert_eq!(kind, TransferKind::Illegal);
    }

    #[test]
    fn decode_memory_move() {
        assert_eq!(
            Instruction::decode(0xC000_0100),
            Instruction::MemoryMove { count: 0x100 }
        );
        // Store SCRATCHA (0x34..0x37) to a DSA-relative address
        assert_eq!(
            Instruction::decode(0xF034_0004),
            Instruction::RegisterMove {
                load: false,
                reg: 0x34,
                count: 4,
                dsa_relative: true,
            }
        );
        // Load with bit 24
        assert_eq!(
            Instruction::decode(0xE110_0002),
            Instruction::RegisterMove {
                load: true,
                reg: 0x10,
                count: 2,
                dsa_relative: false,
            }
        );
    }
}
