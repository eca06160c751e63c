//! Symbios 53C810 PCI SCSI host adapter
//!
//! The chip executes SCRIPTS microprograms fetched from guest memory by
//! bus-master DMA; the on-chip processor walks the SCSI bus phases and
//! moves data without host CPU involvement. Register accesses from the
//! guest and SCRIPTS execution never overlap: the processor only advances
//! inside [`Sym53c810::step`], driven by the host scheduler.

use anyhow::{Result, bail};
use arrayvec::ArrayVec;
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

use crate::bus::{Address, GuestBus};
use crate::dbgprop_bool;
use crate::debuggable::Debuggable;
use crate::scsi::dma;
use crate::scsi::instruction::{
    AluOp, BlockAddressing, Condition, Instruction, IoOp, RegOpKind, TransferKind, sext24,
};
use crate::scsi::regs::{Dstat, RegisterFile, SCID_RRE, Sist0, Sist1, reg_lane, set_reg_lane};
use crate::scsi::target::{ScsiTarget, TargetPhase};
use crate::scsi::{
    EXTMSG_PPR, EXTMSG_SDTR, EXTMSG_WDTR, MAX_MSGIN_LEN, MSG_ABORT, MSG_ABORT_TAG,
    MSG_BUS_DEVICE_RESET, MSG_CLEAR_QUEUE, MSG_COMMAND_COMPLETE, MSG_DISCONNECT, MSG_EXTENDED,
    MSG_HEAD_QUEUE, MSG_MESSAGE_REJECT, MSG_NOP, MSG_ORDERED_QUEUE, MSG_SIMPLE_QUEUE, ScsiPhase,
};
use crate::tickable::{Tickable, Ticks};

const SCSI_TRACE: bool = false;

/// Instruction budget for one scheduler invocation of the SCRIPTS processor
const INSN_BUDGET: usize = 10_000;

/// Maximum CDB length fetched during the Command phase
const MAX_CDB_LEN: usize = 12;

/// Number of selectable target IDs on the narrow bus
const MAX_TARGETS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::IntoStaticStr, Serialize, Deserialize)]
/// SCRIPTS processor wait state
enum Waiting {
    /// Running (or stopped; see `sstop`)
    Running,
    /// A Wait Reselect instruction has been issued
    Reselect,
    /// Block-move DMA in flight inside the interpreter
    ScriptDma,
}

#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
/// Action to take once the MSG IN buffer has drained.
///
/// The data-phase actions are the target-initiated negotiation follow-ups;
/// no modeled target requests them, but the drain logic handles them.
enum MsgAction {
    Command,
    Disconnect,
    DataOut,
    DataIn,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
/// One SCSI command in flight on the bus
struct Request {
    target_id: u8,
    dma_len: u32,
    out: bool,
}

/// Symbios 53C810 SCSI controller
#[derive(Serialize, Deserialize)]
pub struct Sym53c810<TBus: GuestBus> {
    pub bus: TBus,
    pub regs: RegisterFile,

    /// ALU carry; persists across instructions until overwritten
    carry: bool,

    /// Latched SCSI status byte for the Status phase
    status: u8,

    /// Buffered MSG IN bytes
    msg: ArrayVec<u8, MAX_MSGIN_LEN>,
    msg_action: MsgAction,

    waiting: Waiting,

    /// SCRIPTS processor stopped
    sstop: bool,

    /// Command in flight; at most one (single initiator, untagged model)
    current: Option<Request>,

    /// Progress through the target's staged buffer
    buffer_pos: u32,
    temp_buf_len: i32,

    /// LUN latched from the last Identify message
    current_lun: u8,

    /// Previous level of the aggregate interrupt line
    last_level: bool,

    /// Attached targets
    #[serde(skip)]
    pub(crate) targets: [Option<Box<dyn ScsiTarget>>; MAX_TARGETS],
}

impl<TBus: GuestBus> Sym53c810<TBus> {
    pub const MAX_TARGETS: usize = MAX_TARGETS;

    pub fn new(bus: TBus) -> Self {
        Self {
            bus,
            regs: RegisterFile::new(),
            carry: false,
            status: 0,
            msg: ArrayVec::new(),
            msg_action: MsgAction::Command,
            waiting: Waiting::Running,
            sstop: true,
            current: None,
            buffer_pos: 0,
            temp_buf_len: 0,
            current_lun: 0,
            last_level: false,
            targets: Default::default(),
        }
    }

    /// Attaches a target device model at the given SCSI ID
    pub fn attach_target_at(
        &mut self,
        target: Box<dyn ScsiTarget>,
        scsi_id: usize,
    ) -> Result<()> {
        if scsi_id >= Self::MAX_TARGETS {
            bail!("SCSI ID out of range: {}", scsi_id);
        }
        self.targets[scsi_id] = Some(target);
        Ok(())
    }

    /// Detaches a target from the given SCSI ID
    pub fn detach_target(&mut self, scsi_id: usize) {
        self.targets[scsi_id] = None;
    }

    pub fn target_present(&self, scsi_id: usize) -> bool {
        self.targets.get(scsi_id).is_some_and(Option::is_some)
    }

    /// Current level of the interrupt line to the interrupt controller
    pub fn irq_asserted(&self) -> bool {
        self.last_level
    }

    /// True while the SCRIPTS processor is stopped; the host scheduler may
    /// skip ticking the device until a register write restarts it
    pub fn stopped(&self) -> bool {
        self.sstop
    }

    /// Chip soft reset (power-on, ISTAT.SRST)
    pub fn soft_reset(&mut self) {
        log::debug!("Chip reset");

        self.carry = false;
        self.status = 0;
        self.msg.clear();
        self.msg_action = MsgAction::Command;
        self.waiting = Waiting::Running;
        self.sstop = true;
        self.current = None;
        self.buffer_pos = 0;
        self.temp_buf_len = 0;
        self.current_lun = 0;
        self.regs.reset();

        for target in self.targets.iter_mut().flatten() {
            target.reset();
        }
    }

    /// Recomputes ISTAT summary bits and the interrupt line level after any
    /// change to an interrupt cause or mask.
    fn update_irq(&mut self) {
        let mut level = false;

        if self.regs.dstat.0 & 0x7F != 0 {
            if self.regs.dstat.0 & self.regs.dien & 0x7F != 0 {
                level = true;
            }
            self.regs.istat.set_dip(true);
        } else {
            self.regs.istat.set_dip(false);
        }

        if self.regs.sist0.0 != 0 || self.regs.sist1.0 != 0 {
            if (self.regs.sist0.0 & self.regs.sien0) != 0
                || (self.regs.sist1.0 & self.regs.sien1) != 0
            {
                level = true;
            }
            self.regs.istat.set_sip(true);
        } else {
            self.regs.istat.set_sip(false);
        }

        if self.regs.istat.intf() {
            level = true;
        }

        if level != self.last_level {
            log::debug!(
                "IRQ level {} dstat {:02X} sist {:02X}{:02X}",
                level,
                self.regs.dstat.0,
                self.regs.sist1.0,
                self.regs.sist0.0
            );
            self.last_level = level;
        }
    }

    /// Raises a SCSI interrupt, stopping SCRIPTS execution on fatal or
    /// unmasked causes. STO does not stop the processor here; execution
    /// continues and stops at the next instruction that touches the bus.
    fn script_scsi_interrupt(&mut self, stat0: Sist0, stat1: Sist1) {
        log::debug!(
            "SCSI interrupt {:02X}{:02X} prev {:02X}{:02X}",
            stat1.0,
            stat0.0,
            self.regs.sist1.0,
            self.regs.sist0.0
        );
        self.regs.sist0.0 |= stat0.0;
        self.regs.sist1.0 |= stat1.0;

        let mask0 =
            self.regs.sien0 | !(Sist0(0).with_cmp(true).with_sel(true).with_rsl(true).0);
        let mut mask1 = self.regs.sien1 | !(Sist1(0).with_gen_timer(true).with_hth(true).0);
        mask1 &= !Sist1(0).with_sto(true).0;
        if (self.regs.sist0.0 & mask0) != 0 || (self.regs.sist1.0 & mask1) != 0 {
            self.sstop = true;
        }
        self.update_irq();
    }

    /// Raises a DMA interrupt and stops SCRIPTS execution
    fn script_dma_interrupt(&mut self, stat: Dstat) {
        log::debug!("DMA interrupt {:02X} prev {:02X}", stat.0, self.regs.dstat.0);
        self.regs.dstat.0 |= stat.0;
        self.update_irq();
        self.sstop = true;
    }

    fn set_phase(&mut self, phase: ScsiPhase) {
        if SCSI_TRACE {
            log::debug!("Bus phase: {:?}", phase);
        }
        self.regs.set_phase_bits(phase as u8);
    }

    /// Triggers a phase mismatch interrupt
    fn bad_phase(&mut self, new_phase: ScsiPhase) {
        log::debug!("Phase mismatch interrupt");
        self.script_scsi_interrupt(Sist0(0).with_ma(true), Sist1(0));
        self.sstop = true;
        self.set_phase(new_phase);
    }

    /// Releases the bus. A selection that asserted ATN leaves the phase
    /// bits at Message In.
    fn disconnect(&mut self) {
        self.regs.scntl1.set_con(false);
        self.regs.set_phase_bits(0);
        if self.regs.dcmd & 0x01 != 0 {
            self.regs.set_phase_bits(ScsiPhase::MessageIn as u8);
        }
        self.current = None;
        self.current_lun = 0;
    }

    fn bad_selection(&mut self, id: u8) {
        log::debug!("Selected absent target {}", id);
        self.script_scsi_interrupt(Sist0(0), Sist1(0).with_sto(true));
        self.disconnect();
    }

    fn irq_on_rsl(&self) -> bool {
        (self.regs.sien0 & Sist0(0).with_rsl(true).0) != 0 && (self.regs.scid & SCID_RRE) != 0
    }

    /// The SCSI layer completed a command: latch status and move to the
    /// Status phase. A short transfer (residual `dbc` while a block-move
    /// DMA is in flight) raises a phase mismatch instead.
    fn command_complete(&mut self, status: u8) {
        log::debug!(
            "Command complete status={} dbc={}",
            status,
            self.regs.dbc
        );
        self.status = status;
        if self.waiting != Waiting::Running && self.regs.dbc != 0 {
            self.bad_phase(ScsiPhase::Status);
        } else {
            self.set_phase(ScsiPhase::Status);
        }
        self.current = None;
        self.waiting = Waiting::Running;
    }

    /// Moves bytes of the current block-move between guest and the
    /// target's staged buffer; completes the command once the buffer is
    /// exhausted.
    fn do_dma(&mut self, out: bool, id: u8) {
        if !self.target_present(id as usize) {
            log::debug!("DMA to disconnected target {}", id);
            return;
        }
        let Some(req) = self.current.as_ref() else {
            return;
        };
        if req.dma_len == 0 {
            // Wait until data is available
            log::debug!("DMA no data available");
            return;
        }
        let (req_id, req_out) = (req.target_id, req.out);

        let count = self.regs.dbc.min(self.temp_buf_len.max(0) as u32);
        let addr = self.regs.dnad;

        if SCSI_TRACE {
            log::debug!(
                "(ID={:02} out={}) DMA addr={:08X} len={} cur_len={} dbc={}",
                req_id,
                req_out,
                addr,
                self.temp_buf_len,
                count,
                self.regs.dbc
            );
        }
        self.regs.dnad = self.regs.dnad.wrapping_add(count);
        self.regs.dbc = self.regs.dbc.saturating_sub(count);

        let pos = self.buffer_pos as usize;
        let siom = self.regs.dmode.siom();
        let diom = self.regs.dmode.diom();
        let target = self.targets[id as usize].as_mut().unwrap();
        if out {
            dma::guest_fetch(
                &mut self.bus,
                siom,
                addr,
                &mut target.buffer()[pos..pos + count as usize],
            );
        } else {
            dma::guest_store(
                &mut self.bus,
                diom,
                addr,
                &target.buffer()[pos..pos + count as usize],
            );
        }

        self.temp_buf_len -= count as i32;
        self.buffer_pos += count;

        if self.temp_buf_len <= 0 {
            target.command_phase1();
            let status = target.status();
            self.command_complete(status);
        }
    }

    /// Command phase: fetch the CDB, hand it to the target and branch on
    /// the phase the target declares. Returns true when a data phase was
    /// entered.
    fn do_command(&mut self, id: u8) -> bool {
        let mut cdb = [0u8; MAX_CDB_LEN];
        let len = self.regs.dbc.min(MAX_CDB_LEN as u32) as usize;
        self.bus.mem_read(self.regs.dnad, &mut cdb[..len]);
        if self.regs.dbc > MAX_CDB_LEN as u32 {
            log::debug!("CDB length {} too big", self.regs.dbc);
            self.regs.dbc = MAX_CDB_LEN as u32;
        }
        self.regs.sfbr = cdb[0];

        if !self.target_present(id as usize) || self.current_lun > 0 {
            self.bad_selection(id);
            return false;
        }

        // Make sure bits 5-7 of the CDB have the selected LUN
        if (cdb[1] & 0xE0) != (self.current_lun << 5) {
            cdb[1] = (cdb[1] & 0x1F) | (self.current_lun << 5);
        }

        log::debug!("(ID={:02}) SCSI command {:02X?}", id, &cdb[..len]);

        let target = self.targets[id as usize].as_mut().unwrap();
        target.command_phase0(&cdb);
        let buffer_length = target.buffer_length();
        let phase = target.transfer_phase();
        let status = target.status();

        self.waiting = Waiting::Running;
        self.buffer_pos = 0;
        self.temp_buf_len = buffer_length;
        self.current = Some(Request {
            target_id: id,
            dma_len: buffer_length.max(0) as u32,
            out: phase == TargetPhase::DataOut,
        });

        match phase {
            TargetPhase::DataIn if buffer_length > 0 => {
                self.set_phase(ScsiPhase::DataIn);
                true
            }
            TargetPhase::DataOut if buffer_length > 0 => {
                self.set_phase(ScsiPhase::DataOut);
                true
            }
            _ => {
                self.command_complete(status);
                false
            }
        }
    }

    /// Status phase: write the status byte and queue COMMAND COMPLETE
    fn do_status(&mut self) {
        log::debug!("Get status len={} status={}", self.regs.dbc, self.status);
        if self.regs.dbc != 1 {
            log::warn!("Bad Status move");
        }
        self.regs.dbc = 1;
        let status = self.status;
        self.regs.sfbr = status;
        let diom = self.regs.dmode.diom();
        dma::guest_store(&mut self.bus, diom, self.regs.dnad, &[status]);
        self.set_phase(ScsiPhase::MessageIn);
        self.msg_action = MsgAction::Disconnect;
        self.add_msg_byte(MSG_COMMAND_COMPLETE);
    }

    /// Queues a byte for a MSG IN phase
    fn add_msg_byte(&mut self, data: u8) {
        if self.msg.try_push(data).is_err() {
            log::debug!("MSG IN data too long");
        } else {
            log::debug!("MSG IN {:02X}", data);
        }
    }

    fn do_msgin(&mut self) {
        log::debug!("Message in len={}/{}", self.regs.dbc, self.msg.len());
        let Some(&first) = self.msg.first() else {
            log::warn!("MSG IN with empty message buffer");
            return;
        };
        self.regs.sfbr = first;
        let len = self.msg.len().min(self.regs.dbc as usize);
        if len == 0 {
            return;
        }
        let diom = self.regs.dmode.diom();
        let bytes: ArrayVec<u8, MAX_MSGIN_LEN> = self.msg.drain(..len).collect();
        dma::guest_store(&mut self.bus, diom, self.regs.dnad, &bytes);
        // Linux drivers rely on the last byte being in the SIDL
        self.regs.sidl0 = bytes[len - 1];

        if self.msg.is_empty() {
            match self.msg_action {
                MsgAction::Command => self.set_phase(ScsiPhase::Command),
                MsgAction::Disconnect => self.disconnect(),
                MsgAction::DataOut => self.set_phase(ScsiPhase::DataOut),
                MsgAction::DataIn => self.set_phase(ScsiPhase::DataIn),
            }
        }
    }

    /// Reads the next byte during a MSG OUT phase
    fn get_msgbyte(&mut self) -> u8 {
        let mut data = [0u8; 1];
        self.bus.mem_read(self.regs.dnad, &mut data);
        self.regs.dnad = self.regs.dnad.wrapping_add(1);
        self.regs.dbc = self.regs.dbc.saturating_sub(1);
        data[0]
    }

    /// Skips the next n bytes during a MSG OUT phase
    fn skip_msgbytes(&mut self, n: u32) {
        self.regs.dnad = self.regs.dnad.wrapping_add(n);
        self.regs.dbc = self.regs.dbc.saturating_sub(n);
    }

    /// Rejects an unsupported message
    fn bad_message(&mut self, msg: u8) {
        log::debug!("Unimplemented message {:02X}", msg);
        self.set_phase(ScsiPhase::MessageIn);
        self.add_msg_byte(MSG_MESSAGE_REJECT);
        self.msg_action = MsgAction::Command;
    }

    fn do_msgout(&mut self, id: u8) {
        log::debug!("MSG out len={}", self.regs.dbc);
        while self.regs.dbc > 0 {
            let msg = self.get_msgbyte();
            self.regs.sfbr = msg;

            match msg {
                MSG_DISCONNECT => {
                    log::debug!("MSG: Disconnect");
                    self.disconnect();
                }
                MSG_NOP => {
                    log::debug!("MSG: No Operation");
                    self.set_phase(ScsiPhase::Command);
                }
                MSG_EXTENDED => {
                    let len = self.get_msgbyte();
                    let ext = self.get_msgbyte();
                    let arg = self.get_msgbyte();
                    log::debug!("Extended message {:02X} (len {})", ext, len);
                    match ext {
                        EXTMSG_SDTR => {
                            log::debug!("SDTR (ignored)");
                            self.skip_msgbytes(1);
                        }
                        EXTMSG_WDTR => {
                            log::debug!("WDTR (ignored)");
                            if arg > 0x01 {
                                self.bad_message(ext);
                                return;
                            }
                            self.set_phase(ScsiPhase::Command);
                        }
                        EXTMSG_PPR => {
                            log::debug!("PPR (ignored)");
                            self.skip_msgbytes(4);
                        }
                        _ => {
                            self.bad_message(ext);
                            return;
                        }
                    }
                }
                MSG_SIMPLE_QUEUE | MSG_HEAD_QUEUE | MSG_ORDERED_QUEUE => {
                    // Tagged queueing is not modeled beyond consuming the tag
                    let tag = self.get_msgbyte();
                    log::debug!("Queue tag {:02X} (untagged model)", tag);
                }
                MSG_ABORT_TAG | MSG_ABORT | MSG_CLEAR_QUEUE | MSG_BUS_DEVICE_RESET => {
                    log::debug!("MSG: Abort/Reset {:02X}", msg);
                    if let Some(target) = self.targets.get_mut(id as usize).and_then(Option::as_mut)
                    {
                        if msg == MSG_BUS_DEVICE_RESET {
                            target.reset();
                        } else {
                            target.stop_command();
                        }
                    }
                    self.disconnect();
                }
                _ if msg & 0x80 != 0 => {
                    // 0x80 to 0xFF are IDENTIFY messages
                    self.current_lun = msg & 7;
                    log::debug!("MSG: Identify, select LUN {}", self.current_lun);
                    self.set_phase(ScsiPhase::Command);
                }
                _ => {
                    self.bad_message(msg);
                    return;
                }
            }
        }
    }

    /// DFIFO/CTEST5 mirror the low bits of DBC after a block move
    fn update_dfifo(&mut self) {
        self.regs.dfifo = (self.regs.dbc & 0xFF) as u8;
        self.regs.ctest5 = (self.regs.ctest5 & 0xFC) | (((self.regs.dbc >> 8) & 3) as u8);
    }

    /// Marks the SCRIPTS processor runnable; execution happens on the next
    /// scheduler tick.
    fn execute_script(&mut self) {
        self.sstop = false;
    }

    /// Evaluates a Transfer Control condition expression
    fn eval_cond(&self, cond: &Condition) -> bool {
        let jmp = cond.jump_if;
        let mut c = jmp;
        if c == jmp && cond.test_carry {
            c = self.carry;
        }
        if c == jmp && cond.test_phase {
            if SCSI_TRACE {
                log::debug!(
                    "Compare phase {} {}= {}",
                    self.regs.phase_bits(),
                    if jmp { '=' } else { '!' },
                    cond.phase
                );
            }
            c = self.regs.phase_bits() == cond.phase;
        }
        if c == jmp && cond.test_data {
            if SCSI_TRACE {
                log::debug!(
                    "Compare data {:02X} & {:02X} {}= {:02X}",
                    self.regs.sfbr,
                    cond.mask,
                    if jmp { '=' } else { '!' },
                    cond.data & cond.mask
                );
            }
            c = (self.regs.sfbr & cond.mask) == (cond.data & cond.mask);
        }
        c == jmp
    }

    /// Register read-modify-write micro-operation (class 1, opcodes 5-7)
    fn execute_register_op(
        &mut self,
        kind: RegOpKind,
        op: AluOp,
        reg: u32,
        data: u8,
        use_sfbr: bool,
    ) {
        let (mut op0, op1) = match kind {
            RegOpKind::FromSfbr => (self.regs.sfbr, data),
            RegOpKind::ToSfbr => {
                let op0 = if op == AluOp::Move {
                    0
                } else {
                    self.read_register(reg)
                };
                (op0, data)
            }
            RegOpKind::ReadModifyWrite => {
                let op0 = if op == AluOp::Move {
                    0
                } else {
                    self.read_register(reg)
                };
                (op0, if use_sfbr { self.regs.sfbr } else { data })
            }
        };

        match op {
            AluOp::Move => op0 = op1,
            AluOp::ShiftLeft => {
                let msb = op0 >> 7;
                op0 = (op0 << 1) | u8::from(self.carry);
                self.carry = msb != 0;
            }
            AluOp::Or => op0 |= op1,
            AluOp::Xor => op0 ^= op1,
            AluOp::And => op0 &= op1,
            AluOp::ShiftRight => {
                let lsb = op0 & 1;
                op0 = (op0 >> 1) | (u8::from(self.carry) << 7);
                self.carry = lsb != 0;
            }
            AluOp::Add => {
                op0 = op0.wrapping_add(op1);
                self.carry = op0 < op1;
            }
            AluOp::AddWithCarry => {
                let carry_in = self.carry;
                op0 = op0.wrapping_add(op1).wrapping_add(u8::from(carry_in));
                self.carry = if carry_in { op0 <= op1 } else { op0 < op1 };
            }
        }

        match kind {
            RegOpKind::FromSfbr | RegOpKind::ReadModifyWrite => self.write_register(reg, op0),
            RegOpKind::ToSfbr => self.regs.sfbr = op0,
        }
    }

    /// Executes one decoded instruction. Returns true when the interpreter
    /// must yield to the scheduler (Command phase entered a data phase).
    fn execute_insn(&mut self, insn: Instruction, operand: u32) -> bool {
        match insn {
            Instruction::BlockMove {
                phase,
                count,
                addressing,
            } => {
                if self.regs.sist1.sto() {
                    log::debug!("Delayed select timeout");
                    self.sstop = true;
                    return false;
                }
                self.regs.dbc = count;
                let mut addr = operand;
                match addressing {
                    BlockAddressing::Direct => (),
                    BlockAddressing::Indirect => {
                        addr = self.bus.mem_read_dword(addr);
                    }
                    BlockAddressing::TableIndirect => {
                        // Table entry: 24-bit count, reserved byte, address
                        let offset = sext24(operand);
                        let entry = self.regs.dsa.wrapping_add(offset as u32);
                        let mut buf = [0u8; 8];
                        self.bus.mem_read(entry, &mut buf);
                        self.regs.dbc =
                            u32::from_le_bytes(buf[0..4].try_into().unwrap()) & 0x00FF_FFFF;
                        addr = u32::from_le_bytes(buf[4..8].try_into().unwrap());
                    }
                }
                if self.regs.phase_bits() != phase {
                    log::debug!(
                        "Wrong phase got {} expected {}",
                        self.regs.phase_bits(),
                        phase
                    );
                    self.script_scsi_interrupt(Sist0(0).with_ma(true), Sist1(0));
                    return false;
                }
                self.regs.dnad = addr;
                let sdid = self.regs.sdid;
                match ScsiPhase::from_u8(self.regs.phase_bits()) {
                    Some(ScsiPhase::DataOut) => {
                        self.waiting = Waiting::ScriptDma;
                        self.do_dma(true, sdid);
                        if self.waiting == Waiting::ScriptDma {
                            self.waiting = Waiting::Running;
                        }
                    }
                    Some(ScsiPhase::DataIn) => {
                        self.waiting = Waiting::ScriptDma;
                        self.do_dma(false, sdid);
                        if self.waiting == Waiting::ScriptDma {
                            self.waiting = Waiting::Running;
                        }
                    }
                    Some(ScsiPhase::Command) => {
                        let entered_data = self.do_command(sdid);
                        if entered_data
                            && !self.sstop
                            && self.waiting == Waiting::Running
                            && self.regs.phase_bits() != ScsiPhase::Status as u8
                        {
                            self.update_dfifo();
                            if self.regs.dcntl.ssm() {
                                log::debug!("SCRIPTS: single-step mode");
                                self.script_dma_interrupt(Dstat(0).with_ssi(true));
                            }
                            // Yield; the data/status sequence continues on
                            // the following instructions
                            return true;
                        }
                    }
                    Some(ScsiPhase::Status) => self.do_status(),
                    Some(ScsiPhase::MessageOut) => self.do_msgout(sdid),
                    Some(ScsiPhase::MessageIn) => self.do_msgin(),
                    None => log::debug!("Unimplemented phase {}", self.regs.phase_bits()),
                }
                self.update_dfifo();
                false
            }
            Instruction::Io {
                op,
                id,
                table_indirect,
                table_offset,
                alt_relative,
                select_atn,
            } => {
                let id = if table_indirect {
                    let entry = self
                        .bus
                        .mem_read_dword(self.regs.dsa.wrapping_add(table_offset as u32));
                    ((entry >> 16) & 0xF) as u8
                } else {
                    id
                };
                let mut addr = operand;
                if alt_relative {
                    addr = self.regs.dsp.wrapping_add(sext24(operand) as u32);
                }
                self.regs.dnad = addr;

                match op {
                    IoOp::Select => {
                        self.regs.sdid = id;
                        if self.regs.scntl1.con() {
                            log::debug!("Already reselected, jumping to alternative address");
                            self.regs.dsp = self.regs.dnad;
                            return false;
                        }
                        self.regs.sstat0.set_woa(true);
                        self.regs.scntl1.set_iarb(false);
                        if !self.target_present(id as usize) {
                            self.bad_selection(id);
                            return false;
                        }
                        log::debug!(
                            "Selected target {}{}",
                            id,
                            if select_atn { " ATN" } else { "" }
                        );
                        self.regs.scntl1.set_con(true);
                        if select_atn {
                            self.regs.socl.set_atn(true);
                        }
                        self.set_phase(ScsiPhase::MessageOut);
                        self.waiting = Waiting::Running;
                    }
                    IoOp::WaitDisconnect => {
                        log::debug!("Wait Disconnect");
                        self.regs.scntl1.set_con(false);
                    }
                    IoOp::WaitReselect => {
                        log::debug!("Wait Reselect");
                        if self.regs.istat.sigp() {
                            // SIGP pending causes an immediate jump to DNAD
                            self.regs.dsp = self.regs.dnad;
                        } else if !self.irq_on_rsl() {
                            self.waiting = Waiting::Reselect;
                        }
                    }
                    IoOp::Set(flags) => {
                        if flags.atn {
                            self.regs.socl.set_atn(true);
                            self.set_phase(ScsiPhase::MessageOut);
                        }
                        if flags.target_mode {
                            log::debug!("Target mode not implemented");
                        }
                        if flags.carry {
                            self.carry = true;
                        }
                    }
                    IoOp::Clear(flags) => {
                        if flags.atn {
                            self.regs.socl.set_atn(false);
                        }
                        if flags.carry {
                            self.carry = false;
                        }
                    }
                }
                false
            }
            Instruction::RegisterOp {
                kind,
                op,
                reg,
                data,
                use_sfbr,
            } => {
                self.execute_register_op(kind, op, u32::from(reg), data, use_sfbr);
                false
            }
            Instruction::Nop => false,
            Instruction::TransferControl {
                kind,
                cond,
                relative,
            } => {
                if self.regs.sist1.sto() {
                    log::debug!("Delayed select timeout");
                    self.sstop = true;
                    return false;
                }
                if !self.eval_cond(&cond) {
                    if SCSI_TRACE {
                        log::debug!("Control condition failed");
                    }
                    return false;
                }
                let mut addr = operand;
                if relative {
                    addr = self.regs.dsp.wrapping_add(sext24(operand) as u32);
                }
                match kind {
                    TransferKind::Jump => {
                        log::debug!("Jump to {:08X}", addr);
                        self.regs.adder = addr;
                        self.regs.dsp = addr;
                    }
                    TransferKind::Call => {
                        log::debug!("Call {:08X}", addr);
                        self.regs.temp = self.regs.dsp;
                        self.regs.dsp = addr;
                    }
                    TransferKind::Return => {
                        log::debug!("Return to {:08X}", self.regs.temp);
                        self.regs.dsp = self.regs.temp;
                    }
                    TransferKind::Interrupt { on_the_fly } => {
                        log::debug!("Interrupt {:08X}", self.regs.dsps);
                        if on_the_fly {
                            self.regs.istat.set_intf(true);
                            self.update_irq();
                        } else {
                            self.script_dma_interrupt(Dstat(0).with_sir(true));
                        }
                    }
                    TransferKind::Illegal => {
                        log::debug!("Illegal transfer control");
                        self.script_dma_interrupt(Dstat(0).with_iid(true));
                    }
                }
                false
            }
            Instruction::MemoryMove { count } => {
                // The destination address is a third instruction word.
                // Drivers rely on TEMP being preserved across this.
                let dest = self.bus.mem_read_dword(self.regs.dsp);
                self.regs.dsp = self.regs.dsp.wrapping_add(4);
                let siom = self.regs.dmode.siom();
                let diom = self.regs.dmode.diom();
                dma::guest_copy(&mut self.bus, siom, diom, operand, dest, count);
                false
            }
            Instruction::RegisterMove {
                load,
                reg,
                count,
                dsa_relative,
            } => {
                let addr = if dsa_relative {
                    self.regs.dsa.wrapping_add(sext24(operand) as u32)
                } else {
                    operand
                };
                let n = usize::from(count);
                let mut data = [0u8; 7];
                if load {
                    self.bus.mem_read(addr, &mut data[..n]);
                    for (i, b) in data[..n].iter().enumerate() {
                        self.write_register(u32::from(reg) + i as u32, *b);
                    }
                } else {
                    log::debug!("Store reg {:02X} size {} addr {:08X}", reg, n, addr);
                    for (i, b) in data[..n].iter_mut().enumerate() {
                        *b = self.read_register(u32::from(reg) + i as u32);
                    }
                    self.bus.mem_write(addr, &data[..n]);
                }
                false
            }
        }
    }

    /// Runs the SCRIPTS processor until it stops, waits, yields or
    /// exhausts its per-invocation instruction budget.
    fn process_script(&mut self) {
        self.sstop = false;

        for _ in 0..INSN_BUDGET {
            let insn = self.bus.mem_read_dword(self.regs.dsp);
            if insn == 0 {
                // An empty opcode advances DSP by 4 instead of 8; some
                // firmware uses this as padding
                self.regs.dsp = self.regs.dsp.wrapping_add(4);
                continue;
            }
            let operand = self.bus.mem_read_dword(self.regs.dsp.wrapping_add(4));
            if SCSI_TRACE {
                log::debug!(
                    "SCRIPTS dsp={:08X} opcode {:08X} arg {:08X}",
                    self.regs.dsp,
                    insn,
                    operand
                );
            }
            self.regs.dsps = operand;
            self.regs.dcmd = (insn >> 24) as u8;
            self.regs.dsp = self.regs.dsp.wrapping_add(8);

            if self.execute_insn(Instruction::decode(insn), operand) {
                return;
            }
            if self.sstop || self.waiting != Waiting::Running {
                if SCSI_TRACE {
                    log::debug!(
                        "SCRIPTS: {}",
                        if self.sstop { "stopped" } else { "waiting" }
                    );
                }
                return;
            }
            if self.regs.dcntl.ssm() {
                log::debug!("SCRIPTS: single-step mode");
                self.script_dma_interrupt(Dstat(0).with_ssi(true));
                return;
            }
        }

        // Some drivers make the chip spin waiting for a memory location to
        // change. After this much execution, force an unexpected disconnect
        // to beat them into submission.
        if self.waiting == Waiting::Running {
            log::debug!("SCRIPTS instruction budget exhausted, forcing disconnect");
            if self.regs.sien0 & Sist0(0).with_udc(true).0 == 0 {
                log::debug!("Spinning with UDC masked");
            }
            self.script_scsi_interrupt(Sist0(0).with_udc(true), Sist1(0));
            self.disconnect();
        }
    }

    /// Scheduler entry point: advances the SCRIPTS processor if it is
    /// neither stopped nor waiting.
    pub fn step(&mut self) {
        if self.sstop {
            return;
        }
        if self.waiting != Waiting::Running {
            return;
        }
        self.process_script();
    }

    /// Reads one register byte. Side-effecting registers (DSTAT, SIST0/1,
    /// CTEST2) latch-clear here, matching the chip.
    pub fn read_register(&mut self, offset: u32) -> u8 {
        match offset {
            0x00 => self.regs.scntl0.0,
            0x01 => self.regs.scntl1.0,
            0x02 => self.regs.scntl2,
            0x03 => self.regs.scntl3,
            0x04 => self.regs.scid & !0x40,
            0x05 => self.regs.sxfer,
            0x06 => self.regs.sdid,
            0x07 => (self.regs.gpreg & (self.regs.gpcntl ^ 0x1F)) & 0x1F,
            // Revision ID
            0x08 => 0x00,
            0x0A => self.regs.ssid,
            // SBCL: bus control lines; MSG/CD/IO mirrored from SSTAT1
            0x0B => self.regs.sstat1 & 7,
            0x0C => {
                // DSTAT
                let val = self.regs.dstat.0 | Dstat(0).with_dfe(true).0;
                if !self.regs.istat.intf() {
                    self.regs.dstat.0 = 0;
                }
                self.update_irq();
                val
            }
            0x0D => self.regs.sstat0.0,
            0x0E => self.regs.sstat1,
            0x0F => {
                // SSTAT2: bus free when not connected
                if self.regs.scntl1.con() { 0 } else { 2 }
            }
            0x10..=0x13 => reg_lane(self.regs.dsa, offset - 0x10),
            0x14 => self.regs.istat.0,
            0x16 => self.regs.mbox0,
            0x17 => self.regs.mbox1,
            0x18 => 0xFF,
            // DMA FIFO empty
            0x19 => 0xF0,
            0x1A => {
                let mut val = self.regs.ctest2.with_dack(true).with_cm(true);
                if self.regs.istat.sigp() {
                    self.regs.istat.set_sigp(false);
                    val.set_sigp(true);
                }
                val.0
            }
            0x1B => (self.regs.ctest3 & 0x0B) | ((self.regs.chip_rev & 0x0F) << 4),
            0x1C..=0x1F => reg_lane(self.regs.temp, offset - 0x1C),
            0x20 => 0, // DFIFO
            0x21 => self.regs.ctest4,
            0x22 => self.regs.ctest5,
            0x23 => 0, // CTEST6
            0x24..=0x26 => reg_lane(self.regs.dbc, offset - 0x24),
            0x27 => self.regs.dcmd,
            0x28..=0x2B => reg_lane(self.regs.dnad, offset - 0x28),
            0x2C..=0x2F => reg_lane(self.regs.dsp, offset - 0x2C),
            0x30..=0x33 => reg_lane(self.regs.dsps, offset - 0x30),
            0x34..=0x37 => reg_lane(self.regs.scratcha, offset - 0x34),
            0x38 => self.regs.dmode.0,
            0x39 => self.regs.dien,
            0x3A => self.regs.sbr,
            0x3B => self.regs.dcntl.0,
            // ADDER output (relative jump address debug)
            0x3C..=0x3F => reg_lane(self.regs.adder, offset - 0x3C),
            0x40 => self.regs.sien0,
            0x41 => self.regs.sien1,
            0x42 => {
                let val = self.regs.sist0.0;
                self.regs.sist0.0 = 0;
                self.update_irq();
                val
            }
            0x43 => {
                let val = self.regs.sist1.0;
                self.regs.sist1.0 = 0;
                self.update_irq();
                val
            }
            // SLPAR/SWIDE: wide chips only
            0x44 | 0x45 => 0,
            0x46 => 0x4F, // MACNTL
            0x47 => self.regs.gpcntl,
            0x48 => self.regs.stime0,
            0x4A => self.regs.respid0,
            0x4B => 0, // RESPID1: wide chips only
            0x4C => 0, // STEST0
            0x4D => self.regs.stest1,
            0x4E => self.regs.stest2,
            0x4F => self.regs.stest3,
            0x50 => self.regs.sidl0,
            0x51 => 0, // SIDL1: wide chips only
            0x52 => 0xE0, // STEST4
            0x58 => {
                // SBDL: some drivers peek at the data bus during MSG IN
                if self.regs.phase_bits() == ScsiPhase::MessageIn as u8 {
                    self.msg.first().copied().unwrap_or(0)
                } else {
                    0
                }
            }
            0x59 => 0,
            0x5C..=0x5F => reg_lane(self.regs.scratchb, offset - 0x5C),
            _ => {
                log::debug!("Unhandled register read {:02X}", offset);
                0
            }
        }
    }

    /// Writes one register byte, applying the documented side effects
    pub fn write_register(&mut self, offset: u32, val: u8) {
        match offset {
            0x00 => {
                self.regs.scntl0.0 = val;
                if self.regs.scntl0.start() {
                    // Flagging arbitration-in-progress is enough to satisfy
                    // the SDMS BIOS
                    log::debug!("Start sequence, SCSI ID {}", self.regs.sdid);
                    self.regs.sstat0.set_aip(true);
                }
            }
            0x01 => {
                self.regs.scntl1.0 = val & !0x01;
                if val & 0x02 != 0 {
                    // Immediate arbitration: no reselecting targets exist
                    // in this model, so arbitration is always lost
                    log::debug!("Arbitration lost");
                    self.regs.sstat0.set_loa(true);
                    self.waiting = Waiting::Running;
                }
                if val & 0x08 != 0 {
                    if !self.regs.sstat0.rst() {
                        self.regs.sstat0.set_rst(true);
                        self.script_scsi_interrupt(Sist0(0).with_rst(true), Sist1(0));
                    }
                } else {
                    self.regs.sstat0.set_rst(false);
                }
            }
            0x02 => self.regs.scntl2 = val & !0x09,
            0x03 => self.regs.scntl3 = val,
            0x04 => self.regs.scid = val,
            0x05 => self.regs.sxfer = val,
            0x06 => {
                if (self.regs.ssid & 0x80) != 0 && (val & 0x0F) != (self.regs.ssid & 0x0F) {
                    log::debug!("Destination ID does not match SSID");
                }
                self.regs.sdid = val & 0x0F;
            }
            0x07 => self.regs.gpreg = val,
            0x08 => {
                // The CPU is not allowed to write here, but SCRIPTS
                // register moves are
                self.regs.sfbr = val;
            }
            0x09 => self.regs.socl.0 = val,
            // Openserver writes to these readonly registers on startup
            0x0A | 0x0B => (),
            // Linux writes to these readonly registers on startup
            0x0C..=0x0F => (),
            0x10..=0x13 => set_reg_lane(&mut self.regs.dsa, offset - 0x10, val),
            0x14 => {
                log::debug!("ISTAT write {:02X}", val);
                let prev = self.regs.istat;
                self.regs.istat.0 = (self.regs.istat.0 & 0x0F) | (val & 0xF0);
                if val & 0x80 != 0 && val & 0x40 == 0 {
                    self.script_dma_interrupt(Dstat(0).with_abrt(true));
                }
                if val & 0x04 != 0 {
                    self.regs.istat.set_intf(false);
                    self.update_irq();
                }
                if self.waiting == Waiting::Reselect && val & 0x20 != 0 {
                    log::debug!("Woken by SIGP");
                    self.waiting = Waiting::Running;
                    self.regs.dsp = self.regs.dnad;
                }
                if val & 0x40 != 0 && !prev.srst() {
                    self.soft_reset();
                    self.update_irq();
                    self.regs.istat.0 = 0;
                }
            }
            0x16 => self.regs.mbox0 = val,
            0x17 => self.regs.mbox1 = val,
            // CTEST0/CTEST1: nothing to do
            0x18 | 0x19 => (),
            0x1A => self.regs.ctest2.0 = val & 0x08,
            0x1B => self.regs.ctest3 = val & 0x0F,
            0x1C..=0x1F => set_reg_lane(&mut self.regs.temp, offset - 0x1C, val),
            0x21 => {
                if val & 7 != 0 {
                    log::debug!("Unimplemented CTEST4-FBL {:02X}", val);
                }
                self.regs.ctest4 = val;
            }
            0x22 => {
                if val & 0xC0 != 0 {
                    log::debug!("CTEST5 DMA increment not implemented");
                }
                self.regs.ctest5 = val;
            }
            0x24..=0x26 => set_reg_lane(&mut self.regs.dbc, offset - 0x24, val),
            0x28..=0x2B => set_reg_lane(&mut self.regs.dnad, offset - 0x28, val),
            0x2C..=0x2E => set_reg_lane(&mut self.regs.dsp, offset - 0x2C, val),
            0x2F => {
                set_reg_lane(&mut self.regs.dsp, 3, val);
                if !self.regs.dmode.man() && self.sstop {
                    self.execute_script();
                }
            }
            0x30..=0x33 => set_reg_lane(&mut self.regs.dsps, offset - 0x30, val),
            0x34..=0x37 => set_reg_lane(&mut self.regs.scratcha, offset - 0x34, val),
            0x38 => self.regs.dmode.0 = val,
            0x39 => {
                self.regs.dien = val;
                self.update_irq();
            }
            0x3A => self.regs.sbr = val,
            0x3B => {
                self.regs.dcntl.0 = val & !0x44;
                if val & 0x04 != 0 && self.sstop {
                    self.execute_script();
                }
            }
            0x40 => {
                self.regs.sien0 = val;
                self.update_irq();
            }
            0x41 => {
                self.regs.sien1 = val;
                self.update_irq();
            }
            0x47 => self.regs.gpcntl = val,
            0x48 => self.regs.stime0 = val,
            0x49 => {
                if val & 0x0F != 0 {
                    // Raising the interrupt immediately is sufficient to
                    // keep the FreeBSD driver happy
                    log::debug!("General purpose timer not implemented");
                    self.script_scsi_interrupt(Sist0(0), Sist1(0).with_gen_timer(true));
                }
            }
            0x4A => self.regs.respid0 = val,
            // RESPID1: wide chips only
            0x4B => (),
            0x4D => self.regs.stest1 = val,
            0x4E => {
                if val & 1 != 0 {
                    log::debug!("Low level mode not implemented");
                }
                self.regs.stest2 = val;
            }
            0x4F => {
                if val & 0x41 != 0 {
                    log::debug!("SCSI FIFO test mode not implemented");
                }
                self.regs.stest3 = val;
            }
            0x54 | 0x55 => (),
            0x5C..=0x5F => set_reg_lane(&mut self.regs.scratchb, offset - 0x5C, val),
            _ => {
                log::debug!("Unhandled register write {:02X} = {:02X}", offset, val);
            }
        }
    }

    pub fn io_read8(&mut self, addr: u16) -> u8 {
        self.read_register(u32::from(addr) & 0xFF)
    }

    pub fn io_read16(&mut self, addr: u16) -> u16 {
        let addr = u32::from(addr) & 0xFF;
        u16::from(self.read_register(addr)) | (u16::from(self.read_register(addr + 1)) << 8)
    }

    pub fn io_read32(&mut self, addr: u16) -> u32 {
        let addr = u32::from(addr) & 0xFF;
        u32::from(self.read_register(addr))
            | (u32::from(self.read_register(addr + 1)) << 8)
            | (u32::from(self.read_register(addr + 2)) << 16)
            | (u32::from(self.read_register(addr + 3)) << 24)
    }

    pub fn io_write8(&mut self, addr: u16, val: u8) {
        self.write_register(u32::from(addr) & 0xFF, val);
    }

    pub fn io_write16(&mut self, addr: u16, val: u16) {
        let addr = u32::from(addr) & 0xFF;
        self.write_register(addr, val as u8);
        self.write_register(addr + 1, (val >> 8) as u8);
    }

    pub fn io_write32(&mut self, addr: u16, val: u32) {
        let addr = u32::from(addr) & 0xFF;
        self.write_register(addr, val as u8);
        self.write_register(addr + 1, (val >> 8) as u8);
        self.write_register(addr + 2, (val >> 16) as u8);
        self.write_register(addr + 3, (val >> 24) as u8);
    }

    pub fn mmio_read8(&mut self, addr: Address) -> u8 {
        self.read_register(addr & 0xFF)
    }

    pub fn mmio_read16(&mut self, addr: Address) -> u16 {
        let addr = addr & 0xFF;
        u16::from(self.read_register(addr)) | (u16::from(self.read_register(addr + 1)) << 8)
    }

    pub fn mmio_read32(&mut self, addr: Address) -> u32 {
        let addr = addr & 0xFF;
        u32::from(self.read_register(addr))
            | (u32::from(self.read_register(addr + 1)) << 8)
            | (u32::from(self.read_register(addr + 2)) << 16)
            | (u32::from(self.read_register(addr + 3)) << 24)
    }

    pub fn mmio_write8(&mut self, addr: Address, val: u8) {
        self.write_register(addr & 0xFF, val);
    }

    pub fn mmio_write16(&mut self, addr: Address, val: u16) {
        let addr = addr & 0xFF;
        self.write_register(addr, val as u8);
        self.write_register(addr + 1, (val >> 8) as u8);
    }

    pub fn mmio_write32(&mut self, addr: Address, val: u32) {
        let addr = addr & 0xFF;
        self.write_register(addr, val as u8);
        self.write_register(addr + 1, (val >> 8) as u8);
        self.write_register(addr + 2, (val >> 16) as u8);
        self.write_register(addr + 3, (val >> 24) as u8);
    }
}

impl<TBus: GuestBus> Tickable for Sym53c810<TBus> {
    fn tick(&mut self, ticks: Ticks) -> Result<Ticks> {
        self.step();
        Ok(ticks)
    }
}

impl<TBus: GuestBus> Debuggable for Sym53c810<TBus> {
    fn get_debug_properties(&self) -> crate::debuggable::DebuggableProperties {
        use crate::debuggable::*;
        use crate::{
            dbgprop_byte, dbgprop_enum, dbgprop_group, dbgprop_header, dbgprop_long,
            dbgprop_string, dbgprop_udec,
        };

        let mut targets = vec![];
        for (id, target) in self.targets.iter().enumerate() {
            targets.push(dbgprop_string!(
                format!("ID #{}", id),
                if target.is_some() {
                    "attached".to_string()
                } else {
                    "(no device)".to_string()
                }
            ));
        }

        vec![
            dbgprop_group!("Targets", targets),
            dbgprop_group!(
                "Registers",
                vec![
                    dbgprop_byte!("SCNTL0", self.regs.scntl0.0),
                    dbgprop_byte!("SCNTL1", self.regs.scntl1.0),
                    dbgprop_byte!("ISTAT", self.regs.istat.0),
                    dbgprop_byte!("DSTAT", self.regs.dstat.0),
                    dbgprop_byte!("SIST0", self.regs.sist0.0),
                    dbgprop_byte!("SIST1", self.regs.sist1.0),
                    dbgprop_byte!("SFBR", self.regs.sfbr),
                    dbgprop_byte!("SDID", self.regs.sdid),
                    dbgprop_long!("DSP", self.regs.dsp),
                    dbgprop_long!("DSPS", self.regs.dsps),
                    dbgprop_long!("DSA", self.regs.dsa),
                    dbgprop_long!("DNAD", self.regs.dnad),
                    dbgprop_long!("DBC", self.regs.dbc),
                    dbgprop_long!("TEMP", self.regs.temp),
                ]
            ),
            dbgprop_string!(
                "Bus phase",
                format!("{:?}", ScsiPhase::from_u8(self.regs.phase_bits()))
            ),
            dbgprop_enum!("Wait state", self.waiting),
            dbgprop_bool!("Stopped", self.sstop),
            dbgprop_bool!("Carry", self.carry),
            dbgprop_bool!("Connected", self.regs.scntl1.con()),
            dbgprop_header!("Buffers"),
            dbgprop_string!("MSG IN buffer", format!("{:02X?}", &self.msg[..])),
            dbgprop_udec!("Buffer position", self.buffer_pos),
            dbgprop_bool!("IRQ", self.irq_asserted()),
        ]
    }
}
