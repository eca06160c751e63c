//! SCSI target generic/shared code

/// Bus phase a target requests after accepting a CDB
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetPhase {
    /// Target -> Initiator data transfer follows
    DataIn,
    /// Initiator -> Target data transfer follows
    DataOut,
    /// No data transfer; straight to status
    Status,
}

/// An abstraction of a generic SCSI target (device model).
///
/// The controller drives a command in two steps: `command_phase0` hands over
/// the CDB and lets the target stage its data buffer and decide the
/// transfer phase; the DMA engine then moves bytes directly in/out of
/// `buffer()`, and `command_phase1` completes the data phase once the
/// declared `buffer_length` is exhausted. Command execution semantics
/// (sense data, media access) are entirely the target's business.
pub trait ScsiTarget {
    /// Accepts a CDB; stages the transfer buffer and status
    fn command_phase0(&mut self, cdb: &[u8]);

    /// Completes the data phase of the current command
    fn command_phase1(&mut self);

    /// Transfer direction declared by the last `command_phase0`
    fn transfer_phase(&self) -> TargetPhase;

    /// Declared length of the staged buffer (negative = none)
    fn buffer_length(&self) -> i32;

    /// Data staging buffer for the current command
    fn buffer(&mut self) -> &mut [u8];

    /// SCSI status byte of the last completed command
    fn status(&self) -> u8;

    /// Aborts the I/O process in progress (Abort/Abort Tag/Clear Queue
    /// messages)
    fn stop_command(&mut self);

    /// Target hard reset (bus reset, Bus Device Reset message)
    fn reset(&mut self);
}
