pub mod bus;
pub mod debuggable;
pub mod scsi;
pub mod tickable;
pub mod types;
