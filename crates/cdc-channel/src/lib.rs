//! 12-bit I/O channels, their device chain, and the special pseudo-devices
//! every mainframe installs unconditionally (`spec.md` §4.8, §4.9).

pub mod channel;
pub mod device;
pub mod devices;

pub use channel::{ChSlot, Channel};
pub use device::{Device, FuncOutcome};
pub use devices::{ClockDevice, DeadstartPanel, InterlockRegister, StatusControlRegister, TapeStatus, TapeUnit};

/// Conventional channel numbers for the channels every mainframe installs
/// regardless of configured equipment (`spec.md` §4.8). The real-time
/// clock's channel number is not given in the spec; `14` is this crate's
/// documented choice, matching the slot left free between the interlock
/// register (`15`) and the ordinary equipment channels.
pub mod special {
    pub const DEADSTART: u8 = 0;
    pub const CLOCK: u8 = 0o14;
    pub const INTERLOCK: u8 = 0o15;
    pub const STATUS_CONTROL: u8 = 0o16;
}
