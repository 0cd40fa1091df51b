//! A single 12-bit I/O channel: the active/full/flag/inputPending latch,
//! its device chain, and the per-tick timer logic (`spec.md` §4.8).
//!
//! The low-level primitives here (`check_if_active`, `run_io`,
//! `channel_in`/`channel_out`, `set_full`/`set_empty`) are exposed so
//! `cdc-pp`'s channel opcodes (`AJM`/`IJM`/`FJM`/`EJM`/`IAN`/`IAM`/`OAN`/
//! `OAM`) can reproduce the exact per-tick control flow of the reference
//! implementation's `channelFunction`/`channelIo`/`channelCheckIf*`
//! family rather than a coarser read/write abstraction.

use crate::device::{Device, FuncOutcome};

/// The raw handshake state of a channel, independent of which device (if
/// any) is selected. Kept separate from `Channel` so a `Device::io` impl
/// can borrow it mutably without also borrowing the device chain.
#[derive(Default)]
pub struct ChSlot {
    pub id: u8,
    pub data: u16,
    pub active: bool,
    pub full: bool,
    pub flag: bool,
    /// Serializes hardwired input channels (clock, interlock, S/C)
    /// against PP polling.
    pub input_pending: bool,
    /// Device requests disconnect as soon as the current word is drained.
    pub disc_after_input: bool,
    /// Ticks during which full/empty transitions are suppressed so a
    /// second PP can observe them (AJM/IJM polling).
    pub delay_status: u32,
    /// Ticks until a deferred disconnect takes effect.
    pub delay_disconnect: u32,
    /// Clock, interlock and status/control channels cannot be
    /// deactivated by `DCN`.
    pub hardwired: bool,
    /// The real-time clock channel ignores `active` for I/O purposes —
    /// it always has data pending (`spec.md` §4.9, `Mpp.cpp OpIAN`
    /// `activeChannel->id == ChClock`).
    pub is_clock: bool,
}

impl ChSlot {
    #[must_use]
    pub fn new(id: u8) -> Self {
        Self { id, ..Self::default() }
    }
}

/// A channel plus the chain of devices that may claim it.
pub struct Channel {
    pub slot: ChSlot,
    devices: Vec<Box<dyn Device>>,
    selected: Option<usize>,
}

impl Channel {
    #[must_use]
    pub fn new(id: u8) -> Self {
        Self { slot: ChSlot::new(id), devices: Vec::new(), selected: None }
    }

    /// Attach a device to the end of the chain, returning its index
    /// (used by deadstart wiring to `select` the panel directly without
    /// going through `FAN`/`FNC`).
    pub fn attach(&mut self, device: Box<dyn Device>) -> usize {
        self.devices.push(device);
        self.devices.len() - 1
    }

    #[must_use]
    pub fn selected_name(&self) -> Option<&str> {
        self.selected.map(|i| self.devices[i].name())
    }

    /// `channelFunction`: offer `code` to each device in chain order. A
    /// device that declines leaves the chain untouched; the first to
    /// accept or fully process becomes `ioDevice`. If every device
    /// declines, the channel is left active and full with no device
    /// selected (`channel.cpp channelFunction`, "no device claimed").
    pub fn dispatch_function(&mut self, code: u16) -> FuncOutcome {
        self.slot.full = false;
        for (idx, device) in self.devices.iter_mut().enumerate() {
            match device.func(code) {
                FuncOutcome::Declined => continue,
                FuncOutcome::Accepted => {
                    self.selected = Some(idx);
                    return FuncOutcome::Accepted;
                }
                FuncOutcome::Processed => {
                    self.selected = None;
                    return FuncOutcome::Processed;
                }
            }
        }
        self.selected = None;
        self.slot.full = true;
        self.slot.active = true;
        FuncOutcome::Declined
    }

    /// `channelActivate`.
    pub fn activate(&mut self) {
        self.slot.active = true;
        if let Some(idx) = self.selected {
            self.devices[idx].activate();
        }
    }

    /// `channelDisconnect`. A no-op on hardwired channels; otherwise
    /// clears `full` only when no device is selected to avoid a spurious
    /// empty pulse the device itself is responsible for.
    pub fn disconnect(&mut self) {
        if self.slot.hardwired {
            return;
        }
        self.slot.active = false;
        if let Some(idx) = self.selected {
            self.devices[idx].disconnect();
        } else {
            self.slot.full = false;
        }
    }

    /// Directly select device `idx` without going through `FAN`/`FNC`,
    /// used to seat the deadstart panel at boot (`spec.md` §4.9).
    pub fn select(&mut self, idx: usize) {
        self.selected = Some(idx);
    }

    /// Clear the selected device without touching the handshake latch,
    /// used when `IAM`/`OAM` observe the channel go inactive mid-transfer
    /// (`Mpp.cpp OpIAM`/`OpOAM`: `activeChannel->ioDevice = NULL`).
    pub fn deselect(&mut self) {
        self.selected = None;
    }

    /// `channelCheckIfActive`: a PCI-style device that owns `active`
    /// directly overrides the channel's own latch.
    pub fn check_if_active(&mut self) -> bool {
        if let Some(idx) = self.selected {
            if let Some(active) = self.devices[idx].active_override() {
                self.slot.active = active;
            }
        }
        self.slot.active
    }

    /// `channelCheckIfFull`: as above, for `full`.
    pub fn check_if_full(&mut self) -> bool {
        if let Some(idx) = self.selected {
            if let Some(full) = self.devices[idx].full() {
                self.slot.full = full;
            }
        }
        self.slot.full
    }

    /// `channelIo`: let the selected device run its I/O step, gated on
    /// `active` (or the clock channel, which ignores it).
    pub fn run_io(&mut self) {
        if (self.slot.active || self.slot.is_clock) {
            if let Some(idx) = self.selected {
                self.devices[idx].io(&mut self.slot);
            }
        }
    }

    /// `channelIn`: a PCI-style device may supply the next input word
    /// directly; ordinary devices already populated `slot.data` in
    /// `run_io`.
    pub fn channel_in(&mut self) {
        if let Some(idx) = self.selected {
            if let Some(data) = self.devices[idx].read_passthrough() {
                self.slot.data = data;
            }
        }
    }

    /// `channelOut`: mirror `data` onto a PCI-style device's own output
    /// path in addition to the latch.
    pub fn channel_out(&mut self, data: u16) {
        self.slot.data = data;
        if let Some(idx) = self.selected {
            self.devices[idx].write_passthrough(data);
        }
    }

    /// `channelSetFull`/`channelSetEmpty`.
    pub fn set_full(&mut self) {
        self.slot.full = true;
    }

    pub fn set_empty(&mut self) {
        self.slot.full = false;
    }

    /// Read one word off the latch (`IAN`/`IAM`'s simple path, when the
    /// caller does not need the full `OpIAN` control flow). Clears
    /// `full`; the device refills it on its next `io()` call.
    pub fn take_input(&mut self) -> Option<u16> {
        if self.check_if_active() && self.check_if_full() {
            self.channel_in();
            let data = self.slot.data;
            self.set_empty();
            Some(data)
        } else {
            None
        }
    }

    /// Write one word onto the latch (`OAN`/`OAM`'s simple path).
    pub fn put_output(&mut self, word: u16) -> bool {
        if self.check_if_active() && !self.check_if_full() {
            self.channel_out(word);
            self.set_full();
            true
        } else {
            false
        }
    }

    /// `channelStep(mainframe)`: advance the per-tick timers and let the
    /// selected device run its I/O step.
    pub fn step(&mut self) {
        if self.slot.delay_disconnect > 0 {
            self.slot.delay_disconnect -= 1;
            if self.slot.delay_disconnect == 0 {
                self.slot.active = false;
                self.slot.disc_after_input = false;
            }
        }
        if self.slot.delay_status > 0 {
            self.slot.delay_status -= 1;
        }
        self.check_if_active();
        self.run_io();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo {
        remaining: u32,
    }

    impl Device for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn func(&mut self, _code: u16) -> FuncOutcome {
            FuncOutcome::Accepted
        }
        fn io(&mut self, channel: &mut ChSlot) {
            if !channel.full && self.remaining > 0 {
                channel.data = 0o4242;
                channel.full = true;
                self.remaining -= 1;
            } else if self.remaining == 0 {
                channel.active = false;
            }
        }
    }

    #[test]
    fn function_dispatch_selects_first_acceptor() {
        let mut ch = Channel::new(3);
        ch.attach(Box::new(Echo { remaining: 1 }));
        assert_eq!(ch.dispatch_function(0o10), FuncOutcome::Accepted);
        assert_eq!(ch.selected_name(), Some("echo"));
    }

    #[test]
    fn dispatch_function_leaves_channel_full_when_declined() {
        let mut ch = Channel::new(3);
        assert_eq!(ch.dispatch_function(0o10), FuncOutcome::Declined);
        assert!(ch.slot.full);
        assert!(ch.slot.active);
        assert_eq!(ch.selected_name(), None);
    }

    #[test]
    fn step_feeds_data_and_deactivates_on_exhaustion() {
        let mut ch = Channel::new(3);
        ch.attach(Box::new(Echo { remaining: 1 }));
        ch.dispatch_function(0);
        ch.activate();
        ch.step();
        assert!(ch.slot.full);
        assert_eq!(ch.take_input(), Some(0o4242));
        ch.step();
        assert!(!ch.slot.active);
    }

    #[test]
    fn delay_disconnect_forces_inactive_at_zero() {
        let mut ch = Channel::new(5);
        ch.slot.active = true;
        ch.slot.delay_disconnect = 2;
        ch.step();
        assert!(ch.slot.active);
        ch.step();
        assert!(!ch.slot.active);
    }

    #[test]
    fn hardwired_channel_ignores_disconnect() {
        let mut ch = Channel::new(0);
        ch.slot.hardwired = true;
        ch.slot.active = true;
        ch.disconnect();
        assert!(ch.slot.active);
    }

    #[test]
    fn disconnect_without_selected_device_clears_full() {
        let mut ch = Channel::new(2);
        ch.slot.active = true;
        ch.slot.full = true;
        ch.disconnect();
        assert!(!ch.slot.active);
        assert!(!ch.slot.full);
    }
}
