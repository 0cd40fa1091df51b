//! Device callback surface (`spec.md` §6.1).

use crate::channel::ChSlot;

/// Result of offering a function code to a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuncOutcome {
    /// Not mine; try the next device on the chain.
    Declined,
    /// Mine — selects this device as the channel's `ioDevice` and begins
    /// (or continues) an I/O transfer.
    Accepted,
    /// Mine, and already complete — no transfer follows.
    Processed,
}

/// A peripheral attached to a channel. Devices are tried in chain order
/// on `FAN`/`FNC`; the first to return `Accepted` or `Processed` becomes
/// the channel's selected device until `DCN`.
pub trait Device: Send {
    fn name(&self) -> &str;

    /// Offer a function code (`FAN`/`FNC`).
    fn func(&mut self, code: u16) -> FuncOutcome;

    /// Called once per scheduler tick while the channel is active and
    /// this device is selected. Moves one word to/from `channel.data`
    /// and sets/clears `full`.
    fn io(&mut self, channel: &mut ChSlot);

    /// `ACN`.
    fn activate(&mut self) {}

    /// `DCN`.
    fn disconnect(&mut self) {}

    /// PCI-style devices that own the handshake directly may report a
    /// definite full/empty state; `None` means "defer to `channel.full`".
    fn full(&self) -> Option<bool> {
        None
    }

    fn empty(&self) -> Option<bool> {
        None
    }

    /// PCI-style devices that own `active` directly report it here;
    /// `None` means "defer to `channel.active`" (`channel.cpp
    /// channelCheckIfActive`).
    fn active_override(&self) -> Option<bool> {
        None
    }

    /// PCI-style devices that supply their own input word rather than
    /// going through `channel.data` (`channel.cpp channelIn`).
    fn read_passthrough(&mut self) -> Option<u16> {
        None
    }

    /// PCI-style devices that consume output directly in addition to
    /// the latch (`channel.cpp channelOut`).
    fn write_passthrough(&mut self, _data: u16) {}

    fn flags(&self) -> u16 {
        0
    }
}
