//! The four pseudo-devices every mainframe installs regardless of
//! configured equipment (`spec.md` §4.8, §4.9, §9 "deadstart wiring").

use crate::channel::ChSlot;
use crate::device::{Device, FuncOutcome};

/// Feeds a fixed deck of words onto channel 0 at boot, one per tick,
/// deactivating the channel once the deck is exhausted. A zero-logic
/// pseudo-device, kept as a plain struct rather than a heap-allocated
/// trait object wherever the caller only needs the deadstart behavior.
pub struct DeadstartPanel {
    deck: Vec<u16>,
    cursor: usize,
}

impl DeadstartPanel {
    #[must_use]
    pub fn new(deck: Vec<u16>) -> Self {
        Self { deck, cursor: 0 }
    }

    #[must_use]
    pub fn words_consumed(&self) -> usize {
        self.cursor
    }

    #[must_use]
    pub fn exhausted(&self) -> bool {
        self.cursor >= self.deck.len()
    }
}

impl Device for DeadstartPanel {
    fn name(&self) -> &str {
        "deadstart-panel"
    }

    fn func(&mut self, _code: u16) -> FuncOutcome {
        FuncOutcome::Accepted
    }

    fn io(&mut self, channel: &mut ChSlot) {
        if channel.full {
            return;
        }
        if self.cursor < self.deck.len() {
            channel.data = self.deck[self.cursor];
            channel.full = true;
            self.cursor += 1;
        } else {
            channel.active = false;
        }
    }
}

/// Real-time clock channel: always full, feeding successive low-12-bit
/// samples of a free-running tick counter. Tracked independently of the
/// CPU's microsecond clock (`01.6 RC`) — the two counters are not
/// required to agree, only each to be monotonic on its own channel.
pub struct ClockDevice {
    ticks: u64,
    increment: u64,
}

impl ClockDevice {
    #[must_use]
    pub fn new(increment: u64) -> Self {
        Self { ticks: 0, increment }
    }
}

impl Device for ClockDevice {
    fn name(&self) -> &str {
        "real-time-clock"
    }

    fn func(&mut self, _code: u16) -> FuncOutcome {
        FuncOutcome::Accepted
    }

    fn io(&mut self, channel: &mut ChSlot) {
        self.ticks = self.ticks.wrapping_add(self.increment);
        channel.data = (self.ticks & 0o7777) as u16;
        channel.full = true;
    }
}

/// Interlock register: a single 12-bit cross-mainframe semaphore word.
/// Ignores function codes entirely (`spec.md` §4.7).
pub struct InterlockRegister {
    value: u16,
}

impl InterlockRegister {
    #[must_use]
    pub fn new() -> Self {
        Self { value: 0 }
    }
}

impl Default for InterlockRegister {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for InterlockRegister {
    fn name(&self) -> &str {
        "interlock-register"
    }

    fn func(&mut self, _code: u16) -> FuncOutcome {
        FuncOutcome::Accepted
    }

    fn io(&mut self, channel: &mut ChSlot) {
        if channel.full {
            self.value = channel.data;
        } else {
            channel.data = self.value;
            channel.full = true;
        }
    }
}

/// Status/Control register channel, present on models with
/// `HasStatusAndControlReg`. Holds a single word read/written the same
/// way as the interlock register.
pub struct StatusControlRegister {
    value: u16,
}

impl StatusControlRegister {
    #[must_use]
    pub fn new() -> Self {
        Self { value: 0 }
    }
}

impl Default for StatusControlRegister {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for StatusControlRegister {
    fn name(&self) -> &str {
        "status-control-register"
    }

    fn func(&mut self, _code: u16) -> FuncOutcome {
        FuncOutcome::Accepted
    }

    fn io(&mut self, channel: &mut ChSlot) {
        if channel.full {
            self.value = channel.data;
        } else {
            channel.data = self.value;
            channel.full = true;
        }
    }
}

/// Minimal magnetic tape unit for the operator `load`/`unload`/`status`
/// verbs (`spec.md` §6.5). Configured equipment, not one of the four
/// unconditional channels, and deliberately shallow: it holds an image
/// and a read cursor but does not emulate block/tape-mark framing,
/// matching `spec.md`'s Non-goal that individual device emulators
/// beyond the four unconditional channels are out of scope. The
/// load/unload/status verbs bypass the channel `func`/`io` protocol
/// entirely, the same way `machine-spectrum::Spectrum::load_tape`/
/// `tape_play`/`tape_stop` reach into the machine directly rather than
/// going through the CPU's bus.
#[derive(Default)]
pub struct TapeUnit {
    image: Option<Vec<u8>>,
    cursor: usize,
}

/// Operator-visible tape state (`spec.md` §6.5 "show-tape status").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapeStatus {
    Unloaded,
    Loaded { bytes: usize, position: usize },
}

impl TapeUnit {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&mut self, image: Vec<u8>) {
        self.image = Some(image);
        self.cursor = 0;
    }

    pub fn unload(&mut self) {
        self.image = None;
        self.cursor = 0;
    }

    #[must_use]
    pub fn status(&self) -> TapeStatus {
        match &self.image {
            None => TapeStatus::Unloaded,
            Some(image) => TapeStatus::Loaded { bytes: image.len(), position: self.cursor },
        }
    }
}

impl Device for TapeUnit {
    fn name(&self) -> &str {
        "tape-unit"
    }

    fn func(&mut self, _code: u16) -> FuncOutcome {
        if self.image.is_some() {
            FuncOutcome::Accepted
        } else {
            FuncOutcome::Declined
        }
    }

    fn io(&mut self, channel: &mut ChSlot) {
        let Some(image) = &self.image else {
            channel.active = false;
            return;
        };
        if channel.full {
            return;
        }
        if self.cursor < image.len() {
            channel.data = u16::from(image[self.cursor]);
            channel.full = true;
            self.cursor += 1;
        } else {
            channel.active = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadstart_panel_feeds_deck_then_deactivates() {
        let mut panel = DeadstartPanel::new(vec![0o7433, 0o7432, 0o7431, 0o7430, 0]);
        let mut slot = ChSlot::new(0);
        slot.active = true;
        for expected in [0o7433u16, 0o7432, 0o7431, 0o7430, 0] {
            panel.io(&mut slot);
            assert_eq!(slot.data, expected);
            slot.full = false;
        }
        panel.io(&mut slot);
        assert!(!slot.active);
        assert!(panel.exhausted());
        assert_eq!(panel.words_consumed(), 5);
    }

    #[test]
    fn clock_device_always_reports_full() {
        let mut clock = ClockDevice::new(1);
        let mut slot = ChSlot::new(12);
        clock.io(&mut slot);
        assert!(slot.full);
        let first = slot.data;
        slot.full = false;
        clock.io(&mut slot);
        assert_eq!(slot.data, first.wrapping_add(1) & 0o7777);
    }
}
