//! A single mainframe: its Central Memory, PP barrel, channel array, CPU
//! set, and the scheduler tick that drives them (`spec.md` §3, §5).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cdc_channel::{special, Channel, ClockDevice, DeadstartPanel, InterlockRegister, StatusControlRegister};
use cdc_core::{ModelFeatures, ModelType};
use cdc_cpu::{step as cpu_step, CpuContext, Environment};
use cdc_mem::{EcsFlagRegister, ExtendedMemory};
use cdc_pp::{step as pp_step, PpSlot};
use tracing::instrument;

/// `020₈` (16) channels for a ten-PP barrel, `040₈` (32) otherwise
/// (`MMainFrame.cpp Init`: channel count keyed on PP count, not model).
/// `spec.md` §1 rounds this to "24 or 32"; we follow the reference's
/// exact derivation since §1 does not give the 10→24 mapping a formula.
#[must_use]
fn channel_count_for(pp_count: u8) -> u8 {
    if pp_count <= 0o12 {
        0o20
    } else {
        0o40
    }
}

/// One CDC mainframe: CM, PP barrel, channel array, one or two CPUs, and
/// the `Environment` all of the above consult for feature gating and
/// (for the CPUs) shared ECS access.
pub struct Mainframe {
    pub id: u32,
    pub env: Environment,
    pub pps: Vec<PpSlot>,
    pub channels: Vec<Channel>,
    pub cpus: Vec<CpuContext>,
    clock_increment: u64,
}

impl Mainframe {
    /// Allocate a mainframe's CM/PP barrel/channel array and wire up the
    /// four unconditional pseudo-device channels (`spec.md` §4.8). ECS
    /// and the ECS flag register are handles shared from the owning
    /// `Installation`, not allocated here.
    #[must_use]
    pub fn new(
        id: u32,
        model: ModelType,
        cm_words: u32,
        pp_count: u8,
        clock_increment: u64,
        ecs: Arc<ExtendedMemory>,
        ecs_flags: Arc<EcsFlagRegister>,
    ) -> Self {
        let env = Environment::with_shared_ecs(model, cm_words, ecs, ecs_flags);
        let features = env.features;

        let pps = (0..pp_count).map(PpSlot::new).collect();

        let channel_count = channel_count_for(pp_count);
        let mut channels: Vec<Channel> = (0..channel_count).map(Channel::new).collect();

        channels[special::DEADSTART as usize].slot.hardwired = false;

        if features.contains(ModelFeatures::HAS_INTERLOCK_REG) {
            let ch = &mut channels[special::INTERLOCK as usize];
            ch.attach(Box::new(InterlockRegister::new()));
            ch.select(0);
            ch.slot.hardwired = true;
        }
        if features.contains(ModelFeatures::HAS_STATUS_AND_CONTROL_REG) {
            let ch = &mut channels[special::STATUS_CONTROL as usize];
            ch.attach(Box::new(StatusControlRegister::new()));
            ch.select(0);
            ch.slot.hardwired = true;
        }
        {
            let ch = &mut channels[special::CLOCK as usize];
            ch.attach(Box::new(ClockDevice::new(clock_increment.max(1))));
            ch.select(0);
            ch.slot.hardwired = true;
            ch.slot.is_clock = true;
            ch.slot.active = true;
        }

        let cpus = vec![CpuContext::new(0)];

        Self { id, env, pps, channels, cpus, clock_increment }
    }

    /// Add a second CPU (`spec.md` §6.4 `cpus: 1|2`).
    pub fn add_second_cpu(&mut self) {
        self.cpus.push(CpuContext::new(1));
    }

    /// Deadstart: place every PP at the boot state and feed `sequence`
    /// onto channel 0 through a freshly-seated deadstart panel
    /// (`spec.md` §4.9).
    #[instrument(skip(self, sequence), fields(mainframe = self.id))]
    pub fn deadstart(&mut self, sequence: &[u16]) {
        for pp in &mut self.pps {
            pp.p = 0;
            pp.write(0, 0);
            pp.op_f = 0o71;
            pp.a = 0o10000;
            pp.busy = true;
        }

        let ch0 = &mut self.channels[special::DEADSTART as usize];
        let idx = ch0.attach(Box::new(DeadstartPanel::new(sequence.to_vec())));
        ch0.select(idx);
        ch0.activate();
    }

    /// One scheduler tick: step every PP once, step every CPU one
    /// instruction word, advance channel timers, then the microsecond
    /// clock (`spec.md` §5 "round-robin loop").
    #[instrument(skip(self), fields(mainframe = self.id))]
    pub fn tick(&mut self) {
        for pp in &mut self.pps {
            pp_step(pp, &mut self.channels, &mut self.cpus, &self.env);
        }
        for cpu in &mut self.cpus {
            cpu_step(cpu, &self.env);
        }
        for channel in &mut self.channels {
            channel.step();
        }
        self.env.advance_clock(self.clock_increment);
    }

    /// Run the scheduler loop until `active` clears. On a two-CPU
    /// mainframe, CPU 1 runs on its own worker thread sharing `env` with
    /// CPU 0's thread (`spec.md` §5): the two only rendezvous at
    /// exchange-jump points via `env.monitor`, so no per-tick barrier is
    /// needed between them.
    pub fn run_until_shutdown(&mut self, active: &AtomicBool) {
        if self.cpus.len() == 2 {
            let env = &self.env;
            let mut cpu1 = self.cpus.pop().expect("two cpus");
            std::thread::scope(|scope| {
                scope.spawn(|| {
                    while active.load(Ordering::Relaxed) {
                        cpu_step(&mut cpu1, env);
                        std::thread::yield_now();
                    }
                });
                while active.load(Ordering::Relaxed) {
                    for pp in &mut self.pps {
                        pp_step(pp, &mut self.channels, std::slice::from_mut(&mut self.cpus[0]), env);
                    }
                    cpu_step(&mut self.cpus[0], env);
                    for channel in &mut self.channels {
                        channel.step();
                    }
                    env.advance_clock(self.clock_increment);
                    std::thread::yield_now();
                }
            });
            self.cpus.push(cpu1);
        } else {
            while active.load(Ordering::Relaxed) {
                self.tick();
                std::thread::yield_now();
            }
        }
    }

    /// A short pause between ticks callers may use outside the hot
    /// scheduler loop (e.g. an operator CLI waiting for deadstart to
    /// finish draining the panel).
    pub fn settle(ticks: u32, per_tick: Duration) {
        for _ in 0..ticks {
            std::thread::sleep(per_tick);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mainframe() -> Mainframe {
        Mainframe::new(
            0,
            ModelType::Model6400,
            4096,
            10,
            1,
            Arc::new(ExtendedMemory::new(0)),
            Arc::new(EcsFlagRegister::new()),
        )
    }

    #[test]
    fn channel_count_follows_pp_count() {
        assert_eq!(channel_count_for(10), 0o20);
        assert_eq!(channel_count_for(24), 0o40);
    }

    #[test]
    fn new_mainframe_seats_clock_channel_active() {
        let mf = mainframe();
        assert!(mf.channels[special::CLOCK as usize].slot.active);
        assert!(mf.channels[special::CLOCK as usize].slot.is_clock);
    }

    #[test]
    fn deadstart_arms_every_pp_and_selects_channel_zero() {
        let mut mf = mainframe();
        mf.deadstart(&[0o7433, 0o7432, 0o7431, 0o7430, 0]);
        for pp in &mf.pps {
            assert_eq!(pp.p, 0);
            assert_eq!(pp.op_f, 0o71);
            assert_eq!(pp.a, 0o10000);
            assert!(pp.busy);
        }
        assert!(mf.channels[special::DEADSTART as usize].slot.active);
        assert!(mf.channels[special::DEADSTART as usize].selected_name().is_some());
    }

    /// Scenario S1: deadstart of a minimal model-6400 mainframe drains
    /// the deck into PP0's memory and leaves it idle.
    #[test]
    fn s1_deadstart_drains_deck_into_pp0() {
        let mut mf = mainframe();
        let deck = vec![0o7433, 0o7432, 0o7431, 0o7430, 0o0000];
        mf.deadstart(&deck);

        for _ in 0..deck.len() + 2 {
            mf.tick();
        }

        assert!(!mf.channels[special::DEADSTART as usize].slot.active);
        assert_eq!(mf.pps[0].p, deck.len() as u32);
        assert_eq!(mf.pps[0].a, 0);
        assert!(!mf.pps[0].busy);
    }
}
