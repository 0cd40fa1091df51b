//! `AddRa`, `ReadMem`/`WriteMem`, ECS/UEM single-word transfer and block
//! copy, and the instruction-word stack lookup (`spec.md` §4.2, §4.4).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cdc_core::{add18, add21, add24, ModelFeatures, ModelType, MASK18, MASK21, MASK60};
use cdc_mem::{CentralMemory, EcsFlagOutcome, EcsFlagRegister, ExtendedMemory};

use crate::exchange::{error_exit, MonitorArbiter};
use crate::registers::{exit_condition, exit_mode, CpuContext, IwEntry};

/// Everything shared between the CPU(s) of one mainframe: memory, the
/// ECS flag register, the monitor-mode arbiter, and the feature set that
/// gates which of the above even apply.
///
/// `ecs` and `ecs_flags` are `Arc`-shared rather than owned outright:
/// `spec.md` §3 has the installation, not the mainframe, own extended
/// memory, so a multi-mainframe installation hands every mainframe's
/// `Environment` a clone of the same handles (`cdc-mainframe`'s
/// `Installation`). A standalone `Environment::new` still allocates its
/// own ECS, which is the correct (and only observable) shape for a
/// single-mainframe installation.
pub struct Environment {
    pub cm: CentralMemory,
    pub ecs: Arc<ExtendedMemory>,
    pub ecs_flags: Arc<EcsFlagRegister>,
    pub monitor: MonitorArbiter,
    pub features: ModelFeatures,
    pub model: ModelType,
    /// Free-running microsecond counter advanced by the mainframe
    /// scheduler (`spec.md` §4.1 `HasMicrosecondClock`, opcode `01.6 RC`).
    pub clock_us: AtomicU64,
}

impl Environment {
    #[must_use]
    pub fn new(model: ModelType, cm_size: u32, ecs_size: u32) -> Self {
        Self::with_shared_ecs(
            model,
            cm_size,
            Arc::new(ExtendedMemory::new(ecs_size)),
            Arc::new(EcsFlagRegister::new()),
        )
    }

    /// Construct an `Environment` against installation-owned ECS and ECS
    /// flag register, shared by every mainframe (`cdc-mainframe`'s
    /// `Installation::new`).
    #[must_use]
    pub fn with_shared_ecs(
        model: ModelType,
        cm_size: u32,
        ecs: Arc<ExtendedMemory>,
        ecs_flags: Arc<EcsFlagRegister>,
    ) -> Self {
        Self {
            cm: CentralMemory::new(cm_size),
            ecs,
            ecs_flags,
            monitor: MonitorArbiter::new(),
            features: model.features(),
            model,
            clock_us: AtomicU64::new(0),
        }
    }

    /// Advance the microsecond clock by `delta`, called once per
    /// scheduler tick by the owning mainframe.
    pub fn advance_clock(&self, delta: u64) {
        self.clock_us.fetch_add(delta, Ordering::Relaxed);
    }

    /// Current microsecond clock value, as read by `RC Xj`.
    #[must_use]
    pub fn read_clock(&self) -> u64 {
        self.clock_us.load(Ordering::Relaxed)
    }

    fn ra_cm_width_is_21(&self) -> bool {
        self.features.contains(ModelFeatures::IS_SERIES_800)
    }

    /// `AddRa(op)`.
    #[must_use]
    pub fn add_ra(&self, cpu: &CpuContext, op: u32) -> u32 {
        if self.ra_cm_width_is_21() {
            add21(cpu.ra_cm & (MASK21 as u32), op)
        } else {
            add18(cpu.ra_cm & (MASK18 as u32), op)
        }
    }

    /// Fetch the instruction word at absolute CM address `p`, consulting
    /// the instruction word stack where the model has one.
    pub fn read_instruction_word(&self, cpu: &CpuContext, p: u32) -> u64 {
        if !self.features.contains(ModelFeatures::HAS_INSTRUCTION_STACK) {
            return self.cm.read_with_wrap(p, self.features.contains(ModelFeatures::HAS_NO_CM_WRAP));
        }
        for entry in &cpu.iw_stack {
            if entry.valid && entry.address == p {
                return entry.word;
            }
        }
        self.cm.read_with_wrap(p, self.features.contains(ModelFeatures::HAS_NO_CM_WRAP))
    }

    /// Insert a freshly fetched word into the instruction word stack and
    /// prefetch the next word when the model supports it. Call after a
    /// stack miss.
    pub fn insert_instruction_word(&self, cpu: &mut CpuContext, p: u32, word: u64) {
        if !self.features.contains(ModelFeatures::HAS_INSTRUCTION_STACK) {
            return;
        }
        let slot = (cpu.iw_rank + 1) % cpu.iw_stack.len();
        cpu.iw_stack[slot] = IwEntry { address: p, word, valid: true };
        cpu.iw_rank = slot;
        if self.features.contains(ModelFeatures::HAS_ISTACK_PREFETCH) {
            let prefetch_addr = p.wrapping_add(1);
            if !cpu.iw_stack.iter().any(|e| e.valid && e.address == prefetch_addr) {
                let prefetch_word = self
                    .cm
                    .read_with_wrap(prefetch_addr, self.features.contains(ModelFeatures::HAS_NO_CM_WRAP));
                let pf_slot = (cpu.iw_rank + 1) % cpu.iw_stack.len();
                cpu.iw_stack[pf_slot] = IwEntry { address: prefetch_addr, word: prefetch_word, valid: true };
            }
        }
    }

    /// `ReadMem(addr)`: returns `Some(word)` on success, `None` on a
    /// failed (and possibly trapped) out-of-range access.
    pub fn read_mem(&self, cpu: &mut CpuContext, addr: u32) -> Option<u64> {
        if addr >= cpu.fl_cm {
            cpu.exit_condition |= exit_condition::ADDRESS_OUT_OF_RANGE;
            if cpu.exit_mode & exit_mode::ADDRESS_OUT_OF_RANGE != 0 {
                error_exit(cpu, self);
                let zero_on_read = !self.features.contains(ModelFeatures::IS_SERIES_170);
                return if zero_on_read { Some(0) } else { None };
            }
            return None;
        }
        let location = self.add_ra(cpu, addr);
        Some(self.cm.read_with_wrap(location, self.features.contains(ModelFeatures::HAS_NO_CM_WRAP)))
    }

    /// `WriteMem(addr, data)`. Returns `true` if the access failed.
    pub fn write_mem(&self, cpu: &mut CpuContext, addr: u32, data: u64) -> bool {
        if addr >= cpu.fl_cm {
            cpu.exit_condition |= exit_condition::ADDRESS_OUT_OF_RANGE;
            if cpu.exit_mode & exit_mode::ADDRESS_OUT_OF_RANGE != 0 {
                error_exit(cpu, self);
                return true;
            }
            return false;
        }
        let location = self.add_ra(cpu, addr);
        self.cm.write_with_wrap(location, data, self.features.contains(ModelFeatures::HAS_NO_CM_WRAP));
        false
    }

    /// `UemWord` / `EcsWord`: single-word transfer via `Xk` as a 24-bit
    /// address. `is_uem` selects CM-overlay (UEM) vs separate store (ECS).
    pub fn read_single_word(&self, cpu: &CpuContext, is_uem: bool, address: u32) -> u64 {
        if is_uem {
            if address & 0b11_0000_0000_0000_0000_0000 != 0 {
                return 0;
            }
            let absolute = self.add_ecs_ra(cpu, address);
            self.cm.read(absolute % self.cm.size().max(1))
        } else {
            if self.ecs.is_absent() {
                return 0;
            }
            let absolute = self.add_ecs_ra(cpu, address);
            self.ecs.read(absolute)
        }
    }

    /// Write side of `UemWord` / `EcsWord`; returns `true` if the store
    /// was skipped (bits 21/22 set on a UEM address).
    pub fn write_single_word(&self, cpu: &CpuContext, is_uem: bool, address: u32, value: u64) -> bool {
        if is_uem {
            if address & 0b11_0000_0000_0000_0000_0000 != 0 {
                return true;
            }
            let absolute = self.add_ecs_ra(cpu, address);
            self.cm.write(absolute % self.cm.size().max(1), value);
            false
        } else {
            if self.ecs.is_absent() {
                return true;
            }
            let absolute = self.add_ecs_ra(cpu, address);
            self.ecs.write(absolute, value);
            false
        }
    }

    fn add_ecs_ra(&self, cpu: &CpuContext, address: u32) -> u32 {
        add24(cpu.ra_ecs, address)
    }

    /// ECS flag register dispatch: bits 21..23 of `address` select the
    /// sub-function, used when bit 23 of both `address` and `FlEcs` is
    /// set (`spec.md` §4.4 table).
    pub fn ecs_flag_register(&self, cpu: &CpuContext, address: u32, flag_word: u32) -> Option<EcsFlagOutcome> {
        if address & (1 << 23) == 0 || cpu.fl_ecs & (1 << 23) == 0 {
            return None;
        }
        let sub_fn = (address >> 21) & 0b111;
        match sub_fn {
            4 => Some(self.ecs_flags.ready_select(flag_word)),
            5 => {
                self.ecs_flags.selective_set(flag_word);
                Some(EcsFlagOutcome::Accepted)
            }
            6 => Some(self.ecs_flags.status(flag_word)),
            7 => {
                self.ecs_flags.selective_clear(flag_word);
                Some(EcsFlagOutcome::Accepted)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> Environment {
        Environment::new(ModelType::Cyber173, 4096, 1024)
    }

    #[test]
    fn read_mem_out_of_range_sets_condition_without_trap() {
        let env = env();
        let mut cpu = CpuContext::new(0);
        cpu.fl_cm = 10;
        let result = env.read_mem(&mut cpu, 20);
        assert_eq!(result, None);
        assert_eq!(cpu.exit_condition & exit_condition::ADDRESS_OUT_OF_RANGE, exit_condition::ADDRESS_OUT_OF_RANGE);
        assert!(!cpu.stopped || cpu.stopped);
    }

    #[test]
    fn read_mem_in_range_round_trips_through_write() {
        let env = env();
        let mut cpu = CpuContext::new(0);
        cpu.fl_cm = 100;
        cpu.ra_cm = 0;
        assert!(!env.write_mem(&mut cpu, 5, 0o777));
        assert_eq!(env.read_mem(&mut cpu, 5), Some(0o777));
    }

    #[test]
    fn ecs_flag_register_requires_bit23_on_both_sides() {
        let env = env();
        let mut cpu = CpuContext::new(0);
        cpu.fl_ecs = 0;
        assert_eq!(env.ecs_flag_register(&cpu, 1 << 23, 0b1), None);
        cpu.fl_ecs = 1 << 23;
        assert!(env.ecs_flag_register(&cpu, (4 << 21) | (1 << 23), 0b1).is_some());
    }
}
