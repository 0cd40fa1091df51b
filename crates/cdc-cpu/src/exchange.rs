//! Exchange jump, monitor mode arbitration, and the CEJ/MEJ protocol
//! (`spec.md` §4.6).

use std::sync::{Condvar, Mutex};
use std::time::Duration;

use cdc_core::{ModelFeatures, MASK18, MASK60};
use tracing::warn;

use crate::mem::Environment;
use crate::registers::{exit_condition, CpuContext};

/// Width in CM words of an exchange package.
pub const XJ_PACKAGE_WORDS: u32 = 16;

/// Top 30 bits of a `JP Bi+K` parcel with `i=0, j=0`: opcode `02` in bits
/// `29..24`, zero index fields, address in the low 18 bits. Shared with
/// `decode.rs` so the idle-loop self-jump check and the JP opcode handler
/// agree on the same bit pattern (`spec.md` §4.6 step 8, §9 design notes).
pub const JP_SELF_LOOP_BASE: u64 = 0o02 << 24;

/// How long an `XJ` contending for monitor mode waits before rewinding
/// the opcode for retry on the next scheduler tick.
pub const XJ_WAIT_TIMEOUT: Duration = Duration::from_millis(50);

/// Which CPU (if any) currently holds monitor mode, plus the condition
/// variable CPUs contending for it wait on.
pub struct MonitorArbiter {
    /// `-1` = no CPU in monitor mode, otherwise the owning CPU id.
    owner: Mutex<i8>,
    done: Condvar,
}

impl Default for MonitorArbiter {
    fn default() -> Self {
        Self { owner: Mutex::new(-1), done: Condvar::new() }
    }
}

impl MonitorArbiter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn current_owner(&self) -> i8 {
        #[allow(clippy::unwrap_used)]
        *self.owner.lock().unwrap()
    }

    /// Arbitrate a monitor-mode request: `-1` to leave, `own id` to
    /// enter, `2` for no-change. Returns whether the request succeeded.
    fn arbitrate(&self, cpu_id: u8, monitor_req: i8) -> bool {
        #[allow(clippy::unwrap_used)]
        let mut owner = self.owner.lock().unwrap();
        let accepted = match monitor_req {
            -1 => {
                if *owner == cpu_id as i8 {
                    *owner = -1;
                }
                true
            }
            2 => true,
            req if req == cpu_id as i8 => {
                if *owner == -1 {
                    *owner = cpu_id as i8;
                    true
                } else {
                    false
                }
            }
            _ => false,
        };
        if accepted {
            self.done.notify_all();
        }
        accepted
    }

    /// Wait up to `timeout` for monitor mode to become available, then
    /// report whether it did.
    fn wait_for_vacancy(&self, timeout: Duration) -> bool {
        #[allow(clippy::unwrap_used)]
        let owner = self.owner.lock().unwrap();
        let (owner, timed_out) =
            self.done.wait_timeout_while(owner, timeout, |o| *o != -1).unwrap();
        let _ = owner;
        !timed_out.timed_out()
    }
}

/// Outcome of an `ExchangeJump` attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XjOutcome {
    Completed,
    Rejected,
}

/// `ExchangeJump(addr, monitor_req, source)` — atomic swap of the
/// register file with a 16-word CM package.
pub fn exchange_jump(
    cpu: &mut CpuContext,
    env: &Environment,
    addr: u32,
    monitor_req: i8,
    source: &str,
) -> XjOutcome {
    if cpu.op_offset != 60 && !cpu.stopped {
        return XjOutcome::Rejected;
    }

    let addr = addr & (MASK18 as u32);
    if addr == 0 {
        warn!(cpu = cpu.cpu_id, source, "exchange jump to address 0");
    }

    if !env.monitor.arbitrate(cpu.cpu_id, monitor_req) {
        return XjOutcome::Rejected;
    }

    if addr.saturating_add(XJ_PACKAGE_WORDS) > env.cm.size() {
        env.monitor.done.notify_all();
        return XjOutcome::Completed;
    }

    let captured = capture_package(cpu, env.features);
    load_package(cpu, env, addr);
    store_package(env, addr, &captured);
    cpu.exit_condition = exit_condition::NONE;

    if env.features.contains(ModelFeatures::HAS_INSTRUCTION_STACK) {
        cpu.void_iw_stack();
    }

    cpu.stopped = false;
    cpu.op_offset = 60;
    cpu.op_word = env.read_instruction_word(cpu, cpu.p);
    env.monitor.done.notify_all();

    idle_loop_check(cpu);

    XjOutcome::Completed
}

/// A captured exchange package, laid out exactly as the 16 CM words of
/// `spec.md` §4.6.
struct Package {
    p: u32,
    ra_cm: u32,
    fl_cm: u32,
    ra_ecs: u32,
    fl_ecs: u32,
    exit_mode: u32,
    ma: u32,
    a: [u32; 8],
    b: [u32; 8],
    x: [u64; 8],
}

fn capture_package(cpu: &CpuContext, _features: ModelFeatures) -> Package {
    Package {
        p: cpu.p,
        ra_cm: cpu.ra_cm,
        fl_cm: cpu.fl_cm,
        ra_ecs: cpu.ra_ecs,
        fl_ecs: cpu.fl_ecs,
        exit_mode: cpu.exit_mode,
        ma: cpu.ma,
        a: cpu.a,
        b: cpu.b,
        x: cpu.x,
    }
}

fn load_package(cpu: &mut CpuContext, env: &Environment, addr: u32) {
    let w = |i: u32| env.cm.read(addr + i);
    cpu.p = (w(0) & (MASK18)) as u32;
    let word1 = w(1);
    cpu.ra_cm = ((word1 >> 36) & 0xFF_FFFF) as u32;
    cpu.a[1] = ((word1 >> 18) & MASK18) as u32;
    cpu.b[1] = (word1 & MASK18) as u32;
    let word2 = w(2);
    cpu.fl_cm = ((word2 >> 36) & 0xFF_FFFF) as u32;
    cpu.a[2] = ((word2 >> 18) & MASK18) as u32;
    cpu.b[2] = (word2 & MASK18) as u32;
    let word3 = w(3);
    cpu.exit_mode = ((word3 >> 36) & 0xFF_FFFF) as u32;
    cpu.a[3] = ((word3 >> 18) & MASK18) as u32;
    cpu.b[3] = (word3 & MASK18) as u32;
    let word4 = w(4);
    cpu.ra_ecs = ((word4 >> 36) & 0xFF_FFFF) as u32;
    cpu.a[4] = ((word4 >> 18) & MASK18) as u32;
    cpu.b[4] = (word4 & MASK18) as u32;
    let word5 = w(5);
    cpu.fl_ecs = ((word5 >> 36) & 0xFF_FFFF) as u32;
    cpu.a[5] = ((word5 >> 18) & MASK18) as u32;
    cpu.b[5] = (word5 & MASK18) as u32;
    let word6 = w(6);
    cpu.ma = ((word6 >> 36) & 0xFF_FFFF) as u32;
    cpu.a[6] = ((word6 >> 18) & MASK18) as u32;
    cpu.b[6] = (word6 & MASK18) as u32;
    let word7 = w(7);
    cpu.a[7] = ((word7 >> 18) & MASK18) as u32;
    cpu.b[7] = (word7 & MASK18) as u32;
    cpu.a[0] = 0;
    cpu.b[0] = 0;
    for i in 0..8 {
        cpu.x[i] = env.cm.read(addr + 8 + i as u32) & MASK60;
    }
}

fn store_package(env: &Environment, addr: u32, pkg: &Package) {
    let pack = |hi: u32, a: u32, b: u32| {
        ((u64::from(hi) & 0xFF_FFFF) << 36) | ((u64::from(a) & MASK18) << 18) | (u64::from(b) & MASK18)
    };
    env.cm.write(addr, u64::from(pkg.p) & MASK18);
    env.cm.write(addr + 1, pack(pkg.ra_cm, pkg.a[1], pkg.b[1]));
    env.cm.write(addr + 2, pack(pkg.fl_cm, pkg.a[2], pkg.b[2]));
    env.cm.write(addr + 3, pack(pkg.exit_mode, pkg.a[3], pkg.b[3]));
    env.cm.write(addr + 4, pack(pkg.ra_ecs, pkg.a[4], pkg.b[4]));
    env.cm.write(addr + 5, pack(pkg.fl_ecs, pkg.a[5], pkg.b[5]));
    env.cm.write(addr + 6, pack(pkg.ma, pkg.a[6], pkg.b[6]));
    env.cm.write(addr + 7, pack(0, pkg.a[7], pkg.b[7]));
    for i in 0..8 {
        env.cm.write(addr + 8 + i as u32, pkg.x[i] & MASK60);
    }
}

/// Strip leading 15-bit no-op (`047`) parcels and, if what remains is a
/// self-jump (`JP P`, encoded `0400_0000 | P`), mark the CPU stopped so
/// the scheduler can skip it (`spec.md` §4.6 step 8).
fn idle_loop_check(cpu: &mut CpuContext) {
    let mut word = cpu.op_word;
    let mut offset = 60u32;
    while offset >= 15 {
        let parcel = (word >> (offset - 15)) & 0o77777;
        if (parcel >> 9) & 0o77 != 0o47 {
            break;
        }
        offset -= 15;
        if offset < 15 {
            break;
        }
    }
    if offset >= 30 {
        word = (word << (60 - offset)) & MASK60;
        let parcel30 = word >> 30;
        if parcel30 == (JP_SELF_LOOP_BASE | u64::from(cpu.p)) {
            cpu.stopped = true;
        }
    }
}

/// Error-exit helper used by `OpIllegal` and the trap branch of
/// memory/float checks (`spec.md` §4.6, "Error-exit helper").
pub fn error_exit(cpu: &mut CpuContext, env: &Environment) {
    cpu.stopped = true;
    if cpu.ra_cm < env.cm.size() {
        let exit_word = (u64::from(cpu.exit_condition) << 48) | (u64::from(cpu.p + 1) << 30);
        env.cm.write(cpu.ra_cm, exit_word);
    }
    cpu.p = 0;

    let no_monitor_protocol =
        env.features.contains(ModelFeatures::HAS_NO_CEJ_MEJ | ModelFeatures::IS_SERIES_6X00);
    if !no_monitor_protocol && env.monitor.current_owner() == -1 {
        exchange_jump(cpu, env, cpu.ma, cpu.cpu_id as i8, "OpIllegal");
    }
}

/// `01.3 XJ K` opcode body.
pub fn op_xj(cpu: &mut CpuContext, env: &Environment, k_addr: u32) {
    if env.monitor.current_owner() == cpu.cpu_id as i8 {
        cpu.stopped = true;
        cpu.p += 1;
        let outcome = exchange_jump(cpu, env, k_addr, -1, "XJ-exit");
        if outcome == XjOutcome::Rejected {
            rewind_xj(cpu);
        }
        return;
    }

    let outcome = exchange_jump(cpu, env, cpu.ma, cpu.cpu_id as i8, "XJ-enter");
    if outcome == XjOutcome::Rejected {
        if !env.monitor.wait_for_vacancy(XJ_WAIT_TIMEOUT) {
            rewind_xj(cpu);
            return;
        }
        let retry = exchange_jump(cpu, env, cpu.ma, cpu.cpu_id as i8, "XJ-enter-retry");
        if retry == XjOutcome::Rejected {
            rewind_xj(cpu);
        }
    }
}

/// Restore P and opOffset so a rejected XJ is retried from scratch on
/// the next scheduler iteration.
fn rewind_xj(cpu: &mut CpuContext) {
    cpu.op_offset = 60;
    cpu.stopped = false;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monitor_arbiter_enter_leave_round_trip() {
        let arb = MonitorArbiter::new();
        assert_eq!(arb.current_owner(), -1);
        assert!(arb.arbitrate(0, 0));
        assert_eq!(arb.current_owner(), 0);
        assert!(!arb.arbitrate(1, 1));
        assert!(arb.arbitrate(0, -1));
        assert_eq!(arb.current_owner(), -1);
        assert!(arb.arbitrate(1, 1));
        assert_eq!(arb.current_owner(), 1);
    }

    #[test]
    fn monitor_arbiter_no_change_always_succeeds() {
        let arb = MonitorArbiter::new();
        assert!(arb.arbitrate(0, 2));
        assert_eq!(arb.current_owner(), -1);
    }
}
