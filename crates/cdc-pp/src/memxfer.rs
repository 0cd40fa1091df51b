//! PP access to Central Memory: the relocation register (`LRD`/`SRD`,
//! opcodes `24`/`25`), direct and block CM transfer (`CRD`/`CRM`/`CWD`/
//! `CWM`, opcodes `60`-`63`), and the exchange-jump request family
//! (`EXN`/`MXN`/`MAN`, opcode `26`) (`spec.md` §4.7 "CM access",
//! GLOSSARY "relocation register").
//!
//! Central-memory transfer here bypasses a CPU's `RA`/`FL`-gated
//! `ReadMem`/`WriteMem` entirely: the reference implementation's
//! `PpReadMem`/`PpWriteMem` only ever consult the model's CM-wrap
//! feature, which is exactly `CentralMemory::read_with_wrap`/
//! `write_with_wrap`'s contract, so no separate CPU-side entry point is
//! needed.

use cdc_core::{ModelFeatures, MASK18};
use cdc_cpu::{exchange_jump, CpuContext, Environment, XjOutcome};

use crate::registers::PpSlot;

const SIGN18: u32 = 0o400_000;
const MASK17: u32 = 0o377_777;
const MASK3: u32 = 0o7;
const MASK10: u32 = 0o1777;

/// `exchangeAddress` computation shared by `CRD`/`CRM`/`CWD`/`CWM` and
/// `EXN`/`MXN`/`MAN`: when `A`'s sign bit is set and the model has a
/// relocation register, the address is `R + (A & Mask17)`; otherwise
/// plain `A & Mask18`.
fn relocated_address(pp: &PpSlot, features: ModelFeatures) -> u32 {
    if pp.a & SIGN18 != 0 && features.has_relocation_reg() {
        let mut addr = pp.r.wrapping_add(pp.a & MASK17);
        if features.contains(ModelFeatures::HAS_RELOCATION_REG_SHORT) {
            addr &= MASK18 as u32;
        }
        addr
    } else {
        pp.a & (MASK18 as u32)
    }
}

fn no_wrap(env: &Environment) -> bool {
    env.features.contains(ModelFeatures::HAS_NO_CM_WRAP)
}

/// `24 LRD`: load the relocation register from `mem[opD]`/`mem[opD+1]`.
/// A no-op when `opD == 0` or the model has no relocation register.
pub fn op_lrd(pp: &mut PpSlot, features: ModelFeatures) {
    if pp.op_d == 0 {
        return;
    }
    let d = u32::from(pp.op_d);
    if features.contains(ModelFeatures::HAS_RELOCATION_REG_SHORT) {
        pp.r = (u32::from(pp.read(d)) & MASK3) << 18;
        pp.r |= (u32::from(pp.read(d + 1)) & 0o7777) << 6;
    } else if features.contains(ModelFeatures::HAS_RELOCATION_REG_LONG) {
        pp.r = (u32::from(pp.read(d)) & MASK10) << 18;
        pp.r |= (u32::from(pp.read(d + 1)) & 0o7777) << 6;
    }
}

/// `25 SRD`: store the relocation register into `mem[opD]`/`mem[opD+1]`.
pub fn op_srd(pp: &mut PpSlot, features: ModelFeatures) {
    if pp.op_d == 0 {
        return;
    }
    let d = u32::from(pp.op_d);
    if features.contains(ModelFeatures::HAS_RELOCATION_REG_SHORT) {
        pp.write(d, ((pp.r >> 18) & MASK3) as u16);
        pp.write(d + 1, ((pp.r >> 6) & 0o7777) as u16);
    } else if features.contains(ModelFeatures::HAS_RELOCATION_REG_LONG) {
        pp.write(d, ((pp.r >> 18) & MASK10) as u16);
        pp.write(d + 1, ((pp.r >> 6) & 0o7777) as u16);
    }
}

/// `60 CRD`: read one CM word into 5 consecutive PP words starting at
/// `opD`.
pub fn op_crd(pp: &mut PpSlot, env: &Environment) {
    let addr = relocated_address(pp, env.features);
    let data = env.cm.read_with_wrap(addr, no_wrap(env));
    scatter_word(pp, u32::from(pp.op_d), data);
}

/// `62 CWD`: gather 5 consecutive PP words starting at `opD` into one CM
/// write.
pub fn op_cwd(pp: &mut PpSlot, env: &Environment) {
    let data = gather_word(pp, u32::from(pp.op_d));
    let addr = relocated_address(pp, env.features);
    env.cm.write_with_wrap(addr, data, no_wrap(env));
}

/// `61 CRM`: block CM read of `mem[opD]` words into successive PP
/// locations, resuming across ticks via `busy` the way the reference
/// implementation re-enters the same handler. The PP's own `P`, saved
/// in `mem[0]` for the duration, walks the destination; `regQ` is the
/// remaining word count.
pub fn op_crm(pp: &mut PpSlot, env: &Environment) {
    if !pp.busy {
        pp.q = u32::from(pp.read(u32::from(pp.op_d)));
        pp.busy = true;
        pp.mem[0] = (pp.p & 0o7777) as u16;
        pp.p = u32::from(pp.read(pp.p));
    }
    if pp.q > 0 {
        pp.q -= 1;
        let addr = relocated_address(pp, env.features);
        let data = env.cm.read_with_wrap(addr, no_wrap(env));
        let dest = pp.p;
        scatter_word(pp, dest, data);
        pp.p = (dest + 5) & 0o7777;
        pp.a = (pp.a + 1) & (MASK18 as u32);
    }
    if pp.q == 0 {
        pp.p = u32::from(pp.mem[0]);
        pp.advance_p();
        pp.busy = false;
    }
}

/// `63 CWM`: block CM write, the mirror of `CRM`.
pub fn op_cwm(pp: &mut PpSlot, env: &Environment) {
    if !pp.busy {
        pp.q = u32::from(pp.read(u32::from(pp.op_d)));
        pp.busy = true;
        pp.mem[0] = (pp.p & 0o7777) as u16;
        pp.p = u32::from(pp.read(pp.p));
    }
    if pp.q > 0 {
        pp.q -= 1;
        let src = pp.p;
        let data = gather_word(pp, src);
        pp.p = (src + 5) & 0o7777;
        let addr = relocated_address(pp, env.features);
        env.cm.write_with_wrap(addr, data, no_wrap(env));
        pp.a = (pp.a + 1) & (MASK18 as u32);
    }
    if pp.q == 0 {
        pp.p = u32::from(pp.mem[0]);
        pp.advance_p();
        pp.busy = false;
    }
}

fn scatter_word(pp: &mut PpSlot, start: u32, data: u64) {
    pp.write(start, ((data >> 48) & 0o7777) as u16);
    pp.write(start + 1, ((data >> 36) & 0o7777) as u16);
    pp.write(start + 2, ((data >> 24) & 0o7777) as u16);
    pp.write(start + 3, ((data >> 12) & 0o7777) as u16);
    pp.write(start + 4, (data & 0o7777) as u16);
}

fn gather_word(pp: &PpSlot, start: u32) -> u64 {
    let mut data = u64::from(pp.read(start));
    data = (data << 12) | u64::from(pp.read(start + 1));
    data = (data << 12) | u64::from(pp.read(start + 2));
    data = (data << 12) | u64::from(pp.read(start + 3));
    (data << 12) | u64::from(pp.read(start + 4))
}

/// `26 EXN`/`MXN`/`MAN`: request an exchange jump on CPU `opD & 7`. Bits
/// `opD & 070` select the sub-function: `0` is plain `EXN` (no monitor
/// mode change); `010` is `MXN` (request monitor mode for this CPU);
/// `020` is `MAN` (same, jumping to that CPU's own `MA`). Any other
/// value, or a model with `HasNoCejMej`, collapses to plain `EXN`'s
/// target-address form. If another CPU already holds monitor mode, an
/// `MXN`/`MAN` request is simply retried next tick — the PP stays
/// `busy` until the exchange is accepted, mirroring the reference
/// implementation's `while (!cpu->ExchangeJump(...)) cpu->Step();` spin
/// without blocking the scheduler's round-robin.
pub fn op_exn(pp: &mut PpSlot, cpus: &mut [CpuContext], env: &Environment) {
    if cpus.is_empty() {
        return;
    }
    let cpnum = {
        let n = usize::from(pp.op_d & 0o7);
        if n >= cpus.len() { 0 } else { n }
    };
    let sub = pp.op_d & 0o70;
    let no_cej_mej = sub == 0 || env.features.contains(ModelFeatures::HAS_NO_CEJ_MEJ);

    let (addr, monitor_req, source): (u32, i8, &str) = if no_cej_mej {
        (relocated_address(pp, env.features), 2, "EXN")
    } else if env.monitor.current_owner() != -1 {
        pp.busy = true;
        return;
    } else if sub == 0o10 {
        (relocated_address(pp, env.features), cpus[cpnum].cpu_id as i8, "MXN")
    } else if sub == 0o20 {
        (cpus[cpnum].ma, cpus[cpnum].cpu_id as i8, "MAN")
    } else {
        pp.busy = false;
        return;
    };

    let outcome = exchange_jump(&mut cpus[cpnum], env, addr, monitor_req, source);
    pp.busy = outcome == XjOutcome::Rejected;
}

/// `27 RPN`: read a CPU's `P` register. Absent on Series-800 except the
/// 865 (`spec.md` §9 open question, `ModelType::has_rpn`).
pub fn op_rpn(pp: &mut PpSlot, cpus: &[CpuContext], env: &Environment) {
    if env.features.contains(ModelFeatures::IS_SERIES_800) && !env.model.has_rpn() {
        return;
    }
    if cpus.is_empty() {
        return;
    }
    let idx = usize::from(pp.op_d & 0o7) % cpus.len();
    pp.a = cpus[idx].p;
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdc_core::ModelType;

    fn env() -> Environment {
        Environment::new(ModelType::Cyber173, 4096, 0)
    }

    #[test]
    fn crd_scatters_low_60_bits_into_five_words() {
        let e = env();
        e.cm.write(10, 0o123_456_701_234_567_012);
        let mut pp = PpSlot::new(0);
        pp.a = 10;
        pp.op_d = 20;
        op_crd(&mut pp, &e);
        assert_eq!(pp.read(20), 0o1234);
        assert_eq!(pp.read(24), 0o7012);
    }

    #[test]
    fn cwd_then_crd_round_trips() {
        let e = env();
        let mut pp = PpSlot::new(0);
        pp.op_d = 5;
        for (i, w) in [0o1111u16, 0o2222, 0o3333, 0o4444, 0o5555].iter().enumerate() {
            pp.write(5 + i as u32, *w);
        }
        pp.a = 100;
        op_cwd(&mut pp, &e);
        pp.op_d = 40;
        op_crd(&mut pp, &e);
        assert_eq!(pp.read(40), 0o1111);
        assert_eq!(pp.read(44), 0o5555);
    }

    #[test]
    fn crm_transfers_exact_word_count_then_clears_busy() {
        let e = env();
        for i in 0..3u32 {
            e.cm.write(50 + i, u64::from(i) + 1);
        }
        let mut pp = PpSlot::new(0);
        pp.a = 50;
        pp.p = 0o100;
        pp.write(0o100, 3); // word count at the opD location
        pp.op_d = 0o100;
        pp.write(0o101, 0o200); // destination base, read via IndexLocation-free direct P deref
        // CRM reads its count from mem[opD], and jumps P to mem[regP] on entry.
        pp.write(0o100, 0o200);
        pp.write(0o200, 3);
        op_crm(&mut pp, &e);
        assert!(pp.busy);
        op_crm(&mut pp, &e);
        assert!(pp.busy);
        op_crm(&mut pp, &e);
        assert!(!pp.busy);
    }

    #[test]
    fn lrd_srd_round_trip_on_long_relocation_register() {
        let features = ModelFeatures::HAS_RELOCATION_REG_LONG;
        let mut pp = PpSlot::new(0);
        pp.r = 0o1234_5670;
        pp.op_d = 10;
        op_srd(&mut pp, features);
        pp.r = 0;
        op_lrd(&mut pp, features);
        assert_eq!(pp.r, 0o1234_5670 & (MASK10 << 18 | 0o7777 << 6));
    }
}
