//! The 64 PP opcodes: jumps, no-address/constant arithmetic, direct/
//! indirect/indexed memory, channel-wait, and channel I/O
//! (`spec.md` §4.7). Opcodes `24`/`25`/`26`/`27`/`60`-`63` (relocation
//! register, exchange request, CPU memory transfer) live in
//! `memxfer.rs`; this module wires them into the same 64-entry dispatch
//! as everything else.

use cdc_core::{add18, subtract18, ModelFeatures, MASK18};
use cdc_cpu::{CpuContext, Environment};

use cdc_channel::Channel;

use crate::memxfer;
use crate::registers::PpSlot;

/// `Increment(word)` masked to 12 bits, used throughout the decoder.
fn increment12(word: u32) -> u32 {
    (word + 1) & 0o7777
}

/// `AddOffset(to, from)` (`Mpp.cpp`): the short-jump displacement used by
/// `UJN`/`ZJN`/`NJN`/`PJN`/`MJN`. `from < 040` adds directly; otherwise it
/// is treated as a negative displacement biased by `077`. The extra `+1`
/// when the result's bit 12 is set absorbs the `-1` bias applied up
/// front, reproduced bit-for-bit rather than re-derived (`spec.md` §9
/// design notes, SPEC_FULL §F.1).
fn add_offset(p: u32, from: u8) -> u32 {
    let mut to = p.wrapping_sub(1) & 0o7777;
    let from = u32::from(from);
    if from < 0o40 {
        to = to.wrapping_add(from);
    } else {
        to = to.wrapping_add(from).wrapping_sub(0o77);
    }
    if to & 0o10000 != 0 {
        to = to.wrapping_add(1);
    }
    to & 0o7777
}

/// `IndexLocation` (`Mpp.cpp`): `LJM`/`RJM`/the indexed memory group all
/// read the operand word at `mem[P]`, optionally adding `mem[opD]` when
/// `opD != 0`, then apply the same overflow/`07777` correction before
/// advancing `P` past the operand word.
fn index_location(pp: &mut PpSlot) -> u32 {
    let mut location = if pp.op_d != 0 {
        u32::from(pp.read(u32::from(pp.op_d))) + u32::from(pp.read(pp.p))
    } else {
        u32::from(pp.read(pp.p))
    };
    if location & 0o10000 != 0 || (location & 0o7777) == 0o7777 {
        location += 1;
    }
    location &= 0o7777;
    pp.advance_p();
    location
}

/// Fetch the next PP word as a branch target for `AJM`/`IJM`/`FJM`/`EJM`,
/// which (unlike `LJM`/`RJM`) never index it against `mem[opD]`.
fn fetch_target(pp: &mut PpSlot) -> u32 {
    let target = u32::from(pp.read(pp.p)) & 0o7777;
    pp.advance_p();
    target
}

/// Run one PP tick: decode a fresh instruction when not mid-opcode, or
/// resume the opcode already latched in `op_f`/`op_d` (`spec.md` §4.7
/// "when busy ... it resumes the same opcode handler").
pub fn step(pp: &mut PpSlot, channels: &mut [Channel], cpus: &mut [CpuContext], env: &Environment) {
    if !pp.busy {
        let word = pp.fetch();
        pp.op_f = ((word >> 6) & 0o77) as u8;
        pp.op_d = (word & 0o77) as u8;
    }
    dispatch(pp, channels, cpus, env);
}

#[allow(clippy::too_many_lines)]
fn dispatch(pp: &mut PpSlot, channels: &mut [Channel], cpus: &mut [CpuContext], env: &Environment) {
    match pp.op_f {
        0o00 => {}
        0o01 => op_ljm(pp),
        0o02 => op_rjm(pp),
        0o03 => pp.p = add_offset(pp.p, pp.op_d),
        0o04 => {
            if pp.a == 0 {
                pp.p = add_offset(pp.p, pp.op_d);
            }
        }
        0o05 => {
            if pp.a != 0 {
                pp.p = add_offset(pp.p, pp.op_d);
            }
        }
        0o06 => {
            if pp.a < 0o400_000 {
                pp.p = add_offset(pp.p, pp.op_d);
            }
        }
        0o07 => {
            if pp.a > 0o377_777 {
                pp.p = add_offset(pp.p, pp.op_d);
            }
        }
        0o10 => op_shn(pp),
        0o11 => pp.a ^= u32::from(pp.op_d),
        0o12 => pp.a &= u32::from(pp.op_d),
        0o13 => pp.a &= !u32::from(pp.op_d),
        0o14 => pp.a = u32::from(pp.op_d),
        0o15 => pp.a = !u32::from(pp.op_d) & (MASK18 as u32),
        0o16 => pp.a = add18(pp.a, u32::from(pp.op_d)),
        0o17 => pp.a = subtract18(pp.a, u32::from(pp.op_d)),
        0o20 => pp.a = fetch_constant(pp),
        0o21 => {
            let c = fetch_constant(pp);
            pp.a = add18(pp.a, c);
        }
        0o22 => pp.a &= fetch_constant(pp),
        0o23 => pp.a ^= fetch_constant(pp),
        0o24 => memxfer::op_lrd(pp, env.features),
        0o25 => memxfer::op_srd(pp, env.features),
        0o26 => memxfer::op_exn(pp, cpus, env),
        0o27 => memxfer::op_rpn(pp, cpus, env),
        0o30..=0o37 => op_memory_group(pp, AddrMode::Direct),
        0o40..=0o47 => op_memory_group(pp, AddrMode::Indirect),
        0o50..=0o57 => op_memory_group(pp, AddrMode::Indexed),
        0o60 => memxfer::op_crd(pp, env),
        0o61 => memxfer::op_crm(pp, env),
        0o62 => memxfer::op_cwd(pp, env),
        0o63 => memxfer::op_cwm(pp, env),
        0o64 => op_ajm(pp, channels, env),
        0o65 => op_ijm(pp, channels, env),
        0o66 => op_fjm(pp, channels, env),
        0o67 => op_ejm(pp, channels, env),
        0o70 => op_ian(pp, channels),
        0o71 => op_iam(pp, channels),
        0o72 => op_oan(pp, channels),
        0o73 => op_oam(pp, channels),
        0o74 => op_acn(pp, channels),
        0o75 => op_dcn(pp, channels),
        0o76 => op_fan(pp, channels),
        0o77 => op_fnc(pp, channels),
        _ => unreachable!("opF is masked to 6 bits"),
    }
}

/// `01 LJM` — long jump memory.
fn op_ljm(pp: &mut PpSlot) {
    pp.p = index_location(pp);
}

/// `02 RJM` — return jump memory: plant the post-operand `P` at the
/// target and jump one past it.
fn op_rjm(pp: &mut PpSlot) {
    let location = index_location(pp);
    pp.write(location, (pp.p & 0o7777) as u16);
    pp.p = increment12(location);
}

/// `10 SHN` — circular-left shift for `opD < 040`, else a plain
/// (non-circular) right shift by `077 - opD` bits.
fn op_shn(pp: &mut PpSlot) {
    let d = u32::from(pp.op_d);
    if d < 0o40 {
        let n = d % 18;
        let acc = u64::from(pp.a & 0o777_777) << n;
        pp.a = ((acc & 0o777_777) | (acc >> 18)) as u32;
    } else {
        let n = 0o77 - d;
        pp.a >>= n;
    }
}

/// `20..23`: the immediate constant is `opD << 12 | mem[P]`, consuming
/// one extra instruction word.
fn fetch_constant(pp: &mut PpSlot) -> u32 {
    let low = u32::from(pp.read(pp.p));
    pp.advance_p();
    (u32::from(pp.op_d) << 12) | low
}

/// Address-resolution mode for the `30..57` direct/indirect/indexed
/// memory group, which otherwise share identical opcode bodies.
enum AddrMode {
    Direct,
    Indirect,
    Indexed,
}

/// `30..57 LDx/ADx/SBx/LMx/STx/RAx/AOx/SOx`: the 8 memory opcodes,
/// repeated identically across direct (`opD` is the address), indirect
/// (`mem[opD]` is the address), and indexed (`IndexLocation`) addressing.
fn op_memory_group(pp: &mut PpSlot, mode: AddrMode) {
    let addr = match mode {
        AddrMode::Direct => u32::from(pp.op_d),
        AddrMode::Indirect => u32::from(pp.read(u32::from(pp.op_d))) & 0o7777,
        AddrMode::Indexed => index_location(pp),
    };
    match pp.op_f & 0o7 {
        0 => pp.a = u32::from(pp.read(addr)) & 0o7777, // LD
        1 => pp.a = add18(pp.a, u32::from(pp.read(addr)) & 0o7777), // AD
        2 => pp.a = subtract18(pp.a, u32::from(pp.read(addr)) & 0o7777), // SB
        3 => {
            pp.a ^= u32::from(pp.read(addr)) & 0o7777; // LM
            pp.a &= MASK18 as u32;
        }
        4 => pp.write(addr, (pp.a & 0o7777) as u16), // ST
        5 => {
            pp.a = add18(pp.a, u32::from(pp.read(addr)) & 0o7777); // RA
            pp.write(addr, (pp.a & 0o7777) as u16);
        }
        6 => {
            pp.a = add18(u32::from(pp.read(addr)) & 0o7777, 1); // AO
            pp.write(addr, (pp.a & 0o7777) as u16);
        }
        7 => {
            pp.a = subtract18(u32::from(pp.read(addr)) & 0o7777, 1); // SO
            pp.write(addr, (pp.a & 0o7777) as u16);
        }
        _ => unreachable!(),
    }
}

fn channel_index(op_d: u8) -> usize {
    usize::from(op_d & 0o37)
}

/// `64 AJM` / `SCF` — jump if channel active, or (with the hang bit and
/// `HasChannelFlag`) set-and-test the channel's software flag.
fn op_ajm(pp: &mut PpSlot, channels: &mut [Channel], env: &Environment) {
    let target = fetch_target(pp);
    if pp.op_d & 0o40 != 0 && env.features.contains(ModelFeatures::HAS_CHANNEL_FLAG) {
        if let Some(ch) = channels.get_mut(channel_index(pp.op_d)) {
            if ch.slot.flag {
                pp.p = target;
            } else {
                ch.slot.flag = true;
            }
        }
        return;
    }
    if let Some(ch) = channels.get_mut(channel_index(pp.op_d)) {
        if ch.check_if_active() {
            pp.p = target;
        }
    }
}

/// `65 IJM` / `CCF` — jump if channel inactive, or clear the channel
/// flag.
fn op_ijm(pp: &mut PpSlot, channels: &mut [Channel], env: &Environment) {
    let target = fetch_target(pp);
    if pp.op_d & 0o40 != 0 && env.features.contains(ModelFeatures::HAS_CHANNEL_FLAG) {
        if let Some(ch) = channels.get_mut(channel_index(pp.op_d)) {
            ch.slot.flag = false;
        }
        return;
    }
    let idx = channel_index(pp.op_d);
    match channels.get_mut(idx) {
        None => pp.p = target,
        Some(ch) => {
            if !ch.check_if_active() {
                pp.p = target;
            }
        }
    }
}

/// `66 FJM` / `SFM` — jump if channel full, or (no errors modeled) pass.
fn op_fjm(pp: &mut PpSlot, channels: &mut [Channel], env: &Environment) {
    let target = fetch_target(pp);
    if pp.op_d & 0o40 != 0 && env.features.contains(ModelFeatures::HAS_ERROR_FLAG) {
        return;
    }
    if let Some(ch) = channels.get_mut(channel_index(pp.op_d)) {
        ch.run_io();
        if ch.check_if_full() {
            pp.p = target;
        }
    }
}

/// `67 EJM` / `CFM` — jump if channel empty, or (no errors modeled)
/// unconditional jump.
fn op_ejm(pp: &mut PpSlot, channels: &mut [Channel], env: &Environment) {
    let target = fetch_target(pp);
    if pp.op_d & 0o40 != 0 && env.features.contains(ModelFeatures::HAS_ERROR_FLAG) {
        if channels.get(channel_index(pp.op_d)).is_some() {
            pp.p = target;
        }
        return;
    }
    let idx = channel_index(pp.op_d);
    match channels.get_mut(idx) {
        None => pp.p = target,
        Some(ch) => {
            ch.run_io();
            if !ch.check_if_full() {
                pp.p = target;
            }
        }
    }
}

/// `70 IAN` — input one word to `A`. The clock channel is always treated
/// as full regardless of `active` (`spec.md` §4.7 step 4).
fn op_ian(pp: &mut PpSlot, channels: &mut [Channel]) {
    let idx = channel_index(pp.op_d);
    if !pp.busy {
        if let Some(ch) = channels.get_mut(idx) {
            ch.slot.delay_status = 0;
        }
    }
    let no_hang = pp.op_d & 0o40 != 0;
    pp.busy = true;
    let Some(ch) = channels.get_mut(idx) else {
        pp.busy = false;
        return;
    };
    let active = ch.check_if_active();
    if !active && !ch.slot.is_clock {
        if no_hang {
            pp.a = 0;
            pp.busy = false;
        }
        return;
    }
    if !ch.check_if_full() {
        ch.run_io();
    }
    if ch.check_if_full() || ch.slot.is_clock {
        ch.channel_in();
        let data = ch.slot.data;
        ch.set_empty();
        pp.a = u32::from(data) & 0o7777;
        ch.slot.input_pending = false;
        if ch.slot.disc_after_input {
            ch.slot.disc_after_input = false;
            ch.slot.delay_disconnect = 0;
            ch.slot.active = false;
            ch.deselect();
        }
        pp.busy = false;
    }
}

/// `71 IAM` — input `A` words into `mem[m..]`, resuming across ticks.
fn op_iam(pp: &mut PpSlot, channels: &mut [Channel]) {
    let idx = channel_index(pp.op_d);
    if !pp.busy {
        pp.busy = true;
        pp.mem[0] = (pp.p & 0o7777) as u16;
        pp.p = u32::from(pp.read(pp.p));
        if let Some(ch) = channels.get_mut(idx) {
            ch.slot.delay_status = 0;
        }
    }
    let Some(ch) = channels.get_mut(idx) else {
        pp.busy = false;
        return;
    };
    if !ch.check_if_active() {
        if !ch.slot.hardwired {
            ch.deselect();
        }
        ch.slot.full = false;
        pp.write(pp.p, 0);
        pp.p = u32::from(pp.mem[0]);
        pp.advance_p();
        pp.busy = false;
        return;
    }
    if !ch.check_if_full() {
        ch.run_io();
    }
    if ch.check_if_full() || ch.slot.is_clock {
        ch.channel_in();
        let data = ch.slot.data;
        ch.set_empty();
        pp.write(pp.p, data);
        pp.p = (pp.p + 1) & 0o7777;
        pp.a = pp.a.wrapping_sub(1) & (MASK18 as u32);
        ch.slot.input_pending = false;
        if ch.slot.disc_after_input {
            ch.slot.disc_after_input = false;
            ch.slot.delay_disconnect = 0;
            ch.slot.active = false;
            ch.deselect();
            if pp.a != 0 {
                pp.write(pp.p, 0);
            }
            pp.p = u32::from(pp.mem[0]);
            pp.advance_p();
            pp.busy = false;
        } else if pp.a == 0 {
            pp.p = u32::from(pp.mem[0]);
            pp.advance_p();
            pp.busy = false;
        }
    }
}

/// `72 OAN` — output one word from `A`.
fn op_oan(pp: &mut PpSlot, channels: &mut [Channel]) {
    let idx = channel_index(pp.op_d);
    if !pp.busy {
        if let Some(ch) = channels.get_mut(idx) {
            ch.slot.delay_status = 0;
        }
    }
    let no_hang = pp.op_d & 0o40 != 0;
    pp.busy = true;
    let Some(ch) = channels.get_mut(idx) else {
        pp.busy = false;
        return;
    };
    if !ch.check_if_active() {
        if no_hang {
            pp.busy = false;
        }
        return;
    }
    if !ch.check_if_full() {
        let word = (pp.a & 0o7777) as u16;
        ch.channel_out(word);
        ch.set_full();
        pp.busy = false;
    }
    ch.run_io();
}

/// `73 OAM` — output `A` words from `mem[m..]`, resuming across ticks.
fn op_oam(pp: &mut PpSlot, channels: &mut [Channel]) {
    let idx = channel_index(pp.op_d);
    if !pp.busy {
        pp.busy = true;
        pp.mem[0] = (pp.p & 0o7777) as u16;
        pp.p = u32::from(pp.read(pp.p));
        if let Some(ch) = channels.get_mut(idx) {
            ch.slot.delay_status = 0;
        }
    }
    let Some(ch) = channels.get_mut(idx) else {
        pp.busy = false;
        return;
    };
    if !ch.check_if_active() {
        if !ch.slot.hardwired {
            ch.deselect();
        }
        ch.slot.full = false;
        pp.p = u32::from(pp.mem[0]);
        pp.advance_p();
        pp.busy = false;
        return;
    }
    if !ch.check_if_full() {
        let word = pp.read(pp.p);
        pp.p = (pp.p + 1) & 0o7777;
        pp.a = pp.a.wrapping_sub(1) & (MASK18 as u32);
        ch.channel_out(word);
        ch.set_full();
        if pp.a == 0 {
            pp.p = u32::from(pp.mem[0]);
            pp.advance_p();
            pp.busy = false;
        }
    }
    ch.run_io();
}

/// `74 ACN` — activate channel; blocks (or, with the hang bit, gives up)
/// while the channel is already active.
fn op_acn(pp: &mut PpSlot, channels: &mut [Channel]) {
    let idx = channel_index(pp.op_d);
    let no_hang = pp.op_d & 0o40 != 0;
    let Some(ch) = channels.get_mut(idx) else {
        pp.busy = false;
        return;
    };
    if ch.check_if_active() {
        pp.busy = !no_hang;
        return;
    }
    ch.activate();
    pp.busy = false;
}

/// `75 DCN` — deactivate channel. The clock, interlock, and status/
/// control channels can never be deactivated (`ChSlot::hardwired`).
fn op_dcn(pp: &mut PpSlot, channels: &mut [Channel]) {
    let idx = channel_index(pp.op_d);
    let Some(ch) = channels.get_mut(idx) else {
        pp.busy = false;
        return;
    };
    if ch.slot.hardwired {
        return;
    }
    let no_hang = pp.op_d & 0o40 != 0;
    if !ch.check_if_active() {
        pp.busy = !no_hang;
        return;
    }
    ch.disconnect();
    pp.busy = false;
}

/// `76 FAN` — function from `A`. The interlock register channel ignores
/// function codes entirely.
fn op_fan(pp: &mut PpSlot, channels: &mut [Channel]) {
    let idx = channel_index(pp.op_d);
    let Some(ch) = channels.get_mut(idx) else {
        pp.busy = false;
        return;
    };
    if ch.slot.id == cdc_channel::special::INTERLOCK {
        return;
    }
    let no_hang = pp.op_d & 0o40 != 0;
    if ch.check_if_active() {
        pp.busy = !no_hang;
        return;
    }
    let code = (pp.a & 0o7777) as u16;
    ch.dispatch_function(code);
    pp.busy = false;
}

/// `77 FNC` — function from `mem[P]`.
fn op_fnc(pp: &mut PpSlot, channels: &mut [Channel]) {
    let idx = channel_index(pp.op_d);
    let Some(ch) = channels.get_mut(idx) else {
        pp.busy = false;
        return;
    };
    if ch.slot.id == cdc_channel::special::INTERLOCK {
        return;
    }
    let no_hang = pp.op_d & 0o40 != 0;
    if ch.check_if_active() {
        pp.busy = !no_hang;
        return;
    }
    let code = pp.read(pp.p);
    pp.advance_p();
    ch.dispatch_function(code);
    pp.busy = false;
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdc_channel::DeadstartPanel;
    use cdc_core::ModelType;

    fn env() -> Environment {
        Environment::new(ModelType::Cyber173, 4096, 0)
    }

    fn word(op_f: u8, op_d: u8) -> u16 {
        (u16::from(op_f) << 6) | u16::from(op_d)
    }

    #[test]
    fn ujn_short_jump_advances_by_displacement() {
        let mut pp = PpSlot::new(0);
        pp.p = 10;
        pp.write(10, word(0o03, 5));
        step(&mut pp, &mut [], &mut [], &env());
        assert_eq!(pp.p, 15);
    }

    #[test]
    fn ldc_loads_18_bit_constant_across_two_words() {
        let mut pp = PpSlot::new(0);
        pp.p = 0;
        pp.write(0, word(0o20, 0o17));
        pp.write(1, 0o4321);
        step(&mut pp, &mut [], &mut [], &env());
        assert_eq!(pp.a, (0o17u32 << 12) | 0o4321);
        assert_eq!(pp.p, 2);
    }

    #[test]
    fn std_then_ldd_round_trips_through_direct_memory() {
        let mut pp = PpSlot::new(0);
        pp.a = 0o777;
        pp.p = 0;
        pp.write(0, word(0o34, 10)); // STD 10
        step(&mut pp, &mut [], &mut [], &env());
        pp.a = 0;
        pp.write(1, word(0o30, 10)); // LDD 10
        step(&mut pp, &mut [], &mut [], &env());
        assert_eq!(pp.a, 0o777);
    }

    #[test]
    fn aod_increments_memory_and_loads_result_into_a() {
        let mut pp = PpSlot::new(0);
        pp.write(5, 41);
        pp.p = 0;
        pp.write(0, word(0o36, 5)); // AOD 5
        step(&mut pp, &mut [], &mut [], &env());
        assert_eq!(pp.read(5), 42);
        assert_eq!(pp.a, 42);
    }

    #[test]
    fn iam_drains_deadstart_deck_into_pp_memory() {
        let mut pp = PpSlot::new(0);
        pp.a = 5;
        pp.p = 0o100;
        pp.write(0o100, 0o200); // destination base, indirect via regP
        let mut ch = Channel::new(0);
        ch.attach(Box::new(DeadstartPanel::new(vec![0o7433, 0o7432, 0o7431, 0o7430, 0])));
        ch.dispatch_function(0);
        ch.activate();
        pp.op_d = 0;
        pp.busy = false;
        for _ in 0..5 {
            op_iam(&mut pp, std::slice::from_mut(&mut ch));
        }
        assert_eq!(pp.a, 0);
        assert!(!pp.busy);
        assert_eq!(pp.read(0o200), 0o7433);
        assert_eq!(pp.read(0o204), 0);
    }
}
