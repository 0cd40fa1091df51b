//! Variable-length parcel decode and the 64-opcode dispatch table
//! (`spec.md` §4.2, §4.3).

use cdc_core::{
    add18, float, popcount60, shift_left_circular60, shift_right_arith60, subtract18, subtract60,
    ModelFeatures, MASK18, MASK60,
};

use crate::blockcopy;
use crate::cmu;
use crate::exchange::{self, JP_SELF_LOOP_BASE};
use crate::mem::Environment;
use crate::registers::{exit_condition, exit_mode, CpuContext};

/// Run one full instruction word: decode and execute parcels until the
/// word is exhausted, then fetch the next word. One call corresponds to
/// `spec.md` §5's "steps each CPU one instruction-word".
pub fn step(cpu: &mut CpuContext, env: &Environment) {
    if cpu.stopped {
        return;
    }
    if cpu.op_offset == 0 {
        fetch_next_word(cpu, env);
    }
    while cpu.op_offset > 0 && !cpu.stopped {
        execute_one_parcel(cpu, env);
    }
}

fn fetch_next_word(cpu: &mut CpuContext, env: &Environment) {
    let p = cpu.p;
    let has_stack = env.features.contains(ModelFeatures::HAS_INSTRUCTION_STACK);
    let hit_rank = has_stack
        .then(|| cpu.iw_stack.iter().position(|e| e.valid && e.address == p))
        .flatten();

    let word = env.read_instruction_word(cpu, p);
    if has_stack {
        match hit_rank {
            None => env.insert_instruction_word(cpu, p, word),
            Some(rank) if env.features.contains(ModelFeatures::HAS_ISTACK_PREFETCH) && rank == cpu.iw_rank => {
                prefetch_next(cpu, env, p);
            }
            Some(_) => {}
        }
    }
    cpu.op_word = word;
    cpu.op_offset = 60;
}

fn prefetch_next(cpu: &mut CpuContext, env: &Environment, p: u32) {
    let prefetch_addr = p.wrapping_add(1);
    if cpu.iw_stack.iter().any(|e| e.valid && e.address == prefetch_addr) {
        return;
    }
    let word = env.cm.read_with_wrap(prefetch_addr, env.features.contains(ModelFeatures::HAS_NO_CM_WRAP));
    let slot = (cpu.iw_rank + 1) % cpu.iw_stack.len();
    cpu.iw_stack[slot] = crate::registers::IwEntry { address: prefetch_addr, word, valid: true };
}

/// Nominal parcel length in bits for a given `fm`/`i` pair
/// (`spec.md` §4.2 step 2). The CMU family (`46`) is treated as a single
/// 30-bit parcel so its `opAddress` can carry an indirect-descriptor
/// pointer or a compact direct descriptor (`cmu.rs`).
fn nominal_length(fm: u32, i: u32) -> u32 {
    match fm {
        0o00 => 15,
        0o01 => if i <= 3 { 30 } else { 15 },
        0o02 | 0o03 | 0o04..=0o07 | 0o46 => 30,
        _ => 15,
    }
}

fn execute_one_parcel(cpu: &mut CpuContext, env: &Environment) {
    let offset = cpu.op_offset;
    let fm = ((cpu.op_word >> (offset - 6)) & 0o77) as u32;
    let i = ((cpu.op_word >> (offset - 9)) & 0o7) as u32;
    let j = ((cpu.op_word >> (offset - 12)) & 0o7) as u32;
    let length = nominal_length(fm, i);

    if length == 30 && offset == 15 {
        cpu.op_offset = 0;
        illegal_instruction(cpu, env);
        return;
    }

    let (k, op_address) = if length == 15 {
        (((cpu.op_word >> (offset - 15)) & 0o7) as u32, 0)
    } else {
        (0, ((cpu.op_word >> (offset - 30)) & 0o3_7777_7) as u32)
    };

    cpu.force_b0();
    cpu.op_offset = offset - length;
    dispatch(cpu, env, fm, i, j, k, op_address, offset);
    cpu.force_b0();

    if cpu.stopped && cpu.op_offset == 0 {
        cpu.p = cpu.p.wrapping_add(1);
    }
}

fn set_a(cpu: &mut CpuContext, idx: usize, value: u32) {
    cpu.a[idx] = value & (MASK18 as u32);
}

fn set_b(cpu: &mut CpuContext, idx: usize, value: u32) {
    cpu.b[idx] = value & (MASK18 as u32);
}

/// Void the instruction word stack unconditionally, or only if the
/// branch target is not already cached (`spec.md` §4.2/§4.3 "void
/// i-stack conditionally" / "unconditionally if StackPurge").
fn void_on_branch(cpu: &mut CpuContext, env: &Environment, target_p: u32, unconditional: bool) {
    if !env.features.contains(ModelFeatures::HAS_INSTRUCTION_STACK) {
        return;
    }
    let force = unconditional || cpu.exit_mode & exit_mode::STACK_PURGE != 0;
    if force {
        cpu.void_iw_stack();
        return;
    }
    let cached = cpu.iw_stack.iter().any(|e| e.valid && e.address == target_p);
    if !cached {
        cpu.void_iw_stack();
    }
}

fn branch_to(cpu: &mut CpuContext, env: &Environment, target: u32, unconditional_void: bool) {
    void_on_branch(cpu, env, target, unconditional_void);
    cpu.p = target;
    cpu.op_offset = 0;
}

fn illegal_instruction(cpu: &mut CpuContext, env: &Environment) {
    // IllegalInstruction has no dedicated exit-condition bit (`spec.md` §7); surfaced via error_exit alone.
    exchange::error_exit(cpu, env);
}

#[allow(clippy::too_many_lines)]
fn dispatch(cpu: &mut CpuContext, env: &Environment, fm: u32, i: u32, j: u32, k: u32, op_address: u32, entry_offset: u32) {
    match fm {
        0o00 => op_ps(cpu, env),
        0o01 => op_01(cpu, env, i, j, k, op_address),
        0o02 => {
            let target = add18(cpu.b[i as usize], op_address);
            branch_to(cpu, env, target, true);
        }
        0o03 => op_conditional_jump(cpu, env, i, j, op_address),
        0o04..=0o07 => op_compare_branch(cpu, env, fm, i, j, op_address),
        0o10..=0o17 => op_boolean(cpu, fm, i, j, k),
        0o20 => cpu.set_x(i as usize, shift_left_circular60(cpu.x(i as usize), (j << 3 | k) as u32)),
        0o21 => cpu.set_x(i as usize, shift_right_arith60(cpu.x(i as usize), (j << 3 | k) as u32)),
        0o22 => op_variable_shift(cpu, i, j, k, true),
        0o23 => op_variable_shift(cpu, i, j, k, false),
        0o24 => op_normalize(cpu, env, i, j, k, false),
        0o25 => op_normalize(cpu, env, i, j, k, true),
        0o26 => op_unpack(cpu, i, j, k),
        0o27 => op_pack(cpu, i, j, k),
        0o30 => op_float_add(cpu, env, i, j, k, false, false),
        0o31 => op_float_add(cpu, env, i, j, k, true, false),
        0o32 => op_float_add(cpu, env, i, j, k, false, false),
        0o33 => op_float_add(cpu, env, i, j, k, true, false),
        0o34 => op_float_add(cpu, env, i, j, k, false, true),
        0o35 => op_float_add(cpu, env, i, j, k, true, true),
        0o36 => cpu.set_x(i as usize, cdc_core::add60(cpu.x(j as usize), cpu.x(k as usize))),
        0o37 => cpu.set_x(i as usize, subtract60(cpu.x(j as usize), cpu.x(k as usize))),
        0o40 => op_float_multiply(cpu, env, i, j, k, false),
        0o41 => op_float_multiply(cpu, env, i, j, k, true),
        0o42 => op_float_multiply(cpu, env, i, j, k, false),
        0o43 => op_mask(cpu, i, j, k),
        0o44 => op_float_divide(cpu, env, i, j, k, false),
        0o45 => op_float_divide(cpu, env, i, j, k, true),
        0o46 => op_cmu(cpu, env, i, j, op_address, entry_offset),
        0o47 => cpu.set_x(i as usize, popcount60(cpu.x(j as usize)) as u64),
        0o50..=0o57 => op_load_a(cpu, env, fm, i, j, k),
        0o60..=0o67 => op_load_b(cpu, env, fm, i, j, k),
        0o70..=0o77 => op_load_x(cpu, fm, i, j, k),
        _ => illegal_instruction(cpu, env),
    }
}

/// `00: PS` — on series 6x00, `HasNoCejMej`, or already in monitor mode
/// the CPU simply stops; otherwise it is illegal (`spec.md` §4.3).
fn op_ps(cpu: &mut CpuContext, env: &Environment) {
    let plain_stop = env.features.intersects(ModelFeatures::IS_SERIES_6X00 | ModelFeatures::HAS_NO_CEJ_MEJ)
        || env.monitor.current_owner() == cpu.cpu_id as i8;
    if plain_stop {
        cpu.stopped = true;
    } else {
        illegal_instruction(cpu, env);
    }
}

fn op_01(cpu: &mut CpuContext, env: &Environment, i: u32, j: u32, op_address: u32) {
    match i {
        0 => op_rj(cpu, env, op_address),
        1 => blockcopy::transfer(cpu, env, cpu.b[j as usize], op_address, false, false),
        2 => blockcopy::transfer(cpu, env, cpu.b[j as usize], op_address, false, true),
        3 => {
            let exit_target = add18(op_address, cpu.b[j as usize]);
            exchange::op_xj(cpu, env, exit_target);
        }
        4 => {
            if env.model.has_rx_wx() {
                let k = j as usize;
                let word = env.read_single_word(cpu, true, (cpu.x(k) & MASK18) as u32);
                cpu.set_x(k, word);
            } else {
                illegal_instruction(cpu, env);
            }
        }
        5 => {
            if env.model.has_rx_wx() {
                let k = j as usize;
                let _dropped = env.write_single_word(cpu, true, (cpu.x(k) & MASK18) as u32, cpu.x(k));
            } else {
                illegal_instruction(cpu, env);
            }
        }
        6 => {
            if env.features.contains(ModelFeatures::HAS_MICROSECOND_CLOCK) {
                cpu.set_x(j as usize, env.read_clock());
            } else {
                illegal_instruction(cpu, env);
            }
        }
        _ => illegal_instruction(cpu, env),
    }
}

/// `01.0 RJ K` — plant a `JP P+1` return parcel at `M[K]` and jump there.
fn op_rj(cpu: &mut CpuContext, env: &Environment, k_addr: u32) {
    let return_word = (JP_SELF_LOOP_BASE | u64::from((cpu.p + 1) & (MASK18 as u32))) << 30;
    if env.write_mem(cpu, k_addr, return_word) {
        return;
    }
    branch_to(cpu, env, k_addr, true);
}

fn op_conditional_jump(cpu: &mut CpuContext, env: &Environment, condition: u32, xj: u32, op_address: u32) {
    let x = cpu.x(xj as usize);
    let special = float::float_check(x);
    let taken = match condition {
        0 => x == 0 || x == MASK60,
        1 => x != 0 && x != MASK60,
        2 => (x >> 59) & 1 == 0,
        3 => (x >> 59) & 1 == 1,
        4 => special != Some(float::FloatSpecial::Infinity),
        5 => special == Some(float::FloatSpecial::Infinity),
        6 => special != Some(float::FloatSpecial::Indefinite),
        7 => special == Some(float::FloatSpecial::Indefinite),
        _ => false,
    };
    if taken {
        branch_to(cpu, env, op_address, false);
    } else {
        cpu.op_offset = 0;
    }
}

/// `GE`/`LT` (`06`/`07`) compare the raw sign bits of `Bi`/`Bj` first;
/// only when the signs agree does the ones-complement subtraction decide
/// it, since a same-magnitude opposite-sign pair can overflow the 18-bit
/// difference and flip its sign bit.
fn op_compare_branch(cpu: &mut CpuContext, env: &Environment, fm: u32, bi: u32, bj: u32, op_address: u32) {
    let diff = subtract18(cpu.b[bi as usize], cpu.b[bj as usize]);
    let is_zero = diff == 0 || diff == (MASK18 as u64) as u32;
    let is_negative = diff & (1 << 17) != 0 && !is_zero;
    let sign_i = cpu.b[bi as usize] & (1 << 17) != 0;
    let sign_j = cpu.b[bj as usize] & (1 << 17) != 0;
    let taken = match fm {
        0o04 => is_zero,
        0o05 => !is_zero,
        0o06 if sign_i != sign_j => !sign_i,
        0o06 => !is_negative,
        0o07 if sign_i != sign_j => sign_i,
        0o07 => is_negative,
        _ => false,
    };
    if taken {
        branch_to(cpu, env, op_address, false);
    } else {
        cpu.op_offset = 0;
    }
}

fn op_boolean(cpu: &mut CpuContext, fm: u32, i: u32, j: u32, k: u32) {
    let xj = cpu.x(j as usize);
    let xk = cpu.x(k as usize);
    let result = match fm {
        0o10 => xk,
        0o11 => xj & xk,
        0o12 => xj | xk,
        0o13 => xj ^ xk,
        0o14 => (!xk) & MASK60,
        0o15 => xj & ((!xk) & MASK60),
        0o16 => xj | ((!xk) & MASK60),
        0o17 => xj ^ ((!xk) & MASK60),
        _ => 0,
    };
    cpu.set_x(i as usize, result);
}

fn signed_magnitude18(value: u32) -> (bool, u32) {
    let value = value & (MASK18 as u32);
    if value & (1 << 17) != 0 {
        (true, (!value) & (MASK18 as u32))
    } else {
        (false, value)
    }
}

fn op_variable_shift(cpu: &mut CpuContext, i: u32, bj: u32, xk: u32, circular_left: bool) {
    let (negative, magnitude) = signed_magnitude18(cpu.b[bj as usize]);
    let xk_val = cpu.x(xk as usize);
    let result = if circular_left {
        if negative {
            let count = magnitude & 0o3777;
            if count > 63 {
                0
            } else {
                shift_right_arith60(xk_val, count)
            }
        } else {
            shift_left_circular60(xk_val, magnitude % 60)
        }
    } else if magnitude > 63 {
        0
    } else if negative {
        shift_left_circular60(xk_val, magnitude % 60)
    } else {
        shift_right_arith60(xk_val, magnitude)
    };
    cpu.set_x(i as usize, result);
}

fn op_normalize(cpu: &mut CpuContext, env: &Environment, i: u32, bj: u32, xk: u32, zero_exponent: bool) {
    let operand = cpu.x(xk as usize);
    if let Some(special) = float::float_check(operand) {
        raise_float_exception(cpu, special);
    }
    let bias = if bj != 0 { sign_extend18(cpu.b[bj as usize]) } else { 0 };
    let mut decoded = float::Float::unpack(operand);
    decoded.exponent += bias as i32;
    let mut normalized = decoded.normalize();
    if zero_exponent && normalized.coeff != 0 {
        normalized.exponent = 0;
    }
    cpu.set_x(i as usize, normalized.pack());
    float_exception_handler(cpu, env);
}

fn sign_extend18(value: u32) -> i32 {
    let value = value & (MASK18 as u32);
    if value & (1 << 17) != 0 {
        (value as i32) - (1 << 18)
    } else {
        value as i32
    }
}

fn op_unpack(cpu: &mut CpuContext, i: u32, bj: u32, xk: u32) {
    let decoded = float::Float::unpack(cpu.x(xk as usize));
    if bj != 0 {
        let exp = if decoded.negative { -decoded.exponent } else { decoded.exponent };
        set_b(cpu, bj as usize, exp as u32);
    }
    cpu.set_x(i as usize, decoded.coeff);
}

fn op_pack(cpu: &mut CpuContext, i: u32, bj: u32, xk: u32) {
    let exponent = if bj != 0 { sign_extend18(cpu.b[bj as usize]) } else { 0 };
    let coeff = cpu.x(xk as usize) & ((1 << 48) - 1);
    let negative = (cpu.x(xk as usize) >> 59) & 1 != 0;
    let packed = float::Float { negative, exponent, coeff }.pack();
    cpu.set_x(i as usize, packed);
}

fn raise_float_exception(cpu: &mut CpuContext, special: float::FloatSpecial) {
    cpu.float_exception = true;
    cpu.exit_condition |= match special {
        float::FloatSpecial::Infinity => exit_condition::OPERAND_OUT_OF_RANGE,
        float::FloatSpecial::Indefinite => exit_condition::INDEFINITE_OPERAND,
    };
}

/// `FloatExceptionHandler`: after the opcode runs, perform the standard
/// error-exit sequence if the matching `exitMode` trap bit is set
/// (`spec.md` §4.3.2).
fn float_exception_handler(cpu: &mut CpuContext, env: &Environment) {
    if !cpu.float_exception {
        return;
    }
    cpu.float_exception = false;
    let trap_bit = (u32::from(cpu.exit_condition)) << 12;
    if cpu.exit_mode & trap_bit != 0 {
        exchange::error_exit(cpu, env);
    }
}

fn op_float_add(cpu: &mut CpuContext, env: &Environment, i: u32, j: u32, k: u32, subtract: bool, round: bool) {
    let a = cpu.x(j as usize);
    let b = cpu.x(k as usize);
    if let Some(s) = float::float_check(a) {
        raise_float_exception(cpu, s);
    }
    if let Some(s) = float::float_check(b) {
        raise_float_exception(cpu, s);
    }
    cpu.set_x(i as usize, float::float_add(a, b, subtract, round));
    float_exception_handler(cpu, env);
}

fn op_float_multiply(cpu: &mut CpuContext, env: &Environment, i: u32, j: u32, k: u32, round: bool) {
    let a = cpu.x(j as usize);
    let b = cpu.x(k as usize);
    if let Some(s) = float::float_check(a) {
        raise_float_exception(cpu, s);
    }
    if let Some(s) = float::float_check(b) {
        raise_float_exception(cpu, s);
    }
    cpu.set_x(i as usize, float::float_multiply(a, b, round));
    float_exception_handler(cpu, env);
}

fn op_float_divide(cpu: &mut CpuContext, env: &Environment, i: u32, j: u32, k: u32, round: bool) {
    let a = cpu.x(j as usize);
    let b = cpu.x(k as usize);
    if let Some(s) = float::float_check(a) {
        raise_float_exception(cpu, s);
    }
    if let Some(s) = float::float_check(b) {
        raise_float_exception(cpu, s);
    }
    let result = float::float_divide(a, b, round);
    if b == 0 {
        raise_float_exception(cpu, float::FloatSpecial::Indefinite);
    }
    cpu.set_x(i as usize, result);
    float_exception_handler(cpu, env);
}

fn op_mask(cpu: &mut CpuContext, i: u32, j: u32, k: u32) {
    let count = (j << 3 | k) as u32;
    let value = if count == 0 {
        0
    } else if count >= 60 {
        MASK60
    } else {
        ((!0u64) << (60 - count)) & MASK60
    };
    cpu.set_x(i as usize, value);
}

fn op_cmu(cpu: &mut CpuContext, env: &Environment, i: u32, j: u32, op_address: u32, entry_offset: u32) {
    if !env.features.contains(ModelFeatures::HAS_CMU) {
        illegal_instruction(cpu, env);
        return;
    }
    if entry_offset != 60 {
        if env.features.contains(ModelFeatures::IS_SERIES_70) {
            return;
        }
        illegal_instruction(cpu, env);
        return;
    }
    match i {
        4 => cmu::move_indirect(cpu, env, cpu.b[j as usize], op_address),
        5 => op_cmu_move_direct(cpu, env, j, op_address),
        6 | 7 => op_cmu_compare(cpu, env, i, j, op_address),
        _ => {}
    }
}

fn op_cmu_move_direct(cpu: &mut CpuContext, env: &Environment, bj: u32, op_address: u32) {
    cmu::move_direct(cpu, env, cpu.b[bj as usize], cpu.b[bj as usize], op_address);
}

fn op_cmu_compare(cpu: &mut CpuContext, env: &Environment, i: u32, bj: u32, op_address: u32) {
    let descriptor_addr = add18(cpu.b[bj as usize], op_address);
    let Some(desc_word) = env.read_mem(cpu, descriptor_addr) else { return };
    let d = cmu::decode_descriptor(desc_word);
    let result = cmu::compare(cpu, env, d, i == 6, cpu.a[0]);
    cpu.set_x(0, result);
}

fn sum_or_difference(cpu: &CpuContext, i: u32, j: u32, k: u32) -> u32 {
    if k & 1 == 0 {
        add18(cpu.b[i as usize], cpu.b[j as usize])
    } else {
        subtract18(cpu.b[i as usize], cpu.b[j as usize])
    }
}

/// `50..57 SAi` — `reg` (0..7, `fm & 7`) selects the target A register;
/// `i`/`j` select the two B-register operands summed or differenced
/// (`k`'s low bit selects the operation) into `A[reg]`, which for
/// `reg` 1..5 triggers a read of `M[A[reg]]` into `X[reg]` and for
/// `reg` 6..7 a write of `X[reg]` to `M[A[reg]]` (`spec.md` §4.3.1).
fn op_load_a(cpu: &mut CpuContext, env: &Environment, fm: u32, i: u32, j: u32, k: u32) {
    let reg = (fm & 0o7) as usize;
    let value = sum_or_difference(cpu, i, j, k);
    set_a(cpu, reg, value);
    match reg {
        1..=5 => {
            if let Some(word) = env.read_mem(cpu, cpu.a[reg]) {
                cpu.set_x(reg, word);
            }
        }
        6 | 7 => {
            if cpu.exit_mode & exit_mode::STACK_PURGE != 0 {
                cpu.void_iw_stack();
            }
            let _ = env.write_mem(cpu, cpu.a[reg], cpu.x(reg));
        }
        _ => {}
    }
}

/// `60..67 SBi`, with the Series-800 `CR`/`CW` override at `66.0`/`67.0`
/// (`spec.md` §4.3 and §9 open question — model-specific, not
/// feature-flag-driven).
fn op_load_b(cpu: &mut CpuContext, env: &Environment, fm: u32, i: u32, j: u32, k: u32) {
    let series_800 = env.features.contains(ModelFeatures::IS_SERIES_800);
    if series_800 && fm == 0o66 && i == 0 {
        let addr = (cpu.x(k as usize) & ((1 << 21) - 1)) as u32;
        let word = env.cm.read_with_wrap(addr, env.features.contains(ModelFeatures::HAS_NO_CM_WRAP));
        cpu.set_x(j as usize, word);
        return;
    }
    if series_800 && fm == 0o67 && i == 0 {
        let addr = (cpu.x(k as usize) & ((1 << 21) - 1)) as u32;
        env.cm.write_with_wrap(addr, cpu.x(j as usize), env.features.contains(ModelFeatures::HAS_NO_CM_WRAP));
        return;
    }
    let reg = (fm & 0o7) as usize;
    let value = sum_or_difference(cpu, i, j, k);
    set_b(cpu, reg, value);
}

/// `70..77 SXi` — sign-extend the 18-bit sum/difference into `X[reg]`.
fn op_load_x(cpu: &mut CpuContext, fm: u32, i: u32, j: u32, k: u32) {
    let reg = (fm & 0o7) as usize;
    let value = sum_or_difference(cpu, i, j, k);
    let extended = sign_extend18(value) as i64 as u64;
    cpu.set_x(reg, extended & MASK60);
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdc_core::ModelType;

    fn env(model: ModelType) -> Environment {
        Environment::new(model, 4096, 1024)
    }

    fn word_from_parcel(fm: u32, i: u32, j: u32, k: u32) -> u64 {
        ((fm as u64) << 9 | (i as u64) << 6 | (j as u64) << 3 | k as u64) << 45
    }

    #[test]
    fn b0_is_zero_after_every_instruction() {
        let env = env(ModelType::Cyber173);
        let mut cpu = CpuContext::new(0);
        cpu.stopped = false;
        cpu.p = 0;
        cpu.b[0] = 0o777; // tamper, must be forced back to zero
        cpu.op_word = word_from_parcel(0o10, 1, 2, 3); // BX X1 := X3
        cpu.op_offset = 60;
        execute_one_parcel(&mut cpu, &env);
        assert_eq!(cpu.b[0], 0);
    }

    #[test]
    fn boolean_transfer_copies_xk_into_xi() {
        let env = env(ModelType::Cyber173);
        let mut cpu = CpuContext::new(0);
        cpu.x[3] = 0o123;
        op_boolean(&mut cpu, 0o10, 1, 0, 3);
        assert_eq!(cpu.x[1], 0o123);
    }

    #[test]
    fn popcount_opcode_matches_primitive() {
        let env = env(ModelType::Cyber173);
        let mut cpu = CpuContext::new(0);
        cpu.stopped = false;
        cpu.x[2] = MASK60;
        dispatch(&mut cpu, &env, 0o47, 1, 2, 0, 0, 60);
        assert_eq!(cpu.x[1], 60);
    }

    #[test]
    fn conditional_jump_zero_takes_branch_when_x_is_zero() {
        let env = env(ModelType::Cyber173);
        let mut cpu = CpuContext::new(0);
        cpu.x[5] = 0;
        op_conditional_jump(&mut cpu, &env, 0, 5, 0o1234);
        assert_eq!(cpu.p, 0o1234);
    }

    #[test]
    fn jp_voids_istack_unconditionally() {
        let env = env(ModelType::Cyber175);
        let mut cpu = CpuContext::new(0);
        cpu.iw_stack[0] = crate::registers::IwEntry { address: 5, word: 0, valid: true };
        dispatch(&mut cpu, &env, 0o02, 0, 0, 0, 5, 60);
        assert!(!cpu.iw_stack[0].valid);
        assert_eq!(cpu.p, 5);
    }

    #[test]
    fn illegal_packing_at_offset_15_stops_cpu() {
        let env = env(ModelType::Cyber173);
        let mut cpu = CpuContext::new(0);
        cpu.stopped = false;
        cpu.op_offset = 15;
        // fm=02 (a 30-bit opcode) packed into the final 15-bit slot: illegal.
        cpu.op_word = (0o02u64 << 9) & MASK60;
        execute_one_parcel(&mut cpu, &env);
        assert!(cpu.stopped);
    }

    #[test]
    fn cmu_illegal_on_model_without_support() {
        let env = env(ModelType::Model6400);
        let mut cpu = CpuContext::new(0);
        cpu.stopped = false;
        op_cmu(&mut cpu, &env, 4, 0, 0, 60);
        assert!(cpu.stopped);
    }

    #[test]
    fn mask_opcode_sets_high_bits() {
        let mut cpu = CpuContext::new(0);
        op_mask(&mut cpu, 1, 0, 3);
        assert_eq!(cpu.x[1], 0b111 << 57);
    }

    #[test]
    fn sa0_has_no_memory_side_effect() {
        let env = env(ModelType::Cyber173);
        let mut cpu = CpuContext::new(0);
        cpu.fl_cm = 1000;
        cpu.b[1] = 5;
        cpu.b[2] = 0;
        op_load_a(&mut cpu, &env, 0o50, 1, 2, 0);
        assert_eq!(cpu.a[0], 5);
        assert_eq!(cpu.x[0], 0);
    }

    #[test]
    fn sa1_read_triggers_memory_load() {
        let env = env(ModelType::Cyber173);
        let mut cpu = CpuContext::new(0);
        cpu.fl_cm = 1000;
        env.write_mem(&mut cpu, 5, 0o424242);
        cpu.b[1] = 5;
        cpu.b[2] = 0;
        op_load_a(&mut cpu, &env, 0o51, 1, 2, 0);
        assert_eq!(cpu.a[1], 5);
        assert_eq!(cpu.x[1], 0o424242);
    }

    #[test]
    fn conditional_jump_pl_takes_positive_zero() {
        let env = env(ModelType::Cyber173);
        let mut cpu = CpuContext::new(0);
        cpu.x[5] = 0;
        op_conditional_jump(&mut cpu, &env, 2, 5, 0o1234);
        assert_eq!(cpu.p, 0o1234);
    }

    #[test]
    fn conditional_jump_ng_takes_negative_zero() {
        let env = env(ModelType::Cyber173);
        let mut cpu = CpuContext::new(0);
        cpu.x[5] = MASK60;
        op_conditional_jump(&mut cpu, &env, 3, 5, 0o1234);
        assert_eq!(cpu.p, 0o1234);
    }

    #[test]
    fn conditional_jump_ir_takes_indefinite() {
        let env = env(ModelType::Cyber173);
        let mut cpu = CpuContext::new(0);
        cpu.x[5] = 0o1777u64 << 48;
        op_conditional_jump(&mut cpu, &env, 4, 5, 0o1234);
        assert_eq!(cpu.p, 0o1234);
    }

    #[test]
    fn conditional_jump_ir_rejects_infinity() {
        let env = env(ModelType::Cyber173);
        let mut cpu = CpuContext::new(0);
        cpu.x[5] = 0o3777u64 << 48;
        cpu.op_offset = 15;
        op_conditional_jump(&mut cpu, &env, 4, 5, 0o1234);
        assert_eq!(cpu.op_offset, 0);
    }

    #[test]
    fn compare_branch_ge_handles_opposite_sign_overflow() {
        let env = env(ModelType::Cyber173);
        let mut cpu = CpuContext::new(0);
        cpu.b[1] = 0o377777;
        cpu.b[2] = 0o400000;
        cpu.op_offset = 15;
        op_compare_branch(&mut cpu, &env, 0o06, 1, 2, 0o1234);
        assert_eq!(cpu.p, 0o1234);
    }

    #[test]
    fn compare_branch_lt_handles_opposite_sign_overflow() {
        let env = env(ModelType::Cyber173);
        let mut cpu = CpuContext::new(0);
        cpu.b[1] = 0o377777;
        cpu.b[2] = 0o400000;
        cpu.op_offset = 15;
        op_compare_branch(&mut cpu, &env, 0o07, 1, 2, 0o1234);
        assert_eq!(cpu.op_offset, 0);
    }

    #[test]
    fn variable_shift_lx_negative_bj_is_arithmetic_right() {
        let mut cpu = CpuContext::new(0);
        cpu.x[3] = 1u64 << 59;
        cpu.b[2] = (!2u32) & 0o777_777;
        op_variable_shift(&mut cpu, 1, 2, 3, true);
        assert_eq!(cpu.x[1], MASK60 & (0o7u64 << 57));
    }

    #[test]
    fn variable_shift_lx_negative_bj_beyond_63_is_zero() {
        let mut cpu = CpuContext::new(0);
        cpu.x[3] = MASK60;
        cpu.b[2] = (!100u32) & 0o777_777;
        op_variable_shift(&mut cpu, 1, 2, 3, true);
        assert_eq!(cpu.x[1], 0);
    }
}
