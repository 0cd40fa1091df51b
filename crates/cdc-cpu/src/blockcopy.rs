//! `REC`/`WEC` block copy between Central Memory and ECS/UEM
//! (`spec.md` §4.4 `UemTransfer`/`EcsTransfer`).

use cdc_core::{add18, add24, MASK18};

use crate::mem::Environment;
use crate::registers::{exit_condition, exit_mode, CpuContext};

/// `777777` (octal) is treated as a zero word count by the reference
/// implementation rather than the largest possible count.
const COUNT_SENTINEL_ZERO: u32 = 0o777_777;

fn normalized_count(raw: u32) -> u32 {
    if raw == COUNT_SENTINEL_ZERO {
        0
    } else {
        raw & (MASK18 as u32)
    }
}

fn count_is_negative(raw: u32) -> bool {
    raw & (1 << 17) != 0
}

/// `01.1`/`01.2 REC/WEC Bj+K`. `to_ecs_or_uem` selects the transfer
/// direction (read-from-CM-write-to-external when `true` is WEC; the
/// opposite, REC, when `false`).
pub fn transfer(cpu: &mut CpuContext, env: &Environment, bj: u32, op_address: u32, is_uem: bool, write_to_external: bool) {
    let raw_count = add18(bj, op_address);
    if count_is_negative(raw_count) {
        fail(cpu, env);
        return;
    }
    let count = normalized_count(raw_count);

    let enhanced = cpu.exit_mode & exit_mode::ENHANCED_BLOCK_COPY != 0;
    let mut cm_addr = if enhanced { ((cpu.x[0] >> 30) & 0o777_777_7) as u32 } else { cpu.a[0] };
    let ext_mask = if is_uem { (1u64 << 30) - 1 } else { (1u64 << 24) - 1 };
    let mut ext_addr = (cpu.x[0] & ext_mask) as u32;

    if cm_would_overflow(cpu, cm_addr, count) || ext_would_overflow(cpu, is_uem, ext_addr, count) {
        fail(cpu, env);
        return;
    }

    for _ in 0..count {
        if is_uem {
            let bad_bits = ext_addr & 0b11_0000_0000_0000_0000_0000 != 0;
            let uem_absolute = add24(cpu.ra_ecs, ext_addr);
            if write_to_external {
                if !bad_bits {
                    let Some(word) = env.read_mem(cpu, cm_addr) else { return };
                    env.cm.write_with_wrap(uem_absolute, word, false);
                }
            } else if bad_bits {
                let _ = env.write_mem(cpu, cm_addr, 0);
            } else {
                let word = env.cm.read_with_wrap(uem_absolute, false);
                let _ = env.write_mem(cpu, cm_addr, word);
            }
            if bad_bits {
                error_exit_to_parcel1(cpu, env);
            }
        } else if write_to_external {
            let Some(word) = env.read_mem(cpu, cm_addr) else { return };
            env.ecs.write(ext_addr, word);
        } else {
            let word = env.ecs.read(ext_addr);
            if env.write_mem(cpu, cm_addr, word) {
                return;
            }
        }
        cm_addr = add24(cm_addr, 1) % env.cm.size().max(1);
        ext_addr = ext_addr.wrapping_add(1);
    }
}

fn cm_would_overflow(cpu: &CpuContext, start: u32, count: u32) -> bool {
    u64::from(start) + u64::from(count) > u64::from(cpu.fl_cm)
}

fn ext_would_overflow(cpu: &CpuContext, is_uem: bool, start: u32, count: u32) -> bool {
    let limit = if is_uem { cpu.fl_cm } else { cpu.fl_ecs };
    u64::from(start) + u64::from(count) > u64::from(limit)
}

fn fail(cpu: &mut CpuContext, env: &Environment) {
    cpu.exit_condition |= exit_condition::ADDRESS_OUT_OF_RANGE;
    if cpu.exit_mode & exit_mode::ADDRESS_OUT_OF_RANGE != 0 {
        crate::exchange::error_exit(cpu, env);
    } else {
        cpu.op_offset = 0;
    }
}

/// A UEM block-copy step that touched bits 21/22 of the UEM address
/// forces an error exit to the next instruction's lower (second) parcel
/// once the block completes, per `spec.md` §4.4 and the §9 open question
/// about whether bit 24 was meant instead — the observed behavior (bits
/// 21/22) is preserved here rather than guessed at.
fn error_exit_to_parcel1(cpu: &mut CpuContext, env: &Environment) {
    cpu.exit_condition |= exit_condition::ADDRESS_OUT_OF_RANGE;
    if cpu.exit_mode & exit_mode::ADDRESS_OUT_OF_RANGE != 0 {
        crate::exchange::error_exit(cpu, env);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdc_core::ModelType;

    fn env() -> Environment {
        Environment::new(ModelType::Cyber73, 0x10000, 0x40000)
    }

    #[test]
    fn rec_bounds_violation_sets_address_out_of_range() {
        let env = env();
        let mut cpu = CpuContext::new(0);
        cpu.fl_cm = 0o010000;
        cpu.fl_ecs = 0o040000;
        cpu.b[1] = 0o010001;
        transfer(&mut cpu, &env, cpu.b[1], 0, false, false);
        assert_eq!(cpu.exit_condition & exit_condition::ADDRESS_OUT_OF_RANGE, exit_condition::ADDRESS_OUT_OF_RANGE);
    }

    #[test]
    fn rec_bounds_violation_traps_when_exit_mode_enabled() {
        let env = env();
        let mut cpu = CpuContext::new(0);
        cpu.fl_cm = 0o010000;
        cpu.fl_ecs = 0o040000;
        cpu.b[1] = 0o010001;
        cpu.exit_mode |= exit_mode::ADDRESS_OUT_OF_RANGE;
        cpu.stopped = false;
        transfer(&mut cpu, &env, cpu.b[1], 0, false, false);
        assert!(cpu.stopped);
    }

    #[test]
    fn small_in_bounds_ecs_copy_round_trips() {
        let env = env();
        let mut cpu = CpuContext::new(0);
        cpu.fl_cm = 0o010000;
        cpu.fl_ecs = 0o040000;
        cpu.a[0] = 5;
        cpu.x[0] = 100;
        env.write_mem(&mut cpu, 5, 0o123456);
        transfer(&mut cpu, &env, 0, 1, false, true);
        assert_eq!(env.ecs.read(100), 0o123456);
    }
}
