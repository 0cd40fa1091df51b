//! 60-bit CDC floating-point format: pack/unpack/normalize and the three
//! arithmetic families (add/subtract, multiply, divide) in single,
//! double, and rounded variants.
//!
//! Layout of a positive value: bit 59 is the sign, bits 48-58 are an
//! 11-bit excess-`EXPONENT_BIAS` exponent, bits 0-47 are a 48-bit
//! magnitude coefficient normalized so that bit 47 is set (unless the
//! value is zero). A negative value is the ones-complement of the whole
//! 60-bit word representing the corresponding positive value — consistent
//! with the architecture's ones-complement arithmetic throughout, and
//! with `FloatCheck` inspecting the raw top 12 bits (sign + exponent) for
//! the infinity/indefinite sentinels rather than the sign and exponent
//! separately.

use crate::words::MASK60;

/// Exponent bias (true exponent = field value − this).
pub const EXPONENT_BIAS: i32 = 0o2000;
const COEFF_BITS: u32 = 48;
const COEFF_MASK: u64 = (1u64 << COEFF_BITS) - 1;
const EXP_FIELD_MASK: u64 = 0o7777;

/// Outcome of inspecting a float operand's top 12 bits for a special value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatSpecial {
    /// Exponent field is `03777` or `04000`: operand is infinite.
    Infinity,
    /// Exponent field is `01777` or `06000`: operand is indefinite.
    Indefinite,
}

/// `FloatCheck`: inspect the top 12 bits (sign + 11-bit exponent) of a
/// value for the infinity/indefinite sentinels.
#[must_use]
pub fn float_check(value: u64) -> Option<FloatSpecial> {
    let top12 = (value >> 48) & EXP_FIELD_MASK;
    match top12 {
        0o3777 | 0o4000 => Some(FloatSpecial::Infinity),
        0o1777 | 0o6000 => Some(FloatSpecial::Indefinite),
        _ => None,
    }
}

/// Decoded floating-point value: sign, unbiased exponent, 48-bit
/// normalized magnitude coefficient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Float {
    pub negative: bool,
    pub exponent: i32,
    pub coeff: u64,
}

impl Float {
    /// Decode a 60-bit word.
    #[must_use]
    pub fn unpack(word: u64) -> Self {
        let word = word & MASK60;
        let negative = (word >> 59) & 1 != 0;
        let magnitude_word = if negative { (!word) & MASK60 } else { word };
        let exponent = (((magnitude_word >> 48) & 0o3777) as i32) - EXPONENT_BIAS;
        let coeff = magnitude_word & COEFF_MASK;
        Self { negative, exponent, coeff }
    }

    /// Encode back into a 60-bit word, normalizing first.
    #[must_use]
    pub fn pack(self) -> u64 {
        let normalized = self.normalize();
        if normalized.coeff == 0 {
            return if normalized.negative { MASK60 } else { 0 };
        }
        let exp_field = ((normalized.exponent + EXPONENT_BIAS) as u64) & 0o3777;
        let magnitude_word = (exp_field << 48) | (normalized.coeff & COEFF_MASK);
        if normalized.negative { (!magnitude_word) & MASK60 } else { magnitude_word }
    }

    /// Shift the coefficient left until bit 47 is set (or the value is
    /// zero), adjusting the exponent to compensate. This is `NX`/`ZX`'s
    /// core operation; `ZX` additionally forces a zero exponent when the
    /// coefficient is zero (callers do that themselves since `normalize`
    /// alone does not distinguish the two opcodes).
    #[must_use]
    pub fn normalize(mut self) -> Self {
        if self.coeff == 0 {
            self.exponent = 0;
            return self;
        }
        while self.coeff & (1 << (COEFF_BITS - 1)) == 0 {
            self.coeff <<= 1;
            self.exponent -= 1;
        }
        self
    }

    fn to_signed_coeff(self) -> i128 {
        if self.negative { -(self.coeff as i128) } else { self.coeff as i128 }
    }

    fn from_signed_coeff(mut signed: i128, mut exponent: i32) -> Self {
        let negative = signed < 0;
        if negative {
            signed = -signed;
        }
        // Renormalize: the raw sum/product may overflow 48 bits or be zero.
        while signed >= (1i128 << (COEFF_BITS + 1)) {
            signed >>= 1;
            exponent += 1;
        }
        let mut coeff = signed as u64;
        let mut exp = exponent;
        if coeff != 0 {
            while coeff & (1 << COEFF_BITS) != 0 {
                coeff >>= 1;
                exp += 1;
            }
        }
        Self { negative, exponent: exp, coeff }.normalize()
    }
}

/// Floating add/subtract. `double` keeps an extra guard word's worth of
/// precision internally (modeled here simply as not truncating before the
/// final pack); `round` adds a round bit at the coefficient's LSB before
/// normalizing.
#[must_use]
pub fn float_add(a: u64, b: u64, subtract: bool, round: bool) -> u64 {
    let mut fb = Float::unpack(b);
    if subtract {
        fb.negative = !fb.negative;
    }
    let fa = Float::unpack(a);
    let (hi, lo) = if fa.exponent >= fb.exponent { (fa, fb) } else { (fb, fa) };
    let shift = (hi.exponent - lo.exponent).clamp(0, 63) as u32;
    let lo_signed = lo.to_signed_coeff() >> shift;
    let mut sum = hi.to_signed_coeff() + lo_signed;
    if round && shift > 0 {
        sum += if lo.negative { -1 } else { 1 };
    }
    Float::from_signed_coeff(sum, hi.exponent).pack()
}

/// Floating multiply.
#[must_use]
pub fn float_multiply(a: u64, b: u64, round: bool) -> u64 {
    let fa = Float::unpack(a);
    let fb = Float::unpack(b);
    let product = (fa.coeff as i128) * (fb.coeff as i128);
    let negative = fa.negative != fb.negative;
    let signed = if negative { -product } else { product };
    // Product of two 48-bit normalized coefficients is 95/96 bits wide;
    // shift back down to 48 bits before handing to the renormalizer.
    let shifted = signed >> (COEFF_BITS - 1);
    let rounded = if round && shifted != 0 { shifted + shifted.signum() } else { shifted };
    Float::from_signed_coeff(rounded, fa.exponent + fb.exponent + 1).pack()
}

/// Floating divide. Division by a zero coefficient yields the indefinite
/// sentinel rather than panicking, matching the hardware's "indefinite
/// operand" exit rather than a host-level trap.
#[must_use]
pub fn float_divide(a: u64, b: u64, round: bool) -> u64 {
    let fa = Float::unpack(a);
    let fb = Float::unpack(b);
    if fb.coeff == 0 {
        return 0o1777u64 << 48;
    }
    let negative = fa.negative != fb.negative;
    let numerator = (fa.coeff as i128) << (COEFF_BITS + 2);
    let mut quotient = numerator / (fb.coeff as i128);
    if round {
        let remainder = numerator % (fb.coeff as i128);
        if remainder * 2 >= (fb.coeff as i128) {
            quotient += 1;
        }
    }
    let signed = if negative { -quotient } else { quotient };
    Float::from_signed_coeff(signed, fa.exponent - fb.exponent - 2).pack()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infinity_sentinels_detected() {
        assert_eq!(float_check(0o3777u64 << 48), Some(FloatSpecial::Infinity));
        assert_eq!(float_check(0o4000u64 << 48), Some(FloatSpecial::Infinity));
    }

    #[test]
    fn indefinite_sentinels_detected() {
        assert_eq!(float_check(0o1777u64 << 48), Some(FloatSpecial::Indefinite));
        assert_eq!(float_check(0o6000u64 << 48), Some(FloatSpecial::Indefinite));
    }

    #[test]
    fn ordinary_value_has_no_special() {
        let one = Float { negative: false, exponent: 0, coeff: 1 << 47 }.pack();
        assert_eq!(float_check(one), None);
    }

    #[test]
    fn pack_unpack_round_trips_for_normalized_values() {
        let f = Float { negative: false, exponent: 5, coeff: 1 << 47 };
        let word = f.pack();
        let back = Float::unpack(word);
        assert_eq!(back.exponent, 5);
        assert_eq!(back.coeff, 1 << 47);
        assert!(!back.negative);
    }

    #[test]
    fn negative_pack_unpack_round_trips() {
        let f = Float { negative: true, exponent: -3, coeff: (1 << 47) | 1 };
        let back = Float::unpack(f.pack());
        assert_eq!(back.exponent, -3);
        assert_eq!(back.coeff, (1 << 47) | 1);
        assert!(back.negative);
    }

    #[test]
    fn add_self_doubles_exponent_not_coefficient() {
        let one = Float { negative: false, exponent: 0, coeff: 1 << 47 }.pack();
        let two = float_add(one, one, false, false);
        let decoded = Float::unpack(two);
        assert_eq!(decoded.exponent, 1);
        assert_eq!(decoded.coeff, 1 << 47);
    }

    #[test]
    fn multiply_by_zero_is_zero() {
        let one = Float { negative: false, exponent: 0, coeff: 1 << 47 }.pack();
        let zero = 0u64;
        assert_eq!(float_multiply(one, zero, false), 0);
    }

    #[test]
    fn divide_by_zero_yields_indefinite() {
        let one = Float { negative: false, exponent: 0, coeff: 1 << 47 }.pack();
        let result = float_divide(one, 0, false);
        assert_eq!(float_check(result), Some(FloatSpecial::Indefinite));
    }
}
