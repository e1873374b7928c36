//! Arithmetic and logical operations on the accumulator (spec §4.5).
//!
//! Every function here is a pure `(operands, flags-in) -> (result,
//! flags-out)` computation; the CPU's execute step is the only place that
//! reads the result back into AX. Keeping these free of register/stack
//! access makes the "open question" flag semantics (spec §9) directly
//! testable without standing up a whole machine.

use crate::cpu::registers::Flags;
use crate::error::ExecError;

/// `a + b`, setting CARRY on unsigned overflow and ZERO/SIGN from the
/// truncated 16-bit result.
pub fn add(a: u16, b: u16) -> (u16, Flags) {
    let (result, carry) = a.overflowing_add(b);
    let mut flags = Flags::new();
    flags.set_zero_sign(result);
    flags.set_carry(carry);
    (result, flags)
}

/// `a - b`, setting CARRY on an unsigned borrow and OVERFLOW when the
/// signed result's sign disagrees with what two's-complement subtraction
/// of same-signed-magnitude operands would predict (spec §9: "SUB sets
/// OVERFLOW when signed sign inversion occurs").
pub fn sub(a: u16, b: u16) -> (u16, Flags) {
    let (result, borrow) = a.overflowing_sub(b);
    let mut flags = Flags::new();
    flags.set_zero_sign(result);
    flags.set_carry(borrow);
    let signed_a = a as i16;
    let signed_b = b as i16;
    let (signed_result, signed_overflow) = signed_a.overflowing_sub(signed_b);
    flags.set_overflow(signed_overflow || (signed_result >= 0) != (result as i16 >= 0));
    (result, flags)
}

/// `a * b` as a 32-bit product truncated to 16 bits; CARRY is set when
/// the high 16 bits of the product are non-zero (spec §9's explicit
/// resolution of the source's ambiguous MUL flag behaviour).
pub fn mul(a: u16, b: u16) -> (u16, Flags) {
    let product = u32::from(a) * u32::from(b);
    let result = product as u16;
    let mut flags = Flags::new();
    flags.set_zero_sign(result);
    flags.set_carry(product >> 16 != 0);
    (result, flags)
}

pub fn div(a: u16, b: u16) -> Result<(u16, Flags), ExecError> {
    if b == 0 {
        return Err(ExecError::DivisionByZero);
    }
    let result = a / b;
    let mut flags = Flags::new();
    flags.set_zero_sign(result);
    Ok((result, flags))
}

pub fn rem(a: u16, b: u16) -> Result<(u16, Flags), ExecError> {
    if b == 0 {
        return Err(ExecError::DivisionByZero);
    }
    let result = a % b;
    let mut flags = Flags::new();
    flags.set_zero_sign(result);
    Ok((result, flags))
}

pub fn and(a: u16, b: u16) -> (u16, Flags) {
    let result = a & b;
    let mut flags = Flags::new();
    flags.set_zero_sign(result);
    (result, flags)
}

pub fn or(a: u16, b: u16) -> (u16, Flags) {
    let result = a | b;
    let mut flags = Flags::new();
    flags.set_zero_sign(result);
    (result, flags)
}

pub fn xor(a: u16, b: u16) -> (u16, Flags) {
    let result = a ^ b;
    let mut flags = Flags::new();
    flags.set_zero_sign(result);
    (result, flags)
}

pub fn not(a: u16) -> (u16, Flags) {
    let result = !a;
    let mut flags = Flags::new();
    flags.set_zero_sign(result);
    (result, flags)
}

pub fn shl(a: u16, count: u32) -> (u16, Flags) {
    let result = a.wrapping_shl(count);
    let mut flags = Flags::new();
    flags.set_zero_sign(result);
    (result, flags)
}

pub fn shr(a: u16, count: u32) -> (u16, Flags) {
    let result = a.wrapping_shr(count);
    let mut flags = Flags::new();
    flags.set_zero_sign(result);
    (result, flags)
}

pub fn rol(a: u16, count: u32) -> (u16, Flags) {
    let result = a.rotate_left(count % 16);
    let mut flags = Flags::new();
    flags.set_zero_sign(result);
    (result, flags)
}

pub fn ror(a: u16, count: u32) -> (u16, Flags) {
    let result = a.rotate_right(count % 16);
    let mut flags = Flags::new();
    flags.set_zero_sign(result);
    (result, flags)
}

pub fn inc(a: u16) -> (u16, Flags) {
    let (result, carry) = a.overflowing_add(1);
    let mut flags = Flags::new();
    flags.set_zero_sign(result);
    flags.set_carry(carry);
    (result, flags)
}

/// `dec(0)` wraps to `0xFFFF` with CARRY set (spec §8 boundary case).
pub fn dec(a: u16) -> (u16, Flags) {
    let (result, borrow) = a.overflowing_sub(1);
    let mut flags = Flags::new();
    flags.set_zero_sign(result);
    flags.set_carry(borrow);
    (result, flags)
}

/// Unsigned comparison (spec §4.5): accumulator becomes 0 if equal, 1 if
/// `a > b`, `0xFFFF` if `a < b`. ZERO mirrors equality, SIGN mirrors
/// "less than".
pub fn cmp(a: u16, b: u16) -> (u16, Flags) {
    let mut flags = Flags::new();
    let result = match a.cmp(&b) {
        std::cmp::Ordering::Equal => {
            flags.set_zero(true);
            0
        }
        std::cmp::Ordering::Greater => 1,
        std::cmp::Ordering::Less => {
            flags.set_sign(true);
            0xFFFF
        }
    };
    (result, flags)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_sets_carry_and_zero_on_unsigned_overflow() {
        let (result, flags) = add(0xFFFF, 1);
        assert_eq!(result, 0);
        assert!(flags.zero());
        assert!(flags.carry());
    }

    #[test]
    fn dec_of_zero_wraps_with_carry() {
        let (result, flags) = dec(0);
        assert_eq!(result, 0xFFFF);
        assert!(flags.carry());
    }

    #[test]
    fn cmp_equal_is_zero_with_zero_flag() {
        let (result, flags) = cmp(42, 42);
        assert_eq!(result, 0);
        assert!(flags.zero());
    }

    #[test]
    fn cmp_is_unsigned() {
        let (result, _) = cmp(0xFFFF, 1);
        assert_eq!(result, 1);
    }

    #[test]
    fn mul_sets_carry_from_high_word_of_product() {
        let (_, flags) = mul(0x1000, 0x1000);
        assert!(flags.carry());
        let (_, flags) = mul(2, 3);
        assert!(!flags.carry());
    }

    #[test]
    fn div_by_zero_is_an_error() {
        assert_eq!(div(1, 0), Err(ExecError::DivisionByZero));
    }
}
