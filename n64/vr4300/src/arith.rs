//! Integer semantics shared by the interpreter, the recompiler's constant folder and its
//! runtime, so all three agree bit for bit.

use crate::instructions::CmpMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShiftOp {
    Left,
    RightLogical,
    RightArith,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShiftWidth {
    W32,
    W64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MulDivOp {
    Mult,
    MultU,
    Div,
    DivU,
    DMult,
    DMultU,
    DDiv,
    DDivU,
}

#[inline(always)]
pub fn sign_extend32(value: u64) -> u64 {
    value as i32 as i64 as u64
}

/// Shift `value` by the low bits of `amount`.
///
/// 32 bit shifts produce a sign extended 32 bit result. SRA shifts the whole 64 bit register
/// before truncating, which is what the VR4300 does for non sign-extended inputs.
pub fn shift(op: ShiftOp, width: ShiftWidth, value: u64, amount: u64) -> u64 {
    match width {
        ShiftWidth::W32 => {
            let sa = (amount & 31) as u32;
            let result = match op {
                ShiftOp::Left => (value as u32) << sa,
                ShiftOp::RightLogical => (value as u32) >> sa,
                ShiftOp::RightArith => ((value as i64) >> sa) as u32,
            };
            result as i32 as i64 as u64
        }
        ShiftWidth::W64 => {
            let sa = (amount & 63) as u32;
            match op {
                ShiftOp::Left => value << sa,
                ShiftOp::RightLogical => value >> sa,
                ShiftOp::RightArith => ((value as i64) >> sa) as u64,
            }
        }
    }
}

pub fn compare(mode: CmpMode, a: u64, b: u64) -> bool {
    match mode {
        CmpMode::Eq => a == b,
        CmpMode::Ne => a != b,
        CmpMode::Le => (a as i64) <= (b as i64),
        CmpMode::Ge => (a as i64) >= (b as i64),
        CmpMode::Lt => (a as i64) < (b as i64),
        CmpMode::Gt => (a as i64) > (b as i64),
        CmpMode::LtU => a < b,
        CmpMode::GeU => a >= b,
    }
}

/// 32 bit signed add, `None` on overflow
pub fn add32_checked(a: u64, b: u64) -> Option<u64> {
    (a as i32).checked_add(b as i32).map(|r| r as i64 as u64)
}

pub fn sub32_checked(a: u64, b: u64) -> Option<u64> {
    (a as i32).checked_sub(b as i32).map(|r| r as i64 as u64)
}

pub fn add64_checked(a: u64, b: u64) -> Option<u64> {
    (a as i64).checked_add(b as i64).map(|r| r as u64)
}

pub fn sub64_checked(a: u64, b: u64) -> Option<u64> {
    (a as i64).checked_sub(b as i64).map(|r| r as u64)
}

/// Returns `(hi, lo)`.
///
/// Division by zero doesn't trap; the results match what the hardware divider leaves behind.
pub fn mul_div(op: MulDivOp, a: u64, b: u64) -> (u64, u64) {
    match op {
        MulDivOp::Mult => {
            let result = (a as i32 as i64).wrapping_mul(b as i32 as i64);
            (sign_extend32((result >> 32) as u64), sign_extend32(result as u64))
        }
        MulDivOp::MultU => {
            let result = (a as u32 as u64) * (b as u32 as u64);
            (sign_extend32(result >> 32), sign_extend32(result))
        }
        MulDivOp::Div => {
            let n = a as i32;
            let d = b as i32;
            let (quot, rem) = if d == 0 {
                (if n < 0 { 1 } else { -1 }, n)
            } else {
                (n.wrapping_div(d), n.wrapping_rem(d))
            };
            (rem as i64 as u64, quot as i64 as u64)
        }
        MulDivOp::DivU => {
            let n = a as u32;
            let d = b as u32;
            let (quot, rem) = if d == 0 { (u32::MAX, n) } else { (n / d, n % d) };
            (sign_extend32(rem as u64), sign_extend32(quot as u64))
        }
        MulDivOp::DMult => {
            let result = (a as i64 as i128).wrapping_mul(b as i64 as i128);
            ((result >> 64) as u64, result as u64)
        }
        MulDivOp::DMultU => {
            let result = (a as u128) * (b as u128);
            ((result >> 64) as u64, result as u64)
        }
        MulDivOp::DDiv => {
            let n = a as i64;
            let d = b as i64;
            let (quot, rem) = if d == 0 {
                (if n < 0 { 1 } else { -1 }, n)
            } else {
                (n.wrapping_div(d), n.wrapping_rem(d))
            };
            (rem as u64, quot as u64)
        }
        MulDivOp::DDivU => {
            if b == 0 {
                (a, u64::MAX)
            } else {
                (a % b, a / b)
            }
        }
    }
}
