//! COP1 arithmetic on raw register bit patterns.
//!
//! Single precision and word values live in the low 32 bits. Results are returned with the
//! upper half clear. Exceptions and the rounding mode field of FCR31 are not modelled.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatFormat {
    Single,
    Double,
    Word,
    Long,
}

impl FloatFormat {
    pub const fn from_field(fmt: u8) -> Option<FloatFormat> {
        match fmt {
            16 => Some(FloatFormat::Single),
            17 => Some(FloatFormat::Double),
            20 => Some(FloatFormat::Word),
            21 => Some(FloatFormat::Long),
            _ => None,
        }
    }

    /// Format usable by the arithmetic instructions
    pub fn arith_from_field(fmt: u8) -> Option<FloatFormat> {
        Self::from_field(fmt).filter(|f| f.is_float())
    }

    pub fn is_float(self) -> bool {
        matches!(self, FloatFormat::Single | FloatFormat::Double)
    }

    pub fn is_64bit(self) -> bool {
        matches!(self, FloatFormat::Double | FloatFormat::Long)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatUnaryOp {
    Sqrt,
    Abs,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoundMode {
    Nearest,
    Truncate,
    Ceil,
    Floor,
}

impl RoundMode {
    fn apply(self, value: f64) -> f64 {
        match self {
            RoundMode::Nearest => value.round_ties_even(),
            RoundMode::Truncate => value.trunc(),
            RoundMode::Ceil => value.ceil(),
            RoundMode::Floor => value.floor(),
        }
    }
}

#[inline(always)]
fn single(bits: u64) -> f32 {
    f32::from_bits(bits as u32)
}

#[inline(always)]
fn double(bits: u64) -> f64 {
    f64::from_bits(bits)
}

pub fn binary(op: FloatOp, fmt: FloatFormat, a: u64, b: u64) -> u64 {
    match fmt {
        FloatFormat::Single => {
            let (a, b) = (single(a), single(b));
            let r = match op {
                FloatOp::Add => a + b,
                FloatOp::Sub => a - b,
                FloatOp::Mul => a * b,
                FloatOp::Div => a / b,
            };
            r.to_bits() as u64
        }
        _ => {
            let (a, b) = (double(a), double(b));
            let r = match op {
                FloatOp::Add => a + b,
                FloatOp::Sub => a - b,
                FloatOp::Mul => a * b,
                FloatOp::Div => a / b,
            };
            r.to_bits()
        }
    }
}

pub fn unary(op: FloatUnaryOp, fmt: FloatFormat, a: u64) -> u64 {
    match fmt {
        FloatFormat::Single => {
            let a = single(a);
            let r = match op {
                FloatUnaryOp::Sqrt => a.sqrt(),
                FloatUnaryOp::Abs => a.abs(),
                FloatUnaryOp::Neg => -a,
            };
            r.to_bits() as u64
        }
        _ => {
            let a = double(a);
            let r = match op {
                FloatUnaryOp::Sqrt => a.sqrt(),
                FloatUnaryOp::Abs => a.abs(),
                FloatUnaryOp::Neg => -a,
            };
            r.to_bits()
        }
    }
}

/// CVT/ROUND/TRUNC/CEIL/FLOOR need a source and destination that differ, and at least one
/// side must be floating point
pub fn is_valid_conversion(from: FloatFormat, to: FloatFormat) -> bool {
    from != to && (from.is_float() || to.is_float())
}

pub fn convert(from: FloatFormat, to: FloatFormat, mode: RoundMode, bits: u64) -> u64 {
    let value = match from {
        FloatFormat::Single => single(bits) as f64,
        FloatFormat::Double => double(bits),
        FloatFormat::Word => bits as u32 as i32 as f64,
        FloatFormat::Long => bits as i64 as f64,
    };

    match to {
        FloatFormat::Single => (value as f32).to_bits() as u64,
        FloatFormat::Double => value.to_bits(),
        FloatFormat::Word => mode.apply(value) as i32 as u32 as u64,
        FloatFormat::Long => mode.apply(value) as i64 as u64,
    }
}

/// C.cond: bit 2 of `cond` asks for less-than, bit 1 for equal, bit 0 for unordered.
/// The signalling variants (bit 3) compare the same way.
pub fn compare(cond: u8, fmt: FloatFormat, a: u64, b: u64) -> bool {
    let (a, b) = match fmt {
        FloatFormat::Single => (single(a) as f64, single(b) as f64),
        _ => (double(a), double(b)),
    };
    let unordered = a.is_nan() || b.is_nan();
    (cond & 4 != 0 && a < b) || (cond & 2 != 0 && a == b) || (cond & 1 != 0 && unordered)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: f32) -> u64 {
        v.to_bits() as u64
    }

    #[test]
    fn single_results_stay_in_the_low_word() {
        assert_eq!(binary(FloatOp::Add, FloatFormat::Single, s(1.5), s(2.0)), s(3.5));
        assert_eq!(binary(FloatOp::Div, FloatFormat::Double, 9f64.to_bits(), 2f64.to_bits()), 4.5f64.to_bits());
        assert_eq!(unary(FloatUnaryOp::Neg, FloatFormat::Single, s(2.0)), s(-2.0));
    }

    #[test]
    fn conversions_round_as_named() {
        let x = 2.5f64.to_bits();
        assert_eq!(convert(FloatFormat::Double, FloatFormat::Word, RoundMode::Nearest, x), 2);
        assert_eq!(convert(FloatFormat::Double, FloatFormat::Word, RoundMode::Ceil, x), 3);
        assert_eq!(convert(FloatFormat::Double, FloatFormat::Long, RoundMode::Floor, (-2.5f64).to_bits()), (-3i64) as u64);
        assert_eq!(convert(FloatFormat::Word, FloatFormat::Single, RoundMode::Nearest, 7), s(7.0));
        assert!(!is_valid_conversion(FloatFormat::Word, FloatFormat::Long));
        assert!(!is_valid_conversion(FloatFormat::Single, FloatFormat::Single));
    }

    #[test]
    fn compare_conditions() {
        let nan = s(f32::NAN);
        // C.EQ, C.LT, C.UN, C.ULE
        assert!(compare(2, FloatFormat::Single, s(1.0), s(1.0)));
        assert!(compare(12, FloatFormat::Single, s(1.0), s(2.0)));
        assert!(!compare(12, FloatFormat::Single, s(2.0), s(1.0)));
        assert!(compare(1, FloatFormat::Single, nan, s(1.0)));
        assert!(compare(7, FloatFormat::Single, nan, s(1.0)));
        assert!(!compare(6, FloatFormat::Single, nan, s(1.0)));
    }
}
