//! Portable host backend.
//!
//! Allocated IR is lowered to a compact threaded code (`encode`) that lives in the code cache
//! next to nothing else, and runs through a small executor (`exec`) over a host register file
//! of 32 general and 32 floating slots plus the block's spill area. Host register numbers and
//! spill slots are the allocator's, so the encoded block says exactly what a native emitter
//! would have to do.

pub mod decode;
pub mod encode;
pub mod exec;
pub mod helpers;

use std::fmt;

use vr4300::arith::{MulDivOp, ShiftOp, ShiftWidth};
use vr4300::fpu::{FloatFormat, FloatOp, FloatUnaryOp, RoundMode};
use vr4300::instructions::CmpMode;
use vr4300::AccessKind;

use crate::ir::{BinaryOp, ValueType};

pub use decode::{disassemble, Decoder, FlushIter, HostOp, Site};
pub use encode::{encode_block, CodeBuffer};
pub use exec::{execute, ExecContext, HOST_REGS};

/// Where an operand lives at runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Gpr(u8),
    Fgr(u8),
    Spill(u16),
    Imm(u64),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Gpr(r) => write!(f, "r{}", r),
            Operand::Fgr(r) => write!(f, "f{}", r),
            Operand::Spill(slot) => write!(f, "[spill {}]", slot),
            Operand::Imm(v) => write!(f, "#{:#x}", v),
        }
    }
}

mod tag {
    pub const GPR: u8 = 0;
    pub const FGR: u8 = 1;
    pub const SPILL: u8 = 2;
    pub const IMM: u8 = 3;
}

/// Opcode bytes of the threaded code
mod op {
    pub const MOVE: u8 = 0x01;
    pub const LOAD_GUEST: u8 = 0x02;
    pub const FLUSH_GUEST: u8 = 0x03;
    pub const BINARY: u8 = 0x04;
    pub const NOT: u8 = 0x05;
    pub const CAST: u8 = 0x06;
    pub const SHIFT: u8 = 0x07;
    pub const CHECK: u8 = 0x08;
    pub const TLB_LOOKUP: u8 = 0x09;
    pub const LOAD: u8 = 0x0a;
    pub const STORE: u8 = 0x0b;
    pub const LOAD_STATE: u8 = 0x0c;
    pub const STORE_STATE: u8 = 0x0d;
    pub const MUL_DIV: u8 = 0x0e;
    pub const SET_EXIT_PC: u8 = 0x0f;
    pub const SET_COND_EXIT_PC: u8 = 0x10;
    pub const COND_EXIT: u8 = 0x11;
    pub const CALL: u8 = 0x12;
    pub const FLOAT_BINARY: u8 = 0x13;
    pub const FLOAT_UNARY: u8 = 0x14;
    pub const FLOAT_CONVERT: u8 = 0x15;
    pub const FLOAT_COMPARE: u8 = 0x16;
    pub const END: u8 = 0xff;
}

/// Byte encoding of the small enums the ops carry: the index into `ALL`
pub(crate) trait Code: Copy + PartialEq + 'static {
    const ALL: &'static [Self];

    fn code(self) -> u8 {
        Self::ALL.iter().position(|&v| v == self).unwrap_or(0) as u8
    }

    fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }
}

impl Code for BinaryOp {
    const ALL: &'static [Self] = &[
        BinaryOp::Add,
        BinaryOp::Sub,
        BinaryOp::And,
        BinaryOp::Or,
        BinaryOp::Xor,
        BinaryOp::AddTrap32,
        BinaryOp::AddTrap64,
        BinaryOp::SubTrap32,
        BinaryOp::SubTrap64,
    ];
}

impl Code for ValueType {
    const ALL: &'static [Self] = &[
        ValueType::S8,
        ValueType::U8,
        ValueType::S16,
        ValueType::U16,
        ValueType::S32,
        ValueType::U32,
        ValueType::U64,
    ];
}

impl Code for ShiftOp {
    const ALL: &'static [Self] = &[ShiftOp::Left, ShiftOp::RightLogical, ShiftOp::RightArith];
}

impl Code for ShiftWidth {
    const ALL: &'static [Self] = &[ShiftWidth::W32, ShiftWidth::W64];
}

impl Code for CmpMode {
    const ALL: &'static [Self] = &[
        CmpMode::Eq,
        CmpMode::Ne,
        CmpMode::Le,
        CmpMode::Ge,
        CmpMode::Lt,
        CmpMode::Gt,
        CmpMode::LtU,
        CmpMode::GeU,
    ];
}

impl Code for AccessKind {
    const ALL: &'static [Self] = &[AccessKind::Fetch, AccessKind::Load, AccessKind::Store];
}

impl Code for MulDivOp {
    const ALL: &'static [Self] = &[
        MulDivOp::Mult,
        MulDivOp::MultU,
        MulDivOp::Div,
        MulDivOp::DivU,
        MulDivOp::DMult,
        MulDivOp::DMultU,
        MulDivOp::DDiv,
        MulDivOp::DDivU,
    ];
}

impl Code for FloatFormat {
    const ALL: &'static [Self] = &[FloatFormat::Single, FloatFormat::Double, FloatFormat::Word, FloatFormat::Long];
}

impl Code for FloatOp {
    const ALL: &'static [Self] = &[FloatOp::Add, FloatOp::Sub, FloatOp::Mul, FloatOp::Div];
}

impl Code for FloatUnaryOp {
    const ALL: &'static [Self] = &[FloatUnaryOp::Sqrt, FloatUnaryOp::Abs, FloatUnaryOp::Neg];
}

impl Code for RoundMode {
    const ALL: &'static [Self] = &[RoundMode::Nearest, RoundMode::Truncate, RoundMode::Ceil, RoundMode::Floor];
}

#[cfg(test)]
mod tests {
    use super::*;

    fn distinct<T: Code + fmt::Debug>() {
        for (i, v) in T::ALL.iter().enumerate() {
            assert_eq!(v.code() as usize, i, "{:?}", v);
        }
    }

    #[test]
    fn codes_are_dense_and_unique() {
        distinct::<BinaryOp>();
        distinct::<ValueType>();
        distinct::<CmpMode>();
        distinct::<MulDivOp>();
        distinct::<RoundMode>();
        assert_eq!(CmpMode::from_code(8), None);
    }
}
