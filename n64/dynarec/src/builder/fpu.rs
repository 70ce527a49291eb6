use vr4300::arith::{ShiftOp, ShiftWidth};
use vr4300::cop0::{self, status};
use vr4300::fpu::{self, FloatFormat, FloatOp, FloatUnaryOp, RoundMode};
use vr4300::instructions::CmpMode;
use vr4300::state::{fpr64_index, FCR0, FCR31_WRITE_MASK};
use vr4300::ExceptionDescriptor;

use super::Builder;
use crate::error::CompileError;
use crate::ir::{BinaryOp, GuestReg, RegClass, StateField, ValueId, ValueKind, ValueType};

impl Builder<'_> {
    /// Leave with Coprocessor Unusable unless Status.CU1 is set. Once per block.
    pub(super) fn fpu_guard(&mut self) {
        if self.ctx.fpu_checked {
            return;
        }
        self.ctx.fpu_checked = true;

        let status = self.push(ValueKind::LoadState { field: StateField::Cop0(cop0::STATUS as u8) });
        let mask = self.constant(ValueType::U64, status::CU1);
        let enabled = self.binary(BinaryOp::And, status, mask);
        let zero = self.constant(ValueType::U64, 0);
        let disabled = self.check(CmpMode::Eq, enabled, zero);
        let exc = ExceptionDescriptor::coprocessor_unusable(1, self.exception_pc(), self.inst.delay_slot);
        self.exit_with_exception(disabled, exc);
    }

    fn shift_const(&mut self, op: ShiftOp, value: ValueId, amount: u64) -> ValueId {
        let amount = self.constant(ValueType::U8, amount);
        self.push(ValueKind::Shift { op, width: ShiftWidth::W64, value, amount })
    }

    /// 32 bit view of `reg`. Only the low word of the result is meaningful.
    pub(super) fn read_fpr32(&mut self, reg: u8) -> ValueId {
        if self.sysconfig.fr || reg & 1 == 0 {
            return self.ctx.load_reg(GuestReg::fpr(reg));
        }
        let pair = self.ctx.load_reg(GuestReg::fpr(reg & !1));
        let pair = self.to_class(RegClass::Gpr, pair);
        let high = self.shift_const(ShiftOp::RightLogical, pair, 32);
        self.to_class(RegClass::Fgr, high)
    }

    /// Write the low word of `value` to `reg`. `clean` says the upper word is already zero.
    pub(super) fn write_fpr32(&mut self, reg: u8, value: ValueId, clean: bool) {
        if self.sysconfig.fr {
            let value = if clean {
                value
            } else {
                let value = self.to_class(RegClass::Gpr, value);
                self.cast(ValueType::U32, value)
            };
            let value = self.to_class(RegClass::Fgr, value);
            self.ctx.bind_reg(GuestReg::fpr(reg), value);
            return;
        }

        let slot = GuestReg::fpr(reg & !1);
        let old = self.ctx.load_reg(slot);
        let old = self.to_class(RegClass::Gpr, old);
        let value = self.to_class(RegClass::Gpr, value);
        let merged = if reg & 1 == 0 {
            let mask = self.constant(ValueType::U64, 0xffff_ffff_0000_0000);
            let high = self.binary(BinaryOp::And, old, mask);
            let low = if clean { value } else { self.cast(ValueType::U32, value) };
            self.binary(BinaryOp::Or, high, low)
        } else {
            let low = self.cast(ValueType::U32, old);
            let high = self.shift_const(ShiftOp::Left, value, 32);
            self.binary(BinaryOp::Or, high, low)
        };
        let merged = self.to_class(RegClass::Fgr, merged);
        self.ctx.bind_reg(slot, merged);
    }

    pub(super) fn read_fpr64(&mut self, reg: u8) -> ValueId {
        let slot = fpr64_index(self.sysconfig.fr, reg) as u8;
        self.ctx.load_reg(GuestReg::fpr(slot))
    }

    pub(super) fn write_fpr64(&mut self, reg: u8, value: ValueId) {
        let slot = fpr64_index(self.sysconfig.fr, reg) as u8;
        let value = self.to_class(RegClass::Fgr, value);
        self.ctx.bind_reg(GuestReg::fpr(slot), value);
    }

    fn read_fmt(&mut self, reg: u8, fmt: FloatFormat) -> ValueId {
        if fmt.is_64bit() {
            self.read_fpr64(reg)
        } else {
            self.read_fpr32(reg)
        }
    }

    fn write_fmt(&mut self, reg: u8, fmt: FloatFormat, value: ValueId, clean: bool) {
        if fmt.is_64bit() {
            self.write_fpr64(reg, value)
        } else {
            self.write_fpr32(reg, value, clean)
        }
    }

    pub(super) fn move_from_cop1(&mut self, rt: u8, fs: u8, double: bool) {
        let value = if double {
            let value = self.read_fpr64(fs);
            self.to_class(RegClass::Gpr, value)
        } else {
            let value = self.read_fpr32(fs);
            let value = self.to_class(RegClass::Gpr, value);
            self.cast(ValueType::S32, value)
        };
        self.set_gpr(rt, value);
    }

    pub(super) fn move_to_cop1(&mut self, rt: u8, fs: u8, double: bool) {
        let value = self.gpr(rt);
        if double {
            self.write_fpr64(fs, value);
        } else {
            self.write_fpr32(fs, value, false);
        }
    }

    pub(super) fn move_control_from_cop1(&mut self, rt: u8, fs: u8) {
        let value = match fs {
            0 => self.constant(ValueType::U64, FCR0 as u64),
            31 => {
                let fcr31 = self.push(ValueKind::LoadState { field: StateField::Fcr31 });
                self.cast(ValueType::S32, fcr31)
            }
            _ => self.constant(ValueType::U64, 0),
        };
        self.set_gpr(rt, value);
    }

    pub(super) fn move_control_to_cop1(&mut self, rt: u8, fs: u8) {
        if fs != 31 {
            return;
        }
        let value = self.gpr(rt);
        let mask = self.constant(ValueType::U64, FCR31_WRITE_MASK as u64);
        let value = self.binary(BinaryOp::And, value, mask);
        self.push(ValueKind::StoreState { field: StateField::Fcr31, value });
    }

    fn arith_format(&self) -> Result<FloatFormat, CompileError> {
        FloatFormat::arith_from_field(self.inst.inst.f().fmt()).ok_or_else(|| self.reserved())
    }

    pub(super) fn float_arith(&mut self, op: FloatOp) -> Result<(), CompileError> {
        let fmt = self.arith_format()?;
        let f = self.inst.inst.f();
        let lhs = self.read_fmt(f.fs(), fmt);
        let rhs = self.read_fmt(f.ft(), fmt);
        let result = self.push(ValueKind::FloatBinary { op, fmt, lhs, rhs });
        self.write_fmt(f.fd(), fmt, result, true);
        Ok(())
    }

    pub(super) fn float_unary(&mut self, op: FloatUnaryOp) -> Result<(), CompileError> {
        let fmt = self.arith_format()?;
        let f = self.inst.inst.f();
        let operand = self.read_fmt(f.fs(), fmt);
        let result = self.push(ValueKind::FloatUnary { op, fmt, operand });
        self.write_fmt(f.fd(), fmt, result, true);
        Ok(())
    }

    pub(super) fn float_move(&mut self) -> Result<(), CompileError> {
        let fmt = self.arith_format()?;
        let f = self.inst.inst.f();
        let value = self.read_fmt(f.fs(), fmt);
        self.write_fmt(f.fd(), fmt, value, false);
        Ok(())
    }

    pub(super) fn float_convert(&mut self, to: FloatFormat, round: RoundMode) -> Result<(), CompileError> {
        let f = self.inst.inst.f();
        let from = FloatFormat::from_field(f.fmt())
            .filter(|&from| fpu::is_valid_conversion(from, to))
            .ok_or_else(|| self.reserved())?;
        let operand = self.read_fmt(f.fs(), from);
        let result = self.push(ValueKind::FloatConvert { from, to, round, operand });
        self.write_fmt(f.fd(), to, result, true);
        Ok(())
    }

    pub(super) fn float_compare(&mut self) -> Result<(), CompileError> {
        let fmt = self.arith_format()?;
        let f = self.inst.inst.f();
        let lhs = self.read_fmt(f.fs(), fmt);
        let rhs = self.read_fmt(f.ft(), fmt);
        self.push(ValueKind::FloatCompare { cond: f.funct() & 0xf, fmt, lhs, rhs });
        Ok(())
    }
}
