//! Lowering allocated IR to threaded code.
//!
//! Block layout: `spill_slots: u16`, then one op per IR value that does something at runtime,
//! then `END retired:u32`. Immediate constants emit nothing, their users carry the value.

use vr4300::ExceptionDescriptor;

use super::{op, tag, Code, Operand};
use crate::error::CompileError;
pub use crate::ir::MAX_HELPER_ARGS;
use crate::ir::{BlockExit, ExitSite, Helper, IrContext, RegClass, StateField, ValueId, ValueKind};
use crate::regalloc::{Allocation, Allocations};

/// Growable byte buffer the encoder writes into. Little-endian throughout.
#[derive(Debug, Default)]
pub struct CodeBuffer {
    code: Vec<u8>,
}

impl CodeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { code: Vec::with_capacity(capacity) }
    }

    pub fn clear(&mut self) {
        self.code.clear();
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn emit_u8(&mut self, byte: u8) {
        self.code.push(byte);
    }

    pub fn emit_u16(&mut self, value: u16) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    pub fn emit_u32(&mut self, value: u32) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    pub fn emit_u64(&mut self, value: u64) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    fn emit_bool(&mut self, value: bool) {
        self.emit_u8(value as u8);
    }

    fn emit_code<T: Code>(&mut self, value: T) {
        self.emit_u8(value.code());
    }

    fn emit_operand(&mut self, operand: Operand) {
        match operand {
            Operand::Gpr(r) => {
                self.emit_u8(tag::GPR);
                self.emit_u8(r);
            }
            Operand::Fgr(r) => {
                self.emit_u8(tag::FGR);
                self.emit_u8(r);
            }
            Operand::Spill(slot) => {
                self.emit_u8(tag::SPILL);
                self.emit_u16(slot);
            }
            Operand::Imm(value) => {
                self.emit_u8(tag::IMM);
                self.emit_u64(value);
            }
        }
    }

    fn emit_field(&mut self, field: StateField) {
        let (kind, reg) = match field {
            StateField::Hi => (0, 0),
            StateField::Lo => (1, 0),
            StateField::Fcr31 => (2, 0),
            StateField::Cop0(reg) => (3, reg),
        };
        self.emit_u8(kind);
        self.emit_u8(reg);
    }

    fn emit_exception(&mut self, exc: &ExceptionDescriptor) {
        self.emit_u8(exc.code as u8);
        self.emit_u64(exc.pc);
        self.emit_bool(exc.delay_slot);
        self.emit_bool(exc.bad_vaddr.is_some());
        self.emit_u64(exc.bad_vaddr.unwrap_or(0));
        self.emit_bool(exc.refill);
        self.emit_u8(exc.coprocessor);
    }

    fn emit_helper(&mut self, helper: Helper) {
        let (kind, a, b) = match helper {
            Helper::MoveFromCop0 { reg, double } => (0, reg, double as u8),
            Helper::MoveToCop0 { reg, double } => (1, reg, double as u8),
            Helper::TlbRead => (2, 0, 0),
            Helper::TlbWriteIndexed => (3, 0, 0),
            Helper::TlbWriteRandom => (4, 0, 0),
            Helper::TlbProbe => (5, 0, 0),
            Helper::Eret => (6, 0, 0),
            Helper::LoadLeft { size } => (7, size, 0),
            Helper::LoadRight { size } => (8, size, 0),
            Helper::StoreLeft { size } => (9, size, 0),
            Helper::StoreRight { size } => (10, size, 0),
            Helper::LoadLinked { size } => (11, size, 0),
            Helper::StoreConditional { size } => (12, size, 0),
        };
        self.emit_u8(kind);
        self.emit_u8(a);
        self.emit_u8(b);
    }
}

struct Lowering<'a> {
    ctx: &'a IrContext,
    allocs: &'a Allocations,
    buf: &'a mut CodeBuffer,
}

impl Lowering<'_> {
    fn operand(&self, id: ValueId) -> Result<Operand, CompileError> {
        match self.allocs.get(id) {
            Allocation::Immediate => match self.ctx.kind(id).as_constant() {
                Some(value) => Ok(Operand::Imm(value)),
                None => Err(CompileError::Unallocated { value: id.0 }),
            },
            Allocation::Register { class: RegClass::Gpr, reg } => Ok(Operand::Gpr(reg)),
            Allocation::Register { class: RegClass::Fgr, reg } => Ok(Operand::Fgr(reg)),
            Allocation::Spilled { slot, .. } => Ok(Operand::Spill(slot)),
            Allocation::None => Err(CompileError::Unallocated { value: id.0 }),
        }
    }

    /// Where a value's result goes. Immediates have no destination.
    fn dest(&self, id: ValueId) -> Result<Operand, CompileError> {
        match self.operand(id)? {
            Operand::Imm(_) => Err(CompileError::Unallocated { value: id.0 }),
            dest => Ok(dest),
        }
    }

    fn operands(&mut self, ids: &[ValueId]) -> Result<(), CompileError> {
        for &id in ids {
            let operand = self.operand(id)?;
            self.buf.emit_operand(operand);
        }
        Ok(())
    }

    fn site(&mut self, site: &ExitSite) -> Result<(), CompileError> {
        self.buf.emit_u64(site.pc);
        self.buf.emit_bool(site.delay_slot);
        self.buf.emit_u32(site.retired);
        self.buf.emit_u16(site.flush.len() as u16);
        // Byte length of the entries, patched once they're written
        let len_at = self.buf.len();
        self.buf.emit_u16(0);
        let start = self.buf.len();
        for &(reg, value) in &site.flush {
            self.buf.emit_u8(reg.0);
            let operand = self.operand(value)?;
            self.buf.emit_operand(operand);
        }
        let len = (self.buf.len() - start) as u16;
        self.buf.code[len_at..len_at + 2].copy_from_slice(&len.to_le_bytes());
        Ok(())
    }

    fn optional_site(&mut self, site: Option<&ExitSite>) -> Result<(), CompileError> {
        self.buf.emit_bool(site.is_some());
        match site {
            Some(site) => self.site(site),
            None => Ok(()),
        }
    }

    fn required_site<'s>(&self, id: ValueId, site: Option<&'s ExitSite>) -> Result<&'s ExitSite, CompileError> {
        site.ok_or(CompileError::MissingExitSite { value: id.0 })
    }

    fn lower(&mut self, id: ValueId) -> Result<(), CompileError> {
        let ctx = self.ctx;
        let value = ctx.get(id);
        let site = value.site.as_deref();
        match &value.kind {
            ValueKind::Constant { value: constant, .. } => {
                if self.allocs.get(id) != Allocation::Immediate {
                    let dst = self.dest(id)?;
                    self.buf.emit_u8(op::MOVE);
                    self.buf.emit_operand(dst);
                    self.buf.emit_operand(Operand::Imm(*constant));
                }
            }
            ValueKind::MoveRegClass { operand, .. } => {
                let dst = self.dest(id)?;
                self.buf.emit_u8(op::MOVE);
                self.buf.emit_operand(dst);
                self.operands(&[*operand])?;
            }
            ValueKind::LoadGuestReg { reg } => {
                let dst = self.dest(id)?;
                self.buf.emit_u8(op::LOAD_GUEST);
                self.buf.emit_operand(dst);
                self.buf.emit_u8(reg.0);
            }
            ValueKind::FlushGuestReg { reg, value } => {
                self.buf.emit_u8(op::FLUSH_GUEST);
                self.buf.emit_u8(reg.0);
                self.operands(&[*value])?;
            }
            ValueKind::Binary { op: bin, lhs, rhs } => {
                let dst = self.dest(id)?;
                self.buf.emit_u8(op::BINARY);
                self.buf.emit_code(*bin);
                self.buf.emit_operand(dst);
                self.operands(&[*lhs, *rhs])?;
                self.optional_site(site)?;
            }
            ValueKind::Not { operand } => {
                let dst = self.dest(id)?;
                self.buf.emit_u8(op::NOT);
                self.buf.emit_operand(dst);
                self.operands(&[*operand])?;
            }
            ValueKind::MaskAndCast { ty, operand } => {
                let dst = self.dest(id)?;
                self.buf.emit_u8(op::CAST);
                self.buf.emit_code(*ty);
                self.buf.emit_operand(dst);
                self.operands(&[*operand])?;
            }
            ValueKind::Shift { op: shift, width, value, amount } => {
                let dst = self.dest(id)?;
                self.buf.emit_u8(op::SHIFT);
                self.buf.emit_code(*shift);
                self.buf.emit_code(*width);
                self.buf.emit_operand(dst);
                self.operands(&[*value, *amount])?;
            }
            ValueKind::CheckCondition { cmp, lhs, rhs } => {
                let dst = self.dest(id)?;
                self.buf.emit_u8(op::CHECK);
                self.buf.emit_code(*cmp);
                self.buf.emit_operand(dst);
                self.operands(&[*lhs, *rhs])?;
            }
            ValueKind::TlbLookup { vaddr, access, size } => {
                let dst = self.dest(id)?;
                let site = self.required_site(id, site)?;
                self.buf.emit_u8(op::TLB_LOOKUP);
                self.buf.emit_code(*access);
                self.buf.emit_u8(*size);
                self.buf.emit_operand(dst);
                self.operands(&[*vaddr])?;
                self.site(site)?;
            }
            ValueKind::Load { ty, address, .. } => {
                let dst = self.dest(id)?;
                self.buf.emit_u8(op::LOAD);
                self.buf.emit_code(*ty);
                self.buf.emit_operand(dst);
                self.operands(&[*address])?;
            }
            ValueKind::Store { size, address, value } => {
                self.buf.emit_u8(op::STORE);
                self.buf.emit_u8(*size);
                self.operands(&[*address, *value])?;
            }
            ValueKind::LoadState { field } => {
                let dst = self.dest(id)?;
                self.buf.emit_u8(op::LOAD_STATE);
                self.buf.emit_field(*field);
                self.buf.emit_operand(dst);
            }
            ValueKind::StoreState { field, value } => {
                self.buf.emit_u8(op::STORE_STATE);
                self.buf.emit_field(*field);
                self.operands(&[*value])?;
            }
            ValueKind::MulDiv { op: muldiv, lhs, rhs } => {
                self.buf.emit_u8(op::MUL_DIV);
                self.buf.emit_code(*muldiv);
                self.operands(&[*lhs, *rhs])?;
            }
            ValueKind::SetBlockExitPc { pc } => {
                self.buf.emit_u8(op::SET_EXIT_PC);
                self.operands(&[*pc])?;
            }
            ValueKind::SetCondBlockExitPc { cond, if_true, if_false } => {
                self.buf.emit_u8(op::SET_COND_EXIT_PC);
                self.operands(&[*cond, *if_true, *if_false])?;
            }
            ValueKind::CondBlockExit { cond, exit } => {
                let site = self.required_site(id, site)?;
                self.buf.emit_u8(op::COND_EXIT);
                self.operands(&[*cond])?;
                match exit {
                    BlockExit::Exception(exc) => {
                        self.buf.emit_u8(0);
                        self.buf.emit_exception(exc);
                    }
                    BlockExit::Branch { pc } => {
                        self.buf.emit_u8(1);
                        self.buf.emit_u64(*pc);
                    }
                }
                self.site(site)?;
            }
            ValueKind::Call { helper, args } => {
                let dst = if helper.has_result() { Some(self.dest(id)?) } else { None };
                self.buf.emit_u8(op::CALL);
                self.buf.emit_helper(*helper);
                self.buf.emit_bool(dst.is_some());
                if let Some(dst) = dst {
                    self.buf.emit_operand(dst);
                }
                self.buf.emit_u8(args.len() as u8);
                self.operands(args.as_slice())?;
                self.optional_site(site)?;
            }
            ValueKind::FloatBinary { op: fop, fmt, lhs, rhs } => {
                let dst = self.dest(id)?;
                self.buf.emit_u8(op::FLOAT_BINARY);
                self.buf.emit_code(*fop);
                self.buf.emit_code(*fmt);
                self.buf.emit_operand(dst);
                self.operands(&[*lhs, *rhs])?;
            }
            ValueKind::FloatUnary { op: fop, fmt, operand } => {
                let dst = self.dest(id)?;
                self.buf.emit_u8(op::FLOAT_UNARY);
                self.buf.emit_code(*fop);
                self.buf.emit_code(*fmt);
                self.buf.emit_operand(dst);
                self.operands(&[*operand])?;
            }
            ValueKind::FloatConvert { from, to, round, operand } => {
                let dst = self.dest(id)?;
                self.buf.emit_u8(op::FLOAT_CONVERT);
                self.buf.emit_code(*from);
                self.buf.emit_code(*to);
                self.buf.emit_code(*round);
                self.buf.emit_operand(dst);
                self.operands(&[*operand])?;
            }
            ValueKind::FloatCompare { cond, fmt, lhs, rhs } => {
                self.buf.emit_u8(op::FLOAT_COMPARE);
                self.buf.emit_u8(*cond);
                self.buf.emit_code(*fmt);
                self.operands(&[*lhs, *rhs])?;
            }
        }
        Ok(())
    }
}

/// Encode an allocated block into `buf`, which is cleared first.
///
/// `retired` is the number of guest instructions the block runs when it falls off the end.
pub fn encode_block(
    ctx: &IrContext,
    allocs: &Allocations,
    retired: u32,
    buf: &mut CodeBuffer,
) -> Result<(), CompileError> {
    buf.clear();
    buf.emit_u16(allocs.spill_slots as u16);
    let mut lowering = Lowering { ctx, allocs, buf };
    for id in ctx.ids() {
        lowering.lower(id)?;
    }
    lowering.buf.emit_u8(op::END);
    lowering.buf.emit_u32(retired);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{GuestReg, ValueType};
    use crate::platform::X86_64;
    use crate::regalloc::allocate;

    #[test]
    fn immediate_constants_emit_nothing() {
        let mut ctx = IrContext::new();
        let one = ctx.constant(ValueType::S8, 1);
        let reg = ctx.load_reg(GuestReg::gpr(1));
        let sum = ctx.push(ValueKind::Binary { op: crate::ir::BinaryOp::Add, lhs: reg, rhs: one });
        ctx.push(ValueKind::FlushGuestReg { reg: GuestReg::gpr(1), value: sum });
        let allocs = allocate(&ctx, &X86_64).unwrap();
        let mut buf = CodeBuffer::new();
        encode_block(&ctx, &allocs, 1, &mut buf).unwrap();

        let code = buf.code();
        assert_eq!(&code[..2], &[0, 0]);
        assert_eq!(code[2], op::LOAD_GUEST);
        assert_eq!(&code[code.len() - 5..], &[op::END, 1, 0, 0, 0]);
    }

    #[test]
    fn unallocated_operand_is_an_error() {
        let mut ctx = IrContext::new();
        let reg = ctx.load_reg(GuestReg::gpr(1));
        ctx.push(ValueKind::FlushGuestReg { reg: GuestReg::gpr(2), value: reg });
        let allocs = Allocations::default();
        let err = encode_block(&ctx, &allocs, 1, &mut CodeBuffer::new()).unwrap_err();
        assert_eq!(err, CompileError::Unallocated { value: 0 });
    }
}
