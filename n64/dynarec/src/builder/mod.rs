//! Guest instructions to IR.
//!
//! Every instruction goes through one exhaustive match on its `ExMode`. Guest registers are
//! read through the context's register map, so a register used twice in a block is loaded
//! once, and written registers are only flushed back at the end of the block or when an
//! exit needs precise state.

mod branch;
mod cop0;
mod fpu;
mod memory;

use vr4300::instructions::{CmpMode, ExMode, Form};
use vr4300::{ExceptionCode, ExceptionDescriptor};

use crate::error::CompileError;
use crate::formatter::{TranslationUnit, UnitInstruction};
use crate::ir::{BinaryOp, BlockExit, ExitSite, GuestReg, IrContext, RegClass, StateField, ValueId, ValueKind, ValueType};

/// Machine configuration a block was compiled under. A block is only reused while the live
/// configuration matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SysConfig {
    /// Status.FR, which decides how FPU registers pair up
    pub fr: bool,
}

impl SysConfig {
    pub fn current(cop0: &vr4300::Cop0) -> SysConfig {
        SysConfig { fr: cop0.fr() }
    }
}

pub(crate) struct Builder<'a> {
    ctx: &'a mut IrContext,
    sysconfig: SysConfig,
    inst: UnitInstruction,
    index: usize,
}

/// Translate a whole unit into a freshly reset `ctx`
pub fn build_ir(ctx: &mut IrContext, unit: &TranslationUnit, sysconfig: SysConfig) -> Result<(), CompileError> {
    ctx.reset();
    let Some(&first) = unit.instructions.first() else {
        return Ok(());
    };

    let mut builder = Builder { ctx, sysconfig, inst: first, index: 0 };
    for (index, &inst) in unit.instructions.iter().enumerate() {
        builder.inst = inst;
        builder.index = index;
        builder.translate()?;
    }

    if let Some(fault) = unit.delay_slot_fault {
        builder.delay_slot_fetch_fault(fault);
    }
    builder.finish(unit.end_pc());
    Ok(())
}

impl Builder<'_> {
    /// Address reported for an exception raised by the current instruction
    fn exception_pc(&self) -> u64 {
        if self.inst.delay_slot {
            self.inst.pc.wrapping_sub(4)
        } else {
            self.inst.pc
        }
    }

    /// Exit site for leaving at the current instruction, with it counted as executed
    fn site(&self) -> ExitSite {
        self.site_retiring(self.index as u32 + 1)
    }

    fn site_retiring(&self, retired: u32) -> ExitSite {
        ExitSite {
            pc: self.exception_pc(),
            delay_slot: self.inst.delay_slot,
            retired,
            flush: self.ctx.flush_list(),
        }
    }

    fn push(&mut self, kind: ValueKind) -> ValueId {
        self.ctx.push(kind)
    }

    fn push_raising(&mut self, kind: ValueKind) -> ValueId {
        let site = self.site();
        self.ctx.push_with_site(kind, site)
    }

    fn constant(&mut self, ty: ValueType, value: u64) -> ValueId {
        self.ctx.constant(ty, value)
    }

    fn gpr(&mut self, reg: u8) -> ValueId {
        self.ctx.load_reg(GuestReg::gpr(reg))
    }

    fn set_gpr(&mut self, reg: u8, value: ValueId) {
        self.ctx.bind_reg(GuestReg::gpr(reg), value)
    }

    fn binary(&mut self, op: BinaryOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        if op.traps() {
            self.push_raising(ValueKind::Binary { op, lhs, rhs })
        } else {
            self.push(ValueKind::Binary { op, lhs, rhs })
        }
    }

    fn cast(&mut self, ty: ValueType, operand: ValueId) -> ValueId {
        self.push(ValueKind::MaskAndCast { ty, operand })
    }

    fn check(&mut self, cmp: CmpMode, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.push(ValueKind::CheckCondition { cmp, lhs, rhs })
    }

    /// Raise `exc` when `cond` is non-zero
    fn exit_with_exception(&mut self, cond: ValueId, exc: ExceptionDescriptor) {
        self.push_raising(ValueKind::CondBlockExit { cond, exit: BlockExit::Exception(exc) });
    }

    fn raise(&mut self, code: ExceptionCode) {
        let always = self.constant(ValueType::U64, 1);
        let exc = ExceptionDescriptor::new(code, self.exception_pc(), self.inst.delay_slot);
        self.exit_with_exception(always, exc);
    }

    fn reserved(&self) -> CompileError {
        CompileError::Reserved { pc: self.inst.pc, word: self.inst.word() }
    }

    fn translate(&mut self) -> Result<(), CompileError> {
        let mode = self.inst.ex_mode();
        if mode.uses_fpu() {
            self.fpu_guard();
        }

        let inst = self.inst.inst;
        let (i, r) = (inst.i(), inst.r());
        let form = self.inst.info.form().copied().unwrap_or(Form::Bare);

        // Second ALU operand and destination, by encoding
        let (operand, dest) = match form {
            Form::RegImm(true) => (Operand::Imm(ValueType::S16, i.simm()), i.rt()),
            Form::RegImm(false) => (Operand::Imm(ValueType::U16, i.imm() as u64), i.rt()),
            Form::TrapImm(_) => (Operand::Imm(ValueType::S16, i.simm()), 0),
            _ => (Operand::Reg(r.rt()), r.rd()),
        };

        use ExMode::*;
        match mode {
            Nop | CacheOp => {}
            Jump | JumpLink | JumpReg | JumpRegLink => self.jump(mode),
            Branch(cmp) | BranchLikely(cmp) | BranchLink(cmp) | BranchLinkLikely(cmp) => {
                let rhs = if form == Form::BranchRegReg { Some(i.rt()) } else { None };
                self.branch(mode, cmp, rhs)
            }
            BranchCop1 { on_true, likely } => self.branch_cop1(on_true, likely),
            Add32 | Add64 | Sub32 | Sub64 | AddU32 | AddU64 | SubU32 | SubU64 | SetLess | SetLessU | And | Or
            | Xor | Nor => {
                let lhs = self.gpr(i.rs());
                let rhs = self.operand(operand);
                let value = self.alu(mode, lhs, rhs)?;
                self.set_gpr(dest, value);
            }
            InsertUpper => {
                let value = self.constant(ValueType::S32, (i.imm() as u64) << 16);
                self.set_gpr(i.rt(), value);
            }
            Shift(op, width) => {
                let amount = match form {
                    Form::ShiftImm(offset) => self.constant(ValueType::U8, (r.sa() + offset) as u64),
                    _ => self.gpr(r.rs()),
                };
                let value = self.gpr(r.rt());
                let shifted = self.push(ValueKind::Shift { op, width, value, amount });
                self.set_gpr(r.rd(), shifted);
            }
            MulDiv(op) => {
                let lhs = self.gpr(r.rs());
                let rhs = self.gpr(r.rt());
                self.push(ValueKind::MulDiv { op, lhs, rhs });
            }
            LoadInternal(reg) => {
                let field = internal_field(reg);
                let value = self.push(ValueKind::LoadState { field });
                self.set_gpr(r.rd(), value);
            }
            StoreInternal(reg) => {
                let value = self.gpr(r.rs());
                self.push(ValueKind::StoreState { field: internal_field(reg), value });
            }
            Mem(size) | MemUnsigned(size) => self.load_store(form, size, matches!(mode, Mem(_))),
            MemLeft(size) | MemRight(size) => self.load_store_unaligned(form, size, matches!(mode, MemLeft(_))),
            MemLinked(size) => self.load_store_linked(form, size),
            FpuMem(size) => self.load_store_fpu(form, size),
            Trap(cmp) => {
                let lhs = self.gpr(i.rs());
                let rhs = self.operand(operand);
                let cond = self.check(cmp, lhs, rhs);
                let exc = ExceptionDescriptor::new(ExceptionCode::Trap, self.exception_pc(), self.inst.delay_slot);
                self.exit_with_exception(cond, exc);
            }
            Syscall => self.raise(ExceptionCode::Syscall),
            Break => self.raise(ExceptionCode::Breakpoint),
            MoveFromCop0 { double } => self.move_from_cop0(r.rt(), r.rd(), double),
            MoveToCop0 { double } => self.move_to_cop0(r.rt(), r.rd(), double),
            TlbRead | TlbWriteIndexed | TlbWriteRandom | TlbProbe => self.tlb_op(mode),
            Eret => self.eret(),
            MoveFromCop1 { double } => self.move_from_cop1(r.rt(), r.rd(), double),
            MoveToCop1 { double } => self.move_to_cop1(r.rt(), r.rd(), double),
            MoveControlFromCop1 => self.move_control_from_cop1(r.rt(), r.rd()),
            MoveControlToCop1 => self.move_control_to_cop1(r.rt(), r.rd()),
            FloatArith(op) => self.float_arith(op)?,
            FloatUnary(op) => self.float_unary(op)?,
            FloatMove => self.float_move()?,
            FloatConvert(to, round) => self.float_convert(to, round)?,
            FloatCompare => self.float_compare()?,
        }
        Ok(())
    }

    fn operand(&mut self, operand: Operand) -> ValueId {
        match operand {
            Operand::Imm(ty, value) => self.constant(ty, value),
            Operand::Reg(reg) => self.gpr(reg),
        }
    }

    fn alu(&mut self, mode: ExMode, lhs: ValueId, rhs: ValueId) -> Result<ValueId, CompileError> {
        use ExMode::*;
        let value = match mode {
            Add32 => self.binary(BinaryOp::AddTrap32, lhs, rhs),
            Add64 => self.binary(BinaryOp::AddTrap64, lhs, rhs),
            Sub32 => self.binary(BinaryOp::SubTrap32, lhs, rhs),
            Sub64 => self.binary(BinaryOp::SubTrap64, lhs, rhs),
            AddU32 => {
                let sum = self.binary(BinaryOp::Add, lhs, rhs);
                self.cast(ValueType::S32, sum)
            }
            SubU32 => {
                let diff = self.binary(BinaryOp::Sub, lhs, rhs);
                self.cast(ValueType::S32, diff)
            }
            AddU64 => self.binary(BinaryOp::Add, lhs, rhs),
            SubU64 => self.binary(BinaryOp::Sub, lhs, rhs),
            SetLess => self.check(CmpMode::Lt, lhs, rhs),
            SetLessU => self.check(CmpMode::LtU, lhs, rhs),
            And => self.binary(BinaryOp::And, lhs, rhs),
            Or => self.binary(BinaryOp::Or, lhs, rhs),
            Xor => self.binary(BinaryOp::Xor, lhs, rhs),
            Nor => {
                let or = self.binary(BinaryOp::Or, lhs, rhs);
                self.push(ValueKind::Not { operand: or })
            }
            _ => return Err(CompileError::Internal { pc: self.inst.pc, what: "not an ALU op" }),
        };
        Ok(value)
    }

    /// Convert to `class` if the value lives in the other register file
    fn to_class(&mut self, class: RegClass, value: ValueId) -> ValueId {
        if self.ctx.kind(value).result_class() == Some(class) {
            value
        } else {
            self.push(ValueKind::MoveRegClass { to: class, operand: value })
        }
    }

    /// Write back every modified register and make sure the block knows where to go next
    fn finish(&mut self, end_pc: u64) {
        for (reg, value) in self.ctx.flush_list() {
            self.push(ValueKind::FlushGuestReg { reg, value });
        }
        if !self.ctx.exit_pc_set {
            let pc = self.constant(ValueType::U64, end_pc);
            self.push(ValueKind::SetBlockExitPc { pc });
            self.ctx.exit_pc_set = true;
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Operand {
    Imm(ValueType, u64),
    Reg(u8),
}

fn internal_field(reg: vr4300::instructions::InternalReg) -> StateField {
    match reg {
        vr4300::instructions::InternalReg::HI => StateField::Hi,
        vr4300::instructions::InternalReg::LO => StateField::Lo,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::formatter::form_block;
    use vr4300::{asm, Cop0, Mmu, Ram};

    pub const BASE: u64 = 0xffff_ffff_8000_0000;

    pub fn build(program: &[u32], sysconfig: SysConfig) -> IrContext {
        let mut ram = Ram::new(0x2000);
        ram.load_words(0, program);
        let mut mmu = Mmu::new();
        let unit = form_block(BASE, 0, &mut ram, &mut mmu, &Cop0::new()).unwrap();
        let mut ctx = IrContext::new();
        build_ir(&mut ctx, &unit, sysconfig).unwrap();
        ctx
    }

    fn kinds(ctx: &IrContext) -> Vec<ValueKind> {
        ctx.iter().map(|(_, v)| v.kind.clone()).collect()
    }

    #[test]
    fn registers_are_loaded_once_and_flushed_at_the_end() {
        let ctx = build(&[asm::addu(3, 1, 2), asm::addu(4, 1, 3), asm::syscall()], SysConfig::default());
        let loads = kinds(&ctx).iter().filter(|k| matches!(k, ValueKind::LoadGuestReg { .. })).count();
        assert_eq!(loads, 2);
        let flushed: Vec<_> = kinds(&ctx)
            .into_iter()
            .filter_map(|k| match k {
                ValueKind::FlushGuestReg { reg, .. } => Some(reg),
                _ => None,
            })
            .collect();
        assert_eq!(flushed, vec![GuestReg::gpr(3), GuestReg::gpr(4)]);
    }

    #[test]
    fn trapping_add_captures_flush_list_before_its_own_write() {
        let ctx = build(&[asm::addiu(5, 0, 1), asm::add(6, 5, 5), asm::syscall()], SysConfig::default());
        let (_, add) = ctx
            .iter()
            .find(|(_, v)| matches!(v.kind, ValueKind::Binary { op: BinaryOp::AddTrap32, .. }))
            .unwrap();
        let site = add.site.as_ref().unwrap();
        assert_eq!(site.pc, BASE + 4);
        assert_eq!(site.retired, 2);
        assert_eq!(site.flush.iter().map(|(r, _)| *r).collect::<Vec<_>>(), vec![GuestReg::gpr(5)]);
    }

    #[test]
    fn syscall_exits_with_exception() {
        let ctx = build(&[asm::syscall()], SysConfig::default());
        let exit = ctx.iter().find_map(|(_, v)| match &v.kind {
            ValueKind::CondBlockExit { exit: BlockExit::Exception(exc), .. } => Some(*exc),
            _ => None,
        });
        assert_eq!(exit.unwrap().code, ExceptionCode::Syscall);
    }

    #[test]
    fn block_without_branch_exits_to_the_next_instruction() {
        let ctx = build(&[asm::addiu(1, 0, 1), asm::eret()], SysConfig::default());
        assert!(ctx.iter().any(|(_, v)| matches!(v.kind, ValueKind::Call { helper: crate::ir::Helper::Eret, .. })));
        let exits = kinds(&ctx).iter().filter(|k| matches!(k, ValueKind::SetBlockExitPc { .. })).count();
        assert_eq!(exits, 1);
    }

    #[test]
    fn writes_to_r0_are_dropped() {
        let ctx = build(&[asm::addiu(0, 0, 5), asm::syscall()], SysConfig::default());
        assert!(!kinds(&ctx).iter().any(|k| matches!(k, ValueKind::FlushGuestReg { .. })));
    }

    #[test]
    fn alu_rejects_other_modes() {
        let mut ram = Ram::new(0x100);
        ram.load_words(0, &[asm::addu(1, 2, 3), asm::syscall()]);
        let unit = form_block(BASE, 0, &mut ram, &mut Mmu::new(), &Cop0::new()).unwrap();
        let mut ctx = IrContext::new();
        let mut builder = Builder { ctx: &mut ctx, sysconfig: SysConfig::default(), inst: unit.instructions[0], index: 0 };
        let lhs = builder.constant(ValueType::U64, 1);
        let rhs = builder.constant(ValueType::U64, 2);
        assert!(builder.alu(ExMode::AddU64, lhs, rhs).is_ok());
        assert_eq!(
            builder.alu(ExMode::Syscall, lhs, rhs),
            Err(CompileError::Internal { pc: BASE, what: "not an ALU op" })
        );
    }
}
