use vr4300::instructions::{CmpMode, ExMode};
use vr4300::state::FCR31_CONDITION;
use vr4300::{ExceptionDescriptor, Fault};

use super::Builder;
use crate::ir::{BinaryOp, BlockExit, ExitSite, GuestReg, StateField, ValueId, ValueKind, ValueType};

impl Builder<'_> {
    /// Where execution continues when a branch at the current pc isn't taken
    fn skip_delay_slot(&self) -> u64 {
        self.inst.pc.wrapping_add(8)
    }

    fn link(&mut self, reg: u8) {
        let ra = self.constant(ValueType::U64, self.skip_delay_slot());
        self.ctx.bind_reg(GuestReg::gpr(reg), ra);
    }

    pub(super) fn jump(&mut self, mode: ExMode) {
        let pc = self.inst.pc;
        let target = match mode {
            ExMode::JumpReg | ExMode::JumpRegLink => self.gpr(self.inst.inst.r().rs()),
            _ => {
                let region = pc.wrapping_add(4) & !0x0fff_ffff;
                let target = region | ((self.inst.inst.j().target() as u64) << 2);
                self.constant(ValueType::U64, target)
            }
        };
        // Target is read before the link so `jalr r31, r31` sees the old value
        match mode {
            ExMode::JumpLink => self.link(31),
            ExMode::JumpRegLink => self.link(self.inst.inst.r().rd()),
            _ => {}
        }
        self.push(ValueKind::SetBlockExitPc { pc: target });
        self.ctx.exit_pc_set = true;
    }

    pub(super) fn branch(&mut self, mode: ExMode, cmp: CmpMode, rhs: Option<u8>) {
        let lhs = self.gpr(self.inst.inst.i().rs());
        let rhs = match rhs {
            Some(reg) => self.gpr(reg),
            None => self.constant(ValueType::U64, 0),
        };
        let cond = self.check(cmp, lhs, rhs);
        if matches!(mode, ExMode::BranchLink(_) | ExMode::BranchLinkLikely(_)) {
            self.link(31);
        }
        self.conditional_exit(cond, mode.is_likely_branch());
    }

    pub(super) fn branch_cop1(&mut self, on_true: bool, likely: bool) {
        let fcr31 = self.push(ValueKind::LoadState { field: StateField::Fcr31 });
        let mask = self.constant(ValueType::U64, FCR31_CONDITION as u64);
        let bit = self.binary(BinaryOp::And, fcr31, mask);
        let zero = self.constant(ValueType::U64, 0);
        let cmp = if on_true { CmpMode::Ne } else { CmpMode::Eq };
        let cond = self.check(cmp, bit, zero);
        self.conditional_exit(cond, likely);
    }

    fn conditional_exit(&mut self, cond: ValueId, likely: bool) {
        let offset = self.inst.inst.i().simm() << 2;
        let taken = self.constant(ValueType::U64, self.inst.pc.wrapping_add(4).wrapping_add(offset));
        let fall_through = self.constant(ValueType::U64, self.skip_delay_slot());
        self.push(ValueKind::SetCondBlockExitPc { cond, if_true: taken, if_false: fall_through });
        self.ctx.exit_pc_set = true;

        if likely {
            // Not taken: leave before the delay slot does anything
            let one = self.constant(ValueType::U64, 1);
            let not_taken = self.binary(BinaryOp::Xor, cond, one);
            let pc = self.skip_delay_slot();
            self.push_raising(ValueKind::CondBlockExit { cond: not_taken, exit: BlockExit::Branch { pc } });
        }
    }

    /// The unit's final branch has a delay slot that couldn't be fetched
    pub(super) fn delay_slot_fetch_fault(&mut self, fault: Fault) {
        let always = self.constant(ValueType::U64, 1);
        let branch_pc = self.inst.pc;
        let site = ExitSite {
            pc: branch_pc,
            delay_slot: true,
            retired: self.index as u32 + 2,
            flush: self.ctx.flush_list(),
        };
        let exc = ExceptionDescriptor::from_fault(fault, branch_pc, true);
        self.ctx.push_with_site(ValueKind::CondBlockExit { cond: always, exit: BlockExit::Exception(exc) }, site);
    }
}
