use vr4300::instructions::ExMode;

use super::Builder;
use crate::ir::{Helper, HelperArgs, ValueKind};

impl Builder<'_> {
    pub(super) fn move_from_cop0(&mut self, rt: u8, rd: u8, double: bool) {
        let value = self.push(ValueKind::Call { helper: Helper::MoveFromCop0 { reg: rd, double }, args: HelperArgs::NONE });
        self.set_gpr(rt, value);
    }

    pub(super) fn move_to_cop0(&mut self, rt: u8, rd: u8, double: bool) {
        let value = self.gpr(rt);
        self.push(ValueKind::Call { helper: Helper::MoveToCop0 { reg: rd, double }, args: HelperArgs::one(value) });
        // Status may have changed under us
        self.ctx.fpu_checked = false;
    }

    pub(super) fn tlb_op(&mut self, mode: ExMode) {
        let helper = match mode {
            ExMode::TlbRead => Helper::TlbRead,
            ExMode::TlbWriteIndexed => Helper::TlbWriteIndexed,
            ExMode::TlbWriteRandom => Helper::TlbWriteRandom,
            _ => Helper::TlbProbe,
        };
        self.push(ValueKind::Call { helper, args: HelperArgs::NONE });
    }

    pub(super) fn eret(&mut self) {
        let pc = self.push(ValueKind::Call { helper: Helper::Eret, args: HelperArgs::NONE });
        self.push(ValueKind::SetBlockExitPc { pc });
        self.ctx.exit_pc_set = true;
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::build;
    use super::super::SysConfig;
    use crate::ir::{GuestReg, Helper, ValueKind};
    use vr4300::asm;

    #[test]
    fn cop0_moves_call_out() {
        let ctx = build(&[asm::dmfc0(4, 14), asm::syscall()], SysConfig::default());
        let reg = ctx.mapped(GuestReg::gpr(4)).unwrap();
        assert!(matches!(
            ctx.kind(reg),
            ValueKind::Call { helper: Helper::MoveFromCop0 { reg: 14, double: true }, .. }
        ));
    }

    #[test]
    fn eret_result_is_the_exit_pc() {
        let ctx = build(&[asm::eret()], SysConfig::default());
        let (call, _) = ctx.iter().find(|(_, v)| matches!(v.kind, ValueKind::Call { .. })).unwrap();
        assert!(ctx.iter().any(|(_, v)| v.kind == ValueKind::SetBlockExitPc { pc: call }));
    }
}
