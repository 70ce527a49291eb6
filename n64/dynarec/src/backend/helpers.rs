//! Runtime routines behind `Call`. Each one is the interpreter's own semantics.

use vr4300::{exception, memory, Fault};

use super::exec::ExecContext;
use crate::ir::Helper;

pub fn call(helper: Helper, ctx: &mut ExecContext<'_>, args: &[u64]) -> Result<u64, Fault> {
    let arg = |i: usize| args.get(i).copied().unwrap_or(0);
    let state = &mut *ctx.state;
    let bus = &mut *ctx.bus;
    let mmu = &mut *ctx.mmu;

    match helper {
        Helper::MoveFromCop0 { reg, double } => Ok(state.cop0.read(reg, double)),
        Helper::MoveToCop0 { reg, double } => {
            state.cop0.write(reg, arg(0), double);
            Ok(0)
        }
        Helper::TlbRead => {
            mmu.tlb_read(&mut state.cop0);
            Ok(0)
        }
        Helper::TlbWriteIndexed => {
            mmu.tlb_write_indexed(&mut state.cop0);
            Ok(0)
        }
        Helper::TlbWriteRandom => {
            mmu.tlb_write_random(&mut state.cop0);
            Ok(0)
        }
        Helper::TlbProbe => {
            mmu.tlb_probe(&mut state.cop0);
            Ok(0)
        }
        Helper::Eret => Ok(exception::eret(state)),
        Helper::LoadLeft { size } => memory::load_left(bus, mmu, &state.cop0, arg(0), arg(1), size),
        Helper::LoadRight { size } => memory::load_right(bus, mmu, &state.cop0, arg(0), arg(1), size),
        Helper::StoreLeft { size } => memory::store_left(bus, mmu, &state.cop0, arg(0), arg(1), size).map(|()| 0),
        Helper::StoreRight { size } => memory::store_right(bus, mmu, &state.cop0, arg(0), arg(1), size).map(|()| 0),
        Helper::LoadLinked { size } => memory::load_linked(bus, mmu, state, arg(0), size),
        Helper::StoreConditional { size } => memory::store_conditional(bus, mmu, state, arg(0), arg(1), size),
    }
}
