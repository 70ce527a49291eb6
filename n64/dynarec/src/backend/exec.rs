//! Runs threaded code against the guest state.

use tracing::trace;
use vr4300::exception::{self, ExceptionCode, ExceptionDescriptor};
use vr4300::state::FCR31_CONDITION;
use vr4300::{arith, fpu, memory, AddressTranslator, Bus, CpuState};

use super::decode::{Decoder, HostOp, Site};
use super::encode::MAX_HELPER_ARGS;
use super::{helpers, Operand};
use crate::error::DynarecError;
use crate::ir::{BlockExit, StateField};

/// Host register file: general registers first, then floating
pub const HOST_REGS: usize = 64;

/// What a block runs against
pub struct ExecContext<'a> {
    pub state: &'a mut CpuState,
    pub bus: &'a mut dyn Bus,
    pub mmu: &'a mut dyn AddressTranslator,
}

struct Frame<'s> {
    regs: [u64; HOST_REGS],
    spill: &'s mut [u64],
    exit_pc: Option<u64>,
    /// Offset of the op being run
    at: usize,
}

impl Frame<'_> {
    fn corrupt(&self) -> DynarecError {
        DynarecError::CorruptBlock { offset: self.at }
    }

    fn read(&self, operand: Operand) -> Result<u64, DynarecError> {
        let value = match operand {
            Operand::Gpr(r) if (r as usize) < 32 => Some(self.regs[r as usize]),
            Operand::Fgr(r) if (r as usize) < 32 => Some(self.regs[32 + r as usize]),
            Operand::Spill(slot) => self.spill.get(slot as usize).copied(),
            Operand::Imm(value) => Some(value),
            _ => None,
        };
        value.ok_or_else(|| self.corrupt())
    }

    fn write(&mut self, operand: Operand, value: u64) -> Result<(), DynarecError> {
        let slot = match operand {
            Operand::Gpr(r) if (r as usize) < 32 => Some(&mut self.regs[r as usize]),
            Operand::Fgr(r) if (r as usize) < 32 => Some(&mut self.regs[32 + r as usize]),
            Operand::Spill(slot) => self.spill.get_mut(slot as usize),
            _ => None,
        };
        match slot {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(self.corrupt()),
        }
    }
}

fn load_state(state: &CpuState, field: StateField) -> u64 {
    match field {
        StateField::Hi => state.hi,
        StateField::Lo => state.lo,
        StateField::Fcr31 => state.fcr31 as u64,
        StateField::Cop0(reg) => state.cop0.regs[reg as usize & 31],
    }
}

fn store_state(state: &mut CpuState, field: StateField, value: u64) {
    match field {
        StateField::Hi => state.hi = value,
        StateField::Lo => state.lo = value,
        StateField::Fcr31 => state.fcr31 = value as u32,
        StateField::Cop0(reg) => state.cop0.regs[reg as usize & 31] = value,
    }
}

/// Write back what the site names and report how many instructions retired
fn leave(frame: &Frame<'_>, state: &mut CpuState, site: &Site<'_>) -> Result<u32, DynarecError> {
    for entry in site.flush {
        let (reg, operand) = entry?;
        let value = frame.read(operand)?;
        if reg.is_fpr() {
            state.fgr[reg.number() as usize] = value;
        } else {
            state.write_gpr(reg.number(), value);
        }
    }
    Ok(site.retired)
}

fn raise(frame: &Frame<'_>, state: &mut CpuState, site: &Site<'_>, exc: ExceptionDescriptor) -> Result<u32, DynarecError> {
    let retired = leave(frame, state, site)?;
    trace!(target: "JIT", "block left with {:?} at {:#x}", exc.code, exc.pc);
    exception::raise(state, &exc);
    Ok(retired)
}

/// Run one block to its end or to the first exit taken.
///
/// Returns the number of guest instructions retired. `spill` is scratch kept across calls.
pub fn execute(code: &[u8], ctx: &mut ExecContext<'_>, spill: &mut Vec<u64>) -> Result<u32, DynarecError> {
    let mut decoder = Decoder::new(code)?;
    spill.clear();
    spill.resize(decoder.spill_slots() as usize, 0);
    let mut frame = Frame { regs: [0; HOST_REGS], spill: spill.as_mut_slice(), exit_pc: None, at: 0 };

    loop {
        frame.at = decoder.offset();
        let Some(op) = decoder.next() else {
            return Err(frame.corrupt());
        };
        match op? {
            HostOp::Move { dst, src } => {
                let value = frame.read(src)?;
                frame.write(dst, value)?;
            }
            HostOp::LoadGuest { dst, reg } => {
                let value = if reg.is_fpr() {
                    ctx.state.fgr[reg.number() as usize]
                } else {
                    ctx.state.gpr[reg.number() as usize]
                };
                frame.write(dst, value)?;
            }
            HostOp::FlushGuest { reg, value } => {
                let value = frame.read(value)?;
                if reg.is_fpr() {
                    ctx.state.fgr[reg.number() as usize] = value;
                } else {
                    ctx.state.write_gpr(reg.number(), value);
                }
            }
            HostOp::Binary { op, dst, lhs, rhs, site } => {
                let (a, b) = (frame.read(lhs)?, frame.read(rhs)?);
                match op.eval(a, b) {
                    Some(value) => frame.write(dst, value)?,
                    None => {
                        let site = site.ok_or_else(|| frame.corrupt())?;
                        let exc = ExceptionDescriptor::new(ExceptionCode::Overflow, site.pc, site.delay_slot);
                        return raise(&frame, ctx.state, &site, exc);
                    }
                }
            }
            HostOp::Not { dst, operand } => {
                let value = !frame.read(operand)?;
                frame.write(dst, value)?;
            }
            HostOp::Cast { ty, dst, operand } => {
                let value = ty.cast(frame.read(operand)?);
                frame.write(dst, value)?;
            }
            HostOp::Shift { op, width, dst, value, amount } => {
                let value = arith::shift(op, width, frame.read(value)?, frame.read(amount)?);
                frame.write(dst, value)?;
            }
            HostOp::Check { cmp, dst, lhs, rhs } => {
                let value = arith::compare(cmp, frame.read(lhs)?, frame.read(rhs)?) as u64;
                frame.write(dst, value)?;
            }
            HostOp::TlbLookup { access, size, dst, vaddr, site } => {
                let vaddr = frame.read(vaddr)?;
                match memory::translate(&mut *ctx.mmu, &ctx.state.cop0, vaddr, access, size) {
                    Ok(phys) => frame.write(dst, phys as u64)?,
                    Err(fault) => {
                        let exc = ExceptionDescriptor::from_fault(fault, site.pc, site.delay_slot);
                        return raise(&frame, ctx.state, &site, exc);
                    }
                }
            }
            HostOp::Load { ty, dst, address } => {
                let address = frame.read(address)? as u32;
                let value = ty.cast(ctx.bus.read(address, ty.size()));
                frame.write(dst, value)?;
            }
            HostOp::Store { size, address, value } => {
                let address = frame.read(address)? as u32;
                let value = frame.read(value)?;
                ctx.bus.write(address, size, value);
            }
            HostOp::LoadState { field, dst } => {
                let value = load_state(ctx.state, field);
                frame.write(dst, value)?;
            }
            HostOp::StoreState { field, value } => {
                let value = frame.read(value)?;
                store_state(ctx.state, field, value);
            }
            HostOp::MulDiv { op, lhs, rhs } => {
                let (hi, lo) = arith::mul_div(op, frame.read(lhs)?, frame.read(rhs)?);
                ctx.state.hi = hi;
                ctx.state.lo = lo;
            }
            HostOp::SetExitPc { pc } => frame.exit_pc = Some(frame.read(pc)?),
            HostOp::SetCondExitPc { cond, if_true, if_false } => {
                let pc = if frame.read(cond)? != 0 { frame.read(if_true)? } else { frame.read(if_false)? };
                frame.exit_pc = Some(pc);
            }
            HostOp::CondExit { cond, exit, site } => {
                if frame.read(cond)? != 0 {
                    return match exit {
                        BlockExit::Exception(exc) => raise(&frame, ctx.state, &site, exc),
                        BlockExit::Branch { pc } => {
                            let retired = leave(&frame, ctx.state, &site)?;
                            ctx.state.pc = pc;
                            Ok(retired)
                        }
                    };
                }
            }
            HostOp::Call { helper, dst, args, site } => {
                let mut values = [0; MAX_HELPER_ARGS];
                for (value, &arg) in values.iter_mut().zip(args.as_slice()) {
                    *value = frame.read(arg)?;
                }
                match helpers::call(helper, ctx, &values[..args.as_slice().len()]) {
                    Ok(result) => {
                        if let Some(dst) = dst {
                            frame.write(dst, result)?;
                        }
                    }
                    Err(fault) => {
                        let site = site.ok_or_else(|| frame.corrupt())?;
                        let exc = ExceptionDescriptor::from_fault(fault, site.pc, site.delay_slot);
                        return raise(&frame, ctx.state, &site, exc);
                    }
                }
            }
            HostOp::FloatBinary { op, fmt, dst, lhs, rhs } => {
                let value = fpu::binary(op, fmt, frame.read(lhs)?, frame.read(rhs)?);
                frame.write(dst, value)?;
            }
            HostOp::FloatUnary { op, fmt, dst, operand } => {
                let value = fpu::unary(op, fmt, frame.read(operand)?);
                frame.write(dst, value)?;
            }
            HostOp::FloatConvert { from, to, round, dst, operand } => {
                let value = fpu::convert(from, to, round, frame.read(operand)?);
                frame.write(dst, value)?;
            }
            HostOp::FloatCompare { cond, fmt, lhs, rhs } => {
                if fpu::compare(cond, fmt, frame.read(lhs)?, frame.read(rhs)?) {
                    ctx.state.fcr31 |= FCR31_CONDITION;
                } else {
                    ctx.state.fcr31 &= !FCR31_CONDITION;
                }
            }
            HostOp::End { retired } => {
                ctx.state.pc = frame.exit_pc.ok_or_else(|| frame.corrupt())?;
                return Ok(retired);
            }
        }
    }
}
