//! A straightforward one-instruction-at-a-time interpreter.
//!
//! It exists to cross-check the recompiler, so every operation defers to the same semantic
//! helpers (`arith`, `fpu`, `memory`, `cop0`, `exception`) the recompiler's runtime uses.

use thiserror::Error;
use tracing::trace;

use crate::arith::{self, sign_extend32};
use crate::bus::Bus;
use crate::exception::{self, ExceptionCode, ExceptionDescriptor, Fault};
use crate::fpu::{self, FloatFormat};
use crate::instructions::{decode, CmpMode, ExMode, Form, Instruction, InstructionInfo, InternalReg};
use crate::memory;
use crate::mmu::{AccessKind, AddressTranslator};
use crate::state::{CpuState, FCR0, FCR31_CONDITION, FCR31_WRITE_MASK};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InterpreterError {
    #[error("reserved instruction {word:#010x} at {pc:#x}")]
    Reserved { pc: u64, word: u32 },
    #[error("unimplemented instruction {name} ({word:#010x}) at {pc:#x}")]
    Unimplemented { pc: u64, word: u32, name: &'static str },
    #[error("branch in the delay slot of another branch at {pc:#x}")]
    BranchInDelaySlot { pc: u64 },
}

/// How an instruction affects the flow of execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Next,
    Branch { target: u64, taken: bool, likely: bool },
    Exception(ExceptionCode),
    Fault(Fault),
    CoprocessorUnusable(u8),
    /// Jump without a delay slot (ERET)
    Jump(u64),
}

#[derive(Debug, Default, Clone)]
pub struct Interpreter {
    /// Where execution continues after the delay slot currently at `state.pc`
    delay_target: Option<u64>,
}

impl Interpreter {
    pub fn new() -> Interpreter {
        Interpreter::default()
    }

    pub fn in_delay_slot(&self) -> bool {
        self.delay_target.is_some()
    }

    /// Execute the instruction at `state.pc`
    pub fn step(
        &mut self,
        state: &mut CpuState,
        bus: &mut dyn Bus,
        mmu: &mut dyn AddressTranslator,
    ) -> Result<(), InterpreterError> {
        let pc = state.pc;
        let delay_target = self.delay_target.take();
        let in_delay = delay_target.is_some();

        let flow = match memory::translate(mmu, &state.cop0, pc, AccessKind::Fetch, 4) {
            Ok(phys) => {
                let word = bus.fetch(phys);
                let (inst, info) = decode(word);
                trace!(target: "CPU", "{:016x}: {}", pc, inst.disassemble(pc));
                execute(state, bus, mmu, inst, info, pc)?
            }
            Err(fault) => Flow::Fault(fault),
        };

        let exception_pc = if in_delay { pc.wrapping_sub(4) } else { pc };
        let next = delay_target.unwrap_or(pc.wrapping_add(4));

        match flow {
            Flow::Next => state.pc = next,
            Flow::Branch { .. } if in_delay => return Err(InterpreterError::BranchInDelaySlot { pc }),
            Flow::Branch { target, taken, likely } => {
                if taken {
                    self.delay_target = Some(target);
                    state.pc = pc.wrapping_add(4);
                } else if likely {
                    state.pc = pc.wrapping_add(8);
                } else {
                    self.delay_target = Some(pc.wrapping_add(8));
                    state.pc = pc.wrapping_add(4);
                }
            }
            Flow::Exception(code) => {
                exception::raise(state, &ExceptionDescriptor::new(code, exception_pc, in_delay));
            }
            Flow::Fault(fault) => {
                exception::raise(state, &ExceptionDescriptor::from_fault(fault, exception_pc, in_delay));
            }
            Flow::CoprocessorUnusable(cop) => {
                exception::raise(state, &ExceptionDescriptor::coprocessor_unusable(cop, exception_pc, in_delay));
            }
            Flow::Jump(target) => state.pc = target,
        }
        Ok(())
    }
}

fn read_fpu(state: &CpuState, reg: u8, fmt: FloatFormat) -> u64 {
    if fmt.is_64bit() {
        state.read_fpr64(reg)
    } else {
        state.read_fpr32(reg) as u64
    }
}

fn write_fpu(state: &mut CpuState, reg: u8, fmt: FloatFormat, value: u64) {
    if fmt.is_64bit() {
        state.write_fpr64(reg, value)
    } else {
        state.write_fpr32(reg, value as u32)
    }
}

macro_rules! fault {
    ($e:expr) => {
        match $e {
            Ok(v) => v,
            Err(fault) => return Ok(Flow::Fault(fault)),
        }
    };
}

fn execute(
    state: &mut CpuState,
    bus: &mut dyn Bus,
    mmu: &mut dyn AddressTranslator,
    inst: Instruction,
    info: &InstructionInfo,
    pc: u64,
) -> Result<Flow, InterpreterError> {
    let word = inst.word();
    let (form, mode) = match info {
        InstructionInfo::Op(_, form, mode) => (*form, *mode),
        InstructionInfo::Unimplemented(name) => {
            return Err(InterpreterError::Unimplemented { pc, word, name: *name })
        }
        _ => return Err(InterpreterError::Reserved { pc, word }),
    };

    let i = inst.i();
    let r = inst.r();
    let f = inst.f();
    let rs = state.read_gpr(i.rs());
    let rt = state.read_gpr(i.rt());

    // Second operand and destination of the ALU group
    let (operand, dest) = match form {
        Form::RegImm(true) | Form::TrapImm(true) => (i.simm(), i.rt()),
        Form::RegImm(false) => (i.imm() as u64, i.rt()),
        Form::TrapImm(false) => (i.simm(), 0),
        _ => (rt, r.rd()),
    };

    if mode.uses_fpu() && !state.cop0.cu1() {
        return Ok(Flow::CoprocessorUnusable(1));
    }

    let branch_target = pc.wrapping_add(4).wrapping_add(i.simm() << 2);
    let branch_rhs = if form == Form::BranchRegReg { rt } else { 0 };
    let reserved = InterpreterError::Reserved { pc, word };

    use ExMode::*;
    match mode {
        Nop | CacheOp => {}
        Jump | JumpLink => {
            let target = (pc.wrapping_add(4) & !0x0fff_ffff) | ((inst.j().target() as u64) << 2);
            if mode == JumpLink {
                state.write_gpr(31, pc.wrapping_add(8));
            }
            return Ok(Flow::Branch { target, taken: true, likely: false });
        }
        JumpReg => return Ok(Flow::Branch { target: rs, taken: true, likely: false }),
        JumpRegLink => {
            state.write_gpr(r.rd(), pc.wrapping_add(8));
            return Ok(Flow::Branch { target: rs, taken: true, likely: false });
        }
        Branch(cmp) | BranchLikely(cmp) | BranchLink(cmp) | BranchLinkLikely(cmp) => {
            if matches!(mode, BranchLink(_) | BranchLinkLikely(_)) {
                state.write_gpr(31, pc.wrapping_add(8));
            }
            let taken = arith::compare(cmp, rs, branch_rhs);
            return Ok(Flow::Branch { target: branch_target, taken, likely: mode.is_likely_branch() });
        }
        Add32 | Add64 | Sub32 | Sub64 => {
            let result = match mode {
                Add32 => arith::add32_checked(rs, operand),
                Add64 => arith::add64_checked(rs, operand),
                Sub32 => arith::sub32_checked(rs, operand),
                _ => arith::sub64_checked(rs, operand),
            };
            match result {
                Some(value) => state.write_gpr(dest, value),
                None => return Ok(Flow::Exception(ExceptionCode::Overflow)),
            }
        }
        AddU32 => state.write_gpr(dest, sign_extend32(rs.wrapping_add(operand))),
        AddU64 => state.write_gpr(dest, rs.wrapping_add(operand)),
        SubU32 => state.write_gpr(dest, sign_extend32(rs.wrapping_sub(operand))),
        SubU64 => state.write_gpr(dest, rs.wrapping_sub(operand)),
        SetLess => state.write_gpr(dest, arith::compare(CmpMode::Lt, rs, operand) as u64),
        SetLessU => state.write_gpr(dest, arith::compare(CmpMode::LtU, rs, operand) as u64),
        And => state.write_gpr(dest, rs & operand),
        Or => state.write_gpr(dest, rs | operand),
        Xor => state.write_gpr(dest, rs ^ operand),
        Nor => state.write_gpr(dest, !(rs | operand)),
        InsertUpper => state.write_gpr(i.rt(), sign_extend32((i.imm() as u64) << 16)),
        Shift(op, width) => {
            let amount = match form {
                Form::ShiftImm(offset) => (r.sa() + offset) as u64,
                _ => rs,
            };
            state.write_gpr(r.rd(), arith::shift(op, width, rt, amount));
        }
        MulDiv(op) => {
            let (hi, lo) = arith::mul_div(op, rs, rt);
            state.hi = hi;
            state.lo = lo;
        }
        LoadInternal(reg) => {
            let value = match reg {
                InternalReg::HI => state.hi,
                InternalReg::LO => state.lo,
            };
            state.write_gpr(r.rd(), value);
        }
        StoreInternal(InternalReg::HI) => state.hi = rs,
        StoreInternal(InternalReg::LO) => state.lo = rs,
        Mem(size) | MemUnsigned(size) => {
            let vaddr = rs.wrapping_add(i.simm());
            if form == Form::StoreBaseImm {
                let phys = fault!(memory::translate(mmu, &state.cop0, vaddr, AccessKind::Store, size));
                bus.write(phys, size, rt);
            } else {
                let phys = fault!(memory::translate(mmu, &state.cop0, vaddr, AccessKind::Load, size));
                let value = memory::extend(bus.read(phys, size), size, matches!(mode, Mem(_)));
                state.write_gpr(i.rt(), value);
            }
        }
        MemLeft(size) | MemRight(size) => {
            let vaddr = rs.wrapping_add(i.simm());
            let left = matches!(mode, MemLeft(_));
            let cop0 = &state.cop0;
            if form == Form::StoreBaseImm {
                let result = if left {
                    memory::store_left(bus, mmu, cop0, vaddr, rt, size)
                } else {
                    memory::store_right(bus, mmu, cop0, vaddr, rt, size)
                };
                fault!(result);
            } else {
                let result = if left {
                    memory::load_left(bus, mmu, cop0, vaddr, rt, size)
                } else {
                    memory::load_right(bus, mmu, cop0, vaddr, rt, size)
                };
                let value = fault!(result);
                state.write_gpr(i.rt(), value);
            }
        }
        MemLinked(size) => {
            let vaddr = rs.wrapping_add(i.simm());
            let value = if form == Form::StoreBaseImm {
                fault!(memory::store_conditional(bus, mmu, state, vaddr, rt, size))
            } else {
                fault!(memory::load_linked(bus, mmu, state, vaddr, size))
            };
            state.write_gpr(i.rt(), value);
        }
        Trap(cmp) => {
            if arith::compare(cmp, rs, operand) {
                return Ok(Flow::Exception(ExceptionCode::Trap));
            }
        }
        Syscall => return Ok(Flow::Exception(ExceptionCode::Syscall)),
        Break => return Ok(Flow::Exception(ExceptionCode::Breakpoint)),
        MoveFromCop0 { double } => {
            let value = state.cop0.read(r.rd(), double);
            state.write_gpr(r.rt(), value);
        }
        MoveToCop0 { double } => state.cop0.write(r.rd(), rt, double),
        TlbRead => mmu.tlb_read(&mut state.cop0),
        TlbWriteIndexed => mmu.tlb_write_indexed(&mut state.cop0),
        TlbWriteRandom => mmu.tlb_write_random(&mut state.cop0),
        TlbProbe => mmu.tlb_probe(&mut state.cop0),
        Eret => return Ok(Flow::Jump(exception::eret(state))),
        MoveFromCop1 { double } => {
            let value = if double {
                state.read_fpr64(r.rd())
            } else {
                sign_extend32(state.read_fpr32(r.rd()) as u64)
            };
            state.write_gpr(r.rt(), value);
        }
        MoveToCop1 { double } => {
            if double {
                state.write_fpr64(r.rd(), rt)
            } else {
                state.write_fpr32(r.rd(), rt as u32)
            }
        }
        MoveControlFromCop1 => {
            let value = match r.rd() {
                0 => FCR0 as u64,
                31 => sign_extend32(state.fcr31 as u64),
                _ => 0,
            };
            state.write_gpr(r.rt(), value);
        }
        MoveControlToCop1 => {
            if r.rd() == 31 {
                state.fcr31 = rt as u32 & FCR31_WRITE_MASK;
            }
        }
        BranchCop1 { on_true, likely } => {
            let condition = state.fcr31 & FCR31_CONDITION != 0;
            return Ok(Flow::Branch { target: branch_target, taken: condition == on_true, likely });
        }
        FpuMem(size) => {
            let vaddr = rs.wrapping_add(i.simm());
            let fmt = if size == 8 { FloatFormat::Double } else { FloatFormat::Single };
            if form == Form::StoreFpuBaseImm {
                let phys = fault!(memory::translate(mmu, &state.cop0, vaddr, AccessKind::Store, size));
                bus.write(phys, size, read_fpu(state, i.rt(), fmt));
            } else {
                let phys = fault!(memory::translate(mmu, &state.cop0, vaddr, AccessKind::Load, size));
                let value = bus.read(phys, size);
                write_fpu(state, i.rt(), fmt, value);
            }
        }
        FloatArith(op) => {
            let fmt = FloatFormat::arith_from_field(f.fmt()).ok_or(reserved)?;
            let a = read_fpu(state, f.fs(), fmt);
            let b = read_fpu(state, f.ft(), fmt);
            write_fpu(state, f.fd(), fmt, fpu::binary(op, fmt, a, b));
        }
        FloatUnary(op) => {
            let fmt = FloatFormat::arith_from_field(f.fmt()).ok_or(reserved)?;
            let a = read_fpu(state, f.fs(), fmt);
            write_fpu(state, f.fd(), fmt, fpu::unary(op, fmt, a));
        }
        FloatMove => {
            let fmt = FloatFormat::arith_from_field(f.fmt()).ok_or(reserved)?;
            let a = read_fpu(state, f.fs(), fmt);
            write_fpu(state, f.fd(), fmt, a);
        }
        FloatConvert(to, round) => {
            let from = FloatFormat::from_field(f.fmt())
                .filter(|&from| fpu::is_valid_conversion(from, to))
                .ok_or(reserved)?;
            let a = read_fpu(state, f.fs(), from);
            write_fpu(state, f.fd(), to, fpu::convert(from, to, round, a));
        }
        FloatCompare => {
            let fmt = FloatFormat::arith_from_field(f.fmt()).ok_or(reserved)?;
            let a = read_fpu(state, f.fs(), fmt);
            let b = read_fpu(state, f.ft(), fmt);
            if fpu::compare(f.funct() & 0xf, fmt, a, b) {
                state.fcr31 |= FCR31_CONDITION;
            } else {
                state.fcr31 &= !FCR31_CONDITION;
            }
        }
    }

    Ok(Flow::Next)
}
