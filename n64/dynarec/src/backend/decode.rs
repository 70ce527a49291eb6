//! Reading threaded code back, for the executor and for `--dump`.

use std::fmt::{self, Write};

use vr4300::arith::{MulDivOp, ShiftOp, ShiftWidth};
use vr4300::fpu::{FloatFormat, FloatOp, FloatUnaryOp, RoundMode};
use vr4300::instructions::CmpMode;
use vr4300::{AccessKind, ExceptionCode, ExceptionDescriptor};

use super::encode::MAX_HELPER_ARGS;
use super::{op, tag, Code, Operand};
use crate::error::DynarecError;
use crate::ir::{BinaryOp, BlockExit, GuestReg, Helper, StateField, ValueType};

#[derive(Debug, Clone, Copy)]
struct Reader<'a> {
    code: &'a [u8],
    pos: usize,
    /// Offset of `code` within the block, for error reporting
    base: usize,
}

impl<'a> Reader<'a> {
    fn corrupt(&self) -> DynarecError {
        DynarecError::CorruptBlock { offset: self.base + self.pos }
    }

    fn bytes<const N: usize>(&mut self) -> Result<[u8; N], DynarecError> {
        let bytes = self
            .code
            .get(self.pos..self.pos + N)
            .and_then(|b| <[u8; N]>::try_from(b).ok())
            .ok_or_else(|| self.corrupt())?;
        self.pos += N;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8, DynarecError> {
        Ok(self.bytes::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16, DynarecError> {
        Ok(u16::from_le_bytes(self.bytes()?))
    }

    fn u32(&mut self) -> Result<u32, DynarecError> {
        Ok(u32::from_le_bytes(self.bytes()?))
    }

    fn u64(&mut self) -> Result<u64, DynarecError> {
        Ok(u64::from_le_bytes(self.bytes()?))
    }

    fn bool(&mut self) -> Result<bool, DynarecError> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(self.corrupt()),
        }
    }

    fn code<T: Code>(&mut self) -> Result<T, DynarecError> {
        let byte = self.u8()?;
        T::from_code(byte).ok_or_else(|| self.corrupt())
    }

    /// Split off the next `len` bytes as their own reader
    fn sub(&mut self, len: usize) -> Result<Reader<'a>, DynarecError> {
        let code = self.code.get(self.pos..self.pos + len).ok_or_else(|| self.corrupt())?;
        let sub = Reader { code, pos: 0, base: self.base + self.pos };
        self.pos += len;
        Ok(sub)
    }

    fn operand(&mut self) -> Result<Operand, DynarecError> {
        match self.u8()? {
            tag::GPR => Ok(Operand::Gpr(self.u8()?)),
            tag::FGR => Ok(Operand::Fgr(self.u8()?)),
            tag::SPILL => Ok(Operand::Spill(self.u16()?)),
            tag::IMM => Ok(Operand::Imm(self.u64()?)),
            _ => Err(self.corrupt()),
        }
    }

    fn field(&mut self) -> Result<StateField, DynarecError> {
        let kind = self.u8()?;
        let reg = self.u8()?;
        match kind {
            0 => Ok(StateField::Hi),
            1 => Ok(StateField::Lo),
            2 => Ok(StateField::Fcr31),
            3 if reg < 32 => Ok(StateField::Cop0(reg)),
            _ => Err(self.corrupt()),
        }
    }

    fn exception(&mut self) -> Result<ExceptionDescriptor, DynarecError> {
        let byte = self.u8()?;
        let code = ExceptionCode::from_u8(byte).ok_or_else(|| self.corrupt())?;
        let pc = self.u64()?;
        let delay_slot = self.bool()?;
        let has_bad = self.bool()?;
        let bad = self.u64()?;
        let refill = self.bool()?;
        let coprocessor = self.u8()?;
        Ok(ExceptionDescriptor {
            code,
            pc,
            delay_slot,
            bad_vaddr: has_bad.then_some(bad),
            refill,
            coprocessor,
        })
    }

    fn helper(&mut self) -> Result<Helper, DynarecError> {
        let kind = self.u8()?;
        let a = self.u8()?;
        let b = self.u8()?;
        let double = b != 0;
        Ok(match kind {
            0 => Helper::MoveFromCop0 { reg: a, double },
            1 => Helper::MoveToCop0 { reg: a, double },
            2 => Helper::TlbRead,
            3 => Helper::TlbWriteIndexed,
            4 => Helper::TlbWriteRandom,
            5 => Helper::TlbProbe,
            6 => Helper::Eret,
            7 => Helper::LoadLeft { size: a },
            8 => Helper::LoadRight { size: a },
            9 => Helper::StoreLeft { size: a },
            10 => Helper::StoreRight { size: a },
            11 => Helper::LoadLinked { size: a },
            12 => Helper::StoreConditional { size: a },
            _ => return Err(self.corrupt()),
        })
    }

    fn site(&mut self) -> Result<Site<'a>, DynarecError> {
        let pc = self.u64()?;
        let delay_slot = self.bool()?;
        let retired = self.u32()?;
        let count = self.u16()?;
        let len = self.u16()?;
        let entries = self.sub(len as usize)?;
        Ok(Site { pc, delay_slot, retired, flush: FlushIter { reader: entries, remaining: count } })
    }

    fn optional_site(&mut self) -> Result<Option<Site<'a>>, DynarecError> {
        if self.bool()? {
            self.site().map(Some)
        } else {
            Ok(None)
        }
    }
}

/// The guest registers to write back when leaving through a site
#[derive(Debug, Clone, Copy)]
pub struct FlushIter<'a> {
    reader: Reader<'a>,
    remaining: u16,
}

impl Iterator for FlushIter<'_> {
    type Item = Result<(GuestReg, Operand), DynarecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let entry = (|| {
            let reg = self.reader.u8()?;
            if reg >= 64 {
                return Err(self.reader.corrupt());
            }
            Ok((GuestReg(reg), self.reader.operand()?))
        })();
        if entry.is_err() {
            self.remaining = 0;
        }
        Some(entry)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Site<'a> {
    pub pc: u64,
    pub delay_slot: bool,
    pub retired: u32,
    pub flush: FlushIter<'a>,
}

/// Helper arguments
#[derive(Debug, Clone, Copy)]
pub struct Args {
    ops: [Operand; MAX_HELPER_ARGS],
    len: usize,
}

impl Args {
    pub fn as_slice(&self) -> &[Operand] {
        &self.ops[..self.len]
    }
}

#[derive(Debug, Clone, Copy)]
pub enum HostOp<'a> {
    Move { dst: Operand, src: Operand },
    LoadGuest { dst: Operand, reg: GuestReg },
    FlushGuest { reg: GuestReg, value: Operand },
    Binary { op: BinaryOp, dst: Operand, lhs: Operand, rhs: Operand, site: Option<Site<'a>> },
    Not { dst: Operand, operand: Operand },
    Cast { ty: ValueType, dst: Operand, operand: Operand },
    Shift { op: ShiftOp, width: ShiftWidth, dst: Operand, value: Operand, amount: Operand },
    Check { cmp: CmpMode, dst: Operand, lhs: Operand, rhs: Operand },
    TlbLookup { access: AccessKind, size: u8, dst: Operand, vaddr: Operand, site: Site<'a> },
    Load { ty: ValueType, dst: Operand, address: Operand },
    Store { size: u8, address: Operand, value: Operand },
    LoadState { field: StateField, dst: Operand },
    StoreState { field: StateField, value: Operand },
    MulDiv { op: MulDivOp, lhs: Operand, rhs: Operand },
    SetExitPc { pc: Operand },
    SetCondExitPc { cond: Operand, if_true: Operand, if_false: Operand },
    CondExit { cond: Operand, exit: BlockExit, site: Site<'a> },
    Call { helper: Helper, dst: Option<Operand>, args: Args, site: Option<Site<'a>> },
    FloatBinary { op: FloatOp, fmt: FloatFormat, dst: Operand, lhs: Operand, rhs: Operand },
    FloatUnary { op: FloatUnaryOp, fmt: FloatFormat, dst: Operand, operand: Operand },
    FloatConvert { from: FloatFormat, to: FloatFormat, round: RoundMode, dst: Operand, operand: Operand },
    FloatCompare { cond: u8, fmt: FloatFormat, lhs: Operand, rhs: Operand },
    End { retired: u32 },
}

/// Walks the ops of one block, stopping after `End`
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    reader: Reader<'a>,
    spill_slots: u16,
    done: bool,
}

impl<'a> Decoder<'a> {
    pub fn new(code: &'a [u8]) -> Result<Decoder<'a>, DynarecError> {
        let mut reader = Reader { code, pos: 0, base: 0 };
        let spill_slots = reader.u16()?;
        Ok(Decoder { reader, spill_slots, done: false })
    }

    pub fn spill_slots(&self) -> u16 {
        self.spill_slots
    }

    /// Offset of the next op
    pub fn offset(&self) -> usize {
        self.reader.pos
    }

    fn decode(&mut self) -> Result<HostOp<'a>, DynarecError> {
        let r = &mut self.reader;
        let opcode = r.u8()?;
        Ok(match opcode {
            op::MOVE => HostOp::Move { dst: r.operand()?, src: r.operand()? },
            op::LOAD_GUEST => {
                let dst = r.operand()?;
                let reg = r.u8()?;
                if reg >= 64 {
                    return Err(r.corrupt());
                }
                HostOp::LoadGuest { dst, reg: GuestReg(reg) }
            }
            op::FLUSH_GUEST => {
                let reg = r.u8()?;
                if reg >= 64 {
                    return Err(r.corrupt());
                }
                HostOp::FlushGuest { reg: GuestReg(reg), value: r.operand()? }
            }
            op::BINARY => HostOp::Binary {
                op: r.code()?,
                dst: r.operand()?,
                lhs: r.operand()?,
                rhs: r.operand()?,
                site: r.optional_site()?,
            },
            op::NOT => HostOp::Not { dst: r.operand()?, operand: r.operand()? },
            op::CAST => HostOp::Cast { ty: r.code()?, dst: r.operand()?, operand: r.operand()? },
            op::SHIFT => HostOp::Shift {
                op: r.code()?,
                width: r.code()?,
                dst: r.operand()?,
                value: r.operand()?,
                amount: r.operand()?,
            },
            op::CHECK => HostOp::Check { cmp: r.code()?, dst: r.operand()?, lhs: r.operand()?, rhs: r.operand()? },
            op::TLB_LOOKUP => HostOp::TlbLookup {
                access: r.code()?,
                size: r.u8()?,
                dst: r.operand()?,
                vaddr: r.operand()?,
                site: r.site()?,
            },
            op::LOAD => HostOp::Load { ty: r.code()?, dst: r.operand()?, address: r.operand()? },
            op::STORE => HostOp::Store { size: r.u8()?, address: r.operand()?, value: r.operand()? },
            op::LOAD_STATE => HostOp::LoadState { field: r.field()?, dst: r.operand()? },
            op::STORE_STATE => HostOp::StoreState { field: r.field()?, value: r.operand()? },
            op::MUL_DIV => HostOp::MulDiv { op: r.code()?, lhs: r.operand()?, rhs: r.operand()? },
            op::SET_EXIT_PC => HostOp::SetExitPc { pc: r.operand()? },
            op::SET_COND_EXIT_PC => {
                HostOp::SetCondExitPc { cond: r.operand()?, if_true: r.operand()?, if_false: r.operand()? }
            }
            op::COND_EXIT => {
                let cond = r.operand()?;
                let exit = match r.u8()? {
                    0 => BlockExit::Exception(r.exception()?),
                    1 => BlockExit::Branch { pc: r.u64()? },
                    _ => return Err(r.corrupt()),
                };
                HostOp::CondExit { cond, exit, site: r.site()? }
            }
            op::CALL => {
                let helper = r.helper()?;
                let dst = if r.bool()? { Some(r.operand()?) } else { None };
                let len = r.u8()? as usize;
                if len > MAX_HELPER_ARGS {
                    return Err(r.corrupt());
                }
                let mut args = Args { ops: [Operand::Imm(0); MAX_HELPER_ARGS], len };
                for arg in &mut args.ops[..len] {
                    *arg = r.operand()?;
                }
                HostOp::Call { helper, dst, args, site: r.optional_site()? }
            }
            op::FLOAT_BINARY => HostOp::FloatBinary {
                op: r.code()?,
                fmt: r.code()?,
                dst: r.operand()?,
                lhs: r.operand()?,
                rhs: r.operand()?,
            },
            op::FLOAT_UNARY => {
                HostOp::FloatUnary { op: r.code()?, fmt: r.code()?, dst: r.operand()?, operand: r.operand()? }
            }
            op::FLOAT_CONVERT => HostOp::FloatConvert {
                from: r.code()?,
                to: r.code()?,
                round: r.code()?,
                dst: r.operand()?,
                operand: r.operand()?,
            },
            op::FLOAT_COMPARE => {
                HostOp::FloatCompare { cond: r.u8()?, fmt: r.code()?, lhs: r.operand()?, rhs: r.operand()? }
            }
            op::END => HostOp::End { retired: r.u32()? },
            _ => {
                r.pos -= 1;
                return Err(r.corrupt());
            }
        })
    }
}

impl<'a> Iterator for Decoder<'a> {
    type Item = Result<HostOp<'a>, DynarecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let op = self.decode();
        self.done = matches!(op, Ok(HostOp::End { .. }) | Err(_));
        Some(op)
    }
}

fn write_site(out: &mut String, site: &Site<'_>) -> Result<(), DynarecError> {
    let _ = write!(out, " -> exit {:#x}{} retired {}", site.pc, if site.delay_slot { " (delay)" } else { "" }, site.retired);
    for entry in site.flush {
        let (reg, value) = entry?;
        let _ = write!(out, " {}={}", reg, value);
    }
    Ok(())
}

impl fmt::Display for HostOp<'_> {
    /// Sites are left to `disassemble`, which can report a broken flush list
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostOp::Move { dst, src } => write!(f, "mov {}, {}", dst, src),
            HostOp::LoadGuest { dst, reg } => write!(f, "ldg {}, {}", dst, reg),
            HostOp::FlushGuest { reg, value } => write!(f, "stg {}, {}", reg, value),
            HostOp::Binary { op, dst, lhs, rhs, .. } => write!(f, "{:?} {}, {}, {}", op, dst, lhs, rhs),
            HostOp::Not { dst, operand } => write!(f, "not {}, {}", dst, operand),
            HostOp::Cast { ty, dst, operand } => write!(f, "cast.{:?} {}, {}", ty, dst, operand),
            HostOp::Shift { op, width, dst, value, amount } => {
                write!(f, "{:?}.{:?} {}, {}, {}", op, width, dst, value, amount)
            }
            HostOp::Check { cmp, dst, lhs, rhs } => write!(f, "set.{:?} {}, {}, {}", cmp, dst, lhs, rhs),
            HostOp::TlbLookup { access, size, dst, vaddr, .. } => {
                write!(f, "tlb.{:?}{} {}, {}", access, size, dst, vaddr)
            }
            HostOp::Load { ty, dst, address } => write!(f, "ld.{:?} {}, [{}]", ty, dst, address),
            HostOp::Store { size, address, value } => write!(f, "st{} [{}], {}", size, address, value),
            HostOp::LoadState { field, dst } => write!(f, "lds {}, {}", dst, field),
            HostOp::StoreState { field, value } => write!(f, "sts {}, {}", field, value),
            HostOp::MulDiv { op, lhs, rhs } => write!(f, "{:?} {}, {}", op, lhs, rhs),
            HostOp::SetExitPc { pc } => write!(f, "exitpc {}", pc),
            HostOp::SetCondExitPc { cond, if_true, if_false } => {
                write!(f, "exitpc {} ? {} : {}", cond, if_true, if_false)
            }
            HostOp::CondExit { cond, exit, .. } => match exit {
                BlockExit::Exception(exc) => write!(f, "raise.{:?} if {}", exc.code, cond),
                BlockExit::Branch { pc } => write!(f, "leave {:#x} if {}", pc, cond),
            },
            HostOp::Call { helper, dst, args, .. } => {
                f.write_str("call ")?;
                if let Some(dst) = dst {
                    write!(f, "{} = ", dst)?;
                }
                f.write_str(helper.name())?;
                for arg in args.as_slice() {
                    write!(f, " {}", arg)?;
                }
                Ok(())
            }
            HostOp::FloatBinary { op, fmt, dst, lhs, rhs } => write!(f, "f{:?}.{:?} {}, {}, {}", op, fmt, dst, lhs, rhs),
            HostOp::FloatUnary { op, fmt, dst, operand } => write!(f, "f{:?}.{:?} {}, {}", op, fmt, dst, operand),
            HostOp::FloatConvert { from, to, round, dst, operand } => {
                write!(f, "cvt.{:?}.{:?}.{:?} {}, {}", to, from, round, dst, operand)
            }
            HostOp::FloatCompare { cond, fmt, lhs, rhs } => write!(f, "c.{}.{:?} {}, {}", cond, fmt, lhs, rhs),
            HostOp::End { retired } => write!(f, "end {}", retired),
        }
    }
}

/// Human readable listing of a block
pub fn disassemble(code: &[u8]) -> Result<String, DynarecError> {
    let mut decoder = Decoder::new(code)?;
    let mut out = format!("; {} spill slots\n", decoder.spill_slots());
    loop {
        let offset = decoder.offset() as u32;
        let Some(op) = decoder.next() else {
            break;
        };
        let op = op?;
        let _ = write!(out, "{:04x}  {}", offset, op);
        let site = match &op {
            HostOp::Binary { site, .. } | HostOp::Call { site, .. } => *site,
            HostOp::TlbLookup { site, .. } | HostOp::CondExit { site, .. } => Some(*site),
            _ => None,
        };
        if let Some(site) = site {
            write_site(&mut out, &site)?;
        }
        out.push('\n');
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::encode::{encode_block, CodeBuffer};
    use crate::ir::{ExitSite, IrContext, ValueKind};
    use crate::platform::X86_64;
    use crate::regalloc::allocate;

    fn encode(ctx: &IrContext) -> Vec<u8> {
        let allocs = allocate(ctx, &X86_64).unwrap();
        let mut buf = CodeBuffer::new();
        encode_block(ctx, &allocs, 3, &mut buf).unwrap();
        buf.code().to_vec()
    }

    #[test]
    fn sites_survive_encoding() {
        let mut ctx = IrContext::new();
        let a = ctx.load_reg(GuestReg::gpr(4));
        let b = ctx.constant(ValueType::S8, 1);
        let sum = ctx.push_with_site(
            ValueKind::Binary { op: BinaryOp::AddTrap32, lhs: a, rhs: b },
            ExitSite { pc: 0x8000_0010, delay_slot: true, retired: 2, flush: vec![(GuestReg::gpr(7), a)] },
        );
        ctx.push(ValueKind::FlushGuestReg { reg: GuestReg::gpr(4), value: sum });
        let code = encode(&ctx);

        let ops: Vec<_> = Decoder::new(&code).unwrap().collect::<Result<_, _>>().unwrap();
        assert_eq!(ops.len(), 4);
        let HostOp::Binary { op: BinaryOp::AddTrap32, rhs: Operand::Imm(1), site: Some(site), .. } = ops[1] else {
            panic!("{:?}", ops[1]);
        };
        assert_eq!((site.pc, site.delay_slot, site.retired), (0x8000_0010, true, 2));
        let flush: Vec<_> = site.flush.collect::<Result<_, _>>().unwrap();
        assert_eq!(flush.len(), 1);
        assert_eq!(flush[0].0, GuestReg::gpr(7));
        assert!(matches!(ops[3], HostOp::End { retired: 3 }));
    }

    #[test]
    fn truncated_code_is_reported() {
        let mut ctx = IrContext::new();
        let a = ctx.load_reg(GuestReg::gpr(4));
        ctx.push(ValueKind::FlushGuestReg { reg: GuestReg::gpr(5), value: a });
        let code = encode(&ctx);
        let cut = &code[..code.len() - 2];
        let last = Decoder::new(cut).unwrap().last().unwrap();
        assert!(matches!(last, Err(DynarecError::CorruptBlock { .. })));
    }

    #[test]
    fn listing_names_every_op() {
        let mut ctx = IrContext::new();
        let a = ctx.load_reg(GuestReg::gpr(4));
        ctx.push(ValueKind::FlushGuestReg { reg: GuestReg::gpr(5), value: a });
        let listing = disassemble(&encode(&ctx)).unwrap();
        assert!(listing.contains("ldg"));
        assert!(listing.contains("stg $a1"));
        assert!(listing.trim_end().ends_with("end 3"));
    }

    #[test]
    fn unknown_opcode_is_corrupt() {
        let code = [0, 0, 0x7e];
        let err = Decoder::new(&code).unwrap().next().unwrap().unwrap_err();
        assert_eq!(err, DynarecError::CorruptBlock { offset: 2 });
    }
}
