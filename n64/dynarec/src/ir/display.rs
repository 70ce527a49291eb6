use std::fmt::{self, Write};

use super::context::IrContext;
use super::value::{BlockExit, StateField, Value, ValueKind};

impl fmt::Display for StateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateField::Hi => f.write_str("hi"),
            StateField::Lo => f.write_str("lo"),
            StateField::Fcr31 => f.write_str("fcr31"),
            StateField::Cop0(reg) => write!(f, "cop0[{}]", vr4300::cop0::COP0_REG_NAMES[(*reg & 31) as usize]),
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ValueKind::*;
        match self {
            Constant { ty, value } => write!(f, "const.{:?} {:#x}", ty, value),
            LoadGuestReg { reg } => write!(f, "load {}", reg),
            FlushGuestReg { reg, value } => write!(f, "flush {} <- {}", reg, value),
            Binary { op, lhs, rhs } => write!(f, "{:?} {}, {}", op, lhs, rhs),
            Not { operand } => write!(f, "not {}", operand),
            MaskAndCast { ty, operand } => write!(f, "cast.{:?} {}", ty, operand),
            Shift { op, width, value, amount } => write!(f, "shift.{:?}.{:?} {}, {}", op, width, value, amount),
            CheckCondition { cmp, lhs, rhs } => write!(f, "check.{:?} {}, {}", cmp, lhs, rhs),
            TlbLookup { vaddr, access, size } => write!(f, "tlb.{:?}.{} {}", access, size, vaddr),
            Load { ty, class, address } => write!(f, "load.{:?}.{:?} [{}]", ty, class, address),
            Store { size, address, value } => write!(f, "store.{} [{}] <- {}", size, address, value),
            LoadState { field } => write!(f, "get {}", field),
            StoreState { field, value } => write!(f, "set {} <- {}", field, value),
            MulDiv { op, lhs, rhs } => write!(f, "{:?} {}, {}", op, lhs, rhs),
            SetBlockExitPc { pc } => write!(f, "exit_pc {}", pc),
            SetCondBlockExitPc { cond, if_true, if_false } => {
                write!(f, "exit_pc {} ? {} : {}", cond, if_true, if_false)
            }
            CondBlockExit { cond, exit: BlockExit::Exception(exc) } => {
                write!(f, "exit_if {} raise {:?}", cond, exc.code)
            }
            CondBlockExit { cond, exit: BlockExit::Branch { pc } } => write!(f, "exit_if {} goto {:#x}", cond, pc),
            Call { helper, args } => {
                write!(f, "call {}(", helper.name())?;
                for (i, arg) in args.as_slice().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                f.write_char(')')
            }
            FloatBinary { op, fmt, lhs, rhs } => write!(f, "{:?}.{:?} {}, {}", op, fmt, lhs, rhs),
            FloatUnary { op, fmt, operand } => write!(f, "{:?}.{:?} {}", op, fmt, operand),
            FloatConvert { from, to, round, operand } => {
                write!(f, "cvt.{:?}.{:?}.{:?} {}", to, from, round, operand)
            }
            FloatCompare { cond, fmt, lhs, rhs } => write!(f, "c.{}.{:?} {}, {}", cond, fmt, lhs, rhs),
            MoveRegClass { to, operand } => write!(f, "move.{:?} {}", to, operand),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(site) = &self.site {
            write!(f, "  @{:#x}{} retired={}", site.pc, if site.delay_slot { "+ds" } else { "" }, site.retired)?;
            if !site.flush.is_empty() {
                f.write_str(" flush[")?;
                for (i, (reg, value)) in site.flush.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{}={}", reg, value)?;
                }
                f.write_char(']')?;
            }
        }
        Ok(())
    }
}

impl IrContext {
    /// Human readable listing, one value per line
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for (id, value) in self.iter() {
            let _ = writeln!(out, "{:>6} = {}", id.to_string(), value);
        }
        out
    }
}
