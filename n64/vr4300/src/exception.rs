use tracing::trace;

use crate::cop0::{self, cause, status};
use crate::state::CpuState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionCode {
    Interrupt = 0,
    TlbModification = 1,
    TlbLoad = 2,
    TlbStore = 3,
    AddressErrorLoad = 4,
    AddressErrorStore = 5,
    Syscall = 8,
    Breakpoint = 9,
    ReservedInstruction = 10,
    CoprocessorUnusable = 11,
    Overflow = 12,
    Trap = 13,
    FloatingPoint = 15,
    Watch = 23,
}

impl ExceptionCode {
    pub fn from_u8(code: u8) -> Option<ExceptionCode> {
        use ExceptionCode::*;
        Some(match code {
            0 => Interrupt,
            1 => TlbModification,
            2 => TlbLoad,
            3 => TlbStore,
            4 => AddressErrorLoad,
            5 => AddressErrorStore,
            8 => Syscall,
            9 => Breakpoint,
            10 => ReservedInstruction,
            11 => CoprocessorUnusable,
            12 => Overflow,
            13 => Trap,
            15 => FloatingPoint,
            23 => Watch,
            _ => return None,
        })
    }

    fn sets_bad_vaddr(self) -> bool {
        use ExceptionCode::*;
        matches!(self, TlbModification | TlbLoad | TlbStore | AddressErrorLoad | AddressErrorStore)
    }

    fn is_tlb(self) -> bool {
        use ExceptionCode::*;
        matches!(self, TlbModification | TlbLoad | TlbStore)
    }
}

/// A failed address translation, before it is pinned to an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fault {
    pub code: ExceptionCode,
    pub bad_vaddr: u64,
    /// A TLB miss (as opposed to an invalid or clean entry) uses the refill vector
    pub refill: bool,
}

/// Everything the exception entry point needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionDescriptor {
    pub code: ExceptionCode,
    /// Address of the faulting instruction, or of its branch when `delay_slot` is set
    pub pc: u64,
    pub delay_slot: bool,
    pub bad_vaddr: Option<u64>,
    pub refill: bool,
    pub coprocessor: u8,
}

impl ExceptionDescriptor {
    pub fn new(code: ExceptionCode, pc: u64, delay_slot: bool) -> Self {
        ExceptionDescriptor { code, pc, delay_slot, bad_vaddr: None, refill: false, coprocessor: 0 }
    }

    pub fn from_fault(fault: Fault, pc: u64, delay_slot: bool) -> Self {
        ExceptionDescriptor {
            code: fault.code,
            pc,
            delay_slot,
            bad_vaddr: Some(fault.bad_vaddr),
            refill: fault.refill,
            coprocessor: 0,
        }
    }

    pub fn coprocessor_unusable(cop: u8, pc: u64, delay_slot: bool) -> Self {
        ExceptionDescriptor { coprocessor: cop, ..Self::new(ExceptionCode::CoprocessorUnusable, pc, delay_slot) }
    }
}

/// Enter the general exception handler
pub fn raise(state: &mut CpuState, exc: &ExceptionDescriptor) {
    let regs = &mut state.cop0.regs;
    let exl = regs[cop0::STATUS] & status::EXL != 0;

    let mut cause = regs[cop0::CAUSE] & !(cause::EXC_CODE | cause::CE | cause::BD);
    cause |= (exc.code as u64) << cause::EXC_CODE_SHIFT;
    cause |= ((exc.coprocessor & 3) as u64) << cause::CE_SHIFT;

    if !exl {
        regs[cop0::EPC] = exc.pc;
        if exc.delay_slot {
            cause |= cause::BD;
        }
    }
    regs[cop0::CAUSE] = cause;

    if let Some(bad_vaddr) = exc.bad_vaddr.filter(|_| exc.code.sets_bad_vaddr()) {
        regs[cop0::BAD_VADDR] = bad_vaddr;
        if exc.code.is_tlb() {
            regs[cop0::CONTEXT] = (regs[cop0::CONTEXT] & !0x7f_fff0) | ((bad_vaddr >> 9) & 0x7f_fff0);
            regs[cop0::ENTRY_HI] = (bad_vaddr & !0x1fff) | (regs[cop0::ENTRY_HI] & 0xff);
        }
    }

    regs[cop0::STATUS] |= status::EXL;

    let base = if regs[cop0::STATUS] & status::BEV != 0 {
        0xffff_ffff_bfc0_0200
    } else {
        0xffff_ffff_8000_0000
    };
    let offset = if exc.refill && !exl { 0x000 } else { 0x180 };

    trace!(target: "CPU", "exception {:?} at {:#x} (delay slot: {}) -> {:#x}", exc.code, exc.pc, exc.delay_slot, base + offset);
    state.pc = base + offset;
}

/// Return from exception, yields the new PC
pub fn eret(state: &mut CpuState) -> u64 {
    let regs = &mut state.cop0.regs;
    let pc = if regs[cop0::STATUS] & status::ERL != 0 {
        regs[cop0::STATUS] &= !status::ERL;
        regs[cop0::ERROR_EPC]
    } else {
        regs[cop0::STATUS] &= !status::EXL;
        regs[cop0::EPC]
    };
    state.llbit = false;
    pc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_slot_exceptions_point_at_the_branch() {
        let mut state = CpuState::new();
        let exc = ExceptionDescriptor::new(ExceptionCode::Syscall, 0xffff_ffff_8000_0010, true);
        raise(&mut state, &exc);
        assert_eq!(state.cop0.regs[cop0::EPC], 0xffff_ffff_8000_0010);
        assert_ne!(state.cop0.regs[cop0::CAUSE] & cause::BD, 0);
        assert_eq!((state.cop0.regs[cop0::CAUSE] & cause::EXC_CODE) >> 2, 8);
        assert_eq!(state.pc, 0xffff_ffff_8000_0180);
        assert!(state.cop0.exl());
    }

    #[test]
    fn nested_exceptions_keep_epc() {
        let mut state = CpuState::new();
        raise(&mut state, &ExceptionDescriptor::new(ExceptionCode::Breakpoint, 0x100, false));
        raise(&mut state, &ExceptionDescriptor::new(ExceptionCode::Syscall, 0x200, false));
        assert_eq!(state.cop0.regs[cop0::EPC], 0x100);
    }

    #[test]
    fn tlb_refill_uses_the_refill_vector() {
        let mut state = CpuState::new();
        let fault = Fault { code: ExceptionCode::TlbLoad, bad_vaddr: 0x1234_5678, refill: true };
        raise(&mut state, &ExceptionDescriptor::from_fault(fault, 0x8000_0000, false));
        assert_eq!(state.pc, 0xffff_ffff_8000_0000);
        assert_eq!(state.cop0.regs[cop0::BAD_VADDR], 0x1234_5678);
        assert_eq!(state.cop0.regs[cop0::ENTRY_HI] & !0xff, 0x1234_4000);
    }

    #[test]
    fn eret_clears_exl_and_llbit() {
        let mut state = CpuState::new();
        state.llbit = true;
        raise(&mut state, &ExceptionDescriptor::new(ExceptionCode::Syscall, 0x8000_0040, false));
        assert_eq!(eret(&mut state), 0x8000_0040);
        assert!(!state.cop0.exl());
        assert!(!state.llbit);
    }
}
