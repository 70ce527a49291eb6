use tracing::warn;
use vr4300::instructions::{ExMode, Instruction, InstructionInfo};
use vr4300::{AccessKind, AddressTranslator, Bus, Cop0, Fault};

use crate::category::{classify, Category};
use crate::error::CompileError;
use crate::{BLOCKCACHE_OUTER_SHIFT, MAX_UNIT_LENGTH, PAGE_SIZE};

#[derive(Debug, Clone, Copy)]
pub struct UnitInstruction {
    pub pc: u64,
    pub phys: u32,
    pub inst: Instruction,
    pub info: &'static InstructionInfo,
    pub category: Category,
    pub delay_slot: bool,
}

impl UnitInstruction {
    pub fn word(&self) -> u32 {
        self.inst.word()
    }

    pub fn ex_mode(&self) -> ExMode {
        // classify() only lets through `Op` entries
        self.info.ex_mode().unwrap_or(ExMode::Nop)
    }
}

/// One compilation's worth of guest instructions
#[derive(Debug, Clone)]
pub struct TranslationUnit {
    pub start_pc: u64,
    pub start_phys: u32,
    pub instructions: Vec<UnitInstruction>,
    /// The trailing delay slot lives on a page that failed to translate
    pub delay_slot_fault: Option<Fault>,
    /// Physical words whose code mask bits this unit sets
    pub mask_updates: Vec<u32>,
    /// Physical page the trailing delay slot was pulled from, when it isn't the start page
    pub pulled_page: Option<u32>,
}

impl TranslationUnit {
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn end_pc(&self) -> u64 {
        self.start_pc.wrapping_add(4 * self.len() as u64)
    }

    /// `b .; nop` or `j .; nop`, which only waits for an interrupt
    pub fn is_idle_loop(&self) -> bool {
        let [branch, slot] = self.instructions.as_slice() else {
            return false;
        };
        if slot.word() != 0 {
            return false;
        }
        if branch.word() == 0x1000_ffff {
            return true;
        }
        if branch.ex_mode() == ExMode::Jump {
            let target = (branch.pc.wrapping_add(4) & !0x0fff_ffff) | ((branch.inst.j().target() as u64) << 2);
            return target == branch.pc;
        }
        false
    }
}

/// Walk forward from `start_pc` collecting the instructions of one unit.
///
/// A unit ends after a block ender, after the delay slot of a branch, or at the end of the
/// page. The one exception is a delay slot on the next page, which is pulled in through the
/// virtual address so the branch is never split from it.
pub fn form_block(
    start_pc: u64,
    start_phys: u32,
    bus: &mut dyn Bus,
    mmu: &mut dyn AddressTranslator,
    cop0: &Cop0,
) -> Result<TranslationUnit, CompileError> {
    let mut unit = TranslationUnit {
        start_pc,
        start_phys,
        instructions: Vec::new(),
        delay_slot_fault: None,
        mask_updates: Vec::new(),
        pulled_page: None,
    };

    let mut pc = start_pc;
    let mut phys = start_phys;
    let mut pending_delay_slot = false;

    while unit.instructions.len() < MAX_UNIT_LENGTH {
        let word = bus.fetch(phys);
        let (inst, info, category) = classify(pc, word)?;
        if pending_delay_slot && category.is_branch() {
            return Err(CompileError::BranchInDelaySlot { pc });
        }

        unit.mask_updates.push(phys);
        unit.instructions.push(UnitInstruction { pc, phys, inst, info, category, delay_slot: pending_delay_slot });

        if pending_delay_slot {
            return Ok(unit);
        }
        match category {
            Category::Branch | Category::BranchLikely => pending_delay_slot = true,
            Category::BlockEnder => return Ok(unit),
            _ => {}
        }

        pc = pc.wrapping_add(4);
        phys = phys.wrapping_add(4);

        if phys % PAGE_SIZE == 0 {
            if !pending_delay_slot {
                return Ok(unit);
            }
            warn!(target: "JIT", "delay slot of branch at {:#x} pulled from the next page", pc.wrapping_sub(4));
            match mmu.resolve(pc, AccessKind::Fetch, cop0) {
                Ok(next) => {
                    phys = next;
                    unit.pulled_page = Some(next >> BLOCKCACHE_OUTER_SHIFT);
                }
                Err(fault) => {
                    unit.delay_slot_fault = Some(fault);
                    return Ok(unit);
                }
            }
        }
    }

    // Hit the cap with a branch whose delay slot didn't fit
    if pending_delay_slot {
        unit.instructions.pop();
        unit.mask_updates.pop();
    }
    Ok(unit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vr4300::{asm, Mmu, Ram};

    const BASE: u64 = 0xffff_ffff_8000_0000;

    fn form(program: &[u32], offset: u32) -> Result<TranslationUnit, CompileError> {
        let mut ram = Ram::new(0x4000);
        ram.load_words(offset as usize, program);
        let mut mmu = Mmu::new();
        form_block(BASE + offset as u64, offset, &mut ram, &mut mmu, &Cop0::new())
    }

    #[test]
    fn ends_after_delay_slot() {
        let unit = form(&[asm::addiu(1, 1, 1), asm::beq(1, 2, 4), asm::nop(), asm::addiu(2, 2, 2)], 0).unwrap();
        assert_eq!(unit.len(), 3);
        assert!(unit.instructions[2].delay_slot);
        assert_eq!(unit.mask_updates, vec![0, 4, 8]);
        assert_eq!(unit.end_pc(), BASE + 12);
    }

    #[test]
    fn block_enders_end_immediately() {
        let unit = form(&[asm::addiu(1, 1, 1), asm::syscall(), asm::nop()], 0).unwrap();
        assert_eq!(unit.len(), 2);
    }

    #[test]
    fn branch_in_delay_slot_is_fatal() {
        let err = form(&[asm::beq(0, 0, 4), asm::bne(1, 2, 4)], 0).unwrap_err();
        assert_eq!(err, CompileError::BranchInDelaySlot { pc: BASE + 4 });
    }

    #[test]
    fn stops_at_page_boundary() {
        let unit = form(&[asm::nop(); 8], PAGE_SIZE - 8).unwrap();
        assert_eq!(unit.len(), 2);
        assert!(unit.pulled_page.is_none());
    }

    #[test]
    fn delay_slot_is_pulled_from_next_page() {
        let unit = form(&[asm::nop(), asm::beq(0, 0, 4), asm::addiu(1, 1, 1)], PAGE_SIZE - 8).unwrap();
        assert_eq!(unit.len(), 3);
        assert_eq!(unit.pulled_page, Some(1));
        assert_eq!(unit.mask_updates.last(), Some(&PAGE_SIZE));
        assert!(unit.len() <= MAX_UNIT_LENGTH);
    }

    #[test]
    fn unmapped_delay_slot_becomes_a_fault() {
        // kuseg page with nothing in the TLB behind it
        let mut ram = Ram::new(0x4000);
        ram.load_words(0xff8, &[asm::nop(), asm::beq(0, 0, 4)]);
        let mut mmu = Mmu::new();
        let unit = form_block(0x0040_0ff8, 0xff8, &mut ram, &mut mmu, &Cop0::new()).unwrap();
        assert_eq!(unit.len(), 2);
        assert!(unit.delay_slot_fault.unwrap().refill);
    }

    #[test]
    fn full_page_is_capped() {
        let program = vec![asm::nop(); 1024];
        let unit = form(&program, 0).unwrap();
        assert_eq!(unit.len(), 1024);
    }

    #[test]
    fn idle_loops() {
        assert!(form(&[0x1000_ffff, 0], 0).unwrap().is_idle_loop());
        assert!(form(&[asm::j(BASE + 0x40), 0], 0x40).unwrap().is_idle_loop());
        assert!(!form(&[asm::j(BASE + 0x80), 0], 0x40).unwrap().is_idle_loop());
        assert!(!form(&[0x1000_ffff, asm::addiu(1, 1, 1)], 0).unwrap().is_idle_loop());
    }
}
