use vr4300::cop0;
use vr4300::instructions::{decode, ExMode, Form, Instruction, InstructionInfo};

use crate::error::CompileError;

/// How an instruction affects unit formation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Normal,
    Store,
    Cache,
    Branch,
    BranchLikely,
    TlbWrite,
    /// Always leaves the block: ERET, SYSCALL, BREAK, and writes to Status, which change how
    /// the rest of the stream has to be compiled
    BlockEnder,
}

impl Category {
    pub fn is_branch(self) -> bool {
        matches!(self, Category::Branch | Category::BranchLikely)
    }
}

pub fn classify(pc: u64, word: u32) -> Result<(Instruction, &'static InstructionInfo, Category), CompileError> {
    let (inst, info) = decode(word);
    let (form, mode) = match info {
        InstructionInfo::Op(_, form, mode) => (*form, *mode),
        InstructionInfo::Unimplemented(name) => {
            return Err(CompileError::Unimplemented { pc, word, name: *name })
        }
        _ => return Err(CompileError::Reserved { pc, word }),
    };

    let category = match mode {
        _ if mode.is_likely_branch() => Category::BranchLikely,
        _ if mode.is_branch() => Category::Branch,
        ExMode::Eret | ExMode::Syscall | ExMode::Break => Category::BlockEnder,
        ExMode::MoveToCop0 { .. } if inst.r().rd() as usize == cop0::STATUS => Category::BlockEnder,
        ExMode::TlbWriteIndexed | ExMode::TlbWriteRandom => Category::TlbWrite,
        ExMode::CacheOp => Category::Cache,
        _ if matches!(form, Form::StoreBaseImm | Form::StoreFpuBaseImm) => Category::Store,
        _ => Category::Normal,
    };
    Ok((inst, info, category))
}

#[cfg(test)]
mod tests {
    use super::*;
    use vr4300::asm;

    fn category(word: u32) -> Category {
        classify(0, word).unwrap().2
    }

    #[test]
    fn categories() {
        assert_eq!(category(asm::addiu(1, 1, 1)), Category::Normal);
        assert_eq!(category(asm::sw(1, 2, 0)), Category::Store);
        assert_eq!(category(asm::sdc1(1, 2, 0)), Category::Store);
        assert_eq!(category(asm::cache(0x10, 2, 0)), Category::Cache);
        assert_eq!(category(asm::beq(1, 2, 4)), Category::Branch);
        assert_eq!(category(asm::jr(31)), Category::Branch);
        assert_eq!(category(asm::bc1fl(3)), Category::BranchLikely);
        assert_eq!(category(asm::bgezall(3, 3)), Category::BranchLikely);
        assert_eq!(category(asm::tlbwr()), Category::TlbWrite);
        assert_eq!(category(asm::eret()), Category::BlockEnder);
        assert_eq!(category(asm::syscall()), Category::BlockEnder);
        assert_eq!(category(asm::mtc0(8, 12)), Category::BlockEnder);
        assert_eq!(category(asm::mtc0(8, 11)), Category::Normal);
    }

    #[test]
    fn bad_encodings_are_errors() {
        assert_eq!(classify(0x40, 0x13 << 26).unwrap_err(), CompileError::Reserved { pc: 0x40, word: 0x13 << 26 });
        assert!(matches!(classify(0, 0x12 << 26), Err(CompileError::Unimplemented { name: "COP2", .. })));
    }
}
