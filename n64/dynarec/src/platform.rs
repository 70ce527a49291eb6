//! Host register descriptions that drive allocation.
//!
//! Only registers the allocator may hand out are listed. Registers the emitted code needs for
//! itself (stack pointer, state pointer, scratch for spills) are left out.

use crate::ir::{RegClass, ValueType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostReg {
    pub id: u8,
    pub name: &'static str,
    /// Callee saved across host calls
    pub preserved: bool,
}

const fn reg(id: u8, name: &'static str, preserved: bool) -> HostReg {
    HostReg { id, name, preserved }
}

/// Which constants an instruction can carry inline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImmediateRule {
    /// Anything that sign extends from 32 bits (x86-64 `imm32`)
    SignExtended32,
    /// Unsigned values below `1 << bits` (AArch64 `imm12`)
    Unsigned { bits: u32 },
}

#[derive(Debug)]
pub struct Platform {
    pub name: &'static str,
    pub gprs: &'static [HostReg],
    pub fgrs: &'static [HostReg],
    pub immediates: ImmediateRule,
}

impl Platform {
    pub fn registers(&self, class: RegClass) -> &'static [HostReg] {
        match class {
            RegClass::Gpr => self.gprs,
            RegClass::Fgr => self.fgrs,
        }
    }

    /// Can this constant be encoded directly into the instruction that uses it
    pub fn is_valid_immediate(&self, ty: ValueType, value: u64) -> bool {
        match self.immediates {
            ImmediateRule::SignExtended32 => {
                matches!(ty, ValueType::S8 | ValueType::U8 | ValueType::S16 | ValueType::U16 | ValueType::S32)
            }
            ImmediateRule::Unsigned { bits } => value < (1 << bits),
        }
    }
}

pub static X86_64: Platform = Platform {
    name: "x86_64",
    gprs: &[
        reg(3, "rbx", true),
        reg(5, "rbp", true),
        reg(12, "r12", true),
        reg(13, "r13", true),
        reg(14, "r14", true),
        reg(15, "r15", true),
    ],
    fgrs: &[
        reg(0, "xmm0", false),
        reg(1, "xmm1", false),
        reg(2, "xmm2", false),
        reg(3, "xmm3", false),
        reg(4, "xmm4", false),
        reg(5, "xmm5", false),
        reg(6, "xmm6", false),
        reg(7, "xmm7", false),
        reg(8, "xmm8", false),
        reg(9, "xmm9", false),
        reg(10, "xmm10", false),
        reg(11, "xmm11", false),
        reg(12, "xmm12", false),
        reg(13, "xmm13", false),
        reg(14, "xmm14", false),
        reg(15, "xmm15", false),
    ],
    immediates: ImmediateRule::SignExtended32,
};

pub static AARCH64: Platform = Platform {
    name: "aarch64",
    gprs: &[
        reg(19, "x19", true),
        reg(20, "x20", true),
        reg(21, "x21", true),
        reg(22, "x22", true),
        reg(23, "x23", true),
        reg(24, "x24", true),
        reg(25, "x25", true),
        reg(26, "x26", true),
        reg(27, "x27", true),
        reg(28, "x28", true),
    ],
    fgrs: &[
        reg(8, "v8", true),
        reg(9, "v9", true),
        reg(10, "v10", true),
        reg(11, "v11", true),
        reg(12, "v12", true),
        reg(13, "v13", true),
        reg(14, "v14", true),
        reg(15, "v15", true),
        reg(16, "v16", false),
        reg(17, "v17", false),
        reg(18, "v18", false),
        reg(19, "v19", false),
        reg(20, "v20", false),
        reg(21, "v21", false),
        reg(22, "v22", false),
        reg(23, "v23", false),
        reg(24, "v24", false),
        reg(25, "v25", false),
        reg(26, "v26", false),
        reg(27, "v27", false),
        reg(28, "v28", false),
        reg(29, "v29", false),
        reg(30, "v30", false),
        reg(31, "v31", false),
    ],
    immediates: ImmediateRule::Unsigned { bits: 12 },
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediate_rules() {
        assert!(X86_64.is_valid_immediate(ValueType::S32, 0xffff_ffff_8000_0000));
        assert!(!X86_64.is_valid_immediate(ValueType::U64, 1 << 40));
        assert!(AARCH64.is_valid_immediate(ValueType::U64, 4095));
        assert!(!AARCH64.is_valid_immediate(ValueType::S8, (-1i64) as u64));
    }

    #[test]
    fn pools_are_disjoint_per_class() {
        for platform in [&X86_64, &AARCH64] {
            let mut ids: Vec<_> = platform.gprs.iter().map(|r| r.id).collect();
            ids.dedup();
            assert_eq!(ids.len(), platform.gprs.len());
            assert!(platform.gprs.len() <= 32 && platform.fgrs.len() <= 32);
        }
    }
}
