//! System control coprocessor registers

pub const COP0_REG_NAMES: [&str; 32] = [
    "Index",
    "Random",
    "EntryLo0",
    "EntryLo1",
    "Context",
    "PageMask",
    "Wired",
    "unk7",
    "BadVAddr",
    "Count",
    "EntryHi",
    "Compare",
    "Status",
    "Cause",
    "EPC", // Exception Program Counter
    "PRId", // Processor ID
    "Config",
    "LLAddr",
    "WatchLo",
    "WatchHi",
    "XContext",
    "unk21",
    "unk22",
    "unk23",
    "unk24",
    "unk25",
    "Parity Error",
    "Cache Error",
    "TagLo",
    "TagHi",
    "ErrorEPC",
    "unk31"
];

pub const INDEX: usize = 0;
pub const RANDOM: usize = 1;
pub const ENTRY_LO0: usize = 2;
pub const ENTRY_LO1: usize = 3;
pub const CONTEXT: usize = 4;
pub const PAGE_MASK: usize = 5;
pub const WIRED: usize = 6;
pub const BAD_VADDR: usize = 8;
pub const COUNT: usize = 9;
pub const ENTRY_HI: usize = 10;
pub const COMPARE: usize = 11;
pub const STATUS: usize = 12;
pub const CAUSE: usize = 13;
pub const EPC: usize = 14;
pub const PRID: usize = 15;
pub const CONFIG: usize = 16;
pub const LLADDR: usize = 17;
pub const ERROR_EPC: usize = 30;

pub mod status {
    pub const IE: u64 = 1 << 0;
    pub const EXL: u64 = 1 << 1;
    pub const ERL: u64 = 1 << 2;
    pub const BEV: u64 = 1 << 22;
    pub const FR: u64 = 1 << 26;
    pub const CU0: u64 = 1 << 28;
    pub const CU1: u64 = 1 << 29;
}

pub mod cause {
    pub const EXC_CODE_SHIFT: u32 = 2;
    pub const EXC_CODE: u64 = 0x1f << EXC_CODE_SHIFT;
    pub const IP7: u64 = 1 << 15;
    pub const SOFTWARE_IP: u64 = 0x3 << 8;
    pub const CE_SHIFT: u32 = 28;
    pub const CE: u64 = 0x3 << CE_SHIFT;
    pub const BD: u64 = 1 << 31;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cop0 {
    pub regs: [u64; 32],
}

impl Default for Cop0 {
    fn default() -> Self {
        Self::new()
    }
}

impl Cop0 {
    pub fn new() -> Cop0 {
        let mut regs = [0; 32];
        regs[RANDOM] = 31;
        regs[STATUS] = status::CU0 | status::CU1 | status::FR;
        regs[PRID] = 0x0b22;
        regs[CONFIG] = 0x7006_e463;
        Cop0 { regs }
    }

    #[inline(always)]
    pub fn status(&self) -> u64 {
        self.regs[STATUS]
    }

    pub fn fr(&self) -> bool {
        self.status() & status::FR != 0
    }

    pub fn cu1(&self) -> bool {
        self.status() & status::CU1 != 0
    }

    pub fn exl(&self) -> bool {
        self.status() & status::EXL != 0
    }

    pub fn asid(&self) -> u8 {
        self.regs[ENTRY_HI] as u8
    }

    /// MFC0/DMFC0
    pub fn read(&self, reg: u8, double: bool) -> u64 {
        let value = self.regs[reg as usize & 31];
        if double {
            value
        } else {
            value as i32 as i64 as u64
        }
    }

    /// MTC0/DMTC0, applying each register's writable mask
    pub fn write(&mut self, reg: u8, value: u64, double: bool) {
        let value = if double { value } else { value as i32 as i64 as u64 };
        let reg = reg as usize & 31;
        let old = self.regs[reg];

        self.regs[reg] = match reg {
            INDEX => (old & 0x8000_0000) | (value & 0x3f),
            // Read only
            RANDOM | BAD_VADDR | PRID => old,
            ENTRY_LO0 | ENTRY_LO1 => value & 0x3fff_ffff,
            CONTEXT => (old & 0x7f_fff0) | (value & !0x7f_ffff),
            PAGE_MASK => value & 0x01ff_e000,
            WIRED => {
                self.regs[RANDOM] = 31;
                value & 0x3f
            }
            ENTRY_HI => value & 0xc000_00ff_ffff_e0ff,
            COMPARE => {
                self.regs[CAUSE] &= !cause::IP7;
                value & 0xffff_ffff
            }
            CAUSE => (old & !cause::SOFTWARE_IP) | (value & cause::SOFTWARE_IP),
            CONFIG => (old & !0x0f00_800f) | (value & 0x0f00_800f),
            _ => value,
        };
    }
}
