use crate::cop0::Cop0;
use crate::instructions::MIPS_REG_NAMES;

/// Reset value of the FPU implementation/revision register
pub const FCR0: u32 = 0x0000_0a00;
/// Bits of FCR31 software can write
pub const FCR31_WRITE_MASK: u32 = 0x0183_ffff;
/// Set by C.cond, read by BC1T/BC1F
pub const FCR31_CONDITION: u32 = 1 << 23;

/// Architectural state of the VR4300.
///
/// Compiled blocks read and write this directly, so the recompiler keeps it in a box that
/// never moves for as long as any block is resident.
#[derive(Debug, Clone, PartialEq, Eq)]
#[repr(C)]
pub struct CpuState {
    pub gpr: [u64; 32],
    /// Raw bit patterns. How they pair up depends on Status.FR
    pub fgr: [u64; 32],
    pub hi: u64,
    pub lo: u64,
    pub pc: u64,
    pub fcr31: u32,
    pub llbit: bool,
    pub cop0: Cop0,
}

impl Default for CpuState {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuState {
    pub fn new() -> CpuState {
        CpuState {
            gpr: [0; 32],
            fgr: [0; 32],
            hi: 0,
            lo: 0,
            pc: 0xffff_ffff_bfc0_0000,
            fcr31: 0,
            llbit: false,
            cop0: Cop0::new(),
        }
    }

    #[inline(always)]
    pub fn read_gpr(&self, reg: u8) -> u64 {
        self.gpr[reg as usize]
    }

    #[inline(always)]
    pub fn write_gpr(&mut self, reg: u8, value: u64) {
        if reg != 0 {
            self.gpr[reg as usize] = value;
        }
    }

    /// 32 bit view of an FPU register (MFC1, LWC1, single precision operands)
    pub fn read_fpr32(&self, reg: u8) -> u32 {
        let reg = reg as usize;
        if self.cop0.fr() || reg & 1 == 0 {
            self.fgr[reg] as u32
        } else {
            (self.fgr[reg & !1] >> 32) as u32
        }
    }

    /// In FR=0 mode odd registers are the high half of their even neighbour
    pub fn write_fpr32(&mut self, reg: u8, value: u32) {
        let reg = reg as usize;
        if self.cop0.fr() {
            self.fgr[reg] = value as u64;
        } else if reg & 1 == 0 {
            self.fgr[reg] = (self.fgr[reg] & 0xffff_ffff_0000_0000) | value as u64;
        } else {
            self.fgr[reg & !1] = (self.fgr[reg & !1] & 0xffff_ffff) | ((value as u64) << 32);
        }
    }

    pub fn read_fpr64(&self, reg: u8) -> u64 {
        self.fgr[fpr64_index(self.cop0.fr(), reg)]
    }

    pub fn write_fpr64(&mut self, reg: u8, value: u64) {
        self.fgr[fpr64_index(self.cop0.fr(), reg)] = value;
    }

    pub fn dump_gprs(&self) -> String {
        self.gpr
            .iter()
            .enumerate()
            .map(|(i, v)| format!("{:>5}: {:016x}", MIPS_REG_NAMES[i], v))
            .collect::<Vec<_>>()
            .chunks(4)
            .map(|row| row.join("  "))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Which `fgr` slot a 64 bit access to `reg` uses
pub fn fpr64_index(fr: bool, reg: u8) -> usize {
    if fr {
        reg as usize
    } else {
        reg as usize & !1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cop0::{status, STATUS};

    #[test]
    fn r0_is_hardwired() {
        let mut state = CpuState::new();
        state.write_gpr(0, 5);
        state.write_gpr(1, 5);
        assert_eq!(state.gpr[0], 0);
        assert_eq!(state.gpr[1], 5);
    }

    #[test]
    fn fr0_pairs_registers() {
        let mut state = CpuState::new();
        state.cop0.regs[STATUS] &= !status::FR;
        state.write_fpr32(2, 0x1111_1111);
        state.write_fpr32(3, 0x2222_2222);
        assert_eq!(state.fgr[2], 0x2222_2222_1111_1111);
        assert_eq!(state.fgr[3], 0);
        assert_eq!(state.read_fpr32(3), 0x2222_2222);
        assert_eq!(state.read_fpr64(3), 0x2222_2222_1111_1111);
    }

    #[test]
    fn fr1_single_writes_clear_the_top() {
        let mut state = CpuState::new();
        state.fgr[5] = !0;
        state.write_fpr32(5, 7);
        assert_eq!(state.fgr[5], 7);
    }
}
