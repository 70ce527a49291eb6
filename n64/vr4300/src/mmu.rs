use tracing::trace;

use crate::cop0::{self, Cop0};
use crate::exception::{ExceptionCode, Fault};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessKind {
    Fetch,
    Load,
    Store,
}

impl AccessKind {
    fn address_error(self) -> ExceptionCode {
        match self {
            AccessKind::Store => ExceptionCode::AddressErrorStore,
            _ => ExceptionCode::AddressErrorLoad,
        }
    }

    fn tlb_miss(self) -> ExceptionCode {
        match self {
            AccessKind::Store => ExceptionCode::TlbStore,
            _ => ExceptionCode::TlbLoad,
        }
    }
}

/// Virtual to physical translation, plus the TLB maintenance instructions that change it
pub trait AddressTranslator {
    fn resolve(&mut self, vaddr: u64, access: AccessKind, cop0: &Cop0) -> Result<u32, Fault>;

    /// TLBR
    fn tlb_read(&mut self, cop0: &mut Cop0);
    /// TLBWI
    fn tlb_write_indexed(&mut self, cop0: &mut Cop0);
    /// TLBWR
    fn tlb_write_random(&mut self, cop0: &mut Cop0);
    /// TLBP
    fn tlb_probe(&mut self, cop0: &mut Cop0);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TlbEntry {
    page_mask: u32,
    entry_hi: u64,
    entry_lo: [u64; 2],
}

impl TlbEntry {
    fn global(&self) -> bool {
        self.entry_lo[0] & self.entry_lo[1] & 1 != 0
    }

    /// Mask of the offset within one of the two pages this entry maps
    fn offset_mask(&self) -> u32 {
        (self.page_mask >> 1) | 0xfff
    }

    /// Matches the VPN2 and ASID (unless global)
    fn matches(&self, vaddr: u32, asid: u8) -> bool {
        let vpn_mask = !((self.offset_mask() << 1) | 1);
        (vaddr ^ self.entry_hi as u32) & vpn_mask == 0
            && (self.global() || self.entry_hi as u8 == asid)
    }
}

pub const TLB_ENTRIES: usize = 32;

/// The joint TLB plus the fixed kseg0/kseg1 mapping.
///
/// Only 32 bit compatibility addressing is modelled.
#[derive(Debug, Clone, Default)]
pub struct Mmu {
    entries: [TlbEntry; TLB_ENTRIES],
}

impl Mmu {
    pub fn new() -> Mmu {
        Mmu::default()
    }

    fn write_entry(&mut self, index: usize, cop0: &Cop0) {
        let page_mask = (cop0.regs[cop0::PAGE_MASK] & 0x01ff_e000) as u32;
        let entry = TlbEntry {
            page_mask,
            entry_hi: cop0.regs[cop0::ENTRY_HI] & !(page_mask as u64) & 0xc000_00ff_ffff_e0ff,
            entry_lo: [cop0.regs[cop0::ENTRY_LO0], cop0.regs[cop0::ENTRY_LO1]],
        };
        trace!(target: "TLB", "write {}: {:x?}", index, entry);
        self.entries[index % TLB_ENTRIES] = entry;
    }

    fn lookup(&self, vaddr: u32, access: AccessKind, asid: u8) -> Result<u32, Fault> {
        let miss = |refill| Fault { code: access.tlb_miss(), bad_vaddr: vaddr as i32 as i64 as u64, refill };

        let entry = self.entries.iter().find(|e| e.matches(vaddr, asid)).ok_or(miss(true))?;

        let offset_mask = entry.offset_mask();
        let odd = vaddr & (offset_mask + 1) != 0;
        let lo = entry.entry_lo[odd as usize];

        if lo & 2 == 0 {
            return Err(miss(false));
        }
        if access == AccessKind::Store && lo & 4 == 0 {
            return Err(Fault { code: ExceptionCode::TlbModification, ..miss(false) });
        }

        let pfn = ((lo >> 6) & 0xf_ffff) as u32;
        Ok(((pfn << 12) & !offset_mask) | (vaddr & offset_mask))
    }
}

impl AddressTranslator for Mmu {
    fn resolve(&mut self, vaddr: u64, access: AccessKind, cop0: &Cop0) -> Result<u32, Fault> {
        let addr = vaddr as u32;
        if vaddr != addr as i32 as i64 as u64 {
            return Err(Fault { code: access.address_error(), bad_vaddr: vaddr, refill: false });
        }

        match addr {
            // kseg0 and kseg1: unmapped, cached and uncached
            0x8000_0000..=0xbfff_ffff => Ok(addr & 0x1fff_ffff),
            _ => self.lookup(addr, access, cop0.asid()),
        }
    }

    fn tlb_read(&mut self, cop0: &mut Cop0) {
        let entry = self.entries[cop0.regs[cop0::INDEX] as usize % TLB_ENTRIES];
        let global = entry.global() as u64;
        cop0.regs[cop0::PAGE_MASK] = entry.page_mask as u64;
        cop0.regs[cop0::ENTRY_HI] = entry.entry_hi;
        cop0.regs[cop0::ENTRY_LO0] = (entry.entry_lo[0] & !1) | global;
        cop0.regs[cop0::ENTRY_LO1] = (entry.entry_lo[1] & !1) | global;
    }

    fn tlb_write_indexed(&mut self, cop0: &mut Cop0) {
        let index = (cop0.regs[cop0::INDEX] & 0x3f) as usize;
        self.write_entry(index, cop0);
    }

    fn tlb_write_random(&mut self, cop0: &mut Cop0) {
        let index = cop0.regs[cop0::RANDOM] as usize;
        self.write_entry(index, cop0);

        // Random counts down towards Wired, then wraps back to the top
        let wired = cop0.regs[cop0::WIRED] & 0x1f;
        let random = cop0.regs[cop0::RANDOM];
        cop0.regs[cop0::RANDOM] = if random <= wired { 31 } else { random - 1 };
    }

    fn tlb_probe(&mut self, cop0: &mut Cop0) {
        let entry_hi = cop0.regs[cop0::ENTRY_HI];
        let found = self.entries.iter().position(|e| e.matches(entry_hi as u32, entry_hi as u8));
        cop0.regs[cop0::INDEX] = match found {
            Some(index) => index as u64,
            None => 0x8000_0000,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_page(mmu: &mut Mmu, cop0: &mut Cop0, index: u64, vaddr: u64, even_pfn: u64, odd_pfn: u64) {
        cop0.regs[cop0::INDEX] = index;
        cop0.regs[cop0::PAGE_MASK] = 0;
        cop0.regs[cop0::ENTRY_HI] = vaddr;
        // valid, dirty, global
        cop0.regs[cop0::ENTRY_LO0] = (even_pfn << 6) | 0b111;
        cop0.regs[cop0::ENTRY_LO1] = (odd_pfn << 6) | 0b011;
        mmu.tlb_write_indexed(cop0);
    }

    #[test]
    fn unmapped_segments() {
        let mut mmu = Mmu::new();
        let cop0 = Cop0::new();
        assert_eq!(mmu.resolve(0xffff_ffff_8000_1234, AccessKind::Load, &cop0), Ok(0x1234));
        assert_eq!(mmu.resolve(0xffff_ffff_a400_0040, AccessKind::Fetch, &cop0), Ok(0x0400_0040));
    }

    #[test]
    fn non_canonical_addresses_fault() {
        let mut mmu = Mmu::new();
        let cop0 = Cop0::new();
        let fault = mmu.resolve(0x8000_0000, AccessKind::Store, &cop0).unwrap_err();
        assert_eq!(fault.code, ExceptionCode::AddressErrorStore);
    }

    #[test]
    fn tlb_maps_page_pairs() {
        let mut mmu = Mmu::new();
        let mut cop0 = Cop0::new();
        map_page(&mut mmu, &mut cop0, 3, 0x0040_0000, 0x100, 0x200);

        assert_eq!(mmu.resolve(0x0040_0010, AccessKind::Load, &cop0), Ok(0x0010_0010));
        assert_eq!(mmu.resolve(0x0040_1010, AccessKind::Load, &cop0), Ok(0x0020_0010));

        // odd page isn't dirty
        let fault = mmu.resolve(0x0040_1010, AccessKind::Store, &cop0).unwrap_err();
        assert_eq!(fault.code, ExceptionCode::TlbModification);

        let fault = mmu.resolve(0x0050_0000, AccessKind::Fetch, &cop0).unwrap_err();
        assert_eq!(fault.code, ExceptionCode::TlbLoad);
        assert!(fault.refill);
    }

    #[test]
    fn probe_and_read_back() {
        let mut mmu = Mmu::new();
        let mut cop0 = Cop0::new();
        map_page(&mut mmu, &mut cop0, 9, 0x0040_0000, 0x100, 0x200);

        cop0.regs[cop0::ENTRY_HI] = 0x0040_0000;
        mmu.tlb_probe(&mut cop0);
        assert_eq!(cop0.regs[cop0::INDEX], 9);

        cop0.regs[cop0::ENTRY_HI] = 0x0060_0000;
        mmu.tlb_probe(&mut cop0);
        assert_eq!(cop0.regs[cop0::INDEX], 0x8000_0000);

        cop0.regs[cop0::INDEX] = 9;
        cop0.regs[cop0::ENTRY_LO0] = 0;
        mmu.tlb_read(&mut cop0);
        assert_eq!(cop0.regs[cop0::ENTRY_LO0], (0x100 << 6) | 0b111);
    }

    #[test]
    fn random_write_counts_down() {
        let mut mmu = Mmu::new();
        let mut cop0 = Cop0::new();
        cop0.regs[cop0::WIRED] = 30;
        mmu.tlb_write_random(&mut cop0);
        assert_eq!(cop0.regs[cop0::RANDOM], 30);
        mmu.tlb_write_random(&mut cop0);
        assert_eq!(cop0.regs[cop0::RANDOM], 31);
    }
}
