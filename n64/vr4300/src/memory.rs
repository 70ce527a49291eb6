//! Data access helpers shared by the interpreter and the recompiler's runtime.
//!
//! The unaligned forms work on a 64 bit lane with the accessed word in the most significant
//! bytes, so the same byte masks serve both word and doubleword variants.

use common::util::ByteMask8;

use crate::bus::Bus;
use crate::cop0::{self, Cop0};
use crate::exception::{ExceptionCode, Fault};
use crate::mmu::{AccessKind, AddressTranslator};
use crate::state::CpuState;

/// Check natural alignment, then translate
pub fn translate(
    mmu: &mut dyn AddressTranslator,
    cop0: &Cop0,
    vaddr: u64,
    access: AccessKind,
    size: u8,
) -> Result<u32, Fault> {
    if vaddr & (size as u64 - 1) != 0 {
        let code = match access {
            AccessKind::Store => ExceptionCode::AddressErrorStore,
            _ => ExceptionCode::AddressErrorLoad,
        };
        return Err(Fault { code, bad_vaddr: vaddr, refill: false });
    }
    mmu.resolve(vaddr, access, cop0)
}

/// Widen a `size` byte bus value to a register value
pub fn extend(value: u64, size: u8, signed: bool) -> u64 {
    if !signed || size == 8 {
        return value;
    }
    let shift = 64 - size as u32 * 8;
    (((value << shift) as i64) >> shift) as u64
}

struct Unaligned {
    phys: u32,
    /// Byte offset within the aligned word
    k: u32,
    n: u32,
    shift_base: u32,
}

fn unaligned(
    mmu: &mut dyn AddressTranslator,
    cop0: &Cop0,
    vaddr: u64,
    access: AccessKind,
    size: u8,
) -> Result<Unaligned, Fault> {
    let n = size as u32;
    let aligned = vaddr & !(size as u64 - 1);
    let phys = translate(mmu, cop0, aligned, access, size)?;
    Ok(Unaligned { phys, k: (vaddr & (size as u64 - 1)) as u32, n, shift_base: 64 - 8 * n })
}

fn finish_load(lane: u64, u: &Unaligned) -> u64 {
    let value = lane >> u.shift_base;
    extend(value, u.n as u8, true)
}

/// LWL/LDL: merge the addressed bytes into the top of `reg`
pub fn load_left(
    bus: &mut dyn Bus,
    mmu: &mut dyn AddressTranslator,
    cop0: &Cop0,
    vaddr: u64,
    reg: u64,
    size: u8,
) -> Result<u64, Fault> {
    let u = unaligned(mmu, cop0, vaddr, AccessKind::Load, size)?;
    let mem = bus.read(u.phys, size) << u.shift_base;

    let mut lane = reg << u.shift_base;
    ByteMask8::new(u.n - u.k, 0).masked_insert(&mut lane, mem << (8 * u.k));
    Ok(finish_load(lane, &u))
}

/// LWR/LDR: merge the addressed bytes into the bottom of `reg`
pub fn load_right(
    bus: &mut dyn Bus,
    mmu: &mut dyn AddressTranslator,
    cop0: &Cop0,
    vaddr: u64,
    reg: u64,
    size: u8,
) -> Result<u64, Fault> {
    let u = unaligned(mmu, cop0, vaddr, AccessKind::Load, size)?;
    let mem = bus.read(u.phys, size) << u.shift_base;

    let mut lane = reg << u.shift_base;
    ByteMask8::new(u.k + 1, u.n - 1 - u.k).masked_insert(&mut lane, mem >> (8 * (u.n - 1 - u.k)));
    Ok(finish_load(lane, &u))
}

/// SWL/SDL
pub fn store_left(
    bus: &mut dyn Bus,
    mmu: &mut dyn AddressTranslator,
    cop0: &Cop0,
    vaddr: u64,
    reg: u64,
    size: u8,
) -> Result<(), Fault> {
    let u = unaligned(mmu, cop0, vaddr, AccessKind::Store, size)?;
    let mut lane = bus.read(u.phys, size) << u.shift_base;

    ByteMask8::new(u.n - u.k, u.k).masked_insert(&mut lane, (reg << u.shift_base) >> (8 * u.k));
    bus.write(u.phys, size, lane >> u.shift_base);
    Ok(())
}

/// SWR/SDR
pub fn store_right(
    bus: &mut dyn Bus,
    mmu: &mut dyn AddressTranslator,
    cop0: &Cop0,
    vaddr: u64,
    reg: u64,
    size: u8,
) -> Result<(), Fault> {
    let u = unaligned(mmu, cop0, vaddr, AccessKind::Store, size)?;
    let mut lane = bus.read(u.phys, size) << u.shift_base;

    ByteMask8::new(u.k + 1, 0).masked_insert(&mut lane, (reg << u.shift_base) << (8 * (u.n - 1 - u.k)));
    bus.write(u.phys, size, lane >> u.shift_base);
    Ok(())
}

/// LL/LLD
pub fn load_linked(
    bus: &mut dyn Bus,
    mmu: &mut dyn AddressTranslator,
    state: &mut CpuState,
    vaddr: u64,
    size: u8,
) -> Result<u64, Fault> {
    let phys = translate(mmu, &state.cop0, vaddr, AccessKind::Load, size)?;
    let value = extend(bus.read(phys, size), size, true);
    state.llbit = true;
    state.cop0.regs[cop0::LLADDR] = (phys >> 4) as u64;
    Ok(value)
}

/// SC/SCD, returns the value written back to `rt`
pub fn store_conditional(
    bus: &mut dyn Bus,
    mmu: &mut dyn AddressTranslator,
    state: &mut CpuState,
    vaddr: u64,
    value: u64,
    size: u8,
) -> Result<u64, Fault> {
    let phys = translate(mmu, &state.cop0, vaddr, AccessKind::Store, size)?;
    if !state.llbit {
        return Ok(0);
    }
    bus.write(phys, size, value);
    Ok(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Ram;
    use crate::mmu::Mmu;

    const BASE: u64 = 0xffff_ffff_8000_0100;

    fn setup() -> (Ram, Mmu, CpuState) {
        let mut ram = Ram::new(0x1000);
        ram.load(0x100, &[0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88]);
        (ram, Mmu::new(), CpuState::new())
    }

    #[test]
    fn misaligned_access_faults() {
        let (_, mut mmu, state) = setup();
        let fault = translate(&mut mmu, &state.cop0, BASE + 2, AccessKind::Load, 4).unwrap_err();
        assert_eq!(fault.code, ExceptionCode::AddressErrorLoad);
        assert_eq!(fault.bad_vaddr, BASE + 2);
    }

    #[test]
    fn word_left_and_right() {
        let (mut ram, mut mmu, state) = setup();
        let reg = 0xaabb_ccdd;
        let l = load_left(&mut ram, &mut mmu, &state.cop0, BASE + 1, reg, 4).unwrap();
        assert_eq!(l, 0x2233_44dd);
        let r = load_right(&mut ram, &mut mmu, &state.cop0, BASE + 1, reg, 4).unwrap();
        assert_eq!(r, 0xffff_ffff_aabb_1122);
        // an aligned LWL/LWR pair is a plain load
        let l = load_left(&mut ram, &mut mmu, &state.cop0, BASE, 0, 4).unwrap();
        let r = load_right(&mut ram, &mut mmu, &state.cop0, BASE + 3, l, 4).unwrap();
        assert_eq!(r, 0x1122_3344);
    }

    #[test]
    fn word_store_left_and_right() {
        let (mut ram, mut mmu, state) = setup();
        store_left(&mut ram, &mut mmu, &state.cop0, BASE + 1, 0xaabb_ccdd, 4).unwrap();
        assert_eq!(ram.read(0x100, 4), 0x11aa_bbcc);
        store_right(&mut ram, &mut mmu, &state.cop0, BASE + 4 + 1, 0xaabb_ccdd, 4).unwrap();
        assert_eq!(ram.read(0x104, 4), 0xccdd_7788);
    }

    #[test]
    fn doubleword_left() {
        let (mut ram, mut mmu, state) = setup();
        let l = load_left(&mut ram, &mut mmu, &state.cop0, BASE + 6, !0, 8).unwrap();
        assert_eq!(l, 0x7788_ffff_ffff_ffff);
    }

    #[test]
    fn linked_pair() {
        let (mut ram, mut mmu, mut state) = setup();
        assert_eq!(store_conditional(&mut ram, &mut mmu, &mut state, BASE, 5, 4), Ok(0));
        assert_eq!(load_linked(&mut ram, &mut mmu, &mut state, BASE, 4), Ok(0x1122_3344));
        assert_eq!(state.cop0.regs[cop0::LLADDR], 0x10);
        assert_eq!(store_conditional(&mut ram, &mut mmu, &mut state, BASE, 5, 4), Ok(1));
        assert_eq!(ram.read(0x100, 4), 5);
    }
}
