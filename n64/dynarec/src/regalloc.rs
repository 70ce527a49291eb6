//! Linear scan register allocation (Poletto & Sarkar) over the two host register classes.
//!
//! Live ranges never leave the block, so a value's interval is just its own index up to the
//! index of its last user.

use std::fmt;

use crate::error::CompileError;
use crate::ir::{IrContext, RegClass, ValueId, ValueKind};
use crate::platform::Platform;

/// Bytes per spill slot
pub const SPILL_ENTRY_SIZE: usize = 8;
/// Spill area available to one block
pub const MAX_SPILL_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Allocation {
    /// Produces nothing, or was removed
    #[default]
    None,
    /// Constant encoded into its users
    Immediate,
    Register { class: RegClass, reg: u8 },
    Spilled { class: RegClass, slot: u16 },
}

impl fmt::Display for Allocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Allocation::None => Ok(()),
            Allocation::Immediate => f.write_str("imm"),
            Allocation::Register { class: RegClass::Gpr, reg } => write!(f, "r{}", reg),
            Allocation::Register { class: RegClass::Fgr, reg } => write!(f, "f{}", reg),
            Allocation::Spilled { slot, .. } => write!(f, "[sp+{}]", *slot as usize * SPILL_ENTRY_SIZE),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Allocations {
    values: Vec<Allocation>,
    pub spill_slots: usize,
}

impl Allocations {
    pub fn get(&self, id: ValueId) -> Allocation {
        self.values.get(id.index()).copied().unwrap_or_default()
    }
}

/// Index of the last value that reads each value, if any does
pub fn last_uses(ctx: &IrContext) -> Vec<Option<ValueId>> {
    let mut last = vec![None; ctx.id_bound()];
    for (id, value) in ctx.iter() {
        for used in value.uses() {
            last[used.index()] = Some(id);
        }
    }
    last
}

#[derive(Debug, Clone, Copy)]
struct Active {
    end: ValueId,
    value: ValueId,
    reg: u8,
}

/// One register class's pool
struct Pool {
    free: Vec<u8>,
    /// Sorted by increasing end
    active: Vec<Active>,
}

impl Pool {
    fn new(platform: &Platform, class: RegClass) -> Pool {
        Pool { free: platform.registers(class).iter().rev().map(|r| r.id).collect(), active: Vec::new() }
    }

    fn expire(&mut self, now: ValueId) {
        let expired = self.active.partition_point(|a| a.end < now);
        for a in self.active.drain(..expired) {
            self.free.push(a.reg);
        }
    }

    fn insert(&mut self, entry: Active) {
        let at = self.active.partition_point(|a| a.end <= entry.end);
        self.active.insert(at, entry);
    }
}

struct SpillArea {
    used: usize,
}

impl SpillArea {
    fn take(&mut self) -> Result<u16, CompileError> {
        if (self.used + 1) * SPILL_ENTRY_SIZE > MAX_SPILL_BYTES {
            return Err(CompileError::SpillExhausted { slots: self.used });
        }
        self.used += 1;
        Ok((self.used - 1) as u16)
    }
}

pub fn allocate(ctx: &IrContext, platform: &Platform) -> Result<Allocations, CompileError> {
    let last = last_uses(ctx);
    let mut values = vec![Allocation::None; ctx.id_bound()];
    let mut gprs = Pool::new(platform, RegClass::Gpr);
    let mut fgrs = Pool::new(platform, RegClass::Fgr);
    let mut spill = SpillArea { used: 0 };

    for (id, value) in ctx.iter() {
        let Some(class) = value.kind.result_class() else {
            continue;
        };
        if let ValueKind::Constant { ty, value } = value.kind {
            if platform.is_valid_immediate(ty, value) {
                values[id.index()] = Allocation::Immediate;
                continue;
            }
        }

        // An unused result still needs somewhere to land
        let end = last[id.index()].unwrap_or(id);
        let pool = match class {
            RegClass::Gpr => &mut gprs,
            RegClass::Fgr => &mut fgrs,
        };
        pool.expire(id);

        if let Some(reg) = pool.free.pop() {
            values[id.index()] = Allocation::Register { class, reg };
            pool.insert(Active { end, value: id, reg });
            continue;
        }

        match pool.active.last().copied() {
            Some(victim) if victim.end > end => {
                pool.active.pop();
                values[victim.value.index()] = Allocation::Spilled { class, slot: spill.take()? };
                values[id.index()] = Allocation::Register { class, reg: victim.reg };
                pool.insert(Active { end, value: id, reg: victim.reg });
            }
            _ => values[id.index()] = Allocation::Spilled { class, slot: spill.take()? },
        }
    }

    Ok(Allocations { values, spill_slots: spill.used })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinaryOp, GuestReg, ValueType};
    use crate::platform::{HostReg, ImmediateRule, X86_64};
    use proptest::prelude::*;

    static TINY: Platform = Platform {
        name: "tiny",
        gprs: &[HostReg { id: 1, name: "a", preserved: false }, HostReg { id: 2, name: "b", preserved: false }],
        fgrs: &[HostReg { id: 0, name: "f", preserved: false }],
        immediates: ImmediateRule::Unsigned { bits: 4 },
    };

    #[test]
    fn small_constants_become_immediates() {
        let mut ctx = IrContext::new();
        let a = ctx.constant(ValueType::S8, 3);
        let b = ctx.constant(ValueType::U64, 1 << 40);
        let sum = ctx.push(ValueKind::Binary { op: BinaryOp::Add, lhs: a, rhs: b });
        ctx.push(ValueKind::FlushGuestReg { reg: GuestReg::gpr(1), value: sum });
        let allocs = allocate(&ctx, &X86_64).unwrap();
        assert_eq!(allocs.get(a), Allocation::Immediate);
        assert!(matches!(allocs.get(b), Allocation::Register { class: RegClass::Gpr, .. }));
        assert_eq!(allocs.get(ValueId(3)), Allocation::None);
    }

    #[test]
    fn longest_living_value_is_spilled() {
        let mut ctx = IrContext::new();
        let long = ctx.load_reg(GuestReg::gpr(1));
        let a = ctx.load_reg(GuestReg::gpr(2));
        let b = ctx.load_reg(GuestReg::gpr(3));
        let ab = ctx.push(ValueKind::Binary { op: BinaryOp::Add, lhs: a, rhs: b });
        ctx.push(ValueKind::FlushGuestReg { reg: GuestReg::gpr(4), value: ab });
        ctx.push(ValueKind::FlushGuestReg { reg: GuestReg::gpr(5), value: long });

        let allocs = allocate(&ctx, &TINY).unwrap();
        assert!(matches!(allocs.get(long), Allocation::Spilled { .. }));
        assert!(matches!(allocs.get(b), Allocation::Register { .. }));
        // a and b are still live while their sum is allocated
        assert!(matches!(allocs.get(ab), Allocation::Spilled { .. }));
        assert_eq!(allocs.spill_slots, 2);
    }

    #[test]
    fn classes_use_their_own_pools() {
        let mut ctx = IrContext::new();
        let f = ctx.load_reg(GuestReg::fpr(0));
        let g = ctx.load_reg(GuestReg::gpr(1));
        ctx.push(ValueKind::FlushGuestReg { reg: GuestReg::fpr(1), value: f });
        ctx.push(ValueKind::FlushGuestReg { reg: GuestReg::gpr(2), value: g });
        let allocs = allocate(&ctx, &TINY).unwrap();
        assert_eq!(allocs.get(f), Allocation::Register { class: RegClass::Fgr, reg: 0 });
        assert_eq!(allocs.get(g), Allocation::Register { class: RegClass::Gpr, reg: 1 });
    }

    proptest! {
        #[test]
        fn live_ranges_never_share_a_register(ops in proptest::collection::vec((0u8..3, any::<usize>(), any::<usize>()), 1..60)) {
            let mut ctx = IrContext::new();
            let mut ids = Vec::new();
            for (i, (kind, x, y)) in ops.into_iter().enumerate() {
                let id = match (kind, i) {
                    (_, 0) | (0, _) => ctx.push(ValueKind::LoadGuestReg { reg: GuestReg::gpr(1 + (x % 31) as u8) }),
                    (1, _) => ctx.push(ValueKind::Binary { op: BinaryOp::Xor, lhs: ids[x % i], rhs: ids[y % i] }),
                    _ => ctx.push(ValueKind::FlushGuestReg { reg: GuestReg::gpr(1 + (y % 31) as u8), value: ids[x % i] }),
                };
                ids.push(id);
            }

            let allocs = allocate(&ctx, &TINY).unwrap();
            let last = last_uses(&ctx);
            let intervals: Vec<_> = ids
                .iter()
                .filter_map(|&id| match allocs.get(id) {
                    Allocation::Register { class, reg } => Some((id, last[id.index()].unwrap_or(id), class, reg)),
                    _ => None,
                })
                .collect();
            for (i, a) in intervals.iter().enumerate() {
                for b in &intervals[i + 1..] {
                    let overlap = a.0 <= b.1 && b.0 <= a.1;
                    if overlap && a.2 == b.2 {
                        prop_assert_ne!(a.3, b.3, "{:?} and {:?} overlap", a.0, b.0);
                    }
                }
            }
        }
    }
}
