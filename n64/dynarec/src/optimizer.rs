//! Whole-block IR passes. Each one is a single walk over the value list and they run in a
//! fixed order: folding creates dead values, and shrinking only looks at what survived.

use tracing::trace;
use vr4300::arith;

use crate::ir::{IrContext, ValueId, ValueKind, ValueType};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptimizeStats {
    pub folded: usize,
    pub removed: usize,
    pub shrunk: usize,
}

pub fn optimize(ctx: &mut IrContext) -> OptimizeStats {
    let folded = fold_constants(ctx);
    let removed = eliminate_dead_code(ctx);
    let shrunk = shrink_constants(ctx);
    let stats = OptimizeStats { folded, removed, shrunk };
    trace!(target: "JIT", "optimizer: {:?}, {} values left", stats, ctx.len());
    stats
}

/// Result of `kind` if every operand it reads is a constant
fn evaluate(ctx: &IrContext, kind: &ValueKind) -> Option<(ValueType, u64)> {
    let constant = |id: ValueId| ctx.kind(id).as_constant();
    let value = match *kind {
        ValueKind::Binary { op, lhs, rhs } => op.eval(constant(lhs)?, constant(rhs)?)?,
        ValueKind::Not { operand } => !constant(operand)?,
        ValueKind::MaskAndCast { ty, operand } => return Some((ty, ty.cast(constant(operand)?))),
        ValueKind::Shift { op, width, value, amount } => arith::shift(op, width, constant(value)?, constant(amount)?),
        ValueKind::CheckCondition { cmp, lhs, rhs } => arith::compare(cmp, constant(lhs)?, constant(rhs)?) as u64,
        _ => return None,
    };
    Some((ValueType::U64, value))
}

/// Rewrite operations on constants into constants, in place.
///
/// A trapping add only folds when it provably doesn't overflow, and then loses its exit.
pub fn fold_constants(ctx: &mut IrContext) -> usize {
    let ids: Vec<ValueId> = ctx.ids().collect();
    let mut folded = 0;
    for id in ids {
        if let Some((ty, value)) = evaluate(ctx, ctx.kind(id)) {
            let node = ctx.get_mut(id);
            node.kind = ValueKind::Constant { ty, value };
            node.site = None;
            folded += 1;
        }
    }
    folded
}

/// Drop every value that no root reaches, walking backwards from the tail
pub fn eliminate_dead_code(ctx: &mut IrContext) -> usize {
    let mut live = vec![false; ctx.id_bound()];
    let ids: Vec<ValueId> = ctx.ids().rev().collect();
    let mut removed = 0;
    for id in ids {
        let value = ctx.get(id);
        if value.kind.is_root() || live[id.index()] {
            for used in value.uses() {
                live[used.index()] = true;
            }
        } else {
            ctx.remove(id);
            removed += 1;
        }
    }
    removed
}

/// Smallest sign-extended type that still reproduces the constant
pub fn narrowest_type(value: u64) -> ValueType {
    [ValueType::S8, ValueType::S16, ValueType::S32]
        .into_iter()
        .find(|ty| ty.cast(value) == value)
        .unwrap_or(ValueType::U64)
}

/// Narrow constants so the allocator can treat more of them as immediates
pub fn shrink_constants(ctx: &mut IrContext) -> usize {
    let ids: Vec<ValueId> = ctx.ids().collect();
    let mut shrunk = 0;
    for id in ids {
        if let ValueKind::Constant { ty, value } = &mut ctx.get_mut(id).kind {
            let narrow = narrowest_type(*value);
            if narrow != *ty {
                *ty = narrow;
                shrunk += 1;
            }
        }
    }
    shrunk
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinaryOp, GuestReg};
    use proptest::prelude::*;
    use vr4300::arith::{ShiftOp, ShiftWidth};
    use vr4300::instructions::CmpMode;

    fn fold_binary(op: BinaryOp, a: u64, b: u64) -> ValueKind {
        let mut ctx = IrContext::new();
        let lhs = ctx.constant(ValueType::U64, a);
        let rhs = ctx.constant(ValueType::U64, b);
        let id = ctx.push(ValueKind::Binary { op, lhs, rhs });
        fold_constants(&mut ctx);
        ctx.kind(id).clone()
    }

    #[test]
    fn overflowing_trap_is_kept() {
        assert!(matches!(fold_binary(BinaryOp::AddTrap32, 0x7fff_ffff, 1), ValueKind::Binary { .. }));
        assert_eq!(fold_binary(BinaryOp::AddTrap32, 1, 2).as_constant(), Some(3));
    }

    #[test]
    fn folding_chains_through_casts() {
        let mut ctx = IrContext::new();
        let a = ctx.constant(ValueType::U64, 0x7fff_ffff);
        let b = ctx.constant(ValueType::S16, 1);
        let sum = ctx.push(ValueKind::Binary { op: BinaryOp::Add, lhs: a, rhs: b });
        let cast = ctx.push(ValueKind::MaskAndCast { ty: ValueType::S32, operand: sum });
        let not = ctx.push(ValueKind::Not { operand: cast });
        assert_eq!(fold_constants(&mut ctx), 3);
        assert_eq!(ctx.kind(cast), &ValueKind::Constant { ty: ValueType::S32, value: 0xffff_ffff_8000_0000 });
        assert_eq!(ctx.kind(not).as_constant(), Some(0x7fff_ffff));
    }

    #[test]
    fn dce_keeps_what_stores_need() {
        let mut ctx = IrContext::new();
        let a = ctx.load_reg(GuestReg::gpr(1));
        let b = ctx.load_reg(GuestReg::gpr(2));
        let unused = ctx.push(ValueKind::Binary { op: BinaryOp::Xor, lhs: a, rhs: b });
        let sum = ctx.push(ValueKind::Binary { op: BinaryOp::Add, lhs: a, rhs: a });
        ctx.push(ValueKind::FlushGuestReg { reg: GuestReg::gpr(3), value: sum });
        assert_eq!(eliminate_dead_code(&mut ctx), 2);
        let left: Vec<_> = ctx.ids().collect();
        assert!(!left.contains(&unused));
        assert!(!left.contains(&b));
        assert!(left.contains(&a));
    }

    #[test]
    fn constants_shrink_to_sign_extended_widths() {
        assert_eq!(narrowest_type(0x7f), ValueType::S8);
        assert_eq!(narrowest_type(0x80), ValueType::S16);
        assert_eq!(narrowest_type(0xffff_ffff_ffff_8000), ValueType::S16);
        assert_eq!(narrowest_type(0x8000_0000), ValueType::U64);
        assert_eq!(narrowest_type(0xffff_ffff_8000_0000), ValueType::S32);
    }

    fn arb_binary_op() -> impl Strategy<Value = BinaryOp> {
        prop_oneof![
            Just(BinaryOp::Add),
            Just(BinaryOp::Sub),
            Just(BinaryOp::And),
            Just(BinaryOp::Or),
            Just(BinaryOp::Xor),
        ]
    }

    fn arb_shift() -> impl Strategy<Value = (ShiftOp, ShiftWidth)> {
        (
            prop_oneof![Just(ShiftOp::Left), Just(ShiftOp::RightLogical), Just(ShiftOp::RightArith)],
            prop_oneof![Just(ShiftWidth::W32), Just(ShiftWidth::W64)],
        )
    }

    fn arb_cmp() -> impl Strategy<Value = CmpMode> {
        prop_oneof![
            Just(CmpMode::Eq),
            Just(CmpMode::Ne),
            Just(CmpMode::Le),
            Just(CmpMode::Ge),
            Just(CmpMode::Lt),
            Just(CmpMode::Gt),
            Just(CmpMode::LtU),
            Just(CmpMode::GeU),
        ]
    }

    /// A random block: each entry picks a kind and operands among the earlier values
    #[derive(Debug, Clone)]
    enum Node {
        Const(u64),
        Load(u8),
        Add(usize, usize),
        Not(usize),
        Store(usize, usize),
        Flush(u8, usize),
    }

    fn arb_block() -> impl Strategy<Value = Vec<Node>> {
        proptest::collection::vec((0u8..6, any::<u64>(), any::<usize>(), any::<usize>()), 1..40).prop_map(|raw| {
            raw.into_iter()
                .enumerate()
                .map(|(i, (kind, imm, x, y))| match (kind, i) {
                    (_, 0) | (0, _) => Node::Const(imm),
                    (1, _) => Node::Load(1 + imm as u8 % 31),
                    (2, _) => Node::Add(x % i, y % i),
                    (3, _) => Node::Not(x % i),
                    (4, _) => Node::Store(x % i, y % i),
                    _ => Node::Flush(1 + imm as u8 % 31, x % i),
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn folding_matches_evaluation(op in arb_binary_op(), a in any::<u64>(), b in any::<u64>()) {
            prop_assert_eq!(fold_binary(op, a, b).as_constant(), op.eval(a, b));
        }

        #[test]
        fn shift_and_compare_folding_match_runtime(
            (op, width) in arb_shift(),
            cmp in arb_cmp(),
            a in any::<u64>(),
            b in any::<u64>(),
        ) {
            let mut ctx = IrContext::new();
            let lhs = ctx.constant(ValueType::U64, a);
            let rhs = ctx.constant(ValueType::U64, b);
            let shift = ctx.push(ValueKind::Shift { op, width, value: lhs, amount: rhs });
            let check = ctx.push(ValueKind::CheckCondition { cmp, lhs, rhs });
            fold_constants(&mut ctx);
            prop_assert_eq!(ctx.kind(shift).as_constant(), Some(arith::shift(op, width, a, b)));
            prop_assert_eq!(ctx.kind(check).as_constant(), Some(arith::compare(cmp, a, b) as u64));
        }

        #[test]
        fn shrinking_preserves_value(value in any::<u64>()) {
            prop_assert_eq!(narrowest_type(value).cast(value), value);
        }

        #[test]
        fn dce_removes_exactly_the_unreachable(block in arb_block()) {
            let mut ctx = IrContext::new();
            let mut ids = Vec::new();
            for node in &block {
                let id = match *node {
                    Node::Const(v) => ctx.constant(ValueType::U64, v),
                    Node::Load(r) => ctx.push(ValueKind::LoadGuestReg { reg: GuestReg::gpr(r) }),
                    Node::Add(x, y) => ctx.push(ValueKind::Binary { op: BinaryOp::Add, lhs: ids[x], rhs: ids[y] }),
                    Node::Not(x) => ctx.push(ValueKind::Not { operand: ids[x] }),
                    Node::Store(x, y) => ctx.push(ValueKind::Store { size: 4, address: ids[x], value: ids[y] }),
                    Node::Flush(r, x) => ctx.push(ValueKind::FlushGuestReg { reg: GuestReg::gpr(r), value: ids[x] }),
                };
                ids.push(id);
            }

            // Reachability from roots, computed independently
            let mut reachable = vec![false; block.len()];
            for i in (0..block.len()).rev() {
                let root = matches!(block[i], Node::Store(..) | Node::Flush(..));
                if root || reachable[i] {
                    reachable[i] = true;
                    match block[i] {
                        Node::Add(x, y) | Node::Store(x, y) => {
                            reachable[x] = true;
                            reachable[y] = true;
                        }
                        Node::Not(x) | Node::Flush(_, x) => reachable[x] = true,
                        _ => {}
                    }
                }
            }

            eliminate_dead_code(&mut ctx);
            let left: Vec<ValueId> = ctx.ids().collect();
            for (i, id) in ids.iter().enumerate() {
                prop_assert_eq!(left.contains(id), reachable[i], "value {}", i);
            }
        }
    }
}
