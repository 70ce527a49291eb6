use super::value::{ExitSite, GuestReg, Value, ValueId, ValueKind, ValueType};

const NIL: u32 = u32::MAX;

#[derive(Debug, Clone)]
struct Node {
    value: Value,
    prev: u32,
    next: u32,
}

/// Arena holding one block's IR as a doubly linked list, plus the guest register map used
/// while building it.
///
/// Ids are never reused within a block, so an id's number is also its emission order. Removed
/// values keep their slot but drop out of the list.
#[derive(Debug)]
pub struct IrContext {
    nodes: Vec<Node>,
    head: u32,
    tail: u32,
    live: usize,
    reg_map: [Option<ValueId>; 64],
    /// COP1 usability has been checked already in this block
    pub(crate) fpu_checked: bool,
    pub(crate) exit_pc_set: bool,
}

impl Default for IrContext {
    fn default() -> Self {
        IrContext::new()
    }
}

impl IrContext {
    pub fn new() -> IrContext {
        IrContext {
            nodes: Vec::with_capacity(1024),
            head: NIL,
            tail: NIL,
            live: 0,
            reg_map: [None; 64],
            fpu_checked: false,
            exit_pc_set: false,
        }
    }

    /// Forget the previous block, keeping the allocation
    pub fn reset(&mut self) {
        self.nodes.clear();
        self.head = NIL;
        self.tail = NIL;
        self.live = 0;
        self.reg_map = [None; 64];
        self.fpu_checked = false;
        self.exit_pc_set = false;
    }

    /// Number of values still in the list
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// One past the largest id handed out
    pub fn id_bound(&self) -> usize {
        self.nodes.len()
    }

    pub fn push(&mut self, kind: ValueKind) -> ValueId {
        self.push_value(Value { kind, site: None })
    }

    pub fn push_with_site(&mut self, kind: ValueKind, site: ExitSite) -> ValueId {
        self.push_value(Value { kind, site: Some(Box::new(site)) })
    }

    fn push_value(&mut self, value: Value) -> ValueId {
        let id = self.nodes.len() as u32;
        self.nodes.push(Node { value, prev: self.tail, next: NIL });
        if self.tail == NIL {
            self.head = id;
        } else {
            self.nodes[self.tail as usize].next = id;
        }
        self.tail = id;
        self.live += 1;
        ValueId(id)
    }

    pub fn constant(&mut self, ty: ValueType, value: u64) -> ValueId {
        self.push(ValueKind::Constant { ty, value: ty.cast(value) })
    }

    pub fn get(&self, id: ValueId) -> &Value {
        &self.nodes[id.index()].value
    }

    pub fn get_mut(&mut self, id: ValueId) -> &mut Value {
        &mut self.nodes[id.index()].value
    }

    pub fn kind(&self, id: ValueId) -> &ValueKind {
        &self.get(id).kind
    }

    /// Unlink a value. Its id stays valid for lookups but it no longer iterates.
    pub fn remove(&mut self, id: ValueId) {
        let (prev, next) = {
            let node = &self.nodes[id.index()];
            (node.prev, node.next)
        };
        if prev == NIL && next == NIL && self.head != id.0 {
            return;
        }
        if prev == NIL {
            self.head = next;
        } else {
            self.nodes[prev as usize].next = next;
        }
        if next == NIL {
            self.tail = prev;
        } else {
            self.nodes[next as usize].prev = prev;
        }
        let node = &mut self.nodes[id.index()];
        node.prev = NIL;
        node.next = NIL;
        self.live -= 1;
    }

    /// Ids in program order
    pub fn ids(&self) -> Ids<'_> {
        Ids { ctx: self, cursor: self.head, back: self.tail }
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (ValueId, &Value)> + '_ {
        self.ids().map(move |id| (id, self.get(id)))
    }

    /// Current value of a guest register, loading it from CPU state the first time
    pub fn load_reg(&mut self, reg: GuestReg) -> ValueId {
        if reg == GuestReg::ZERO {
            return self.constant(ValueType::U64, 0);
        }
        if let Some(id) = self.reg_map[reg.0 as usize] {
            return id;
        }
        let id = self.push(ValueKind::LoadGuestReg { reg });
        self.reg_map[reg.0 as usize] = Some(id);
        id
    }

    /// Make `value` the current value of `reg`. Writes to r0 vanish.
    pub fn bind_reg(&mut self, reg: GuestReg, value: ValueId) {
        if reg != GuestReg::ZERO {
            self.reg_map[reg.0 as usize] = Some(value);
        }
    }

    pub fn mapped(&self, reg: GuestReg) -> Option<ValueId> {
        self.reg_map[reg.0 as usize]
    }

    /// Registers whose current value differs from what CPU state holds
    pub fn flush_list(&self) -> Vec<(GuestReg, ValueId)> {
        self.reg_map
            .iter()
            .enumerate()
            .filter_map(|(i, mapped)| {
                let reg = GuestReg(i as u8);
                let id = (*mapped)?;
                match self.kind(id) {
                    ValueKind::LoadGuestReg { reg: loaded } if *loaded == reg => None,
                    _ => Some((reg, id)),
                }
            })
            .collect()
    }
}

pub struct Ids<'a> {
    ctx: &'a IrContext,
    cursor: u32,
    back: u32,
}

impl Iterator for Ids<'_> {
    type Item = ValueId;

    fn next(&mut self) -> Option<ValueId> {
        if self.cursor == NIL {
            return None;
        }
        let id = self.cursor;
        if id == self.back {
            self.cursor = NIL;
            self.back = NIL;
        } else {
            self.cursor = self.ctx.nodes[id as usize].next;
        }
        Some(ValueId(id))
    }
}

impl DoubleEndedIterator for Ids<'_> {
    fn next_back(&mut self) -> Option<ValueId> {
        if self.back == NIL {
            return None;
        }
        let id = self.back;
        if id == self.cursor {
            self.cursor = NIL;
            self.back = NIL;
        } else {
            self.back = self.ctx.nodes[id as usize].prev;
        }
        Some(ValueId(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::BinaryOp;

    #[test]
    fn register_loads_are_memoised() {
        let mut ctx = IrContext::new();
        let a = ctx.load_reg(GuestReg::gpr(4));
        let b = ctx.load_reg(GuestReg::gpr(4));
        assert_eq!(a, b);
        assert_eq!(ctx.len(), 1);
        assert!(ctx.flush_list().is_empty());
    }

    #[test]
    fn zero_register_reads_constant_and_ignores_writes() {
        let mut ctx = IrContext::new();
        let c = ctx.constant(ValueType::U64, 5);
        ctx.bind_reg(GuestReg::ZERO, c);
        let zero = ctx.load_reg(GuestReg::ZERO);
        assert_eq!(ctx.kind(zero).as_constant(), Some(0));
        assert!(ctx.flush_list().is_empty());
    }

    #[test]
    fn flush_list_names_modified_registers() {
        let mut ctx = IrContext::new();
        let a = ctx.load_reg(GuestReg::gpr(1));
        let b = ctx.load_reg(GuestReg::gpr(2));
        let sum = ctx.push(ValueKind::Binary { op: BinaryOp::Add, lhs: a, rhs: b });
        ctx.bind_reg(GuestReg::gpr(3), sum);
        // moving r1 into r2 is a change for r2 even though no new value was made
        ctx.bind_reg(GuestReg::gpr(2), a);
        assert_eq!(ctx.flush_list(), vec![(GuestReg::gpr(2), a), (GuestReg::gpr(3), sum)]);
    }

    #[test]
    fn removal_relinks_the_list() {
        let mut ctx = IrContext::new();
        let ids: Vec<_> = (0..4).map(|i| ctx.constant(ValueType::U64, i)).collect();
        ctx.remove(ids[0]);
        ctx.remove(ids[2]);
        ctx.remove(ids[2]);
        assert_eq!(ctx.ids().collect::<Vec<_>>(), vec![ids[1], ids[3]]);
        assert_eq!(ctx.ids().rev().collect::<Vec<_>>(), vec![ids[3], ids[1]]);
        assert_eq!(ctx.len(), 2);
        ctx.remove(ids[3]);
        ctx.remove(ids[1]);
        assert!(ctx.is_empty());
        assert_eq!(ctx.ids().count(), 0);
    }
}
