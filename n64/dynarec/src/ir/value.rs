use std::fmt;

use vr4300::arith::{self, MulDivOp, ShiftOp, ShiftWidth};
use vr4300::fpu::{FloatFormat, FloatOp, FloatUnaryOp, RoundMode};
use vr4300::instructions::{CmpMode, MIPS_REG_NAMES};
use vr4300::{AccessKind, ExceptionDescriptor};

/// Index of a value in the block's arena. Strictly increasing in emission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValueId(pub u32);

impl ValueId {
    #[inline(always)]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A guest register: 0..31 are GPRs, 32..63 the raw FPU register slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GuestReg(pub u8);

impl GuestReg {
    pub const ZERO: GuestReg = GuestReg(0);
    pub const RA: GuestReg = GuestReg(31);

    pub fn gpr(reg: u8) -> GuestReg {
        GuestReg(reg & 31)
    }

    pub fn fpr(reg: u8) -> GuestReg {
        GuestReg(32 + (reg & 31))
    }

    pub fn is_fpr(self) -> bool {
        self.0 >= 32
    }

    pub fn number(self) -> u8 {
        self.0 & 31
    }

    pub fn class(self) -> RegClass {
        if self.is_fpr() {
            RegClass::Fgr
        } else {
            RegClass::Gpr
        }
    }
}

impl fmt::Display for GuestReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_fpr() {
            write!(f, "$f{}", self.number())
        } else {
            f.write_str(MIPS_REG_NAMES[self.number() as usize])
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegClass {
    Gpr,
    Fgr,
}

/// Width and signedness of a value's meaningful bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    S8,
    U8,
    S16,
    U16,
    S32,
    U32,
    U64,
}

impl ValueType {
    pub fn size(self) -> u8 {
        match self {
            ValueType::S8 | ValueType::U8 => 1,
            ValueType::S16 | ValueType::U16 => 2,
            ValueType::S32 | ValueType::U32 => 4,
            ValueType::U64 => 8,
        }
    }

    pub fn signed(self) -> bool {
        matches!(self, ValueType::S8 | ValueType::S16 | ValueType::S32)
    }

    /// Truncate to this width and extend back to 64 bits
    pub fn cast(self, value: u64) -> u64 {
        match self {
            ValueType::S8 => value as i8 as i64 as u64,
            ValueType::U8 => value as u8 as u64,
            ValueType::S16 => value as i16 as i64 as u64,
            ValueType::U16 => value as u16 as u64,
            ValueType::S32 => value as i32 as i64 as u64,
            ValueType::U32 => value as u32 as u64,
            ValueType::U64 => value,
        }
    }

    pub fn load(size: u8, signed: bool) -> ValueType {
        match (size, signed) {
            (1, true) => ValueType::S8,
            (1, false) => ValueType::U8,
            (2, true) => ValueType::S16,
            (2, false) => ValueType::U16,
            (4, true) => ValueType::S32,
            (4, false) => ValueType::U32,
            _ => ValueType::U64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    And,
    Or,
    Xor,
    /// Signed 32 bit add raising Overflow
    AddTrap32,
    AddTrap64,
    SubTrap32,
    SubTrap64,
}

impl BinaryOp {
    pub fn traps(self) -> bool {
        matches!(self, BinaryOp::AddTrap32 | BinaryOp::AddTrap64 | BinaryOp::SubTrap32 | BinaryOp::SubTrap64)
    }

    /// `None` when a trapping op overflows
    pub fn eval(self, a: u64, b: u64) -> Option<u64> {
        match self {
            BinaryOp::Add => Some(a.wrapping_add(b)),
            BinaryOp::Sub => Some(a.wrapping_sub(b)),
            BinaryOp::And => Some(a & b),
            BinaryOp::Or => Some(a | b),
            BinaryOp::Xor => Some(a ^ b),
            BinaryOp::AddTrap32 => arith::add32_checked(a, b),
            BinaryOp::AddTrap64 => arith::add64_checked(a, b),
            BinaryOp::SubTrap32 => arith::sub32_checked(a, b),
            BinaryOp::SubTrap64 => arith::sub64_checked(a, b),
        }
    }
}

/// CPU state outside the cached register file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateField {
    Hi,
    Lo,
    Fcr31,
    Cop0(u8),
}

/// Runtime routines too large to lower inline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Helper {
    MoveFromCop0 { reg: u8, double: bool },
    MoveToCop0 { reg: u8, double: bool },
    TlbRead,
    TlbWriteIndexed,
    TlbWriteRandom,
    TlbProbe,
    /// Returns the new PC
    Eret,
    LoadLeft { size: u8 },
    LoadRight { size: u8 },
    StoreLeft { size: u8 },
    StoreRight { size: u8 },
    LoadLinked { size: u8 },
    StoreConditional { size: u8 },
}

impl Helper {
    pub fn name(self) -> &'static str {
        match self {
            Helper::MoveFromCop0 { .. } => "mfc0",
            Helper::MoveToCop0 { .. } => "mtc0",
            Helper::TlbRead => "tlbr",
            Helper::TlbWriteIndexed => "tlbwi",
            Helper::TlbWriteRandom => "tlbwr",
            Helper::TlbProbe => "tlbp",
            Helper::Eret => "eret",
            Helper::LoadLeft { .. } => "load_left",
            Helper::LoadRight { .. } => "load_right",
            Helper::StoreLeft { .. } => "store_left",
            Helper::StoreRight { .. } => "store_right",
            Helper::LoadLinked { .. } => "load_linked",
            Helper::StoreConditional { .. } => "store_conditional",
        }
    }

    /// Touches guest memory, and so can fault
    pub fn may_raise(self) -> bool {
        matches!(
            self,
            Helper::LoadLeft { .. }
                | Helper::LoadRight { .. }
                | Helper::StoreLeft { .. }
                | Helper::StoreRight { .. }
                | Helper::LoadLinked { .. }
                | Helper::StoreConditional { .. }
        )
    }

    pub fn has_result(self) -> bool {
        matches!(
            self,
            Helper::MoveFromCop0 { .. }
                | Helper::Eret
                | Helper::LoadLeft { .. }
                | Helper::LoadRight { .. }
                | Helper::LoadLinked { .. }
                | Helper::StoreConditional { .. }
        )
    }
}

/// Where a conditional exit goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockExit {
    Exception(ExceptionDescriptor),
    /// Leave early, skipping the rest of the block (a likely branch's delay slot)
    Branch { pc: u64 },
}

/// Everything needed to leave the block precisely from the middle.
///
/// `flush` names every guest register whose current value isn't already in CPU state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitSite {
    /// Faulting instruction, or its branch for delay slots
    pub pc: u64,
    pub delay_slot: bool,
    /// Guest instructions that count as executed when this exit is taken
    pub retired: u32,
    pub flush: Vec<(GuestReg, ValueId)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueKind {
    Constant { ty: ValueType, value: u64 },
    LoadGuestReg { reg: GuestReg },
    FlushGuestReg { reg: GuestReg, value: ValueId },
    Binary { op: BinaryOp, lhs: ValueId, rhs: ValueId },
    Not { operand: ValueId },
    MaskAndCast { ty: ValueType, operand: ValueId },
    Shift { op: ShiftOp, width: ShiftWidth, value: ValueId, amount: ValueId },
    /// 1 when the comparison holds, else 0
    CheckCondition { cmp: CmpMode, lhs: ValueId, rhs: ValueId },
    /// Virtual to physical, raising on a miss
    TlbLookup { vaddr: ValueId, access: AccessKind, size: u8 },
    Load { ty: ValueType, class: RegClass, address: ValueId },
    Store { size: u8, address: ValueId, value: ValueId },
    LoadState { field: StateField },
    StoreState { field: StateField, value: ValueId },
    /// Writes HI and LO
    MulDiv { op: MulDivOp, lhs: ValueId, rhs: ValueId },
    SetBlockExitPc { pc: ValueId },
    SetCondBlockExitPc { cond: ValueId, if_true: ValueId, if_false: ValueId },
    CondBlockExit { cond: ValueId, exit: BlockExit },
    Call { helper: Helper, args: HelperArgs },
    FloatBinary { op: FloatOp, fmt: FloatFormat, lhs: ValueId, rhs: ValueId },
    FloatUnary { op: FloatUnaryOp, fmt: FloatFormat, operand: ValueId },
    FloatConvert { from: FloatFormat, to: FloatFormat, round: RoundMode, operand: ValueId },
    /// Sets or clears the FCR31 condition bit
    FloatCompare { cond: u8, fmt: FloatFormat, lhs: ValueId, rhs: ValueId },
    MoveRegClass { to: RegClass, operand: ValueId },
}

impl ValueKind {
    /// Values referenced by this one
    pub fn operands(&self) -> Operands {
        use ValueKind::*;
        match self {
            Constant { .. } | LoadGuestReg { .. } | LoadState { .. } => Operands::new([]),
            FlushGuestReg { value, .. } => Operands::new([*value]),
            Binary { lhs, rhs, .. } | CheckCondition { lhs, rhs, .. } | MulDiv { lhs, rhs, .. } => {
                Operands::new([*lhs, *rhs])
            }
            FloatBinary { lhs, rhs, .. } | FloatCompare { lhs, rhs, .. } => Operands::new([*lhs, *rhs]),
            Not { operand }
            | MaskAndCast { operand, .. }
            | FloatUnary { operand, .. }
            | FloatConvert { operand, .. }
            | MoveRegClass { operand, .. } => Operands::new([*operand]),
            Shift { value, amount, .. } => Operands::new([*value, *amount]),
            TlbLookup { vaddr, .. } => Operands::new([*vaddr]),
            Load { address, .. } => Operands::new([*address]),
            Store { address, value, .. } => Operands::new([*address, *value]),
            StoreState { value, .. } => Operands::new([*value]),
            SetBlockExitPc { pc } => Operands::new([*pc]),
            SetCondBlockExitPc { cond, if_true, if_false } => Operands::new([*cond, *if_true, *if_false]),
            CondBlockExit { cond, .. } => Operands::new([*cond]),
            Call { args, .. } => Operands::from_args(args),
        }
    }

    /// Has an effect beyond its result, so dead code elimination must keep it
    pub fn is_root(&self) -> bool {
        use ValueKind::*;
        match self {
            FlushGuestReg { .. }
            | Store { .. }
            | StoreState { .. }
            | SetBlockExitPc { .. }
            | SetCondBlockExitPc { .. }
            | CondBlockExit { .. }
            | Load { .. }
            | MulDiv { .. }
            | Call { .. }
            | FloatCompare { .. }
            | TlbLookup { .. } => true,
            Binary { op, .. } => op.traps(),
            _ => false,
        }
    }

    /// Register class of the result, `None` if the value produces nothing
    pub fn result_class(&self) -> Option<RegClass> {
        use ValueKind::*;
        match self {
            FlushGuestReg { .. }
            | Store { .. }
            | StoreState { .. }
            | MulDiv { .. }
            | SetBlockExitPc { .. }
            | SetCondBlockExitPc { .. }
            | CondBlockExit { .. }
            | FloatCompare { .. } => None,
            Call { helper, .. } => helper.has_result().then_some(RegClass::Gpr),
            LoadGuestReg { reg } => Some(reg.class()),
            Load { class, .. } => Some(*class),
            MoveRegClass { to, .. } => Some(*to),
            FloatBinary { .. } | FloatUnary { .. } | FloatConvert { .. } => Some(RegClass::Fgr),
            _ => Some(RegClass::Gpr),
        }
    }

    pub fn as_constant(&self) -> Option<u64> {
        match self {
            ValueKind::Constant { value, .. } => Some(*value),
            _ => None,
        }
    }
}

pub const MAX_OPERANDS: usize = 3;
/// Arguments a runtime helper can take
pub const MAX_HELPER_ARGS: usize = 2;

/// Arguments of a `Call`, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HelperArgs {
    ids: [ValueId; MAX_HELPER_ARGS],
    len: u8,
}

impl HelperArgs {
    pub const NONE: HelperArgs = HelperArgs { ids: [ValueId(0); MAX_HELPER_ARGS], len: 0 };

    pub fn one(a: ValueId) -> HelperArgs {
        HelperArgs { ids: [a, ValueId(0)], len: 1 }
    }

    pub fn two(a: ValueId, b: ValueId) -> HelperArgs {
        HelperArgs { ids: [a, b], len: 2 }
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[ValueId] {
        &self.ids[..self.len as usize]
    }
}

/// Operand list of a single value
#[derive(Debug, Clone, Copy)]
pub struct Operands {
    ids: [ValueId; MAX_OPERANDS],
    len: usize,
}

impl Operands {
    fn new<const N: usize>(ids: [ValueId; N]) -> Operands {
        const { assert!(N <= MAX_OPERANDS) };
        let mut ops = Operands { ids: [ValueId(0); MAX_OPERANDS], len: N };
        ops.ids[..N].copy_from_slice(&ids);
        ops
    }

    fn from_args(args: &HelperArgs) -> Operands {
        const { assert!(MAX_HELPER_ARGS <= MAX_OPERANDS) };
        let mut ops = Operands { ids: [ValueId(0); MAX_OPERANDS], len: args.len() };
        ops.ids[..args.len()].copy_from_slice(args.as_slice());
        ops
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[ValueId] {
        &self.ids[..self.len]
    }
}

impl IntoIterator for Operands {
    type Item = ValueId;
    type IntoIter = std::iter::Take<std::array::IntoIter<ValueId, 3>>;

    fn into_iter(self) -> Self::IntoIter {
        self.ids.into_iter().take(self.len)
    }
}

/// One node of the block IR
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Value {
    pub kind: ValueKind,
    /// Set on every value that can leave the block in the middle
    pub site: Option<Box<ExitSite>>,
}

impl Value {
    /// Operands plus the values named by the flush list
    pub fn uses(&self) -> impl Iterator<Item = ValueId> + '_ {
        let site = self.site.iter().flat_map(|s| s.flush.iter().map(|&(_, v)| v));
        self.kind.operands().into_iter().chain(site)
    }
}
