use modular_bitfield::{bitfield, specifiers::*};

use crate::arith::{MulDivOp, ShiftOp, ShiftWidth};
use crate::cop0::COP0_REG_NAMES;
use crate::fpu::{FloatFormat, FloatOp, FloatUnaryOp, RoundMode};

#[bitfield(bits = 32)]
#[derive(Debug, Copy, Clone)]
pub struct IType {
    pub imm: B16,
    pub rt: B5,
    pub rs: B5,
    #[skip]
    op: B6,
}

#[bitfield(bits = 32)]
#[derive(Debug, Copy, Clone)]
pub struct JType {
    pub target: B26,
    #[skip]
    op: B6,
}

#[bitfield(bits = 32)]
#[derive(Debug, Copy, Clone)]
pub struct RType {
    pub funct: B6,
    pub sa: B5,
    pub rd: B5,
    pub rt: B5,
    pub rs: B5,
    pub op: B6,
}

/// COP1 arithmetic layout. `fmt` sits where `rs` would be.
#[bitfield(bits = 32)]
#[derive(Debug, Copy, Clone)]
pub struct FType {
    pub funct: B6,
    pub fd: B5,
    pub fs: B5,
    pub ft: B5,
    pub fmt: B5,
    #[skip]
    op: B6,
}

impl From<u32> for RType {
    fn from(word: u32) -> RType {
        RType::from_bytes(word.to_le_bytes())
    }
}
impl From<u32> for IType {
    fn from(word: u32) -> IType {
        IType::from_bytes(word.to_le_bytes())
    }
}
impl From<u32> for JType {
    fn from(word: u32) -> JType {
        JType::from_bytes(word.to_le_bytes())
    }
}
impl From<u32> for FType {
    fn from(word: u32) -> FType {
        FType::from_bytes(word.to_le_bytes())
    }
}

impl IType {
    /// The immediate, sign extended to 64 bits
    pub fn simm(&self) -> u64 {
        self.imm() as i16 as i64 as u64
    }
}

#[derive(Debug, Copy, Clone)]
pub enum Instruction {
    I(IType),
    J(JType),
    R(RType),
    F(FType),
    Reserved(u32),
    Unimplemented(u32),
}

impl Instruction {
    pub fn word(self) -> u32 {
        match self {
            Instruction::I(i) => u32::from_le_bytes(i.into_bytes()),
            Instruction::J(j) => u32::from_le_bytes(j.into_bytes()),
            Instruction::R(r) => u32::from_le_bytes(r.into_bytes()),
            Instruction::F(f) => u32::from_le_bytes(f.into_bytes()),
            Instruction::Reserved(word) | Instruction::Unimplemented(word) => word,
        }
    }

    pub fn i(self) -> IType {
        self.word().into()
    }
    pub fn j(self) -> JType {
        self.word().into()
    }
    pub fn r(self) -> RType {
        self.word().into()
    }
    pub fn f(self) -> FType {
        self.word().into()
    }
}

pub const MIPS_REG_NAMES: [&str; 32] = [
    "$zero", // Always 0
    "$at",   // r1 - Reserved for assembler
    "$v0", "$v1", // r2-r3 - Function return values
    "$a0", "$a1", "$a2", "$a3", // r4-r7 - function arguments
    "$t0", "$t1", "$t2", "$t3", "$t4", "$t5", "$t6",
    "$t7", // r8-r15 - Temporaries (Caller saved)
    "$s0", "$s1", "$s2", "$s3", "$s4", "$s5", "$s6", "$s7", // r16-r23 - Saved  (Callee saved)
    "$t8", "$t9", // r24-r25 - Caller-saved temporaries
    "$k0", "$k1", // Reserved for OS kernel
    "$gp", // r28 - Global pointer
    "$sp", // r29 - Stack pointer
    "$fp", // r30 - Frame pointer
    "$ra", // r31 - Return address
];

const FPU_COND_NAMES: [&str; 16] = [
    "F", "UN", "EQ", "UEQ", "OLT", "ULT", "OLE", "ULE",
    "SF", "NGLE", "SEQ", "NGL", "LT", "NGE", "LE", "NGT",
];

impl Instruction {
    pub fn name(self) -> &'static str {
        let (_, info) = decode(self.word());
        info.name()
    }

    /// Provides a string representation of the instruction (as disassembly)
    pub fn disassemble(self, address: u64) -> String {
        let (_, info) = decode(self.word());

        use Form::*;
        let Some(form) = info.form() else {
            return info.name().to_owned();
        };

        let i = self.i();
        let r = self.r();
        let f = self.f();
        let gpr = |reg: u8| MIPS_REG_NAMES[reg as usize].to_owned();

        // We will collect the arguments into this vector
        let mut args = Vec::<String>::new();

        let mut name = info.name().to_owned();

        // Handles most instructions that do normal things with the destination register
        match form.dest(self) {
            Dest::Gpr(reg) | Dest::Store(reg) => args.push(gpr(reg)),
            Dest::Fpr(reg) | Dest::StoreFpr(reg) => args.push(format!("$f{}", reg)),
            Dest::CacheOp(op) => args.push(format!("{:02x}", op)),
            Dest::None => {}
        }

        match form {
            // One Reg
            RegImm(_) | BranchReg | RegImmBranch | TrapImm(_) | JReg | MoveTo => {
                args.push(gpr(i.rs()));
            }
            JRegLink => args.push(gpr(r.rs())),
            // Two Regs
            BranchRegReg | RegRegReg | TrapRegReg | MulDiv => {
                args.push(gpr(r.rs()));
                args.push(gpr(r.rt()));
            }
            ShiftReg => {
                args.push(gpr(r.rt()));
                args.push(gpr(r.rs()));
            }
            // Coprocessor register moves
            CopReg(0) => {
                args.push(gpr(r.rt()));
                args.push(COP0_REG_NAMES[r.rd() as usize].to_owned());
            }
            CopReg(_) => {
                args.push(gpr(r.rt()));
                args.push(format!("$f{}", r.rd()));
            }
            // Load/Stores
            LoadBaseImm | StoreBaseImm | LoadFpuBaseImm | StoreFpuBaseImm | Cache => {
                args.push(format!("{}({})", signed_hex(i.imm() as i16 as i64), gpr(i.rs())));
            }
            // LUI (Load Upper Immediate) is a special case
            LoadUpper => {
                let imm = (i.imm() as u32) << 16;
                args.push(format!("{:#x}", imm as i32));
            }
            // Shift by immediate
            ShiftImm(offset) => {
                args.push(gpr(r.rt()));
                args.push(format!("{}", r.sa() + offset));
            }
            // Absolute jumps
            J26 => {
                let target = (address.wrapping_add(4) & !0x0fff_ffff) | ((self.j().target() as u64) << 2);
                args.push(format!("{:#x}", target));
            }
            FpuRegRegReg => {
                name = format!("{}.{}", name, fmt_suffix(f.fmt()));
                args.push(format!("$f{}", f.fs()));
                args.push(format!("$f{}", f.ft()));
            }
            FpuRegReg => {
                name = format!("{}.{}", name, fmt_suffix(f.fmt()));
                args.push(format!("$f{}", f.fs()));
            }
            FpuCompare => {
                name = format!("C.{}.{}", FPU_COND_NAMES[(f.funct() & 0xf) as usize], fmt_suffix(f.fmt()));
                args.push(format!("$f{}", f.fs()));
                args.push(format!("$f{}", f.ft()));
            }
            // These don't have any arguments
            ExceptionType | MoveFrom | Bare | FpuBranch => {}
        }

        // handle basic immediate formats
        match form.imm_type() {
            Some(ImmType::Unsigned) => args.push(format!("{:#x}", i.imm())),
            Some(ImmType::Signed) => args.push(signed_hex(i.imm() as i16 as i64)),
            Some(ImmType::PcOffset) => {
                let offset = (i.imm() as i16 as i64) << 2;
                let target = (address as i64).wrapping_add(offset + 4);
                args.push(format!("{:#010x}", target as u64 as u32));
            }
            // Other immediate formats are handled above
            _ => {}
        }

        if args.is_empty() {
            name
        } else {
            format!("{:<7} {}", name, args.join(", "))
        }
    }
}

fn signed_hex(value: i64) -> String {
    if value < 0 {
        format!("-{:#x}", value.unsigned_abs())
    } else {
        format!("{:#x}", value)
    }
}

fn fmt_suffix(fmt: u8) -> &'static str {
    match FloatFormat::from_field(fmt) {
        Some(FloatFormat::Single) => "S",
        Some(FloatFormat::Double) => "D",
        Some(FloatFormat::Word) => "W",
        Some(FloatFormat::Long) => "L",
        None => "?",
    }
}

pub fn decode(inst_word: u32) -> (Instruction, &'static InstructionInfo) {
    // we pre-decode to R-Type, as it's the only type decode logic uses
    let inst = RType::from(inst_word);

    let mut info = &PRIMARY_TABLE[inst.op() as usize];
    loop {
        match info {
            InstructionInfo::Special => {
                info = &SPECIAL_TABLE[inst.funct() as usize];
            }
            InstructionInfo::RegImm => {
                info = &REGIMM_TABLE[inst.rt() as usize];
            }
            InstructionInfo::CopOp(0) => {
                if inst.rs() < 16 {
                    info = &COP0_TABLE[inst.rs() as usize];
                } else {
                    info = &COP0_FN_TABLE[inst.funct() as usize];
                }
            }
            InstructionInfo::CopOp(1) => {
                info = &COP1_TABLE[inst.rs() as usize];
            }
            InstructionInfo::CopOp(_) => {
                return (Instruction::Unimplemented(inst_word), info);
            }
            InstructionInfo::Cop1Bc => {
                info = &COP1_BC_TABLE[(inst.rt() & 3) as usize];
            }
            InstructionInfo::Cop1Fn => {
                info = &COP1_FN_TABLE[inst.funct() as usize];
            }
            InstructionInfo::Op(_, form, _) => {
                return (form.to_instruction(inst_word), info);
            }
            InstructionInfo::Reserved => {
                return (Instruction::Reserved(inst_word), info);
            }
            InstructionInfo::Unimplemented(_) => {
                return (Instruction::Unimplemented(inst_word), info);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Form {
    J26,

    // IType
    RegImm(bool), // true == signed
    LoadUpper,    // subcase of RegImm
    BranchReg,
    BranchRegReg,
    LoadBaseImm,
    StoreBaseImm,
    LoadFpuBaseImm,
    StoreFpuBaseImm,
    RegImmBranch,
    TrapImm(bool), // true == signed
    Cache,

    // RType
    JReg,
    JRegLink,
    ShiftImm(u8), // amount offset, 32 for the DSxx32 forms
    ShiftReg,
    MoveFrom,
    MoveTo,
    MulDiv,
    RegRegReg,
    TrapRegReg,
    ExceptionType,
    Bare,

    // Coprocessor
    CopReg(u8),
    FpuBranch,
    FpuRegRegReg,
    FpuRegReg,
    FpuCompare,
}

pub enum ImmType {
    Unsigned,
    Signed,
    SignedUpper,
    PcOffset,
    Offset,
}

pub enum Dest {
    Gpr(u8),
    Fpr(u8),
    Store(u8),
    StoreFpr(u8),
    CacheOp(u8),
    None,
}

impl Form {
    pub fn imm_type(&self) -> Option<ImmType> {
        use Form::*;
        match self {
            BranchReg | BranchRegReg | RegImmBranch | FpuBranch => Some(ImmType::PcOffset),
            RegImm(false) => Some(ImmType::Unsigned),
            RegImm(true) | TrapImm(_) => Some(ImmType::Signed),
            LoadUpper => Some(ImmType::SignedUpper),
            LoadBaseImm | StoreBaseImm | LoadFpuBaseImm | StoreFpuBaseImm | Cache => Some(ImmType::Offset),
            _ => None,
        }
    }

    pub fn dest(&self, inst: Instruction) -> Dest {
        use Form::*;
        let i = inst.i();
        let r = inst.r();
        let f = inst.f();
        match self {
            RegImm(_) | LoadUpper | LoadBaseImm => Dest::Gpr(i.rt()),
            LoadFpuBaseImm => Dest::Fpr(i.rt()),
            StoreBaseImm => Dest::Store(i.rt()),
            StoreFpuBaseImm => Dest::StoreFpr(i.rt()),
            JRegLink if r.rd() != 31 => Dest::Gpr(r.rd()),
            ShiftImm(_) | ShiftReg | MoveFrom | RegRegReg => Dest::Gpr(r.rd()),
            FpuRegRegReg | FpuRegReg => Dest::Fpr(f.fd()),
            Cache => Dest::CacheOp(r.rt()),
            _ => Dest::None,
        }
    }

    pub fn to_instruction(&self, word: u32) -> Instruction {
        use Form::*;
        match self {
            J26 => Instruction::J(word.into()),
            RegImm(_) | LoadUpper | BranchReg | BranchRegReg | LoadBaseImm | StoreBaseImm
            | LoadFpuBaseImm | StoreFpuBaseImm | RegImmBranch | TrapImm(_) | Cache | FpuBranch => {
                Instruction::I(word.into())
            }
            JReg | JRegLink | ShiftImm(_) | ShiftReg | MoveFrom | MoveTo | MulDiv | RegRegReg
            | TrapRegReg | ExceptionType | Bare | CopReg(_) => Instruction::R(word.into()),
            FpuRegRegReg | FpuRegReg | FpuCompare => Instruction::F(word.into()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum InstructionInfo {
    Reserved,
    Special,
    RegImm,
    CopOp(u8),
    Cop1Bc,
    Cop1Fn,
    Op(&'static str, Form, ExMode),
    Unimplemented(&'static str),
}

impl InstructionInfo {
    pub fn name(&self) -> &'static str {
        match self {
            InstructionInfo::Reserved => "Reserved",
            InstructionInfo::Special => "Special",
            InstructionInfo::RegImm => "RegImm",
            InstructionInfo::CopOp(_) => "CopOp",
            InstructionInfo::Cop1Bc => "BC1",
            InstructionInfo::Cop1Fn => "COP1",
            InstructionInfo::Op(name, _, _) => name,
            InstructionInfo::Unimplemented(name) => name,
        }
    }

    pub fn form(&self) -> Option<&Form> {
        match self {
            InstructionInfo::Op(_, form, _) => Some(form),
            _ => None,
        }
    }

    pub fn ex_mode(&self) -> Option<ExMode> {
        match self {
            InstructionInfo::Op(_, _, mode) => Some(*mode),
            _ => None,
        }
    }
}

/// What an instruction does, independent of how its operands are encoded.
///
/// Both execution engines match on this exhaustively; `Form` says where the operands live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExMode {
    Nop,
    Jump,
    JumpLink,
    JumpReg,
    JumpRegLink,
    Branch(CmpMode),
    BranchLikely(CmpMode),
    BranchLink(CmpMode),
    BranchLinkLikely(CmpMode),
    Add32,
    AddU32,
    Add64,
    AddU64,
    Sub32,
    SubU32,
    Sub64,
    SubU64,
    SetLess,
    SetLessU,
    And,
    Or,
    Xor,
    Nor,
    InsertUpper,
    Shift(ShiftOp, ShiftWidth),
    MulDiv(MulDivOp),
    Mem(u8),
    MemUnsigned(u8),
    MemLeft(u8),
    MemRight(u8),
    MemLinked(u8),
    LoadInternal(InternalReg),
    StoreInternal(InternalReg),
    CacheOp,
    Trap(CmpMode),
    Syscall,
    Break,
    MoveFromCop0 { double: bool },
    MoveToCop0 { double: bool },
    TlbRead,
    TlbWriteIndexed,
    TlbWriteRandom,
    TlbProbe,
    Eret,
    MoveFromCop1 { double: bool },
    MoveToCop1 { double: bool },
    MoveControlFromCop1,
    MoveControlToCop1,
    BranchCop1 { on_true: bool, likely: bool },
    FpuMem(u8),
    FloatArith(FloatOp),
    FloatUnary(FloatUnaryOp),
    FloatMove,
    FloatConvert(FloatFormat, RoundMode),
    FloatCompare,
}

impl ExMode {
    pub fn is_branch(&self) -> bool {
        use ExMode::*;
        matches!(
            self,
            Jump | JumpLink | JumpReg | JumpRegLink | Branch(_) | BranchLink(_) | BranchLikely(_)
                | BranchLinkLikely(_) | BranchCop1 { .. }
        )
    }

    pub fn is_likely_branch(&self) -> bool {
        matches!(
            self,
            ExMode::BranchLikely(_) | ExMode::BranchLinkLikely(_) | ExMode::BranchCop1 { likely: true, .. }
        )
    }

    /// Touches the floating point unit, and so needs COP1 to be usable
    pub fn uses_fpu(&self) -> bool {
        use ExMode::*;
        matches!(
            self,
            MoveFromCop1 { .. } | MoveToCop1 { .. } | MoveControlFromCop1 | MoveControlToCop1
                | BranchCop1 { .. } | FpuMem(_) | FloatArith(_) | FloatUnary(_) | FloatMove
                | FloatConvert(..) | FloatCompare
        )
    }
}

/// Comparison used by branches, traps and set-less-than.
///
/// The single register branches compare `rs` against zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpMode {
    Eq,
    Ne,
    Le,
    Ge,
    Lt,
    Gt,
    LtU,
    GeU,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InternalReg {
    HI = 0,
    LO = 1,
}

const fn build_primary_table() -> [InstructionInfo; 64] {
    use InstructionInfo::*;
    use ExMode::*;
    use CmpMode::*;

    // Almost everything in the primary table is IType.
    // The exceptions are the:
    //  - the two subtables. All RegImm are IType, all Special are RType
    //  - the COP ops, which are a mix of IType and RType
    //  = J and JAL which are JType.

    [
        Special,
        RegImm,
        Op("J", Form::J26, Jump),
        Op("JAL", Form::J26, JumpLink),
        Op("BEQ", Form::BranchRegReg, Branch(Eq)),
        Op("BNE", Form::BranchRegReg, Branch(Ne)),
        Op("BLEZ", Form::BranchReg, Branch(Le)),
        Op("BGTZ", Form::BranchReg, Branch(Gt)),
        // 1
        Op("ADDI", Form::RegImm(true), Add32),
        Op("ADDIU", Form::RegImm(true), AddU32),
        Op("SLTI", Form::RegImm(true), SetLess),
        Op("SLTIU", Form::RegImm(true), SetLessU),
        Op("ANDI", Form::RegImm(false), And),
        Op("ORI", Form::RegImm(false), Or),
        Op("XORI", Form::RegImm(false), Xor),
        Op("LUI", Form::LoadUpper, InsertUpper),
        // 2
        CopOp(0),
        CopOp(1),
        Unimplemented("COP2"),
        Reserved,
        Op("BEQL", Form::BranchRegReg, BranchLikely(Eq)),
        Op("BNEL", Form::BranchRegReg, BranchLikely(Ne)),
        Op("BLEZL", Form::BranchReg, BranchLikely(Le)),
        Op("BGTZL", Form::BranchReg, BranchLikely(Gt)),
        // 3
        Op("DADDI", Form::RegImm(true), Add64),
        Op("DADDIU", Form::RegImm(true), AddU64),
        Op("LDL", Form::LoadBaseImm, MemLeft(8)),
        Op("LDR", Form::LoadBaseImm, MemRight(8)),
        Reserved,
        Reserved,
        Reserved,
        Reserved,
        // 4
        Op("LB", Form::LoadBaseImm, Mem(1)),
        Op("LH", Form::LoadBaseImm, Mem(2)),
        Op("LWL", Form::LoadBaseImm, MemLeft(4)),
        Op("LW", Form::LoadBaseImm, Mem(4)),
        Op("LBU", Form::LoadBaseImm, MemUnsigned(1)),
        Op("LHU", Form::LoadBaseImm, MemUnsigned(2)),
        Op("LWR", Form::LoadBaseImm, MemRight(4)),
        Op("LWU", Form::LoadBaseImm, MemUnsigned(4)),
        // 5
        Op("SB", Form::StoreBaseImm, Mem(1)),
        Op("SH", Form::StoreBaseImm, Mem(2)),
        Op("SWL", Form::StoreBaseImm, MemLeft(4)),
        Op("SW", Form::StoreBaseImm, Mem(4)),
        Op("SDL", Form::StoreBaseImm, MemLeft(8)),
        Op("SDR", Form::StoreBaseImm, MemRight(8)),
        Op("SWR", Form::StoreBaseImm, MemRight(4)),
        Op("CACHE", Form::Cache, CacheOp),
        // 6
        Op("LL", Form::LoadBaseImm, MemLinked(4)),
        Op("LWC1", Form::LoadFpuBaseImm, FpuMem(4)),
        Unimplemented("LWC2"),
        Reserved,
        Op("LLD", Form::LoadBaseImm, MemLinked(8)),
        Op("LDC1", Form::LoadFpuBaseImm, FpuMem(8)),
        Unimplemented("LDC2"),
        Op("LD", Form::LoadBaseImm, Mem(8)),
        // 7
        Op("SC", Form::StoreBaseImm, MemLinked(4)),
        Op("SWC1", Form::StoreFpuBaseImm, FpuMem(4)),
        Unimplemented("SWC2"),
        Reserved,
        Op("SCD", Form::StoreBaseImm, MemLinked(8)),
        Op("SDC1", Form::StoreFpuBaseImm, FpuMem(8)),
        Unimplemented("SDC2"),
        Op("SD", Form::StoreBaseImm, Mem(8)),
    ]
}

const fn build_special_table() -> [InstructionInfo; 64] {
    use InstructionInfo::*;
    use ExMode::*;
    use CmpMode::*;
    use ShiftOp::*;
    use ShiftWidth::*;

    [
        // 0
        Op("SLL", Form::ShiftImm(0), Shift(Left, W32)),
        Reserved,
        Op("SRL", Form::ShiftImm(0), Shift(RightLogical, W32)),
        Op("SRA", Form::ShiftImm(0), Shift(RightArith, W32)),
        Op("SLLV", Form::ShiftReg, Shift(Left, W32)),
        Reserved,
        Op("SRLV", Form::ShiftReg, Shift(RightLogical, W32)),
        Op("SRAV", Form::ShiftReg, Shift(RightArith, W32)),
        // 1
        Op("JR", Form::JReg, JumpReg),
        Op("JALR", Form::JRegLink, JumpRegLink),
        Reserved,
        Reserved,
        Op("SYSCALL", Form::ExceptionType, Syscall),
        Op("BREAK", Form::ExceptionType, Break),
        Reserved,
        Op("SYNC", Form::Bare, Nop),
        // 2
        Op("MFHI", Form::MoveFrom, LoadInternal(InternalReg::HI)),
        Op("MTHI", Form::MoveTo, StoreInternal(InternalReg::HI)),
        Op("MFLO", Form::MoveFrom, LoadInternal(InternalReg::LO)),
        Op("MTLO", Form::MoveTo, StoreInternal(InternalReg::LO)),
        Op("DSLLV", Form::ShiftReg, Shift(Left, W64)),
        Reserved,
        Op("DSRLV", Form::ShiftReg, Shift(RightLogical, W64)),
        Op("DSRAV", Form::ShiftReg, Shift(RightArith, W64)),
        // 3
        Op("MULT", Form::MulDiv, MulDiv(MulDivOp::Mult)),
        Op("MULTU", Form::MulDiv, MulDiv(MulDivOp::MultU)),
        Op("DIV", Form::MulDiv, MulDiv(MulDivOp::Div)),
        Op("DIVU", Form::MulDiv, MulDiv(MulDivOp::DivU)),
        Op("DMULT", Form::MulDiv, MulDiv(MulDivOp::DMult)),
        Op("DMULTU", Form::MulDiv, MulDiv(MulDivOp::DMultU)),
        Op("DDIV", Form::MulDiv, MulDiv(MulDivOp::DDiv)),
        Op("DDIVU", Form::MulDiv, MulDiv(MulDivOp::DDivU)),
        // 4
        Op("ADD", Form::RegRegReg, Add32),
        Op("ADDU", Form::RegRegReg, AddU32),
        Op("SUB", Form::RegRegReg, Sub32),
        Op("SUBU", Form::RegRegReg, SubU32),
        Op("AND", Form::RegRegReg, And),
        Op("OR", Form::RegRegReg, Or),
        Op("XOR", Form::RegRegReg, Xor),
        Op("NOR", Form::RegRegReg, Nor),
        // 5
        Reserved,
        Reserved,
        Op("SLT", Form::RegRegReg, SetLess),
        Op("SLTU", Form::RegRegReg, SetLessU),
        Op("DADD", Form::RegRegReg, Add64),
        Op("DADDU", Form::RegRegReg, AddU64),
        Op("DSUB", Form::RegRegReg, Sub64),
        Op("DSUBU", Form::RegRegReg, SubU64),
        // 6
        Op("TGE", Form::TrapRegReg, Trap(Ge)),
        Op("TGEU", Form::TrapRegReg, Trap(GeU)),
        Op("TLT", Form::TrapRegReg, Trap(Lt)),
        Op("TLTU", Form::TrapRegReg, Trap(LtU)),
        Op("TEQ", Form::TrapRegReg, Trap(Eq)),
        Reserved,
        Op("TNE", Form::TrapRegReg, Trap(Ne)),
        Reserved,
        // 7
        Op("DSLL", Form::ShiftImm(0), Shift(Left, W64)),
        Reserved,
        Op("DSRL", Form::ShiftImm(0), Shift(RightLogical, W64)),
        Op("DSRA", Form::ShiftImm(0), Shift(RightArith, W64)),
        Op("DSLL32", Form::ShiftImm(32), Shift(Left, W64)),
        Reserved,
        Op("DSRL32", Form::ShiftImm(32), Shift(RightLogical, W64)),
        Op("DSRA32", Form::ShiftImm(32), Shift(RightArith, W64)),
    ]
}

const fn build_regimm_table() -> [InstructionInfo; 32] {
    use InstructionInfo::*;
    use ExMode::*;
    use CmpMode::*;

    [
        Op("BLTZ", Form::RegImmBranch, Branch(Lt)),
        Op("BGEZ", Form::RegImmBranch, Branch(Ge)),
        Op("BLTZL", Form::RegImmBranch, BranchLikely(Lt)),
        Op("BGEZL", Form::RegImmBranch, BranchLikely(Ge)),
        Reserved,
        Reserved,
        Reserved,
        Reserved,
        Op("TGEI", Form::TrapImm(true), Trap(Ge)),
        Op("TGEIU", Form::TrapImm(false), Trap(GeU)),
        Op("TLTI", Form::TrapImm(true), Trap(Lt)),
        Op("TLTIU", Form::TrapImm(false), Trap(LtU)),
        Op("TEQI", Form::TrapImm(true), Trap(Eq)),
        Reserved,
        Op("TNEI", Form::TrapImm(true), Trap(Ne)),
        Reserved,
        Op("BLTZAL", Form::RegImmBranch, BranchLink(Lt)),
        Op("BGEZAL", Form::RegImmBranch, BranchLink(Ge)),
        Op("BLTZALL", Form::RegImmBranch, BranchLinkLikely(Lt)),
        Op("BGEZALL", Form::RegImmBranch, BranchLinkLikely(Ge)),
        Reserved,
        Reserved,
        Reserved,
        Reserved,
        Reserved,
        Reserved,
        Reserved,
        Reserved,
        Reserved,
        Reserved,
        Reserved,
        Reserved,
    ]
}

const fn build_cop0_table() -> [InstructionInfo; 16] {
    use InstructionInfo::*;
    use ExMode::*;

    [
        // 0
        Op("MFC0", Form::CopReg(0), MoveFromCop0 { double: false }),
        Op("DMFC0", Form::CopReg(0), MoveFromCop0 { double: true }),
        Unimplemented("CFC0"),
        Reserved,
        Op("MTC0", Form::CopReg(0), MoveToCop0 { double: false }),
        Op("DMTC0", Form::CopReg(0), MoveToCop0 { double: true }),
        Unimplemented("CTC0"),
        Reserved,
        // 8
        Unimplemented("BCC0"),
        Reserved,
        Reserved,
        Reserved,
        Reserved,
        Reserved,
        Reserved,
        Reserved,
    ]
}

const fn build_cop0_fn_table() -> [InstructionInfo; 64] {
    use InstructionInfo::*;
    use ExMode::*;

    let mut table = [Reserved; 64];
    table[0x1] = Op("TLBR", Form::Bare, TlbRead);
    table[0x2] = Op("TLBWI", Form::Bare, TlbWriteIndexed);
    table[0x6] = Op("TLBWR", Form::Bare, TlbWriteRandom);
    table[0x8] = Op("TLBP", Form::Bare, TlbProbe);
    table[0x18] = Op("ERET", Form::Bare, Eret);

    table
}

const fn build_cop1_table() -> [InstructionInfo; 32] {
    use InstructionInfo::*;
    use ExMode::*;

    let mut table = [Reserved; 32];
    table[0x0] = Op("MFC1", Form::CopReg(1), MoveFromCop1 { double: false });
    table[0x1] = Op("DMFC1", Form::CopReg(1), MoveFromCop1 { double: true });
    table[0x2] = Op("CFC1", Form::CopReg(1), MoveControlFromCop1);
    table[0x4] = Op("MTC1", Form::CopReg(1), MoveToCop1 { double: false });
    table[0x5] = Op("DMTC1", Form::CopReg(1), MoveToCop1 { double: true });
    table[0x6] = Op("CTC1", Form::CopReg(1), MoveControlToCop1);
    table[0x8] = Cop1Bc;
    // S, D, W and L formats all share one function table
    table[0x10] = Cop1Fn;
    table[0x11] = Cop1Fn;
    table[0x14] = Cop1Fn;
    table[0x15] = Cop1Fn;

    table
}

const fn build_cop1_bc_table() -> [InstructionInfo; 4] {
    use InstructionInfo::*;
    use ExMode::*;

    [
        Op("BC1F", Form::FpuBranch, BranchCop1 { on_true: false, likely: false }),
        Op("BC1T", Form::FpuBranch, BranchCop1 { on_true: true, likely: false }),
        Op("BC1FL", Form::FpuBranch, BranchCop1 { on_true: false, likely: true }),
        Op("BC1TL", Form::FpuBranch, BranchCop1 { on_true: true, likely: true }),
    ]
}

const fn build_cop1_fn_table() -> [InstructionInfo; 64] {
    use InstructionInfo::*;
    use ExMode::*;
    use FloatFormat::*;
    use RoundMode::*;

    let mut table = [Reserved; 64];
    table[0x00] = Op("ADD", Form::FpuRegRegReg, FloatArith(FloatOp::Add));
    table[0x01] = Op("SUB", Form::FpuRegRegReg, FloatArith(FloatOp::Sub));
    table[0x02] = Op("MUL", Form::FpuRegRegReg, FloatArith(FloatOp::Mul));
    table[0x03] = Op("DIV", Form::FpuRegRegReg, FloatArith(FloatOp::Div));
    table[0x04] = Op("SQRT", Form::FpuRegReg, FloatUnary(FloatUnaryOp::Sqrt));
    table[0x05] = Op("ABS", Form::FpuRegReg, FloatUnary(FloatUnaryOp::Abs));
    table[0x06] = Op("MOV", Form::FpuRegReg, FloatMove);
    table[0x07] = Op("NEG", Form::FpuRegReg, FloatUnary(FloatUnaryOp::Neg));
    table[0x08] = Op("ROUND.L", Form::FpuRegReg, FloatConvert(Long, Nearest));
    table[0x09] = Op("TRUNC.L", Form::FpuRegReg, FloatConvert(Long, Truncate));
    table[0x0a] = Op("CEIL.L", Form::FpuRegReg, FloatConvert(Long, Ceil));
    table[0x0b] = Op("FLOOR.L", Form::FpuRegReg, FloatConvert(Long, Floor));
    table[0x0c] = Op("ROUND.W", Form::FpuRegReg, FloatConvert(Word, Nearest));
    table[0x0d] = Op("TRUNC.W", Form::FpuRegReg, FloatConvert(Word, Truncate));
    table[0x0e] = Op("CEIL.W", Form::FpuRegReg, FloatConvert(Word, Ceil));
    table[0x0f] = Op("FLOOR.W", Form::FpuRegReg, FloatConvert(Word, Floor));
    table[0x20] = Op("CVT.S", Form::FpuRegReg, FloatConvert(Single, Nearest));
    table[0x21] = Op("CVT.D", Form::FpuRegReg, FloatConvert(Double, Nearest));
    table[0x24] = Op("CVT.W", Form::FpuRegReg, FloatConvert(Word, Nearest));
    table[0x25] = Op("CVT.L", Form::FpuRegReg, FloatConvert(Long, Nearest));

    let mut cond = 0x30;
    while cond < 0x40 {
        table[cond] = Op("C", Form::FpuCompare, FloatCompare);
        cond += 1;
    }

    table
}

const PRIMARY_TABLE: [InstructionInfo; 64] = build_primary_table();
const SPECIAL_TABLE: [InstructionInfo; 64] = build_special_table();
const REGIMM_TABLE: [InstructionInfo; 32] = build_regimm_table();
const COP0_TABLE: [InstructionInfo; 16] = build_cop0_table();
const COP0_FN_TABLE: [InstructionInfo; 64] = build_cop0_fn_table();
const COP1_TABLE: [InstructionInfo; 32] = build_cop1_table();
const COP1_BC_TABLE: [InstructionInfo; 4] = build_cop1_bc_table();
const COP1_FN_TABLE: [InstructionInfo; 64] = build_cop1_fn_table();

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm;

    fn mode(word: u32) -> Option<ExMode> {
        decode(word).1.ex_mode()
    }

    #[test]
    fn nop_is_a_shift() {
        assert_eq!(mode(0), Some(ExMode::Shift(ShiftOp::Left, ShiftWidth::W32)));
        assert_eq!(Instruction::R(0u32.into()).name(), "SLL");
    }

    #[test]
    fn decodes_subtables() {
        assert_eq!(mode(asm::addiu(8, 0, 1)), Some(ExMode::AddU32));
        assert_eq!(mode(asm::bnel(1, 2, 2)), Some(ExMode::BranchLikely(CmpMode::Ne)));
        assert_eq!(mode(asm::bgezal(4, 3)), Some(ExMode::BranchLink(CmpMode::Ge)));
        assert_eq!(mode(asm::eret()), Some(ExMode::Eret));
        assert_eq!(mode(asm::mtc0(8, 12)), Some(ExMode::MoveToCop0 { double: false }));
        assert_eq!(mode(asm::bc1tl(4)), Some(ExMode::BranchCop1 { on_true: true, likely: true }));
        assert_eq!(mode(asm::add_d(0, 2, 4)), Some(ExMode::FloatArith(FloatOp::Add)));
        assert_eq!(mode(asm::c_cond_s(2, 0, 2)), Some(ExMode::FloatCompare));
    }

    #[test]
    fn reserved_and_unimplemented_are_distinct() {
        // opcode 0x13 is reserved, COP2 is not implemented on this core
        assert!(matches!(decode(0x13 << 26).0, Instruction::Reserved(_)));
        assert!(matches!(decode(0x12 << 26).0, Instruction::Unimplemented(_)));
        assert!(matches!(decode(0x32 << 26).0, Instruction::Unimplemented(_)));
    }

    #[test]
    fn disassembly() {
        let add = Instruction::R(asm::addu(2, 4, 5).into());
        assert_eq!(add.disassemble(0), "ADDU    $v0, $a0, $a1");
        let lw = decode(asm::lw(8, 29, -16)).0;
        assert_eq!(lw.disassemble(0), "LW      $t0, -0x10($sp)");
        let b = decode(0x1000_ffff).0;
        assert_eq!(b.disassemble(0x8000_0400), "BEQ     $zero, $zero, 0x80000400");
        let j = decode(asm::j(0x8000_1000)).0;
        assert_eq!(j.disassemble(0x8000_0000), "J       0x80001000");
        let div_s = decode(asm::div_s(1, 2, 3)).0;
        assert_eq!(div_s.disassemble(0), "DIV.S   $f1, $f2, $f3");
        assert_eq!(decode(asm::eret()).0.disassemble(0), "ERET");
    }
}
