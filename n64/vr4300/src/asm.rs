//! Minimal instruction encoder, so tests and tools can write guest code by name.
//!
//! Register arguments are raw register numbers. Branch offsets are in instructions, relative
//! to the delay slot, exactly as encoded.

pub const FMT_S: u32 = 16;
pub const FMT_D: u32 = 17;
pub const FMT_W: u32 = 20;
pub const FMT_L: u32 = 21;

pub const fn itype(op: u32, rs: u32, rt: u32, imm: u16) -> u32 {
    (op << 26) | ((rs & 31) << 21) | ((rt & 31) << 16) | imm as u32
}

pub const fn rtype(rs: u32, rt: u32, rd: u32, sa: u32, funct: u32) -> u32 {
    ((rs & 31) << 21) | ((rt & 31) << 16) | ((rd & 31) << 11) | ((sa & 31) << 6) | (funct & 63)
}

const fn regimm(rs: u32, kind: u32, imm: u16) -> u32 {
    itype(0x01, rs, kind, imm)
}

const fn cop(n: u32, sub: u32, rt: u32, rd: u32, funct: u32) -> u32 {
    ((0x10 + n) << 26) | ((sub & 31) << 21) | ((rt & 31) << 16) | ((rd & 31) << 11) | (funct & 63)
}

const fn cop1_fn(fmt: u32, ft: u32, fs: u32, fd: u32, funct: u32) -> u32 {
    (0x11 << 26) | (fmt << 21) | ((ft & 31) << 16) | ((fs & 31) << 11) | ((fd & 31) << 6) | funct
}

pub const fn nop() -> u32 {
    0
}

macro_rules! imm_ops {
    ($($name:ident = $op:expr, $signed:ty;)*) => {$(
        pub const fn $name(rt: u32, rs: u32, imm: $signed) -> u32 {
            itype($op, rs, rt, imm as u16)
        }
    )*};
}

imm_ops! {
    addi = 0x08, i16;
    addiu = 0x09, i16;
    slti = 0x0a, i16;
    sltiu = 0x0b, i16;
    andi = 0x0c, u16;
    ori = 0x0d, u16;
    xori = 0x0e, u16;
    daddi = 0x18, i16;
    daddiu = 0x19, i16;
}

pub const fn lui(rt: u32, imm: u16) -> u32 {
    itype(0x0f, 0, rt, imm)
}

macro_rules! mem_ops {
    ($($name:ident = $op:expr;)*) => {$(
        pub const fn $name(rt: u32, base: u32, offset: i16) -> u32 {
            itype($op, base, rt, offset as u16)
        }
    )*};
}

mem_ops! {
    ldl = 0x1a;
    ldr = 0x1b;
    lb = 0x20;
    lh = 0x21;
    lwl = 0x22;
    lw = 0x23;
    lbu = 0x24;
    lhu = 0x25;
    lwr = 0x26;
    lwu = 0x27;
    sb = 0x28;
    sh = 0x29;
    swl = 0x2a;
    sw = 0x2b;
    sdl = 0x2c;
    sdr = 0x2d;
    swr = 0x2e;
    cache = 0x2f;
    ll = 0x30;
    lwc1 = 0x31;
    lld = 0x34;
    ldc1 = 0x35;
    ld = 0x37;
    sc = 0x38;
    swc1 = 0x39;
    scd = 0x3c;
    sdc1 = 0x3d;
    sd = 0x3f;
}

macro_rules! branch_reg_reg {
    ($($name:ident = $op:expr;)*) => {$(
        pub const fn $name(rs: u32, rt: u32, offset: i16) -> u32 {
            itype($op, rs, rt, offset as u16)
        }
    )*};
}

branch_reg_reg! {
    beq = 0x04;
    bne = 0x05;
    beql = 0x14;
    bnel = 0x15;
}

macro_rules! branch_reg {
    ($($name:ident = $op:expr;)*) => {$(
        pub const fn $name(rs: u32, offset: i16) -> u32 {
            itype($op, rs, 0, offset as u16)
        }
    )*};
}

branch_reg! {
    blez = 0x06;
    bgtz = 0x07;
    blezl = 0x16;
    bgtzl = 0x17;
}

macro_rules! regimm_ops {
    ($($name:ident = $kind:expr;)*) => {$(
        pub const fn $name(rs: u32, offset: i16) -> u32 {
            regimm(rs, $kind, offset as u16)
        }
    )*};
}

regimm_ops! {
    bltz = 0x00;
    bgez = 0x01;
    bltzl = 0x02;
    bgezl = 0x03;
    tgei = 0x08;
    tgeiu = 0x09;
    tlti = 0x0a;
    tltiu = 0x0b;
    teqi = 0x0c;
    tnei = 0x0e;
    bltzal = 0x10;
    bgezal = 0x11;
    bltzall = 0x12;
    bgezall = 0x13;
}

/// Absolute jump to `target`, which must share the top four bits with the delay slot
pub const fn j(target: u64) -> u32 {
    (0x02 << 26) | ((target >> 2) as u32 & 0x03ff_ffff)
}

pub const fn jal(target: u64) -> u32 {
    (0x03 << 26) | ((target >> 2) as u32 & 0x03ff_ffff)
}

pub const fn jr(rs: u32) -> u32 {
    rtype(rs, 0, 0, 0, 0x08)
}

pub const fn jalr(rd: u32, rs: u32) -> u32 {
    rtype(rs, 0, rd, 0, 0x09)
}

pub const fn syscall() -> u32 {
    rtype(0, 0, 0, 0, 0x0c)
}

pub const fn brk() -> u32 {
    rtype(0, 0, 0, 0, 0x0d)
}

pub const fn sync() -> u32 {
    rtype(0, 0, 0, 0, 0x0f)
}

macro_rules! shift_imm_ops {
    ($($name:ident = $funct:expr;)*) => {$(
        pub const fn $name(rd: u32, rt: u32, sa: u32) -> u32 {
            rtype(0, rt, rd, sa, $funct)
        }
    )*};
}

shift_imm_ops! {
    sll = 0x00;
    srl = 0x02;
    sra = 0x03;
    dsll = 0x38;
    dsrl = 0x3a;
    dsra = 0x3b;
    dsll32 = 0x3c;
    dsrl32 = 0x3e;
    dsra32 = 0x3f;
}

macro_rules! shift_reg_ops {
    ($($name:ident = $funct:expr;)*) => {$(
        pub const fn $name(rd: u32, rt: u32, rs: u32) -> u32 {
            rtype(rs, rt, rd, 0, $funct)
        }
    )*};
}

shift_reg_ops! {
    sllv = 0x04;
    srlv = 0x06;
    srav = 0x07;
    dsllv = 0x14;
    dsrlv = 0x16;
    dsrav = 0x17;
}

pub const fn mfhi(rd: u32) -> u32 {
    rtype(0, 0, rd, 0, 0x10)
}

pub const fn mthi(rs: u32) -> u32 {
    rtype(rs, 0, 0, 0, 0x11)
}

pub const fn mflo(rd: u32) -> u32 {
    rtype(0, 0, rd, 0, 0x12)
}

pub const fn mtlo(rs: u32) -> u32 {
    rtype(rs, 0, 0, 0, 0x13)
}

macro_rules! two_reg_ops {
    ($($name:ident = $funct:expr;)*) => {$(
        pub const fn $name(rs: u32, rt: u32) -> u32 {
            rtype(rs, rt, 0, 0, $funct)
        }
    )*};
}

two_reg_ops! {
    mult = 0x18;
    multu = 0x19;
    div = 0x1a;
    divu = 0x1b;
    dmult = 0x1c;
    dmultu = 0x1d;
    ddiv = 0x1e;
    ddivu = 0x1f;
    tge = 0x30;
    tgeu = 0x31;
    tlt = 0x32;
    tltu = 0x33;
    teq = 0x34;
    tne = 0x36;
}

macro_rules! three_reg_ops {
    ($($name:ident = $funct:expr;)*) => {$(
        pub const fn $name(rd: u32, rs: u32, rt: u32) -> u32 {
            rtype(rs, rt, rd, 0, $funct)
        }
    )*};
}

three_reg_ops! {
    add = 0x20;
    addu = 0x21;
    sub = 0x22;
    subu = 0x23;
    and = 0x24;
    or = 0x25;
    xor = 0x26;
    nor = 0x27;
    slt = 0x2a;
    sltu = 0x2b;
    dadd = 0x2c;
    daddu = 0x2d;
    dsub = 0x2e;
    dsubu = 0x2f;
}

/// Moves between a GPR and a coprocessor register: `(rt, rd)`
macro_rules! cop_moves {
    ($($name:ident = $n:expr, $sub:expr;)*) => {$(
        pub const fn $name(rt: u32, rd: u32) -> u32 {
            cop($n, $sub, rt, rd, 0)
        }
    )*};
}

cop_moves! {
    mfc0 = 0, 0x00;
    dmfc0 = 0, 0x01;
    mtc0 = 0, 0x04;
    dmtc0 = 0, 0x05;
    mfc1 = 1, 0x00;
    dmfc1 = 1, 0x01;
    cfc1 = 1, 0x02;
    mtc1 = 1, 0x04;
    dmtc1 = 1, 0x05;
    ctc1 = 1, 0x06;
}

pub const fn tlbr() -> u32 {
    cop(0, 0x10, 0, 0, 0x01)
}

pub const fn tlbwi() -> u32 {
    cop(0, 0x10, 0, 0, 0x02)
}

pub const fn tlbwr() -> u32 {
    cop(0, 0x10, 0, 0, 0x06)
}

pub const fn tlbp() -> u32 {
    cop(0, 0x10, 0, 0, 0x08)
}

pub const fn eret() -> u32 {
    cop(0, 0x10, 0, 0, 0x18)
}

macro_rules! cop1_branches {
    ($($name:ident = $kind:expr;)*) => {$(
        pub const fn $name(offset: i16) -> u32 {
            itype(0x11, 0x08, $kind, offset as u16)
        }
    )*};
}

cop1_branches! {
    bc1f = 0;
    bc1t = 1;
    bc1fl = 2;
    bc1tl = 3;
}

macro_rules! fpu_three {
    ($($name:ident = $fmt:expr, $funct:expr;)*) => {$(
        pub const fn $name(fd: u32, fs: u32, ft: u32) -> u32 {
            cop1_fn($fmt, ft, fs, fd, $funct)
        }
    )*};
}

fpu_three! {
    add_s = FMT_S, 0x00;
    add_d = FMT_D, 0x00;
    sub_s = FMT_S, 0x01;
    sub_d = FMT_D, 0x01;
    mul_s = FMT_S, 0x02;
    mul_d = FMT_D, 0x02;
    div_s = FMT_S, 0x03;
    div_d = FMT_D, 0x03;
}

macro_rules! fpu_two {
    ($($name:ident = $fmt:expr, $funct:expr;)*) => {$(
        pub const fn $name(fd: u32, fs: u32) -> u32 {
            cop1_fn($fmt, 0, fs, fd, $funct)
        }
    )*};
}

fpu_two! {
    sqrt_s = FMT_S, 0x04;
    sqrt_d = FMT_D, 0x04;
    abs_s = FMT_S, 0x05;
    abs_d = FMT_D, 0x05;
    mov_s = FMT_S, 0x06;
    mov_d = FMT_D, 0x06;
    neg_s = FMT_S, 0x07;
    neg_d = FMT_D, 0x07;
    round_l_d = FMT_D, 0x08;
    trunc_l_d = FMT_D, 0x09;
    ceil_l_d = FMT_D, 0x0a;
    floor_l_d = FMT_D, 0x0b;
    round_w_s = FMT_S, 0x0c;
    round_w_d = FMT_D, 0x0c;
    trunc_w_s = FMT_S, 0x0d;
    trunc_w_d = FMT_D, 0x0d;
    ceil_w_s = FMT_S, 0x0e;
    ceil_w_d = FMT_D, 0x0e;
    floor_w_s = FMT_S, 0x0f;
    floor_w_d = FMT_D, 0x0f;
    cvt_s_d = FMT_D, 0x20;
    cvt_s_w = FMT_W, 0x20;
    cvt_s_l = FMT_L, 0x20;
    cvt_d_s = FMT_S, 0x21;
    cvt_d_w = FMT_W, 0x21;
    cvt_d_l = FMT_L, 0x21;
    cvt_w_s = FMT_S, 0x24;
    cvt_w_d = FMT_D, 0x24;
    cvt_l_s = FMT_S, 0x25;
    cvt_l_d = FMT_D, 0x25;
}

/// C.cond.S, `cond` is the low four bits of the function field
pub const fn c_cond_s(cond: u32, fs: u32, ft: u32) -> u32 {
    cop1_fn(FMT_S, ft, fs, 0, 0x30 | (cond & 15))
}

pub const fn c_cond_d(cond: u32, fs: u32, ft: u32) -> u32 {
    cop1_fn(FMT_D, ft, fs, 0, 0x30 | (cond & 15))
}
