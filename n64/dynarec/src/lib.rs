//! Dynamic recompiler for the VR4300.
//!
//! Guest code is cut into translation units (`formatter`), lowered to a linear IR
//! (`builder`), optimized (`optimizer`), register allocated against a host description
//! (`regalloc`, `platform`) and emitted into a bump allocated code cache (`backend`, `cache`).
//! The `dispatcher` ties it together behind `Core::step`.
//!
//! The CPU state a block operates on lives in a box owned by `Core`. It is allocated once and
//! never moves while any block is resident; replacing it goes through `Core::load_state`,
//! which copies in place and flushes the code cache.

pub mod backend;
pub mod builder;
pub mod cache;
pub mod category;
pub mod config;
pub mod directory;
pub mod dispatcher;
pub mod error;
pub mod formatter;
pub mod ir;
pub mod optimizer;
pub mod platform;
pub mod regalloc;

pub use builder::SysConfig;
pub use config::{DynarecConfig, PlatformKind};
pub use dispatcher::{Core, Dynarec, DynarecStats, EventClock, NoEvents};
pub use error::{CompileError, DynarecError};

/// log2 of the block directory page size
pub const BLOCKCACHE_OUTER_SHIFT: u32 = 12;
pub const PAGE_SIZE: u32 = 1 << BLOCKCACHE_OUTER_SHIFT;
/// Instruction words per directory page
pub const BLOCKCACHE_INNER_SIZE: usize = (PAGE_SIZE / 4) as usize;
/// Directory pages covering the 32 bit physical address space
pub const BLOCKCACHE_OUTER_SIZE: usize = 1 << (32 - BLOCKCACHE_OUTER_SHIFT);
/// A unit may run one word past its page, for a delay slot
pub const MAX_UNIT_LENGTH: usize = BLOCKCACHE_INNER_SIZE + 1;

pub const CYCLES_PER_INSTR: u64 = 1;
