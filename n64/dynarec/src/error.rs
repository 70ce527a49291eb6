use thiserror::Error;

/// Translation failures. All of these are bugs in the recompiler or guest code it doesn't
/// support, so execution stops rather than running something wrong.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("reserved instruction {word:#010x} at {pc:#x}")]
    Reserved { pc: u64, word: u32 },
    #[error("unimplemented instruction {name} ({word:#010x}) at {pc:#x}")]
    Unimplemented { pc: u64, word: u32, name: &'static str },
    #[error("branch at {pc:#x} sits in the delay slot of another branch")]
    BranchInDelaySlot { pc: u64 },
    #[error("spill area exhausted after {slots} slots")]
    SpillExhausted { slots: usize },
    #[error("block of {size} bytes can never fit in a {capacity} byte code cache")]
    BlockTooLarge { size: usize, capacity: usize },
    #[error("IR value v{value} is used but has no allocation")]
    Unallocated { value: u32 },
    #[error("IR value v{value} can leave the block but has no exit site")]
    MissingExitSite { value: u32 },
    #[error("internal error translating {pc:#x}: {what}")]
    Internal { pc: u64, what: &'static str },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DynarecError {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error("malformed host code at offset {offset:#x}")]
    CorruptBlock { offset: usize },
}
