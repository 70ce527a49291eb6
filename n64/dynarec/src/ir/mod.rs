//! Block intermediate representation: a flat list of SSA values, each either producing a
//! result or having an effect, in guest program order.

mod context;
mod display;
mod value;

pub use context::{Ids, IrContext};
pub use value::{
    BinaryOp, BlockExit, ExitSite, GuestReg, Helper, HelperArgs, Operands, RegClass, StateField, Value, ValueId, ValueKind,
    ValueType, MAX_HELPER_ARGS, MAX_OPERANDS,
};
