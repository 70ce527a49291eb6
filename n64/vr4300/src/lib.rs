/// The VR4300 is the main CPU of the Nintendo 64.
///
/// This crate models the architectural side of it: decoding, register state, exceptions,
/// address translation and the semantics of each instruction. Two engines run on top of that:
/// the reference `Interpreter` here, and the recompiler in the `dynarec` crate, which shares
/// every semantic helper with it so the two can be checked against each other.

pub mod arith;
pub mod asm;
pub mod bus;
pub mod cop0;
pub mod exception;
pub mod fpu;
pub mod instructions;
pub mod interpreter;
pub mod memory;
pub mod mmu;
pub mod state;

pub use bus::{Bus, Ram};
pub use cop0::Cop0;
pub use exception::{ExceptionCode, ExceptionDescriptor, Fault};
pub use interpreter::{Interpreter, InterpreterError};
pub use mmu::{AccessKind, AddressTranslator, Mmu};
pub use state::CpuState;
