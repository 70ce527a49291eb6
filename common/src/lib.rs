//! Bits and pieces shared between the CPU model, the recompiler and the front end.

pub mod cli;
pub mod logging;
pub mod util;
