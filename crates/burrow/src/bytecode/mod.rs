//! Script compilation: source text to [`Code`] objects run by the VM.

mod builder;
mod code;
mod compiler;

pub(crate) use code::{BinOp, CmpOp, Code, Instr};
pub(crate) use compiler::{CompileError, MAIN_FUNCTION_NAME, compile};
