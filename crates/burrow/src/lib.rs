#![doc = include_str!("../../../README.md")]
// first so every other module sees the arena types
mod heap;

mod bytecode;
mod config;
mod convert;
mod error;
mod handle;
mod io;
mod session;
mod stack_guard;
mod stdlib;
pub mod tracer;
mod value;
mod vm;

pub use crate::{
    config::{DEFAULT_STACK_SIZE, DEFAULT_TAG, SessionConfig},
    convert::{FromVm, IntoVm},
    error::{Error, Key, Result},
    handle::{Handle, Origin},
    heap::HeapStats,
    io::{CollectStringPrint, NoPrint, PrintWriter, StdPrint},
    session::Session,
    stack_guard::StackGuard,
    stdlib::StdLib,
    tracer::{NoopTracer, RecordingTracer, StderrTracer, TraceEvent, VmTracer},
    value::{ObjectType, UserPointer},
    vm::{DEFAULT_MAX_CALL_DEPTH, NATIVE_FILE, NativeFn, StackFrame, Vm, VmError, VmResult},
};
