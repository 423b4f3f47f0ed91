//! Native libraries installed into the root table.
//!
//! The base library is always present. The others are opt-in per session and
//! enumerated by [`StdLib`]; every function lands as a global.

mod base;
mod blob;
mod io;
mod math;
mod string;
mod system;

use crate::vm::{NativeFn, Vm, VmError, VmResult};

/// An optional native library.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumIter,
    strum::IntoStaticStr,
    serde::Serialize,
    serde::Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum StdLib {
    Blob,
    Io,
    System,
    Math,
    String,
}

impl StdLib {
    /// Every optional library, in installation order.
    pub fn all() -> impl Iterator<Item = Self> {
        <Self as strum::IntoEnumIterator>::iter()
    }
}

/// `(global name, function, exact arity)`; `None` arity means the function checks its own arguments.
type Entry = (&'static str, NativeFn, Option<usize>);

pub(crate) fn install_base(vm: &mut Vm) {
    register(vm, base::FUNCTIONS);
}

pub(crate) fn install(vm: &mut Vm, lib: StdLib) {
    match lib {
        StdLib::Blob => register(vm, blob::FUNCTIONS),
        StdLib::Io => register(vm, io::FUNCTIONS),
        StdLib::System => register(vm, system::FUNCTIONS),
        StdLib::Math => {
            register(vm, math::FUNCTIONS);
            math::install_constants(vm);
        }
        StdLib::String => register(vm, string::FUNCTIONS),
    }
}

fn register(vm: &mut Vm, entries: &[Entry]) {
    for &(name, func, arity) in entries {
        vm.set_global_native(name, func, arity);
    }
}

/// Checks the argument count of a variadic native.
fn check_args(vm: &Vm, name: &str, min: usize, max: usize) -> VmResult<usize> {
    let argc = vm.get_top();
    if argc < min || argc > max {
        let expected = if min == max {
            min.to_string()
        } else {
            format!("{min} to {max}")
        };
        return Err(VmError::bad_call(
            name,
            format!("wrong number of parameters (expected {expected}, got {argc})"),
        ));
    }
    Ok(argc)
}

fn push_len(vm: &mut Vm, len: usize) -> VmResult<usize> {
    let len = i64::try_from(len).map_err(|_| VmError::runtime("length does not fit in an integer"))?;
    vm.push_integer(len);
    Ok(1)
}
