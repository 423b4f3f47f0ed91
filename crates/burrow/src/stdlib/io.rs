use std::{fs, path::Path};

use super::Entry;
use crate::vm::{Vm, VmError, VmResult};

pub(super) const FUNCTIONS: &[Entry] = &[
    ("dofile", dofile, Some(1)),
    ("loadfile", loadfile, Some(1)),
    ("readfile", readfile, Some(1)),
    ("writefile", writefile, Some(2)),
];

/// Runs a script file and returns whatever it returns.
fn dofile(vm: &mut Vm) -> VmResult<usize> {
    let path = vm.get_string(1)?.to_owned();
    vm.compile_file(Path::new(&path))?;
    vm.call(0)?;
    Ok(1)
}

/// Compiles a script file into a closure without running it.
fn loadfile(vm: &mut Vm) -> VmResult<usize> {
    let path = vm.get_string(1)?.to_owned();
    vm.compile_file(Path::new(&path))?;
    Ok(1)
}

fn readfile(vm: &mut Vm) -> VmResult<usize> {
    let path = vm.get_string(1)?;
    let text = fs::read_to_string(path).map_err(|e| VmError::runtime(format!("cannot open the file '{path}': {e}")))?;
    vm.push_string(&text);
    Ok(1)
}

fn writefile(vm: &mut Vm) -> VmResult<usize> {
    let path = vm.get_string(1)?;
    let text = vm.get_string(2)?;
    fs::write(path, text).map_err(|e| VmError::runtime(format!("cannot write the file '{path}': {e}")))?;
    Ok(0)
}
