use super::{Entry, check_args};
use crate::{
    heap::HeapData,
    value::Value,
    vm::{Vm, VmError, VmResult},
};

pub(super) const FUNCTIONS: &[Entry] = &[
    ("blob", blob, None),
    ("casti2f", casti2f, Some(1)),
    ("castf2i", castf2i, Some(1)),
    ("swap2", swap2, Some(1)),
    ("swap4", swap4, Some(1)),
];

/// `blob(size = 0)`: a zero-filled byte buffer.
fn blob(vm: &mut Vm) -> VmResult<usize> {
    let argc = check_args(vm, "blob", 0, 1)?;
    let size = if argc == 1 {
        usize::try_from(vm.get_integer(1)?).map_err(|_| VmError::runtime("cannot create blob with negative size"))?
    } else {
        0
    };
    let id = vm.heap_mut().allocate(HeapData::Blob(vec![0; size]));
    vm.push_value(Value::Ref(id));
    Ok(1)
}

/// Reinterprets the low 32 bits of an integer as an IEEE single.
fn casti2f(vm: &mut Vm) -> VmResult<usize> {
    let bits = vm.get_integer(1)?.to_le_bytes();
    let f = f32::from_le_bytes([bits[0], bits[1], bits[2], bits[3]]);
    vm.push_float(f64::from(f));
    Ok(1)
}

/// Reinterprets a float, narrowed to single precision, as an integer.
fn castf2i(vm: &mut Vm) -> VmResult<usize> {
    #[expect(clippy::cast_possible_truncation)]
    let single = vm.get_float(1)? as f32;
    vm.push_integer(i64::from(i32::from_le_bytes(single.to_le_bytes())));
    Ok(1)
}

/// Swaps the byte order of a 16-bit integer.
fn swap2(vm: &mut Vm) -> VmResult<usize> {
    let bytes = vm.get_integer(1)?.to_le_bytes();
    vm.push_integer(i64::from(i16::from_le_bytes([bytes[1], bytes[0]])));
    Ok(1)
}

/// Swaps the byte order of a 32-bit integer.
fn swap4(vm: &mut Vm) -> VmResult<usize> {
    let bytes = vm.get_integer(1)?.to_le_bytes();
    vm.push_integer(i64::from(i32::from_le_bytes([bytes[3], bytes[2], bytes[1], bytes[0]])));
    Ok(1)
}
