//! Conversions between host values and VM stack values.

use crate::{
    error::Key,
    value::{ObjectType, UserPointer},
    vm::{Vm, VmResult},
};

/// A host type that can be read out of a VM stack slot.
///
/// Reading is strict: [`FromVm::matches`] decides which type tags are accepted
/// and no coercion happens between them (an integer is not a float).
pub trait FromVm: Sized {
    /// Type name used in type-mismatch errors, e.g. `"integer"`.
    const EXPECTED: &'static str;

    fn matches(found: ObjectType) -> bool;

    /// Reads the value at `idx`; only called once `matches` accepted its tag.
    fn read(vm: &Vm, idx: isize) -> VmResult<Self>;
}

impl FromVm for String {
    const EXPECTED: &'static str = "string";

    fn matches(found: ObjectType) -> bool {
        found == ObjectType::String
    }

    fn read(vm: &Vm, idx: isize) -> VmResult<Self> {
        vm.get_string(idx).map(str::to_owned)
    }
}

impl FromVm for i64 {
    const EXPECTED: &'static str = "integer";

    fn matches(found: ObjectType) -> bool {
        found == ObjectType::Integer
    }

    fn read(vm: &Vm, idx: isize) -> VmResult<Self> {
        vm.get_integer(idx)
    }
}

impl FromVm for f64 {
    const EXPECTED: &'static str = "float";

    fn matches(found: ObjectType) -> bool {
        found == ObjectType::Float
    }

    fn read(vm: &Vm, idx: isize) -> VmResult<Self> {
        vm.get_float(idx)
    }
}

impl FromVm for f32 {
    const EXPECTED: &'static str = "float";

    fn matches(found: ObjectType) -> bool {
        found == ObjectType::Float
    }

    #[expect(clippy::cast_possible_truncation)]
    fn read(vm: &Vm, idx: isize) -> VmResult<Self> {
        vm.get_float(idx).map(|f| f as Self)
    }
}

impl FromVm for bool {
    const EXPECTED: &'static str = "bool";

    fn matches(found: ObjectType) -> bool {
        found == ObjectType::Bool
    }

    fn read(vm: &Vm, idx: isize) -> VmResult<Self> {
        vm.get_bool(idx)
    }
}

impl FromVm for UserPointer {
    const EXPECTED: &'static str = "userpointer";

    fn matches(found: ObjectType) -> bool {
        found == ObjectType::UserPointer
    }

    fn read(vm: &Vm, idx: isize) -> VmResult<Self> {
        vm.get_user_pointer(idx)
    }
}

/// Accepts anything and discards it; for calls whose result is not needed.
impl FromVm for () {
    const EXPECTED: &'static str = "null";

    fn matches(_found: ObjectType) -> bool {
        true
    }

    fn read(_vm: &Vm, _idx: isize) -> VmResult<Self> {
        Ok(())
    }
}

/// `null` reads as `None`.
impl<T: FromVm> FromVm for Option<T> {
    const EXPECTED: &'static str = T::EXPECTED;

    fn matches(found: ObjectType) -> bool {
        found == ObjectType::Null || T::matches(found)
    }

    fn read(vm: &Vm, idx: isize) -> VmResult<Self> {
        if vm.get_type(idx)? == ObjectType::Null {
            Ok(None)
        } else {
            T::read(vm, idx).map(Some)
        }
    }
}

/// A host value that can be pushed onto the VM stack.
pub trait IntoVm {
    /// Pushes exactly one value.
    fn push(&self, vm: &mut Vm);
}

impl<T: IntoVm + ?Sized> IntoVm for &T {
    fn push(&self, vm: &mut Vm) {
        (**self).push(vm);
    }
}

impl IntoVm for i64 {
    fn push(&self, vm: &mut Vm) {
        vm.push_integer(*self);
    }
}

impl IntoVm for i32 {
    fn push(&self, vm: &mut Vm) {
        vm.push_integer(i64::from(*self));
    }
}

impl IntoVm for f64 {
    fn push(&self, vm: &mut Vm) {
        vm.push_float(*self);
    }
}

impl IntoVm for f32 {
    fn push(&self, vm: &mut Vm) {
        vm.push_float(f64::from(*self));
    }
}

impl IntoVm for bool {
    fn push(&self, vm: &mut Vm) {
        vm.push_bool(*self);
    }
}

impl IntoVm for str {
    fn push(&self, vm: &mut Vm) {
        vm.push_string(self);
    }
}

impl IntoVm for String {
    fn push(&self, vm: &mut Vm) {
        vm.push_string(self);
    }
}

impl IntoVm for UserPointer {
    fn push(&self, vm: &mut Vm) {
        vm.push_user_pointer(*self);
    }
}

impl IntoVm for () {
    fn push(&self, vm: &mut Vm) {
        vm.push_null();
    }
}

impl<T: IntoVm> IntoVm for Option<T> {
    fn push(&self, vm: &mut Vm) {
        match self {
            Some(value) => value.push(vm),
            None => vm.push_null(),
        }
    }
}

impl IntoVm for Key {
    fn push(&self, vm: &mut Vm) {
        match self {
            Self::Field(name) => vm.push_string(name),
            Self::Index(i) => vm.push_integer(*i),
        }
    }
}
