//! Reference-counted handles to values inside a session's VM.

use std::fmt;

use crate::{
    convert::{FromVm, IntoVm},
    error::{Error, Key, Result},
    heap::HeapData,
    session::Session,
    stack_guard::StackGuard,
    value::{ObjectType, TableKey, Value},
    vm::Vm,
};

/// Where the path of a handle starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// The VM's global table, via [`Session::get`].
    RootTable,
    /// A value on the VM stack, via [`Session::stack_slot`].
    StackSlot,
}

/// A value found by walking a path from the global table or a stack slot.
///
/// The path is resolved once, when the handle is created. From then on the
/// handle holds its own reference to the value, so it stays valid whatever
/// scripts do to the container it came from. Dropping the handle releases
/// that reference; cloning acquires a new one.
///
/// A handle only remembers its parent's name and path, never the parent
/// itself, so parents can be dropped before their children.
pub struct Handle<'s> {
    session: &'s Session,
    vm_id: u64,
    value: Value,
    key: Key,
    parent_name: String,
    path: String,
    origin: Origin,
}

impl<'s> Handle<'s> {
    /// Wraps `value`, whose reference the caller has already acquired.
    pub(crate) fn new(
        session: &'s Session,
        vm: &Vm,
        value: Value,
        key: Key,
        parent_name: String,
        path: String,
        origin: Origin,
    ) -> Self {
        Self {
            session,
            vm_id: vm.id(),
            value,
            key,
            parent_name,
            path,
            origin,
        }
    }

    /// Resolves `self[key]` into a new handle.
    ///
    /// Fails with [`Error::MissingKey`] naming this handle as the parent when
    /// the slot does not exist or this value cannot be indexed.
    pub fn get(&self, key: impl Into<Key>) -> Result<Handle<'s>> {
        self.session.resolve(Some(self), key.into())
    }

    /// Reads the value as a host type.
    ///
    /// The type tag must match exactly; an integer is not read as a float.
    ///
    /// ```
    /// use burrow::{Error, Session};
    ///
    /// let mut session = Session::new();
    /// session.open(256);
    /// session.run_source("setup", "width = 640").unwrap();
    ///
    /// let width = session.get("width").unwrap();
    /// assert_eq!(width.extract::<i64>().unwrap(), 640);
    /// assert!(matches!(width.extract::<String>(), Err(Error::TypeMismatch { .. })));
    /// ```
    pub fn extract<T: FromVm>(&self) -> Result<T> {
        let mut vm = self.session.vm_mut();
        let found = self.value.object_type(vm.heap());
        if !T::matches(found) {
            return Err(self.mismatch(T::EXPECTED, found));
        }
        let mut guard = StackGuard::new(&mut vm);
        self.push(&mut guard);
        T::read(&guard, -1).map_err(|_| self.mismatch(T::EXPECTED, found))
    }

    #[must_use]
    pub fn object_type(&self) -> ObjectType {
        self.value.object_type(self.session.vm_ref().heap())
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self.value, Value::Null)
    }

    /// Stores `self[key] = value`, creating the slot when it does not exist.
    pub fn set_field(&self, key: impl Into<Key>, value: impl IntoVm) -> Result<()> {
        self.store(key.into(), &value, true)
    }

    /// Stores `self[key] = value`; the slot must already exist.
    pub fn update_field(&self, key: impl Into<Key>, value: impl IntoVm) -> Result<()> {
        self.store(key.into(), &value, false)
    }

    fn store(&self, key: Key, value: &dyn IntoVm, create: bool) -> Result<()> {
        let mut vm = self.session.vm_mut();
        let found = self.value.object_type(vm.heap());
        if !matches!(found, ObjectType::Table | ObjectType::Array) {
            return Err(self.mismatch("table", found));
        }
        let mut guard = StackGuard::new(&mut vm);
        self.push(&mut guard);
        key.push(&mut guard);
        value.push(&mut guard);
        let stored = if create { guard.new_slot() } else { guard.set() };
        stored.map_err(|_| Error::MissingKey {
            parent: self.name(),
            key,
        })
    }

    /// Number of entries in a table, array or blob, or bytes in a string.
    pub fn len(&self) -> Result<usize> {
        let vm = self.session.vm_ref();
        vm.size_of(self.value)
            .ok_or_else(|| self.mismatch("container", self.value.object_type(vm.heap())))
    }

    /// True when [`Handle::len`] is zero.
    pub fn is_empty(&self) -> Result<bool> {
        self.len().map(|len| len == 0)
    }

    /// Keys of a table in insertion order, or the indices of an array.
    ///
    /// Boolean and float table keys are reported as fields holding their
    /// printed form.
    pub fn keys(&self) -> Result<Vec<Key>> {
        let vm = self.session.vm_ref();
        let Value::Ref(id) = self.value else {
            return Err(self.mismatch("table", self.value.object_type(vm.heap())));
        };
        match vm.heap().get(id) {
            HeapData::Table(table) => Ok(table
                .keys()
                .map(|key| match key {
                    TableKey::Int(i) => Key::Index(*i),
                    TableKey::Str(s) => Key::Field(s.clone()),
                    other => Key::Field(other.to_string()),
                })
                .collect()),
            HeapData::Array(items) => Ok((0..items.len()).map(Key::from).collect()),
            other => Err(self.mismatch("table", other.object_type())),
        }
    }

    /// Calls the value with `args` and reads its result as `R`.
    ///
    /// Use `R = ()` to ignore the result.
    ///
    /// ```
    /// use burrow::Session;
    ///
    /// let mut session = Session::new();
    /// session.open(256);
    /// session.run_source("setup", "def area(w, h):\n    return w * h\n").unwrap();
    ///
    /// let area = session.get("area").unwrap();
    /// assert_eq!(area.call::<i64>(&[&3, &4]).unwrap(), 12);
    /// ```
    pub fn call<R: FromVm>(&self, args: &[&dyn IntoVm]) -> Result<R> {
        let mut vm = self.session.vm_mut();
        let found = self.value.object_type(vm.heap());
        if !matches!(found, ObjectType::Closure | ObjectType::NativeClosure) {
            return Err(self.mismatch("closure", found));
        }
        let mut guard = StackGuard::new(&mut vm);
        self.push(&mut guard);
        for arg in args {
            arg.push(&mut guard);
        }
        guard
            .call(args.len())
            .map_err(|err| Error::from_call(&self.path, err))?;

        let result = guard.get_type(-1).map_err(|err| Error::from_call(&self.path, err))?;
        let mismatch = || Error::TypeMismatch {
            name: format!("{}()", self.name()),
            expected: R::EXPECTED,
            found: result,
        };
        if !R::matches(result) {
            return Err(mismatch());
        }
        R::read(&guard, -1).map_err(|_| mismatch())
    }

    /// Display name: the key this handle was resolved with.
    #[must_use]
    pub fn name(&self) -> String {
        self.key.to_string()
    }

    /// Full path from the origin, e.g. `config.window.size[2]`.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Display name of the container this handle was resolved from
    /// (`"root"` for globals, `"stack"` for stack slots).
    #[must_use]
    pub fn parent_name(&self) -> &str {
        &self.parent_name
    }

    #[must_use]
    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Current reference count of a heap value, `None` for immediates.
    #[must_use]
    pub fn ref_count(&self) -> Option<usize> {
        self.session.vm_ref().refcount(self.value)
    }

    /// Path of a child resolved with `key`.
    pub(crate) fn child_path(&self, key: &Key) -> String {
        match key {
            Key::Field(name) => format!("{}.{name}", self.path),
            Key::Index(i) => format!("{}[{i}]", self.path),
        }
    }

    fn mismatch(&self, expected: &'static str, found: ObjectType) -> Error {
        Error::TypeMismatch {
            name: self.name(),
            expected,
            found,
        }
    }
}

/// Pushes another reference to the handle's value.
///
/// # Panics
/// Panics when the handle belongs to a different VM than `vm`.
impl IntoVm for Handle<'_> {
    fn push(&self, vm: &mut Vm) {
        assert_eq!(vm.id(), self.vm_id, "handle `{}` belongs to a different VM", self.path);
        let value = self.value.retain(vm.heap());
        vm.push_value(value);
    }
}

impl Clone for Handle<'_> {
    fn clone(&self) -> Self {
        self.session.vm_mut().add_ref(self.value);
        Self {
            session: self.session,
            vm_id: self.vm_id,
            value: self.value,
            key: self.key.clone(),
            parent_name: self.parent_name.clone(),
            path: self.path.clone(),
            origin: self.origin,
        }
    }
}

impl Drop for Handle<'_> {
    fn drop(&mut self) {
        self.session.release(self.vm_id, self.value);
    }
}

impl fmt::Debug for Handle<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("path", &self.path)
            .field("key", &self.key)
            .field("parent_name", &self.parent_name)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}
