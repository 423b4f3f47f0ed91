//! The session owns one VM and hands out [`Handle`]s into it.

use std::{
    cell::{Ref, RefCell, RefMut},
    path::Path,
};

use crate::{
    config::{DEFAULT_STACK_SIZE, SessionConfig},
    convert::IntoVm,
    error::{Error, Key, Result},
    handle::{Handle, Origin},
    heap::HeapStats,
    stack_guard::StackGuard,
    value::{ObjectType, Value},
    vm::{NativeFn, Vm},
};

/// Owner of one VM instance, valid between [`Session::open`] and [`Session::close`].
///
/// Handles borrow the session, so the VM cannot be closed or replaced while
/// any handle is alive.
///
/// # Panics
/// Every method other than `new`, `open`, `open_with`, `close`, `is_open`
/// and `stack_size` panics when the session is not open.
///
/// # Example
/// ```
/// use burrow::Session;
///
/// let mut session = Session::new();
/// session.open(1024);
/// session
///     .run_source("config", "config = {'window': {'size': [640, 480]}}")
///     .unwrap();
///
/// let height = session.get("config").unwrap().get("window").unwrap().get("size").unwrap().get(1).unwrap();
/// assert_eq!(height.extract::<i64>().unwrap(), 480);
/// assert_eq!(height.path(), "config.window.size[1]");
/// ```
#[derive(Debug)]
pub struct Session {
    vm: RefCell<Option<Vm>>,
    /// Releases from handles dropped while the VM was borrowed, tagged with the VM id.
    deferred: RefCell<Vec<(u64, Value)>>,
    stack_size: usize,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Creates a session with no VM; call [`Session::open`] before use.
    #[must_use]
    pub fn new() -> Self {
        Self {
            vm: RefCell::new(None),
            deferred: RefCell::new(Vec::new()),
            stack_size: DEFAULT_STACK_SIZE,
        }
    }

    /// Opens a VM with every standard library, the default tagged print and
    /// error sinks, the default error handlers and debug info.
    ///
    /// An already open VM is closed first.
    pub fn open(&mut self, stack_size: usize) {
        self.open_with(SessionConfig::new().stack_size(stack_size));
    }

    pub fn open_with(&mut self, config: SessionConfig) {
        self.close();
        self.stack_size = config.get_stack_size();
        *self.vm.get_mut() = Some(config.build_vm());
    }

    /// Tears down the VM. Does nothing when the session is not open.
    pub fn close(&mut self) {
        self.vm.get_mut().take();
        self.deferred.get_mut().clear();
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.vm.borrow().is_some()
    }

    /// Initial stack capacity of the current (or last) VM.
    #[must_use]
    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    /// Resolves a global: `root[key]`.
    pub fn get(&self, key: impl Into<Key>) -> Result<Handle<'_>> {
        self.resolve(None, key.into())
    }

    /// A handle to the value at stack index `idx`.
    ///
    /// Positive indices count from the bottom (1-based), negative ones from the top.
    pub fn stack_slot(&self, idx: isize) -> Result<Handle<'_>> {
        let mut vm = self.vm_mut();
        let key = Key::Index(i64::try_from(idx).unwrap_or(i64::MAX));
        let Some(value) = vm.stack_value(idx) else {
            return Err(Error::MissingKey {
                parent: "stack".to_owned(),
                key,
            });
        };
        vm.add_ref(value);
        Ok(Handle::new(
            self,
            &vm,
            value,
            key,
            "stack".to_owned(),
            format!("stack[{idx}]"),
            Origin::StackSlot,
        ))
    }

    /// Binds an empty table as the global `name`, replacing any existing value.
    pub fn new_table(&self, name: &str) -> Result<Handle<'_>> {
        {
            let mut vm = self.vm_mut();
            let mut guard = StackGuard::new(&mut vm);
            guard.push_root_table();
            guard.push_string(name);
            guard.new_table();
            guard
                .new_slot()
                .map_err(|err| Error::from_call(name, err))?;
        }
        self.get(name)
    }

    /// Compiles and runs a script file with the global table as its environment.
    pub fn run_script(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut vm = self.vm_mut();
        let mut guard = StackGuard::new(&mut vm);
        guard.do_file(path).map_err(|source| Error::ScriptFailure {
            path: path.display().to_string(),
            source,
        })
    }

    /// Like [`Session::run_script`] for source held in memory; `name` is used
    /// as the file name in errors.
    pub fn run_source(&self, name: &str, source: &str) -> Result<()> {
        let mut vm = self.vm_mut();
        let mut guard = StackGuard::new(&mut vm);
        guard.do_string(source, name).map_err(|source| Error::ScriptFailure {
            path: name.to_owned(),
            source,
        })
    }

    /// Binds a host function as `name` in the global table, or in the global
    /// table `table` when given.
    ///
    /// ```
    /// use burrow::{Session, Vm, VmResult};
    ///
    /// fn add(vm: &mut Vm) -> VmResult<usize> {
    ///     let sum = vm.get_integer(1)? + vm.get_integer(2)?;
    ///     vm.push_integer(sum);
    ///     Ok(1)
    /// }
    ///
    /// let mut session = Session::new();
    /// session.open(1024);
    /// session.register_function(None, "add", add).unwrap();
    /// session.run_source("calc", "result = add(2, 3)").unwrap();
    /// assert_eq!(session.get("result").unwrap().extract::<i64>().unwrap(), 5);
    /// ```
    pub fn register_function(&self, table: Option<&str>, name: &str, func: NativeFn) -> Result<()> {
        let mut vm = self.vm_mut();
        let mut guard = StackGuard::new(&mut vm);
        guard.push_root_table();
        if let Some(table) = table {
            guard.push_string(table);
            if guard.get().is_err() {
                return Err(Error::MissingKey {
                    parent: "root".to_owned(),
                    key: table.into(),
                });
            }
            let found = guard.get_type(-1).map_err(|err| Error::from_call(table, err))?;
            if found != ObjectType::Table {
                return Err(Error::TypeMismatch {
                    name: table.to_owned(),
                    expected: "table",
                    found,
                });
            }
        }
        guard
            .register_function(name, func)
            .map_err(|err| Error::from_call(name, err))
    }

    /// Current height of the VM stack.
    #[must_use]
    pub fn stack_top(&self) -> usize {
        self.vm_ref().get_top()
    }

    /// Live heap objects, for leak checks.
    #[must_use]
    pub fn heap_stats(&self) -> HeapStats {
        self.vm_ref().heap_stats()
    }

    /// Runs `f` with direct access to the VM primitives.
    ///
    /// Handles dropped inside `f` queue their release, which runs the next
    /// time the session touches the VM.
    ///
    /// # Panics
    /// Panics if `f` calls back into this session or any of its handles,
    /// since the VM is already borrowed.
    pub fn with_vm<R>(&self, f: impl FnOnce(&mut Vm) -> R) -> R {
        let mut vm = self.vm_mut();
        f(&mut *vm)
    }

    /// Resolves `parent[key]`, or `root[key]` when `parent` is `None`.
    pub(crate) fn resolve(&self, parent: Option<&Handle<'_>>, key: Key) -> Result<Handle<'_>> {
        let mut vm = self.vm_mut();
        let mut guard = StackGuard::new(&mut vm);
        match parent {
            Some(parent) => parent.push(&mut guard),
            None => guard.push_root_table(),
        }
        key.push(&mut guard);
        let parent_name = parent.map_or_else(|| "root".to_owned(), |parent| parent.name());
        if guard.get().is_err() {
            return Err(Error::MissingKey {
                parent: parent_name,
                key,
            });
        }
        let value = guard
            .stack_value(-1)
            .expect("get pushes its result on success");
        guard.add_ref(value);
        drop(guard);

        let (path, origin) = match parent {
            Some(parent) => (parent.child_path(&key), parent.origin()),
            None => (key.to_string(), Origin::RootTable),
        };
        Ok(Handle::new(self, &vm, value, key, parent_name, path, origin))
    }

    /// Releases a handle's reference if its VM is still the open one.
    ///
    /// While the VM is borrowed the release is deferred until the next borrow.
    pub(crate) fn release(&self, vm_id: u64, value: Value) {
        match self.vm.try_borrow_mut() {
            Ok(mut vm) => {
                if let Some(vm) = vm.as_mut()
                    && vm.id() == vm_id
                {
                    vm.release(value);
                }
            }
            Err(_) => self.deferred.borrow_mut().push((vm_id, value)),
        }
    }

    /// Number of releases waiting for the VM to be free again.
    #[must_use]
    pub fn deferred_releases(&self) -> usize {
        self.deferred.borrow().len()
    }

    fn flush_deferred(&self) {
        if self.deferred.borrow().is_empty() {
            return;
        }
        let Ok(mut vm) = self.vm.try_borrow_mut() else {
            return;
        };
        let pending = std::mem::take(&mut *self.deferred.borrow_mut());
        if let Some(vm) = vm.as_mut() {
            for (vm_id, value) in pending {
                if vm.id() == vm_id {
                    vm.release(value);
                }
            }
        }
    }

    pub(crate) fn vm_ref(&self) -> Ref<'_, Vm> {
        self.flush_deferred();
        Ref::map(self.vm.borrow(), |vm| vm.as_ref().expect("session is not open"))
    }

    pub(crate) fn vm_mut(&self) -> RefMut<'_, Vm> {
        self.flush_deferred();
        RefMut::map(self.vm.borrow_mut(), |vm| vm.as_mut().expect("session is not open"))
    }
}
