use std::ops::{Deref, DerefMut};

use crate::vm::Vm;

/// Scoped stack discipline: remembers the stack height on creation and
/// restores it when dropped, releasing anything pushed in between.
///
/// Dereferences to the [`Vm`], so primitives are called through the guard:
///
/// ```
/// use burrow::{StackGuard, Vm};
///
/// let mut vm = Vm::new(64);
/// {
///     let mut guard = StackGuard::new(&mut vm);
///     guard.push_root_table();
///     guard.push_string("len");
///     guard.get().unwrap();
/// }
/// assert_eq!(vm.get_top(), 0);
/// ```
#[derive(Debug)]
pub struct StackGuard<'vm> {
    vm: &'vm mut Vm,
    height: usize,
}

impl<'vm> StackGuard<'vm> {
    pub fn new(vm: &'vm mut Vm) -> Self {
        let height = vm.raw_top();
        Self { vm, height }
    }

    /// The height the stack is restored to on drop.
    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }
}

impl Deref for StackGuard<'_> {
    type Target = Vm;

    fn deref(&self) -> &Vm {
        self.vm
    }
}

impl DerefMut for StackGuard<'_> {
    fn deref_mut(&mut self) -> &mut Vm {
        self.vm
    }
}

impl Drop for StackGuard<'_> {
    fn drop(&mut self) {
        self.vm.restore_top(self.height);
    }
}
