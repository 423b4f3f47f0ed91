use std::{cell::Cell, collections::BTreeMap, fmt, rc::Rc};

use indexmap::IndexMap;

use crate::{
    bytecode::Code,
    value::{ObjectType, TableKey, Value},
    vm::NativeFn,
};

/// Insertion-ordered table storage.
pub(crate) type Table = IndexMap<TableKey, Value, ahash::RandomState>;

/// Snapshot of heap state at a point in time.
///
/// The `objects_by_type` map uses `BTreeMap` for deterministic iteration order,
/// making snapshots suitable for display and comparison without sort overhead.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct HeapStats {
    /// Total number of live objects on the heap.
    pub live_objects: usize,
    /// Number of free (recycled) slots available for reuse.
    pub free_slots: usize,
    /// Total heap capacity (live + free).
    pub total_slots: usize,
    /// Breakdown of live objects by variant name ("Str", "Table", ...).
    pub objects_by_type: BTreeMap<&'static str, usize>,
}

/// Unique identifier for values stored inside the heap arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct HeapId(usize);

impl HeapId {
    /// Returns the raw index value.
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// A host function exposed to scripts.
#[derive(Clone)]
pub(crate) struct NativeClosure {
    pub name: String,
    pub func: NativeFn,
    /// Exact number of arguments required, when checked.
    pub arity: Option<usize>,
}

impl fmt::Debug for NativeClosure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeClosure")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

/// Cursor state for `for` loops.
///
/// Container variants own one reference to their target.
#[derive(Debug, Clone, Copy)]
pub(crate) enum IterState {
    Array { target: HeapId, pos: usize },
    Table { target: HeapId, pos: usize },
    Blob { target: HeapId, pos: usize },
    Str { target: HeapId, pos: usize },
    Range { next: i64, stop: i64, step: i64 },
}

/// Every runtime value that must live in the arena.
#[derive(Debug, strum::IntoStaticStr)]
pub(crate) enum HeapData {
    Str(String),
    Table(Table),
    Array(Vec<Value>),
    Blob(Vec<u8>),
    Closure(Rc<Code>),
    Native(NativeClosure),
    Iter(IterState),
}

impl HeapData {
    pub fn object_type(&self) -> ObjectType {
        match self {
            Self::Str(_) => ObjectType::String,
            Self::Table(_) => ObjectType::Table,
            Self::Array(_) => ObjectType::Array,
            Self::Blob(_) => ObjectType::Blob,
            Self::Closure(_) => ObjectType::Closure,
            Self::Native(_) => ObjectType::NativeClosure,
            Self::Iter(_) => ObjectType::Iterator,
        }
    }

    /// Pushes the IDs of every heap value this data holds a reference to.
    fn dec_ref_ids(self, ids: &mut Vec<HeapId>) {
        let push_value = |ids: &mut Vec<HeapId>, value: Value| {
            if let Value::Ref(id) = value {
                ids.push(id);
            }
        };
        match self {
            Self::Table(table) => {
                for value in table.into_values() {
                    push_value(ids, value);
                }
            }
            Self::Array(items) => {
                for value in items {
                    push_value(ids, value);
                }
            }
            Self::Iter(
                IterState::Array { target, .. }
                | IterState::Table { target, .. }
                | IterState::Blob { target, .. }
                | IterState::Str { target, .. },
            ) => ids.push(target),
            Self::Iter(IterState::Range { .. })
            | Self::Str(_)
            | Self::Blob(_)
            | Self::Closure(_)
            | Self::Native(_) => {}
        }
    }
}

/// A single entry inside the heap arena.
#[derive(Debug)]
struct HeapValue {
    refcount: Cell<usize>,
    data: HeapData,
}

/// Reference-counted arena that backs all heap-only runtime values.
///
/// Uses a free list to reuse slots from freed values, keeping memory usage
/// constant for long-running loops that repeatedly allocate and free values.
/// When a value is freed via `dec_ref`, its slot ID is added to the free list.
/// New allocations pop from the free list when available, otherwise append.
///
/// There is no cycle collector: a table that (indirectly) contains itself is
/// reclaimed only when the whole heap is dropped with its VM.
#[derive(Debug, Default)]
pub(crate) struct Heap {
    entries: Vec<Option<HeapValue>>,
    /// IDs of freed slots available for reuse. Populated by `dec_ref`, consumed by `allocate`.
    free_list: Vec<HeapId>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `data` with a reference count of one, owned by the caller.
    pub fn allocate(&mut self, data: HeapData) -> HeapId {
        let new_entry = HeapValue {
            refcount: Cell::new(1),
            data,
        };
        if let Some(id) = self.free_list.pop() {
            self.entries[id.index()] = Some(new_entry);
            id
        } else {
            let id = HeapId(self.entries.len());
            self.entries.push(Some(new_entry));
            id
        }
    }

    /// Increments the reference count for an existing heap entry.
    ///
    /// Uses interior mutability for the refcount, so only shared access to the heap
    /// is required.
    ///
    /// # Panics
    /// Panics if the value ID is invalid or the value has already been freed.
    pub fn inc_ref(&self, id: HeapId) {
        let entry = self.entry(id);
        entry.refcount.set(entry.refcount.get() + 1);
    }

    /// Decrements the reference count and frees the value (plus children) once it hits zero.
    ///
    /// # Panics
    /// Panics if the value ID is invalid or the value has already been freed.
    pub fn dec_ref(&mut self, id: HeapId) {
        let slot = self.entries.get_mut(id.index()).expect("Heap::dec_ref: slot missing");
        let entry = slot.as_ref().expect("Heap::dec_ref: object already freed");
        let count = entry.refcount.get();
        if count > 1 {
            entry.refcount.set(count - 1);
            return;
        }
        let value = slot.take().expect("Heap::dec_ref: object already freed");
        self.free_list.push(id);

        let mut child_ids = Vec::new();
        value.data.dec_ref_ids(&mut child_ids);
        for child_id in child_ids {
            self.dec_ref(child_id);
        }
    }

    /// Returns the current refcount for a live heap value.
    ///
    /// # Panics
    /// Panics if the value has already been freed.
    pub fn refcount(&self, id: HeapId) -> usize {
        self.entry(id).refcount.get()
    }

    /// # Panics
    /// Panics if the value ID is invalid or the value has already been freed.
    #[must_use]
    pub fn get(&self, id: HeapId) -> &HeapData {
        &self.entry(id).data
    }

    /// # Panics
    /// Panics if the value ID is invalid or the value has already been freed.
    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        &mut self
            .entries
            .get_mut(id.index())
            .expect("Heap::get_mut: slot missing")
            .as_mut()
            .expect("Heap::get_mut: object already freed")
            .data
    }

    fn entry(&self, id: HeapId) -> &HeapValue {
        self.entries
            .get(id.index())
            .expect("Heap: slot missing")
            .as_ref()
            .expect("Heap: object already freed")
    }

    /// Takes a snapshot of the current arena occupancy.
    pub fn stats(&self) -> HeapStats {
        let mut objects_by_type = BTreeMap::new();
        let mut live_objects = 0;
        for entry in self.entries.iter().flatten() {
            live_objects += 1;
            let name: &'static str = (&entry.data).into();
            *objects_by_type.entry(name).or_insert(0) += 1;
        }
        HeapStats {
            live_objects,
            free_slots: self.free_list.len(),
            total_slots: self.entries.len(),
            objects_by_type,
        }
    }
}
