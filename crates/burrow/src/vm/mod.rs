//! The stack-based VM and its native calling convention.
//!
//! Every value transfer between the host and the VM goes through the value
//! stack. Stack indices follow one convention everywhere: a positive index is
//! 1-based from the bottom of the current frame, a negative index counts back
//! from the top (`-1` is the top value).

mod error;
mod interp;
mod ops;

use std::{
    fmt, fs,
    path::Path,
    rc::Rc,
    sync::atomic::{AtomicU64, Ordering},
    time::Instant,
};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

pub use error::{NATIVE_FILE, StackFrame, VmError, VmResult};

use crate::{
    bytecode,
    config::DEFAULT_TAG,
    heap::{Heap, HeapData, HeapId, HeapStats, NativeClosure, Table},
    io::{PrintWriter, StdPrint},
    stdlib,
    tracer::{NoopTracer, VmTracer},
    value::{Number, ObjectType, TableKey, UserPointer, Value},
};

/// Signature of a host function callable from scripts.
///
/// Arguments occupy stack indices `1..=vm.get_top()`. The function pushes its
/// result (if any) and returns how many values it left on top: 0 or 1.
pub type NativeFn = fn(&mut Vm) -> VmResult<usize>;

/// Recommended maximum call depth for scripts if not otherwise specified.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 200;

static NEXT_VM_ID: AtomicU64 = AtomicU64::new(1);

/// A VM instance: heap, value stack, root table and installed sinks.
pub struct Vm {
    /// Distinguishes VM instances so values are never mixed between them.
    id: u64,
    heap: Heap,
    stack: Vec<Value>,
    /// The global table; owns one reference for the VM's lifetime.
    root: HeapId,
    /// Bottom of the current native frame. Positive stack indices start here.
    frame_base: usize,
    call_depth: usize,
    max_call_depth: usize,
    print: Box<dyn PrintWriter>,
    tracer: Box<dyn VmTracer>,
    error_handlers: bool,
    debug_info: bool,
    rng: ChaCha8Rng,
    started: Instant,
}

impl fmt::Debug for Vm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vm")
            .field("stack_len", &self.stack.len())
            .field("frame_base", &self.frame_base)
            .field("call_depth", &self.call_depth)
            .field("debug_info", &self.debug_info)
            .field("error_handlers", &self.error_handlers)
            .finish_non_exhaustive()
    }
}

impl Vm {
    /// Creates a VM whose value stack starts with room for `stack_size` values.
    ///
    /// Only the base library (`print`, `len`, `type`, ...) is installed; the
    /// optional libraries are added with [`Vm::register_lib`].
    #[must_use]
    pub fn new(stack_size: usize) -> Self {
        let mut heap = Heap::new();
        let root = heap.allocate(HeapData::Table(Table::default()));
        let mut vm = Self {
            id: NEXT_VM_ID.fetch_add(1, Ordering::Relaxed),
            heap,
            stack: Vec::with_capacity(stack_size),
            root,
            frame_base: 0,
            call_depth: 0,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            print: Box::new(StdPrint::new(DEFAULT_TAG)),
            tracer: Box::new(NoopTracer),
            error_handlers: false,
            debug_info: false,
            rng: ChaCha8Rng::from_entropy(),
            started: Instant::now(),
        };
        stdlib::install_base(&mut vm);
        vm
    }

    // ------------------------------------------------------------------
    // configuration
    // ------------------------------------------------------------------

    pub fn register_lib(&mut self, lib: stdlib::StdLib) {
        stdlib::install(self, lib);
    }

    pub fn set_print_writer(&mut self, writer: Box<dyn PrintWriter>) {
        self.print = writer;
    }

    pub fn set_tracer(&mut self, tracer: Box<dyn VmTracer>) {
        self.tracer = tracer;
    }

    /// Enables the default runtime and compile error handlers, which report
    /// failures to the error sink.
    pub fn set_error_handlers(&mut self, enabled: bool) {
        self.error_handlers = enabled;
    }

    /// Records source lines in code compiled from now on.
    pub fn enable_debug_info(&mut self, enabled: bool) {
        self.debug_info = enabled;
    }

    pub fn set_max_call_depth(&mut self, depth: usize) {
        self.max_call_depth = depth;
    }

    pub fn seed_rng(&mut self, seed: u64) {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
    }

    // ------------------------------------------------------------------
    // stack
    // ------------------------------------------------------------------

    /// Number of values in the current frame.
    #[must_use]
    pub fn get_top(&self) -> usize {
        self.stack.len() - self.frame_base
    }

    /// Grows the frame with nulls or shrinks it, releasing dropped values.
    pub fn set_top(&mut self, top: usize) {
        let len = self.frame_base + top;
        if len < self.stack.len() {
            self.truncate_stack(len);
        } else {
            self.stack.resize(len, Value::Null);
        }
    }

    /// Pops `n` values, never reaching below the current frame.
    pub fn pop(&mut self, n: usize) {
        let len = self.stack.len().saturating_sub(n).max(self.frame_base);
        self.truncate_stack(len);
    }

    pub fn push_root_table(&mut self) {
        self.push_value(Value::Ref(self.root).retain(&self.heap));
    }

    pub fn push_null(&mut self) {
        self.stack.push(Value::Null);
    }

    pub fn push_bool(&mut self, b: bool) {
        self.stack.push(Value::Bool(b));
    }

    pub fn push_integer(&mut self, i: i64) {
        self.stack.push(Value::Integer(i));
    }

    pub fn push_float(&mut self, f: f64) {
        self.stack.push(Value::Float(f));
    }

    pub fn push_string(&mut self, s: &str) {
        let id = self.heap.allocate(HeapData::Str(s.to_owned()));
        self.stack.push(Value::Ref(id));
    }

    pub fn push_user_pointer(&mut self, p: UserPointer) {
        self.stack.push(Value::UserPointer(p));
    }

    pub fn new_table(&mut self) {
        let id = self.heap.allocate(HeapData::Table(Table::default()));
        self.stack.push(Value::Ref(id));
    }

    /// Pushes an array of `size` nulls.
    pub fn new_array(&mut self, size: usize) {
        let id = self.heap.allocate(HeapData::Array(vec![Value::Null; size]));
        self.stack.push(Value::Ref(id));
    }

    /// Pushes a host function as a native closure.
    pub fn push_native(&mut self, name: &str, func: NativeFn) {
        self.push_native_with_arity(name, func, None);
    }

    pub(crate) fn push_native_with_arity(&mut self, name: &str, func: NativeFn, arity: Option<usize>) {
        let id = self.heap.allocate(HeapData::Native(NativeClosure {
            name: name.to_owned(),
            func,
            arity,
        }));
        self.stack.push(Value::Ref(id));
    }

    /// Pushes another reference to the value at `idx`.
    pub fn push_copy(&mut self, idx: isize) -> VmResult<()> {
        let value = self.value_at(idx)?.retain(&self.heap);
        self.stack.push(value);
        Ok(())
    }

    // ------------------------------------------------------------------
    // reading values
    // ------------------------------------------------------------------

    pub fn get_type(&self, idx: isize) -> VmResult<ObjectType> {
        Ok(self.value_at(idx)?.object_type(&self.heap))
    }

    /// Reads a number as an integer; floats are truncated.
    pub fn get_integer(&self, idx: isize) -> VmResult<i64> {
        let value = self.value_at(idx)?;
        value
            .as_number()
            .map(Number::to_i64)
            .ok_or_else(|| self.wrong_type(value, ObjectType::Integer))
    }

    /// Reads a number as a float; integers are widened.
    pub fn get_float(&self, idx: isize) -> VmResult<f64> {
        let value = self.value_at(idx)?;
        value
            .as_number()
            .map(Number::to_f64)
            .ok_or_else(|| self.wrong_type(value, ObjectType::Float))
    }

    pub fn get_bool(&self, idx: isize) -> VmResult<bool> {
        match self.value_at(idx)? {
            Value::Bool(b) => Ok(b),
            other => Err(self.wrong_type(other, ObjectType::Bool)),
        }
    }

    pub fn get_string(&self, idx: isize) -> VmResult<&str> {
        let value = self.value_at(idx)?;
        value
            .as_str(&self.heap)
            .ok_or_else(|| self.wrong_type(value, ObjectType::String))
    }

    pub fn get_user_pointer(&self, idx: isize) -> VmResult<UserPointer> {
        match self.value_at(idx)? {
            Value::UserPointer(p) => Ok(p),
            other => Err(self.wrong_type(other, ObjectType::UserPointer)),
        }
    }

    /// Renders any value the way `tostring` does.
    pub fn to_display_string(&self, idx: isize) -> VmResult<String> {
        Ok(self.value_at(idx)?.to_display(&self.heap).into_owned())
    }

    /// Length of a table, array, string or blob.
    pub fn get_size(&self, idx: isize) -> VmResult<usize> {
        let value = self.value_at(idx)?;
        self.size_of(value)
            .ok_or_else(|| VmError::runtime(format!("'{}' has no length", value.object_type(&self.heap))))
    }

    // ------------------------------------------------------------------
    // slots
    // ------------------------------------------------------------------

    /// Pops a key and a container and pushes `container[key]`.
    ///
    /// On failure both operands are still popped and nothing is pushed.
    pub fn get(&mut self) -> VmResult<()> {
        let (container, key) = self.pop_two()?;
        let result = self.get_field(container, key);
        key.drop_with_heap(&mut self.heap);
        container.drop_with_heap(&mut self.heap);
        self.stack.push(result?);
        Ok(())
    }

    /// Pops a value, a key and a container and stores `container[key] = value`,
    /// creating the slot if needed.
    pub fn new_slot(&mut self) -> VmResult<()> {
        self.store(true)
    }

    /// Like [`Vm::new_slot`] but fails when the slot does not already exist.
    pub fn set(&mut self) -> VmResult<()> {
        self.store(false)
    }

    /// Pops a key and a container and removes `container[key]`.
    pub fn delete_slot(&mut self) -> VmResult<()> {
        let (container, key) = self.pop_two()?;
        let result = self.delete_field(container, key);
        key.drop_with_heap(&mut self.heap);
        container.drop_with_heap(&mut self.heap);
        result
    }

    fn store(&mut self, create: bool) -> VmResult<()> {
        let value = self.pop_value()?;
        let (container, key) = match self.pop_two() {
            Ok(operands) => operands,
            Err(err) => {
                value.drop_with_heap(&mut self.heap);
                return Err(err);
            }
        };
        let result = self.set_field(container, key, value, create);
        key.drop_with_heap(&mut self.heap);
        container.drop_with_heap(&mut self.heap);
        result
    }

    /// Binds `func` under `name` in the container on top of the stack.
    ///
    /// The container stays on the stack.
    pub fn register_function(&mut self, name: &str, func: NativeFn) -> VmResult<()> {
        self.push_copy(-1)?;
        self.push_string(name);
        self.push_native(name, func);
        self.new_slot()
    }

    // ------------------------------------------------------------------
    // running code
    // ------------------------------------------------------------------

    /// Pops a callee and `nargs` arguments above it, calls it, and pushes the result
    /// (`null` when the callee returns nothing).
    ///
    /// On failure the callee and arguments are popped and nothing is pushed.
    pub fn call(&mut self, nargs: usize) -> VmResult<()> {
        if self.get_top() < nargs + 1 {
            return Err(VmError::runtime("not enough values on the stack for call"));
        }
        let callee_pos = self.stack.len() - nargs - 1;
        let result = self.call_value(callee_pos, nargs);
        let result = self.report_if_outermost(result)?;
        self.stack.push(result);
        Ok(())
    }

    /// Compiles `source` and pushes the resulting closure without running it.
    pub fn compile_string(&mut self, source: &str, name: &str) -> VmResult<()> {
        let code = bytecode::compile(source, name, self.debug_info).map_err(|e| VmError::Compile {
            file: name.to_owned(),
            line: e.line,
            column: e.column,
            message: e.message,
        });
        match code {
            Ok(code) => {
                let id = self.heap.allocate(HeapData::Closure(Rc::new(code)));
                self.stack.push(Value::Ref(id));
                Ok(())
            }
            Err(err) => {
                if self.error_handlers {
                    self.report_error(&err);
                }
                Err(err)
            }
        }
    }

    /// Reads and compiles a script file, pushing the resulting closure.
    pub fn compile_file(&mut self, path: &Path) -> VmResult<()> {
        let source = read_script(path)?;
        self.compile_string(&source, &path.display().to_string())
    }

    /// Compiles and runs `source` with the root table as its environment.
    ///
    /// The stack height is unchanged afterwards, on success and on failure.
    pub fn do_string(&mut self, source: &str, name: &str) -> VmResult<()> {
        self.compile_string(source, name)?;
        self.call(0)?;
        self.pop(1);
        Ok(())
    }

    /// Reads, compiles and runs a script file.
    pub fn do_file(&mut self, path: &Path) -> VmResult<()> {
        let source = read_script(path)?;
        self.do_string(&source, &path.display().to_string())
    }

    // ------------------------------------------------------------------
    // diagnostics
    // ------------------------------------------------------------------

    #[must_use]
    pub fn heap_stats(&self) -> HeapStats {
        self.heap.stats()
    }

    /// Writes text to the print sink.
    pub fn print_text(&mut self, text: &str) {
        self.print.print(text);
    }

    /// Writes text to the error sink.
    pub fn error_text(&mut self, text: &str) {
        self.print.error(text);
    }

    // ------------------------------------------------------------------
    // crate-internal helpers
    // ------------------------------------------------------------------

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn heap(&self) -> &Heap {
        &self.heap
    }

    pub(crate) fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub(crate) fn rng(&mut self) -> &mut ChaCha8Rng {
        &mut self.rng
    }

    pub(crate) fn started(&self) -> Instant {
        self.started
    }

    /// Absolute stack position for a frame-relative index.
    fn absolute(&self, idx: isize) -> Option<usize> {
        let len = self.stack.len();
        let pos = match idx {
            0 => return None,
            1.. => self.frame_base + idx.unsigned_abs() - 1,
            _ => len.checked_sub(idx.unsigned_abs())?,
        };
        (pos >= self.frame_base && pos < len).then_some(pos)
    }

    /// The value at `idx` without touching its reference count.
    pub(crate) fn stack_value(&self, idx: isize) -> Option<Value> {
        self.absolute(idx).map(|pos| self.stack[pos])
    }

    fn value_at(&self, idx: isize) -> VmResult<Value> {
        self.stack_value(idx)
            .ok_or_else(|| VmError::runtime(format!("invalid stack index {idx}")))
    }

    /// Pushes a value whose reference the caller already owns.
    pub(crate) fn push_value(&mut self, value: Value) {
        self.stack.push(value);
    }

    /// Pops the top value, transferring its reference to the caller.
    pub(crate) fn pop_value(&mut self) -> VmResult<Value> {
        if self.stack.len() <= self.frame_base {
            return Err(VmError::runtime("stack underflow"));
        }
        self.stack
            .pop()
            .ok_or_else(|| VmError::runtime("stack underflow"))
    }

    /// Pops `container key` (key on top).
    fn pop_two(&mut self) -> VmResult<(Value, Value)> {
        if self.get_top() < 2 {
            let dropped = self.get_top();
            self.pop(dropped);
            return Err(VmError::runtime("stack underflow"));
        }
        let key = self.pop_value()?;
        let container = self.pop_value()?;
        Ok((container, key))
    }

    pub(crate) fn raw_top(&self) -> usize {
        self.stack.len()
    }

    /// Truncates the whole stack back to `len`, releasing what was above it.
    pub(crate) fn restore_top(&mut self, len: usize) {
        self.truncate_stack(len);
    }

    fn truncate_stack(&mut self, len: usize) {
        while self.stack.len() > len {
            if let Some(value) = self.stack.pop() {
                value.drop_with_heap(&mut self.heap);
            }
        }
    }

    /// Acquires a host-side reference to `value`.
    pub(crate) fn add_ref(&mut self, value: Value) {
        if let Value::Ref(id) = value {
            self.heap.inc_ref(id);
            self.tracer.on_add_ref(id.index(), self.heap.refcount(id));
        }
    }

    /// Releases a host-side reference to `value`.
    pub(crate) fn release(&mut self, value: Value) {
        if let Value::Ref(id) = value {
            let remaining = self.heap.refcount(id) - 1;
            self.heap.dec_ref(id);
            self.tracer.on_release(id.index(), remaining);
        }
    }

    pub(crate) fn refcount(&self, value: Value) -> Option<usize> {
        match value {
            Value::Ref(id) => Some(self.heap.refcount(id)),
            _ => None,
        }
    }

    pub(crate) fn size_of(&self, value: Value) -> Option<usize> {
        let Value::Ref(id) = value else {
            return None;
        };
        match self.heap.get(id) {
            HeapData::Str(s) => Some(s.len()),
            HeapData::Table(t) => Some(t.len()),
            HeapData::Array(a) => Some(a.len()),
            HeapData::Blob(b) => Some(b.len()),
            _ => None,
        }
    }

    /// Binds a value in the root table, taking over the caller's reference.
    pub(crate) fn set_global(&mut self, name: &str, value: Value) {
        let HeapData::Table(root) = self.heap.get_mut(self.root) else {
            unreachable!("root is always a table");
        };
        if let Some(old) = root.insert(TableKey::Str(name.to_owned()), value) {
            old.drop_with_heap(&mut self.heap);
        }
    }

    pub(crate) fn set_global_native(&mut self, name: &str, func: NativeFn, arity: Option<usize>) {
        let id = self.heap.allocate(HeapData::Native(NativeClosure {
            name: name.to_owned(),
            func,
            arity,
        }));
        self.set_global(name, Value::Ref(id));
    }

    fn wrong_type(&self, value: Value, expected: ObjectType) -> VmError {
        VmError::runtime(format!(
            "wrong argument type, expected '{expected}' got '{}'",
            value.object_type(&self.heap)
        ))
    }

    /// Runs the error hooks when an error is about to leave the outermost call.
    fn report_if_outermost<T>(&mut self, result: VmResult<T>) -> VmResult<T> {
        if let Err(err) = &result
            && self.call_depth == 0
        {
            self.tracer.on_error(&err.message());
            if self.error_handlers {
                self.report_error(err);
            }
        }
        result
    }

    fn report_error(&mut self, err: &VmError) {
        let text = match err {
            VmError::Runtime { message, traceback } => {
                let mut text = format!("\nAN ERROR HAS OCCURRED [{message}]\n\nCALLSTACK\n");
                for frame in traceback {
                    let line = frame.line.map_or(-1, i64::from);
                    text.push_str(&format!("*FUNCTION [{}()] {} line [{line}]\n", frame.function, frame.file));
                }
                text
            }
            VmError::Compile { .. } => format!("{err}\n"),
            VmError::Io { .. } | VmError::BadCall { .. } => format!("\nAN ERROR HAS OCCURRED [{err}]\n"),
        };
        self.print.error(&text);
    }
}

fn read_script(path: &Path) -> VmResult<String> {
    fs::read_to_string(path).map_err(|source| VmError::Io {
        path: path.to_path_buf(),
        source,
    })
}
