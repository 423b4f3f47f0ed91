//! Call dispatch and the bytecode execution loop.

use std::rc::Rc;

use smallvec::SmallVec;

use super::{NATIVE_FILE, StackFrame, Vm, VmError, VmResult};
use crate::{
    bytecode::{Code, Instr},
    heap::{HeapData, NativeClosure, Table},
    value::{TableKey, Value},
};

/// A resolved call target, detached from the heap so the call can borrow the VM.
enum Callee {
    Script(Rc<Code>),
    Native(NativeClosure),
}

impl Callee {
    fn name(&self) -> &str {
        match self {
            Self::Script(code) => &code.name,
            Self::Native(native) => &native.name,
        }
    }
}

impl Vm {
    /// Calls the value at `callee_pos` with the `argc` values above it.
    ///
    /// The stack is truncated back to `callee_pos` afterwards, on success and
    /// on failure; the result is returned as an owned reference.
    pub(crate) fn call_value(&mut self, callee_pos: usize, argc: usize) -> VmResult<Value> {
        let result = self.dispatch_call(callee_pos, argc);
        self.truncate_stack(callee_pos);
        result
    }

    fn dispatch_call(&mut self, callee_pos: usize, argc: usize) -> VmResult<Value> {
        let callee = self.stack[callee_pos];
        let target = match callee {
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::Closure(code) => Some(Callee::Script(Rc::clone(code))),
                HeapData::Native(native) => Some(Callee::Native(native.clone())),
                _ => None,
            },
            _ => None,
        };
        let Some(target) = target else {
            return Err(VmError::runtime(format!(
                "attempt to call '{}'",
                callee.object_type(&self.heap)
            )));
        };
        if self.call_depth >= self.max_call_depth {
            return Err(VmError::runtime("stack overflow"));
        }

        self.call_depth += 1;
        self.tracer.on_call(target.name(), self.call_depth);
        let base = callee_pos + 1;
        let result = match &target {
            Callee::Script(code) => self.run_closure(code, base, argc),
            Callee::Native(native) => self.run_native(native, base, argc),
        };
        self.call_depth -= 1;
        self.tracer.on_return(self.call_depth);
        result
    }

    fn run_closure(&mut self, code: &Rc<Code>, base: usize, argc: usize) -> VmResult<Value> {
        if argc != code.num_params {
            return Err(VmError::runtime(format!(
                "wrong number of parameters (expected {}, got {argc})",
                code.num_params
            )));
        }
        self.stack.resize(base + code.num_locals, Value::Null);
        self.execute(code, base)
    }

    fn run_native(&mut self, native: &NativeClosure, base: usize, argc: usize) -> VmResult<Value> {
        if let Some(arity) = native.arity
            && arity != argc
        {
            return Err(VmError::bad_call(
                &native.name,
                format!("wrong number of parameters (expected {arity}, got {argc})"),
            ));
        }
        let saved_base = std::mem::replace(&mut self.frame_base, base);
        let returned = (native.func)(self);
        self.frame_base = saved_base;

        let result = match returned {
            Ok(0) => Ok(Value::Null),
            Ok(1) if self.stack.len() > base => Ok(self.stack.pop().unwrap_or(Value::Null)),
            Ok(1) => Err(VmError::bad_call(
                &native.name,
                "returned a value but left nothing on the stack",
            )),
            Ok(n) => Err(VmError::bad_call(
                &native.name,
                format!("returned {n} values, at most 1 is supported"),
            )),
            Err(err) => Err(err),
        };
        result.map_err(|mut err| {
            err.push_frame(|| StackFrame {
                function: native.name.clone(),
                file: NATIVE_FILE.to_owned(),
                line: None,
            });
            err
        })
    }

    /// Runs `code` with its locals starting at `base` until it returns.
    fn execute(&mut self, code: &Rc<Code>, base: usize) -> VmResult<Value> {
        let mut ip = 0;
        loop {
            let Some(&instr) = code.instrs.get(ip) else {
                return Ok(Value::Null);
            };
            self.tracer.on_instruction(ip, instr.into(), self.stack.len() - base);
            ip += 1;
            match self.step(code, base, instr, &mut ip) {
                Ok(None) => {}
                Ok(Some(value)) => return Ok(value),
                Err(mut err) => {
                    let at = ip - 1;
                    err.push_frame(|| StackFrame {
                        function: code.name.clone(),
                        file: code.filename.to_string(),
                        line: code.line_at(at),
                    });
                    return Err(err);
                }
            }
        }
    }

    fn peek(&self) -> Value {
        self.stack.last().copied().unwrap_or(Value::Null)
    }

    fn root_table(&self) -> &Table {
        match self.heap.get(self.root) {
            HeapData::Table(table) => table,
            _ => unreachable!("root is always a table"),
        }
    }

    /// Executes one instruction. Returns the frame's result on `Return`.
    fn step(&mut self, code: &Code, base: usize, instr: Instr, ip: &mut usize) -> VmResult<Option<Value>> {
        match instr {
            Instr::LoadNull => self.stack.push(Value::Null),
            Instr::LoadBool(b) => self.stack.push(Value::Bool(b)),
            Instr::LoadInt(i) => self.stack.push(Value::Integer(i)),
            Instr::LoadFloat(f) => self.stack.push(Value::Float(f)),
            Instr::LoadStr(idx) => {
                let id = self.heap.allocate(HeapData::Str(code.string(idx).to_owned()));
                self.stack.push(Value::Ref(id));
            }
            Instr::LoadLocal(slot) => {
                let value = self.stack[base + usize::from(slot)].retain(&self.heap);
                self.stack.push(value);
            }
            Instr::StoreLocal(slot) => {
                let value = self.pop_value()?;
                let old = std::mem::replace(&mut self.stack[base + usize::from(slot)], value);
                old.drop_with_heap(&mut self.heap);
            }
            Instr::LoadGlobal(idx) => {
                let name = code.string(idx);
                let found = self.root_table().get(&TableKey::Str(name.to_owned())).copied();
                let Some(value) = found else {
                    return Err(VmError::runtime(format!("the index '{name}' does not exist")));
                };
                let value = value.retain(&self.heap);
                self.stack.push(value);
            }
            Instr::StoreGlobal(idx) => {
                let value = self.pop_value()?;
                self.set_global(code.string(idx), value);
            }
            Instr::GetField => {
                let key = self.pop_value()?;
                let container = self.pop_value()?;
                let result = self.get_field(container, key);
                key.drop_with_heap(&mut self.heap);
                container.drop_with_heap(&mut self.heap);
                self.stack.push(result?);
            }
            Instr::SetField => {
                let value = self.pop_value()?;
                let key = self.pop_value()?;
                let container = self.pop_value()?;
                self.store_field(container, key, value)?;
            }
            Instr::StoreField => {
                let key = self.pop_value()?;
                let container = self.pop_value()?;
                let value = self.pop_value()?;
                self.store_field(container, key, value)?;
            }
            Instr::DeleteField => {
                let key = self.pop_value()?;
                let container = self.pop_value()?;
                let result = self.delete_field(container, key);
                key.drop_with_heap(&mut self.heap);
                container.drop_with_heap(&mut self.heap);
                result?;
            }
            Instr::NewTable(count) => self.build_table(usize::from(count))?,
            Instr::NewArray(count) => {
                let start = self.stack.len() - usize::from(count);
                let items = self.stack.split_off(start);
                let id = self.heap.allocate(HeapData::Array(items));
                self.stack.push(Value::Ref(id));
            }
            Instr::Unpack(count) => self.unpack(usize::from(count))?,
            Instr::Binary(op) => {
                let b = self.pop_value()?;
                let a = self.pop_value()?;
                let result = self.binary_op(op, a, b);
                a.drop_with_heap(&mut self.heap);
                b.drop_with_heap(&mut self.heap);
                self.stack.push(result?);
            }
            Instr::Compare(op) => {
                let b = self.pop_value()?;
                let a = self.pop_value()?;
                let result = self.compare_op(op, a, b);
                a.drop_with_heap(&mut self.heap);
                b.drop_with_heap(&mut self.heap);
                self.stack.push(Value::Bool(result?));
            }
            Instr::Neg => {
                let a = self.pop_value()?;
                let result = self.negate(a);
                a.drop_with_heap(&mut self.heap);
                self.stack.push(result?);
            }
            Instr::Not => {
                let a = self.pop_value()?;
                a.drop_with_heap(&mut self.heap);
                self.stack.push(Value::Bool(!a.is_truthy()));
            }
            Instr::Invert => {
                let a = self.pop_value()?;
                let result = self.invert(a);
                a.drop_with_heap(&mut self.heap);
                self.stack.push(result?);
            }
            Instr::Jump(target) => *ip = target as usize,
            Instr::JumpIfFalse(target) => {
                let cond = self.pop_value()?;
                cond.drop_with_heap(&mut self.heap);
                if !cond.is_truthy() {
                    *ip = target as usize;
                }
            }
            Instr::JumpIfFalseOrPop(target) => {
                if self.peek().is_truthy() {
                    self.pop(1);
                } else {
                    *ip = target as usize;
                }
            }
            Instr::JumpIfTrueOrPop(target) => {
                if self.peek().is_truthy() {
                    *ip = target as usize;
                } else {
                    self.pop(1);
                }
            }
            Instr::Call(argc) => {
                let argc = usize::from(argc);
                let callee_pos = self.stack.len() - argc - 1;
                let result = self.call_value(callee_pos, argc)?;
                self.stack.push(result);
            }
            Instr::Return => return self.pop_value().map(Some),
            Instr::Pop => self.pop(1),
            Instr::Dup => {
                let top = self.peek().retain(&self.heap);
                self.stack.push(top);
            }
            Instr::DupTwo => {
                let len = self.stack.len();
                let (a, b) = (self.stack[len - 2], self.stack[len - 1]);
                self.stack.push(a.retain(&self.heap));
                self.stack.push(b.retain(&self.heap));
            }
            Instr::MakeFunction(idx) => {
                let function = Rc::clone(&code.functions[idx as usize]);
                let id = self.heap.allocate(HeapData::Closure(function));
                self.stack.push(Value::Ref(id));
            }
            Instr::GetIter => {
                let iterable = self.pop_value()?;
                let iter = self.make_iter(iterable)?;
                self.stack.push(iter);
            }
            Instr::ForIter(target) => {
                let iter = self.peek();
                if let Some(item) = self.advance_iter(iter)? {
                    self.stack.push(item);
                } else {
                    self.pop(1);
                    *ip = target as usize;
                }
            }
            Instr::Raise => {
                let value = self.pop_value()?;
                let message = value.to_display(&self.heap).into_owned();
                value.drop_with_heap(&mut self.heap);
                return Err(VmError::runtime(message));
            }
        }
        Ok(None)
    }

    /// `container[key] = value` from the interpreter: creates or overwrites.
    fn store_field(&mut self, container: Value, key: Value, value: Value) -> VmResult<()> {
        let result = self.set_field(container, key, value, true);
        key.drop_with_heap(&mut self.heap);
        container.drop_with_heap(&mut self.heap);
        result
    }

    fn build_table(&mut self, count: usize) -> VmResult<()> {
        let start = self.stack.len() - 2 * count;
        let pairs = self.stack.split_off(start);
        let mut table = Table::default();
        let mut bad_key = None;
        for pair in pairs.chunks_exact(2) {
            let (key, value) = (pair[0], pair[1]);
            match TableKey::from_value(key, &self.heap) {
                Some(k) if bad_key.is_none() => {
                    if let Some(old) = table.insert(k, value) {
                        old.drop_with_heap(&mut self.heap);
                    }
                }
                Some(_) => value.drop_with_heap(&mut self.heap),
                None => {
                    bad_key.get_or_insert(key.object_type(&self.heap));
                    value.drop_with_heap(&mut self.heap);
                }
            }
            key.drop_with_heap(&mut self.heap);
        }
        if let Some(key_type) = bad_key {
            for value in table.into_values() {
                value.drop_with_heap(&mut self.heap);
            }
            return Err(VmError::runtime(format!("'{key_type}' cannot be used as a table key")));
        }
        let id = self.heap.allocate(HeapData::Table(table));
        self.stack.push(Value::Ref(id));
        Ok(())
    }

    fn unpack(&mut self, count: usize) -> VmResult<()> {
        let array = self.pop_value()?;
        let items: Result<SmallVec<[Value; 8]>, String> = match array {
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::Array(items) if items.len() == count => Ok(items.iter().copied().collect()),
                HeapData::Array(items) => Err(format!("cannot unpack {} values into {count} targets", items.len())),
                other => Err(format!("cannot unpack a '{}'", other.object_type())),
            },
            other => Err(format!("cannot unpack a '{}'", other.object_type(&self.heap))),
        };
        let result = match items {
            Ok(items) => {
                // first element ends on top, ready for the first store
                for value in items.iter().rev() {
                    self.stack.push(value.retain(&self.heap));
                }
                Ok(())
            }
            Err(message) => Err(VmError::runtime(message)),
        };
        array.drop_with_heap(&mut self.heap);
        result
    }
}
