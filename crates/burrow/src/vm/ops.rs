//! Value-level operations shared by the interpreter and the slot primitives.

use std::cmp::Ordering;

use num_integer::Integer;

use super::{Vm, VmError, VmResult};
use crate::{
    bytecode::{BinOp, CmpOp},
    heap::{HeapData, IterState},
    value::{Number, TableKey, Value},
};

/// Resolved destination of a store, computed before the heap is mutated.
enum Slot {
    Table(TableKey),
    Array(usize),
    Blob(usize, u8),
}

/// What an iterator produced, before it is turned into a VM value.
enum Item {
    Value(Value),
    Key(TableKey),
    Char(char),
}

fn index_in(key: Value, len: usize) -> Option<usize> {
    match key {
        Value::Integer(i) => usize::try_from(i).ok().filter(|&i| i < len),
        _ => None,
    }
}

fn shift_amount(n: i64) -> u32 {
    u32::try_from(n & 63).unwrap_or_default()
}

impl Vm {
    pub(super) fn missing_index(&self, key: Value) -> VmError {
        VmError::runtime(format!("the index '{}' does not exist", key.to_display(self.heap())))
    }

    /// Reads `container[key]` and returns a new reference to the result.
    ///
    /// Neither operand is consumed.
    pub(crate) fn get_field(&self, container: Value, key: Value) -> VmResult<Value> {
        let heap = self.heap();
        let Value::Ref(id) = container else {
            return Err(self.missing_index(key));
        };
        let found = match heap.get(id) {
            HeapData::Table(table) => TableKey::from_value(key, heap).and_then(|k| table.get(&k).copied()),
            HeapData::Array(items) => index_in(key, items.len()).map(|i| items[i]),
            HeapData::Str(s) => index_in(key, s.len()).map(|i| Value::Integer(i64::from(s.as_bytes()[i]))),
            HeapData::Blob(bytes) => index_in(key, bytes.len()).map(|i| Value::Integer(i64::from(bytes[i]))),
            _ => None,
        };
        found
            .map(|value| value.retain(heap))
            .ok_or_else(|| self.missing_index(key))
    }

    /// Stores `container[key] = value`, consuming `value` whether or not the
    /// store succeeds. With `create` unset the slot must already exist.
    pub(crate) fn set_field(&mut self, container: Value, key: Value, value: Value, create: bool) -> VmResult<()> {
        let slot = match self.resolve_slot(container, key, value, create) {
            Ok(slot) => slot,
            Err(err) => {
                value.drop_with_heap(self.heap_mut());
                return Err(err);
            }
        };
        let Value::Ref(id) = container else {
            unreachable!("resolve_slot only accepts heap containers");
        };
        let old = match (slot, self.heap_mut().get_mut(id)) {
            (Slot::Table(k), HeapData::Table(table)) => table.insert(k, value),
            (Slot::Array(i), HeapData::Array(items)) => Some(std::mem::replace(&mut items[i], value)),
            (Slot::Blob(i, byte), HeapData::Blob(bytes)) => {
                bytes[i] = byte;
                None
            }
            _ => unreachable!("slot kind matches its container"),
        };
        if let Some(old) = old {
            old.drop_with_heap(self.heap_mut());
        }
        Ok(())
    }

    fn resolve_slot(&self, container: Value, key: Value, value: Value, create: bool) -> VmResult<Slot> {
        let heap = self.heap();
        let Value::Ref(id) = container else {
            return Err(VmError::runtime(format!(
                "cannot set a slot in a '{}'",
                container.object_type(heap)
            )));
        };
        match heap.get(id) {
            HeapData::Table(table) => {
                let Some(k) = TableKey::from_value(key, heap) else {
                    return Err(VmError::runtime(format!(
                        "'{}' cannot be used as a table key",
                        key.object_type(heap)
                    )));
                };
                if !create && !table.contains_key(&k) {
                    return Err(self.missing_index(key));
                }
                Ok(Slot::Table(k))
            }
            HeapData::Array(items) => index_in(key, items.len())
                .map(Slot::Array)
                .ok_or_else(|| self.missing_index(key)),
            HeapData::Blob(bytes) => {
                let i = index_in(key, bytes.len()).ok_or_else(|| self.missing_index(key))?;
                let Value::Integer(byte) = value else {
                    return Err(VmError::runtime("blob slots only hold integers"));
                };
                Ok(Slot::Blob(i, u8::try_from(byte & 0xff).unwrap_or_default()))
            }
            other => Err(VmError::runtime(format!("cannot set a slot in a '{}'", other.object_type()))),
        }
    }

    /// Removes `container[key]`. Neither operand is consumed.
    pub(crate) fn delete_field(&mut self, container: Value, key: Value) -> VmResult<()> {
        let removed = match container {
            Value::Ref(id) => {
                let table_key = TableKey::from_value(key, self.heap());
                match self.heap_mut().get_mut(id) {
                    HeapData::Table(table) => table_key.and_then(|k| table.shift_remove(&k)),
                    HeapData::Array(items) => index_in(key, items.len()).map(|i| items.remove(i)),
                    _ => None,
                }
            }
            _ => None,
        };
        match removed {
            Some(value) => {
                value.drop_with_heap(self.heap_mut());
                Ok(())
            }
            None => Err(self.missing_index(key)),
        }
    }

    // ------------------------------------------------------------------
    // arithmetic
    // ------------------------------------------------------------------

    /// Applies a binary operator. Operands are borrowed; the result is new.
    pub(crate) fn binary_op(&mut self, op: BinOp, a: Value, b: Value) -> VmResult<Value> {
        let heap = self.heap();
        if op == BinOp::Add && (a.as_str(heap).is_some() || b.as_str(heap).is_some()) {
            let joined = format!("{}{}", a.to_display(heap), b.to_display(heap));
            let id = self.heap_mut().allocate(HeapData::Str(joined));
            return Ok(Value::Ref(id));
        }
        let arith_error = || {
            VmError::runtime(format!(
                "arith op {op} on between '{}' and '{}'",
                a.object_type(heap),
                b.object_type(heap)
            ))
        };
        match (a.as_number(), b.as_number()) {
            (Some(Number::Int(x)), Some(Number::Int(y))) => int_op(op, x, y),
            (Some(x), Some(y)) => float_op(op, x.to_f64(), y.to_f64()).ok_or_else(arith_error),
            _ => Err(arith_error()),
        }
    }

    pub(crate) fn negate(&self, a: Value) -> VmResult<Value> {
        match a {
            Value::Integer(i) => Ok(Value::Integer(i.wrapping_neg())),
            Value::Float(f) => Ok(Value::Float(-f)),
            other => Err(VmError::runtime(format!(
                "attempt to negate a '{}'",
                other.object_type(self.heap())
            ))),
        }
    }

    pub(crate) fn invert(&self, a: Value) -> VmResult<Value> {
        match a {
            Value::Integer(i) => Ok(Value::Integer(!i)),
            other => Err(VmError::runtime(format!(
                "attempt to invert a '{}'",
                other.object_type(self.heap())
            ))),
        }
    }

    // ------------------------------------------------------------------
    // comparison
    // ------------------------------------------------------------------

    pub(crate) fn compare_op(&self, op: CmpOp, a: Value, b: Value) -> VmResult<bool> {
        let heap = self.heap();
        Ok(match op {
            CmpOp::Eq => a.vm_eq(b, heap),
            CmpOp::NotEq => !a.vm_eq(b, heap),
            CmpOp::Is => a == b,
            CmpOp::IsNot => a != b,
            CmpOp::In => self.contains(b, a)?,
            CmpOp::NotIn => !self.contains(b, a)?,
            CmpOp::Lt => self.order(a, b)? == Some(Ordering::Less),
            CmpOp::LtE => matches!(self.order(a, b)?, Some(Ordering::Less | Ordering::Equal)),
            CmpOp::Gt => self.order(a, b)? == Some(Ordering::Greater),
            CmpOp::GtE => matches!(self.order(a, b)?, Some(Ordering::Greater | Ordering::Equal)),
        })
    }

    fn order(&self, a: Value, b: Value) -> VmResult<Option<Ordering>> {
        let heap = self.heap();
        match (a.as_number(), b.as_number()) {
            (Some(Number::Int(x)), Some(Number::Int(y))) => return Ok(Some(x.cmp(&y))),
            (Some(x), Some(y)) => return Ok(x.to_f64().partial_cmp(&y.to_f64())),
            _ => {}
        }
        match (a.as_str(heap), b.as_str(heap)) {
            (Some(x), Some(y)) => Ok(Some(x.cmp(y))),
            _ => Err(VmError::runtime(format!(
                "comparison between '{}' and '{}'",
                a.object_type(heap),
                b.object_type(heap)
            ))),
        }
    }

    fn contains(&self, container: Value, item: Value) -> VmResult<bool> {
        let heap = self.heap();
        if let Value::Ref(id) = container {
            match heap.get(id) {
                HeapData::Table(table) => {
                    return Ok(TableKey::from_value(item, heap).is_some_and(|k| table.contains_key(&k)));
                }
                HeapData::Array(items) => return Ok(items.iter().any(|v| v.vm_eq(item, heap))),
                HeapData::Str(s) => {
                    if let Some(needle) = item.as_str(heap) {
                        return Ok(s.contains(needle));
                    }
                }
                _ => {}
            }
        }
        Err(VmError::runtime(format!(
            "cannot search for '{}' in a '{}'",
            item.object_type(heap),
            container.object_type(heap)
        )))
    }

    // ------------------------------------------------------------------
    // iteration
    // ------------------------------------------------------------------

    /// Turns an iterable into an iterator, consuming the iterable's reference.
    pub(crate) fn make_iter(&mut self, value: Value) -> VmResult<Value> {
        let heap = self.heap();
        let state = match value {
            Value::Ref(id) => match heap.get(id) {
                HeapData::Array(_) => Some(IterState::Array { target: id, pos: 0 }),
                HeapData::Table(_) => Some(IterState::Table { target: id, pos: 0 }),
                HeapData::Blob(_) => Some(IterState::Blob { target: id, pos: 0 }),
                HeapData::Str(_) => Some(IterState::Str { target: id, pos: 0 }),
                HeapData::Iter(_) => return Ok(value),
                _ => None,
            },
            _ => None,
        };
        let Some(state) = state else {
            let err = VmError::runtime(format!("cannot iterate a '{}'", value.object_type(heap)));
            value.drop_with_heap(self.heap_mut());
            return Err(err);
        };
        Ok(Value::Ref(self.heap_mut().allocate(HeapData::Iter(state))))
    }

    /// Produces the next item of an iterator, or `None` once exhausted.
    pub(crate) fn advance_iter(&mut self, iter: Value) -> VmResult<Option<Value>> {
        let heap = self.heap();
        let Value::Ref(iter_id) = iter else {
            return Err(VmError::runtime("not an iterator"));
        };
        let HeapData::Iter(state) = heap.get(iter_id) else {
            return Err(VmError::runtime("not an iterator"));
        };
        let state = *state;
        let (item, next) = match state {
            IterState::Array { target, pos } => match heap.get(target) {
                HeapData::Array(items) => (
                    items.get(pos).copied().map(Item::Value),
                    IterState::Array { target, pos: pos + 1 },
                ),
                _ => (None, state),
            },
            IterState::Table { target, pos } => match heap.get(target) {
                HeapData::Table(table) => (
                    table.get_index(pos).map(|(k, _)| Item::Key(k.clone())),
                    IterState::Table { target, pos: pos + 1 },
                ),
                _ => (None, state),
            },
            IterState::Blob { target, pos } => match heap.get(target) {
                HeapData::Blob(bytes) => (
                    bytes.get(pos).map(|&b| Item::Value(Value::Integer(i64::from(b)))),
                    IterState::Blob { target, pos: pos + 1 },
                ),
                _ => (None, state),
            },
            IterState::Str { target, pos } => match heap.get(target) {
                HeapData::Str(s) => {
                    let c = s.get(pos..).and_then(|rest| rest.chars().next());
                    let step = c.map_or(0, char::len_utf8);
                    (c.map(Item::Char), IterState::Str { target, pos: pos + step })
                }
                _ => (None, state),
            },
            IterState::Range { next, stop, step } => {
                let more = (step > 0 && next < stop) || (step < 0 && next > stop);
                (
                    more.then_some(Item::Value(Value::Integer(next))),
                    IterState::Range {
                        next: next.saturating_add(step),
                        stop,
                        step,
                    },
                )
            }
        };
        if let HeapData::Iter(state) = self.heap_mut().get_mut(iter_id) {
            *state = next;
        }
        Ok(item.map(|item| match item {
            Item::Value(value) => value.retain(self.heap()),
            Item::Key(key) => key.to_value(self.heap_mut()),
            Item::Char(c) => Value::Ref(self.heap_mut().allocate(HeapData::Str(c.to_string()))),
        }))
    }
}

fn int_op(op: BinOp, x: i64, y: i64) -> VmResult<Value> {
    let value = match op {
        BinOp::Add => x.wrapping_add(y),
        BinOp::Sub => x.wrapping_sub(y),
        BinOp::Mul => x.wrapping_mul(y),
        BinOp::Div | BinOp::FloorDiv | BinOp::Mod if y == 0 => {
            let what = if op == BinOp::Mod { "modulo" } else { "division" };
            return Err(VmError::runtime(format!("{what} by zero")));
        }
        BinOp::Div => x.wrapping_div(y),
        BinOp::FloorDiv if y == -1 => x.wrapping_neg(),
        BinOp::FloorDiv => x.div_floor(&y),
        BinOp::Mod => x.wrapping_rem(y),
        BinOp::Pow => match u32::try_from(y) {
            Ok(exp) => x.wrapping_pow(exp),
            Err(_) if y < 0 => return Ok(Value::Float((x as f64).powf(y as f64))),
            Err(_) => x.wrapping_pow(u32::MAX),
        },
        BinOp::Shl => x.wrapping_shl(shift_amount(y)),
        BinOp::Shr => x.wrapping_shr(shift_amount(y)),
        BinOp::BitAnd => x & y,
        BinOp::BitOr => x | y,
        BinOp::BitXor => x ^ y,
    };
    Ok(Value::Integer(value))
}

fn float_op(op: BinOp, x: f64, y: f64) -> Option<Value> {
    let value = match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => x / y,
        BinOp::FloorDiv => (x / y).floor(),
        BinOp::Mod => x % y,
        BinOp::Pow => x.powf(y),
        BinOp::Shl | BinOp::Shr | BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor => return None,
    };
    Some(Value::Float(value))
}
