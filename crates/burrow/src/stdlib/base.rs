//! Builtins present in every VM.

use super::{Entry, check_args, push_len};
use crate::{
    heap::{HeapData, IterState},
    value::{Number, ObjectType, TableKey, Value},
    vm::{Vm, VmError, VmResult},
};

pub(super) const FUNCTIONS: &[Entry] = &[
    ("print", print, None),
    ("error", error, None),
    ("len", len, Some(1)),
    ("type", type_of, Some(1)),
    ("tostring", tostring, Some(1)),
    ("tointeger", tointeger, Some(1)),
    ("tofloat", tofloat, Some(1)),
    ("range", range, None),
    ("array", array, None),
    ("append", append, Some(2)),
    ("keys", keys, Some(1)),
    ("getroottable", getroottable, Some(0)),
];

/// Renders every argument and joins them with single spaces.
fn joined_args(vm: &Vm) -> VmResult<String> {
    let mut parts = Vec::with_capacity(vm.get_top());
    for idx in 1..=vm.get_top() {
        parts.push(vm.to_display_string(isize::try_from(idx).unwrap_or(isize::MAX))?);
    }
    Ok(parts.join(" "))
}

fn print(vm: &mut Vm) -> VmResult<usize> {
    let mut text = joined_args(vm)?;
    text.push('\n');
    vm.print_text(&text);
    Ok(0)
}

fn error(vm: &mut Vm) -> VmResult<usize> {
    let mut text = joined_args(vm)?;
    text.push('\n');
    vm.error_text(&text);
    Ok(0)
}

fn len(vm: &mut Vm) -> VmResult<usize> {
    let size = vm.get_size(1)?;
    push_len(vm, size)
}

fn type_of(vm: &mut Vm) -> VmResult<usize> {
    let name: &'static str = vm.get_type(1)?.into();
    vm.push_string(name);
    Ok(1)
}

fn tostring(vm: &mut Vm) -> VmResult<usize> {
    let text = vm.to_display_string(1)?;
    vm.push_string(&text);
    Ok(1)
}

fn parse_number(text: &str) -> Option<Number> {
    let text = text.trim();
    text.parse::<i64>()
        .map(Number::Int)
        .or_else(|_| text.parse::<f64>().map(Number::Float))
        .ok()
}

fn tointeger(vm: &mut Vm) -> VmResult<usize> {
    let n = match vm.get_type(1)? {
        ObjectType::Integer | ObjectType::Float => vm.get_integer(1)?,
        ObjectType::Bool => i64::from(vm.get_bool(1)?),
        ObjectType::String => {
            let text = vm.get_string(1)?;
            parse_number(text)
                .map(Number::to_i64)
                .ok_or_else(|| VmError::runtime(format!("cannot convert '{text}' to integer")))?
        }
        other => return Err(VmError::runtime(format!("cannot convert a '{other}' to integer"))),
    };
    vm.push_integer(n);
    Ok(1)
}

fn tofloat(vm: &mut Vm) -> VmResult<usize> {
    let f = match vm.get_type(1)? {
        ObjectType::Integer | ObjectType::Float => vm.get_float(1)?,
        ObjectType::Bool => f64::from(u8::from(vm.get_bool(1)?)),
        ObjectType::String => {
            let text = vm.get_string(1)?;
            parse_number(text)
                .map(Number::to_f64)
                .ok_or_else(|| VmError::runtime(format!("cannot convert '{text}' to float")))?
        }
        other => return Err(VmError::runtime(format!("cannot convert a '{other}' to float"))),
    };
    vm.push_float(f);
    Ok(1)
}

/// `range(stop)`, `range(start, stop)` or `range(start, stop, step)`.
fn range(vm: &mut Vm) -> VmResult<usize> {
    let argc = check_args(vm, "range", 1, 3)?;
    let (start, stop) = if argc == 1 {
        (0, vm.get_integer(1)?)
    } else {
        (vm.get_integer(1)?, vm.get_integer(2)?)
    };
    let step = if argc == 3 { vm.get_integer(3)? } else { 1 };
    if step == 0 {
        return Err(VmError::runtime("range step cannot be zero"));
    }
    let id = vm.heap_mut().allocate(HeapData::Iter(IterState::Range {
        next: start,
        stop,
        step,
    }));
    vm.push_value(Value::Ref(id));
    Ok(1)
}

/// `array(size)` or `array(size, fill)`.
fn array(vm: &mut Vm) -> VmResult<usize> {
    let argc = check_args(vm, "array", 1, 2)?;
    let size = usize::try_from(vm.get_integer(1)?).map_err(|_| VmError::runtime("array size cannot be negative"))?;
    let fill = if argc == 2 {
        vm.stack_value(2).unwrap_or(Value::Null)
    } else {
        Value::Null
    };
    let items = (0..size).map(|_| fill.retain(vm.heap())).collect();
    let id = vm.heap_mut().allocate(HeapData::Array(items));
    vm.push_value(Value::Ref(id));
    Ok(1)
}

fn append(vm: &mut Vm) -> VmResult<usize> {
    let target = vm.stack_value(1).unwrap_or(Value::Null);
    let value = vm.stack_value(2).unwrap_or(Value::Null);
    let id = match target {
        Value::Ref(id) if matches!(vm.heap().get(id), HeapData::Array(_)) => id,
        other => {
            return Err(VmError::runtime(format!(
                "append expects an array, got '{}'",
                other.object_type(vm.heap())
            )));
        }
    };
    let value = value.retain(vm.heap());
    if let HeapData::Array(items) = vm.heap_mut().get_mut(id) {
        items.push(value);
    }
    Ok(0)
}

/// Table keys in insertion order, or the indices of an array.
fn keys(vm: &mut Vm) -> VmResult<usize> {
    let target = vm.stack_value(1).unwrap_or(Value::Null);
    let keys = match target {
        Value::Ref(id) => match vm.heap().get(id) {
            HeapData::Table(table) => Some(table.keys().cloned().collect::<Vec<_>>()),
            HeapData::Array(items) => Some(
                (0..items.len())
                    .map(|i| TableKey::Int(i64::try_from(i).unwrap_or(i64::MAX)))
                    .collect(),
            ),
            _ => None,
        },
        _ => None,
    };
    let Some(keys) = keys else {
        return Err(VmError::runtime(format!(
            "keys expects a table or an array, got '{}'",
            target.object_type(vm.heap())
        )));
    };
    let items = keys.iter().map(|key| key.to_value(vm.heap_mut())).collect();
    let id = vm.heap_mut().allocate(HeapData::Array(items));
    vm.push_value(Value::Ref(id));
    Ok(1)
}

fn getroottable(vm: &mut Vm) -> VmResult<usize> {
    vm.push_root_table();
    Ok(1)
}
