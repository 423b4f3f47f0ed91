use std::{borrow::Cow, fmt};

use crate::heap::{Heap, HeapData, HeapId};

/// Type tag of a VM value.
///
/// The names match what scripts see from the `type()` builtin and what
/// type-mismatch errors report.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr, serde::Serialize, serde::Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    Null,
    Integer,
    Float,
    Bool,
    String,
    Table,
    Array,
    Blob,
    Closure,
    NativeClosure,
    UserPointer,
    Iterator,
}

/// An opaque host pointer stored inside the VM.
///
/// The VM never dereferences it; the host decides what the address means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct UserPointer(usize);

impl UserPointer {
    #[must_use]
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    /// Wraps the address of a host reference.
    #[must_use]
    pub fn from_ref<T>(value: &T) -> Self {
        Self(std::ptr::from_ref(value) as usize)
    }

    #[must_use]
    pub const fn addr(self) -> usize {
        self.0
    }
}

impl fmt::Display for UserPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// A VM value as it sits on the stack or inside a container.
///
/// `Value` is `Copy`: copying the bits does not touch the reference count of a
/// `Ref`. Whoever stores a `Ref` owns one reference and must balance it with
/// [`Value::retain`] / [`Value::drop_with_heap`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    UserPointer(UserPointer),
    Ref(HeapId),
}

impl Value {
    /// Acquires one more reference to the value and returns it.
    #[inline]
    pub fn retain(self, heap: &Heap) -> Self {
        if let Self::Ref(id) = self {
            heap.inc_ref(id);
        }
        self
    }

    /// Releases the reference owned by this copy of the value.
    #[inline]
    pub fn drop_with_heap(self, heap: &mut Heap) {
        if let Self::Ref(id) = self {
            heap.dec_ref(id);
        }
    }

    pub fn object_type(self, heap: &Heap) -> ObjectType {
        match self {
            Self::Null => ObjectType::Null,
            Self::Bool(_) => ObjectType::Bool,
            Self::Integer(_) => ObjectType::Integer,
            Self::Float(_) => ObjectType::Float,
            Self::UserPointer(_) => ObjectType::UserPointer,
            Self::Ref(id) => heap.get(id).object_type(),
        }
    }

    /// Only null, false, 0 and 0.0 are false.
    pub fn is_truthy(self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => b,
            Self::Integer(i) => i != 0,
            Self::Float(f) => f != 0.0,
            Self::UserPointer(_) | Self::Ref(_) => true,
        }
    }

    /// Returns the string payload when the value is a heap string.
    pub fn as_str(self, heap: &Heap) -> Option<&str> {
        match self {
            Self::Ref(id) => match heap.get(id) {
                HeapData::Str(s) => Some(s.as_str()),
                _ => None,
            },
            _ => None,
        }
    }

    /// Numeric view used by arithmetic and by the lenient native getters.
    pub fn as_number(self) -> Option<Number> {
        match self {
            Self::Integer(i) => Some(Number::Int(i)),
            Self::Float(f) => Some(Number::Float(f)),
            _ => None,
        }
    }

    /// Renders the value the way `print` and `tostring` do.
    pub fn to_display(self, heap: &Heap) -> Cow<'_, str> {
        match self {
            Self::Null => Cow::Borrowed("null"),
            Self::Bool(true) => Cow::Borrowed("true"),
            Self::Bool(false) => Cow::Borrowed("false"),
            Self::Integer(i) => Cow::Owned(i.to_string()),
            Self::Float(f) => Cow::Owned(format_float(f)),
            Self::UserPointer(p) => Cow::Owned(format!("(userpointer : {p})")),
            Self::Ref(id) => match heap.get(id) {
                HeapData::Str(s) => Cow::Borrowed(s.as_str()),
                other => Cow::Owned(format!("({} : 0x{:08x})", other.object_type(), id.index())),
            },
        }
    }

    /// Equality used by `==`, `in` and array searches.
    ///
    /// Numbers compare by value across integer/float, strings by content,
    /// every other heap value by identity.
    pub fn vm_eq(self, other: Self, heap: &Heap) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::UserPointer(a), Self::UserPointer(b)) => a == b,
            (Self::Ref(a), Self::Ref(b)) => {
                a == b
                    || matches!(
                        (heap.get(a), heap.get(b)),
                        (HeapData::Str(x), HeapData::Str(y)) if x == y
                    )
            }
            (a, b) => match (a.as_number(), b.as_number()) {
                (Some(x), Some(y)) => x.same_value(y),
                _ => false,
            },
        }
    }
}

/// A numeric operand after integer/float classification.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn to_f64(self) -> f64 {
        match self {
            Self::Int(i) => i as f64,
            Self::Float(f) => f,
        }
    }

    /// Truncates floats toward zero.
    #[expect(clippy::cast_possible_truncation)]
    pub fn to_i64(self) -> i64 {
        match self {
            Self::Int(i) => i,
            Self::Float(f) => f as i64,
        }
    }

    fn same_value(self, other: Self) -> bool {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a == b,
            (a, b) => a.to_f64() == b.to_f64(),
        }
    }
}

/// Formats a float so integral values keep a trailing `.0`.
pub(crate) fn format_float(f: f64) -> String {
    if f.is_finite() {
        ryu::Buffer::new().format_finite(f).to_owned()
    } else if f.is_nan() {
        "nan".to_owned()
    } else if f.is_sign_negative() {
        "-inf".to_owned()
    } else {
        "inf".to_owned()
    }
}

/// Hashable form of a table key.
///
/// String keys are stored by content so a lookup with any equal string hits.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum TableKey {
    Int(i64),
    Str(String),
    Bool(bool),
    Float(u64),
}

impl TableKey {
    /// Converts a stack value into a key without consuming its reference.
    pub fn from_value(value: Value, heap: &Heap) -> Option<Self> {
        match value {
            Value::Integer(i) => Some(Self::Int(i)),
            Value::Bool(b) => Some(Self::Bool(b)),
            Value::Float(f) => Some(Self::Float(f.to_bits())),
            Value::Ref(_) => value.as_str(heap).map(|s| Self::Str(s.to_owned())),
            Value::Null | Value::UserPointer(_) => None,
        }
    }

    /// Materialises the key as a fresh VM value, allocating for strings.
    pub fn to_value(&self, heap: &mut Heap) -> Value {
        match self {
            Self::Int(i) => Value::Integer(*i),
            Self::Bool(b) => Value::Bool(*b),
            Self::Float(bits) => Value::Float(f64::from_bits(*bits)),
            Self::Str(s) => Value::Ref(heap.allocate(HeapData::Str(s.clone()))),
        }
    }
}

impl fmt::Display for TableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Str(s) => f.write_str(s),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Float(bits) => f.write_str(&format_float(f64::from_bits(*bits))),
        }
    }
}
