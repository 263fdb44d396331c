//! Heap objects.
//!
//! Every reference-based runtime entity is one arm of [`Obj`]: strings,
//! function values, boxed scalars, tuples, the specialised list and set
//! representations, dicts, their iterators, and coroutines. Deep
//! equality, hashing and stringification consult the heap, so they are
//! free functions over `(&Heap, ObjRef)` rather than methods.

use std::hash::{Hash, Hasher};

use porkchop_sem::{identity_kind, IdentityKind, ScalarKind, Type};
use rustc_hash::{FxHashMap, FxHasher};

use crate::frame::Frame;
use crate::heap::Heap;
use crate::value::{ObjRef, Value};

/// A heap object.
#[derive(Debug)]
pub enum Obj {
    Str(String),
    Func(FuncObj),
    /// A boxed value scalar carrying its runtime kind tag.
    AnyScalar { value: Value, kind: ScalarKind },
    Tuple {
        elements: Vec<Value>,
        types: Vec<Type>,
    },
    List(ListRepr),
    Set(SetRepr),
    Dict(DictRepr),
    /// Cursor plus one-element cache over a list. `refs` records whether
    /// elements carry reference tags.
    ListIter {
        list: ObjRef,
        pos: usize,
        cache: Option<Value>,
        refs: bool,
    },
    /// Cursor over a snapshot of a set's elements.
    SetIter {
        set: ObjRef,
        items: Vec<Value>,
        pos: usize,
        cache: Option<Value>,
        refs: bool,
    },
    /// Cursor over a snapshot of a dict's entries; MOVE materialises a
    /// fresh pair into the cache.
    DictIter {
        dict: ObjRef,
        items: Vec<(Value, Value)>,
        pos: usize,
        cache: Option<Value>,
        key_refs: bool,
        value_refs: bool,
    },
    Coroutine(Coroutine),
}

#[derive(Debug)]
pub struct FuncObj {
    pub func: usize,
    /// The remaining (unbound) prototype.
    pub prototype: Type,
    pub captures: Vec<Value>,
    /// Reference tags parallel to `captures`.
    pub capture_refs: Vec<bool>,
}

/// A suspended generator activation.
#[derive(Debug)]
pub struct Coroutine {
    /// The suspended frame; taken out while the coroutine runs, `None`
    /// once it returned.
    pub frame: Option<Frame>,
    pub element: Type,
    pub cache: Option<Value>,
}

/// List storage, specialised by element representation.
#[derive(Debug)]
pub enum ListRepr {
    None { count: usize },
    Bool(Vec<bool>),
    Byte(Vec<u8>),
    Scalar { elements: Vec<Value>, kind: ScalarKind },
    Object { elements: Vec<Value>, element: Type },
}

impl ListRepr {
    pub fn len(&self) -> usize {
        match self {
            ListRepr::None { count } => *count,
            ListRepr::Bool(elements) => elements.len(),
            ListRepr::Byte(elements) => elements.len(),
            ListRepr::Scalar { elements, .. } => elements.len(),
            ListRepr::Object { elements, .. } => elements.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn element_type(&self) -> Type {
        match self {
            ListRepr::None { .. } => Type::NONE,
            ListRepr::Bool(_) => Type::BOOL,
            ListRepr::Byte(_) => Type::BYTE,
            ListRepr::Scalar { kind, .. } => Type::Scalar(*kind),
            ListRepr::Object { element, .. } => element.clone(),
        }
    }

    /// Whether loaded elements carry a reference tag.
    pub fn holds_objects(&self) -> bool {
        matches!(self, ListRepr::Object { .. })
    }

    pub fn load(&self, index: usize) -> Value {
        match self {
            ListRepr::None { .. } => Value::NONE,
            ListRepr::Bool(elements) => Value::from_bool(elements[index]),
            ListRepr::Byte(elements) => Value::from_byte(elements[index]),
            ListRepr::Scalar { elements, .. } => elements[index],
            ListRepr::Object { elements, .. } => elements[index],
        }
    }

    pub fn store(&mut self, index: usize, value: Value) {
        match self {
            ListRepr::None { .. } => {}
            ListRepr::Bool(elements) => elements[index] = value.as_bool(),
            ListRepr::Byte(elements) => elements[index] = value.as_byte(),
            ListRepr::Scalar { elements, .. } => elements[index] = value,
            ListRepr::Object { elements, .. } => elements[index] = value,
        }
    }

    pub fn push(&mut self, value: Value) {
        match self {
            ListRepr::None { count } => *count += 1,
            ListRepr::Bool(elements) => elements.push(value.as_bool()),
            ListRepr::Byte(elements) => elements.push(value.as_byte()),
            ListRepr::Scalar { elements, .. } => elements.push(value),
            ListRepr::Object { elements, .. } => elements.push(value),
        }
    }
}

/// Set storage, specialised by element representation.
#[derive(Debug)]
pub enum SetRepr {
    None { state: bool },
    Bool { states: [bool; 2] },
    Byte { bits: Box<[u64; 4]> },
    Hashed {
        buckets: FxHashMap<u64, Vec<Value>>,
        element: Type,
    },
}

impl SetRepr {
    pub fn len(&self) -> usize {
        match self {
            SetRepr::None { state } => *state as usize,
            SetRepr::Bool { states } => states.iter().filter(|s| **s).count(),
            SetRepr::Byte { bits } => bits.iter().map(|w| w.count_ones() as usize).sum(),
            SetRepr::Hashed { buckets, .. } => buckets.values().map(Vec::len).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn element_type(&self) -> Type {
        match self {
            SetRepr::None { .. } => Type::NONE,
            SetRepr::Bool { .. } => Type::BOOL,
            SetRepr::Byte { .. } => Type::BYTE,
            SetRepr::Hashed { element, .. } => element.clone(),
        }
    }

    /// All elements, in iteration order.
    pub fn items(&self) -> Vec<Value> {
        match self {
            SetRepr::None { state } => {
                if *state {
                    vec![Value::NONE]
                } else {
                    Vec::new()
                }
            }
            SetRepr::Bool { states } => {
                let mut items = Vec::new();
                if states[0] {
                    items.push(Value::from_bool(false));
                }
                if states[1] {
                    items.push(Value::from_bool(true));
                }
                items
            }
            SetRepr::Byte { bits } => {
                let mut items = Vec::new();
                for byte in 0u16..256 {
                    if bits[(byte / 64) as usize] & (1u64 << (byte % 64)) != 0 {
                        items.push(Value::from_byte(byte as u8));
                    }
                }
                items
            }
            SetRepr::Hashed { buckets, .. } => {
                buckets.values().flatten().copied().collect()
            }
        }
    }
}

/// Dict storage: hash buckets of key/value entries.
#[derive(Debug)]
pub struct DictRepr {
    pub buckets: FxHashMap<u64, Vec<(Value, Value)>>,
    pub key: Type,
    pub value: Type,
}

impl DictRepr {
    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn items(&self) -> Vec<(Value, Value)> {
        self.buckets.values().flatten().copied().collect()
    }
}

impl Obj {
    /// The runtime type of this object.
    pub fn type_of(&self) -> Type {
        match self {
            Obj::Str(_) => Type::STRING,
            Obj::Func(func) => func.prototype.clone(),
            Obj::AnyScalar { kind, .. } => Type::Scalar(*kind),
            Obj::Tuple { types, .. } => Type::Tuple(types.clone()),
            Obj::List(list) => Type::list(list.element_type()),
            Obj::Set(set) => Type::set(set.element_type()),
            Obj::Dict(dict) => Type::dict(dict.key.clone(), dict.value.clone()),
            Obj::ListIter { .. } | Obj::SetIter { .. } | Obj::DictIter { .. } => {
                // the element type is recovered through the source object,
                // so iterators answer through the heap-aware helper below
                unreachable!("iterator types require the heap")
            }
            Obj::Coroutine(coroutine) => Type::iter(coroutine.element.clone()),
        }
    }

    /// Walks the references this object keeps alive.
    pub fn walk(&self, mut mark: impl FnMut(Value)) {
        match self {
            Obj::Str(_) | Obj::AnyScalar { .. } => {}
            Obj::Func(func) => {
                for (value, is_ref) in func.captures.iter().zip(&func.capture_refs) {
                    if *is_ref {
                        mark(*value);
                    }
                }
            }
            Obj::Tuple { elements, types } => {
                for (value, typ) in elements.iter().zip(types) {
                    if !typ.is_value_based() {
                        mark(*value);
                    }
                }
            }
            Obj::List(repr) => {
                if let ListRepr::Object { elements, .. } = repr {
                    for value in elements {
                        mark(*value);
                    }
                }
            }
            Obj::Set(repr) => {
                if let SetRepr::Hashed { buckets, element } = repr {
                    if !element.is_value_based() {
                        for value in buckets.values().flatten() {
                            mark(*value);
                        }
                    }
                }
            }
            Obj::Dict(dict) => {
                let mark_keys = !dict.key.is_value_based();
                let mark_values = !dict.value.is_value_based();
                if mark_keys || mark_values {
                    for (key, value) in dict.buckets.values().flatten() {
                        if mark_keys {
                            mark(*key);
                        }
                        if mark_values {
                            mark(*value);
                        }
                    }
                }
            }
            Obj::ListIter {
                list, cache, refs, ..
            } => {
                mark(Value::from_obj(*list));
                if *refs {
                    if let Some(value) = cache {
                        mark(*value);
                    }
                }
            }
            Obj::SetIter {
                set,
                items,
                cache,
                refs,
                ..
            } => {
                mark(Value::from_obj(*set));
                if *refs {
                    for value in items {
                        mark(*value);
                    }
                    if let Some(value) = cache {
                        mark(*value);
                    }
                }
            }
            Obj::DictIter {
                dict,
                items,
                cache,
                key_refs,
                value_refs,
                ..
            } => {
                mark(Value::from_obj(*dict));
                for (key, value) in items {
                    if *key_refs {
                        mark(*key);
                    }
                    if *value_refs {
                        mark(*value);
                    }
                }
                // the cache is a freshly made pair, always a reference
                if let Some(value) = cache {
                    mark(*value);
                }
            }
            Obj::Coroutine(coroutine) => {
                if let Some(frame) = &coroutine.frame {
                    for (value, is_ref) in frame.stack.iter().zip(&frame.refs) {
                        if *is_ref {
                            mark(*value);
                        }
                    }
                }
                if let Some(value) = coroutine.cache {
                    if !coroutine.element.is_value_based() {
                        mark(value);
                    }
                }
            }
        }
    }
}

/// The runtime type of any object, iterators included; iterator element
/// types are recovered through their source collection.
pub fn type_of(heap: &Heap, obj: ObjRef) -> Type {
    match heap.get(obj) {
        Obj::ListIter { list, .. } => Type::iter(match heap.get(*list) {
            Obj::List(repr) => repr.element_type(),
            _ => unreachable!("list iterator over a non-list"),
        }),
        Obj::SetIter { set, .. } => Type::iter(match heap.get(*set) {
            Obj::Set(repr) => repr.element_type(),
            _ => unreachable!("set iterator over a non-set"),
        }),
        Obj::DictIter { dict, .. } => match heap.get(*dict) {
            Obj::Dict(repr) => Type::iter(Type::Tuple(vec![
                repr.key.clone(),
                repr.value.clone(),
            ])),
            _ => unreachable!("dict iterator over a non-dict"),
        },
        other => other.type_of(),
    }
}

fn hash_bits(bits: u64) -> u64 {
    let mut hasher = FxHasher::default();
    bits.hash(&mut hasher);
    hasher.finish()
}

/// Hash of a runtime value under the identity discipline of its type.
pub fn value_hash(heap: &Heap, value: Value, kind: IdentityKind) -> u64 {
    match kind {
        IdentityKind::SelfBits => value.bits(),
        IdentityKind::Float => {
            // normalise -0.0 so numerically equal floats share a bucket
            let float = value.as_float();
            let bits = if float == 0.0 { 0 } else { value.bits() };
            hash_bits(bits)
        }
        IdentityKind::Object => obj_hash(heap, value.as_obj()),
    }
}

/// Equality of runtime values under the identity discipline of their
/// type.
pub fn value_equals(heap: &Heap, a: Value, b: Value, kind: IdentityKind) -> bool {
    match kind {
        IdentityKind::SelfBits => a.bits() == b.bits(),
        IdentityKind::Float => a.as_float() == b.as_float(),
        IdentityKind::Object => obj_equals(heap, a.as_obj(), b.as_obj()),
    }
}

/// Deep hash of an object, consistent with [`obj_equals`].
pub fn obj_hash(heap: &Heap, obj: ObjRef) -> u64 {
    match heap.get(obj) {
        Obj::Str(value) => {
            let mut hasher = FxHasher::default();
            value.hash(&mut hasher);
            hasher.finish()
        }
        Obj::AnyScalar { value, kind } => {
            value_hash(heap, *value, identity_kind(&Type::Scalar(*kind)))
        }
        Obj::Func(func) => {
            let mut hasher = FxHasher::default();
            func.func.hash(&mut hasher);
            for capture in &func.captures {
                capture.bits().hash(&mut hasher);
            }
            hasher.finish()
        }
        Obj::Tuple { elements, types } => {
            let mut hash = 0u64;
            for (value, typ) in elements.iter().zip(types) {
                hash = hash
                    .rotate_left(1)
                    .wrapping_add(value_hash(heap, *value, identity_kind(typ)));
            }
            hash
        }
        Obj::List(repr) => {
            let kind = identity_kind(&repr.element_type());
            let mut hash = 0u64;
            for index in 0..repr.len() {
                hash = hash
                    .rotate_left(1)
                    .wrapping_add(value_hash(heap, repr.load(index), kind));
            }
            hash
        }
        Obj::Set(repr) => {
            let kind = identity_kind(&repr.element_type());
            let mut hash = 0u64;
            for value in repr.items() {
                hash = hash.wrapping_add(value_hash(heap, value, kind));
            }
            hash
        }
        Obj::Dict(repr) => {
            let key_kind = identity_kind(&repr.key);
            let value_kind = identity_kind(&repr.value);
            let mut hash = 0u64;
            for (key, value) in repr.items() {
                hash = hash.wrapping_add(
                    (value_hash(heap, key, key_kind) << 1)
                        ^ value_hash(heap, value, value_kind),
                );
            }
            hash
        }
        // iterator and coroutine identity is the slot itself
        _ => hash_bits(obj.0 as u64),
    }
}

/// Deep structural equality; iterators and coroutines compare by
/// identity.
pub fn obj_equals(heap: &Heap, a: ObjRef, b: ObjRef) -> bool {
    if a == b {
        return true;
    }
    match (heap.get(a), heap.get(b)) {
        (Obj::Str(left), Obj::Str(right)) => left == right,
        (
            Obj::AnyScalar { value: left, kind: left_kind },
            Obj::AnyScalar { value: right, kind: right_kind },
        ) => {
            left_kind == right_kind
                && value_equals(
                    heap,
                    *left,
                    *right,
                    identity_kind(&Type::Scalar(*left_kind)),
                )
        }
        (Obj::Func(left), Obj::Func(right)) => {
            left.func == right.func
                && left.captures.len() == right.captures.len()
                && left
                    .captures
                    .iter()
                    .zip(&right.captures)
                    .all(|(x, y)| x.bits() == y.bits())
        }
        (
            Obj::Tuple { elements: left, types },
            Obj::Tuple { elements: right, types: right_types },
        ) => {
            types == right_types
                && left.len() == right.len()
                && left.iter().zip(right).zip(types).all(|((x, y), typ)| {
                    value_equals(heap, *x, *y, identity_kind(typ))
                })
        }
        (Obj::List(left), Obj::List(right)) => {
            if left.element_type() != right.element_type() || left.len() != right.len() {
                return false;
            }
            let kind = identity_kind(&left.element_type());
            (0..left.len()).all(|i| value_equals(heap, left.load(i), right.load(i), kind))
        }
        (Obj::Set(left), Obj::Set(right)) => {
            if left.element_type() != right.element_type() || left.len() != right.len() {
                return false;
            }
            let kind = identity_kind(&left.element_type());
            left.items().into_iter().all(|item| {
                right
                    .items()
                    .into_iter()
                    .any(|other| value_equals(heap, item, other, kind))
            })
        }
        (Obj::Dict(left), Obj::Dict(right)) => {
            if left.key != right.key || left.value != right.value || left.len() != right.len()
            {
                return false;
            }
            let key_kind = identity_kind(&left.key);
            let value_kind = identity_kind(&left.value);
            left.items().into_iter().all(|(key, value)| {
                right.items().into_iter().any(|(other_key, other_value)| {
                    value_equals(heap, key, other_key, key_kind)
                        && value_equals(heap, value, other_value, value_kind)
                })
            })
        }
        _ => false,
    }
}

/// Renders a value of type `typ` the way the `*2S` opcodes do.
pub fn value_to_string(heap: &Heap, value: Value, typ: &Type) -> String {
    match typ.scalar() {
        Some(ScalarKind::None) => "()".to_owned(),
        Some(ScalarKind::Bool) => {
            if value.as_bool() {
                "true".to_owned()
            } else {
                "false".to_owned()
            }
        }
        Some(ScalarKind::Byte) => format!("{:X}", value.as_byte()),
        Some(ScalarKind::Int) => value.as_int().to_string(),
        Some(ScalarKind::Float) => format_float(value.as_float()),
        Some(ScalarKind::Char) => value.as_char_lossy().to_string(),
        _ => obj_to_string(heap, value.as_obj()),
    }
}

fn format_float(value: f64) -> String {
    if value.is_nan() {
        "nan".to_owned()
    } else if value.is_infinite() {
        if value < 0.0 {
            "-inf".to_owned()
        } else {
            "inf".to_owned()
        }
    } else {
        format!("{value}")
    }
}

/// Renders an object the way `O2S` does.
pub fn obj_to_string(heap: &Heap, obj: ObjRef) -> String {
    match heap.get(obj) {
        Obj::Str(value) => value.clone(),
        Obj::AnyScalar { value, kind } => {
            value_to_string(heap, *value, &Type::Scalar(*kind))
        }
        Obj::Tuple { elements, types } => {
            let mut buf = String::from("(");
            for (i, (value, typ)) in elements.iter().zip(types).enumerate() {
                if i > 0 {
                    buf.push_str(", ");
                }
                buf.push_str(&value_to_string(heap, *value, typ));
            }
            buf.push(')');
            buf
        }
        Obj::List(repr) => {
            let element = repr.element_type();
            let mut buf = String::from("[");
            for index in 0..repr.len() {
                if index > 0 {
                    buf.push_str(", ");
                }
                buf.push_str(&value_to_string(heap, repr.load(index), &element));
            }
            buf.push(']');
            buf
        }
        Obj::Set(repr) => {
            let element = repr.element_type();
            let mut buf = String::from("@[");
            for (i, value) in repr.items().into_iter().enumerate() {
                if i > 0 {
                    buf.push_str(", ");
                }
                buf.push_str(&value_to_string(heap, value, &element));
            }
            buf.push(']');
            buf
        }
        Obj::Dict(repr) => {
            let mut buf = String::from("@[");
            for (i, (key, value)) in repr.items().into_iter().enumerate() {
                if i > 0 {
                    buf.push_str(", ");
                }
                buf.push_str(&value_to_string(heap, key, &repr.key));
                buf.push_str(": ");
                buf.push_str(&value_to_string(heap, value, &repr.value));
            }
            buf.push(']');
            buf
        }
        _ => format!("({})@{}", type_of(heap, obj), obj.0),
    }
}
