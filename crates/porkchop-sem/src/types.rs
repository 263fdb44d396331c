//! The type lattice.
//!
//! Types are a sum over scalars and six compound shapes. Equality is deep
//! and structural (derived), assignability adds the NONE/NEVER/ANY rules,
//! and every type round-trips through a compact descriptor string used in
//! bytecode operands.

use std::fmt;

use thiserror::Error;

/// The nine scalar types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Any,
    None,
    Never,
    Bool,
    Byte,
    Int,
    Float,
    Char,
    String,
}

impl ScalarKind {
    pub fn name(self) -> &'static str {
        match self {
            ScalarKind::Any => "any",
            ScalarKind::None => "none",
            ScalarKind::Never => "never",
            ScalarKind::Bool => "bool",
            ScalarKind::Byte => "byte",
            ScalarKind::Int => "int",
            ScalarKind::Float => "float",
            ScalarKind::Char => "char",
            ScalarKind::String => "string",
        }
    }

    pub fn descriptor(self) -> char {
        match self {
            ScalarKind::Any => 'a',
            ScalarKind::None => 'v',
            ScalarKind::Never => 'n',
            ScalarKind::Bool => 'z',
            ScalarKind::Byte => 'b',
            ScalarKind::Int => 'i',
            ScalarKind::Float => 'f',
            ScalarKind::Char => 'c',
            ScalarKind::String => 's',
        }
    }

    /// Maps a type name to its scalar kind, for the type parser.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "any" => ScalarKind::Any,
            "none" => ScalarKind::None,
            "never" => ScalarKind::Never,
            "bool" => ScalarKind::Bool,
            "byte" => ScalarKind::Byte,
            "int" => ScalarKind::Int,
            "float" => ScalarKind::Float,
            "char" => ScalarKind::Char,
            "string" => ScalarKind::String,
            _ => return None,
        })
    }
}

/// A Porkchop type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    Scalar(ScalarKind),
    /// Heterogeneous tuple, n >= 2.
    Tuple(Vec<Type>),
    List(Box<Type>),
    Set(Box<Type>),
    Dict(Box<Type>, Box<Type>),
    /// Parameters and return type.
    Func(Vec<Type>, Box<Type>),
    Iter(Box<Type>),
}

impl Type {
    pub const ANY: Type = Type::Scalar(ScalarKind::Any);
    pub const NONE: Type = Type::Scalar(ScalarKind::None);
    pub const NEVER: Type = Type::Scalar(ScalarKind::Never);
    pub const BOOL: Type = Type::Scalar(ScalarKind::Bool);
    pub const BYTE: Type = Type::Scalar(ScalarKind::Byte);
    pub const INT: Type = Type::Scalar(ScalarKind::Int);
    pub const FLOAT: Type = Type::Scalar(ScalarKind::Float);
    pub const CHAR: Type = Type::Scalar(ScalarKind::Char);
    pub const STRING: Type = Type::Scalar(ScalarKind::String);

    pub fn list(element: Type) -> Type {
        Type::List(Box::new(element))
    }

    pub fn set(element: Type) -> Type {
        Type::Set(Box::new(element))
    }

    pub fn dict(key: Type, value: Type) -> Type {
        Type::Dict(Box::new(key), Box::new(value))
    }

    pub fn func(parameters: Vec<Type>, ret: Type) -> Type {
        Type::Func(parameters, Box::new(ret))
    }

    pub fn iter(element: Type) -> Type {
        Type::Iter(Box::new(element))
    }

    #[inline]
    pub fn scalar(&self) -> Option<ScalarKind> {
        match self {
            Type::Scalar(kind) => Some(*kind),
            _ => None,
        }
    }

    #[inline]
    pub fn is_any(&self) -> bool {
        matches!(self, Type::Scalar(ScalarKind::Any))
    }

    #[inline]
    pub fn is_none(&self) -> bool {
        matches!(self, Type::Scalar(ScalarKind::None))
    }

    #[inline]
    pub fn is_never(&self) -> bool {
        matches!(self, Type::Scalar(ScalarKind::Never))
    }

    #[inline]
    pub fn is_bool(&self) -> bool {
        matches!(self, Type::Scalar(ScalarKind::Bool))
    }

    #[inline]
    pub fn is_byte(&self) -> bool {
        matches!(self, Type::Scalar(ScalarKind::Byte))
    }

    #[inline]
    pub fn is_int(&self) -> bool {
        matches!(self, Type::Scalar(ScalarKind::Int))
    }

    #[inline]
    pub fn is_float(&self) -> bool {
        matches!(self, Type::Scalar(ScalarKind::Float))
    }

    #[inline]
    pub fn is_char(&self) -> bool {
        matches!(self, Type::Scalar(ScalarKind::Char))
    }

    #[inline]
    pub fn is_string(&self) -> bool {
        matches!(self, Type::Scalar(ScalarKind::String))
    }

    /// int or float.
    #[inline]
    pub fn is_arithmetic(&self) -> bool {
        matches!(self, Type::Scalar(ScalarKind::Int | ScalarKind::Float))
    }

    /// int or byte.
    #[inline]
    pub fn is_integral(&self) -> bool {
        matches!(self, Type::Scalar(ScalarKind::Int | ScalarKind::Byte))
    }

    /// int or char.
    #[inline]
    pub fn is_char_like(&self) -> bool {
        matches!(self, Type::Scalar(ScalarKind::Int | ScalarKind::Char))
    }

    /// True for types whose representation is a primitive word: none,
    /// bool, byte, char, int, float. Everything else (including `any` and
    /// `string`) lives on the GC heap, and this predicate drives both the
    /// reference tags on operand-stack slots and the boxing decisions in
    /// the code generator.
    #[inline]
    pub fn is_value_based(&self) -> bool {
        matches!(
            self,
            Type::Scalar(
                ScalarKind::None
                    | ScalarKind::Bool
                    | ScalarKind::Byte
                    | ScalarKind::Char
                    | ScalarKind::Int
                    | ScalarKind::Float
            )
        )
    }

    /// The assignability relation: `self` is the destination.
    ///
    /// Equality plus: NONE accepts any non-NEVER; NEVER accepts nothing
    /// but is assignable into anything; ANY accepts any non-NEVER; tuples
    /// are assignable elementwise; Func is covariant in return and
    /// invariant in parameters; Iter is covariant in its element.
    pub fn assignable_from(&self, source: &Type) -> bool {
        if self == source {
            return true;
        }
        if source.is_never() {
            return !self.is_never();
        }
        match self {
            Type::Scalar(ScalarKind::None) => true,
            Type::Scalar(ScalarKind::Any) => true,
            Type::Scalar(_) => false,
            Type::Tuple(elements) => match source {
                Type::Tuple(others) => {
                    elements.len() == others.len()
                        && elements
                            .iter()
                            .zip(others)
                            .all(|(e, o)| e.assignable_from(o))
                }
                _ => false,
            },
            Type::Func(parameters, ret) => match source {
                Type::Func(other_parameters, other_ret) => {
                    parameters == other_parameters
                        && (ret.assignable_from(other_ret)
                            || ret.is_never() && other_ret.is_never())
                }
                _ => false,
            },
            Type::Iter(element) => match source {
                Type::Iter(other) => element.assignable_from(other),
                _ => false,
            },
            _ => false,
        }
    }

    /// Element type of an iterable: List/Set/Iter yield their element,
    /// Dict yields `(K, V)`. `forbid_iter` excludes Iter, matching the
    /// positions where only materialised collections are allowed.
    pub fn element_of(&self, forbid_iter: bool) -> Option<Type> {
        match self {
            Type::List(element) | Type::Set(element) => Some((**element).clone()),
            Type::Dict(key, value) => {
                Some(Type::Tuple(vec![(**key).clone(), (**value).clone()]))
            }
            Type::Iter(element) if !forbid_iter => Some((**element).clone()),
            _ => None,
        }
    }

    /// The common supertype of two branches, if any: equal types, NEVER
    /// yielding to the other side, or NONE swallowing both.
    pub fn either_of(&self, other: &Type) -> Option<Type> {
        if self == other {
            return Some(self.clone());
        }
        if self.is_never() {
            return Some(other.clone());
        }
        if other.is_never() {
            return Some(self.clone());
        }
        if self.is_none() || other.is_none() {
            return Some(Type::NONE);
        }
        None
    }

    /// Serialises to the compact descriptor grammar, e.g. `i`, `[i`,
    /// `@ii`, `(ii)`, `$ii:v`, `*i`.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        self.serialize_into(&mut out);
        out
    }

    fn serialize_into(&self, out: &mut String) {
        match self {
            Type::Scalar(kind) => out.push(kind.descriptor()),
            Type::Tuple(elements) => {
                out.push('(');
                for element in elements {
                    element.serialize_into(out);
                }
                out.push(')');
            }
            Type::List(element) => {
                out.push('[');
                element.serialize_into(out);
            }
            Type::Set(element) => {
                out.push('{');
                element.serialize_into(out);
            }
            Type::Dict(key, value) => {
                out.push('@');
                key.serialize_into(out);
                value.serialize_into(out);
            }
            Type::Func(parameters, ret) => {
                out.push('$');
                for parameter in parameters {
                    parameter.serialize_into(out);
                }
                out.push(':');
                ret.serialize_into(out);
            }
            Type::Iter(element) => {
                out.push('*');
                element.serialize_into(out);
            }
        }
    }

    /// Parses one descriptor from the front of `bytes`, returning the
    /// type and how many bytes it consumed.
    pub fn deserialize(bytes: &[u8]) -> Result<(Type, usize), DescriptorError> {
        let mut cursor = Cursor { bytes, pos: 0 };
        let ty = cursor.parse()?;
        Ok((ty, cursor.pos))
    }
}

/// How a runtime value of a type is compared and hashed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdentityKind {
    /// Raw 64-bit identity (none/bool/byte/char/int).
    SelfBits,
    /// IEEE 754 value comparison.
    Float,
    /// Deep object equality through the heap.
    Object,
}

/// The identity discipline of a type's runtime representation.
pub fn identity_kind(ty: &Type) -> IdentityKind {
    if ty.is_float() {
        IdentityKind::Float
    } else if ty.is_value_based() {
        IdentityKind::SelfBits
    } else {
        IdentityKind::Object
    }
}

/// A malformed type descriptor.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("unexpected end of type descriptor")]
    UnexpectedEnd,
    #[error("invalid type descriptor byte {0:#04x} at offset {1}")]
    InvalidByte(u8, usize),
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn next(&mut self) -> Result<u8, DescriptorError> {
        let byte = *self
            .bytes
            .get(self.pos)
            .ok_or(DescriptorError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(byte)
    }

    fn peek(&self) -> Result<u8, DescriptorError> {
        self.bytes
            .get(self.pos)
            .copied()
            .ok_or(DescriptorError::UnexpectedEnd)
    }

    fn parse(&mut self) -> Result<Type, DescriptorError> {
        Ok(match self.next()? {
            b'a' => Type::ANY,
            b'v' => Type::NONE,
            b'n' => Type::NEVER,
            b'z' => Type::BOOL,
            b'b' => Type::BYTE,
            b'i' => Type::INT,
            b'f' => Type::FLOAT,
            b'c' => Type::CHAR,
            b's' => Type::STRING,
            b'(' => {
                let mut elements = Vec::new();
                while self.peek()? != b')' {
                    elements.push(self.parse()?);
                }
                self.pos += 1;
                Type::Tuple(elements)
            }
            b'[' => Type::list(self.parse()?),
            b'{' => Type::set(self.parse()?),
            b'@' => {
                let key = self.parse()?;
                let value = self.parse()?;
                Type::dict(key, value)
            }
            b'$' => {
                let mut parameters = Vec::new();
                while self.peek()? != b':' {
                    parameters.push(self.parse()?);
                }
                self.pos += 1;
                Type::func(parameters, self.parse()?)
            }
            b'*' => Type::iter(self.parse()?),
            byte => return Err(DescriptorError::InvalidByte(byte, self.pos - 1)),
        })
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Scalar(kind) => f.write_str(kind.name()),
            Type::Tuple(elements) => {
                write!(f, "(")?;
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{element}")?;
                }
                write!(f, ")")
            }
            Type::List(element) => write!(f, "[{element}]"),
            Type::Set(element) => write!(f, "@[{element}]"),
            Type::Dict(key, value) => write!(f, "@[{key}: {value}]"),
            Type::Func(parameters, ret) => {
                write!(f, "(")?;
                for (i, parameter) in parameters.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{parameter}")?;
                }
                write!(f, "): {ret}")
            }
            Type::Iter(element) => write!(f, "*{element}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(ty: &Type) {
        let descriptor = ty.serialize();
        let (parsed, consumed) = Type::deserialize(descriptor.as_bytes()).unwrap();
        assert_eq!(&parsed, ty, "descriptor {descriptor}");
        assert_eq!(consumed, descriptor.len());
    }

    #[test]
    fn test_serialize() {
        assert_eq!(Type::INT.serialize(), "i");
        assert_eq!(Type::list(Type::INT).serialize(), "[i");
        assert_eq!(Type::dict(Type::INT, Type::INT).serialize(), "@ii");
        assert_eq!(Type::Tuple(vec![Type::INT, Type::INT]).serialize(), "(ii)");
        assert_eq!(
            Type::func(vec![Type::INT, Type::INT], Type::NONE).serialize(),
            "$ii:v"
        );
        assert_eq!(Type::iter(Type::INT).serialize(), "*i");
        assert_eq!(Type::set(Type::STRING).serialize(), "{s");
    }

    #[test]
    fn test_roundtrip() {
        let samples = [
            Type::ANY,
            Type::NEVER,
            Type::STRING,
            Type::list(Type::list(Type::BYTE)),
            Type::set(Type::CHAR),
            Type::dict(Type::STRING, Type::list(Type::INT)),
            Type::Tuple(vec![Type::INT, Type::FLOAT, Type::STRING]),
            Type::func(vec![], Type::NEVER),
            Type::func(
                vec![Type::list(Type::STRING)],
                Type::Tuple(vec![Type::INT, Type::INT]),
            ),
            Type::iter(Type::Tuple(vec![Type::INT, Type::STRING])),
        ];
        for ty in &samples {
            roundtrip(ty);
        }
    }

    #[test]
    fn test_deserialize_errors() {
        assert_eq!(
            Type::deserialize(b"["),
            Err(DescriptorError::UnexpectedEnd)
        );
        assert!(matches!(
            Type::deserialize(b"q"),
            Err(DescriptorError::InvalidByte(b'q', 0))
        ));
    }

    #[test]
    fn test_display() {
        assert_eq!(Type::dict(Type::INT, Type::STRING).to_string(), "@[int: string]");
        assert_eq!(
            Type::func(vec![Type::INT], Type::INT).to_string(),
            "(int): int"
        );
        assert_eq!(Type::iter(Type::INT).to_string(), "*int");
        assert_eq!(Type::set(Type::INT).to_string(), "@[int]");
    }

    #[test]
    fn test_assignability_properties() {
        let samples = [
            Type::INT,
            Type::BOOL,
            Type::STRING,
            Type::ANY,
            Type::NONE,
            Type::list(Type::INT),
            Type::func(vec![Type::INT], Type::NONE),
        ];
        for ty in &samples {
            // reflexivity
            assert!(ty.assignable_from(ty));
            // never is assignable into anything
            assert!(ty.assignable_from(&Type::NEVER) || ty.is_never());
            // nothing is assignable into never
            assert!(!Type::NEVER.assignable_from(ty));
            // any and none accept every non-never
            assert!(Type::ANY.assignable_from(ty));
            assert!(Type::NONE.assignable_from(ty));
        }
        assert!(!Type::INT.assignable_from(&Type::FLOAT));
        assert!(!Type::list(Type::INT).assignable_from(&Type::list(Type::BYTE)));
    }

    #[test]
    fn test_func_assignability() {
        // covariant return
        let never_fn = Type::func(vec![Type::INT], Type::NEVER);
        let none_fn = Type::func(vec![Type::INT], Type::NONE);
        assert!(none_fn.assignable_from(&never_fn));
        assert!(never_fn.assignable_from(&never_fn));
        assert!(!never_fn.assignable_from(&none_fn));
        // invariant parameters
        let wider = Type::func(vec![Type::NONE], Type::NONE);
        assert!(!none_fn.assignable_from(&wider));
    }

    #[test]
    fn test_element_of() {
        assert_eq!(Type::list(Type::INT).element_of(false), Some(Type::INT));
        assert_eq!(
            Type::dict(Type::INT, Type::STRING).element_of(false),
            Some(Type::Tuple(vec![Type::INT, Type::STRING]))
        );
        assert_eq!(Type::iter(Type::INT).element_of(true), None);
        assert_eq!(Type::iter(Type::INT).element_of(false), Some(Type::INT));
        assert_eq!(Type::INT.element_of(false), None);
    }

    #[test]
    fn test_either_of() {
        assert_eq!(Type::INT.either_of(&Type::INT), Some(Type::INT));
        assert_eq!(Type::NEVER.either_of(&Type::INT), Some(Type::INT));
        assert_eq!(Type::INT.either_of(&Type::NEVER), Some(Type::INT));
        assert_eq!(Type::INT.either_of(&Type::NONE), Some(Type::NONE));
        assert_eq!(Type::INT.either_of(&Type::FLOAT), None);
    }

    #[test]
    fn test_value_based() {
        assert!(Type::INT.is_value_based());
        assert!(Type::NONE.is_value_based());
        assert!(!Type::STRING.is_value_based());
        assert!(!Type::ANY.is_value_based());
        assert!(!Type::list(Type::INT).is_value_based());
    }
}
