//! Operand-stack values.
//!
//! A slot is an untagged 64-bit word; whether it holds a reference is
//! recorded in the frame's parallel tag vector, never in the value
//! itself. Floats travel as IEEE 754 bit patterns, object references as
//! heap slot indices.

/// A reference to a heap object: an index into the heap's slot arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObjRef(pub u32);

/// One operand-stack slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Value(pub u64);

impl Value {
    /// The unit value, and the zero of every value scalar.
    pub const NONE: Value = Value(0);

    /// The uninitialised reference slot. Never a valid [`ObjRef`]; the
    /// collector skips it.
    pub const NULL_OBJ: Value = Value(u64::MAX);

    #[inline]
    pub fn from_bool(value: bool) -> Self {
        Self(value as u64)
    }

    #[inline]
    pub fn from_int(value: i64) -> Self {
        Self(value as u64)
    }

    #[inline]
    pub fn from_float(value: f64) -> Self {
        Self(value.to_bits())
    }

    #[inline]
    pub fn from_byte(value: u8) -> Self {
        Self(value as u64)
    }

    #[inline]
    pub fn from_char(value: char) -> Self {
        Self(value as u64)
    }

    #[inline]
    pub fn from_obj(obj: ObjRef) -> Self {
        Self(obj.0 as u64)
    }

    #[inline]
    pub fn as_bool(self) -> bool {
        self.0 != 0
    }

    #[inline]
    pub fn as_int(self) -> i64 {
        self.0 as i64
    }

    #[inline]
    pub fn as_float(self) -> f64 {
        f64::from_bits(self.0)
    }

    #[inline]
    pub fn as_byte(self) -> u8 {
        self.0 as u8
    }

    #[inline]
    pub fn as_char_lossy(self) -> char {
        char::from_u32(self.0 as u32).unwrap_or('\u{FFFD}')
    }

    #[inline]
    pub fn as_obj(self) -> ObjRef {
        debug_assert!(self != Self::NULL_OBJ, "dereferencing a null reference");
        ObjRef(self.0 as u32)
    }

    #[inline]
    pub fn is_null_obj(self) -> bool {
        self == Self::NULL_OBJ
    }

    #[inline]
    pub fn bits(self) -> u64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrips() {
        assert_eq!(Value::from_int(-9).as_int(), -9);
        assert_eq!(Value::from_float(0.5).as_float(), 0.5);
        assert_eq!(Value::from_byte(0xAB).as_byte(), 0xAB);
        assert_eq!(Value::from_char('中').as_char_lossy(), '中');
        assert!(Value::from_bool(true).as_bool());
        assert_eq!(Value::from_obj(ObjRef(7)).as_obj(), ObjRef(7));
    }

    #[test]
    fn test_null() {
        assert!(Value::NULL_OBJ.is_null_obj());
        assert!(!Value::NONE.is_null_obj());
    }
}
