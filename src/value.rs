//! `AnyValue`: the closed, allow-listed value domain carried in frame slots
//! and the yielded-value channel.
//!
//! Nothing outside this enum (and `Vec`/`Option` compositions of it) may
//! ever be written into a [`crate::frame::FrameRecord`]. That closure
//! property is what lets the [`crate::validator::Validator`] and
//! [`crate::serializer`] reason about a continuation without trusting the
//! code that produced it.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One value closed over the allow-listed primitive set (§3 `AnyValue`).
///
/// `Timestamp` and `Duration` are both carried as signed millisecond counts
/// (UTC epoch millis, and a plain millisecond span respectively) rather than
/// `chrono` types directly, so that equality and the wire encoding stay
/// exact integers rather than floating-point-adjacent calendar math.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum AnyValue {
    Null,
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Decimal(Decimal),
    Char(char),
    String(String),
    /// Milliseconds since the Unix epoch, UTC.
    Timestamp(i64),
    /// A duration expressed in milliseconds.
    Duration(i64),
    Uuid(Uuid),
    /// Homogeneous or heterogeneous array of allow-listed values.
    Array(Vec<AnyValue>),
}

/// A type allow-list entry. Mirrors the shape of [`AnyValue`] one level up,
/// plus the `Nullable`/`Object` markers the validator's slot-type
/// compatibility rules need (§4.H.2.e).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeRef {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Decimal,
    Char,
    String,
    Timestamp,
    Duration,
    Uuid,
    Array(Box<TypeRef>),
    Nullable(Box<TypeRef>),
    /// Declared type accepts any allow-listed value (validator treats this
    /// as a supertype of everything, §4.H.2.e "declared is object").
    Object,
}

impl AnyValue {
    /// The dynamic [`TypeRef`] of this value, or `None` for `Null` (a null
    /// has no dynamic type of its own — compatibility with `Null` is decided
    /// by the *declared* type being `Nullable` or `Object`).
    pub fn type_ref(&self) -> Option<TypeRef> {
        Some(match self {
            AnyValue::Null => return None,
            AnyValue::Bool(_) => TypeRef::Bool,
            AnyValue::I8(_) => TypeRef::I8,
            AnyValue::I16(_) => TypeRef::I16,
            AnyValue::I32(_) => TypeRef::I32,
            AnyValue::I64(_) => TypeRef::I64,
            AnyValue::U8(_) => TypeRef::U8,
            AnyValue::U16(_) => TypeRef::U16,
            AnyValue::U32(_) => TypeRef::U32,
            AnyValue::U64(_) => TypeRef::U64,
            AnyValue::F32(_) => TypeRef::F32,
            AnyValue::F64(_) => TypeRef::F64,
            AnyValue::Decimal(_) => TypeRef::Decimal,
            AnyValue::Char(_) => TypeRef::Char,
            AnyValue::String(_) => TypeRef::String,
            AnyValue::Timestamp(_) => TypeRef::Timestamp,
            AnyValue::Duration(_) => TypeRef::Duration,
            AnyValue::Uuid(_) => TypeRef::Uuid,
            AnyValue::Array(items) => {
                // An empty array has no element type to report; callers that
                // need one should treat it as compatible with any declared
                // array type. A non-empty array reports its first element's
                // type — the allow-list check below still walks every
                // element independently, so a heterogeneous array is still
                // fully validated even though this summary type is lossy.
                let elem = items.first().and_then(AnyValue::type_ref);
                TypeRef::Array(Box::new(elem.unwrap_or(TypeRef::Object)))
            }
        })
    }

    /// A short name for error messages (`DisallowedType(name, ..)`).
    pub fn type_name(&self) -> &'static str {
        match self {
            AnyValue::Null => "null",
            AnyValue::Bool(_) => "bool",
            AnyValue::I8(_) => "i8",
            AnyValue::I16(_) => "i16",
            AnyValue::I32(_) => "i32",
            AnyValue::I64(_) => "i64",
            AnyValue::U8(_) => "u8",
            AnyValue::U16(_) => "u16",
            AnyValue::U32(_) => "u32",
            AnyValue::U64(_) => "u64",
            AnyValue::F32(_) => "f32",
            AnyValue::F64(_) => "f64",
            AnyValue::Decimal(_) => "decimal",
            AnyValue::Char(_) => "char",
            AnyValue::String(_) => "string",
            AnyValue::Timestamp(_) => "timestamp",
            AnyValue::Duration(_) => "duration",
            AnyValue::Uuid(_) => "uuid",
            AnyValue::Array(_) => "array",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AnyValue::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_has_no_type_ref() {
        assert_eq!(AnyValue::Null.type_ref(), None);
    }

    #[test]
    fn primitive_type_refs_round_trip_through_name() {
        assert_eq!(AnyValue::I64(5).type_ref(), Some(TypeRef::I64));
        assert_eq!(AnyValue::Bool(true).type_name(), "bool");
    }

    #[test]
    fn array_type_ref_reports_element_type() {
        let arr = AnyValue::Array(vec![AnyValue::I64(1), AnyValue::I64(2)]);
        assert_eq!(
            arr.type_ref(),
            Some(TypeRef::Array(Box::new(TypeRef::I64)))
        );
    }

    #[test]
    fn empty_array_reports_object_element_type() {
        let arr = AnyValue::Array(vec![]);
        assert_eq!(arr.type_ref(), Some(TypeRef::Array(Box::new(TypeRef::Object))));
    }

    #[test]
    fn serde_json_round_trips_any_value() {
        let v = AnyValue::Array(vec![
            AnyValue::I64(1),
            AnyValue::String("s".into()),
            AnyValue::F64(3.5),
            AnyValue::Bool(true),
            AnyValue::Null,
        ]);
        let json = serde_json::to_string(&v).unwrap();
        let back: AnyValue = serde_json::from_str(&json).unwrap();
        assert_eq!(v, back);
    }
}
