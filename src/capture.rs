//! Frame capture helpers (§4.C): the small toolkit transformed code calls
//! from inside its suspension-signal catch block to turn hoisted locals
//! into a [`FrameRecord`] and prepend it to the chain being built.

use crate::error::ContinuumError;
use crate::frame::FrameRecord;
use crate::value::AnyValue;
use std::sync::Arc;

/// Copies `values` positionally into a slot array. Transformed code calls
/// this with its hoisted locals in declaration order.
pub fn pack_slots(values: impl IntoIterator<Item = AnyValue>) -> Vec<AnyValue> {
    values.into_iter().collect()
}

/// A value a slot can be coerced to on restore. Implemented for every
/// `AnyValue` variant's payload type plus `AnyValue` itself (identity).
pub trait FromSlot: Sized {
    /// The value returned for a `Null` slot (§4.C "on null returns the
    /// type's zero value").
    fn zero_value() -> Self;
    fn from_any(value: &AnyValue) -> Option<Self>;
}

macro_rules! impl_from_slot {
    ($ty:ty, $variant:ident, $zero:expr) => {
        impl FromSlot for $ty {
            fn zero_value() -> Self {
                $zero
            }
            fn from_any(value: &AnyValue) -> Option<Self> {
                match value {
                    AnyValue::$variant(v) => Some(v.clone()),
                    _ => None,
                }
            }
        }
    };
}

impl_from_slot!(bool, Bool, false);
impl_from_slot!(i8, I8, 0);
impl_from_slot!(i16, I16, 0);
impl_from_slot!(i32, I32, 0);
impl_from_slot!(i64, I64, 0);
impl_from_slot!(u8, U8, 0);
impl_from_slot!(u16, U16, 0);
impl_from_slot!(u32, U32, 0);
impl_from_slot!(u64, U64, 0);
impl_from_slot!(f32, F32, 0.0);
impl_from_slot!(f64, F64, 0.0);
impl_from_slot!(char, Char, '\0');
impl_from_slot!(String, String, String::new());

impl FromSlot for AnyValue {
    fn zero_value() -> Self {
        AnyValue::Null
    }
    fn from_any(value: &AnyValue) -> Option<Self> {
        Some(value.clone())
    }
}

/// Reads slot `i`, coercing to `T`. `Null` yields `T::zero_value()`
/// (§4.C); an out-of-range index is always an error, never a silent
/// default — it indicates a bug in the transformer's generated code, not a
/// reachable runtime condition.
pub fn get_slot<T: FromSlot>(slots: &[AnyValue], i: usize) -> Result<T, ContinuumError> {
    let value = slots
        .get(i)
        .ok_or_else(|| ContinuumError::SlotIndexOutOfRange {
            index: i as u16,
            len: slots.len(),
        })?;
    if value.is_null() {
        return Ok(T::zero_value());
    }
    T::from_any(value).ok_or_else(|| ContinuumError::SlotTypeMismatch {
        frame_index: 0,
        slot_index: i,
        actual: value.type_name().to_string(),
        declared: std::any::type_name::<T>().to_string(),
    })
}

/// Builds a [`FrameRecord`] from a frame's hoisted locals and prepends it
/// to `caller` (the chain accumulated so far while unwinding).
pub fn capture_frame(
    method_token: i32,
    yield_point_id: i32,
    slots: Vec<AnyValue>,
    caller: Option<Arc<FrameRecord>>,
) -> FrameRecord {
    FrameRecord::new(method_token, yield_point_id, slots, caller)
}
