//! Binary serializer (§4.I): a structured, self-describing codec for
//! [`ContinuationState`], LZ4-compressed as an outer wrapper. Every
//! `AnyValue` is tagged with its dynamic type on the wire so decode can
//! reject anything outside the allow-list without guessing; the frame
//! chain is reconstructed iteratively, never by recursing on `caller`
//! links, so a decoder facing a byte stream claiming an enormous depth
//! fails with a bound rather than blowing the native stack.

use crate::error::ContinuumError;
use crate::frame::{ContinuationState, FrameRecord};
use crate::graph_tracker::{DecodeTracker, EncodeTracker};
use crate::value::AnyValue;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Id written on the wire for an array that was never registered with the
/// encode-side tracker (today, only an empty array — `Vec::as_ptr()` on an
/// empty `Vec` is a shared dangling pointer, not a real identity). Never
/// assigned by [`EncodeTracker::try_register`], whose ids start at 0.
const UNTRACKED_ARRAY_ID: i64 = -1;

/// Conservative bounds applied only while decoding untrusted bytes; the
/// encode path never needs them since it only ever walks a chain it
/// already holds fully formed in memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SerializerLimits {
    pub max_slots_per_frame: usize,
    pub max_stack_depth: usize,
    pub max_string_len: usize,
    pub max_array_len: usize,
}

impl Default for SerializerLimits {
    fn default() -> Self {
        Self {
            max_slots_per_frame: 4_096,
            max_stack_depth: 1_000,
            max_string_len: 1 << 20,
            max_array_len: 1 << 16,
        }
    }
}

pub struct BinarySerializer {
    pub limits: SerializerLimits,
}

impl Default for BinarySerializer {
    fn default() -> Self {
        Self::new(SerializerLimits::default())
    }
}

impl BinarySerializer {
    pub fn new(limits: SerializerLimits) -> Self {
        Self { limits }
    }

    pub fn serialize(&self, state: &ContinuationState) -> Result<Vec<u8>, ContinuumError> {
        let mut buf = Vec::new();
        let mut tracker = EncodeTracker::new();
        write_u32(&mut buf, state.version);
        write_option_any_value(&mut buf, &mut tracker, &state.yielded_value)?;

        let frames = flatten_chain(&state.stack_head);
        write_u32(&mut buf, frames.len() as u32);
        for frame in &frames {
            write_i32(&mut buf, frame.method_token);
            write_i32(&mut buf, frame.yield_point_id);
            write_u32(&mut buf, frame.slots.len() as u32);
            for slot in &frame.slots {
                write_any_value(&mut buf, &mut tracker, slot)?;
            }
        }

        Ok(lz4_flex::compress_prepend_size(&buf))
    }

    pub fn deserialize(&self, bytes: &[u8]) -> Result<ContinuationState, ContinuumError> {
        let raw = lz4_flex::decompress_size_prepended(bytes)
            .map_err(|e| ContinuumError::Codec(e.to_string()))?;
        let mut cursor = Cursor { buf: &raw, pos: 0 };
        let mut tracker: DecodeTracker<Vec<AnyValue>> = DecodeTracker::with_default_limit();

        let version = cursor.read_u32()?;
        let yielded_value = read_option_any_value(&mut cursor, &mut tracker, &self.limits)?;

        let frame_count = cursor.read_u32()? as usize;
        if frame_count > self.limits.max_stack_depth {
            return Err(ContinuumError::DecodeBoundExceeded(format!(
                "frame count {frame_count} exceeds max_stack_depth {}",
                self.limits.max_stack_depth
            )));
        }

        // Read every frame's raw fields first (head to tail), then fold
        // from the tail inward — this builds the Arc chain with a single
        // forward pass and no recursion on `caller`.
        struct RawFrame {
            token: i32,
            yield_point_id: i32,
            slots: Vec<AnyValue>,
        }

        let mut raw_frames = Vec::with_capacity(frame_count.min(4096));
        for _ in 0..frame_count {
            let token = cursor.read_i32()?;
            let yield_point_id = cursor.read_i32()?;
            let slot_count = cursor.read_u32()? as usize;
            if slot_count > self.limits.max_slots_per_frame {
                return Err(ContinuumError::DecodeBoundExceeded(format!(
                    "frame slot count {slot_count} exceeds max_slots_per_frame {}",
                    self.limits.max_slots_per_frame
                )));
            }
            let mut slots = Vec::with_capacity(slot_count.min(4096));
            for _ in 0..slot_count {
                slots.push(read_any_value(&mut cursor, &mut tracker, &self.limits)?);
            }
            raw_frames.push(RawFrame {
                token,
                yield_point_id,
                slots,
            });
        }

        let mut stack_head: Option<Arc<FrameRecord>> = None;
        for raw in raw_frames.into_iter().rev() {
            stack_head = Some(Arc::new(FrameRecord::new(
                raw.token,
                raw.yield_point_id,
                raw.slots,
                stack_head,
            )));
        }

        Ok(ContinuationState {
            version,
            stack_head,
            yielded_value,
        })
    }
}

/// Innermost-first flattening of a frame chain, bounded defensively by the
/// same cycle-safe walk `get_stack_depth` uses — a chain built only by
/// `capture_frame` is always acyclic, but encode should never hang even if
/// that invariant were ever violated upstream.
fn flatten_chain(head: &Option<Arc<FrameRecord>>) -> Vec<Arc<FrameRecord>> {
    let mut frames = Vec::new();
    let mut current = head.clone();
    while let Some(frame) = current {
        current = frame.caller.clone();
        frames.push(frame);
    }
    frames
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], ContinuumError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| ContinuumError::Codec("unexpected end of buffer".to_string()))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, ContinuumError> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self) -> Result<u32, ContinuumError> {
        let bytes: [u8; 4] = self.take(4)?.try_into().unwrap();
        Ok(u32::from_le_bytes(bytes))
    }

    fn read_i32(&mut self) -> Result<i32, ContinuumError> {
        let bytes: [u8; 4] = self.take(4)?.try_into().unwrap();
        Ok(i32::from_le_bytes(bytes))
    }

    fn read_i64(&mut self) -> Result<i64, ContinuumError> {
        let bytes: [u8; 8] = self.take(8)?.try_into().unwrap();
        Ok(i64::from_le_bytes(bytes))
    }

    fn read_f32(&mut self) -> Result<f32, ContinuumError> {
        let bytes: [u8; 4] = self.take(4)?.try_into().unwrap();
        Ok(f32::from_le_bytes(bytes))
    }

    fn read_f64(&mut self) -> Result<f64, ContinuumError> {
        let bytes: [u8; 8] = self.take(8)?.try_into().unwrap();
        Ok(f64::from_le_bytes(bytes))
    }

    fn read_string(&mut self, max_len: usize) -> Result<String, ContinuumError> {
        let len = self.read_u32()? as usize;
        if len > max_len {
            return Err(ContinuumError::DecodeBoundExceeded(format!(
                "string length {len} exceeds max_string_len {max_len}"
            )));
        }
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| ContinuumError::Codec(e.to_string()))
    }
}

fn write_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn write_i32(buf: &mut Vec<u8>, v: i32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn write_i64(buf: &mut Vec<u8>, v: i64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn write_f32(buf: &mut Vec<u8>, v: f32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn write_f64(buf: &mut Vec<u8>, v: f64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    write_u32(buf, s.len() as u32);
    buf.extend_from_slice(s.as_bytes());
}

fn write_option_any_value(
    buf: &mut Vec<u8>,
    tracker: &mut EncodeTracker,
    value: &Option<AnyValue>,
) -> Result<(), ContinuumError> {
    match value {
        None => buf.push(0),
        Some(v) => {
            buf.push(1);
            write_any_value(buf, tracker, v)?;
        }
    }
    Ok(())
}

fn read_option_any_value(
    cursor: &mut Cursor,
    tracker: &mut DecodeTracker<Vec<AnyValue>>,
    limits: &SerializerLimits,
) -> Result<Option<AnyValue>, ContinuumError> {
    match cursor.read_u8()? {
        0 => Ok(None),
        1 => Ok(Some(read_any_value(cursor, tracker, limits)?)),
        tag => Err(ContinuumError::Codec(format!("bad option tag {tag}"))),
    }
}

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_I8: u8 = 2;
const TAG_I16: u8 = 3;
const TAG_I32: u8 = 4;
const TAG_I64: u8 = 5;
const TAG_U8: u8 = 6;
const TAG_U16: u8 = 7;
const TAG_U32: u8 = 8;
const TAG_U64: u8 = 9;
const TAG_F32: u8 = 10;
const TAG_F64: u8 = 11;
const TAG_DECIMAL: u8 = 12;
const TAG_CHAR: u8 = 13;
const TAG_STRING: u8 = 14;
const TAG_TIMESTAMP: u8 = 15;
const TAG_DURATION: u8 = 16;
const TAG_UUID: u8 = 17;
const TAG_ARRAY: u8 = 18;
const TAG_ARRAY_REF: u8 = 19;

fn write_any_value(
    buf: &mut Vec<u8>,
    tracker: &mut EncodeTracker,
    value: &AnyValue,
) -> Result<(), ContinuumError> {
    match value {
        AnyValue::Null => buf.push(TAG_NULL),
        AnyValue::Bool(b) => {
            buf.push(TAG_BOOL);
            buf.push(*b as u8);
        }
        AnyValue::I8(v) => {
            buf.push(TAG_I8);
            buf.push(*v as u8);
        }
        AnyValue::I16(v) => {
            buf.push(TAG_I16);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        AnyValue::I32(v) => {
            buf.push(TAG_I32);
            write_i32(buf, *v);
        }
        AnyValue::I64(v) => {
            buf.push(TAG_I64);
            write_i64(buf, *v);
        }
        AnyValue::U8(v) => {
            buf.push(TAG_U8);
            buf.push(*v);
        }
        AnyValue::U16(v) => {
            buf.push(TAG_U16);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        AnyValue::U32(v) => {
            buf.push(TAG_U32);
            write_u32(buf, *v);
        }
        AnyValue::U64(v) => {
            buf.push(TAG_U64);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        AnyValue::F32(v) => {
            buf.push(TAG_F32);
            write_f32(buf, *v);
        }
        AnyValue::F64(v) => {
            buf.push(TAG_F64);
            write_f64(buf, *v);
        }
        AnyValue::Decimal(v) => {
            buf.push(TAG_DECIMAL);
            write_string(buf, &v.to_string());
        }
        AnyValue::Char(c) => {
            buf.push(TAG_CHAR);
            write_u32(buf, *c as u32);
        }
        AnyValue::String(s) => {
            buf.push(TAG_STRING);
            write_string(buf, s);
        }
        AnyValue::Timestamp(v) => {
            buf.push(TAG_TIMESTAMP);
            write_i64(buf, *v);
        }
        AnyValue::Duration(v) => {
            buf.push(TAG_DURATION);
            write_i64(buf, *v);
        }
        AnyValue::Uuid(u) => {
            buf.push(TAG_UUID);
            buf.extend_from_slice(u.as_bytes());
        }
        AnyValue::Array(items) => {
            // Identity by the backing allocation's address (§4.K): a
            // repeat of the same array writes a back-reference instead of
            // re-encoding its contents. An empty `Vec`'s pointer is a
            // shared dangling sentinel, not a real identity, so it's never
            // run through the tracker.
            if items.is_empty() {
                buf.push(TAG_ARRAY);
                write_i64(buf, UNTRACKED_ARRAY_ID);
                write_u32(buf, 0);
            } else {
                let ptr = items.as_ptr() as usize;
                let (id, is_new) = tracker.try_register(ptr);
                if is_new {
                    buf.push(TAG_ARRAY);
                    write_i64(buf, id);
                    write_u32(buf, items.len() as u32);
                    for item in items {
                        write_any_value(buf, tracker, item)?;
                    }
                } else {
                    buf.push(TAG_ARRAY_REF);
                    write_i64(buf, id);
                }
            }
        }
    }
    Ok(())
}

fn read_any_value(
    cursor: &mut Cursor,
    tracker: &mut DecodeTracker<Vec<AnyValue>>,
    limits: &SerializerLimits,
) -> Result<AnyValue, ContinuumError> {
    let tag = cursor.read_u8()?;
    Ok(match tag {
        TAG_NULL => AnyValue::Null,
        TAG_BOOL => AnyValue::Bool(cursor.read_u8()? != 0),
        TAG_I8 => AnyValue::I8(cursor.read_u8()? as i8),
        TAG_I16 => {
            let bytes: [u8; 2] = cursor.take(2)?.try_into().unwrap();
            AnyValue::I16(i16::from_le_bytes(bytes))
        }
        TAG_I32 => AnyValue::I32(cursor.read_i32()?),
        TAG_I64 => AnyValue::I64(cursor.read_i64()?),
        TAG_U8 => AnyValue::U8(cursor.read_u8()?),
        TAG_U16 => {
            let bytes: [u8; 2] = cursor.take(2)?.try_into().unwrap();
            AnyValue::U16(u16::from_le_bytes(bytes))
        }
        TAG_U32 => AnyValue::U32(cursor.read_u32()?),
        TAG_U64 => {
            let bytes: [u8; 8] = cursor.take(8)?.try_into().unwrap();
            AnyValue::U64(u64::from_le_bytes(bytes))
        }
        TAG_F32 => AnyValue::F32(cursor.read_f32()?),
        TAG_F64 => AnyValue::F64(cursor.read_f64()?),
        TAG_DECIMAL => {
            let s = cursor.read_string(limits.max_string_len)?;
            AnyValue::Decimal(Decimal::from_str(&s).map_err(|e| ContinuumError::Codec(e.to_string()))?)
        }
        TAG_CHAR => {
            let code = cursor.read_u32()?;
            AnyValue::Char(char::from_u32(code).ok_or_else(|| ContinuumError::Codec(format!("bad char codepoint {code}")))?)
        }
        TAG_STRING => AnyValue::String(cursor.read_string(limits.max_string_len)?),
        TAG_TIMESTAMP => AnyValue::Timestamp(cursor.read_i64()?),
        TAG_DURATION => AnyValue::Duration(cursor.read_i64()?),
        TAG_UUID => {
            let bytes: [u8; 16] = cursor.take(16)?.try_into().unwrap();
            AnyValue::Uuid(Uuid::from_bytes(bytes))
        }
        TAG_ARRAY => {
            let id = cursor.read_i64()?;
            let len = cursor.read_u32()? as usize;
            if len > limits.max_array_len {
                return Err(ContinuumError::DecodeBoundExceeded(format!(
                    "array length {len} exceeds max_array_len {}",
                    limits.max_array_len
                )));
            }
            let mut items = Vec::with_capacity(len.min(4096));
            for _ in 0..len {
                items.push(read_any_value(cursor, tracker, limits)?);
            }
            if id != UNTRACKED_ARRAY_ID {
                tracker.register_deserialized(id, Some(items.clone()))?;
            }
            AnyValue::Array(items)
        }
        TAG_ARRAY_REF => {
            let id = cursor.read_i64()?;
            match tracker.lookup(id) {
                Some(Some(items)) => AnyValue::Array(items),
                _ => {
                    return Err(ContinuumError::MalformedObjectGraph {
                        id,
                        max_allowed_id: tracker.max_allowed_id(),
                    })
                }
            }
        }
        other => {
            return Err(ContinuumError::DisallowedType {
                type_name: format!("tag {other}"),
                context: "deserialize".to_string(),
            })
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{capture_frame, pack_slots};

    #[test]
    fn round_trips_a_state_with_mixed_primitive_slots() {
        let serializer = BinarySerializer::default();
        let frame = capture_frame(
            100,
            0,
            pack_slots([
                AnyValue::I64(1),
                AnyValue::String("s".into()),
                AnyValue::F64(3.5),
                AnyValue::Bool(true),
                AnyValue::Null,
            ]),
            None,
        );
        let state = ContinuationState::new(Some(Arc::new(frame)), None);
        let bytes = serializer.serialize(&state).unwrap();
        let back = serializer.deserialize(&bytes).unwrap();
        assert_eq!(state, back);
    }

    #[test]
    fn round_trips_a_multi_frame_chain() {
        let serializer = BinarySerializer::default();
        let inner = capture_frame(1, 0, pack_slots([AnyValue::I64(1)]), None);
        let outer = capture_frame(2, 1, pack_slots([AnyValue::I64(2)]), Some(Arc::new(inner)));
        let state = ContinuationState::new(Some(Arc::new(outer)), Some(AnyValue::Bool(true)));
        let bytes = serializer.serialize(&state).unwrap();
        let back = serializer.deserialize(&bytes).unwrap();
        assert_eq!(state, back);
        assert_eq!(back.stack_head.unwrap().caller.as_ref().unwrap().method_token, 1);
    }

    #[test]
    fn round_trips_nested_arrays() {
        let serializer = BinarySerializer::default();
        let value = AnyValue::Array(vec![
            AnyValue::Array(vec![AnyValue::I64(1), AnyValue::I64(2)]),
            AnyValue::Uuid(Uuid::nil()),
            AnyValue::Decimal(Decimal::from_str("12.50").unwrap()),
        ]);
        let frame = capture_frame(1, 0, pack_slots([value]), None);
        let state = ContinuationState::new(Some(Arc::new(frame)), None);
        let bytes = serializer.serialize(&state).unwrap();
        let back = serializer.deserialize(&bytes).unwrap();
        assert_eq!(state, back);
    }

    #[test]
    fn round_trips_an_empty_array() {
        let serializer = BinarySerializer::default();
        let frame = capture_frame(1, 0, pack_slots([AnyValue::Array(vec![])]), None);
        let state = ContinuationState::new(Some(Arc::new(frame)), None);
        let bytes = serializer.serialize(&state).unwrap();
        let back = serializer.deserialize(&bytes).unwrap();
        assert_eq!(state, back);
    }

    #[test]
    fn deserialize_rejects_an_array_back_reference_to_an_unseen_id() {
        // Hand-crafted bytes: a `yielded_value` that's a back-reference to
        // an array id no prior `TAG_ARRAY` ever registered — the shape a
        // corrupted or adversarial stream would take.
        let serializer = BinarySerializer::default();
        let mut buf = Vec::new();
        write_u32(&mut buf, crate::frame::CURRENT_VERSION);
        buf.push(1); // yielded_value present
        buf.push(TAG_ARRAY_REF);
        write_i64(&mut buf, 0); // never registered by a TAG_ARRAY
        write_u32(&mut buf, 0); // frame_count
        let bytes = lz4_flex::compress_prepend_size(&buf);

        let err = serializer.deserialize(&bytes).unwrap_err();
        assert!(matches!(err, ContinuumError::MalformedObjectGraph { .. }));
    }

    #[test]
    fn deserialize_rejects_frame_count_beyond_limit() {
        let serializer = BinarySerializer::new(SerializerLimits {
            max_stack_depth: 1,
            ..SerializerLimits::default()
        });
        let inner = capture_frame(1, 0, vec![], None);
        let outer = capture_frame(2, 0, vec![], Some(Arc::new(inner)));
        let state = ContinuationState::new(Some(Arc::new(outer)), None);

        let lenient = BinarySerializer::default();
        let bytes = lenient.serialize(&state).unwrap();
        let err = serializer.deserialize(&bytes).unwrap_err();
        assert!(matches!(err, ContinuumError::DecodeBoundExceeded(_)));
    }

    #[test]
    fn deserialize_rejects_corrupted_bytes() {
        let serializer = BinarySerializer::default();
        let err = serializer.deserialize(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, ContinuumError::Codec(_)));
    }
}
