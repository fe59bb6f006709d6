//! Validator (§4.H): gates an untrusted [`ContinuationState`] against a
//! registered set of [`FrameDescriptor`]s and a type allow-list before the
//! runner is allowed to resume it.
//!
//! Deserializing an attacker-supplied state and resuming it is equivalent
//! to `goto attacker.code()` unless every method token it names is known
//! safe and every value it carries has a known shape — this is the one
//! place in the crate that stands between untrusted bytes and execution.

use crate::error::ContinuumError;
use crate::frame::{get_stack_depth, ContinuationState, FrameDescriptor, FrameRecord};
use crate::value::{AnyValue, TypeRef};
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use tracing::{debug_span, warn};

/// Strictness knobs for [`Validator::validate`], named directly after §3.1.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ValidatorOptions {
    pub require_registered_methods: bool,
    pub validate_slot_counts: bool,
    pub validate_slot_types: bool,
    pub max_stack_depth: usize,
}

impl Default for ValidatorOptions {
    fn default() -> Self {
        Self {
            require_registered_methods: true,
            validate_slot_counts: true,
            validate_slot_types: true,
            max_stack_depth: 1000,
        }
    }
}

impl ValidatorOptions {
    /// Every check off except the stack-depth backstop, which always stays
    /// enforced — it is the one check that guards resource exhaustion
    /// rather than a descriptor-shape mismatch.
    pub fn lenient() -> Self {
        Self {
            require_registered_methods: false,
            validate_slot_counts: false,
            validate_slot_types: false,
            max_stack_depth: 1000,
        }
    }
}

/// Registered method descriptors and allow-listed types, plus the options
/// that decide how strictly they're checked.
pub struct Validator {
    pub options: ValidatorOptions,
    descriptors: DashMap<i32, FrameDescriptor>,
    allowed_types: DashSet<TypeRef>,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(ValidatorOptions::default())
    }
}

impl Validator {
    pub fn new(options: ValidatorOptions) -> Self {
        let validator = Self {
            options,
            descriptors: DashMap::new(),
            allowed_types: DashSet::new(),
        };
        for t in seeded_primitive_types() {
            validator.allowed_types.insert(t);
        }
        validator
    }

    pub fn lenient() -> Self {
        Self::new(ValidatorOptions::lenient())
    }

    pub fn register_descriptor(&self, descriptor: FrameDescriptor) -> Result<(), ContinuumError> {
        descriptor.check_invariants()?;
        self.descriptors.insert(descriptor.method_token, descriptor);
        Ok(())
    }

    pub fn register_descriptors(
        &self,
        descriptors: impl IntoIterator<Item = FrameDescriptor>,
    ) -> Result<(), ContinuumError> {
        for d in descriptors {
            self.register_descriptor(d)?;
        }
        Ok(())
    }

    pub fn get_descriptor(&self, token: i32) -> Option<FrameDescriptor> {
        self.descriptors.get(&token).map(|d| d.clone())
    }

    /// Registering an already-allowed type is a no-op (P9).
    pub fn register_allowed_type(&self, type_ref: TypeRef) {
        self.allowed_types.insert(type_ref);
    }

    pub fn register_allowed_type_name(&self, name: &str) {
        if let Some(t) = type_ref_from_name(name) {
            self.register_allowed_type(t);
        }
    }

    pub fn is_type_allowed(&self, type_ref: &TypeRef) -> bool {
        match type_ref {
            TypeRef::Array(inner) => self.is_type_allowed(inner),
            TypeRef::Nullable(inner) => self.is_type_allowed(inner),
            TypeRef::Object => true,
            other => self.allowed_types.contains(other),
        }
    }

    /// Collects every violation rather than stopping at the first (§4.H),
    /// except that an unregistered method short-circuits the rest of that
    /// one frame's checks — there is nothing further to validate against an
    /// unknown descriptor.
    pub fn try_validate(&self, state: &ContinuationState) -> Result<(), Vec<ContinuumError>> {
        let mut errors = Vec::new();
        let span = debug_span!("validator.validate");
        let _enter = span.enter();

        if state.version != crate::frame::CURRENT_VERSION {
            errors.push(ContinuumError::UnsupportedVersion {
                found: state.version,
                expected: crate::frame::CURRENT_VERSION,
            });
        }

        let mut frame_index = 0usize;
        let mut current = state.stack_head.clone();
        while let Some(frame) = current {
            self.validate_frame(&frame, frame_index, &mut errors);
            frame_index += 1;
            current = frame.caller.clone();
        }

        match get_stack_depth(&state.stack_head) {
            Ok(depth) if depth > self.options.max_stack_depth => {
                errors.push(ContinuumError::StackTooDeep {
                    depth,
                    max: self.options.max_stack_depth,
                });
                warn!(depth, "validator rejected an over-deep chain");
                return Err(errors);
            }
            Ok(_) => {}
            Err(e) => {
                errors.push(e);
                return Err(errors);
            }
        }

        if self.options.validate_slot_types {
            if let Some(value) = &state.yielded_value {
                if !value.is_null() {
                    if let Some(t) = value.type_ref() {
                        if !self.is_type_allowed(&t) {
                            errors.push(ContinuumError::DisallowedType {
                                type_name: value.type_name().to_string(),
                                context: "yielded_value".to_string(),
                            });
                        }
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            warn!(error_count = errors.len(), "validator rejected a state");
            Err(errors)
        }
    }

    fn validate_frame(&self, frame: &Arc<FrameRecord>, frame_index: usize, errors: &mut Vec<ContinuumError>) {
        let descriptor = self.descriptors.get(&frame.method_token).map(|d| d.clone());

        if descriptor.is_none() && self.options.require_registered_methods {
            errors.push(ContinuumError::UnregisteredMethod(frame.method_token));
            return;
        }

        if let Some(descriptor) = &descriptor {
            if !descriptor.yield_point_ids.contains(&frame.yield_point_id) {
                errors.push(ContinuumError::YieldPointOutOfRange {
                    token: frame.method_token,
                    yield_point_id: frame.yield_point_id,
                    frame_index,
                });
            }

            if self.options.validate_slot_counts {
                let required = descriptor.count_live_slots(frame.yield_point_id);
                if frame.slots.len() < required {
                    errors.push(ContinuumError::SlotCountMismatch {
                        token: frame.method_token,
                        frame_index,
                        yield_point_id: frame.yield_point_id,
                        actual: frame.slots.len(),
                        required,
                    });
                }
            }
        } else if frame.yield_point_id < 0 {
            errors.push(ContinuumError::YieldPointOutOfRange {
                token: frame.method_token,
                yield_point_id: frame.yield_point_id,
                frame_index,
            });
        }

        if self.options.validate_slot_types {
            for (slot_index, value) in frame.slots.iter().enumerate() {
                if value.is_null() {
                    continue;
                }
                let Some(actual) = value.type_ref() else {
                    continue;
                };
                if !self.is_type_allowed(&actual) {
                    errors.push(ContinuumError::DisallowedType {
                        type_name: value.type_name().to_string(),
                        context: format!("frame {frame_index} slot {slot_index}"),
                    });
                    continue;
                }
                if let Some(descriptor) = &descriptor {
                    let is_live = descriptor
                        .live_slots_at_yield_point
                        .get(&frame.yield_point_id)
                        .and_then(|live| live.get(slot_index).copied())
                        .unwrap_or(false);
                    if is_live {
                        if let Some(slot) = descriptor.slots.get(slot_index) {
                            if !is_compatible(&slot.declared_type, &actual) {
                                errors.push(ContinuumError::SlotTypeMismatch {
                                    frame_index,
                                    slot_index,
                                    actual: format!("{actual:?}"),
                                    declared: format!("{:?}", slot.declared_type),
                                });
                            }
                        }
                    }
                }
            }
        }
    }

    /// The throwing form of [`Self::try_validate`].
    pub fn validate(&self, state: &ContinuationState) -> Result<(), ContinuumError> {
        self.try_validate(state).map_err(ContinuumError::Validation)
    }
}

/// declared-is-supertype, declared-is-object, declared-nullable-of-actual,
/// or exact equality (§4.H.2.e).
fn is_compatible(declared: &TypeRef, actual: &TypeRef) -> bool {
    match declared {
        TypeRef::Object => true,
        TypeRef::Nullable(inner) => is_compatible(inner, actual),
        TypeRef::Array(declared_elem) => match actual {
            TypeRef::Array(actual_elem) => is_compatible(declared_elem, actual_elem),
            _ => false,
        },
        other => other == actual,
    }
}

fn seeded_primitive_types() -> Vec<TypeRef> {
    vec![
        TypeRef::Bool,
        TypeRef::I8,
        TypeRef::I16,
        TypeRef::I32,
        TypeRef::I64,
        TypeRef::U8,
        TypeRef::U16,
        TypeRef::U32,
        TypeRef::U64,
        TypeRef::F32,
        TypeRef::F64,
        TypeRef::Decimal,
        TypeRef::Char,
        TypeRef::String,
        TypeRef::Timestamp,
        TypeRef::Duration,
        TypeRef::Uuid,
    ]
}

fn type_ref_from_name(name: &str) -> Option<TypeRef> {
    Some(match name {
        "bool" => TypeRef::Bool,
        "i8" => TypeRef::I8,
        "i16" => TypeRef::I16,
        "i32" => TypeRef::I32,
        "i64" => TypeRef::I64,
        "u8" => TypeRef::U8,
        "u16" => TypeRef::U16,
        "u32" => TypeRef::U32,
        "u64" => TypeRef::U64,
        "f32" => TypeRef::F32,
        "f64" => TypeRef::F64,
        "decimal" => TypeRef::Decimal,
        "char" => TypeRef::Char,
        "string" => TypeRef::String,
        "timestamp" => TypeRef::Timestamp,
        "duration" => TypeRef::Duration,
        "uuid" => TypeRef::Uuid,
        _ => return None,
    })
}
