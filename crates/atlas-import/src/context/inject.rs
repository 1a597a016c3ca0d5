//! Declared inputs and outputs, and the routines that wire context values
//! into them.

use log::trace;

use super::values::{ContextMap, ContextValue, TypeTag};
use crate::error::ContextError;

/// A named, typed input or output of an importer or factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub name: &'static str,
    pub tag: TypeTag,
}

impl Slot {
    pub const fn new(name: &'static str, tag: TypeTag) -> Self {
        Self { name, tag }
    }
}

/// Something that receives context values through declared input slots.
pub trait Inbound {
    fn input_slots(&self) -> &'static [Slot];

    /// Stores `value` in the field behind `slot`.
    fn bind(&mut self, slot: &Slot, value: ContextValue) -> Result<(), ContextError>;

    /// Name used in error messages and log lines.
    fn owner_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// The current value of an output slot.
#[derive(Debug, Clone)]
pub struct OutputValue {
    pub slot: Slot,
    pub value: Option<ContextValue>,
}

impl OutputValue {
    pub fn new(slot: Slot, value: Option<ContextValue>) -> Self {
        Self { slot, value }
    }
}

pub trait Outbound: Inbound {
    /// Output slots in declaration order, with their current values.
    fn output_values(&self) -> Vec<OutputValue>;
}

/// Assigns values from `values` to the input slots of `target`.
///
/// For each slot, a value stored under exactly the slot's type wins.
/// Otherwise the single value whose runtime type is assignable to the slot
/// is used. Two or more assignable values fail with `AmbiguousInput`, none
/// leaves the slot unset. Returns the number of slots bound.
pub fn inject_inputs<T>(target: &mut T, values: &ContextMap) -> Result<usize, ContextError>
where
    T: Inbound + ?Sized,
{
    let mut bound = 0;
    for slot in target.input_slots() {
        let resolved = match values.get(slot.tag) {
            Some(value) => Some(value.clone()),
            None => {
                let candidates: Vec<&ContextValue> = values
                    .values()
                    .filter(|value| slot.tag.is_assignable_from(value.tag()))
                    .collect();
                match candidates.as_slice() {
                    [] => None,
                    [single] => Some((*single).clone()),
                    many => {
                        return Err(ContextError::AmbiguousInput {
                            slot: slot.name,
                            owner: target.owner_name().to_string(),
                            candidates: many.iter().map(|value| value.tag()).collect(),
                        });
                    }
                }
            }
        };

        if let Some(value) = resolved {
            trace!(
                "Binding {} to input '{}' of {}",
                value.tag(),
                slot.name,
                target.owner_name()
            );
            target.bind(slot, value)?;
            bound += 1;
        }
    }
    Ok(bound)
}

/// Collects the non-empty outputs of `owner`, keyed by declared slot type.
pub fn collect_outputs<T>(owner: &T) -> Result<ContextMap, ContextError>
where
    T: Outbound + ?Sized,
{
    let mut outputs = ContextMap::new();
    for OutputValue { slot, value } in owner.output_values() {
        let Some(value) = value else {
            continue;
        };
        if outputs.contains(slot.tag) {
            return Err(ContextError::DuplicateOutput {
                tag: slot.tag,
                owner: owner.owner_name().to_string(),
            });
        }
        outputs.insert_as(slot.tag, value);
    }
    Ok(outputs)
}

/// Checks that `value` fits `slot`, for use inside [`Inbound::bind`].
pub fn expect_tag(slot: &Slot, value: &ContextValue) -> Result<(), ContextError> {
    if slot.tag.is_assignable_from(value.tag()) {
        Ok(())
    } else {
        Err(ContextError::TypeMismatch {
            slot: slot.name,
            expected: slot.tag,
            found: value.tag(),
        })
    }
}
