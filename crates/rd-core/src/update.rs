//! Field update requests

use crate::error::{CoreError, CoreResult};
use crate::unit::{is_reserved_field, Unit};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    Set(Value),
    Unset,
    /// Add to a numeric field; an unset field counts as zero.
    Inc(Value),
    /// Append to a repeated field, creating it when unset.
    Push(Value),
    /// Like `Push`, but a no-op when an equal element is present.
    PushUnique(Value),
    EraseElement(usize),
    ReplaceElement(usize, Value),
    IncElement(usize, Value),
}

/// Which version of the object `read_update` returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ModifyReturn {
    Before,
    #[default]
    After,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateRequest {
    ops: Vec<(String, FieldOp)>,
}

impl UpdateRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.ops.push((field.to_string(), FieldOp::Set(value.into())));
        self
    }

    pub fn unset(mut self, field: &str) -> Self {
        self.ops.push((field.to_string(), FieldOp::Unset));
        self
    }

    pub fn inc(mut self, field: &str, delta: impl Into<Value>) -> Self {
        self.ops.push((field.to_string(), FieldOp::Inc(delta.into())));
        self
    }

    pub fn push(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.ops.push((field.to_string(), FieldOp::Push(value.into())));
        self
    }

    pub fn push_unique(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.ops.push((field.to_string(), FieldOp::PushUnique(value.into())));
        self
    }

    pub fn erase_element(mut self, field: &str, pos: usize) -> Self {
        self.ops.push((field.to_string(), FieldOp::EraseElement(pos)));
        self
    }

    pub fn replace_element(mut self, field: &str, pos: usize, value: impl Into<Value>) -> Self {
        self.ops.push((field.to_string(), FieldOp::ReplaceElement(pos, value.into())));
        self
    }

    pub fn inc_element(mut self, field: &str, pos: usize, delta: impl Into<Value>) -> Self {
        self.ops.push((field.to_string(), FieldOp::IncElement(pos, delta.into())));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[(String, FieldOp)] {
        &self.ops
    }

    pub fn touches(&self, field: &str) -> bool {
        self.ops.iter().any(|(name, _)| name == field)
    }

    /// Apply every operation in order.
    pub fn apply<U: Unit>(&self, unit: &mut U) -> CoreResult<()> {
        for (field, op) in &self.ops {
            if is_reserved_field(field) {
                return Err(CoreError::InvalidField {
                    field: field.clone(),
                    reason: "reserved field cannot be updated".to_string(),
                });
            }
            match op {
                FieldOp::Set(value) => unit.set_field(field, value.clone())?,
                FieldOp::Unset => unit.unset_field(field)?,
                FieldOp::Inc(delta) => {
                    let current = unit.field(field);
                    let next = increment(field, current, delta)?;
                    unit.set_field(field, next)?;
                }
                FieldOp::Push(value) => {
                    let mut items = elements(field, unit.field(field))?;
                    items.push(value.clone());
                    unit.set_field(field, Value::Array(items))?;
                }
                FieldOp::PushUnique(value) => {
                    let mut items = elements(field, unit.field(field))?;
                    if !items.contains(value) {
                        items.push(value.clone());
                        unit.set_field(field, Value::Array(items))?;
                    }
                }
                FieldOp::EraseElement(pos) => {
                    let mut items = elements(field, unit.field(field))?;
                    check_position(field, *pos, items.len())?;
                    items.remove(*pos);
                    unit.set_field(field, Value::Array(items))?;
                }
                FieldOp::ReplaceElement(pos, value) => {
                    let mut items = elements(field, unit.field(field))?;
                    check_position(field, *pos, items.len())?;
                    items[*pos] = value.clone();
                    unit.set_field(field, Value::Array(items))?;
                }
                FieldOp::IncElement(pos, delta) => {
                    let mut items = elements(field, unit.field(field))?;
                    check_position(field, *pos, items.len())?;
                    items[*pos] = increment(field, Some(items[*pos].clone()), delta)?;
                    unit.set_field(field, Value::Array(items))?;
                }
            }
        }
        Ok(())
    }
}

/// Elements of a repeated field; an unset field is empty.
fn elements(field: &str, current: Option<Value>) -> CoreResult<Vec<Value>> {
    match current {
        None => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items),
        Some(other) => Err(CoreError::InvalidField {
            field: field.to_string(),
            reason: format!("{:?} field is not repeated", other.kind()),
        }),
    }
}

fn check_position(field: &str, pos: usize, len: usize) -> CoreResult<()> {
    if pos < len {
        Ok(())
    } else {
        Err(CoreError::InvalidField {
            field: field.to_string(),
            reason: format!("element {} out of {}", pos, len),
        })
    }
}

fn increment(field: &str, current: Option<Value>, delta: &Value) -> CoreResult<Value> {
    let overflow = || CoreError::InvalidField {
        field: field.to_string(),
        reason: "increment overflow".to_string(),
    };
    match (current, delta) {
        (None, d) => Ok(d.clone()),
        (Some(Value::Int(v)), Value::Int(d)) => v.checked_add(*d).map(Value::Int).ok_or_else(overflow),
        (Some(Value::Int(v)), Value::UInt(d)) => i64::try_from(*d)
            .ok()
            .and_then(|d| v.checked_add(d))
            .map(Value::Int)
            .ok_or_else(overflow),
        (Some(Value::UInt(v)), Value::UInt(d)) => v.checked_add(*d).map(Value::UInt).ok_or_else(overflow),
        (Some(Value::UInt(v)), Value::Int(d)) => v
            .checked_add_signed(*d)
            .map(Value::UInt)
            .ok_or_else(overflow),
        (Some(Value::Double(v)), Value::Double(d)) => Ok(Value::Double(v + d)),
        (Some(Value::Double(v)), Value::Int(d)) => Ok(Value::Double(v + *d as f64)),
        (Some(current), d) => Err(CoreError::InvalidField {
            field: field.to_string(),
            reason: format!("cannot increment {:?} by {:?}", current.kind(), d.kind()),
        }),
    }
}
