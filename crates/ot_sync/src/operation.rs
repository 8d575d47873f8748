//! The operation capability shared by every operation type, and the typed
//! per-object operation carried inside composite operations.
//!
//! Every operation type implements [`Operation`]: it can be applied to its
//! target, composed with a following operation, transformed against a
//! concurrent one, and inverted. [`ComponentOp`] wraps the concrete types
//! so a composite operation can hold edits to strings, lists, maps and
//! references side by side.

use crate::error::{OtError, OtResult};
use crate::ids::ObjectId;
use crate::map_op::MapOp;
use crate::reference::ReferenceShiftOp;
use crate::sequence::{ListOp, TextOp};
use crate::snapshot::ObjectValue;
use serde::de::Error as _;
use serde::ser::SerializeTuple;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// An operation with an algebra: apply, compose, transform and invert.
///
/// `transform(server, client)` takes two operations made against the same
/// state and returns `(server', client')` such that `server` followed by
/// `client'` has the same effect as `client` followed by `server'`.
pub trait Operation: Clone + fmt::Debug + Sized {
    /// The value this operation applies to.
    type Target;

    /// Apply to `target` in place. On error `target` is left unchanged.
    fn apply(&self, target: &mut Self::Target) -> OtResult<()>;

    /// Combine with an operation applied directly after this one.
    fn compose(&self, next: &Self) -> OtResult<Self>;

    /// Transform two concurrent operations against each other.
    fn transform(server: &Self, client: &Self) -> OtResult<(Self, Self)>;

    /// The operation undoing this one.
    fn invert(&self) -> Self;

    /// Whether applying this operation changes nothing.
    fn is_noop(&self) -> bool;

    /// Whether `next` may be folded into this operation by [`compose`].
    ///
    /// [`compose`]: Operation::compose
    fn can_compose(&self, _next: &Self) -> bool {
        true
    }
}

/// Kind of a collaborative object. Doubles as the op type tag on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    #[serde(rename = "text")]
    Text,
    #[serde(rename = "list")]
    List,
    #[serde(rename = "map")]
    Map,
    #[serde(rename = "ref")]
    Reference,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            ObjectKind::Text => "text",
            ObjectKind::List => "list",
            ObjectKind::Map => "map",
            ObjectKind::Reference => "ref",
        };
        f.write_str(tag)
    }
}

/// A typed operation on one collaborative object.
#[derive(Clone, Debug, PartialEq)]
pub enum ComponentOp {
    Text(TextOp),
    List(ListOp),
    Map(MapOp),
    Reference(ReferenceShiftOp),
}

impl ComponentOp {
    /// Kind of object this operation applies to.
    pub fn kind(&self) -> ObjectKind {
        match self {
            ComponentOp::Text(_) => ObjectKind::Text,
            ComponentOp::List(_) => ObjectKind::List,
            ComponentOp::Map(_) => ObjectKind::Map,
            ComponentOp::Reference(_) => ObjectKind::Reference,
        }
    }

    /// Whether the two operations touch disjoint parts of the same object,
    /// so that either order has the same effect and neither needs
    /// transforming. Only map updates to different keys qualify.
    pub fn is_independent_of(&self, other: &ComponentOp) -> bool {
        match (self, other) {
            (ComponentOp::Map(a), ComponentOp::Map(b)) => a.key() != b.key(),
            _ => false,
        }
    }

    fn kind_mismatch(&self, other: &ComponentOp) -> String {
        format!(
            "{} operation cannot be combined with {} operation",
            self.kind(),
            other.kind()
        )
    }
}

impl Operation for ComponentOp {
    type Target = ObjectValue;

    fn apply(&self, target: &mut ObjectValue) -> OtResult<()> {
        match (self, target) {
            (ComponentOp::Text(op), ObjectValue::Text(value)) => op.apply(value),
            (ComponentOp::List(op), ObjectValue::List(value)) => op.apply(value),
            (ComponentOp::Map(op), ObjectValue::Map(value)) => op.apply(value),
            (ComponentOp::Reference(op), ObjectValue::Reference(value)) => op.apply(value),
            (op, value) => Err(OtError::Apply(format!(
                "{} operation cannot apply to a {} object",
                op.kind(),
                value.kind()
            ))),
        }
    }

    fn compose(&self, next: &Self) -> OtResult<Self> {
        match (self, next) {
            (ComponentOp::Text(a), ComponentOp::Text(b)) => Ok(ComponentOp::Text(a.compose(b)?)),
            (ComponentOp::List(a), ComponentOp::List(b)) => Ok(ComponentOp::List(a.compose(b)?)),
            (ComponentOp::Map(a), ComponentOp::Map(b)) => Ok(ComponentOp::Map(a.compose(b)?)),
            (ComponentOp::Reference(a), ComponentOp::Reference(b)) => {
                Ok(ComponentOp::Reference(a.compose(b)?))
            }
            (a, b) => Err(OtError::Compose(a.kind_mismatch(b))),
        }
    }

    fn transform(server: &Self, client: &Self) -> OtResult<(Self, Self)> {
        match (server, client) {
            (ComponentOp::Text(s), ComponentOp::Text(c)) => {
                let (s, c) = TextOp::transform(s, c)?;
                Ok((ComponentOp::Text(s), ComponentOp::Text(c)))
            }
            (ComponentOp::List(s), ComponentOp::List(c)) => {
                let (s, c) = ListOp::transform(s, c)?;
                Ok((ComponentOp::List(s), ComponentOp::List(c)))
            }
            (ComponentOp::Map(s), ComponentOp::Map(c)) => {
                let (s, c) = MapOp::transform(s, c)?;
                Ok((ComponentOp::Map(s), ComponentOp::Map(c)))
            }
            (ComponentOp::Reference(s), ComponentOp::Reference(c)) => {
                let (s, c) = ReferenceShiftOp::transform(s, c)?;
                Ok((ComponentOp::Reference(s), ComponentOp::Reference(c)))
            }
            (s, c) => Err(OtError::Transform(s.kind_mismatch(c))),
        }
    }

    fn invert(&self) -> Self {
        match self {
            ComponentOp::Text(op) => ComponentOp::Text(op.invert()),
            ComponentOp::List(op) => ComponentOp::List(op.invert()),
            ComponentOp::Map(op) => ComponentOp::Map(op.invert()),
            ComponentOp::Reference(op) => ComponentOp::Reference(op.invert()),
        }
    }

    fn is_noop(&self) -> bool {
        match self {
            ComponentOp::Text(op) => op.is_noop(),
            ComponentOp::List(op) => op.is_noop(),
            ComponentOp::Map(op) => op.is_noop(),
            ComponentOp::Reference(op) => op.is_noop(),
        }
    }
}

/// A [`ComponentOp`] addressed to one object.
///
/// On the wire: `[opType, targetId, opBody]`.
#[derive(Clone, Debug, PartialEq)]
pub struct TargetedOp {
    pub target: ObjectId,
    pub op: ComponentOp,
}

impl TargetedOp {
    pub fn new(target: impl Into<ObjectId>, op: ComponentOp) -> Self {
        Self {
            target: target.into(),
            op,
        }
    }

    pub fn text(target: impl Into<ObjectId>, op: TextOp) -> Self {
        Self::new(target, ComponentOp::Text(op))
    }

    pub fn list(target: impl Into<ObjectId>, op: ListOp) -> Self {
        Self::new(target, ComponentOp::List(op))
    }

    pub fn map(target: impl Into<ObjectId>, op: MapOp) -> Self {
        Self::new(target, ComponentOp::Map(op))
    }

    pub fn reference(target: impl Into<ObjectId>, op: ReferenceShiftOp) -> Self {
        Self::new(target, ComponentOp::Reference(op))
    }
}

impl Serialize for TargetedOp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(3)?;
        tuple.serialize_element(&self.op.kind())?;
        tuple.serialize_element(&self.target)?;
        match &self.op {
            ComponentOp::Text(op) => tuple.serialize_element(op)?,
            ComponentOp::List(op) => tuple.serialize_element(op)?,
            ComponentOp::Map(op) => tuple.serialize_element(op)?,
            ComponentOp::Reference(op) => tuple.serialize_element(op)?,
        }
        tuple.end()
    }
}

impl<'de> Deserialize<'de> for TargetedOp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (kind, target, body) = <(ObjectKind, ObjectId, Value)>::deserialize(deserializer)?;
        let op = match kind {
            ObjectKind::Text => serde_json::from_value(body).map(ComponentOp::Text),
            ObjectKind::List => serde_json::from_value(body).map(ComponentOp::List),
            ObjectKind::Map => serde_json::from_value(body).map(ComponentOp::Map),
            ObjectKind::Reference => serde_json::from_value(body).map(ComponentOp::Reference),
        }
        .map_err(D::Error::custom)?;
        Ok(TargetedOp { target, op })
    }
}
