//! In-memory document state and its persisted snapshot form.
//!
//! A [`DocumentSnapshot`] holds every collaborative object of a document by
//! id. It is the reference [`CollaborativeTarget`]: remote and local
//! composite operations are applied to it atomically, and it can regenerate
//! the operations that rebuild it from nothing.

use crate::composite::CompositeOperation;
use crate::error::{OtError, OtResult};
use crate::ids::ObjectId;
use crate::map_op::{MapOp, MapValue};
use crate::operation::{ComponentOp, ObjectKind, Operation, TargetedOp};
use crate::reference::{IndexReference, ReferenceShiftOp, INVALIDATED_INDEX};
use crate::sequence::{ListOp, TextOp};
use crate::session::CollaborativeTarget;
use serde::de::Error as _;
use serde::ser::SerializeTuple;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;

/// Current value of one collaborative object.
#[derive(Clone, Debug, PartialEq)]
pub enum ObjectValue {
    Text(String),
    List(Vec<Value>),
    Map(MapValue),
    Reference(IndexReference),
}

impl ObjectValue {
    pub fn kind(&self) -> ObjectKind {
        match self {
            ObjectValue::Text(_) => ObjectKind::Text,
            ObjectValue::List(_) => ObjectKind::List,
            ObjectValue::Map(_) => ObjectKind::Map,
            ObjectValue::Reference(_) => ObjectKind::Reference,
        }
    }

    /// The empty object an operation creates when its target does not exist yet.
    pub fn empty_for(op: &ComponentOp) -> Self {
        match op {
            ComponentOp::Text(_) => ObjectValue::Text(String::new()),
            ComponentOp::List(_) => ObjectValue::List(Vec::new()),
            ComponentOp::Map(_) => ObjectValue::Map(MapValue::new()),
            ComponentOp::Reference(shift) => ObjectValue::Reference(IndexReference::unset(
                shift.referenced_object.clone(),
                shift.can_be_deleted,
            )),
        }
    }

    /// Whether the object still holds nothing beyond its empty state.
    pub fn is_empty(&self) -> bool {
        match self {
            ObjectValue::Text(s) => s.is_empty(),
            ObjectValue::List(items) => items.is_empty(),
            ObjectValue::Map(map) => map.is_empty(),
            ObjectValue::Reference(r) => r.is_invalidated(),
        }
    }

    /// Operations that create this object and fill in its content.
    ///
    /// An object in its empty state is still created, by an identity
    /// operation of its kind.
    fn initialization(&self) -> Vec<ComponentOp> {
        if self.is_empty() {
            return vec![self.creation()];
        }
        match self {
            ObjectValue::Text(s) => vec![ComponentOp::Text(TextOp::insert_at(0, 0, s.clone()))],
            ObjectValue::List(items) => {
                vec![ComponentOp::List(ListOp::insert_at(0, 0, items.clone()))]
            }
            ObjectValue::Map(map) => map
                .iter()
                .map(|(key, value)| ComponentOp::Map(MapOp::set(key.clone(), None, value.clone())))
                .collect(),
            ObjectValue::Reference(r) => vec![ComponentOp::Reference(ReferenceShiftOp::new(
                r.referenced_object.clone(),
                INVALIDATED_INDEX,
                r.index,
                r.can_be_deleted,
            ))],
        }
    }

    /// An identity operation whose only effect is creating the empty object.
    fn creation(&self) -> ComponentOp {
        match self {
            ObjectValue::Text(_) => ComponentOp::Text(TextOp::identity()),
            ObjectValue::List(_) => ComponentOp::List(ListOp::identity()),
            ObjectValue::Map(_) => ComponentOp::Map(MapOp::new("", None, None)),
            ObjectValue::Reference(r) => ComponentOp::Reference(ReferenceShiftOp::new(
                r.referenced_object.clone(),
                INVALIDATED_INDEX,
                INVALIDATED_INDEX,
                r.can_be_deleted,
            )),
        }
    }
}

/// One persisted object: `[targetId, typeTag, initialValue]`.
///
/// References persist as `[referencedObjectId, index, canBeDeleted]`.
#[derive(Clone, Debug, PartialEq)]
pub struct SnapshotEntry {
    pub target: ObjectId,
    pub value: ObjectValue,
}

impl Serialize for SnapshotEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(3)?;
        tuple.serialize_element(&self.target)?;
        tuple.serialize_element(&self.value.kind())?;
        match &self.value {
            ObjectValue::Text(s) => tuple.serialize_element(s)?,
            ObjectValue::List(items) => tuple.serialize_element(items)?,
            ObjectValue::Map(map) => tuple.serialize_element(map)?,
            ObjectValue::Reference(r) => tuple.serialize_element(&(
                &r.referenced_object,
                r.index,
                r.can_be_deleted,
            ))?,
        }
        tuple.end()
    }
}

impl<'de> Deserialize<'de> for SnapshotEntry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (target, kind, raw) = <(ObjectId, ObjectKind, Value)>::deserialize(deserializer)?;
        let value = match kind {
            ObjectKind::Text => serde_json::from_value(raw).map(ObjectValue::Text),
            ObjectKind::List => serde_json::from_value(raw).map(ObjectValue::List),
            ObjectKind::Map => serde_json::from_value::<MapValue>(raw)
                .map(|map| ObjectValue::Map(map.into_iter().filter(|(_, v)| !v.is_null()).collect())),
            ObjectKind::Reference => serde_json::from_value::<(ObjectId, i64, bool)>(raw).map(
                |(referenced_object, index, can_be_deleted)| {
                    ObjectValue::Reference(IndexReference {
                        referenced_object,
                        index,
                        can_be_deleted,
                    })
                },
            ),
        }
        .map_err(D::Error::custom)?;
        Ok(SnapshotEntry { target, value })
    }
}

/// All collaborative objects of one document.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DocumentSnapshot {
    objects: BTreeMap<ObjectId, ObjectValue>,
}

impl DocumentSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a document from persisted entries.
    pub fn from_entries(entries: impl IntoIterator<Item = SnapshotEntry>) -> OtResult<Self> {
        let mut objects = BTreeMap::new();
        for entry in entries {
            if objects.contains_key(&entry.target) {
                return Err(OtError::Apply(format!(
                    "object {} appears twice in the snapshot",
                    entry.target
                )));
            }
            objects.insert(entry.target, entry.value);
        }
        Ok(Self { objects })
    }

    /// Persisted form, ordered by object id.
    pub fn to_entries(&self) -> Vec<SnapshotEntry> {
        self.objects
            .iter()
            .map(|(target, value)| SnapshotEntry {
                target: target.clone(),
                value: value.clone(),
            })
            .collect()
    }

    /// Rebuild a document by replaying initialization operations.
    pub fn from_initialization(init: &CompositeOperation) -> OtResult<Self> {
        let mut snapshot = Self::new();
        snapshot.apply_components(&init.components)?;
        Ok(snapshot)
    }

    /// Operations that rebuild this document from nothing, one or more per
    /// object.
    pub fn initialization_ops(&self) -> Vec<TargetedOp> {
        self.objects
            .iter()
            .flat_map(|(target, value)| {
                value
                    .initialization()
                    .into_iter()
                    .map(move |op| TargetedOp::new(target.clone(), op))
            })
            .collect()
    }

    pub fn get(&self, target: &ObjectId) -> Option<&ObjectValue> {
        self.objects.get(target)
    }

    /// Text content of `target`, if it is a string object.
    pub fn text(&self, target: &str) -> Option<&str> {
        match self.objects.get(&ObjectId::new(target)) {
            Some(ObjectValue::Text(s)) => Some(s),
            _ => None,
        }
    }

    pub fn list(&self, target: &str) -> Option<&[Value]> {
        match self.objects.get(&ObjectId::new(target)) {
            Some(ObjectValue::List(items)) => Some(items),
            _ => None,
        }
    }

    pub fn map(&self, target: &str) -> Option<&MapValue> {
        match self.objects.get(&ObjectId::new(target)) {
            Some(ObjectValue::Map(map)) => Some(map),
            _ => None,
        }
    }

    pub fn reference(&self, target: &str) -> Option<&IndexReference> {
        match self.objects.get(&ObjectId::new(target)) {
            Some(ObjectValue::Reference(r)) => Some(r),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Apply components in order. Either all apply or the snapshot is unchanged.
    pub(crate) fn apply_components(&mut self, components: &[TargetedOp]) -> OtResult<()> {
        let mut objects = self.objects.clone();
        for component in components {
            let value = objects
                .entry(component.target.clone())
                .or_insert_with(|| ObjectValue::empty_for(&component.op));
            component.op.apply(value).map_err(|e| match e {
                OtError::Apply(message) => {
                    OtError::Apply(format!("{}: {}", component.target, message))
                }
                other => other,
            })?;
        }
        self.objects = objects;
        Ok(())
    }
}

impl CollaborativeTarget for DocumentSnapshot {
    fn consume(&mut self, op: &CompositeOperation) -> OtResult<()> {
        op.apply(self)
    }

    fn to_initialization(&self) -> CompositeOperation {
        CompositeOperation::new(self.initialization_ops())
    }
}
