//! Sequence operations over strings and lists.
//!
//! A [`SequenceOp`] is a normalized list of [`Component`]s walked left to
//! right: `Retain(n)` keeps `n` elements, `Insert(seg)` splices `seg` in, and
//! `Delete(seg)` removes exactly `seg`. Ops are full-length: the retained and
//! deleted lengths sum to the length of the value they apply to. The op with
//! no components is the identity and applies to any value.
//!
//! Ops are only built through [`SequenceOpBuilder`], which normalizes as it
//! goes, so two equal edits always produce equal component lists.

mod compose;
mod transform;

use crate::error::{OtError, OtResult};
use crate::operation::Operation;
use crate::segment::Segment;
use serde::de::Error as _;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Operation on a collaborative string.
pub type TextOp = SequenceOp<String>;

/// Operation on a collaborative list of JSON values.
pub type ListOp = SequenceOp<Vec<Value>>;

/// One primitive step of a sequence operation.
#[derive(Clone, Debug, PartialEq)]
pub enum Component<S> {
    /// Keep the next `n` elements.
    Retain(usize),
    /// Insert the segment at the cursor.
    Insert(S),
    /// Remove the segment at the cursor. The removed content must match.
    Delete(S),
}

impl<S: Segment> Component<S> {
    /// Elements this component consumes from the value it applies to.
    pub fn pre_len(&self) -> usize {
        match self {
            Component::Retain(n) => *n,
            Component::Insert(_) => 0,
            Component::Delete(seg) => seg.len(),
        }
    }

    /// Elements this component produces in the result.
    pub fn post_len(&self) -> usize {
        match self {
            Component::Retain(n) => *n,
            Component::Insert(seg) => seg.len(),
            Component::Delete(_) => 0,
        }
    }

    /// The component undoing this one.
    pub fn invert(&self) -> Self {
        match self {
            Component::Retain(n) => Component::Retain(*n),
            Component::Insert(seg) => Component::Delete(seg.clone()),
            Component::Delete(seg) => Component::Insert(seg.clone()),
        }
    }
}

/// A normalized transformation of one sequence value into another.
#[derive(Clone, Debug, PartialEq)]
pub struct SequenceOp<S> {
    components: Vec<Component<S>>,
}

impl<S: Segment> Default for SequenceOp<S> {
    fn default() -> Self {
        Self::identity()
    }
}

impl<S: Segment> SequenceOp<S> {
    /// The identity operation.
    pub fn identity() -> Self {
        Self {
            components: Vec::new(),
        }
    }

    /// Start building an operation.
    pub fn builder() -> SequenceOpBuilder<S> {
        SequenceOpBuilder::new()
    }

    /// Build a normalized operation from arbitrary components.
    pub fn from_components(components: impl IntoIterator<Item = Component<S>>) -> Self {
        let mut builder = SequenceOpBuilder::new();
        for component in components {
            builder.push(component);
        }
        builder.build()
    }

    /// Insert `seg` at `index` into a value of length `base_len`.
    pub fn insert_at(base_len: usize, index: usize, seg: S) -> Self {
        Self::builder()
            .retain(index)
            .insert(seg)
            .retain(base_len.saturating_sub(index))
            .build()
    }

    /// Delete `seg` found at `index` in a value of length `base_len`.
    pub fn delete_at(base_len: usize, index: usize, seg: S) -> Self {
        let tail = base_len.saturating_sub(index + seg.len());
        Self::builder().retain(index).delete(seg).retain(tail).build()
    }

    /// The normalized components.
    pub fn components(&self) -> &[Component<S>] {
        &self.components
    }

    /// Whether this is the zero-component identity.
    pub fn is_identity(&self) -> bool {
        self.components.is_empty()
    }

    /// Length of the value this operation applies to.
    pub fn pre_len(&self) -> usize {
        self.components.iter().map(Component::pre_len).sum()
    }

    /// Length of the value this operation produces.
    pub fn post_len(&self) -> usize {
        self.components.iter().map(Component::post_len).sum()
    }

    /// Apply to `target`, returning the new value.
    ///
    /// Fails if the operation does not cover `target` exactly or if a delete
    /// names content that is not there.
    pub fn apply_to(&self, target: &S) -> OtResult<S> {
        if self.is_identity() {
            return Ok(target.clone());
        }

        let target_len = target.len();
        let consumed: Vec<usize> = self
            .components
            .iter()
            .filter_map(|c| match c {
                Component::Retain(n) => Some(*n),
                Component::Delete(seg) => Some(seg.len()),
                Component::Insert(_) => None,
            })
            .collect();
        let covered: usize = consumed.iter().sum();
        if covered != target_len {
            return Err(OtError::Apply(format!(
                "operation covers {} elements but target has {}",
                covered, target_len
            )));
        }

        let mut runs = target.runs(&consumed).into_iter();
        let mut out = S::empty();
        let mut cursor = 0;
        for component in &self.components {
            match component {
                Component::Retain(n) => {
                    if let Some(run) = runs.next() {
                        out.append(&run);
                    }
                    cursor += n;
                }
                Component::Insert(seg) => out.append(seg),
                Component::Delete(seg) => {
                    let removed = runs.next().unwrap_or_else(S::empty);
                    if &removed != seg {
                        return Err(OtError::Apply(format!(
                            "delete expected {:?} at {} but found {:?}",
                            seg, cursor, removed
                        )));
                    }
                    cursor += seg.len();
                }
            }
        }
        Ok(out)
    }
}

impl<S: Segment> Operation for SequenceOp<S> {
    type Target = S;

    fn apply(&self, target: &mut S) -> OtResult<()> {
        *target = self.apply_to(target)?;
        Ok(())
    }

    fn compose(&self, next: &Self) -> OtResult<Self> {
        compose::compose(self, next)
    }

    fn transform(server: &Self, client: &Self) -> OtResult<(Self, Self)> {
        transform::transform(server, client)
    }

    fn invert(&self) -> Self {
        Self::from_components(self.components.iter().map(Component::invert))
    }

    fn is_noop(&self) -> bool {
        self.components
            .iter()
            .all(|c| matches!(c, Component::Retain(_)))
    }
}

/// Accumulates components and normalizes them on the way in.
///
/// Inserts and deletes between two retains are gathered into one run; on
/// flush the run is emitted as a single `Insert` followed by a single
/// `Delete`, or as a `Retain` when both carry the same content. Adjacent
/// retains merge and empty components are dropped.
#[derive(Debug)]
pub struct SequenceOpBuilder<S> {
    components: Vec<Component<S>>,
    pending_insert: Option<S>,
    pending_delete: Option<S>,
}

impl<S: Segment> Default for SequenceOpBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Segment> SequenceOpBuilder<S> {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self {
            components: Vec::new(),
            pending_insert: None,
            pending_delete: None,
        }
    }

    /// Keep `n` elements.
    pub fn retain(&mut self, n: usize) -> &mut Self {
        if n > 0 {
            self.flush_run();
            self.push_retain(n);
        }
        self
    }

    /// Insert `seg` at the cursor.
    pub fn insert(&mut self, seg: S) -> &mut Self {
        if !seg.is_empty() {
            self.pending_insert = Some(match self.pending_insert.take() {
                Some(prev) => prev.concat(&seg),
                None => seg,
            });
        }
        self
    }

    /// Delete `seg` at the cursor.
    pub fn delete(&mut self, seg: S) -> &mut Self {
        if !seg.is_empty() {
            self.pending_delete = Some(match self.pending_delete.take() {
                Some(prev) => prev.concat(&seg),
                None => seg,
            });
        }
        self
    }

    /// Append any component.
    pub fn push(&mut self, component: Component<S>) -> &mut Self {
        match component {
            Component::Retain(n) => self.retain(n),
            Component::Insert(seg) => self.insert(seg),
            Component::Delete(seg) => self.delete(seg),
        }
    }

    /// Finish, leaving the builder empty.
    pub fn build(&mut self) -> SequenceOp<S> {
        self.flush_run();
        SequenceOp {
            components: std::mem::take(&mut self.components),
        }
    }

    fn push_retain(&mut self, n: usize) {
        match self.components.last_mut() {
            Some(Component::Retain(m)) => *m += n,
            _ => self.components.push(Component::Retain(n)),
        }
    }

    fn flush_run(&mut self) {
        match (self.pending_insert.take(), self.pending_delete.take()) {
            (Some(ins), Some(del)) if ins == del => self.push_retain(ins.len()),
            (ins, del) => {
                if let Some(ins) = ins {
                    self.components.push(Component::Insert(ins));
                }
                if let Some(del) = del {
                    self.components.push(Component::Delete(del));
                }
            }
        }
    }
}

// Wire form: a retain is a bare length, inserts and deletes are
// single-entry objects `{"i": segment}` / `{"d": segment}`.

impl<S: Serialize> Serialize for Component<S> {
    fn serialize<Ser: Serializer>(&self, serializer: Ser) -> Result<Ser::Ok, Ser::Error> {
        match self {
            Component::Retain(n) => serializer.serialize_u64(*n as u64),
            Component::Insert(seg) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("i", seg)?;
                map.end()
            }
            Component::Delete(seg) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("d", seg)?;
                map.end()
            }
        }
    }
}

impl<'de, S: Deserialize<'de>> Deserialize<'de> for Component<S> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire<S> {
            Retain(u64),
            Insert { i: S },
            Delete { d: S },
        }

        Ok(match Wire::<S>::deserialize(deserializer)? {
            Wire::Retain(n) => {
                Component::Retain(usize::try_from(n).map_err(D::Error::custom)?)
            }
            Wire::Insert { i } => Component::Insert(i),
            Wire::Delete { d } => Component::Delete(d),
        })
    }
}

impl<S: Serialize> Serialize for SequenceOp<S> {
    fn serialize<Ser: Serializer>(&self, serializer: Ser) -> Result<Ser::Ok, Ser::Error> {
        let mut seq = serializer.serialize_seq(Some(self.components.len()))?;
        for component in &self.components {
            seq.serialize_element(component)?;
        }
        seq.end()
    }
}

impl<'de, S: Segment + Deserialize<'de>> Deserialize<'de> for SequenceOp<S> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let components = Vec::<Component<S>>::deserialize(deserializer)?;
        Ok(Self::from_components(components))
    }
}
