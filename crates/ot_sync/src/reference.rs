//! Positional references (cursors) into collaborative sequences.

use crate::error::{OtError, OtResult};
use crate::ids::ObjectId;
use crate::operation::Operation;
use serde::{Deserialize, Serialize};

/// Index value of a reference whose position was deleted.
pub const INVALIDATED_INDEX: i64 = -1;

/// A reference to a position inside another collaborative object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexReference {
    /// The sequence the reference points into.
    pub referenced_object: ObjectId,
    /// Current position, or [`INVALIDATED_INDEX`].
    pub index: i64,
    /// Whether deleting the referenced position invalidates the reference
    /// instead of moving it.
    pub can_be_deleted: bool,
}

impl IndexReference {
    /// Create a reference that does not point anywhere yet.
    pub fn unset(referenced_object: ObjectId, can_be_deleted: bool) -> Self {
        Self {
            referenced_object,
            index: INVALIDATED_INDEX,
            can_be_deleted,
        }
    }

    /// Whether the reference has been invalidated.
    pub fn is_invalidated(&self) -> bool {
        self.index == INVALIDATED_INDEX
    }
}

/// Move a reference from one index to another.
///
/// `can_be_deleted` is the flag the reference carries after the move. It
/// travels with index changes only: a shift whose index does not change is
/// a no-op and is dropped by composition and transformation, whatever its
/// flag.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(ObjectId, i64, i64, bool)", into = "(ObjectId, i64, i64, bool)")]
pub struct ReferenceShiftOp {
    pub referenced_object: ObjectId,
    pub old_index: i64,
    pub new_index: i64,
    pub can_be_deleted: bool,
}

impl ReferenceShiftOp {
    pub fn new(
        referenced_object: ObjectId,
        old_index: i64,
        new_index: i64,
        can_be_deleted: bool,
    ) -> Self {
        Self {
            referenced_object,
            old_index,
            new_index,
            can_be_deleted,
        }
    }

    /// Whether this shift invalidates the reference.
    pub fn invalidates(&self) -> bool {
        self.new_index == INVALIDATED_INDEX
    }

    fn check_same_reference(&self, other: &Self) -> Result<(), String> {
        if self.referenced_object != other.referenced_object {
            return Err(format!(
                "shifts point into different objects {} and {}",
                self.referenced_object, other.referenced_object
            ));
        }
        Ok(())
    }
}

impl From<(ObjectId, i64, i64, bool)> for ReferenceShiftOp {
    fn from((referenced_object, old_index, new_index, can_be_deleted): (ObjectId, i64, i64, bool)) -> Self {
        Self::new(referenced_object, old_index, new_index, can_be_deleted)
    }
}

impl From<ReferenceShiftOp> for (ObjectId, i64, i64, bool) {
    fn from(op: ReferenceShiftOp) -> Self {
        (op.referenced_object, op.old_index, op.new_index, op.can_be_deleted)
    }
}

impl Operation for ReferenceShiftOp {
    type Target = IndexReference;

    fn apply(&self, target: &mut IndexReference) -> OtResult<()> {
        if target.referenced_object != self.referenced_object {
            return Err(OtError::Apply(format!(
                "reference points into {} but the shift targets {}",
                target.referenced_object, self.referenced_object
            )));
        }
        if target.index != self.old_index {
            return Err(OtError::Apply(format!(
                "reference is at {} but the shift expects {}",
                target.index, self.old_index
            )));
        }
        target.index = self.new_index;
        target.can_be_deleted = self.can_be_deleted;
        Ok(())
    }

    fn compose(&self, next: &Self) -> OtResult<Self> {
        self.check_same_reference(next).map_err(OtError::Compose)?;
        if self.new_index != next.old_index {
            return Err(OtError::Compose(format!(
                "shift ends at {} but the next one starts at {}",
                self.new_index, next.old_index
            )));
        }
        Ok(Self::new(
            self.referenced_object.clone(),
            self.old_index,
            next.new_index,
            next.can_be_deleted,
        ))
    }

    fn transform(server: &Self, client: &Self) -> OtResult<(Self, Self)> {
        server
            .check_same_reference(client)
            .map_err(OtError::Transform)?;
        if server.old_index != client.old_index {
            return Err(OtError::Transform(format!(
                "concurrent shifts start from different indices {} and {}",
                server.old_index, client.old_index
            )));
        }
        // Each side now starts where the other one left the reference; both
        // settle on the client's target index.
        let server_t = Self::new(
            server.referenced_object.clone(),
            client.new_index,
            client.new_index,
            client.can_be_deleted,
        );
        let client_t = Self::new(
            client.referenced_object.clone(),
            server.new_index,
            client.new_index,
            client.can_be_deleted,
        );
        Ok((server_t, client_t))
    }

    fn invert(&self) -> Self {
        Self::new(
            self.referenced_object.clone(),
            self.new_index,
            self.old_index,
            self.can_be_deleted,
        )
    }

    /// The flag alone never makes a shift significant.
    fn is_noop(&self) -> bool {
        self.old_index == self.new_index
    }
}
