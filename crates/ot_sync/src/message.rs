//! Delta messages exchanged with the server.
//!
//! Both directions carry a list of composite operations in their wire form
//! (see [`CompositeOperation`]). Field names are camelCase on the wire.

use crate::composite::CompositeOperation;
use crate::ids::{DocumentId, SessionId, UserId};
use serde::{Deserialize, Serialize};

/// Client-to-server submission of the in-flight batch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaRequest {
    /// Document the deltas apply to.
    pub id: DocumentId,
    pub session_id: SessionId,
    /// Revision the deltas were made against.
    pub revision: u64,
    pub deltas: Vec<CompositeOperation>,
}

/// Server-to-client broadcast of operations applied to a document.
///
/// A message with `k` deltas at `revision` carries the operations applied at
/// revisions `revision - k + 1 ..= revision`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaMessage {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub revision: u64,
    pub deltas: Vec<CompositeOperation>,
}

impl DeltaMessage {
    /// Revision of the first delta, or `None` if the message is empty or
    /// claims more deltas than revisions.
    pub fn first_revision(&self) -> Option<u64> {
        if self.deltas.is_empty() {
            return None;
        }
        (self.revision + 1).checked_sub(self.deltas.len() as u64)
    }

    /// The deltas paired with the revision each one was applied at.
    ///
    /// Deltas without their own origin inherit the message's user and session.
    pub fn into_revisions(self) -> Vec<(u64, CompositeOperation)> {
        let Some(first) = self.first_revision() else {
            return Vec::new();
        };
        let session_id = self.session_id;
        let user_id = self.user_id;
        self.deltas
            .into_iter()
            .zip(first..)
            .map(|(mut op, revision)| {
                if op.session_id.is_none() {
                    op.session_id = Some(session_id.clone());
                }
                if op.user_id.is_none() {
                    op.user_id = Some(user_id.clone());
                }
                (revision, op.with_revision(revision))
            })
            .collect()
    }
}
