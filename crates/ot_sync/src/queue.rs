//! Per-document bookkeeping of local and remote operations.
//!
//! The [`TransformQueue`] keeps three lists:
//!
//! - `queued`: local operations not yet sent
//! - `unacked`: the in-flight batch, sent but not yet acknowledged
//! - `server_ops`: remote operations received but not yet delivered
//!
//! Every list is kept transformed so that it applies to the state the
//! client would see next. Remote operations are transformed past the local
//! ones the server has not seen; local operations are transformed past the
//! remote ones not yet delivered to the document.

use crate::error::{OtError, OtResult};
use crate::operation::Operation;
use std::collections::VecDeque;
use tracing::debug;

/// Compose a run of operations into as few as possible.
///
/// Neighbours are merged pairwise, level by level, so a run of `n`
/// composable operations costs `O(n log n)` component walks instead of the
/// `O(n²)` of a left fold. Neighbours that cannot be composed stay separate.
/// Operations that end up as no-ops are dropped.
pub fn compact<O: Operation>(ops: Vec<O>) -> OtResult<Vec<O>> {
    let mut ops = ops;
    while ops.len() > 1 {
        let mut merged = Vec::with_capacity(ops.len() / 2 + 1);
        let mut changed = false;
        let mut pending: Option<O> = None;

        for op in ops {
            match pending.take() {
                Some(prev) if prev.can_compose(&op) => {
                    merged.push(prev.compose(&op)?);
                    changed = true;
                }
                Some(prev) => {
                    merged.push(prev);
                    pending = Some(op);
                }
                None => pending = Some(op),
            }
        }
        merged.extend(pending);
        ops = merged;

        if !changed {
            break;
        }
    }
    ops.retain(|op| !op.is_noop());
    Ok(ops)
}

/// Transform `server` past every operation in `clients`, rewriting them in
/// place. Returns `server` as it applies after all of them.
fn transform_past<O: Operation>(server: O, clients: &mut [O]) -> OtResult<O> {
    let mut server = server;
    for client in clients.iter_mut() {
        let (server_t, client_t) = O::transform(&server, client)?;
        server = server_t;
        *client = client_t;
    }
    Ok(server)
}

/// Queue of operations for one document, tracking the server revision.
#[derive(Clone, Debug)]
pub struct TransformQueue<O> {
    revision: u64,
    queued: Vec<O>,
    unacked: Vec<O>,
    server_ops: VecDeque<O>,
    /// Acks already applied by [`ack_ops_if_version_matches`] whose server
    /// echoes are still to come.
    ///
    /// [`ack_ops_if_version_matches`]: TransformQueue::ack_ops_if_version_matches
    expected_acks: usize,
    new_client_op_since_transform: bool,
}

impl<O: Operation> TransformQueue<O> {
    /// Create an empty queue for a document at `revision`.
    pub fn new(revision: u64) -> Self {
        Self {
            revision,
            queued: Vec::new(),
            unacked: Vec::new(),
            server_ops: VecDeque::new(),
            expected_acks: 0,
            new_client_op_since_transform: false,
        }
    }

    /// Revision of the last server operation accounted for.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn has_queued(&self) -> bool {
        !self.queued.is_empty()
    }

    pub fn has_unacked(&self) -> bool {
        !self.unacked.is_empty()
    }

    pub fn has_server_ops(&self) -> bool {
        !self.server_ops.is_empty()
    }

    /// No local operation is waiting to be sent or acknowledged.
    pub fn is_clean(&self) -> bool {
        self.queued.is_empty() && self.unacked.is_empty()
    }

    /// The in-flight batch.
    pub fn unacked(&self) -> &[O] {
        &self.unacked
    }

    pub fn expected_acks(&self) -> usize {
        self.expected_acks
    }

    /// Record a local operation made against the current local state.
    ///
    /// The operation is transformed past remote operations not yet delivered,
    /// which in turn are rewritten to apply after it.
    pub fn client_op(&mut self, op: O) -> OtResult<()> {
        let mut op = op;
        for server in self.server_ops.iter_mut() {
            let (server_t, client_t) = O::transform(server, &op)?;
            *server = server_t;
            op = client_t;
        }
        self.queued.push(op);
        self.new_client_op_since_transform = true;
        Ok(())
    }

    /// Move the queued operations, compacted, into the in-flight batch.
    ///
    /// Returns the batch to submit, which is empty when the queued edits
    /// cancelled out.
    pub fn push_queued_to_unacked(&mut self) -> OtResult<&[O]> {
        if !self.unacked.is_empty() {
            return Err(OtError::QueueInvariant(format!(
                "{} operation(s) still in flight",
                self.unacked.len()
            )));
        }
        let queued = std::mem::take(&mut self.queued);
        self.unacked = if self.new_client_op_since_transform {
            compact(queued)?
        } else {
            queued
        };
        self.new_client_op_since_transform = false;
        debug!(
            revision = self.revision,
            batch = self.unacked.len(),
            "Moved queued operations in flight"
        );
        Ok(&self.unacked)
    }

    /// Record a remote operation that the server applied at `resulting_revision`.
    pub fn server_op(&mut self, resulting_revision: u64, op: O) -> OtResult<()> {
        if self.expected_acks > 0 {
            return Err(OtError::QueueInvariant(format!(
                "server operation at {} while {} ack(s) are expected",
                resulting_revision, self.expected_acks
            )));
        }
        self.check_next_revision(resulting_revision)?;

        let mut op = transform_past(op, &mut self.unacked)?;
        if !self.queued.is_empty() {
            if self.new_client_op_since_transform {
                self.queued = compact(std::mem::take(&mut self.queued))?;
            }
            self.new_client_op_since_transform = false;
            op = transform_past(op, &mut self.queued)?;
        }

        self.revision = resulting_revision;
        self.server_ops.push_back(op);
        Ok(())
    }

    /// Acknowledge the oldest in-flight operation, which the server applied
    /// at `resulting_revision`. Returns whether the batch is now fully acked.
    pub fn ack_client_op(&mut self, resulting_revision: u64) -> OtResult<bool> {
        if self.expected_acks > 0 {
            return Err(OtError::QueueInvariant(format!(
                "explicit ack at {} while {} ack(s) are expected",
                resulting_revision, self.expected_acks
            )));
        }
        if self.unacked.is_empty() {
            return Err(OtError::QueueInvariant(format!(
                "ack at {} with nothing in flight",
                resulting_revision
            )));
        }
        self.check_next_revision(resulting_revision)?;

        self.revision = resulting_revision;
        self.unacked.remove(0);
        Ok(self.unacked.is_empty())
    }

    /// Acknowledge the whole in-flight batch at once if the server reports a
    /// revision showing no other operation came in between.
    ///
    /// On success returns the acknowledged operations. The server's echoes of
    /// them are then recognized by [`expected_ack`](Self::expected_ack).
    pub fn ack_ops_if_version_matches(&mut self, new_revision: u64) -> Option<Vec<O>> {
        if self.unacked.is_empty() || new_revision != self.revision + self.unacked.len() as u64 {
            return None;
        }
        let acked = std::mem::take(&mut self.unacked);
        self.expected_acks += acked.len();
        self.revision = new_revision;
        Some(acked)
    }

    /// Whether the server operation at `resulting_revision` is the echo of an
    /// operation already acknowledged by the fast path. Consumes the
    /// expectation when it is.
    pub fn expected_ack(&mut self, resulting_revision: u64) -> OtResult<bool> {
        if self.expected_acks == 0 {
            return Ok(false);
        }
        let expected = (self.revision + 1).saturating_sub(self.expected_acks as u64);
        if resulting_revision != expected {
            return Err(OtError::QueueInvariant(format!(
                "expected the echo of revision {} but got {}",
                expected, resulting_revision
            )));
        }
        self.expected_acks -= 1;
        Ok(true)
    }

    /// The oldest undelivered remote operation.
    pub fn peek_server_op(&self) -> Option<&O> {
        self.server_ops.front()
    }

    /// Take the oldest undelivered remote operation for delivery.
    pub fn pop_server_op(&mut self) -> Option<O> {
        self.server_ops.pop_front()
    }

    fn check_next_revision(&self, resulting_revision: u64) -> OtResult<()> {
        if resulting_revision != self.revision + 1 {
            return Err(OtError::QueueInvariant(format!(
                "revision {} does not follow {}",
                resulting_revision, self.revision
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::TextOp;

    fn text(s: &str) -> String {
        s.to_string()
    }

    fn apply_all(base: &str, ops: &[TextOp]) -> String {
        ops.iter()
            .fold(text(base), |doc, op| op.apply_to(&doc).unwrap())
    }

    // ========== Compaction Tests ==========

    #[test]
    fn test_compact_composes_everything() {
        let ops: Vec<TextOp> = (0..7)
            .map(|i| TextOp::insert_at(i, i, i.to_string()))
            .collect();
        let expected = apply_all("", &ops);

        let compacted = compact(ops).unwrap();
        assert_eq!(compacted.len(), 1);
        assert_eq!(compacted[0].apply_to(&String::new()).unwrap(), expected);
        assert_eq!(expected, "0123456");
    }

    #[test]
    fn test_compact_drops_cancelled_edits() {
        let insert = TextOp::insert_at(2, 1, text("x"));
        let ops = vec![insert.clone(), insert.invert()];
        assert!(compact(ops).unwrap().is_empty());
    }

    // ========== Client Op Tests ==========

    #[test]
    fn test_push_sends_one_compacted_batch() {
        let mut queue = TransformQueue::new(3);
        queue.client_op(TextOp::insert_at(0, 0, text("a"))).unwrap();
        queue.client_op(TextOp::insert_at(1, 1, text("b"))).unwrap();

        let batch = queue.push_queued_to_unacked().unwrap();
        assert_eq!(batch, &[TextOp::insert_at(0, 0, text("ab"))]);
        assert!(!queue.has_queued());
        assert!(queue.has_unacked());
    }

    #[test]
    fn test_push_while_in_flight_fails() {
        let mut queue = TransformQueue::new(0);
        queue.client_op(TextOp::insert_at(0, 0, text("a"))).unwrap();
        queue.push_queued_to_unacked().unwrap();
        queue.client_op(TextOp::insert_at(1, 1, text("b"))).unwrap();

        assert!(matches!(
            queue.push_queued_to_unacked(),
            Err(OtError::QueueInvariant(_))
        ));
    }

    #[test]
    fn test_client_op_transforms_past_undelivered_server_ops() {
        // Local doc is "ab"; the server inserted "S" at 0 but it is not delivered yet.
        let mut queue = TransformQueue::new(0);
        queue.server_op(1, TextOp::insert_at(2, 0, text("S"))).unwrap();
        queue.client_op(TextOp::insert_at(2, 2, text("C"))).unwrap();

        let local = text("abC");
        let delivered = queue.pop_server_op().unwrap();
        assert_eq!(delivered.apply_to(&local).unwrap(), "SabC");

        let batch = queue.push_queued_to_unacked().unwrap().to_vec();
        assert_eq!(apply_all("Sab", &batch), "SabC");
    }

    // ========== Server Op Tests ==========

    #[test]
    fn test_server_op_transforms_past_local_ops() {
        // Base "xy" at revision 1. One op in flight, one queued.
        let mut queue = TransformQueue::new(1);
        queue.client_op(TextOp::insert_at(2, 0, text("A"))).unwrap();
        queue.push_queued_to_unacked().unwrap();
        queue.client_op(TextOp::insert_at(3, 3, text("B"))).unwrap();

        queue.server_op(2, TextOp::delete_at(2, 1, text("y"))).unwrap();
        assert_eq!(queue.revision(), 2);

        let remote = queue.pop_server_op().unwrap();
        assert_eq!(remote.apply_to(&text("AxyB")).unwrap(), "AxB");
    }

    #[test]
    fn test_server_op_at_wrong_revision_fails() {
        let mut queue: TransformQueue<TextOp> = TransformQueue::new(4);
        assert!(matches!(
            queue.server_op(6, TextOp::identity()),
            Err(OtError::QueueInvariant(_))
        ));
    }

    // ========== Ack Tests ==========

    #[test]
    fn test_ack_client_op() {
        let mut queue = TransformQueue::new(0);
        queue.client_op(TextOp::insert_at(0, 0, text("a"))).unwrap();
        queue.push_queued_to_unacked().unwrap();

        assert!(queue.ack_client_op(2).is_err());
        assert!(queue.ack_client_op(1).unwrap());
        assert!(queue.is_clean());
        assert!(matches!(
            queue.ack_client_op(2),
            Err(OtError::QueueInvariant(_))
        ));
    }

    #[test]
    fn test_fast_ack_skips_echoes() {
        let mut queue = TransformQueue::new(5);
        queue.unacked = vec![
            TextOp::insert_at(0, 0, text("a")),
            TextOp::insert_at(1, 1, text("b")),
        ];

        assert!(queue.ack_ops_if_version_matches(8).is_none());
        let acked = queue.ack_ops_if_version_matches(7).unwrap();
        assert_eq!(acked.len(), 2);
        assert_eq!(queue.revision(), 7);
        assert!(!queue.has_unacked());

        assert!(matches!(
            queue.server_op(8, TextOp::identity()),
            Err(OtError::QueueInvariant(_))
        ));
        assert!(queue.expected_ack(6).unwrap());
        assert!(queue.expected_ack(7).unwrap());
        assert!(!queue.expected_ack(8).unwrap());

        queue.server_op(8, TextOp::insert_at(2, 2, text("c"))).unwrap();
        assert_eq!(queue.revision(), 8);
    }

    #[test]
    fn test_expected_ack_out_of_order_fails() {
        let mut queue = TransformQueue::new(5);
        queue.unacked = vec![TextOp::insert_at(0, 0, text("a"))];
        queue.ack_ops_if_version_matches(6).unwrap();
        assert!(queue.expected_ack(7).is_err());
    }
}
