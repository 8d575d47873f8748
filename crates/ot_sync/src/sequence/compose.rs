//! Sequential composition of sequence operations.

use super::{Component, SequenceOp, SequenceOpBuilder};
use crate::error::{OtError, OtResult};
use crate::segment::Segment;

/// Compose `first` and `second` into one operation with the effect of
/// applying `first` and then `second`.
///
/// Both component streams are walked together. `first`'s deletes pass
/// straight through and `second`'s inserts are emitted as they come; all
/// other pairs consume the shorter length and carry the remainder of the
/// longer component into the next step.
pub(crate) fn compose<S: Segment>(
    first: &SequenceOp<S>,
    second: &SequenceOp<S>,
) -> OtResult<SequenceOp<S>> {
    if first.is_identity() {
        return Ok(second.clone());
    }
    if second.is_identity() {
        return Ok(first.clone());
    }

    let mut pre = first.components.iter().cloned();
    let mut post = second.components.iter().cloned();
    let mut out = SequenceOpBuilder::new();

    let mut left = pre.next();
    let mut right = post.next();

    loop {
        match (left.take(), right.take()) {
            (None, None) => break,

            (Some(Component::Delete(seg)), r) => {
                out.delete(seg);
                left = pre.next();
                right = r;
            }

            (l, Some(Component::Insert(seg))) => {
                out.insert(seg);
                left = l;
                right = post.next();
            }

            (Some(c), None) => {
                return Err(OtError::Compose(format!(
                    "first operation leaves {} element(s) the second does not cover",
                    c.post_len()
                )));
            }

            (None, Some(c)) => {
                return Err(OtError::Compose(format!(
                    "second operation expects {} element(s) beyond the first operation's result",
                    c.pre_len()
                )));
            }

            (Some(Component::Retain(n)), Some(Component::Retain(m))) => {
                let k = n.min(m);
                out.retain(k);
                left = leftover_retain(n, k).or_else(|| pre.next());
                right = leftover_retain(m, k).or_else(|| post.next());
            }

            (Some(Component::Retain(n)), Some(Component::Delete(seg))) => {
                let k = n.min(seg.len());
                let (head, tail) = seg.split_at(k);
                out.delete(head);
                left = leftover_retain(n, k).or_else(|| pre.next());
                right = leftover(tail, Component::Delete).or_else(|| post.next());
            }

            (Some(Component::Insert(seg)), Some(Component::Retain(m))) => {
                let k = seg.len().min(m);
                let (head, tail) = seg.split_at(k);
                out.insert(head);
                left = leftover(tail, Component::Insert).or_else(|| pre.next());
                right = leftover_retain(m, k).or_else(|| post.next());
            }

            (Some(Component::Insert(ins)), Some(Component::Delete(del))) => {
                // The second op deletes what the first inserted: both vanish,
                // provided they agree on the overlapping content.
                let k = ins.len().min(del.len());
                let (ins_head, ins_tail) = ins.split_at(k);
                let (del_head, del_tail) = del.split_at(k);
                if ins_head != del_head {
                    return Err(OtError::Compose(format!(
                        "second operation deletes {:?} where the first inserted {:?}",
                        del_head, ins_head
                    )));
                }
                left = leftover(ins_tail, Component::Insert).or_else(|| pre.next());
                right = leftover(del_tail, Component::Delete).or_else(|| post.next());
            }
        }
    }

    Ok(out.build())
}

pub(super) fn leftover_retain<S>(len: usize, used: usize) -> Option<Component<S>> {
    (len > used).then(|| Component::Retain(len - used))
}

pub(super) fn leftover<S: Segment>(seg: S, wrap: fn(S) -> Component<S>) -> Option<Component<S>> {
    (!seg.is_empty()).then(|| wrap(seg))
}
