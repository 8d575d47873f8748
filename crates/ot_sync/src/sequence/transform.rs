//! Transformation of concurrent sequence operations.

use super::compose::{leftover, leftover_retain};
use super::{Component, SequenceOp, SequenceOpBuilder};
use crate::error::{OtError, OtResult};
use crate::segment::Segment;

/// Transform two operations made against the same value.
///
/// Returns `(server', client')` such that applying `server` then `client'`
/// gives the same value as applying `client` then `server'`.
///
/// Inserts on either side are emitted before anything else at their
/// position. When both sides insert at the same position the server's insert
/// goes first, so the server's content ends up before the client's on every
/// replica.
pub(crate) fn transform<S: Segment>(
    server: &SequenceOp<S>,
    client: &SequenceOp<S>,
) -> OtResult<(SequenceOp<S>, SequenceOp<S>)> {
    if server.is_identity() || client.is_identity() {
        return Ok((server.clone(), client.clone()));
    }
    if server.pre_len() != client.pre_len() {
        return Err(OtError::Transform(format!(
            "operations expect different base lengths: server {} vs client {}",
            server.pre_len(),
            client.pre_len()
        )));
    }

    let mut server_stream = server.components.iter().cloned();
    let mut client_stream = client.components.iter().cloned();
    let mut server_out = SequenceOpBuilder::new();
    let mut client_out = SequenceOpBuilder::new();

    let mut left = server_stream.next();
    let mut right = client_stream.next();

    loop {
        match (left.take(), right.take()) {
            (None, None) => break,

            (Some(Component::Insert(seg)), r) => {
                client_out.retain(seg.len());
                server_out.insert(seg);
                left = server_stream.next();
                right = r;
            }

            (l, Some(Component::Insert(seg))) => {
                server_out.retain(seg.len());
                client_out.insert(seg);
                left = l;
                right = client_stream.next();
            }

            (Some(c), None) | (None, Some(c)) => {
                return Err(OtError::Transform(format!(
                    "residual component consuming {} element(s) after the other operation ended",
                    c.pre_len()
                )));
            }

            (Some(Component::Retain(n)), Some(Component::Retain(m))) => {
                let k = n.min(m);
                server_out.retain(k);
                client_out.retain(k);
                left = leftover_retain(n, k).or_else(|| server_stream.next());
                right = leftover_retain(m, k).or_else(|| client_stream.next());
            }

            (Some(Component::Delete(seg)), Some(Component::Retain(m))) => {
                // The client kept what the server removed; only the server's
                // transformed op still has to delete it.
                let k = seg.len().min(m);
                let (head, tail) = seg.split_at(k);
                server_out.delete(head);
                left = leftover(tail, Component::Delete).or_else(|| server_stream.next());
                right = leftover_retain(m, k).or_else(|| client_stream.next());
            }

            (Some(Component::Retain(n)), Some(Component::Delete(seg))) => {
                let k = n.min(seg.len());
                let (head, tail) = seg.split_at(k);
                client_out.delete(head);
                left = leftover_retain(n, k).or_else(|| server_stream.next());
                right = leftover(tail, Component::Delete).or_else(|| client_stream.next());
            }

            (Some(Component::Delete(ours)), Some(Component::Delete(theirs))) => {
                // Both removed the same region; neither side deletes it again.
                let k = ours.len().min(theirs.len());
                let (ours_head, ours_tail) = ours.split_at(k);
                let (theirs_head, theirs_tail) = theirs.split_at(k);
                if ours_head != theirs_head {
                    return Err(OtError::Transform(format!(
                        "concurrent deletes disagree: server removed {:?}, client removed {:?}",
                        ours_head, theirs_head
                    )));
                }
                left = leftover(ours_tail, Component::Delete).or_else(|| server_stream.next());
                right = leftover(theirs_tail, Component::Delete).or_else(|| client_stream.next());
            }
        }
    }

    Ok((server_out.build(), client_out.build()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::Operation;
    use crate::sequence::{ListOp, TextOp};
    use serde_json::json;

    fn text(s: &str) -> String {
        s.to_string()
    }

    fn converge(base: &str, server: &TextOp, client: &TextOp) -> String {
        let (server_t, client_t) = TextOp::transform(server, client).unwrap();
        let base = text(base);
        let via_server = client_t
            .apply_to(&server.apply_to(&base).unwrap())
            .unwrap();
        let via_client = server_t
            .apply_to(&client.apply_to(&base).unwrap())
            .unwrap();
        assert_eq!(via_server, via_client);
        via_server
    }

    // ========== Tie-break Conformance ==========

    #[test]
    fn test_concurrent_inserts_on_empty_value_put_server_first() {
        let server = TextOp::insert_at(0, 0, text("A"));
        let client = TextOp::insert_at(0, 0, text("B"));

        let (server_t, client_t) = TextOp::transform(&server, &client).unwrap();
        assert_eq!(
            server_t.components(),
            &[Component::Insert(text("A")), Component::Retain(1)]
        );
        assert_eq!(
            client_t.components(),
            &[Component::Retain(1), Component::Insert(text("B"))]
        );
        assert_eq!(converge("", &server, &client), "AB");
    }

    #[test]
    fn test_concurrent_inserts_mid_value_put_server_first() {
        let server = TextOp::insert_at(4, 2, text("ss"));
        let client = TextOp::insert_at(4, 2, text("cc"));
        assert_eq!(converge("abcd", &server, &client), "absscccd");
    }

    #[test]
    fn test_tie_break_holds_with_roles_swapped() {
        let first = TextOp::insert_at(1, 1, text("1"));
        let second = TextOp::insert_at(1, 1, text("2"));
        assert_eq!(converge("x", &first, &second), "x12");
        assert_eq!(converge("x", &second, &first), "x21");
    }

    // ========== Delete Handling ==========

    #[test]
    fn test_insert_against_delete_survives() {
        let server = TextOp::delete_at(3, 0, text("abc"));
        let client = TextOp::insert_at(3, 1, text("X"));
        assert_eq!(converge("abc", &server, &client), "X");
    }

    #[test]
    fn test_overlapping_deletes_cancel() {
        let server = TextOp::delete_at(5, 1, text("bcd"));
        let client = TextOp::delete_at(5, 2, text("cde"));

        let (server_t, client_t) = TextOp::transform(&server, &client).unwrap();
        assert_eq!(
            server_t.components(),
            &[Component::Retain(1), Component::Delete(text("b"))]
        );
        assert_eq!(
            client_t.components(),
            &[Component::Retain(1), Component::Delete(text("e"))]
        );
        assert_eq!(converge("abcde", &server, &client), "a");
    }

    #[test]
    fn test_identical_deletes() {
        let op = TextOp::delete_at(3, 1, text("b"));
        let (server_t, client_t) = TextOp::transform(&op, &op).unwrap();
        assert!(server_t.is_noop());
        assert!(client_t.is_noop());
    }

    // ========== Errors ==========

    #[test]
    fn test_rejects_disagreeing_deletes() {
        let server = TextOp::delete_at(3, 0, text("abc"));
        let client = TextOp::delete_at(3, 0, text("abd"));
        assert!(matches!(
            TextOp::transform(&server, &client),
            Err(OtError::Transform(_))
        ));
    }

    #[test]
    fn test_rejects_length_mismatch() {
        let server = TextOp::insert_at(3, 0, text("x"));
        let client = TextOp::insert_at(4, 0, text("y"));
        assert!(matches!(
            TextOp::transform(&server, &client),
            Err(OtError::Transform(_))
        ));
    }

    #[test]
    fn test_identity_passes_through() {
        let op = TextOp::insert_at(2, 1, text("z"));
        let (server_t, client_t) = TextOp::transform(&TextOp::identity(), &op).unwrap();
        assert!(server_t.is_identity());
        assert_eq!(client_t, op);
    }

    #[test]
    fn test_list_transform() {
        let base = vec![json!(1), json!(2)];
        let server = ListOp::insert_at(2, 2, vec![json!("s")]);
        let client = ListOp::delete_at(2, 0, vec![json!(1)]);

        let (server_t, client_t) = ListOp::transform(&server, &client).unwrap();
        let a = client_t.apply_to(&server.apply_to(&base).unwrap()).unwrap();
        let b = server_t.apply_to(&client.apply_to(&base).unwrap()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, vec![json!(2), json!("s")]);
    }
}
