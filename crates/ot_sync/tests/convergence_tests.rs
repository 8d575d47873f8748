//! Integration tests for the operation algebra.
//!
//! Random operations are generated against random documents and checked
//! against the algebraic laws every replica relies on: concurrent operations
//! converge after transformation, composition matches sequential
//! application, and an operation composed with its inverse changes nothing.

use ot_sync::{
    CompositeOperation, DocumentSnapshot, ListOp, MapOp, ObjectId, Operation, ReferenceShiftOp,
    Segment, SequenceOp, SessionId, TargetedOp, TextOp, UserId, INVALIDATED_INDEX,
};
use proptest::prelude::*;
use serde_json::{json, Value};

// ========== Generators ==========

/// One step of a random edit walk over a document.
#[derive(Clone, Debug)]
enum Step {
    Retain(usize),
    Delete(usize),
    Insert(String),
}

fn arb_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (1usize..4).prop_map(Step::Retain),
        (1usize..4).prop_map(Step::Delete),
        "[xyz]{1,3}".prop_map(Step::Insert),
    ]
}

fn arb_steps() -> impl Strategy<Value = Vec<Step>> {
    prop::collection::vec(arb_step(), 0..6)
}

/// Turn a step walk into an operation that applies to `base`.
fn build<S: Segment>(base: &S, steps: &[Step], insert: impl Fn(&str) -> S) -> SequenceOp<S> {
    let len = base.len();
    let mut cursor = 0;
    let mut builder = SequenceOp::builder();
    for step in steps {
        match step {
            Step::Retain(n) => {
                let n = (*n).min(len - cursor);
                builder.retain(n);
                cursor += n;
            }
            Step::Delete(n) => {
                let n = (*n).min(len - cursor);
                builder.delete(base.subrange(cursor, n));
                cursor += n;
            }
            Step::Insert(s) => {
                builder.insert(insert(s));
            }
        }
    }
    builder.retain(len - cursor);
    builder.build()
}

fn text_op(base: &str, steps: &[Step]) -> TextOp {
    build(&base.to_string(), steps, |s| s.to_string())
}

fn list_op(base: &[Value], steps: &[Step]) -> ListOp {
    build(&base.to_vec(), steps, |s| s.chars().map(|c| json!(c.to_string())).collect())
}

fn apply(op: &TextOp, doc: &str) -> String {
    op.apply_to(&doc.to_string()).unwrap()
}

// ========== Algebraic Laws ==========

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Either application order of two concurrent ops gives the same text.
    #[test]
    fn transform_converges(base in "[a-e]{0,8}", s in arb_steps(), c in arb_steps()) {
        let server = text_op(&base, &s);
        let client = text_op(&base, &c);

        let (server_t, client_t) = TextOp::transform(&server, &client).unwrap();
        let via_server = apply(&client_t, &apply(&server, &base));
        let via_client = apply(&server_t, &apply(&client, &base));
        prop_assert_eq!(via_server, via_client);
    }

    /// Convergence holds for lists of JSON values too.
    #[test]
    fn list_transform_converges(
        base in prop::collection::vec(0i64..5, 0..6),
        s in arb_steps(),
        c in arb_steps(),
    ) {
        let base: Vec<Value> = base.into_iter().map(Value::from).collect();
        let server = list_op(&base, &s);
        let client = list_op(&base, &c);

        let (server_t, client_t) = ListOp::transform(&server, &client).unwrap();
        let via_server = client_t.apply_to(&server.apply_to(&base).unwrap()).unwrap();
        let via_client = server_t.apply_to(&client.apply_to(&base).unwrap()).unwrap();
        prop_assert_eq!(via_server, via_client);
    }

    /// An op composed with its inverse is a no-op.
    #[test]
    fn compose_with_inverse_is_noop(base in "[a-e]{0,8}", steps in arb_steps()) {
        let op = text_op(&base, &steps);
        let round_trip = op.compose(&op.invert()).unwrap();
        prop_assert!(round_trip.is_noop());
        prop_assert_eq!(apply(&round_trip, &base), base);
    }

    /// Composing matches applying one op after the other.
    #[test]
    fn compose_matches_sequential_apply(
        base in "[a-e]{0,8}",
        a in arb_steps(),
        b in arb_steps(),
    ) {
        let op_a = text_op(&base, &a);
        let mid = apply(&op_a, &base);
        let op_b = text_op(&mid, &b);

        let composed = op_a.compose(&op_b).unwrap();
        prop_assert_eq!(apply(&composed, &base), apply(&op_b, &mid));
    }

    /// Composition is associative.
    #[test]
    fn compose_is_associative(
        base in "[a-e]{0,8}",
        a in arb_steps(),
        b in arb_steps(),
        c in arb_steps(),
    ) {
        let op_a = text_op(&base, &a);
        let doc_a = apply(&op_a, &base);
        let op_b = text_op(&doc_a, &b);
        let doc_b = apply(&op_b, &doc_a);
        let op_c = text_op(&doc_b, &c);

        let left = op_a.compose(&op_b).unwrap().compose(&op_c).unwrap();
        let right = op_a.compose(&op_b.compose(&op_c).unwrap()).unwrap();
        prop_assert_eq!(apply(&left, &base), apply(&right, &base));
        prop_assert_eq!(apply(&left, &base), apply(&op_c, &doc_b));
    }

    /// Transformed ops still agree with each other once composed.
    #[test]
    fn transformed_compositions_are_equal(
        base in "[a-e]{0,8}",
        s in arb_steps(),
        c in arb_steps(),
    ) {
        let server = text_op(&base, &s);
        let client = text_op(&base, &c);
        let (server_t, client_t) = TextOp::transform(&server, &client).unwrap();

        let one = server.compose(&client_t).unwrap();
        let two = client.compose(&server_t).unwrap();
        prop_assert_eq!(apply(&one, &base), apply(&two, &base));
    }
}

// ========== Reference Vectors ==========

#[test]
fn test_insert_composition_example() {
    let op1 = TextOp::insert_at(3, 1, "X".to_string());
    let op2 = TextOp::delete_at(4, 2, "b".to_string());
    let composed = op1.compose(&op2).unwrap();
    assert_eq!(apply(&composed, "abc"), "aXc");
}

#[test]
fn test_concurrent_insert_example() {
    let server = TextOp::insert_at(0, 0, "A".to_string());
    let client = TextOp::insert_at(0, 0, "B".to_string());
    let (server_t, client_t) = TextOp::transform(&server, &client).unwrap();

    assert_eq!(apply(&client_t, &apply(&server, "")), "AB");
    assert_eq!(apply(&server_t, &apply(&client, "")), "AB");
}

#[test]
fn test_map_last_writer_wins_example() {
    let base = DocumentSnapshot::from_initialization(&CompositeOperation::single(
        TargetedOp::map("m", MapOp::set("a", None, json!(1))),
    ))
    .unwrap();

    let server = CompositeOperation::single(TargetedOp::map(
        "m",
        MapOp::set("a", Some(json!(1)), json!(2)),
    ))
    .with_origin(UserId::new("u1"), SessionId::new("s1"));
    let client = CompositeOperation::single(TargetedOp::map(
        "m",
        MapOp::set("a", Some(json!(1)), json!(3)),
    ))
    .with_origin(UserId::new("u2"), SessionId::new("s2"));

    let (server_t, client_t) = CompositeOperation::transform(&server, &client).unwrap();

    let mut via_server = base.clone();
    server.apply(&mut via_server).unwrap();
    client_t.apply(&mut via_server).unwrap();

    let mut via_client = base;
    client.apply(&mut via_client).unwrap();
    server_t.apply(&mut via_client).unwrap();

    assert_eq!(via_server, via_client);
    assert_eq!(via_server.map("m").and_then(|m| m.get("a")), Some(&json!(3)));
}

#[test]
fn test_composite_transform_across_object_kinds() {
    let base = DocumentSnapshot::from_initialization(&CompositeOperation::new(vec![
        TargetedOp::text("body", TextOp::insert_at(0, 0, "hello".to_string())),
        TargetedOp::list("items", ListOp::insert_at(0, 0, vec![json!(1)])),
        TargetedOp::reference(
            "cursor",
            ReferenceShiftOp::new(ObjectId::new("body"), INVALIDATED_INDEX, 5, true),
        ),
    ]))
    .unwrap();

    let server = CompositeOperation::new(vec![
        TargetedOp::text("body", TextOp::insert_at(5, 0, ">".to_string())),
        TargetedOp::list("items", ListOp::insert_at(1, 1, vec![json!(2)])),
        TargetedOp::map("meta", MapOp::set("k", None, json!("s"))),
    ]);
    let client = CompositeOperation::new(vec![
        TargetedOp::text("body", TextOp::insert_at(5, 5, "!".to_string())),
        TargetedOp::reference(
            "cursor",
            ReferenceShiftOp::new(ObjectId::new("body"), 5, 6, true),
        ),
        TargetedOp::map("meta", MapOp::set("other", None, json!("c"))),
    ]);

    let (server_t, client_t) = CompositeOperation::transform(&server, &client).unwrap();

    let mut via_server = base.clone();
    server.apply(&mut via_server).unwrap();
    client_t.apply(&mut via_server).unwrap();

    let mut via_client = base;
    client.apply(&mut via_client).unwrap();
    server_t.apply(&mut via_client).unwrap();

    assert_eq!(via_server, via_client);
    assert_eq!(via_server.text("body"), Some(">hello!"));
    assert_eq!(via_server.list("items"), Some(&[json!(1), json!(2)][..]));
    assert_eq!(via_server.map("meta").map(|m| m.len()), Some(2));
}

#[test]
fn test_wire_round_trip_preserves_semantics() {
    let op = CompositeOperation::new(vec![
        TargetedOp::text("body", TextOp::insert_at(2, 1, "é".to_string())),
        TargetedOp::map("meta", MapOp::remove("k", json!({"nested": [1, 2]}))),
    ])
    .with_origin(UserId::new("u"), SessionId::new("s"))
    .with_revision(3);

    let wire = serde_json::to_string(&op).unwrap();
    let parsed: CompositeOperation = serde_json::from_str(&wire).unwrap();
    assert_eq!(parsed, op);
}
