//! Operational-transform engine for collaborative documents.
//!
//! This crate lets several clients edit shared structured documents (strings,
//! lists, maps and positional references) concurrently and converge on the
//! same result. It provides the operation algebra and the client side of the
//! synchronization protocol.
//!
//! # Modules
//!
//! - `sequence`: retain/insert/delete operations over strings and lists
//! - `map_op`: single-key map updates
//! - `reference`: cursor shifts inside sequences
//! - `operation`: the `Operation` trait and typed per-object operations
//! - `composite`: operations grouping edits to several objects
//! - `snapshot`: in-memory document state and its persisted form
//! - `queue`: queued, in-flight and incoming operation bookkeeping
//! - `channel`: the connection state machine
//! - `session`: async driver running a channel against a document
//! - `message`: delta messages exchanged with the server
//! - `config`: channel configuration
//! - `error`: error types for the engine
//!
//! # Example
//!
//! ```
//! use ot_sync::{Operation, TextOp};
//!
//! let base = String::from("abc");
//!
//! // Two clients edit "abc" concurrently.
//! let server = TextOp::insert_at(3, 0, "A".to_string());
//! let client = TextOp::insert_at(3, 3, "Z".to_string());
//!
//! let (server_t, client_t) = TextOp::transform(&server, &client).unwrap();
//!
//! let via_server = client_t.apply_to(&server.apply_to(&base).unwrap()).unwrap();
//! let via_client = server_t.apply_to(&client.apply_to(&base).unwrap()).unwrap();
//! assert_eq!(via_server, "AabcZ");
//! assert_eq!(via_server, via_client);
//! ```

pub mod channel;
pub mod composite;
pub mod config;
pub mod error;
pub mod ids;
pub mod map_op;
pub mod message;
pub mod operation;
pub mod queue;
pub mod reference;
pub mod segment;
pub mod sequence;
pub mod session;
pub mod snapshot;

// Re-export commonly used types
pub use channel::{ChannelCommand, ChannelEvent, ChannelState, OperationChannel};
pub use composite::CompositeOperation;
pub use config::{ChannelConfig, RetryPolicy};
pub use error::{OtError, OtResult};
pub use ids::{DocumentId, ObjectId, SessionId, UserId};
pub use map_op::{MapOp, MapValue};
pub use message::{DeltaMessage, DeltaRequest};
pub use operation::{ComponentOp, ObjectKind, Operation, TargetedOp};
pub use queue::TransformQueue;
pub use reference::{IndexReference, ReferenceShiftOp, INVALIDATED_INDEX};
pub use segment::Segment;
pub use sequence::{Component, ListOp, SequenceOp, SequenceOpBuilder, TextOp};
pub use session::{CollaborativeTarget, DocumentSession, Inbound, Outbound};
pub use snapshot::{DocumentSnapshot, ObjectValue, SnapshotEntry};
