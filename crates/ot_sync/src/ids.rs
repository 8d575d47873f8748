//! Identifiers used by the synchronization engine.
//!
//! All identifiers are opaque strings on the wire. Wrapping them in distinct
//! newtypes keeps a session id from being passed where an object id is
//! expected.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Create a new identifier from any string-like value.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the raw identifier.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Identifier of one collaborative object (a string, list, map or reference)
    /// inside a document.
    ObjectId
);

string_id!(
    /// Identifier of one connected editing session.
    ///
    /// A single user may hold several sessions at once (e.g. two browser tabs),
    /// so echo suppression keys on the session rather than the user.
    SessionId
);

string_id!(
    /// Identifier of the user an operation is attributed to.
    UserId
);

string_id!(
    /// Identifier of a collaborative document. Server deltas are addressed by it.
    DocumentId
);

impl SessionId {
    /// Generate a fresh random session id.
    pub fn generate() -> Self {
        SessionId(uuid::Uuid::new_v4().to_string())
    }
}
