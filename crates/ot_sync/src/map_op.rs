//! Single-key updates to collaborative maps.
//!
//! A [`MapOp`] records both the value it expects to replace and the value it
//! writes, which makes it invertible and lets concurrent writes to the same
//! key resolve as last-writer-wins in the server's apply order.

use crate::error::{OtError, OtResult};
use crate::operation::Operation;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Contents of a collaborative map.
pub type MapValue = BTreeMap<String, Value>;

/// Replace the value of one key. `None` means the key is absent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "(String, Option<Value>, Option<Value>)", into = "(String, Option<Value>, Option<Value>)")]
pub struct MapOp {
    key: String,
    old_value: Option<Value>,
    new_value: Option<Value>,
}

impl MapOp {
    /// Create an update. A JSON `null` is treated the same as an absent value.
    pub fn new(key: impl Into<String>, old_value: Option<Value>, new_value: Option<Value>) -> Self {
        Self {
            key: key.into(),
            old_value: old_value.filter(|v| !v.is_null()),
            new_value: new_value.filter(|v| !v.is_null()),
        }
    }

    /// Set `key` to `value`, expecting `old_value` to be there now.
    pub fn set(key: impl Into<String>, old_value: Option<Value>, value: Value) -> Self {
        Self::new(key, old_value, Some(value))
    }

    /// Remove `key`, expecting `old_value` to be there now.
    pub fn remove(key: impl Into<String>, old_value: Value) -> Self {
        Self::new(key, Some(old_value), None)
    }

    /// The key this update touches.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The value expected before the update.
    pub fn old_value(&self) -> Option<&Value> {
        self.old_value.as_ref()
    }

    /// The value written by the update.
    pub fn new_value(&self) -> Option<&Value> {
        self.new_value.as_ref()
    }
}

impl From<(String, Option<Value>, Option<Value>)> for MapOp {
    fn from((key, old_value, new_value): (String, Option<Value>, Option<Value>)) -> Self {
        MapOp::new(key, old_value, new_value)
    }
}

impl From<MapOp> for (String, Option<Value>, Option<Value>) {
    fn from(op: MapOp) -> Self {
        (op.key, op.old_value, op.new_value)
    }
}

impl Operation for MapOp {
    type Target = MapValue;

    fn apply(&self, target: &mut MapValue) -> OtResult<()> {
        let current = target.get(&self.key);
        if current != self.old_value.as_ref() {
            return Err(OtError::Apply(format!(
                "key {:?} holds {:?} but the update expects {:?}",
                self.key, current, self.old_value
            )));
        }
        match &self.new_value {
            Some(value) => {
                target.insert(self.key.clone(), value.clone());
            }
            None => {
                target.remove(&self.key);
            }
        }
        Ok(())
    }

    fn compose(&self, next: &Self) -> OtResult<Self> {
        if self.key != next.key {
            return Err(OtError::Compose(format!(
                "cannot chain updates to different keys {:?} and {:?}",
                self.key, next.key
            )));
        }
        if self.new_value != next.old_value {
            return Err(OtError::Compose(format!(
                "update to {:?} writes {:?} but the next one expects {:?}",
                self.key, self.new_value, next.old_value
            )));
        }
        Ok(Self {
            key: self.key.clone(),
            old_value: self.old_value.clone(),
            new_value: next.new_value.clone(),
        })
    }

    fn transform(server: &Self, client: &Self) -> OtResult<(Self, Self)> {
        if server.key != client.key {
            return Ok((server.clone(), client.clone()));
        }
        if server.old_value != client.old_value {
            return Err(OtError::Transform(format!(
                "concurrent updates to {:?} expect different values {:?} and {:?}",
                server.key, server.old_value, client.old_value
            )));
        }
        // The client is applied after the server, so its write wins. The
        // server's update turns into a no-op on the client's result.
        let server_t = Self {
            key: server.key.clone(),
            old_value: client.new_value.clone(),
            new_value: client.new_value.clone(),
        };
        let client_t = Self {
            key: client.key.clone(),
            old_value: server.new_value.clone(),
            new_value: client.new_value.clone(),
        };
        Ok((server_t, client_t))
    }

    fn invert(&self) -> Self {
        Self {
            key: self.key.clone(),
            old_value: self.new_value.clone(),
            new_value: self.old_value.clone(),
        }
    }

    fn is_noop(&self) -> bool {
        self.old_value == self.new_value
    }
}
