//! Composite operations: the unit of synchronization.
//!
//! A [`CompositeOperation`] groups the component operations of one edit, each
//! addressed to a target object, under a single `(user, session, revision)`
//! envelope. Composition and transformation pair components up by target id
//! and delegate to the component algebra.

use crate::error::{OtError, OtResult};
use crate::ids::{SessionId, UserId};
use crate::operation::{ComponentOp, Operation, TargetedOp};
use crate::snapshot::DocumentSnapshot;
use serde::de::Error as _;
use serde::ser::SerializeTuple;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A group of component operations sharing one envelope.
///
/// `revision` is `None` until the server acknowledges the operation; on the
/// wire an unacknowledged revision is `-1`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CompositeOperation {
    pub user_id: Option<UserId>,
    pub session_id: Option<SessionId>,
    pub revision: Option<u64>,
    pub components: Vec<TargetedOp>,
}

impl CompositeOperation {
    /// Create an unacknowledged operation with no session stamp yet.
    pub fn new(components: Vec<TargetedOp>) -> Self {
        Self {
            components,
            ..Default::default()
        }
    }

    /// Create an operation holding a single component.
    pub fn single(component: TargetedOp) -> Self {
        Self::new(vec![component])
    }

    /// Stamp the originating user and session.
    pub fn with_origin(mut self, user_id: UserId, session_id: SessionId) -> Self {
        self.user_id = Some(user_id);
        self.session_id = Some(session_id);
        self
    }

    /// Stamp the server-assigned revision.
    pub fn with_revision(mut self, revision: u64) -> Self {
        self.revision = Some(revision);
        self
    }

    /// Whether the server has assigned a revision.
    pub fn is_acknowledged(&self) -> bool {
        self.revision.is_some()
    }

    fn same_origin(&self, other: &Self) -> bool {
        self.user_id == other.user_id && self.session_id == other.session_id
    }
}

/// Merge `incoming` into the latest component on the same target, or append it.
fn merge_component(components: &mut Vec<TargetedOp>, incoming: &TargetedOp) -> OtResult<()> {
    for existing in components.iter_mut().rev() {
        if existing.target != incoming.target || existing.op.is_independent_of(&incoming.op) {
            continue;
        }
        existing.op = existing.op.compose(&incoming.op)?;
        return Ok(());
    }
    components.push(incoming.clone());
    Ok(())
}

impl Operation for CompositeOperation {
    type Target = DocumentSnapshot;

    fn apply(&self, target: &mut DocumentSnapshot) -> OtResult<()> {
        target.apply_components(&self.components)
    }

    fn compose(&self, next: &Self) -> OtResult<Self> {
        if !self.same_origin(next) {
            return Err(OtError::Compose(format!(
                "operations from different origins ({:?}/{:?} and {:?}/{:?})",
                self.user_id, self.session_id, next.user_id, next.session_id
            )));
        }

        let mut components = self.components.clone();
        for incoming in &next.components {
            merge_component(&mut components, incoming)?;
        }
        components.retain(|c| !c.op.is_noop());

        Ok(Self {
            user_id: next.user_id.clone(),
            session_id: next.session_id.clone(),
            revision: next.revision,
            components,
        })
    }

    fn transform(server: &Self, client: &Self) -> OtResult<(Self, Self)> {
        let mut server_components = server.components.clone();
        let mut client_components = Vec::with_capacity(client.components.len());

        for component in &client.components {
            let mut client_op = component.op.clone();
            for server_component in server_components.iter_mut() {
                if server_component.target != component.target
                    || server_component.op.is_independent_of(&client_op)
                {
                    continue;
                }
                let (s, c) = ComponentOp::transform(&server_component.op, &client_op)?;
                server_component.op = s;
                client_op = c;
            }
            client_components.push(TargetedOp {
                target: component.target.clone(),
                op: client_op,
            });
        }

        server_components.retain(|c| !c.op.is_noop());
        client_components.retain(|c| !c.op.is_noop());

        Ok((
            Self {
                components: server_components,
                ..server.clone()
            },
            Self {
                components: client_components,
                ..client.clone()
            },
        ))
    }

    fn invert(&self) -> Self {
        Self {
            components: self
                .components
                .iter()
                .rev()
                .map(|c| TargetedOp {
                    target: c.target.clone(),
                    op: c.op.invert(),
                })
                .collect(),
            ..self.clone()
        }
    }

    fn is_noop(&self) -> bool {
        self.components.iter().all(|c| c.op.is_noop())
    }

    fn can_compose(&self, next: &Self) -> bool {
        self.same_origin(next)
    }
}

// Wire form: `[components, userId, revision, sessionId]`.

impl Serialize for CompositeOperation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let revision: i64 = match self.revision {
            Some(r) => i64::try_from(r).map_err(serde::ser::Error::custom)?,
            None => -1,
        };
        let mut tuple = serializer.serialize_tuple(4)?;
        tuple.serialize_element(&self.components)?;
        tuple.serialize_element(&self.user_id)?;
        tuple.serialize_element(&revision)?;
        tuple.serialize_element(&self.session_id)?;
        tuple.end()
    }
}

impl<'de> Deserialize<'de> for CompositeOperation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (components, user_id, revision, session_id) =
            <(Vec<TargetedOp>, Option<UserId>, Option<i64>, Option<SessionId>)>::deserialize(
                deserializer,
            )?;
        let revision = match revision {
            None | Some(-1) => None,
            Some(r) => Some(
                u64::try_from(r)
                    .map_err(|_| D::Error::custom(format!("invalid revision {}", r)))?,
            ),
        };
        Ok(Self {
            user_id,
            session_id,
            revision,
            components,
        })
    }
}
