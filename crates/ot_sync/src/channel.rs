//! Connection state machine for one collaborative document.
//!
//! [`OperationChannel`] decides when local operations are sent, interprets
//! acknowledgments, and resynchronizes after failures. It performs no IO:
//! every effect it wants (subscribing, submitting a batch, arming a timer)
//! is queued as a [`ChannelCommand`] for the driver to carry out, and every
//! notification for the collaborative-type layer is queued as a
//! [`ChannelEvent`].
//!
//! # States
//!
//! ```text
//! Uninitialized --connect--> AllAcked --send--> WaitingAck
//! WaitingAck --all acked--> AllAcked
//! WaitingAck --failure--> DelayResync
//! DelayResync --all acked while waiting--> AllAcked
//! DelayResync --backoff elapsed--> WaitingSync
//! WaitingSync --synced, clean--> AllAcked
//! WaitingSync --synced, dirty--> WaitingAck
//! WaitingSync --failure--> DelayResync
//! any --disconnect--> Uninitialized
//! ```
//!
//! Replies are stamped with the `retry_version` of the request that caused
//! them. Every failure and every disconnect bumps the version, so replies to
//! abandoned requests are recognized and dropped.

use crate::composite::CompositeOperation;
use crate::config::ChannelConfig;
use crate::error::{OtError, OtResult};
use crate::ids::{DocumentId, SessionId, UserId};
use crate::message::{DeltaMessage, DeltaRequest};
use crate::queue::TransformQueue;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::time::Duration;

/// Connection state of a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ChannelState {
    /// Not connected; no queue exists.
    #[default]
    Uninitialized,
    /// Connected with nothing in flight.
    AllAcked,
    /// A batch was submitted and awaits acknowledgment.
    WaitingAck,
    /// A request failed; waiting out the backoff before resyncing.
    DelayResync,
    /// Catching up with the server after a failure.
    WaitingSync,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelState::Uninitialized => "uninitialized",
            ChannelState::AllAcked => "all-acked",
            ChannelState::WaitingAck => "waiting-ack",
            ChannelState::DelayResync => "delay-resync",
            ChannelState::WaitingSync => "waiting-sync",
        };
        f.write_str(name)
    }
}

/// An effect the driver must carry out.
#[derive(Clone, Debug, PartialEq)]
pub enum ChannelCommand {
    /// Start receiving deltas for the document.
    Subscribe { document_id: DocumentId },
    /// Stop receiving deltas for the document.
    Unsubscribe { document_id: DocumentId },
    /// Submit the in-flight batch. Answer with
    /// [`OperationChannel::on_submit_ack`] or
    /// [`OperationChannel::on_submit_failed`].
    Submit {
        retry_version: u64,
        request: DeltaRequest,
    },
    /// Fetch the head revision and every delta after `since`. Answer with
    /// [`OperationChannel::on_revision`] or
    /// [`OperationChannel::on_revision_failed`].
    RequestRevision { retry_version: u64, since: u64 },
    /// Call [`OperationChannel::flush`] after `delay`.
    ScheduleSend { delay: Duration },
    /// Call [`OperationChannel::on_resync_timer`] after `delay`.
    ScheduleResync { retry_version: u64, delay: Duration },
}

/// A notification for the collaborative-type layer.
#[derive(Clone, Debug, PartialEq)]
pub enum ChannelEvent {
    /// A remote operation is ready; take it with [`OperationChannel::receive`].
    RemoteOp { revision: u64 },
    /// A local operation was acknowledged. `clean` is set when nothing local
    /// remains unsent or unacknowledged.
    Ack {
        op: CompositeOperation,
        clean: bool,
    },
    /// The save indicator changed: `is_saving` while a batch is in flight,
    /// `is_pending` while any local operation is not yet acknowledged.
    SaveStateChanged { is_saving: bool, is_pending: bool },
    /// A failure. Fatal failures have already disconnected the channel.
    Error { error: OtError, is_fatal: bool },
}

/// Client side of the synchronization protocol for one document.
pub struct OperationChannel {
    document_id: DocumentId,
    user_id: UserId,
    session_id: SessionId,
    config: ChannelConfig,
    state: ChannelState,
    queue: TransformQueue<CompositeOperation>,
    retry_version: u64,
    retry_attempt: u32,
    /// Highest revision the server is known to have reached.
    known_head_revision: u64,
    /// Deltas that arrived ahead of a gap, keyed by revision.
    buffered: BTreeMap<u64, CompositeOperation>,
    send_scheduled: bool,
    compound_depth: usize,
    commands: VecDeque<ChannelCommand>,
    events: VecDeque<ChannelEvent>,
}

impl OperationChannel {
    /// Create a disconnected channel.
    pub fn new(
        document_id: DocumentId,
        user_id: UserId,
        session_id: SessionId,
        config: ChannelConfig,
    ) -> Self {
        Self {
            document_id,
            user_id,
            session_id,
            config,
            state: ChannelState::Uninitialized,
            queue: TransformQueue::new(0),
            retry_version: 0,
            retry_attempt: 0,
            known_head_revision: 0,
            buffered: BTreeMap::new(),
            send_scheduled: false,
            compound_depth: 0,
            commands: VecDeque::new(),
            events: VecDeque::new(),
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn document_id(&self) -> &DocumentId {
        &self.document_id
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Revision of the last server operation accounted for locally.
    pub fn revision(&self) -> u64 {
        self.queue.revision()
    }

    pub fn retry_version(&self) -> u64 {
        self.retry_version
    }

    pub fn is_connected(&self) -> bool {
        self.state != ChannelState::Uninitialized
    }

    /// No local operation is waiting to be sent or acknowledged.
    pub fn is_clean(&self) -> bool {
        self.queue.is_clean()
    }

    /// A batch is in flight.
    pub fn has_unacked_ops(&self) -> bool {
        self.queue.has_unacked()
    }

    /// Take the next effect to carry out.
    pub fn next_command(&mut self) -> Option<ChannelCommand> {
        self.commands.pop_front()
    }

    /// Take the next notification.
    pub fn next_event(&mut self) -> Option<ChannelEvent> {
        self.events.pop_front()
    }

    /// Take the oldest remote operation not yet delivered. It applies to
    /// the local state as it is now.
    pub fn receive(&mut self) -> Option<CompositeOperation> {
        self.queue.pop_server_op()
    }

    /// The oldest remote operation not yet delivered.
    pub fn peek(&self) -> Option<&CompositeOperation> {
        self.queue.peek_server_op()
    }

    /// Connect to a document loaded at `revision`.
    pub fn connect(&mut self, revision: u64) -> OtResult<()> {
        if self.is_connected() {
            return Err(OtError::Channel(format!(
                "connect called while {}",
                self.state
            )));
        }
        tracing::info!(
            "Connecting session {} to document {} at revision {}",
            self.session_id,
            self.document_id,
            revision
        );
        self.queue = TransformQueue::new(revision);
        self.known_head_revision = revision;
        self.retry_attempt = 0;
        self.commands.push_back(ChannelCommand::Subscribe {
            document_id: self.document_id.clone(),
        });
        self.set_state(ChannelState::AllAcked);
        Ok(())
    }

    /// Drop the connection. Replies to outstanding requests will be ignored
    /// and unsent local operations are discarded.
    pub fn disconnect(&mut self) {
        if !self.is_connected() {
            return;
        }
        tracing::info!(
            "Disconnecting session {} from document {}",
            self.session_id,
            self.document_id
        );
        if !self.queue.is_clean() {
            tracing::warn!(
                "Discarding unacknowledged operations of session {}",
                self.session_id
            );
        }
        self.retry_version += 1;
        self.buffered.clear();
        self.send_scheduled = false;
        self.compound_depth = 0;
        self.commands.push_back(ChannelCommand::Unsubscribe {
            document_id: self.document_id.clone(),
        });
        self.state = ChannelState::Uninitialized;
    }

    /// Record a local operation that has already been applied to the local
    /// state. It is stamped with this session's origin and sent with the
    /// next batch.
    pub fn submit(&mut self, op: CompositeOperation) -> OtResult<()> {
        if !self.is_connected() {
            return Err(OtError::Channel(
                "cannot submit operations while disconnected".to_string(),
            ));
        }
        let op = op.with_origin(self.user_id.clone(), self.session_id.clone());
        if let Err(e) = self.queue.client_op(op) {
            self.fail(e);
            return Ok(());
        }
        self.maybe_send();
        Ok(())
    }

    /// Hold sends until the matching [`end_compound`](Self::end_compound), so
    /// edits made in between leave in one batch. Calls nest.
    pub fn begin_compound(&mut self) {
        self.compound_depth += 1;
        tracing::debug!("Compound operation opened (depth {})", self.compound_depth);
    }

    /// Close a compound operation, releasing held sends at the outermost level.
    pub fn end_compound(&mut self) -> OtResult<()> {
        if self.compound_depth == 0 {
            return Err(OtError::Channel(
                "end_compound without begin_compound".to_string(),
            ));
        }
        self.compound_depth -= 1;
        tracing::debug!("Compound operation closed (depth {})", self.compound_depth);
        if self.compound_depth == 0 {
            self.maybe_send();
        }
        Ok(())
    }

    /// Send the queued operations, if the channel may.
    ///
    /// Called by the driver when a [`ChannelCommand::ScheduleSend`] timer
    /// fires.
    pub fn flush(&mut self) {
        self.send_scheduled = false;
        if self.state != ChannelState::AllAcked
            || self.compound_depth > 0
            || self.queue.has_unacked()
            || !self.queue.has_queued()
        {
            return;
        }

        let batch_len = match self.queue.push_queued_to_unacked() {
            Ok(batch) => batch.len(),
            Err(e) => {
                self.fail(e);
                return;
            }
        };
        if batch_len == 0 {
            tracing::debug!("Queued operations cancelled out; nothing to send");
            self.emit_save_state();
            return;
        }
        self.submit_unacked();
        self.set_state(ChannelState::WaitingAck);
    }

    /// The server accepted the batch submitted under `retry_version`; its
    /// head is now at `revision`.
    pub fn on_submit_ack(&mut self, retry_version: u64, revision: u64) {
        if !self.is_current(retry_version, "submit ack") {
            return;
        }
        if self.state != ChannelState::WaitingAck {
            tracing::debug!("Ignoring submit ack while {}", self.state);
            return;
        }
        self.known_head_revision = self.known_head_revision.max(revision);
        let base = self.queue.revision();

        match self.queue.ack_ops_if_version_matches(revision) {
            Some(acked) => {
                tracing::debug!(
                    "Fast-acked {} operation(s) at revision {}",
                    acked.len(),
                    revision
                );
                let last = acked.len().saturating_sub(1);
                let clean = self.queue.is_clean();
                for (i, op) in acked.into_iter().enumerate() {
                    self.events.push_back(ChannelEvent::Ack {
                        op: op.with_revision(base + i as u64 + 1),
                        clean: clean && i == last,
                    });
                }
                self.all_acked();
                // Deltas that arrived while waiting may now be in sequence.
                self.drain_buffered();
            }
            None => {
                tracing::debug!(
                    "Submit ack at revision {} interleaves other operations; waiting for echoes",
                    revision
                );
            }
        }
    }

    /// Submitting the batch under `retry_version` failed.
    pub fn on_submit_failed(&mut self, retry_version: u64, error: OtError) {
        if !self.is_current(retry_version, "submit failure") {
            return;
        }
        if self.state != ChannelState::WaitingAck {
            tracing::debug!("Ignoring submit failure while {}", self.state);
            return;
        }
        self.handle_failure(error);
    }

    /// Server deltas arrived on the document's subscription.
    pub fn on_delta(&mut self, message: DeltaMessage) {
        if !self.is_connected() {
            tracing::debug!("Ignoring delta for disconnected document {}", self.document_id);
            return;
        }
        self.buffer(message);
        self.drain_buffered();
        if self.state == ChannelState::WaitingSync {
            self.check_synced();
        }
    }

    /// The resync backoff armed under `retry_version` elapsed.
    pub fn on_resync_timer(&mut self, retry_version: u64) {
        if !self.is_current(retry_version, "resync timer") {
            return;
        }
        if self.state != ChannelState::DelayResync {
            return;
        }
        tracing::info!(
            "Resyncing document {} from revision {}",
            self.document_id,
            self.queue.revision()
        );
        self.set_state(ChannelState::WaitingSync);
        // Echoes of fast-acked operations may have been lost with the
        // connection; ask for them again.
        let since = self.queue.revision() - self.queue.expected_acks() as u64;
        self.commands.push_back(ChannelCommand::RequestRevision {
            retry_version: self.retry_version,
            since,
        });
    }

    /// Reply to a [`ChannelCommand::RequestRevision`]: the server head is at
    /// `message.revision` and `message.deltas` are the operations after the
    /// requested revision.
    pub fn on_revision(&mut self, retry_version: u64, message: DeltaMessage) {
        if !self.is_current(retry_version, "revision reply") {
            return;
        }
        if self.state != ChannelState::WaitingSync {
            tracing::debug!("Ignoring revision reply while {}", self.state);
            return;
        }
        self.known_head_revision = self.known_head_revision.max(message.revision);
        self.buffer(message);
        self.drain_buffered();
        if self.state == ChannelState::WaitingSync {
            self.check_synced();
        }
    }

    /// The resync request under `retry_version` failed.
    pub fn on_revision_failed(&mut self, retry_version: u64, error: OtError) {
        if !self.is_current(retry_version, "revision failure") {
            return;
        }
        if self.state != ChannelState::WaitingSync {
            return;
        }
        self.handle_failure(error);
    }

    fn is_current(&self, retry_version: u64, what: &str) -> bool {
        if !self.is_connected() || retry_version != self.retry_version {
            tracing::debug!(
                "Dropping stale {} (version {}, current {})",
                what,
                retry_version,
                self.retry_version
            );
            return false;
        }
        true
    }

    fn set_state(&mut self, state: ChannelState) {
        if self.state == state {
            return;
        }
        tracing::debug!(
            "Channel for document {}: {} -> {}",
            self.document_id,
            self.state,
            state
        );
        let previous = self.state;
        self.state = state;
        let saving_changed =
            (previous == ChannelState::WaitingAck) != (state == ChannelState::WaitingAck);
        let recovered = state == ChannelState::AllAcked
            && matches!(
                previous,
                ChannelState::DelayResync | ChannelState::WaitingSync
            );
        if saving_changed || recovered {
            self.emit_save_state();
        }
    }

    fn emit_save_state(&mut self) {
        self.events.push_back(ChannelEvent::SaveStateChanged {
            is_saving: self.queue.has_unacked(),
            is_pending: !self.queue.is_clean(),
        });
    }

    fn emit_ack(&mut self, op: CompositeOperation) {
        let clean = self.queue.is_clean();
        self.events.push_back(ChannelEvent::Ack { op, clean });
    }

    fn maybe_send(&mut self) {
        if self.state != ChannelState::AllAcked
            || self.compound_depth > 0
            || self.send_scheduled
            || self.queue.has_unacked()
            || !self.queue.has_queued()
        {
            return;
        }
        self.send_scheduled = true;
        self.commands.push_back(ChannelCommand::ScheduleSend {
            delay: self.config.send_delay(),
        });
    }

    fn submit_unacked(&mut self) {
        let request = DeltaRequest {
            id: self.document_id.clone(),
            session_id: self.session_id.clone(),
            revision: self.queue.revision(),
            deltas: self.queue.unacked().to_vec(),
        };
        tracing::debug!(
            "Submitting {} operation(s) at revision {}",
            request.deltas.len(),
            request.revision
        );
        self.commands.push_back(ChannelCommand::Submit {
            retry_version: self.retry_version,
            request,
        });
    }

    fn all_acked(&mut self) {
        self.retry_attempt = 0;
        self.set_state(ChannelState::AllAcked);
        self.maybe_send();
    }

    fn handle_failure(&mut self, error: OtError) {
        if error.is_fatal() {
            self.fail(error);
            return;
        }
        let delay = self.config.retry.delay_for(self.retry_attempt);
        self.retry_attempt = self.retry_attempt.saturating_add(1);
        self.retry_version += 1;
        tracing::warn!(
            "Request for document {} failed, resyncing in {:?}: {}",
            self.document_id,
            delay,
            error
        );
        self.events.push_back(ChannelEvent::Error {
            error,
            is_fatal: false,
        });
        self.set_state(ChannelState::DelayResync);
        self.commands.push_back(ChannelCommand::ScheduleResync {
            retry_version: self.retry_version,
            delay,
        });
    }

    fn fail(&mut self, error: OtError) {
        tracing::error!(
            "Fatal error on document {}, closing channel: {}",
            self.document_id,
            error
        );
        self.events.push_back(ChannelEvent::Error {
            error,
            is_fatal: true,
        });
        self.disconnect();
    }

    fn buffer(&mut self, message: DeltaMessage) {
        if !message.deltas.is_empty() && message.first_revision().is_none() {
            tracing::warn!(
                "Dropping delta message claiming {} operations at revision {}",
                message.deltas.len(),
                message.revision
            );
            return;
        }
        for (revision, op) in message.into_revisions() {
            self.known_head_revision = self.known_head_revision.max(revision);
            self.buffered.entry(revision).or_insert(op);
        }
    }

    /// Feed buffered deltas to the queue in revision order until a gap.
    fn drain_buffered(&mut self) {
        while self.is_connected() {
            // Revisions up to here are already accounted for, counting the
            // echoes still expected from a fast ack.
            let floor = self.queue.revision() - self.queue.expected_acks() as u64;
            while let Some((&revision, _)) = self.buffered.first_key_value() {
                if revision > floor {
                    break;
                }
                tracing::debug!("Skipping already applied delta at revision {}", revision);
                self.buffered.remove(&revision);
            }

            let next = floor + 1;
            let Some(op) = self.buffered.remove(&next) else {
                break;
            };
            if let Err(e) = self.apply_delta(next, op) {
                self.fail(e);
            }
        }
    }

    fn apply_delta(&mut self, revision: u64, op: CompositeOperation) -> OtResult<()> {
        if self.queue.expected_ack(revision)? {
            return Ok(());
        }

        if op.session_id.as_ref() == Some(&self.session_id) {
            let acked = self.queue.unacked().first().cloned().ok_or_else(|| {
                OtError::QueueInvariant(format!(
                    "echo of own operation at revision {} with nothing in flight",
                    revision
                ))
            })?;
            let done = self.queue.ack_client_op(revision)?;
            self.emit_ack(acked.with_revision(revision));
            if done && matches!(self.state, ChannelState::WaitingAck | ChannelState::DelayResync)
            {
                self.all_acked();
            }
            return Ok(());
        }

        self.queue.server_op(revision, op)?;
        self.events.push_back(ChannelEvent::RemoteOp { revision });
        Ok(())
    }

    fn check_synced(&mut self) {
        if self.queue.revision() < self.known_head_revision {
            return;
        }
        if self.queue.has_unacked() {
            tracing::info!(
                "Document {} synced at revision {}; resubmitting in-flight batch",
                self.document_id,
                self.queue.revision()
            );
            self.submit_unacked();
            self.set_state(ChannelState::WaitingAck);
        } else {
            tracing::info!(
                "Document {} synced at revision {}",
                self.document_id,
                self.queue.revision()
            );
            self.all_acked();
        }
    }
}
