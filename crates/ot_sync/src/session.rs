//! Async driver tying a channel to a document and a transport.
//!
//! [`DocumentSession`] owns one [`OperationChannel`] and the
//! [`CollaborativeTarget`] it keeps in sync. It runs on a single tokio task:
//! inbound events (local edits, server deltas, request replies) arrive on an
//! mpsc stream, outbound requests leave on another, and the channel's send
//! and resync timers are plain `sleep_until` deadlines in the same
//! `select!` loop. Nothing is shared across tasks.

use crate::channel::{ChannelCommand, ChannelEvent, OperationChannel};
use crate::composite::CompositeOperation;
use crate::error::{OtError, OtResult};
use crate::ids::DocumentId;
use crate::message::{DeltaMessage, DeltaRequest};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

/// The collaborative-type layer a channel delivers into.
pub trait CollaborativeTarget {
    /// Apply an operation to the local state and raise change events.
    fn consume(&mut self, op: &CompositeOperation) -> OtResult<()>;

    /// Operations that recreate the current state from nothing.
    fn to_initialization(&self) -> CompositeOperation;

    /// The save indicator changed.
    fn on_save_state_changed(&mut self, _is_saving: bool, _is_pending: bool) {}

    /// The channel reported an error. After a fatal one the session is over.
    fn on_error(&mut self, _error: &OtError, _is_fatal: bool) {}
}

/// Events fed into a running session.
#[derive(Clone, Debug)]
pub enum Inbound {
    /// A local edit, not yet applied to the target.
    LocalEdit(CompositeOperation),
    BeginCompound,
    EndCompound,
    /// Deltas pushed on the document subscription.
    Delta(DeltaMessage),
    SubmitAck { retry_version: u64, revision: u64 },
    SubmitFailed { retry_version: u64, error: OtError },
    Revision {
        retry_version: u64,
        message: DeltaMessage,
    },
    RevisionFailed { retry_version: u64, error: OtError },
    /// End the session.
    Disconnect,
}

/// Requests for the transport.
#[derive(Clone, Debug, PartialEq)]
pub enum Outbound {
    Subscribe(DocumentId),
    Unsubscribe(DocumentId),
    Submit {
        retry_version: u64,
        request: DeltaRequest,
    },
    RequestRevision {
        retry_version: u64,
        document_id: DocumentId,
        since: u64,
    },
}

/// One document kept in sync over one channel.
pub struct DocumentSession<T> {
    channel: OperationChannel,
    target: T,
    outbound: mpsc::UnboundedSender<Outbound>,
    send_deadline: Option<Instant>,
    resync_deadline: Option<(u64, Instant)>,
}

impl<T: CollaborativeTarget> DocumentSession<T> {
    pub fn new(
        channel: OperationChannel,
        target: T,
        outbound: mpsc::UnboundedSender<Outbound>,
    ) -> Self {
        Self {
            channel,
            target,
            outbound,
            send_deadline: None,
            resync_deadline: None,
        }
    }

    pub fn channel(&self) -> &OperationChannel {
        &self.channel
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    /// Connect the channel to the document loaded at `revision`.
    pub fn connect(&mut self, revision: u64) -> OtResult<()> {
        self.channel.connect(revision)?;
        self.pump();
        Ok(())
    }

    /// Apply a local edit to the target and hand it to the channel.
    pub fn local_edit(&mut self, op: CompositeOperation) -> OtResult<()> {
        if !self.channel.is_connected() {
            return Err(OtError::Channel(
                "cannot edit a disconnected document".to_string(),
            ));
        }
        self.target.consume(&op)?;
        self.channel.submit(op)?;
        self.pump();
        Ok(())
    }

    /// Process one inbound event.
    pub fn handle(&mut self, inbound: Inbound) -> OtResult<()> {
        match inbound {
            Inbound::LocalEdit(op) => return self.local_edit(op),
            Inbound::BeginCompound => self.channel.begin_compound(),
            Inbound::EndCompound => self.channel.end_compound()?,
            Inbound::Delta(message) => self.channel.on_delta(message),
            Inbound::SubmitAck {
                retry_version,
                revision,
            } => self.channel.on_submit_ack(retry_version, revision),
            Inbound::SubmitFailed {
                retry_version,
                error,
            } => self.channel.on_submit_failed(retry_version, error),
            Inbound::Revision {
                retry_version,
                message,
            } => self.channel.on_revision(retry_version, message),
            Inbound::RevisionFailed {
                retry_version,
                error,
            } => self.channel.on_revision_failed(retry_version, error),
            Inbound::Disconnect => self.channel.disconnect(),
        }
        self.pump();
        Ok(())
    }

    /// Run until the inbound stream closes or the channel disconnects.
    /// Returns the target with every delivered operation applied.
    pub async fn run(mut self, mut inbound: mpsc::UnboundedReceiver<Inbound>) -> T {
        while self.channel.is_connected() {
            let send_at = self.send_deadline;
            let resync_at = self.resync_deadline;

            tokio::select! {
                msg = inbound.recv() => {
                    match msg {
                        Some(msg) => {
                            if let Err(e) = self.handle(msg) {
                                tracing::warn!("Rejected inbound event: {}", e);
                            }
                        }
                        None => {
                            tracing::debug!("Inbound stream closed");
                            self.channel.disconnect();
                            self.pump();
                        }
                    }
                }
                _ = sleep_until(send_at.unwrap_or_else(Instant::now)), if send_at.is_some() => {
                    self.send_deadline = None;
                    self.channel.flush();
                    self.pump();
                }
                _ = sleep_until(resync_at.map(|(_, at)| at).unwrap_or_else(Instant::now)), if resync_at.is_some() => {
                    self.resync_deadline = None;
                    if let Some((retry_version, _)) = resync_at {
                        self.channel.on_resync_timer(retry_version);
                    }
                    self.pump();
                }
            }
        }
        self.target
    }

    /// Carry out the channel's pending commands and deliver its events.
    fn pump(&mut self) {
        loop {
            if let Some(command) = self.channel.next_command() {
                self.execute(command);
                continue;
            }
            if let Some(event) = self.channel.next_event() {
                self.dispatch(event);
                continue;
            }
            break;
        }
    }

    fn execute(&mut self, command: ChannelCommand) {
        let outbound = match command {
            ChannelCommand::ScheduleSend { delay } => {
                self.send_deadline = Some(Instant::now() + delay);
                return;
            }
            ChannelCommand::ScheduleResync {
                retry_version,
                delay,
            } => {
                self.resync_deadline = Some((retry_version, Instant::now() + delay));
                return;
            }
            ChannelCommand::Subscribe { document_id } => Outbound::Subscribe(document_id),
            ChannelCommand::Unsubscribe { document_id } => {
                self.send_deadline = None;
                self.resync_deadline = None;
                Outbound::Unsubscribe(document_id)
            }
            ChannelCommand::Submit {
                retry_version,
                request,
            } => Outbound::Submit {
                retry_version,
                request,
            },
            ChannelCommand::RequestRevision {
                retry_version,
                since,
            } => Outbound::RequestRevision {
                retry_version,
                document_id: self.channel.document_id().clone(),
                since,
            },
        };
        if self.outbound.send(outbound).is_err() {
            tracing::warn!(
                "Transport for document {} is gone; dropping request",
                self.channel.document_id()
            );
        }
    }

    fn dispatch(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::RemoteOp { revision } => {
                let Some(op) = self.channel.receive() else {
                    return;
                };
                if let Err(e) = self.target.consume(&op) {
                    tracing::error!(
                        "Remote operation at revision {} does not apply: {}",
                        revision,
                        e
                    );
                    self.target.on_error(&e, true);
                    self.channel.disconnect();
                }
            }
            ChannelEvent::Ack { op, clean } => {
                tracing::debug!(
                    "Operation acknowledged at revision {:?} (clean: {})",
                    op.revision,
                    clean
                );
            }
            ChannelEvent::SaveStateChanged {
                is_saving,
                is_pending,
            } => self.target.on_save_state_changed(is_saving, is_pending),
            ChannelEvent::Error { error, is_fatal } => self.target.on_error(&error, is_fatal),
        }
    }
}
