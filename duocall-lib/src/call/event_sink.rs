use tokio::sync::mpsc;
use tracing::trace;

use crate::{
    error::{NegotiationError, Stage},
    signaling::{machine::StepKind, RelayEvent},
    transport::TransportEvent,
};

pub(crate) enum SessionInput {
    Relay(RelayEvent),
    RelayClosed,
    Transport(TransportEvent),
    Completed(StepKind, Result<(), NegotiationError>),
    Timeout(Stage),
    HangUp,
}

pub(crate) struct Envelope {
    pub epoch: u64,
    pub input: SessionInput,
}

/// Entry point into a session's event queue. Every event is stamped with the
/// session it belongs to, so events posted after that session ended are
/// dropped by the controller.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<Envelope>,
    epoch: u64,
}

impl EventSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Envelope>, epoch: u64) -> Self {
        Self { tx, epoch }
    }

    #[cfg(test)]
    pub(crate) fn test_channel() -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx, 1), rx)
    }

    fn send(&self, input: SessionInput) {
        let envelope = Envelope {
            epoch: self.epoch,
            input,
        };
        if self.tx.send(envelope).is_err() {
            trace!("session queue is gone (epoch {})", self.epoch);
        }
    }

    pub fn relay(&self, event: RelayEvent) {
        self.send(SessionInput::Relay(event));
    }

    /// The relay connection ended; no more relay events will arrive.
    pub fn relay_closed(&self) {
        self.send(SessionInput::RelayClosed);
    }

    pub fn transport(&self, event: TransportEvent) {
        self.send(SessionInput::Transport(event));
    }

    pub(crate) fn completed(&self, step: StepKind, result: Result<(), NegotiationError>) {
        self.send(SessionInput::Completed(step, result));
    }

    pub(crate) fn timeout(&self, stage: Stage) {
        self.send(SessionInput::Timeout(stage));
    }

    pub(crate) fn hang_up(&self) {
        self.send(SessionInput::HangUp);
    }
}

/// Ends the call it was taken from, from any task.
#[derive(Clone)]
pub struct HangUpHandle(EventSink);

impl HangUpHandle {
    pub(crate) fn new(sink: EventSink) -> Self {
        Self(sink)
    }

    pub fn hang_up(&self) {
        self.0.hang_up();
    }
}
