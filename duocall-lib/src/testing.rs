//! Test doubles shared by the unit tests.

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{sync::mpsc::UnboundedReceiver, time::timeout};

use crate::{
    call::{
        event_sink::{Envelope, SessionInput},
        EventSink,
    },
    config::MediaConstraints,
    error::{CaptureError, NegotiationError, Stage, TeardownError},
    signaling::{
        machine::{StepKind, TransportState},
        IceCandidate, RelayEvent, SessionDescription,
    },
    transport::{
        LocalMedia, MediaCapture, NegotiationTransport, RemoteTrack, TransportEvent,
        TransportFactory,
    },
};

pub const REMOTE_STREAM_ID: &str = "remote-stream";

/// A queued session input, reduced to something comparable.
#[derive(Debug, PartialEq)]
pub enum Observed {
    Relay(RelayEvent),
    RelayClosed,
    LocalCandidate(Option<IceCandidate>),
    RemoteTrack(String),
    TransportState(TransportState),
    Completed(StepKind),
    Timeout(Stage),
    HangUp,
}

pub async fn next_input(rx: &mut UnboundedReceiver<Envelope>) -> Observed {
    let envelope = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no input within 5 seconds")
        .expect("queue closed");
    match envelope.input {
        SessionInput::Relay(event) => Observed::Relay(event),
        SessionInput::RelayClosed => Observed::RelayClosed,
        SessionInput::Transport(TransportEvent::LocalCandidate(candidate)) => {
            Observed::LocalCandidate(candidate)
        }
        SessionInput::Transport(TransportEvent::RemoteTrack(track)) => {
            Observed::RemoteTrack(track.id())
        }
        SessionInput::Transport(TransportEvent::StateChanged(state)) => {
            Observed::TransportState(state)
        }
        SessionInput::Completed(step, _) => Observed::Completed(step),
        SessionInput::Timeout(stage) => Observed::Timeout(stage),
        SessionInput::HangUp => Observed::HangUp,
    }
}

/// What the mocks did, shared between a test and its doubles.
#[derive(Debug, Default)]
pub struct TallyState {
    pub media_acquired: usize,
    pub media_stopped: usize,
    pub transports_created: usize,
    pub transports_closed: usize,
    pub tracks_stopped: usize,
    pub candidates_applied: usize,
}

#[derive(Clone, Debug, Default)]
pub struct Tally(Arc<Mutex<TallyState>>);

impl Tally {
    pub fn get(&self) -> MutexGuard<'_, TallyState> {
        self.0.lock().unwrap()
    }
}

#[derive(Clone, Default)]
pub struct MockCapture {
    pub tally: Tally,
    pub fail: bool,
    pub fail_stop: bool,
}

pub struct MockMedia {
    tally: Tally,
    fail_stop: bool,
}

#[async_trait]
impl MediaCapture for MockCapture {
    type Media = MockMedia;

    async fn acquire(&self, _constraints: &MediaConstraints) -> Result<MockMedia, CaptureError> {
        if self.fail {
            return Err(CaptureError("permission denied".to_owned()));
        }
        self.tally.get().media_acquired += 1;
        Ok(MockMedia {
            tally: self.tally.clone(),
            fail_stop: self.fail_stop,
        })
    }
}

#[async_trait]
impl LocalMedia for MockMedia {
    async fn stop(&self) -> Result<(), TeardownError> {
        self.tally.get().media_stopped += 1;
        if self.fail_stop {
            return Err(TeardownError::new("stop local media", "device busy"));
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct MockFactory {
    pub tally: Tally,
    pub fail_close: bool,
    pub fail_track_stop: bool,
}

#[async_trait]
impl TransportFactory for MockFactory {
    type Media = MockMedia;

    async fn create(
        &self,
        _media: &MockMedia,
        events: EventSink,
    ) -> Result<Arc<dyn NegotiationTransport>, NegotiationError> {
        self.tally.get().transports_created += 1;
        Ok(Arc::new(MockTransport {
            factory: self.clone(),
            events,
            state: Mutex::default(),
        }))
    }
}

#[derive(Default)]
struct MockTransportState {
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    gathered: Vec<IceCandidate>,
    connected: bool,
}

/// Gathers one host candidate per local description and reports the
/// connection as soon as both descriptions are in place.
struct MockTransport {
    factory: MockFactory,
    events: EventSink,
    state: Mutex<MockTransportState>,
}

impl MockTransport {
    fn state(&self) -> MutexGuard<'_, MockTransportState> {
        self.state.lock().unwrap()
    }

    fn connect_if_ready(&self) {
        {
            let mut state = self.state();
            if state.connected || state.local.is_none() || state.remote.is_none() {
                return;
            }
            state.connected = true;
        }
        self.events
            .transport(TransportEvent::StateChanged(TransportState::Connected));
        for id in ["audio", "video"] {
            self.events
                .transport(TransportEvent::RemoteTrack(Arc::new(MockTrack {
                    id: id.to_owned(),
                    factory: self.factory.clone(),
                })));
        }
    }
}

#[async_trait]
impl NegotiationTransport for MockTransport {
    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        Ok(SessionDescription::offer("v=0 offer"))
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        if self.state().remote.is_none() {
            return Err(NegotiationError::msg("no remote offer"));
        }
        Ok(SessionDescription::answer("v=0 answer"))
    }

    async fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), NegotiationError> {
        let candidate = IceCandidate {
            candidate: "candidate:1 1 udp 2130706431 192.0.2.1 50000 typ host".to_owned(),
            sdp_mid: Some("0".to_owned()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        };
        {
            let mut state = self.state();
            state.local = Some(desc);
            state.gathered.push(candidate.clone());
        }
        self.events
            .transport(TransportEvent::LocalCandidate(Some(candidate)));
        self.events.transport(TransportEvent::LocalCandidate(None));
        self.connect_if_ready();
        Ok(())
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), NegotiationError> {
        if !desc.sdp.starts_with("v=0") {
            return Err(NegotiationError::msg("malformed session description"));
        }
        self.state().remote = Some(desc);
        self.connect_if_ready();
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        let state = self.state();
        let local = state.local.as_ref()?;
        let mut sdp = local.sdp.clone();
        for candidate in &state.gathered {
            sdp.push_str("\r\na=");
            sdp.push_str(&candidate.candidate);
        }
        Some(SessionDescription {
            kind: local.kind,
            sdp,
        })
    }

    async fn add_ice_candidate(&self, _candidate: IceCandidate) -> Result<(), NegotiationError> {
        if self.state().remote.is_none() {
            return Err(NegotiationError::msg("remote description is not set"));
        }
        self.factory.tally.get().candidates_applied += 1;
        Ok(())
    }

    async fn close(&self) -> Result<(), TeardownError> {
        self.factory.tally.get().transports_closed += 1;
        if self.factory.fail_close {
            return Err(TeardownError::new("close transport", "already closed"));
        }
        Ok(())
    }
}

struct MockTrack {
    id: String,
    factory: MockFactory,
}

#[async_trait]
impl RemoteTrack for MockTrack {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn stream_id(&self) -> String {
        REMOTE_STREAM_ID.to_owned()
    }

    fn kind(&self) -> String {
        self.id.clone()
    }

    async fn stop(&self) -> Result<(), TeardownError> {
        self.factory.tally.get().tracks_stopped += 1;
        if self.factory.fail_track_stop {
            return Err(TeardownError::new("stop remote track", "track is gone"));
        }
        Ok(())
    }
}
