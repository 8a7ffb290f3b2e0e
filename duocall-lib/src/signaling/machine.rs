//! The signaling state machine.
//!
//! `SignalingMachine` never touches the relay or the transport itself. Every
//! input returns the effects the caller has to carry out; asynchronous
//! transport work comes back later as [`Input::Completed`].

use crate::{
    error::{CallError, NegotiationError, ProtocolViolation, Stage},
    room::RoomId,
};

use super::{
    batching::{BatchPolicy, CandidateAction, CandidatePolicy},
    IceCandidate, RelayEvent, SdpKind, SessionDescription,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalingState {
    Idle,
    Joining,
    AwaitingInvite,
    Offering,
    Negotiating,
    Connected,
    Closed,
}

impl SignalingState {
    pub fn is_live(self) -> bool {
        !matches!(self, SignalingState::Idle | SignalingState::Closed)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Caller,
    Callee,
}

/// The only place a role is decided: `joined` makes this side the Caller,
/// an `invite` makes it the Callee. Every other message leaves it open.
pub fn role_for(event: &RelayEvent) -> Option<Role> {
    match event {
        RelayEvent::Joined => Some(Role::Caller),
        RelayEvent::Invite(_) => Some(Role::Callee),
        _ => None,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportState {
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Asynchronous transport work requested by the machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportStep {
    /// Create an offer and set it as the local description.
    CreateOffer,
    /// Set the offer as remote description, then create and set the answer.
    AnswerOffer(SessionDescription),
    /// Set the answer as remote description.
    ApplyAnswer(SessionDescription),
    ApplyCandidate(IceCandidate),
}

impl TransportStep {
    pub fn kind(&self) -> StepKind {
        match self {
            TransportStep::CreateOffer => StepKind::CreateOffer,
            TransportStep::AnswerOffer(_) => StepKind::AnswerOffer,
            TransportStep::ApplyAnswer(_) => StepKind::ApplyAnswer,
            TransportStep::ApplyCandidate(_) => StepKind::ApplyCandidate,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepKind {
    CreateOffer,
    AnswerOffer,
    ApplyAnswer,
    ApplyCandidate,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Teardown {
    /// Send `bye` to the peer before releasing resources.
    pub notify_peer: bool,
    pub error: Option<CallError>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    Emit(RelayEvent),
    Run(TransportStep),
    /// Read the transport's current local description and send it as
    /// `invite` (offer) or `ok` (answer).
    FlushLocalDescription(SdpKind),
    Teardown(Teardown),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Input {
    Relay(RelayEvent),
    /// A local candidate, or `None` once gathering has completed.
    LocalCandidate(Option<IceCandidate>),
    TransportState(TransportState),
    Completed(StepKind, Result<(), NegotiationError>),
    Timeout(Stage),
}

impl Input {
    fn name(&self) -> &'static str {
        match self {
            Input::Relay(event) => event.name(),
            Input::LocalCandidate(Some(_)) => "local candidate",
            Input::LocalCandidate(None) => "gathering complete",
            Input::TransportState(_) => "transport state",
            Input::Completed(..) => "step completion",
            Input::Timeout(_) => "timeout",
        }
    }
}

type Transition = Result<Vec<Effect>, ProtocolViolation>;

pub struct SignalingMachine {
    state: SignalingState,
    role: Option<Role>,
    room: Option<RoomId>,
    policy: Box<dyn CandidatePolicy>,
    local_set: bool,
    remote_set: bool,
    remote_pending: bool,
    gathering_complete: bool,
    description_sent: bool,
    transport_connected: bool,
    outgoing_candidates: Vec<IceCandidate>,
    /// Remote candidates that arrived while the remote description was
    /// still being applied.
    incoming_candidates: Vec<IceCandidate>,
}

impl Default for SignalingMachine {
    fn default() -> Self {
        Self::new(Box::new(BatchPolicy))
    }
}

impl SignalingMachine {
    pub fn new(policy: Box<dyn CandidatePolicy>) -> Self {
        Self {
            state: SignalingState::Idle,
            role: None,
            room: None,
            policy,
            local_set: false,
            remote_set: false,
            remote_pending: false,
            gathering_complete: false,
            description_sent: false,
            transport_connected: false,
            outgoing_candidates: Vec::new(),
            incoming_candidates: Vec::new(),
        }
    }

    pub fn state(&self) -> SignalingState {
        self.state
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn room(&self) -> Option<&RoomId> {
        self.room.as_ref()
    }

    pub fn local_description_set(&self) -> bool {
        self.local_set
    }

    pub fn remote_description_set(&self) -> bool {
        self.remote_set
    }

    fn violation(&self, input: &'static str, reason: &'static str) -> ProtocolViolation {
        ProtocolViolation::new(self.state, input, reason)
    }

    fn reset(&mut self) {
        self.role = None;
        self.room = None;
        self.local_set = false;
        self.remote_set = false;
        self.remote_pending = false;
        self.gathering_complete = false;
        self.description_sent = false;
        self.transport_connected = false;
        self.outgoing_candidates.clear();
        self.incoming_candidates.clear();
    }

    /// Begins a session by asking the relay for membership of `room`.
    pub fn start(&mut self, room: RoomId) -> Transition {
        if self.state.is_live() {
            return Err(self.violation("start", "a session is already running"));
        }
        self.reset();
        self.room = Some(room.clone());
        self.state = SignalingState::Joining;
        Ok(vec![Effect::Emit(RelayEvent::Join(room))])
    }

    /// Forces the machine into `Closed` and forgets all session state.
    pub fn close(&mut self) {
        self.reset();
        self.state = SignalingState::Closed;
    }

    fn teardown(&mut self, notify_peer: bool, error: Option<CallError>) -> Vec<Effect> {
        self.state = SignalingState::Closed;
        vec![Effect::Teardown(Teardown { notify_peer, error })]
    }

    pub fn handle(&mut self, input: Input) -> Transition {
        let name = input.name();
        if !self.state.is_live() {
            return Err(self.violation(name, "no session is running"));
        }
        match input {
            Input::Relay(event) => self.on_relay(event),
            Input::LocalCandidate(candidate) => self.on_local_candidate(candidate),
            Input::TransportState(state) => self.on_transport_state(state),
            Input::Completed(step, result) => self.on_completed(step, result),
            Input::Timeout(stage) => Ok(self.on_timeout(stage)),
        }
    }

    fn on_relay(&mut self, event: RelayEvent) -> Transition {
        let name = event.name();
        let role = role_for(&event);
        match event {
            RelayEvent::Join(_) => Err(self.violation(name, "join is never delivered inbound")),
            RelayEvent::Joined => {
                if self.state != SignalingState::Joining {
                    return Err(self.violation(name, "not waiting for membership"));
                }
                self.role = role;
                self.state = SignalingState::Offering;
                Ok(vec![Effect::Run(TransportStep::CreateOffer)])
            }
            RelayEvent::Created(room) => {
                if self.state != SignalingState::Joining {
                    return Err(self.violation(name, "not waiting for membership"));
                }
                if self.room.as_ref() != Some(&room) {
                    return Err(self.violation(name, "confirmation for another room"));
                }
                self.state = SignalingState::AwaitingInvite;
                Ok(vec![])
            }
            RelayEvent::NewPeer => Ok(vec![]),
            RelayEvent::Full => {
                if self.state != SignalingState::Joining {
                    return Err(self.violation(name, "not waiting for membership"));
                }
                let room = self.room.clone();
                Ok(self.teardown(false, room.map(CallError::RoomFull)))
            }
            RelayEvent::Invite(offer) => {
                if !matches!(
                    self.state,
                    SignalingState::Joining | SignalingState::AwaitingInvite
                ) {
                    return Err(self.violation(name, "an invite was already accepted or sent"));
                }
                if offer.kind != SdpKind::Offer {
                    return Err(self.violation(name, "payload is not an offer"));
                }
                self.role = role;
                self.remote_pending = true;
                self.state = SignalingState::Negotiating;
                Ok(vec![Effect::Run(TransportStep::AnswerOffer(offer))])
            }
            RelayEvent::Ok(answer) => {
                if self.role != Some(Role::Caller)
                    || self.state != SignalingState::Negotiating
                    || !self.description_sent
                {
                    return Err(self.violation(name, "no invite is outstanding"));
                }
                if self.remote_set || self.remote_pending {
                    return Err(self.violation(name, "remote description already applied"));
                }
                if answer.kind != SdpKind::Answer {
                    return Err(self.violation(name, "payload is not an answer"));
                }
                self.remote_pending = true;
                Ok(vec![Effect::Run(TransportStep::ApplyAnswer(answer))])
            }
            RelayEvent::IceCandidate(candidate) => {
                if self.remote_pending {
                    self.incoming_candidates.push(candidate);
                    return Ok(vec![]);
                }
                if !self.remote_set {
                    return Err(self.violation(name, "remote description is not set"));
                }
                Ok(vec![Effect::Run(TransportStep::ApplyCandidate(candidate))])
            }
            // The relay only delivers `bye` within the room, so the payload is
            // not checked.
            RelayEvent::Bye(_) => Ok(self.teardown(false, None)),
        }
    }

    fn on_local_candidate(&mut self, candidate: Option<IceCandidate>) -> Transition {
        if !matches!(
            self.state,
            SignalingState::Offering | SignalingState::Negotiating | SignalingState::Connected
        ) {
            return Err(self.violation("local candidate", "no local description in progress"));
        }
        match self.policy.on_local_candidate(candidate.as_ref()) {
            CandidateAction::Ignore => Ok(vec![]),
            CandidateAction::FlushDescription => {
                self.gathering_complete = true;
                Ok(self.try_flush())
            }
            CandidateAction::SendCandidate => {
                let Some(candidate) = candidate else {
                    return Ok(vec![]);
                };
                if self.description_sent {
                    Ok(vec![Effect::Emit(RelayEvent::IceCandidate(candidate))])
                } else {
                    self.outgoing_candidates.push(candidate);
                    Ok(vec![])
                }
            }
        }
    }

    /// Sends the local description once it is set and the policy allows it.
    /// Local description always precedes `invite` and `ok`.
    fn try_flush(&mut self) -> Vec<Effect> {
        if !self.local_set || self.description_sent {
            return vec![];
        }
        if !self.gathering_complete && !self.policy.flush_on_local_description() {
            return vec![];
        }
        let Some(role) = self.role else {
            return vec![];
        };
        self.description_sent = true;
        let kind = match role {
            Role::Caller => {
                self.state = SignalingState::Negotiating;
                SdpKind::Offer
            }
            Role::Callee => SdpKind::Answer,
        };
        let mut effects = vec![Effect::FlushLocalDescription(kind)];
        effects.extend(
            self.outgoing_candidates
                .drain(..)
                .map(|candidate| Effect::Emit(RelayEvent::IceCandidate(candidate))),
        );
        self.try_connect();
        effects
    }

    fn try_connect(&mut self) {
        if self.state == SignalingState::Negotiating
            && self.local_set
            && self.remote_set
            && self.transport_connected
        {
            self.state = SignalingState::Connected;
        }
    }

    fn apply_incoming_candidates(&mut self) -> Vec<Effect> {
        self.incoming_candidates
            .drain(..)
            .map(|candidate| Effect::Run(TransportStep::ApplyCandidate(candidate)))
            .collect()
    }

    fn on_completed(&mut self, step: StepKind, result: Result<(), NegotiationError>) -> Transition {
        if let Err(err) = result {
            return Ok(self.teardown(true, Some(CallError::Negotiation(err))));
        }
        match step {
            StepKind::CreateOffer => {
                if self.state != SignalingState::Offering || self.local_set {
                    return Err(self.violation("offer completion", "no offer was requested"));
                }
                self.local_set = true;
                Ok(self.try_flush())
            }
            StepKind::AnswerOffer => {
                if self.role != Some(Role::Callee) || !self.remote_pending {
                    return Err(self.violation("answer completion", "no invite was accepted"));
                }
                self.remote_pending = false;
                self.remote_set = true;
                self.local_set = true;
                let mut effects = self.apply_incoming_candidates();
                effects.extend(self.try_flush());
                self.try_connect();
                Ok(effects)
            }
            StepKind::ApplyAnswer => {
                if self.role != Some(Role::Caller) || !self.remote_pending {
                    return Err(self.violation("answer completion", "no answer was requested"));
                }
                self.remote_pending = false;
                self.remote_set = true;
                self.try_connect();
                Ok(self.apply_incoming_candidates())
            }
            StepKind::ApplyCandidate => Ok(vec![]),
        }
    }

    fn on_transport_state(&mut self, state: TransportState) -> Transition {
        match state {
            TransportState::Connected => {
                self.transport_connected = true;
                self.try_connect();
                Ok(vec![])
            }
            TransportState::Failed => Ok(self.teardown(
                true,
                Some(CallError::Negotiation(NegotiationError::msg(
                    "transport connection failed",
                ))),
            )),
            TransportState::Disconnected => {
                self.transport_connected = false;
                Ok(vec![])
            }
            TransportState::Connecting | TransportState::Closed => Ok(vec![]),
        }
    }

    fn on_timeout(&mut self, stage: Stage) -> Vec<Effect> {
        let pending = match stage {
            Stage::Join => self.state == SignalingState::Joining,
            Stage::Peer => self.state != SignalingState::Connected,
        };
        if !pending {
            return vec![];
        }
        self.teardown(true, Some(CallError::Timeout(stage)))
    }
}
