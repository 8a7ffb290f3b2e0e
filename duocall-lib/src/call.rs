pub(crate) mod event_sink;

use std::sync::Arc;

use tokio::{
    spawn,
    sync::{broadcast, mpsc},
    task::JoinHandle,
    time::sleep,
};
use tracing::{debug, error, info, trace, warn};

pub use self::event_sink::{EventSink, HangUpHandle};

use self::event_sink::{Envelope, SessionInput};

use crate::{
    config::CallConfig,
    error::{CallError, NegotiationError, Stage, TeardownError},
    relay::{RelayChannel, RelayConnector},
    room::RoomId,
    signaling::{
        machine::{Effect, Input, Role, SignalingMachine, SignalingState, TransportStep},
        RelayEvent, SdpKind,
    },
    transport::{
        LocalMedia, MediaCapture, NegotiationTransport, RemoteStream, RemoteTrack,
        TransportEvent, TransportFactory,
    },
};

/// What the controller reports to the user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallEvent {
    StateChanged(SignalingState),
    RemoteStreamArrived { stream_id: String },
    Failed(CallError),
    Ended { room: RoomId },
}

/// Everything one call attempt owns.
struct Session<M: LocalMedia> {
    room: RoomId,
    media: Option<M>,
    relay: Option<Arc<dyn RelayChannel>>,
    transport: Option<Arc<dyn NegotiationTransport>>,
    remote_stream: Option<RemoteStream>,
    timers: Vec<JoinHandle<()>>,
}

impl<M: LocalMedia> Session<M> {
    /// Releases every resource. Each step runs even if an earlier one failed.
    async fn release(mut self, notify_peer: bool) -> Vec<TeardownError> {
        let mut errors = Vec::new();
        for timer in self.timers.drain(..) {
            timer.abort();
        }
        if notify_peer {
            match &self.relay {
                Some(relay) => {
                    if let Err(err) = relay.emit(RelayEvent::Bye(self.room.clone())).await {
                        errors.push(TeardownError::new("notify peer", err));
                    }
                }
                None => debug!("relay channel is gone, peer is not notified"),
            }
        }
        if let Some(stream) = self.remote_stream.take() {
            errors.extend(stream.stop_all().await);
        }
        if let Some(transport) = self.transport.take() {
            if let Err(err) = transport.close().await {
                errors.push(err);
            }
        }
        if let Some(media) = self.media.take() {
            if let Err(err) = media.stop().await {
                errors.push(err);
            }
        }
        if let Some(relay) = self.relay.take() {
            relay.close().await;
        }
        errors
    }
}

/// Owns one call at a time: its room, relay channel, transport and local
/// media. Relay and transport events are queued and handled one by one by
/// [`CallController::handle_next`] or [`CallController::run_until_closed`].
pub struct CallController<C, R, F>
where
    C: MediaCapture,
    R: RelayConnector,
    F: TransportFactory<Media = C::Media>,
{
    config: CallConfig,
    capture: C,
    relay_connector: R,
    transport_factory: F,
    machine: SignalingMachine,
    session: Option<Session<C::Media>>,
    epoch: u64,
    queue_tx: mpsc::UnboundedSender<Envelope>,
    queue_rx: mpsc::UnboundedReceiver<Envelope>,
    status_tx: broadcast::Sender<CallEvent>,
    outcome: Option<Result<(), CallError>>,
}

impl<C, R, F> Drop for CallController<C, R, F>
where
    C: MediaCapture,
    R: RelayConnector,
    F: TransportFactory<Media = C::Media>,
{
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        info!("controller dropped during a call in room {}", session.room);
        let teardown = async move {
            for err in session.release(true).await {
                warn!("{}", err);
            }
        };
        if let Ok(rt) = tokio::runtime::Handle::try_current() {
            rt.spawn(teardown);
        } else {
            match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt.block_on(teardown),
                Err(err) => warn!("failed to run teardown: {}", err),
            }
        }
    }
}

impl<C, R, F> CallController<C, R, F>
where
    C: MediaCapture,
    R: RelayConnector,
    F: TransportFactory<Media = C::Media>,
{
    pub fn new(config: CallConfig, capture: C, relay_connector: R, transport_factory: F) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (status_tx, _) = broadcast::channel(32);
        let machine = SignalingMachine::new(config.candidates.policy());
        Self {
            config,
            capture,
            relay_connector,
            transport_factory,
            machine,
            session: None,
            epoch: 0,
            queue_tx,
            queue_rx,
            status_tx,
            outcome: None,
        }
    }

    pub fn state(&self) -> SignalingState {
        self.machine.state()
    }

    pub fn role(&self) -> Option<Role> {
        self.machine.role()
    }

    pub fn room(&self) -> Option<&RoomId> {
        self.session.as_ref().map(|session| &session.room)
    }

    pub fn has_transport(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.transport.is_some())
    }

    pub fn remote_stream(&self) -> Option<&RemoteStream> {
        self.session
            .as_ref()
            .and_then(|session| session.remote_stream.as_ref())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.status_tx.subscribe()
    }

    /// A handle that ends the current call. `None` when no call is running.
    pub fn hang_up_handle(&self) -> Option<HangUpHandle> {
        self.session.as_ref()?;
        Some(HangUpHandle::new(self.sink()))
    }

    fn sink(&self) -> EventSink {
        EventSink::new(self.queue_tx.clone(), self.epoch)
    }

    fn publish(&self, event: CallEvent) {
        let _ = self.status_tx.send(event);
    }

    fn transport(&self) -> Option<Arc<dyn NegotiationTransport>> {
        self.session.as_ref()?.transport.clone()
    }

    /// Acquires local media, joins `room` through a new relay channel and
    /// prepares a transport seeded with the media.
    pub async fn start_call(&mut self, room: Option<RoomId>) -> Result<(), CallError> {
        if self.session.is_some() {
            return Err(CallError::AlreadyActive);
        }
        let room = room.ok_or_else(|| {
            CallError::Configuration("no room id in the entry context".to_owned())
        })?;
        self.epoch += 1;
        self.outcome = None;
        let sink = self.sink();
        info!("starting call in room {}", room);

        let media = self
            .capture
            .acquire(&self.config.media)
            .await
            .map_err(|err| {
                error!("failed to acquire local media: {}", err);
                CallError::from(err)
            })?;
        let relay = match self.relay_connector.open(sink.clone()).await {
            Ok(relay) => relay,
            Err(err) => {
                error!("failed to open relay channel: {}", err);
                if let Err(err) = media.stop().await {
                    warn!("{}", err);
                }
                return Err(err.into());
            }
        };
        self.session = Some(Session {
            room: room.clone(),
            media: Some(media),
            relay: Some(relay),
            transport: None,
            remote_stream: None,
            timers: Vec::new(),
        });

        let join = match self.machine.start(room) {
            Ok(effects) => effects,
            Err(violation) => {
                warn!("{}", violation);
                self.abort_setup().await;
                return Err(CallError::AlreadyActive);
            }
        };
        for effect in join {
            if let Effect::Emit(event) = effect {
                if let Err(err) = self.emit(event).await {
                    error!("failed to join: {}", err);
                    self.abort_setup().await;
                    return Err(err);
                }
            }
        }

        let transport = {
            let Some(media) = self.session.as_ref().and_then(|s| s.media.as_ref()) else {
                self.abort_setup().await;
                return Err(CallError::Capture("local media vanished".to_owned()));
            };
            self.transport_factory.create(media, sink.clone()).await
        };
        let transport = match transport {
            Ok(transport) => transport,
            Err(err) => {
                error!("failed to create transport: {}", err);
                self.abort_setup().await;
                return Err(err.into());
            }
        };
        let timers = self.arm_timers(&sink);
        if let Some(session) = self.session.as_mut() {
            session.transport = Some(transport);
            session.timers = timers;
        }
        self.publish(CallEvent::StateChanged(self.machine.state()));
        Ok(())
    }

    fn arm_timers(&self, sink: &EventSink) -> Vec<JoinHandle<()>> {
        [
            (Stage::Join, self.config.join_timeout()),
            (Stage::Peer, self.config.peer_timeout()),
        ]
        .into_iter()
        .filter_map(|(stage, duration)| {
            let duration = duration?;
            let sink = sink.clone();
            Some(spawn(async move {
                sleep(duration).await;
                sink.timeout(stage);
            }))
        })
        .collect()
    }

    async fn abort_setup(&mut self) {
        if let Some(session) = self.session.take() {
            for err in session.release(false).await {
                warn!("{}", err);
            }
        }
        self.epoch += 1;
        self.machine.close();
    }

    /// Hangs up. Safe in every state; a second call does nothing.
    pub async fn end_call(&mut self) {
        if self.session.is_none() {
            if self.machine.state() == SignalingState::Idle {
                self.machine.close();
                self.publish(CallEvent::StateChanged(SignalingState::Closed));
            }
            return;
        }
        self.teardown(true, None).await;
    }

    async fn teardown(&mut self, notify_peer: bool, error: Option<CallError>) {
        let Some(session) = self.session.take() else {
            return;
        };
        // Anything still in flight for this session is stale from here on.
        self.epoch += 1;
        let room = session.room.clone();
        info!("tearing down call in room {}", room);
        for err in session.release(notify_peer).await {
            warn!("{}", err);
        }
        self.machine.close();
        if let Some(err) = &error {
            error!("call failed: {}", err);
            self.publish(CallEvent::Failed(err.clone()));
        }
        self.publish(CallEvent::Ended { room });
        self.publish(CallEvent::StateChanged(SignalingState::Closed));
        self.outcome = Some(match error {
            Some(err) => Err(err),
            None => Ok(()),
        });
    }

    /// Waits for the next queued event and handles it. Returns `false` when
    /// no call is running.
    pub async fn handle_next(&mut self) -> bool {
        if self.session.is_none() {
            return false;
        }
        let Some(envelope) = self.queue_rx.recv().await else {
            return false;
        };
        self.dispatch(envelope).await;
        self.session.is_some()
    }

    /// Handles one event if one is already queued, without waiting.
    pub async fn try_handle_next(&mut self) -> bool {
        let Ok(envelope) = self.queue_rx.try_recv() else {
            return false;
        };
        self.dispatch(envelope).await;
        true
    }

    /// Handles every event that is already queued.
    pub async fn process_pending(&mut self) -> usize {
        let mut count = 0;
        while self.try_handle_next().await {
            count += 1;
        }
        count
    }

    /// Drives the call until it is closed. Returns the error that ended it,
    /// if any.
    pub async fn run_until_closed(&mut self) -> Result<(), CallError> {
        while self.handle_next().await {}
        self.outcome.take().unwrap_or(Ok(()))
    }

    async fn dispatch(&mut self, envelope: Envelope) {
        if envelope.epoch != self.epoch || self.session.is_none() {
            trace!("dropped event of a finished session");
            return;
        }
        match envelope.input {
            SessionInput::HangUp => self.end_call().await,
            SessionInput::RelayClosed => self.on_relay_closed().await,
            SessionInput::Relay(event) => {
                debug!("received {}", event.name());
                if event == RelayEvent::NewPeer {
                    info!("peer joined the room");
                }
                self.step(Input::Relay(event)).await;
            }
            SessionInput::Transport(TransportEvent::RemoteTrack(track)) => {
                self.on_remote_track(track);
            }
            SessionInput::Transport(TransportEvent::LocalCandidate(candidate)) => {
                trace!("local candidate {:?}", candidate);
                self.step(Input::LocalCandidate(candidate)).await;
            }
            SessionInput::Transport(TransportEvent::StateChanged(state)) => {
                debug!("transport state {:?}", state);
                self.step(Input::TransportState(state)).await;
            }
            SessionInput::Completed(step, result) => {
                trace!("{:?} completed: {:?}", step, result);
                self.step(Input::Completed(step, result)).await;
            }
            SessionInput::Timeout(stage) => self.step(Input::Timeout(stage)).await,
        }
    }

    async fn step(&mut self, input: Input) {
        let before = self.machine.state();
        let effects = match self.machine.handle(input) {
            Ok(effects) => effects,
            Err(violation) => {
                warn!("protocol violation: {}", violation);
                return;
            }
        };
        let after = self.machine.state();
        if before != after && after != SignalingState::Closed {
            debug!("{:?} -> {:?}", before, after);
            self.publish(CallEvent::StateChanged(after));
        }
        self.execute(effects).await;
    }

    async fn execute(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            let result = match effect {
                Effect::Emit(event) => self.emit(event).await,
                Effect::Run(step) => {
                    self.run_step(step);
                    Ok(())
                }
                Effect::FlushLocalDescription(kind) => self.flush_local_description(kind).await,
                Effect::Teardown(teardown) => {
                    self.teardown(teardown.notify_peer, teardown.error).await;
                    return;
                }
            };
            if let Err(err) = result {
                let notify_peer = !matches!(err, CallError::Relay(_));
                self.teardown(notify_peer, Some(err)).await;
                return;
            }
        }
    }

    async fn emit(&self, event: RelayEvent) -> Result<(), CallError> {
        let relay = self
            .session
            .as_ref()
            .and_then(|session| session.relay.clone())
            .ok_or_else(|| CallError::Relay("relay channel is gone".to_owned()))?;
        debug!("sending {}", event.name());
        Ok(relay.emit(event).await?)
    }

    /// Sends the transport's local description, which by now carries every
    /// candidate the policy waited for.
    async fn flush_local_description(&self, kind: SdpKind) -> Result<(), CallError> {
        let transport = self
            .transport()
            .ok_or_else(|| NegotiationError::msg("transport is gone"))?;
        let desc = transport
            .local_description()
            .await
            .filter(|desc| desc.kind == kind)
            .ok_or_else(|| NegotiationError::msg("local description is not set"))?;
        let event = match kind {
            SdpKind::Offer => RelayEvent::Invite(desc),
            SdpKind::Answer => RelayEvent::Ok(desc),
        };
        info!("sending {} with local description", event.name());
        self.emit(event).await
    }

    /// Runs transport work in the background; its completion is queued like
    /// any other event.
    fn run_step(&self, step: TransportStep) {
        let Some(transport) = self.transport() else {
            warn!("no transport for {:?}", step.kind());
            return;
        };
        let sink = self.sink();
        spawn(async move {
            let kind = step.kind();
            let result = run_transport_step(transport.as_ref(), step).await;
            sink.completed(kind, result);
        });
    }

    fn on_remote_track(&mut self, track: Arc<dyn RemoteTrack>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        info!("remote {} track {} arrived", track.kind(), track.id());
        match &mut session.remote_stream {
            Some(stream) => stream.add_track(track),
            None => {
                let stream = RemoteStream::new(track);
                let stream_id = stream.id().clone();
                session.remote_stream = Some(stream);
                self.publish(CallEvent::RemoteStreamArrived { stream_id });
            }
        }
    }

    async fn on_relay_closed(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.relay = None;
        }
        if self.machine.state() == SignalingState::Connected {
            info!("relay channel closed, media continues directly");
            return;
        }
        self.teardown(
            false,
            Some(CallError::Relay(
                "relay channel closed before the call connected".to_owned(),
            )),
        )
        .await;
    }
}

async fn run_transport_step(
    transport: &dyn NegotiationTransport,
    step: TransportStep,
) -> Result<(), NegotiationError> {
    match step {
        TransportStep::CreateOffer => {
            let offer = transport.create_offer().await?;
            transport.set_local_description(offer).await
        }
        TransportStep::AnswerOffer(offer) => {
            transport.set_remote_description(offer).await?;
            let answer = transport.create_answer().await?;
            transport.set_local_description(answer).await
        }
        TransportStep::ApplyAnswer(answer) => transport.set_remote_description(answer).await,
        TransportStep::ApplyCandidate(candidate) => transport.add_ice_candidate(candidate).await,
    }
}
