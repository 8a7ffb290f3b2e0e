pub mod webrtc;

use std::sync::Arc;

use async_trait::async_trait;
use getset::Getters;

use crate::{
    call::EventSink,
    config::MediaConstraints,
    error::{CaptureError, NegotiationError, TeardownError},
    signaling::{machine::TransportState, IceCandidate, SessionDescription},
};

/// The local endpoint of the media session.
#[async_trait]
pub trait NegotiationTransport: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError>;
    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError>;
    async fn set_local_description(&self, desc: SessionDescription)
        -> Result<(), NegotiationError>;
    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), NegotiationError>;
    /// The current local description including every candidate gathered so
    /// far.
    async fn local_description(&self) -> Option<SessionDescription>;
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError>;
    async fn close(&self) -> Result<(), TeardownError>;
}

/// Creates one transport per call attempt. The transport reports its events
/// (local candidates, remote tracks, connection state) through `events`.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    type Media: Send + Sync;

    async fn create(
        &self,
        media: &Self::Media,
        events: EventSink,
    ) -> Result<Arc<dyn NegotiationTransport>, NegotiationError>;
}

#[async_trait]
pub trait RemoteTrack: Send + Sync {
    fn id(&self) -> String;
    fn stream_id(&self) -> String;
    fn kind(&self) -> String;
    async fn stop(&self) -> Result<(), TeardownError>;
}

pub enum TransportEvent {
    LocalCandidate(Option<IceCandidate>),
    RemoteTrack(Arc<dyn RemoteTrack>),
    StateChanged(TransportState),
}

/// Acquires local capture devices.
#[async_trait]
pub trait MediaCapture: Send + Sync {
    type Media: LocalMedia;

    async fn acquire(&self, constraints: &MediaConstraints) -> Result<Self::Media, CaptureError>;
}

#[async_trait]
pub trait LocalMedia: Send + Sync + 'static {
    async fn stop(&self) -> Result<(), TeardownError>;
}

/// Remote tracks grouped under the stream id of the first track that arrived.
#[derive(Getters)]
pub struct RemoteStream {
    #[getset(get = "pub")]
    id: String,
    tracks: Vec<Arc<dyn RemoteTrack>>,
}

impl RemoteStream {
    pub fn new(first: Arc<dyn RemoteTrack>) -> Self {
        Self {
            id: first.stream_id(),
            tracks: vec![first],
        }
    }

    pub fn add_track(&mut self, track: Arc<dyn RemoteTrack>) {
        self.tracks.push(track);
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// Stops every track. A failing track does not keep the others running.
    pub async fn stop_all(&self) -> Vec<TeardownError> {
        let mut errors = Vec::new();
        for track in &self.tracks {
            if let Err(err) = track.stop().await {
                errors.push(err);
            }
        }
        errors
    }
}
