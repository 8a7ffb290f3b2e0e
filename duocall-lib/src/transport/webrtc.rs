use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{spawn, sync::watch};
use tracing::{debug, trace, warn};
use webrtc::{
    api::{
        interceptor_registry::register_default_interceptors, media_engine::MediaEngine,
        setting_engine::SettingEngine, APIBuilder,
    },
    ice_transport::{
        ice_candidate::{RTCIceCandidate, RTCIceCandidateInit},
        ice_server::RTCIceServer,
    },
    interceptor::registry::Registry,
    peer_connection::{
        configuration::RTCConfiguration, peer_connection_state::RTCPeerConnectionState,
        sdp::{sdp_type::RTCSdpType, session_description::RTCSessionDescription},
        RTCPeerConnection,
    },
    rtp_transceiver::rtp_receiver::RTCRtpReceiver,
    track::{
        track_local::{track_local_static_sample::TrackLocalStaticSample, TrackLocal},
        track_remote::TrackRemote,
    },
};

use crate::{
    call::EventSink,
    error::{NegotiationError, TeardownError},
    signaling::{machine::TransportState, IceCandidate, SdpKind, SessionDescription},
};

use super::{LocalMedia, NegotiationTransport, RemoteTrack, TransportEvent, TransportFactory};

async fn create_peer_connection(
    ice_servers: &[String],
) -> Result<RTCPeerConnection, NegotiationError> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;
    let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
    let mut setting_engine = SettingEngine::default();
    setting_engine.set_ice_timeouts(None, Some(Duration::from_secs(20 * 60)), None);
    let config = RTCConfiguration {
        ice_servers: vec![RTCIceServer {
            urls: ice_servers.to_vec(),
            ..Default::default()
        }],
        ..Default::default()
    };
    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .with_setting_engine(setting_engine)
        .build()
        .new_peer_connection(config)
        .await?)
}

/// Local tracks fed by a capture source. The source keeps writing samples
/// until [`LocalMedia::stop`] is called.
pub struct LocalTracks {
    tracks: Vec<Arc<TrackLocalStaticSample>>,
    stopped: watch::Sender<bool>,
}

impl LocalTracks {
    pub fn new(tracks: Vec<Arc<TrackLocalStaticSample>>) -> Self {
        let (stopped, _) = watch::channel(false);
        Self { tracks, stopped }
    }

    pub fn tracks(&self) -> &[Arc<TrackLocalStaticSample>] {
        &self.tracks
    }

    pub fn subscribe_stopped(&self) -> watch::Receiver<bool> {
        self.stopped.subscribe()
    }
}

#[async_trait]
impl LocalMedia for LocalTracks {
    async fn stop(&self) -> Result<(), TeardownError> {
        self.stopped.send_replace(true);
        Ok(())
    }
}

fn to_candidate(candidate: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_mline_index,
        username_fragment: candidate.username_fragment,
    }
}

fn to_transport_state(state: RTCPeerConnectionState) -> Option<TransportState> {
    match state {
        RTCPeerConnectionState::Connecting => Some(TransportState::Connecting),
        RTCPeerConnectionState::Connected => Some(TransportState::Connected),
        RTCPeerConnectionState::Disconnected => Some(TransportState::Disconnected),
        RTCPeerConnectionState::Failed => Some(TransportState::Failed),
        RTCPeerConnectionState::Closed => Some(TransportState::Closed),
        RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => None,
    }
}

#[derive(derive_new::new)]
pub struct WebRtcTransportFactory {
    ice_servers: Vec<String>,
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    type Media = LocalTracks;

    async fn create(
        &self,
        media: &LocalTracks,
        events: EventSink,
    ) -> Result<Arc<dyn NegotiationTransport>, NegotiationError> {
        let rtc = create_peer_connection(&self.ice_servers).await?;

        for track in media.tracks() {
            let sender = rtc
                .add_track(Arc::clone(track) as Arc<dyn TrackLocal + Send + Sync>)
                .await?;
            // RTCP has to be read for the interceptors to work.
            spawn(async move {
                let mut buf = vec![0u8; 1500];
                while sender.read(&mut buf).await.is_ok() {}
            });
        }

        let sink = events.clone();
        rtc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            match candidate.map(|c| c.to_json()).transpose() {
                Ok(candidate) => {
                    sink.transport(TransportEvent::LocalCandidate(candidate.map(to_candidate)));
                }
                Err(err) => warn!("unusable local candidate: {}", err),
            }
            Box::pin(async {})
        }));

        let sink = events.clone();
        rtc.on_peer_connection_state_change(Box::new(move |state| {
            debug!("on_peer_connection_state_change {}", state);
            if let Some(state) = to_transport_state(state) {
                sink.transport(TransportEvent::StateChanged(state));
            }
            Box::pin(async {})
        }));

        let sink = events;
        rtc.on_track(Box::new(move |track, receiver, _transceiver| {
            let remote = WebRtcRemoteTrack {
                id: track.id(),
                stream_id: track.stream_id(),
                kind: track.kind().to_string(),
                receiver,
            };
            spawn(drain_rtp(track));
            sink.transport(TransportEvent::RemoteTrack(Arc::new(remote)));
            Box::pin(async {})
        }));

        Ok(Arc::new(WebRtcTransport { rtc }))
    }
}

async fn drain_rtp(track: Arc<TrackRemote>) {
    let id = track.id();
    while track.read_rtp().await.is_ok() {}
    trace!("remote track {} ended", id);
}

struct WebRtcTransport {
    rtc: RTCPeerConnection,
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription, NegotiationError> {
    Ok(match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp)?,
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp)?,
    })
}

fn from_rtc(desc: RTCSessionDescription) -> Option<SessionDescription> {
    let kind = match desc.sdp_type {
        RTCSdpType::Offer => SdpKind::Offer,
        RTCSdpType::Answer => SdpKind::Answer,
        _ => return None,
    };
    Some(SessionDescription {
        kind,
        sdp: desc.sdp,
    })
}

#[async_trait]
impl NegotiationTransport for WebRtcTransport {
    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        let offer = self.rtc.create_offer(None).await?;
        from_rtc(offer).ok_or_else(|| NegotiationError::msg("created offer is not an offer"))
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        let answer = self.rtc.create_answer(None).await?;
        from_rtc(answer).ok_or_else(|| NegotiationError::msg("created answer is not an answer"))
    }

    async fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), NegotiationError> {
        Ok(self.rtc.set_local_description(to_rtc(desc)?).await?)
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), NegotiationError> {
        Ok(self.rtc.set_remote_description(to_rtc(desc)?).await?)
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        from_rtc(self.rtc.local_description().await?)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError> {
        let candidate = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        Ok(self.rtc.add_ice_candidate(candidate).await?)
    }

    async fn close(&self) -> Result<(), TeardownError> {
        self.rtc
            .close()
            .await
            .map_err(|err| TeardownError::new("close transport", err))
    }
}

struct WebRtcRemoteTrack {
    id: String,
    stream_id: String,
    kind: String,
    receiver: Arc<RTCRtpReceiver>,
}

#[async_trait]
impl RemoteTrack for WebRtcRemoteTrack {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn stream_id(&self) -> String {
        self.stream_id.clone()
    }

    fn kind(&self) -> String {
        self.kind.clone()
    }

    async fn stop(&self) -> Result<(), TeardownError> {
        self.receiver
            .stop()
            .await
            .map_err(|err| TeardownError::new("stop remote track", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_offers_and_answers_are_forwarded() {
        let mut desc = RTCSessionDescription::default();
        desc.sdp_type = RTCSdpType::Answer;
        desc.sdp = "v=0\r\n".to_owned();
        assert_eq!(
            from_rtc(desc.clone()),
            Some(SessionDescription::answer("v=0\r\n"))
        );
        desc.sdp_type = RTCSdpType::Pranswer;
        assert_eq!(from_rtc(desc), None);
    }

    #[test]
    fn connection_states() {
        assert_eq!(to_transport_state(RTCPeerConnectionState::New), None);
        assert_eq!(
            to_transport_state(RTCPeerConnectionState::Failed),
            Some(TransportState::Failed)
        );
    }

    #[tokio::test]
    async fn local_tracks_report_stop() {
        let tracks = LocalTracks::new(vec![]);
        let mut stopped = tracks.subscribe_stopped();
        tracks.stop().await.unwrap();
        stopped.changed().await.unwrap();
        assert!(*stopped.borrow());
    }
}
