pub mod batching;
pub mod machine;

use serde::{Deserialize, Serialize};

use crate::room::RoomId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// Opaque negotiation payload, shaped like the browser's
/// `RTCSessionDescriptionInit`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Network reachability descriptor, shaped like the browser's
/// `RTCIceCandidateInit`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        default,
        rename = "sdpMLineIndex",
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// Messages exchanged through the relay. On the wire every message is
/// `{"event": <name>, "data": <payload>}`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum RelayEvent {
    Join(RoomId),
    Created(RoomId),
    Joined,
    NewPeer,
    Full,
    Invite(SessionDescription),
    Ok(SessionDescription),
    IceCandidate(IceCandidate),
    Bye(RoomId),
}

impl RelayEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RelayEvent::Join(_) => "join",
            RelayEvent::Created(_) => "created",
            RelayEvent::Joined => "joined",
            RelayEvent::NewPeer => "new_peer",
            RelayEvent::Full => "full",
            RelayEvent::Invite(_) => "invite",
            RelayEvent::Ok(_) => "ok",
            RelayEvent::IceCandidate(_) => "ice_candidate",
            RelayEvent::Bye(_) => "bye",
        }
    }
}
